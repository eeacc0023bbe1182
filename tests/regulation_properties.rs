use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use strata_sampler::basecall_adapter::{
    BasecallAdapter, BasecallResult, Calibration, PackagedRead, ReadData,
};
use strata_sampler::classifier::Classifier;
use strata_sampler::config::BasecallerConfig;
use strata_sampler::fragment_collection::FragmentCollection;
use strata_sampler::live_client::LiveReadsClient;
use strata_sampler::metrics;
use strata_sampler::nanopore_read::NanoporeRead;
use strata_sampler::read_processor::ReadProcessor;
use strata_sampler::regulator::ReadUntilRegulator;
use strata_sampler::strata::StrataBalancer;

/// Routes sequences to strata by exact-match lookup table, so scenarios can
/// control classification deterministically instead of depending on a real
/// aligner or IBF build.
struct TableClassifier {
    table: Mutex<HashMap<String, String>>,
}

impl TableClassifier {
    fn new(pairs: impl IntoIterator<Item = (&'static str, &'static str)>) -> Self {
        Self {
            table: Mutex::new(
                pairs
                    .into_iter()
                    .map(|(seq, stratum)| (seq.to_owned(), stratum.to_owned()))
                    .collect(),
            ),
        }
    }
}

impl Classifier for TableClassifier {
    fn activate_sequences(&self, _stratum_id: &str) {}
    fn deactivate_sequences(&self, _stratum_id: &str) {}
    fn is_sequence_present(&self, sequence: &str) -> Option<String> {
        self.table.lock().unwrap().get(sequence).cloned()
    }
}

struct OneBatchClient {
    batches: Mutex<Vec<Vec<(u32, ReadData)>>>,
    unblocked: Mutex<Vec<(u32, String)>>,
    stopped: Mutex<Vec<(u32, String)>>,
}

impl OneBatchClient {
    fn new(batches: Vec<Vec<(u32, ReadData)>>) -> Self {
        Self {
            batches: Mutex::new(batches),
            unblocked: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
        }
    }
}

impl LiveReadsClient for OneBatchClient {
    fn is_running(&self) -> bool {
        !self.batches.lock().unwrap().is_empty()
    }
    fn channel_count(&self) -> u32 {
        1
    }
    fn signal_dtype(&self) -> &str {
        "i16"
    }
    fn calibration_values(&self) -> HashMap<u32, Calibration> {
        HashMap::new()
    }
    fn sample_rate(&self) -> f32 {
        4000.0
    }
    fn get_read_chunks(&mut self, _max_count: usize) -> Vec<(u32, ReadData)> {
        self.batches.lock().unwrap().pop().unwrap_or_default()
    }
    fn unblock_read_batch(&mut self, reads: &[(u32, String)]) {
        self.unblocked.lock().unwrap().extend_from_slice(reads);
    }
    fn stop_receiving_batch(&mut self, reads: &[(u32, String)]) {
        self.stopped.lock().unwrap().extend_from_slice(reads);
    }
    fn run(&mut self) {}
    fn reset(&mut self) {
        self.batches.lock().unwrap().clear();
    }
}

struct EchoSubmitter {
    sequences: HashMap<String, String>,
}

impl strata_sampler::basecall_adapter::BasecallSubmitter for EchoSubmitter {
    fn submit(&mut self, _packaged: &[PackagedRead]) -> anyhow::Result<bool> {
        Ok(true)
    }
    fn poll_completed(&mut self) -> anyhow::Result<Vec<BasecallResult>> {
        let results = self
            .sequences
            .drain()
            .map(|(read_id, sequence)| BasecallResult { read_id, sub_tag: 0, sequence })
            .collect();
        Ok(results)
    }
}

fn basecaller_config() -> BasecallerConfig {
    BasecallerConfig {
        config: "dna_r10".to_owned(),
        address: "ipc:///tmp/.guppy/5555".to_owned(),
        max_attempts: 1,
    }
}

fn make_read(id: &str, len: usize) -> NanoporeRead {
    NanoporeRead::new(
        id.to_owned(),
        "run-1".to_owned(),
        "/data/fastq_pass/x.fastq".to_owned(),
        Utc::now(),
        None,
        None,
        None,
        30.0,
        "A".repeat(len),
    )
}

/// Scenario 1 — cold start: zero reads observed, one classified chunk,
/// not warmed up yet, so the decision is always stop_receiving.
#[test]
fn cold_start_stops_receiving_and_leaves_fragments_untouched() {
    let (bus, _handle) = metrics::spawn(tempfile::tempdir().unwrap().path()).unwrap();
    let classifier = Arc::new(TableClassifier::new([("ACGTACGT", "A")]));
    let balancer = Arc::new(StrataBalancer::new(
        &["A".to_owned(), "B".to_owned()],
        vec![("A".to_owned(), 1u32), ("B".to_owned(), 1u32)],
        5,
        1000,
        10,
        0,
        classifier.clone(),
        classifier,
        bus.clone(),
    ));
    let fragments = Arc::new(FragmentCollection::new());
    let mut regulator = ReadUntilRegulator::new(balancer.clone(), fragments.clone(), bus, 4, 0.0);

    let mut client = OneBatchClient::new(vec![vec![(
        0,
        ReadData { id: "r1".to_owned(), raw_data: vec![0; 4], start_sample: 0 },
    )]]);
    let adapter = BasecallAdapter::new(&basecaller_config(), 4000.0, 0.0);
    let mut submitter = EchoSubmitter {
        sequences: [("r1".to_owned(), "ACGTACGT".to_owned())].into_iter().collect(),
    };

    regulator.run(&mut client, &mut submitter, &adapter, 10);

    assert!(!balancer.are_all_warmed_up());
    assert!(client.unblocked.lock().unwrap().is_empty());
    assert_eq!(client.stopped.lock().unwrap().len(), 1);
    assert!(!fragments.was_ejected("r1"));
}

/// Scenario 3 — an unmatched read accumulates stop_receiving only once it
/// hits the depletion threshold, and is forgotten afterward.
#[test]
fn unmatched_read_stops_receiving_exactly_at_depletion_threshold() {
    let (bus, _handle) = metrics::spawn(tempfile::tempdir().unwrap().path()).unwrap();
    let classifier = Arc::new(TableClassifier::new([]));
    let balancer = Arc::new(StrataBalancer::new(
        &["A".to_owned()],
        vec![("A".to_owned(), 1u32)],
        5,
        1000,
        10,
        0,
        classifier.clone(),
        classifier,
        bus.clone(),
    ));
    let fragments = Arc::new(FragmentCollection::new());
    let adapter = BasecallAdapter::new(&basecaller_config(), 4000.0, 0.0);

    let depletion_chunks = 4;
    let mut regulator =
        ReadUntilRegulator::new(balancer.clone(), fragments.clone(), bus, depletion_chunks, 0.0);

    for i in 0..depletion_chunks {
        let expect_stop = i + 1 == depletion_chunks;
        let mut client = OneBatchClient::new(vec![vec![(
            0,
            ReadData { id: "r1".to_owned(), raw_data: vec![0; 4], start_sample: 0 },
        )]]);
        let mut submitter = EchoSubmitter {
            sequences: [("r1".to_owned(), "NNNN".to_owned())].into_iter().collect(),
        };
        regulator.run(&mut client, &mut submitter, &adapter, 10);

        let stopped = client.stopped.lock().unwrap().clone();
        if expect_stop {
            assert_eq!(stopped, vec![(0, "r1".to_owned())]);
        } else {
            assert!(stopped.is_empty());
        }
    }
}

/// Scenario 4 — a read ejected by the regulator has its filesystem-arrival
/// counterpart dropped by the read processor before it ever reaches
/// `update_alignments`.
#[test]
fn ejected_read_fragment_is_dropped_on_filesystem_arrival() {
    let fragments = Arc::new(FragmentCollection::new());
    fragments.add_ejected("r2");

    let processor = ReadProcessor::new(100, 1_000_000_000, fragments.clone());
    processor.add_read(make_read("r2", 2500));
    processor.quit();

    let (bus, _handle) = metrics::spawn(tempfile::tempdir().unwrap().path()).unwrap();
    let classifier = Arc::new(TableClassifier::new([]));
    let balancer = StrataBalancer::new(
        &["A".to_owned()],
        vec![("A".to_owned(), 1u32)],
        5,
        1000,
        10,
        0,
        classifier.clone(),
        classifier,
        bus,
    );

    processor.run(&balancer);

    // the counters must be untouched: update_alignments was never called
    // with the dropped read.
    assert!(!balancer.is_warmed_up("A"));
}

/// Scenario 6 — shutdown flushes and closes the metrics store; every
/// command sent before the sentinel is durable on disk afterward.
#[test]
fn shutdown_flushes_metrics_store_before_join_returns() {
    let dir = tempfile::tempdir().unwrap();
    let (bus, handle) = metrics::spawn(dir.path()).unwrap();

    bus.send(metrics::MetricCommand::basecalled_read("r1", "A", 1000));
    bus.send(metrics::MetricCommand::classified_read("r1", Some("A".to_owned())));
    bus.shutdown();
    handle.join().unwrap();

    let basecalled = std::fs::read_to_string(dir.path().join("basecalled_reads.tsv")).unwrap();
    let classified = std::fs::read_to_string(dir.path().join("classified_reads.tsv")).unwrap();
    assert!(basecalled.contains("r1"));
    assert!(classified.contains("r1"));
}

/// Property 6 (at-most-one-action) + property 3 (acceptance range): across
/// many thin_out draws once warmed up, the read-id never appears in both
/// decisions within a cycle, and the underlying acceptance stays in (0, 1].
#[test]
fn at_most_one_action_per_cycle() {
    let (bus, _handle) = metrics::spawn(tempfile::tempdir().unwrap().path()).unwrap();
    let classifier = Arc::new(TableClassifier::new([("ACGT", "A"), ("TTTT", "B")]));
    let balancer = Arc::new(StrataBalancer::new(
        &["A".to_owned(), "B".to_owned()],
        vec![("A".to_owned(), 1u32), ("B".to_owned(), 3u32)],
        1,
        10,
        1,
        0,
        classifier.clone(),
        classifier,
        bus.clone(),
    ));
    let fragments = Arc::new(FragmentCollection::new());
    let mut regulator = ReadUntilRegulator::new(balancer, fragments, bus, 4, 0.0);

    let mut client = OneBatchClient::new(vec![vec![
        (0, ReadData { id: "ra".to_owned(), raw_data: vec![0; 4], start_sample: 0 }),
        (1, ReadData { id: "rb".to_owned(), raw_data: vec![0; 4], start_sample: 0 }),
    ]]);
    let adapter = BasecallAdapter::new(&basecaller_config(), 4000.0, 0.0);
    let mut submitter = EchoSubmitter {
        sequences: [("ra".to_owned(), "ACGT".to_owned()), ("rb".to_owned(), "TTTT".to_owned())]
            .into_iter()
            .collect(),
    };

    regulator.run(&mut client, &mut submitter, &adapter, 10);

    let unblocked = client.unblocked.lock().unwrap();
    let stopped = client.stopped.lock().unwrap();
    for (channel, read_id) in unblocked.iter() {
        assert!(!stopped.contains(&(*channel, read_id.clone())));
    }
}
