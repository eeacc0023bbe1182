use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use log::info;
use log_once::info_once;
use rv::dist::Bernoulli;
use rv::traits::Rv;

use crate::classifier::Classifier;
use crate::estimator::EstimatorManager;
use crate::metrics::{MetricCommand, MetricsBus};
use crate::nanopore_read::NanoporeRead;

/// Per-stratum bookkeeping the balancer updates as alignments come in.
/// Counters are atomics so `is_warmed_up` is lock-free (§4.3: "predicates
/// are lock-free via atomics on counters").
struct StrataRecord {
    aligned_length: AtomicU64,
    aligned_read_count: AtomicU64,
}

impl StrataRecord {
    fn new() -> Self {
        Self {
            aligned_length: AtomicU64::new(0),
            aligned_read_count: AtomicU64::new(0),
        }
    }
}

/// Owns per-stratum alignment bookkeeping and the estimator manager, and
/// answers the warm-up and thinning questions the regulator and read
/// processor depend on (§4.3). Shared across the regulator hot-loop thread
/// and the read-processor worker thread via `Arc`.
pub struct StrataBalancer {
    records: IndexMap<String, StrataRecord>,
    estimator_manager: EstimatorManager,
    alignment_classifier: Arc<dyn Classifier>,
    classifier: Arc<dyn Classifier>,
    metrics: MetricsBus,
    minimum_mapped_bases: u64,
    minimum_reads_for_parameter_estimation: u64,
    all_warmed_up: AtomicBool,
}

impl StrataBalancer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stratum_keys: &[String],
        target_ratios: impl IntoIterator<Item = (String, u32)>,
        minimum_fragments_for_ratio_estimation: u64,
        minimum_mapped_bases: u64,
        minimum_reads_for_parameter_estimation: u64,
        thinning_accelerator: u32,
        alignment_classifier: Arc<dyn Classifier>,
        classifier: Arc<dyn Classifier>,
        metrics: MetricsBus,
    ) -> Self {
        let records = stratum_keys
            .iter()
            .map(|k| (k.clone(), StrataRecord::new()))
            .collect();
        let estimator_manager = EstimatorManager::new(
            target_ratios,
            minimum_fragments_for_ratio_estimation,
            thinning_accelerator,
        );
        Self {
            records,
            estimator_manager,
            alignment_classifier,
            classifier,
            metrics,
            minimum_mapped_bases,
            minimum_reads_for_parameter_estimation,
            all_warmed_up: AtomicBool::new(false),
        }
    }

    /// The live-regulation classifier: toggled active per stratum only once
    /// the whole system has warmed up (`read_processor.rs`). Never used for
    /// warm-up classification itself — see `alignment_classifier`.
    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    pub fn stratum_ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Called by the read processor's worker thread with a drained batch.
    /// Classifies each read against every stratum via the balancer's own
    /// always-on `alignment_classifier` — independent of whatever activation
    /// state the live-regulation `classifier` is in, since that one only
    /// turns on once warm-up (which this very method produces) has already
    /// completed. Feeds the alignment-warm-up counters and the estimator on
    /// a match.
    pub fn update_alignments(&self, reads: &[NanoporeRead]) {
        for read in reads {
            let Some(stratum_id) = self.alignment_classifier.is_sequence_present(&read.sequence) else {
                continue;
            };
            let Some(record) = self.records.get(&stratum_id) else {
                continue;
            };
            let length = read.length() as u64;
            record.aligned_length.fetch_add(length, Ordering::Relaxed);
            record.aligned_read_count.fetch_add(1, Ordering::Relaxed);
            self.estimator_manager.add_entire_read(&stratum_id, read.length());
            self.metrics.send(MetricCommand::basecalled_read(
                read.read_id.clone(),
                stratum_id,
                length,
            ));
        }
    }

    pub fn is_warmed_up(&self, stratum_id: &str) -> bool {
        match self.records.get(stratum_id) {
            Some(record) => {
                record.aligned_length.load(Ordering::Relaxed) >= self.minimum_mapped_bases
                    && record.aligned_read_count.load(Ordering::Relaxed)
                        >= self.minimum_reads_for_parameter_estimation
            }
            None => false,
        }
    }

    /// Memoized once true: flipping back to false is impossible by
    /// construction (counters only ever grow), so once every stratum has
    /// cleared the bar we never need to re-scan the whole map again.
    pub fn are_all_warmed_up(&self) -> bool {
        if self.all_warmed_up.load(Ordering::Relaxed) {
            return true;
        }
        let all_warm = self.records.keys().all(|id| self.is_warmed_up(id));
        if all_warm {
            self.all_warmed_up.store(true, Ordering::Relaxed);
            info_once!("all strata have crossed their warm-up thresholds; active regulation may begin");
            self.metrics.send(MetricCommand::print(
                "all strata warmed up, switching from observation to active regulation".to_owned(),
            ));
        }
        all_warm
    }

    pub fn update_estimated_received_bases(&self, stratum_id: &str) {
        self.estimator_manager.update_estimated_received_bases(stratum_id);
    }

    /// `true` means eject. Returns `false` until both the alignment warm-up
    /// and the ratio-estimation warm-up hold for this stratum (§4.3): before
    /// that point we have no basis for an acceptance rate, so we never
    /// thin.
    pub fn thin_out(&self, stratum_id: &str) -> bool {
        if !self.are_all_warmed_up() || !self.estimator_manager.are_all_warmed_up() {
            return false;
        }
        let acceptance = self.estimator_manager.acceptance_rate(stratum_id);
        let eject_probability = 1.0 - acceptance;
        if eject_probability <= 0.0 {
            return false;
        }
        if eject_probability >= 1.0 {
            return true;
        }
        let bernoulli = Bernoulli::new(eject_probability).expect("eject_probability in (0, 1)");
        let mut rng = rand::thread_rng();
        bernoulli.draw(&mut rng)
    }

    pub fn log_snapshot(&self) {
        for (id, record) in &self.records {
            info!(
                "stratum {id}: aligned_length={} aligned_read_count={}",
                record.aligned_length.load(Ordering::Relaxed),
                record.aligned_read_count.load(Ordering::Relaxed)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use std::sync::Mutex;

    struct StubClassifier {
        next: Mutex<Option<String>>,
    }

    impl Classifier for StubClassifier {
        fn activate_sequences(&self, _stratum_id: &str) {}
        fn deactivate_sequences(&self, _stratum_id: &str) {}
        fn is_sequence_present(&self, _sequence: &str) -> Option<String> {
            self.next.lock().unwrap().clone()
        }
    }

    fn balancer(classifier: Arc<dyn Classifier>) -> StrataBalancer {
        let (bus, _handle) = crate::metrics::spawn(tempfile::tempdir().unwrap().path()).unwrap();
        StrataBalancer::new(
            &["a".to_owned(), "b".to_owned()],
            vec![("a".to_owned(), 1u32), ("b".to_owned(), 3u32)],
            5,
            100,
            3,
            0,
            classifier.clone(),
            classifier,
            bus,
        )
    }

    fn make_read(id: &str, len: usize) -> NanoporeRead {
        NanoporeRead::new(
            id.to_owned(),
            "run-1".to_owned(),
            "/data/fastq_pass/x.fastq".to_owned(),
            chrono::Utc::now(),
            None,
            None,
            None,
            30.0,
            "A".repeat(len),
        )
    }

    #[test]
    fn not_warmed_up_before_thresholds_are_crossed() {
        let classifier = Arc::new(StubClassifier {
            next: Mutex::new(Some("a".to_owned())),
        });
        let bal = balancer(classifier);
        assert!(!bal.is_warmed_up("a"));
        assert!(!bal.are_all_warmed_up());
    }

    #[test]
    fn warms_up_after_enough_aligned_bases_and_reads() {
        let classifier = Arc::new(StubClassifier {
            next: Mutex::new(Some("a".to_owned())),
        });
        let bal = balancer(classifier);
        let reads: Vec<NanoporeRead> = (0..5).map(|i| make_read(&format!("r{i}"), 50)).collect();
        bal.update_alignments(&reads);
        assert!(bal.is_warmed_up("a"));
        // b never matched, so the whole system isn't warmed up yet.
        assert!(!bal.are_all_warmed_up());
    }

    #[test]
    fn thin_out_is_false_before_global_warm_up() {
        let classifier = Arc::new(StubClassifier {
            next: Mutex::new(Some("a".to_owned())),
        });
        let bal = balancer(classifier);
        assert!(!bal.thin_out("a"));
    }
}
