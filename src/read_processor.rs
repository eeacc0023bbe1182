use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::fragment_collection::FragmentCollection;
use crate::nanopore_read::NanoporeRead;
use crate::strata::StrataBalancer;

/// `None` is the shutdown sentinel (§4.6): pushed front-of-queue so it is
/// always the next thing the worker sees once it wakes.
struct Queue {
    items: VecDeque<Option<NanoporeRead>>,
    base_count: u64,
}

/// Bounded in-memory batching queue with two flush triggers: queue length
/// reaching `batch_size`, or accumulated base count reaching
/// `target_base_count` (§4.6). A dedicated worker thread drains whichever
/// trigger fires first into a batch and hands it to the strata balancer.
pub struct ReadProcessor {
    queue: Mutex<Queue>,
    condvar: Condvar,
    batch_size: usize,
    target_base_count: u64,
    fragments: Arc<FragmentCollection>,
}

impl ReadProcessor {
    pub fn new(batch_size: usize, target_base_count: u64, fragments: Arc<FragmentCollection>) -> Self {
        Self {
            queue: Mutex::new(Queue { items: VecDeque::new(), base_count: 0 }),
            condvar: Condvar::new(),
            batch_size,
            target_base_count,
            fragments,
        }
    }

    /// Enqueues a read unless it is the basecalled-on-disk tail of a read
    /// the regulator already ejected (§4.6) — including it would bias the
    /// estimators with a fragment that was never actually fully sequenced.
    pub fn add_read(&self, read: NanoporeRead) {
        if self.fragments.was_ejected(&read.read_id) {
            return;
        }
        let mut queue = self.queue.lock().unwrap();
        queue.base_count += read.length() as u64;
        queue.items.push_back(Some(read));
        if queue.items.len() >= self.batch_size || queue.base_count >= self.target_base_count {
            self.condvar.notify_one();
        }
    }

    pub fn quit(&self) {
        let mut queue = self.queue.lock().unwrap();
        queue.items.push_front(None);
        self.condvar.notify_one();
    }

    /// Runs on the dedicated worker thread until the sentinel is drained.
    /// The first time `balancer.are_all_warmed_up()` flips true, activates
    /// every stratum in the classifier exactly once — the handoff from
    /// pure observation to active regulation (§4.6).
    pub fn run(&self, balancer: &StrataBalancer) {
        let mut classifier_active = false;
        loop {
            let batch = {
                let mut queue = self.queue.lock().unwrap();
                while queue.items.is_empty() {
                    queue = self.condvar.wait(queue).unwrap();
                }

                let mut batch = Vec::new();
                let mut batched_bases = 0u64;
                let mut hit_sentinel = false;
                while !queue.items.is_empty()
                    && batch.len() < self.batch_size
                    && batched_bases < self.target_base_count
                {
                    match queue.items.pop_front().unwrap() {
                        None => {
                            hit_sentinel = true;
                            break;
                        }
                        Some(read) => {
                            let len = read.length() as u64;
                            queue.base_count = queue.base_count.saturating_sub(len);
                            batched_bases += len;
                            batch.push(read);
                        }
                    }
                }
                if hit_sentinel && batch.is_empty() {
                    None
                } else {
                    Some(batch)
                }
            };

            let Some(batch) = batch else { break };
            if batch.is_empty() {
                continue;
            }

            balancer.update_alignments(&batch);
            if !classifier_active && balancer.are_all_warmed_up() {
                for stratum_id in balancer.stratum_ids().map(str::to_owned).collect::<Vec<_>>() {
                    balancer.classifier().activate_sequences(&stratum_id);
                }
                classifier_active = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use std::sync::Arc;

    struct NoopClassifier;
    impl Classifier for NoopClassifier {
        fn activate_sequences(&self, _stratum_id: &str) {}
        fn deactivate_sequences(&self, _stratum_id: &str) {}
        fn is_sequence_present(&self, _sequence: &str) -> Option<String> {
            None
        }
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
    fn ejected_reads_are_dropped_on_enqueue() {
        let fragments = Arc::new(FragmentCollection::new());
        fragments.add_ejected("r1");
        let processor = ReadProcessor::new(10, 1_000_000, fragments);
        processor.add_read(make_read("r1", 100));
        let queue = processor.queue.lock().unwrap();
        assert!(queue.items.is_empty());
    }

    #[test]
    fn quit_drains_cleanly() {
        let fragments = Arc::new(FragmentCollection::new());
        let processor = ReadProcessor::new(10, 1_000_000, fragments);
        let (bus, _handle) = crate::metrics::spawn(tempfile::tempdir().unwrap().path()).unwrap();
        let balancer = StrataBalancer::new(
            &["a".to_owned()],
            vec![("a".to_owned(), 1u32)],
            5,
            100,
            3,
            0,
            Arc::new(NoopClassifier),
            Arc::new(NoopClassifier),
            bus,
        );
        processor.add_read(make_read("r1", 10));
        processor.quit();
        processor.run(&balancer);
    }
}
