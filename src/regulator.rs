use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use rustc_hash::FxHashMap;

use crate::basecall_adapter::BasecallAdapter;
use crate::basecall_adapter::BasecallSubmitter;
use crate::fragment_collection::FragmentCollection;
use crate::live_client::LiveReadsClient;
use crate::metrics::{MetricCommand, MetricsBus};
use crate::strata::StrataBalancer;

/// The hot loop (§4.4). Fetches a batch of chunks from the live-reads
/// client, basecalls it, classifies each chunk, and decides unblock (eject)
/// vs. stop-receiving (keep, or give up on an unmatched read) per chunk.
pub struct ReadUntilRegulator {
    balancer: Arc<StrataBalancer>,
    fragments: Arc<FragmentCollection>,
    metrics: MetricsBus,
    depletion_chunks: u32,
    throttle: Duration,
    fragments_count: FxHashMap<String, u32>,
}

impl ReadUntilRegulator {
    pub fn new(
        balancer: Arc<StrataBalancer>,
        fragments: Arc<FragmentCollection>,
        metrics: MetricsBus,
        depletion_chunks: u32,
        throttle: f64,
    ) -> Self {
        Self {
            balancer,
            fragments,
            metrics,
            depletion_chunks,
            throttle: Duration::from_secs_f64(throttle),
            fragments_count: FxHashMap::default(),
        }
    }

    /// Runs until `live_client.is_running()` goes false (teardown resets
    /// the client from another thread, per §5).
    pub fn run(
        &mut self,
        live_client: &mut dyn LiveReadsClient,
        submitter: &mut dyn BasecallSubmitter,
        basecall_adapter: &BasecallAdapter,
        max_chunks_per_cycle: usize,
    ) {
        while live_client.is_running() {
            let t0 = Instant::now();

            let chunks = live_client.get_read_chunks(max_chunks_per_cycle);
            let calibration = live_client.calibration_values();
            let basecalled = basecall_adapter.basecall(submitter, &chunks, &calibration);

            let mut unblock_batch = Vec::new();
            let mut stop_receiving_batch = Vec::new();

            for chunk in basecalled {
                let matched = self.balancer.classifier().is_sequence_present(&chunk.sequence);
                self.metrics
                    .send(MetricCommand::classified_read(chunk.read_id.clone(), matched.clone()));

                match matched {
                    Some(stratum_id) => {
                        self.balancer.update_estimated_received_bases(&stratum_id);
                        if self.balancer.thin_out(&stratum_id) {
                            info!("thinning a read from {stratum_id} ({})", chunk.read_id);
                            self.fragments.add_ejected(&chunk.read_id);
                            unblock_batch.push((chunk.channel, chunk.read_id.clone()));
                        } else {
                            stop_receiving_batch.push((chunk.channel, chunk.read_id.clone()));
                        }
                        self.fragments_count.remove(&chunk.read_id);
                    }
                    None => {
                        let count = self.fragments_count.entry(chunk.read_id.clone()).or_insert(0);
                        *count += 1;
                        if *count >= self.depletion_chunks {
                            stop_receiving_batch.push((chunk.channel, chunk.read_id.clone()));
                            self.fragments_count.remove(&chunk.read_id);
                        }
                    }
                }
            }

            if !unblock_batch.is_empty() {
                live_client.unblock_read_batch(&unblock_batch);
            }
            if !stop_receiving_batch.is_empty() {
                live_client.stop_receiving_batch(&stop_receiving_batch);
            }

            let elapsed = t0.elapsed();
            if elapsed < self.throttle {
                std::thread::sleep(self.throttle - elapsed);
            } else if elapsed > self.throttle {
                warn!(
                    "regulator cycle took {:.3}s, over the {:.3}s throttle target",
                    elapsed.as_secs_f64(),
                    self.throttle.as_secs_f64()
                );
            }
        }
    }
}
