use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;

use crate::basecall_adapter::{BasecallResult, Calibration, PackagedRead, ReadData};
use crate::basecall_adapter::BasecallSubmitter;
use crate::fastq_watcher::{collect_fastq_files, open_fastq_reader};
use crate::live_client::LiveReadsClient;

const SIMULATED_CHANNEL_COUNT: u32 = 16;

/// `--simulated-dir` stand-in for the live acquisition client. There is
/// no pore to regulate against a directory of pre-existing FASTQ files, so
/// this replays every record already sitting in the directory as if it had
/// just arrived over the wire: the record's already-basecalled sequence is
/// carried as the chunk's raw payload, dealt round-robin across a fixed
/// channel count, and `SimulatedBasecallSubmitter` echoes it straight back —
/// standing in for a basecaller that has nothing left to do. This keeps the
/// regulator hot loop (and thus the whole decision pipeline) genuinely
/// exercised in simulated-dir runs instead of idle.
pub struct SimulatedLiveReadsClient {
    queue: Mutex<VecDeque<(u32, ReadData)>>,
    shutdown: Arc<AtomicBool>,
}

impl SimulatedLiveReadsClient {
    /// Scans `dir` once for `.fastq`/`.fastq.gz`/`.fq`/`.fq.gz` files and
    /// loads every record into an in-memory replay queue. `shutdown` is the
    /// same flag the Ctrl-C handler sets; the client stops serving chunks
    /// the moment it fires, independent of whether the queue is empty.
    pub fn new(dir: &Path, shutdown: Arc<AtomicBool>) -> Self {
        let mut queue = VecDeque::new();
        let mut next_channel = 0u32;
        for path in collect_fastq_files(dir) {
            let reader = match open_fastq_reader(&path) {
                Ok(r) => r,
                Err(e) => {
                    warn!("could not load simulated reads from {path:?}: {e}");
                    continue;
                }
            };
            for record in reader.records() {
                let record = match record {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("malformed fastq record in {path:?}: {e}");
                        continue;
                    }
                };
                let sequence = String::from_utf8_lossy(record.seq()).into_owned();
                let channel = next_channel;
                next_channel = (next_channel + 1) % SIMULATED_CHANNEL_COUNT;
                queue.push_back((
                    channel,
                    ReadData {
                        id: record.id().to_owned(),
                        raw_data: sequence.into_bytes(),
                        start_sample: 0,
                    },
                ));
            }
        }
        Self {
            queue: Mutex::new(queue),
            shutdown,
        }
    }
}

impl LiveReadsClient for SimulatedLiveReadsClient {
    fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst) && !self.queue.lock().unwrap().is_empty()
    }

    fn channel_count(&self) -> u32 {
        SIMULATED_CHANNEL_COUNT
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

    fn get_read_chunks(&mut self, max_count: usize) -> Vec<(u32, ReadData)> {
        let mut queue = self.queue.lock().unwrap();
        let n = max_count.min(queue.len());
        queue.drain(..n).collect()
    }

    fn unblock_read_batch(&mut self, _reads: &[(u32, String)]) {}

    fn stop_receiving_batch(&mut self, _reads: &[(u32, String)]) {}

    fn run(&mut self) {}

    fn reset(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Basecall submitter for `--simulated-dir` mode: the "raw" payload handed
/// to it is already a basecalled sequence (see `SimulatedLiveReadsClient`),
/// so there is nothing to do but hand it back as the result.
pub struct SimulatedBasecallSubmitter {
    pending: Vec<BasecallResult>,
}

impl SimulatedBasecallSubmitter {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }
}

impl Default for SimulatedBasecallSubmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl BasecallSubmitter for SimulatedBasecallSubmitter {
    fn submit(&mut self, packaged: &[PackagedRead]) -> anyhow::Result<bool> {
        self.pending.extend(packaged.iter().map(|read| BasecallResult {
            read_id: read.read_id.clone(),
            sub_tag: 0,
            sequence: String::from_utf8_lossy(&read.raw_data).into_owned(),
        }));
        Ok(true)
    }

    fn poll_completed(&mut self) -> anyhow::Result<Vec<BasecallResult>> {
        Ok(std::mem::take(&mut self.pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stops_once_queue_and_shutdown_agree() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut client = SimulatedLiveReadsClient::new(dir.path(), shutdown.clone());
        assert!(!client.is_running());
        client.reset();
        assert!(!client.is_running());
    }

    #[test]
    fn replays_every_record_across_channels() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("a.fastq")).unwrap();
        writeln!(file, "@r1 runid=abc\nACGT\n+\nIIII").unwrap();
        writeln!(file, "@r2 runid=abc\nTTTT\n+\nIIII").unwrap();
        drop(file);

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut client = SimulatedLiveReadsClient::new(dir.path(), shutdown);
        assert!(client.is_running());
        let chunks = client.get_read_chunks(10);
        assert_eq!(chunks.len(), 2);
        assert!(!client.is_running());
    }

    #[test]
    fn echoes_submitted_sequences_back() {
        let mut submitter = SimulatedBasecallSubmitter::new();
        submitter
            .submit(&[PackagedRead {
                read_id: "r1".to_owned(),
                raw_data: b"ACGT".to_vec(),
                daq_offset: 0.0,
                daq_scaling: 1.0,
                sampling_rate: 4000.0,
                start_time: 0,
            }])
            .unwrap();
        let results = submitter.poll_completed().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].sequence, "ACGT");
    }
}
