use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use log::warn;

use crate::config::BasecallerConfig;

/// One unit of raw signal handed to the regulator by the live-reads client.
#[derive(Debug, Clone)]
pub struct ReadData {
    pub id: String,
    pub raw_data: Vec<u8>,
    pub start_sample: u64,
}

/// Per-channel calibration the basecaller needs to convert raw ADC samples
/// into picoamps.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    pub offset: f32,
    pub scaling: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadChunk {
    pub channel: u32,
}

/// A basecalled chunk: the channel/read_id it came from, plus its sequence.
#[derive(Debug, Clone)]
pub struct ReadChunkWrap {
    pub channel: u32,
    pub read_id: String,
    pub sequence: String,
}

/// Basecaller submission contract a regulator can drive without knowing
/// which concrete basecall server is behind it (§4.5). The real
/// implementation wraps a Guppy/Dorado basecall client; tests and the
/// simulated-dir mode can substitute a stub.
pub trait BasecallSubmitter: Send {
    /// Submits a packaged batch for basecalling. `Ok(true)` accepted,
    /// `Ok(false)` rejected (the caller retries), `Err` is a hard failure.
    fn submit(&mut self, packaged: &[PackagedRead]) -> anyhow::Result<bool>;

    /// Polls for completed results. An empty vec means "nothing yet, keep
    /// waiting"; callers should sleep `throttle` and poll again.
    fn poll_completed(&mut self) -> anyhow::Result<Vec<BasecallResult>>;
}

#[derive(Debug, Clone)]
pub struct PackagedRead {
    pub read_id: String,
    pub raw_data: Vec<u8>,
    pub daq_offset: f32,
    pub daq_scaling: f32,
    pub sampling_rate: f32,
    pub start_time: u64,
}

#[derive(Debug, Clone)]
pub struct BasecallResult {
    pub read_id: String,
    pub sub_tag: u32,
    pub sequence: String,
}

/// Basecalls accumulated read fragments (§4.5): packages raw signal into
/// submission payloads, retries submission up to `max_attempts` with
/// `throttle` spacing, then polls completed reads until every submitted
/// read_id has returned at least one non-duplicate result.
pub struct BasecallAdapter {
    max_attempts: usize,
    throttle: Duration,
    sampling_rate: f32,
}

impl BasecallAdapter {
    pub fn new(config: &BasecallerConfig, sampling_rate: f32, throttle: f64) -> Self {
        Self {
            max_attempts: config.max_attempts,
            throttle: Duration::from_secs_f64(throttle),
            sampling_rate,
        }
    }

    /// Basecalls one batch of `(channel, ReadData)` pairs and returns the
    /// resulting chunks in completion order. Returns an empty vec (with a
    /// warning logged) if the batch was empty or submission was rejected
    /// `max_attempts` times in a row.
    pub fn basecall(
        &self,
        submitter: &mut dyn BasecallSubmitter,
        reads: &[(u32, ReadData)],
        calibration_values: &HashMap<u32, Calibration>,
    ) -> Vec<ReadChunkWrap> {
        if reads.is_empty() {
            return Vec::new();
        }

        let mut channels: HashMap<String, u32> = HashMap::with_capacity(reads.len());
        let mut packaged = Vec::with_capacity(reads.len());
        for (channel, read) in reads {
            channels.insert(read.id.clone(), *channel);
            let calibration = calibration_values.get(channel).copied().unwrap_or(Calibration {
                offset: 0.0,
                scaling: 1.0,
            });
            packaged.push(PackagedRead {
                read_id: read.id.clone(),
                raw_data: read.raw_data.clone(),
                daq_offset: calibration.offset,
                daq_scaling: calibration.scaling,
                sampling_rate: self.sampling_rate,
                start_time: read.start_sample,
            });
        }

        let mut accepted = false;
        for _ in 0..self.max_attempts {
            match submitter.submit(&packaged) {
                Ok(true) => {
                    accepted = true;
                    break;
                }
                Ok(false) => thread::sleep(self.throttle),
                Err(e) => {
                    warn!("basecall submission failed: {e}");
                    thread::sleep(self.throttle);
                }
            }
        }
        if !accepted {
            warn!("could not pass {} reads to the basecaller after {} attempts", reads.len(), self.max_attempts);
            return Vec::new();
        }

        let mut chunks = Vec::with_capacity(reads.len());
        let mut completed: std::collections::HashSet<String> = std::collections::HashSet::with_capacity(packaged.len());
        while completed.len() < packaged.len() {
            let results = match submitter.poll_completed() {
                Ok(r) => r,
                Err(e) => {
                    warn!("polling basecaller results failed: {e}");
                    thread::sleep(self.throttle);
                    continue;
                }
            };
            if results.is_empty() {
                thread::sleep(self.throttle);
                continue;
            }
            for result in results {
                // partial/duplicate emissions; only a sub_tag == 0 result
                // completes the accounting for its read_id.
                if result.sub_tag > 0 {
                    continue;
                }
                let Some(&channel) = channels.get(&result.read_id) else {
                    // not one of this batch's submitted reads; ignore it
                    // rather than let it count toward our completion total.
                    continue;
                };
                completed.insert(result.read_id.clone());
                chunks.push(ReadChunkWrap {
                    channel,
                    read_id: result.read_id,
                    sequence: result.sequence,
                });
            }
        }
        chunks
    }
}
