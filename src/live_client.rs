use std::collections::HashMap;

use crate::basecall_adapter::{Calibration, ReadData};

/// Contract the regulator consumes and nothing else (§6). The production
/// implementation talks to a MinKNOW `read_until` gRPC endpoint; the
/// `simulation` module provides a fixture-driven stand-in for
/// `--simulated-dir` runs and for tests.
pub trait LiveReadsClient: Send {
    fn is_running(&self) -> bool;
    fn channel_count(&self) -> u32;
    fn signal_dtype(&self) -> &str;
    fn calibration_values(&self) -> HashMap<u32, Calibration>;

    /// Samples per second the channel's raw data was recorded at; the
    /// basecall adapter needs this once per submission to convert raw
    /// signal into picoamps. Fixed at 4 kHz for `--simulated-dir` runs.
    fn sample_rate(&self) -> f32;

    /// Returns at most `max_count` chunks, the newest chunk per channel
    /// (`last=true` semantics baked into the contract rather than exposed
    /// as a parameter, since the regulator never wants anything else).
    fn get_read_chunks(&mut self, max_count: usize) -> Vec<(u32, ReadData)>;

    fn unblock_read_batch(&mut self, reads: &[(u32, String)]);
    fn stop_receiving_batch(&mut self, reads: &[(u32, String)]);

    fn run(&mut self);

    /// Stops the client, flipping `is_running` to false. Used by the
    /// teardown sequence (§5) to unwind the regulator's hot loop.
    fn reset(&mut self);
}
