use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use indexmap::IndexMap;
use log::warn;
use log_once::warn_once;
use ndarray::Array1;

/// Online log-length distribution for one stratum, updated with Welford's
/// algorithm (numerically stable mean/variance in one pass). See
/// https://en.wikipedia.org/wiki/Algorithms_for_calculating_variance
struct EstimatorRecord {
    log_mean: f64,
    log_m2: f64,
    read_count: u64,
    estimated_reads_received: AtomicU64,
    minimum_fragments_for_ratio_estimation: u64,
}

impl EstimatorRecord {
    fn new(minimum_fragments_for_ratio_estimation: u64) -> Self {
        Self {
            log_mean: 0.0,
            log_m2: 0.0,
            read_count: 0,
            estimated_reads_received: AtomicU64::new(0),
            minimum_fragments_for_ratio_estimation,
        }
    }

    fn add_entire_read(&mut self, length: usize) {
        let log_len = (length as f64).ln();
        self.read_count += 1;
        let delta = log_len - self.log_mean;
        self.log_mean += delta / self.read_count as f64;
        let delta2 = log_len - self.log_mean;
        self.log_m2 += delta * delta2;
    }

    fn log_variance(&self) -> f64 {
        if self.read_count > 1 {
            self.log_m2 / (self.read_count - 1) as f64
        } else {
            0.0
        }
    }

    fn estimated_bases_received(&self, stratum_id: &str) -> f64 {
        let exponent = self.log_mean + self.log_variance() / 2.0;
        if exponent >= 17.0 {
            warn_once!(
                "stratum {stratum_id}: mean of the read-length distribution is very high \
                 ({exponent:.1}); make sure the warm-up read count is large enough"
            );
        }
        exponent.exp() * self.estimated_reads_received.load(Ordering::Relaxed) as f64
    }

    fn update_estimated_received_bases(&self) {
        self.estimated_reads_received.fetch_add(1, Ordering::Relaxed);
    }

    fn is_ratio_estimation_warmed_up(&self) -> bool {
        self.estimated_reads_received.load(Ordering::Relaxed)
            >= self.minimum_fragments_for_ratio_estimation
    }
}

/// Owns one `EstimatorRecord` per stratum plus the per-stratum observed-base
/// counters, and computes the acceptance rate (§4.2). Each record is behind
/// its own lock (per §5 "Estimator records: per-record lock"); observed-base
/// counters are atomics so monotonicity holds without a lock.
pub struct EstimatorManager {
    target_ratios: IndexMap<String, u32>,
    observed_bases: IndexMap<String, AtomicU64>,
    records: IndexMap<String, Mutex<EstimatorRecord>>,
    beta: u32,
}

impl EstimatorManager {
    pub fn new(
        target_ratios: impl IntoIterator<Item = (String, u32)>,
        minimum_fragments_for_ratio_estimation: u64,
        beta: u32,
    ) -> Self {
        let target_ratios: IndexMap<String, u32> = target_ratios.into_iter().collect();
        let observed_bases = target_ratios
            .keys()
            .map(|k| (k.clone(), AtomicU64::new(0)))
            .collect();
        let records = target_ratios
            .keys()
            .map(|k| {
                (
                    k.clone(),
                    Mutex::new(EstimatorRecord::new(minimum_fragments_for_ratio_estimation)),
                )
            })
            .collect();
        Self {
            target_ratios,
            observed_bases,
            records,
            beta,
        }
    }

    pub fn are_all_warmed_up(&self) -> bool {
        self.records
            .values()
            .all(|r| r.lock().unwrap().is_ratio_estimation_warmed_up())
    }

    pub fn update_estimated_received_bases(&self, stratum_id: &str) {
        if let Some(record) = self.records.get(stratum_id) {
            record.lock().unwrap().update_estimated_received_bases();
        }
    }

    /// Feeds a fully basecalled read's length into the stratum's estimator
    /// and its cumulative observed-base counter.
    pub fn add_entire_read(&self, stratum_id: &str, length: usize) {
        if let Some(bases) = self.observed_bases.get(stratum_id) {
            bases.fetch_add(length as u64, Ordering::Relaxed);
        }
        if let Some(record) = self.records.get(stratum_id) {
            record.lock().unwrap().add_entire_read(length);
        }
    }

    pub fn estimated_reads_received(&self, stratum_id: &str) -> u64 {
        self.records
            .get(stratum_id)
            .map(|r| r.lock().unwrap().estimated_reads_received.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn observed_bases(&self, stratum_id: &str) -> u64 {
        self.observed_bases
            .get(stratum_id)
            .map(|b| b.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// `A(s)^alpha` from §4.2. Strata are visited in `IndexMap` insertion
    /// order, which callers construct in sorted order (see
    /// `config::ExperimentConfig::stratum_keys`) so this is the canonical
    /// ordering the spec refers to.
    pub fn acceptance_rate(&self, stratum_id: &str) -> f64 {
        let keys: Vec<&String> = self.records.keys().collect();

        let estimated_received: Array1<f64> = keys
            .iter()
            .map(|k| self.records[*k].lock().unwrap().estimated_bases_received(k))
            .collect();
        let total_estimated_received = estimated_received.sum();

        let target_ratios: Array1<f64> =
            keys.iter().map(|k| self.target_ratios[*k] as f64).collect();
        let target_whole = target_ratios.sum();
        let target_proportions = &target_ratios / target_whole;

        let representation = (&estimated_received * target_whole) / (&target_ratios * total_estimated_received);
        let min_index = representation
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
            .map(|(i, _)| i)
            .unwrap_or(0);

        let target_part = self.target_ratios[stratum_id] as f64;
        let estimated_received_part =
            self.records[stratum_id].lock().unwrap().estimated_bases_received(stratum_id);

        let raw_acceptance = (target_part * estimated_received[min_index])
            / (target_ratios[min_index] * estimated_received_part);

        let observed_bases: Array1<f64> = keys
            .iter()
            .map(|k| self.observed_bases[*k].load(Ordering::Relaxed) as f64)
            .collect();
        let total_observed = observed_bases.sum();
        let observed_proportions = if total_observed > 0.0 {
            &observed_bases / total_observed
        } else {
            Array1::zeros(observed_bases.len())
        };

        let distance: f64 = 0.5
            * (&observed_proportions - &target_proportions)
                .mapv(f64::abs)
                .sum();
        let distance = distance.min(1.0 - 1e-5);

        let alpha = (-1.0 * (1.0 - distance).ln() * self.beta as f64).max(1.0);

        let acceptance = raw_acceptance.powf(alpha);
        if !acceptance.is_finite() || acceptance > 1.0 {
            warn!("acceptance rate for {stratum_id} saturated to 1.0 (raw={raw_acceptance}, alpha={alpha})");
            1.0
        } else {
            acceptance
        }
    }
}
