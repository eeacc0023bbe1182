mod aligner;
mod ibf;

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::ClassifierConfig;

pub use aligner::AlignerClassifier;
pub use ibf::IbfClassifier;

/// Capability set every classifier backend must provide. A single internal
/// mutex per implementation is acceptable (§4.1): the regulator hot loop is
/// the only caller under contention that matters for latency.
pub trait Classifier: Send + Sync {
    fn activate_sequences(&self, stratum_id: &str);
    fn deactivate_sequences(&self, stratum_id: &str);
    fn is_sequence_present(&self, sequence: &str) -> Option<String>;
}

/// Builds the configured classifier backend. Exactly one of
/// `classifier.mappy`/`classifier.interleaved_bloom_filter` is set by the
/// time `ExperimentConfig::validate` has run; a config reaching this point
/// with neither or both set is a programming error, not a user one, so it
/// still returns a descriptive `anyhow::Error` rather than panicking.
pub fn build_classifier(
    config: &ClassifierConfig,
    reference_sequences: &[(String, std::path::PathBuf)],
) -> Result<Arc<dyn Classifier>> {
    match (&config.mappy, &config.interleaved_bloom_filter) {
        (Some(_), None) => Ok(Arc::new(AlignerClassifier::build(reference_sequences)?)),
        (None, Some(ibf_config)) => Ok(Arc::new(IbfClassifier::build(
            ibf_config,
            reference_sequences,
        )?)),
        (Some(_), Some(_)) => Err(anyhow!(
            "classifier config selected both mappy and interleaved_bloom_filter"
        )),
        (None, None) => Err(anyhow!(
            "classifier config selected neither mappy nor interleaved_bloom_filter"
        )),
    }
}

/// Builds a second, independent instance of the configured classifier
/// backend with every stratum active from the moment it's constructed.
/// `StrataBalancer` uses this one for `update_alignments`, so that warm-up
/// classification never depends on the live regulation classifier's
/// activation state — the two are toggled on entirely independent
/// schedules.
pub fn build_always_on_classifier(
    config: &ClassifierConfig,
    reference_sequences: &[(String, std::path::PathBuf)],
) -> Result<Arc<dyn Classifier>> {
    let classifier = build_classifier(config, reference_sequences)?;
    for (stratum_id, _) in reference_sequences {
        classifier.activate_sequences(stratum_id);
    }
    Ok(classifier)
}
