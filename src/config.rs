use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

fn default_sequencer_host() -> String {
    "localhost".to_owned()
}
fn default_sequencer_port() -> u16 {
    9501
}
fn default_read_until_host() -> String {
    "127.0.0.1".to_owned()
}
fn default_read_until_port() -> u16 {
    8000
}
fn default_basecaller_address() -> String {
    "ipc:///tmp/.guppy/5555".to_owned()
}
fn default_max_attempts() -> usize {
    3
}
fn default_depletion_chunks() -> usize {
    4
}
fn default_throttle() -> f64 {
    0.1
}
fn default_ibf_hashes() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceSequenceConfig {
    pub path: PathBuf,
    pub expected_ratio: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequencerConfig {
    pub name: String,
    #[serde(default = "default_sequencer_host")]
    pub host: String,
    #[serde(default = "default_sequencer_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasecallerConfig {
    pub config: String,
    #[serde(default = "default_basecaller_address")]
    pub address: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MappyConfig {}

#[derive(Debug, Clone, Deserialize)]
pub struct IbfConfig {
    pub fragment_length: usize,
    pub w: usize,
    pub k: usize,
    #[serde(default = "default_ibf_hashes")]
    pub hashes: usize,
    pub num_of_bins: usize,
    pub fp_rate: f64,
    pub preserved_pct: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClassifierConfig {
    pub mappy: Option<MappyConfig>,
    pub interleaved_bloom_filter: Option<IbfConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadUntilConfig {
    #[serde(default = "default_read_until_host")]
    pub host: String,
    #[serde(default = "default_read_until_port")]
    pub port: u16,
    pub basecaller: BasecallerConfig,
    pub classifier: ClassifierConfig,
    #[serde(default = "default_depletion_chunks")]
    pub depletion_chunks: usize,
    #[serde(default = "default_throttle")]
    pub throttle: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadProcessorConfig {
    pub batch_size: usize,
    pub target_base_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    pub metrics_store: PathBuf,
    pub minimum_reads_for_parameter_estimation: u64,
    pub minimum_fragments_for_ratio_estimation: u64,
    pub minimum_mapped_bases: u64,
    pub thinning_accelerator: u32,
    pub read_processor: ReadProcessorConfig,
    pub reference_sequences: Vec<ReferenceSequenceConfig>,
    pub sequencer: SequencerConfig,
    pub read_until: ReadUntilConfig,
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path:?}"))?;
        let config: ExperimentConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.minimum_reads_for_parameter_estimation <= 1 {
            return Err(anyhow!(
                "minimum_reads_for_parameter_estimation must be > 1"
            ));
        }
        if self.minimum_fragments_for_ratio_estimation == 0 {
            return Err(anyhow!(
                "minimum_fragments_for_ratio_estimation must be > 0"
            ));
        }
        if self.minimum_mapped_bases == 0 {
            return Err(anyhow!("minimum_mapped_bases must be > 0"));
        }
        if self.read_processor.batch_size == 0 {
            return Err(anyhow!("read_processor.batch_size must be > 0"));
        }
        if self.read_processor.target_base_count == 0 {
            return Err(anyhow!("read_processor.target_base_count must be > 0"));
        }
        if self.reference_sequences.is_empty() {
            return Err(anyhow!("reference_sequences must not be empty"));
        }
        for rs in &self.reference_sequences {
            if rs.expected_ratio == 0 {
                return Err(anyhow!(
                    "expected_ratio for {:?} must be > 0",
                    rs.path
                ));
            }
        }
        if !(1024..=65535).contains(&self.sequencer.port) {
            return Err(anyhow!("sequencer.port must be in 1024..=65535"));
        }
        if !(1024..=65535).contains(&self.read_until.port) {
            return Err(anyhow!("read_until.port must be in 1024..=65535"));
        }
        if !(0.0..1.0).contains(&self.read_until.throttle) {
            return Err(anyhow!("read_until.throttle must be in (0, 1)"));
        }
        let classifier = &self.read_until.classifier;
        match (&classifier.mappy, &classifier.interleaved_bloom_filter) {
            (Some(_), None) | (None, Some(_)) => {}
            (None, None) => {
                return Err(anyhow!(
                    "exactly one of classifier.mappy or classifier.interleaved_bloom_filter must be set, got neither"
                ))
            }
            (Some(_), Some(_)) => {
                return Err(anyhow!(
                    "exactly one of classifier.mappy or classifier.interleaved_bloom_filter must be set, got both"
                ))
            }
        }
        if let Some(ibf) = &classifier.interleaved_bloom_filter {
            if !(0.0..1.0).contains(&ibf.fp_rate) {
                return Err(anyhow!("classifier.interleaved_bloom_filter.fp_rate must be in (0, 1)"));
            }
            if !(0.0..1.0).contains(&ibf.preserved_pct) {
                return Err(anyhow!(
                    "classifier.interleaved_bloom_filter.preserved_pct must be in (0, 1)"
                ));
            }
        }
        Ok(())
    }

    /// Stratum keys, in the canonical sorted order used everywhere acceptance
    /// rates are computed (see `estimator::EstimatorManager::acceptance_rate`).
    pub fn stratum_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .reference_sequences
            .iter()
            .map(|rs| rs.path.to_string_lossy().into_owned())
            .collect();
        keys.sort();
        keys
    }
}
