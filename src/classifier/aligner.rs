use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use minimap2::Aligner;

use super::Classifier;

struct AlignerRecord {
    stratum_id: String,
    aligner: Aligner,
    active: AtomicBool,
}

/// Alignment-backed classifier (§4.1). One `minimap2` index per stratum,
/// each independently toggleable. `is_sequence_present` is serialized behind
/// a single mutex, same as the aligner it's grounded on: minimap2's index is
/// safe to share read-only, but querying every active stratum per chunk on
/// the hot path is cheap enough that a coarse lock is simpler than per-index
/// thread-local buffers.
pub struct AlignerClassifier {
    records: Vec<AlignerRecord>,
    query_lock: Mutex<()>,
}

impl AlignerClassifier {
    pub fn build(reference_sequences: &[(String, PathBuf)]) -> Result<Self> {
        let mut records = Vec::with_capacity(reference_sequences.len());
        for (stratum_id, path) in reference_sequences {
            let aligner = Aligner::builder()
                .map_ont()
                .with_index(path, None)
                .map_err(|e| {
                    anyhow::anyhow!("failed to build minimap2 index for {path:?}: {e}")
                })
                .with_context(|| format!("loading reference sequence for stratum {stratum_id}"))?;
            records.push(AlignerRecord {
                stratum_id: stratum_id.clone(),
                aligner,
                active: AtomicBool::new(false),
            });
        }
        Ok(Self {
            records,
            query_lock: Mutex::new(()),
        })
    }
}

impl Classifier for AlignerClassifier {
    fn activate_sequences(&self, stratum_id: &str) {
        if let Some(record) = self.records.iter().find(|r| r.stratum_id == stratum_id) {
            record.active.store(true, Ordering::SeqCst);
        }
    }

    fn deactivate_sequences(&self, stratum_id: &str) {
        if let Some(record) = self.records.iter().find(|r| r.stratum_id == stratum_id) {
            record.active.store(false, Ordering::SeqCst);
        }
    }

    fn is_sequence_present(&self, sequence: &str) -> Option<String> {
        let _guard = self.query_lock.lock().unwrap();

        // (mapq, match_len, -edit_distance); best primary hit across all
        // active strata wins, per §4.1.
        let mut best_key: Option<(u8, i32, i32)> = None;
        let mut best_stratum: Option<String> = None;

        for record in &self.records {
            if !record.active.load(Ordering::SeqCst) {
                continue;
            }
            let mappings = match record.aligner.map(sequence.as_bytes(), false, false, None, None) {
                Ok(m) => m,
                Err(_) => continue,
            };
            for mapping in mappings {
                if !mapping.is_primary {
                    continue;
                }
                let match_len = mapping.match_len as i32;
                // minimap2-rs doesn't surface an NM edit-distance field
                // directly without requesting the `cs`/`md` tags; block_len
                // minus match_len (mismatches + indel bases) is the closest
                // proxy available from the base mapping record.
                let edit_distance = mapping.block_len as i32 - match_len;
                let key = (mapping.mapq, match_len, -edit_distance);
                let replace = match best_key {
                    None => true,
                    Some(b) => key > b,
                };
                if replace {
                    best_key = Some(key);
                    best_stratum = Some(record.stratum_id.clone());
                }
            }
        }

        best_stratum
    }
}
