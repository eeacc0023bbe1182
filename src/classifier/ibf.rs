use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use bio::io::fasta;
use bitvec::prelude::*;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

use crate::config::IbfConfig;

use super::Classifier;

/// Interleaved Bloom filter classifier (§4.1). One bin per stratum, each
/// bin's bitset built once at construction from its reference sequence(s).
/// `deactivate_sequences` clears and replays every still-active bin's bits
/// into a shared `merged` bitset used as a cheap existence pre-check — bins
/// cannot be removed from that merge independently, only rebuilt, which
/// mirrors the cost of toggling a bin in a true interleaved bloom filter
/// library.
pub struct IbfClassifier {
    bin_ids: Vec<String>,
    bin_bits: Vec<BitVec<u64, Lsb0>>,
    active: Mutex<Vec<bool>>,
    merged: Mutex<BitVec<u64, Lsb0>>,
    sbf_size: usize,
    k: usize,
    num_hashes: usize,
    preserved_pct: f64,
}

impl IbfClassifier {
    pub fn build(config: &IbfConfig, reference_sequences: &[(String, PathBuf)]) -> Result<Self> {
        let mut bin_ids = Vec::with_capacity(reference_sequences.len());
        let mut raw_sequences: Vec<Vec<u8>> = Vec::with_capacity(reference_sequences.len());
        let mut max_genome_len = 0usize;

        for (stratum_id, path) in reference_sequences {
            let reader = fasta::Reader::from_file(path)
                .with_context(|| format!("opening reference fasta for stratum {stratum_id}: {path:?}"))?;
            let mut concatenated = Vec::new();
            for record in reader.records() {
                let record = record.with_context(|| format!("reading fasta record from {path:?}"))?;
                concatenated.extend_from_slice(record.seq());
            }
            max_genome_len = max_genome_len.max(concatenated.len());
            bin_ids.push(stratum_id.clone());
            raw_sequences.push(concatenated);
        }

        let sbf_size = calculate_sbf_size(max_genome_len, config.w, config.k, config.hashes, config.fp_rate);

        let mut bin_bits = Vec::with_capacity(bin_ids.len());
        for sequence in &raw_sequences {
            let mut bits = bitvec![u64, Lsb0; 0; sbf_size];
            insert_sequence(&mut bits, sequence, config.k, config.hashes, sbf_size);
            bin_bits.push(bits);
        }

        let active = vec![false; bin_ids.len()];
        let merged = bitvec![u64, Lsb0; 0; sbf_size];

        Ok(Self {
            bin_ids,
            bin_bits,
            active: Mutex::new(active),
            merged: Mutex::new(merged),
            sbf_size,
            k: config.k,
            num_hashes: config.hashes,
            preserved_pct: config.preserved_pct,
        })
    }

    fn bin_index(&self, stratum_id: &str) -> Option<usize> {
        self.bin_ids.iter().position(|id| id == stratum_id)
    }

    fn rebuild_merged(&self) {
        let active = self.active.lock().unwrap();
        let mut merged = self.merged.lock().unwrap();
        merged.fill(false);
        for (idx, is_active) in active.iter().enumerate() {
            if *is_active {
                *merged |= &self.bin_bits[idx];
            }
        }
    }

    fn kmer_hash_positions(&self, kmer: &[u8]) -> Vec<usize> {
        (0..self.num_hashes)
            .map(|seed| {
                let mut hasher = FxHasher::default();
                seed.hash(&mut hasher);
                kmer.hash(&mut hasher);
                (hasher.finish() as usize) % self.sbf_size
            })
            .collect()
    }
}

/// Matches the python wrapper's sizing formula exactly: the number of
/// Bloom-filter slots needed so that, across `max_windows` k-mer insertions
/// with `num_hashes` hash functions, the false-positive rate stays at or
/// below `fp_rate`.
fn calculate_sbf_size(max_genome_len: usize, w: usize, k: usize, num_hashes: usize, fp_rate: f64) -> usize {
    let window = w + k - 1;
    let max_windows = max_genome_len.saturating_sub(window).saturating_add(1).max(1) as f64;
    let inner = (1.0 - fp_rate.powf(1.0 / num_hashes as f64)).ln() / (num_hashes as f64 * max_windows);
    (1.0 / (1.0 - inner.exp())).ceil() as usize
}

fn insert_sequence(bits: &mut BitVec<u64, Lsb0>, sequence: &[u8], k: usize, num_hashes: usize, sbf_size: usize) {
    if sequence.len() < k {
        return;
    }
    for window in sequence.windows(k) {
        for seed in 0..num_hashes {
            let mut hasher = FxHasher::default();
            seed.hash(&mut hasher);
            window.hash(&mut hasher);
            let pos = (hasher.finish() as usize) % sbf_size;
            bits.set(pos, true);
        }
    }
}

impl Classifier for IbfClassifier {
    fn activate_sequences(&self, stratum_id: &str) {
        let Some(idx) = self.bin_index(stratum_id) else {
            return;
        };
        {
            let mut active = self.active.lock().unwrap();
            active[idx] = true;
        }
        let mut merged = self.merged.lock().unwrap();
        *merged |= &self.bin_bits[idx];
    }

    fn deactivate_sequences(&self, stratum_id: &str) {
        let Some(idx) = self.bin_index(stratum_id) else {
            return;
        };
        {
            let mut active = self.active.lock().unwrap();
            active[idx] = false;
        }
        self.rebuild_merged();
    }

    fn is_sequence_present(&self, sequence: &str) -> Option<String> {
        let sequence = sequence.as_bytes();
        if sequence.len() < self.k {
            return None;
        }

        let active = self.active.lock().unwrap().clone();
        let merged = self.merged.lock().unwrap();

        let kmers: Vec<&[u8]> = sequence.windows(self.k).collect();
        if kmers.is_empty() {
            return None;
        }

        // fast existence pre-check against the merged overlay of all active
        // bins before paying the cost of checking each bin individually.
        let any_hit = kmers.iter().any(|kmer| {
            self.kmer_hash_positions(kmer)
                .iter()
                .all(|&pos| merged[pos])
        });
        if !any_hit {
            return None;
        }
        drop(merged);

        for (idx, is_active) in active.iter().enumerate() {
            if !is_active {
                continue;
            }
            let matches = kmers
                .iter()
                .filter(|kmer| {
                    self.kmer_hash_positions(kmer)
                        .iter()
                        .all(|&pos| self.bin_bits[idx][pos])
                })
                .count();
            let fraction = matches as f64 / kmers.len() as f64;
            if fraction >= self.preserved_pct {
                return Some(self.bin_ids[idx].clone());
            }
        }
        None
    }
}
