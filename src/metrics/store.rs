use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Append-only persistence for the two metrics tables described in the
/// external-interfaces contract: `basecalled_reads` and `classified_reads`.
/// Backed by plain tab-separated files rather than a database; the only
/// access pattern is single-writer sequential append, which a `BufWriter`
/// over a `File` opened in append mode satisfies directly, in the same
/// spirit as the teacher's `BedGraphWriter`/`BedMethylWriter`.
pub struct MetricsStore {
    basecalled_reads: BufWriter<File>,
    classified_reads: BufWriter<File>,
}

impl MetricsStore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create metrics store directory {dir:?}"))?;

        let basecalled_reads = Self::open_append(&dir.join("basecalled_reads.tsv"))?;
        let classified_reads = Self::open_append(&dir.join("classified_reads.tsv"))?;

        Ok(Self {
            basecalled_reads,
            classified_reads,
        })
    }

    fn open_append(path: &PathBuf) -> Result<BufWriter<File>> {
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open metrics table {path:?}"))?;
        let mut writer = BufWriter::new(file);
        if is_new {
            // header rows make the append-only TSVs self-describing for ad-hoc
            // analysis without needing this crate's schema docs in hand.
            if path.file_name().and_then(|n| n.to_str()) == Some("basecalled_reads.tsv") {
                writeln!(writer, "read_id\tfinal_class\tlength\ttimestamp")?;
            } else {
                writeln!(writer, "read_id\tinferred_class\ttimestamp")?;
            }
        }
        Ok(writer)
    }

    pub fn append_basecalled_read(
        &mut self,
        read_id: &str,
        final_class: Option<&str>,
        length: u64,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        writeln!(
            self.basecalled_reads,
            "{}\t{}\t{}\t{}",
            read_id,
            final_class.unwrap_or(""),
            length,
            ts.to_rfc3339(),
        )?;
        Ok(())
    }

    pub fn append_classified_read(
        &mut self,
        read_id: &str,
        inferred_class: Option<&str>,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        writeln!(
            self.classified_reads,
            "{}\t{}\t{}",
            read_id,
            inferred_class.unwrap_or(""),
            ts.to_rfc3339(),
        )?;
        Ok(())
    }

    /// Flushes and fsyncs both tables. Called once, from the consumer
    /// thread, after draining the shutdown sentinel — this is what makes
    /// §8 scenario 6 ("no command is lost between regulator's last
    /// emission and store close") hold.
    pub fn close(&mut self) -> Result<()> {
        self.basecalled_reads.flush()?;
        self.basecalled_reads.get_ref().sync_all()?;
        self.classified_reads.flush()?;
        self.classified_reads.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MetricsStore::open(dir.path()).unwrap();
        store
            .append_basecalled_read("r1", Some("genome_a"), 2500, Utc::now())
            .unwrap();
        store.append_classified_read("r1", None, Utc::now()).unwrap();
        store.close().unwrap();

        let basecalled = fs::read_to_string(dir.path().join("basecalled_reads.tsv")).unwrap();
        assert_eq!(basecalled.lines().count(), 2);
        assert!(basecalled.lines().nth(1).unwrap().contains("genome_a"));
    }
}
