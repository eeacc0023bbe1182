use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use bio::io::fastq;
use flate2::read::MultiGzDecoder;
use log::{debug, error, warn};
use notify::{RecursiveMode, Watcher};

use crate::errs::RunError;
use crate::nanopore_read::construct_read;
use crate::read_processor::ReadProcessor;

/// Watches `fastq_pass`/`fastq_fail` under a minKNOW output directory and
/// feeds newly completed FASTQ files into the read processor (§4.6). Runs
/// on its own OS thread; stopped by dropping the `notify::Watcher` the
/// caller holds and calling `quit()` on the processor it feeds.
pub struct FastqWatcher {
    root: PathBuf,
}

impl FastqWatcher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Blocks until `root` exists, polling once a second (§5 Timeouts),
    /// then watches it recursively and pushes every newly closed
    /// `.fastq`/`.fastq.gz`/`.fq`/`.fq.gz` file's records into `processor`.
    pub fn run(&self, processor: &ReadProcessor, shutdown: &mpsc::Receiver<()>) {
        while !self.root.exists() {
            if shutdown.recv_timeout(Duration::from_secs(1)).is_ok() {
                return;
            }
        }

        let (tx, rx) = mpsc::channel();
        let mut watcher = match notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        }) {
            Ok(w) => w,
            Err(e) => {
                error!("failed to start fastq directory watcher: {e}");
                return;
            }
        };
        if let Err(e) = watcher.watch(&self.root, RecursiveMode::Recursive) {
            error!("failed to watch {:?}: {e}", self.root);
            return;
        }

        loop {
            if shutdown.try_recv().is_ok() {
                break;
            }
            match rx.recv_timeout(Duration::from_millis(500)) {
                Ok(Ok(event)) => {
                    for path in event.paths {
                        if is_fastq_file(&path) {
                            self.ingest_file(&path, processor);
                        }
                    }
                }
                Ok(Err(e)) => warn!("fastq watcher event error: {e}"),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn ingest_file(&self, path: &Path, processor: &ReadProcessor) {
        let reader = match open_fastq_reader(path) {
            Ok(r) => r,
            Err(e) => {
                warn!("could not open fastq file {path:?}: {e}");
                return;
            }
        };
        let fastq_path = path.to_string_lossy().into_owned();

        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!("malformed fastq record in {path:?}: {e}");
                    continue;
                }
            };
            let sequence = String::from_utf8_lossy(record.seq()).into_owned();
            let description = record.desc().unwrap_or("").to_owned();
            match construct_read(record.id(), &description, &sequence, record.qual(), &fastq_path) {
                Ok(read) => processor.add_read(read),
                Err(RunError::BadInput(e)) if e.to_string().contains("missing runid") => {
                    match recover_run_id_from_header(path) {
                        Some(run_id) => {
                            debug!("recovered runid={run_id} for {path:?} from its header line");
                            let patched = format!("{description} runid={run_id}");
                            match construct_read(record.id(), &patched, &sequence, record.qual(), &fastq_path) {
                                Ok(read) => processor.add_read(read),
                                Err(e) => warn!("bad fastq record in {path:?} even after runid recovery: {e}"),
                            }
                        }
                        None => warn!("skipping fastq record in {path:?}: missing runid and no recoverable header"),
                    }
                }
                Err(RunError::Skipped(reason)) => warn!("skipping fastq record: {reason}"),
                Err(e) => warn!("bad fastq record in {path:?}: {e}"),
            }
        }
    }
}

/// Best-effort fallback when a record's description lacks `runid`: read
/// just the file's first line and pull the token out of it directly,
/// mirroring the original implementation's `_get_run_id` header-only read.
fn recover_run_id_from_header(path: &Path) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut first_line = String::new();
    if is_gz_file(path) {
        BufReader::new(MultiGzDecoder::new(file)).read_line(&mut first_line).ok()?;
    } else {
        BufReader::new(file).read_line(&mut first_line).ok()?;
    }
    first_line
        .split(' ')
        .find_map(|token| token.strip_prefix("runid=").or_else(|| token.strip_prefix("run_id=")))
        .map(str::to_owned)
}

fn is_gz_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("gz")
}

pub(crate) fn is_fastq_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    name.ends_with(".fastq") || name.ends_with(".fastq.gz") || name.ends_with(".fq") || name.ends_with(".fq.gz")
}

/// Opens `path` as a FASTQ reader, transparently decompressing gzip when the
/// extension calls for it.
pub(crate) fn open_fastq_reader(path: &Path) -> std::io::Result<fastq::Reader<Box<dyn Read>>> {
    let file = std::fs::File::open(path)?;
    let reader: Box<dyn Read> = if is_gz_file(path) {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(fastq::Reader::new(reader))
}

/// Recursively collects every recognized FASTQ file under `root`, for the
/// one-shot initial scan `SimulatedLiveReadsClient` does (as opposed to the
/// watcher's ongoing `notify` subscription).
pub(crate) fn collect_fastq_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if is_fastq_file(&path) {
                out.push(path);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_fastq_extensions() {
        assert!(is_fastq_file(Path::new("a.fastq")));
        assert!(is_fastq_file(Path::new("a.fastq.gz")));
        assert!(is_fastq_file(Path::new("a.fq")));
        assert!(is_fastq_file(Path::new("a.fq.gz")));
        assert!(!is_fastq_file(Path::new("a.txt")));
    }
}
