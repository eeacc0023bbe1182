use std::path::PathBuf;

/// `--simulated-dir` standin for the real MinKNOW protocol service: its
/// only job is to answer `get_run_info().output_path` so the FASTQ watcher
/// can be pointed at a directory of pre-existing files instead of a live
/// acquisition's output directory.
pub struct FakeProtocolService {
    output_path: PathBuf,
}

pub struct RunInfo {
    pub output_path: PathBuf,
}

impl FakeProtocolService {
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    pub fn get_run_info(&self) -> RunInfo {
        RunInfo {
            output_path: self.output_path.clone(),
        }
    }
}
