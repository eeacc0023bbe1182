use std::fmt;

/// A single bad-input condition tied to one record (a FASTQ read, a basecall
/// result, a config row). Carries a human-readable reason only; callers log
/// it and move on rather than aborting the batch.
#[derive(Debug, Clone)]
pub struct InputError(pub String);

impl InputError {
    pub fn new(reason: &str) -> Self {
        Self(reason.to_owned())
    }
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for InputError {}

impl From<String> for InputError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Per-item outcome used throughout the hot paths (FASTQ parsing, basecall
/// result handling). `BadInput` and `Failed` are both "this one item is
/// unusable", `Skipped` additionally signals "this was expected, don't
/// count it as a failure".
#[derive(Debug, Clone)]
pub enum RunError {
    BadInput(InputError),
    Failed(String),
    Skipped(String),
}

impl RunError {
    pub fn new_input_error(reason: impl Into<String>) -> Self {
        Self::BadInput(InputError(reason.into()))
    }

    pub fn new_failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn new_skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadInput(e) => write!(f, "bad input: {e}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

impl std::error::Error for RunError {}
