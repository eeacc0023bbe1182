use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use derive_new::new;
use log::warn;
use nom::bytes::complete::{is_not, tag};
use nom::character::complete::char as nom_char;
use nom::sequence::separated_pair;
use nom::IResult;

use crate::errs::RunError;

/// A fully basecalled, immutable nanopore read built from one FASTQ record.
/// Lives only as long as it takes the read processor to batch and dispatch
/// it; never mutated after construction.
#[derive(Debug, Clone, new)]
pub struct NanoporeRead {
    pub read_id: String,
    pub run_id: String,
    pub fastq_path: String,
    pub start_time: DateTime<Utc>,
    pub channel: Option<u32>,
    pub barcode: Option<String>,
    pub read_index: Option<u64>,
    pub quality_avg: f64,
    pub sequence: String,
}

impl NanoporeRead {
    pub fn length(&self) -> usize {
        self.sequence.len()
    }

    /// `true` for `.../fastq_pass/...`, `false` for `.../fastq_fail/...`.
    /// Any other grandparent directory name is treated as fail with a
    /// warning, per the minKNOW output layout contract.
    pub fn is_pass(&self) -> bool {
        let path = Path::new(&self.fastq_path);
        let grandparent_name = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str());
        match grandparent_name {
            Some("fastq_pass") => true,
            Some("fastq_fail") => false,
            _ => {
                warn!(
                    "{} does not comply with the minKNOW fastq_pass/fastq_fail layout",
                    self.fastq_path
                );
                false
            }
        }
    }
}

/// Mean Phred quality score over a FASTQ quality string's per-base Phred+33
/// scores, in log space: `-10 * log10(mean(10^(-q/10)))`.
pub fn mean_qscore(qualities: &[u8]) -> f64 {
    if qualities.is_empty() {
        return 0.0;
    }
    let mean_error_prob = qualities
        .iter()
        .map(|&q| 10f64.powf(-(q as f64) / 10.0))
        .sum::<f64>()
        / qualities.len() as f64;
    -10.0 * mean_error_prob.log10()
}

/// Accumulates optional fields parsed from a FASTQ description before
/// finalizing into a `NanoporeRead`. Mirrors the original two-stage
/// builder so the "channel key may be `ch`, `channel`, or absent" and
/// "barcode may be absent" ambiguities don't need a combinatorial
/// constructor.
#[derive(Debug, Default)]
pub struct ReadBuilder {
    read_index: Option<u64>,
    channel: Option<u32>,
    barcode_name: Option<String>,
}

impl ReadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_read_index(&mut self, read_index: u64) -> &mut Self {
        self.read_index = Some(read_index);
        self
    }

    pub fn set_channel(&mut self, channel: u32) -> &mut Self {
        self.channel = Some(channel);
        self
    }

    pub fn set_barcode_name(&mut self, barcode_name: String) -> &mut Self {
        self.barcode_name = Some(barcode_name);
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build(
        self,
        read_id: String,
        fastq_path: String,
        run_id: String,
        start_time: DateTime<Utc>,
        quality_avg: f64,
        sequence: String,
    ) -> NanoporeRead {
        NanoporeRead {
            read_id,
            run_id,
            fastq_path,
            start_time,
            channel: self.channel,
            barcode: self.barcode_name,
            read_index: self.read_index,
            quality_avg,
            sequence,
        }
    }
}

fn key_value(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(is_not("= "), nom_char('='), is_not(" "))(input)
}

/// Parses a FASTQ description line of space-separated `key=value` pairs,
/// e.g. `runid=abc123 read=42 ch=512 start_time=2024-01-01T00:00:00Z`.
fn parse_description(description: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for token in description.split(' ') {
        if let Ok((_, (k, v))) = key_value(token) {
            out.insert(k.to_owned(), v.to_owned());
        }
    }
    out
}

/// Builds a `NanoporeRead` from a raw FASTQ record's id, description, and
/// quality string, applying the `runid` -> `run_id` header-key alias and
/// the `ch`/`channel` fallback.
pub fn construct_read(
    read_id: &str,
    description: &str,
    sequence: &str,
    quality: &[u8],
    fastq_path: &str,
) -> Result<NanoporeRead, RunError> {
    let fields = parse_description(description);

    let run_id = fields
        .get("runid")
        .or_else(|| fields.get("run_id"))
        .ok_or_else(|| RunError::new_input_error("missing runid in FASTQ description"))?
        .clone();

    let start_time_raw = fields
        .get("start_time")
        .ok_or_else(|| RunError::new_input_error("missing start_time in FASTQ description"))?;
    let start_time = DateTime::parse_from_rfc3339(start_time_raw)
        .map_err(|e| RunError::new_input_error(format!("invalid start_time: {e}")))?
        .with_timezone(&Utc);

    let mut builder = ReadBuilder::new();

    if let Some(raw) = fields.get("read") {
        match raw.parse::<u64>() {
            Ok(idx) => {
                builder.set_read_index(idx);
            }
            Err(_) => {
                return Err(RunError::new_skipped(format!(
                    "non-numeric read index {raw:?}"
                )))
            }
        }
    }

    let channel_raw = fields.get("ch").or_else(|| fields.get("channel"));
    if let Some(raw) = channel_raw {
        if let Ok(channel) = raw.parse::<u32>() {
            builder.set_channel(channel);
        }
    }

    if let Some(barcode) = fields.get("barcode") {
        builder.set_barcode_name(barcode.replace(' ', "_"));
    }

    let quality_avg = mean_qscore(quality);

    Ok(builder.build(
        read_id.to_owned(),
        fastq_path.to_owned(),
        run_id,
        start_time,
        quality_avg,
        sequence.to_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_description() {
        let read = construct_read(
            "read-1",
            "runid=abc123 read=42 ch=512 start_time=2024-01-01T00:00:00Z barcode=barcode 01",
            "ACGT",
            &[40, 40, 40, 40],
            "/data/run/fastq_pass/file.fastq",
        )
        .unwrap();
        assert_eq!(read.run_id, "abc123");
        assert_eq!(read.read_index, Some(42));
        assert_eq!(read.channel, Some(512));
        assert_eq!(read.barcode, Some("barcode_01".to_owned()));
        assert!(read.is_pass());
    }

    #[test]
    fn channel_alias_fallback() {
        let read = construct_read(
            "read-2",
            "runid=abc123 start_time=2024-01-01T00:00:00Z channel=7",
            "ACGT",
            &[40, 40, 40, 40],
            "/data/run/fastq_fail/file.fastq",
        )
        .unwrap();
        assert_eq!(read.channel, Some(7));
        assert!(!read.is_pass());
    }

    #[test]
    fn missing_channel_leaves_none() {
        let read = construct_read(
            "read-3",
            "runid=abc123 start_time=2024-01-01T00:00:00Z",
            "ACGT",
            &[40, 40, 40, 40],
            "/data/run/fastq_pass/file.fastq",
        )
        .unwrap();
        assert_eq!(read.channel, None);
    }

    #[test]
    fn non_numeric_read_index_is_skipped() {
        let err = construct_read(
            "read-4",
            "runid=abc123 start_time=2024-01-01T00:00:00Z read=not-a-number",
            "ACGT",
            &[40, 40, 40, 40],
            "/data/run/fastq_pass/file.fastq",
        )
        .unwrap_err();
        assert!(matches!(err, RunError::Skipped(_)));
    }

    #[test]
    fn missing_start_time_is_bad_input() {
        let err = construct_read(
            "read-5",
            "runid=abc123",
            "ACGT",
            &[40, 40, 40, 40],
            "/data/run/fastq_pass/file.fastq",
        )
        .unwrap_err();
        assert!(matches!(err, RunError::BadInput(_)));
    }

    #[test]
    fn unexpected_layout_warns_and_is_fail() {
        let read = construct_read(
            "read-6",
            "runid=abc123 start_time=2024-01-01T00:00:00Z",
            "ACGT",
            &[40, 40, 40, 40],
            "/data/run/weird_dir/file.fastq",
        )
        .unwrap();
        assert!(!read.is_pass());
    }
}
