use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::path::Path;

/// Sample rate assumed when the timestamps cannot establish one.
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 30.0;

/// Load a timestamped brightness export and return `(sample_rate_hz, values)`.
///
/// The timestamp column is probed case-insensitively among the usual names;
/// the rate is inferred from the first timestamp delta.
pub fn read_brightness_csv(path: &Path, value_column: &str) -> Result<(f64, Vec<f64>)> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let timestamp_idx = headers
        .iter()
        .position(|h| {
            h.eq_ignore_ascii_case("timestamp")
                || h.eq_ignore_ascii_case("elapsed")
                || h.eq_ignore_ascii_case("time")
        })
        .context("missing timestamp column")?;
    let value_idx = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(value_column))
        .context(format!("missing value column '{}'", value_column))?;

    let mut values = Vec::new();
    let mut last_ts = None;
    let mut fs = 0.0;
    for record in reader.records() {
        let record = record.context("reading record")?;
        let timestamp_str = record
            .get(timestamp_idx)
            .ok_or_else(|| anyhow::anyhow!("missing timestamp field"))?;
        let ts: f64 = timestamp_str
            .parse()
            .with_context(|| format!("parsing timestamp {}", timestamp_str))?;
        let value_str = record
            .get(value_idx)
            .ok_or_else(|| anyhow::anyhow!("missing value field"))?;
        let value = value_str.parse::<f64>().context("parsing brightness value")?;
        if let Some(prev) = last_ts {
            if fs == 0.0 && ts > prev {
                fs = 1.0 / (ts - prev);
            }
        }
        last_ts = Some(ts);
        values.push(value);
    }
    if values.is_empty() {
        anyhow::bail!("no rows in {}", path.display());
    }
    if fs <= 0.0 {
        fs = DEFAULT_SAMPLE_RATE_HZ;
    }
    Ok((fs, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_timestamped_export() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "elapsed,green").unwrap();
        for i in 0..5 {
            writeln!(file, "{},{}", i as f64 / 30.0, 110.0 + i as f64).unwrap();
        }
        let (fs, values) = read_brightness_csv(file.path(), "green").unwrap();
        assert!((fs - 30.0).abs() < 1e-6);
        assert_eq!(values.len(), 5);
        assert!((values[0] - 110.0).abs() < 1e-9);
    }

    #[test]
    fn missing_column_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "elapsed,green").unwrap();
        writeln!(file, "0.0,110.0").unwrap();
        assert!(read_brightness_csv(file.path(), "red").is_err());
    }
}
