//! Run metrics and the append-only metrics log.

use std::fs::OpenOptions;

use serde::Serialize;

use crate::{controller::Strategy, error::OffloadError, prelude::*};

/// Metrics for one completed iteration. Emitted in `run_idx` order, exactly
/// one per iteration.
#[derive(Clone, Debug)]
pub struct RunMetrics {
    pub strategy: Strategy,
    pub run_idx: usize,
    pub elapsed_ms: u64,
    pub pages_ok: usize,
    pub page_count: usize,
    /// The iteration failed; it is recorded rather than aborting the batch.
    pub failed: bool,
}

/// Metrics for a whole batch of repeated runs, written as one log record.
///
/// `elapsed_ms` spans from immediately before the first dispatch to the
/// terminal state of the last iteration. `file_size_mb` is cumulative bytes
/// actually processed (file size × completed iterations).
#[derive(Clone, Debug, Serialize)]
pub struct BatchMetrics {
    pub mode: Strategy,
    pub elapsed_ms: u64,
    pub file_size_mb: f64,
    pub battery_delta: i64,
    pub page_count: usize,
    pub repeat_jobs: usize,
}

/// Append-only record sink for batch metrics: one CSV line per batch.
///
/// Appending takes `&mut self`, which keeps the file single-writer and its
/// lines whole.
pub struct MetricsLog {
    path: PathBuf,
}

impl MetricsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one batch record, writing the CSV header first when the file
    /// is new.
    pub fn append(&mut self, record: &BatchMetrics) -> Result<(), OffloadError> {
        let is_new = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| {
                OffloadError::io(anyhow!(
                    "cannot open metrics log {}: {}",
                    self.path.display(),
                    err
                ))
            })?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer
            .serialize(record)
            .map_err(|err| OffloadError::io(anyhow!("cannot write metrics: {err}")))?;
        writer
            .flush()
            .map_err(|err| OffloadError::io(anyhow!("cannot flush metrics: {err}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn record(mode: Strategy, elapsed_ms: u64) -> BatchMetrics {
        BatchMetrics {
            mode,
            elapsed_ms,
            file_size_mb: 1.5,
            battery_delta: 420,
            page_count: 3,
            repeat_jobs: 2,
        }
    }

    #[test]
    fn writes_header_once_and_appends() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("metrics")?;
        let path = tmpdir.path().join("offload-metrics.csv");
        let mut log = MetricsLog::new(&path);

        log.append(&record(Strategy::Local, 1200))?;
        log.append(&record(Strategy::Remote, 800))?;

        let contents = fs::read_to_string(&path)?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "mode,elapsed_ms,file_size_mb,battery_delta,page_count,repeat_jobs"
        );
        assert_eq!(lines[1], "local,1200,1.5,420,3,2");
        assert_eq!(lines[2], "remote,800,1.5,420,3,2");
        Ok(())
    }
}
