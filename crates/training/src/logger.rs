//! Append-only JSONL metric sink.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Writes one JSON object per observation to `metrics.jsonl` under the run
/// directory. Keys follow the `{split}/{metric}` convention, e.g.
/// `val/mean_iou`. Logging failures disable the sink with a warning instead
/// of aborting training.
#[derive(Debug)]
pub struct MetricLog {
    file: Option<File>,
}

impl MetricLog {
    pub fn create(log_dir: &Path) -> Self {
        let open = || -> std::io::Result<File> {
            std::fs::create_dir_all(log_dir)?;
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_dir.join("metrics.jsonl"))
        };
        match open() {
            Ok(file) => Self { file: Some(file) },
            Err(err) => {
                tracing::warn!(dir = %log_dir.display(), %err, "metric log unavailable, continuing without it");
                Self { file: None }
            }
        }
    }

    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub fn log_scalar(&mut self, key: &str, epoch: usize, value: f64) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let line = serde_json::json!({
            "key": key,
            "epoch": epoch,
            "value": value,
        });
        if let Err(err) = writeln!(file, "{line}") {
            tracing::warn!(%err, "metric log write failed, disabling sink");
            self.file = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_json_line_per_scalar() {
        let temp = tempfile::tempdir().unwrap();
        let mut log = MetricLog::create(temp.path());
        log.log_scalar("train/loss", 1, 0.75);
        log.log_scalar("val/mean_iou", 1, 0.5);
        let contents = std::fs::read_to_string(temp.path().join("metrics.jsonl")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["key"], "train/loss");
        assert_eq!(first["epoch"], 1);
        assert!((first["value"].as_f64().unwrap() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn disabled_sink_swallows_writes() {
        let mut log = MetricLog::disabled();
        log.log_scalar("train/loss", 1, 0.1);
    }
}
