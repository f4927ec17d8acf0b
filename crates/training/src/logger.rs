//! Run directory sink: scalar metrics as JSONL plus a config snapshot.

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const METRICS_FILE: &str = "metrics.jsonl";
pub const CONFIG_FILE: &str = "config.json";

/// Persists one run's scalars and its resolved configuration.
pub struct RunLogger {
    run_dir: PathBuf,
    metrics: File,
}

impl RunLogger {
    pub fn create(run_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(run_dir)?;
        let metrics = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(run_dir.join(METRICS_FILE))?;
        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            metrics,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append one scalar record, e.g. `{"epoch":3,"name":"val/loss","value":0.41}`.
    pub fn log_scalar(&mut self, epoch: usize, name: &str, value: f64) -> anyhow::Result<()> {
        let record = serde_json::json!({
            "epoch": epoch,
            "name": name,
            "value": value,
        });
        writeln!(self.metrics, "{record}")?;
        Ok(())
    }

    /// Snapshot the resolved run configuration next to the metrics.
    pub fn save_config<T: Serialize>(&self, config: &T) -> anyhow::Result<()> {
        let data = serde_json::to_vec_pretty(config)?;
        fs::write(self.run_dir.join(CONFIG_FILE), data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_metrics_and_config() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut logger = RunLogger::create(tmp.path())?;
        logger.log_scalar(0, "train/loss", 1.25)?;
        logger.log_scalar(1, "train/loss", 0.75)?;
        logger.save_config(&serde_json::json!({"batch_size": 8}))?;

        let metrics = fs::read_to_string(tmp.path().join(METRICS_FILE))?;
        let lines: Vec<&str> = metrics.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0])?;
        assert_eq!(first["name"], "train/loss");
        assert_eq!(first["epoch"], 0);

        let config = fs::read_to_string(tmp.path().join(CONFIG_FILE))?;
        assert!(config.contains("batch_size"));
        Ok(())
    }
}
