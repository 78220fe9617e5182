use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::model::{Alert, Significance};
use crate::store::AlertSink;

/// Writes alerts to the tracing log.
#[derive(Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn emit(&self, alert: &Alert) -> Result<()> {
        let fields: Vec<&str> = alert.changes.iter().map(|c| c.field.as_str()).collect();
        if alert.significance >= Significance::High {
            warn!(
                target_id = alert.target_id,
                category = %alert.category,
                snapshot = alert.snapshot_id,
                "{} {} change on {}: {}",
                alert.significance,
                alert.category,
                alert.domain,
                fields.join(", ")
            );
        } else {
            info!(
                target_id = alert.target_id,
                category = %alert.category,
                snapshot = alert.snapshot_id,
                "{} {} change on {}: {}",
                alert.significance,
                alert.category,
                alert.domain,
                fields.join(", ")
            );
        }
        Ok(())
    }
}

/// Appends one JSON object per alert to a file.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create alerts directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open alerts file {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlertSink for JsonlSink {
    fn emit(&self, alert: &Alert) -> Result<()> {
        let line = serde_json::to_string(alert).context("Failed to serialize alert")?;
        let mut file = self.file.lock().map_err(|_| anyhow!("alerts file lock poisoned"))?;
        writeln!(file, "{}", line).context("Failed to write alert")?;
        file.flush()?;
        Ok(())
    }
}

/// Sends each alert to every inner sink; the first error is returned after
/// all sinks have been tried.
pub struct FanoutSink(pub Vec<Box<dyn AlertSink>>);

impl AlertSink for FanoutSink {
    fn emit(&self, alert: &Alert) -> Result<()> {
        let mut first_err = None;
        for sink in &self.0 {
            if let Err(e) = sink.emit(alert) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, Change, FieldValue};

    fn alert(significance: Significance) -> Alert {
        Alert {
            target_id: 7,
            domain: "acme.cz".into(),
            category: Category::Pricing,
            significance,
            snapshot_id: 42,
            changes: vec![Change {
                field: "pricing_model".into(),
                before: FieldValue::Text("tiered".into()),
                after: FieldValue::Text("hourly".into()),
                significance: Some(significance),
            }],
        }
    }

    #[test]
    fn jsonl_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("alerts.jsonl");
        let sink = JsonlSink::open(&path).unwrap();
        sink.emit(&alert(Significance::High)).unwrap();
        sink.emit(&alert(Significance::Critical)).unwrap();

        let text = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["significance"], "HIGH");
        assert_eq!(first["category"], "pricing");
        assert_eq!(first["changes"][0]["after"]["value"], "hourly");
    }

    #[test]
    fn jsonl_reopen_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        JsonlSink::open(&path).unwrap().emit(&alert(Significance::High)).unwrap();
        JsonlSink::open(&path).unwrap().emit(&alert(Significance::Low)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    struct Failing;

    impl AlertSink for Failing {
        fn emit(&self, _: &Alert) -> Result<()> {
            Err(anyhow!("down"))
        }
    }

    #[test]
    fn fanout_tries_every_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let sink = FanoutSink(vec![
            Box::new(Failing),
            Box::new(LogSink),
            Box::new(JsonlSink::open(&path).unwrap()),
        ]);
        let err = sink.emit(&alert(Significance::High)).unwrap_err();
        assert_eq!(err.to_string(), "down");
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }
}
