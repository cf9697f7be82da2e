//! Periodic state-snapshot logging.
//!
//! Entities expose a fixed key/value snapshot of their live state; the
//! runtime pushes snapshots to a sink at tiered periods. The JSONL sink
//! mirrors how run time-series are persisted elsewhere in the workspace.

use hearth_core::{Temp, Ticks};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Snapshot emission tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTier {
    /// Every 10 s.
    Fast,
    /// Every minute.
    Medium,
    /// Every 15 min.
    Slow,
}

impl LogTier {
    pub fn period(self) -> Ticks {
        match self {
            LogTier::Fast => Ticks::from_secs(10),
            LogTier::Medium => Ticks::from_mins(1),
            LogTier::Slow => Ticks::from_mins(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LogValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Temp(Temp),
}

impl From<bool> for LogValue {
    fn from(v: bool) -> Self {
        LogValue::Bool(v)
    }
}

impl From<i64> for LogValue {
    fn from(v: i64) -> Self {
        LogValue::Int(v)
    }
}

impl From<f64> for LogValue {
    fn from(v: f64) -> Self {
        LogValue::Float(v)
    }
}

impl From<Temp> for LogValue {
    fn from(v: Temp) -> Self {
        LogValue::Temp(v)
    }
}

pub trait LogSink: Send + Sync {
    fn append(&self, tier: LogTier, entity: &str, values: &[(&'static str, LogValue)]);
}

#[derive(Serialize)]
struct JsonlRecord<'a> {
    entity: &'a str,
    #[serde(flatten)]
    values: std::collections::BTreeMap<&'a str, LogValue>,
}

/// Appends one JSON object per snapshot to a file.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
        }
    }
}

impl LogSink for JsonlSink {
    fn append(&self, _tier: LogTier, entity: &str, values: &[(&'static str, LogValue)]) {
        let record = JsonlRecord {
            entity,
            values: values.iter().copied().collect(),
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                warn!(entity, %err, "log snapshot encoding failed");
                return;
            }
        };

        let mut guard = self.file.lock().expect("log lock");
        if guard.is_none() {
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(f) => *guard = Some(f),
                Err(err) => {
                    warn!(path = %self.path.display(), %err, "log sink open failed");
                    return;
                }
            }
        }
        if let Some(f) = guard.as_mut() {
            if let Err(err) = writeln!(f, "{line}") {
                warn!(%err, "log sink write failed");
                *guard = None;
            }
        }
    }
}

/// Collecting sink for tests.
#[derive(Default)]
pub struct MemSink {
    pub records: Mutex<Vec<(String, Vec<(&'static str, LogValue)>)>>,
}

impl MemSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogSink for MemSink {
    fn append(&self, _tier: LogTier, entity: &str, values: &[(&'static str, LogValue)]) {
        self.records
            .lock()
            .expect("log lock")
            .push((entity.to_string(), values.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_periods() {
        assert_eq!(LogTier::Fast.period(), Ticks::from_secs(10));
        assert_eq!(LogTier::Medium.period(), Ticks::from_secs(60));
        assert_eq!(LogTier::Slow.period(), Ticks::from_secs(900));
    }

    #[test]
    fn mem_sink_collects() {
        let sink = MemSink::new();
        sink.append(
            LogTier::Fast,
            "boiler",
            &[("burner_on", true.into()), ("target", Temp::celsius(60.0).into())],
        );
        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "boiler");
    }
}
