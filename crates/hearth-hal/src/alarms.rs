//! Best-effort alarm delivery.
//!
//! Entities raise textual alarms when something needs user attention; the
//! collector deduplicates repeats so a persistent fault produces one active
//! entry, not one per tick. The runtime drains active entries periodically.
//! Raising an alarm never fails the control loop.

use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmEntry {
    pub severity: Severity,
    pub message: String,
}

pub trait Alarms: Send + Sync {
    fn raise(&self, severity: Severity, message: String);
}

#[derive(Default)]
struct AlarmInner {
    active: Vec<AlarmEntry>,
    seen: HashSet<String>,
}

/// Deduplicating alarm collector.
#[derive(Default)]
pub struct AlarmLog {
    inner: Mutex<AlarmInner>,
}

impl AlarmLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all active alarms, clearing the dedup set.
    pub fn drain(&self) -> Vec<AlarmEntry> {
        let mut inner = self.inner.lock().expect("alarm lock");
        inner.seen.clear();
        std::mem::take(&mut inner.active)
    }

    /// Number of currently active (undrained) alarms.
    pub fn active_count(&self) -> usize {
        self.inner.lock().expect("alarm lock").active.len()
    }
}

impl Alarms for AlarmLog {
    fn raise(&self, severity: Severity, message: String) {
        let mut inner = self.inner.lock().expect("alarm lock");
        if !inner.seen.insert(message.clone()) {
            return;
        }
        match severity {
            Severity::Warning => warn!(alarm = %message),
            Severity::Critical => error!(alarm = %message),
        }
        inner.active.push(AlarmEntry { severity, message });
    }
}
