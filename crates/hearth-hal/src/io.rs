//! Inputs/Outputs subsystem: named sensor and relay access.
//!
//! The control core never talks to hardware directly; it resolves sensor and
//! relay names to compact ids at config time and goes through these traits
//! each tick. Backends (SPI board, MQTT, the simulated backend in
//! [`crate::sim`]) implement them.

use hearth_core::{RelayId, SensorId, Temp, Ticks};
use std::sync::Arc;
use thiserror::Error;

/// Sensor read failure causes, mapped to distinct alarms by the core.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("sensor shorted")]
    Short,

    #[error("sensor disconnected")]
    Disconnected,

    #[error("sensor value invalid")]
    Invalid,

    #[error("sensor value stale")]
    Stale,

    #[error("unknown sensor")]
    Unknown,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("unknown relay")]
    Unknown,

    #[error("relay already claimed")]
    Claimed,

    #[error("relay not claimed")]
    NotClaimed,

    #[error("relay backend failure: {what}")]
    Backend { what: &'static str },
}

/// Temperature inputs.
pub trait Inputs: Send + Sync {
    /// Resolve a configured sensor name to its id.
    fn resolve(&self, name: &str) -> Option<SensorId>;

    /// Current temperature of a sensor.
    fn temperature(&self, sid: SensorId) -> Result<Temp, SensorError>;

    /// Monotonic time of the last successful sample for a sensor.
    fn temperature_time(&self, sid: SensorId) -> Ticks;
}

/// Relay outputs with exclusive-claim semantics.
///
/// A relay must be grabbed before it can be driven; `thaw` releases the
/// claim at offline time.
pub trait Outputs: Send + Sync {
    /// Resolve a configured relay name to its id.
    fn resolve(&self, name: &str) -> Option<RelayId>;

    /// Exclusively claim a relay.
    fn grab(&self, rid: RelayId) -> Result<(), RelayError>;

    /// Release a claim. Unknown or unclaimed relays are ignored.
    fn thaw(&self, rid: RelayId);

    /// Drive a claimed relay.
    fn set(&self, rid: RelayId, on: bool) -> Result<(), RelayError>;

    /// Observe the current relay state.
    fn get(&self, rid: RelayId) -> Result<bool, RelayError>;
}

/// Cheap-to-clone bundle of the two I/O trait objects.
#[derive(Clone)]
pub struct Hal {
    pub inputs: Arc<dyn Inputs>,
    pub outputs: Arc<dyn Outputs>,
}

impl Hal {
    pub fn new(inputs: Arc<dyn Inputs>, outputs: Arc<dyn Outputs>) -> Self {
        Self { inputs, outputs }
    }
}
