use hearth_hal::{RelayError, SensorError};
use thiserror::Error;

pub type PlantResult<T> = Result<T, PlantError>;

/// Error taxonomy of the plant control core.
///
/// `Deadzone` and `Deadband` are control no-ops, not true faults; callers
/// absorb them locally. `Safety` always triggers an entity failsafe.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlantError {
    #[error("invalid argument: {what}")]
    Invalid { what: &'static str },

    #[error("not configured: {what}")]
    NotConfigured { what: &'static str },

    #[error("misconfigured: {what}")]
    Misconfigured { what: &'static str },

    #[error("entity offline: {what}")]
    Offline { what: &'static str },

    #[error("safety limit violated: {what}")]
    Safety { what: &'static str },

    #[error("run mode not handled here")]
    InvalidMode,

    #[error("target within deadzone")]
    Deadzone,

    #[error("course below deadband")]
    Deadband,

    #[error("not implemented: {what}")]
    NotImplemented { what: &'static str },

    #[error("already claimed: {what}")]
    Exists { what: &'static str },

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl PlantError {
    /// True for the control no-op pseudo-errors.
    pub fn is_benign(&self) -> bool {
        matches!(self, PlantError::Deadzone | PlantError::Deadband)
    }
}
