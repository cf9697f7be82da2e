//! Run modes shared by the scheduler and every plant entity.

use serde::{Deserialize, Serialize};

/// Operating mode of a plant entity.
///
/// `Auto` resolves through the weekly schedule (or the runtime default when
/// no schedule applies); every other value is a fixed override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Entity disabled (frost protection still applies where configured).
    Off,
    /// Follow schedule / runtime default.
    #[default]
    Auto,
    /// Full comfort temperatures.
    Comfort,
    /// Reduced (economy) temperatures.
    Eco,
    /// DHW only: heating circuits off, DHW tanks in comfort.
    Dhwonly,
    /// Frost-free: minimum temperatures to protect the installation.
    Frostfree,
    /// Actuator exercise mode, bypasses control logic.
    Test,
}

impl RunMode {
    /// True when the mode calls for active space-heating control.
    pub fn heats(self) -> bool {
        matches!(self, RunMode::Comfort | RunMode::Eco | RunMode::Frostfree)
    }
}
