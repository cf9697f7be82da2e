//! Per-tick context handed to every entity.

use crate::error::{PlantError, PlantResult};
use crate::pump::{Pump, PumpHandle};
use crate::valve::Valve;
use hearth_core::{PumpId, RunMode, ScheduleId, Ticks, ValveId};
use hearth_hal::{Alarms, Hal, Models, Scheduler, Severity};

/// Borrowed collaborators and tick-scoped values for one control pass.
pub struct TickCtx<'a> {
    pub now: Ticks,
    /// Day-of-year ordinal, for once-per-day behaviors.
    pub day_ordinal: u32,
    pub hal: &'a Hal,
    pub scheduler: &'a dyn Scheduler,
    pub models: &'a Models,
    pub alarms: &'a dyn Alarms,
    /// Fallback mode for entities in `Auto` without an applicable schedule.
    pub default_runmode: RunMode,
    pub default_dhwmode: RunMode,
}

impl TickCtx<'_> {
    /// Resolve an entity's effective space-heating run mode.
    pub fn resolve_runmode(&self, set: RunMode, schedid: Option<ScheduleId>) -> RunMode {
        if set != RunMode::Auto {
            return set;
        }
        schedid
            .and_then(|sid| self.scheduler.active(sid))
            .and_then(|p| p.runmode)
            .unwrap_or(self.default_runmode)
    }

    /// Resolve an entity's effective DHW run mode.
    pub fn resolve_dhwmode(&self, set: RunMode, schedid: Option<ScheduleId>) -> RunMode {
        if set != RunMode::Auto {
            return set;
        }
        schedid
            .and_then(|sid| self.scheduler.active(sid))
            .and_then(|p| p.dhwmode)
            .unwrap_or(self.default_dhwmode)
    }

    pub fn warn(&self, message: String) {
        self.alarms.raise(Severity::Warning, message);
    }

    pub fn critical(&self, message: String) {
        self.alarms.raise(Severity::Critical, message);
    }
}

/// Mutable views over the plant's shared actuators, split-borrowed from the
/// plant so consumer entities can post requests while being iterated
/// themselves.
pub struct Actuators<'a> {
    pub valves: &'a mut [Valve],
    pub pumps: &'a mut [Pump],
}

impl Actuators<'_> {
    pub fn valve_mut(&mut self, vid: ValveId) -> PlantResult<&mut Valve> {
        self.valves
            .get_mut(vid.index() as usize)
            .ok_or(PlantError::Invalid {
                what: "unknown valve id",
            })
    }

    pub fn pump_mut(&mut self, pid: PumpId) -> PlantResult<&mut Pump> {
        self.pumps
            .get_mut(pid.index() as usize)
            .ok_or(PlantError::Invalid {
                what: "unknown pump id",
            })
    }

    /// Post a request through a pump handle.
    pub fn pump_set_state(
        &mut self,
        handle: PumpHandle,
        on: bool,
        force: bool,
    ) -> PlantResult<()> {
        self.pump_mut(handle.pump)?.set_state(handle, on, force)
    }
}
