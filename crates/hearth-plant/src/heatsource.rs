//! Heat source wrapper: backend-agnostic state machine shell.
//!
//! The plant talks to heat sources through this wrapper; the actual burner
//! (or any future source type) sits behind [`HeatSourceBackend`]. Only one
//! heat source is dispatched to per plant.

use crate::ctx::{Actuators, TickCtx};
use crate::error::{PlantError, PlantResult};
use crate::pdata::PlantData;
use hearth_core::{RunMode, ScheduleId, Temp, Ticks};
use hearth_hal::Hal;
use tracing::warn;

/// Behavior a concrete heat source implements.
///
/// `logic` evaluates demand into a target and safety state; `run` actuates.
/// Both receive the wrapper's shared run state to fill in shift signals and
/// the overtemp flag.
pub trait HeatSourceBackend: Send {
    fn online(&mut self, ctx: &TickCtx, hs: &mut HeatSourceRun) -> PlantResult<()>;
    fn offline(&mut self, ctx: &TickCtx) -> PlantResult<()>;
    fn logic(
        &mut self,
        ctx: &TickCtx,
        pdata: &PlantData,
        hs: &mut HeatSourceRun,
        acts: &mut Actuators<'_>,
    ) -> PlantResult<()>;
    fn run(
        &mut self,
        ctx: &TickCtx,
        pdata: &PlantData,
        hs: &mut HeatSourceRun,
        acts: &mut Actuators<'_>,
    ) -> PlantResult<()>;
    /// Current source temperature.
    fn temp(&self, hal: &Hal) -> PlantResult<Temp>;
    /// Sample time of the source temperature.
    fn time(&self, hal: &Hal) -> Ticks;
}

#[derive(Debug, Clone)]
pub struct HeatSourceSet {
    pub runmode: RunMode,
    pub schedid: Option<ScheduleId>,
    /// Handed plant-wide when a consumer untrips: delay during which other
    /// consumers must not reduce intake.
    pub consumer_sdelay: Ticks,
}

#[derive(Debug, Default)]
pub struct HeatSourceRun {
    pub online: bool,
    pub failed: bool,
    pub overtemp: bool,
    /// Arbitrated demand written by plant dispatch before `run`.
    pub temp_request: Option<Temp>,
    /// Critical consumer power shift, percent.
    pub cshift_crit: i16,
    /// Non-critical consumer power shift, percent.
    pub cshift_noncrit: i16,
    pub runmode_effective: RunMode,
}

pub struct HeatSource {
    name: String,
    set: HeatSourceSet,
    run: HeatSourceRun,
    backend: Box<dyn HeatSourceBackend>,
}

impl HeatSource {
    pub fn new(
        name: impl Into<String>,
        set: HeatSourceSet,
        backend: Box<dyn HeatSourceBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            set,
            run: HeatSourceRun::default(),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_online(&self) -> bool {
        self.run.online
    }

    pub fn has_failed(&self) -> bool {
        self.run.failed
    }

    pub fn is_overtemp(&self) -> bool {
        self.run.overtemp
    }

    pub fn cshift_crit(&self) -> i16 {
        self.run.cshift_crit
    }

    pub fn cshift_noncrit(&self) -> i16 {
        self.run.cshift_noncrit
    }

    pub fn consumer_sdelay(&self) -> Ticks {
        self.set.consumer_sdelay
    }

    pub fn temp(&self, hal: &Hal) -> PlantResult<Temp> {
        self.backend.temp(hal)
    }

    pub fn online(&mut self, ctx: &TickCtx) -> PlantResult<()> {
        self.run = HeatSourceRun::default();
        self.backend.online(ctx, &mut self.run)?;
        self.run.online = true;
        Ok(())
    }

    pub fn offline(&mut self, ctx: &TickCtx) -> PlantResult<()> {
        let res = self.backend.offline(ctx);
        self.run.online = false;
        res
    }

    /// Plant dispatch: post the arbitrated heat request.
    pub fn dispatch(&mut self, request: Option<Temp>) -> PlantResult<()> {
        if !self.run.online {
            return Err(PlantError::Offline { what: "heat source" });
        }
        self.run.temp_request = request;
        Ok(())
    }

    /// One tick: resolve the effective mode, then backend logic + actuation.
    ///
    /// Backend failures latch `failed` (consumed by plant arbitration) and
    /// raise an alarm; the backend has already applied its own failsafe.
    pub fn run_tick(
        &mut self,
        ctx: &TickCtx,
        pdata: &PlantData,
        acts: &mut Actuators<'_>,
    ) -> PlantResult<()> {
        if !self.run.online {
            return Err(PlantError::Offline { what: "heat source" });
        }
        self.run.runmode_effective = ctx.resolve_runmode(self.set.runmode, self.set.schedid);

        let result = self
            .backend
            .logic(ctx, pdata, &mut self.run, acts)
            .and_then(|()| self.backend.run(ctx, pdata, &mut self.run, acts));

        match result {
            Ok(()) => {
                self.run.failed = false;
                Ok(())
            }
            Err(err) => {
                self.run.failed = true;
                warn!(source = %self.name, %err, "heat source fault");
                ctx.critical(format!("heat source {}: {err}", self.name));
                Err(err)
            }
        }
    }
}
