//! DHW tank: charge state machine with priorities and failover.
//!
//! Trip/untrip hysteresis around a mode-derived target, anti-legionella
//! charges, electric self-heater failover when the plant sleeps or all heat
//! sources failed, and feed/recycle/isolation orchestration gated on inlet
//! water acceptability.

use crate::ctx::{Actuators, TickCtx};
use crate::error::{PlantError, PlantResult};
use crate::params::{DhwtParams, DhwtParamsOvr};
use crate::pdata::PlantData;
use crate::pump::PumpHandle;
use hearth_core::{RelayId, RunMode, ScheduleId, SensorId, Temp, TempDiff, Ticks, ValveId};
use tracing::{debug, warn};

/// Trip margin used for forced and frost-free charges.
const FORCED_TRIP_DELTA: TempDiff = TempDiff::from_centikelvin(100); // 1 K
/// Inlet must exceed the tank temperature by this much to be worth feeding.
const WINTEMP_MARGIN: TempDiff = TempDiff::from_centikelvin(100); // 1 K

/// Plant-wide arbitration category of a charging tank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargePrio {
    /// Charge in parallel; the final request is the max of all requests.
    ParallelMax,
    /// Charge in parallel; the DHW request overrides the circuit max.
    ParallelDhwOverride,
    /// Circuits may be power-shifted down; request is the max.
    SlidingMax,
    /// Circuits may be power-shifted down; DHW request overrides.
    SlidingDhwOverride,
    /// Circuits are blocked entirely while charging.
    Absolute,
}

impl ChargePrio {
    pub fn is_sliding(self) -> bool {
        matches!(self, ChargePrio::SlidingMax | ChargePrio::SlidingDhwOverride)
    }

    pub fn is_absolute(self) -> bool {
        matches!(self, ChargePrio::Absolute)
    }

    pub fn overrides_request(self) -> bool {
        matches!(
            self,
            ChargePrio::ParallelDhwOverride | ChargePrio::SlidingDhwOverride
        )
    }
}

/// When to force a full charge regardless of the hysteresis band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceMode {
    Never,
    /// On the first comfort period of each day.
    FirstOfDay,
    /// On every transition into comfort.
    Always,
}

#[derive(Debug, Clone, Copy)]
pub struct LegionellaSet {
    /// Charge target during an anti-legionella cycle.
    pub tlegionella: Temp,
    /// Run the recycle pump during the cycle to sanitize the loop.
    pub recycle: bool,
}

#[derive(Debug, Clone)]
pub struct DhwtSet {
    pub runmode: RunMode,
    pub schedid: Option<ScheduleId>,
    /// Charge priority value: lower is more urgent.
    pub prio: u8,
    pub charge_prio: ChargePrio,
    pub force_mode: ForceMode,
    pub legionella: Option<LegionellaSet>,
    /// The electric self-heater has its own thermostat (safe to leave on).
    pub electric_hasthermostat: bool,
    pub params: DhwtParamsOvr,
    pub tid_top: Option<SensorId>,
    pub tid_bottom: Option<SensorId>,
    /// Feed-water (inlet) sensor.
    pub tid_win: Option<SensorId>,
    pub rid_selfheater: Option<RelayId>,
    pub pump_feed: Option<PumpHandle>,
    pub pump_recycle: Option<PumpHandle>,
    /// Isolates the tank from the DHW distribution when inactive.
    pub valve_hwisol: Option<ValveId>,
    /// Isolates the heating feed when the inlet is unacceptable.
    pub valve_feedisol: Option<ValveId>,
}

#[derive(Debug, Default)]
struct DhwtRun {
    online: bool,
    params: DhwtParams,
    runmode_effective: RunMode,
    active: bool,
    charge_on: bool,
    recycle_on: bool,
    force_on: bool,
    legionella_on: bool,
    electric_mode: bool,
    charge_overtime: bool,
    target: Temp,
    actual: Temp,
    heat_request: Option<Temp>,
    /// Charge start or last untrip instant.
    mode_since: Ticks,
    last_force_day: Option<u32>,
    /// Previous tick was in a comfort-class mode (force-charge edges).
    was_comfort: bool,
    /// Untrip happened this tick (plant arms the consumer stop-delay).
    untripped: bool,
    /// Inlet-acceptability hysteresis state.
    win_ok: bool,
}

pub struct Dhwt {
    name: String,
    set: DhwtSet,
    run: DhwtRun,
}

impl Dhwt {
    pub fn new(name: impl Into<String>, set: DhwtSet) -> Self {
        Self {
            name: name.into(),
            set,
            run: DhwtRun::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_online(&self) -> bool {
        self.run.online
    }

    pub fn prio(&self) -> u8 {
        self.set.prio
    }

    pub fn charge_prio(&self) -> ChargePrio {
        self.set.charge_prio
    }

    pub fn is_charging(&self) -> bool {
        self.run.charge_on
    }

    pub fn is_electric(&self) -> bool {
        self.run.electric_mode
    }

    pub fn is_legionella(&self) -> bool {
        self.run.legionella_on
    }

    pub fn heat_request(&self) -> Option<Temp> {
        self.run.heat_request
    }

    pub fn target(&self) -> Temp {
        self.run.target
    }

    /// Untrip event flag, cleared on read by the plant.
    pub fn take_untrip(&mut self) -> bool {
        std::mem::take(&mut self.run.untripped)
    }

    pub fn online(&mut self, ctx: &TickCtx, defaults: &DhwtParams) -> PlantResult<()> {
        let params = self.set.params.merge(defaults);
        if params.limit_tmax <= params.limit_tmin {
            return Err(PlantError::Misconfigured {
                what: "dhwt limit_tmax must exceed limit_tmin",
            });
        }
        if params.hysteresis <= TempDiff::ZERO {
            return Err(PlantError::Misconfigured {
                what: "dhwt hysteresis must be positive",
            });
        }
        if self.set.tid_top.is_none() && self.set.tid_bottom.is_none() {
            return Err(PlantError::Misconfigured {
                what: "dhwt needs at least one tank sensor",
            });
        }
        if let Some(leg) = self.set.legionella {
            if leg.tlegionella > params.limit_tmax {
                return Err(PlantError::Misconfigured {
                    what: "dhwt legionella target above limit_tmax",
                });
            }
        }
        if let Some(rid) = self.set.rid_selfheater {
            ctx.hal.outputs.grab(rid)?;
        }
        self.run = DhwtRun {
            online: true,
            params,
            win_ok: true,
            ..DhwtRun::default()
        };
        Ok(())
    }

    pub fn offline(&mut self, ctx: &TickCtx) -> PlantResult<()> {
        if let Some(rid) = self.set.rid_selfheater {
            let _ = ctx.hal.outputs.set(rid, false);
            ctx.hal.outputs.thaw(rid);
        }
        self.run.online = false;
        self.run.heat_request = None;
        Ok(())
    }

    /// Mode resolution, target computation, legionella and force charges.
    pub fn logic(&mut self, ctx: &TickCtx, _pdata: &PlantData) -> PlantResult<()> {
        if !self.run.online {
            return Err(PlantError::Offline { what: "dhwt" });
        }
        let params = self.run.params;

        let mode = ctx.resolve_dhwmode(self.set.runmode, self.set.schedid);
        self.run.runmode_effective = mode;
        self.run.active = mode != RunMode::Off;

        let sched = self.set.schedid.and_then(|sid| ctx.scheduler.active(sid));
        self.run.recycle_on = sched.map(|p| p.recycle).unwrap_or(false);

        let comfort_class = matches!(mode, RunMode::Comfort | RunMode::Dhwonly);
        let mut target = match mode {
            RunMode::Comfort | RunMode::Dhwonly | RunMode::Test => params.t_comfort,
            RunMode::Eco => params.t_eco,
            _ => params.t_frostfree,
        };

        // forced charges on entry into a comfort-class period
        if comfort_class && !self.run.was_comfort {
            match self.set.force_mode {
                ForceMode::Never => {}
                ForceMode::FirstOfDay => {
                    if self.run.last_force_day != Some(ctx.day_ordinal) {
                        self.run.force_on = true;
                        self.run.last_force_day = Some(ctx.day_ordinal);
                    }
                }
                ForceMode::Always => self.run.force_on = true,
            }
        }
        self.run.was_comfort = comfort_class;

        // anti-legionella: scheduled cycles force a high-target charge
        if let (Some(leg), Some(p)) = (self.set.legionella, sched) {
            if p.legionella && !self.run.legionella_on {
                debug!(dhwt = %self.name, "anti-legionella cycle armed");
                self.run.legionella_on = true;
                self.run.force_on = true;
            }
            if self.run.legionella_on {
                target = leg.tlegionella;
                if leg.recycle {
                    self.run.recycle_on = true;
                }
            }
        }

        self.run.target = target.clamp(params.limit_tmin, params.limit_tmax);
        Ok(())
    }

    fn read_tank(
        &self,
        ctx: &TickCtx,
        prefer_top: bool,
    ) -> Result<Temp, hearth_hal::SensorError> {
        let (first, second) = if prefer_top {
            (self.set.tid_top, self.set.tid_bottom)
        } else {
            (self.set.tid_bottom, self.set.tid_top)
        };
        match first {
            Some(tid) => ctx.hal.inputs.temperature(tid).or_else(|err| {
                second
                    .map(|tid2| ctx.hal.inputs.temperature(tid2))
                    .unwrap_or(Err(err))
            }),
            None => {
                let tid = second.ok_or(hearth_hal::SensorError::Unknown)?;
                ctx.hal.inputs.temperature(tid)
            }
        }
    }

    fn set_selfheater(&self, ctx: &TickCtx, on: bool) -> PlantResult<()> {
        if let Some(rid) = self.set.rid_selfheater {
            ctx.hal.outputs.set(rid, on)?;
        }
        Ok(())
    }

    /// Charge state machine and actuation.
    pub fn run(
        &mut self,
        ctx: &TickCtx,
        pdata: &PlantData,
        acts: &mut Actuators<'_>,
    ) -> PlantResult<()> {
        if !self.run.online {
            return Err(PlantError::Offline { what: "dhwt" });
        }
        let now = ctx.now;
        let params = self.run.params;

        // actuator exercise: everything runs, control logic bypassed
        if pdata.summer_maint || self.run.runmode_effective == RunMode::Test {
            return self.maintenance(ctx, pdata, acts);
        }

        let actual = match self.read_tank(ctx, true) {
            Ok(t) => t,
            Err(err) => {
                warn!(dhwt = %self.name, %err, "tank sensor failure, failsafe");
                self.failsafe(ctx, acts)?;
                return Err(err.into());
            }
        };
        self.run.actual = actual;

        let electric_eligible =
            (pdata.could_sleep || pdata.hs_allfailed) && !pdata.overtemp;

        if !self.run.charge_on {
            // electric mode is a standing state only while eligibility lasts
            if self.run.electric_mode && !electric_eligible {
                self.run.electric_mode = false;
                self.set_selfheater(ctx, false)?;
            }

            // cooldown after an overtime charge
            if self.run.charge_overtime {
                match params.limit_chargetime {
                    Some(limit) if now.since(self.run.mode_since) < limit => {}
                    _ => self.run.charge_overtime = false,
                }
            }

            let trip_delta =
                if self.run.force_on || self.run.runmode_effective == RunMode::Frostfree {
                    FORCED_TRIP_DELTA
                } else {
                    params.hysteresis
                };
            let trip = self.run.target - trip_delta;

            // a forced charge narrows the band to 1K below target; it does
            // not trip a tank already at temperature
            let want_charge = self.run.active && actual < trip;
            let blocked = self.run.charge_overtime && !electric_eligible;

            if want_charge && !blocked {
                if electric_eligible && self.set.rid_selfheater.is_some() {
                    // electric failover first: no heat request needed
                    self.set_selfheater(ctx, true)?;
                    self.run.electric_mode = true;
                    self.run.charge_on = true;
                    self.run.mode_since = now;
                    debug!(dhwt = %self.name, "electric charge started");
                } else if self.set.prio <= pdata.dhwt_currprio {
                    self.run.electric_mode = false;
                    self.run.charge_on = true;
                    self.run.mode_since = now;
                    debug!(dhwt = %self.name, "heat-source charge started");
                }
                // else: a higher-priority tank is charging; wait
            }
        } else {
            let mut untrip = false;

            // switched off mid-charge: stop unconditionally
            if !self.run.active {
                untrip = true;
            }
            if self.run.electric_mode && !electric_eligible {
                untrip = true;
            }
            if !self.run.electric_mode {
                // legionella charges ignore time-limit and priority downgrades
                if !self.run.legionella_on {
                    if let Some(limit) = params.limit_chargetime {
                        if now.since(self.run.mode_since) > limit {
                            warn!(dhwt = %self.name, "charge time limit exceeded");
                            ctx.warn(format!("dhwt {}: charge time limit exceeded", self.name));
                            self.run.charge_overtime = true;
                            untrip = true;
                        }
                    }
                    if self.set.prio > pdata.dhwt_currprio {
                        untrip = true;
                    }
                }
                if pdata.hs_allfailed {
                    untrip = true;
                }
            }

            // target reached, bottom sensor preferred
            if let Ok(t) = self.read_tank(ctx, false) {
                if t >= self.run.target {
                    untrip = true;
                }
            }

            if untrip {
                self.set_selfheater(ctx, false)?;
                self.run.charge_on = false;
                self.run.electric_mode = false;
                self.run.force_on = false;
                self.run.legionella_on = false;
                self.run.mode_since = now;
                self.run.untripped = true;
            }
        }

        // heat request: target plus the inlet offset capped at the actual
        // remaining gap, itself capped by the inlet maximum
        self.run.heat_request = if self.run.charge_on && !self.run.electric_mode {
            let gap = (self.run.target - actual).max(TempDiff::ZERO);
            let offset = params.temp_inoffset.min(gap);
            Some((self.run.target + offset).min(params.limit_wintmax))
        } else {
            None
        };

        self.actuate(ctx, pdata, acts)
    }

    /// Inlet-temperature acceptability gate with a hold-state dead zone.
    fn wintemp_acceptable(&mut self, ctx: &TickCtx) -> bool {
        let Some(tid) = self.set.tid_win else {
            return true;
        };
        let Ok(t_win) = ctx.hal.inputs.temperature(tid) else {
            return false;
        };
        let floor = self.run.actual + WINTEMP_MARGIN;
        let ceil = self.run.params.limit_wintmax;
        if t_win > floor && t_win < ceil {
            self.run.win_ok = true;
        } else if t_win < floor || t_win > ceil {
            self.run.win_ok = false;
        }
        // exactly on a boundary: hold the previous state
        self.run.win_ok
    }

    fn actuate(
        &mut self,
        ctx: &TickCtx,
        pdata: &PlantData,
        acts: &mut Actuators<'_>,
    ) -> PlantResult<()> {
        let feeding = self.run.charge_on && !self.run.electric_mode;
        let win_ok = self.wintemp_acceptable(ctx);
        let feed_on = feeding && win_ok;

        // the isolation valve takes precedence over hard-stopping the pump
        if let Some(vid) = self.set.valve_feedisol {
            let _ = acts.valve_mut(vid)?.isol_trigger(!feed_on);
        }
        if let Some(handle) = self.set.pump_feed {
            if feed_on {
                acts.pump_set_state(handle, true, false)?;
            } else if self.set.valve_feedisol.is_some() {
                acts.pump_set_state(handle, false, false)?;
            } else {
                // no valve to isolate with: hard-stop the pump
                acts.pump_set_state(handle, false, true)?;
            }
        }

        if let Some(vid) = self.set.valve_hwisol {
            let _ = acts.valve_mut(vid)?.isol_trigger(!self.run.active);
        }

        // recycle loop deliberately ignores the inlet gate; it only yields
        // to a heat-source overtemp
        if let Some(handle) = self.set.pump_recycle {
            acts.pump_set_state(handle, self.run.recycle_on && !pdata.overtemp, false)?;
        }
        Ok(())
    }

    /// Test / summer maintenance: run everything, stop at the maximum.
    fn maintenance(
        &mut self,
        ctx: &TickCtx,
        pdata: &PlantData,
        acts: &mut Actuators<'_>,
    ) -> PlantResult<()> {
        let reached_max = self
            .read_tank(ctx, true)
            .map(|t| t >= self.run.params.limit_tmax)
            .unwrap_or(true);
        let go = !reached_max;

        if let Some(handle) = self.set.pump_feed {
            acts.pump_set_state(handle, go, false)?;
        }
        if let Some(handle) = self.set.pump_recycle {
            acts.pump_set_state(handle, go, false)?;
        }
        if let Some(vid) = self.set.valve_feedisol {
            let _ = acts.valve_mut(vid)?.isol_trigger(!go);
        }
        if let Some(vid) = self.set.valve_hwisol {
            let _ = acts.valve_mut(vid)?.isol_trigger(!go);
        }
        // the self-heater only joins in test mode, never summer exercise
        let heater = go && self.run.runmode_effective == RunMode::Test && !pdata.summer_maint;
        self.set_selfheater(ctx, heater)?;
        self.run.heat_request = None;
        Ok(())
    }

    /// Tank failsafe: stop operation; a thermostatted electric heater is
    /// forced on as a degraded fallback (accepting freeze risk in exchange
    /// for guaranteed minimum service).
    fn failsafe(&mut self, ctx: &TickCtx, acts: &mut Actuators<'_>) -> PlantResult<()> {
        self.run.charge_on = false;
        self.run.electric_mode = false;
        self.run.heat_request = None;
        if let Some(handle) = self.set.pump_feed {
            let _ = acts.pump_set_state(handle, false, true);
        }
        if let Some(handle) = self.set.pump_recycle {
            let _ = acts.pump_set_state(handle, false, true);
        }
        if let Some(vid) = self.set.valve_feedisol {
            if let Ok(v) = acts.valve_mut(vid) {
                let _ = v.isol_trigger(true);
            }
        }
        let heater_on = self.set.electric_hasthermostat && self.set.rid_selfheater.is_some();
        self.set_selfheater(ctx, heater_on)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_hal::{AlarmLog, Hal, Inputs, Models, SimIo, WeeklyScheduler};
    use std::sync::Arc;

    struct Rig {
        io: Arc<SimIo>,
        hal: Hal,
        scheduler: WeeklyScheduler,
        models: Models,
        alarms: AlarmLog,
    }

    impl Rig {
        fn new() -> Self {
            let io = Arc::new(SimIo::new());
            let hal = Hal::new(io.clone(), io.clone());
            Self {
                io,
                hal,
                scheduler: WeeklyScheduler::new(),
                models: Models::new(),
                alarms: AlarmLog::new(),
            }
        }

        fn ctx(&self, now: Ticks) -> TickCtx<'_> {
            self.ctx_on_day(now, 1)
        }

        fn ctx_on_day(&self, now: Ticks, day: u32) -> TickCtx<'_> {
            TickCtx {
                now,
                day_ordinal: day,
                hal: &self.hal,
                scheduler: &self.scheduler,
                models: &self.models,
                alarms: &self.alarms,
                default_runmode: RunMode::Comfort,
                default_dhwmode: RunMode::Comfort,
            }
        }
    }

    fn tank(rig: &Rig) -> Dhwt {
        let tid_bottom = rig.io.add_sensor("tank_bottom", Temp::celsius(50.0));
        Dhwt::new(
            "dhwt",
            DhwtSet {
                runmode: RunMode::Comfort,
                schedid: None,
                prio: 0,
                charge_prio: ChargePrio::ParallelMax,
                force_mode: ForceMode::Never,
                legionella: None,
                electric_hasthermostat: false,
                params: DhwtParamsOvr {
                    hysteresis: Some(TempDiff::kelvin(5.0)),
                    ..Default::default()
                },
                tid_top: None,
                tid_bottom: Some(tid_bottom),
                tid_win: None,
                rid_selfheater: None,
                pump_feed: None,
                pump_recycle: None,
                valve_hwisol: None,
                valve_feedisol: None,
            },
        )
    }

    fn tick(rig: &Rig, t: &mut Dhwt, pdata: &PlantData, now: Ticks) -> PlantResult<()> {
        tick_on_day(rig, t, pdata, now, 1)
    }

    fn tick_on_day(
        rig: &Rig,
        t: &mut Dhwt,
        pdata: &PlantData,
        now: Ticks,
        day: u32,
    ) -> PlantResult<()> {
        let ctx = rig.ctx_on_day(now, day);
        let mut valves: Vec<crate::valve::Valve> = vec![];
        let mut pumps: Vec<crate::pump::Pump> = vec![];
        let mut acts = Actuators {
            valves: &mut valves,
            pumps: &mut pumps,
        };
        t.logic(&ctx, pdata)?;
        t.run(&ctx, pdata, &mut acts)
    }

    fn set_tank_temp(rig: &Rig, c: f64, now: Ticks) {
        let tid = Inputs::resolve(&*rig.io, "tank_bottom").unwrap();
        rig.io.set_temp(tid, Temp::celsius(c), now);
    }

    #[test]
    fn trips_below_hysteresis_and_unt_rips_at_target() {
        let rig = Rig::new();
        let mut t = tank(&rig);
        t.online(&rig.ctx(Ticks::ZERO), &DhwtParams::default()).unwrap();
        let pdata = PlantData::default();

        // comfort target 55, hysteresis 5: trip below 50
        set_tank_temp(&rig, 51.0, Ticks::from_secs(1));
        tick(&rig, &mut t, &pdata, Ticks::from_secs(1)).unwrap();
        assert!(!t.is_charging());

        set_tank_temp(&rig, 49.0, Ticks::from_secs(2));
        tick(&rig, &mut t, &pdata, Ticks::from_secs(2)).unwrap();
        assert!(t.is_charging());
        let req = t.heat_request().expect("charging requests heat");
        // offset capped by the remaining gap (6K > 10K? no: gap 6K < 10K)
        assert_eq!(req, Temp::celsius(55.0) + TempDiff::kelvin(6.0));

        set_tank_temp(&rig, 55.5, Ticks::from_secs(3));
        tick(&rig, &mut t, &pdata, Ticks::from_secs(3)).unwrap();
        assert!(!t.is_charging());
        assert_eq!(t.heat_request(), None);
    }

    #[test]
    fn heat_request_offset_caps() {
        let rig = Rig::new();
        let mut t = tank(&rig);
        t.online(&rig.ctx(Ticks::ZERO), &DhwtParams::default()).unwrap();
        let pdata = PlantData::default();

        // deep discharge: full 10K offset applies
        set_tank_temp(&rig, 20.0, Ticks::from_secs(1));
        tick(&rig, &mut t, &pdata, Ticks::from_secs(1)).unwrap();
        assert_eq!(
            t.heat_request().unwrap(),
            Temp::celsius(55.0) + TempDiff::kelvin(10.0)
        );
    }

    #[test]
    fn charge_blocked_by_priority_threshold() {
        let rig = Rig::new();
        let mut t = tank(&rig);
        t.set.prio = 2;
        t.online(&rig.ctx(Ticks::ZERO), &DhwtParams::default()).unwrap();

        // threshold at 1: this prio-2 tank must wait
        let pdata = PlantData {
            dhwt_currprio: 1,
            ..Default::default()
        };
        set_tank_temp(&rig, 30.0, Ticks::from_secs(1));
        tick(&rig, &mut t, &pdata, Ticks::from_secs(1)).unwrap();
        assert!(!t.is_charging());

        let pdata = PlantData {
            dhwt_currprio: 2,
            ..Default::default()
        };
        tick(&rig, &mut t, &pdata, Ticks::from_secs(2)).unwrap();
        assert!(t.is_charging());
    }

    #[test]
    fn priority_downgrade_interrupts_charge() {
        let rig = Rig::new();
        let mut t = tank(&rig);
        t.set.prio = 2;
        t.online(&rig.ctx(Ticks::ZERO), &DhwtParams::default()).unwrap();

        let open = PlantData {
            dhwt_currprio: 2,
            ..Default::default()
        };
        set_tank_temp(&rig, 30.0, Ticks::from_secs(1));
        tick(&rig, &mut t, &open, Ticks::from_secs(1)).unwrap();
        assert!(t.is_charging());

        let closed = PlantData {
            dhwt_currprio: 0,
            ..Default::default()
        };
        tick(&rig, &mut t, &closed, Ticks::from_secs(2)).unwrap();
        assert!(!t.is_charging(), "priority lost mid-charge");
        assert!(t.take_untrip());
    }

    #[test]
    fn electric_failover_when_plant_sleeps() {
        let rig = Rig::new();
        let rid = rig.io.add_relay("selfheater");
        let mut t = tank(&rig);
        t.set.rid_selfheater = Some(rid);
        t.online(&rig.ctx(Ticks::ZERO), &DhwtParams::default()).unwrap();

        let pdata = PlantData {
            could_sleep: true,
            ..Default::default()
        };
        set_tank_temp(&rig, 30.0, Ticks::from_secs(1));
        tick(&rig, &mut t, &pdata, Ticks::from_secs(1)).unwrap();
        assert!(t.is_charging());
        assert!(t.is_electric());
        assert_eq!(t.heat_request(), None, "electric charge needs no source");
        assert!(rig.io.relay_is_on("selfheater"));

        // eligibility lost: charge untrips, heater off
        let pdata = PlantData::default();
        tick(&rig, &mut t, &pdata, Ticks::from_secs(2)).unwrap();
        assert!(!t.is_charging());
        assert!(!rig.io.relay_is_on("selfheater"));
    }

    #[test]
    fn legionella_forces_target_and_survives_priority_loss() {
        let rig = Rig::new();
        let mut sched = WeeklyScheduler::new();
        let sid = sched.add_schedule(
            "dhw",
            vec![hearth_hal::SchedEntry {
                weekday: 0,
                minute_of_day: 0,
                params: hearth_hal::SchedParams {
                    runmode: None,
                    dhwmode: Some(RunMode::Comfort),
                    legionella: true,
                    recycle: false,
                },
            }],
        );
        sched.tick(0, 60);
        let mut rig = rig;
        rig.scheduler = sched;

        let mut t = tank(&rig);
        t.set.schedid = Some(sid);
        t.set.legionella = Some(LegionellaSet {
            tlegionella: Temp::celsius(65.0),
            recycle: false,
        });
        t.online(&rig.ctx(Ticks::ZERO), &DhwtParams::default()).unwrap();

        t.set.prio = 2;
        let open = PlantData {
            dhwt_currprio: 2,
            ..Default::default()
        };
        set_tank_temp(&rig, 55.0, Ticks::from_secs(1));
        tick(&rig, &mut t, &open, Ticks::from_secs(1)).unwrap();
        assert!(t.is_legionella());
        assert_eq!(t.target(), Temp::celsius(65.0));
        assert!(
            t.is_charging(),
            "normal hysteresis bypassed: 55°C is inside the comfort band"
        );

        // priority collapse does not interrupt a legionella charge
        let closed = PlantData {
            dhwt_currprio: 0,
            ..Default::default()
        };
        tick(&rig, &mut t, &closed, Ticks::from_secs(2)).unwrap();
        assert!(t.is_charging());

        // reaching the legionella target ends the cycle
        set_tank_temp(&rig, 65.5, Ticks::from_secs(3));
        tick(&rig, &mut t, &closed, Ticks::from_secs(3)).unwrap();
        assert!(!t.is_charging());
        assert!(!t.is_legionella());
    }

    #[test]
    fn charge_time_limit_aborts_and_cools_down() {
        let rig = Rig::new();
        let mut t = tank(&rig);
        t.set.params.limit_chargetime = Some(Ticks::from_mins(60));
        t.online(&rig.ctx(Ticks::ZERO), &DhwtParams::default()).unwrap();
        let pdata = PlantData::default();

        set_tank_temp(&rig, 30.0, Ticks::from_secs(1));
        tick(&rig, &mut t, &pdata, Ticks::from_secs(1)).unwrap();
        assert!(t.is_charging());

        // 61 minutes later the charge is aborted as overtime
        set_tank_temp(&rig, 40.0, Ticks::from_mins(61));
        tick(&rig, &mut t, &pdata, Ticks::from_mins(61)).unwrap();
        assert!(!t.is_charging());

        // still cold, but the cooldown blocks a re-trip
        tick(&rig, &mut t, &pdata, Ticks::from_mins(62)).unwrap();
        assert!(!t.is_charging());

        // after the cooldown window a new charge may start
        tick(&rig, &mut t, &pdata, Ticks::from_mins(125)).unwrap();
        assert!(t.is_charging());
    }

    #[test]
    fn first_of_day_forced_charge_only_once() {
        let rig = Rig::new();
        let mut t = tank(&rig);
        t.set.force_mode = ForceMode::FirstOfDay;
        t.set.runmode = RunMode::Auto; // resolves to comfort default
        t.online(&rig.ctx(Ticks::ZERO), &DhwtParams::default()).unwrap();
        let pdata = PlantData::default();

        // tank inside the normal hysteresis band but below the forced
        // 1K band: only the forced trip fires
        set_tank_temp(&rig, 53.5, Ticks::from_secs(1));
        tick_on_day(&rig, &mut t, &pdata, Ticks::from_secs(1), 10).unwrap();
        assert!(t.is_charging(), "first comfort period of the day forces");

        set_tank_temp(&rig, 55.5, Ticks::from_secs(2));
        tick_on_day(&rig, &mut t, &pdata, Ticks::from_secs(2), 10).unwrap();
        assert!(!t.is_charging());

        // same day: no second forced charge
        set_tank_temp(&rig, 54.5, Ticks::from_secs(3));
        tick_on_day(&rig, &mut t, &pdata, Ticks::from_secs(3), 10).unwrap();
        assert!(!t.is_charging());
    }

    #[test]
    fn feed_pump_gated_on_inlet_temperature() {
        let rig = Rig::new();
        let tid_win = rig.io.add_sensor("win", Temp::celsius(30.0));
        let rid = rig.io.add_relay("feed");
        let mut pump = crate::pump::Pump::new(
            "feed",
            crate::pump::PumpSet {
                rid_pump: rid,
                cooldown: None,
                shared: false,
            },
        );
        let handle = pump.grab(hearth_core::PumpId::from_index(0)).unwrap();
        pump.online(&rig.hal).unwrap();

        let mut t = tank(&rig);
        t.set.tid_win = Some(tid_win);
        t.set.pump_feed = Some(handle);
        t.online(&rig.ctx(Ticks::ZERO), &DhwtParams::default()).unwrap();

        let pdata = PlantData::default();
        let mut pumps = vec![pump];

        // charging, but inlet (30°C) below tank+1K (49+1): pump stays off
        set_tank_temp(&rig, 49.0, Ticks::from_secs(1));
        {
            let ctx = rig.ctx(Ticks::from_secs(1));
            let mut valves: Vec<crate::valve::Valve> = vec![];
            let mut acts = Actuators {
                valves: &mut valves,
                pumps: &mut pumps,
            };
            t.logic(&ctx, &pdata).unwrap();
            t.run(&ctx, &pdata, &mut acts).unwrap();
        }
        assert!(t.is_charging());
        pumps[0].run(&rig.hal, Ticks::from_secs(1)).unwrap();
        assert!(!rig.io.relay_is_on("feed"), "inlet too cold to feed");

        // inlet warms above the tank: feeding allowed
        rig.io
            .set_temp(tid_win, Temp::celsius(60.0), Ticks::from_secs(2));
        {
            let ctx = rig.ctx(Ticks::from_secs(2));
            let mut valves: Vec<crate::valve::Valve> = vec![];
            let mut acts = Actuators {
                valves: &mut valves,
                pumps: &mut pumps,
            };
            t.logic(&ctx, &pdata).unwrap();
            t.run(&ctx, &pdata, &mut acts).unwrap();
        }
        pumps[0].run(&rig.hal, Ticks::from_secs(2)).unwrap();
        assert!(rig.io.relay_is_on("feed"));
    }

    #[test]
    fn failsafe_forces_thermostatted_heater_on() {
        let rig = Rig::new();
        let rid = rig.io.add_relay("selfheater");
        let mut t = tank(&rig);
        t.set.rid_selfheater = Some(rid);
        t.set.electric_hasthermostat = true;
        t.online(&rig.ctx(Ticks::ZERO), &DhwtParams::default()).unwrap();
        let pdata = PlantData::default();

        let tid = Inputs::resolve(&*rig.io, "tank_bottom").unwrap();
        rig.io.set_fault(tid, hearth_hal::SensorError::Disconnected);
        assert!(tick(&rig, &mut t, &pdata, Ticks::from_secs(1)).is_err());
        assert!(
            rig.io.relay_is_on("selfheater"),
            "degraded fallback: thermostatted heater on"
        );
    }
}
