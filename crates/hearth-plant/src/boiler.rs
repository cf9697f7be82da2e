//! Boiler: single-stage burner heat source.
//!
//! Hysteresis burner control around a demand-derived target, with:
//! - antifreeze trip/untrip (asymmetric on purpose: untrips only at
//!   `limit_tmin + hysteresis/2` to avoid chattering at the low end)
//! - hard-maximum safety cutout that flips the plant into overtemp
//! - two jacketed anti-windup integrals penalizing operation below the
//!   boiler minimum and below the minimum return temperature
//! - learned turn-on anticipation: each cycle spent with a falling
//!   temperature while firing records `duration / |derivative|`, applied to
//!   the next cycle's trip point to compensate thermal lag

use crate::ctx::{Actuators, TickCtx};
use crate::error::{PlantError, PlantResult};
use crate::heatsource::{HeatSourceBackend, HeatSourceRun};
use crate::pdata::PlantData;
use crate::pump::PumpHandle;
use hearth_core::{Derivative, Integral, RelayId, RunMode, SensorId, Temp, TempDiff, Ticks, ValveId};
use hearth_hal::Hal;
use tracing::{debug, warn};

/// Derivative estimator window.
const DERIV_WINDOW: Ticks = Ticks::from_secs(120);
/// Boiler-minimum integral jacket, K·s; maps 1:1 to percent shift.
const BOIL_ITG_JACKET: f64 = -100.0;
/// Return-minimum integral jacket, K·s; maps 10:1 to percent shift.
const RET_ITG_JACKET: f64 = -1000.0;

/// What the boiler does when no consumer requests heat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleMode {
    /// Keep the boiler at `limit_tmin` at all times.
    Never,
    /// Allowed to go cold only in frost-free mode.
    FrostOnly,
    /// Allowed to go cold whenever the plant could sleep.
    Always,
}

#[derive(Debug, Clone)]
pub struct BoilerSet {
    pub idle_mode: IdleMode,
    pub hysteresis: TempDiff,
    /// Absolute never-exceed limit; crossing it is a safety fault.
    pub limit_thardmax: Temp,
    pub limit_tmax: Temp,
    pub limit_tmin: Temp,
    /// Minimum acceptable return temperature (condensation protection).
    pub limit_treturnmin: Option<Temp>,
    pub t_freeze: Temp,
    /// Minimum dwell between burner state changes, both directions.
    pub burner_min_time: Ticks,
    pub tid_boiler: SensorId,
    pub tid_boiler_return: Option<SensorId>,
    pub rid_burner: RelayId,
    pub pump_load: Option<PumpHandle>,
    /// Return mixing valve; when present, return-temperature control is
    /// delegated to it instead of the integral shift.
    pub valve_ret: Option<ValveId>,
}

#[derive(Debug)]
struct BoilerRun {
    antifreeze: bool,
    target: Option<Temp>,
    actual: Temp,
    boil_itg: Integral,
    ret_itg: Integral,
    deriv: Derivative,
    burner_on: bool,
    burner_since: Option<Ticks>,
    /// Falling-temperature stretch while firing: start + derivative then.
    negderiv_start: Option<(Ticks, f64)>,
    /// Anticipation constant applied this cycle, s²/K.
    turnon_curr_adj: f64,
    /// Anticipation constant learned for the next cycle, s²/K.
    turnon_next_adj: f64,
}

impl BoilerRun {
    fn new() -> Self {
        Self {
            antifreeze: false,
            target: None,
            actual: Temp::ZERO_C,
            boil_itg: Integral::new(BOIL_ITG_JACKET),
            ret_itg: Integral::new(RET_ITG_JACKET),
            deriv: Derivative::new(DERIV_WINDOW),
            burner_on: false,
            burner_since: None,
            negderiv_start: None,
            turnon_curr_adj: 0.0,
            turnon_next_adj: 0.0,
        }
    }
}

pub struct Boiler {
    name: String,
    set: BoilerSet,
    run: BoilerRun,
}

impl Boiler {
    pub fn new(name: impl Into<String>, set: BoilerSet) -> Self {
        Self {
            name: name.into(),
            set,
            run: BoilerRun::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn burner_on(&self) -> bool {
        self.run.burner_on
    }

    pub fn target(&self) -> Option<Temp> {
        self.run.target
    }

    pub fn is_antifreeze(&self) -> bool {
        self.run.antifreeze
    }

    /// Trip/untrip points around the target, with limit clamping and the
    /// anticipation shift.
    ///
    /// Both points clamp into `[limit_tmin, limit_tmax]`; after clamping,
    /// the untrip point is re-raised to at least `trip + hysteresis/2` so
    /// the band never inverts. A falling boiler temperature raises the trip
    /// point toward the untrip point proportionally to the squared
    /// derivative scaled by the learned anticipation constant.
    fn trip_points(&self, target: Temp) -> (Temp, Temp) {
        let half = self.set.hysteresis / 2;
        let mut trip = target - half;
        let mut untrip = target + half;

        if untrip > self.set.limit_tmax {
            untrip = self.set.limit_tmax;
        }
        if trip < self.set.limit_tmin {
            trip = self.set.limit_tmin;
        }
        untrip = untrip.max(trip + half);

        let deriv = self.run.deriv.value();
        if deriv < 0.0 && self.run.turnon_curr_adj > 0.0 {
            let shift_k = deriv * deriv * self.run.turnon_curr_adj;
            if let Ok(shift) = TempDiff::try_from_kelvin(shift_k) {
                trip = (trip + shift).min(untrip);
            }
        }
        (trip, untrip)
    }

    fn set_burner(
        &mut self,
        hal: &Hal,
        on: bool,
        now: Ticks,
        bypass_dwell: bool,
    ) -> PlantResult<()> {
        if on == self.run.burner_on {
            return Ok(());
        }
        if !bypass_dwell {
            if let Some(since) = self.run.burner_since {
                if now.since(since) < self.set.burner_min_time {
                    return Ok(()); // dwell holds the current state
                }
            }
        }
        hal.outputs.set(self.set.rid_burner, on)?;
        if on {
            // apply the anticipation learned over the previous cycle
            self.run.turnon_curr_adj = self.run.turnon_next_adj;
            self.run.negderiv_start = None;
        }
        debug!(boiler = %self.name, on, "burner state change");
        self.run.burner_on = on;
        self.run.burner_since = Some(now);
        Ok(())
    }

    /// Burner off, integrals reset, return valve forced open.
    fn failsafe(&mut self, ctx: &TickCtx, acts: &mut Actuators<'_>) {
        let _ = ctx.hal.outputs.set(self.set.rid_burner, false);
        self.run.burner_on = false;
        self.run.burner_since = Some(ctx.now);
        self.run.boil_itg.reset();
        self.run.ret_itg.reset();
        if let Some(vid) = self.set.valve_ret {
            if let Ok(valve) = acts.valve_mut(vid) {
                let _ = valve.request_open_full();
            }
        }
    }

    /// Track falling-temperature stretches while firing and learn the
    /// anticipation constant for the next cycle.
    fn learn_anticipation(&mut self, now: Ticks) {
        if !self.run.burner_on {
            return;
        }
        let deriv = self.run.deriv.value();
        if deriv < 0.0 {
            if self.run.negderiv_start.is_none() {
                self.run.negderiv_start = Some((now, deriv));
            }
        } else if let Some((start, d0)) = self.run.negderiv_start.take() {
            if d0 < 0.0 {
                let adj = now.since(start).as_secs_f64() / (-d0);
                debug!(boiler = %self.name, adj, "learned turn-on anticipation");
                self.run.turnon_next_adj = adj;
            }
        }
    }
}

impl HeatSourceBackend for Boiler {
    fn online(&mut self, ctx: &TickCtx, _hs: &mut HeatSourceRun) -> PlantResult<()> {
        if self.set.limit_tmax <= self.set.limit_tmin {
            return Err(PlantError::Misconfigured {
                what: "boiler limit_tmax must exceed limit_tmin",
            });
        }
        if self.set.limit_thardmax <= self.set.limit_tmax {
            return Err(PlantError::Misconfigured {
                what: "boiler limit_thardmax must exceed limit_tmax",
            });
        }
        if self.set.hysteresis <= TempDiff::ZERO {
            return Err(PlantError::Misconfigured {
                what: "boiler hysteresis must be positive",
            });
        }
        if ctx.hal.inputs.temperature(self.set.tid_boiler).is_err() {
            return Err(PlantError::Misconfigured {
                what: "boiler sensor unavailable",
            });
        }
        ctx.hal.outputs.grab(self.set.rid_burner)?;
        // integral accumulators deliberately reset across restarts
        self.run = BoilerRun::new();
        Ok(())
    }

    fn offline(&mut self, ctx: &TickCtx) -> PlantResult<()> {
        let _ = ctx.hal.outputs.set(self.set.rid_burner, false);
        ctx.hal.outputs.thaw(self.set.rid_burner);
        self.run.burner_on = false;
        Ok(())
    }

    fn logic(
        &mut self,
        ctx: &TickCtx,
        pdata: &PlantData,
        hs: &mut HeatSourceRun,
        acts: &mut Actuators<'_>,
    ) -> PlantResult<()> {
        let now = ctx.now;

        let actual = match ctx.hal.inputs.temperature(self.set.tid_boiler) {
            Ok(t) => t,
            Err(err) => {
                warn!(boiler = %self.name, %err, "boiler sensor failure, failsafe");
                self.failsafe(ctx, acts);
                return Err(PlantError::Safety {
                    what: "boiler sensor failure",
                });
            }
        };
        self.run.actual = actual;
        self.run.deriv.update(now, actual);
        self.learn_anticipation(now);

        // antifreeze, asymmetric band
        if actual <= self.set.t_freeze {
            if !self.run.antifreeze {
                warn!(boiler = %self.name, "antifreeze tripped");
                ctx.warn(format!("boiler {}: antifreeze tripped", self.name));
            }
            self.run.antifreeze = true;
        } else if self.run.antifreeze
            && actual >= self.set.limit_tmin + self.set.hysteresis / 2
        {
            self.run.antifreeze = false;
        }

        // hard safety limit
        if actual > self.set.limit_thardmax {
            hs.overtemp = true;
            hs.cshift_crit = 100; // consumers open up and dump heat
            let _ = ctx.hal.outputs.set(self.set.rid_burner, false);
            self.run.burner_on = false;
            self.run.burner_since = Some(now);
            return Err(PlantError::Safety {
                what: "boiler over hard maximum",
            });
        }
        if hs.overtemp && actual < self.set.limit_tmax {
            hs.overtemp = false;
        }

        // target from demand, else the idle policy
        let mode = hs.runmode_effective;
        let demand = match mode {
            RunMode::Off | RunMode::Test => None,
            _ => hs.temp_request,
        };
        let mut target = match demand {
            Some(req) => Some(req.clamp(self.set.limit_tmin, self.set.limit_tmax)),
            None => {
                let idle_off = match self.set.idle_mode {
                    IdleMode::Never => false,
                    IdleMode::FrostOnly => mode == RunMode::Frostfree,
                    IdleMode::Always => pdata.could_sleep,
                };
                if idle_off || mode == RunMode::Off || mode == RunMode::Test {
                    None
                } else {
                    Some(self.set.limit_tmin)
                }
            }
        };
        if self.run.antifreeze {
            target = Some(target.map_or(self.set.limit_tmin, |t| t.max(self.set.limit_tmin)));
        }
        self.run.target = target;

        // anti-windup jacketed integrals, each mapping to a negative
        // percent shift; the more negative one wins
        let shift_boil = self.run.boil_itg.update(now, actual - self.set.limit_tmin);

        let shift_ret = match (self.set.limit_treturnmin, self.set.valve_ret) {
            (Some(tret_min), Some(vid)) => {
                // a return mixing valve handles it instead
                match acts.valve_mut(vid)?.mix_tcontrol(ctx.hal, tret_min, now) {
                    Ok(()) => {}
                    Err(err) if err.is_benign() => {}
                    Err(err) => {
                        debug!(boiler = %self.name, %err, "return valve control failed")
                    }
                }
                0.0
            }
            (Some(tret_min), None) => match self.set.tid_boiler_return {
                Some(tid) => match ctx.hal.inputs.temperature(tid) {
                    Ok(t_ret) => self.run.ret_itg.update(now, t_ret - tret_min) / 10.0,
                    Err(err) => {
                        debug!(boiler = %self.name, %err, "return sensor read failed");
                        0.0
                    }
                },
                None => 0.0,
            },
            (None, _) => 0.0,
        };

        if !hs.overtemp {
            hs.cshift_crit = shift_boil.min(shift_ret).round() as i16;
        }
        Ok(())
    }

    fn run(
        &mut self,
        ctx: &TickCtx,
        _pdata: &PlantData,
        hs: &mut HeatSourceRun,
        acts: &mut Actuators<'_>,
    ) -> PlantResult<()> {
        let now = ctx.now;
        let mode = hs.runmode_effective;

        let burner_wanted = match (mode, self.run.target) {
            // test mode exercises the burner directly
            (RunMode::Test, _) => true,
            (_, None) => false,
            (_, Some(target)) => {
                let (trip, untrip) = self.trip_points(target);
                if self.run.actual < trip {
                    true
                } else if self.run.actual > untrip {
                    false
                } else {
                    self.run.burner_on
                }
            }
        };
        // going dark (no target) bypasses the dwell; normal cycling honors it
        let bypass = self.run.target.is_none() && mode != RunMode::Test;
        self.set_burner(ctx.hal, burner_wanted, now, bypass)?;

        if let Some(handle) = self.set.pump_load {
            // evacuate heat while firing or while the boiler holds usable heat
            let on = self.run.burner_on
                || self.run.antifreeze
                || self
                    .run
                    .target
                    .is_some_and(|t| self.run.actual > t - self.set.hysteresis / 2);
            acts.pump_set_state(handle, on, false)?;
        }
        Ok(())
    }

    fn temp(&self, hal: &Hal) -> PlantResult<Temp> {
        Ok(hal.inputs.temperature(self.set.tid_boiler)?)
    }

    fn time(&self, hal: &Hal) -> Ticks {
        hal.inputs.temperature_time(self.set.tid_boiler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::PumpId;
    use hearth_hal::{AlarmLog, Hal, Models, SimIo, WeeklyScheduler};
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
            TickCtx {
                now,
                day_ordinal: 1,
                hal: &self.hal,
                scheduler: &self.scheduler,
                models: &self.models,
                alarms: &self.alarms,
                default_runmode: RunMode::Comfort,
                default_dhwmode: RunMode::Comfort,
            }
        }
    }

    fn boiler_set(io: &SimIo) -> BoilerSet {
        let tid_boiler = io.add_sensor("boiler", Temp::celsius(50.0));
        let rid_burner = io.add_relay("burner");
        BoilerSet {
            idle_mode: IdleMode::Never,
            hysteresis: TempDiff::kelvin(6.0),
            limit_thardmax: Temp::celsius(100.0),
            limit_tmax: Temp::celsius(90.0),
            limit_tmin: Temp::celsius(10.0),
            limit_treturnmin: None,
            t_freeze: Temp::celsius(5.0),
            burner_min_time: Ticks::from_mins(2),
            tid_boiler,
            tid_boiler_return: None,
            rid_burner,
            pump_load: None,
            valve_ret: None,
        }
    }

    fn tick(
        rig: &Rig,
        boiler: &mut Boiler,
        hs: &mut HeatSourceRun,
        now: Ticks,
    ) -> PlantResult<()> {
        let ctx = rig.ctx(now);
        let pdata = PlantData::default();
        let mut valves: Vec<crate::valve::Valve> = vec![];
        let mut pumps: Vec<crate::pump::Pump> = vec![];
        let mut acts = Actuators {
            valves: &mut valves,
            pumps: &mut pumps,
        };
        boiler.logic(&ctx, &pdata, hs, &mut acts)?;
        boiler.run(&ctx, &pdata, hs, &mut acts)
    }

    fn online(rig: &Rig, boiler: &mut Boiler, hs: &mut HeatSourceRun) {
        let ctx = rig.ctx(Ticks::ZERO);
        boiler.online(&ctx, hs).unwrap();
        hs.online = true;
        hs.runmode_effective = RunMode::Comfort;
    }

    fn set_boiler_temp(rig: &Rig, c: f64, now: Ticks) {
        let tid = hearth_hal::Inputs::resolve(&*rig.io, "boiler").unwrap();
        rig.io.set_temp(tid, Temp::celsius(c), now);
    }

    #[test]
    fn online_validates_limits() {
        let rig = Rig::new();
        let mut set = boiler_set(&rig.io);
        set.limit_tmax = Temp::celsius(5.0); // below tmin
        let mut boiler = Boiler::new("boiler", set);
        let ctx = rig.ctx(Ticks::ZERO);
        let mut hs = HeatSourceRun::default();
        assert!(matches!(
            boiler.online(&ctx, &mut hs),
            Err(PlantError::Misconfigured { .. })
        ));
    }

    #[test]
    fn hysteresis_band_scenario() {
        // limit_tmin=10, limit_tmax=90, hyst=6, request 60 =>
        // target 60, trip 57, untrip 63
        let rig = Rig::new();
        let mut boiler = Boiler::new("boiler", boiler_set(&rig.io));
        let mut hs = HeatSourceRun::default();
        online(&rig, &mut boiler, &mut hs);
        hs.temp_request = Some(Temp::celsius(60.0));

        // below trip: burner fires
        set_boiler_temp(&rig, 56.0, Ticks::from_secs(1));
        tick(&rig, &mut boiler, &mut hs, Ticks::from_secs(1)).unwrap();
        assert_eq!(boiler.target(), Some(Temp::celsius(60.0)));
        assert!(boiler.burner_on());

        // inside the band: holds
        set_boiler_temp(&rig, 60.0, Ticks::from_mins(5));
        tick(&rig, &mut boiler, &mut hs, Ticks::from_mins(5)).unwrap();
        assert!(boiler.burner_on());

        // above untrip: stops
        set_boiler_temp(&rig, 63.5, Ticks::from_mins(10));
        tick(&rig, &mut boiler, &mut hs, Ticks::from_mins(10)).unwrap();
        assert!(!boiler.burner_on());
        assert!(!rig.io.relay_is_on("burner"));
    }

    #[test]
    fn burner_dwell_time_blocks_cycling() {
        let rig = Rig::new();
        let mut boiler = Boiler::new("boiler", boiler_set(&rig.io));
        let mut hs = HeatSourceRun::default();
        online(&rig, &mut boiler, &mut hs);
        hs.temp_request = Some(Temp::celsius(60.0));

        set_boiler_temp(&rig, 50.0, Ticks::from_secs(1));
        tick(&rig, &mut boiler, &mut hs, Ticks::from_secs(1)).unwrap();
        assert!(boiler.burner_on());

        // untrip reached 30s later: dwell (2 min) holds the burner on
        set_boiler_temp(&rig, 70.0, Ticks::from_secs(31));
        tick(&rig, &mut boiler, &mut hs, Ticks::from_secs(31)).unwrap();
        assert!(boiler.burner_on(), "dwell holds");

        set_boiler_temp(&rig, 70.0, Ticks::from_secs(150));
        tick(&rig, &mut boiler, &mut hs, Ticks::from_secs(150)).unwrap();
        assert!(!boiler.burner_on(), "dwell elapsed");
    }

    #[test]
    fn band_never_inverts_at_tmin() {
        let rig = Rig::new();
        let mut boiler = Boiler::new("boiler", boiler_set(&rig.io));
        let mut hs = HeatSourceRun::default();
        online(&rig, &mut boiler, &mut hs);
        // no demand, idle Never: target = limit_tmin
        hs.temp_request = None;

        set_boiler_temp(&rig, 20.0, Ticks::from_secs(1));
        tick(&rig, &mut boiler, &mut hs, Ticks::from_secs(1)).unwrap();
        assert_eq!(boiler.target(), Some(Temp::celsius(10.0)));

        let (trip, untrip) = boiler.trip_points(Temp::celsius(10.0));
        assert_eq!(trip, Temp::celsius(10.0), "trip clamped up to limit_tmin");
        assert!(untrip >= trip + TempDiff::kelvin(3.0));
    }

    #[test]
    fn sensor_failure_is_safety_failsafe() {
        let rig = Rig::new();
        let mut boiler = Boiler::new("boiler", boiler_set(&rig.io));
        let mut hs = HeatSourceRun::default();
        online(&rig, &mut boiler, &mut hs);
        hs.temp_request = Some(Temp::celsius(60.0));

        set_boiler_temp(&rig, 50.0, Ticks::from_secs(1));
        tick(&rig, &mut boiler, &mut hs, Ticks::from_secs(1)).unwrap();
        assert!(boiler.burner_on());

        let tid = hearth_hal::Inputs::resolve(&*rig.io, "boiler").unwrap();
        rig.io.set_fault(tid, hearth_hal::SensorError::Disconnected);
        let err = tick(&rig, &mut boiler, &mut hs, Ticks::from_secs(2)).unwrap_err();
        assert!(matches!(err, PlantError::Safety { .. }));
        assert!(!boiler.burner_on());
        assert!(!rig.io.relay_is_on("burner"));
    }

    #[test]
    fn hard_max_trips_overtemp_and_full_shift() {
        let rig = Rig::new();
        let mut boiler = Boiler::new("boiler", boiler_set(&rig.io));
        let mut hs = HeatSourceRun::default();
        online(&rig, &mut boiler, &mut hs);
        hs.temp_request = Some(Temp::celsius(60.0));

        set_boiler_temp(&rig, 101.0, Ticks::from_secs(1));
        let err = tick(&rig, &mut boiler, &mut hs, Ticks::from_secs(1)).unwrap_err();
        assert!(matches!(err, PlantError::Safety { .. }));
        assert!(hs.overtemp);
        assert_eq!(hs.cshift_crit, 100);
        assert!(!boiler.burner_on());

        // back under limit_tmax: overtemp clears
        set_boiler_temp(&rig, 85.0, Ticks::from_mins(10));
        tick(&rig, &mut boiler, &mut hs, Ticks::from_mins(10)).unwrap();
        assert!(!hs.overtemp);
    }

    #[test]
    fn cold_boiler_integral_shift_bounded_and_recovers() {
        let rig = Rig::new();
        let mut boiler = Boiler::new("boiler", boiler_set(&rig.io));
        let mut hs = HeatSourceRun::default();
        online(&rig, &mut boiler, &mut hs);
        hs.temp_request = Some(Temp::celsius(60.0));

        // 5K below limit_tmin for a long time: shift bounded at -100%
        let mut now = Ticks::ZERO;
        for _ in 0..120 {
            now += Ticks::from_secs(10);
            set_boiler_temp(&rig, 5.0, now);
            let _ = tick(&rig, &mut boiler, &mut hs, now);
        }
        assert_eq!(hs.cshift_crit, -100);

        // above limit_tmin the integral drains back to zero
        for _ in 0..120 {
            now += Ticks::from_secs(10);
            set_boiler_temp(&rig, 30.0, now);
            tick(&rig, &mut boiler, &mut hs, now).unwrap();
        }
        assert_eq!(hs.cshift_crit, 0);
    }

    #[test]
    fn antifreeze_trips_and_untrips_asymmetrically() {
        let rig = Rig::new();
        let mut set = boiler_set(&rig.io);
        set.idle_mode = IdleMode::Always;
        let mut boiler = Boiler::new("boiler", set);
        let mut hs = HeatSourceRun::default();
        online(&rig, &mut boiler, &mut hs);
        hs.temp_request = None;

        // could_sleep would normally let the boiler go cold
        let pdata = PlantData {
            could_sleep: true,
            ..Default::default()
        };
        let ctx = rig.ctx(Ticks::from_secs(1));
        let mut valves: Vec<crate::valve::Valve> = vec![];
        let mut pumps: Vec<crate::pump::Pump> = vec![];
        let mut acts = Actuators {
            valves: &mut valves,
            pumps: &mut pumps,
        };

        set_boiler_temp(&rig, 4.0, Ticks::from_secs(1));
        boiler.logic(&ctx, &pdata, &mut hs, &mut acts).unwrap();
        assert!(boiler.is_antifreeze());
        assert_eq!(boiler.target(), Some(Temp::celsius(10.0)));

        // 11°C: above t_freeze but below tmin + hyst/2 = 13°C, still tripped
        set_boiler_temp(&rig, 11.0, Ticks::from_secs(2));
        let ctx = rig.ctx(Ticks::from_secs(2));
        boiler.logic(&ctx, &pdata, &mut hs, &mut acts).unwrap();
        assert!(boiler.is_antifreeze());

        set_boiler_temp(&rig, 13.5, Ticks::from_secs(3));
        let ctx = rig.ctx(Ticks::from_secs(3));
        boiler.logic(&ctx, &pdata, &mut hs, &mut acts).unwrap();
        assert!(!boiler.is_antifreeze());
    }

    #[test]
    fn anticipation_learns_from_negative_derivative() {
        let rig = Rig::new();
        let mut boiler = Boiler::new("boiler", boiler_set(&rig.io));
        let mut hs = HeatSourceRun::default();
        online(&rig, &mut boiler, &mut hs);
        hs.temp_request = Some(Temp::celsius(60.0));

        // fire the burner, then feed a falling ramp (thermal lag after
        // ignition), then a rise: the next cycle's adjustment is learned
        let mut now = Ticks::ZERO;
        set_boiler_temp(&rig, 50.0, now);
        now += Ticks::from_secs(1);
        tick(&rig, &mut boiler, &mut hs, now).unwrap();
        assert!(boiler.burner_on());

        for c in [49.0, 48.0, 47.0, 46.5, 46.0] {
            now += Ticks::from_secs(130);
            set_boiler_temp(&rig, c, now);
            tick(&rig, &mut boiler, &mut hs, now).unwrap();
        }
        for c in [47.0, 49.0, 52.0] {
            now += Ticks::from_secs(130);
            set_boiler_temp(&rig, c, now);
            tick(&rig, &mut boiler, &mut hs, now).unwrap();
        }
        assert!(
            boiler.run.turnon_next_adj > 0.0,
            "anticipation constant learned"
        );
        // only applied on the next ignition
        assert_eq!(boiler.run.turnon_curr_adj, 0.0);
    }

    #[test]
    fn load_pump_follows_burner() {
        let rig = Rig::new();
        let mut set = boiler_set(&rig.io);
        let rid = rig.io.add_relay("load_pump");
        let mut pump = crate::pump::Pump::new(
            "load",
            crate::pump::PumpSet {
                rid_pump: rid,
                cooldown: None,
                shared: false,
            },
        );
        let handle = pump.grab(PumpId::from_index(0)).unwrap();
        pump.online(&rig.hal).unwrap();
        set.pump_load = Some(handle);

        let mut boiler = Boiler::new("boiler", set);
        let mut hs = HeatSourceRun::default();
        online(&rig, &mut boiler, &mut hs);
        hs.temp_request = Some(Temp::celsius(60.0));

        let ctx = rig.ctx(Ticks::from_secs(1));
        let pdata = PlantData::default();
        let mut valves: Vec<crate::valve::Valve> = vec![];
        let mut pumps = vec![pump];
        let mut acts = Actuators {
            valves: &mut valves,
            pumps: &mut pumps,
        };
        set_boiler_temp(&rig, 40.0, Ticks::from_secs(1));
        boiler.logic(&ctx, &pdata, &mut hs, &mut acts).unwrap();
        boiler.run(&ctx, &pdata, &mut hs, &mut acts).unwrap();
        assert!(boiler.burner_on());

        pumps[0].run(&rig.hal, Ticks::from_secs(1)).unwrap();
        assert!(rig.io.relay_is_on("load_pump"));
    }
}
