//! Heating circuit: outdoor-compensated water temperature control.
//!
//! Computes a target supply-water temperature from the bilinear outdoor
//! compensation law, manages the ambient temperature (measured or
//! modelled), transition boost/fast-cooldown, rate-of-rise limiting and
//! the plant-wide power-shift interferences, and drives an owned mixing
//! valve and feed pump.

use crate::ctx::{Actuators, TickCtx};
use crate::error::{PlantError, PlantResult};
use crate::params::{HcircuitParams, HcircuitParamsOvr};
use crate::pdata::PlantData;
use crate::pump::PumpHandle;
use hearth_core::{
    ModelId, RunMode, ScheduleId, SensorId, Temp, TempDiff, Ticks, ValveId, expw_mavg,
};
use tracing::{debug, warn};

/// Water lag above which a boost window is held open.
const BOOST_LAG: TempDiff = TempDiff::from_centikelvin(500); // 5 K
/// Indoor cutoff untrip margin below the threshold.
const INOFF_HYSTERESIS: TempDiff = TempDiff::from_centikelvin(100); // 1 K
/// Nominal ambient the temperature law is calibrated for.
const LAW_REF_AMBIENT_C: f64 = 20.0;

/// Bilinear outdoor-compensation law.
///
/// Two linear segments joined at an inflection point located 30% of the
/// way from `tout1` toward the outdoor temperature where the base line
/// would output 20°C water; the inflection water temperature is raised
/// above the line by the non-linearity coefficient `nh` (1.0 degenerates
/// to a straight line). The result is shifted by the deviation of the
/// requested ambient from the nominal 20°C reference, scaled by the
/// segment's slope complement.
#[derive(Debug, Clone, Copy)]
pub struct TempLawBilinear {
    /// Low outdoor set-point (cold day).
    pub tout1: Temp,
    pub twater1: Temp,
    /// High outdoor set-point (mild day).
    pub tout2: Temp,
    pub twater2: Temp,
    /// Non-linearity coefficient, >= 1.
    pub nh: f64,
}

impl TempLawBilinear {
    pub fn validate(&self) -> PlantResult<()> {
        if self.tout1 >= self.tout2 {
            return Err(PlantError::Misconfigured {
                what: "bilinear law: tout1 must be below tout2",
            });
        }
        if self.twater1 <= self.twater2 {
            return Err(PlantError::Misconfigured {
                what: "bilinear law: twater1 must be above twater2",
            });
        }
        if !self.nh.is_finite() || self.nh < 1.0 {
            return Err(PlantError::Misconfigured {
                what: "bilinear law: nh must be >= 1",
            });
        }
        Ok(())
    }

    /// Water target for an outdoor temperature and a requested ambient.
    pub fn compute(&self, t_out: Temp, target_ambient: Temp) -> Temp {
        let (to1, tw1) = (self.tout1.to_celsius(), self.twater1.to_celsius());
        let (to2, tw2) = (self.tout2.to_celsius(), self.twater2.to_celsius());

        let slope = (tw2 - tw1) / (to2 - to1); // negative
        // outdoor temperature where the base line crosses 20°C water
        let t20 = to1 + (LAW_REF_AMBIENT_C - tw1) / slope;
        let to_infl = to1 + 0.3 * (t20 - to1);
        let tw_line_infl = tw1 + slope * (to_infl - to1);
        let tw_infl = tw_line_infl + (self.nh - 1.0) * (tw_line_infl - tw2);

        let t = t_out.to_celsius();
        let (xa, ya, xb, yb) = if t <= to_infl {
            (to1, tw1, to_infl, tw_infl)
        } else {
            (to_infl, tw_infl, to2, tw2)
        };
        let seg_slope = (yb - ya) / (xb - xa);
        let mut water = ya + seg_slope * (t - xa);

        // ambient-deviation shift, scaled by the slope complement
        water += (target_ambient.to_celsius() - LAW_REF_AMBIENT_C) * (1.0 - seg_slope);

        Temp::celsius(water)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transition {
    #[default]
    None,
    RampUp,
    RampDown,
}

#[derive(Debug, Clone)]
pub struct HcircuitSet {
    pub runmode: RunMode,
    pub schedid: Option<ScheduleId>,
    pub params: HcircuitParamsOvr,
    pub law: TempLawBilinear,
    /// Influence of the measured ambient deviation on the water target,
    /// percent. Only applies when an ambient sensor is configured.
    pub ambient_factor: i16,
    /// Maximum water-target rise per hour (None: unlimited).
    pub wtemp_rorh: Option<TempDiff>,
    /// Ambient boost added during ramp-up (zero disables boosting).
    pub boost_delta: TempDiff,
    pub boost_maxtime: Ticks,
    pub fast_cooldown_eco: bool,
    pub fast_cooldown_frostfree: bool,
    /// Indoor cutoff threshold; needs an ambient sensor.
    pub inoff_temp: Option<Temp>,
    pub tid_outgoing: SensorId,
    pub tid_return: Option<SensorId>,
    pub tid_ambient: Option<SensorId>,
    pub bmodel: ModelId,
    pub valve_mix: Option<ValveId>,
    pub pump_feed: Option<PumpHandle>,
}

#[derive(Debug, Default)]
struct HcircuitRun {
    online: bool,
    params: HcircuitParams,
    runmode_effective: RunMode,
    /// Actively heating this tick.
    active: bool,
    outhoff: bool,
    inoff: bool,
    request_ambient: Temp,
    target_ambient: Temp,
    actual_ambient: Temp,
    target_wtemp: Temp,
    actual_wtemp: Temp,
    heat_request: Option<Temp>,
    transition: Transition,
    trans_since: Ticks,
    /// At least one logic pass happened (transition detection needs a
    /// meaningful previous request).
    has_run: bool,
    ambient_update_time: Option<Ticks>,
    /// Rate-of-rise limiter anchor.
    rorh_since: Option<Ticks>,
    rorh_last_target: Temp,
    /// Output floor: do not command below this until the deadline.
    floor_output: Option<Temp>,
    floor_until: Ticks,
}

pub struct Hcircuit {
    name: String,
    set: HcircuitSet,
    run: HcircuitRun,
}

impl Hcircuit {
    pub fn new(name: impl Into<String>, set: HcircuitSet) -> Self {
        Self {
            name: name.into(),
            set,
            run: HcircuitRun::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_online(&self) -> bool {
        self.run.online
    }

    pub fn heat_request(&self) -> Option<Temp> {
        self.run.heat_request
    }

    pub fn runmode_effective(&self) -> RunMode {
        self.run.runmode_effective
    }

    pub fn is_outdoor_cutoff(&self) -> bool {
        self.run.outhoff
    }

    pub fn request_ambient(&self) -> Temp {
        self.run.request_ambient
    }

    pub fn target_wtemp(&self) -> Temp {
        self.run.target_wtemp
    }

    pub fn transition(&self) -> Transition {
        self.run.transition
    }

    pub fn bmodel(&self) -> ModelId {
        self.set.bmodel
    }

    /// Merge parameters, validate the law and cross-field invariants.
    pub fn online(&mut self, ctx: &TickCtx, defaults: &HcircuitParams) -> PlantResult<()> {
        self.set.law.validate()?;
        let params = self.set.params.merge(defaults);
        if params.limit_wtmax <= params.limit_wtmin {
            return Err(PlantError::Misconfigured {
                what: "hcircuit limit_wtmax must exceed limit_wtmin",
            });
        }
        if !(0..=100).contains(&self.set.ambient_factor) {
            return Err(PlantError::Misconfigured {
                what: "hcircuit ambient_factor must be within 0..=100",
            });
        }
        if ctx.models.get(self.set.bmodel).is_none() {
            return Err(PlantError::Misconfigured {
                what: "hcircuit building model missing",
            });
        }
        if ctx.hal.inputs.temperature(self.set.tid_outgoing).is_err() {
            return Err(PlantError::Misconfigured {
                what: "hcircuit outgoing sensor unavailable",
            });
        }
        self.run = HcircuitRun {
            online: true,
            params,
            request_ambient: params.t_frostfree,
            target_ambient: params.t_frostfree,
            actual_ambient: params.t_frostfree,
            rorh_last_target: params.limit_wtmin,
            ..HcircuitRun::default()
        };
        Ok(())
    }

    pub fn offline(&mut self) -> PlantResult<()> {
        self.run.online = false;
        self.run.heat_request = None;
        Ok(())
    }

    /// Mode resolution, cutoffs, ambient management and transitions.
    pub fn logic(&mut self, ctx: &TickCtx, pdata: &PlantData) -> PlantResult<()> {
        if !self.run.online {
            return Err(PlantError::Offline { what: "hcircuit" });
        }
        let now = ctx.now;
        let params = self.run.params;

        let mut mode = ctx.resolve_runmode(self.set.runmode, self.set.schedid);
        if pdata.dhwc_absolute {
            // an absolute-priority DHW charge starves the circuits
            mode = RunMode::Dhwonly;
        }

        // requested ambient is always computed and stored, even when the
        // circuit ends up forced off
        let prev_request = self.run.request_ambient;
        let request = match mode {
            RunMode::Comfort => params.t_comfort,
            RunMode::Eco => params.t_eco,
            _ => params.t_frostfree,
        } + params.t_offset;
        self.run.request_ambient = request;

        // transition detection on requested-ambient changes
        if self.run.has_run && mode.heats() && request != prev_request {
            self.run.transition = if request > prev_request {
                Transition::RampUp
            } else {
                Transition::RampDown
            };
            self.run.trans_since = now;
        }

        let bmodel = ctx.models.get(self.set.bmodel).ok_or(PlantError::Invalid {
            what: "hcircuit building model vanished",
        })?;
        let t_out_mix = bmodel.outdoor_mixed();
        let frost = bmodel.frost();

        // outdoor cutoff: summer forces it; otherwise trip above the
        // mode threshold (never above the requested ambient) with
        // asymmetric untrip hysteresis
        if bmodel.summer() {
            self.run.outhoff = true;
        } else {
            let configured = match mode {
                RunMode::Comfort => params.outhoff_comfort,
                RunMode::Eco => params.outhoff_eco,
                _ => params.outhoff_frostfree,
            };
            let threshold = configured.min(request);
            if t_out_mix > threshold {
                self.run.outhoff = true;
            } else if t_out_mix < threshold - params.outhoff_hysteresis {
                self.run.outhoff = false;
            }
        }

        // indoor cutoff, only with a live ambient sensor
        if let (Some(tid), Some(limit)) = (self.set.tid_ambient, self.set.inoff_temp) {
            if let Ok(t) = ctx.hal.inputs.temperature(tid) {
                if t > limit {
                    self.run.inoff = true;
                } else if t < limit - INOFF_HYSTERESIS {
                    self.run.inoff = false;
                }
            }
        }

        if (self.run.outhoff || self.run.inoff) && !frost {
            mode = RunMode::Off;
        }

        let heating = mode.heats();

        // ambient temperature: measured when a sensor exists, else modelled
        // as an EMA converging toward the target (heating) or the mixed
        // outdoor temperature (idle) over the building time constant
        let measured = self
            .set
            .tid_ambient
            .and_then(|tid| ctx.hal.inputs.temperature(tid).ok());
        match measured {
            Some(t) => {
                self.run.actual_ambient = t;
                self.run.ambient_update_time = Some(now);
            }
            None => {
                let toward = if heating { request } else { t_out_mix };
                let dt = match self.run.ambient_update_time.replace(now) {
                    Some(last) => now.since(last),
                    None => Ticks::ZERO,
                };
                self.run.actual_ambient =
                    expw_mavg(self.run.actual_ambient, toward, bmodel.tau(), dt);
            }
        }

        // transitions: boost on ramp-up, fast cooldown on ramp-down
        let mut target = request;
        match self.run.transition {
            Transition::RampUp if heating => {
                if self.set.boost_maxtime.is_zero() || self.set.boost_delta == TempDiff::ZERO {
                    self.run.transition = Transition::None;
                } else {
                    // hold the boost window open while the water lags
                    if self.run.target_wtemp - self.run.actual_wtemp > BOOST_LAG {
                        self.run.trans_since = now;
                    }
                    if now.since(self.run.trans_since) < self.set.boost_maxtime {
                        target = request + self.set.boost_delta;
                    } else {
                        // boost over: floor the output so demand does not
                        // collapse on the dependent consumers
                        self.run.transition = Transition::None;
                        self.run.floor_output = Some(self.run.target_wtemp);
                        self.run.floor_until = now + pdata.consumer_sdelay;
                    }
                }
            }
            Transition::RampDown if heating => {
                let fast = match mode {
                    RunMode::Eco => self.set.fast_cooldown_eco,
                    RunMode::Frostfree => self.set.fast_cooldown_frostfree,
                    _ => false,
                };
                if !fast || self.run.actual_ambient <= target {
                    self.run.transition = Transition::None;
                } else {
                    // drift down with no heat input
                    mode = RunMode::Off;
                }
            }
            _ => {}
        }

        self.run.target_ambient = target;
        self.run.runmode_effective = mode;
        self.run.active = mode.heats();
        self.run.has_run = true;
        Ok(())
    }

    /// Water-temperature computation and actuation.
    pub fn run(
        &mut self,
        ctx: &TickCtx,
        pdata: &PlantData,
        acts: &mut Actuators<'_>,
    ) -> PlantResult<()> {
        if !self.run.online {
            return Err(PlantError::Offline { what: "hcircuit" });
        }
        let now = ctx.now;
        let params = self.run.params;

        // actuator exercise bypasses normal control entirely
        if pdata.summer_maint || self.run.runmode_effective == RunMode::Test {
            self.run.heat_request = None;
            if let Some(vid) = self.set.valve_mix {
                let _ = acts.valve_mut(vid)?.request_open_full();
            }
            if let Some(handle) = self.set.pump_feed {
                acts.pump_set_state(handle, true, false)?;
            }
            return Ok(());
        }

        if !self.run.active {
            self.run.heat_request = None;
            self.run.rorh_since = None;
            if let Some(vid) = self.set.valve_mix {
                let _ = acts.valve_mut(vid)?.request_close_full();
            }
            if let Some(handle) = self.set.pump_feed {
                acts.pump_set_state(handle, false, false)?;
            }
            return Ok(());
        }

        let actual_wtemp = match ctx.hal.inputs.temperature(self.set.tid_outgoing) {
            Ok(t) => t,
            Err(err) => {
                warn!(circuit = %self.name, %err, "outgoing sensor failure, failsafe");
                self.failsafe(acts);
                return Err(err.into());
            }
        };
        self.run.actual_wtemp = actual_wtemp;

        let bmodel = ctx.models.get(self.set.bmodel).ok_or(PlantError::Invalid {
            what: "hcircuit building model vanished",
        })?;

        let mut target = self
            .set
            .law
            .compute(bmodel.outdoor_mixed(), self.run.target_ambient);

        // measured-ambient influence folded into the target
        if self.set.tid_ambient.is_some() && self.set.ambient_factor > 0 {
            let dev = self.run.target_ambient - self.run.actual_ambient;
            target += TempDiff::from_centikelvin(
                dev.centikelvin() * i32::from(self.set.ambient_factor) / 100,
            );
        }
        target = target.clamp(params.limit_wtmin, params.limit_wtmax);

        // interference 1: rate-of-rise limit, increases only, paused
        // during a negative plant-wide shift
        let shift = pdata.shift_crit.saturating_add(pdata.shift_noncrit);
        if let Some(rorh) = self.set.wtemp_rorh {
            if shift >= 0 {
                match self.run.rorh_since {
                    None => {
                        // settling: anchor at the true low point before
                        // limiting kicks in
                        self.run.rorh_since = Some(now);
                        self.run.rorh_last_target = target.min(actual_wtemp);
                    }
                    Some(since) => {
                        if target <= self.run.rorh_last_target {
                            self.run.rorh_last_target = target;
                            self.run.rorh_since = Some(now);
                        } else {
                            let dt_h = now.since(since).as_secs_f64() / 3600.0;
                            let allowed = self.run.rorh_last_target
                                + TempDiff::from_centikelvin(
                                    (f64::from(rorh.centikelvin()) * dt_h) as i32,
                                );
                            if target > allowed {
                                target = allowed;
                            } else {
                                self.run.rorh_last_target = target;
                                self.run.rorh_since = Some(now);
                            }
                        }
                    }
                }
            }
        }

        // interference 2: output floor (never command below the floored
        // value until the deadline)
        if let Some(floor) = self.run.floor_output {
            if now < self.run.floor_until {
                target = target.max(floor);
            } else {
                self.run.floor_output = None;
            }
        }
        // a running plant-wide consumer stop-delay (a DHWT just untripped)
        // also suppresses any reduction below the previous target
        if !pdata.consumer_sdelay.is_zero() {
            target = target.max(self.run.target_wtemp);
        }

        // interference 3: plant-wide power shift, toward/away from the
        // return temperature (0°C when unavailable or above target)
        if shift != 0 {
            let t_ret = self
                .set
                .tid_return
                .and_then(|tid| ctx.hal.inputs.temperature(tid).ok())
                .filter(|t| *t < target)
                .unwrap_or(Temp::ZERO_C);
            let span = target - t_ret;
            target += TempDiff::from_centikelvin(
                span.centikelvin() * i32::from(shift) / 100,
            );
            target = target.min(params.limit_wtmax);
        }

        // overtemp overrides everything: dump heat
        if pdata.overtemp {
            target = params.limit_wtmax;
        }

        self.run.target_wtemp = target;
        self.run.heat_request = Some((target + params.temp_inoffset).min(params.limit_wtmax));

        if let Some(vid) = self.set.valve_mix {
            match acts.valve_mut(vid)?.mix_tcontrol(ctx.hal, target, now) {
                Ok(()) => {}
                Err(err) if err.is_benign() => {
                    debug!(circuit = %self.name, %err, "mixing valve holding")
                }
                Err(err) => {
                    warn!(circuit = %self.name, %err, "mixing valve control failed");
                    ctx.warn(format!("circuit {}: mixing valve fault: {err}", self.name));
                }
            }
        }
        if let Some(handle) = self.set.pump_feed {
            acts.pump_set_state(handle, true, false)?;
        }
        Ok(())
    }

    /// Sensor-failure failsafe: no demand, valve fully closed, feed pump
    /// forced on (frost mitigation through flow, never an open valve under
    /// uncertainty).
    fn failsafe(&mut self, acts: &mut Actuators<'_>) {
        self.run.heat_request = None;
        if let Some(vid) = self.set.valve_mix {
            if let Ok(valve) = acts.valve_mut(vid) {
                let _ = valve.request_close_full();
            }
        }
        if let Some(handle) = self.set.pump_feed {
            let _ = acts.pump_set_state(handle, true, true);
        }
    }
}
