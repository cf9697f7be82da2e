//! Valve: positional actuator with relay-timed positioning.
//!
//! A valve converts temperature or open/close requests into timed relay
//! pulses. Position is tracked internally as milliseconds of travel along
//! the end-to-end time (exact integration, no per-tick rounding residue)
//! and exposed in per-mille (‰, 0 = closed, 1000 = fully open).
//!
//! Mixing valves carry one of three interchangeable control algorithms
//! (bang-bang, successive approximation, PI in velocity form); isolation
//! valves only ever travel full course.

use crate::error::{PlantError, PlantResult};
use hearth_core::{RelayId, SensorId, Temp, TempDiff, Ticks};
use hearth_hal::Hal;
use tracing::debug;

/// Full-course request magnitude, ‰.
pub const COURSE_FULL: i16 = 1000;

/// Continuous one-direction run time cap, multiple of end-to-end time.
const RUNAWAY_ETE_MULT: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValveAction {
    #[default]
    Stop,
    Open,
    Close,
}

#[derive(Debug, Clone, Copy)]
pub enum ValveMotor {
    /// Dedicated opening and closing relays.
    ThreeWay { rid_open: RelayId, rid_close: RelayId },
    /// Single relay, spring return: on = opening, off = closing.
    TwoWay { rid_trigger: RelayId },
}

#[derive(Debug, Clone)]
pub enum ValveKind {
    Mix(MixSet),
    Isol {
        /// Swap the meaning of "isolate": true opens on isolation.
        reverse: bool,
    },
}

#[derive(Debug, Clone)]
pub struct MixSet {
    /// Mixed-output sensor (process variable). Mandatory.
    pub tid_out: SensorId,
    /// Hot-inlet sensor, mandatory for the PI algorithm.
    pub tid_hot: Option<SensorId>,
    /// Cold-inlet sensor; estimated from the hot inlet when absent.
    pub tid_cold: Option<SensorId>,
    /// Symmetric no-action zone around the target.
    pub tdeadzone: TempDiff,
    pub algo: MixAlgo,
}

#[derive(Debug, Clone)]
pub enum MixAlgo {
    /// Full open below target, full close above.
    Bangbang,
    /// Fixed step every sample interval while outside the deadzone.
    Sapprox { amount: u16, sample_intvl: Ticks },
    /// Velocity-form PI with deadband accumulation and jacketing.
    Pi(PiSet),
}

#[derive(Debug, Clone)]
pub struct PiSet {
    pub sample_intvl: Ticks,
    /// Integral time constant.
    pub ti: Ticks,
    /// Dimensionless tuning factor applied to the inverse process gain.
    pub tune_f: f64,
    /// Assumed hot-to-cold span when no cold-inlet sensor is configured.
    pub ksmax: TempDiff,
}

#[derive(Debug, Clone)]
pub struct ValveSet {
    /// End-to-end travel time.
    pub ete_time: Ticks,
    /// Minimum actionable course, ‰ (3-way motors only).
    pub deadband: u16,
    pub motor: ValveMotor,
    pub kind: ValveKind,
}

#[derive(Debug, Default)]
struct PiRun {
    ctrl_ready: bool,
    prev_out: Temp,
    /// Accumulated sub-deadband course, ‰.
    db_acc: f64,
    last_time: Option<Ticks>,
}

#[derive(Debug, Default)]
struct ValveRun {
    online: bool,
    /// Estimated travel from the closed stop, milliseconds (0..ete).
    position_ms: i64,
    /// Remaining course magnitude, milliseconds of travel.
    course_ms: i64,
    request_action: ValveAction,
    actual_action: ValveAction,
    last_run_time: Option<Ticks>,
    acc_open_time: Ticks,
    acc_close_time: Ticks,
    /// Position estimate is anchored to a physical end stop.
    true_pos: bool,
    pi: PiRun,
    sapprox_last: Option<Ticks>,
}

pub struct Valve {
    name: String,
    set: ValveSet,
    run: ValveRun,
}

impl Valve {
    pub fn new(name: impl Into<String>, set: ValveSet) -> Self {
        Self {
            name: name.into(),
            set,
            run: ValveRun::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_online(&self) -> bool {
        self.run.online
    }

    fn ete_ms(&self) -> i64 {
        self.set.ete_time.as_millis() as i64
    }

    /// Estimated position, ‰ (0 = closed).
    pub fn position(&self) -> i16 {
        let ete = self.ete_ms();
        if ete == 0 {
            // misconfigured valve that never made it online
            return 0;
        }
        (self.run.position_ms * i64::from(COURSE_FULL) / ete) as i16
    }

    pub fn is_mix(&self) -> bool {
        matches!(self.set.kind, ValveKind::Mix(_))
    }

    /// Validate configuration, claim relays and seat the valve closed.
    pub fn online(&mut self, hal: &Hal, now: Ticks) -> PlantResult<()> {
        if self.set.ete_time.is_zero() {
            return Err(PlantError::Misconfigured {
                what: "valve end-to-end time is zero",
            });
        }
        if let ValveKind::Mix(ref m) = self.set.kind {
            if matches!(m.algo, MixAlgo::Pi(_)) && m.tid_hot.is_none() {
                return Err(PlantError::Misconfigured {
                    what: "PI mixing valve needs a hot-inlet sensor",
                });
            }
        }

        match self.set.motor {
            ValveMotor::ThreeWay { rid_open, rid_close } => {
                hal.outputs.grab(rid_open)?;
                hal.outputs.grab(rid_close)?;
            }
            ValveMotor::TwoWay { rid_trigger } => hal.outputs.grab(rid_trigger)?,
        }

        self.run = ValveRun {
            online: true,
            last_run_time: Some(now),
            ..ValveRun::default()
        };

        // seat fully closed so the position estimate gets a true anchor
        self.run.request_action = ValveAction::Close;
        self.run.course_ms = self.ete_ms();
        Ok(())
    }

    /// Force relays off and release claims.
    pub fn offline(&mut self, hal: &Hal) -> PlantResult<()> {
        match self.set.motor {
            ValveMotor::ThreeWay { rid_open, rid_close } => {
                let _ = hal.outputs.set(rid_open, false);
                let _ = hal.outputs.set(rid_close, false);
                hal.outputs.thaw(rid_open);
                hal.outputs.thaw(rid_close);
            }
            ValveMotor::TwoWay { rid_trigger } => {
                let _ = hal.outputs.set(rid_trigger, false);
                hal.outputs.thaw(rid_trigger);
            }
        }
        self.run = ValveRun::default();
        Ok(())
    }

    /// Request a signed course, ‰ (positive = open).
    ///
    /// 3-way motors drop requests below the deadband; 2-way motors only
    /// accept full-scale requests.
    pub fn request_course(&mut self, perth: i16) -> PlantResult<()> {
        if !self.run.online {
            return Err(PlantError::Offline { what: "valve" });
        }
        if perth == 0 {
            self.run.request_action = ValveAction::Stop;
            self.run.course_ms = 0;
            return Ok(());
        }
        match self.set.motor {
            ValveMotor::TwoWay { .. } => {
                if perth.unsigned_abs() != COURSE_FULL as u16 {
                    return Err(PlantError::NotImplemented {
                        what: "partial positioning on a 2-way motor",
                    });
                }
            }
            ValveMotor::ThreeWay { .. } => {
                if perth.unsigned_abs() < self.set.deadband {
                    return Err(PlantError::Deadband);
                }
            }
        }
        self.run.request_action = if perth > 0 {
            ValveAction::Open
        } else {
            ValveAction::Close
        };
        self.run.course_ms = (i64::from(perth.unsigned_abs()) * self.ete_ms()
            / i64::from(COURSE_FULL))
        .min(self.ete_ms());
        Ok(())
    }

    pub fn request_open_full(&mut self) -> PlantResult<()> {
        self.request_course(COURSE_FULL)
    }

    pub fn request_close_full(&mut self) -> PlantResult<()> {
        self.request_course(-COURSE_FULL)
    }

    pub fn request_stop(&mut self) -> PlantResult<()> {
        self.request_course(0)
    }

    #[cfg(test)]
    pub(crate) fn requested_action(&self) -> ValveAction {
        self.run.request_action
    }

    /// Isolation trigger: full course, direction from `reverse` XOR intent.
    pub fn isol_trigger(&mut self, isolate: bool) -> PlantResult<()> {
        let ValveKind::Isol { reverse } = self.set.kind else {
            return Err(PlantError::Invalid {
                what: "isolation trigger on a non-isolation valve",
            });
        };
        if isolate ^ reverse {
            self.request_close_full()
        } else {
            self.request_open_full()
        }
    }

    /// One tick: integrate the estimated position, consume the remaining
    /// course and drive the relays.
    pub fn run(&mut self, hal: &Hal, now: Ticks) -> PlantResult<()> {
        if !self.run.online {
            return Err(PlantError::Offline { what: "valve" });
        }
        let dt = match self.run.last_run_time.replace(now) {
            Some(last) => now.since(last),
            None => Ticks::ZERO,
        };
        let dt_ms = dt.as_millis() as i64;

        match self.run.actual_action {
            ValveAction::Open => {
                self.run.position_ms += dt_ms;
                self.run.acc_open_time += dt;
            }
            ValveAction::Close => {
                self.run.position_ms -= dt_ms;
                self.run.acc_close_time += dt;
            }
            ValveAction::Stop => {}
        }

        if self.run.position_ms >= self.ete_ms() {
            self.run.position_ms = self.ete_ms();
            self.run.true_pos = true;
        } else if self.run.position_ms <= 0 {
            self.run.position_ms = 0;
            self.run.true_pos = true;
        }

        if self.run.actual_action != ValveAction::Stop && self.run.course_ms > 0 {
            self.run.course_ms = (self.run.course_ms - dt_ms).max(0);
        }

        // runaway guard: continuous one-direction running beyond 3x the
        // end-to-end time means the valve is seated whatever the estimate says
        let cap = self.set.ete_time.saturating_mul(RUNAWAY_ETE_MULT);
        if self.run.acc_open_time > cap || self.run.acc_close_time > cap {
            self.run.true_pos = true;
            self.run.position_ms = if self.run.acc_open_time > cap {
                self.ete_ms()
            } else {
                0
            };
            if !matches!(self.set.motor, ValveMotor::TwoWay { .. }) {
                self.run.request_action = ValveAction::Stop;
                self.run.course_ms = 0;
            }
        }

        // auto-stop when the remaining course is under half of one tick's
        // travel; finishing the move would overshoot further than stopping
        if dt_ms > 0
            && self.run.request_action != ValveAction::Stop
            && self.run.course_ms < dt_ms / 2
        {
            self.run.request_action = ValveAction::Stop;
            self.run.course_ms = 0;
        }

        self.apply_action(hal)
    }

    fn apply_action(&mut self, hal: &Hal) -> PlantResult<()> {
        let desired = self.run.request_action;
        if desired == self.run.actual_action {
            return Ok(());
        }
        match self.set.motor {
            ValveMotor::ThreeWay { rid_open, rid_close } => match desired {
                ValveAction::Stop => {
                    hal.outputs.set(rid_open, false)?;
                    hal.outputs.set(rid_close, false)?;
                    self.run.actual_action = ValveAction::Stop;
                }
                ValveAction::Open => {
                    // break-before-make: release the counter-relay this
                    // tick, engage on the next
                    hal.outputs.set(rid_close, false)?;
                    if self.run.actual_action == ValveAction::Close {
                        self.run.actual_action = ValveAction::Stop;
                    } else {
                        hal.outputs.set(rid_open, true)?;
                        self.run.actual_action = ValveAction::Open;
                        self.run.acc_close_time = Ticks::ZERO;
                    }
                }
                ValveAction::Close => {
                    hal.outputs.set(rid_open, false)?;
                    if self.run.actual_action == ValveAction::Open {
                        self.run.actual_action = ValveAction::Stop;
                    } else {
                        hal.outputs.set(rid_close, true)?;
                        self.run.actual_action = ValveAction::Close;
                        self.run.acc_open_time = Ticks::ZERO;
                    }
                }
            },
            ValveMotor::TwoWay { rid_trigger } => match desired {
                ValveAction::Open => {
                    hal.outputs.set(rid_trigger, true)?;
                    self.run.actual_action = ValveAction::Open;
                    self.run.acc_close_time = Ticks::ZERO;
                }
                ValveAction::Close => {
                    hal.outputs.set(rid_trigger, false)?;
                    self.run.actual_action = ValveAction::Close;
                    self.run.acc_open_time = Ticks::ZERO;
                }
                // a spring-return motor cannot hold; leave the relay alone
                ValveAction::Stop => {}
            },
        }
        Ok(())
    }

    /// Mixing-valve temperature control: dispatch to the configured
    /// algorithm toward `target` output temperature.
    pub fn mix_tcontrol(&mut self, hal: &Hal, target: Temp, now: Ticks) -> PlantResult<()> {
        if !self.run.online {
            return Err(PlantError::Offline { what: "valve" });
        }
        let ValveKind::Mix(m) = self.set.kind.clone() else {
            return Err(PlantError::Invalid {
                what: "temperature control on an isolation valve",
            });
        };
        match m.algo {
            MixAlgo::Bangbang => self.tcontrol_bangbang(hal, target, &m),
            MixAlgo::Sapprox {
                amount,
                sample_intvl,
            } => self.tcontrol_sapprox(hal, target, &m, amount, sample_intvl, now),
            MixAlgo::Pi(ref pi) => self.tcontrol_pi(hal, target, &m, pi, now),
        }
    }

    fn tcontrol_bangbang(&mut self, hal: &Hal, target: Temp, m: &MixSet) -> PlantResult<()> {
        let t_out = hal.inputs.temperature(m.tid_out)?;
        let dz = m.tdeadzone / 2;
        if (t_out - target).abs() <= dz {
            return Err(PlantError::Deadzone);
        }
        if t_out < target {
            self.request_open_full()
        } else {
            self.request_close_full()
        }
    }

    fn tcontrol_sapprox(
        &mut self,
        hal: &Hal,
        target: Temp,
        m: &MixSet,
        amount: u16,
        sample_intvl: Ticks,
        now: Ticks,
    ) -> PlantResult<()> {
        if let Some(last) = self.run.sapprox_last {
            if now.since(last) < sample_intvl {
                return Ok(());
            }
        }
        self.run.sapprox_last = Some(now);

        let t_out = hal.inputs.temperature(m.tid_out)?;
        let dz = m.tdeadzone / 2;
        if (t_out - target).abs() <= dz {
            return self.request_stop();
        }
        if t_out < target {
            self.request_course(amount as i16)
        } else {
            self.request_course(-(amount as i16))
        }
    }

    fn tcontrol_pi(
        &mut self,
        hal: &Hal,
        target: Temp,
        m: &MixSet,
        pi: &PiSet,
        now: Ticks,
    ) -> PlantResult<()> {
        let dt = match self.run.pi.last_time {
            Some(last) => {
                let elapsed = now.since(last);
                if elapsed < pi.sample_intvl {
                    return Ok(());
                }
                elapsed
            }
            None => pi.sample_intvl,
        };
        self.run.pi.last_time = Some(now);

        let t_out = hal.inputs.temperature(m.tid_out)?;
        let tid_hot = m.tid_hot.ok_or(PlantError::Misconfigured {
            what: "PI mixing valve lost its hot-inlet sensor",
        })?;
        let t_hot = hal.inputs.temperature(tid_hot)?;
        let t_cold = match m.tid_cold {
            Some(tid) => hal.inputs.temperature(tid)?,
            None => t_hot - pi.ksmax,
        };

        let span = (t_hot - t_cold).to_kelvin();
        if span <= 0.0 {
            // degenerate process gain: no control authority, bail before
            // the division below
            self.run.pi.ctrl_ready = false;
            return Err(PlantError::Deadzone);
        }

        // jacketing: process outside the measured bounds means the mix is
        // saturated; slam the valve and restart the controller
        if t_out > t_hot {
            self.run.pi.ctrl_ready = false;
            self.run.pi.db_acc = 0.0;
            return self.request_close_full();
        }
        if t_out < t_cold {
            self.run.pi.ctrl_ready = false;
            self.run.pi.db_acc = 0.0;
            return self.request_open_full();
        }

        // process gain: Kelvin of output per ‰ of course
        let k = span / f64::from(COURSE_FULL);
        let kp = pi.tune_f / k;

        if !self.run.pi.ctrl_ready {
            // first sample after a reset only seeds the previous output
            self.run.pi.prev_out = t_out;
            self.run.pi.ctrl_ready = true;
            self.run.pi.db_acc = 0.0;
            return Ok(());
        }

        let error = (target - t_out).to_kelvin();
        // velocity form: proportional on the process variable, integral on
        // the error
        let p_course = kp * (self.run.pi.prev_out - t_out).to_kelvin();
        let i_course = kp * dt.as_secs_f64() / pi.ti.as_secs_f64() * error;
        self.run.pi.prev_out = t_out;

        let course = p_course + i_course + self.run.pi.db_acc;
        let perth = course
            .round()
            .clamp(-f64::from(COURSE_FULL), f64::from(COURSE_FULL)) as i16;
        if perth.unsigned_abs() < self.set.deadband {
            // keep sub-deadband contributions instead of discarding them
            self.run.pi.db_acc = course;
            debug!(valve = %self.name, course, "PI course below deadband, accumulating");
            return Ok(());
        }
        self.run.pi.db_acc = 0.0;
        self.request_course(perth)
    }
}
