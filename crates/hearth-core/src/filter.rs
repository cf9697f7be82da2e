//! Discrete-time estimators used by the control laws.
//!
//! - [`expw_mavg`]: exponential moving average over a thermal time constant
//! - [`Derivative`]: windowed temperature rate-of-change estimator
//! - [`Integral`]: jacketed (clamped) error integral for anti-windup

use crate::temp::{Temp, TempDiff};
use crate::time::Ticks;

/// One step of an exponential moving average.
///
/// `filtered += (sample - filtered) * dt / (dt + tau)`, with sign-aware
/// rounding so the filter converges onto the sample instead of stalling one
/// centikelvin short of it.
pub fn expw_mavg(filtered: Temp, sample: Temp, tau: Ticks, dt: Ticks) -> Temp {
    if dt.is_zero() {
        return filtered;
    }
    let err = (sample - filtered).centikelvin() as i64;
    let dt = dt.as_millis() as i64;
    let div = dt + tau.as_millis() as i64;
    let half = if err >= 0 { div / 2 } else { -(div / 2) };
    let step = (err * dt + half) / div;
    filtered + TempDiff::from_centikelvin(step as i32)
}

/// Windowed temperature derivative estimator.
///
/// Produces K/s sampled over at least `window` of elapsed time; holds the
/// previous estimate between window boundaries.
#[derive(Debug, Clone)]
pub struct Derivative {
    window: Ticks,
    anchor: Option<(Ticks, Temp)>,
    value: f64,
}

impl Derivative {
    pub fn new(window: Ticks) -> Self {
        Self {
            window,
            anchor: None,
            value: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.anchor = None;
        self.value = 0.0;
    }

    /// Feed a sample; returns the current estimate in K/s.
    pub fn update(&mut self, now: Ticks, temp: Temp) -> f64 {
        match self.anchor {
            None => {
                self.anchor = Some((now, temp));
                self.value = 0.0;
            }
            Some((at, anchor_temp)) => {
                let elapsed = now.since(at);
                if elapsed >= self.window && !elapsed.is_zero() {
                    self.value = (temp - anchor_temp).to_kelvin() / elapsed.as_secs_f64();
                    self.anchor = Some((now, temp));
                }
            }
        }
        self.value
    }

    /// Latest estimate in K/s.
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Jacketed error integral in K·s, clamped to `[jacket_min, 0]`.
///
/// Accumulates only while the error is fed; the jacket bounds the windup so
/// the derived shift signal recovers in bounded time once the error clears.
#[derive(Debug, Clone)]
pub struct Integral {
    jacket_min: f64,
    last_time: Option<Ticks>,
    value: f64,
}

impl Integral {
    pub fn new(jacket_min: f64) -> Self {
        Self {
            jacket_min,
            last_time: None,
            value: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.last_time = None;
        self.value = 0.0;
    }

    /// Accumulate `err` over the elapsed time; returns the jacketed value.
    pub fn update(&mut self, now: Ticks, err: TempDiff) -> f64 {
        if let Some(last) = self.last_time {
            let dt = now.since(last).as_secs_f64();
            self.value = (self.value + err.to_kelvin() * dt).clamp(self.jacket_min, 0.0);
        }
        self.last_time = Some(now);
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}
