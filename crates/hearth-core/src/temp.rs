//! Fixed-point temperature types.
//!
//! All plant temperatures are absolute and carried as `Temp`, an `i32` in
//! centikelvin (1/100 K). `TempDiff` is the signed delta companion used for
//! hysteresis bands, offsets and control errors. Integer fixed point keeps
//! comparisons exact and the persisted representation bit-stable.

use core::fmt;
use core::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

const CK_PER_K: i32 = 100;
const ZERO_C_CK: i32 = 27315;

/// Absolute temperature, centikelvin fixed point.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Temp(i32);

impl Temp {
    /// 0 °C (273.15 K).
    pub const ZERO_C: Temp = Temp(ZERO_C_CK);
    /// Absolute zero.
    pub const ZERO_K: Temp = Temp(0);

    pub const fn from_centikelvin(raw: i32) -> Self {
        Temp(raw)
    }

    pub const fn centikelvin(self) -> i32 {
        self.0
    }

    /// Build from degrees Celsius. Errors on non-finite input.
    pub fn try_from_celsius(c: f64) -> CoreResult<Self> {
        if !c.is_finite() {
            return Err(CoreError::NonFinite {
                what: "temperature (celsius)",
                value: c,
            });
        }
        Ok(Temp((c * CK_PER_K as f64).round() as i32 + ZERO_C_CK))
    }

    /// Build from degrees Celsius, panicking on non-finite input.
    ///
    /// Intended for literals in tests and constants.
    pub fn celsius(c: f64) -> Self {
        Self::try_from_celsius(c).unwrap_or_else(|_| panic!("non-finite celsius literal"))
    }

    pub fn to_celsius(self) -> f64 {
        (self.0 - ZERO_C_CK) as f64 / CK_PER_K as f64
    }

    pub fn to_kelvin(self) -> f64 {
        self.0 as f64 / CK_PER_K as f64
    }

    pub fn clamp(self, lo: Temp, hi: Temp) -> Temp {
        Temp(self.0.clamp(lo.0, hi.0))
    }

    pub fn min(self, other: Temp) -> Temp {
        Temp(self.0.min(other.0))
    }

    pub fn max(self, other: Temp) -> Temp {
        Temp(self.0.max(other.0))
    }
}

impl fmt::Debug for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Temp({:.2}°C)", self.to_celsius())
    }
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}°C", self.to_celsius())
    }
}

/// Signed temperature delta, centikelvin fixed point.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TempDiff(i32);

impl TempDiff {
    pub const ZERO: TempDiff = TempDiff(0);

    pub const fn from_centikelvin(raw: i32) -> Self {
        TempDiff(raw)
    }

    pub const fn centikelvin(self) -> i32 {
        self.0
    }

    /// Build from a Kelvin delta. Errors on non-finite input.
    pub fn try_from_kelvin(dk: f64) -> CoreResult<Self> {
        if !dk.is_finite() {
            return Err(CoreError::NonFinite {
                what: "temperature delta (kelvin)",
                value: dk,
            });
        }
        Ok(TempDiff((dk * CK_PER_K as f64).round() as i32))
    }

    /// Build from a Kelvin delta, panicking on non-finite input.
    pub fn kelvin(dk: f64) -> Self {
        Self::try_from_kelvin(dk).unwrap_or_else(|_| panic!("non-finite kelvin literal"))
    }

    pub fn to_kelvin(self) -> f64 {
        self.0 as f64 / CK_PER_K as f64
    }

    pub fn abs(self) -> TempDiff {
        TempDiff(self.0.abs())
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn min(self, other: TempDiff) -> TempDiff {
        TempDiff(self.0.min(other.0))
    }

    pub fn max(self, other: TempDiff) -> TempDiff {
        TempDiff(self.0.max(other.0))
    }
}

impl fmt::Debug for TempDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TempDiff({:+.2}K)", self.to_kelvin())
    }
}

impl fmt::Display for TempDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+.2}K", self.to_kelvin())
    }
}

impl Sub for Temp {
    type Output = TempDiff;
    fn sub(self, rhs: Temp) -> TempDiff {
        TempDiff(self.0 - rhs.0)
    }
}

impl Add<TempDiff> for Temp {
    type Output = Temp;
    fn add(self, rhs: TempDiff) -> Temp {
        Temp(self.0 + rhs.0)
    }
}

impl Sub<TempDiff> for Temp {
    type Output = Temp;
    fn sub(self, rhs: TempDiff) -> Temp {
        Temp(self.0 - rhs.0)
    }
}

impl AddAssign<TempDiff> for Temp {
    fn add_assign(&mut self, rhs: TempDiff) {
        self.0 += rhs.0;
    }
}

impl SubAssign<TempDiff> for Temp {
    fn sub_assign(&mut self, rhs: TempDiff) {
        self.0 -= rhs.0;
    }
}

impl Add for TempDiff {
    type Output = TempDiff;
    fn add(self, rhs: TempDiff) -> TempDiff {
        TempDiff(self.0 + rhs.0)
    }
}

impl Sub for TempDiff {
    type Output = TempDiff;
    fn sub(self, rhs: TempDiff) -> TempDiff {
        TempDiff(self.0 - rhs.0)
    }
}

impl Neg for TempDiff {
    type Output = TempDiff;
    fn neg(self) -> TempDiff {
        TempDiff(-self.0)
    }
}

impl Mul<i32> for TempDiff {
    type Output = TempDiff;
    fn mul(self, rhs: i32) -> TempDiff {
        TempDiff(self.0 * rhs)
    }
}

impl Div<i32> for TempDiff {
    type Output = TempDiff;
    fn div(self, rhs: i32) -> TempDiff {
        TempDiff(self.0 / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn celsius_round_trip() {
        for c in [-20.0, 0.0, 18.5, 60.0, 90.0] {
            let t = Temp::celsius(c);
            assert!((t.to_celsius() - c).abs() < 0.005, "{c}");
        }
    }

    #[test]
    fn zero_celsius_is_273_15_k() {
        assert_eq!(Temp::ZERO_C.centikelvin(), 27315);
        assert!((Temp::ZERO_C.to_kelvin() - 273.15).abs() < 1e-9);
    }

    #[test]
    fn delta_arithmetic() {
        let a = Temp::celsius(60.0);
        let b = Temp::celsius(57.0);
        assert_eq!(a - b, TempDiff::kelvin(3.0));
        assert_eq!(b + TempDiff::kelvin(3.0), a);
        assert_eq!(a - TempDiff::kelvin(3.0), b);
        assert_eq!(TempDiff::kelvin(6.0) / 2, TempDiff::kelvin(3.0));
    }

    #[test]
    fn ordering_is_exact() {
        assert!(Temp::celsius(57.0) < Temp::celsius(57.01));
        assert!(TempDiff::kelvin(-1.0).is_negative());
        assert!(!TempDiff::ZERO.is_negative());
    }

    #[test]
    fn non_finite_rejected() {
        assert!(Temp::try_from_celsius(f64::NAN).is_err());
        assert!(TempDiff::try_from_kelvin(f64::INFINITY).is_err());
    }
}
