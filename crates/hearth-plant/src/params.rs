//! Default consumer parameters and per-entity overrides.
//!
//! The plant carries one set of defaults for heating circuits and one for
//! DHW tanks; each entity may override individual fields. Overrides merge
//! at online time, never at run time.

use hearth_core::{Temp, TempDiff, Ticks};

#[derive(Debug, Clone, Copy)]
pub struct HcircuitParams {
    pub t_comfort: Temp,
    pub t_eco: Temp,
    pub t_frostfree: Temp,
    /// Added to every requested ambient temperature.
    pub t_offset: TempDiff,
    pub outhoff_comfort: Temp,
    pub outhoff_eco: Temp,
    pub outhoff_frostfree: Temp,
    pub outhoff_hysteresis: TempDiff,
    pub limit_wtmin: Temp,
    pub limit_wtmax: Temp,
    /// Added to the water target when requesting heat from the source.
    pub temp_inoffset: TempDiff,
}

impl Default for HcircuitParams {
    fn default() -> Self {
        Self {
            t_comfort: Temp::celsius(20.5),
            t_eco: Temp::celsius(17.5),
            t_frostfree: Temp::celsius(7.0),
            t_offset: TempDiff::ZERO,
            outhoff_comfort: Temp::celsius(17.0),
            outhoff_eco: Temp::celsius(15.0),
            outhoff_frostfree: Temp::celsius(7.0),
            outhoff_hysteresis: TempDiff::kelvin(1.0),
            limit_wtmin: Temp::celsius(15.0),
            limit_wtmax: Temp::celsius(85.0),
            temp_inoffset: TempDiff::kelvin(7.5),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HcircuitParamsOvr {
    pub t_comfort: Option<Temp>,
    pub t_eco: Option<Temp>,
    pub t_frostfree: Option<Temp>,
    pub t_offset: Option<TempDiff>,
    pub outhoff_comfort: Option<Temp>,
    pub outhoff_eco: Option<Temp>,
    pub outhoff_frostfree: Option<Temp>,
    pub outhoff_hysteresis: Option<TempDiff>,
    pub limit_wtmin: Option<Temp>,
    pub limit_wtmax: Option<Temp>,
    pub temp_inoffset: Option<TempDiff>,
}

impl HcircuitParamsOvr {
    pub fn merge(&self, d: &HcircuitParams) -> HcircuitParams {
        HcircuitParams {
            t_comfort: self.t_comfort.unwrap_or(d.t_comfort),
            t_eco: self.t_eco.unwrap_or(d.t_eco),
            t_frostfree: self.t_frostfree.unwrap_or(d.t_frostfree),
            t_offset: self.t_offset.unwrap_or(d.t_offset),
            outhoff_comfort: self.outhoff_comfort.unwrap_or(d.outhoff_comfort),
            outhoff_eco: self.outhoff_eco.unwrap_or(d.outhoff_eco),
            outhoff_frostfree: self.outhoff_frostfree.unwrap_or(d.outhoff_frostfree),
            outhoff_hysteresis: self.outhoff_hysteresis.unwrap_or(d.outhoff_hysteresis),
            limit_wtmin: self.limit_wtmin.unwrap_or(d.limit_wtmin),
            limit_wtmax: self.limit_wtmax.unwrap_or(d.limit_wtmax),
            temp_inoffset: self.temp_inoffset.unwrap_or(d.temp_inoffset),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DhwtParams {
    pub t_comfort: Temp,
    pub t_eco: Temp,
    pub t_frostfree: Temp,
    pub limit_tmin: Temp,
    pub limit_tmax: Temp,
    /// Maximum acceptable feed-water (inlet) temperature.
    pub limit_wintmax: Temp,
    pub hysteresis: TempDiff,
    /// Requested above the tank target when asking the source for heat.
    pub temp_inoffset: TempDiff,
    /// Charges running longer than this are aborted (None: unlimited).
    pub limit_chargetime: Option<Ticks>,
}

impl Default for DhwtParams {
    fn default() -> Self {
        Self {
            t_comfort: Temp::celsius(55.0),
            t_eco: Temp::celsius(40.0),
            t_frostfree: Temp::celsius(10.0),
            limit_tmin: Temp::celsius(5.0),
            limit_tmax: Temp::celsius(90.0),
            limit_wintmax: Temp::celsius(90.0),
            hysteresis: TempDiff::kelvin(10.0),
            temp_inoffset: TempDiff::kelvin(10.0),
            limit_chargetime: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DhwtParamsOvr {
    pub t_comfort: Option<Temp>,
    pub t_eco: Option<Temp>,
    pub t_frostfree: Option<Temp>,
    pub limit_tmin: Option<Temp>,
    pub limit_tmax: Option<Temp>,
    pub limit_wintmax: Option<Temp>,
    pub hysteresis: Option<TempDiff>,
    pub temp_inoffset: Option<TempDiff>,
    pub limit_chargetime: Option<Ticks>,
}

impl DhwtParamsOvr {
    pub fn merge(&self, d: &DhwtParams) -> DhwtParams {
        DhwtParams {
            t_comfort: self.t_comfort.unwrap_or(d.t_comfort),
            t_eco: self.t_eco.unwrap_or(d.t_eco),
            t_frostfree: self.t_frostfree.unwrap_or(d.t_frostfree),
            limit_tmin: self.limit_tmin.unwrap_or(d.limit_tmin),
            limit_tmax: self.limit_tmax.unwrap_or(d.limit_tmax),
            limit_wintmax: self.limit_wintmax.unwrap_or(d.limit_wintmax),
            hysteresis: self.hysteresis.unwrap_or(d.hysteresis),
            temp_inoffset: self.temp_inoffset.unwrap_or(d.temp_inoffset),
            limit_chargetime: self.limit_chargetime.or(d.limit_chargetime),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hcircuit_override_merges_field_wise() {
        let defaults = HcircuitParams::default();
        let ovr = HcircuitParamsOvr {
            t_comfort: Some(Temp::celsius(22.0)),
            ..Default::default()
        };
        let merged = ovr.merge(&defaults);
        assert_eq!(merged.t_comfort, Temp::celsius(22.0));
        assert_eq!(merged.t_eco, defaults.t_eco);
    }

    #[test]
    fn dhwt_override_merges_field_wise() {
        let defaults = DhwtParams::default();
        let ovr = DhwtParamsOvr {
            hysteresis: Some(TempDiff::kelvin(5.0)),
            limit_chargetime: Some(Ticks::from_mins(90)),
            ..Default::default()
        };
        let merged = ovr.merge(&defaults);
        assert_eq!(merged.hysteresis, TempDiff::kelvin(5.0));
        assert_eq!(merged.limit_chargetime, Some(Ticks::from_mins(90)));
        assert_eq!(merged.t_comfort, defaults.t_comfort);
    }
}
