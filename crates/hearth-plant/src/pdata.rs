//! Plant-wide shared data.
//!
//! Written exactly once per tick by the plant aggregator (during the
//! collect/heat-source phase) and read by every consumer entity on the
//! following tick. Writer and readers are strictly sequenced within the
//! single control thread, so these are plain fields.

use hearth_core::Ticks;

#[derive(Debug, Clone, Copy)]
pub struct PlantData {
    /// A heat source exceeded its hard maximum; consumers dump heat.
    pub overtemp: bool,
    /// Critical consumer power shift, percent (negative = reduce intake).
    pub shift_crit: i16,
    /// Non-critical consumer power shift, percent.
    pub shift_noncrit: i16,
    /// Delay during which consumers must not reduce intake.
    pub consumer_sdelay: Ticks,
    /// No circuit has requested heat recently.
    pub could_sleep: bool,
    /// Current DHWT priority threshold (charges allowed at or below).
    pub dhwt_currprio: u8,
    /// Least urgent priority value seen at online time.
    pub dhwt_maxprio: u8,
    /// An absolute-priority DHWT charge is in effect.
    pub dhwc_absolute: bool,
    /// A sliding-priority DHWT charge is in effect.
    pub dhwc_sliding: bool,
    /// Summer actuator-exercise window is active.
    pub summer_maint: bool,
    /// Every heat source failed to take the dispatched request.
    pub hs_allfailed: bool,
}

impl Default for PlantData {
    fn default() -> Self {
        Self {
            overtemp: false,
            shift_crit: 0,
            shift_noncrit: 0,
            consumer_sdelay: Ticks::ZERO,
            could_sleep: false,
            dhwt_currprio: 0,
            dhwt_maxprio: 0,
            dhwc_absolute: false,
            dhwc_sliding: false,
            summer_maint: false,
            hs_allfailed: false,
        }
    }
}
