//! Plant description schema.
//!
//! Temperatures are degrees Celsius (`_c`), temperature deltas Kelvin
//! (`_k`), durations carry their unit in the field name. Sensors and
//! relays are referenced by backend name and resolved at build time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectDef {
    pub name: String,
    #[serde(default)]
    pub defaults: DefaultsDef,
    #[serde(default = "default_sleeping_delay_mins")]
    pub sleeping_delay_mins: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summer_maintenance: Option<SummerMaintDef>,
    #[serde(default)]
    pub models: Vec<ModelDef>,
    #[serde(default)]
    pub schedules: Vec<ScheduleDef>,
    #[serde(default)]
    pub pumps: Vec<PumpDef>,
    #[serde(default)]
    pub valves: Vec<ValveDef>,
    #[serde(default)]
    pub hcircuits: Vec<HcircuitDef>,
    #[serde(default)]
    pub dhwts: Vec<DhwtDef>,
    #[serde(default)]
    pub heatsources: Vec<HeatSourceDef>,
}

fn default_sleeping_delay_mins() -> u64 {
    120
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DefaultsDef {
    #[serde(default)]
    pub hcircuit: HcircuitParamsDef,
    #[serde(default)]
    pub dhwt: DhwtParamsDef,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SummerMaintDef {
    pub interval_hours: u64,
    pub duration_mins: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDef {
    pub name: String,
    pub outdoor_sensor: String,
    pub tau_hours: u64,
    pub limit_tsummer_c: f64,
    pub limit_tfrost_c: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleDef {
    pub name: String,
    #[serde(default)]
    pub entries: Vec<SchedEntryDef>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SchedEntryDef {
    /// 0 = Monday .. 6 = Sunday.
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runmode: Option<RunModeDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhwmode: Option<RunModeDef>,
    #[serde(default)]
    pub legionella: bool,
    #[serde(default)]
    pub recycle: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunModeDef {
    Off,
    Auto,
    Comfort,
    Eco,
    Dhwonly,
    Frostfree,
    Test,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PumpDef {
    pub name: String,
    pub relay: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_mins: Option<u64>,
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValveDef {
    pub name: String,
    pub ete_time_secs: u64,
    #[serde(default)]
    pub deadband: u16,
    pub motor: ValveMotorDef,
    pub kind: ValveKindDef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ValveMotorDef {
    ThreeWay {
        open_relay: String,
        close_relay: String,
    },
    TwoWay {
        trigger_relay: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ValveKindDef {
    Mix {
        out_sensor: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hot_sensor: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cold_sensor: Option<String>,
        deadzone_k: f64,
        algo: MixAlgoDef,
    },
    Isol {
        #[serde(default)]
        reverse: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MixAlgoDef {
    Bangbang,
    Sapprox {
        amount: u16,
        sample_intvl_secs: u64,
    },
    Pi {
        sample_intvl_secs: u64,
        ti_secs: u64,
        tune_f: f64,
        ksmax_k: f64,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct HcircuitParamsDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_comfort_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_eco_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_frostfree_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_offset_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outhoff_comfort_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outhoff_eco_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outhoff_frostfree_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outhoff_hysteresis_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_wtmin_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_wtmax_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_inoffset_k: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HcircuitDef {
    pub name: String,
    #[serde(default = "default_runmode")]
    pub runmode: RunModeDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    pub bmodel: String,
    pub law: BilinearLawDef,
    #[serde(default)]
    pub params: HcircuitParamsDef,
    #[serde(default)]
    pub ambient_factor: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wtemp_rorh_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost_delta_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost_maxtime_mins: Option<u64>,
    #[serde(default)]
    pub fast_cooldown_eco: bool,
    #[serde(default)]
    pub fast_cooldown_frostfree: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inoff_temp_c: Option<f64>,
    pub outgoing_sensor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_sensor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambient_sensor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pump: Option<String>,
}

fn default_runmode() -> RunModeDef {
    RunModeDef::Auto
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BilinearLawDef {
    pub tout1_c: f64,
    pub twater1_c: f64,
    pub tout2_c: f64,
    pub twater2_c: f64,
    #[serde(default = "default_nh")]
    pub nh: f64,
}

fn default_nh() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DhwtParamsDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_comfort_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_eco_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_frostfree_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_tmin_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_tmax_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_wintmax_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hysteresis_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_inoffset_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_chargetime_mins: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DhwtDef {
    pub name: String,
    #[serde(default = "default_runmode")]
    pub runmode: RunModeDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default)]
    pub prio: u8,
    #[serde(default = "default_charge_prio")]
    pub charge_prio: ChargePrioDef,
    #[serde(default = "default_force_mode")]
    pub force_mode: ForceModeDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legionella: Option<LegionellaDef>,
    #[serde(default)]
    pub electric_hasthermostat: bool,
    #[serde(default)]
    pub params: DhwtParamsDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_sensor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom_sensor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_sensor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selfheater_relay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_pump: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recycle_pump: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hwisol_valve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedisol_valve: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChargePrioDef {
    ParallelMax,
    ParallelDhwOverride,
    SlidingMax,
    SlidingDhwOverride,
    Absolute,
}

fn default_charge_prio() -> ChargePrioDef {
    ChargePrioDef::ParallelMax
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ForceModeDef {
    Never,
    FirstOfDay,
    Always,
}

fn default_force_mode() -> ForceModeDef {
    ForceModeDef::Never
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LegionellaDef {
    pub tlegionella_c: f64,
    #[serde(default)]
    pub recycle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeatSourceDef {
    pub name: String,
    #[serde(default = "default_runmode")]
    pub runmode: RunModeDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_sdelay_mins: Option<u64>,
    pub backend: HeatBackendDef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum HeatBackendDef {
    Boiler {
        idle_mode: IdleModeDef,
        hysteresis_k: f64,
        limit_thardmax_c: f64,
        limit_tmax_c: f64,
        limit_tmin_c: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit_treturnmin_c: Option<f64>,
        t_freeze_c: f64,
        burner_min_time_mins: u64,
        boiler_sensor: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_sensor: Option<String>,
        burner_relay: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        load_pump: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_valve: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdleModeDef {
    Never,
    FrostOnly,
    Always,
}
