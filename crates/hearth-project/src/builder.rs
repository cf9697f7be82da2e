//! Build a runnable plant from a validated project description.
//!
//! Resolves every by-name reference (sensors and relays against the I/O
//! backend, pumps/valves/schedules/models within the description) into the
//! compact ids the control core runs on. Resolution failures abort the
//! build; semantic invariants are re-checked later by `online()`.

use crate::schema::{
    ChargePrioDef, DhwtParamsDef, ForceModeDef, HcircuitParamsDef, HeatBackendDef, IdleModeDef,
    MixAlgoDef, ProjectDef, RunModeDef, ValveKindDef, ValveMotorDef,
};
use hearth_core::{RelayId, RunMode, SensorId, Temp, TempDiff, Ticks};
use hearth_hal::{Hal, ModelSet, Models, SchedEntry, SchedParams, WeeklyScheduler};
use hearth_plant::{
    Boiler, BoilerSet, ChargePrio, Dhwt, DhwtParamsOvr, DhwtSet, ForceMode, Hcircuit,
    HcircuitParamsOvr, HcircuitSet, HeatSource, HeatSourceSet, IdleMode, LegionellaSet, MixAlgo,
    MixSet, PiSet, Plant, PlantError, PlantSet, Pump, PumpHandle, PumpSet, SummerMaint, TempLawBilinear,
    ValveKind, ValveMotor, ValveSet,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("unknown sensor {name} referenced by {context}")]
    UnknownSensor { name: String, context: String },

    #[error("unknown relay {name} referenced by {context}")]
    UnknownRelay { name: String, context: String },

    #[error("unknown {kind} {name} referenced by {context}")]
    UnknownEntity {
        kind: &'static str,
        name: String,
        context: String,
    },

    #[error("non-finite value in {context}")]
    NonFinite { context: String },

    #[error(transparent)]
    Plant(#[from] PlantError),
}

/// Everything the runtime needs, fully resolved.
pub struct Built {
    pub plant: Plant,
    pub models: Models,
    pub scheduler: WeeklyScheduler,
}

fn temp(c: f64, context: &str) -> Result<Temp, BuildError> {
    Temp::try_from_celsius(c).map_err(|_| BuildError::NonFinite {
        context: context.to_string(),
    })
}

fn delta(k: f64, context: &str) -> Result<TempDiff, BuildError> {
    TempDiff::try_from_kelvin(k).map_err(|_| BuildError::NonFinite {
        context: context.to_string(),
    })
}

fn opt_temp(c: Option<f64>, context: &str) -> Result<Option<Temp>, BuildError> {
    c.map(|v| temp(v, context)).transpose()
}

fn opt_delta(k: Option<f64>, context: &str) -> Result<Option<TempDiff>, BuildError> {
    k.map(|v| delta(v, context)).transpose()
}

fn sensor(hal: &Hal, name: &str, context: &str) -> Result<SensorId, BuildError> {
    hal.inputs
        .resolve(name)
        .ok_or_else(|| BuildError::UnknownSensor {
            name: name.to_string(),
            context: context.to_string(),
        })
}

fn opt_sensor(
    hal: &Hal,
    name: &Option<String>,
    context: &str,
) -> Result<Option<SensorId>, BuildError> {
    name.as_deref()
        .map(|n| sensor(hal, n, context))
        .transpose()
}

fn relay(hal: &Hal, name: &str, context: &str) -> Result<RelayId, BuildError> {
    hal.outputs
        .resolve(name)
        .ok_or_else(|| BuildError::UnknownRelay {
            name: name.to_string(),
            context: context.to_string(),
        })
}

fn runmode(def: RunModeDef) -> RunMode {
    match def {
        RunModeDef::Off => RunMode::Off,
        RunModeDef::Auto => RunMode::Auto,
        RunModeDef::Comfort => RunMode::Comfort,
        RunModeDef::Eco => RunMode::Eco,
        RunModeDef::Dhwonly => RunMode::Dhwonly,
        RunModeDef::Frostfree => RunMode::Frostfree,
        RunModeDef::Test => RunMode::Test,
    }
}

fn hcircuit_params(
    def: &HcircuitParamsDef,
    context: &str,
) -> Result<HcircuitParamsOvr, BuildError> {
    Ok(HcircuitParamsOvr {
        t_comfort: opt_temp(def.t_comfort_c, context)?,
        t_eco: opt_temp(def.t_eco_c, context)?,
        t_frostfree: opt_temp(def.t_frostfree_c, context)?,
        t_offset: opt_delta(def.t_offset_k, context)?,
        outhoff_comfort: opt_temp(def.outhoff_comfort_c, context)?,
        outhoff_eco: opt_temp(def.outhoff_eco_c, context)?,
        outhoff_frostfree: opt_temp(def.outhoff_frostfree_c, context)?,
        outhoff_hysteresis: opt_delta(def.outhoff_hysteresis_k, context)?,
        limit_wtmin: opt_temp(def.limit_wtmin_c, context)?,
        limit_wtmax: opt_temp(def.limit_wtmax_c, context)?,
        temp_inoffset: opt_delta(def.temp_inoffset_k, context)?,
    })
}

fn dhwt_params(def: &DhwtParamsDef, context: &str) -> Result<DhwtParamsOvr, BuildError> {
    Ok(DhwtParamsOvr {
        t_comfort: opt_temp(def.t_comfort_c, context)?,
        t_eco: opt_temp(def.t_eco_c, context)?,
        t_frostfree: opt_temp(def.t_frostfree_c, context)?,
        limit_tmin: opt_temp(def.limit_tmin_c, context)?,
        limit_tmax: opt_temp(def.limit_tmax_c, context)?,
        limit_wintmax: opt_temp(def.limit_wintmax_c, context)?,
        hysteresis: opt_delta(def.hysteresis_k, context)?,
        temp_inoffset: opt_delta(def.temp_inoffset_k, context)?,
        limit_chargetime: def.limit_chargetime_mins.map(Ticks::from_mins),
    })
}

/// Construct the plant, models and scheduler from a validated description.
pub fn build(project: &ProjectDef, hal: &Hal) -> Result<Built, BuildError> {
    // building models
    let mut models = Models::new();
    for def in &project.models {
        let context = format!("model {}", def.name);
        models.add(ModelSet {
            name: def.name.clone(),
            tid_outdoor: sensor(hal, &def.outdoor_sensor, &context)?,
            tau: Ticks::from_hours(def.tau_hours),
            limit_tsummer: temp(def.limit_tsummer_c, &context)?,
            limit_tfrost: temp(def.limit_tfrost_c, &context)?,
        });
    }

    // weekly schedules
    let mut scheduler = WeeklyScheduler::new();
    for def in &project.schedules {
        let entries = def
            .entries
            .iter()
            .map(|e| SchedEntry {
                weekday: e.weekday,
                minute_of_day: u16::from(e.hour) * 60 + u16::from(e.minute),
                params: SchedParams {
                    runmode: e.runmode.map(runmode),
                    dhwmode: e.dhwmode.map(runmode),
                    legionella: e.legionella,
                    recycle: e.recycle,
                },
            })
            .collect();
        scheduler.add_schedule(&def.name, entries);
    }

    let def_hcircuit = hcircuit_params(&project.defaults.hcircuit, "defaults.hcircuit")?
        .merge(&Default::default());
    let def_dhwt = dhwt_params(&project.defaults.dhwt, "defaults.dhwt")?.merge(&Default::default());

    let mut plant = Plant::new(PlantSet {
        sleeping_delay: Ticks::from_mins(project.sleeping_delay_mins),
        summer_maintenance: project.summer_maintenance.map(|m| SummerMaint {
            interval: Ticks::from_hours(m.interval_hours),
            duration: Ticks::from_mins(m.duration_mins),
        }),
        def_hcircuit,
        def_dhwt,
    });

    // actuators first: consumers resolve them by name below
    for def in &project.pumps {
        let context = format!("pump {}", def.name);
        plant.add_pump(Pump::new(
            def.name.clone(),
            PumpSet {
                rid_pump: relay(hal, &def.relay, &context)?,
                cooldown: def.cooldown_mins.map(Ticks::from_mins),
                shared: def.shared,
            },
        ));
    }

    for def in &project.valves {
        let context = format!("valve {}", def.name);
        let motor = match &def.motor {
            ValveMotorDef::ThreeWay {
                open_relay,
                close_relay,
            } => ValveMotor::ThreeWay {
                rid_open: relay(hal, open_relay, &context)?,
                rid_close: relay(hal, close_relay, &context)?,
            },
            ValveMotorDef::TwoWay { trigger_relay } => ValveMotor::TwoWay {
                rid_trigger: relay(hal, trigger_relay, &context)?,
            },
        };
        let kind = match &def.kind {
            ValveKindDef::Isol { reverse } => ValveKind::Isol { reverse: *reverse },
            ValveKindDef::Mix {
                out_sensor,
                hot_sensor,
                cold_sensor,
                deadzone_k,
                algo,
            } => ValveKind::Mix(MixSet {
                tid_out: sensor(hal, out_sensor, &context)?,
                tid_hot: opt_sensor(hal, hot_sensor, &context)?,
                tid_cold: opt_sensor(hal, cold_sensor, &context)?,
                tdeadzone: delta(*deadzone_k, &context)?,
                algo: match algo {
                    MixAlgoDef::Bangbang => MixAlgo::Bangbang,
                    MixAlgoDef::Sapprox {
                        amount,
                        sample_intvl_secs,
                    } => MixAlgo::Sapprox {
                        amount: *amount,
                        sample_intvl: Ticks::from_secs(*sample_intvl_secs),
                    },
                    MixAlgoDef::Pi {
                        sample_intvl_secs,
                        ti_secs,
                        tune_f,
                        ksmax_k,
                    } => MixAlgo::Pi(PiSet {
                        sample_intvl: Ticks::from_secs(*sample_intvl_secs),
                        ti: Ticks::from_secs(*ti_secs),
                        tune_f: *tune_f,
                        ksmax: delta(*ksmax_k, &context)?,
                    }),
                },
            }),
        };
        plant.add_valve(hearth_plant::Valve::new(
            def.name.clone(),
            ValveSet {
                ete_time: Ticks::from_secs(def.ete_time_secs),
                deadband: def.deadband,
                motor,
                kind,
            },
        ));
    }

    // resolution helpers over the plant collections
    let valve_ref = |plant: &Plant, name: &Option<String>, context: &str| match name {
        None => Ok(None),
        Some(n) => plant
            .valve_id(n)
            .map(Some)
            .ok_or_else(|| BuildError::UnknownEntity {
                kind: "valve",
                name: n.clone(),
                context: context.to_string(),
            }),
    };
    let pump_ref = |plant: &mut Plant,
                    name: &Option<String>,
                    context: &str|
     -> Result<Option<PumpHandle>, BuildError> {
        match name {
            None => Ok(None),
        Some(n) => {
            let pid = plant
                .pump_id(n)
                .ok_or_else(|| BuildError::UnknownEntity {
                    kind: "pump",
                    name: n.clone(),
                    context: context.to_string(),
                })?;
            Ok(Some(plant.grab_pump(pid)?))
        }
        }
    };
    let sched_ref = |scheduler: &WeeklyScheduler, name: &Option<String>, context: &str| {
        match name {
            None => Ok(None),
            Some(n) => scheduler
                .resolve(n)
                .map(Some)
                .ok_or_else(|| BuildError::UnknownEntity {
                    kind: "schedule",
                    name: n.clone(),
                    context: context.to_string(),
                }),
        }
    };

    for def in &project.hcircuits {
        let context = format!("hcircuit {}", def.name);
        let set = HcircuitSet {
            runmode: runmode(def.runmode),
            schedid: sched_ref(&scheduler, &def.schedule, &context)?,
            params: hcircuit_params(&def.params, &context)?,
            law: TempLawBilinear {
                tout1: temp(def.law.tout1_c, &context)?,
                twater1: temp(def.law.twater1_c, &context)?,
                tout2: temp(def.law.tout2_c, &context)?,
                twater2: temp(def.law.twater2_c, &context)?,
                nh: def.law.nh,
            },
            ambient_factor: def.ambient_factor,
            wtemp_rorh: opt_delta(def.wtemp_rorh_k, &context)?,
            boost_delta: opt_delta(def.boost_delta_k, &context)?.unwrap_or_default(),
            boost_maxtime: def.boost_maxtime_mins.map(Ticks::from_mins).unwrap_or_default(),
            fast_cooldown_eco: def.fast_cooldown_eco,
            fast_cooldown_frostfree: def.fast_cooldown_frostfree,
            inoff_temp: opt_temp(def.inoff_temp_c, &context)?,
            tid_outgoing: sensor(hal, &def.outgoing_sensor, &context)?,
            tid_return: opt_sensor(hal, &def.return_sensor, &context)?,
            tid_ambient: opt_sensor(hal, &def.ambient_sensor, &context)?,
            bmodel: models
                .resolve(&def.bmodel)
                .ok_or_else(|| BuildError::UnknownEntity {
                    kind: "model",
                    name: def.bmodel.clone(),
                    context: context.clone(),
                })?,
            valve_mix: valve_ref(&plant, &def.valve, &context)?,
            pump_feed: pump_ref(&mut plant, &def.pump, &context)?,
        };
        plant.add_hcircuit(Hcircuit::new(def.name.clone(), set));
    }

    for def in &project.dhwts {
        let context = format!("dhwt {}", def.name);
        let set = DhwtSet {
            runmode: runmode(def.runmode),
            schedid: sched_ref(&scheduler, &def.schedule, &context)?,
            prio: def.prio,
            charge_prio: match def.charge_prio {
                ChargePrioDef::ParallelMax => ChargePrio::ParallelMax,
                ChargePrioDef::ParallelDhwOverride => ChargePrio::ParallelDhwOverride,
                ChargePrioDef::SlidingMax => ChargePrio::SlidingMax,
                ChargePrioDef::SlidingDhwOverride => ChargePrio::SlidingDhwOverride,
                ChargePrioDef::Absolute => ChargePrio::Absolute,
            },
            force_mode: match def.force_mode {
                ForceModeDef::Never => ForceMode::Never,
                ForceModeDef::FirstOfDay => ForceMode::FirstOfDay,
                ForceModeDef::Always => ForceMode::Always,
            },
            legionella: def
                .legionella
                .map(|l| {
                    Ok::<_, BuildError>(LegionellaSet {
                        tlegionella: temp(l.tlegionella_c, &context)?,
                        recycle: l.recycle,
                    })
                })
                .transpose()?,
            electric_hasthermostat: def.electric_hasthermostat,
            params: dhwt_params(&def.params, &context)?,
            tid_top: opt_sensor(hal, &def.top_sensor, &context)?,
            tid_bottom: opt_sensor(hal, &def.bottom_sensor, &context)?,
            tid_win: opt_sensor(hal, &def.win_sensor, &context)?,
            rid_selfheater: def
                .selfheater_relay
                .as_deref()
                .map(|n| relay(hal, n, &context))
                .transpose()?,
            pump_feed: pump_ref(&mut plant, &def.feed_pump, &context)?,
            pump_recycle: pump_ref(&mut plant, &def.recycle_pump, &context)?,
            valve_hwisol: valve_ref(&plant, &def.hwisol_valve, &context)?,
            valve_feedisol: valve_ref(&plant, &def.feedisol_valve, &context)?,
        };
        plant.add_dhwt(Dhwt::new(def.name.clone(), set));
    }

    for def in &project.heatsources {
        let context = format!("heatsource {}", def.name);
        let HeatBackendDef::Boiler {
            idle_mode,
            hysteresis_k,
            limit_thardmax_c,
            limit_tmax_c,
            limit_tmin_c,
            limit_treturnmin_c,
            t_freeze_c,
            burner_min_time_mins,
            boiler_sensor,
            return_sensor,
            burner_relay,
            load_pump,
            return_valve,
        } = &def.backend;

        let boiler = Boiler::new(
            def.name.clone(),
            BoilerSet {
                idle_mode: match idle_mode {
                    IdleModeDef::Never => IdleMode::Never,
                    IdleModeDef::FrostOnly => IdleMode::FrostOnly,
                    IdleModeDef::Always => IdleMode::Always,
                },
                hysteresis: delta(*hysteresis_k, &context)?,
                limit_thardmax: temp(*limit_thardmax_c, &context)?,
                limit_tmax: temp(*limit_tmax_c, &context)?,
                limit_tmin: temp(*limit_tmin_c, &context)?,
                limit_treturnmin: opt_temp(*limit_treturnmin_c, &context)?,
                t_freeze: temp(*t_freeze_c, &context)?,
                burner_min_time: Ticks::from_mins(*burner_min_time_mins),
                tid_boiler: sensor(hal, boiler_sensor, &context)?,
                tid_boiler_return: opt_sensor(hal, return_sensor, &context)?,
                rid_burner: relay(hal, burner_relay, &context)?,
                pump_load: pump_ref(&mut plant, load_pump, &context)?,
                valve_ret: valve_ref(&plant, return_valve, &context)?,
            },
        );
        plant.add_heatsource(HeatSource::new(
            def.name.clone(),
            HeatSourceSet {
                runmode: runmode(def.runmode),
                schedid: sched_ref(&scheduler, &def.schedule, &context)?,
                consumer_sdelay: def
                    .consumer_sdelay_mins
                    .map(Ticks::from_mins)
                    .unwrap_or(Ticks::ZERO),
            },
            Box::new(boiler),
        ));
    }

    Ok(Built {
        plant,
        models,
        scheduler,
    })
}
