//! Project structural validation.

use crate::schema::{ProjectDef, ValveKindDef};
use std::collections::HashSet;

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Duplicate name: {name} in {context}")]
    DuplicateName { name: String, context: String },

    #[error("Missing reference: {name} in {context}")]
    MissingReference { name: String, context: String },

    #[error("Invalid value: {field} ({reason})")]
    InvalidValue { field: String, reason: String },
}

fn unique<'a>(
    names: impl Iterator<Item = &'a str>,
    context: &str,
) -> Result<HashSet<&'a str>, ValidationError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ValidationError::DuplicateName {
                name: name.to_string(),
                context: context.to_string(),
            });
        }
    }
    Ok(seen)
}

fn check_ref(
    name: &Option<String>,
    set: &HashSet<&str>,
    context: &str,
) -> Result<(), ValidationError> {
    if let Some(name) = name {
        if !set.contains(name.as_str()) {
            return Err(ValidationError::MissingReference {
                name: name.clone(),
                context: context.to_string(),
            });
        }
    }
    Ok(())
}

pub fn validate_project(project: &ProjectDef) -> Result<(), ValidationError> {
    let models = unique(project.models.iter().map(|m| m.name.as_str()), "models")?;
    let schedules = unique(
        project.schedules.iter().map(|s| s.name.as_str()),
        "schedules",
    )?;
    let pumps = unique(project.pumps.iter().map(|p| p.name.as_str()), "pumps")?;
    let valves = unique(project.valves.iter().map(|v| v.name.as_str()), "valves")?;
    unique(project.hcircuits.iter().map(|c| c.name.as_str()), "hcircuits")?;
    unique(project.dhwts.iter().map(|d| d.name.as_str()), "dhwts")?;
    unique(
        project.heatsources.iter().map(|h| h.name.as_str()),
        "heatsources",
    )?;

    for sched in &project.schedules {
        for entry in &sched.entries {
            if entry.weekday > 6 {
                return Err(ValidationError::InvalidValue {
                    field: format!("schedule {} weekday", sched.name),
                    reason: "must be 0..=6".to_string(),
                });
            }
            if entry.hour > 23 || entry.minute > 59 {
                return Err(ValidationError::InvalidValue {
                    field: format!("schedule {} time", sched.name),
                    reason: "hour 0..=23, minute 0..=59".to_string(),
                });
            }
        }
    }

    for valve in &project.valves {
        if valve.ete_time_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: format!("valve {} ete_time_secs", valve.name),
                reason: "must be positive".to_string(),
            });
        }
        if let ValveKindDef::Mix { deadzone_k, .. } = &valve.kind {
            if *deadzone_k < 0.0 || !deadzone_k.is_finite() {
                return Err(ValidationError::InvalidValue {
                    field: format!("valve {} deadzone_k", valve.name),
                    reason: "must be finite and non-negative".to_string(),
                });
            }
        }
    }

    for circuit in &project.hcircuits {
        let context = format!("hcircuit {}", circuit.name);
        if !models.contains(circuit.bmodel.as_str()) {
            return Err(ValidationError::MissingReference {
                name: circuit.bmodel.clone(),
                context,
            });
        }
        check_ref(&circuit.schedule, &schedules, &context_of(&circuit.name))?;
        check_ref(&circuit.valve, &valves, &context_of(&circuit.name))?;
        check_ref(&circuit.pump, &pumps, &context_of(&circuit.name))?;
        if circuit.law.nh < 1.0 || !circuit.law.nh.is_finite() {
            return Err(ValidationError::InvalidValue {
                field: format!("hcircuit {} law.nh", circuit.name),
                reason: "must be >= 1".to_string(),
            });
        }
    }

    for dhwt in &project.dhwts {
        let context = context_of(&dhwt.name);
        check_ref(&dhwt.schedule, &schedules, &context)?;
        check_ref(&dhwt.feed_pump, &pumps, &context)?;
        check_ref(&dhwt.recycle_pump, &pumps, &context)?;
        check_ref(&dhwt.hwisol_valve, &valves, &context)?;
        check_ref(&dhwt.feedisol_valve, &valves, &context)?;
        if dhwt.top_sensor.is_none() && dhwt.bottom_sensor.is_none() {
            return Err(ValidationError::InvalidValue {
                field: format!("dhwt {}", dhwt.name),
                reason: "needs at least one tank sensor".to_string(),
            });
        }
    }

    for hs in &project.heatsources {
        let context = context_of(&hs.name);
        check_ref(&hs.schedule, &schedules, &context)?;
        let crate::schema::HeatBackendDef::Boiler {
            load_pump,
            return_valve,
            hysteresis_k,
            ..
        } = &hs.backend;
        check_ref(load_pump, &pumps, &context)?;
        check_ref(return_valve, &valves, &context)?;
        if *hysteresis_k <= 0.0 || !hysteresis_k.is_finite() {
            return Err(ValidationError::InvalidValue {
                field: format!("heatsource {} hysteresis_k", hs.name),
                reason: "must be positive".to_string(),
            });
        }
    }

    Ok(())
}

fn context_of(name: &str) -> String {
    format!("entity {name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::*;

    fn minimal() -> ProjectDef {
        ProjectDef {
            name: "test".into(),
            defaults: DefaultsDef::default(),
            sleeping_delay_mins: 120,
            summer_maintenance: None,
            models: vec![ModelDef {
                name: "house".into(),
                outdoor_sensor: "outdoor".into(),
                tau_hours: 10,
                limit_tsummer_c: 18.0,
                limit_tfrost_c: 3.0,
            }],
            schedules: vec![],
            pumps: vec![],
            valves: vec![],
            hcircuits: vec![],
            dhwts: vec![],
            heatsources: vec![],
        }
    }

    #[test]
    fn minimal_project_validates() {
        assert!(validate_project(&minimal()).is_ok());
    }

    #[test]
    fn duplicate_model_rejected() {
        let mut p = minimal();
        p.models.push(p.models[0].clone());
        assert!(matches!(
            validate_project(&p),
            Err(ValidationError::DuplicateName { .. })
        ));
    }

    #[test]
    fn missing_bmodel_reference_rejected() {
        let mut p = minimal();
        p.hcircuits.push(HcircuitDef {
            name: "c".into(),
            runmode: RunModeDef::Auto,
            schedule: None,
            bmodel: "nope".into(),
            law: BilinearLawDef {
                tout1_c: -5.0,
                twater1_c: 60.0,
                tout2_c: 15.0,
                twater2_c: 25.0,
                nh: 1.0,
            },
            params: HcircuitParamsDef::default(),
            ambient_factor: 0,
            wtemp_rorh_k: None,
            boost_delta_k: None,
            boost_maxtime_mins: None,
            fast_cooldown_eco: false,
            fast_cooldown_frostfree: false,
            inoff_temp_c: None,
            outgoing_sensor: "outgoing".into(),
            return_sensor: None,
            ambient_sensor: None,
            valve: None,
            pump: None,
        });
        assert!(matches!(
            validate_project(&p),
            Err(ValidationError::MissingReference { .. })
        ));
    }

    #[test]
    fn dhwt_without_sensors_rejected() {
        let mut p = minimal();
        p.dhwts.push(DhwtDef {
            name: "t".into(),
            runmode: RunModeDef::Auto,
            schedule: None,
            prio: 0,
            charge_prio: ChargePrioDef::ParallelMax,
            force_mode: ForceModeDef::Never,
            legionella: None,
            electric_hasthermostat: false,
            params: DhwtParamsDef::default(),
            top_sensor: None,
            bottom_sensor: None,
            win_sensor: None,
            selfheater_relay: None,
            feed_pump: None,
            recycle_pump: None,
            hwisol_valve: None,
            feedisol_valve: None,
        });
        assert!(matches!(
            validate_project(&p),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn bad_schedule_time_rejected() {
        let mut p = minimal();
        p.schedules.push(ScheduleDef {
            name: "s".into(),
            entries: vec![SchedEntryDef {
                weekday: 7,
                hour: 0,
                minute: 0,
                runmode: None,
                dhwmode: None,
                legionella: false,
                recycle: false,
            }],
        });
        assert!(matches!(
            validate_project(&p),
            Err(ValidationError::InvalidValue { .. })
        ));
    }
}
