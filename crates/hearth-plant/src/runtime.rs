//! Runtime: owns the plant and its collaborators and drives the loop.
//!
//! The control thread calls [`Runtime::tick`] once per fixed period. The
//! runtime advances the weekly scheduler from the wall clock, steps the
//! building models, runs the plant, emits tiered log snapshots and
//! periodically persists the building-model state.

use crate::ctx::TickCtx;
use crate::error::PlantResult;
use crate::plant::Plant;
use chrono::{Datelike, Timelike};
use hearth_core::{RunMode, Ticks};
use hearth_hal::{
    AlarmEntry, AlarmLog, Hal, LogSink, LogTier, LogValue, Models, Storage, WeeklyScheduler,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Persist building-model state this often.
const BMODEL_SAVE_PERIOD: Ticks = Ticks::from_mins(15);

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Control loop period.
    pub tick_period: Ticks,
    /// Mode for entities in `Auto` with no applicable schedule.
    pub default_runmode: RunMode,
    pub default_dhwmode: RunMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_period: Ticks::from_secs(1),
            default_runmode: RunMode::Frostfree,
            default_dhwmode: RunMode::Frostfree,
        }
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    plant: Plant,
    hal: Hal,
    scheduler: WeeklyScheduler,
    models: Models,
    alarms: AlarmLog,
    storage: Arc<dyn Storage>,
    sink: Option<Arc<dyn LogSink>>,
    log_last: [Option<Ticks>; 3],
    save_last: Option<Ticks>,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        plant: Plant,
        hal: Hal,
        scheduler: WeeklyScheduler,
        models: Models,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            config,
            plant,
            hal,
            scheduler,
            models,
            alarms: AlarmLog::new(),
            storage,
            sink: None,
            log_last: [None; 3],
            save_last: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn tick_period(&self) -> Ticks {
        self.config.tick_period
    }

    pub fn plant(&self) -> &Plant {
        &self.plant
    }

    pub fn models(&self) -> &Models {
        &self.models
    }

    /// Bring the models and the plant online. Returns the number of
    /// entities that failed bring-up (each already alarmed).
    pub fn online(&mut self, now: Ticks) -> PlantResult<usize> {
        let mut failures = 0usize;
        for model in self.models.iter() {
            if let Err(err) = model.online(&*self.hal.inputs, &*self.storage, now) {
                failures += 1;
                warn!(model = %model.name(), %err, "building model bring-up failed");
            }
        }
        // ctx is built field-wise so the plant stays mutably borrowable
        let ctx = TickCtx {
            now,
            day_ordinal: chrono::Local::now().ordinal(),
            hal: &self.hal,
            scheduler: &self.scheduler,
            models: &self.models,
            alarms: &self.alarms,
            default_runmode: self.config.default_runmode,
            default_dhwmode: self.config.default_dhwmode,
        };
        let plant_failures = self.plant.online(&ctx)?;
        Ok(failures + plant_failures)
    }

    pub fn offline(&mut self, now: Ticks) {
        let ctx = TickCtx {
            now,
            day_ordinal: chrono::Local::now().ordinal(),
            hal: &self.hal,
            scheduler: &self.scheduler,
            models: &self.models,
            alarms: &self.alarms,
            default_runmode: self.config.default_runmode,
            default_dhwmode: self.config.default_dhwmode,
        };
        self.plant.offline(&ctx);
        for model in self.models.iter() {
            if let Err(err) = model.save(&*self.storage) {
                warn!(model = %model.name(), %err, "building model save failed");
            }
        }
        info!("runtime offline");
    }

    /// One control tick. Returns the alarms raised during the tick.
    pub fn tick(&mut self, now: Ticks) -> PlantResult<Vec<AlarmEntry>> {
        // scheduler boundary: advance the active weekly entries
        let local = chrono::Local::now();
        let weekday = local.weekday().num_days_from_monday() as u8;
        let minute = (local.hour() * 60 + local.minute()) as u16;
        self.scheduler.tick(weekday, minute);

        // building models feed every consumer below
        for model in self.models.iter().filter(|m| m.is_online()) {
            if let Err(err) = model.run(&*self.hal.inputs, now) {
                warn!(model = %model.name(), %err, "building model update failed");
            }
        }

        let ctx = TickCtx {
            now,
            day_ordinal: local.ordinal(),
            hal: &self.hal,
            scheduler: &self.scheduler,
            models: &self.models,
            alarms: &self.alarms,
            default_runmode: self.config.default_runmode,
            default_dhwmode: self.config.default_dhwmode,
        };
        self.plant.run(&ctx)?;

        self.emit_logs(now);
        self.persist(now);
        Ok(self.alarms.drain())
    }

    fn persist(&mut self, now: Ticks) {
        let due = match self.save_last {
            None => true,
            Some(t) => now.since(t) >= BMODEL_SAVE_PERIOD,
        };
        if !due {
            return;
        }
        self.save_last = Some(now);
        for model in self.models.iter().filter(|m| m.is_online()) {
            if let Err(err) = model.save(&*self.storage) {
                warn!(model = %model.name(), %err, "building model save failed");
            }
        }
    }

    fn emit_logs(&mut self, now: Ticks) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        for (i, tier) in [LogTier::Fast, LogTier::Medium, LogTier::Slow]
            .into_iter()
            .enumerate()
        {
            let due = match self.log_last[i] {
                None => true,
                Some(t) => now.since(t) >= tier.period(),
            };
            if !due {
                continue;
            }
            self.log_last[i] = Some(now);
            match tier {
                // fast tier: actuators
                LogTier::Fast => {
                    for valve in self.plant.valves() {
                        sink.append(
                            tier,
                            valve.name(),
                            &[("position", LogValue::Int(i64::from(valve.position())))],
                        );
                    }
                    for pump in self.plant.pumps() {
                        sink.append(tier, pump.name(), &[("on", LogValue::Bool(pump.is_on()))]);
                    }
                }
                // medium tier: consumers and sources
                LogTier::Medium => {
                    for circuit in self.plant.hcircuits() {
                        let mut values = vec![(
                            "target_wtemp",
                            LogValue::Temp(circuit.target_wtemp()),
                        )];
                        if let Some(req) = circuit.heat_request() {
                            values.push(("heat_request", LogValue::Temp(req)));
                        }
                        sink.append(tier, circuit.name(), &values);
                    }
                    for dhwt in self.plant.dhwts() {
                        sink.append(
                            tier,
                            dhwt.name(),
                            &[
                                ("charging", LogValue::Bool(dhwt.is_charging())),
                                ("target", LogValue::Temp(dhwt.target())),
                            ],
                        );
                    }
                    for hs in self.plant.heatsources() {
                        sink.append(
                            tier,
                            hs.name(),
                            &[("failed", LogValue::Bool(hs.has_failed()))],
                        );
                    }
                }
                // slow tier: plant-wide state
                LogTier::Slow => {
                    let pdata = self.plant.pdata();
                    sink.append(
                        tier,
                        "plant",
                        &[
                            ("could_sleep", LogValue::Bool(pdata.could_sleep)),
                            ("overtemp", LogValue::Bool(pdata.overtemp)),
                            ("shift_crit", LogValue::Int(i64::from(pdata.shift_crit))),
                            (
                                "shift_noncrit",
                                LogValue::Int(i64::from(pdata.shift_noncrit)),
                            ),
                            (
                                "dhwt_currprio",
                                LogValue::Int(i64::from(pdata.dhwt_currprio)),
                            ),
                            ("summer_maint", LogValue::Bool(pdata.summer_maint)),
                        ],
                    );
                }
            }
        }
    }
}
