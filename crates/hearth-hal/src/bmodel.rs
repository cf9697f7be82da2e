//! Building model: outdoor-temperature smoothing and season flags.
//!
//! Each model smooths one outdoor sensor over the building's thermal time
//! constant and derives the summer/frost flags consumed by heating
//! circuits. Fields are atomics: the I/O polling thread updates them while
//! the control loop reads individual scalars, tolerating skew between
//! fields sampled within one tick.
//!
//! Smoothed temperatures persist across restarts; the raw reading does not.

use crate::io::{Inputs, SensorError};
use crate::storage::{self, Storage, StorageResult};
use hearth_core::{ModelId, SensorId, Temp, TempDiff, Ticks, expw_mavg};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Frost untrip margin above the configured threshold.
const FROST_HYSTERESIS: TempDiff = TempDiff::from_centikelvin(100); // 1 K

#[derive(Debug, Clone)]
pub struct ModelSet {
    pub name: String,
    pub tid_outdoor: SensorId,
    /// Building thermal time constant.
    pub tau: Ticks,
    /// Above this (all smoothed signals) the building is in summer mode.
    pub limit_tsummer: Temp,
    /// At or below this the frost flag trips.
    pub limit_tfrost: Temp,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct ModelBlob {
    t_filt: Temp,
    t_mix: Temp,
    t_att: Temp,
}

/// One building model instance.
pub struct BuildingModel {
    set: ModelSet,
    online: AtomicBool,
    t_out: AtomicI32,
    t_filt: AtomicI32,
    t_mix: AtomicI32,
    t_att: AtomicI32,
    summer: AtomicBool,
    frost: AtomicBool,
    last_time: AtomicU64,
}

impl BuildingModel {
    pub fn new(set: ModelSet) -> Self {
        Self {
            set,
            online: AtomicBool::new(false),
            t_out: AtomicI32::new(Temp::ZERO_C.centikelvin()),
            t_filt: AtomicI32::new(Temp::ZERO_C.centikelvin()),
            t_mix: AtomicI32::new(Temp::ZERO_C.centikelvin()),
            t_att: AtomicI32::new(Temp::ZERO_C.centikelvin()),
            summer: AtomicBool::new(false),
            frost: AtomicBool::new(false),
            last_time: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.set.name
    }

    pub fn tau(&self) -> Ticks {
        self.set.tau
    }

    fn storage_key(&self) -> String {
        format!("bmodel_{}", self.set.name)
    }

    /// Validate the sensor, seed the smoothed signals (restoring persisted
    /// values when available) and mark the model online.
    pub fn online(
        &self,
        inputs: &dyn Inputs,
        store: &dyn Storage,
        now: Ticks,
    ) -> Result<(), SensorError> {
        let t = inputs.temperature(self.set.tid_outdoor)?;
        self.t_out.store(t.centikelvin(), Ordering::Relaxed);

        match storage::fetch_json::<ModelBlob>(store, &self.storage_key()) {
            Ok(Some(blob)) => {
                debug!(model = %self.set.name, "restored smoothed outdoor temperatures");
                self.t_filt.store(blob.t_filt.centikelvin(), Ordering::Relaxed);
                self.t_mix.store(blob.t_mix.centikelvin(), Ordering::Relaxed);
                self.t_att.store(blob.t_att.centikelvin(), Ordering::Relaxed);
            }
            Ok(None) => {
                self.t_filt.store(t.centikelvin(), Ordering::Relaxed);
                self.t_mix.store(t.centikelvin(), Ordering::Relaxed);
                self.t_att.store(t.centikelvin(), Ordering::Relaxed);
            }
            Err(err) => {
                // storage is best-effort: seed from the live reading
                warn!(model = %self.set.name, %err, "building model restore failed");
                self.t_filt.store(t.centikelvin(), Ordering::Relaxed);
                self.t_mix.store(t.centikelvin(), Ordering::Relaxed);
                self.t_att.store(t.centikelvin(), Ordering::Relaxed);
            }
        }

        self.last_time.store(now.as_millis(), Ordering::Relaxed);
        self.update_flags();
        self.online.store(true, Ordering::Release);
        Ok(())
    }

    /// One smoothing step from the current outdoor reading.
    pub fn run(&self, inputs: &dyn Inputs, now: Ticks) -> Result<(), SensorError> {
        let t = inputs.temperature(self.set.tid_outdoor)?;
        let last = Ticks::from_millis(self.last_time.load(Ordering::Relaxed));
        let dt = now.since(last);
        self.last_time.store(now.as_millis(), Ordering::Relaxed);

        self.t_out.store(t.centikelvin(), Ordering::Relaxed);

        let filt = expw_mavg(self.outdoor_filtered(), t, self.set.tau, dt);
        self.t_filt.store(filt.centikelvin(), Ordering::Relaxed);

        let mix = Temp::from_centikelvin((t.centikelvin() + filt.centikelvin()) / 2);
        self.t_mix.store(mix.centikelvin(), Ordering::Relaxed);

        let att = expw_mavg(self.outdoor_attenuated(), filt, self.set.tau, dt);
        self.t_att.store(att.centikelvin(), Ordering::Relaxed);

        self.update_flags();
        Ok(())
    }

    fn update_flags(&self) {
        let t_out = self.outdoor();
        let t_mix = self.outdoor_mixed();
        let t_att = self.outdoor_attenuated();

        // summer trips/untrips only when every signal agrees; disagreement
        // holds the previous state
        if t_out > self.set.limit_tsummer
            && t_mix > self.set.limit_tsummer
            && t_att > self.set.limit_tsummer
        {
            self.summer.store(true, Ordering::Relaxed);
        } else if t_out <= self.set.limit_tsummer
            && t_mix <= self.set.limit_tsummer
            && t_att <= self.set.limit_tsummer
        {
            self.summer.store(false, Ordering::Relaxed);
        }

        if t_out <= self.set.limit_tfrost {
            self.frost.store(true, Ordering::Relaxed);
        } else if t_out >= self.set.limit_tfrost + FROST_HYSTERESIS {
            self.frost.store(false, Ordering::Relaxed);
        }
    }

    /// Persist the smoothed signals.
    pub fn save(&self, store: &dyn Storage) -> StorageResult<()> {
        let blob = ModelBlob {
            t_filt: self.outdoor_filtered(),
            t_mix: self.outdoor_mixed(),
            t_att: self.outdoor_attenuated(),
        };
        storage::store_json(store, &self.storage_key(), &blob)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn outdoor(&self) -> Temp {
        Temp::from_centikelvin(self.t_out.load(Ordering::Relaxed))
    }

    pub fn outdoor_filtered(&self) -> Temp {
        Temp::from_centikelvin(self.t_filt.load(Ordering::Relaxed))
    }

    pub fn outdoor_mixed(&self) -> Temp {
        Temp::from_centikelvin(self.t_mix.load(Ordering::Relaxed))
    }

    pub fn outdoor_attenuated(&self) -> Temp {
        Temp::from_centikelvin(self.t_att.load(Ordering::Relaxed))
    }

    pub fn summer(&self) -> bool {
        self.summer.load(Ordering::Relaxed)
    }

    pub fn frost(&self) -> bool {
        self.frost.load(Ordering::Relaxed)
    }
}

/// Owning collection of building models, indexed by `ModelId`.
#[derive(Default)]
pub struct Models {
    models: Vec<BuildingModel>,
}

impl Models {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, set: ModelSet) -> ModelId {
        self.models.push(BuildingModel::new(set));
        ModelId::from_index(self.models.len() as u32 - 1)
    }

    pub fn resolve(&self, name: &str) -> Option<ModelId> {
        self.models
            .iter()
            .position(|m| m.name() == name)
            .map(|i| ModelId::from_index(i as u32))
    }

    pub fn get(&self, mid: ModelId) -> Option<&BuildingModel> {
        self.models.get(mid.index() as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildingModel> {
        self.models.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimIo;
    use crate::storage::MemStore;

    fn model_with(io: &SimIo, initial_c: f64) -> (BuildingModel, SensorId) {
        let tid = io.add_sensor("outdoor", Temp::celsius(initial_c));
        let set = ModelSet {
            name: "house".into(),
            tid_outdoor: tid,
            tau: Ticks::from_hours(10),
            limit_tsummer: Temp::celsius(18.0),
            limit_tfrost: Temp::celsius(3.0),
        };
        (BuildingModel::new(set), tid)
    }

    #[test]
    fn online_seeds_from_sensor() {
        let io = SimIo::new();
        let store = MemStore::new();
        let (model, _) = model_with(&io, 10.0);
        model.online(&io, &store, Ticks::ZERO).unwrap();
        assert!(model.is_online());
        assert_eq!(model.outdoor_filtered(), Temp::celsius(10.0));
        assert_eq!(model.outdoor_mixed(), Temp::celsius(10.0));
    }

    #[test]
    fn smoothed_signals_lag_raw() {
        let io = SimIo::new();
        let store = MemStore::new();
        let (model, tid) = model_with(&io, 10.0);
        model.online(&io, &store, Ticks::ZERO).unwrap();

        io.set_temp(tid, Temp::celsius(20.0), Ticks::from_mins(10));
        model.run(&io, Ticks::from_mins(10)).unwrap();

        assert_eq!(model.outdoor(), Temp::celsius(20.0));
        assert!(model.outdoor_filtered() < Temp::celsius(20.0));
        assert!(model.outdoor_filtered() > Temp::celsius(10.0));
        assert!(model.outdoor_mixed() > model.outdoor_filtered());
    }

    #[test]
    fn frost_hysteresis() {
        let io = SimIo::new();
        let store = MemStore::new();
        let (model, tid) = model_with(&io, 10.0);
        model.online(&io, &store, Ticks::ZERO).unwrap();
        assert!(!model.frost());

        io.set_temp(tid, Temp::celsius(3.0), Ticks::from_mins(1));
        model.run(&io, Ticks::from_mins(1)).unwrap();
        assert!(model.frost());

        // inside the hysteresis band: stays tripped
        io.set_temp(tid, Temp::celsius(3.5), Ticks::from_mins(2));
        model.run(&io, Ticks::from_mins(2)).unwrap();
        assert!(model.frost());

        io.set_temp(tid, Temp::celsius(4.0), Ticks::from_mins(3));
        model.run(&io, Ticks::from_mins(3)).unwrap();
        assert!(!model.frost());
    }

    #[test]
    fn save_restore_round_trip_bit_identical() {
        let io = SimIo::new();
        let store = MemStore::new();
        let (model, tid) = model_with(&io, 10.0);
        model.online(&io, &store, Ticks::ZERO).unwrap();

        io.set_temp(tid, Temp::celsius(17.3), Ticks::from_mins(30));
        model.run(&io, Ticks::from_mins(30)).unwrap();
        model.save(&store).unwrap();

        let (restored, _) = {
            let tid2 = io.resolve("outdoor").unwrap();
            let set = ModelSet {
                name: "house".into(),
                tid_outdoor: tid2,
                tau: Ticks::from_hours(10),
                limit_tsummer: Temp::celsius(18.0),
                limit_tfrost: Temp::celsius(3.0),
            };
            (BuildingModel::new(set), tid2)
        };
        restored.online(&io, &store, Ticks::from_mins(30)).unwrap();

        assert_eq!(restored.outdoor_filtered(), model.outdoor_filtered());
        assert_eq!(restored.outdoor_mixed(), model.outdoor_mixed());
        assert_eq!(restored.outdoor_attenuated(), model.outdoor_attenuated());
    }

    #[test]
    fn summer_requires_all_signals() {
        let io = SimIo::new();
        let store = MemStore::new();
        let (model, tid) = model_with(&io, 10.0);
        model.online(&io, &store, Ticks::ZERO).unwrap();

        // raw jumps above the limit but smoothed signals still lag below
        io.set_temp(tid, Temp::celsius(25.0), Ticks::from_mins(1));
        model.run(&io, Ticks::from_mins(1)).unwrap();
        assert!(!model.summer());

        // after a long stretch every signal converges above the limit
        let mut now = Ticks::from_mins(1);
        for _ in 0..200 {
            now += Ticks::from_hours(1);
            io.set_temp(tid, Temp::celsius(25.0), now);
            model.run(&io, now).unwrap();
        }
        assert!(model.summer());
    }
}
