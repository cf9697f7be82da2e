//! Plant aggregator: owns every entity, arbitrates heat requests and runs
//! the fixed-order control tick.
//!
//! Tick order (a correctness requirement, not a convenience): DHW tanks →
//! heating circuits → request collection → summer-maintenance evaluation →
//! dispatch → heat sources → valves → pumps. Consumers must have posted
//! their requests before the source reacts, and actuators execute last with
//! maximum information.
//!
//! Bring-up order: pumps → valves → circuits → DHWTs → heat sources
//! (actuators before consumers before sources); offline reverses to
//! circuits → DHWTs → heat sources → valves → pumps.

use crate::ctx::{Actuators, TickCtx};
use crate::dhwt::Dhwt;
use crate::error::{PlantError, PlantResult};
use crate::hcircuit::Hcircuit;
use crate::heatsource::HeatSource;
use crate::params::{DhwtParams, HcircuitParams};
use crate::pdata::PlantData;
use crate::pump::{Pump, PumpHandle};
use crate::valve::Valve;
use hearth_core::{PumpId, Temp, Ticks, ValveId};
use tracing::{debug, info, warn};

/// Non-critical consumer shift applied while a sliding-priority DHWT
/// charge is in effect, percent.
const SLIDING_SHIFT: i16 = -50;

#[derive(Debug, Clone, Copy)]
pub struct SummerMaint {
    /// How often the exercise window recurs.
    pub interval: Ticks,
    /// How long actuators are exercised; time-boxed because the window
    /// bypasses normal control and safety interlocks.
    pub duration: Ticks,
}

#[derive(Debug, Clone)]
pub struct PlantSet {
    /// No circuit request within this window means the plant could sleep.
    pub sleeping_delay: Ticks,
    pub summer_maintenance: Option<SummerMaint>,
    pub def_hcircuit: HcircuitParams,
    pub def_dhwt: DhwtParams,
}

impl Default for PlantSet {
    fn default() -> Self {
        Self {
            sleeping_delay: Ticks::from_hours(2),
            summer_maintenance: None,
            def_hcircuit: HcircuitParams::default(),
            def_dhwt: DhwtParams::default(),
        }
    }
}

#[derive(Debug, Default)]
struct PlantRun {
    online: bool,
    last_creqtime: Option<Ticks>,
    /// Start of the current summer-maintenance window.
    summer_since: Option<Ticks>,
    /// End instant of the last completed window.
    last_summer_run: Option<Ticks>,
    consumer_sdelay_until: Option<Ticks>,
    final_request: Option<Temp>,
}

/// The whole plant. Collections are append-only at config time; indices
/// stay stable for the plant's lifetime.
pub struct Plant {
    set: PlantSet,
    pumps: Vec<Pump>,
    valves: Vec<Valve>,
    hcircuits: Vec<Hcircuit>,
    dhwts: Vec<Dhwt>,
    heatsources: Vec<HeatSource>,
    pdata: PlantData,
    run: PlantRun,
}

impl Plant {
    pub fn new(set: PlantSet) -> Self {
        Self {
            set,
            pumps: Vec::new(),
            valves: Vec::new(),
            hcircuits: Vec::new(),
            dhwts: Vec::new(),
            heatsources: Vec::new(),
            pdata: PlantData::default(),
            run: PlantRun::default(),
        }
    }

    pub fn add_pump(&mut self, pump: Pump) -> PumpId {
        self.pumps.push(pump);
        PumpId::from_index(self.pumps.len() as u32 - 1)
    }

    pub fn add_valve(&mut self, valve: Valve) -> ValveId {
        self.valves.push(valve);
        ValveId::from_index(self.valves.len() as u32 - 1)
    }

    pub fn add_hcircuit(&mut self, hcircuit: Hcircuit) {
        self.hcircuits.push(hcircuit);
    }

    pub fn add_dhwt(&mut self, dhwt: Dhwt) {
        self.dhwts.push(dhwt);
    }

    pub fn add_heatsource(&mut self, hs: HeatSource) {
        self.heatsources.push(hs);
    }

    pub fn pump_id(&self, name: &str) -> Option<PumpId> {
        self.pumps
            .iter()
            .position(|p| p.name() == name)
            .map(|i| PumpId::from_index(i as u32))
    }

    pub fn valve_id(&self, name: &str) -> Option<ValveId> {
        self.valves
            .iter()
            .position(|v| v.name() == name)
            .map(|i| ValveId::from_index(i as u32))
    }

    /// Claim a pump for a consumer at config time.
    pub fn grab_pump(&mut self, id: PumpId) -> PlantResult<PumpHandle> {
        self.pumps
            .get_mut(id.index() as usize)
            .ok_or(PlantError::Invalid {
                what: "unknown pump id",
            })?
            .grab(id)
    }

    pub fn pdata(&self) -> &PlantData {
        &self.pdata
    }

    pub fn is_online(&self) -> bool {
        self.run.online
    }

    pub fn hcircuits(&self) -> &[Hcircuit] {
        &self.hcircuits
    }

    pub fn dhwts(&self) -> &[Dhwt] {
        &self.dhwts
    }

    pub fn heatsources(&self) -> &[HeatSource] {
        &self.heatsources
    }

    pub fn valves(&self) -> &[Valve] {
        &self.valves
    }

    pub fn pumps(&self) -> &[Pump] {
        &self.pumps
    }

    /// Arbitrated request posted to the heat sources this tick.
    pub fn final_request(&self) -> Option<Temp> {
        self.run.final_request
    }

    /// Bring everything online, actuators first. Individual failures are
    /// alarmed and skipped so one misconfigured entity does not take down
    /// the rest; returns the number of failures.
    pub fn online(&mut self, ctx: &TickCtx) -> PlantResult<usize> {
        let mut failures = 0usize;

        for pump in &mut self.pumps {
            if let Err(err) = pump.online(ctx.hal) {
                failures += 1;
                warn!(pump = %pump.name(), %err, "pump bring-up failed");
                ctx.warn(format!("pump {}: bring-up failed: {err}", pump.name()));
            }
        }
        for valve in &mut self.valves {
            if let Err(err) = valve.online(ctx.hal, ctx.now) {
                failures += 1;
                warn!(valve = %valve.name(), %err, "valve bring-up failed");
                ctx.warn(format!("valve {}: bring-up failed: {err}", valve.name()));
            }
        }
        for circuit in &mut self.hcircuits {
            if let Err(err) = circuit.online(ctx, &self.set.def_hcircuit) {
                failures += 1;
                warn!(circuit = %circuit.name(), %err, "hcircuit bring-up failed");
                ctx.warn(format!(
                    "circuit {}: bring-up failed: {err}",
                    circuit.name()
                ));
            }
        }
        for dhwt in &mut self.dhwts {
            if let Err(err) = dhwt.online(ctx, &self.set.def_dhwt) {
                failures += 1;
                warn!(dhwt = %dhwt.name(), %err, "dhwt bring-up failed");
                ctx.warn(format!("dhwt {}: bring-up failed: {err}", dhwt.name()));
            }
        }
        for hs in &mut self.heatsources {
            if let Err(err) = hs.online(ctx) {
                failures += 1;
                warn!(source = %hs.name(), %err, "heat source bring-up failed");
                ctx.warn(format!("heat source {}: bring-up failed: {err}", hs.name()));
            }
        }

        // the relaxed priority bound is the least urgent value configured
        let maxprio = self
            .dhwts
            .iter()
            .filter(|d| d.is_online())
            .map(|d| d.prio())
            .max()
            .unwrap_or(0);
        self.pdata.dhwt_maxprio = maxprio;
        self.pdata.dhwt_currprio = maxprio;

        self.run = PlantRun {
            online: true,
            last_creqtime: Some(ctx.now),
            ..PlantRun::default()
        };
        info!(failures, "plant online");
        Ok(failures)
    }

    /// Take everything offline, consumers first, actuators last.
    pub fn offline(&mut self, ctx: &TickCtx) {
        for circuit in &mut self.hcircuits {
            let _ = circuit.offline();
        }
        for dhwt in &mut self.dhwts {
            let _ = dhwt.offline(ctx);
        }
        for hs in &mut self.heatsources {
            let _ = hs.offline(ctx);
        }
        for valve in &mut self.valves {
            let _ = valve.offline(ctx.hal);
        }
        for pump in &mut self.pumps {
            let _ = pump.offline(ctx.hal);
        }
        self.run.online = false;
        info!("plant offline");
    }

    /// One control tick in the fixed order.
    pub fn run(&mut self, ctx: &TickCtx) -> PlantResult<()> {
        if !self.run.online {
            return Err(PlantError::Offline { what: "plant" });
        }
        let pdata = self.pdata;

        // 1. DHW tanks
        {
            let (dhwts, valves, pumps) = (&mut self.dhwts, &mut self.valves, &mut self.pumps);
            for dhwt in dhwts.iter_mut().filter(|d| d.is_online()) {
                let mut acts = Actuators {
                    valves: valves.as_mut_slice(),
                    pumps: pumps.as_mut_slice(),
                };
                let res = dhwt
                    .logic(ctx, &pdata)
                    .and_then(|()| dhwt.run(ctx, &pdata, &mut acts));
                if let Err(err) = res {
                    ctx.critical(format!("dhwt {}: {err}", dhwt.name()));
                }
            }
        }

        // 2. heating circuits
        {
            let (hcircuits, valves, pumps) =
                (&mut self.hcircuits, &mut self.valves, &mut self.pumps);
            for circuit in hcircuits.iter_mut().filter(|c| c.is_online()) {
                let mut acts = Actuators {
                    valves: valves.as_mut_slice(),
                    pumps: pumps.as_mut_slice(),
                };
                let res = circuit
                    .logic(ctx, &pdata)
                    .and_then(|()| circuit.run(ctx, &pdata, &mut acts));
                if let Err(err) = res {
                    ctx.critical(format!("circuit {}: {err}", circuit.name()));
                }
            }
        }

        // 3..5. arbitration, maintenance evaluation, dispatch
        let mut next = self.collect_heat_requests(ctx);
        self.summer_maintenance(ctx, &mut next);
        self.dispatch_heat_requests();

        // 6. heat sources
        {
            let (heatsources, valves, pumps) =
                (&mut self.heatsources, &mut self.valves, &mut self.pumps);
            for hs in heatsources.iter_mut().filter(|h| h.is_online()) {
                let mut acts = Actuators {
                    valves: valves.as_mut_slice(),
                    pumps: pumps.as_mut_slice(),
                };
                // failures latch hs.failed and have raised their alarm
                let _ = hs.run_tick(ctx, &pdata, &mut acts);
            }
        }

        // heat-source outputs complete the next tick's plant data
        let mut any_ok = false;
        let mut overtemp = false;
        let mut shift_crit = 0i16;
        let mut shift_noncrit = next.shift_noncrit;
        for hs in self.heatsources.iter().filter(|h| h.is_online()) {
            if !hs.has_failed() {
                any_ok = true;
            }
            overtemp |= hs.is_overtemp();
            shift_crit = shift_crit.min(hs.cshift_crit()).max(-100);
            shift_noncrit = shift_noncrit.min(hs.cshift_noncrit());
            if hs.is_overtemp() {
                shift_crit = 100;
            }
        }
        next.overtemp = overtemp;
        next.shift_crit = shift_crit;
        next.shift_noncrit = shift_noncrit;
        next.hs_allfailed = !self.heatsources.is_empty() && !any_ok;
        if next.hs_allfailed && !pdata.hs_allfailed {
            ctx.critical("all heat sources failed".to_string());
        }

        // single pdata write per tick
        self.pdata = next;

        // 7. valves
        for valve in self.valves.iter_mut().filter(|v| v.is_online()) {
            if let Err(err) = valve.run(ctx.hal, ctx.now) {
                ctx.critical(format!("valve {}: {err}", valve.name()));
            }
        }
        // 8. pumps
        for pump in self.pumps.iter_mut().filter(|p| p.is_online()) {
            if let Err(err) = pump.run(ctx.hal, ctx.now) {
                ctx.critical(format!("pump {}: {err}", pump.name()));
            }
        }
        Ok(())
    }

    /// Gather circuit and DHW requests, arbitrate priorities and assemble
    /// the next tick's plant data block.
    fn collect_heat_requests(&mut self, ctx: &TickCtx) -> PlantData {
        let now = ctx.now;
        let mut next = PlantData {
            dhwt_maxprio: self.pdata.dhwt_maxprio,
            dhwt_currprio: self.pdata.dhwt_currprio,
            ..PlantData::default()
        };

        // circuit demand and sleep detection
        let mut creq: Option<Temp> = None;
        for circuit in self.hcircuits.iter().filter(|c| c.is_online()) {
            if let Some(req) = circuit.heat_request() {
                creq = Some(creq.map_or(req, |r| r.max(req)));
            }
        }
        if creq.is_some() {
            self.run.last_creqtime = Some(now);
        }
        next.could_sleep = match self.run.last_creqtime {
            Some(t) => now.since(t) >= self.set.sleeping_delay,
            None => true,
        };

        // DHW demand, priority categories and the charging-priority ratchet
        let mut dreq: Option<Temp> = None;
        let mut override_req: Option<Temp> = None;
        let mut min_charging_prio: Option<u8> = None;
        let mut untripped = false;
        for dhwt in self.dhwts.iter_mut().filter(|d| d.is_online()) {
            if let Some(req) = dhwt.heat_request() {
                dreq = Some(dreq.map_or(req, |r| r.max(req)));
            }
            if dhwt.is_charging() && !dhwt.is_electric() {
                let cp = dhwt.charge_prio();
                next.dhwc_absolute |= cp.is_absolute();
                next.dhwc_sliding |= cp.is_sliding();
                if cp.overrides_request() {
                    if let Some(req) = dhwt.heat_request() {
                        override_req = Some(override_req.map_or(req, |r| r.max(req)));
                    }
                }
                min_charging_prio = Some(
                    min_charging_prio.map_or(dhwt.prio(), |p: u8| p.min(dhwt.prio())),
                );
            }
            untripped |= dhwt.take_untrip();
        }

        match min_charging_prio {
            // ratchet straight down to the most urgent charging tank
            Some(p) => next.dhwt_currprio = next.dhwt_currprio.min(p),
            // no heat-source-fed charge: relax one step per tick
            None => {
                if next.dhwt_currprio < next.dhwt_maxprio {
                    next.dhwt_currprio += 1;
                }
            }
        }

        if next.dhwc_sliding {
            next.shift_noncrit = SLIDING_SHIFT;
        }

        // a DHWT untrip arms the consumer stop-delay window
        if untripped {
            let sdelay = self
                .heatsources
                .iter()
                .map(|h| h.consumer_sdelay())
                .max()
                .unwrap_or(Ticks::ZERO);
            if !sdelay.is_zero() {
                self.run.consumer_sdelay_until = Some(now + sdelay);
            }
        }
        if let Some(until) = self.run.consumer_sdelay_until {
            if now < until {
                next.consumer_sdelay = until.since(now);
            } else {
                self.run.consumer_sdelay_until = None;
            }
        }

        // final arbitrated request
        self.run.final_request = if next.dhwc_absolute {
            dreq
        } else if let Some(req) = override_req {
            Some(req)
        } else {
            match (creq, dreq) {
                (Some(c), Some(d)) => Some(c.max(d)),
                (c, d) => c.or(d),
            }
        };
        debug!(request = ?self.run.final_request, "heat requests collected");
        next
    }

    /// Periodic, time-boxed actuator exercise when the whole plant sleeps
    /// through the summer.
    fn summer_maintenance(&mut self, ctx: &TickCtx, next: &mut PlantData) {
        let Some(maint) = self.set.summer_maintenance else {
            return;
        };
        let now = ctx.now;

        let mut any_circuit = false;
        let mut all_summer = true;
        for circuit in self.hcircuits.iter().filter(|c| c.is_online()) {
            any_circuit = true;
            all_summer &= ctx
                .models
                .get(circuit.bmodel())
                .map(|m| m.summer())
                .unwrap_or(false);
        }
        let all_summer = any_circuit && all_summer;

        if !(next.could_sleep && all_summer) {
            self.run.summer_since = None;
            return;
        }

        match self.run.summer_since {
            Some(start) => {
                if now.since(start) < maint.duration {
                    next.summer_maint = true;
                } else {
                    self.run.summer_since = None;
                    self.run.last_summer_run = Some(now);
                }
            }
            None => {
                let due = match self.run.last_summer_run {
                    None => true,
                    Some(t) => now.since(t) >= maint.interval,
                };
                if due {
                    info!("summer maintenance window opens");
                    self.run.summer_since = Some(now);
                    next.summer_maint = true;
                }
            }
        }
    }

    /// Forward the arbitrated request to the heat sources.
    fn dispatch_heat_requests(&mut self) {
        let request = self.run.final_request;
        for hs in self.heatsources.iter_mut().filter(|h| h.is_online()) {
            let _ = hs.dispatch(request);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhwt::{ChargePrio, DhwtSet, ForceMode};
    use crate::params::DhwtParamsOvr;
    use hearth_core::{RunMode, TempDiff};
    use hearth_hal::{AlarmLog, Hal, Models, SimIo, WeeklyScheduler};
    use std::sync::Arc;

    struct Rig {
        io: Arc<SimIo>,
        hal: Hal,
        scheduler: WeeklyScheduler,
        models: Models,
        alarms: AlarmLog,
    }

    impl Rig {
        fn new() -> Self {
            let io = Arc::new(SimIo::new());
            let hal = Hal::new(io.clone(), io.clone());
            Self {
                io,
                hal,
                scheduler: WeeklyScheduler::new(),
                models: Models::new(),
                alarms: AlarmLog::new(),
            }
        }

        fn ctx(&self, now: Ticks) -> TickCtx<'_> {
            TickCtx {
                now,
                day_ordinal: 1,
                hal: &self.hal,
                scheduler: &self.scheduler,
                models: &self.models,
                alarms: &self.alarms,
                default_runmode: RunMode::Comfort,
                default_dhwmode: RunMode::Comfort,
            }
        }
    }

    fn add_tank(rig: &Rig, plant: &mut Plant, name: &str, prio: u8, cprio: ChargePrio, temp_c: f64) {
        let tid = rig.io.add_sensor(&format!("{name}_bottom"), Temp::celsius(temp_c));
        plant.add_dhwt(Dhwt::new(
            name,
            DhwtSet {
                runmode: RunMode::Comfort,
                schedid: None,
                prio,
                charge_prio: cprio,
                force_mode: ForceMode::Never,
                legionella: None,
                electric_hasthermostat: false,
                params: DhwtParamsOvr {
                    hysteresis: Some(TempDiff::kelvin(5.0)),
                    ..Default::default()
                },
                tid_top: None,
                tid_bottom: Some(tid),
                tid_win: None,
                rid_selfheater: None,
                pump_feed: None,
                pump_recycle: None,
                valve_hwisol: None,
                valve_feedisol: None,
            },
        ));
    }

    #[test]
    fn priority_threshold_converges_and_relaxes() {
        let rig = Rig::new();
        let mut plant = Plant::new(PlantSet::default());
        // three tanks, priorities 1..3, all cold (all want to charge)
        add_tank(&rig, &mut plant, "t1", 1, ChargePrio::ParallelMax, 30.0);
        add_tank(&rig, &mut plant, "t2", 2, ChargePrio::ParallelMax, 30.0);
        add_tank(&rig, &mut plant, "t3", 3, ChargePrio::ParallelMax, 30.0);

        let ctx = rig.ctx(Ticks::ZERO);
        assert_eq!(plant.online(&ctx).unwrap(), 0);
        assert_eq!(plant.pdata().dhwt_maxprio, 3);
        assert_eq!(plant.pdata().dhwt_currprio, 3);

        // tick 1: every tank trips (threshold 3 admits all), the ratchet
        // then converges to the most urgent charging priority
        plant.run(&rig.ctx(Ticks::from_secs(1))).unwrap();
        assert_eq!(plant.pdata().dhwt_currprio, 1);

        // warm every tank: charges untrip, threshold relaxes 1/tick
        for name in ["t1", "t2", "t3"] {
            let tid = hearth_hal::Inputs::resolve(&*rig.io, &format!("{name}_bottom")).unwrap();
            rig.io.set_temp(tid, Temp::celsius(60.0), Ticks::from_secs(2));
        }
        // every charge untrips this tick, so relaxation begins: +1 per tick
        plant.run(&rig.ctx(Ticks::from_secs(2))).unwrap();
        assert_eq!(plant.pdata().dhwt_currprio, 2);
        plant.run(&rig.ctx(Ticks::from_secs(3))).unwrap();
        assert_eq!(plant.pdata().dhwt_currprio, 3);
        // bounded by the online-time maximum
        plant.run(&rig.ctx(Ticks::from_secs(4))).unwrap();
        assert_eq!(plant.pdata().dhwt_currprio, 3);
    }

    #[test]
    fn absolute_priority_blocks_circuit_requests() {
        let rig = Rig::new();
        let mut plant = Plant::new(PlantSet::default());
        add_tank(&rig, &mut plant, "t1", 0, ChargePrio::Absolute, 30.0);

        let ctx = rig.ctx(Ticks::ZERO);
        plant.online(&ctx).unwrap();

        plant.run(&rig.ctx(Ticks::from_secs(1))).unwrap();
        // charging tank present -> absolute flag on next pdata
        assert!(plant.pdata().dhwc_absolute);
        let req = plant.final_request().unwrap();
        assert_eq!(req, Temp::celsius(55.0) + TempDiff::kelvin(10.0));
    }

    #[test]
    fn sliding_priority_sets_noncrit_shift() {
        let rig = Rig::new();
        let mut plant = Plant::new(PlantSet::default());
        add_tank(&rig, &mut plant, "t1", 0, ChargePrio::SlidingMax, 30.0);

        plant.online(&rig.ctx(Ticks::ZERO)).unwrap();
        plant.run(&rig.ctx(Ticks::from_secs(1))).unwrap();
        assert!(plant.pdata().dhwc_sliding);
        assert_eq!(plant.pdata().shift_noncrit, SLIDING_SHIFT);
    }

    #[test]
    fn could_sleep_requires_quiet_window() {
        let rig = Rig::new();
        let mut plant = Plant::new(PlantSet {
            sleeping_delay: Ticks::from_mins(30),
            ..Default::default()
        });
        plant.online(&rig.ctx(Ticks::ZERO)).unwrap();

        plant.run(&rig.ctx(Ticks::from_secs(1))).unwrap();
        assert!(!plant.pdata().could_sleep, "inside the sleeping delay");

        plant.run(&rig.ctx(Ticks::from_mins(31))).unwrap();
        assert!(plant.pdata().could_sleep, "no requests for the whole window");
    }

    #[test]
    fn offline_is_idempotent_and_stops_run() {
        let rig = Rig::new();
        let mut plant = Plant::new(PlantSet::default());
        plant.online(&rig.ctx(Ticks::ZERO)).unwrap();
        let ctx = rig.ctx(Ticks::from_secs(1));
        plant.offline(&ctx);
        plant.offline(&ctx);
        assert!(matches!(
            plant.run(&rig.ctx(Ticks::from_secs(2))),
            Err(PlantError::Offline { .. })
        ));
    }
}
