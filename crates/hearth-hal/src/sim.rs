//! Simulated I/O backend.
//!
//! Stands in for the hardware board in tests and the demo daemon: an
//! in-memory table of named sensors and relays with fault injection.
//! Readings outside the physically-plausible window are reported as sensor
//! faults exactly like a real backend would (short on the low side,
//! disconnected on the high side).

use crate::io::{Inputs, Outputs, RelayError, SensorError};
use hearth_core::{RelayId, SensorId, Temp, Ticks};
use std::sync::Mutex;

/// Low cutoff: below this the probe is considered shorted.
const SHORT_CUTOFF: Temp = Temp::from_centikelvin(21815); // -55 °C
/// High cutoff: above this the probe is considered disconnected.
const DISCONNECT_CUTOFF: Temp = Temp::from_centikelvin(45315); // 180 °C

#[derive(Debug, Clone)]
struct SimSensor {
    name: String,
    value: Temp,
    time: Ticks,
    fault: Option<SensorError>,
}

#[derive(Debug, Clone)]
struct SimRelay {
    name: String,
    on: bool,
    claimed: bool,
    fail_writes: bool,
}

#[derive(Default)]
struct SimState {
    sensors: Vec<SimSensor>,
    relays: Vec<SimRelay>,
}

/// In-memory `Inputs` + `Outputs` backend.
#[derive(Default)]
pub struct SimIo {
    state: Mutex<SimState>,
}

impl SimIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensor with an initial reading at time zero.
    pub fn add_sensor(&self, name: &str, initial: Temp) -> SensorId {
        let mut st = self.state.lock().expect("sim lock");
        st.sensors.push(SimSensor {
            name: name.to_string(),
            value: initial,
            time: Ticks::ZERO,
            fault: None,
        });
        SensorId::from_index(st.sensors.len() as u32 - 1)
    }

    /// Register a relay, initially off and unclaimed.
    pub fn add_relay(&self, name: &str) -> RelayId {
        let mut st = self.state.lock().expect("sim lock");
        st.relays.push(SimRelay {
            name: name.to_string(),
            on: false,
            claimed: false,
            fail_writes: false,
        });
        RelayId::from_index(st.relays.len() as u32 - 1)
    }

    /// Update a sensor reading (clears any injected fault).
    pub fn set_temp(&self, sid: SensorId, value: Temp, now: Ticks) {
        let mut st = self.state.lock().expect("sim lock");
        let s = &mut st.sensors[sid.index() as usize];
        s.value = value;
        s.time = now;
        s.fault = None;
    }

    /// Inject a sensor fault; cleared by the next `set_temp`.
    pub fn set_fault(&self, sid: SensorId, fault: SensorError) {
        let mut st = self.state.lock().expect("sim lock");
        st.sensors[sid.index() as usize].fault = Some(fault);
    }

    /// Make subsequent writes to a relay fail (backend failure injection).
    pub fn fail_relay_writes(&self, rid: RelayId, fail: bool) {
        let mut st = self.state.lock().expect("sim lock");
        st.relays[rid.index() as usize].fail_writes = fail;
    }

    /// Observed relay state by name, for test assertions.
    pub fn relay_is_on(&self, name: &str) -> bool {
        let st = self.state.lock().expect("sim lock");
        st.relays
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.on)
            .unwrap_or(false)
    }
}

impl Inputs for SimIo {
    fn resolve(&self, name: &str) -> Option<SensorId> {
        let st = self.state.lock().expect("sim lock");
        st.sensors
            .iter()
            .position(|s| s.name == name)
            .map(|i| SensorId::from_index(i as u32))
    }

    fn temperature(&self, sid: SensorId) -> Result<Temp, SensorError> {
        let st = self.state.lock().expect("sim lock");
        let s = st
            .sensors
            .get(sid.index() as usize)
            .ok_or(SensorError::Unknown)?;
        if let Some(fault) = s.fault {
            return Err(fault);
        }
        if s.value < SHORT_CUTOFF {
            return Err(SensorError::Short);
        }
        if s.value > DISCONNECT_CUTOFF {
            return Err(SensorError::Disconnected);
        }
        Ok(s.value)
    }

    fn temperature_time(&self, sid: SensorId) -> Ticks {
        let st = self.state.lock().expect("sim lock");
        st.sensors
            .get(sid.index() as usize)
            .map(|s| s.time)
            .unwrap_or(Ticks::ZERO)
    }
}

impl Outputs for SimIo {
    fn resolve(&self, name: &str) -> Option<RelayId> {
        let st = self.state.lock().expect("sim lock");
        st.relays
            .iter()
            .position(|r| r.name == name)
            .map(|i| RelayId::from_index(i as u32))
    }

    fn grab(&self, rid: RelayId) -> Result<(), RelayError> {
        let mut st = self.state.lock().expect("sim lock");
        let r = st
            .relays
            .get_mut(rid.index() as usize)
            .ok_or(RelayError::Unknown)?;
        if r.claimed {
            return Err(RelayError::Claimed);
        }
        r.claimed = true;
        Ok(())
    }

    fn thaw(&self, rid: RelayId) {
        let mut st = self.state.lock().expect("sim lock");
        if let Some(r) = st.relays.get_mut(rid.index() as usize) {
            r.claimed = false;
        }
    }

    fn set(&self, rid: RelayId, on: bool) -> Result<(), RelayError> {
        let mut st = self.state.lock().expect("sim lock");
        let r = st
            .relays
            .get_mut(rid.index() as usize)
            .ok_or(RelayError::Unknown)?;
        if !r.claimed {
            return Err(RelayError::NotClaimed);
        }
        if r.fail_writes {
            return Err(RelayError::Backend {
                what: "injected write failure",
            });
        }
        r.on = on;
        Ok(())
    }

    fn get(&self, rid: RelayId) -> Result<bool, RelayError> {
        let st = self.state.lock().expect("sim lock");
        st.relays
            .get(rid.index() as usize)
            .map(|r| r.on)
            .ok_or(RelayError::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_read_and_fault() {
        let io = SimIo::new();
        let sid = io.add_sensor("boiler", Temp::celsius(60.0));
        assert_eq!(io.temperature(sid).unwrap(), Temp::celsius(60.0));

        io.set_fault(sid, SensorError::Stale);
        assert_eq!(io.temperature(sid), Err(SensorError::Stale));

        io.set_temp(sid, Temp::celsius(61.0), Ticks::from_secs(1));
        assert_eq!(io.temperature(sid).unwrap(), Temp::celsius(61.0));
        assert_eq!(io.temperature_time(sid), Ticks::from_secs(1));
    }

    #[test]
    fn out_of_range_readings_fault() {
        let io = SimIo::new();
        let sid = io.add_sensor("outdoor", Temp::celsius(-60.0));
        assert_eq!(io.temperature(sid), Err(SensorError::Short));
        io.set_temp(sid, Temp::celsius(200.0), Ticks::ZERO);
        assert_eq!(io.temperature(sid), Err(SensorError::Disconnected));
    }

    #[test]
    fn relay_claim_cycle() {
        let io = SimIo::new();
        let rid = io.add_relay("burner");
        // unclaimed writes rejected
        assert_eq!(io.set(rid, true), Err(RelayError::NotClaimed));

        io.grab(rid).unwrap();
        assert_eq!(io.grab(rid), Err(RelayError::Claimed));

        io.set(rid, true).unwrap();
        assert!(io.get(rid).unwrap());
        assert!(io.relay_is_on("burner"));

        io.thaw(rid);
        assert_eq!(io.set(rid, true), Err(RelayError::NotClaimed));
    }

    #[test]
    fn relay_write_failure_injection() {
        let io = SimIo::new();
        let rid = io.add_relay("pump");
        io.grab(rid).unwrap();
        io.fail_relay_writes(rid, true);
        assert!(matches!(io.set(rid, true), Err(RelayError::Backend { .. })));
    }
}
