//! Pump: binary actuator with cooldown and shared-instance semantics.
//!
//! A pump is claimed ("grabbed") by exactly one consumer, or, when marked
//! shared, hands out lightweight virtual handles that alias the same
//! physical relay. Each handle independently requests on/off plus a force
//! flag; the physical relay is driven once per tick from the arbitrated
//! state:
//!
//! - ON iff at least one handle requests ON,
//! - unless a handle that does NOT itself request ON forces: that veto
//!   wins and the pump is forced OFF immediately (cooldown bypassed).
//!
//! The optional cooldown delays only the ON→OFF transition, so short gaps
//! between consumers do not cycle the motor.

use crate::error::{PlantError, PlantResult};
use hearth_core::{PumpId, RelayId, Ticks};
use hearth_hal::Hal;
use tracing::debug;

/// Handle to a pump slot: the parent claim or one virtual alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpHandle {
    pub pump: PumpId,
    /// `None` is the parent claim; `Some(i)` the i-th virtual handle.
    virt: Option<usize>,
}

impl PumpHandle {
    pub fn parent(pump: PumpId) -> Self {
        Self { pump, virt: None }
    }
}

#[derive(Debug, Clone)]
pub struct PumpSet {
    pub rid_pump: RelayId,
    /// Delay applied to the ON→OFF transition (None: none).
    pub cooldown: Option<Ticks>,
    /// Allow multiple consumers through virtual handles.
    pub shared: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct HandleState {
    req_on: bool,
    force: bool,
}

#[derive(Debug, Default)]
struct PumpRun {
    online: bool,
    grabbed: bool,
    parent: HandleState,
    virts: Vec<HandleState>,
    /// Last observed relay state.
    actual: bool,
    /// Instant the arbitrated request last went OFF, for the cooldown.
    off_since: Option<Ticks>,
}

pub struct Pump {
    name: String,
    set: PumpSet,
    run: PumpRun,
}

impl Pump {
    pub fn new(name: impl Into<String>, set: PumpSet) -> Self {
        Self {
            name: name.into(),
            set,
            run: PumpRun::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_online(&self) -> bool {
        self.run.online
    }

    pub fn is_on(&self) -> bool {
        self.run.actual
    }

    /// Claim this pump. The first claim returns the parent handle; later
    /// claims return virtual handles on shared pumps and `Exists` on
    /// exclusive ones.
    pub fn grab(&mut self, id: PumpId) -> PlantResult<PumpHandle> {
        if !self.run.grabbed {
            self.run.grabbed = true;
            return Ok(PumpHandle::parent(id));
        }
        if !self.set.shared {
            return Err(PlantError::Exists {
                what: "pump already claimed",
            });
        }
        self.run.virts.push(HandleState::default());
        Ok(PumpHandle {
            pump: id,
            virt: Some(self.run.virts.len() - 1),
        })
    }

    /// Record a handle's desired state; hardware is only touched by `run()`.
    pub fn set_state(&mut self, handle: PumpHandle, on: bool, force: bool) -> PlantResult<()> {
        let slot = match handle.virt {
            None => &mut self.run.parent,
            Some(i) => self
                .run
                .virts
                .get_mut(i)
                .ok_or(PlantError::Invalid {
                    what: "stale virtual pump handle",
                })?,
        };
        slot.req_on = on;
        slot.force = force;
        Ok(())
    }

    /// Claim the relay and reset live state.
    pub fn online(&mut self, hal: &Hal) -> PlantResult<()> {
        hal.outputs.grab(self.set.rid_pump)?;
        self.run.online = true;
        self.run.parent = HandleState::default();
        for v in &mut self.run.virts {
            *v = HandleState::default();
        }
        self.run.actual = hal.outputs.get(self.set.rid_pump)?;
        self.run.off_since = None;
        Ok(())
    }

    /// Force the relay off and release the claim.
    pub fn offline(&mut self, hal: &Hal) -> PlantResult<()> {
        let _ = hal.outputs.set(self.set.rid_pump, false);
        hal.outputs.thaw(self.set.rid_pump);
        self.run.online = false;
        self.run.actual = false;
        Ok(())
    }

    /// Arbitrated desired state over all handles.
    fn arbitrate(&self) -> (bool, bool) {
        let handles = std::iter::once(&self.run.parent).chain(self.run.virts.iter());
        let mut any_on = false;
        let mut veto = false;
        let mut any_force = false;
        for h in handles {
            any_on |= h.req_on;
            any_force |= h.force;
            // the veto applies only when the forcing handle itself does
            // not want the pump on
            veto |= h.force && !h.req_on;
        }
        (any_on && !veto, any_force)
    }

    /// One tick: drive the relay toward the arbitrated state.
    ///
    /// Any relay-write failure forces shutdown; the caller raises the alarm.
    pub fn run(&mut self, hal: &Hal, now: Ticks) -> PlantResult<()> {
        if !self.run.online {
            return Err(PlantError::Offline { what: "pump" });
        }
        let (want, forced) = self.arbitrate();

        let effective = if want {
            self.run.off_since = None;
            true
        } else {
            // cooldown stretches the ON→OFF transition unless forced
            match (self.set.cooldown, forced) {
                (Some(cd), false) if self.run.actual => {
                    let since = *self.run.off_since.get_or_insert(now);
                    now.since(since) < cd
                }
                _ => false,
            }
        };

        if effective != self.run.actual {
            if let Err(err) = hal.outputs.set(self.set.rid_pump, effective) {
                // failsafe: try to stop the motor, report upward
                let _ = hal.outputs.set(self.set.rid_pump, false);
                self.run.actual = false;
                return Err(err.into());
            }
            debug!(pump = %self.name, on = effective, "pump state change");
            self.run.actual = effective;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_hal::SimIo;
    use std::sync::Arc;

    fn sim_hal() -> (Arc<SimIo>, Hal) {
        let io = Arc::new(SimIo::new());
        let hal = Hal::new(io.clone(), io.clone());
        (io, hal)
    }

    fn pump(io: &SimIo, shared: bool, cooldown: Option<Ticks>) -> Pump {
        let rid = io.add_relay("pump");
        Pump::new(
            "pump",
            PumpSet {
                rid_pump: rid,
                cooldown,
                shared,
            },
        )
    }

    fn pid() -> PumpId {
        PumpId::from_index(0)
    }

    #[test]
    fn exclusive_pump_rejects_second_claim() {
        let (io, _) = sim_hal();
        let mut p = pump(&io, false, None);
        let h = p.grab(pid()).unwrap();
        assert_eq!(h, PumpHandle::parent(pid()));
        assert!(matches!(p.grab(pid()), Err(PlantError::Exists { .. })));
    }

    #[test]
    fn shared_pump_hands_out_virtuals() {
        let (io, _) = sim_hal();
        let mut p = pump(&io, true, None);
        let parent = p.grab(pid()).unwrap();
        let v1 = p.grab(pid()).unwrap();
        let v2 = p.grab(pid()).unwrap();
        assert_ne!(parent, v1);
        assert_ne!(v1, v2);
    }

    #[test]
    fn any_on_turns_pump_on() {
        let (io, hal) = sim_hal();
        let mut p = pump(&io, true, None);
        let parent = p.grab(pid()).unwrap();
        let v1 = p.grab(pid()).unwrap();
        p.online(&hal).unwrap();

        p.set_state(parent, false, false).unwrap();
        p.set_state(v1, true, false).unwrap();
        p.run(&hal, Ticks::from_secs(1)).unwrap();
        assert!(io.relay_is_on("pump"));

        p.set_state(v1, false, false).unwrap();
        p.run(&hal, Ticks::from_secs(2)).unwrap();
        assert!(!io.relay_is_on("pump"));
    }

    #[test]
    fn force_off_vetoes_other_handles() {
        let (io, hal) = sim_hal();
        let mut p = pump(&io, true, None);
        let parent = p.grab(pid()).unwrap();
        let v1 = p.grab(pid()).unwrap();
        p.online(&hal).unwrap();

        // one handle wants on, another forces off without wanting on
        p.set_state(parent, true, false).unwrap();
        p.set_state(v1, false, true).unwrap();
        p.run(&hal, Ticks::from_secs(1)).unwrap();
        assert!(!io.relay_is_on("pump"), "force-off veto wins");

        // the forcing handle also wanting on is not a veto
        p.set_state(v1, true, true).unwrap();
        p.run(&hal, Ticks::from_secs(2)).unwrap();
        assert!(io.relay_is_on("pump"));
    }

    #[test]
    fn cooldown_delays_off_transition() {
        let (io, hal) = sim_hal();
        let mut p = pump(&io, false, Some(Ticks::from_secs(60)));
        let h = p.grab(pid()).unwrap();
        p.online(&hal).unwrap();

        p.set_state(h, true, false).unwrap();
        p.run(&hal, Ticks::from_secs(1)).unwrap();
        assert!(io.relay_is_on("pump"));

        p.set_state(h, false, false).unwrap();
        p.run(&hal, Ticks::from_secs(2)).unwrap();
        assert!(io.relay_is_on("pump"), "cooldown holds the pump on");

        p.run(&hal, Ticks::from_secs(30)).unwrap();
        assert!(io.relay_is_on("pump"));

        p.run(&hal, Ticks::from_secs(63)).unwrap();
        assert!(!io.relay_is_on("pump"), "cooldown elapsed");
    }

    #[test]
    fn forced_off_bypasses_cooldown() {
        let (io, hal) = sim_hal();
        let mut p = pump(&io, false, Some(Ticks::from_secs(60)));
        let h = p.grab(pid()).unwrap();
        p.online(&hal).unwrap();

        p.set_state(h, true, false).unwrap();
        p.run(&hal, Ticks::from_secs(1)).unwrap();
        p.set_state(h, false, true).unwrap();
        p.run(&hal, Ticks::from_secs(2)).unwrap();
        assert!(!io.relay_is_on("pump"));
    }

    #[test]
    fn relay_failure_forces_shutdown() {
        let (io, hal) = sim_hal();
        let mut p = pump(&io, false, None);
        let h = p.grab(pid()).unwrap();
        p.online(&hal).unwrap();

        io.fail_relay_writes(hearth_hal::Outputs::resolve(&*io, "pump").unwrap(), true);
        p.set_state(h, true, false).unwrap();
        assert!(matches!(
            p.run(&hal, Ticks::from_secs(1)),
            Err(PlantError::Relay(_))
        ));
        assert!(!p.is_on());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // shared OR/veto arbitration over arbitrary handle states
            #[test]
            fn shared_or_veto(states in prop::collection::vec((any::<bool>(), any::<bool>()), 1..6)) {
                let (io, hal) = sim_hal();
                let mut p = pump(&io, true, None);
                let mut handles = vec![p.grab(pid()).unwrap()];
                for _ in 1..states.len() {
                    handles.push(p.grab(pid()).unwrap());
                }
                p.online(&hal).unwrap();

                for (h, &(on, force)) in handles.iter().zip(&states) {
                    p.set_state(*h, on, force).unwrap();
                }
                p.run(&hal, Ticks::from_secs(1)).unwrap();

                let any_on = states.iter().any(|&(on, _)| on);
                let veto = states.iter().any(|&(on, force)| force && !on);
                prop_assert_eq!(io.relay_is_on("pump"), any_on && !veto);
            }
        }
    }
}
