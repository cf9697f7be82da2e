//! Weekly time-of-day scheduler.
//!
//! A boundary thread periodically calls [`WeeklyScheduler::tick`] with the
//! current weekday and minute-of-day; it publishes the index of the active
//! entry per schedule with a release store. The control loop reads it with
//! an acquire load and never mutates schedule state, so no lock is needed on
//! the consumer side.

use hearth_core::{RunMode, ScheduleId};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Currently-active schedule parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedParams {
    /// Heating-circuit run mode for this slot.
    pub runmode: Option<RunMode>,
    /// DHW tank run mode for this slot.
    pub dhwmode: Option<RunMode>,
    /// Request an anti-legionella charge during this slot.
    pub legionella: bool,
    /// Run the DHW recycle pump during this slot.
    pub recycle: bool,
}

/// One weekly schedule entry.
#[derive(Debug, Clone, Copy)]
pub struct SchedEntry {
    /// 0 = Monday .. 6 = Sunday.
    pub weekday: u8,
    /// Minutes since midnight, 0..1440.
    pub minute_of_day: u16,
    pub params: SchedParams,
}

impl SchedEntry {
    fn week_minute(&self) -> u32 {
        self.weekday as u32 * 1440 + self.minute_of_day as u32
    }
}

/// Read-only schedule lookup as seen by the control loop.
pub trait Scheduler: Send + Sync {
    /// The currently-active entry, `None` if unconfigured or empty.
    fn active(&self, sid: ScheduleId) -> Option<SchedParams>;
}

const NO_ENTRY: usize = usize::MAX;

struct Schedule {
    name: String,
    /// Sorted by week minute.
    entries: Vec<SchedEntry>,
    /// Index of the active entry, `NO_ENTRY` before the first tick.
    current: AtomicUsize,
}

/// Owning scheduler: entries fixed at config time, active index advanced by
/// a boundary thread.
#[derive(Default)]
pub struct WeeklyScheduler {
    schedules: Vec<Schedule>,
}

impl WeeklyScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schedule; entries are sorted by week position.
    pub fn add_schedule(&mut self, name: &str, mut entries: Vec<SchedEntry>) -> ScheduleId {
        entries.sort_by_key(|e| e.week_minute());
        self.schedules.push(Schedule {
            name: name.to_string(),
            entries,
            current: AtomicUsize::new(NO_ENTRY),
        });
        ScheduleId::from_index(self.schedules.len() as u32 - 1)
    }

    pub fn resolve(&self, name: &str) -> Option<ScheduleId> {
        self.schedules
            .iter()
            .position(|s| s.name == name)
            .map(|i| ScheduleId::from_index(i as u32))
    }

    /// Advance every schedule to the entry active at the given week position.
    ///
    /// The active entry is the latest one at or before now, wrapping to the
    /// last entry of the week when now precedes the first entry.
    pub fn tick(&self, weekday: u8, minute_of_day: u16) {
        let now = weekday as u32 * 1440 + minute_of_day as u32;
        for sched in &self.schedules {
            if sched.entries.is_empty() {
                continue;
            }
            let idx = match sched
                .entries
                .iter()
                .rposition(|e| e.week_minute() <= now)
            {
                Some(i) => i,
                // before the week's first entry: the last entry still applies
                None => sched.entries.len() - 1,
            };
            sched.current.store(idx, Ordering::Release);
        }
    }
}

impl Scheduler for WeeklyScheduler {
    fn active(&self, sid: ScheduleId) -> Option<SchedParams> {
        let sched = self.schedules.get(sid.index() as usize)?;
        let idx = sched.current.load(Ordering::Acquire);
        if idx == NO_ENTRY {
            return None;
        }
        sched.entries.get(idx).map(|e| e.params)
    }
}
