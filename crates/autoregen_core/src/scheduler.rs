//! # Cycle Scheduler
//!
//! The regeneration timeline of one volume as an explicit state machine.
//!
//! ## States
//!
//! - **Idle**: countdown of `interval - warning_lead` ticks is armed.
//!   With a zero lead the countdown ends straight in Executing.
//! - **AwaitingWarning**: countdown elapsed, pending timing adopted (transitional).
//! - **WarningSent**: warning emitted, execution due after `warning_lead` ticks.
//! - **Executing**: a pass is running; `complete()` returns to Idle.
//!
//! ## Determinism
//!
//! Time only advances through [`CycleScheduler::tick`], one tick per call,
//! and at most one event is emitted per tick. Execution can never precede
//! its own warning because both are states of the same timeline; under a
//! zero lead they share a tick and the warning goes out first.

use crate::error::{RegenError, RegenResult};

/// Interval and warning lead of a cycle, in ticks.
///
/// Execution always lands `interval` ticks after the countdown was armed.
/// With a zero lead no separate warning tick exists: the execution event
/// itself stands for the warning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleTiming {
    interval_ticks: u64,
    warning_lead_ticks: u64,
}

impl CycleTiming {
    /// Creates a timing.
    ///
    /// # Errors
    ///
    /// Returns [`RegenError::InvalidConfig`] unless `interval > 0` and
    /// `warning_lead < interval`.
    pub fn new(interval_ticks: u64, warning_lead_ticks: u64) -> RegenResult<Self> {
        if interval_ticks == 0 {
            return Err(RegenError::InvalidConfig("interval must be at least one tick".into()));
        }
        if warning_lead_ticks >= interval_ticks {
            return Err(RegenError::InvalidConfig(format!(
                "warning lead ({warning_lead_ticks} ticks) must be shorter than the interval ({interval_ticks} ticks)"
            )));
        }
        Ok(Self {
            interval_ticks,
            warning_lead_ticks,
        })
    }

    /// Full cycle length.
    #[must_use]
    pub const fn interval_ticks(&self) -> u64 {
        self.interval_ticks
    }

    /// Time between the warning and the execution.
    #[must_use]
    pub const fn warning_lead_ticks(&self) -> u64 {
        self.warning_lead_ticks
    }

    /// Idle countdown before the warning.
    #[must_use]
    pub const fn countdown_ticks(&self) -> u64 {
        self.interval_ticks - self.warning_lead_ticks
    }
}

impl Default for CycleTiming {
    /// Two hours with a ten minute warning, at 20 ticks per second.
    fn default() -> Self {
        Self {
            interval_ticks: 120 * 60 * 20,
            warning_lead_ticks: 10 * 60 * 20,
        }
    }
}

/// Position of a volume in its regeneration cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    /// Waiting for the countdown.
    Idle,
    /// Countdown elapsed, warning about to be sent.
    AwaitingWarning,
    /// Warning sent, waiting for the lead time.
    WarningSent,
    /// A restore pass is running.
    Executing,
}

impl CycleState {
    /// Human-readable state name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AwaitingWarning => "AWAITING_WARNING",
            Self::WarningSent => "WARNING_SENT",
            Self::Executing => "EXECUTING",
        }
    }
}

/// What started an execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleTrigger {
    /// The timer reached the execution tick.
    Scheduled,
    /// An administrator forced a run.
    Forced,
}

/// Event emitted by [`CycleScheduler::tick`] or [`CycleScheduler::force`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleEvent {
    /// Broadcast the warning; execution follows in `lead_ticks`.
    Warning {
        /// Cycle number.
        cycle: u64,
        /// Ticks until execution.
        lead_ticks: u64,
    },
    /// Run the protection oracle and the restore pass now.
    ///
    /// A scheduled execution under a zero lead was not preceded by a
    /// `Warning`; the receiver warns first.
    Execute {
        /// Cycle number.
        cycle: u64,
        /// Why the pass runs.
        trigger: CycleTrigger,
    },
}

/// Tick-driven regeneration timeline.
pub struct CycleScheduler {
    /// Current state.
    state: CycleState,
    /// Timing of the current cycle.
    timing: CycleTiming,
    /// Timing adopted when the scheduler next leaves Idle.
    pending: Option<CycleTiming>,
    /// Ticks elapsed since creation.
    now: u64,
    /// Tick at which the current state's wait ends.
    deadline: Option<u64>,
    /// Number of the current (or last) cycle.
    cycle: u64,
    /// False once cancelled: no further countdowns are armed.
    armed: bool,
}

impl CycleScheduler {
    /// Creates an idle, unarmed scheduler.
    #[must_use]
    pub fn new(timing: CycleTiming) -> Self {
        Self {
            state: CycleState::Idle,
            timing,
            pending: None,
            now: 0,
            deadline: None,
            cycle: 0,
            armed: false,
        }
    }

    /// Arms the countdown from the current tick.
    pub fn start(&mut self) {
        self.armed = true;
        if self.state == CycleState::Idle {
            self.deadline = Some(self.now + self.timing.countdown_ticks());
        }
    }

    /// Cancels whatever is pending: countdown, warning lead or re-arm.
    ///
    /// An executing pass is not interrupted; once it completes the
    /// scheduler stays idle.
    pub fn cancel(&mut self) {
        self.armed = false;
        self.deadline = None;
        if matches!(self.state, CycleState::AwaitingWarning | CycleState::WarningSent) {
            self.state = CycleState::Idle;
        }
    }

    /// Stores new timing for the next cycle. An in-flight cycle keeps its own.
    pub fn reconfigure(&mut self, timing: CycleTiming) {
        self.pending = Some(timing);
    }

    /// Advances one tick.
    pub fn tick(&mut self) -> Option<CycleEvent> {
        self.now += 1;
        let due = self.deadline.is_some_and(|d| self.now >= d);

        match self.state {
            CycleState::Idle if due => {
                self.state = CycleState::AwaitingWarning;
                self.adopt_pending();
                if self.timing.warning_lead_ticks() == 0 {
                    self.cycle += 1;
                    Some(self.begin_execution(CycleTrigger::Scheduled))
                } else {
                    Some(self.send_warning())
                }
            }
            CycleState::AwaitingWarning => Some(self.send_warning()),
            CycleState::WarningSent if due => Some(self.begin_execution(CycleTrigger::Scheduled)),
            _ => None,
        }
    }

    /// Starts an execution immediately.
    ///
    /// A cycle that already sent its warning is executed early under its
    /// own number.
    ///
    /// # Errors
    ///
    /// Returns [`RegenError::CycleInFlight`] while a pass is executing.
    pub fn force(&mut self) -> RegenResult<CycleEvent> {
        match self.state {
            CycleState::Executing => Err(RegenError::CycleInFlight { cycle: self.cycle }),
            CycleState::Idle => {
                self.adopt_pending();
                self.cycle += 1;
                Ok(self.begin_execution(CycleTrigger::Forced))
            }
            CycleState::AwaitingWarning | CycleState::WarningSent => {
                Ok(self.begin_execution(CycleTrigger::Forced))
            }
        }
    }

    /// Marks the executing pass finished and re-arms the countdown.
    ///
    /// # Errors
    ///
    /// Returns [`RegenError::NoCycleInFlight`] if nothing is executing.
    pub fn complete(&mut self) -> RegenResult<()> {
        if self.state != CycleState::Executing {
            return Err(RegenError::NoCycleInFlight);
        }
        self.state = CycleState::Idle;
        self.deadline = self.armed.then(|| self.now + self.timing.countdown_ticks());
        Ok(())
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> CycleState {
        self.state
    }

    /// Number of the current (or last) cycle; `0` before the first.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Ticks elapsed since creation.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.now
    }

    /// Timing of the current cycle.
    #[must_use]
    pub const fn timing(&self) -> CycleTiming {
        self.timing
    }

    /// Returns true until [`CycleScheduler::cancel`] is called.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Ticks until the next warning or execution, `None` if nothing is pending.
    #[must_use]
    pub fn ticks_until_next_event(&self) -> Option<u64> {
        self.deadline.map(|d| d.saturating_sub(self.now))
    }

    fn adopt_pending(&mut self) {
        if let Some(timing) = self.pending.take() {
            tracing::info!(
                "Adopting new cycle timing: interval {} ticks, warning {} ticks",
                timing.interval_ticks(),
                timing.warning_lead_ticks()
            );
            self.timing = timing;
        }
    }

    fn send_warning(&mut self) -> CycleEvent {
        self.cycle += 1;
        self.state = CycleState::WarningSent;
        self.deadline = Some(self.now + self.timing.warning_lead_ticks());
        CycleEvent::Warning {
            cycle: self.cycle,
            lead_ticks: self.timing.warning_lead_ticks(),
        }
    }

    fn begin_execution(&mut self, trigger: CycleTrigger) -> CycleEvent {
        self.state = CycleState::Executing;
        self.deadline = None;
        CycleEvent::Execute {
            cycle: self.cycle,
            trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(interval: u64, lead: u64) -> CycleScheduler {
        let mut s = CycleScheduler::new(CycleTiming::new(interval, lead).unwrap());
        s.start();
        s
    }

    /// Ticks up to `last_tick`, completing executions immediately.
    fn run_until(s: &mut CycleScheduler, last_tick: u64) -> Vec<(u64, CycleEvent)> {
        let mut events = Vec::new();
        while s.now() < last_tick {
            if let Some(event) = s.tick() {
                if matches!(event, CycleEvent::Execute { .. }) {
                    s.complete().unwrap();
                }
                events.push((s.now(), event));
            }
        }
        events
    }

    #[test]
    fn test_interval_60_warning_5() {
        let mut s = scheduler(60, 5);
        let events = run_until(&mut s, 119);

        assert_eq!(
            events,
            vec![
                (55, CycleEvent::Warning { cycle: 1, lead_ticks: 5 }),
                (60, CycleEvent::Execute { cycle: 1, trigger: CycleTrigger::Scheduled }),
                (115, CycleEvent::Warning { cycle: 2, lead_ticks: 5 }),
            ]
        );
    }

    #[test]
    fn test_states_along_the_timeline() {
        let mut s = scheduler(10, 3);
        for _ in 0..6 {
            assert_eq!(s.tick(), None);
            assert_eq!(s.state(), CycleState::Idle);
        }
        assert!(matches!(s.tick(), Some(CycleEvent::Warning { .. })));
        assert_eq!(s.state(), CycleState::WarningSent);
        assert_eq!(s.ticks_until_next_event(), Some(3));
        s.tick();
        s.tick();
        assert!(matches!(s.tick(), Some(CycleEvent::Execute { .. })));
        assert_eq!(s.state(), CycleState::Executing);
        assert_eq!(s.ticks_until_next_event(), None);

        // Nothing happens while executing, however long the pass takes
        for _ in 0..50 {
            assert_eq!(s.tick(), None);
        }
        s.complete().unwrap();
        assert_eq!(s.state(), CycleState::Idle);
        assert_eq!(s.ticks_until_next_event(), Some(7));
    }

    #[test]
    fn test_force_rejected_while_executing() {
        let mut s = scheduler(10, 2);
        let event = s.force().unwrap();
        assert_eq!(event, CycleEvent::Execute { cycle: 1, trigger: CycleTrigger::Forced });

        assert!(matches!(s.force(), Err(RegenError::CycleInFlight { cycle: 1 })));
        s.complete().unwrap();
        assert!(matches!(s.complete(), Err(RegenError::NoCycleInFlight)));
    }

    #[test]
    fn test_force_after_warning_keeps_cycle_number() {
        let mut s = scheduler(10, 5);
        let events = run_until(&mut s, 5);
        assert_eq!(events, vec![(5, CycleEvent::Warning { cycle: 1, lead_ticks: 5 })]);

        assert_eq!(s.force().unwrap(), CycleEvent::Execute { cycle: 1, trigger: CycleTrigger::Forced });
        // The scheduled execution of cycle 1 never fires on its own
        for _ in 0..10 {
            assert_eq!(s.tick(), None);
        }
        s.complete().unwrap();
        assert_eq!(s.cycle(), 1);
    }

    #[test]
    fn test_reconfigure_applies_to_next_cycle() {
        let mut s = scheduler(20, 5);
        run_until(&mut s, 15); // warning for cycle 1 at tick 15
        s.reconfigure(CycleTiming::new(100, 10).unwrap());

        let events = run_until(&mut s, 200);
        assert_eq!(
            events,
            vec![
                // Cycle 1 finishes under the old lead
                (20, CycleEvent::Execute { cycle: 1, trigger: CycleTrigger::Scheduled }),
                // Countdown armed at completion still uses the old timing
                (35, CycleEvent::Warning { cycle: 2, lead_ticks: 10 }),
                (45, CycleEvent::Execute { cycle: 2, trigger: CycleTrigger::Scheduled }),
                (135, CycleEvent::Warning { cycle: 3, lead_ticks: 10 }),
                (145, CycleEvent::Execute { cycle: 3, trigger: CycleTrigger::Scheduled }),
            ]
        );
    }

    #[test]
    fn test_cancel_stops_everything() {
        let mut s = scheduler(10, 3);
        run_until(&mut s, 7);
        assert_eq!(s.state(), CycleState::WarningSent);

        s.cancel();
        assert_eq!(s.state(), CycleState::Idle);
        for _ in 0..100 {
            assert_eq!(s.tick(), None);
        }
    }

    #[test]
    fn test_cancel_during_execution_does_not_rearm() {
        let mut s = scheduler(10, 3);
        s.force().unwrap();
        s.cancel();
        assert_eq!(s.state(), CycleState::Executing);

        s.complete().unwrap();
        assert_eq!(s.ticks_until_next_event(), None);
        assert!(!s.is_armed());
    }

    #[test]
    fn test_zero_lead_keeps_the_interval() {
        let mut s = scheduler(4, 0);
        let events = run_until(&mut s, 12);
        assert_eq!(
            events,
            vec![
                (4, CycleEvent::Execute { cycle: 1, trigger: CycleTrigger::Scheduled }),
                (8, CycleEvent::Execute { cycle: 2, trigger: CycleTrigger::Scheduled }),
                (12, CycleEvent::Execute { cycle: 3, trigger: CycleTrigger::Scheduled }),
            ]
        );
    }

    #[test]
    fn test_reconfigure_to_zero_lead() {
        let mut s = scheduler(10, 2);
        s.reconfigure(CycleTiming::new(6, 0).unwrap());

        let events = run_until(&mut s, 14);
        assert_eq!(
            events,
            vec![
                // Old countdown ends, the zero lead is adopted on leaving Idle
                (8, CycleEvent::Execute { cycle: 1, trigger: CycleTrigger::Scheduled }),
                (14, CycleEvent::Execute { cycle: 2, trigger: CycleTrigger::Scheduled }),
            ]
        );
    }

    #[test]
    fn test_invalid_timing() {
        assert!(CycleTiming::new(0, 0).is_err());
        assert!(CycleTiming::new(10, 10).is_err());
        assert_eq!(CycleTiming::new(10, 4).unwrap().countdown_ticks(), 6);
    }
}
