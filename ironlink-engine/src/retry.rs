/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Back-pressure-aware retry of multi-step operations.
//!
//! A [`UnitOfWork`] is an ordered list of continuations plus a cursor; state
//! lives in the unit, not the stack, so a back-pressured step resumes exactly
//! where it left off on a later pass. Because steps may run more than once
//! before succeeding, every side-effecting continuation must be idempotent or
//! replay-safe.

use ironlink_core::types::{CorrelationId, Offer};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;

/// Result of invoking a single continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// The step's side effect landed; advance to the next step.
    Complete,
    /// The downstream sink refused the work; re-attempt this step later.
    BackPressured,
    /// The step cannot proceed this pass; re-attempt later without progress.
    Abort,
}

impl From<Offer> for StepResult {
    fn from(offer: Offer) -> Self {
        match offer {
            Offer::Published(_) => Self::Complete,
            Offer::BackPressured => Self::BackPressured,
        }
    }
}

/// Result handed back to a fragment handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The fragment was consumed.
    Continue,
    /// The fragment was not consumed and will be redelivered.
    Abort,
}

/// A single resumable step within a unit of work.
pub type Continuation = Box<dyn FnMut() -> StepResult>;

/// An ordered sequence of continuations executed with at-least-once retry
/// semantics per step.
pub struct UnitOfWork {
    steps: SmallVec<[Continuation; 4]>,
    cursor: usize,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("steps", &self.steps.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl UnitOfWork {
    /// Creates a unit of work from its continuations.
    #[must_use]
    pub fn new(steps: Vec<Continuation>) -> Self {
        Self {
            steps: SmallVec::from_vec(steps),
            cursor: 0,
        }
    }

    /// Returns true once every continuation has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// Invokes continuations in order starting from the cursor.
    ///
    /// Runs until every remaining step completes ([`Action::Continue`]) or a
    /// step reports back-pressure, which leaves the cursor in place and
    /// returns [`Action::Abort`] so the caller retries on a later pass.
    pub fn attempt(&mut self) -> Action {
        while let Some(step) = self.steps.get_mut(self.cursor) {
            match step() {
                StepResult::Complete => self.cursor += 1,
                StepResult::BackPressured | StepResult::Abort => return Action::Abort,
            }
        }
        Action::Continue
    }

    /// Advances by at most one continuation; used by the per-pass retry step
    /// so queued units drain fairly.
    pub fn attempt_step(&mut self) -> Action {
        let Some(step) = self.steps.get_mut(self.cursor) else {
            return Action::Continue;
        };
        match step() {
            StepResult::Complete => {
                self.cursor += 1;
                if self.is_complete() {
                    Action::Continue
                } else {
                    Action::Abort
                }
            }
            StepResult::BackPressured | StepResult::Abort => Action::Abort,
        }
    }
}

struct InFlight {
    correlation_id: Option<CorrelationId>,
    unit: UnitOfWork,
}

/// Ordered queue of in-flight units of work, each retried until complete.
///
/// Units started with a correlation id stay queued until the originating
/// fragment is redelivered and observes completion via [`RetryManager::retry`],
/// preventing duplicate issuance of the whole operation. Units accepted via
/// [`RetryManager::schedule`] drain purely through
/// [`RetryManager::attempt_steps`].
#[derive(Debug, Default)]
pub struct RetryManager {
    in_flight: VecDeque<InFlight>,
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("correlation_id", &self.correlation_id)
            .field("unit", &self.unit)
            .finish()
    }
}

impl RetryManager {
    /// Creates an empty retry manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks whether `correlation_id` already has an in-flight unit.
    ///
    /// Returns `Some(Action::Abort)` while the unit is still pending,
    /// `Some(Action::Continue)` exactly once when it has completed (consuming
    /// it), and `None` when the correlation is unknown so the caller may
    /// start a fresh attempt via [`RetryManager::first_attempt`].
    pub fn retry(&mut self, correlation_id: CorrelationId) -> Option<Action> {
        let position = self
            .in_flight
            .iter()
            .position(|entry| entry.correlation_id == Some(correlation_id))?;

        if self.in_flight[position].unit.is_complete() {
            self.in_flight.remove(position);
            return Some(Action::Continue);
        }
        Some(Action::Abort)
    }

    /// Attempts a fresh unit of work for `correlation_id`.
    ///
    /// The unit runs to its first back-pressured step; if incomplete it is
    /// queued and [`Action::Abort`] is returned so the originating fragment
    /// is redelivered.
    pub fn first_attempt(&mut self, correlation_id: CorrelationId, mut unit: UnitOfWork) -> Action {
        let action = unit.attempt();
        if action == Action::Abort {
            self.in_flight.push_back(InFlight {
                correlation_id: Some(correlation_id),
                unit,
            });
        }
        action
    }

    /// Queues a unit of work without a correlation id; it drains one step per
    /// pass through [`RetryManager::attempt_steps`].
    pub fn schedule(&mut self, unit: UnitOfWork) {
        self.in_flight.push_back(InFlight {
            correlation_id: None,
            unit,
        });
    }

    /// Advances each in-flight unit by at most one continuation.
    ///
    /// Returns the number of units that made progress. Completed unkeyed
    /// units are dropped; completed keyed units stay until consumed by
    /// [`RetryManager::retry`].
    pub fn attempt_steps(&mut self) -> usize {
        let mut progressed = 0;

        for _ in 0..self.in_flight.len() {
            let Some(mut entry) = self.in_flight.pop_front() else {
                break;
            };

            if !entry.unit.is_complete() {
                let before = entry.unit.cursor;
                entry.unit.attempt_step();
                if entry.unit.cursor > before {
                    progressed += 1;
                }
            }

            if entry.unit.is_complete() && entry.correlation_id.is_none() {
                continue;
            }
            self.in_flight.push_back(entry);
        }

        progressed
    }

    /// Returns the number of in-flight units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns true when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording_step(
        log: &Rc<RefCell<Vec<&'static str>>>,
        name: &'static str,
        results: Vec<StepResult>,
    ) -> Continuation {
        let log = Rc::clone(log);
        let mut results = results.into_iter();
        Box::new(move || {
            log.borrow_mut().push(name);
            results.next().unwrap_or(StepResult::Complete)
        })
    }

    #[test]
    fn test_unit_runs_steps_in_declared_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut unit = UnitOfWork::new(vec![
            recording_step(&log, "a", vec![]),
            recording_step(&log, "b", vec![]),
            recording_step(&log, "c", vec![]),
        ]);

        assert_eq!(unit.attempt(), Action::Continue);
        assert!(unit.is_complete());
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_back_pressure_resumes_at_same_step() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut unit = UnitOfWork::new(vec![
            recording_step(&log, "a", vec![]),
            recording_step(&log, "b", vec![StepResult::BackPressured]),
        ]);

        assert_eq!(unit.attempt(), Action::Abort);
        assert_eq!(unit.attempt(), Action::Continue);
        // "a" ran exactly once; "b" was re-attempted.
        assert_eq!(*log.borrow(), vec!["a", "b", "b"]);
    }

    #[test]
    fn test_completion_takes_steps_plus_back_pressures_passes() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let steps = 3;
        let unit = UnitOfWork::new(vec![
            recording_step(&log, "a", vec![]),
            recording_step(&log, "b", vec![StepResult::BackPressured, StepResult::BackPressured]),
            recording_step(&log, "c", vec![]),
        ]);

        let mut manager = RetryManager::new();
        manager.schedule(unit);

        let mut passes = 0;
        while !manager.is_empty() {
            manager.attempt_steps();
            passes += 1;
        }

        // 3 steps + 2 back-pressures, each consuming one pass.
        assert_eq!(passes, steps + 2);
        assert_eq!(*log.borrow(), vec!["a", "b", "b", "b", "c"]);
    }

    #[test]
    fn test_duplicate_correlation_aborts() {
        let mut manager = RetryManager::new();
        let unit = UnitOfWork::new(vec![Box::new(|| StepResult::BackPressured)]);

        assert_eq!(manager.retry(42), None);
        assert_eq!(manager.first_attempt(42, unit), Action::Abort);
        assert_eq!(manager.retry(42), Some(Action::Abort));
        assert_eq!(manager.retry(42), Some(Action::Abort));
    }

    #[test]
    fn test_completed_keyed_unit_is_consumed_once() {
        let mut manager = RetryManager::new();
        let unit = UnitOfWork::new(vec![Box::new(|| StepResult::BackPressured)]);
        assert_eq!(manager.first_attempt(42, unit), Action::Abort);

        // The queued step now completes.
        manager.in_flight[0].unit.steps[0] = Box::new(|| StepResult::Complete);
        manager.attempt_steps();

        assert_eq!(manager.retry(42), Some(Action::Continue));
        assert_eq!(manager.retry(42), None);
    }

    #[test]
    fn test_scheduled_unit_drops_after_completion() {
        let mut manager = RetryManager::new();
        manager.schedule(UnitOfWork::new(vec![Box::new(|| StepResult::BackPressured)]));
        assert_eq!(manager.len(), 1);

        manager.in_flight[0].unit.steps[0] = Box::new(|| StepResult::Complete);
        manager.attempt_steps();
        assert!(manager.is_empty());
    }
}
