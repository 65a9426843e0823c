//! Completion tracking
//!
//! The crawl has converged when no retry timer is pending and every field
//! evaluation still in flight is parked on a reference wait. Queue idleness
//! is checked separately by the coordinator.

use std::cell::Cell;
use std::rc::Rc;

#[derive(Debug, Default)]
pub struct Tracker {
    evaluations: Cell<usize>,
    parked: Cell<usize>,
    retries: Cell<usize>,
}

impl Tracker {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Starts tracking one field evaluation; it ends when every clone of
    /// the returned handle is dropped
    pub fn begin(self: &Rc<Self>) -> Evaluation {
        self.evaluations.set(self.evaluations.get() + 1);
        Evaluation(Rc::new(EvalState {
            tracker: self.clone(),
            waits: Cell::new(0),
        }))
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.get()
    }

    pub fn parked(&self) -> usize {
        self.parked.get()
    }

    pub fn retries(&self) -> usize {
        self.retries.get()
    }

    pub fn retry_scheduled(&self) {
        self.retries.set(self.retries.get() + 1);
    }

    pub fn retry_fired(&self) {
        self.retries.set(self.retries.get().saturating_sub(1));
    }

    /// No retry pending and nothing in flight except reference waits
    pub fn is_settled(&self) -> bool {
        self.retries() == 0 && self.evaluations() == self.parked()
    }
}

#[derive(Debug)]
struct EvalState {
    tracker: Rc<Tracker>,
    waits: Cell<usize>,
}

impl Drop for EvalState {
    fn drop(&mut self) {
        let tracker = &self.tracker;
        tracker.evaluations.set(tracker.evaluations.get() - 1);
        if self.waits.get() > 0 {
            tracker.parked.set(tracker.parked.get() - 1);
        }
    }
}

/// Handle of one in-flight field evaluation
#[derive(Debug, Clone)]
pub struct Evaluation(Rc<EvalState>);

impl Evaluation {
    /// Marks the evaluation as waiting on a reference until the guard drops
    pub fn park(&self) -> Parked {
        let waits = self.0.waits.get() + 1;
        self.0.waits.set(waits);
        if waits == 1 {
            let tracker = &self.0.tracker;
            tracker.parked.set(tracker.parked.get() + 1);
        }
        Parked(self.0.clone())
    }
}

/// Guard returned by [`Evaluation::park`]
#[derive(Debug)]
pub struct Parked(Rc<EvalState>);

impl Drop for Parked {
    fn drop(&mut self) {
        let waits = self.0.waits.get() - 1;
        self.0.waits.set(waits);
        if waits == 0 {
            let tracker = &self.0.tracker;
            tracker.parked.set(tracker.parked.get() - 1);
        }
    }
}
