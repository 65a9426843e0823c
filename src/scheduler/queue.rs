//! Priority queue task runner
//!
//! This module handles:
//! - FIFO slots per priority (slot 0 is served first)
//! - A cap on simultaneously running tasks
//! - A minimum delay between task starts (fixed rate or small jitter)

use futures::future::LocalBoxFuture;
use rand::Rng;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;

type Task = LocalBoxFuture<'static, ()>;

/// Priority queue settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Maximum simultaneously running tasks; forced to 1 when `rate > 0`
    pub concurrent: usize,

    /// Minimum milliseconds between task starts
    pub rate: u64,

    /// Number of priority slots; 0 is treated as 1
    pub priority_range: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrent: 5,
            rate: 0,
            priority_range: 1,
        }
    }
}

struct QueueState {
    concurrent: usize,
    rate: Duration,
    slots: Vec<VecDeque<Task>>,
    queued: usize,
    running: usize,
    next_start: Instant,
    busy: bool,
}

/// A cloneable handle to a priority queue
///
/// Tasks are spawned with [`tokio::task::spawn_local`], so submitting must
/// happen inside a [`tokio::task::LocalSet`].
#[derive(Clone)]
pub struct PriorityQueue {
    inner: Rc<RefCell<QueueState>>,
}

impl PriorityQueue {
    /// Creates a new queue
    ///
    /// # Arguments
    ///
    /// * `options` - Concurrency, rate and priority range
    ///
    /// # Returns
    ///
    /// An idle queue
    pub fn new(options: QueueOptions) -> Self {
        let concurrent = if options.rate > 0 {
            1
        } else {
            options.concurrent.max(1)
        };
        let range = options.priority_range.max(1);
        Self {
            inner: Rc::new(RefCell::new(QueueState {
                concurrent,
                rate: Duration::from_millis(options.rate),
                slots: (0..range).map(|_| VecDeque::new()).collect(),
                queued: 0,
                running: 0,
                next_start: Instant::now(),
                busy: false,
            })),
        }
    }

    /// The priority used when a task does not specify one: the lowest slot
    pub fn default_priority(&self) -> usize {
        self.inner.borrow().slots.len() - 1
    }

    pub fn priority_range(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    pub fn concurrent(&self) -> usize {
        self.inner.borrow().concurrent
    }

    /// Enqueues a task
    ///
    /// Priorities above the range are clamped to the lowest slot.
    pub fn submit<F>(&self, task: F, priority: Option<usize>)
    where
        F: Future<Output = ()> + 'static,
    {
        {
            let mut state = self.inner.borrow_mut();
            let lowest = state.slots.len() - 1;
            let slot = priority.unwrap_or(lowest).min(lowest);
            state.slots[slot].push_back(Box::pin(task));
            state.queued += 1;
            state.busy = true;
            tracing::trace!("Queued task at priority {} ({} queued)", slot, state.queued);
        }
        self.run();
    }

    /// Returns true from the first submit until the queue drains completely
    pub fn is_busy(&self) -> bool {
        self.inner.borrow().busy
    }

    /// Number of tasks admitted and not yet finished
    pub fn running(&self) -> usize {
        self.inner.borrow().running
    }

    /// Number of tasks waiting for admission
    pub fn len(&self) -> usize {
        self.inner.borrow().queued
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if both handles point at the same queue
    pub fn same_queue(&self, other: &PriorityQueue) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Admits tasks while capacity exists
    fn run(&self) {
        loop {
            let (task, wait) = {
                let mut state = self.inner.borrow_mut();
                let now = Instant::now();
                if state.queued == 0 {
                    if state.running == 0 {
                        state.busy = false;
                        if state.concurrent > 1 {
                            state.next_start = now;
                        }
                    }
                    return;
                }
                if state.running >= state.concurrent {
                    if state.concurrent > 1 {
                        state.next_start = now;
                    }
                    return;
                }

                let Some(task) = state.slots.iter_mut().find_map(|slot| slot.pop_front()) else {
                    return;
                };
                state.queued -= 1;
                state.running += 1;

                let wait = state.next_start.saturating_duration_since(now);
                let spacing = if state.concurrent > 1 {
                    jitter()
                } else {
                    state.rate
                };
                state.next_start = now + wait + spacing;
                (task, wait)
            };

            let queue = self.clone();
            tokio::task::spawn_local(async move {
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                task.await;
                queue.finish();
            });
        }
    }

    fn finish(&self) {
        {
            let mut state = self.inner.borrow_mut();
            state.running -= 1;
        }
        self.run();
    }
}

/// Small start offset that is usually 1ms and occasionally larger
fn jitter() -> Duration {
    let mut rng = rand::rng();
    let ms = 1 + rng.random_range(0..2u64) * rng.random_range(0..5u64) * rng.random_range(0..6u64);
    Duration::from_millis(ms)
}
