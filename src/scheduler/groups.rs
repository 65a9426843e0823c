//! Maps a rule's scheduling settings to the queue that runs its tasks

use crate::rules::shape::count_same_groups;
use crate::rules::{GroupId, RuleTree, Scheduling};
use crate::scheduler::queue::{PriorityQueue, QueueOptions};
use crate::RuleError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Group rate when a group sets only `concurrent`
const DEFAULT_GROUP_RATE: u64 = 0;

/// Group concurrency when a group sets only `rate`
const DEFAULT_GROUP_CONCURRENT: usize = 5;

/// Lazily creates one queue per group and a private queue per ungrouped
/// rule evaluation
pub struct GroupRegistry {
    tree: Arc<RuleTree>,
    default_rate: u64,
    default_concurrent: usize,
    queues: RefCell<HashMap<GroupId, PriorityQueue>>,
}

impl GroupRegistry {
    /// Creates a registry
    ///
    /// # Arguments
    ///
    /// * `tree` - The rule tree, used to size group priority ranges
    /// * `default_rate` - Rate for private queues when the rule sets none
    /// * `default_concurrent` - Concurrency for private queues when the rule sets none
    pub fn new(tree: Arc<RuleTree>, default_rate: u64, default_concurrent: usize) -> Self {
        Self {
            tree,
            default_rate,
            default_concurrent,
            queues: RefCell::new(HashMap::new()),
        }
    }

    /// Returns the queue for a rule and the priority its tasks default to
    ///
    /// Rules sharing a group share one queue whose priority range equals the
    /// number of schedulable rules referencing the group. Rules without a
    /// group get a fresh single-slot queue on every call.
    pub fn queue_for(&self, scheduling: &Scheduling) -> Result<(PriorityQueue, usize), RuleError> {
        let Some(id) = scheduling.group else {
            let queue = PriorityQueue::new(QueueOptions {
                concurrent: scheduling.concurrent.unwrap_or(self.default_concurrent),
                rate: scheduling.rate.unwrap_or(self.default_rate),
                priority_range: 1,
            });
            return Ok((queue, 0));
        };

        if let Some(queue) = self.queues.borrow().get(&id) {
            return Ok((queue.clone(), queue.default_priority()));
        }

        let group = self
            .tree
            .group(id)
            .ok_or(RuleError::UnknownGroup(id.index()))?;
        let members = count_same_groups(&self.tree, id)?.max(1);
        let queue = PriorityQueue::new(QueueOptions {
            concurrent: group.concurrent.unwrap_or(DEFAULT_GROUP_CONCURRENT),
            rate: group.rate.unwrap_or(DEFAULT_GROUP_RATE),
            priority_range: members,
        });
        tracing::debug!(
            "Created queue for group #{} ({} members, concurrent {}, rate {}ms)",
            id.index(),
            members,
            queue.concurrent(),
            group.rate.unwrap_or(DEFAULT_GROUP_RATE)
        );
        self.queues.borrow_mut().insert(id, queue.clone());
        Ok((queue.clone(), queue.default_priority()))
    }
}
