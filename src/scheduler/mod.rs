//! Task scheduling: priority queues and the group registry
//!
//! Every fetch or download runs through two queues: the crawl-wide global
//! queue, and the queue owned by the rule's group (or a private queue for
//! rules without a group).

mod groups;
mod queue;

pub use groups::GroupRegistry;
pub use queue::{PriorityQueue, QueueOptions};
