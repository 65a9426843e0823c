//! Crawl-wide priority planning
//!
//! Computed once from the static shape of the rule tree, before any
//! request is made.

use crate::config::{CrawlOptions, Mode};
use crate::rules::shape::{count_rules_depth, count_total_page_rules};
use crate::rules::RuleTree;
use crate::RuleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlPlan {
    pub mode: Mode,
    /// Longest chain of fetched pages, the entry page included
    pub rules_depth: usize,
    /// Page rules reachable from the root through `rules` edges
    pub page_rules_length: usize,
    /// Priority slots of the global queue
    pub priority_range: usize,
    /// Default global priority of tasks submitted from the entry page
    pub root_priority: usize,
}

impl CrawlPlan {
    /// Sizes the global queue for the tree and mode
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlPlan)` - The plan
    /// * `Err(RuleError::SelfContained)` - The tree has a cycle
    pub fn resolve(tree: &RuleTree, options: &CrawlOptions) -> Result<Self, RuleError> {
        let rules_depth = count_rules_depth(tree)?;
        let page_rules_length = count_total_page_rules(tree)?;

        let (priority_range, root_priority) = match options.mode {
            Mode::Default => (page_rules_length, page_rules_length.saturating_sub(1)),
            Mode::Bf => (rules_depth, 0),
            Mode::Df => (rules_depth, rules_depth.saturating_sub(1)),
        };

        let plan = Self {
            mode: options.mode,
            rules_depth,
            page_rules_length,
            priority_range: priority_range.max(1),
            root_priority,
        };
        tracing::debug!("Crawl plan: {:?}", plan);
        Ok(plan)
    }

    /// Default global priority for tasks of a page fetched from a page
    /// whose tasks default to `current`
    pub fn next_priority(&self, current: usize) -> usize {
        match self.mode {
            Mode::Default => current,
            Mode::Bf => (current + 1).min(self.priority_range - 1),
            Mode::Df => current.saturating_sub(1),
        }
    }

    /// Global priority of one task
    ///
    /// An explicit `global-priority` only applies in `default` mode; in
    /// `bf` and `df` every task uses the computed default.
    pub fn global_priority(&self, explicit: Option<usize>, current: usize, name: &str) -> usize {
        match (self.mode, explicit) {
            (Mode::Default, Some(priority)) => priority,
            (Mode::Default, None) => current,
            (mode, Some(priority)) => {
                tracing::warn!(
                    "IGNORE `{}.global-priority` ({}) in {:?} mode",
                    name,
                    priority,
                    mode
                );
                current
            }
            (_, None) => current,
        }
    }
}
