//! Static shape counters over a rule tree
//!
//! Every traversal carries the set of pages currently being visited; meeting
//! one of them again means the tree contains itself.

use crate::rules::compiled::{Action, CompiledRule};
use crate::rules::tree::{CompiledEntry, GroupId, PageId, RuleTree};
use crate::RuleError;
use std::collections::HashSet;

/// Depth-first walk over the static rules reachable from `page`
///
/// `visit` receives each rule with the rules-depth level of the page that
/// holds it (the root is level 1, each `rules` edge adds one, `data` edges
/// add nothing).
fn walk<F>(
    tree: &RuleTree,
    page: PageId,
    level: usize,
    visiting: &mut HashSet<PageId>,
    visit: &mut F,
) -> Result<(), RuleError>
where
    F: FnMut(&CompiledRule, usize),
{
    if !visiting.insert(page) {
        return Err(RuleError::SelfContained);
    }
    let compiled = tree
        .page(page)
        .ok_or(RuleError::UnknownPage(page.index()))?;
    for entry in compiled.fields.values() {
        let CompiledEntry::Static(rule) = entry else {
            continue;
        };
        visit(rule, level);
        match rule.action {
            Action::Data(child) => walk(tree, child, level, visiting, visit)?,
            Action::NewPage(child) => walk(tree, child, level + 1, visiting, visit)?,
            _ => {}
        }
    }
    visiting.remove(&page);
    Ok(())
}

fn walk_from_root<F>(tree: &RuleTree, mut visit: F) -> Result<(), RuleError>
where
    F: FnMut(&CompiledRule, usize),
{
    let mut visiting = HashSet::new();
    walk(tree, tree.root(), 1, &mut visiting, &mut visit)
}

/// Fails with `SelfContained` if any page reaches itself
pub fn check_self_contained(tree: &RuleTree) -> Result<(), RuleError> {
    walk_from_root(tree, |_, _| {})
}

/// Maximum nesting depth through `rules` edges; a tree without nested
/// fetched pages has depth 1
pub fn count_rules_depth(tree: &RuleTree) -> Result<usize, RuleError> {
    let mut depth = 1;
    walk_from_root(tree, |rule, level| {
        if matches!(rule.action, Action::NewPage(_)) {
            depth = depth.max(level + 1);
        }
    })?;
    Ok(depth)
}

/// Number of page rules reachable through `rules` edges, the root included
pub fn count_total_page_rules(tree: &RuleTree) -> Result<usize, RuleError> {
    let mut total = 1;
    walk_from_root(tree, |rule, _| {
        if matches!(rule.action, Action::NewPage(_)) {
            total += 1;
        }
    })?;
    Ok(total)
}

/// Number of schedulable rules in the tree that reference `group`
pub fn count_same_groups(tree: &RuleTree, group: GroupId) -> Result<usize, RuleError> {
    let mut count = 0;
    walk_from_root(tree, |rule, _| {
        if rule.action.is_schedulable() && rule.scheduling.group == Some(group) {
            count += 1;
        }
    })?;
    Ok(count)
}
