//! The rule tree arena
//!
//! Page rules and groups are addressed by handles issued by the builder, so
//! a page can refer to another page (or to itself) before that page is
//! defined. Handle equality is identity: two groups with equal settings are
//! still two queues.

use crate::rules::compiled::{compile_rule, CompiledRule};
use crate::rules::rule::{Group, PageRule, Rule, RuleEntry, WaitFor};
use crate::rules::shape;
use crate::RuleError;
use indexmap::IndexMap;
use std::sync::Arc;

/// Handle of a page rule inside a [`RuleTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(usize);

impl PageId {
    pub fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }
}

/// Handle of a group inside a [`RuleTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(usize);

impl GroupId {
    pub fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum CompiledEntry {
    Static(Arc<CompiledRule>),
    Deferred(WaitFor<Rule>),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CompiledPage {
    pub fields: IndexMap<String, CompiledEntry>,
}

/// Collects page rules and groups, then validates them into a [`RuleTree`]
///
/// # Example
///
/// ```
/// use treecrawl::{PageRule, Rule, RuleTree};
///
/// let mut builder = RuleTree::builder();
/// let detail = builder.page(PageRule::new().field("body", "article"));
/// let tree = builder
///     .build(PageRule::new().field("links", Rule::list("a").attr("href").rules(detail)))
///     .unwrap();
/// assert_eq!(tree.page_count(), 2);
/// ```
#[derive(Debug, Default)]
pub struct RuleTreeBuilder {
    pages: Vec<Option<PageRule>>,
    groups: Vec<Group>,
}

impl RuleTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a group and returns its handle
    pub fn group(&mut self, group: Group) -> GroupId {
        self.groups.push(group);
        GroupId(self.groups.len() - 1)
    }

    /// Registers a page rule and returns its handle
    pub fn page(&mut self, page: PageRule) -> PageId {
        self.pages.push(Some(page));
        PageId(self.pages.len() - 1)
    }

    /// Reserves a handle for a page rule defined later
    pub fn reserve_page(&mut self) -> PageId {
        self.pages.push(None);
        PageId(self.pages.len() - 1)
    }

    /// Defines a previously reserved page rule
    pub fn define_page(&mut self, id: PageId, page: PageRule) -> Result<(), RuleError> {
        let slot = self
            .pages
            .get_mut(id.0)
            .ok_or(RuleError::UnknownPage(id.0))?;
        *slot = Some(page);
        Ok(())
    }

    /// Adds `root` as a new page and builds the tree from it
    pub fn build(mut self, root: PageRule) -> Result<RuleTree, RuleError> {
        let root = self.page(root);
        self.build_with_root(root)
    }

    /// Builds the tree with an already registered page as root
    ///
    /// Every registered page must be defined and non-empty, every static
    /// rule must compile, and the tree reachable from `root` must not
    /// contain itself through `data`/`rules` edges.
    pub fn build_with_root(self, root: PageId) -> Result<RuleTree, RuleError> {
        if root.0 >= self.pages.len() {
            return Err(RuleError::UnknownPage(root.0));
        }
        let page_count = self.pages.len();
        let mut pages = Vec::with_capacity(page_count);
        for (index, page) in self.pages.into_iter().enumerate() {
            let page = page.ok_or(RuleError::UndefinedPage(index))?;
            if page.is_empty() {
                return Err(RuleError::EmptyPageRule);
            }
            let mut fields = IndexMap::with_capacity(page.len());
            for (name, entry) in page.fields {
                let compiled = match entry {
                    RuleEntry::Static(rule) => CompiledEntry::Static(Arc::new(compile_rule(
                        &name,
                        rule,
                        &self.groups,
                        page_count,
                    )?)),
                    RuleEntry::Deferred(wait) => CompiledEntry::Deferred(wait),
                };
                fields.insert(name, compiled);
            }
            pages.push(CompiledPage { fields });
        }

        let tree = RuleTree {
            pages,
            groups: self.groups,
            root,
        };
        shape::check_self_contained(&tree)?;
        Ok(tree)
    }
}

/// A validated rule tree, ready to crawl
#[derive(Debug)]
pub struct RuleTree {
    pages: Vec<CompiledPage>,
    groups: Vec<Group>,
    root: PageId,
}

impl RuleTree {
    pub fn builder() -> RuleTreeBuilder {
        RuleTreeBuilder::new()
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.0)
    }

    /// Field names of a page rule, in declaration order
    pub fn field_names(&self, page: PageId) -> Vec<&str> {
        self.pages
            .get(page.0)
            .map(|p| p.fields.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub(crate) fn page(&self, id: PageId) -> Option<&CompiledPage> {
        self.pages.get(id.0)
    }

    pub(crate) fn entry(&self, page: PageId, name: &str) -> Option<&CompiledEntry> {
        self.page(page).and_then(|p| p.fields.get(name))
    }

    /// Compiles a rule produced by a deferred entry
    pub(crate) fn compile(&self, name: &str, rule: Rule) -> Result<CompiledRule, RuleError> {
        compile_rule(name, rule, &self.groups, self.pages.len())
    }
}
