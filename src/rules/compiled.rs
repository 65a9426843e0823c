//! Load-time compilation of rules into a closed `Kind × Action` shape

use crate::config::{RequestOptions, UserAgents};
use crate::refs::template::has_template;
use crate::rules::rule::{Converter, DownloadSpec, Group, How, Extractor, Rule, Target};
use crate::rules::tree::{GroupId, PageId};
use crate::RuleError;
use scraper::Selector;

/// A selector string, parsed up front unless it is a `{{…}}` template
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    pub source: String,
    pub parsed: Option<Selector>,
}

impl CompiledSelector {
    fn compile(rule: &str, source: &str) -> Result<Self, RuleError> {
        let parsed = if has_template(source) {
            None
        } else {
            Some(parse_selector(rule, source)?)
        };
        Ok(Self {
            source: source.to_string(),
            parsed,
        })
    }
}

/// Parses a CSS selector, naming the owning rule on failure
pub fn parse_selector(rule: &str, source: &str) -> Result<Selector, RuleError> {
    Selector::parse(source).map_err(|_| RuleError::InvalidSelector {
        rule: rule.to_string(),
        selector: source.to_string(),
    })
}

/// Single element or element list
#[derive(Debug, Clone)]
pub enum Kind {
    Scalar {
        selector: CompiledSelector,
        eq: usize,
    },
    List {
        selector: CompiledSelector,
        eq: usize,
        max: Option<usize>,
    },
}

impl Kind {
    pub fn is_list(&self) -> bool {
        matches!(self, Kind::List { .. })
    }

    pub fn selector(&self) -> &CompiledSelector {
        match self {
            Kind::Scalar { selector, .. } | Kind::List { selector, .. } => selector,
        }
    }
}

/// What happens with the extracted value(s)
#[derive(Debug, Clone)]
pub enum Action {
    /// Stored and published as-is
    Leaf,
    /// Evaluate a page rule scoped to the matched element
    Data(PageId),
    /// Fetch the value as a URL and evaluate a page rule against it
    NewPage(PageId),
    /// Download the value as a URL
    Download(DownloadSpec),
}

impl Action {
    /// Returns the nested page rule, if any
    pub fn page(&self) -> Option<PageId> {
        match self {
            Action::Data(id) | Action::NewPage(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns true if the action schedules network tasks
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Action::NewPage(_) | Action::Download(_))
    }
}

#[derive(Debug, Clone)]
pub enum Extract {
    Text,
    Html,
    Attr(String),
    Custom(Extractor),
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub how: Extract,
    pub trim: bool,
    pub convert: Option<Converter>,
}

/// Queue selection inputs for fetch and download tasks
#[derive(Debug, Clone, Default)]
pub struct Scheduling {
    pub group: Option<GroupId>,
    pub priority: Option<usize>,
    pub global_priority: Option<usize>,
    pub rate: Option<u64>,
    pub concurrent: Option<usize>,
}

/// Rule-level request overrides, merged with the group and global options
#[derive(Debug, Clone, Default)]
pub struct RequestOverrides {
    pub request: Option<RequestOptions>,
    pub user_agents: Option<UserAgents>,
    pub cookie: Option<String>,
    pub retry: Option<u32>,
    pub retry_timeout: Option<u64>,
}

/// A validated rule
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub kind: Kind,
    pub action: Action,
    pub extraction: Extraction,
    pub scheduling: Scheduling,
    pub request: RequestOverrides,
    pub hide: bool,
}

/// Validates a rule and compiles it
///
/// # Arguments
///
/// * `name` - The field name, used in error messages
/// * `rule` - The rule to compile
/// * `groups` - The tree's group registry
/// * `page_count` - Number of page slots in the tree, for handle checks
pub fn compile_rule(
    name: &str,
    rule: Rule,
    groups: &[Group],
    page_count: usize,
) -> Result<CompiledRule, RuleError> {
    let (source, is_list) = match &rule.target {
        Target::Selector(s) => (s.as_str(), false),
        Target::List(s) => (s.as_str(), true),
    };
    if source.trim().is_empty() {
        let field = if is_list { "list" } else { "selector" };
        return Err(RuleError::EmptyString(format!("{}.{}", name, field)));
    }
    if rule.attr.as_deref().is_some_and(|attr| attr.trim().is_empty()) {
        return Err(RuleError::EmptyString(format!("{}.attr", name)));
    }

    let present: Vec<String> = [
        ("data", rule.data.is_some()),
        ("rules", rule.rules.is_some()),
        ("download", rule.download.is_some()),
    ]
    .iter()
    .filter(|(_, set)| *set)
    .map(|(field, _)| format!("`{}.{}`", name, field))
    .collect();
    if present.len() > 1 {
        return Err(RuleError::CoExist(present.join(", ")));
    }
    if rule.data.is_some() && rule.group.is_some() {
        return Err(RuleError::CoExist(format!("`{0}.data`, `{0}.group`", name)));
    }
    if rule.max == Some(0) {
        return Err(RuleError::InvalidMax(name.to_string()));
    }
    for page in [rule.data, rule.rules].into_iter().flatten() {
        if page.index() >= page_count {
            return Err(RuleError::UnknownPage(page.index()));
        }
    }

    let action = match (rule.data, rule.rules, rule.download) {
        (Some(page), _, _) => Action::Data(page),
        (_, Some(page), _) => Action::NewPage(page),
        (_, _, Some(spec)) => Action::Download(spec),
        _ => Action::Leaf,
    };

    let mut group = rule.group;
    if let Some(id) = group {
        let definition = groups
            .get(id.index())
            .ok_or(RuleError::UnknownGroup(id.index()))?;
        if !definition.has_limits() {
            return Err(RuleError::GroupWithoutLimits(name.to_string()));
        }
        if !action.is_schedulable() {
            tracing::warn!(
                "IGNORE `{}.group`: only rules with `download` or `rules` are scheduled",
                name
            );
            group = None;
        }
    }

    let selector = CompiledSelector::compile(name, source)?;
    let kind = if is_list {
        Kind::List {
            selector,
            eq: rule.eq,
            max: rule.max,
        }
    } else {
        Kind::Scalar { selector, eq: rule.eq }
    };

    let how = match (rule.attr, rule.how) {
        (Some(attr), _) => Extract::Attr(attr),
        (None, How::Text) => Extract::Text,
        (None, How::Html) => Extract::Html,
        (None, How::Custom(f)) => Extract::Custom(f),
    };

    Ok(CompiledRule {
        name: name.to_string(),
        kind,
        action,
        extraction: Extraction {
            how,
            trim: rule.trim,
            convert: rule.convert,
        },
        scheduling: Scheduling {
            group,
            priority: rule.priority,
            global_priority: rule.global_priority,
            rate: rule.rate,
            concurrent: rule.concurrent,
        },
        request: RequestOverrides {
            request: rule.request,
            user_agents: rule.user_agents,
            cookie: rule.cookie,
            retry: rule.retry,
            retry_timeout: rule.retry_timeout,
        },
        hide: rule.hide,
    })
}
