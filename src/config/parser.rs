use crate::config::types::{CrawlOptions, DownloadConfig, HowConfig, RuleConfig, RuleFile};
use crate::config::validation::validate;
use crate::rules::{DownloadSpec, GroupId, PageId, PageRule, Rule, RuleTree};
use crate::{ConfigError, RuleError};
use std::collections::HashMap;
use std::path::Path;

/// A rule file turned into a crawlable tree
#[derive(Debug)]
pub struct LoadedRules {
    pub entry: Option<String>,
    pub tree: RuleTree,
    pub options: CrawlOptions,
}

/// Loads and parses a rule file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML rule file
///
/// # Returns
///
/// * `Ok(LoadedRules)` - Entry URL, validated rule tree and options
/// * `Err(ConfigError)` - Failed to read, parse, validate or build the tree
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use treecrawl::config::load_rule_file;
///
/// let rules = load_rule_file(Path::new("rules.toml")).unwrap();
/// println!("Entry: {:?}", rules.entry);
/// ```
pub fn load_rule_file(path: &Path) -> Result<LoadedRules, ConfigError> {
    // Read the rule file
    let content = std::fs::read_to_string(path)?;

    parse_rule_file(&content)
}

/// Parses rule file content
///
/// Pages and groups are referenced by name; every page is registered before
/// any is defined, so pages may refer to pages declared after them.
pub fn parse_rule_file(content: &str) -> Result<LoadedRules, ConfigError> {
    let file: RuleFile = toml::from_str(content)?;
    validate(&file)?;

    let mut builder = RuleTree::builder();
    let groups: HashMap<&str, GroupId> = file
        .groups
        .iter()
        .map(|(name, group)| (name.as_str(), builder.group(group.clone())))
        .collect();
    let pages: HashMap<&str, PageId> = file
        .pages
        .keys()
        .map(|name| (name.as_str(), builder.reserve_page()))
        .collect();

    for (page_name, fields) in &file.pages {
        let mut page = PageRule::new();
        for (field, config) in fields {
            let rule = build_rule(field, config, &pages, &groups)?;
            page = page.field(field.as_str(), rule);
        }
        builder.define_page(pages[page_name.as_str()], page)?;
    }

    let root = *pages
        .get(file.root.as_str())
        .ok_or_else(|| ConfigError::UnknownPage(file.root.clone()))?;
    let tree = builder.build_with_root(root)?;

    tracing::debug!(
        "Loaded {} page rules and {} groups (root `{}`)",
        file.pages.len(),
        file.groups.len(),
        file.root
    );

    Ok(LoadedRules {
        entry: file.entry,
        tree,
        options: file.options,
    })
}

fn lookup_page(pages: &HashMap<&str, PageId>, name: &str) -> Result<PageId, ConfigError> {
    pages
        .get(name)
        .copied()
        .ok_or_else(|| ConfigError::UnknownPage(name.to_string()))
}

/// Converts a rule table into a [`Rule`]
fn build_rule(
    name: &str,
    config: &RuleConfig,
    pages: &HashMap<&str, PageId>,
    groups: &HashMap<&str, GroupId>,
) -> Result<Rule, ConfigError> {
    let spec = match config {
        RuleConfig::Selector(selector) => return Ok(Rule::selector(selector.as_str())),
        RuleConfig::Full(spec) => spec,
    };

    let mut rule = match (&spec.selector, &spec.list) {
        (Some(selector), None) => Rule::selector(selector.as_str()),
        (None, Some(list)) => Rule::list(list.as_str()),
        _ => return Err(RuleError::MustHaveOne(name.to_string()).into()),
    };

    if let Some(eq) = spec.eq {
        rule = rule.eq(eq);
    }
    if let Some(max) = spec.max {
        rule = rule.max(max);
    }
    if spec.how == Some(HowConfig::Html) {
        rule = rule.html();
    }
    if let Some(attr) = &spec.attr {
        rule = rule.attr(attr.as_str());
    }
    if let Some(trim) = spec.trim {
        rule = rule.trim(trim);
    }
    if let Some(data) = &spec.data {
        rule = rule.data(lookup_page(pages, data)?);
    }
    if let Some(rules) = &spec.rules {
        rule = rule.rules(lookup_page(pages, rules)?);
    }
    match &spec.download {
        Some(DownloadConfig::Enabled(true)) => rule = rule.download(DownloadSpec::new()),
        Some(DownloadConfig::Spec(download)) => rule = rule.download(download.clone()),
        Some(DownloadConfig::Enabled(false)) | None => {}
    }
    if let Some(group) = &spec.group {
        let id = groups
            .get(group.as_str())
            .copied()
            .ok_or_else(|| ConfigError::UnknownGroup(group.clone()))?;
        rule = rule.group(id);
    }
    if let Some(priority) = spec.priority {
        rule = rule.priority(priority);
    }
    if let Some(priority) = spec.global_priority {
        rule = rule.global_priority(priority);
    }
    if let Some(rate) = spec.rate {
        rule = rule.rate(rate);
    }
    if let Some(concurrent) = spec.concurrent {
        rule = rule.concurrent(concurrent);
    }
    if let Some(request) = &spec.request {
        rule = rule.request(request.clone());
    }
    if let Some(agents) = &spec.user_agents {
        rule = rule.user_agents(agents.clone());
    }
    if let Some(cookie) = &spec.cookie {
        rule = rule.cookie(cookie.as_str());
    }
    if let Some(retry) = spec.retry {
        rule = rule.retry(retry);
    }
    if let Some(timeout) = spec.retry_timeout {
        rule = rule.retry_timeout(timeout);
    }
    if spec.hide == Some(true) {
        rule = rule.hide();
    }

    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::rules::shape::count_rules_depth;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const BLOG_RULES: &str = r#"
entry = "https://blog.example.com/"

[options]
mode = "bf"
total-concurrent = 10
retry = 1
retry-timeout = 100
user-agents = ["TestAgent/1.0"]

[groups.images]
rate = 200

[pages.root]
title = "title"
posts = { list = "article a.post", attr = "href", rules = "post" }

[pages.post]
heading = "h1"
body = { selector = ".content", how = "html", hide = true }
cover = { selector = "img.cover", attr = "src", group = "images", download = { path = "./covers", filename = "{{./heading}}" } }
"#;

    #[test]
    fn test_load_valid_rule_file() {
        let file = create_temp_config(BLOG_RULES);
        let rules = load_rule_file(file.path()).unwrap();

        assert_eq!(rules.entry.as_deref(), Some("https://blog.example.com/"));
        assert_eq!(rules.options.mode, Mode::Bf);
        assert_eq!(rules.options.total_concurrent, 10);
        assert_eq!(rules.options.retry, 1);
        // Unset options keep their defaults
        assert_eq!(rules.options.concurrent, 5);
        assert_eq!(rules.tree.page_count(), 2);
        assert_eq!(rules.tree.field_names(rules.tree.root()), vec!["title", "posts"]);
        assert_eq!(count_rules_depth(&rules.tree).unwrap(), 2);
    }

    #[test]
    fn test_custom_root_page() {
        let rules = parse_rule_file(
            r#"
root = "index"

[pages.index]
heading = "h1"
"#,
        )
        .unwrap();
        assert!(rules.entry.is_none());
        assert_eq!(rules.tree.field_names(rules.tree.root()), vec!["heading"]);
    }

    #[test]
    fn test_unknown_page_reference() {
        let err = parse_rule_file(
            r#"
[pages.root]
links = { list = "a", attr = "href", rules = "missing" }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPage(ref name) if name == "missing"));
    }

    #[test]
    fn test_unknown_group_reference() {
        let err = parse_rule_file(
            r#"
[pages.root]
pic = { selector = "img", attr = "src", download = true, group = "nope" }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownGroup(_)));
    }

    #[test]
    fn test_selector_and_list_together_rejected() {
        let err = parse_rule_file(
            r#"
[pages.root]
both = { selector = "a", list = "a" }
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Rule(RuleError::MustHaveOne(ref name)) if name == "both"
        ));
    }

    #[test]
    fn test_self_contained_pages_rejected() {
        let err = parse_rule_file(
            r#"
[pages.root]
next = { selector = "a.next", attr = "href", rules = "root" }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Rule(RuleError::SelfContained)));
    }

    #[test]
    fn test_missing_root_page() {
        let err = parse_rule_file(
            r#"
[pages.index]
heading = "h1"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPage(ref name) if name == "root"));
    }

    #[test]
    fn test_invalid_toml() {
        let err = parse_rule_file("this is not toml [[[").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_nonexistent_file() {
        let result = load_rule_file(Path::new("/nonexistent/rules.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
