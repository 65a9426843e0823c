//! Reference path parsing
//!
//! A reference path addresses another field's value relative to the page
//! being evaluated:
//!
//! - `./name` - a field of the current page
//! - `../name` (or `.../name`) - a field one page up; `....` goes two up
//! - `list[2]` - element 2 of a list field
//! - `\/`, `\.` and `[n\]` escape a slash, a leading dot and a literal
//!   index suffix inside a field name

use crate::rules::{Action, CompiledEntry, PageId, RuleTree};
use crate::RefPathError;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Fully resolved address of a value: the field names (with list indices)
/// from the root page down to the value
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PagePath(Vec<String>);

impl PagePath {
    /// The root page
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Path of a field below this page
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    /// Path of a list element below this page
    pub fn element(&self, name: &str, index: usize) -> Self {
        self.child(&format!("{}[{}]", name, index))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &PagePath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for PagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

static INDEX_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([0-9]+)\]$").expect("hardcoded regex pattern is valid"));

/// Splits `name[3]` into `("name", Some(3))`
fn split_index(segment: &str) -> (&str, Option<usize>) {
    if let Some(caps) = INDEX_SUFFIX.captures(segment) {
        if let (Some(whole), Ok(index)) = (caps.get(0), caps[1].parse::<usize>()) {
            return (&segment[..whole.start()], Some(index));
        }
    }
    (segment, None)
}

/// Splits a reference path into raw segments
///
/// Unescaped `/` separates segments. An escaped slash directly after a `/`
/// starts a new segment beginning with `/`; otherwise it joins the pieces
/// around it. Dot-only segments become ascend markers (`.` stays, a run of
/// `n` dots loses one dot when `n` is odd).
fn tokenize(ref_path: &str) -> Result<Vec<String>, RefPathError> {
    let mut raw: Vec<String> = Vec::new();
    for (i, chunk) in ref_path.trim().split("\\/").enumerate() {
        let mut parts = chunk.split('/');
        if i > 0 {
            let first = parts.next().unwrap_or_default();
            match raw.last_mut() {
                Some(last) if !last.is_empty() => {
                    last.push('/');
                    last.push_str(first);
                }
                _ => raw.push(format!("/{}", first)),
            }
        }
        raw.extend(parts.map(str::to_string));
    }

    let mut segments = Vec::with_capacity(raw.len());
    for segment in raw.into_iter().filter(|s| !s.is_empty()) {
        if segment.starts_with('.') {
            if !segment.chars().all(|c| c == '.') {
                return Err(RefPathError::InvalidDots(segment));
            }
            if segment.len() % 2 == 1 && segment.len() > 1 {
                segments.push(segment[1..].to_string());
                continue;
            }
        }
        segments.push(segment);
    }
    Ok(segments)
}

fn display_path(parents: &[String], last: &str) -> String {
    let joined: String = parents
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(last))
        .map(|s| format!("[\"{}\"]", s))
        .collect();
    format!("`rootPageRule{}`", joined)
}

/// Resolves a reference path against the page being evaluated
///
/// # Arguments
///
/// * `ref_path` - The reference expression, starting with `.`
/// * `entered` - Path of the page whose field is being evaluated
/// * `tree` - The rule tree, used to validate the addressed shape
///
/// # Returns
///
/// * `Ok(PagePath)` - The absolute path of the addressed value
/// * `Err(RefPathError)` - Syntax error, or the path does not address a
///   value the tree can produce
pub fn parse_ref_path(
    ref_path: &str,
    entered: &PagePath,
    tree: &RuleTree,
) -> Result<PagePath, RefPathError> {
    if !ref_path.trim().starts_with('.') {
        return Err(RefPathError::NotRelative(ref_path.to_string()));
    }

    // (segment, written by the caller) pairs
    let mut resolved: Vec<(String, bool)> =
        entered.segments().iter().map(|s| (s.clone(), false)).collect();
    for segment in tokenize(ref_path)? {
        if segment.starts_with('.') {
            let up = segment.len() / 2;
            resolved.truncate(resolved.len().saturating_sub(up));
        } else {
            resolved.push((segment, true));
        }
    }

    let mut page = Some(tree.root());
    let mut out: Vec<String> = Vec::with_capacity(resolved.len());
    for (segment, from_caller) in resolved {
        let (name, index) = split_index(&segment);
        let (name, key) = if from_caller {
            let mut name = name.to_string();
            if name.starts_with("\\.") {
                name.remove(0);
            }
            let key = match index {
                Some(index) => {
                    let key = format!("{}[{}]", name, index);
                    match page.and_then(|p| tree.entry(p, &name)) {
                        Some(CompiledEntry::Static(rule)) if rule.kind.is_list() => {}
                        Some(CompiledEntry::Deferred(_)) => {}
                        _ => return Err(RefPathError::NotAList(display_path(&out, &key))),
                    }
                    key
                }
                None => {
                    if let Some(stripped) = name.strip_suffix("\\]") {
                        name = format!("{}]", stripped);
                    }
                    match page.and_then(|p| tree.entry(p, &name)) {
                        None => return Err(RefPathError::NotFound(display_path(&out, &name))),
                        Some(CompiledEntry::Static(rule))
                            if rule.kind.is_list()
                                && matches!(rule.action, Action::Data(_) | Action::NewPage(_)) =>
                        {
                            return Err(RefPathError::MissingIndex(display_path(&out, &name)));
                        }
                        Some(_) => {}
                    }
                    name.clone()
                }
            };
            (name, key)
        } else {
            (name.to_string(), segment.clone())
        };

        page = page.and_then(|p| next_page(tree, p, &name));
        out.push(key);
    }

    if page.is_some() {
        let last = out.pop().unwrap_or_default();
        return Err(RefPathError::WholePage(display_path(&out, &last)));
    }
    Ok(PagePath(out))
}

/// The page rule a field leads into, if it has `data` or `rules`
fn next_page(tree: &RuleTree, page: PageId, name: &str) -> Option<PageId> {
    match tree.entry(page, name)? {
        CompiledEntry::Static(rule) => rule.action.page(),
        CompiledEntry::Deferred(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{PageRule, Rule};

    /// root
    ///   foo: selector + rules -> { "bar/r[23]": leaf, ".test": leaf }
    ///   "bar/r[23]": list + data -> { foo: leaf }
    ///   "/bar": leaf
    ///   title: leaf
    fn test_tree() -> RuleTree {
        let mut builder = RuleTree::builder();
        let foo_page = builder.page(
            PageRule::new()
                .field("bar/r[23]", ".foo")
                .field(".test", ".test"),
        );
        let item_page = builder.page(PageRule::new().field("foo", ".foo"));
        builder
            .build(
                PageRule::new()
                    .field("foo", Rule::selector("a").attr("href").rules(foo_page))
                    .field("bar/r[23]", Rule::list(".item").data(item_page))
                    .field("/bar", ".bar")
                    .field("title", "title"),
            )
            .unwrap()
    }

    fn parse(ref_path: &str, entered: &[&str]) -> Result<String, RefPathError> {
        let tree = test_tree();
        parse_ref_path(ref_path, &PagePath::from_segments(entered.iter().copied()), &tree)
            .map(|p| p.to_string())
    }

    #[test]
    fn test_current_page_field() {
        assert_eq!(parse("./title", &[]).unwrap(), "title");
    }

    #[test]
    fn test_ascend_and_escaped_slash_with_literal_index() {
        assert_eq!(
            parse("../foo/bar\\/r[23\\]", &["bar/r[23][0]"]).unwrap(),
            "foo,bar/r[23]"
        );
    }

    #[test]
    fn test_escaped_slash_after_separator_starts_segment() {
        assert_eq!(parse(".../foo/../\\/bar", &["bar/r[23][0]"]).unwrap(), "/bar");
    }

    #[test]
    fn test_escaped_leading_dot() {
        assert_eq!(
            parse("../foo/../foo/\\.test", &["bar/r[23][1]"]).unwrap(),
            "foo,.test"
        );
    }

    #[test]
    fn test_list_index_into_data_page() {
        assert_eq!(
            parse("../bar\\/r[23][2]/foo", &["foo"]).unwrap(),
            "bar/r[23][2],foo"
        );
    }

    #[test]
    fn test_escaped_slash_at_start() {
        assert_eq!(parse("./\\/bar", &[]).unwrap(), "/bar");
    }

    #[test]
    fn test_four_dots_ascend_two_levels() {
        assert_eq!(parse("..../title", &["bar/r[23][0]", "foo"]).unwrap(), "title");
    }

    #[test]
    fn test_must_start_with_dot() {
        assert!(matches!(parse("title", &[]), Err(RefPathError::NotRelative(_))));
    }

    #[test]
    fn test_dot_prefixed_name_rejected() {
        let err = parse("./.test", &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expect `.test` not to starts with '.' (you can use '\\\\.' to escape '.')"
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse("./missing", &[]).unwrap_err();
        assert_eq!(err.to_string(), "can not find `rootPageRule[\"missing\"]`");
    }

    #[test]
    fn test_index_on_scalar_rejected() {
        assert!(matches!(parse("./title[0]", &[]), Err(RefPathError::NotAList(_))));
    }

    #[test]
    fn test_page_list_without_index_rejected() {
        assert!(matches!(
            parse("./bar\\/r[23\\]/foo", &[]),
            Err(RefPathError::MissingIndex(_))
        ));
    }

    #[test]
    fn test_whole_page_rejected() {
        assert!(matches!(parse("./foo", &[]), Err(RefPathError::WholePage(_))));
    }

    #[test]
    fn test_split_index() {
        assert_eq!(split_index("items[12]"), ("items", Some(12)));
        assert_eq!(split_index("items[12\\]"), ("items[12\\]", None));
        assert_eq!(split_index("items"), ("items", None));
    }
}
