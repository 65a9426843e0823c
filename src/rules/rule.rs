//! Rule schema: per-field extraction, navigation and scheduling settings

use crate::config::{RequestOptions, UserAgents};
use crate::refs::Lookup;
use crate::rules::tree::{GroupId, PageId};
use crate::CrawlError;
use futures::future::{self, FutureExt, LocalBoxFuture};
use indexmap::IndexMap;
use scraper::ElementRef;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Future returned by custom extractors and converters
pub type ValueFuture = LocalBoxFuture<'static, Result<Value, CrawlError>>;

type ExtractFn = dyn for<'a> Fn(ElementRef<'a>, usize, Lookup) -> ValueFuture + Send + Sync;
type ConvertFn = dyn Fn(Value, usize, Lookup) -> ValueFuture + Send + Sync;

/// A custom extraction function: `(element, index, lookup) -> value`
#[derive(Clone)]
pub struct Extractor(Arc<ExtractFn>);

impl Extractor {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(ElementRef<'a>, usize, Lookup) -> ValueFuture + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call(&self, element: ElementRef<'_>, index: usize, lookup: Lookup) -> ValueFuture {
        (self.0)(element, index, lookup)
    }
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Extractor(..)")
    }
}

/// A post-processing function: `(value, index, lookup) -> value`
#[derive(Clone)]
pub struct Converter(Arc<ConvertFn>);

impl Converter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value, usize, Lookup) -> ValueFuture + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call(&self, value: Value, index: usize, lookup: Lookup) -> ValueFuture {
        (self.0)(value, index, lookup)
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Converter(..)")
    }
}

/// Extraction mode; an `attr` on the rule overrides it
#[derive(Debug, Clone, Default)]
pub enum How {
    #[default]
    Text,
    Html,
    Custom(Extractor),
}

/// Which element(s) a rule matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Selector(String),
    List(String),
}

/// Where and how to save a downloaded resource
///
/// Every field may be a `{{refPath}}` template and may contain the
/// `{{index}}` placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DownloadSpec {
    pub path: Option<String>,
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub complete_path: Option<String>,
}

impl DownloadSpec {
    /// All defaults: current directory, timestamp filename, extension from
    /// the response content type
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Overrides path, filename and extension altogether
    pub fn complete_path(mut self, complete_path: impl Into<String>) -> Self {
        self.complete_path = Some(complete_path.into());
        self
    }
}

/// A shared scheduling policy
///
/// Rules that name the same group share one queue. At least one of `rate`
/// or `concurrent` must be set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Group {
    /// Minimum milliseconds between task starts; forces `concurrent = 1`
    pub rate: Option<u64>,

    pub concurrent: Option<usize>,

    pub request: Option<RequestOptions>,

    #[serde(rename = "user-agents")]
    pub user_agents: Option<UserAgents>,

    pub cookie: Option<String>,

    pub retry: Option<u32>,

    #[serde(rename = "retry-timeout")]
    pub retry_timeout: Option<u64>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate(mut self, ms: u64) -> Self {
        self.rate = Some(ms);
        self
    }

    pub fn concurrent(mut self, n: usize) -> Self {
        self.concurrent = Some(n);
        self
    }

    pub fn request(mut self, request: RequestOptions) -> Self {
        self.request = Some(request);
        self
    }

    pub fn user_agents(mut self, agents: impl Into<UserAgents>) -> Self {
        self.user_agents = Some(agents.into());
        self
    }

    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn retry_timeout(mut self, ms: u64) -> Self {
        self.retry_timeout = Some(ms);
        self
    }

    pub(crate) fn has_limits(&self) -> bool {
        self.rate.is_some() || self.concurrent.is_some()
    }
}

/// One field's extraction/navigation/scheduling specification
///
/// Built with [`Rule::selector`] or [`Rule::list`], so exactly one target is
/// always present. The remaining constraints (at most one of
/// `data`/`rules`/`download`, no `group` with `data`, positive `max`) are
/// checked when the rule tree is built.
#[derive(Debug, Clone)]
pub struct Rule {
    pub(crate) target: Target,
    pub(crate) eq: usize,
    pub(crate) max: Option<usize>,
    pub(crate) how: How,
    pub(crate) attr: Option<String>,
    pub(crate) trim: bool,
    pub(crate) convert: Option<Converter>,
    pub(crate) data: Option<PageId>,
    pub(crate) rules: Option<PageId>,
    pub(crate) download: Option<DownloadSpec>,
    pub(crate) group: Option<GroupId>,
    pub(crate) priority: Option<usize>,
    pub(crate) global_priority: Option<usize>,
    pub(crate) rate: Option<u64>,
    pub(crate) concurrent: Option<usize>,
    pub(crate) request: Option<RequestOptions>,
    pub(crate) user_agents: Option<UserAgents>,
    pub(crate) cookie: Option<String>,
    pub(crate) retry: Option<u32>,
    pub(crate) retry_timeout: Option<u64>,
    pub(crate) hide: bool,
}

impl Rule {
    fn with_target(target: Target) -> Self {
        Self {
            target,
            eq: 0,
            max: None,
            how: How::Text,
            attr: None,
            trim: true,
            convert: None,
            data: None,
            rules: None,
            download: None,
            group: None,
            priority: None,
            global_priority: None,
            rate: None,
            concurrent: None,
            request: None,
            user_agents: None,
            cookie: None,
            retry: None,
            retry_timeout: None,
            hide: false,
        }
    }

    /// Matches a single element (the `eq`-th match, default the first)
    pub fn selector(selector: impl Into<String>) -> Self {
        Self::with_target(Target::Selector(selector.into()))
    }

    /// Matches every element whose index lies in `[eq, max)`
    pub fn list(selector: impl Into<String>) -> Self {
        Self::with_target(Target::List(selector.into()))
    }

    pub fn eq(mut self, eq: usize) -> Self {
        self.eq = eq;
        self
    }

    pub fn max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    pub fn how(mut self, how: How) -> Self {
        self.how = how;
        self
    }

    /// Extract inner HTML instead of text
    pub fn html(self) -> Self {
        self.how(How::Html)
    }

    /// Extract with a synchronous custom function
    pub fn extract_with<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(ElementRef<'a>, usize) -> Value + Send + Sync + 'static,
    {
        self.how(How::Custom(Extractor::new(move |element, index, _| {
            future::ready(Ok(f(element, index))).boxed_local()
        })))
    }

    /// Extract with an asynchronous custom function that may look up
    /// reference variables
    pub fn extract_async<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(ElementRef<'a>, usize, Lookup) -> ValueFuture + Send + Sync + 'static,
    {
        self.how(How::Custom(Extractor::new(f)))
    }

    pub fn attr(mut self, attr: impl Into<String>) -> Self {
        self.attr = Some(attr.into());
        self
    }

    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    /// Post-process the extracted value with a synchronous function
    pub fn convert<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, usize) -> Value + Send + Sync + 'static,
    {
        self.convert = Some(Converter::new(move |value, index, _| {
            future::ready(Ok(f(value, index))).boxed_local()
        }));
        self
    }

    /// Post-process the extracted value asynchronously
    pub fn convert_async<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, usize, Lookup) -> ValueFuture + Send + Sync + 'static,
    {
        self.convert = Some(Converter::new(f));
        self
    }

    /// Evaluate a page rule against the matched element of the same document
    pub fn data(mut self, page: PageId) -> Self {
        self.data = Some(page);
        self
    }

    /// Fetch the extracted URL and evaluate a page rule against it
    pub fn rules(mut self, page: PageId) -> Self {
        self.rules = Some(page);
        self
    }

    /// Download the resource at the extracted URL
    pub fn download(mut self, spec: DownloadSpec) -> Self {
        self.download = Some(spec);
        self
    }

    pub fn group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }

    pub fn priority(mut self, priority: usize) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn global_priority(mut self, priority: usize) -> Self {
        self.global_priority = Some(priority);
        self
    }

    pub fn rate(mut self, ms: u64) -> Self {
        self.rate = Some(ms);
        self
    }

    pub fn concurrent(mut self, n: usize) -> Self {
        self.concurrent = Some(n);
        self
    }

    pub fn request(mut self, request: RequestOptions) -> Self {
        self.request = Some(request);
        self
    }

    pub fn user_agents(mut self, agents: impl Into<UserAgents>) -> Self {
        self.user_agents = Some(agents.into());
        self
    }

    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn retry_timeout(mut self, ms: u64) -> Self {
        self.retry_timeout = Some(ms);
        self
    }

    /// Keep the field out of enumeration and serialization
    pub fn hide(mut self) -> Self {
        self.hide = true;
        self
    }
}

impl From<&str> for Rule {
    fn from(selector: &str) -> Self {
        Rule::selector(selector)
    }
}

impl From<String> for Rule {
    fn from(selector: String) -> Self {
        Rule::selector(selector)
    }
}

/// Waits for reference paths, then computes a value from their results
///
/// The continuation receives the resolved values in path order. If any of
/// the paths resolves to an error, the continuation is skipped and the
/// owning field records that error.
#[derive(Clone)]
pub struct WaitFor<T> {
    pub(crate) paths: Vec<String>,
    pub(crate) build: Arc<dyn Fn(Vec<Value>) -> T + Send + Sync>,
}

impl<T> WaitFor<T> {
    pub fn new<I, S, F>(paths: I, build: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(Vec<Value>) -> T + Send + Sync + 'static,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            build: Arc::new(build),
        }
    }

    /// Waits for a single path
    pub fn one<F>(path: impl Into<String>, build: F) -> Self
    where
        F: Fn(Value) -> T + Send + Sync + 'static,
    {
        Self {
            paths: vec![path.into()],
            build: Arc::new(move |mut values| build(values.pop().unwrap_or(Value::Null))),
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub(crate) fn resolve(&self, values: Vec<Value>) -> T {
        (self.build)(values)
    }
}

impl<T> fmt::Debug for WaitFor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitFor").field("paths", &self.paths).finish_non_exhaustive()
    }
}

/// A field of a page rule: a rule known up front, or one computed once some
/// reference variables are available
#[derive(Debug, Clone)]
pub enum RuleEntry {
    Static(Rule),
    Deferred(WaitFor<Rule>),
}

impl From<Rule> for RuleEntry {
    fn from(rule: Rule) -> Self {
        RuleEntry::Static(rule)
    }
}

impl From<&str> for RuleEntry {
    fn from(selector: &str) -> Self {
        RuleEntry::Static(Rule::selector(selector))
    }
}

impl From<WaitFor<Rule>> for RuleEntry {
    fn from(wait: WaitFor<Rule>) -> Self {
        RuleEntry::Deferred(wait)
    }
}

/// Ordered mapping of field name to rule, evaluated against one document
#[derive(Debug, Clone, Default)]
pub struct PageRule {
    pub(crate) fields: IndexMap<String, RuleEntry>,
}

impl PageRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field; a later field with the same name replaces the earlier one
    pub fn field(mut self, name: impl Into<String>, entry: impl Into<RuleEntry>) -> Self {
        self.fields.insert(name.into(), entry.into());
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
