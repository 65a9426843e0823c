use crate::rules::DownloadSpec;
use indexmap::IndexMap;
use serde::Deserialize;

/// Traversal mode: how default global priorities are assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Flat FIFO unless a rule pins `global-priority`
    #[default]
    Default,
    /// Breadth-first: outer pages first
    Bf,
    /// Depth-first: inner pages first
    Df,
}

/// Base options for every request
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Extra request headers
    pub headers: IndexMap<String, String>,

    /// Per-request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: Option<u64>,
}

impl RequestOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

/// One user agent, or a list to pick from at random per request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum UserAgents {
    One(String),
    Many(Vec<String>),
}

impl UserAgents {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            UserAgents::One(agent) => vec![agent.clone()],
            UserAgents::Many(agents) => agents.clone(),
        }
    }
}

impl From<&str> for UserAgents {
    fn from(agent: &str) -> Self {
        UserAgents::One(agent.to_string())
    }
}

impl From<String> for UserAgents {
    fn from(agent: String) -> Self {
        UserAgents::One(agent)
    }
}

impl From<Vec<String>> for UserAgents {
    fn from(agents: Vec<String>) -> Self {
        UserAgents::Many(agents)
    }
}

impl From<Vec<&str>> for UserAgents {
    fn from(agents: Vec<&str>) -> Self {
        UserAgents::Many(agents.into_iter().map(str::to_string).collect())
    }
}

/// Crawl-wide options
///
/// Rule- and group-level settings override `rate`, `concurrent`,
/// `request`, `user-agents`, `retry` and `retry-timeout`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CrawlOptions {
    /// Concurrency of the global queue
    #[serde(rename = "total-concurrent")]
    pub total_concurrent: usize,

    pub mode: Mode,

    /// Default rate (ms between task starts) of private queues
    pub rate: u64,

    /// Default concurrency of private queues
    pub concurrent: usize,

    pub request: RequestOptions,

    #[serde(rename = "user-agents")]
    pub user_agents: Option<UserAgents>,

    /// Cookie sent with the entry request only
    #[serde(rename = "entry-cookie")]
    pub entry_cookie: Option<String>,

    /// Retries after the first attempt of a fetch or download
    pub retry: u32,

    /// Milliseconds between attempts
    #[serde(rename = "retry-timeout")]
    pub retry_timeout: u64,

    /// Milliseconds between completion checks
    #[serde(rename = "poll-interval")]
    pub poll_interval: u64,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            total_concurrent: 50,
            mode: Mode::Default,
            rate: 0,
            concurrent: 5,
            request: RequestOptions::default(),
            user_agents: None,
            entry_cookie: None,
            retry: 3,
            retry_timeout: 2000,
            poll_interval: 50,
        }
    }
}

/// A rule file: entry URL, options, groups and named page rules
#[derive(Debug, Clone, Deserialize)]
pub struct RuleFile {
    /// Entry URL; may be overridden on the command line
    pub entry: Option<String>,

    /// Name of the root page rule
    #[serde(default = "default_root")]
    pub root: String,

    #[serde(default)]
    pub options: CrawlOptions,

    #[serde(default)]
    pub groups: IndexMap<String, crate::rules::Group>,

    pub pages: IndexMap<String, IndexMap<String, RuleConfig>>,
}

fn default_root() -> String {
    "root".to_string()
}

/// A field in a rule file: a bare selector or a full rule table
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuleConfig {
    Selector(String),
    Full(Box<RuleSpec>),
}

/// Extraction mode names accepted in rule files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HowConfig {
    Text,
    Html,
}

/// `download = true` or a download table
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DownloadConfig {
    Enabled(bool),
    Spec(DownloadSpec),
}

/// A rule table in a rule file
///
/// `data` and `rules` name other pages, `group` names a group.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuleSpec {
    pub selector: Option<String>,
    pub list: Option<String>,
    pub eq: Option<usize>,
    pub max: Option<usize>,
    pub how: Option<HowConfig>,
    pub attr: Option<String>,
    pub trim: Option<bool>,
    pub data: Option<String>,
    pub rules: Option<String>,
    pub download: Option<DownloadConfig>,
    pub group: Option<String>,
    pub priority: Option<usize>,
    pub global_priority: Option<usize>,
    pub rate: Option<u64>,
    pub concurrent: Option<usize>,
    pub request: Option<RequestOptions>,
    pub user_agents: Option<UserAgents>,
    pub cookie: Option<String>,
    pub retry: Option<u32>,
    pub retry_timeout: Option<u64>,
    pub hide: Option<bool>,
}
