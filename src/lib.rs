//! Treecrawl: a declarative rule-tree web crawler
//!
//! This crate fetches a page, evaluates a tree of extraction rules against
//! it, follows extracted links into nested rule trees, downloads referenced
//! resources and assembles a result tree shaped like the rule tree.
//!
//! ```no_run
//! use treecrawl::{crawl, CrawlOptions, Rule, PageRule, RuleTree, DownloadSpec};
//!
//! # async fn example() -> Result<(), treecrawl::CrawlError> {
//! let tree = RuleTree::builder().build(
//!     PageRule::new()
//!         .field("title", "title")
//!         .field(
//!             "pic",
//!             Rule::selector("img")
//!                 .attr("src")
//!                 .download(DownloadSpec::new().path("/tmp").filename("cover")),
//!         ),
//! )?;
//!
//! let result = crawl("https://example.com/", tree, CrawlOptions::default()).await?;
//! println!("{}", serde_json::to_string_pretty(&result).unwrap());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crawler;
pub mod refs;
pub mod result;
pub mod rules;
pub mod scheduler;
pub mod url;

use thiserror::Error;

/// Fatal errors: any of these rejects the whole crawl
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("expect url(\"{0}\") to be a valid URL")]
    InvalidEntryUrl(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("invalid reference path found: {0}")]
    RefPath(#[from] RefPathError),

    #[error("duplicate reference Page Path is not allow: `{0}`")]
    DuplicateRefPath(String),

    #[error("request url({url}) failed: {reason}")]
    EntryStatus { url: String, reason: String },

    #[error("expect content type for url({url}) to be html-type, but got 'content-type': {content_type}")]
    NotHtml { url: String, content_type: String },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A field-scoped failure surfaced through a reference lookup or a
    /// custom extractor; the engine records it on the field instead of
    /// aborting.
    #[error(transparent)]
    Field(#[from] FieldError),
}

impl CrawlError {
    /// Returns true if the error must abort the crawl
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Field(_))
    }
}

/// Field-scoped errors: stored in the result tree and handed to reference
/// listeners, never abort sibling fields
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("reference variable for path `{0}` never get")]
    NeverGet(String),

    #[error("{0}")]
    Failed(String),
}

/// Rule-schema violations detected while building or resolving a rule tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("expect page rule to be a non-empty-object")]
    EmptyPageRule,

    #[error("self-contained page rule is not allow")]
    SelfContained,

    #[error("page rule #{0} is reserved but never defined")]
    UndefinedPage(usize),

    #[error("page rule #{0} does not exist")]
    UnknownPage(usize),

    #[error("group #{0} does not exist")]
    UnknownGroup(usize),

    #[error("expect has and only has one of these field: {0}.selector, {0}.list")]
    MustHaveOne(String),

    #[error("{0} can not co-exist, use one of them")]
    CoExist(String),

    #[error("expect `{0}` to be a non-empty string")]
    EmptyString(String),

    #[error("expect `{0}.max` to be a positive number")]
    InvalidMax(String),

    #[error("expect `{0}.group` includes 'rate' or 'concurrent' at least")]
    GroupWithoutLimits(String),

    #[error("invalid selector `{selector}` in `{rule}`")]
    InvalidSelector { rule: String, selector: String },
}

/// Reference path syntax and shape errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefPathError {
    #[error("expect Reference Path `{0}` start with `.`")]
    NotRelative(String),

    #[error("expect `{0}` not to starts with '.' (you can use '\\\\.' to escape '.')")]
    InvalidDots(String),

    #[error("can not find {0}")]
    NotFound(String),

    #[error("{0} is not a list")]
    NotAList(String),

    #[error("{0} is a Page Rule list, but likely you forgot to specify index")]
    MissingIndex(String),

    #[error("can not refer a whole page data ({0})")]
    WholePage(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown page rule `{0}`")]
    UnknownPage(String),

    #[error("Unknown group `{0}`")]
    UnknownGroup(String),

    #[error("Invalid rule tree: {0}")]
    Rule(#[from] RuleError),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{CrawlOptions, Mode, RequestOptions, UserAgents};
pub use crawler::crawl;
pub use refs::{Lookup, PagePath};
pub use result::{Node, PageData};
pub use rules::{DownloadSpec, Group, GroupId, How, PageId, PageRule, Rule, RuleEntry, RuleTree, WaitFor};
pub use serde_json::Value;
