//! Configuration module for Treecrawl
//!
//! This module holds the crawl-wide options and loads rule files: TOML
//! documents that declare options, groups and named page rules.
//!
//! # Example
//!
//! ```no_run
//! use treecrawl::config::load_rule_file;
//! use std::path::Path;
//!
//! let rules = load_rule_file(Path::new("rules.toml")).unwrap();
//! println!("Crawl mode: {:?}", rules.options.mode);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CrawlOptions, DownloadConfig, HowConfig, Mode, RequestOptions, RuleConfig, RuleFile, RuleSpec,
    UserAgents,
};

// Re-export parser functions
pub use parser::{load_rule_file, parse_rule_file, LoadedRules};
pub use validation::validate_options;
