//! Crawler module for rule evaluation and resource fetching
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with per-rule request settings and retries
//! - HTML parsing and element scopes
//! - Rule evaluation and value extraction
//! - Resource downloads
//! - Overall crawl coordination

mod coordinator;
mod download;
mod engine;
mod extract;
mod fetcher;
mod parser;
mod plan;
mod task;
pub(crate) mod tracker;

pub use coordinator::{run_crawl, Coordinator};
pub use download::{extension_for, ResourceName};
pub use fetcher::{build_http_client, compose_headers, fetch, fetch_page, FetchError, FetchedPage, RequestProfile};
pub use parser::{Document, Scope};
pub use plan::CrawlPlan;

use crate::config::CrawlOptions;
use crate::result::PageData;
use crate::rules::RuleTree;
use crate::CrawlError;

/// Crawls `url` with a rule tree
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Validate the options and entry URL
/// 2. Fetch the entry page and evaluate the root page rule
/// 3. Follow `rules` fields to new pages and save `download` fields
/// 4. Wait until every task has finished or can never finish
/// 5. Return the result tree
///
/// The returned future is not `Send`; await it on a current-thread context
/// such as `#[tokio::main]`'s `block_on`.
///
/// # Arguments
///
/// * `url` - The entry URL
/// * `tree` - The rule tree; its root is evaluated against the entry page
/// * `options` - Crawl-wide options
///
/// # Returns
///
/// * `Ok(PageData)` - The result tree; failed fields carry their error
/// * `Err(CrawlError)` - The crawl was rejected or aborted
///
/// # Example
///
/// ```no_run
/// use treecrawl::{crawl, CrawlOptions, PageRule, Rule, RuleTree};
///
/// # async fn example() -> Result<(), treecrawl::CrawlError> {
/// let tree = RuleTree::builder().build(
///     PageRule::new()
///         .field("title", "title")
///         .field("links", Rule::list("a").attr("href")),
/// )?;
/// let page = crawl("https://example.com/", tree, CrawlOptions::default()).await?;
/// println!("{}", page.to_json());
/// # Ok(())
/// # }
/// ```
pub async fn crawl(url: &str, tree: RuleTree, options: CrawlOptions) -> Result<PageData, CrawlError> {
    run_crawl(url, tree, options).await
}
