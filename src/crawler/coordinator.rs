//! Crawler coordinator - main crawl orchestration logic
//!
//! This module drives one crawl from the entry URL to the final result:
//! - Fetching and parsing the entry page
//! - Evaluating the root page rule against it
//! - Polling until the crawl has converged
//! - Failing every reference wait that can no longer be satisfied
//! - Snapshotting the result tree

use crate::config::{validate_options, CrawlOptions};
use crate::crawler::engine::{evaluate_page, Crawl, PageContext};
use crate::crawler::fetcher::{fetch_page, FetchError, FetchedPage, RequestProfile};
use crate::crawler::parser::{Document, Scope};
use crate::refs::PagePath;
use crate::result::{LivePage, PageData};
use crate::rules::RuleTree;
use crate::url::parse_entry_url;
use crate::CrawlError;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::task::LocalSet;
use url::Url;

/// Main crawler coordinator structure
pub struct Coordinator {
    crawl: Rc<Crawl>,
    entry: Url,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `url` - The entry URL; must be an absolute http(s) URL
    /// * `tree` - The rule tree evaluated against the entry page
    /// * `options` - Crawl-wide options
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(CrawlError)` - The URL, options or rule tree are invalid
    pub fn new(url: &str, tree: RuleTree, options: CrawlOptions) -> Result<Self, CrawlError> {
        validate_options(&options)?;
        let entry = parse_entry_url(url).map_err(|e| {
            tracing::debug!("Rejected entry URL {:?}: {}", url, e);
            CrawlError::InvalidEntryUrl(url.to_string())
        })?;
        let crawl = Crawl::new(tree, options)?;

        Ok(Self { crawl, entry })
    }

    /// Runs the crawl to completion
    ///
    /// Must be polled inside a [`LocalSet`]; [`run_crawl`] does that.
    pub async fn run(self) -> Result<PageData, CrawlError> {
        let crawl = &self.crawl;
        let start_time = Instant::now();
        tracing::info!(
            "Starting crawl at {} ({:?} mode, {} page rules)",
            self.entry,
            crawl.plan.mode,
            crawl.plan.page_rules_length
        );

        let fetched = self.fetch_entry().await?;
        let live = LivePage::new(self.entry.as_str());
        evaluate_page(
            crawl,
            PageContext {
                doc: Rc::new(Document::parse(&fetched.body, fetched.url)),
                scope: Scope::Document,
                page: crawl.tree.root(),
                path: PagePath::root(),
                live: live.clone(),
                global_priority: crawl.plan.root_priority,
            },
        );

        self.wait_until(|crawl| crawl.is_settled()).await?;

        let waiting = crawl.store.pending_paths();
        if !waiting.is_empty() {
            tracing::debug!("Draining {} unresolved reference variable(s)", waiting.len());
        }
        crawl.store.drain();
        self.wait_until(|crawl| crawl.is_finished()).await?;

        tracing::info!("Crawl completed in {:?}", start_time.elapsed());
        let result = live.borrow().snapshot();
        Ok(result)
    }

    /// Fetches the entry page; any failure is fatal
    async fn fetch_entry(&self) -> Result<FetchedPage, CrawlError> {
        let options = &self.crawl.options;
        let profile = RequestProfile {
            request: options.request.clone(),
            user_agents: options.user_agents.clone(),
            cookie: options.entry_cookie.clone(),
        };

        let mut retries_left = options.retry;
        loop {
            tracing::info!("FETCH URL: \"{}\"", self.entry);
            match fetch_page(&self.crawl.client, &self.entry, &profile).await {
                Ok(page) => {
                    tracing::info!("OK URL: \"{}\"", self.entry);
                    return Ok(page);
                }
                Err(err) if err.is_retryable() && retries_left > 0 => {
                    retries_left -= 1;
                    tracing::warn!(
                        "RETRY URL: \"{}\" after {} ({} retries left)",
                        self.entry,
                        err,
                        retries_left
                    );
                    tokio::time::sleep(Duration::from_millis(options.retry_timeout)).await;
                }
                Err(err) => return Err(self.entry_error(err)),
            }
        }
    }

    fn entry_error(&self, err: FetchError) -> CrawlError {
        let url = self.entry.to_string();
        match err {
            FetchError::NotHtml(content_type) => CrawlError::NotHtml { url, content_type },
            other => CrawlError::EntryStatus {
                url,
                reason: other.to_string(),
            },
        }
    }

    /// Polls until `done` holds or a fatal error is recorded
    async fn wait_until(&self, done: impl Fn(&Crawl) -> bool) -> Result<(), CrawlError> {
        let interval = Duration::from_millis(self.crawl.options.poll_interval);
        loop {
            tokio::time::sleep(interval).await;
            if let Some(err) = self.crawl.take_fatal() {
                return Err(err);
            }
            if done(&self.crawl) {
                return Ok(());
            }
        }
    }
}

/// Runs a crawl on a fresh [`LocalSet`]
///
/// Documents and result slots are shared between local tasks, so the whole
/// crawl runs on the calling thread.
pub async fn run_crawl(url: &str, tree: RuleTree, options: CrawlOptions) -> Result<PageData, CrawlError> {
    let coordinator = Coordinator::new(url, tree, options)?;
    LocalSet::new().run_until(coordinator.run()).await
}
