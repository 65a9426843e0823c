//! Fetch and download tasks
//!
//! A task passes through two queues. The global queue orders tasks by
//! global priority and caps total concurrency. The rule's own queue (a
//! group queue or a private one) applies its rate and concurrency. A task
//! holds its global slot until the private queue has run it.

use crate::crawler::download::{save_resource, ResourceName};
use crate::crawler::engine::{evaluate_page, Crawl, PageContext};
use crate::crawler::fetcher::{content_type, fetch, fetch_page, FetchError, FetchedPage, RequestProfile};
use crate::crawler::parser::{Document, Scope};
use crate::refs::PagePath;
use crate::result::{LiveNode, LivePage, Slot};
use crate::rules::PageId;
use crate::scheduler::PriorityQueue;
use crate::FieldError;
use serde_json::Value;
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

pub(crate) enum Job {
    /// Fetch a page and evaluate `page` against it
    Page {
        page: PageId,
        path: PagePath,
        child_priority: usize,
    },
    /// Save a resource to disk
    Download {
        name: ResourceName,
        path: PagePath,
        list: Option<Rc<ListProgress>>,
    },
}

impl Job {
    fn kind(&self) -> &'static str {
        match self {
            Job::Page { .. } => "request",
            Job::Download { .. } => "download",
        }
    }
}

pub(crate) struct Task {
    pub job: Job,
    pub url: Url,
    pub slot: Slot,
    pub profile: RequestProfile,
    pub retries_left: u32,
    /// Milliseconds before a retry is queued
    pub retry_timeout: u64,
    pub queue: PriorityQueue,
    pub priority: usize,
    pub global_priority: usize,
}

/// Publishes a download list as a whole once every element has settled
pub(crate) struct ListProgress {
    remaining: Cell<usize>,
    slot: Slot,
    path: PagePath,
}

impl ListProgress {
    pub fn new(len: usize, slot: Slot, path: PagePath) -> Rc<Self> {
        Rc::new(Self {
            remaining: Cell::new(len),
            slot,
            path,
        })
    }

    pub fn element_settled(&self, crawl: &Crawl) {
        let remaining = self.remaining.get().saturating_sub(1);
        self.remaining.set(remaining);
        if remaining == 0 {
            self.publish(crawl);
        }
    }

    pub fn publish(&self, crawl: &Crawl) {
        crawl.publish(self.path.clone(), Ok(self.slot.snapshot().to_json()));
    }
}

enum Outcome {
    Page(FetchedPage),
    Saved(PathBuf),
}

/// Queues a task on the global queue, then on its own queue
pub(crate) fn submit(crawl: &Rc<Crawl>, task: Task, is_retry: bool) {
    let global_priority = task.global_priority;
    let runner = crawl.clone();
    crawl.global.submit(
        async move {
            let (done, finished) = oneshot::channel::<()>();
            let queue = task.queue.clone();
            let priority = task.priority;
            queue.submit(
                async move {
                    run(runner, task, is_retry).await;
                    let _ = done.send(());
                },
                Some(priority),
            );
            let _ = finished.await;
        },
        Some(global_priority),
    );
}

async fn run(crawl: Rc<Crawl>, task: Task, is_retry: bool) {
    if crawl.has_failed() {
        return;
    }

    if is_retry {
        tracing::warn!("RETRY URL: \"{}\"", task.url);
    } else {
        tracing::info!("FETCH URL: \"{}\"", task.url);
    }

    let outcome = match &task.job {
        Job::Page { .. } => fetch_page(&crawl.client, &task.url, &task.profile)
            .await
            .map(Outcome::Page),
        Job::Download { name, .. } => download(&crawl, &task.url, &task.profile, name)
            .await
            .map(Outcome::Saved),
    };

    match outcome {
        Ok(Outcome::Page(fetched)) => open_page(&crawl, task, fetched),
        Ok(Outcome::Saved(saved)) => finish_download(&crawl, task, saved),
        Err(err) if err.is_retryable() && task.retries_left > 0 => schedule_retry(crawl, task, err),
        Err(err) => fail(&crawl, task, err),
    }
}

async fn download(
    crawl: &Crawl,
    url: &Url,
    profile: &RequestProfile,
    name: &ResourceName,
) -> Result<PathBuf, FetchError> {
    let response = fetch(&crawl.client, url, profile).await?;
    let cwd = std::env::current_dir()
        .map_err(|e| FetchError::Other(format!("no working directory: {}", e)))?;
    let target = name.resolve(
        &content_type(&response),
        &cwd,
        chrono::Utc::now().timestamp_millis(),
    );
    save_resource(response, &target).await?;
    Ok(target)
}

fn open_page(crawl: &Rc<Crawl>, task: Task, fetched: FetchedPage) {
    let Job::Page {
        page,
        path,
        child_priority,
    } = task.job
    else {
        return;
    };
    tracing::info!("OK URL: \"{}\"", task.url);

    let live = LivePage::new(task.url.as_str());
    task.slot.settle(LiveNode::Page(live.clone()));
    evaluate_page(
        crawl,
        PageContext {
            doc: Rc::new(Document::parse(&fetched.body, fetched.url)),
            scope: Scope::Document,
            page,
            path,
            live,
            global_priority: child_priority,
        },
    );
}

fn finish_download(crawl: &Crawl, task: Task, saved: PathBuf) {
    let Job::Download { path, list, .. } = task.job else {
        return;
    };
    let saved_path = saved.to_string_lossy().into_owned();
    tracing::info!("SAVED URL: \"{}\" to {}", task.url, saved_path);

    task.slot.settle(LiveNode::Resource {
        url: task.url.to_string(),
        saved_path: saved_path.clone(),
    });
    crawl.publish(path, Ok(Value::String(saved_path)));
    if let Some(list) = list {
        list.element_settled(crawl);
    }
}

fn fail(crawl: &Crawl, task: Task, err: FetchError) {
    let message = format!("{} url({}) failed: {}", task.job.kind(), task.url, err);
    tracing::error!("FAILED URL: \"{}\" {}", task.url, err);

    task.slot.settle(LiveNode::Error {
        url: Some(task.url.to_string()),
        message: message.clone(),
    });
    match task.job {
        Job::Page { path, .. } => crawl.store.poison(&path, FieldError::Failed(message)),
        Job::Download { path, list, .. } => {
            crawl.publish(path, Err(FieldError::Failed(message)));
            if let Some(list) = list {
                list.element_settled(crawl);
            }
        }
    }
}

fn schedule_retry(crawl: Rc<Crawl>, mut task: Task, err: FetchError) {
    task.retries_left -= 1;
    tracing::debug!(
        "{} failed ({}), retrying in {}ms, {} retries left",
        task.url,
        err,
        task.retry_timeout,
        task.retries_left
    );

    crawl.tracker.retry_scheduled();
    let delay = Duration::from_millis(task.retry_timeout);
    tokio::task::spawn_local(async move {
        tokio::time::sleep(delay).await;
        submit(&crawl, task, true);
        crawl.tracker.retry_fired();
    });
}
