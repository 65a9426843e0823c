//! Rule evaluation engine
//!
//! This module walks a page rule against a parsed document:
//! - Every field runs as its own local task and settles its own result slot
//! - `data` rules recurse into the matched elements of the same document
//! - `rules` and `download` rules turn extracted values into queued tasks
//! - Leaf values are published to the reference store
//!
//! A field failure is written into the field's slot and published to its
//! reference listeners; only fatal errors stop the crawl.

use crate::config::{CrawlOptions, RequestOptions};
use crate::crawler::download::ResourceName;
use crate::crawler::extract;
use crate::crawler::fetcher::{build_http_client, RequestProfile};
use crate::crawler::parser::{Document, Scope};
use crate::crawler::plan::CrawlPlan;
use crate::crawler::task::{self, Job, ListProgress, Task};
use crate::crawler::tracker::{Evaluation, Tracker};
use crate::refs::template::{has_template, render};
use crate::refs::{Lookup, PagePath, RefStore, RefValue};
use crate::result::{LiveNode, LivePage, LivePageRef, Slot};
use crate::rules::{
    parse_selector, Action, CompiledEntry, CompiledRule, DownloadSpec, Extract, Kind, PageId,
    RuleTree,
};
use crate::scheduler::{GroupRegistry, PriorityQueue, QueueOptions};
use crate::url::resolve_link;
use crate::{CrawlError, FieldError, RuleError};
use ego_tree::NodeId;
use futures::future::join_all;
use reqwest::Client;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Crawl-scoped state shared by every field evaluation and task
pub(crate) struct Crawl {
    pub tree: Arc<RuleTree>,
    pub options: CrawlOptions,
    pub plan: CrawlPlan,
    pub client: Client,
    pub store: Rc<RefStore>,
    pub global: PriorityQueue,
    pub groups: GroupRegistry,
    pub tracker: Rc<Tracker>,
    fatal: RefCell<Option<CrawlError>>,
}

impl Crawl {
    pub fn new(tree: RuleTree, options: CrawlOptions) -> Result<Rc<Self>, CrawlError> {
        let tree = Arc::new(tree);
        let plan = CrawlPlan::resolve(&tree, &options)?;
        let client = build_http_client(&options)?;
        let global = PriorityQueue::new(QueueOptions {
            concurrent: options.total_concurrent,
            rate: 0,
            priority_range: plan.priority_range,
        });
        let groups = GroupRegistry::new(tree.clone(), options.rate, options.concurrent);

        Ok(Rc::new(Self {
            tree,
            options,
            plan,
            client,
            store: Rc::new(RefStore::new()),
            global,
            groups,
            tracker: Tracker::new(),
            fatal: RefCell::new(None),
        }))
    }

    /// Records a fatal error; the first one wins
    pub fn fail(&self, err: CrawlError) {
        let mut fatal = self.fatal.borrow_mut();
        if fatal.is_none() {
            tracing::error!("Crawl aborted: {}", err);
            *fatal = Some(err);
        }
    }

    pub fn has_failed(&self) -> bool {
        self.fatal.borrow().is_some()
    }

    pub fn take_fatal(&self) -> Option<CrawlError> {
        self.fatal.borrow_mut().take()
    }

    /// Nothing can make progress without a reference being written
    pub fn is_settled(&self) -> bool {
        !self.global.is_busy() && self.tracker.is_settled()
    }

    /// Nothing is left running at all
    pub fn is_finished(&self) -> bool {
        !self.global.is_busy() && self.tracker.retries() == 0 && self.tracker.evaluations() == 0
    }

    /// Writes a reference variable; a duplicate write is fatal
    pub fn publish(&self, path: PagePath, value: RefValue) {
        if let Err(err) = self.store.set(path, value) {
            self.fail(err);
        }
    }

    pub fn lookup(&self, entered: PagePath, evaluation: Option<Evaluation>) -> Lookup {
        Lookup::new(self.store.clone(), self.tree.clone(), entered, evaluation)
    }

    /// Request settings and retry policy of a rule: rule settings win over
    /// its group's, which win over the global options
    pub fn request_profile(&self, rule: &CompiledRule) -> (RequestProfile, u32, u64) {
        let group = rule.scheduling.group.and_then(|id| self.tree.group(id));
        let overrides = &rule.request;

        let mut request = self.options.request.clone();
        if let Some(group_request) = group.and_then(|g| g.request.as_ref()) {
            merge_request(&mut request, group_request);
        }
        if let Some(rule_request) = &overrides.request {
            merge_request(&mut request, rule_request);
        }

        let profile = RequestProfile {
            request,
            user_agents: overrides
                .user_agents
                .clone()
                .or_else(|| group.and_then(|g| g.user_agents.clone()))
                .or_else(|| self.options.user_agents.clone()),
            cookie: overrides
                .cookie
                .clone()
                .or_else(|| group.and_then(|g| g.cookie.clone())),
        };
        let retry = overrides
            .retry
            .or_else(|| group.and_then(|g| g.retry))
            .unwrap_or(self.options.retry);
        let retry_timeout = overrides
            .retry_timeout
            .or_else(|| group.and_then(|g| g.retry_timeout))
            .unwrap_or(self.options.retry_timeout);

        (profile, retry, retry_timeout)
    }
}

fn merge_request(base: &mut RequestOptions, over: &RequestOptions) {
    for (name, value) in &over.headers {
        base.headers.insert(name.clone(), value.clone());
    }
    if over.timeout_ms.is_some() {
        base.timeout_ms = over.timeout_ms;
    }
}

/// A page rule being evaluated against (part of) a document
#[derive(Clone)]
pub(crate) struct PageContext {
    pub doc: Rc<Document>,
    pub scope: Scope,
    pub page: PageId,
    /// Reference path of this page
    pub path: PagePath,
    pub live: LivePageRef,
    /// Default global priority of tasks submitted from this page
    pub global_priority: usize,
}

/// Declares every field of the page and starts one task per field
///
/// Returns before any field is evaluated; the tasks settle the page's
/// slots as they finish.
pub(crate) fn evaluate_page(crawl: &Rc<Crawl>, ctx: PageContext) {
    let Some(page) = crawl.tree.page(ctx.page) else {
        crawl.fail(RuleError::UnknownPage(ctx.page.index()).into());
        return;
    };

    {
        let mut live = ctx.live.borrow_mut();
        for (name, entry) in &page.fields {
            let hidden = matches!(entry, CompiledEntry::Static(rule) if rule.hide);
            live.declare(name, hidden);
        }
    }

    for name in page.fields.keys() {
        // Counted before the task first runs so the crawl never looks idle
        let evaluation = crawl.tracker.begin();
        tokio::task::spawn_local(evaluate_field(
            crawl.clone(),
            ctx.clone(),
            name.clone(),
            evaluation,
        ));
    }
}

async fn evaluate_field(crawl: Rc<Crawl>, ctx: PageContext, name: String, evaluation: Evaluation) {
    if crawl.has_failed() {
        return;
    }
    let slot = Slot::field(&ctx.live, &name);
    let lookup = crawl.lookup(ctx.path.clone(), Some(evaluation));

    let rule = match field_rule(&crawl, &ctx, &name, &lookup).await {
        Ok(rule) => rule,
        Err(err) => return fail_field(&crawl, &ctx, &name, None, &slot, err),
    };
    if rule.hide {
        ctx.live.borrow_mut().set_hidden(&name, true);
    }

    let (how, nodes) = match prepare(&ctx, &rule, &lookup).await {
        Ok(prepared) => prepared,
        Err(err) => return fail_field(&crawl, &ctx, &name, Some(rule.as_ref()), &slot, err),
    };

    let targets: Vec<Option<NodeId>> = match rule.kind {
        Kind::Scalar { .. } => vec![nodes.first().copied()],
        Kind::List { .. } => nodes.into_iter().map(Some).collect(),
    };
    tracing::trace!("Field `{}` of {:?} matched {} element(s)", name, ctx.path, targets.len());

    match &rule.action {
        Action::Data(page) => open_data_scopes(&crawl, &ctx, &rule, *page, &slot, &targets),
        Action::Leaf => {
            let values = extract_values(&ctx, &rule, &how, &targets, &lookup).await;
            if let Some(values) = check_fatal(&crawl, values) {
                settle_leaf(&crawl, &ctx, &rule, &slot, values);
            }
        }
        Action::NewPage(page) => {
            let values = extract_values(&ctx, &rule, &how, &targets, &lookup).await;
            if let Some(values) = check_fatal(&crawl, values) {
                if let Err(err) = schedule_pages(&crawl, &ctx, &rule, *page, &slot, values) {
                    crawl.fail(err);
                }
            }
        }
        Action::Download(spec) => {
            let values = extract_values(&ctx, &rule, &how, &targets, &lookup).await;
            if let Some(values) = check_fatal(&crawl, values) {
                if let Err(err) =
                    schedule_downloads(&crawl, &ctx, &rule, spec, &slot, values, &lookup).await
                {
                    crawl.fail(err);
                }
            }
        }
    }
}

/// The compiled rule of a field, waiting for a deferred rule's references
async fn field_rule(
    crawl: &Crawl,
    ctx: &PageContext,
    name: &str,
    lookup: &Lookup,
) -> Result<Arc<CompiledRule>, CrawlError> {
    match crawl.tree.entry(ctx.page, name) {
        Some(CompiledEntry::Static(rule)) => Ok(rule.clone()),
        Some(CompiledEntry::Deferred(wait)) => {
            let values = lookup.get_all(wait.paths()).await?;
            let rule = wait.resolve(values);
            Ok(Arc::new(crawl.tree.compile(name, rule)?))
        }
        None => Err(RuleError::UnknownPage(ctx.page.index()).into()),
    }
}

/// Substitutes templated attribute and selector strings, then selects
async fn prepare(
    ctx: &PageContext,
    rule: &CompiledRule,
    lookup: &Lookup,
) -> Result<(Extract, Vec<NodeId>), CrawlError> {
    let how = match &rule.extraction.how {
        Extract::Attr(attr) if has_template(attr) => Extract::Attr(lookup.substitute(attr).await?),
        how => how.clone(),
    };

    let compiled = rule.kind.selector();
    let substituted;
    let selector = match &compiled.parsed {
        Some(selector) => selector,
        None => {
            let source = lookup.substitute(&compiled.source).await?;
            substituted = parse_selector(&rule.name, &source)?;
            &substituted
        }
    };

    let matched: Vec<NodeId> = ctx
        .doc
        .select(selector, ctx.scope)
        .iter()
        .map(|element| element.id())
        .collect();
    let nodes = match rule.kind {
        Kind::Scalar { eq, .. } => matched.get(eq).copied().into_iter().collect(),
        Kind::List { eq, max, .. } => matched
            .into_iter()
            .enumerate()
            .filter(|(i, _)| *i >= eq && max.map_or(true, |max| *i < max))
            .map(|(_, id)| id)
            .collect(),
    };
    Ok((how, nodes))
}

/// Extracts every target's value concurrently
async fn extract_values(
    ctx: &PageContext,
    rule: &CompiledRule,
    how: &Extract,
    targets: &[Option<NodeId>],
    lookup: &Lookup,
) -> Vec<Result<Value, CrawlError>> {
    let pending: Vec<_> = targets
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let element = node.and_then(|id| ctx.doc.element(id));
            let raw = extract::start(element, index, how, lookup);
            extract::finish(raw, index, &rule.extraction, lookup.clone())
        })
        .collect();
    join_all(pending).await
}

/// Aborts the crawl on the first fatal error; field errors pass through
fn check_fatal(
    crawl: &Crawl,
    values: Vec<Result<Value, CrawlError>>,
) -> Option<Vec<Result<Value, FieldError>>> {
    let mut checked = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Ok(value) => checked.push(Ok(value)),
            Err(CrawlError::Field(err)) => checked.push(Err(err)),
            Err(err) => {
                crawl.fail(err);
                return None;
            }
        }
    }
    Some(checked)
}

/// Records a failure that happened before the field produced anything
fn fail_field(
    crawl: &Crawl,
    ctx: &PageContext,
    name: &str,
    rule: Option<&CompiledRule>,
    slot: &Slot,
    err: CrawlError,
) {
    let CrawlError::Field(err) = err else {
        crawl.fail(err);
        return;
    };

    tracing::error!("FAILED field `{}` at {:?}: {}", name, ctx.path, err);
    slot.settle(LiveNode::Error {
        url: None,
        message: err.to_string(),
    });

    let path = ctx.path.child(name);
    match rule.map(|r| &r.action) {
        Some(Action::Leaf) | Some(Action::Download(_)) => crawl.publish(path, Err(err)),
        _ => crawl.store.poison(&path, err),
    }
}

fn open_data_scopes(
    crawl: &Rc<Crawl>,
    ctx: &PageContext,
    rule: &CompiledRule,
    page: PageId,
    slot: &Slot,
    targets: &[Option<NodeId>],
) {
    let base = ctx.doc.base_url().as_str();
    let open = |slot: Slot, path: PagePath, node: Option<NodeId>| {
        let live = LivePage::new(base);
        slot.settle(LiveNode::Page(live.clone()));
        evaluate_page(
            crawl,
            PageContext {
                doc: ctx.doc.clone(),
                scope: node.map(Scope::Element).unwrap_or(Scope::Nothing),
                page,
                path,
                live,
                global_priority: ctx.global_priority,
            },
        );
    };

    if rule.kind.is_list() {
        slot.init_list(targets.len());
        for (i, node) in targets.iter().enumerate() {
            open(slot.element(i), ctx.path.element(&rule.name, i), *node);
        }
    } else {
        let node = targets.first().copied().flatten();
        open(slot.clone(), ctx.path.child(&rule.name), node);
    }
}

fn settle_leaf(
    crawl: &Crawl,
    ctx: &PageContext,
    rule: &CompiledRule,
    slot: &Slot,
    values: Vec<Result<Value, FieldError>>,
) {
    let to_node = |value: &Result<Value, FieldError>| match value {
        Ok(value) => LiveNode::Value(value.clone()),
        Err(err) => LiveNode::Error {
            url: None,
            message: err.to_string(),
        },
    };

    if !rule.kind.is_list() {
        let value = values
            .into_iter()
            .next()
            .unwrap_or(Ok(Value::Null));
        slot.settle(to_node(&value));
        crawl.publish(ctx.path.child(&rule.name), value);
        return;
    }

    slot.init_list(values.len());
    for (i, value) in values.iter().enumerate() {
        slot.element(i).settle(to_node(value));
        crawl.publish(ctx.path.element(&rule.name, i), value.clone());
    }
    let whole = values.into_iter().collect::<Result<Vec<Value>, FieldError>>();
    crawl.publish(ctx.path.child(&rule.name), whole.map(Value::Array));
}

/// The URL an extracted value points at, resolved against the document
fn value_url(ctx: &PageContext, value: &Value) -> Option<url::Url> {
    match value {
        Value::String(s) => resolve_link(ctx.doc.base_url(), s),
        _ => None,
    }
}

fn invalid_url(kind: &str, value: &Value) -> FieldError {
    let shown = render(value);
    tracing::error!("FAILED URL: \"{}\" request failed, is not a valid URL", shown);
    FieldError::Failed(format!("{} url(\"{}\") failed: is not a valid URL", kind, shown))
}

/// Per-target slot and reference path
fn element_target(
    ctx: &PageContext,
    rule: &CompiledRule,
    slot: &Slot,
    index: usize,
) -> (Slot, PagePath, Option<usize>) {
    if rule.kind.is_list() {
        (slot.element(index), ctx.path.element(&rule.name, index), Some(index))
    } else {
        (slot.clone(), ctx.path.child(&rule.name), None)
    }
}

fn schedule_pages(
    crawl: &Rc<Crawl>,
    ctx: &PageContext,
    rule: &CompiledRule,
    page: PageId,
    slot: &Slot,
    values: Vec<Result<Value, FieldError>>,
) -> Result<(), CrawlError> {
    let (queue, default_priority) = crawl.groups.queue_for(&rule.scheduling)?;
    let (profile, retry, retry_timeout) = crawl.request_profile(rule);
    let priority = rule.scheduling.priority.unwrap_or(default_priority);
    let global_priority =
        crawl
            .plan
            .global_priority(rule.scheduling.global_priority, ctx.global_priority, &rule.name);
    let child_priority = crawl.plan.next_priority(ctx.global_priority);

    if rule.kind.is_list() {
        slot.init_list(values.len());
    }
    for (i, value) in values.into_iter().enumerate() {
        let (target, path, _) = element_target(ctx, rule, slot, i);
        let url = match value.map(|v| value_url(ctx, &v).ok_or_else(|| invalid_url("request", &v))) {
            Ok(Ok(url)) => url,
            Ok(Err(err)) | Err(err) => {
                target.settle(LiveNode::Error {
                    url: None,
                    message: err.to_string(),
                });
                crawl.store.poison(&path, err);
                continue;
            }
        };

        task::submit(
            crawl,
            Task {
                job: Job::Page {
                    page,
                    path,
                    child_priority,
                },
                url,
                slot: target,
                profile: profile.clone(),
                retries_left: retry,
                retry_timeout,
                queue: queue.clone(),
                priority,
                global_priority,
            },
            false,
        );
    }
    Ok(())
}

async fn schedule_downloads(
    crawl: &Rc<Crawl>,
    ctx: &PageContext,
    rule: &CompiledRule,
    spec: &DownloadSpec,
    slot: &Slot,
    values: Vec<Result<Value, FieldError>>,
    lookup: &Lookup,
) -> Result<(), CrawlError> {
    let (queue, default_priority) = crawl.groups.queue_for(&rule.scheduling)?;
    let (profile, retry, retry_timeout) = crawl.request_profile(rule);
    let priority = rule.scheduling.priority.unwrap_or(default_priority);
    let global_priority =
        crawl
            .plan
            .global_priority(rule.scheduling.global_priority, ctx.global_priority, &rule.name);

    let progress = if rule.kind.is_list() {
        slot.init_list(values.len());
        Some(ListProgress::new(
            values.len(),
            slot.clone(),
            ctx.path.child(&rule.name),
        ))
    } else {
        None
    };
    if values.is_empty() {
        if let Some(progress) = &progress {
            progress.publish(crawl);
        }
    }

    for (i, value) in values.into_iter().enumerate() {
        let (target, path, index) = element_target(ctx, rule, slot, i);
        let prepared = match value.map(|v| value_url(ctx, &v).ok_or_else(|| invalid_url("download", &v))) {
            Ok(Ok(url)) => match ResourceName::prepare(spec, index, lookup).await {
                Ok(name) => Ok((url, name)),
                Err(CrawlError::Field(err)) => Err(err),
                Err(err) => return Err(err),
            },
            Ok(Err(err)) | Err(err) => Err(err),
        };

        let (url, name) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                target.settle(LiveNode::Error {
                    url: None,
                    message: err.to_string(),
                });
                crawl.publish(path, Err(err));
                if let Some(progress) = &progress {
                    progress.element_settled(crawl);
                }
                continue;
            }
        };

        task::submit(
            crawl,
            Task {
                job: Job::Download {
                    name,
                    path,
                    list: progress.clone(),
                },
                url,
                slot: target,
                profile: profile.clone(),
                retries_left: retry,
                retry_timeout,
                queue: queue.clone(),
                priority,
                global_priority,
            },
            false,
        );
    }
    Ok(())
}
