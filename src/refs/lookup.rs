use crate::crawler::tracker::Evaluation;
use crate::refs::path::{parse_ref_path, PagePath};
use crate::refs::store::RefStore;
use crate::refs::template::{placeholders, render};
use crate::rules::RuleTree;
use crate::CrawlError;
use futures::future::join_all;
use serde_json::Value;
use std::rc::Rc;
use std::sync::Arc;

/// Reads reference variables relative to the page being evaluated
///
/// Handed to custom extractors and converters. A lookup error is either
/// fatal (a malformed path) or a [`crate::FieldError`] carried in
/// [`CrawlError::Field`] (the addressed field failed or was never set).
#[derive(Clone)]
pub struct Lookup {
    store: Rc<RefStore>,
    tree: Arc<RuleTree>,
    entered: PagePath,
    evaluation: Option<Evaluation>,
}

impl Lookup {
    pub(crate) fn new(
        store: Rc<RefStore>,
        tree: Arc<RuleTree>,
        entered: PagePath,
        evaluation: Option<Evaluation>,
    ) -> Self {
        Self {
            store,
            tree,
            entered,
            evaluation,
        }
    }

    /// Path of the page this lookup is relative to
    pub fn entered(&self) -> &PagePath {
        &self.entered
    }

    /// Resolves a reference path without waiting for its value
    pub fn resolve(&self, ref_path: &str) -> Result<PagePath, CrawlError> {
        Ok(parse_ref_path(ref_path, &self.entered, &self.tree)?)
    }

    /// Waits for the value at `ref_path`
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use treecrawl::{Lookup, Rule};
    /// let rule = Rule::selector("h1").convert_async(|value, _, lookup: Lookup| {
    ///     Box::pin(async move {
    ///         let site = lookup.get("../site").await?;
    ///         Ok::<_, treecrawl::CrawlError>(serde_json::json!({ "site": site, "heading": value }))
    ///     })
    /// });
    /// ```
    pub async fn get(&self, ref_path: &str) -> Result<Value, CrawlError> {
        let path = self.resolve(ref_path)?;
        let _parked = self.evaluation.as_ref().map(Evaluation::park);
        Ok(self.store.get(&path).await?)
    }

    /// Waits for several values at once, in path order
    pub async fn get_all(&self, ref_paths: &[String]) -> Result<Vec<Value>, CrawlError> {
        // Resolve every path first so a malformed one fails before any wait
        let paths = ref_paths
            .iter()
            .map(|p| self.resolve(p))
            .collect::<Result<Vec<_>, _>>()?;
        let _parked = self.evaluation.as_ref().map(Evaluation::park);
        join_all(paths.iter().map(|path| self.store.get(path)))
            .await
            .into_iter()
            .map(|value| value.map_err(CrawlError::from))
            .collect()
    }

    /// Replaces every `{{refPath}}` in `template` with the addressed value,
    /// left to right
    pub async fn substitute(&self, template: &str) -> Result<String, CrawlError> {
        let found = placeholders(template);
        if found.is_empty() {
            return Ok(template.to_string());
        }

        let mut out = String::with_capacity(template.len());
        let mut cursor = 0;
        for (range, ref_path) in found {
            out.push_str(&template[cursor..range.start]);
            let value = self.get(ref_path.trim()).await?;
            out.push_str(&render(&value));
            cursor = range.end;
        }
        out.push_str(&template[cursor..]);
        Ok(out)
    }
}
