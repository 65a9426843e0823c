//! Per-element value extraction
//!
//! A value is read from the element with the rule's extractor, trimmed if
//! it is a string and `trim` is set, then passed through `convert`.

use crate::refs::Lookup;
use crate::rules::{Extract, Extraction, ValueFuture};
use crate::CrawlError;
use futures::future::{self, FutureExt};
use html_escape::decode_html_entities;
use scraper::ElementRef;
use serde_json::Value;

/// Reads the raw value of one element
///
/// Built-in extractors finish synchronously; a custom extractor is called
/// here and awaited by [`finish`]. A missing element reads as `""` in text
/// mode and `null` otherwise.
pub(crate) fn start(
    element: Option<ElementRef<'_>>,
    index: usize,
    how: &Extract,
    lookup: &Lookup,
) -> ValueFuture {
    let value = match (how, element) {
        (Extract::Custom(extractor), Some(element)) => {
            return extractor.call(element, index, lookup.clone());
        }
        (Extract::Text, Some(element)) => Value::String(element.text().collect()),
        (Extract::Text, None) => Value::String(String::new()),
        (Extract::Html, Some(element)) => {
            Value::String(decode_html_entities(&element.inner_html()).into_owned())
        }
        (Extract::Attr(name), Some(element)) => element
            .value()
            .attr(name)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        (_, None) => Value::Null,
    };
    future::ready(Ok(value)).boxed_local()
}

/// Applies `trim` and `convert` to a raw value
pub(crate) async fn finish(
    raw: ValueFuture,
    index: usize,
    extraction: &Extraction,
    lookup: Lookup,
) -> Result<Value, CrawlError> {
    let mut value = raw.await?;

    if extraction.trim {
        if let Value::String(s) = &mut value {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_string();
            }
        }
    }

    if let Some(convert) = &extraction.convert {
        value = convert.call(value, index, lookup).await?;
    }

    Ok(value)
}
