//! Parsed HTML documents
//!
//! This module wraps a parsed document together with:
//! - The URL it was fetched from
//! - Its base URL (the first `<base href>`, resolved against the page URL)
//! - Element scopes for `data` rules evaluated against a matched element

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

static BASE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("base[href]").expect("hardcoded selector is valid"));

/// Where a page rule is evaluated inside a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The whole document
    Document,
    /// Descendants of one element
    Element(NodeId),
    /// A `data` scope whose element did not match; selects nothing
    Nothing,
}

/// A parsed HTML page
pub struct Document {
    html: Html,
    url: Url,
    base: Url,
}

impl Document {
    /// Parses an HTML document fetched from `url`
    ///
    /// # Arguments
    ///
    /// * `body` - The HTML content to parse
    /// * `url` - The URL the content was fetched from (after redirects)
    ///
    /// # Example
    ///
    /// ```
    /// use treecrawl::crawler::Document;
    /// use url::Url;
    ///
    /// let html = r#"<html><head><base href="/static/"></head><body></body></html>"#;
    /// let doc = Document::parse(html, Url::parse("https://example.com/a/b").unwrap());
    /// assert_eq!(doc.base_url().as_str(), "https://example.com/static/");
    /// ```
    pub fn parse(body: &str, url: Url) -> Self {
        let html = Html::parse_document(body);
        let base = html
            .select(&BASE_SELECTOR)
            .next()
            .and_then(|element| element.value().attr("href"))
            .and_then(|href| url.join(href.trim()).ok())
            .unwrap_or_else(|| url.clone());

        Self { html, url, base }
    }

    /// The URL the document was fetched from
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The URL relative links are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Elements matching `selector` inside `scope`, in document order
    pub fn select(&self, selector: &Selector, scope: Scope) -> Vec<ElementRef<'_>> {
        match scope {
            Scope::Document => self.html.select(selector).collect(),
            Scope::Element(id) => self
                .element(id)
                .map(|element| element.select(selector).collect())
                .unwrap_or_default(),
            Scope::Nothing => Vec::new(),
        }
    }

    /// Looks an element up by node id
    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }
}
