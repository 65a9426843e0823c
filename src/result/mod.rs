//! The result tree
//!
//! A crawl returns a [`PageData`] mirroring the root page rule: one
//! [`Node`] per field, nested pages for `data` and `rules` fields, saved
//! paths for downloads and error messages for fields that failed.

mod live;

pub(crate) use live::{LiveNode, LivePage, LivePageRef, Slot};

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::ops::Index;

/// Key under which a downloaded resource's saved path is serialized
pub const SAVED_PATH: &str = "SAVED_PATH";

/// Key under which a field error is serialized
pub const ERROR: &str = "ERROR";

/// The settled content of one field or list element
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Never settled; the field was still waiting on a reference when the
    /// crawl converged
    Pending,
    Value(Value),
    List(Vec<Node>),
    Page(PageData),
    Resource { url: String, saved_path: String },
    Error { url: Option<String>, message: String },
}

impl Node {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Node::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_page(&self) -> Option<&PageData> {
        match self {
            Node::Page(page) => Some(page),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn saved_path(&self) -> Option<&str> {
        match self {
            Node::Resource { saved_path, .. } => Some(saved_path),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Node::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Node::Error { .. })
    }

    /// The source URL of a nested page, resource or failed request
    pub fn url(&self) -> Option<&str> {
        match self {
            Node::Page(page) => Some(page.url()),
            Node::Resource { url, .. } => Some(url),
            Node::Error { url, .. } => url.as_deref(),
            _ => None,
        }
    }

    /// JSON rendering, identical to the serialized form
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Pending => serializer.serialize_none(),
            Node::Value(value) => value.serialize(serializer),
            Node::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Page(page) => page.serialize(serializer),
            Node::Resource { saved_path, .. } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(SAVED_PATH, saved_path)?;
                map.end()
            }
            Node::Error { message, .. } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(ERROR, message)?;
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    node: Node,
    hidden: bool,
}

/// Extracted data of one page (or one `data` scope)
///
/// Hidden fields can be read with [`PageData::get`] but are skipped by
/// [`PageData::iter`] and by serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageData {
    url: String,
    fields: IndexMap<String, Field>,
}

impl PageData {
    /// URL of the document the page was extracted from
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.fields.get(name).map(|f| &f.node)
    }

    pub fn is_hidden(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(|f| f.hidden)
    }

    /// Visible fields in rule order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.fields
            .iter()
            .filter(|(_, f)| !f.hidden)
            .map(|(name, f)| (name.as_str(), &f.node))
    }

    /// Number of visible fields
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Index<&str> for PageData {
    type Output = Node;

    fn index(&self, name: &str) -> &Node {
        static MISSING: Node = Node::Pending;
        self.get(name).unwrap_or(&MISSING)
    }
}

impl Serialize for PageData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (name, node) in self.iter() {
            map.serialize_entry(name, node)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> PageData {
        let page = LivePage::new("https://example.com/");
        page.borrow_mut().declare("title", false);
        page.borrow_mut().declare("secret", true);
        page.borrow_mut().declare("pic", false);
        page.borrow_mut().declare("next", false);
        Slot::field(&page, "title").settle(LiveNode::Value(json!("Home")));
        Slot::field(&page, "secret").settle(LiveNode::Value(json!(42)));
        Slot::field(&page, "pic").settle(LiveNode::Resource {
            url: "https://example.com/c.jpg".to_string(),
            saved_path: "/tmp/cover.jpg".to_string(),
        });
        Slot::field(&page, "next").settle(LiveNode::Error {
            url: Some("https://example.com/missing".to_string()),
            message: "request url(https://example.com/missing) failed: Not Found".to_string(),
        });
        let snapshot = page.borrow().snapshot();
        snapshot
    }

    #[test]
    fn test_serialization_skips_hidden_fields() {
        let page = sample();
        assert_eq!(
            page.to_json(),
            json!({
                "title": "Home",
                "pic": { "SAVED_PATH": "/tmp/cover.jpg" },
                "next": { "ERROR": "request url(https://example.com/missing) failed: Not Found" }
            })
        );
    }

    #[test]
    fn test_hidden_fields_are_readable() {
        let page = sample();
        assert!(page.is_hidden("secret"));
        assert_eq!(page["secret"].as_value(), Some(&json!(42)));
        assert_eq!(page.len(), 3);
        let names: Vec<&str> = page.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["title", "pic", "next"]);
    }

    #[test]
    fn test_node_accessors() {
        let page = sample();
        assert_eq!(page.url(), "https://example.com/");
        assert_eq!(page["title"].as_str(), Some("Home"));
        assert_eq!(page["pic"].saved_path(), Some("/tmp/cover.jpg"));
        assert_eq!(page["pic"].url(), Some("https://example.com/c.jpg"));
        assert!(page["next"].is_error());
        assert_eq!(page["missing"], Node::Pending);
    }
}
