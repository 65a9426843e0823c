//! The in-progress result tree
//!
//! Each page keeps one slot per field, declared pending in rule order when
//! the page is entered. Tasks settle slots as they finish; every slot (and
//! every list element) is settled at most once.

use crate::result::{Field, Node, PageData};
use indexmap::IndexMap;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) type LivePageRef = Rc<RefCell<LivePage>>;

pub(crate) enum LiveNode {
    Pending,
    Value(Value),
    List(Vec<LiveNode>),
    Page(LivePageRef),
    Resource { url: String, saved_path: String },
    Error { url: Option<String>, message: String },
}

impl LiveNode {
    fn snapshot(&self) -> Node {
        match self {
            LiveNode::Pending => Node::Pending,
            LiveNode::Value(value) => Node::Value(value.clone()),
            LiveNode::List(items) => Node::List(items.iter().map(LiveNode::snapshot).collect()),
            LiveNode::Page(page) => Node::Page(page.borrow().snapshot()),
            LiveNode::Resource { url, saved_path } => Node::Resource {
                url: url.clone(),
                saved_path: saved_path.clone(),
            },
            LiveNode::Error { url, message } => Node::Error {
                url: url.clone(),
                message: message.clone(),
            },
        }
    }
}

struct LiveField {
    node: LiveNode,
    hidden: bool,
}

pub(crate) struct LivePage {
    url: String,
    fields: IndexMap<String, LiveField>,
}

impl LivePage {
    pub fn new(url: impl Into<String>) -> LivePageRef {
        Rc::new(RefCell::new(LivePage {
            url: url.into(),
            fields: IndexMap::new(),
        }))
    }

    /// Adds a pending field
    pub fn declare(&mut self, name: &str, hidden: bool) {
        self.fields.insert(
            name.to_string(),
            LiveField {
                node: LiveNode::Pending,
                hidden,
            },
        );
    }

    pub fn set_hidden(&mut self, name: &str, hidden: bool) {
        if let Some(field) = self.fields.get_mut(name) {
            field.hidden = hidden;
        }
    }

    pub fn snapshot(&self) -> PageData {
        PageData {
            url: self.url.clone(),
            fields: self
                .fields
                .iter()
                .map(|(name, field)| {
                    (
                        name.clone(),
                        Field {
                            node: field.node.snapshot(),
                            hidden: field.hidden,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Address of a field, or of one element of a list field
#[derive(Clone)]
pub(crate) struct Slot {
    page: LivePageRef,
    field: String,
    index: Option<usize>,
}

impl Slot {
    pub fn field(page: &LivePageRef, name: &str) -> Self {
        Self {
            page: page.clone(),
            field: name.to_string(),
            index: None,
        }
    }

    pub fn element(&self, index: usize) -> Self {
        Self {
            page: self.page.clone(),
            field: self.field.clone(),
            index: Some(index),
        }
    }

    /// Turns a pending field into a list of `len` pending elements
    pub fn init_list(&self, len: usize) {
        self.settle(LiveNode::List((0..len).map(|_| LiveNode::Pending).collect()));
    }

    /// Writes the slot
    pub fn settle(&self, node: LiveNode) {
        let mut page = self.page.borrow_mut();
        let Some(field) = page.fields.get_mut(&self.field) else {
            tracing::error!("Result slot `{}` was never declared", self.field);
            return;
        };
        let target = match (self.index, &mut field.node) {
            (None, target) => target,
            (Some(i), LiveNode::List(items)) => match items.get_mut(i) {
                Some(target) => target,
                None => {
                    tracing::error!("Result slot `{}[{}]` is out of range", self.field, i);
                    return;
                }
            },
            (Some(i), _) => {
                tracing::error!("Result slot `{}[{}]` is not a list element", self.field, i);
                return;
            }
        };
        debug_assert!(
            matches!(target, LiveNode::Pending),
            "result slot `{}` settled twice",
            self.field
        );
        *target = node;
    }

    /// Current content of the slot
    pub fn snapshot(&self) -> Node {
        let page = self.page.borrow();
        let Some(field) = page.fields.get(&self.field) else {
            return Node::Pending;
        };
        match (self.index, &field.node) {
            (None, node) => node.snapshot(),
            (Some(i), LiveNode::List(items)) => {
                items.get(i).map(LiveNode::snapshot).unwrap_or(Node::Pending)
            }
            (Some(_), _) => Node::Pending,
        }
    }
}
