//! Rule schema and the validated rule tree
//!
//! Rules are declared with builders ([`Rule`], [`PageRule`], [`Group`]),
//! collected into a [`RuleTreeBuilder`] and validated once into a
//! [`RuleTree`]. Validation compiles every rule into a closed
//! [`Kind`] × [`Action`] shape and rejects trees that contain themselves.

mod compiled;
mod rule;
pub mod shape;
mod tree;

pub use compiled::{
    parse_selector, Action, CompiledRule, CompiledSelector, Extract, Extraction, Kind,
    RequestOverrides, Scheduling,
};
pub use rule::{
    Converter, DownloadSpec, Extractor, Group, How, PageRule, Rule, RuleEntry, Target, ValueFuture,
    WaitFor,
};
pub use tree::{GroupId, PageId, RuleTree, RuleTreeBuilder};

pub(crate) use tree::CompiledEntry;
