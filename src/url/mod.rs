//! URL handling module for Treecrawl
//!
//! This module validates the entry URL and resolves extracted link values
//! against the page they were found on.

mod normalize;

// Re-export main functions
pub use normalize::{parse_entry_url, resolve_link};
