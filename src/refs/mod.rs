//! Reference variables
//!
//! Fields publish their values under their page path; other fields read
//! them with relative reference paths, waiting if the value is not yet
//! available. At the end of a crawl every value that was awaited but never
//! written fails its readers with a "never get" error.

mod lookup;
pub mod path;
mod store;
pub mod template;

pub use lookup::Lookup;
pub use path::{parse_ref_path, PagePath};
pub use store::{RefStore, RefValue};
