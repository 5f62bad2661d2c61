//! HTML layer for wxpath.
//!
//! Fetched pages are parsed with `html5ever` into an owned arena tree
//! ([`HtmlDom`](HtmlDom)), which result-pipeline hooks may inspect or prune,
//! and then converted into an [`sxd_document::Package`] so that XPath can be
//! evaluated against real-world HTML. Parsing does not fail hard: errors are
//! collected and the tree is populated as best as possible.

#[macro_use]
extern crate html5ever;

mod dom;
mod markup;
mod sxd;
mod tree_sink;

pub use dom::{HtmlDom, NodeData, NodeId};
pub use markup::element_markup;
pub use sxd::to_package;
