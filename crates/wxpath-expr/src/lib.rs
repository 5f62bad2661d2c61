//! Expression parsing for wxpath.
//!
//! A wxpath expression chains XPath steps with a `url(...)` fetching operator:
//!
//! ```text
//! url('https://example.org')///url(//a/@href)/map{'t':(//h1)[1]}
//! ```
//!
//! [`parse`](parse) lowers such an expression into a [`Program`](Program), an
//! ordered list of [`Segment`](Segment)s that the crawler interprets. The
//! parser only finds the boundaries of embedded XPath fragments (tracking
//! bracket and quote balance); the fragments themselves are compiled later by
//! the XPath evaluator.

mod error;
mod lexer;
mod parser;
mod program;

pub use error::ParseError;
pub use parser::parse;
pub use program::{BinaryOp, Program, Segment, UrlAxis};
