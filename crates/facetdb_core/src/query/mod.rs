//! Query compilation and evaluation.
//!
//! Selectors lower into a backend-neutral predicate tree, a dialect
//! renders the tree into parameterized SQL, and an in-process evaluator
//! re-checks candidates wherever the backend could only approximate a
//! test. [`CompiledFind::full_coverage`] records which side owns the
//! final word on windowing.

mod compile;
mod dialect;
mod filter;
mod pred;

pub use compile::CompiledFind;
pub use dialect::{Bind, DialectKind};

pub(crate) use compile::compile;
pub(crate) use filter::passes_inexact;
