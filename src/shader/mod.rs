//! Effect merging.
//!
//! [`compile`] fuses an ordered list of effects into one fragment/vertex
//! program pair. Each effect's declarations are collected into a
//! [`SymbolTable`], then renamed with a per-effect prefix by a single-pass
//! tokenizer before being spliced into fixed templates.

pub mod compiler;
pub mod symbols;
pub mod templates;
pub mod tokenizer;

pub use compiler::{compile, MergeResult};
pub use symbols::SymbolTable;
