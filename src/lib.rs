//! Semantic code-snippet retrieval.
//!
//! A corpus of snippets is projected into three text views (question, code,
//! tags), each embedded and held in its own flat inner-product index. Queries
//! are ranked against one view and optionally filtered by difficulty.

pub mod config;
pub mod corpus;
pub mod diagnostics;
pub mod encoder;
pub mod error;
pub mod index;
pub mod search;
pub mod telemetry;
pub mod upstream;
pub mod web;

pub use error::{Result, RetrievalError};
