//! Per-view vector indexes and their on-disk cache
//!
//! A snippet is projected into three text views (question, code, tags).
//! Each view gets its own embedding space and flat inner-product index,
//! all sharing one metadata array keyed by snippet position.

pub mod builder;
pub mod npy;
pub mod persistence;
pub mod store;
pub mod vector_index;

pub use builder::{BuildOptions, BuiltIndex, IndexBuilder};
pub use store::{IndexStore, StoreStats};
pub use vector_index::VectorIndex;

use crate::error::{Result, RetrievalError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One text projection of a snippet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Question,
    Code,
    Tags,
}

impl View {
    pub const ALL: [View; 3] = [View::Question, View::Code, View::Tags];

    pub fn as_str(&self) -> &'static str {
        match self {
            View::Question => "question",
            View::Code => "code",
            View::Tags => "tags",
        }
    }

    /// Stem of this view's cache files (`query.index`, `code.npy`, ...)
    pub fn file_stem(&self) -> &'static str {
        match self {
            View::Question => "query",
            View::Code => "code",
            View::Tags => "tags",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for View {
    type Err = RetrievalError;

    /// Accepts view names, the `query` alias, and the numeric modes 1-3
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "question" | "query" | "1" => Ok(View::Question),
            "code" | "2" => Ok(View::Code),
            "tags" | "3" => Ok(View::Tags),
            other => Err(RetrievalError::InvalidMode(format!(
                "unknown search mode '{}' (expected question, code or tags)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_parse() {
        assert_eq!("question".parse::<View>().unwrap(), View::Question);
        assert_eq!("query".parse::<View>().unwrap(), View::Question);
        assert_eq!("1".parse::<View>().unwrap(), View::Question);
        assert_eq!("CODE".parse::<View>().unwrap(), View::Code);
        assert_eq!("3".parse::<View>().unwrap(), View::Tags);
        assert!(matches!(
            "4".parse::<View>(),
            Err(RetrievalError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_file_stems() {
        assert_eq!(View::Question.file_stem(), "query");
        assert_eq!(View::Code.file_stem(), "code");
        assert_eq!(View::Tags.file_stem(), "tags");
    }
}
