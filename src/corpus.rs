//! Snippet corpus model and JSON Lines loading
//!
//! Each corpus line is one JSON object with `question`, `code`, `tags`,
//! `category` and `difficulty`. A snippet's identifier is its zero-based
//! line position among non-blank lines.

use crate::error::{Result, RetrievalError};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Keys a search result adds around a snippet; never carried in `extra`
pub const RESERVED_FIELDS: [&str; 2] = ["id", "score"];

/// Snippet difficulty level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(RetrievalError::InvalidMode(format!(
                "unknown difficulty '{}' (expected easy, medium or hard)",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Difficulty {
    type Error = RetrievalError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Post-search difficulty filter; `All` keeps every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DifficultyFilter {
    #[default]
    All,
    Only(Difficulty),
}

impl DifficultyFilter {
    pub fn matches(&self, difficulty: Difficulty) -> bool {
        match self {
            DifficultyFilter::All => true,
            DifficultyFilter::Only(wanted) => *wanted == difficulty,
        }
    }
}

impl FromStr for DifficultyFilter {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(DifficultyFilter::All)
        } else {
            s.parse().map(DifficultyFilter::Only)
        }
    }
}

impl fmt::Display for DifficultyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DifficultyFilter::All => f.write_str("all"),
            DifficultyFilter::Only(d) => d.fmt(f),
        }
    }
}

/// One corpus entry. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    #[serde(default, deserialize_with = "null_as_default")]
    pub question: String,
    pub code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: String,
    pub difficulty: Difficulty,
    /// Fields not modelled above (e.g. `core_category`), echoed back in results
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Snippet {
    /// Text projection of this snippet for a given view
    pub fn view_text(&self, view: crate::index::View) -> String {
        use crate::index::View;
        match view {
            View::Question => self.question.clone(),
            View::Code => self.code.clone(),
            View::Tags => self.tags.join(" "),
        }
    }

    /// Drop any `id`/`score` keys from `extra`, returning the names removed
    pub fn strip_reserved_fields(&mut self) -> Vec<&'static str> {
        RESERVED_FIELDS
            .into_iter()
            .filter(|key| self.extra.remove(*key).is_some())
            .collect()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a JSON Lines corpus from a reader. Blank lines are skipped.
pub fn parse_corpus<R: BufRead>(reader: R) -> Result<Vec<Snippet>> {
    let mut snippets = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let mut snippet: Snippet =
            serde_json::from_str(&line).map_err(|e| RetrievalError::Corpus {
                line: line_no + 1,
                message: e.to_string(),
            })?;
        let dropped = snippet.strip_reserved_fields();
        if !dropped.is_empty() {
            warn!(line = line_no + 1, fields = ?dropped, "Ignoring reserved corpus fields");
        }
        snippets.push(snippet);
    }

    debug!(snippets = snippets.len(), "Parsed corpus");
    Ok(snippets)
}

/// Load a JSON Lines corpus file
pub fn load_corpus(path: &Path) -> Result<Vec<Snippet>> {
    let file = std::fs::File::open(path)?;
    let snippets = parse_corpus(std::io::BufReader::new(file))?;
    info!(path = %path.display(), snippets = snippets.len(), "Loaded corpus");
    Ok(snippets)
}

/// SHA-256 over the canonical JSON of every snippet, in order
pub fn corpus_fingerprint(snippets: &[Snippet]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update((snippets.len() as u64).to_le_bytes());
    for snippet in snippets {
        let bytes = serde_json::to_vec(snippet)?;
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::View;

    const SAMPLE: &str = r#"{"question": "plot a barplot", "code": "df.plot.bar()", "tags": ["pandas", "plot"], "category": "viz", "difficulty": "easy"}

{"question": null, "code": "df.mean()", "difficulty": "Hard", "core_category": "stats"}
"#;

    #[test]
    fn test_parse_corpus_defaults_and_blank_lines() {
        let snippets = parse_corpus(SAMPLE.as_bytes()).unwrap();
        assert_eq!(snippets.len(), 2);

        assert_eq!(snippets[0].question, "plot a barplot");
        assert_eq!(snippets[0].tags, vec!["pandas", "plot"]);
        assert_eq!(snippets[0].difficulty, Difficulty::Easy);

        assert_eq!(snippets[1].question, "");
        assert!(snippets[1].tags.is_empty());
        assert_eq!(snippets[1].difficulty, Difficulty::Hard);
        assert_eq!(
            snippets[1].extra.get("core_category"),
            Some(&serde_json::Value::String("stats".to_string()))
        );
    }

    #[test]
    fn test_parse_corpus_reports_line_number() {
        let input = "{\"code\": \"x\", \"difficulty\": \"easy\"}\n{not json}\n";
        match parse_corpus(input.as_bytes()) {
            Err(RetrievalError::Corpus { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corpus error, got {:?}", other),
        }
    }

    #[test]
    fn test_reserved_fields_not_kept() {
        let input = r#"{"id": 77, "score": 0.5, "code": "df.head()", "difficulty": "easy", "source": "notebook"}"#;
        let snippets = parse_corpus(input.as_bytes()).unwrap();
        assert!(!snippets[0].extra.contains_key("id"));
        assert!(!snippets[0].extra.contains_key("score"));
        assert_eq!(
            snippets[0].extra.get("source"),
            Some(&serde_json::Value::String("notebook".to_string()))
        );
    }

    #[test]
    fn test_unknown_difficulty_rejected() {
        let input = "{\"code\": \"x\", \"difficulty\": \"extreme\"}\n";
        assert!(parse_corpus(input.as_bytes()).is_err());
    }

    #[test]
    fn test_difficulty_filter_parse() {
        assert_eq!("all".parse::<DifficultyFilter>().unwrap(), DifficultyFilter::All);
        assert_eq!(
            "Medium".parse::<DifficultyFilter>().unwrap(),
            DifficultyFilter::Only(Difficulty::Medium)
        );
        assert!(matches!(
            "impossible".parse::<DifficultyFilter>(),
            Err(RetrievalError::InvalidMode(_))
        ));
        assert!(DifficultyFilter::All.matches(Difficulty::Hard));
        assert!(!DifficultyFilter::Only(Difficulty::Easy).matches(Difficulty::Hard));
    }

    #[test]
    fn test_view_text_joins_tags() {
        let snippets = parse_corpus(SAMPLE.as_bytes()).unwrap();
        assert_eq!(snippets[0].view_text(View::Tags), "pandas plot");
        assert_eq!(snippets[0].view_text(View::Code), "df.plot.bar()");
        assert_eq!(snippets[1].view_text(View::Question), "");
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let snippets = parse_corpus(SAMPLE.as_bytes()).unwrap();
        let a = corpus_fingerprint(&snippets).unwrap();
        assert_eq!(a, corpus_fingerprint(&snippets).unwrap());

        let mut changed = snippets.clone();
        changed[1].code = "df.median()".to_string();
        assert_ne!(a, corpus_fingerprint(&changed).unwrap());
    }
}
