//! Lexical classification of incoming requests.
//!
//! Vocabulary is matched on word boundaries with common inflections, so
//! "summary" does not read as "sum" and "elementary" does not read as
//! "element".

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// What kind of request a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Mathematical,
    Scientific,
    /// No vocabulary match, but symbolic or arithmetic notation
    Computational,
    General,
}

impl QueryKind {
    /// Whether the computational engine should be consulted.
    pub fn needs_computation(&self) -> bool {
        !matches!(self, Self::General)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mathematical => "mathematical",
            Self::Scientific => "scientific",
            Self::Computational => "computational",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static MATH_VOCABULARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(",
        r"solv(?:e|es|ed|ing)|calculat(?:e|es|ed|ing|ion|ions)|comput(?:e|es|ed|ing|ation|ations)",
        r"|integrat(?:e|es|ed|ing|ion)|integrals?|differentiat(?:e|es|ed|ing|ion)|derivatives?",
        r"|equations?|factor(?:s|ed|ing|ise|ize)?|simplif(?:y|ies|ied|ying)|expand(?:s|ed|ing)?",
        r"|limits?|sums?|products?|matri(?:x|ces)|determinants?|eigenvalues?",
        r"|plot(?:s|ted|ting)?|graph(?:s|ed|ing)?|draw(?:s|ing|n)?|sketch(?:es|ed|ing)?",
        r")\b"
    ))
    .expect("invalid regex")
});

static SCIENCE_VOCABULARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(",
        r"formulas?|formulae|constants?|elements?|molecules?|molecular|reactions?",
        r"|physics|chemistry|biology|astronomy|conver(?:t|ts|ted|ting|sion)|units?",
        r")\b"
    ))
    .expect("invalid regex")
});

static SYMBOLIC_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Arithmetic between numbers
        r"\d+\s*[-+*/^]\s*\d+",
        // A variable in an expression or equation
        r"(?:^|[^a-z])[xy]\s*[-+*/^=]",
        r"\b(?:sin|cos|tan|log|ln|sqrt|exp)\b",
        // Algebraic terms like 3x +
        r"\d+\s*[a-z]\s*[-+]",
        r"[∫∑∏√π∞]",
        // Numbers on both sides of an operator anywhere in the text
        r"\d+.*[-=+*/^].*\d+",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("invalid regex"))
    .collect()
});

/// Pattern-based request classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryClassifier;

impl QueryClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Vocabulary wins over notation; mathematical wins over scientific.
    pub fn classify(&self, message: &str) -> QueryKind {
        if MATH_VOCABULARY.is_match(message) {
            return QueryKind::Mathematical;
        }
        if SCIENCE_VOCABULARY.is_match(message) {
            return QueryKind::Scientific;
        }

        let lower = message.to_lowercase();
        if SYMBOLIC_PATTERNS.iter().any(|p| p.is_match(&lower)) {
            return QueryKind::Computational;
        }

        QueryKind::General
    }

    pub fn needs_computation(&self, message: &str) -> bool {
        self.classify(message).needs_computation()
    }
}
