//! Abstract syntax produced by the query parser (§3, §4.5).
//!
//! Grounded on `original_source/lib/quodlibet_adapter/query_adapter.py`'s
//! `QueryTerm`/`QueryExpression` pair, reshaped so negation is its own AST
//! node (matching spec.md §8 scenario S1's `NOT(Term(...))` shape) rather
//! than a boolean flag on every term.

use serde::{Deserialize, Serialize};

/// Recognized field identifiers (§6's field-to-attribute mapping). `None`
/// in [`SearchTerm::field`] means a free word searched across text fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Field {
    Filename,
    Path,
    Duration,
    SampleRate,
    BitDepth,
    Channels,
    Format,
    Description,
    Size,
    Tag,
}

impl Field {
    /// Map a lowercased query identifier to its recognized field, if any.
    pub fn from_identifier(ident: &str) -> Option<Field> {
        match ident {
            "filename" | "name" => Some(Field::Filename),
            "path" => Some(Field::Path),
            "duration" | "length" => Some(Field::Duration),
            "samplerate" | "sample_rate" => Some(Field::SampleRate),
            "bitdepth" | "bit_depth" => Some(Field::BitDepth),
            "channels" => Some(Field::Channels),
            "format" => Some(Field::Format),
            "description" => Some(Field::Description),
            "size" | "filesize" => Some(Field::Size),
            "tags" | "tag" => Some(Field::Tag),
            _ => None,
        }
    }

    /// Whether this field's value is numeric (duration/size-unit or plain integer).
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Field::Duration | Field::SampleRate | Field::BitDepth | Field::Channels | Field::Size
        )
    }
}

/// Comparison operators recognized in field expressions (§4.5 grammar).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    Regex,
}

impl CompareOp {
    pub fn from_token(tok: &str) -> Option<CompareOp> {
        match tok {
            "=" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            ">" => Some(CompareOp::Gt),
            "<" => Some(CompareOp::Lt),
            ">=" => Some(CompareOp::Ge),
            "<=" => Some(CompareOp::Le),
            "~" => Some(CompareOp::Contains),
            "/" => Some(CompareOp::Regex),
            _ => None,
        }
    }
}

/// The value carried by a [`SearchTerm`], already unit-coerced (§4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TermValue {
    Text(String),
    /// Seconds (duration fields), bytes (size fields), or a plain integer.
    Number(f64),
}

impl TermValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TermValue::Text(s) => Some(s),
            TermValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            TermValue::Number(n) => Some(*n),
            TermValue::Text(s) => s.parse().ok(),
        }
    }
}

/// Whether a free-word term contains glob metacharacters (`*`, `?`) and
/// should be translated to a SQL `LIKE` pattern (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    /// Plain substring/equality/comparison match.
    Plain,
    /// Contains glob metacharacters; compile via [`crate::search::engine::glob_to_like`].
    Glob,
}

/// A single leaf condition: an optional field, a comparison operator, and a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTerm {
    pub field: Option<Field>,
    pub operator: CompareOp,
    pub value: TermValue,
    pub match_kind: MatchKind,
}

impl SearchTerm {
    pub fn free_word(value: impl Into<String>) -> Self {
        let value = value.into();
        let match_kind = if value.contains('*') || value.contains('?') {
            MatchKind::Glob
        } else {
            MatchKind::Plain
        };
        Self {
            field: None,
            operator: CompareOp::Contains,
            value: TermValue::Text(value),
            match_kind,
        }
    }
}

/// The parsed boolean structure of a query (§4.5, §8 S1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchExpression {
    Term(SearchTerm),
    And(Box<SearchExpression>, Box<SearchExpression>),
    Or(Box<SearchExpression>, Box<SearchExpression>),
    Not(Box<SearchExpression>),
}

impl SearchExpression {
    pub fn and(self, other: SearchExpression) -> SearchExpression {
        SearchExpression::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: SearchExpression) -> SearchExpression {
        SearchExpression::Or(Box::new(self), Box::new(other))
    }

    /// Collect every free-word term's text, depth-first, for relevance
    /// scoring (§4.6 step 4) and TF-IDF query-term extraction.
    pub fn free_words(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_free_words(&mut out);
        out
    }

    fn collect_free_words(&self, out: &mut Vec<String>) {
        match self {
            SearchExpression::Term(t) if t.field.is_none() => {
                if let TermValue::Text(s) = &t.value {
                    out.push(s.clone());
                }
            }
            SearchExpression::Term(_) => {}
            SearchExpression::And(l, r) | SearchExpression::Or(l, r) => {
                l.collect_free_words(out);
                r.collect_free_words(out);
            }
            SearchExpression::Not(inner) => inner.collect_free_words(out),
        }
    }
}

/// A parsed query: the original text plus its AST (`None` for an empty
/// query, which matches everything).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub original: String,
    pub root: Option<SearchExpression>,
}

impl SearchQuery {
    pub fn empty(original: impl Into<String>) -> Self {
        Self { original: original.into(), root: None }
    }
}
