//! Tokenizer + recursive-descent parser for the lexical query grammar (C5,
//! §4.5). Grounded line-for-line on
//! `original_source/lib/quodlibet_adapter/query_adapter.py`'s `QueryParser`
//! (itself a port of Quod Libet's query system) for token patterns and the
//! duration/size unit-multiplier tables.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ast::{CompareOp, Field, MatchKind, SearchExpression, SearchQuery, SearchTerm, TermValue};

static FIELD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z_]+)(>=|<=|!=|>|<|=|~|/)(.+)$").unwrap());
static TIME_COLON_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+):(\d+)(?::(\d+))?$").unwrap());
static NUMBER_UNIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+(?:\.\d+)?)\s*([a-zA-Z]+)?$").unwrap());

/// Parse `text` into a [`SearchQuery`]. Never fails: a malformed query
/// falls back to a single free-word term equal to the input string
/// (§4.5 Recovery).
pub fn parse(text: &str) -> SearchQuery {
    if text.trim().is_empty() {
        return SearchQuery::empty(text);
    }

    let tokens = tokenize(text);
    let mut cursor = Cursor { tokens, pos: 0 };

    match parse_expr(&mut cursor) {
        Some(expr) => SearchQuery { original: text.to_string(), root: Some(expr) },
        None => SearchQuery { original: text.to_string(), root: Some(SearchExpression::Term(SearchTerm::free_word(text))) },
    }
}

struct Cursor {
    tokens: Vec<String>,
    pos: usize,
}

impl Cursor {
    fn current(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn advance(&mut self) -> Option<String> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }
}

fn tokenize(query: &str) -> Vec<String> {
    let chars: Vec<char> = query.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        while i < len && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= len {
            break;
        }

        let c = chars[i];
        if c == '(' || c == ')' {
            tokens.push(c.to_string());
            i += 1;
        } else if c == '"' {
            let mut j = i + 1;
            while j < len && chars[j] != '"' {
                if chars[j] == '\\' && j + 1 < len {
                    j += 2;
                } else {
                    j += 1;
                }
            }
            let end = if j < len { j + 1 } else { len };
            tokens.push(chars[i..end].iter().collect());
            i = end;
        } else if c == '/' {
            let mut j = i + 1;
            while j < len && chars[j] != '/' {
                if chars[j] == '\\' && j + 1 < len {
                    j += 2;
                } else {
                    j += 1;
                }
            }
            let end = if j < len { j + 1 } else { len };
            tokens.push(chars[i..end].iter().collect());
            i = end;
        } else {
            let mut j = i;
            while j < len && !chars[j].is_whitespace() && chars[j] != '(' && chars[j] != ')' {
                j += 1;
            }
            tokens.push(chars[i..j].iter().collect());
            i = j;
        }
    }

    tokens
}

/// `expr := term { [AND|OR] term }*` — a connector-less adjacent term is an
/// implicit `AND` (§4.5: `format:wav NOT stereo` composes as
/// `AND(format:wav, NOT stereo)`, not a dropped second term).
fn parse_expr(cursor: &mut Cursor) -> Option<SearchExpression> {
    let mut left = parse_term(cursor)?;

    loop {
        let Some(tok) = cursor.current() else { break };
        if tok == ")" {
            break;
        }
        let upper = tok.to_uppercase();
        let implicit_and = upper != "AND" && upper != "OR";
        if !implicit_and {
            cursor.advance();
        }
        let right = parse_term(cursor)?;
        left = if implicit_and || upper == "AND" { left.and(right) } else { left.or(right) };
    }

    Some(left)
}

/// `term := [NOT | '-'] factor`
fn parse_term(cursor: &mut Cursor) -> Option<SearchExpression> {
    let mut negated = false;

    if let Some(tok) = cursor.current() {
        if tok.to_uppercase() == "NOT" {
            cursor.advance();
            negated = true;
        } else if tok.len() > 1 && tok.starts_with('-') && tok != "(" {
            let stripped = tok[1..].to_string();
            cursor.tokens[cursor.pos] = stripped;
            negated = true;
        }
    }

    let factor = parse_factor(cursor)?;
    Some(if negated { SearchExpression::Not(Box::new(factor)) } else { factor })
}

/// `factor := '(' expr ')' | atom`
///
/// On a malformed group, recovers by discarding tokens up to the matching
/// `)` or EOF and substituting an always-true placeholder term, so the
/// surrounding expression still parses (§4.5 Recovery).
fn parse_factor(cursor: &mut Cursor) -> Option<SearchExpression> {
    if cursor.current() == Some("(") {
        cursor.advance();
        match parse_expr(cursor) {
            Some(expr) => {
                if cursor.current() == Some(")") {
                    cursor.advance();
                }
                Some(expr)
            }
            None => {
                while let Some(tok) = cursor.current() {
                    if tok == ")" {
                        cursor.advance();
                        break;
                    }
                    cursor.advance();
                }
                Some(SearchExpression::Term(SearchTerm::free_word("")))
            }
        }
    } else {
        parse_atom(cursor)
    }
}

/// `atom := quoted | regex | field_expr | word`
fn parse_atom(cursor: &mut Cursor) -> Option<SearchExpression> {
    let token = cursor.advance()?;

    if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        let inner = &token[1..token.len() - 1];
        return Some(SearchExpression::Term(SearchTerm::free_word(unescape(inner, '"'))));
    }

    if token.len() > 2 && token.starts_with('/') && token.ends_with('/') {
        let inner = &token[1..token.len() - 1];
        return Some(SearchExpression::Term(SearchTerm {
            field: None,
            operator: CompareOp::Regex,
            value: TermValue::Text(unescape(inner, '/')),
            match_kind: MatchKind::Plain,
        }));
    }

    if let Some(caps) = FIELD_PATTERN.captures(&token) {
        let ident = caps[1].to_lowercase();
        let op_tok = &caps[2];
        let raw_value = caps[3].to_string();

        let Some(field) = Field::from_identifier(&ident) else {
            return Some(SearchExpression::Term(SearchTerm::free_word(token)));
        };
        let operator = CompareOp::from_token(op_tok).unwrap_or(CompareOp::Eq);

        let value = match field {
            Field::Duration => TermValue::Number(parse_duration_seconds(&raw_value)),
            Field::Size => TermValue::Number(parse_size_bytes(&raw_value)),
            f if f.is_numeric() => raw_value
                .parse::<f64>()
                .map(TermValue::Number)
                .unwrap_or(TermValue::Text(raw_value.clone())),
            _ => TermValue::Text(raw_value.clone()),
        };
        let match_kind = if raw_value.contains('*') || raw_value.contains('?') {
            MatchKind::Glob
        } else {
            MatchKind::Plain
        };

        return Some(SearchExpression::Term(SearchTerm { field: Some(field), operator, value, match_kind }));
    }

    Some(SearchExpression::Term(SearchTerm::free_word(token)))
}

fn unescape(s: &str, escaped: char) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&escaped) {
            out.push(escaped);
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

/// Time-unit multipliers, seconds per unit. Unknown units default to
/// seconds (§4.5: "Unknown units default to base unit").
fn time_unit_multiplier(unit: &str) -> f64 {
    match unit.to_lowercase().as_str() {
        "ms" | "millisecond" | "milliseconds" => 0.001,
        "s" | "sec" | "second" | "seconds" => 1.0,
        "m" | "min" | "minute" | "minutes" => 60.0,
        "h" | "hr" | "hour" | "hours" => 3600.0,
        "d" | "day" | "days" => 86400.0,
        _ => 1.0,
    }
}

fn size_unit_multiplier(unit: &str) -> f64 {
    match unit.to_lowercase().as_str() {
        "b" | "byte" | "bytes" => 1.0,
        "kb" | "kilobyte" | "kilobytes" => 1024.0,
        "mb" | "megabyte" | "megabytes" => 1024.0 * 1024.0,
        "gb" | "gigabyte" | "gigabytes" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    }
}

/// Parse a duration field's raw value to seconds: `HH:MM:SS`/`MM:SS` colon
/// form, or `<number><unit>` (§4.5).
pub fn parse_duration_seconds(value: &str) -> f64 {
    let trimmed = value.trim();
    if let Some(caps) = TIME_COLON_PATTERN.captures(trimmed) {
        let parts: Vec<f64> = caps
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().parse::<f64>().unwrap_or(0.0))
            .collect();
        return if parts.len() == 2 {
            parts[0] * 60.0 + parts[1]
        } else if parts.len() == 3 {
            parts[0] * 3600.0 + parts[1] * 60.0 + parts[2]
        } else {
            0.0
        };
    }

    if let Some(caps) = NUMBER_UNIT_PATTERN.captures(trimmed) {
        let num: f64 = caps[1].parse().unwrap_or(0.0);
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("s");
        return num * time_unit_multiplier(unit);
    }

    trimmed.parse().unwrap_or(0.0)
}

/// Parse a size field's raw value to bytes: `<number><unit>` (§4.5).
pub fn parse_size_bytes(value: &str) -> f64 {
    let trimmed = value.trim();
    if let Some(caps) = NUMBER_UNIT_PATTERN.captures(trimmed) {
        let num: f64 = caps[1].parse().unwrap_or(0.0);
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("b");
        return num * size_unit_multiplier(unit);
    }
    trimmed.parse().unwrap_or(0.0)
}

/// Render a parsed query back to grammar text, for the idempotence property
/// (§8 invariant 6): `parse(serialize(parse(text))) ≡ parse(text)`.
pub fn serialize(query: &SearchQuery) -> String {
    match &query.root {
        None => String::new(),
        Some(expr) => serialize_expr(expr),
    }
}

fn serialize_expr(expr: &SearchExpression) -> String {
    match expr {
        SearchExpression::Term(t) => serialize_term(t),
        SearchExpression::And(l, r) => format!("({} AND {})", serialize_expr(l), serialize_expr(r)),
        SearchExpression::Or(l, r) => format!("({} OR {})", serialize_expr(l), serialize_expr(r)),
        SearchExpression::Not(inner) => format!("NOT ({})", serialize_expr(inner)),
    }
}

fn serialize_term(term: &SearchTerm) -> String {
    let op = match term.operator {
        CompareOp::Eq => "=",
        CompareOp::Ne => "!=",
        CompareOp::Gt => ">",
        CompareOp::Lt => "<",
        CompareOp::Ge => ">=",
        CompareOp::Le => "<=",
        CompareOp::Contains => "~",
        CompareOp::Regex => "/",
    };
    let value = match &term.value {
        TermValue::Text(s) => s.clone(),
        TermValue::Number(n) => n.to_string(),
    };

    match term.field {
        Some(field) => {
            let ident = match field {
                Field::Filename => "filename",
                Field::Path => "path",
                Field::Duration => "duration",
                Field::SampleRate => "samplerate",
                Field::BitDepth => "bitdepth",
                Field::Channels => "channels",
                Field::Format => "format",
                Field::Description => "description",
                Field::Size => "size",
                Field::Tag => "tag",
            };
            format!("{ident}{op}{value}")
        }
        None => {
            if term.operator == CompareOp::Regex {
                format!("/{value}/")
            } else if value.contains(' ') {
                format!("\"{value}\"")
            } else {
                value
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::TermValue;

    #[test]
    fn s1_duration_and_format_not_stereo() {
        let q = parse("duration:>5m AND format:wav NOT stereo");
        let expr = q.root.expect("should parse");

        // AND(AND(Term(duration,>,300.0), Term(format,=,"wav")), NOT(Term(free,"stereo")))
        match expr {
            SearchExpression::And(left, right) => {
                match *right {
                    SearchExpression::Not(inner) => match *inner {
                        SearchExpression::Term(t) => {
                            assert_eq!(t.field, None);
                            assert_eq!(t.value, TermValue::Text("stereo".into()));
                        }
                        _ => panic!("expected term under NOT"),
                    },
                    _ => panic!("expected NOT on the right"),
                }
                match *left {
                    SearchExpression::And(l2, r2) => {
                        match *l2 {
                            SearchExpression::Term(t) => {
                                assert_eq!(t.field, Some(Field::Duration));
                                assert_eq!(t.operator, CompareOp::Gt);
                                assert_eq!(t.value, TermValue::Number(300.0));
                            }
                            _ => panic!("expected duration term"),
                        }
                        match *r2 {
                            SearchExpression::Term(t) => {
                                assert_eq!(t.field, Some(Field::Format));
                                assert_eq!(t.operator, CompareOp::Eq);
                                assert_eq!(t.value, TermValue::Text("wav".into()));
                            }
                            _ => panic!("expected format term"),
                        }
                    }
                    _ => panic!("expected nested AND on the left"),
                }
            }
            _ => panic!("expected top-level AND"),
        }
    }

    #[test]
    fn s2_glob_and_negation() {
        let q = parse("-foot* AND format:wav");
        let expr = q.root.unwrap();
        match expr {
            SearchExpression::And(left, right) => {
                match *left {
                    SearchExpression::Not(inner) => match *inner {
                        SearchExpression::Term(t) => {
                            assert_eq!(t.value, TermValue::Text("foot*".into()));
                            assert_eq!(t.match_kind, MatchKind::Glob);
                        }
                        _ => panic!(),
                    },
                    _ => panic!("expected NOT on the left"),
                }
                match *right {
                    SearchExpression::Term(t) => assert_eq!(t.field, Some(Field::Format)),
                    _ => panic!(),
                }
            }
            _ => panic!("expected top-level AND"),
        }
    }

    #[test]
    fn s3_duration_unit_parsing() {
        let q = parse("duration:>=1:30:00");
        match q.root.unwrap() {
            SearchExpression::Term(t) => {
                assert_eq!(t.operator, CompareOp::Ge);
                assert_eq!(t.value, TermValue::Number(5400.0));
            }
            _ => panic!(),
        }

        let q = parse("size:<500kb");
        match q.root.unwrap() {
            SearchExpression::Term(t) => {
                assert_eq!(t.operator, CompareOp::Lt);
                assert_eq!(t.value, TermValue::Number(512_000.0));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn quoted_phrase_is_one_free_word_term() {
        let q = parse("\"explosion far away\"");
        match q.root.unwrap() {
            SearchExpression::Term(t) => {
                assert_eq!(t.value, TermValue::Text("explosion far away".into()));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn regex_atom_parses_as_regex_operator() {
        let q = parse("filename:/^SFX_.*/");
        // filename:/^SFX_.*/ matches the FIELD_PATTERN as field=filename, op=/, value=^SFX_.*/
        match q.root.unwrap() {
            SearchExpression::Term(t) => {
                assert_eq!(t.field, Some(Field::Filename));
                assert_eq!(t.operator, CompareOp::Regex);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn unbalanced_group_recovers_and_continues() {
        let q = parse("(explosion AND OR format:wav");
        // malformed inner expr recovers to a match-all placeholder; parser never panics
        assert!(q.root.is_some());
    }

    #[test]
    fn empty_query_matches_everything() {
        let q = parse("");
        assert_eq!(q.root, None);
    }

    #[test]
    fn idempotence_via_serialize_roundtrip() {
        let original = parse("duration:>5m AND format:wav NOT stereo");
        let text = serialize(&original);
        let reparsed = parse(&text);
        assert_eq!(original.root, reparsed.root);
    }
}
