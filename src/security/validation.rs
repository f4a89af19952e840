//! Query validation for the read-only `query` tool.

use crate::error::{ServerError, ServerResult};
use once_cell::sync::Lazy;
use regex::Regex;

static SELECT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*SELECT")
        .unwrap_or_else(|e| panic!("Internal error: invalid select pattern: {}", e))
});

/// Message returned for anything other than a SELECT.
pub const SELECT_ONLY_MESSAGE: &str = "Only SELECT queries are allowed";

/// Validator for free-text queries.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    max_length: usize,
}

impl QueryValidator {
    /// Create a new query validator.
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Accept only text that, once trimmed, starts with `SELECT` (any case).
    pub fn validate_select(&self, query: &str) -> ServerResult<()> {
        if query.len() > self.max_length {
            return Err(ServerError::invalid_input(format!(
                "Query exceeds maximum length of {} bytes",
                self.max_length
            )));
        }

        if !SELECT_PATTERN.is_match(query.trim()) {
            return Err(ServerError::unsupported(SELECT_ONLY_MESSAGE));
        }

        Ok(())
    }
}

/// Rewrite positional `?` markers into SQL Server `@P1..@Pn` placeholders.
///
/// Markers inside string literals, quoted or bracketed identifiers and
/// comments are left alone. Returns the rewritten text and the number of
/// markers replaced.
pub fn rewrite_positional_placeholders(sql: &str) -> (String, usize) {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        SingleQuote,
        DoubleQuote,
        Bracket,
        LineComment,
        BlockComment,
    }

    let mut out = String::with_capacity(sql.len() + 8);
    let mut count = 0;
    let mut state = State::Code;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '?' => {
                    count += 1;
                    out.push_str(&format!("@P{}", count));
                    continue;
                }
                '\'' => state = State::SingleQuote,
                '"' => state = State::DoubleQuote,
                '[' => state = State::Bracket,
                '-' if chars.peek() == Some(&'-') => state = State::LineComment,
                '/' if chars.peek() == Some(&'*') => state = State::BlockComment,
                _ => {}
            },
            // Doubled quotes re-enter the literal on the next character.
            State::SingleQuote if c == '\'' => state = State::Code,
            State::DoubleQuote if c == '"' => state = State::Code,
            State::Bracket if c == ']' => state = State::Code,
            State::LineComment if c == '\n' => state = State::Code,
            State::BlockComment if c == '*' && chars.peek() == Some(&'/') => {
                out.push(c);
                if let Some(slash) = chars.next() {
                    out.push(slash);
                }
                state = State::Code;
                continue;
            }
            _ => {}
        }
        out.push(c);
    }

    (out, count)
}
