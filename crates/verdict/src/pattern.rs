//! Restricted glob patterns.
//!
//! - `*` matches zero or more characters
//! - `?` matches exactly one character
//! - `\` makes the next character literal
//!
//! Full regular expressions are deliberately unsupported. Matching uses the
//! single-backtrack-point algorithm, which is O(pattern × input) in the worst
//! case, and every call carries a hard step limit on top of that.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PatternError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
}

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GlobPattern {
    source: String,
    tokens: Vec<Token>,
}

impl GlobPattern {
    pub fn new(source: impl Into<String>) -> Result<Self, PatternError> {
        let source = source.into();
        let mut tokens = Vec::with_capacity(source.len());
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            let token = match c {
                '*' => {
                    // `**` is the same as `*`
                    if tokens.last() == Some(&Token::AnyRun) {
                        continue;
                    }
                    Token::AnyRun
                }
                '?' => Token::AnyOne,
                '\\' => match chars.next() {
                    Some(escaped) => Token::Literal(escaped),
                    None => return Err(PatternError::DanglingEscape(source)),
                },
                other => Token::Literal(other),
            };
            tokens.push(token);
        }

        Ok(Self { source, tokens })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Tests `input` against the pattern, giving up after `step_limit` steps.
    pub fn matches(&self, input: &str, step_limit: u64) -> Result<bool, PatternError> {
        let text: Vec<char> = input.chars().collect();
        let tokens = &self.tokens;

        let mut p = 0;
        let mut t = 0;
        // Pattern index just past the most recent `*`, and the text index it
        // is currently assumed to stop at.
        let mut resume: Option<(usize, usize)> = None;
        let mut steps: u64 = 0;

        while t < text.len() {
            steps += 1;
            if steps > step_limit {
                return Err(PatternError::StepLimitExceeded(step_limit));
            }

            match tokens.get(p) {
                Some(Token::AnyRun) => {
                    p += 1;
                    resume = Some((p, t));
                    continue;
                }
                Some(Token::AnyOne) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Some(Token::Literal(c)) if *c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }

            // Mismatch: let the last `*` swallow one more character.
            match resume {
                Some((star_p, star_t)) => {
                    p = star_p;
                    t = star_t + 1;
                    resume = Some((star_p, t));
                }
                None => return Ok(false),
            }
        }

        while tokens.get(p) == Some(&Token::AnyRun) {
            p += 1;
        }
        Ok(p == tokens.len())
    }
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for GlobPattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GlobPattern> for String {
    fn from(value: GlobPattern) -> Self {
        value.source
    }
}
