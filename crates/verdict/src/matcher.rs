//! Applicability matchers (targets).
//!
//! A matcher decides whether a rule or policy is considered at all. It is a
//! filter, not a condition: an undefined attribute or a type mismatch simply
//! does not match. Only a pattern fault is reported as `Indeterminate`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::attributes::{AttributeKey, AttributeValue, Category, Request};
use crate::condition::{EvalOptions, TriState};
use crate::pattern::GlobPattern;

/// What an attribute must look like to match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchValue {
    /// Equal value; a set-valued attribute matches a string it contains.
    Equals(AttributeValue),
    /// Equal to any of the listed values.
    OneOf(Vec<AttributeValue>),
    /// String attribute (or any member of a set attribute) matches the glob.
    Pattern(GlobPattern),
}

/// A test against one request attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMatch {
    pub category: Category,
    pub name: String,
    pub matches: MatchValue,
}

impl AttributeMatch {
    pub fn equals(
        category: Category,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        Self {
            category,
            name: name.into(),
            matches: MatchValue::Equals(value.into()),
        }
    }

    pub fn one_of<I, V>(category: Category, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        Self {
            category,
            name: name.into(),
            matches: MatchValue::OneOf(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn pattern(category: Category, name: impl Into<String>, pattern: GlobPattern) -> Self {
        Self {
            category,
            name: name.into(),
            matches: MatchValue::Pattern(pattern),
        }
    }

    fn test(&self, request: &Request, options: &EvalOptions) -> TriState {
        let found = request.get(self.category, &self.name);
        let Some(actual) = found.value() else {
            return TriState::False;
        };

        match &self.matches {
            MatchValue::Equals(expected) => value_matches(actual, expected).into(),
            MatchValue::OneOf(candidates) => candidates
                .iter()
                .any(|expected| value_matches(actual, expected))
                .into(),
            MatchValue::Pattern(pattern) => self.test_pattern(actual, pattern, options),
        }
    }

    fn test_pattern(
        &self,
        actual: &AttributeValue,
        pattern: &GlobPattern,
        options: &EvalOptions,
    ) -> TriState {
        let candidates: Vec<&str> = match actual {
            AttributeValue::String(s) => vec![s.as_str()],
            AttributeValue::Set(items) => items.iter().map(String::as_str).collect(),
            AttributeValue::Number(_) | AttributeValue::Boolean(_) => return TriState::False,
        };

        candidates
            .into_iter()
            .map(|candidate| match pattern.matches(candidate, options.pattern_step_limit) {
                Ok(matched) => TriState::from(matched),
                Err(error) => {
                    warn!(
                        attribute = %AttributeKey::new(self.category, self.name.as_str()),
                        pattern = %pattern,
                        %error,
                        "matcher pattern fault"
                    );
                    TriState::Indeterminate
                }
            })
            .fold(TriState::False, TriState::or)
    }
}

fn value_matches(actual: &AttributeValue, expected: &AttributeValue) -> bool {
    match (actual, expected) {
        (AttributeValue::Set(items), AttributeValue::String(s)) => items.contains(s),
        (actual, expected) => actual == expected,
    }
}

/// Decides whether a rule, policy, or policy set applies to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    /// Applies to every request.
    #[default]
    Any,
    /// Every match must hold. Empty applies to everything.
    AllOf(Vec<AttributeMatch>),
    /// At least one match must hold. Empty applies to nothing.
    AnyOf(Vec<AttributeMatch>),
}

impl Matcher {
    pub fn all_of(matches: impl IntoIterator<Item = AttributeMatch>) -> Self {
        Self::AllOf(matches.into_iter().collect())
    }

    pub fn any_of(matches: impl IntoIterator<Item = AttributeMatch>) -> Self {
        Self::AnyOf(matches.into_iter().collect())
    }

    /// `True` applicable, `False` not applicable, `Indeterminate` on a pattern fault.
    pub fn applies(&self, request: &Request, options: &EvalOptions) -> TriState {
        match self {
            Self::Any => TriState::True,
            Self::AllOf(matches) => {
                let mut acc = TriState::True;
                for m in matches {
                    acc = acc.and(m.test(request, options));
                    if acc == TriState::False {
                        break;
                    }
                }
                acc
            }
            Self::AnyOf(matches) => {
                let mut acc = TriState::False;
                for m in matches {
                    acc = acc.or(m.test(request, options));
                    if acc == TriState::True {
                        break;
                    }
                }
                acc
            }
        }
    }

    pub(crate) fn collect_keys(&self, keys: &mut BTreeSet<AttributeKey>) {
        match self {
            Self::Any => {}
            Self::AllOf(matches) | Self::AnyOf(matches) => {
                keys.extend(
                    matches
                        .iter()
                        .map(|m| AttributeKey::new(m.category, m.name.as_str())),
                );
            }
        }
    }
}
