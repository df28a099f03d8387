//! Attribute store for a single evaluation.
//!
//! Four attribute categories drive access decisions:
//! - **Subject**: who is asking (role, department, groups)
//! - **Resource**: what is being accessed (id, owner, classification)
//! - **Action**: what is being done (id, method)
//! - **Environment**: request context (time, source country)
//!
//! A missing attribute is never an error. Lookups return
//! [`Attribute::Undefined`], which condition evaluation turns into
//! `Indeterminate` rather than `false`.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RequestError;

// ============================================================================
// Category
// ============================================================================

/// The category an attribute belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Subject,
    Resource,
    Action,
    Environment,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Resource => "resource",
            Self::Action => "action",
            Self::Environment => "environment",
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::Subject => 0,
            Self::Resource => 1,
            Self::Action => 2,
            Self::Environment => 3,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subject" => Ok(Self::Subject),
            "resource" => Ok(Self::Resource),
            "action" => Ok(Self::Action),
            "environment" => Ok(Self::Environment),
            other => Err(RequestError::UnknownCategory(other.to_string())),
        }
    }
}

// ============================================================================
// Attribute Key
// ============================================================================

/// Category plus name, e.g. `subject.role`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeKey {
    pub category: Category,
    pub name: String,
}

impl AttributeKey {
    pub fn new(category: Category, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.name)
    }
}

// ============================================================================
// Attribute Value
// ============================================================================

/// A typed attribute value.
///
/// Serialized untagged so that policy documents read naturally:
/// `"admin"`, `3`, `true`, `["ops", "dev"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Set(BTreeSet<String>),
}

/// The type of an [`AttributeValue`], used for typed attribute references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Set,
}

impl AttributeValue {
    /// Builds a set value from any iterator of strings.
    pub fn set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Number(_) => ValueKind::Number,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Set(_) => ValueKind::Set,
        }
    }

    /// Converts this value to `kind`, borrowing when no conversion is needed.
    ///
    /// Conversions:
    /// - string -> number: parsed, surrounding whitespace ignored
    /// - string -> boolean: `"true"` / `"false"`, case-insensitive
    /// - string -> set: split on `,`, trimmed, empty items dropped
    /// - number/boolean -> string or singleton set: display form
    ///
    /// Returns `None` when no conversion exists.
    pub fn coerce(&self, kind: ValueKind) -> Option<Cow<'_, AttributeValue>> {
        if self.kind() == kind {
            return Some(Cow::Borrowed(self));
        }

        let converted = match (self, kind) {
            (Self::String(s), ValueKind::Number) => Self::Number(s.trim().parse().ok()?),
            (Self::String(s), ValueKind::Boolean) => {
                let s = s.trim();
                if s.eq_ignore_ascii_case("true") {
                    Self::Boolean(true)
                } else if s.eq_ignore_ascii_case("false") {
                    Self::Boolean(false)
                } else {
                    return None;
                }
            }
            (Self::String(s), ValueKind::Set) => Self::Set(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            (Self::Number(n), ValueKind::String) => Self::String(n.to_string()),
            (Self::Boolean(b), ValueKind::String) => Self::String(b.to_string()),
            (Self::Number(n), ValueKind::Set) => Self::Set(BTreeSet::from([n.to_string()])),
            (Self::Boolean(b), ValueKind::Set) => Self::Set(BTreeSet::from([b.to_string()])),
            _ => return None,
        };

        Some(Cow::Owned(converted))
    }

    /// Converts a raw JSON value. `null` maps to `Ok(None)` (absent).
    fn from_raw(key: &AttributeKey, raw: &serde_json::Value) -> Result<Option<Self>, RequestError> {
        let unsupported = |reason: &str| RequestError::UnsupportedValue {
            category: key.category.to_string(),
            name: key.name.clone(),
            reason: reason.to_string(),
        };

        match raw {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Bool(b) => Ok(Some(Self::Boolean(*b))),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(|n| Some(Self::Number(n)))
                .ok_or_else(|| unsupported("number is not representable as f64")),
            serde_json::Value::String(s) => Ok(Some(Self::String(s.clone()))),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(String::from)
                        .ok_or_else(|| unsupported("sets may only contain strings"))
                })
                .collect::<Result<BTreeSet<_>, _>>()
                .map(|set| Some(Self::Set(set))),
            serde_json::Value::Object(_) => Err(unsupported("objects are not attribute values")),
        }
    }

    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            Self::String(s) => {
                hasher.update(&[0]);
                hash_str(hasher, s);
            }
            Self::Number(n) => {
                hasher.update(&[1]);
                hasher.update(&normalized_bits(*n).to_le_bytes());
            }
            Self::Boolean(b) => {
                hasher.update(&[2, u8::from(*b)]);
            }
            Self::Set(items) => {
                hasher.update(&[3]);
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    hash_str(hasher, item);
                }
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<BTreeSet<String>> for AttributeValue {
    fn from(value: BTreeSet<String>) -> Self {
        Self::Set(value)
    }
}

/// `-0.0` and `0.0` compare equal, so they must fingerprint equal too.
fn normalized_bits(n: f64) -> u64 {
    if n == 0.0 {
        0.0_f64.to_bits()
    } else if n.is_nan() {
        f64::NAN.to_bits()
    } else {
        n.to_bits()
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

// ============================================================================
// Attribute (lookup result)
// ============================================================================

/// The result of resolving an attribute: a value or the explicit undefined marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute<'a> {
    Defined(Cow<'a, AttributeValue>),
    Undefined,
}

impl Attribute<'_> {
    pub fn is_defined(&self) -> bool {
        matches!(self, Self::Defined(_))
    }

    pub fn value(&self) -> Option<&AttributeValue> {
        match self {
            Self::Defined(value) => Some(value.as_ref()),
            Self::Undefined => None,
        }
    }
}

// ============================================================================
// Fingerprint
// ============================================================================

/// Order-independent digest of the attributes a policy tree can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Request
// ============================================================================

/// Immutable snapshot of the attributes for one decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    attributes: BTreeMap<AttributeKey, AttributeValue>,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Builds a request from `{"subject": {"role": "admin"}, "resource": {...}}`.
    pub fn from_raw(raw: &serde_json::Map<String, serde_json::Value>) -> Result<Self, RequestError> {
        let mut builder = RequestBuilder::default();
        for (category, attributes) in raw {
            let category: Category = category.parse()?;
            let serde_json::Value::Object(attributes) = attributes else {
                return Err(RequestError::UnsupportedValue {
                    category: category.to_string(),
                    name: String::new(),
                    reason: "category must map to an object of attributes".to_string(),
                });
            };
            builder = builder.raw_category(category, attributes)?;
        }
        Ok(builder.build())
    }

    /// Looks up an attribute. Never fails: missing keys yield `Undefined`.
    pub fn get(&self, category: Category, name: &str) -> Attribute<'_> {
        // Range walk over the category avoids allocating an owned key.
        let lower = AttributeKey::new(category, String::new());
        self.attributes
            .range(lower..)
            .take_while(|(key, _)| key.category == category)
            .find(|(key, _)| key.name == name)
            .map_or(Attribute::Undefined, |(_, value)| {
                Attribute::Defined(Cow::Borrowed(value))
            })
    }

    pub fn get_key(&self, key: &AttributeKey) -> Attribute<'_> {
        self.attributes
            .get(key)
            .map_or(Attribute::Undefined, |value| Attribute::Defined(Cow::Borrowed(value)))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttributeKey, &AttributeValue)> {
        self.attributes.iter()
    }

    /// Returns a builder seeded with this request's attributes.
    pub fn to_builder(&self) -> RequestBuilder {
        RequestBuilder {
            attributes: self.attributes.clone(),
        }
    }

    /// Digest over the attributes in `relevant`.
    ///
    /// Attributes outside `relevant` are skipped. Keys are visited in sorted
    /// order, so the digest does not depend on insertion order.
    pub fn fingerprint(&self, relevant: &BTreeSet<AttributeKey>) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        for (key, value) in &self.attributes {
            if !relevant.contains(key) {
                continue;
            }
            hasher.update(&[key.category.tag()]);
            hash_str(&mut hasher, &key.name);
            value.hash_into(&mut hasher);
        }
        Fingerprint(*hasher.finalize().as_bytes())
    }
}

/// Accumulates attributes from heterogeneous sources. Later values win.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    attributes: BTreeMap<AttributeKey, AttributeValue>,
}

impl RequestBuilder {
    pub fn attribute(
        mut self,
        category: Category,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes
            .insert(AttributeKey::new(category, name), value.into());
        self
    }

    pub fn subject(self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attribute(Category::Subject, name, value)
    }

    pub fn resource(self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attribute(Category::Resource, name, value)
    }

    pub fn action(self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attribute(Category::Action, name, value)
    }

    pub fn environment(self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attribute(Category::Environment, name, value)
    }

    /// Adds one raw JSON value. `null` removes nothing and adds nothing.
    pub fn raw(
        mut self,
        category: Category,
        name: impl Into<String>,
        raw: &serde_json::Value,
    ) -> Result<Self, RequestError> {
        let key = AttributeKey::new(category, name);
        if let Some(value) = AttributeValue::from_raw(&key, raw)? {
            self.attributes.insert(key, value);
        }
        Ok(self)
    }

    /// Adds every key/value pair of a raw JSON object under `category`.
    pub fn raw_category(
        mut self,
        category: Category,
        raw: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, RequestError> {
        for (name, value) in raw {
            self = self.raw(category, name.as_str(), value)?;
        }
        Ok(self)
    }

    /// Merges another attribute source into this one.
    pub fn merge<I>(mut self, source: I) -> Self
    where
        I: IntoIterator<Item = (AttributeKey, AttributeValue)>,
    {
        self.attributes.extend(source);
        self
    }

    /// Derives environment attributes from a timestamp.
    ///
    /// Sets `current_time` (RFC 3339), `hour`, `weekday` (`Mon`..`Sun`), and
    /// `business_hours` (09:00-17:00 UTC, Mon-Fri).
    pub fn time(self, ts: DateTime<Utc>) -> Self {
        let hour = ts.hour();
        let weekday = ts.weekday();
        let is_weekday = weekday.number_from_monday() <= 5;
        let business_hours = is_weekday && (9..17).contains(&hour);

        self.environment("current_time", ts.to_rfc3339())
            .environment("hour", i64::from(hour))
            .environment("weekday", weekday.to_string())
            .environment("business_hours", business_hours)
    }

    pub fn build(self) -> Request {
        Request {
            attributes: self.attributes,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
