//! Condition trees and three-valued evaluation.
//!
//! Conditions evaluate to a [`TriState`]. Undefined attributes, type
//! mismatches and pattern faults produce `Indeterminate`; nothing in here
//! returns an error or panics on a well-formed tree.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ops::Not;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::attributes::{Attribute, AttributeKey, AttributeValue, Category, Request, ValueKind};
use crate::error::{PolicyError, Result};
use crate::pattern::GlobPattern;

// ============================================================================
// TriState
// ============================================================================

/// Kleene three-valued truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    True,
    False,
    Indeterminate,
}

impl TriState {
    /// `False` dominates, then `Indeterminate`.
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::True, Self::True) => Self::True,
            _ => Self::Indeterminate,
        }
    }

    /// `True` dominates, then `Indeterminate`.
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::True, _) | (_, Self::True) => Self::True,
            (Self::False, Self::False) => Self::False,
            _ => Self::Indeterminate,
        }
    }
}

impl Not for TriState {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Indeterminate => Self::Indeterminate,
        }
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl From<Option<bool>> for TriState {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::Indeterminate, Self::from)
    }
}

// ============================================================================
// Operands
// ============================================================================

/// Reference to a request attribute, optionally with an expected type.
///
/// When `kind` is set the stored value is coerced on lookup (see
/// [`AttributeValue::coerce`]); a failed coercion resolves as undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRef {
    pub category: Category,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ValueKind>,
}

impl AttributeRef {
    pub fn new(category: Category, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
            kind: None,
        }
    }

    pub fn typed(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn key(&self) -> AttributeKey {
        AttributeKey::new(self.category, self.name.clone())
    }

    pub fn resolve<'r>(&self, request: &'r Request) -> Attribute<'r> {
        let found = request.get(self.category, &self.name);
        let Some(kind) = self.kind else {
            return found;
        };

        match found {
            Attribute::Defined(Cow::Borrowed(value)) => value
                .coerce(kind)
                .map_or(Attribute::Undefined, Attribute::Defined),
            Attribute::Defined(Cow::Owned(value)) => value
                .coerce(kind)
                .map_or(Attribute::Undefined, |v| {
                    Attribute::Defined(Cow::Owned(v.into_owned()))
                }),
            Attribute::Undefined => Attribute::Undefined,
        }
    }
}

/// One side of a leaf comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Attribute(AttributeRef),
    Literal(AttributeValue),
}

impl Operand {
    pub fn attribute(category: Category, name: impl Into<String>) -> Self {
        Self::Attribute(AttributeRef::new(category, name))
    }

    pub fn literal(value: impl Into<AttributeValue>) -> Self {
        Self::Literal(value.into())
    }

    fn resolve<'a>(&'a self, request: &'a Request) -> Attribute<'a> {
        match self {
            Self::Attribute(reference) => {
                let resolved = reference.resolve(request);
                if !resolved.is_defined() {
                    trace!(attribute = %reference.key(), "attribute undefined");
                }
                resolved
            }
            Self::Literal(value) => Attribute::Defined(Cow::Borrowed(value)),
        }
    }
}

/// Leaf comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    /// Left string is a member of the right set, or left set intersects it.
    InSet,
    NotInSet,
    /// Left string matches the glob pattern on the right.
    MatchesPattern,
}

// ============================================================================
// Condition
// ============================================================================

/// A condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Always true or always false.
    Constant(bool),
    Leaf {
        op: Operator,
        left: Operand,
        right: Operand,
    },
    /// All sub-conditions must be true. Empty is true.
    And(Vec<Condition>),
    /// At least one sub-condition must be true. Empty is false.
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Drop for Condition {
    // Moves nested conditions onto a heap stack so a deep chain is freed
    // without one native frame per level.
    fn drop(&mut self) {
        let mut pending: Vec<Condition> = Vec::new();
        take_children(self, &mut pending);
        while let Some(mut node) = pending.pop() {
            take_children(&mut node, &mut pending);
        }
    }
}

fn take_children(node: &mut Condition, into: &mut Vec<Condition>) {
    match node {
        Condition::And(children) | Condition::Or(children) => into.append(children),
        Condition::Not(child) => {
            into.push(std::mem::replace(&mut **child, Condition::Constant(true)));
        }
        Condition::Constant(_) | Condition::Leaf { .. } => {}
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::Constant(true)
    }
}

impl Condition {
    pub fn leaf(op: Operator, left: Operand, right: Operand) -> Self {
        Self::Leaf { op, left, right }
    }

    /// `category.name == value`, the most common leaf.
    pub fn attribute_equals(
        category: Category,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        Self::leaf(
            Operator::Equals,
            Operand::attribute(category, name),
            Operand::literal(value),
        )
    }

    pub fn negate(condition: Condition) -> Self {
        Self::Not(Box::new(condition))
    }

    /// Checks structural limits and literal patterns, collecting every
    /// referenced attribute into `keys`.
    pub(crate) fn check(
        &self,
        owner: &str,
        max_depth: usize,
        keys: &mut BTreeSet<AttributeKey>,
    ) -> Result<()> {
        let mut stack = vec![(self, 1_usize)];

        while let Some((node, depth)) = stack.pop() {
            if depth > max_depth {
                return Err(PolicyError::TooDeep {
                    id: owner.to_string(),
                    what: "condition",
                    limit: max_depth,
                });
            }

            match node {
                Self::Constant(_) => {}
                Self::Leaf { op, left, right } => {
                    for operand in [left, right] {
                        if let Operand::Attribute(reference) = operand {
                            keys.insert(reference.key());
                        }
                    }
                    if let (Operator::MatchesPattern, Operand::Literal(AttributeValue::String(p))) =
                        (op, right)
                    {
                        GlobPattern::new(p.as_str()).map_err(|source| {
                            PolicyError::MalformedPattern {
                                owner: owner.to_string(),
                                source,
                            }
                        })?;
                    }
                }
                Self::And(children) | Self::Or(children) => {
                    stack.extend(children.iter().map(|child| (child, depth + 1)));
                }
                Self::Not(child) => stack.push((&**child, depth + 1)),
            }
        }

        Ok(())
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Knobs for a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    /// Hard step bound for one pattern match.
    pub pattern_step_limit: u64,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            pattern_step_limit: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Junction {
    And,
    Or,
}

impl Junction {
    fn combine(self, acc: TriState, value: TriState) -> TriState {
        match self {
            Self::And => acc.and(value),
            Self::Or => acc.or(value),
        }
    }

    /// The value that settles the junction regardless of remaining children.
    fn dominant(self) -> TriState {
        match self {
            Self::And => TriState::False,
            Self::Or => TriState::True,
        }
    }
}

enum Frame<'c> {
    Visit(&'c Condition),
    Negate,
    Junction {
        kind: Junction,
        rest: std::slice::Iter<'c, Condition>,
        acc: TriState,
    },
}

/// Evaluates a condition against a request.
///
/// Runs on an explicit work stack, so deeply nested trees cannot exhaust the
/// call stack. AND stops at the first `False`, OR at the first `True`.
pub fn evaluate(condition: &Condition, request: &Request, options: &EvalOptions) -> TriState {
    let mut stack = vec![Frame::Visit(condition)];
    // Value of the most recently completed subtree.
    let mut last: Option<TriState> = None;

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Visit(node) => match node {
                Condition::Constant(value) => last = Some(TriState::from(*value)),
                Condition::Leaf { op, left, right } => {
                    last = Some(evaluate_leaf(*op, left, right, request, options));
                }
                Condition::Not(child) => {
                    stack.push(Frame::Negate);
                    stack.push(Frame::Visit(&**child));
                }
                Condition::And(children) | Condition::Or(children) => {
                    let kind = if matches!(node, Condition::And(_)) {
                        Junction::And
                    } else {
                        Junction::Or
                    };
                    let acc = !kind.dominant();
                    last = None;
                    stack.push(Frame::Junction {
                        kind,
                        rest: children.iter(),
                        acc,
                    });
                }
            },
            Frame::Negate => last = last.map(Not::not),
            Frame::Junction {
                kind,
                mut rest,
                mut acc,
            } => {
                if let Some(value) = last.take() {
                    acc = kind.combine(acc, value);
                }
                if acc == kind.dominant() {
                    last = Some(acc);
                    continue;
                }
                match rest.next() {
                    Some(child) => {
                        stack.push(Frame::Junction { kind, rest, acc });
                        stack.push(Frame::Visit(child));
                    }
                    None => last = Some(acc),
                }
            }
        }
    }

    last.unwrap_or(TriState::Indeterminate)
}

fn evaluate_leaf(
    op: Operator,
    left: &Operand,
    right: &Operand,
    request: &Request,
    options: &EvalOptions,
) -> TriState {
    let (Attribute::Defined(left), Attribute::Defined(right)) =
        (left.resolve(request), right.resolve(request))
    else {
        return TriState::Indeterminate;
    };
    let (left, right) = (left.as_ref(), right.as_ref());

    match op {
        Operator::Equals => equality(left, right).into(),
        Operator::NotEquals => equality(left, right).map(|eq| !eq).into(),
        Operator::GreaterThan => ordering(left, right)
            .map(|o| o == Ordering::Greater)
            .into(),
        Operator::LessThan => ordering(left, right).map(|o| o == Ordering::Less).into(),
        Operator::InSet => membership(left, right).into(),
        Operator::NotInSet => membership(left, right).map(|found| !found).into(),
        Operator::MatchesPattern => pattern_match(left, right, options.pattern_step_limit),
    }
}

/// `None` when the kinds differ.
fn equality(left: &AttributeValue, right: &AttributeValue) -> Option<bool> {
    use AttributeValue as V;
    match (left, right) {
        (V::String(a), V::String(b)) => Some(a == b),
        (V::Number(a), V::Number(b)) => Some(a == b),
        (V::Boolean(a), V::Boolean(b)) => Some(a == b),
        (V::Set(a), V::Set(b)) => Some(a == b),
        _ => None,
    }
}

/// Numbers and strings are ordered; everything else (including NaN) is not.
fn ordering(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    use AttributeValue as V;
    match (left, right) {
        (V::Number(a), V::Number(b)) => a.partial_cmp(b),
        (V::String(a), V::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn membership(left: &AttributeValue, right: &AttributeValue) -> Option<bool> {
    use AttributeValue as V;
    match (left, right) {
        (V::String(item), V::Set(set)) => Some(set.contains(item)),
        (V::Set(items), V::Set(set)) => Some(!items.is_disjoint(set)),
        _ => None,
    }
}

fn pattern_match(input: &AttributeValue, pattern: &AttributeValue, step_limit: u64) -> TriState {
    let (AttributeValue::String(input), AttributeValue::String(pattern)) = (input, pattern) else {
        return TriState::Indeterminate;
    };

    match GlobPattern::new(pattern.as_str()).and_then(|p| p.matches(input, step_limit)) {
        Ok(matched) => matched.into(),
        Err(error) => {
            warn!(pattern = %pattern, %error, "pattern evaluation fault");
            TriState::Indeterminate
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
