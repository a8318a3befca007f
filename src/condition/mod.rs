//! Condition trees evaluated against every event.
//!
//! A `Condition` is compiled once from an expression (see [`parser`]) and
//! then evaluated for each `(EventInfo, payload)` pair flowing through the
//! system. Composite variants own their children; dropping a condition drops
//! its whole subtree.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ParseError;
use crate::event::{EventInfo, ObjectHandle, Uid};
use crate::value::{field, structurally_equal};

/// Expression parser.
pub mod parser;

pub use parser::{parse, Parser, DEFAULT_MAX_DEPTH};

/// Event names the children monitor reacts to.
pub const OBJECT_ADDED: &str = "objectAdded";
#[allow(missing_docs)]
pub const OBJECT_CHANGED: &str = "objectChanged";
#[allow(missing_docs)]
pub const OBJECT_REMOVED: &str = "objectRemoved";

/// Payload field carrying an object's parent handle.
pub const PARENT_HANDLE_FIELD: &str = "parentHandle";

/// A predicate over an event descriptor and its payload.
///
/// Serializes to (and deserializes from) the array expression grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Condition {
    /// All children match; evaluated left to right, stops at the first miss.
    And(Vec<Condition>),
    /// Any child matches; evaluated left to right, stops at the first hit.
    Or(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
    /// `info.event` equals the name exactly.
    EventType(String),
    /// `info.handle` is in the set.
    Handles(BTreeSet<ObjectHandle>),
    /// `info.uid` is in the set.
    Uids(BTreeSet<Uid>),
    /// The payload has the named field, whatever its value.
    Has(String),
    /// The payload has the named field and it equals `value`.
    Eq {
        #[allow(missing_docs)]
        field: String,
        #[allow(missing_docs)]
        value: Value,
    },
    /// Structural changes under `parent`, or removal/reparenting of one of
    /// the cached `children`.
    ///
    /// The child set is a snapshot; its owner refreshes it by rebinding a new
    /// condition whenever it fires.
    ChildrenMonitor {
        #[allow(missing_docs)]
        parent: ObjectHandle,
        #[allow(missing_docs)]
        children: BTreeSet<ObjectHandle>,
    },
}

impl Condition {
    #[allow(missing_docs)]
    #[must_use]
    pub fn and(children: impl IntoIterator<Item = Condition>) -> Self {
        Self::And(children.into_iter().collect())
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn or(children: impl IntoIterator<Item = Condition>) -> Self {
        Self::Or(children.into_iter().collect())
    }

    #[allow(missing_docs, clippy::should_implement_trait)]
    #[must_use]
    pub fn not(child: Condition) -> Self {
        Self::Not(Box::new(child))
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn event(name: impl Into<String>) -> Self {
        Self::EventType(name.into())
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn handles(handles: impl IntoIterator<Item = ObjectHandle>) -> Self {
        Self::Handles(handles.into_iter().collect())
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn uids(uids: impl IntoIterator<Item = Uid>) -> Self {
        Self::Uids(uids.into_iter().collect())
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn has(field: impl Into<String>) -> Self {
        Self::Has(field.into())
    }

    #[allow(missing_docs, clippy::should_implement_trait)]
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Children monitor for `parent` with the given snapshot of its children.
    #[must_use]
    pub fn children_monitor(
        parent: ObjectHandle,
        children: impl IntoIterator<Item = ObjectHandle>,
    ) -> Self {
        Self::ChildrenMonitor {
            parent,
            children: children.into_iter().collect(),
        }
    }

    /// Evaluate against one event.
    #[must_use]
    pub fn matches(&self, info: &EventInfo, data: &Value) -> bool {
        self.matches_observed(info, data, &mut |_, _| {})
    }

    /// Evaluate against one event, reporting every node that was actually
    /// evaluated together with its result (children before parents).
    ///
    /// Nodes skipped by short-circuiting are never reported.
    pub fn matches_observed<F>(&self, info: &EventInfo, data: &Value, observe: &mut F) -> bool
    where
        F: FnMut(&Condition, bool),
    {
        let result = match self {
            Self::And(children) => children
                .iter()
                .all(|c| c.matches_observed(info, data, observe)),
            Self::Or(children) => children
                .iter()
                .any(|c| c.matches_observed(info, data, observe)),
            Self::Not(child) => !child.matches_observed(info, data, observe),
            Self::EventType(name) => info.event == *name,
            Self::Handles(handles) => handles.contains(&info.handle),
            Self::Uids(uids) => uids.contains(&info.uid),
            Self::Has(name) => field(data, name).is_some(),
            Self::Eq { field: name, value } => {
                field(data, name).is_some_and(|v| structurally_equal(v, value))
            }
            Self::ChildrenMonitor { parent, children } => {
                children_monitor_matches(*parent, children, info, data)
            }
        };
        observe(self, result);
        result
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        match self {
            Self::And(children) | Self::Or(children) => {
                1 + children.iter().map(Self::node_count).sum::<usize>()
            }
            Self::Not(child) => 1 + child.node_count(),
            _ => 1,
        }
    }

    /// Back to the expression grammar.
    ///
    /// Reparsing the result yields a condition with identical `matches`
    /// results. `ChildrenMonitor` has no tag of its own and is lowered to the
    /// equivalent `or`/`and` combination of parseable tags.
    #[must_use]
    pub fn to_expr(&self) -> Value {
        match self {
            Self::And(children) => tagged_list("and", children),
            Self::Or(children) => tagged_list("or", children),
            Self::Not(child) => json!(["not", child.to_expr()]),
            Self::EventType(name) => json!(["event", name]),
            Self::Handles(handles) => json!(["handles", handles]),
            Self::Uids(uids) => json!(["uids", uids]),
            Self::Has(name) => json!(["has", name]),
            Self::Eq { field, value } => json!(["eq", field, value]),
            Self::ChildrenMonitor { parent, children } => {
                lower_children_monitor(*parent, children).to_expr()
            }
        }
    }
}

fn tagged_list(tag: &str, children: &[Condition]) -> Value {
    let mut items = Vec::with_capacity(children.len() + 1);
    items.push(Value::from(tag));
    items.extend(children.iter().map(Condition::to_expr));
    Value::Array(items)
}

fn children_monitor_matches(
    parent: ObjectHandle,
    children: &BTreeSet<ObjectHandle>,
    info: &EventInfo,
    data: &Value,
) -> bool {
    let tracked = children.contains(&info.handle);
    let parent_field = field(data, PARENT_HANDLE_FIELD);
    let under_parent = parent_field.is_some_and(|v| structurally_equal(v, &Value::from(parent)));

    match info.event.as_str() {
        OBJECT_ADDED => under_parent,
        OBJECT_CHANGED => under_parent || (tracked && parent_field.is_some()),
        OBJECT_REMOVED => tracked,
        _ => false,
    }
}

fn lower_children_monitor(parent: ObjectHandle, children: &BTreeSet<ObjectHandle>) -> Condition {
    let tracked = || Condition::Handles(children.clone());
    Condition::or([
        Condition::and([
            Condition::or([Condition::event(OBJECT_ADDED), Condition::event(OBJECT_CHANGED)]),
            Condition::eq(PARENT_HANDLE_FIELD, parent),
        ]),
        Condition::and([Condition::event(OBJECT_REMOVED), tracked()]),
        Condition::and([
            Condition::event(OBJECT_CHANGED),
            tracked(),
            Condition::has(PARENT_HANDLE_FIELD),
        ]),
    ])
}

impl From<Condition> for Value {
    fn from(condition: Condition) -> Self {
        condition.to_expr()
    }
}

/// Parses with [`DEFAULT_MAX_DEPTH`]. This also backs `Deserialize`, so a
/// system configured with a lower `max_expression_depth` should parse through
/// [`ProbeSystem::parse`](crate::probe::ProbeSystem::parse) instead.
impl TryFrom<Value> for Condition {
    type Error = ParseError;

    fn try_from(expr: Value) -> Result<Self, Self::Error> {
        Parser::default().parse(&expr)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}
