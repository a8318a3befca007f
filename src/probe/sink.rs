//! A probe binds an optional condition to a delivery sink.

use std::cell::RefCell;
use std::fmt;

use serde_json::Value;

use crate::condition::Condition;
use crate::event::{Envelope, EventInfo, ProbeHandle, ScriptId};

use super::system::ProbeSystem;

/// What a sink sees besides the envelope: which probe fired, who owns it,
/// and the system it is registered in.
///
/// Sinks may call back into the system (add, remove, rebind). Removals and
/// rebinds requested while a dispatch pass is running are deferred until the
/// pass ends.
pub struct DeliveryContext<'a> {
    system: &'a ProbeSystem,
    probe: ProbeHandle,
    script: ScriptId,
}

impl<'a> DeliveryContext<'a> {
    pub(crate) const fn new(system: &'a ProbeSystem, probe: ProbeHandle, script: ScriptId) -> Self {
        Self {
            system,
            probe,
            script,
        }
    }

    /// The system delivering the event.
    #[must_use]
    pub const fn system(&self) -> &'a ProbeSystem {
        self.system
    }

    /// Handle of the probe whose condition matched.
    #[must_use]
    pub const fn probe(&self) -> ProbeHandle {
        self.probe
    }

    /// Script owning the probe.
    #[must_use]
    pub const fn script(&self) -> ScriptId {
        self.script
    }
}

/// Receives envelopes for matching events.
pub trait ProbeSink {
    /// Called once per matching event, on the dispatching thread.
    fn deliver(&self, cx: &DeliveryContext<'_>, envelope: &Envelope);
}

/// Sink backed by a closure. Build with [`from_fn`].
pub struct FnSink<F>(F);

impl<F> ProbeSink for FnSink<F>
where
    F: Fn(&DeliveryContext<'_>, &Envelope),
{
    fn deliver(&self, cx: &DeliveryContext<'_>, envelope: &Envelope) {
        (self.0)(cx, envelope);
    }
}

/// Wrap a closure as a [`ProbeSink`].
pub fn from_fn<F>(f: F) -> FnSink<F>
where
    F: Fn(&DeliveryContext<'_>, &Envelope),
{
    FnSink(f)
}

/// A condition slot plus a sink.
///
/// A probe without a condition never matches.
pub struct Probe {
    condition: RefCell<Option<Condition>>,
    sink: Box<dyn ProbeSink>,
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("condition", &self.condition.borrow().as_ref().map(ToString::to_string))
            .finish_non_exhaustive()
    }
}

impl Probe {
    /// Create a probe.
    pub fn new(condition: Option<Condition>, sink: impl ProbeSink + 'static) -> Self {
        Self {
            condition: RefCell::new(condition),
            sink: Box::new(sink),
        }
    }

    /// Evaluate the bound condition. False when no condition is bound.
    #[must_use]
    pub fn matches(&self, info: &EventInfo, data: &Value) -> bool {
        self.condition
            .borrow()
            .as_ref()
            .is_some_and(|c| c.matches(info, data))
    }

    /// Deliver the envelope for this event if the condition matches.
    ///
    /// The condition is not borrowed while the sink runs, so the sink may
    /// replace it. Returns whether a delivery happened.
    pub fn on_event(&self, cx: &DeliveryContext<'_>, info: &EventInfo, data: &Value) -> bool {
        if !self.matches(info, data) {
            return false;
        }
        let envelope = Envelope::new(info, data);
        self.sink.deliver(cx, &envelope);
        true
    }

    /// Swap the condition, returning the previous one to the caller.
    pub fn set_condition(&self, condition: Option<Condition>) -> Option<Condition> {
        self.condition.replace(condition)
    }

    /// Whether a condition is bound.
    #[must_use]
    pub fn has_condition(&self) -> bool {
        self.condition.borrow().is_some()
    }

    /// The bound condition in expression form.
    #[must_use]
    pub fn condition_expr(&self) -> Option<Value> {
        self.condition.borrow().as_ref().map(Condition::to_expr)
    }
}
