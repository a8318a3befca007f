//! Children monitor wiring.
//!
//! A children monitor is a probe whose condition is a
//! [`Condition::ChildrenMonitor`] snapshot. Each time it fires, the sink asks
//! the host for the parent's current children, rebinds a fresh snapshot and
//! reports the child list to the owner.

use tracing::{debug, warn};

use crate::condition::Condition;
use crate::event::{Envelope, ObjectHandle};

use super::sink::{DeliveryContext, ProbeSink};

pub(crate) struct ChildrenMonitorSink<F> {
    parent: ObjectHandle,
    notify: F,
}

impl<F> ChildrenMonitorSink<F>
where
    F: Fn(&[ObjectHandle]),
{
    pub(crate) fn new(parent: ObjectHandle, notify: F) -> Self {
        Self { parent, notify }
    }

    pub(crate) fn notify(&self, children: &[ObjectHandle]) {
        (self.notify)(children);
    }
}

impl<F> ProbeSink for ChildrenMonitorSink<F>
where
    F: Fn(&[ObjectHandle]),
{
    fn deliver(&self, cx: &DeliveryContext<'_>, envelope: &Envelope) {
        let system = cx.system();
        let children = system.host().children_of(self.parent);
        debug!(
            probe = %cx.probe(),
            parent = self.parent,
            event = %envelope.event,
            children = children.len(),
            "children changed"
        );

        let refreshed = Condition::children_monitor(self.parent, children.iter().copied());
        if let Err(err) = system.set_condition(cx.probe(), Some(refreshed)) {
            warn!(probe = %cx.probe(), %err, "children monitor could not refresh its snapshot");
            return;
        }
        self.notify(&children);
    }
}
