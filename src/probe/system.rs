//! The probe system: registration surface and dispatch loop.
//!
//! `ProbeSystem` owns the registry and is the only way to mutate it. It is
//! single-threaded; sinks run on the dispatching thread and receive a
//! [`DeliveryContext`] through which they may call back into the system.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crossbeam_channel::bounded;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::condition::{Condition, Parser};
use crate::config::ProbeSystemConfig;
use crate::error::{ProbeResult, RegistryError};
use crate::event::{EventInfo, ObjectHandle, ProbeHandle, SceneId, ScriptId};
use crate::host::SceneHost;

use super::children::ChildrenMonitorSink;
use super::sink::{DeliveryContext, Probe, ProbeSink};
use super::registry::{DispatchSlot, Drained, Outcome, ProbeInfo, ProbeRegistry};
use super::stream::{ChannelSink, ProbeStream};

/// Counters for one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Probes whose condition was evaluated.
    pub visited: usize,
    /// Probes whose sink received an envelope.
    pub delivered: usize,
    /// Deferred removals and rebinds applied when the pass ended.
    pub deferred: usize,
}

/// Registration API and event dispatcher.
pub struct ProbeSystem {
    cfg: ProbeSystemConfig,
    parser: Parser,
    host: Rc<dyn SceneHost>,
    registry: RefCell<ProbeRegistry>,
}

impl std::fmt::Debug for ProbeSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSystem")
            .field("cfg", &self.cfg)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ProbeSystem {
    /// Create a system with a validated config.
    pub fn new(cfg: ProbeSystemConfig, host: Rc<dyn SceneHost>) -> ProbeResult<Self> {
        cfg.validate()?;
        Ok(Self {
            parser: cfg.parser(),
            cfg,
            host,
            registry: RefCell::new(ProbeRegistry::new()),
        })
    }

    /// Create a system with the default config.
    #[must_use]
    pub fn with_host(host: Rc<dyn SceneHost>) -> Self {
        let cfg = ProbeSystemConfig::default();
        Self {
            parser: cfg.parser(),
            cfg,
            host,
            registry: RefCell::new(ProbeRegistry::new()),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ProbeSystemConfig {
        &self.cfg
    }

    /// The host collaborator.
    #[must_use]
    pub fn host(&self) -> &dyn SceneHost {
        self.host.as_ref()
    }

    /// Parse an expression with the configured depth limit.
    pub fn parse(&self, expr: &Value) -> ProbeResult<Condition> {
        Ok(self.parser.parse(expr)?)
    }

    /// Register a probe from an expression.
    ///
    /// The expression is parsed first; on a parse error nothing is registered.
    pub fn add_probe(
        &self,
        script: ScriptId,
        expr: &Value,
        sink: impl ProbeSink + 'static,
    ) -> ProbeResult<ProbeHandle> {
        let condition = self.parse(expr)?;
        Ok(self.add_probe_with(script, Some(condition), sink))
    }

    /// Register a probe from an already built condition (or none).
    pub fn add_probe_with(
        &self,
        script: ScriptId,
        condition: Option<Condition>,
        sink: impl ProbeSink + 'static,
    ) -> ProbeHandle {
        let scene = self.host.scene_of_script(script);
        let nodes = condition.as_ref().map_or(0, Condition::node_count);
        let handle = self
            .registry
            .borrow_mut()
            .add(Probe::new(condition, sink), script, scene);
        debug!(probe = %handle, %script, %scene, nodes, "probe added");
        handle
    }

    /// Register a probe whose envelopes are buffered in a [`ProbeStream`].
    pub fn add_probe_stream(&self, script: ScriptId, expr: &Value) -> ProbeResult<ProbeStream> {
        let condition = self.parse(expr)?;
        let (tx, rx) = bounded(self.cfg.stream_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let sink = ChannelSink::new(tx, Arc::clone(&dropped), self.cfg.remove_disconnected_streams);
        let handle = self.add_probe_with(script, Some(condition), sink);
        Ok(ProbeStream::new(handle, rx, dropped))
    }

    /// Register a children monitor on `parent`.
    ///
    /// `notify` receives the parent's direct children once right away and
    /// again every time the monitor fires.
    pub fn add_children_monitor<F>(
        &self,
        script: ScriptId,
        parent: ObjectHandle,
        notify: F,
    ) -> ProbeHandle
    where
        F: Fn(&[ObjectHandle]) + 'static,
    {
        let children = self.host.children_of(parent);
        let condition = Condition::children_monitor(parent, children.iter().copied());
        let sink = ChildrenMonitorSink::new(parent, notify);

        // Report the initial state too, so owners can resynchronize after undo.
        sink.notify(&children);

        let handle = self.add_probe_with(script, Some(condition), sink);
        debug!(probe = %handle, parent, children = children.len(), "children monitor added");
        handle
    }

    /// Remove a probe, disposing its condition and then the probe.
    ///
    /// During a dispatch pass the removal takes effect when the pass ends.
    pub fn remove_probe(&self, handle: ProbeHandle) -> ProbeResult<()> {
        let outcome = self.registry.borrow_mut().remove(handle)?;
        match outcome {
            Outcome::Applied(probe) => dispose(handle, probe),
            Outcome::Deferred => debug!(probe = %handle, "probe removal deferred"),
        }
        Ok(())
    }

    /// Replace a probe's condition with a parsed expression, or clear it.
    pub fn set_probe_condition(&self, handle: ProbeHandle, expr: Option<&Value>) -> ProbeResult<()> {
        let condition = expr.map(|e| self.parse(e)).transpose()?;
        self.set_condition(handle, condition)
    }

    /// Replace a probe's condition, or clear it.
    ///
    /// The previous condition is dropped. During a dispatch pass the rebind
    /// takes effect when the pass ends.
    pub fn set_condition(&self, handle: ProbeHandle, condition: Option<Condition>) -> ProbeResult<()> {
        let outcome = self.registry.borrow_mut().set_condition(handle, condition)?;
        match outcome {
            Outcome::Applied(old) => {
                debug!(probe = %handle, had_condition = old.is_some(), "probe condition replaced");
            }
            Outcome::Deferred => debug!(probe = %handle, "probe condition rebind deferred"),
        }
        Ok(())
    }

    /// Remove every probe owned by `script`. Returns how many were removed
    /// (or scheduled for removal during a dispatch pass).
    pub fn on_script_destroyed(&self, script: ScriptId) -> usize {
        let handles = self.registry.borrow().find_by_owner(script);
        let mut removed = 0;
        for handle in handles {
            match self.remove_probe(handle) {
                Ok(()) => removed += 1,
                Err(err) => warn!(probe = %handle, %script, %err, "probe vanished during script teardown"),
            }
        }
        debug!(%script, removed, "script probes torn down");
        removed
    }

    /// Dispatch one event to every probe of the current scene.
    ///
    /// The set of probes visited is fixed when the pass starts. Removals and
    /// rebinds requested by sinks are applied after the last probe ran.
    pub fn on_event(&self, info: &EventInfo, data: &Value) -> DispatchReport {
        let scene = self.host.current_scene();
        let pass = DispatchPass::begin(self, scene);

        let mut report = DispatchReport::default();
        for slot in &pass.slots {
            report.visited += 1;
            let cx = DeliveryContext::new(self, slot.handle, slot.script);
            if slot.probe.on_event(&cx, info, data) {
                report.delivered += 1;
                trace!(probe = %slot.handle, event = %info.event, seq = info.seq, "event delivered");
            }
        }

        report.deferred = pass.finish();
        report
    }

    /// Whether `handle` names a live probe.
    #[must_use]
    pub fn contains(&self, handle: ProbeHandle) -> bool {
        self.registry.borrow().contains(handle)
    }

    /// Number of live probes.
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Live probes owned by `script`.
    #[must_use]
    pub fn probes_of(&self, script: ScriptId) -> Vec<ProbeHandle> {
        self.registry.borrow().find_by_owner(script)
    }

    /// Live probes filed under `scene`.
    #[must_use]
    pub fn probes_in(&self, scene: SceneId) -> Vec<ProbeHandle> {
        self.registry.borrow().find_by_scene(scene)
    }

    /// Snapshot of one probe.
    pub fn probe_info(&self, handle: ProbeHandle) -> ProbeResult<ProbeInfo> {
        self.registry
            .borrow()
            .info(handle)
            .ok_or_else(|| RegistryError::ProbeNotFound(handle).into())
    }

    /// A probe's condition in expression form (`None` when unset).
    pub fn condition_expr(&self, handle: ProbeHandle) -> ProbeResult<Option<Value>> {
        Ok(self.probe_info(handle)?.condition)
    }

    /// Returns true while a dispatch pass is running.
    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        self.registry.borrow().is_dispatching()
    }

    fn finish_dispatch(&self) -> usize {
        let drained = self.registry.borrow_mut().finish_dispatch();
        dispose_drained(drained)
    }
}

/// Keeps the registry in dispatch mode for the lifetime of one pass, and
/// leaves it even if a sink panics.
struct DispatchPass<'a> {
    system: &'a ProbeSystem,
    slots: Vec<DispatchSlot>,
    finished: bool,
}

impl<'a> DispatchPass<'a> {
    fn begin(system: &'a ProbeSystem, scene: SceneId) -> Self {
        let slots = system.registry.borrow_mut().begin_dispatch(scene);
        Self {
            system,
            slots,
            finished: false,
        }
    }

    fn finish(mut self) -> usize {
        self.finished = true;
        // Release the snapshot first so drained probes are the last owners.
        self.slots.clear();
        self.system.finish_dispatch()
    }
}

impl Drop for DispatchPass<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.slots.clear();
            self.system.finish_dispatch();
        }
    }
}

fn dispose(handle: ProbeHandle, probe: Rc<Probe>) {
    drop(probe.set_condition(None));
    drop(probe);
    debug!(probe = %handle, "probe removed");
}

fn dispose_drained(drained: Drained) -> usize {
    let applied = drained.applied();
    if drained.skipped > 0 {
        warn!(skipped = drained.skipped, "deferred probe operations targeted missing probes");
    }
    if applied > 0 {
        debug!(
            removed = drained.removed.len(),
            rebound = drained.rebound,
            "deferred probe operations applied"
        );
    }
    for (handle, probe) in drained.removed {
        dispose(handle, probe);
    }
    drop(drained.displaced);
    applied
}
