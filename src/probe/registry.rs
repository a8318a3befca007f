//! Probe registry: handle allocation, owner/scene indices and the deferred
//! mutation queue that keeps dispatch passes safe against re-entrant removal.
//!
//! The registry is either idle or inside one or more (nested) dispatch passes.
//! While dispatching, removals and condition rebinds are queued instead of
//! applied, and the queue is drained in request order when the outermost pass
//! finishes. Additions always apply immediately; a probe added mid-pass is not
//! part of that pass's snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::condition::Condition;
use crate::error::RegistryError;
use crate::event::{ProbeHandle, SceneId, ScriptId};

use super::sink::Probe;

/// Result of a mutation that may have been deferred.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Applied immediately; carries whatever the mutation displaced.
    Applied(T),
    /// Queued until the running dispatch pass finishes.
    Deferred,
}

impl<T> Outcome<T> {
    /// Returns true if the mutation was queued.
    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred)
    }
}

#[derive(Debug)]
enum PendingOp {
    Remove(ProbeHandle),
    Rebind(ProbeHandle, Option<Condition>),
}

#[derive(Debug)]
enum DispatchState {
    Idle,
    Dispatching {
        depth: usize,
        pending: VecDeque<PendingOp>,
        removing: HashSet<ProbeHandle>,
    },
}

/// One registered probe.
#[derive(Debug)]
pub struct ProbeEntry {
    /// Registry handle.
    pub handle: ProbeHandle,
    /// Owning script.
    pub script: ScriptId,
    /// Scene of the owning script at registration time.
    pub scene: SceneId,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// The probe itself.
    pub probe: Rc<Probe>,
}

/// Serializable view of a registry entry.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeInfo {
    pub handle: ProbeHandle,
    pub script: ScriptId,
    pub scene: SceneId,
    pub created_at: DateTime<Utc>,
    pub condition: Option<Value>,
}

/// A probe visited by a dispatch pass.
#[derive(Debug, Clone)]
pub struct DispatchSlot {
    /// Registry handle.
    pub handle: ProbeHandle,
    /// Owning script.
    pub script: ScriptId,
    /// The probe, kept alive for the whole pass.
    pub probe: Rc<Probe>,
}

/// What draining the deferred queue did.
#[derive(Debug, Default)]
pub struct Drained {
    /// Removed probes in request order, for the caller to dispose.
    pub removed: Vec<(ProbeHandle, Rc<Probe>)>,
    /// Number of rebinds applied.
    pub rebound: usize,
    /// Conditions displaced by rebinds, for the caller to dispose.
    pub displaced: Vec<Condition>,
    /// Queued operations whose probe was already gone.
    pub skipped: usize,
}

impl Drained {
    /// Number of queued operations that took effect.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.removed.len() + self.rebound
    }
}

/// Handle-indexed set of live probes.
#[derive(Debug)]
pub struct ProbeRegistry {
    entries: BTreeMap<ProbeHandle, ProbeEntry>,
    by_script: HashMap<ScriptId, BTreeSet<ProbeHandle>>,
    by_scene: HashMap<SceneId, BTreeSet<ProbeHandle>>,
    next_handle: u64,
    state: DispatchState,
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            by_script: HashMap::new(),
            by_scene: HashMap::new(),
            next_handle: 1,
            state: DispatchState::Idle,
        }
    }

    /// Register a probe owned by `script` in `scene`.
    pub fn add(&mut self, probe: Probe, script: ScriptId, scene: SceneId) -> ProbeHandle {
        let handle = ProbeHandle::from_raw(self.next_handle);
        self.next_handle += 1;

        self.by_script.entry(script).or_default().insert(handle);
        self.by_scene.entry(scene).or_default().insert(handle);
        self.entries.insert(
            handle,
            ProbeEntry {
                handle,
                script,
                scene,
                created_at: Utc::now(),
                probe: Rc::new(probe),
            },
        );
        handle
    }

    /// Remove a probe.
    ///
    /// Idle: the entry is unlinked and its probe handed to the caller for
    /// disposal. Dispatching: the removal is queued and the handle stops
    /// resolving immediately, but the probe stays in place until the pass ends.
    pub fn remove(&mut self, handle: ProbeHandle) -> Result<Outcome<Rc<Probe>>, RegistryError> {
        if !self.contains(handle) {
            return Err(RegistryError::ProbeNotFound(handle));
        }
        if let DispatchState::Dispatching {
            pending, removing, ..
        } = &mut self.state
        {
            removing.insert(handle);
            pending.push_back(PendingOp::Remove(handle));
            return Ok(Outcome::Deferred);
        }
        let entry = self
            .unlink(handle)
            .ok_or(RegistryError::ProbeNotFound(handle))?;
        Ok(Outcome::Applied(entry.probe))
    }

    /// Replace a probe's condition.
    ///
    /// Idle: swapped now, the old condition is returned. Dispatching: queued.
    pub fn set_condition(
        &mut self,
        handle: ProbeHandle,
        condition: Option<Condition>,
    ) -> Result<Outcome<Option<Condition>>, RegistryError> {
        if !self.contains(handle) {
            return Err(RegistryError::ProbeNotFound(handle));
        }
        if let DispatchState::Dispatching { pending, .. } = &mut self.state {
            pending.push_back(PendingOp::Rebind(handle, condition));
            return Ok(Outcome::Deferred);
        }
        let entry = self
            .entries
            .get(&handle)
            .ok_or(RegistryError::ProbeNotFound(handle))?;
        Ok(Outcome::Applied(entry.probe.set_condition(condition)))
    }

    /// Whether `handle` names a live probe (not removed, not scheduled for removal).
    #[must_use]
    pub fn contains(&self, handle: ProbeHandle) -> bool {
        self.entries.contains_key(&handle) && !self.is_removing(handle)
    }

    /// Look up a live probe.
    #[must_use]
    pub fn get(&self, handle: ProbeHandle) -> Option<&ProbeEntry> {
        self.entries.get(&handle).filter(|_| !self.is_removing(handle))
    }

    /// Live probes owned by `script`, in registration order.
    #[must_use]
    pub fn find_by_owner(&self, script: ScriptId) -> Vec<ProbeHandle> {
        self.indexed(self.by_script.get(&script))
    }

    /// Live probes filed under `scene`, in registration order.
    #[must_use]
    pub fn find_by_scene(&self, scene: SceneId) -> Vec<ProbeHandle> {
        self.indexed(self.by_scene.get(&scene))
    }

    /// Number of live probes.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.state {
            DispatchState::Idle => self.entries.len(),
            DispatchState::Dispatching { removing, .. } => self.entries.len() - removing.len(),
        }
    }

    /// Returns true if no live probes remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializable view of a live probe.
    #[must_use]
    pub fn info(&self, handle: ProbeHandle) -> Option<ProbeInfo> {
        self.get(handle).map(|entry| ProbeInfo {
            handle: entry.handle,
            script: entry.script,
            scene: entry.scene,
            created_at: entry.created_at,
            condition: entry.probe.condition_expr(),
        })
    }

    /// Returns true while a dispatch pass is running.
    #[must_use]
    pub const fn is_dispatching(&self) -> bool {
        matches!(self.state, DispatchState::Dispatching { .. })
    }

    /// Number of queued operations.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        match &self.state {
            DispatchState::Idle => 0,
            DispatchState::Dispatching { pending, .. } => pending.len(),
        }
    }

    /// Enter a dispatch pass and snapshot every probe present in `scene`.
    ///
    /// Passes nest; only the outermost [`finish_dispatch`](Self::finish_dispatch)
    /// drains the queue.
    pub fn begin_dispatch(&mut self, scene: SceneId) -> Vec<DispatchSlot> {
        if let DispatchState::Dispatching { depth, .. } = &mut self.state {
            *depth += 1;
        } else {
            self.state = DispatchState::Dispatching {
                depth: 1,
                pending: VecDeque::new(),
                removing: HashSet::new(),
            };
        }

        self.by_scene
            .get(&scene)
            .into_iter()
            .flatten()
            .filter(|handle| !self.is_removing(**handle))
            .filter_map(|handle| self.entries.get(handle))
            .map(|entry| DispatchSlot {
                handle: entry.handle,
                script: entry.script,
                probe: Rc::clone(&entry.probe),
            })
            .collect()
    }

    /// Leave a dispatch pass. When the outermost pass ends, apply the queued
    /// operations in request order and return what they displaced.
    pub fn finish_dispatch(&mut self) -> Drained {
        let pending = match &mut self.state {
            DispatchState::Idle => return Drained::default(),
            DispatchState::Dispatching { depth, .. } if *depth > 1 => {
                *depth -= 1;
                return Drained::default();
            }
            DispatchState::Dispatching { pending, .. } => std::mem::take(pending),
        };
        self.state = DispatchState::Idle;

        let mut drained = Drained::default();
        for op in pending {
            match op {
                PendingOp::Remove(handle) => match self.unlink(handle) {
                    Some(entry) => drained.removed.push((handle, entry.probe)),
                    None => drained.skipped += 1,
                },
                PendingOp::Rebind(handle, condition) => match self.entries.get(&handle) {
                    Some(entry) => {
                        drained.rebound += 1;
                        drained.displaced.extend(entry.probe.set_condition(condition));
                    }
                    None => drained.skipped += 1,
                },
            }
        }
        drained
    }

    fn is_removing(&self, handle: ProbeHandle) -> bool {
        match &self.state {
            DispatchState::Idle => false,
            DispatchState::Dispatching { removing, .. } => removing.contains(&handle),
        }
    }

    fn indexed(&self, handles: Option<&BTreeSet<ProbeHandle>>) -> Vec<ProbeHandle> {
        handles
            .into_iter()
            .flatten()
            .copied()
            .filter(|h| !self.is_removing(*h))
            .collect()
    }

    fn unlink(&mut self, handle: ProbeHandle) -> Option<ProbeEntry> {
        let entry = self.entries.remove(&handle)?;
        remove_from_index(&mut self.by_script, entry.script, handle);
        remove_from_index(&mut self.by_scene, entry.scene, handle);
        Some(entry)
    }
}

fn remove_from_index<K>(index: &mut HashMap<K, BTreeSet<ProbeHandle>>, key: K, handle: ProbeHandle)
where
    K: std::hash::Hash + Eq,
{
    if let Some(set) = index.get_mut(&key) {
        set.remove(&handle);
        if set.is_empty() {
            index.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::from_fn;

    fn probe(condition: Condition) -> Probe {
        Probe::new(Some(condition), from_fn(|_, _| {}))
    }

    fn registry_with(n: usize, script: ScriptId, scene: SceneId) -> (ProbeRegistry, Vec<ProbeHandle>) {
        let mut reg = ProbeRegistry::new();
        let handles = (0..n)
            .map(|i| reg.add(probe(Condition::has(format!("f{i}"))), script, scene))
            .collect();
        (reg, handles)
    }

    #[test]
    fn handles_are_monotonic_and_indexed() {
        let mut reg = ProbeRegistry::new();
        let a = reg.add(probe(Condition::has("a")), ScriptId(1), SceneId(1));
        let b = reg.add(probe(Condition::has("b")), ScriptId(2), SceneId(1));
        let c = reg.add(probe(Condition::has("c")), ScriptId(1), SceneId(2));

        assert!(a < b && b < c);
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.find_by_owner(ScriptId(1)), vec![a, c]);
        assert_eq!(reg.find_by_scene(SceneId(1)), vec![a, b]);
        assert!(reg.find_by_owner(ScriptId(9)).is_empty());
    }

    #[test]
    fn idle_remove_unlinks_every_index() {
        let (mut reg, handles) = registry_with(2, ScriptId(1), SceneId(1));

        let Outcome::Applied(removed) = reg.remove(handles[0]).unwrap() else {
            panic!("expected immediate removal");
        };
        assert!(removed.has_condition());
        assert!(!reg.contains(handles[0]));
        assert_eq!(reg.find_by_owner(ScriptId(1)), vec![handles[1]]);
        assert_eq!(reg.find_by_scene(SceneId(1)), vec![handles[1]]);

        let err = reg.remove(handles[0]).unwrap_err();
        assert_eq!(err, RegistryError::ProbeNotFound(handles[0]));
    }

    #[test]
    fn handles_are_not_reused() {
        let (mut reg, handles) = registry_with(1, ScriptId(1), SceneId(1));
        let _ = reg.remove(handles[0]).unwrap();
        let next = reg.add(probe(Condition::has("x")), ScriptId(1), SceneId(1));
        assert_ne!(next, handles[0]);
    }

    #[test]
    fn removal_during_dispatch_is_deferred() {
        let (mut reg, handles) = registry_with(3, ScriptId(1), SceneId(1));

        let slots = reg.begin_dispatch(SceneId(1));
        assert_eq!(slots.len(), 3);
        assert!(reg.is_dispatching());

        let outcome = reg.remove(handles[2]).unwrap();
        assert!(outcome.is_deferred());
        assert_eq!(reg.pending_len(), 1);

        // The handle no longer resolves, but the probe is still alive.
        assert!(!reg.contains(handles[2]));
        assert_eq!(reg.len(), 2);
        assert_eq!(Rc::strong_count(&slots[2].probe), 2);

        // A second request for the same probe is a lookup failure.
        assert!(reg.remove(handles[2]).is_err());
        assert!(reg.set_condition(handles[2], None).is_err());

        drop(slots);
        let drained = reg.finish_dispatch();
        assert!(!reg.is_dispatching());
        assert_eq!(drained.removed.len(), 1);
        assert_eq!(drained.removed[0].0, handles[2]);
        assert_eq!(Rc::strong_count(&drained.removed[0].1), 1);
        assert_eq!(reg.find_by_scene(SceneId(1)), handles[..2].to_vec());
    }

    #[test]
    fn queue_drains_in_request_order() {
        let (mut reg, handles) = registry_with(2, ScriptId(1), SceneId(1));
        let _slots = reg.begin_dispatch(SceneId(1));

        assert!(reg.set_condition(handles[0], Some(Condition::has("first"))).unwrap().is_deferred());
        assert!(reg.set_condition(handles[0], Some(Condition::has("second"))).unwrap().is_deferred());
        assert!(reg.remove(handles[1]).unwrap().is_deferred());

        let drained = reg.finish_dispatch();
        assert_eq!(drained.rebound, 2);
        assert_eq!(drained.applied(), 3);
        assert_eq!(
            drained.displaced,
            vec![Condition::has("f0"), Condition::has("first")]
        );
        assert_eq!(
            reg.info(handles[0]).unwrap().condition,
            Some(serde_json::json!(["has", "second"]))
        );
    }

    #[test]
    fn rebind_after_deferred_removal_is_rejected() {
        let (mut reg, handles) = registry_with(1, ScriptId(1), SceneId(1));
        let _slots = reg.begin_dispatch(SceneId(1));
        let _ = reg.remove(handles[0]).unwrap();
        assert_eq!(
            reg.set_condition(handles[0], None).unwrap_err(),
            RegistryError::ProbeNotFound(handles[0])
        );
        let drained = reg.finish_dispatch();
        assert_eq!(drained.removed.len(), 1);
        assert_eq!(drained.skipped, 0);
    }

    #[test]
    fn probes_added_mid_pass_are_not_in_the_snapshot() {
        let (mut reg, _) = registry_with(1, ScriptId(1), SceneId(1));
        let slots = reg.begin_dispatch(SceneId(1));
        let late = reg.add(probe(Condition::has("late")), ScriptId(1), SceneId(1));

        assert_eq!(slots.len(), 1);
        assert!(reg.contains(late));
        let _ = reg.finish_dispatch();
        assert_eq!(reg.begin_dispatch(SceneId(1)).len(), 2);
    }

    #[test]
    fn nested_passes_drain_once_at_the_outermost_finish() {
        let (mut reg, handles) = registry_with(2, ScriptId(1), SceneId(1));
        let _outer = reg.begin_dispatch(SceneId(1));
        let _ = reg.remove(handles[0]).unwrap();

        let inner = reg.begin_dispatch(SceneId(1));
        assert_eq!(inner.len(), 1, "pending removals are skipped by nested passes");
        let drained = reg.finish_dispatch();
        assert_eq!(drained.applied(), 0);
        assert!(reg.is_dispatching());

        let drained = reg.finish_dispatch();
        assert_eq!(drained.removed.len(), 1);
        assert!(!reg.is_dispatching());
    }

    #[test]
    fn idle_set_condition_returns_previous() {
        let (mut reg, handles) = registry_with(1, ScriptId(1), SceneId(1));
        let Outcome::Applied(old) = reg.set_condition(handles[0], None).unwrap() else {
            panic!("expected immediate rebind");
        };
        assert_eq!(old, Some(Condition::has("f0")));
        assert_eq!(reg.info(handles[0]).unwrap().condition, None);
    }

    #[test]
    fn finish_without_begin_is_a_no_op() {
        let mut reg = ProbeRegistry::new();
        let drained = reg.finish_dispatch();
        assert_eq!(drained.applied(), 0);
        assert!(!reg.is_dispatching());
    }
}
