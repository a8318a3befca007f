//! Host collaborators.
//!
//! The probe system needs three facts from the environment that runs the
//! scripts: which scene is active, which scene a script lives in, and the
//! direct children of an object. `SceneHost` is that boundary.
//! `InMemoryScene` is a reference implementation for embedding and tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use crate::event::{ObjectHandle, SceneId, ScriptId};

/// Environment queries used by the probe system.
pub trait SceneHost {
    /// Scene whose events are currently being dispatched.
    fn current_scene(&self) -> SceneId;

    /// Scene a script belongs to. Probes are filed under it at add time.
    fn scene_of_script(&self, script: ScriptId) -> SceneId;

    /// Direct children of `parent`, excluding `parent` itself.
    fn children_of(&self, parent: ObjectHandle) -> Vec<ObjectHandle>;
}

#[derive(Debug, Default)]
struct SceneState {
    current: SceneId,
    scripts: HashMap<ScriptId, SceneId>,
    parents: BTreeMap<ObjectHandle, ObjectHandle>,
}

/// Single-threaded in-memory host.
///
/// Scripts without an explicit scene are assumed to live in the current one.
/// Children are reported in ascending handle order.
#[derive(Debug, Default)]
pub struct InMemoryScene {
    state: RefCell<SceneState>,
}

impl InMemoryScene {
    /// Create an empty host with scene 0 active.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the active scene.
    pub fn set_current_scene(&self, scene: SceneId) {
        self.state.borrow_mut().current = scene;
    }

    /// Place a script in a scene.
    pub fn assign_script(&self, script: ScriptId, scene: SceneId) {
        self.state.borrow_mut().scripts.insert(script, scene);
    }

    /// Create or reparent an object.
    pub fn set_parent(&self, object: ObjectHandle, parent: ObjectHandle) {
        self.state.borrow_mut().parents.insert(object, parent);
    }

    /// Remove an object. Its children become orphans.
    pub fn remove_object(&self, object: ObjectHandle) {
        let mut state = self.state.borrow_mut();
        state.parents.remove(&object);
        state.parents.retain(|_, parent| *parent != object);
    }
}

impl SceneHost for InMemoryScene {
    fn current_scene(&self) -> SceneId {
        self.state.borrow().current
    }

    fn scene_of_script(&self, script: ScriptId) -> SceneId {
        let state = self.state.borrow();
        state.scripts.get(&script).copied().unwrap_or(state.current)
    }

    fn children_of(&self, parent: ObjectHandle) -> Vec<ObjectHandle> {
        self.state
            .borrow()
            .parents
            .iter()
            .filter(|(_, p)| **p == parent)
            .map(|(child, _)| *child)
            .collect()
    }
}
