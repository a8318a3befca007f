//! Event descriptors, delivery envelopes and identifier types.
//!
//! `EventInfo` and the payload are supplied by the host for every occurrence
//! and are only ever read. `Envelope` is the flattened record handed to a
//! probe's sink on a match.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Integer handle of a scene object, as issued by the host.
pub type ObjectHandle = i64;

/// 64-bit unique id of a scene object, as issued by the host.
pub type Uid = i64;

/// Opaque handle identifying a registered probe.
///
/// Handles are allocated monotonically and never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeHandle(u64);

impl ProbeHandle {
    /// Wrap a raw handle value received from the host.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value handed to the host.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProbeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the script that owns a probe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptId(pub i64);

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script:{}", self.0)
    }
}

/// Identifier of a scene.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneId(pub i64);

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scene:{}", self.0)
    }
}

/// Describes one occurrence in the host's event stream.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    pub event: String,
    pub seq: u64,
    pub uid: Uid,
    pub handle: ObjectHandle,
}

impl EventInfo {
    /// Convenience constructor.
    #[must_use]
    pub fn new(event: impl Into<String>, seq: u64, uid: Uid, handle: ObjectHandle) -> Self {
        Self {
            event: event.into(),
            seq,
            uid,
            handle,
        }
    }
}

/// Record delivered to a probe's sink when its condition matches.
///
/// Merges the event descriptor with the payload under `data`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub seq: u64,
    pub uid: Uid,
    pub handle: ObjectHandle,
    pub data: Value,
}

impl Envelope {
    /// Build the envelope for `info` carrying a copy of `data`.
    #[must_use]
    pub fn new(info: &EventInfo, data: &Value) -> Self {
        Self {
            event: info.event.clone(),
            seq: info.seq,
            uid: info.uid,
            handle: info.handle,
            data: data.clone(),
        }
    }

    /// The envelope as a JSON object, the shape pushed to the host.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "event": self.event,
            "seq": self.seq,
            "uid": self.uid,
            "handle": self.handle,
            "data": self.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_flattens_descriptor_and_payload() {
        let info = EventInfo::new("objectChanged", 7, 1001, 42);
        let data = json!({"parentHandle": 3});
        let env = Envelope::new(&info, &data);

        assert_eq!(
            env.to_value(),
            json!({
                "event": "objectChanged",
                "seq": 7,
                "uid": 1001,
                "handle": 42,
                "data": {"parentHandle": 3},
            })
        );
    }

    #[test]
    fn envelope_serializes_like_to_value() {
        let env = Envelope::new(&EventInfo::new("a", 1, 2, 3), &json!(null));
        assert_eq!(serde_json::to_value(&env).unwrap(), env.to_value());
    }

    #[test]
    fn probe_handle_is_transparent() {
        let h = ProbeHandle::from_raw(12);
        assert_eq!(serde_json::to_value(h).unwrap(), json!(12));
        assert_eq!(h.to_string(), "12");
    }
}
