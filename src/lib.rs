//! # evprobe - Event Probes for Scripted Scenes
//!
//! evprobe lets scripts observe a host's event stream by registering probes:
//! a declarative condition tree plus a sink. Every event flowing through the
//! host is offered to the probes of the current scene, and matching probes
//! receive a flattened envelope of the event and its payload.
//!
//! ## Core Concepts
//!
//! - **Condition**: A predicate tree (`and`, `or`, `not`, `event`, `handles`,
//!   `uids`, `has`, `eq`) compiled from a JSON array expression
//! - **Probe**: A condition slot bound to a [`ProbeSink`]
//! - **ProbeSystem**: Registration API and dispatcher; sinks may add, remove
//!   and rebind probes while an event is being dispatched
//! - **Children monitor**: A self-refreshing probe tracking the direct
//!   children of one object
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use evprobe::{from_fn, EventInfo, InMemoryScene, ProbeSystem, ScriptId};
//! use serde_json::json;
//!
//! let system = ProbeSystem::with_host(Rc::new(InMemoryScene::new()));
//! let probe = system.add_probe(
//!     ScriptId(1),
//!     &json!(["and", ["event", "objectChanged"], ["eq", "name", "door"]]),
//!     from_fn(|_cx, envelope| println!("{}", envelope.to_value())),
//! )?;
//!
//! system.on_event(&EventInfo::new("objectChanged", 1, 7, 42), &json!({"name": "door"}));
//! system.remove_probe(probe)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod condition;
pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod probe;
pub mod value;

// Re-export primary types at crate root for convenience
pub use condition::{parse, Condition, Parser};
pub use config::ProbeSystemConfig;
pub use error::{ConfigError, ParseError, ProbeError, ProbeResult, RegistryError, StreamError};
pub use event::{Envelope, EventInfo, ObjectHandle, ProbeHandle, SceneId, ScriptId, Uid};
pub use host::{InMemoryScene, SceneHost};
pub use probe::{
    from_fn, DeliveryContext, DispatchReport, Probe, ProbeInfo, ProbeRegistry, ProbeSink,
    ProbeStream, ProbeSystem,
};
