//! Probes, the probe registry and the dispatch loop.
//!
//! Scripts register probes through [`ProbeSystem`]. Each probe pairs a
//! [`Condition`](crate::condition::Condition) with a [`ProbeSink`]; the system
//! offers every event of the current scene to every probe filed under that
//! scene and delivers an [`Envelope`](crate::event::Envelope) on a match.

/// Children monitor sink.
mod children;
/// Handle allocation, indices and deferred mutations.
pub mod registry;
/// Probe and sink types.
pub mod sink;
/// Buffered stream sinks.
pub mod stream;
/// Registration API and dispatcher.
pub mod system;

pub use registry::{DispatchSlot, Drained, Outcome, ProbeEntry, ProbeInfo, ProbeRegistry};
pub use sink::{from_fn, DeliveryContext, FnSink, Probe, ProbeSink};
pub use stream::ProbeStream;
pub use system::{DispatchReport, ProbeSystem};
