//! Pull-style delivery through bounded channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use crate::error::{ProbeResult, StreamError};
use crate::event::{Envelope, ProbeHandle};

use super::sink::{DeliveryContext, ProbeSink};

/// Pull-style handle for a probe's envelopes.
///
/// Delivery never blocks the dispatch loop: when the buffer is full the
/// envelope is dropped and counted. Dropping the stream does not unregister
/// the probe right away; the system removes it on its next match (see
/// `remove_disconnected_streams`), or the owner can call
/// [`ProbeSystem::remove_probe`](super::ProbeSystem::remove_probe).
#[derive(Debug)]
pub struct ProbeStream {
    handle: ProbeHandle,
    rx: Receiver<Envelope>,
    dropped: Arc<AtomicU64>,
}

impl ProbeStream {
    pub(crate) fn new(handle: ProbeHandle, rx: Receiver<Envelope>, dropped: Arc<AtomicU64>) -> Self {
        Self { handle, rx, dropped }
    }

    /// Handle of the probe feeding this stream.
    #[must_use]
    pub const fn handle(&self) -> ProbeHandle {
        self.handle
    }

    /// Envelopes discarded because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Next envelope, if one is buffered.
    #[must_use]
    pub fn try_recv(&self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Every buffered envelope, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<Envelope> {
        self.rx.try_iter().collect()
    }

    /// Receive the next envelope (blocking).
    ///
    /// Fails once the probe is removed and the buffer is empty.
    pub fn recv(&self) -> ProbeResult<Envelope> {
        self.rx
            .recv()
            .map_err(|_| StreamError::Disconnected(self.handle).into())
    }

    /// Receive the next envelope with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> ProbeResult<Envelope> {
        self.rx.recv_timeout(timeout).map_err(|err| {
            match err {
                RecvTimeoutError::Timeout => StreamError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                },
                RecvTimeoutError::Disconnected => StreamError::Disconnected(self.handle),
            }
            .into()
        })
    }
}

/// Sink half of a [`ProbeStream`].
pub(crate) struct ChannelSink {
    tx: Sender<Envelope>,
    dropped: Arc<AtomicU64>,
    remove_when_disconnected: bool,
}

impl ChannelSink {
    pub(crate) fn new(tx: Sender<Envelope>, dropped: Arc<AtomicU64>, remove_when_disconnected: bool) -> Self {
        Self {
            tx,
            dropped,
            remove_when_disconnected,
        }
    }
}

impl ProbeSink for ChannelSink {
    fn deliver(&self, cx: &DeliveryContext<'_>, envelope: &Envelope) {
        match self.tx.try_send(envelope.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(probe = %cx.probe(), seq = envelope.seq, "probe stream full, envelope dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if self.remove_when_disconnected {
                    debug!(probe = %cx.probe(), "probe stream receiver gone, removing probe");
                    if let Err(err) = cx.system().remove_probe(cx.probe()) {
                        debug!(probe = %cx.probe(), %err, "disconnected stream probe already removed");
                    }
                }
            }
        }
    }
}
