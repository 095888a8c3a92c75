//! Subscriber sinks.
//!
//! A sink is the hub-side end of one subscriber's outbound channel. The hub
//! only ever calls [`SinkChannel::try_deliver`]; whoever owns the receiving
//! end (a websocket writer, a test) drives the transport.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HubError;

use super::HubMsg;

/// One serialized broadcast envelope.
pub type Frame = Arc<str>;

/// Unique identifier for a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkId(Uuid);

impl SinkId {
    /// Create a new random sink id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a frame could not be handed to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Outbound buffer is full: the subscriber is not draining fast enough.
    Full,
    /// The receiving end is gone.
    Closed,
}

/// Hub-side end of a subscriber channel. Must never block.
pub trait SinkChannel: Send + 'static {
    /// Hands `frame` to the subscriber without blocking.
    fn try_deliver(&self, frame: &Frame) -> Result<(), DeliveryError>;
}

impl SinkChannel for Sender<Frame> {
    fn try_deliver(&self, frame: &Frame) -> Result<(), DeliveryError> {
        self.try_send(Arc::clone(frame)).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Disconnected(_) => DeliveryError::Closed,
        })
    }
}

#[cfg(feature = "server")]
impl SinkChannel for tokio::sync::mpsc::Sender<Frame> {
    fn try_deliver(&self, frame: &Frame) -> Result<(), DeliveryError> {
        self.try_send(Arc::clone(frame)).map_err(|e| match e {
            tokio::sync::mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Lifecycle of a sink: `Connecting -> Registered -> Unregistering -> Closed`.
///
/// `Unregistering` is entered when the hub drops the sink (eviction,
/// explicit unregister or shutdown). `Closed` is entered exactly once, by
/// the first call to [`SinkHandle::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SinkPhase {
    /// Handed to the hub, not yet in the active set.
    Connecting = 0,
    /// In the active set; receives broadcasts.
    Registered = 1,
    /// Removed from the active set.
    Unregistering = 2,
    /// Transport released.
    Closed = 3,
}

impl SinkPhase {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Registered,
            2 => Self::Unregistering,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug)]
pub(crate) struct SinkState {
    phase: AtomicU8,
}

impl SinkState {
    pub(crate) fn new() -> Self {
        Self {
            phase: AtomicU8::new(SinkPhase::Connecting as u8),
        }
    }

    pub(crate) fn phase(&self) -> SinkPhase {
        SinkPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn advance(&self, from: SinkPhase, to: SinkPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_registered(&self) {
        self.advance(SinkPhase::Connecting, SinkPhase::Registered);
    }

    pub(crate) fn mark_unregistering(&self) {
        if !self.advance(SinkPhase::Registered, SinkPhase::Unregistering) {
            self.advance(SinkPhase::Connecting, SinkPhase::Unregistering);
        }
    }

    /// Moves to `Closed` through `Unregistering`.
    ///
    /// Returns the phase left behind, or `None` if the sink was already
    /// closed. Only one caller ever gets `Some`.
    pub(crate) fn close(&self) -> Option<SinkPhase> {
        self.mark_unregistering();
        let prev = self.phase.swap(SinkPhase::Closed as u8, Ordering::AcqRel);
        let prev = SinkPhase::from_u8(prev);
        (prev != SinkPhase::Closed).then_some(prev)
    }
}

/// Owner-side handle of a registered sink.
///
/// Both the connection's reader task and the hub's eviction path end in
/// [`SinkHandle::close`]; only the first call reports `true`, so the
/// transport is released once. Dropping the handle closes it.
pub struct SinkHandle {
    id: SinkId,
    state: Arc<SinkState>,
    mailbox: Sender<HubMsg>,
}

impl SinkHandle {
    pub(crate) fn new(id: SinkId, state: Arc<SinkState>, mailbox: Sender<HubMsg>) -> Self {
        Self { id, state, mailbox }
    }

    /// The sink id.
    #[must_use]
    pub const fn id(&self) -> SinkId {
        self.id
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SinkPhase {
        self.state.phase()
    }

    /// Whether the hub still holds this sink.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.phase() == SinkPhase::Registered
    }

    /// Unregisters the sink and marks it closed.
    ///
    /// Returns true for the first call only; the caller that gets `true`
    /// owns releasing the transport.
    pub fn close(&self) -> bool {
        if self.state.close().is_none() {
            return false;
        }
        // The hub ignores ids it no longer holds.
        let _ = self.mailbox.send(HubMsg::Unregister { id: self.id });
        true
    }
}

impl fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkHandle")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// An in-process subscriber: a bounded receiver plus its handle.
#[derive(Debug)]
pub struct Subscription {
    handle: SinkHandle,
    rx: Receiver<Frame>,
}

impl Subscription {
    pub(crate) fn new(handle: SinkHandle, rx: Receiver<Frame>) -> Self {
        Self { handle, rx }
    }

    /// The sink id backing this subscription.
    #[must_use]
    pub const fn id(&self) -> SinkId {
        self.handle.id()
    }

    /// The underlying handle.
    #[must_use]
    pub const fn handle(&self) -> &SinkHandle {
        &self.handle
    }

    /// Explicit unsubscribe. Idempotent.
    pub fn unsubscribe(&self) {
        self.handle.close();
    }

    /// Receive the next frame (blocking).
    ///
    /// Fails once the sink has been dropped by the hub and its buffer is
    /// drained.
    pub fn recv(&self) -> Result<Frame, HubError> {
        self.rx.recv().map_err(|_| HubError::SinkClosed)
    }

    /// Receive the next frame, waiting at most `timeout`. `Ok(None)` on
    /// timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Frame>, HubError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(HubError::SinkClosed),
        }
    }

    /// Non-blocking receive. `Ok(None)` when nothing is buffered.
    pub fn try_recv(&self) -> Result<Option<Frame>, HubError> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(HubError::SinkClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_transitions_once() {
        let state = SinkState::new();
        assert_eq!(state.phase(), SinkPhase::Connecting);
        state.mark_registered();
        assert_eq!(state.phase(), SinkPhase::Registered);
        state.mark_unregistering();
        assert_eq!(state.phase(), SinkPhase::Unregistering);
        assert_eq!(state.close(), Some(SinkPhase::Unregistering));
        assert_eq!(state.close(), None);
        assert_eq!(state.phase(), SinkPhase::Closed);

        // A closed sink never moves back.
        state.mark_registered();
        state.mark_unregistering();
        assert_eq!(state.phase(), SinkPhase::Closed);
    }

    #[test]
    fn owner_close_passes_through_unregistering() {
        let registered = SinkState::new();
        registered.mark_registered();
        assert_eq!(registered.close(), Some(SinkPhase::Unregistering));
        assert_eq!(registered.phase(), SinkPhase::Closed);

        let connecting = SinkState::new();
        assert_eq!(connecting.close(), Some(SinkPhase::Unregistering));
    }

    #[test]
    fn crossbeam_sender_reports_full_and_closed() {
        let (tx, rx) = crossbeam_channel::bounded::<Frame>(1);
        let frame: Frame = Arc::from("x");
        assert_eq!(tx.try_deliver(&frame), Ok(()));
        assert_eq!(tx.try_deliver(&frame), Err(DeliveryError::Full));
        drop(rx);
        assert_eq!(tx.try_deliver(&frame), Err(DeliveryError::Closed));
    }
}
