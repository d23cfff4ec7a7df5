//! Per-session event queue.
//!
//! Every source a session reacts to (inbound bus frames, module-produced
//! commands, timer ticks, transport loss, stop requests) funnels into one
//! bounded MPSC queue consumed solely by the session controller. That single
//! consumer is what keeps the device table, the pending-command FIFOs and
//! the session counter lock-free.
//!
//! Producers never block: a full queue means the consumer is stuck, so the
//! queue marks the overflow and cancels the session instead of waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fleet_protocol::{external_client, Device};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Capacity of the per-session event queue. Sized for a gateway with a few
/// dozen devices; overflow indicates a stuck consumer, not load.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// A command drained from a module's handler library.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleCommand {
    /// Target device as reported by the library.
    pub device: Device,
    /// Opaque command payload.
    pub data: Vec<u8>,
}

/// One event dequeued by the session controller.
#[derive(Debug)]
pub enum SessionEvent {
    /// A decoded frame from the car's gateway.
    CarMessage(external_client::MessageType),
    /// A frame arrived that decodes to no known kind.
    UnknownFrame,
    /// A command produced by the given module's handler library.
    ModuleCommand {
        /// Module whose command-waiting thread drained the command.
        module_id: u16,
        /// The drained command.
        command: ModuleCommand,
    },
    /// Periodic tick driving the timeout checks.
    Tick,
    /// The bus connection is gone.
    TransportDown,
    /// Graceful stop requested.
    Stop,
}

/// Producer handle of the session event queue.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<SessionEvent>,
    overflowed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl EventQueue {
    /// Creates the queue and hands back the consumer end. `cancel` is
    /// cancelled when the queue overflows.
    #[must_use]
    pub fn new(
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            tx,
            overflowed: Arc::new(AtomicBool::new(false)),
            cancel,
        };
        (queue, rx)
    }

    /// Enqueues an event. Never blocks; callable from any thread.
    ///
    /// A full queue marks the overflow and cancels the session. A closed
    /// queue means the session is already tearing down and the event is
    /// dropped silently.
    pub fn push(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                error!(?event, "event queue is full, cancelling the session");
                self.overflowed.store(true, Ordering::Release);
                self.cancel.cancel();
            }
            Err(TrySendError::Closed(event)) => {
                debug!(?event, "event queue closed, dropping event");
            }
        }
    }

    /// Whether an enqueue ever hit a full queue.
    #[must_use]
    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let token = CancellationToken::new();
        let (queue, mut rx) = EventQueue::new(8, token);
        queue.push(SessionEvent::Tick);
        queue.push(SessionEvent::TransportDown);
        assert!(matches!(rx.recv().await, Some(SessionEvent::Tick)));
        assert!(matches!(rx.recv().await, Some(SessionEvent::TransportDown)));
    }

    #[tokio::test]
    async fn overflow_cancels_the_session() {
        let token = CancellationToken::new();
        let (queue, _rx) = EventQueue::new(2, token.clone());
        queue.push(SessionEvent::Tick);
        queue.push(SessionEvent::Tick);
        assert!(!queue.overflowed());
        queue.push(SessionEvent::Tick);
        assert!(queue.overflowed());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn push_after_close_is_silent() {
        let token = CancellationToken::new();
        let (queue, rx) = EventQueue::new(2, token.clone());
        drop(rx);
        queue.push(SessionEvent::Stop);
        assert!(!queue.overflowed());
        assert!(!token.is_cancelled());
    }
}
