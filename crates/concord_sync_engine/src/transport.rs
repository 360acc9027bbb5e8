//! Transport abstraction for sync messages.

use crate::error::{SyncError, SyncResult};
use concord_sync_protocol::{MessageType, SyncMessage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A sync transport carries protocol messages to the server.
///
/// Delivery is assumed to be at-least-once. The engine relies on operation
/// ids to make duplicates harmless.
pub trait SyncTransport: Send + Sync + 'static {
    /// Sends a message without waiting for an answer.
    fn send(&self, message: SyncMessage) -> SyncResult<()>;

    /// Sends a request and waits for its response.
    ///
    /// Implementations should give up after `timeout`. The engine also
    /// enforces the timeout on its side.
    fn send_with_response(
        &self,
        message: SyncMessage,
        timeout: Duration,
    ) -> impl Future<Output = SyncResult<SyncMessage>> + Send;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;
}

type Responder = Box<dyn Fn(&SyncMessage) -> SyncResult<SyncMessage> + Send + Sync>;

/// A mock transport for testing.
///
/// Requests are answered from a script of queued results first, then by
/// the responder, if any. Every message is recorded.
pub struct MockTransport {
    connected: AtomicBool,
    script: Mutex<VecDeque<SyncResult<SyncMessage>>>,
    responder: Mutex<Option<Responder>>,
    sent: Mutex<Vec<SyncMessage>>,
}

impl MockTransport {
    /// Creates a connected mock transport with an empty script.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            responder: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queues the result of the next unanswered request.
    pub fn push_response(&self, response: SyncResult<SyncMessage>) {
        self.script.lock().push_back(response);
    }

    /// Answers requests the script does not cover.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&SyncMessage) -> SyncResult<SyncMessage> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// All messages sent so far.
    pub fn sent(&self) -> Vec<SyncMessage> {
        self.sent.lock().clone()
    }

    /// Sent messages of one type.
    pub fn sent_of(&self, message_type: MessageType) -> Vec<SyncMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.message_type() == message_type)
            .cloned()
            .collect()
    }

    fn answer(&self, message: &SyncMessage) -> SyncResult<SyncMessage> {
        if !self.is_connected() {
            return Err(SyncError::network("not connected"));
        }
        self.sent.lock().push(message.clone());
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        match self.responder.lock().as_ref() {
            Some(responder) => responder(message),
            None => Err(SyncError::Protocol(format!(
                "no mock response for {:?}",
                message.message_type()
            ))),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MockTransport {
    fn send(&self, message: SyncMessage) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::network("not connected"));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    async fn send_with_response(&self, message: SyncMessage, _timeout: Duration) -> SyncResult<SyncMessage> {
        self.answer(&message)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
