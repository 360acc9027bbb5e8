//! Byte-channel transport.
//!
//! [`FramedTransport`] turns any request/response byte channel
//! (WebSocket, HTTP, in-process loopback) into a [`SyncTransport`] by
//! exchanging CBOR frames.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use concord_sync_protocol::{decode_frame, encode_frame, SyncMessage};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A channel that carries opaque frames.
pub trait MessageChannel: Send + Sync + 'static {
    /// Sends a frame and waits for the answering frame.
    fn request(&self, frame: Vec<u8>) -> impl Future<Output = Result<Vec<u8>, String>> + Send;

    /// Sends a frame without waiting.
    fn post(&self, frame: Vec<u8>) -> Result<(), String>;

    /// Checks if the channel is usable.
    fn is_open(&self) -> bool;
}

/// CBOR-framed transport over a [`MessageChannel`].
pub struct FramedTransport<C: MessageChannel> {
    channel: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: MessageChannel> FramedTransport<C> {
    /// Creates a new framed transport.
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Returns the last channel error.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Marks the transport closed.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Marks the transport usable again.
    pub fn reopen(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn channel_failed(&self, error: String) -> SyncError {
        *self.last_error.write() = Some(error.clone());
        SyncError::network(error)
    }
}

impl<C: MessageChannel> SyncTransport for FramedTransport<C> {
    fn send(&self, message: SyncMessage) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::network("not connected"));
        }
        let frame = encode_frame(&message)?;
        self.channel.post(frame).map_err(|e| self.channel_failed(e))
    }

    async fn send_with_response(&self, message: SyncMessage, timeout: Duration) -> SyncResult<SyncMessage> {
        if !self.is_connected() {
            return Err(SyncError::network("not connected"));
        }
        let frame = encode_frame(&message)?;
        let response = match tokio::time::timeout(timeout, self.channel.request(frame)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(self.channel_failed(e)),
            Err(_) => return Err(SyncError::Timeout),
        };
        *self.last_error.write() = None;
        Ok(decode_frame(&response)?)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.channel.is_open()
    }
}

/// A peer that answers frames in-process.
pub trait LoopbackServer: Send + Sync + 'static {
    /// Handles a frame. `None` means the frame needs no answer.
    fn handle_frame(&self, frame: &[u8]) -> Result<Option<Vec<u8>>, String>;
}

/// A [`MessageChannel`] that hands frames directly to a [`LoopbackServer`].
pub struct LoopbackChannel<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackChannel<S> {
    /// Creates a channel connected to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> MessageChannel for LoopbackChannel<S> {
    async fn request(&self, frame: Vec<u8>) -> Result<Vec<u8>, String> {
        self.server
            .handle_frame(&frame)?
            .ok_or_else(|| "peer sent no response".to_string())
    }

    fn post(&self, frame: Vec<u8>) -> Result<(), String> {
        self.server.handle_frame(&frame).map(|_| ())
    }

    fn is_open(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_ot::{DocumentId, DocumentState, UserId};
    use concord_sync_protocol::{Handshake, HandshakeAck, Leave, PROTOCOL_VERSION};
    use parking_lot::Mutex;

    /// Answers every handshake with a fixed state.
    struct EchoPeer {
        received: Mutex<usize>,
        fail: AtomicBool,
    }

    impl EchoPeer {
        fn new() -> Self {
            Self {
                received: Mutex::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    impl LoopbackServer for EchoPeer {
        fn handle_frame(&self, frame: &[u8]) -> Result<Option<Vec<u8>>, String> {
            if self.fail.load(Ordering::SeqCst) {
                return Err("connection reset".into());
            }
            *self.received.lock() += 1;
            match decode_frame(frame).map_err(|e| e.to_string())? {
                SyncMessage::Handshake(h) => {
                    let ack = SyncMessage::HandshakeAck(HandshakeAck {
                        document_id: h.document_id,
                        protocol_version: PROTOCOL_VERSION,
                        state: DocumentState::text("server"),
                        server_version: 4,
                        acknowledged: Vec::new(),
                    });
                    encode_frame(&ack).map(Some).map_err(|e| e.to_string())
                }
                _ => Ok(None),
            }
        }
    }

    fn handshake() -> SyncMessage {
        SyncMessage::Handshake(Handshake::new(
            DocumentId::new("doc"),
            UserId::new("alice"),
            DocumentState::text("local"),
        ))
    }

    #[tokio::test]
    async fn request_response_over_loopback() {
        let transport = FramedTransport::new(LoopbackChannel::new(EchoPeer::new()));
        let response = transport
            .send_with_response(handshake(), Duration::from_secs(1))
            .await
            .unwrap();
        match response {
            SyncMessage::HandshakeAck(ack) => {
                assert_eq!(ack.server_version, 4);
                assert_eq!(ack.state.content, "server");
            }
            other => panic!("unexpected response: {other:?}"),
        }

        transport
            .send(SyncMessage::Leave(Leave {
                document_id: DocumentId::new("doc"),
                user_id: UserId::new("alice"),
            }))
            .unwrap();
        assert_eq!(*transport.channel().server().received.lock(), 2);
    }

    #[tokio::test]
    async fn channel_failures_are_retryable() {
        let peer = EchoPeer::new();
        peer.fail.store(true, Ordering::SeqCst);
        let transport = FramedTransport::new(LoopbackChannel::new(peer));

        let err = transport
            .send_with_response(handshake(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn closed_transport_refuses() {
        let transport = FramedTransport::new(LoopbackChannel::new(EchoPeer::new()));
        transport.close();
        assert!(!transport.is_connected());
        assert!(transport.send(handshake()).is_err());
        transport.reopen();
        assert!(transport.is_connected());
    }
}
