//! In-memory transport.
//!
//! [`pair`] returns the two socket halves a connection task runs over plus a
//! [`MemoryPeer`] playing the client. Used by tests and benchmarks to drive
//! the hub without a network.

use agora_protocol::{codec, Envelope};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameStream, TransportError, WireFrame};

/// Inbound half: frames sent by the peer.
#[derive(Debug)]
pub struct MemoryStream {
    rx: mpsc::UnboundedReceiver<WireFrame>,
}

/// Outbound half: frames delivered to the peer.
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<WireFrame>>,
}

/// The client end of an in-memory socket.
#[derive(Debug)]
pub struct MemoryPeer {
    to_server: Option<mpsc::UnboundedSender<WireFrame>>,
    from_server: mpsc::UnboundedReceiver<WireFrame>,
}

/// Create an in-memory socket.
#[must_use]
pub fn pair() -> (MemoryStream, MemorySink, MemoryPeer) {
    let (to_server, server_rx) = mpsc::unbounded_channel();
    let (server_tx, from_server) = mpsc::unbounded_channel();
    (
        MemoryStream { rx: server_rx },
        MemorySink {
            tx: Some(server_tx),
        },
        MemoryPeer {
            to_server: Some(to_server),
            from_server,
        },
    )
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn next_frame(&mut self) -> Option<Result<WireFrame, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

impl MemoryPeer {
    /// Send a raw frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone or the peer has closed.
    pub fn send_frame(&self, frame: WireFrame) -> Result<(), TransportError> {
        let tx = self
            .to_server
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame).map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a client envelope with the given `type` and `content`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone.
    pub fn send_envelope(&self, kind: &str, content: &str) -> Result<(), TransportError> {
        let text = serde_json::json!({ "type": kind, "content": content }).to_string();
        self.send_frame(WireFrame::Text(text))
    }

    /// Receive the next frame from the server.
    pub async fn recv(&mut self) -> Option<WireFrame> {
        self.from_server.recv().await
    }

    /// Receive the next envelope, skipping pings.
    ///
    /// Returns `None` on close, on a non-envelope frame, or once the server
    /// side is gone.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.recv().await? {
                WireFrame::Text(text) => return codec::decode(&text).ok(),
                WireFrame::Ping(_) | WireFrame::Pong(_) => continue,
                WireFrame::Binary(_) | WireFrame::Close(_) => return None,
            }
        }
    }

    /// Frames already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_server.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Stop sending; the server sees the stream end.
    pub fn hang_up(&mut self) {
        self.to_server = None;
    }
}
