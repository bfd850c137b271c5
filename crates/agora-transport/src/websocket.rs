//! WebSocket transport implementation.
//!
//! Adapts the halves of an upgraded axum [`WebSocket`] to the frame traits.

use agora_protocol::CloseReason;
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;

use crate::traits::{FrameSink, FrameStream, TransportError, WireFrame};

/// Outbound half of an upgraded socket.
pub type WebSocketSink = SplitSink<WebSocket, Message>;

/// Inbound half of an upgraded socket.
pub type WebSocketStream = SplitStream<WebSocket>;

/// Split an upgraded socket into its inbound and outbound halves.
#[must_use]
pub fn split(socket: WebSocket) -> (WebSocketStream, WebSocketSink) {
    let (sink, stream) = socket.split();
    (stream, sink)
}

impl From<Message> for WireFrame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => WireFrame::Text(text),
            Message::Binary(data) => WireFrame::Binary(data),
            Message::Ping(data) => WireFrame::Ping(data),
            Message::Pong(data) => WireFrame::Pong(data),
            Message::Close(frame) => {
                WireFrame::Close(frame.map(|f| CloseReason::new(f.code, f.reason.into_owned())))
            }
        }
    }
}

impl From<WireFrame> for Message {
    fn from(frame: WireFrame) -> Self {
        match frame {
            WireFrame::Text(text) => Message::Text(text),
            WireFrame::Binary(data) => Message::Binary(data),
            WireFrame::Ping(data) => Message::Ping(data),
            WireFrame::Pong(data) => Message::Pong(data),
            WireFrame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: r.code,
                reason: Cow::Owned(r.reason),
            })),
        }
    }
}

#[async_trait]
impl FrameStream for WebSocketStream {
    async fn next_frame(&mut self) -> Option<Result<WireFrame, TransportError>> {
        match self.next().await? {
            Ok(message) => Some(Ok(message.into())),
            Err(e) => Some(Err(TransportError::ReceiveFailed(e.to_string()))),
        }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        self.send(Message::from(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        SinkExt::close(self)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_frame_conversion() {
        let message: Message = WireFrame::Close(Some(CloseReason::name_taken())).into();
        match message {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1008);
                assert!(!frame.reason.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }

        let back: WireFrame = Message::Close(None).into();
        assert_eq!(back, WireFrame::Close(None));
    }

    #[test]
    fn test_data_frame_conversion() {
        let frame: WireFrame = Message::Text("hi".into()).into();
        assert_eq!(frame, WireFrame::Text("hi".into()));

        let message: Message = WireFrame::Ping(Vec::new()).into();
        assert!(matches!(message, Message::Ping(ref d) if d.is_empty()));
    }
}
