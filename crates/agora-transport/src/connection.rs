//! Per-connection reader and writer tasks.
//!
//! A connection is served by two tasks. The reader decodes inbound frames,
//! answers control messages on the connection's own queue and submits chat to
//! the hub. The writer drains the outbound queue to the socket and sends
//! keepalive pings. The hub holds the only strong sender for the queue, so a
//! closed queue is the writer's signal to say goodbye.

use agora_core::{
    outbound_queue, Admission, AdmitOutcome, ConnectionId, HubHandle, Outbound, OutboundReceiver,
    Rejection, ValidationError, Validator,
};
use agora_protocol::{codec, CloseReason, Envelope, InboundEnvelope, MessageKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::WeakSender;
use tokio::sync::oneshot;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::traits::{FrameSink, FrameStream, TransportError, WireFrame};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_size: usize,
    /// Capacity of the outbound queue.
    pub outbound_capacity: usize,
    /// Drop the peer if no pong arrives within this window.
    pub read_timeout: Duration,
    /// Interval between keepalive pings. Must be shorter than `read_timeout`.
    pub ping_interval: Duration,
    /// Deadline for a single write.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: agora_protocol::MAX_FRAME_SIZE,
            outbound_capacity: 256,
            read_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// How a served connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The display name failed validation; the socket was closed.
    InvalidName(ValidationError),
    /// The hub refused the connection.
    Rejected(Rejection),
    /// The connection was a member and has now departed.
    Closed,
    /// The hub was not running.
    HubUnavailable,
}

/// Serve one upgraded socket until it closes.
///
/// Sanitizes the requested display name, asks the hub for admission, then
/// runs the writer on its own task and the reader on the current one.
pub async fn serve<R, W>(
    stream: R,
    mut sink: W,
    raw_name: String,
    hub: HubHandle,
    validator: Arc<dyn Validator>,
    config: ConnectionConfig,
) -> ConnectionOutcome
where
    R: FrameStream + 'static,
    W: FrameSink + 'static,
{
    let name = match validator.validate_display_name(&raw_name) {
        Ok(name) => name,
        Err(e) => {
            warn!(error = %e, "Invalid display name");
            let close = WireFrame::Close(Some(CloseReason::policy(e.to_string())));
            if sink.send_frame(close).await.is_ok() {
                let _ = sink.shutdown().await;
            }
            return ConnectionOutcome::InvalidName(e);
        }
    };

    let id = ConnectionId::generate();
    let (outbound, queue) = outbound_queue(config.outbound_capacity);
    let replies = outbound.downgrade();
    let (writer_done_tx, writer_done) = oneshot::channel();

    let writer = Writer {
        id: id.clone(),
        sink,
        queue,
        config: config.clone(),
        _done: writer_done_tx,
    };
    let writer_task = tokio::spawn(writer.run());

    let outcome = match hub
        .admit(Admission::new(id.clone(), name.clone(), outbound))
        .await
    {
        Ok(AdmitOutcome::Admitted) => {
            let reader = Reader {
                id,
                name,
                stream,
                hub,
                replies,
                validator,
                config,
                writer_done,
            };
            reader.run().await;
            ConnectionOutcome::Closed
        }
        Ok(AdmitOutcome::Rejected(rejection)) => {
            info!(connection = %id, name = %name, reason = %rejection, "Connection rejected");
            ConnectionOutcome::Rejected(rejection)
        }
        Err(e) => {
            warn!(connection = %id, error = %e, "Hub unavailable");
            ConnectionOutcome::HubUnavailable
        }
    };

    if let Err(e) = writer_task.await {
        warn!(error = %e, "Writer task failed");
    }
    outcome
}

/// Inbound side of a connection.
struct Reader<R> {
    id: ConnectionId,
    name: String,
    stream: R,
    hub: HubHandle,
    /// Weak so the hub's sender stays the one that decides when the queue closes.
    replies: WeakSender<Outbound>,
    validator: Arc<dyn Validator>,
    config: ConnectionConfig,
    writer_done: oneshot::Receiver<()>,
}

impl<R: FrameStream> Reader<R> {
    async fn run(mut self) {
        match self.read_loop().await {
            Ok(()) => debug!(connection = %self.id, "Peer closed"),
            Err(e) => warn!(connection = %self.id, error = %e, "Reader stopped"),
        }

        if let Err(e) = self.hub.depart(self.id.clone()).await {
            warn!(connection = %self.id, error = %e, "Depart not delivered");
        }
    }

    async fn read_loop(&mut self) -> Result<(), TransportError> {
        let mut deadline = Instant::now() + self.config.read_timeout;

        loop {
            let next = tokio::select! {
                _ = &mut self.writer_done => return Err(TransportError::ConnectionClosed),
                next = timeout_at(deadline, self.stream.next_frame()) => next,
            };

            let frame = match next {
                Err(_) => return Err(TransportError::Timeout),
                Ok(None) => return Ok(()),
                Ok(Some(frame)) => frame?,
            };

            match frame {
                WireFrame::Text(text) => {
                    let inbound = codec::decode_inbound(&text, self.config.max_frame_size)?;
                    self.dispatch(inbound).await?;
                }
                WireFrame::Binary(data) => {
                    let inbound =
                        codec::decode_inbound_bytes(&data, self.config.max_frame_size)?;
                    self.dispatch(inbound).await?;
                }
                WireFrame::Pong(_) => {
                    trace!(connection = %self.id, "Pong received");
                    deadline = Instant::now() + self.config.read_timeout;
                }
                WireFrame::Ping(_) => {
                    // Answered by the socket layer.
                }
                WireFrame::Close(reason) => {
                    debug!(connection = %self.id, ?reason, "Received close frame");
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch(&mut self, inbound: InboundEnvelope) -> Result<(), TransportError> {
        let InboundEnvelope {
            kind: raw_kind,
            content: raw_content,
        } = inbound;
        let kind = MessageKind::parse(&raw_kind);

        let content = if kind.is_some_and(MessageKind::is_liveness) {
            raw_content
        } else {
            match self.validator.validate_content(&raw_content) {
                Ok(clean) => clean,
                Err(e) => {
                    debug!(connection = %self.id, error = %e, "Invalid message content");
                    return self.reply(Envelope::server_error(format!("Invalid message: {e}")));
                }
            }
        };

        match kind {
            Some(MessageKind::Chat) => {
                debug!(connection = %self.id, name = %self.name, "Chat message");
                let envelope = Envelope::chat(content, self.name.as_str(), self.id.as_str());
                self.hub.broadcast(envelope).await?;
                Ok(())
            }
            Some(MessageKind::Ping) => {
                trace!(connection = %self.id, "Ping received");
                self.reply(Envelope::pong())
            }
            Some(MessageKind::Echo) => self.reply(Envelope::echo(&content)),
            _ => {
                debug!(connection = %self.id, kind = %raw_kind, "Unknown message type");
                self.reply(Envelope::server_error(format!(
                    "Unknown message type: {raw_kind}"
                )))
            }
        }
    }

    /// Queue an envelope for this connection only.
    fn reply(&self, envelope: Envelope) -> Result<(), TransportError> {
        let queue = self
            .replies
            .upgrade()
            .ok_or(TransportError::ConnectionClosed)?;
        match queue.try_send(envelope.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(TransportError::ConnectionClosed),
        }
    }
}

/// Outbound side of a connection.
struct Writer<W> {
    id: ConnectionId,
    sink: W,
    queue: OutboundReceiver,
    config: ConnectionConfig,
    /// Dropped when the writer ends, which stops the reader.
    _done: oneshot::Sender<()>,
}

impl<W: FrameSink> Writer<W> {
    async fn run(mut self) {
        match self.write_loop().await {
            Ok(()) => debug!(connection = %self.id, "Writer finished"),
            Err(e) => warn!(connection = %self.id, error = %e, "Writer stopped"),
        }
    }

    async fn write_loop(&mut self) -> Result<(), TransportError> {
        let period = self.config.ping_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                item = self.queue.recv() => match item {
                    Some(Outbound::Envelope(envelope)) => {
                        let text = codec::encode(&envelope)?;
                        self.write(WireFrame::Text(text)).await?;
                    }
                    Some(Outbound::Close(reason)) => {
                        self.write(WireFrame::Close(Some(reason))).await?;
                        return self.finish().await;
                    }
                    None => {
                        self.write(WireFrame::Close(None)).await?;
                        return self.finish().await;
                    }
                },
                _ = keepalive.tick() => {
                    trace!(connection = %self.id, "Sending keepalive ping");
                    self.write(WireFrame::Ping(Vec::new())).await?;
                }
            }
        }
    }

    async fn write(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        timeout(self.config.write_timeout, self.sink.send_frame(frame))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        timeout(self.config.write_timeout, self.sink.shutdown())
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}
