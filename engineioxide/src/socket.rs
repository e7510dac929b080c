//! Per-session state and the brain task that shuttles packets between a
//! transport and the application-visible message channels.

use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::request::Parts;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, MutexGuard};

use crate::errors::DisconnectReason;
use crate::packet::Packet;
use crate::registry::Registry;
use crate::sid::Sid;
use crate::transport::TransportState;

/// Request metadata captured at session-open time, kept around for the
/// lifetime of the session so an application handler can inspect the
/// headers/query the client opened with.
#[derive(Debug, Clone)]
pub struct SocketReq {
    pub method: http::Method,
    pub uri: http::Uri,
    pub headers: http::HeaderMap,
}

impl From<Parts> for SocketReq {
    fn from(parts: Parts) -> Self {
        SocketReq {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
        }
    }
}

/// One Engine.IO session.
///
/// Identity and ordering are by [`Socket::id`]. `transport` is replaced
/// atomically on upgrade; `incoming`/`outgoing` are the application-visible
/// channels and are untouched by the swap.
pub struct Socket<Data> {
    pub id: Sid,
    pub req: SocketReq,
    pub data: Data,
    transport: ArcSwap<TransportState>,
    incoming_rx: AsyncMutex<mpsc::UnboundedReceiver<Bytes>>,
    outgoing_tx: mpsc::UnboundedSender<Bytes>,
    /// Held by whichever polling `GET` is currently in flight, so a second
    /// concurrent `GET` can be detected and rejected.
    polling_guard: AsyncMutex<()>,
}

impl<Data> Socket<Data> {
    /// Build a new session's socket plus the two ends only the brain task
    /// and the dispatcher need: the long-lived `in` receiver the brain owns
    /// for the rest of the session, and the `outgoing` receiver the brain
    /// drains to frame `MESSAGE` packets.
    pub(crate) fn new(
        id: Sid,
        req: SocketReq,
        data: Data,
    ) -> (
        Arc<Self>,
        mpsc::UnboundedSender<Bytes>,
        broadcast::Receiver<Packet>,
        mpsc::UnboundedReceiver<Bytes>,
    ) {
        let (transport, in_rx) = TransportState::new_session();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let socket = Arc::new(Socket {
            id,
            req,
            data,
            transport: ArcSwap::from_pointee(transport),
            incoming_rx: AsyncMutex::new(incoming_rx),
            outgoing_tx,
            polling_guard: AsyncMutex::new(()),
        });
        // `incoming_tx` is intentionally not stored on `Socket`: the caller
        // hands it to the brain task, so dropping it on brain exit closes
        // the channel and lets `dequeue_message` return `None` instead of
        // hanging forever after teardown.
        (socket, incoming_tx, in_rx, outgoing_rx)
    }

    pub fn is_polling(&self) -> bool {
        self.transport.load().kind == crate::packet::TransportType::Polling
    }

    pub fn is_websocket(&self) -> bool {
        self.transport.load().kind == crate::packet::TransportType::Websocket
    }

    pub(crate) fn current_transport(&self) -> Arc<TransportState> {
        self.transport.load_full()
    }

    pub(crate) fn swap_transport(&self, new: TransportState) {
        self.transport.store(Arc::new(new));
    }

    pub(crate) fn try_lock_polling(&self) -> Option<MutexGuard<'_, ()>> {
        self.polling_guard.try_lock().ok()
    }

    /// Blocks until an inbound application message is available, or returns
    /// `None` once the session has been torn down.
    pub async fn dequeue_message(&self) -> Option<Bytes> {
        self.incoming_rx.lock().await.recv().await
    }

    /// Non-blocking; framed as a `MESSAGE` packet by the brain and placed on
    /// the then-current transport's `out` queue.
    pub fn enqueue_message(&self, data: impl Into<Bytes>) {
        let _ = self.outgoing_tx.send(data.into());
    }
}

/// The per-session brain task.
///
/// A cooperative loop that, in a single `select`, either demultiplexes the
/// current transport's `in` queue (enqueueing `MESSAGE`s onto
/// `socket.incoming`, answering `PING` with `PONG`, tearing down on `CLOSE`,
/// discarding anything else) or frames a pending outgoing application byte
/// string as a `MESSAGE` packet on the current transport's `out` queue.
///
/// `in_rx` is a single long-lived broadcast receiver established once at
/// session creation: because the websocket transport that eventually
/// replaces the polling one shares the *same* sender (see
/// [`TransportState::upgrade_from`]), this one receiver transparently
/// survives the upgrade with no re-subscription and no drain step. `out`,
/// in contrast, genuinely changes identity across an upgrade, so it is
/// re-read fresh immediately before each `push_out` rather than captured
/// once per iteration -- an `enqueue_message` that resolves just as an
/// upgrade commits must land on the transport that is current at that
/// instant, not whichever one was current when the iteration began.
pub(crate) async fn brain_loop<Data: Send + Sync + 'static>(
    socket: Arc<Socket<Data>>,
    registry: Arc<Registry<Data>>,
    incoming_tx: mpsc::UnboundedSender<Bytes>,
    mut in_rx: broadcast::Receiver<Packet>,
    mut outgoing_rx: mpsc::UnboundedReceiver<Bytes>,
) {
    let reason = loop {
        tokio::select! {
            packet = in_rx.recv() => {
                match packet {
                    Ok(Packet::Message(bytes)) => {
                        let _ = incoming_tx.send(bytes);
                    }
                    Ok(Packet::Ping(payload)) => {
                        let _ = socket.current_transport().push_out(Packet::Pong(payload));
                    }
                    Ok(Packet::Close) => break DisconnectReason::ClosePacket,
                    Ok(_) => { /* forward-compatible: discard other types */ }
                    // The `in` queue's broadcast capacity is a bounded, host-tunable
                    // stand-in for a logically unbounded queue (see `IN_QUEUE_CAPACITY`);
                    // once the brain has fallen behind enough to lag, packets are
                    // already gone, so the session is torn down rather than resuming
                    // silently on a stream with a hole in it.
                    Err(broadcast::error::RecvError::Lagged(_)) => break DisconnectReason::TransportClose,
                    Err(broadcast::error::RecvError::Closed) => break DisconnectReason::TransportClose,
                }
            }
            bytes = outgoing_rx.recv() => {
                match bytes {
                    Some(bytes) => {
                        let _ = socket.current_transport().push_out(Packet::Message(bytes));
                    }
                    None => break DisconnectReason::TransportClose,
                }
            }
        }
    };

    registry.remove(&socket.id);
    #[cfg(feature = "tracing")]
    tracing::debug!(sid = %socket.id, ?reason, "session closed");
    #[cfg(not(feature = "tracing"))]
    let _ = reason;
    // Dropping `incoming_tx` here closes the incoming channel, so any
    // application task still awaiting `dequeue_message` observes `None`
    // and can exit.
}
