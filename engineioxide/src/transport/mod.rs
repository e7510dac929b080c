//! Per-session transport state: the `in`/`out` packet queues and the two
//! concrete carriers that fill them (polling, ws).

pub mod polling;
pub mod ws;

use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};

use crate::errors::Error;
use crate::packet::{Packet, TransportType};

/// Capacity of the broadcast channel backing a transport's `in` queue.
///
/// Only ever consumed by a single long-lived receiver owned by the brain
/// task; it exists as a `broadcast` channel rather than a plain `mpsc` one
/// specifically so the *sender* can be shared across an upgrade (see
/// [`TransportState::upgrade_from`]) without losing or duplicating packets
/// in flight. Queues here are meant to be unbounded in spirit -- no packet
/// should ever be dropped for a session in good standing -- so this number
/// is a host-tunable backstop against a brain that genuinely stalls, not a
/// real capacity limit; the brain's loop body never performs I/O, so it is
/// never slow in practice. A receiver that falls behind this far is torn
/// down rather than resumed with a gap in its stream.
const IN_QUEUE_CAPACITY: usize = 4096;

/// One side of a session's current carrier.
///
/// `in` (client -> server) is a broadcast channel so its sending half can be
/// reused, unmodified, by the transport that replaces this one on upgrade;
/// `out` (server -> client) is a plain unbounded mpsc queue that is always
/// fresh per transport, since only the current transport's serving task
/// should ever drain it.
pub struct TransportState {
    pub kind: TransportType,
    in_tx: broadcast::Sender<Packet>,
    out_tx: mpsc::UnboundedSender<Packet>,
    out_rx: AsyncMutex<mpsc::UnboundedReceiver<Packet>>,
}

impl TransportState {
    /// Build the initial (polling) transport for a freshly created session,
    /// returning the receiver the brain task will own for the rest of the
    /// session's lifetime.
    pub(crate) fn new_session() -> (Self, broadcast::Receiver<Packet>) {
        let (in_tx, in_rx) = broadcast::channel(IN_QUEUE_CAPACITY);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            TransportState {
                kind: TransportType::Polling,
                in_tx,
                out_tx,
                out_rx: AsyncMutex::new(out_rx),
            },
            in_rx,
        )
    }

    /// Build the websocket transport that replaces a polling one on upgrade.
    ///
    /// `in_tx` is cloned, not re-subscribed: the new transport's `in` queue
    /// is the *same* broadcast channel as the old one's, so any packet a
    /// concurrent polling `POST` is still mid-write on lands on the
    /// identical stream the brain's receiver is already reading, with no
    /// drain-and-splice step needed. `out` is fresh.
    pub(crate) fn upgrade_from(current: &TransportState) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        TransportState {
            kind: TransportType::Websocket,
            in_tx: current.in_tx.clone(),
            out_tx,
            out_rx: AsyncMutex::new(out_rx),
        }
    }

    /// Append a client->server packet (polling `POST`, ws reader loop).
    pub fn push_in(&self, packet: Packet) {
        // No live receiver is only possible in the gap between a session's
        // teardown and its removal from the registry; the packet is dropped
        // there.
        let _ = self.in_tx.send(packet);
    }

    /// Queue a server->client packet for delivery on this transport.
    pub fn push_out(&self, packet: Packet) -> Result<(), Error> {
        self.out_tx.send(packet).map_err(|_| Error::TransportMismatch)
    }

    /// Block for at least one packet, matching `GET` semantics.
    pub async fn recv_out(&self) -> Option<Packet> {
        self.out_rx.lock().await.recv().await
    }

    /// Drain whatever is immediately available without blocking.
    pub fn try_recv_out(&self) -> Option<Packet> {
        self.out_rx.try_lock().ok()?.try_recv().ok()
    }
}
