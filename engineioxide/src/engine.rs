//! The process-wide Engine.IO instance tying the registry, configuration
//! and application handler together.

use std::sync::Arc;

use crate::config::EngineIoConfig;
use crate::errors::DisconnectReason;
use crate::handler::EngineIoHandler;
use crate::packet::Packet;
use crate::registry::Registry;
use crate::sid::Sid;
use crate::socket::{brain_loop, Socket, SocketReq};

/// Owns the [`Registry`] and the application [`EngineIoHandler`]; shared
/// behind an `Arc` between the dispatcher and every session's tasks.
pub struct EngineIo<H: EngineIoHandler> {
    pub config: EngineIoConfig,
    pub handler: Arc<H>,
    registry: Arc<Registry<H::Data>>,
}

impl<H: EngineIoHandler> EngineIo<H> {
    pub fn new(handler: H, config: EngineIoConfig) -> Arc<Self> {
        Arc::new(EngineIo {
            config,
            handler: Arc::new(handler),
            registry: Arc::new(Registry::new()),
        })
    }

    pub fn get_socket(&self, sid: &Sid) -> Option<Arc<Socket<H::Data>>> {
        self.registry.get(sid)
    }

    /// Enumerate all currently open sessions.
    pub fn sockets(&self) -> Vec<Arc<Socket<H::Data>>> {
        self.registry.sockets()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// New-session flow. The socket is published into the registry, and the
    /// brain task and the application's session handler are both spawned,
    /// before the caller (the polling `open_req` handler) ever writes an
    /// HTTP response.
    pub(crate) fn create_session(self: &Arc<Self>, req: SocketReq) -> Arc<Socket<H::Data>> {
        let id = Sid::new();
        let (socket, incoming_tx, in_rx, outgoing_rx) =
            Socket::new(id, req, H::Data::default());

        self.registry.insert(socket.clone());

        tokio::spawn(brain_loop(
            socket.clone(),
            self.registry.clone(),
            incoming_tx,
            in_rx,
            outgoing_rx,
        ));

        let handler = self.handler.clone();
        let handle_socket = socket.clone();
        tokio::spawn(async move { handler.handle(handle_socket).await });

        socket
    }

    /// Tear down a session from the HTTP side, e.g. a malformed `POST` body
    /// or a doubled-up polling `GET`.
    ///
    /// Removal from the registry happens immediately so no later lookup can
    /// observe this session again. A synthetic `CLOSE` is also pushed onto
    /// the current transport's `in` queue so the brain task notices on its
    /// next turn and exits -- the same technique the upgrade handler uses to
    /// shut down the brain on a websocket disconnect.
    pub(crate) fn close_session(&self, sid: &Sid, _reason: DisconnectReason) {
        #[cfg(feature = "tracing")]
        tracing::debug!(%sid, reason = ?_reason, "closing session");
        if let Some(socket) = self.registry.get(sid) {
            self.registry.remove(sid);
            socket.current_transport().push_in(Packet::Close);
        }
    }
}
