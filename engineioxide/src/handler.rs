//! The application-facing hook.

use std::sync::Arc;

use crate::socket::Socket;

/// Implemented by the application embedding this core.
///
/// The core's only obligation to the application is to hand it a freshly
/// published [`Socket`] once per session, in its own task, as soon as
/// possible after the session is inserted into the registry. Everything
/// else -- reading messages, replying, deciding when the session is done --
/// happens through [`Socket::dequeue_message`] and [`Socket::enqueue_message`]
/// inside that task; this layer does not interpret the message payloads it
/// ferries.
#[async_trait::async_trait]
pub trait EngineIoHandler: Send + Sync + 'static {
    /// Per-session application state threaded through [`Socket::data`].
    type Data: Send + Sync + Default + 'static;

    /// Spawned in its own task, independent of the HTTP request that opened
    /// the session; its lifetime is the session's.
    async fn handle(&self, socket: Arc<Socket<Self::Data>>);
}
