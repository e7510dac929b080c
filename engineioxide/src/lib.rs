//! A transport-agnostic Engine.IO server core.
//!
//! This crate implements the wire protocol, per-session state machine and
//! HTTP dispatcher of Engine.IO: the packet/payload codec, the
//! polling/websocket transport duality (including the in-place upgrade
//! handshake between them), and a concurrent session [`Registry`]. It does
//! not interpret the bytes exchanged over a session -- that is left to
//! whatever [`EngineIoHandler`] the embedding application provides -- and it
//! does not itself bind a socket: [`EngineIoService`] is a [`tower::Service`]
//! meant to be mounted into a host HTTP stack (axum, warp, bare hyper).
//!
//! ```ignore
//! let engine = EngineIo::new(MyHandler, EngineIoConfig::default());
//! let svc = EngineIoService::new(engine, fallback_service);
//! ```

mod body;
mod config;
mod engine;
mod errors;
mod futures;
mod handler;
mod packet;
mod registry;
mod service;
mod sid;
mod socket;
mod transport;

pub use body::ResponseBody;
pub use config::{EngineIoConfig, EngineIoConfigBuilder};
pub use engine::EngineIo;
pub use errors::{DisconnectReason, Error, ErrorBody};
pub use handler::EngineIoHandler;
pub use packet::TransportType;
pub use registry::Registry;
pub use service::EngineIoService;
pub use sid::Sid;
pub use socket::{Socket, SocketReq};
