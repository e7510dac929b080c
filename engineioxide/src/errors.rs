//! Error taxonomy and its HTTP surface.

use serde::Serialize;
use thiserror::Error;

use crate::packet::Packet;
use crate::sid::Sid;

/// Errors produced by the dispatcher, the polling handler and the codec.
///
/// Only [`Error::TransportUnknown`], [`Error::UnknownSessionId`] and
/// [`Error::BadRequest`] (plus the codec/body failures that collapse into
/// `BadRequest`) are ever turned into an HTTP response body. The rest drive
/// session teardown or are internal control flow for the upgrade handshake
/// and never reach an HTTP client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport unknown")]
    TransportUnknown,
    #[error("session id unknown: {0:?}")]
    UnknownSessionId(Sid),
    #[error("bad request")]
    BadRequest,
    #[error("payload exceeds the configured maximum")]
    PayloadTooLarge,
    #[error("transport mismatch for this session")]
    TransportMismatch,
    #[error("unexpected packet: {0:?}")]
    BadPacket(Packet),
    #[error("websocket upgrade handshake failed")]
    UpgradeError,
    #[error("http error: {0}")]
    Http(#[from] http::Error),
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The `{"code": ..., "message": ...}` body of an error response.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ErrorBody {
    pub code: u8,
    pub message: &'static str,
}

impl Error {
    /// `None` for errors that never reach the HTTP boundary.
    pub fn response_body(&self) -> Option<ErrorBody> {
        match self {
            Error::TransportUnknown => Some(ErrorBody {
                code: 0,
                message: "Transport unknown",
            }),
            Error::UnknownSessionId(_) => Some(ErrorBody {
                code: 1,
                message: "Session ID unknown",
            }),
            Error::BadRequest
            | Error::PayloadTooLarge
            | Error::TransportMismatch
            | Error::BadPacket(_) => Some(ErrorBody {
                code: 3,
                message: "Bad request",
            }),
            Error::UpgradeError | Error::Http(_) | Error::Ws(_) => None,
        }
    }
}

/// Why a session was torn down. Logged, never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// A `CLOSE` packet was consumed by the brain.
    ClosePacket,
    /// The owning HTTP/WS task observed a fatal transport error.
    TransportClose,
    /// A `POST` body or WebSocket frame failed to parse as a packet.
    PacketParsingError,
    /// A second polling `GET` arrived while one was already in flight.
    MultipleHttpPollingError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surfaced_errors_map_to_expected_codes() {
        assert_eq!(Error::TransportUnknown.response_body().unwrap().code, 0);
        assert_eq!(
            Error::UnknownSessionId(Sid::new())
                .response_body()
                .unwrap()
                .code,
            1
        );
        assert_eq!(Error::BadRequest.response_body().unwrap().code, 3);
    }

    #[test]
    fn upgrade_error_is_not_http_surfaced() {
        assert!(Error::UpgradeError.response_body().is_none());
    }
}
