//! Small response-building helpers shared by the polling and upgrade
//! handlers.

use bytes::Bytes;
use http::{Response, StatusCode};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::body::ResponseBody;
use crate::errors::Error;

/// Build a single-chunk HTTP response; every polling/error response is one
/// buffered body, never streamed.
pub fn http_response<B>(
    status: StatusCode,
    content_type: &'static str,
    data: impl Into<Bytes>,
) -> Result<Response<ResponseBody<B>>, Error> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(ResponseBody::new(data))
        .map_err(Error::Http)
}

/// The `{"code": ..., "message": ...}` JSON error body.
pub fn error_response<B>(err: &Error) -> Response<ResponseBody<B>> {
    let body = err.response_body().unwrap_or(crate::errors::ErrorBody {
        code: 3,
        message: "Bad request",
    });
    let json = serde_json::to_vec(&body).unwrap_or_default();
    http_response(StatusCode::BAD_REQUEST, "application/json", json).unwrap_or_else(|_| {
        // `Response::builder` only fails on an invalid header value, which
        // cannot happen with the fixed content type above.
        Response::new(ResponseBody::empty())
    })
}

/// Build the `101 Switching Protocols` handshake response for a websocket
/// upgrade, handing the connection off to the host's WebSocket server.
pub fn ws_response<B>(ws_key: &http::HeaderValue) -> Result<Response<ResponseBody<B>>, Error> {
    let accept = derive_accept_key(ws_key.as_bytes());
    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(http::header::CONNECTION, "Upgrade")
        .header(http::header::UPGRADE, "websocket")
        .header("Sec-WebSocket-Accept", accept)
        .body(ResponseBody::empty())
        .map_err(Error::Http)
}
