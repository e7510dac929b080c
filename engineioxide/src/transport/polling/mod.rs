//! The polling transport: new-session open, `GET` drain and `POST` ingest.

use std::sync::Arc;

use http::{Request, Response, StatusCode};
use http_body::Body;

use crate::body::ResponseBody;
use crate::engine::EngineIo;
use crate::errors::{DisconnectReason, Error};
use crate::futures::http_response;
use crate::handler::EngineIoHandler;
use crate::packet::{OpenPacket, Packet};
use crate::sid::Sid;
use crate::socket::SocketReq;

mod payload;
pub use payload::{decode_body, decode_payload, encode_payload};

/// Open a brand-new session.
///
/// Atomically: generate a fresh id, build the socket with a polling
/// transport, publish it into the registry, spawn the brain task and the
/// application's session handler. Then write exactly one payload containing
/// a single `OPEN` packet.
pub fn open_req<H, R, B>(
    engine: &Arc<EngineIo<H>>,
    req: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
    B: Send + 'static,
{
    let socket_req = SocketReq::from(req.into_parts().0);
    let socket = engine.create_session(socket_req);

    let packet = Packet::Open(OpenPacket::new(&socket.id, &engine.config));
    http_response(StatusCode::OK, "application/octet-stream", packet.encode())
}

/// `GET`: drain the current transport's `out` queue into one payload.
///
/// Reads at least one packet (blocking), then whatever else is immediately
/// available, preserving dequeue order.
pub async fn polling_req<H, B>(
    engine: Arc<EngineIo<H>>,
    sid: Sid,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
    B: Send + 'static,
{
    let socket = engine.get_socket(&sid).ok_or(Error::UnknownSessionId(sid))?;
    if !socket.is_polling() {
        return Err(Error::TransportMismatch);
    }

    // If the socket is already being polled, it means a second GET raced the
    // first one; in that case the session is torn down.
    let _guard = match socket.try_lock_polling() {
        Some(guard) => guard,
        None => {
            engine.close_session(&sid, DisconnectReason::MultipleHttpPollingError);
            return Err(Error::TransportMismatch);
        }
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(%sid, "polling request");

    let transport = socket.current_transport();
    let mut packets = match transport.recv_out().await {
        Some(packet) => vec![packet],
        None => return Err(Error::TransportMismatch),
    };
    while let Some(packet) = transport.try_recv_out() {
        packets.push(packet);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(%sid, count = packets.len(), "sending payload");

    http_response(
        StatusCode::OK,
        "application/octet-stream",
        encode_payload(&packets),
    )
}

/// `POST`: parse the body as a payload and append each packet, in order, to
/// the current transport's `in` queue. The brain, not this handler,
/// interprets `PING`/`CLOSE` packets.
pub async fn post_req<H, R, B>(
    engine: Arc<EngineIo<H>>,
    sid: Sid,
    body: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
    R: Body + Send + Unpin + 'static,
    R::Data: Into<bytes::Bytes>,
    B: Send + 'static,
{
    let socket = engine.get_socket(&sid).ok_or(Error::UnknownSessionId(sid))?;
    if !socket.is_polling() {
        return Err(Error::TransportMismatch);
    }

    let (_, body) = body.into_parts();
    let packets = match decode_body(body, engine.config.max_payload).await {
        Ok(packets) => packets,
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(%sid, "error parsing payload");
            engine.close_session(&sid, DisconnectReason::PacketParsingError);
            return Err(e);
        }
    };

    let transport = socket.current_transport();
    for packet in packets {
        transport.push_in(packet);
    }

    http_response(StatusCode::OK, "text/plain", "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineIoConfig;
    use crate::socket::Socket;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl EngineIoHandler for NoopHandler {
        type Data = ();
        async fn handle(&self, _socket: Arc<Socket<()>>) {}
    }

    fn test_engine() -> Arc<EngineIo<NoopHandler>> {
        EngineIo::new(NoopHandler, EngineIoConfig::default())
    }

    fn body_bytes<B>(resp: &Response<ResponseBody<B>>) -> bytes::Bytes {
        match resp.body() {
            ResponseBody::Full(Some(b)) => b.clone(),
            ResponseBody::Full(None) => bytes::Bytes::new(),
            ResponseBody::Inner(_) => panic!("expected a buffered body"),
        }
    }

    fn opened_sid<B>(resp: &Response<ResponseBody<B>>) -> Sid {
        match Packet::decode(body_bytes(resp)).unwrap() {
            Packet::Open(open) => open.sid.parse().unwrap(),
            other => panic!("expected an OPEN packet, got {other:?}"),
        }
    }

    #[test]
    fn open_req_publishes_a_session_and_returns_one_open_packet() {
        let engine = test_engine();
        let resp: Response<ResponseBody<()>> =
            open_req(&engine, Request::new(())).unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_bytes(&resp);
        let packet = Packet::decode(body).unwrap();
        match packet {
            Packet::Open(open) => {
                assert_eq!(open.sid.len(), 20);
                assert!(engine.get_socket(&open.sid.parse().unwrap()).is_some());
            }
            other => panic!("expected an OPEN packet, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn post_then_get_round_trips_a_message_through_the_brain() {
        let engine = test_engine();
        let resp: Response<ResponseBody<()>> =
            open_req(&engine, Request::new(())).unwrap();
        let sid = opened_sid(&resp);

        let payload = encode_payload(&[Packet::Message(bytes::Bytes::from_static(b"hi"))]);
        let post = Request::new(hyper::Body::from(payload));
        let resp: Response<ResponseBody<()>> = post_req(engine.clone(), sid.clone(), post)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let socket = engine.get_socket(&sid).unwrap();
        let msg = socket.dequeue_message().await.unwrap();
        assert_eq!(&msg[..], b"hi");

        socket.enqueue_message(bytes::Bytes::from_static(b"yo"));
        let resp: Response<ResponseBody<()>> = polling_req(engine.clone(), sid).await.unwrap();
        let packets = decode_payload(body_bytes(&resp)).unwrap();
        assert_eq!(packets, vec![Packet::Message(bytes::Bytes::from_static(b"yo"))]);
    }

    #[tokio::test]
    async fn close_packet_makes_the_session_id_unknown_afterwards() {
        let engine = test_engine();
        let resp: Response<ResponseBody<()>> =
            open_req(&engine, Request::new(())).unwrap();
        let sid = opened_sid(&resp);

        let payload = encode_payload(&[Packet::Close]);
        let post = Request::new(hyper::Body::from(payload));
        post_req(engine.clone(), sid.clone(), post).await.unwrap();

        // Give the brain task a chance to observe the CLOSE and deregister.
        for _ in 0..100 {
            if engine.get_socket(&sid).is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(engine.get_socket(&sid).is_none());
    }
}
