//! The websocket upgrade handshake and steady-state pump.
//!
//! This layer never opens a brand-new session directly over websocket: a
//! session always starts on polling and is only ever promoted to websocket
//! through [`new_req`] below, for a session that already exists.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use http::{Request, Response};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{protocol::Role, Message};
use tokio_tungstenite::WebSocketStream;

use crate::body::ResponseBody;
use crate::engine::EngineIo;
use crate::errors::Error;
use crate::futures::ws_response;
use crate::handler::EngineIoHandler;
use crate::packet::{Packet, PROBE_PAYLOAD};
use crate::sid::Sid;
use crate::socket::Socket;
use crate::transport::TransportState;

/// Accept the websocket upgrade. The actual probe/upgrade handshake and
/// steady-state pump run on a spawned task once hyper grants the raw
/// connection.
pub fn new_req<H, R, B>(
    engine: Arc<EngineIo<H>>,
    sid: Sid,
    req: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
    B: Send + 'static,
{
    let (parts, _) = req.into_parts();
    let ws_key = parts
        .headers
        .get("Sec-WebSocket-Key")
        .cloned()
        .ok_or(Error::UpgradeError)?;

    let req = Request::from_parts(parts, ());
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(conn) => {
                if let Err(_e) = drive(engine, conn, sid).await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = ?_e, "ws upgrade closed with error");
                }
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_e, "ws upgrade error");
            }
        }
    });

    ws_response(&ws_key)
}

/// Drive one websocket connection from handshake to teardown.
///
/// Generic over the raw duplex stream rather than pinned to
/// [`hyper::upgrade::Upgraded`], so the handshake and steady-state pump can
/// be exercised against an in-memory stream in tests.
async fn drive<H, S>(engine: Arc<EngineIo<H>>, conn: S, sid: Sid) -> Result<(), Error>
where
    H: EngineIoHandler,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let socket = engine
        .get_socket(&sid)
        .ok_or_else(|| Error::UnknownSessionId(sid.clone()))?;
    if socket.is_websocket() {
        return Err(Error::UpgradeError);
    }

    let mut ws = WebSocketStream::from_raw_socket(conn, Role::Server, None).await;

    if let Err(e) = upgrade_handshake(&socket, &mut ws).await {
        let _ = ws.close(None).await;
        return Err(e);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(sid = %sid, "websocket upgrade committed");

    let new_transport = socket.current_transport();
    let (tx, rx) = ws.split();
    let writer = spawn_writer(new_transport.clone(), tx);

    reader_loop(&new_transport, rx).await;

    // Whatever ended the reader loop, the session is over: synthesize a
    // `CLOSE` on the (shared) `in` queue so the brain notices on its next
    // turn and removes the session from the registry.
    new_transport.push_in(Packet::Close);
    writer.abort();
    #[cfg(feature = "tracing")]
    tracing::debug!(sid = %sid, "websocket reader exited");
    Ok(())
}

/// Probe/upgrade handshake.
///
/// ```text
/// CLIENT                                                 SERVER
/// │   GET /engine.io/?transport=websocket&sid=...        │
/// │ ───────────────────────────────────────────────────► │
/// │  ◄─────────────────────────────────────────────────┘ │
/// │            HTTP 101 (WebSocket handshake)             │
/// │            -----  WebSocket frames -----              │
/// │  ─────────────────────────────────────────────────►  │
/// │                      2probe                           │ (ping, probe)
/// │  ◄─────────────────────────────────────────────────   │
/// │                      3probe                           │ (pong, probe)
/// │  ─────────────────────────────────────────────────►   │
/// │                      5                                │ (upgrade)
/// │            -----  WebSocket frames -----              │
/// ```
async fn upgrade_handshake<Data, S>(
    socket: &Arc<Socket<Data>>,
    ws: &mut WebSocketStream<S>,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Step 1: probe in.
    let probe_ping = next_packet(ws).await?;
    if !probe_ping.is_probe_ping() {
        return Err(Error::BadPacket(probe_ping));
    }

    // Step 2: probe out.
    let pong = Packet::Pong(Bytes::from_static(PROBE_PAYLOAD));
    ws.send(Message::Text(packet_to_text(&pong))).await?;

    // Step 3: prepare the new transport without committing it yet. The
    // `NOOP` unblocks any polling `GET` still in flight on the old
    // transport; `upgrade_from` shares the old transport's `in` sender so
    // packets a concurrent `POST` is still mid-write on are not lost.
    let current = socket.current_transport();
    current.push_out(Packet::Noop)?;
    let new_transport = TransportState::upgrade_from(&current);

    // Step 4: completion packet.
    let completion = next_packet(ws).await?;
    match completion {
        Packet::Upgrade => {}
        p => return Err(Error::BadPacket(p)),
    }

    // Step 5: commit.
    socket.swap_transport(new_transport);
    Ok(())
}

async fn next_packet<S>(ws: &mut WebSocketStream<S>) -> Result<Packet, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match ws.next().await {
        Some(Ok(Message::Text(text))) => Packet::decode(Bytes::from(text.into_bytes())),
        Some(Ok(_)) | None => Err(Error::UpgradeError),
        Some(Err(e)) => Err(Error::Ws(e)),
    }
}

fn packet_to_text(packet: &Packet) -> String {
    String::from_utf8_lossy(&packet.encode()).into_owned()
}

/// Forward every packet queued on `transport.out` to the websocket as a text
/// frame, flushing once the queue is momentarily drained.
fn spawn_writer<S>(
    transport: Arc<TransportState>,
    mut tx: SplitSink<WebSocketStream<S>, Message>,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(packet) = transport.recv_out().await {
            if !send_one(&mut tx, packet).await {
                break;
            }
            while let Some(packet) = transport.try_recv_out() {
                if !send_one(&mut tx, packet).await {
                    break;
                }
            }
            let _ = tx.flush().await;
        }
    })
}

/// Returns `false` when the connection should be torn down (a `CLOSE`
/// packet was sent, or the frame failed to send).
async fn send_one<S>(tx: &mut SplitSink<WebSocketStream<S>, Message>, packet: Packet) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let res = match packet {
        Packet::Close => {
            let _ = tx.send(Message::Close(None)).await;
            return false;
        }
        // A `NOOP` may still be queued from an upgrade that raced a polling
        // `GET` which already returned on its own; nothing to deliver.
        Packet::Noop => Ok(()),
        other => tx.feed(Message::Text(packet_to_text(&other))).await,
    };
    if let Err(_e) = res {
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %_e, "error sending packet");
        return false;
    }
    true
}

/// Decode every text frame into a packet and push it onto `transport.in`
/// until the connection ends for any reason.
async fn reader_loop<S>(transport: &TransportState, mut rx: SplitStream<WebSocketStream<S>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match Packet::decode(Bytes::from(text.into_bytes())) {
                Ok(packet) => transport.push_in(packet),
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = ?_e, "bad packet received");
                    break;
                }
            },
            Ok(Message::Binary(_)) => {
                // Binary frames are out of scope for this protocol version.
                #[cfg(feature = "tracing")]
                tracing::debug!("binary websocket frame skipped");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong/frame control is handled by tungstenite itself
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_e, "websocket read error");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::SocketReq;

    fn sample_req() -> SocketReq {
        SocketReq::from(http::Request::new(()).into_parts().0)
    }

    /// Drives the real probe/pong/upgrade handshake over an in-memory duplex
    /// stream, and confirms that a packet pushed onto the old transport
    /// while the handshake is still in flight still reaches the single
    /// long-lived `in` receiver after the swap.
    #[tokio::test]
    async fn upgrade_handshake_commits_with_no_packet_loss_across_the_handoff() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (socket, _incoming_tx, mut in_rx, _outgoing_rx) =
            Socket::new(Sid::new(), sample_req(), ());

        let mut server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client_ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let handshake_socket = socket.clone();
        let server = tokio::spawn(async move {
            upgrade_handshake(&handshake_socket, &mut server_ws).await
        });

        client_ws
            .send(Message::Text("2probe".to_string()))
            .await
            .unwrap();
        let pong = client_ws.next().await.unwrap().unwrap();
        assert_eq!(pong, Message::Text("3probe".to_string()));

        // A concurrent polling POST delivering an ordinary message while the
        // handshake is still in flight: pushed on the transport that is
        // still current at this point (the old, polling one).
        socket
            .current_transport()
            .push_in(Packet::Message(Bytes::from_static(b"concurrent")));

        client_ws.send(Message::Text("5".to_string())).await.unwrap();

        server.await.unwrap().unwrap();
        assert!(socket.is_websocket());
        assert_eq!(
            in_rx.recv().await.unwrap(),
            Packet::Message(Bytes::from_static(b"concurrent"))
        );
    }

    #[tokio::test]
    async fn upgrade_handshake_rejects_a_non_probe_first_packet() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (socket, _incoming_tx, _in_rx, _outgoing_rx) =
            Socket::new(Sid::new(), sample_req(), ());

        let mut server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client_ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let server = tokio::spawn(async move { upgrade_handshake(&socket, &mut server_ws).await });
        client_ws
            .send(Message::Text("4not a probe".to_string()))
            .await
            .unwrap();

        let result = server.await.unwrap();
        assert!(matches!(result, Err(Error::BadPacket(_))));
    }
}
