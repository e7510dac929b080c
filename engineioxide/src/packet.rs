//! The Engine.IO packet codec.
//!
//! Wire form: one ASCII digit `'0'..'6'` identifying the packet type,
//! followed by opaque bytes to end of input. `encode` / `decode` are
//! inverses of each other for every well-formed packet.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::config::EngineIoConfig;
use crate::errors::Error;
use crate::sid::Sid;

/// An Engine.IO transport name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Polling,
    Websocket,
}

impl TransportType {
    /// Case-sensitive exact match of `"polling"` / `"websocket"`; anything
    /// else yields `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "polling" => Some(TransportType::Polling),
            "websocket" => Some(TransportType::Websocket),
            _ => None,
        }
    }
}

/// Body of an `OPEN` packet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPacket {
    pub sid: String,
    pub upgrades: Vec<TransportType>,
    pub ping_timeout: u64,
    pub ping_interval: u64,
}

impl OpenPacket {
    pub fn new(sid: &Sid, config: &EngineIoConfig) -> Self {
        OpenPacket {
            sid: sid.to_string(),
            upgrades: vec![TransportType::Websocket],
            ping_timeout: config.ping_timeout.as_millis() as u64,
            ping_interval: config.ping_interval.as_millis() as u64,
        }
    }
}

/// A parsed Engine.IO packet.
///
/// `Open`, `Close`, `Upgrade` and `Noop` carry no client-settable payload in
/// this protocol version; `Ping`/`Pong`/`Message` carry an opaque byte
/// string, which is how both ordinary heartbeats and the literal
/// `"probe"`/`"probe"` upgrade handshake packets are represented -- there is
/// no separate packet type for the probe variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Open(OpenPacket),
    Close,
    Ping(Bytes),
    Pong(Bytes),
    Message(Bytes),
    Upgrade,
    Noop,
}

impl PartialEq for OpenPacket {
    fn eq(&self, other: &Self) -> bool {
        self.sid == other.sid
            && self.upgrades == other.upgrades
            && self.ping_timeout == other.ping_timeout
            && self.ping_interval == other.ping_interval
    }
}
impl Eq for OpenPacket {}

pub(crate) const PROBE_PAYLOAD: &[u8] = b"probe";

impl Packet {
    fn ordinal(&self) -> u8 {
        match self {
            Packet::Open(_) => b'0',
            Packet::Close => b'1',
            Packet::Ping(_) => b'2',
            Packet::Pong(_) => b'3',
            Packet::Message(_) => b'4',
            Packet::Upgrade => b'5',
            Packet::Noop => b'6',
        }
    }

    /// Encode this packet to its wire form.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.ordinal());
        match self {
            Packet::Open(open) => {
                // `OpenPacket` always serializes: every field is a plain
                // scalar or a `Vec` of a unit-like enum.
                let json = serde_json::to_vec(open).expect("OpenPacket always serializes");
                buf.put_slice(&json);
            }
            Packet::Ping(p) | Packet::Pong(p) | Packet::Message(p) => buf.put_slice(p),
            Packet::Close | Packet::Upgrade | Packet::Noop => {}
        }
        buf.freeze()
    }

    /// Parse one packet's wire form. `Open` is never client-supplied so it
    /// is not a valid decode target -- only the server emits it.
    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.is_empty() {
            return Err(Error::BadRequest);
        }
        let ty = buf.split_to(1)[0];
        match ty {
            b'1' => Ok(Packet::Close),
            b'2' => Ok(Packet::Ping(buf)),
            b'3' => Ok(Packet::Pong(buf)),
            b'4' => Ok(Packet::Message(buf)),
            b'5' => Ok(Packet::Upgrade),
            b'6' => Ok(Packet::Noop),
            _ => Err(Error::BadRequest),
        }
    }

    pub(crate) fn is_probe_ping(&self) -> bool {
        matches!(self, Packet::Ping(p) if p.as_ref() == PROBE_PAYLOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> EngineIoConfig {
        EngineIoConfig::default()
    }

    #[test]
    fn message_round_trips() {
        let p = Packet::Message(Bytes::from_static(b"hello"));
        assert_eq!(Packet::decode(p.encode()).unwrap(), p);
    }

    #[test]
    fn ping_pong_round_trip_with_arbitrary_payload() {
        let ping = Packet::Ping(Bytes::from_static(b"x"));
        assert_eq!(Packet::decode(ping.encode()).unwrap(), ping);
        let pong = Packet::Pong(Bytes::from_static(b"x"));
        assert_eq!(Packet::decode(pong.encode()).unwrap(), pong);
    }

    #[test]
    fn empty_payload_packets_round_trip() {
        for p in [Packet::Close, Packet::Upgrade, Packet::Noop] {
            assert_eq!(Packet::decode(p.encode()).unwrap(), p);
        }
    }

    #[test]
    fn open_packet_encodes_expected_json_shape() {
        let sid = Sid::new();
        let packet = Packet::Open(OpenPacket::new(&sid, &sample_config()));
        let encoded = packet.encode();
        assert_eq!(encoded[0], b'0');
        let json: serde_json::Value = serde_json::from_slice(&encoded[1..]).unwrap();
        assert_eq!(json["sid"], sid.to_string());
        assert_eq!(json["upgrades"], serde_json::json!(["websocket"]));
        assert_eq!(json["pingTimeout"], 60_000);
        assert_eq!(json["pingInterval"], 25_000);
    }

    #[test]
    fn unknown_type_byte_fails() {
        assert!(Packet::decode(Bytes::from_static(b"9x")).is_err());
    }

    #[test]
    fn empty_buffer_fails() {
        assert!(Packet::decode(Bytes::new()).is_err());
    }

    #[test]
    fn transport_name_parser_is_case_sensitive() {
        assert_eq!(TransportType::parse("polling"), Some(TransportType::Polling));
        assert_eq!(
            TransportType::parse("websocket"),
            Some(TransportType::Websocket)
        );
        assert_eq!(TransportType::parse("Polling"), None);
        assert_eq!(TransportType::parse("WEBSOCKET"), None);
        assert_eq!(TransportType::parse("flashsocket"), None);
    }
}
