//! Binary polling payload framing:
//!
//! ```text
//! frame   := 0x00 len-digits 0xFF packet-bytes
//! payload := frame+
//! ```
//!
//! `len-digits` is a sequence of **byte values** `0..9` (not ASCII digits),
//! at most 319 bytes long, decoding to the base-10 length of `packet-bytes`.

use bytes::{Buf, Bytes, BytesMut};
use http_body::Body;

use crate::errors::Error;
use crate::packet::Packet;

/// Longest a length-digit run may be before the payload is rejected.
const MAX_LEN_DIGITS: usize = 319;

/// Decode a fully-buffered payload body into its packets.
pub fn decode_payload(mut buf: Bytes) -> Result<Vec<Packet>, Error> {
    let mut packets = Vec::new();
    while buf.has_remaining() {
        if buf[0] != 0x00 {
            return Err(Error::BadRequest);
        }
        buf.advance(1);

        let mut len = 0usize;
        let mut digits = 0usize;
        loop {
            if !buf.has_remaining() {
                return Err(Error::BadRequest); // missing 0xFF terminator
            }
            let b = buf[0];
            if b == 0xFF {
                buf.advance(1);
                break;
            }
            if b > 9 {
                return Err(Error::BadRequest);
            }
            digits += 1;
            if digits > MAX_LEN_DIGITS {
                return Err(Error::BadRequest);
            }
            // The digit-count cap above bounds the run's length, not its
            // numeric value: a run well under 319 digits can still overflow
            // `usize`, so guard the arithmetic explicitly rather than trust
            // the cap to do it.
            len = len
                .checked_mul(10)
                .and_then(|len| len.checked_add(b as usize))
                .ok_or(Error::BadRequest)?;
            buf.advance(1);
        }
        if digits == 0 {
            return Err(Error::BadRequest);
        }
        if buf.remaining() < len {
            return Err(Error::BadRequest);
        }
        let packet_bytes = buf.copy_to_bytes(len);
        packets.push(Packet::decode(packet_bytes)?);
    }
    if packets.is_empty() {
        return Err(Error::BadRequest);
    }
    Ok(packets)
}

/// Encode a non-empty sequence of packets into one polling response body.
pub fn encode_payload(packets: &[Packet]) -> Bytes {
    let mut out = BytesMut::new();
    for packet in packets {
        let encoded = packet.encode();
        out.extend_from_slice(&[0x00]);
        for digit in encoded.len().to_string().bytes() {
            out.extend_from_slice(&[digit - b'0']);
        }
        out.extend_from_slice(&[0xFF]);
        out.extend_from_slice(&encoded);
    }
    out.freeze()
}

/// Stream a request body into memory (bounded by `max_payload`) and decode
/// it as a payload. Used by `POST`.
pub async fn decode_body<B>(mut body: B, max_payload: usize) -> Result<Vec<Packet>, Error>
where
    B: Body + Unpin,
    B::Data: Into<Bytes>,
{
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|_| Error::BadRequest)?.into();
        if buf.len() + chunk.len() > max_payload {
            return Err(Error::PayloadTooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    decode_payload(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_single_message_packet() {
        let packets = vec![Packet::Message(Bytes::from_static(b"hi"))];
        let encoded = encode_payload(&packets);
        assert_eq!(decode_payload(encoded).unwrap(), packets);
    }

    #[test]
    fn round_trips_multiple_packets_preserving_order() {
        let packets = vec![
            Packet::Ping(Bytes::from_static(b"x")),
            Packet::Message(Bytes::from_static(b"hello world")),
            Packet::Close,
        ];
        let encoded = encode_payload(&packets);
        assert_eq!(decode_payload(encoded).unwrap(), packets);
    }

    #[test]
    fn declared_length_longer_than_body_fails() {
        // "4" message "hi" truncated: declare len 5 but only supply 2 bytes.
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 5, 0xFF, b'4', b'h', b'i']);
        assert!(decode_payload(buf.freeze()).is_err());
    }

    #[test]
    fn length_prefix_over_319_bytes_fails() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00]);
        buf.extend(std::iter::repeat(1u8).take(320));
        buf.extend_from_slice(&[0xFF, b'6']);
        assert!(decode_payload(buf.freeze()).is_err());
    }

    #[test]
    fn empty_payload_fails() {
        assert!(decode_payload(Bytes::new()).is_err());
    }

    #[test]
    fn a_length_prefix_that_would_overflow_usize_fails_instead_of_wrapping() {
        // 20 nines is under the 319-byte digit-run cap but overflows a
        // 64-bit usize if multiplied through naively.
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00]);
        buf.extend(std::iter::repeat(9u8).take(20));
        buf.extend_from_slice(&[0xFF, b'6']);
        assert!(decode_payload(buf.freeze()).is_err());
    }
}
