/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Simple Open Framing Header extraction for ILink3.
//!
//! Every ILink3 message is prefixed by a 4-byte SOFH: a little-endian u16
//! total message length (including the SOFH itself) and a u16 encoding type.
//! The gateway reads only the SOFH and the fixed SBE header that follows it —
//! enough to route a frame by template id; payload decoding is delegated to
//! the SBE codec layer.

use bytes::BytesMut;
use ironlink_core::error::TransportError;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

/// Length of the Simple Open Framing Header in bytes.
pub const SOFH_LEN: usize = 4;

/// Encoding type declared by CME for ILink3 SBE little-endian messages.
pub const ILINK3_ENCODING: u16 = 0xCAFE;

/// Length of the SBE message header that follows the SOFH.
pub const SBE_HEADER_LEN: usize = 8;

/// The fixed SBE header: block length, template id, schema id, version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbeHeader {
    /// Length of the message root block in bytes.
    pub block_length: u16,
    /// Template id identifying the message type.
    pub template_id: u16,
    /// Schema id.
    pub schema_id: u16,
    /// Schema version.
    pub version: u16,
}

impl SbeHeader {
    /// Reads an SBE header from the start of `body` (the bytes following the
    /// SOFH). Returns `None` if fewer than [`SBE_HEADER_LEN`] bytes are given.
    #[must_use]
    pub fn read(body: &[u8]) -> Option<Self> {
        if body.len() < SBE_HEADER_LEN {
            return None;
        }
        Some(Self {
            block_length: u16::from_le_bytes([body[0], body[1]]),
            template_id: u16::from_le_bytes([body[2], body[3]]),
            schema_id: u16::from_le_bytes([body[4], body[5]]),
            version: u16::from_le_bytes([body[6], body[7]]),
        })
    }

    /// Interprets the template id as an ILink3 session-layer message.
    #[must_use]
    pub fn ilink3_template(&self) -> Option<Ilink3TemplateId> {
        Ilink3TemplateId::from_u16(self.template_id)
    }
}

/// Session-layer template ids of the ILink3 protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u16)]
pub enum Ilink3TemplateId {
    /// Negotiate request.
    Negotiate = 500,
    /// Negotiation accepted.
    NegotiationResponse = 501,
    /// Negotiation rejected.
    NegotiationReject = 502,
    /// Establish request.
    Establish = 503,
    /// Establishment accepted.
    EstablishmentAck = 504,
    /// Establishment rejected.
    EstablishmentReject = 505,
    /// Sequence keep-alive.
    Sequence = 506,
    /// Terminate.
    Terminate = 507,
}

/// Incremental decoder for SOFH-framed ILink3 messages.
#[derive(Debug, Clone, Default)]
pub struct SofhFrameDecoder;

impl SofhFrameDecoder {
    /// Creates a new decoder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Attempts to split one complete frame (including its SOFH) off the
    /// front of `src`.
    ///
    /// # Errors
    /// Returns [`TransportError::UnsupportedEncoding`] for a frame whose SOFH
    /// declares an encoding other than [`ILINK3_ENCODING`], and
    /// [`TransportError::InvalidBodyLength`] for a declared length shorter
    /// than the SOFH itself.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, TransportError> {
        if src.len() < SOFH_LEN {
            return Ok(None);
        }

        let message_length = u16::from_le_bytes([src[0], src[1]]) as usize;
        let encoding = u16::from_le_bytes([src[2], src[3]]);

        if encoding != ILINK3_ENCODING {
            return Err(TransportError::UnsupportedEncoding { encoding });
        }
        if message_length < SOFH_LEN {
            return Err(TransportError::InvalidBodyLength);
        }
        if src.len() < message_length {
            src.reserve(message_length - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(message_length)))
    }
}

/// Prefixes `body` with a SOFH declaring [`ILINK3_ENCODING`].
///
/// Used by tests and stub proxies; production encoding lives in the SBE
/// codec layer.
#[must_use]
pub fn encode_sofh(body: &[u8]) -> Vec<u8> {
    let total = (body.len() + SOFH_LEN) as u16;
    let mut frame = Vec::with_capacity(body.len() + SOFH_LEN);
    frame.extend_from_slice(&total.to_le_bytes());
    frame.extend_from_slice(&ILINK3_ENCODING.to_le_bytes());
    frame.extend_from_slice(body);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sbe_body(template_id: u16, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        body.extend_from_slice(&template_id.to_le_bytes());
        body.extend_from_slice(&8_u16.to_le_bytes()); // schema id
        body.extend_from_slice(&5_u16.to_le_bytes()); // version
        body.extend_from_slice(payload);
        body
    }

    #[test]
    fn test_decode_complete_frame() {
        let frame = encode_sofh(&sbe_body(500, b"payload"));
        let mut buf = BytesMut::from(&frame[..]);

        let mut decoder = SofhFrameDecoder::new();
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], &frame[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_frame() {
        let frame = encode_sofh(&sbe_body(500, b"payload"));
        let mut buf = BytesMut::from(&frame[..frame.len() - 1]);

        let mut decoder = SofhFrameDecoder::new();
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_encoding() {
        let mut frame = encode_sofh(b"x");
        frame[2] = 0x50;
        frame[3] = 0xEB;
        let mut buf = BytesMut::from(&frame[..]);

        let mut decoder = SofhFrameDecoder::new();
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(TransportError::UnsupportedEncoding { encoding: 0xEB50 })
        ));
    }

    #[test]
    fn test_sbe_header_template_routing() {
        let body = sbe_body(504, b"");
        let header = SbeHeader::read(&body).unwrap();
        assert_eq!(header.template_id, 504);
        assert_eq!(
            header.ilink3_template(),
            Some(Ilink3TemplateId::EstablishmentAck)
        );

        let unknown = sbe_body(999, b"");
        assert_eq!(SbeHeader::read(&unknown).unwrap().ilink3_template(), None);
    }

    #[test]
    fn test_sbe_header_too_short() {
        assert!(SbeHeader::read(&[0, 1, 2]).is_none());
    }
}
