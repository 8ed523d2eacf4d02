/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! FIX message framing.
//!
//! This module handles FIX message framing over TCP, including BeginString,
//! BodyLength, and Checksum validation. The decoder is incremental: feed it a
//! growing [`BytesMut`] and it splits off one complete message at a time,
//! leaving partial trailing bytes in place for the next socket read.

use bytes::{BufMut, BytesMut};
use ironlink_core::error::TransportError;
use memchr::memchr;

/// SOH field delimiter.
pub const SOH: u8 = 0x01;

/// Minimum parseable FIX message: `8=FIX.x.y|9=N|35=X|10=XXX|`.
const MIN_MESSAGE_LEN: usize = 20;

/// Length of the `10=XXX|` trailer.
const TRAILER_LEN: usize = 7;

/// Calculates the FIX checksum for the given data.
///
/// The checksum is the sum of all bytes modulo 256.
///
/// # Arguments
/// * `data` - The message bytes to checksum (excluding the 10=XXX| field)
#[inline]
#[must_use]
pub fn calculate_checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| u32::from(b)).sum();
    (sum % 256) as u8
}

/// Parses a 3-digit checksum string to a u8 value.
///
/// # Arguments
/// * `bytes` - The 3-byte checksum string
///
/// # Returns
/// `Some(checksum)` if valid, `None` otherwise.
#[inline]
#[must_use]
pub fn parse_checksum(bytes: &[u8]) -> Option<u8> {
    if bytes.len() != 3 {
        return None;
    }

    let d0 = bytes[0].checked_sub(b'0')?;
    let d1 = bytes[1].checked_sub(b'0')?;
    let d2 = bytes[2].checked_sub(b'0')?;

    if d0 > 9 || d1 > 9 || d2 > 9 {
        return None;
    }

    Some(d0 * 100 + d1 * 10 + d2)
}

/// Incremental decoder for FIX tag=value message frames.
///
/// Validates BeginString, BodyLength, and optionally the trailing Checksum.
#[derive(Debug, Clone)]
pub struct FixFrameDecoder {
    /// Maximum message size in bytes.
    max_message_size: usize,
    /// Whether to validate checksums.
    validate_checksum: bool,
}

impl FixFrameDecoder {
    /// Creates a new decoder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: 1024 * 1024, // 1MB
            validate_checksum: true,
        }
    }

    /// Sets the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets whether to validate checksums.
    #[must_use]
    pub const fn with_checksum_validation(mut self, validate: bool) -> Self {
        self.validate_checksum = validate;
        self
    }

    /// Attempts to split one complete message off the front of `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    /// Returns [`TransportError`] when the buffered bytes cannot be a valid
    /// FIX message; the connection should be dropped since framing cannot
    /// recover.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, TransportError> {
        if src.len() < MIN_MESSAGE_LEN {
            return Ok(None);
        }

        if &src[0..2] != b"8=" {
            return Err(TransportError::InvalidBeginString);
        }

        let first_soh = match memchr(SOH, src) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let body_len_start = first_soh + 1;
        if src.len() < body_len_start + 3 {
            return Ok(None);
        }

        if &src[body_len_start..body_len_start + 2] != b"9=" {
            return Err(TransportError::MissingBodyLength);
        }

        let body_len_soh = match memchr(SOH, &src[body_len_start..]) {
            Some(pos) => body_len_start + pos,
            None => return Ok(None),
        };

        let body_len_str = std::str::from_utf8(&src[body_len_start + 2..body_len_soh])
            .map_err(|_| TransportError::InvalidBodyLength)?;
        let body_length: usize = body_len_str
            .parse()
            .map_err(|_| TransportError::InvalidBodyLength)?;

        // BodyLength counts from after 9=N| up to but excluding 10=.
        let total_length = body_len_soh + 1 + body_length + TRAILER_LEN;

        if total_length > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: total_length,
                max_size: self.max_message_size,
            });
        }

        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        if self.validate_checksum {
            let checksum_start = total_length - 4;
            let checksum_bytes = &src[checksum_start..checksum_start + 3];
            let declared =
                parse_checksum(checksum_bytes).ok_or(TransportError::InvalidBodyLength)?;

            let checksum_field_start = total_length - TRAILER_LEN;
            let calculated = calculate_checksum(&src[..checksum_field_start]);

            if calculated != declared {
                return Err(TransportError::ChecksumMismatch {
                    calculated,
                    declared,
                });
            }
        }

        Ok(Some(src.split_to(total_length)))
    }
}

impl Default for FixFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes an administrative FIX Heartbeat message.
///
/// The gateway emits these itself on gateway-owned acceptor sessions; all
/// other outbound traffic arrives pre-encoded from libraries.
///
/// # Arguments
/// * `begin_string` - FIX version string, e.g. `FIX.4.4`
/// * `sender_comp_id` - SenderCompID (tag 49)
/// * `target_comp_id` - TargetCompID (tag 56)
/// * `msg_seq_num` - MsgSeqNum (tag 34)
/// * `sending_time` - pre-formatted SendingTime (tag 52)
#[must_use]
pub fn encode_heartbeat(
    begin_string: &str,
    sender_comp_id: &str,
    target_comp_id: &str,
    msg_seq_num: u64,
    sending_time: &str,
) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(64);
    body.put_slice(b"35=0");
    body.put_u8(SOH);
    body.put_slice(b"49=");
    body.put_slice(sender_comp_id.as_bytes());
    body.put_u8(SOH);
    body.put_slice(b"56=");
    body.put_slice(target_comp_id.as_bytes());
    body.put_u8(SOH);
    body.put_slice(b"34=");
    body.put_slice(msg_seq_num.to_string().as_bytes());
    body.put_u8(SOH);
    body.put_slice(b"52=");
    body.put_slice(sending_time.as_bytes());
    body.put_u8(SOH);

    let mut message = BytesMut::with_capacity(body.len() + 32);
    message.put_slice(b"8=");
    message.put_slice(begin_string.as_bytes());
    message.put_u8(SOH);
    message.put_slice(b"9=");
    message.put_slice(body.len().to_string().as_bytes());
    message.put_u8(SOH);
    message.put_slice(&body);

    let checksum = calculate_checksum(&message);
    message.put_slice(b"10=");
    message.put_slice(format!("{checksum:03}").as_bytes());
    message.put_u8(SOH);

    message.to_vec()
}
