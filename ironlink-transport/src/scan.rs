/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Routing-field extraction from framed FIX messages.
//!
//! The gateway does not decode application payloads; it scans only the
//! handful of fields needed to route a message and to process an acceptor
//! Logon: MsgType, MsgSeqNum, the comp-id tuple, HeartBtInt, and credentials.

use ironlink_core::error::TransportError;
use ironlink_core::types::CompId;
use memchr::memchr;

const SOH: u8 = 0x01;

/// Returns the MsgType (tag 35) value of a framed message, if present.
#[must_use]
pub fn message_type(frame: &[u8]) -> Option<&[u8]> {
    field(frame, 35)
}

/// Fields scanned from an inbound Logon (35=A) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonMessage {
    /// BeginString (tag 8).
    pub begin_string: String,
    /// MsgSeqNum (tag 34).
    pub msg_seq_num: i64,
    /// SenderCompID (tag 49) — the counterparty's comp id.
    pub sender_comp_id: CompId,
    /// Optional SenderSubID (tag 50).
    pub sender_sub_id: Option<CompId>,
    /// Optional SenderLocationID (tag 142).
    pub sender_location_id: Option<CompId>,
    /// TargetCompID (tag 56) — this gateway's comp id.
    pub target_comp_id: CompId,
    /// HeartBtInt (tag 108) in seconds.
    pub heart_bt_int: Option<u32>,
    /// Whether ResetSeqNumFlag (tag 141) was set to `Y`.
    pub reset_seq_num_flag: bool,
    /// Username (tag 553).
    pub username: Option<String>,
    /// Password (tag 554).
    pub password: Option<String>,
}

impl LogonMessage {
    /// Scans a framed Logon message.
    ///
    /// # Errors
    /// Returns [`TransportError`] when a mandatory field is missing or cannot
    /// be interpreted.
    pub fn scan(frame: &[u8]) -> Result<Self, TransportError> {
        let begin_string =
            string_field(frame, 8).ok_or(TransportError::MissingRequiredField { tag: 8 })?;
        let sender_comp_id = comp_id_field(frame, 49)?;
        let target_comp_id = comp_id_field(frame, 56)?;
        let msg_seq_num = int_field(frame, 34)?;

        let heart_bt_int = match field(frame, 108) {
            Some(value) => Some(parse_int(value, 108)? as u32),
            None => None,
        };

        Ok(Self {
            begin_string,
            msg_seq_num,
            sender_comp_id,
            sender_sub_id: optional_comp_id_field(frame, 50)?,
            sender_location_id: optional_comp_id_field(frame, 142)?,
            target_comp_id,
            heart_bt_int,
            reset_seq_num_flag: field(frame, 141) == Some(b"Y"),
            username: string_field(frame, 553),
            password: string_field(frame, 554),
        })
    }
}

/// Finds the value of `tag` in a framed message.
///
/// Walks `tag=value` pairs delimited by SOH; the first pair is matched at the
/// start of the frame, subsequent ones after each SOH, so values containing
/// digit runs never produce false positives.
#[must_use]
pub fn field(frame: &[u8], tag: u32) -> Option<&[u8]> {
    let mut offset = 0;
    while offset < frame.len() {
        let eq = memchr(b'=', &frame[offset..])? + offset;
        let value_end = memchr(SOH, &frame[eq..]).map_or(frame.len(), |pos| eq + pos);

        if parse_tag(&frame[offset..eq]) == Some(tag) {
            return Some(&frame[eq + 1..value_end]);
        }

        offset = value_end + 1;
    }
    None
}

fn parse_tag(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || bytes.len() > 9 {
        return None;
    }
    let mut tag: u32 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        tag = tag * 10 + u32::from(b - b'0');
    }
    Some(tag)
}

fn parse_int(value: &[u8], tag: u32) -> Result<i64, TransportError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TransportError::InvalidFieldValue {
            tag,
            reason: "not an integer".to_string(),
        })
}

fn int_field(frame: &[u8], tag: u32) -> Result<i64, TransportError> {
    let value = field(frame, tag).ok_or(TransportError::MissingRequiredField { tag })?;
    parse_int(value, tag)
}

fn comp_id_field(frame: &[u8], tag: u32) -> Result<CompId, TransportError> {
    let value = field(frame, tag).ok_or(TransportError::MissingRequiredField { tag })?;
    let value = std::str::from_utf8(value).map_err(|_| TransportError::InvalidFieldValue {
        tag,
        reason: "not valid utf-8".to_string(),
    })?;
    CompId::new(value).ok_or_else(|| TransportError::InvalidFieldValue {
        tag,
        reason: "comp id too long".to_string(),
    })
}

fn optional_comp_id_field(frame: &[u8], tag: u32) -> Result<Option<CompId>, TransportError> {
    match field(frame, tag) {
        Some(_) => comp_id_field(frame, tag).map(Some),
        None => Ok(None),
    }
}

fn string_field(frame: &[u8], tag: u32) -> Option<String> {
    field(frame, tag)
        .and_then(|value| std::str::from_utf8(value).ok())
        .map(str::to_string)
}
