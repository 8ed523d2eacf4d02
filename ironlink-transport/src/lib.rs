/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronLink Transport
//!
//! Byte-level framing for the IronLink gateway.
//!
//! This crate provides:
//! - **FIX framing**: incremental tag=value frame extraction with BeginString,
//!   BodyLength, and Checksum validation
//! - **SOFH framing**: Simple Open Framing Header extraction for the ILink3
//!   binary protocol, with SBE header peeking for template routing
//! - **Admin encoding**: the handful of administrative messages the gateway
//!   emits itself (heartbeats)
//! - **Socket setup**: non-blocking socket and buffer-size configuration

pub mod frame;
pub mod scan;
pub mod socket;
pub mod sofh;

pub use frame::{calculate_checksum, encode_heartbeat, parse_checksum, FixFrameDecoder};
pub use scan::{message_type, LogonMessage};
pub use socket::configure_stream;
pub use sofh::{
    encode_sofh, Ilink3TemplateId, SbeHeader, SofhFrameDecoder, ILINK3_ENCODING, SOFH_LEN,
};
