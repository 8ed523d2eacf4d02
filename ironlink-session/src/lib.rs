/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronLink Session
//!
//! ILink3 session layer for the IronLink gateway.
//!
//! This crate provides:
//! - **State machine**: the negotiate/establish/terminate handshake of the
//!   CME ILink3 binary protocol
//! - **Request signing**: HMAC-SHA256 over the canonical request strings,
//!   keyed by the user's base64url-encoded secret
//! - **Timestamps**: microsecond UUID derivation and nanosecond request
//!   timestamps from the two gateway clocks
//! - **Configuration**: per-session connection options with a builder

pub mod config;
pub mod ilink3;
pub mod signing;

pub use config::{Ilink3SessionConfig, AUTOMATIC_INITIAL_SEQUENCE_NUMBER};
pub use ilink3::{
    Ilink3Event, Ilink3Proxy, Ilink3Session, Ilink3SessionOwner, Ilink3State,
};
pub use signing::{establish_canonical, negotiate_canonical, sign_request};
