/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronLink Core
//!
//! Fundamental types for the IronLink FIX/ILink3 gateway.
//!
//! This crate provides:
//! - **Identifiers**: connection, session, library, and correlation ids
//! - **Protocol enums**: connection types, disconnect reasons, gateway errors,
//!   reply statuses
//! - **Clocks**: separate wall-clock milliseconds and monotonic nanoseconds
//! - **Errors**: unified error hierarchy using `thiserror`

pub mod clock;
pub mod error;
pub mod types;

pub use clock::{EpochClock, ManualClock, NanoClock, SystemEpochClock, SystemNanoClock};
pub use error::{CryptoError, EngineError, Result, SessionError, TransportError};
pub use types::{
    CompId, CompositeKey, ConnectionId, ConnectionType, CorrelationId, DisconnectReason,
    GatewayError, LibraryId, LogonStatus, Offer, SessionId, SessionReplyStatus, SessionState,
    ENGINE_LIBRARY_ID, NO_MESSAGE_REPLAY, UNKNOWN_SEQUENCE_NUMBER,
};
