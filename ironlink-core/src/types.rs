/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Core types for the gateway protocol.
//!
//! This module provides the fundamental identifiers and enumerations used
//! throughout the IronLink engine:
//! - [`ConnectionId`], [`SessionId`]: 64-bit identifiers minted by the engine
//! - [`CompId`], [`CompositeKey`]: the tuple identifying a FIX logical session
//! - [`Offer`]: the outcome of a non-blocking publication claim
//! - Protocol enumerations shared between the engine and libraries

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length for CompID strings in bytes.
pub const COMP_ID_MAX_LEN: usize = 32;

/// Library id of the engine itself; sessions owned by the gateway pool are
/// published with this id.
pub const ENGINE_LIBRARY_ID: LibraryId = -1;

/// Sentinel returned by the sequence-number indices for a session that has
/// never been indexed (i.e. never logged on).
pub const UNKNOWN_SEQUENCE_NUMBER: i64 = -1;

/// Sentinel passed in a session request to skip the catch-up replay phase.
pub const NO_MESSAGE_REPLAY: i64 = -1;

/// Identifier of a library process attached to the gateway. 16-bit, with
/// [`ENGINE_LIBRARY_ID`] reserved for the gateway itself.
pub type LibraryId = i16;

/// Correlates a library request with its eventual reply frames.
pub type CorrelationId = u64;

/// Identifier of a single TCP connection owned by the framer.
///
/// Ids are minted from a randomized high-entropy seed and are strictly
/// increasing within a worker's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a connection id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns the id following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a logical FIX session, assigned by the session-id allocator
/// on first logon of a [`CompositeKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a session id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Component identifier for FIX sessions.
///
/// Used for SenderCompID (tag 49), TargetCompID (tag 56), and related fields.
/// Maximum length is [`COMP_ID_MAX_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct CompId(ArrayString<COMP_ID_MAX_LEN>);

impl CompId {
    /// Creates a new CompId from a string slice.
    ///
    /// # Arguments
    /// * `s` - The component identifier string
    ///
    /// # Returns
    /// `Some(CompId)` if the string fits within the maximum length, `None` otherwise.
    #[must_use]
    pub fn new(s: &str) -> Option<Self> {
        ArrayString::from(s).ok().map(Self)
    }

    /// Returns the CompId as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns true if the CompId is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the length of the CompId in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl AsRef<str> for CompId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CompId {
    type Err = arrayvec::CapacityError<()>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArrayString::try_from(s)
            .map(Self)
            .map_err(|_| arrayvec::CapacityError::new(()))
    }
}

/// The tuple identifying a FIX logical session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    /// SenderCompID (tag 49) of the gateway's side of the session.
    pub sender_comp_id: CompId,
    /// Optional SenderSubID (tag 50).
    pub sender_sub_id: Option<CompId>,
    /// Optional SenderLocationID (tag 142).
    pub sender_location_id: Option<CompId>,
    /// TargetCompID (tag 56) of the counterparty.
    pub target_comp_id: CompId,
}

impl CompositeKey {
    /// Creates a composite key from the two mandatory comp ids.
    #[must_use]
    pub fn new(sender_comp_id: CompId, target_comp_id: CompId) -> Self {
        Self {
            sender_comp_id,
            sender_sub_id: None,
            sender_location_id: None,
            target_comp_id,
        }
    }

    /// Sets the sender sub id.
    #[must_use]
    pub fn with_sender_sub_id(mut self, sub_id: CompId) -> Self {
        self.sender_sub_id = Some(sub_id);
        self
    }

    /// Sets the sender location id.
    #[must_use]
    pub fn with_sender_location_id(mut self, location_id: CompId) -> Self {
        self.sender_location_id = Some(location_id);
        self
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.sender_comp_id, self.target_comp_id)
    }
}

/// Outcome of a non-blocking claim on a publication or socket sink.
///
/// Back-pressure is transient unavailability of the downstream sink; callers
/// must retry without losing work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The payload was accepted; the stream position after the write.
    Published(u64),
    /// The sink cannot accept more bytes right now; retry on the next pass.
    BackPressured,
}

impl Offer {
    /// Returns true if the claim was rejected with back-pressure.
    #[inline]
    #[must_use]
    pub const fn is_back_pressured(self) -> bool {
        matches!(self, Self::BackPressured)
    }

    /// Returns the stream position if the payload was accepted.
    #[inline]
    #[must_use]
    pub const fn position(self) -> Option<u64> {
        match self {
            Self::Published(position) => Some(position),
            Self::BackPressured => None,
        }
    }
}

/// Direction of a TCP connection relative to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    /// The remote peer connected to the gateway's listening socket.
    Acceptor,
    /// The gateway opened the connection towards an exchange endpoint.
    Initiator,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acceptor => write!(f, "ACCEPTOR"),
            Self::Initiator => write!(f, "INITIATOR"),
        }
    }
}

/// Reason attached to a requested or observed disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The remote peer closed the connection.
    RemoteDisconnect,
    /// A library asked for the connection to be closed.
    ApplicationRequest,
    /// Orderly session logout.
    Logout,
    /// No logon arrived before the disconnect deadline.
    NoLogon,
    /// A logon arrived for a composite key that is already live elsewhere.
    DuplicateSession,
    /// The peer violated the session protocol (e.g. a UUID mismatch).
    ProtocolViolation,
    /// The engine is shutting down.
    EngineShutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RemoteDisconnect => "REMOTE_DISCONNECT",
            Self::ApplicationRequest => "APPLICATION_REQUEST",
            Self::Logout => "LOGOUT",
            Self::NoLogon => "NO_LOGON",
            Self::DuplicateSession => "DUPLICATE_SESSION",
            Self::ProtocolViolation => "PROTOCOL_VIOLATION",
            Self::EngineShutdown => "ENGINE_SHUTDOWN",
        };
        write!(f, "{name}")
    }
}

/// Typed error published on the inbound stream when a library operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayError {
    /// The referenced library id is not registered.
    UnknownLibrary,
    /// An outgoing socket connection could not be established.
    UnableToConnect,
    /// The composite key is already bound to a live session.
    DuplicateSession,
    /// A library with the same id is already registered.
    DuplicateLibraryId,
    /// An unexpected internal failure.
    Exception,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnknownLibrary => "UNKNOWN_LIBRARY",
            Self::UnableToConnect => "UNABLE_TO_CONNECT",
            Self::DuplicateSession => "DUPLICATE_SESSION",
            Self::DuplicateLibraryId => "DUPLICATE_LIBRARY_ID",
            Self::Exception => "EXCEPTION",
        };
        write!(f, "{name}")
    }
}

/// Status carried by `RequestSessionReply` and `ReleaseSessionReply` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionReplyStatus {
    /// The operation succeeded.
    Ok,
    /// The referenced library id is not registered.
    UnknownLibrary,
    /// The referenced session is not known to the addressed owner.
    UnknownSession,
    /// A replay was requested for a session that never logged on.
    SessionNotLoggedIn,
    /// The requested replay start exceeds the last received sequence number.
    SequenceNumberTooHigh,
}

/// Status attached to a published `Logon` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogonStatus {
    /// A fresh logon of this session.
    New,
    /// Inventory notification sent to a newly connected library.
    LibraryNotification,
}

/// State of a gateway-owned FIX session.
///
/// A session is `Active` iff the receive sequence-number index has a
/// last-known number for it, i.e. it has logged on at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// The TCP connection exists but no logon has completed.
    Connected,
    /// The session has logged on.
    Active,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_next() {
        let id = ConnectionId::new(41);
        assert_eq!(id.next().value(), 42);
        assert!(id < id.next());
    }

    #[test]
    fn test_comp_id_limits() {
        assert!(CompId::new("SENDER").is_some());
        let too_long = "X".repeat(COMP_ID_MAX_LEN + 1);
        assert!(CompId::new(&too_long).is_none());
    }

    #[test]
    fn test_composite_key_display() {
        let key = CompositeKey::new(
            CompId::new("GATEWAY").unwrap(),
            CompId::new("EXCHANGE").unwrap(),
        );
        assert_eq!(key.to_string(), "GATEWAY->EXCHANGE");
        assert!(key.sender_sub_id.is_none());
    }

    #[test]
    fn test_offer_accessors() {
        assert!(Offer::BackPressured.is_back_pressured());
        assert_eq!(Offer::Published(7).position(), Some(7));
        assert_eq!(Offer::BackPressured.position(), None);
    }

    #[test]
    fn test_enum_display() {
        assert_eq!(ConnectionType::Acceptor.to_string(), "ACCEPTOR");
        assert_eq!(DisconnectReason::Logout.to_string(), "LOGOUT");
        assert_eq!(GatewayError::DuplicateLibraryId.to_string(), "DUPLICATE_LIBRARY_ID");
    }
}
