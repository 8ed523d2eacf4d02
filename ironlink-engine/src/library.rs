/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Library liveness and session ownership.
//!
//! Each attached library is represented by a [`LibraryInfo`] holding a
//! [`LivenessDetector`] and the sessions currently managed by that library.
//! When the detector declares the library dead, the framer re-acquires all of
//! its sessions into the gateway pool.

use crate::session::GatewaySession;
use ironlink_core::types::{ConnectionId, LibraryId};

/// Deadline-based liveness tracking for an attached library.
///
/// Seeded with the library's registration time; every application heartbeat
/// pushes the deadline out by the configured reply timeout.
#[derive(Debug, Clone)]
pub struct LivenessDetector {
    reply_timeout_in_ms: u64,
    last_heartbeat_in_ms: u64,
}

impl LivenessDetector {
    /// Creates a detector seeded at `time_in_ms`.
    ///
    /// # Arguments
    /// * `reply_timeout_in_ms` - Grace period between heartbeats
    /// * `time_in_ms` - Registration time
    #[must_use]
    pub const fn new(reply_timeout_in_ms: u64, time_in_ms: u64) -> Self {
        Self {
            reply_timeout_in_ms,
            last_heartbeat_in_ms: time_in_ms,
        }
    }

    /// Records a heartbeat.
    pub fn on_heartbeat(&mut self, time_in_ms: u64) {
        self.last_heartbeat_in_ms = self.last_heartbeat_in_ms.max(time_in_ms);
    }

    /// Returns true while the library is within its heartbeat deadline.
    #[must_use]
    pub const fn is_connected(&self, time_in_ms: u64) -> bool {
        time_in_ms.saturating_sub(self.last_heartbeat_in_ms) <= self.reply_timeout_in_ms
    }

    /// Returns the time of the last observed heartbeat.
    #[must_use]
    pub const fn last_heartbeat_in_ms(&self) -> u64 {
        self.last_heartbeat_in_ms
    }
}

/// A library attached to the gateway and the sessions it manages.
#[derive(Debug)]
pub struct LibraryInfo {
    library_id: LibraryId,
    channel_id: i32,
    liveness: LivenessDetector,
    sessions: Vec<GatewaySession>,
}

impl LibraryInfo {
    /// Creates the record for a freshly connected library.
    #[must_use]
    pub const fn new(library_id: LibraryId, channel_id: i32, liveness: LivenessDetector) -> Self {
        Self {
            library_id,
            channel_id,
            liveness,
            sessions: Vec::new(),
        }
    }

    /// Returns the library id.
    #[must_use]
    pub const fn library_id(&self) -> LibraryId {
        self.library_id
    }

    /// Returns the library's publication channel id.
    #[must_use]
    pub const fn channel_id(&self) -> i32 {
        self.channel_id
    }

    /// Records a heartbeat from this library.
    pub fn on_heartbeat(&mut self, time_in_ms: u64) {
        self.liveness.on_heartbeat(time_in_ms);
    }

    /// Returns true while the library is within its heartbeat deadline.
    #[must_use]
    pub const fn is_connected(&self, time_in_ms: u64) -> bool {
        self.liveness.is_connected(time_in_ms)
    }

    /// Moves a session under this library's management.
    pub fn add_session(&mut self, session: GatewaySession) {
        self.sessions.push(session);
    }

    /// Removes and returns the session on `connection_id`, if managed here.
    #[must_use]
    pub fn remove_session(&mut self, connection_id: ConnectionId) -> Option<GatewaySession> {
        let index = self
            .sessions
            .iter()
            .position(|session| session.connection_id() == connection_id)?;
        Some(self.sessions.swap_remove(index))
    }

    /// Returns the managed sessions.
    #[must_use]
    pub fn sessions(&self) -> &[GatewaySession] {
        &self.sessions
    }

    /// Takes every managed session, leaving the library empty.
    #[must_use]
    pub fn take_sessions(&mut self) -> Vec<GatewaySession> {
        std::mem::take(&mut self.sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironlink_core::types::ConnectionType;

    fn session(connection_id: u64) -> GatewaySession {
        GatewaySession::new(
            ConnectionId::new(connection_id),
            "127.0.0.1:9999".to_string(),
            ConnectionType::Acceptor,
        )
    }

    #[test]
    fn test_liveness_deadline() {
        let mut liveness = LivenessDetector::new(100, 1_000);
        assert!(liveness.is_connected(1_000));
        assert!(liveness.is_connected(1_100));
        assert!(!liveness.is_connected(1_101));

        liveness.on_heartbeat(1_090);
        assert!(liveness.is_connected(1_190));
        assert!(!liveness.is_connected(1_191));
    }

    #[test]
    fn test_heartbeats_never_move_backwards() {
        let mut liveness = LivenessDetector::new(100, 1_000);
        liveness.on_heartbeat(900);
        assert_eq!(liveness.last_heartbeat_in_ms(), 1_000);
    }

    #[test]
    fn test_session_ownership() {
        let mut library = LibraryInfo::new(7, 3, LivenessDetector::new(100, 0));
        library.add_session(session(1));
        library.add_session(session(2));

        let removed = library.remove_session(ConnectionId::new(1)).unwrap();
        assert_eq!(removed.connection_id(), ConnectionId::new(1));
        assert!(library.remove_session(ConnectionId::new(1)).is_none());

        let taken = library.take_sessions();
        assert_eq!(taken.len(), 1);
        assert!(library.sessions().is_empty());
    }
}
