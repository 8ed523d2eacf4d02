/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Gateway-owned FIX sessions.
//!
//! A [`GatewaySession`] pairs a connection with its protocol state. It lives
//! in exactly one owner at a time — the gateway pool ([`GatewaySessions`]) or
//! one library — and handover is a move, never a shared reference.

use ironlink_core::types::{
    CompositeKey, ConnectionId, ConnectionType, SessionId, SessionState, UNKNOWN_SEQUENCE_NUMBER,
};

/// A FIX session and the connection carrying it.
#[derive(Debug, Clone)]
pub struct GatewaySession {
    connection_id: ConnectionId,
    session_id: Option<SessionId>,
    address: String,
    connection_type: ConnectionType,
    key: Option<CompositeKey>,
    begin_string: Option<String>,
    username: Option<String>,
    password: Option<String>,
    heartbeat_interval_in_s: u32,
    last_sent_sequence_number: i64,
    last_received_sequence_number: i64,
    state: SessionState,
    disconnect_deadline_in_ms: Option<u64>,
    last_heartbeat_sent_in_ms: u64,
}

impl GatewaySession {
    /// Creates the session record for a fresh connection.
    ///
    /// # Arguments
    /// * `connection_id` - Id of the carrying connection
    /// * `address` - Remote peer address
    /// * `connection_type` - Direction of the connection
    #[must_use]
    pub fn new(connection_id: ConnectionId, address: String, connection_type: ConnectionType) -> Self {
        Self {
            connection_id,
            session_id: None,
            address,
            connection_type,
            key: None,
            begin_string: None,
            username: None,
            password: None,
            heartbeat_interval_in_s: 0,
            last_sent_sequence_number: UNKNOWN_SEQUENCE_NUMBER,
            last_received_sequence_number: UNKNOWN_SEQUENCE_NUMBER,
            state: SessionState::Connected,
            disconnect_deadline_in_ms: None,
            last_heartbeat_sent_in_ms: 0,
        }
    }

    /// Returns the id of the carrying connection.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Returns the session id, when assigned.
    #[must_use]
    pub const fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Returns the remote peer address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the direction of the connection.
    #[must_use]
    pub const fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Returns the composite key, once logged on.
    #[must_use]
    pub const fn key(&self) -> Option<&CompositeKey> {
        self.key.as_ref()
    }

    /// Returns the BeginString observed on logon.
    #[must_use]
    pub fn begin_string(&self) -> Option<&str> {
        self.begin_string.as_deref()
    }

    /// Returns the logon username.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns the logon password.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Returns the heartbeat interval in seconds.
    #[must_use]
    pub const fn heartbeat_interval_in_s(&self) -> u32 {
        self.heartbeat_interval_in_s
    }

    /// Returns the last sent sequence number.
    #[must_use]
    pub const fn last_sent_sequence_number(&self) -> i64 {
        self.last_sent_sequence_number
    }

    /// Returns the last received sequence number.
    #[must_use]
    pub const fn last_received_sequence_number(&self) -> i64 {
        self.last_received_sequence_number
    }

    /// Returns the session state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Sets the session state.
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Sets the disconnect deadline enforced while no logon has arrived.
    pub fn disconnect_at(&mut self, deadline_in_ms: u64) {
        self.disconnect_deadline_in_ms = Some(deadline_in_ms);
    }

    /// Returns the disconnect deadline, when armed.
    #[must_use]
    pub const fn disconnect_deadline_in_ms(&self) -> Option<u64> {
        self.disconnect_deadline_in_ms
    }

    /// Updates sequence numbers (e.g. from the persistent indices).
    pub fn set_sequence_numbers(&mut self, last_sent: i64, last_received: i64) {
        self.last_sent_sequence_number = last_sent;
        self.last_received_sequence_number = last_received;
    }

    /// Records that a message was sent, returning its sequence number.
    pub fn allocate_sent_sequence_number(&mut self) -> i64 {
        self.last_sent_sequence_number = self.last_sent_sequence_number.max(0) + 1;
        self.last_sent_sequence_number
    }

    /// Applies a successful logon, clearing the no-logon disconnect deadline.
    #[allow(clippy::too_many_arguments)]
    pub fn on_logon(
        &mut self,
        session_id: SessionId,
        key: CompositeKey,
        begin_string: Option<String>,
        username: Option<String>,
        password: Option<String>,
        heartbeat_interval_in_s: u32,
        msg_seq_num: i64,
    ) {
        self.session_id = Some(session_id);
        self.key = Some(key);
        self.begin_string = begin_string;
        self.username = username;
        self.password = password;
        self.heartbeat_interval_in_s = heartbeat_interval_in_s;
        self.last_received_sequence_number =
            self.last_received_sequence_number.max(msg_seq_num);
        self.disconnect_deadline_in_ms = None;
    }

    /// Returns true when a heartbeat is due on this session.
    #[must_use]
    pub fn heartbeat_due(&self, time_in_ms: u64) -> bool {
        self.state == SessionState::Active
            && self.heartbeat_interval_in_s > 0
            && time_in_ms.saturating_sub(self.last_heartbeat_sent_in_ms)
                >= u64::from(self.heartbeat_interval_in_s) * 1_000
    }

    /// Records that a heartbeat was sent at `time_in_ms`.
    pub fn on_heartbeat_sent(&mut self, time_in_ms: u64) {
        self.last_heartbeat_sent_in_ms = time_in_ms;
    }
}

/// Pool of sessions currently owned by the gateway.
#[derive(Debug, Default)]
pub struct GatewaySessions {
    sessions: Vec<GatewaySession>,
}

impl GatewaySessions {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves a session into the pool, updating its handover state.
    #[allow(clippy::too_many_arguments)]
    pub fn acquire(
        &mut self,
        mut session: GatewaySession,
        state: SessionState,
        heartbeat_interval_in_s: u32,
        last_sent_sequence_number: i64,
        last_received_sequence_number: i64,
        username: Option<String>,
        password: Option<String>,
    ) {
        session.state = state;
        session.heartbeat_interval_in_s = heartbeat_interval_in_s;
        session.last_sent_sequence_number = last_sent_sequence_number;
        session.last_received_sequence_number = last_received_sequence_number;
        if username.is_some() {
            session.username = username;
        }
        if password.is_some() {
            session.password = password;
        }
        self.sessions.push(session);
    }

    /// Removes and returns the session with the given session id.
    #[must_use]
    pub fn release(&mut self, session_id: SessionId) -> Option<GatewaySession> {
        let index = self
            .sessions
            .iter()
            .position(|session| session.session_id() == Some(session_id))?;
        Some(self.sessions.swap_remove(index))
    }

    /// Removes and returns the session on the given connection.
    #[must_use]
    pub fn release_by_connection(&mut self, connection_id: ConnectionId) -> Option<GatewaySession> {
        let index = self
            .sessions
            .iter()
            .position(|session| session.connection_id() == connection_id)?;
        Some(self.sessions.swap_remove(index))
    }

    /// Returns the pooled sessions.
    #[must_use]
    pub fn sessions(&self) -> &[GatewaySession] {
        &self.sessions
    }

    /// Returns mutable access to the pooled sessions.
    pub fn sessions_mut(&mut self) -> &mut [GatewaySession] {
        &mut self.sessions
    }

    /// Returns the number of pooled sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true when the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
