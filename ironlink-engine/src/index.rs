/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! External collaborator interfaces: sequence-number indices and the replay
//! query engine.
//!
//! The persistent indices and the archive are maintained outside the core
//! worker; only their read interfaces are specified here. The in-memory
//! implementations back embedding and tests, following the same
//! trait-plus-memory-impl pattern as the publication.

use ironlink_core::types::{SessionId, UNKNOWN_SEQUENCE_NUMBER};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Read side of a persistent per-session sequence-number index.
pub trait SequenceNumberIndex {
    /// Returns the last known sequence number for a session, or
    /// [`UNKNOWN_SEQUENCE_NUMBER`] if the session was never indexed.
    fn last_known_sequence_number(&self, session_id: SessionId) -> i64;

    /// Returns the publication position the indexer has processed up to for
    /// a library channel.
    fn indexed_up_to(&self, channel_id: i32) -> u64;
}

/// In-memory sequence-number index.
#[derive(Debug, Default)]
pub struct MemorySequenceNumberIndex {
    sequence_numbers: RefCell<HashMap<SessionId, i64>>,
    positions: RefCell<HashMap<i32, u64>>,
}

impl MemorySequenceNumberIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the last known sequence number for a session.
    pub fn set_sequence_number(&self, session_id: SessionId, sequence_number: i64) {
        self.sequence_numbers
            .borrow_mut()
            .insert(session_id, sequence_number);
    }

    /// Records the indexed position of a library channel.
    pub fn set_indexed_up_to(&self, channel_id: i32, position: u64) {
        self.positions.borrow_mut().insert(channel_id, position);
    }

    /// Clears the index, as the external indexer does after a reset marker.
    pub fn reset(&self) {
        self.sequence_numbers.borrow_mut().clear();
        self.positions.borrow_mut().clear();
    }
}

impl SequenceNumberIndex for MemorySequenceNumberIndex {
    fn last_known_sequence_number(&self, session_id: SessionId) -> i64 {
        self.sequence_numbers
            .borrow()
            .get(&session_id)
            .copied()
            .unwrap_or(UNKNOWN_SEQUENCE_NUMBER)
    }

    fn indexed_up_to(&self, channel_id: i32) -> u64 {
        self.positions
            .borrow()
            .get(&channel_id)
            .copied()
            .unwrap_or(0)
    }
}

/// Read side of the archived-message store used during catch-up.
pub trait ReplayQuery {
    /// Returns the archived message with the given sequence number, if any.
    fn message(&self, session_id: SessionId, sequence_number: i64) -> Option<Vec<u8>>;
}

/// In-memory replay archive.
#[derive(Debug, Default)]
pub struct MemoryReplayQuery {
    messages: RefCell<HashMap<(SessionId, i64), Vec<u8>>>,
    queries: Cell<usize>,
}

impl MemoryReplayQuery {
    /// Creates an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a message under `(session_id, sequence_number)`.
    pub fn insert(&self, session_id: SessionId, sequence_number: i64, payload: Vec<u8>) {
        self.messages
            .borrow_mut()
            .insert((session_id, sequence_number), payload);
    }

    /// Returns the number of lookups performed.
    #[must_use]
    pub fn queries(&self) -> usize {
        self.queries.get()
    }
}

impl ReplayQuery for MemoryReplayQuery {
    fn message(&self, session_id: SessionId, sequence_number: i64) -> Option<Vec<u8>> {
        self.queries.set(self.queries.get() + 1);
        self.messages
            .borrow()
            .get(&(session_id, sequence_number))
            .cloned()
    }
}
