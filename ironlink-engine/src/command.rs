/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Admin commands executed in the worker context.
//!
//! External threads enqueue [`AdminCommand`]s on a bounded SPSC queue; the
//! framer drains the queue at the end of each pass and completes each
//! command's one-shot [`Reply`] slot, which the caller polls through its
//! [`ReplyHandle`].

use ironlink_core::types::{ConnectionId, LibraryId, SessionId, SessionState};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// Snapshot of an attached library returned by `query_libraries`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryView {
    /// The library id.
    pub library_id: LibraryId,
    /// The library's publication channel id.
    pub channel_id: i32,
    /// Connections of the sessions the library manages.
    pub connection_ids: Vec<ConnectionId>,
}

/// Snapshot of a gateway-owned session returned by `gateway_sessions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySessionView {
    /// Id of the carrying connection.
    pub connection_id: ConnectionId,
    /// Session id, when assigned.
    pub session_id: Option<SessionId>,
    /// Remote peer address.
    pub address: String,
    /// Session state.
    pub state: SessionState,
}

/// Commands executed against the framer in worker context.
#[derive(Debug)]
pub enum AdminCommand {
    /// Lists the attached libraries.
    QueryLibraries(Reply<Vec<LibraryView>>),
    /// Lists the gateway-owned sessions.
    GatewaySessions(Reply<Vec<GatewaySessionView>>),
    /// Resets all session ids, optionally writing a backup first.
    ResetSessionIds {
        /// Where to back the current mapping up, if anywhere.
        backup: Option<PathBuf>,
        /// Completion slot.
        reply: Reply<()>,
    },
}

#[derive(Debug)]
enum ReplyState<T> {
    Pending,
    Done(T),
    Failed(String),
}

/// Completion side of a one-shot reply slot.
#[derive(Debug)]
pub struct Reply<T> {
    slot: Arc<Mutex<ReplyState<T>>>,
}

impl<T> Clone for Reply<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Reply<T> {
    /// Completes the reply. Later completions of the same slot are ignored.
    pub fn complete(&self, value: T) {
        let mut slot = self.slot.lock();
        if matches!(*slot, ReplyState::Pending) {
            *slot = ReplyState::Done(value);
        }
    }

    /// Fails the reply with a message.
    pub fn fail(&self, message: impl Into<String>) {
        let mut slot = self.slot.lock();
        if matches!(*slot, ReplyState::Pending) {
            *slot = ReplyState::Failed(message.into());
        }
    }

    /// Returns true once the reply was completed or failed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(*self.slot.lock(), ReplyState::Pending)
    }
}

/// Caller side of a one-shot reply slot.
#[derive(Debug)]
pub struct ReplyHandle<T> {
    slot: Arc<Mutex<ReplyState<T>>>,
}

impl<T> ReplyHandle<T> {
    /// Takes the result if the command has finished.
    ///
    /// Returns `None` while pending, then exactly once `Some(Ok(value))` or
    /// `Some(Err(message))`.
    #[must_use]
    pub fn try_take(&self) -> Option<Result<T, String>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, ReplyState::Pending) {
            ReplyState::Pending => None,
            ReplyState::Done(value) => Some(Ok(value)),
            ReplyState::Failed(message) => Some(Err(message)),
        }
    }
}

/// Creates a connected reply/handle pair.
#[must_use]
pub fn reply_pair<T>() -> (Reply<T>, ReplyHandle<T>) {
    let slot = Arc::new(Mutex::new(ReplyState::Pending));
    (
        Reply {
            slot: Arc::clone(&slot),
        },
        ReplyHandle { slot },
    )
}
