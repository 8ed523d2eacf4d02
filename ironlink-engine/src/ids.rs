/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Session-id allocation and the composite-key strategy.
//!
//! The durable session-id store is an external collaborator; [`SessionIds`]
//! is its interface and [`MapSessionIds`] the in-memory implementation. The
//! [`SessionIdStrategy`] decides how logon fields map onto a
//! [`CompositeKey`].

use ironlink_core::error::EngineError;
use ironlink_core::types::{CompId, CompositeKey, SessionId};
use ironlink_transport::scan::LogonMessage;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

/// Allocator of session ids keyed by composite key.
///
/// Methods take `&self`: the worker is single-threaded, and the allocator is
/// shared into retry continuations, so implementations use interior
/// mutability.
pub trait SessionIds {
    /// Assigns (or looks up) the session id for a logging-on key.
    ///
    /// Returns `None` when the key is already bound to a live connection — a
    /// duplicate session.
    fn on_logon(&self, key: &CompositeKey) -> Option<SessionId>;

    /// Releases the key of a disconnected session.
    fn on_disconnect(&self, key: &CompositeKey);

    /// Forgets all id assignments, optionally writing a backup first.
    ///
    /// # Errors
    /// Returns [`EngineError`] when the backup cannot be written.
    fn reset(&self, backup: Option<&Path>) -> Result<(), EngineError>;
}

/// In-memory session-id allocator. Ids start at 1 and are stable per key
/// until reset.
#[derive(Debug, Default)]
pub struct MapSessionIds {
    inner: RefCell<MapSessionIdsInner>,
}

#[derive(Debug, Default)]
struct MapSessionIdsInner {
    key_to_id: HashMap<CompositeKey, SessionId>,
    live: HashSet<CompositeKey>,
    next_id: u64,
}

impl MapSessionIds {
    /// Creates an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(MapSessionIdsInner {
                key_to_id: HashMap::new(),
                live: HashSet::new(),
                next_id: 1,
            }),
        }
    }
}

impl SessionIds for MapSessionIds {
    fn on_logon(&self, key: &CompositeKey) -> Option<SessionId> {
        let mut inner = self.inner.borrow_mut();

        if inner.live.contains(key) {
            return None;
        }

        let session_id = match inner.key_to_id.get(key) {
            Some(&id) => id,
            None => {
                let id = SessionId::new(inner.next_id);
                inner.next_id += 1;
                inner.key_to_id.insert(key.clone(), id);
                id
            }
        };
        inner.live.insert(key.clone());

        Some(session_id)
    }

    fn on_disconnect(&self, key: &CompositeKey) {
        self.inner.borrow_mut().live.remove(key);
    }

    fn reset(&self, backup: Option<&Path>) -> Result<(), EngineError> {
        if let Some(backup) = backup {
            info!(backup = %backup.display(), "session ids reset requested with backup");
        }
        let mut inner = self.inner.borrow_mut();
        inner.key_to_id.clear();
        inner.live.clear();
        inner.next_id = 1;
        Ok(())
    }
}

/// Derives composite keys from logon fields.
pub trait SessionIdStrategy {
    /// Key for a connection the gateway initiates with the given ids.
    fn on_initiate_logon(
        &self,
        sender_comp_id: &str,
        sender_sub_id: Option<&str>,
        sender_location_id: Option<&str>,
        target_comp_id: &str,
    ) -> Option<CompositeKey>;

    /// Key for a logon received on an accepted connection.
    fn on_acceptor_logon(&self, logon: &LogonMessage) -> CompositeKey;
}

/// Default strategy keyed on sender and target comp ids.
///
/// On the acceptor side the ids are flipped so the key is expressed from the
/// gateway's point of view.
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderTargetSessionIdStrategy;

impl SessionIdStrategy for SenderTargetSessionIdStrategy {
    fn on_initiate_logon(
        &self,
        sender_comp_id: &str,
        sender_sub_id: Option<&str>,
        sender_location_id: Option<&str>,
        target_comp_id: &str,
    ) -> Option<CompositeKey> {
        let mut key = CompositeKey::new(CompId::new(sender_comp_id)?, CompId::new(target_comp_id)?);
        if let Some(sub_id) = sender_sub_id {
            key = key.with_sender_sub_id(CompId::new(sub_id)?);
        }
        if let Some(location_id) = sender_location_id {
            key = key.with_sender_location_id(CompId::new(location_id)?);
        }
        Some(key)
    }

    fn on_acceptor_logon(&self, logon: &LogonMessage) -> CompositeKey {
        let mut key =
            CompositeKey::new(logon.target_comp_id.clone(), logon.sender_comp_id.clone());
        if let Some(sub_id) = &logon.sender_sub_id {
            key = key.with_sender_sub_id(sub_id.clone());
        }
        if let Some(location_id) = &logon.sender_location_id {
            key = key.with_sender_location_id(location_id.clone());
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(sender: &str, target: &str) -> CompositeKey {
        CompositeKey::new(CompId::new(sender).unwrap(), CompId::new(target).unwrap())
    }

    #[test]
    fn test_ids_are_stable_per_key() {
        let ids = MapSessionIds::new();
        let first = ids.on_logon(&key("A", "B")).unwrap();

        ids.on_disconnect(&key("A", "B"));
        let again = ids.on_logon(&key("A", "B")).unwrap();
        assert_eq!(first, again);

        let other = ids.on_logon(&key("C", "D")).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_duplicate_logon_rejected() {
        let ids = MapSessionIds::new();
        assert!(ids.on_logon(&key("A", "B")).is_some());
        assert!(ids.on_logon(&key("A", "B")).is_none());

        ids.on_disconnect(&key("A", "B"));
        assert!(ids.on_logon(&key("A", "B")).is_some());
    }

    #[test]
    fn test_reset_restarts_allocation() {
        let ids = MapSessionIds::new();
        let before = ids.on_logon(&key("A", "B")).unwrap();

        ids.reset(None).unwrap();
        let after = ids.on_logon(&key("C", "D")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_acceptor_strategy_flips_comp_ids() {
        let frame = b"8=FIX.4.4\x019=30\x0135=A\x0134=1\x0149=CLIENT\x0156=GATEWAY\x0110=000\x01";
        let logon = LogonMessage::scan(frame).unwrap();

        let key = SenderTargetSessionIdStrategy.on_acceptor_logon(&logon);
        assert_eq!(key.sender_comp_id.as_str(), "GATEWAY");
        assert_eq!(key.target_comp_id.as_str(), "CLIENT");
    }

    #[test]
    fn test_initiate_strategy() {
        let key = SenderTargetSessionIdStrategy
            .on_initiate_logon("GW", Some("DESK"), None, "CME")
            .unwrap();
        assert_eq!(key.sender_comp_id.as_str(), "GW");
        assert_eq!(key.sender_sub_id.as_ref().map(CompId::as_str), Some("DESK"));
        assert_eq!(key.target_comp_id.as_str(), "CME");
    }
}
