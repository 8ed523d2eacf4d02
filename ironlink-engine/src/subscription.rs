/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Outbound library stream subscription.
//!
//! Libraries hand work to the framer over bounded lock-free SPSC channels.
//! [`OutboundSubscription`] wraps the consumer side with a one-slot pushback
//! buffer: a fragment whose handler aborts (back-pressure downstream) is
//! stashed and redelivered on the next pass, so no event is ever lost.

use crossbeam_channel::{Receiver, TryRecvError};
use ironlink_core::types::{
    ConnectionId, CorrelationId, LibraryId, SessionId, SessionState,
};
use ironlink_session::config::Ilink3SessionConfig;

/// Whether an initiated session's sequence numbers survive reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceNumberType {
    /// Sequence numbers reset on every connect.
    Transient,
    /// Sequence numbers continue from the index.
    Persistent,
}

/// Events read from the outbound library stream.
#[derive(Debug, Clone)]
pub enum LibraryEvent {
    /// A library asks the gateway to open a FIX connection to a counterparty.
    InitiateConnection {
        /// The requesting library.
        library_id: LibraryId,
        /// Counterparty host.
        host: String,
        /// Counterparty port.
        port: u16,
        /// SenderCompID for the new session.
        sender_comp_id: String,
        /// Optional SenderSubID.
        sender_sub_id: Option<String>,
        /// Optional SenderLocationID.
        sender_location_id: Option<String>,
        /// TargetCompID for the new session.
        target_comp_id: String,
        /// Sequence number policy.
        sequence_number_type: SequenceNumberType,
        /// Username for the logon.
        username: Option<String>,
        /// Password for the logon.
        password: Option<String>,
        /// Heartbeat interval in seconds.
        heartbeat_interval_in_s: u32,
        /// Correlation id for the reply.
        correlation_id: CorrelationId,
    },
    /// A library asks the gateway to open an ILink3 connection to CME.
    InitiateIlink3Connection {
        /// The requesting library.
        library_id: LibraryId,
        /// Exchange gateway host.
        host: String,
        /// Exchange gateway port.
        port: u16,
        /// Session credentials and options.
        config: Ilink3SessionConfig,
        /// Correlation id for the reply.
        correlation_id: CorrelationId,
    },
    /// A library asks for a connection to be closed.
    RequestDisconnect {
        /// The requesting library.
        library_id: LibraryId,
        /// Connection to close.
        connection_id: ConnectionId,
    },
    /// A library registers with the gateway.
    LibraryConnect {
        /// The connecting library.
        library_id: LibraryId,
        /// Correlation id for the reply.
        correlation_id: CorrelationId,
        /// The library's publication channel id.
        channel_id: i32,
    },
    /// Periodic liveness signal from a library.
    ApplicationHeartbeat {
        /// The heartbeating library.
        library_id: LibraryId,
    },
    /// A library returns a session to the gateway pool.
    ReleaseSession {
        /// The releasing library.
        library_id: LibraryId,
        /// Connection carrying the session.
        connection_id: ConnectionId,
        /// Correlation id for the reply.
        correlation_id: CorrelationId,
        /// Session state at release.
        state: SessionState,
        /// Heartbeat interval in milliseconds.
        heartbeat_interval_in_ms: u64,
        /// Last sent sequence number.
        last_sent_sequence_number: i64,
        /// Last received sequence number.
        last_received_sequence_number: i64,
        /// Username, when known.
        username: Option<String>,
        /// Password, when known.
        password: Option<String>,
    },
    /// A library acquires a gateway-owned session.
    RequestSession {
        /// The requesting library.
        library_id: LibraryId,
        /// The wanted session.
        session_id: SessionId,
        /// Correlation id for the reply.
        correlation_id: CorrelationId,
        /// First sequence number to replay, or
        /// [`ironlink_core::types::NO_MESSAGE_REPLAY`].
        replay_from_sequence_number: i64,
    },
    /// A pre-encoded per-session message to write to a connection.
    Message {
        /// The sending library.
        library_id: LibraryId,
        /// Target connection.
        connection_id: ConnectionId,
        /// Session the message belongs to, when known.
        session_id: Option<SessionId>,
        /// The encoded message bytes.
        payload: Vec<u8>,
    },
}

/// Consumer side of an outbound library stream.
#[derive(Debug)]
pub struct OutboundSubscription {
    receiver: Receiver<LibraryEvent>,
    pending: Option<LibraryEvent>,
    position: u64,
}

impl OutboundSubscription {
    /// Wraps a channel receiver.
    #[must_use]
    pub fn new(receiver: Receiver<LibraryEvent>) -> Self {
        Self {
            receiver,
            pending: None,
            position: 0,
        }
    }

    /// Returns the next event, preferring a pushed-back one.
    ///
    /// Consuming an event advances the stream position; push the event back
    /// via [`OutboundSubscription::push_back`] if its handler aborts.
    pub fn poll_next(&mut self) -> Option<LibraryEvent> {
        if let Some(event) = self.pending.take() {
            return Some(event);
        }
        match self.receiver.try_recv() {
            Ok(event) => {
                self.position += 1;
                Some(event)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Stashes an unconsumed event for redelivery on the next pass.
    pub fn push_back(&mut self, event: LibraryEvent) {
        debug_assert!(self.pending.is_none());
        self.pending = Some(event);
    }

    /// Returns the stream position after the last read fragment.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_poll_next_advances_position() {
        let (tx, rx) = bounded(4);
        let mut subscription = OutboundSubscription::new(rx);
        assert!(subscription.poll_next().is_none());

        tx.send(LibraryEvent::ApplicationHeartbeat { library_id: 1 })
            .unwrap();
        tx.send(LibraryEvent::ApplicationHeartbeat { library_id: 2 })
            .unwrap();

        assert!(subscription.poll_next().is_some());
        assert_eq!(subscription.position(), 1);
        assert!(subscription.poll_next().is_some());
        assert_eq!(subscription.position(), 2);
    }

    #[test]
    fn test_push_back_redelivers_without_advancing() {
        let (tx, rx) = bounded(4);
        let mut subscription = OutboundSubscription::new(rx);
        tx.send(LibraryEvent::ApplicationHeartbeat { library_id: 7 })
            .unwrap();

        let event = subscription.poll_next().unwrap();
        subscription.push_back(event);
        assert_eq!(subscription.position(), 1);

        let redelivered = subscription.poll_next().unwrap();
        assert!(matches!(
            redelivered,
            LibraryEvent::ApplicationHeartbeat { library_id: 7 }
        ));
        assert_eq!(subscription.position(), 1);
    }
}
