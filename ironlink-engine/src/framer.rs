/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! The framer: single owner of all client-facing sockets.
//!
//! One cooperatively scheduled worker repeatedly invokes
//! [`Framer::do_work`], which performs one bounded, non-blocking pass over
//! every work source:
//!
//! 1. retry steps of in-flight units of work
//! 2. outbound library messages (plus the slow fan-out and position
//!    broadcast)
//! 3. replay messages
//! 4. inbound socket reads
//! 5. accepting new connections
//! 6. library liveness
//! 7. gateway-owned session timers
//! 8. admin commands
//!
//! Retry steps run first so back-pressured work drains before more is
//! enqueued; outbound drains before inbound so pressure is not compounded.
//! All mutable state lives behind this worker; external producers reach it
//! only through bounded SPSC channels and the publication log.

use crate::command::{AdminCommand, GatewaySessionView, LibraryView, Reply, ReplyHandle, reply_pair};
use crate::config::EngineConfiguration;
use crate::endpoint::{
    EndPointHandler, ProtocolMode, ReceiverEndPoint, ReceiverEndPoints, SenderEndPoint,
    SenderEndPoints,
};
use crate::idle::IdleStrategy;
use crate::ids::{MapSessionIds, SenderTargetSessionIdStrategy, SessionIdStrategy, SessionIds};
use crate::ilink::{Ilink3EventDecoder, Ilink3ProxyFactory};
use crate::index::{MemoryReplayQuery, MemorySequenceNumberIndex, ReplayQuery, SequenceNumberIndex};
use crate::library::{LibraryInfo, LivenessDetector};
use crate::publication::{GatewayPublication, MemoryPublication};
use crate::retry::{Action, Continuation, RetryManager, StepResult, UnitOfWork};
use crate::session::{GatewaySession, GatewaySessions};
use crate::subscription::{LibraryEvent, OutboundSubscription, SequenceNumberType};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use ironlink_core::clock::{EpochClock, NanoClock, SystemEpochClock, SystemNanoClock};
use ironlink_core::error::EngineError;
use ironlink_core::types::{
    ConnectionId, ConnectionType, CorrelationId, DisconnectReason, GatewayError, LibraryId,
    LogonStatus, Offer, SessionId, SessionReplyStatus, SessionState, ENGINE_LIBRARY_ID,
    NO_MESSAGE_REPLAY, UNKNOWN_SEQUENCE_NUMBER,
};
use ironlink_session::config::Ilink3SessionConfig;
use ironlink_session::ilink3::{Ilink3Session, Ilink3SessionOwner, Ilink3State};
use ironlink_transport::frame::{FixFrameDecoder, encode_heartbeat};
use ironlink_transport::scan::LogonMessage;
use ironlink_transport::socket::configure_stream;
use ironlink_transport::sofh::SofhFrameDecoder;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, info, trace, warn};

/// Spins of the idle strategy tolerated while awaiting the indexer before
/// proceeding with possibly stale sequence numbers.
const AWAIT_INDEXING_SPIN_LIMIT: u32 = 1_000;

/// Capacity of the SPSC channels created by the builder.
const CHANNEL_CAPACITY: usize = 1024;

/// Receives internal failures the worker must not propagate.
pub trait ErrorHandler {
    /// Reports an error; the worker continues afterwards.
    fn on_error(&mut self, error: &EngineError);
}

/// Default error handler: structured logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn on_error(&mut self, error: &EngineError) {
        tracing::error!(%error, "framer error");
    }
}

/// Wire protocol spoken on a framer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireProtocol {
    Fix,
    Ilink3,
}

/// Immutable copy of the session fields continuation closures need.
#[derive(Debug, Clone)]
struct SessionSnapshot {
    connection_id: ConnectionId,
    session_id: Option<SessionId>,
    address: String,
    connection_type: ConnectionType,
    key: Option<ironlink_core::types::CompositeKey>,
    username: Option<String>,
    password: Option<String>,
    heartbeat_interval_in_s: u32,
    last_sent_sequence_number: i64,
    last_received_sequence_number: i64,
    state: SessionState,
}

impl SessionSnapshot {
    fn of(session: &GatewaySession) -> Self {
        Self {
            connection_id: session.connection_id(),
            session_id: session.session_id(),
            address: session.address().to_string(),
            connection_type: session.connection_type(),
            key: session.key().cloned(),
            username: session.username().map(str::to_string),
            password: session.password().map(str::to_string),
            heartbeat_interval_in_s: session.heartbeat_interval_in_s(),
            last_sent_sequence_number: session.last_sent_sequence_number(),
            last_received_sequence_number: session.last_received_sequence_number(),
            state: session.state(),
        }
    }
}

fn manage_connection_step(
    publication: Rc<dyn GatewayPublication>,
    library_id: LibraryId,
    correlation_id: CorrelationId,
    snapshot: SessionSnapshot,
) -> Continuation {
    Box::new(move || {
        publication
            .save_manage_connection(
                snapshot.connection_id,
                snapshot.session_id,
                &snapshot.address,
                library_id,
                snapshot.connection_type,
                snapshot.last_sent_sequence_number,
                snapshot.last_received_sequence_number,
                snapshot.state,
                snapshot.heartbeat_interval_in_s,
                correlation_id,
            )
            .into()
    })
}

fn save_logon_step(
    publication: Rc<dyn GatewayPublication>,
    library_id: LibraryId,
    snapshot: SessionSnapshot,
    status: LogonStatus,
) -> Continuation {
    Box::new(move || {
        // A session that never logged on has no key and nothing to announce.
        let Some(key) = &snapshot.key else {
            return StepResult::Complete;
        };
        publication
            .save_logon(
                library_id,
                snapshot.connection_id,
                snapshot.session_id,
                snapshot.last_sent_sequence_number,
                snapshot.last_received_sequence_number,
                key,
                snapshot.username.as_deref(),
                snapshot.password.as_deref(),
                status,
            )
            .into()
    })
}

/// Replays archived messages to align a library's view during handover.
struct CatchupReplayer {
    replay_query: Rc<dyn ReplayQuery>,
    publication: Rc<dyn GatewayPublication>,
    library_id: LibraryId,
    connection_id: ConnectionId,
    session_id: SessionId,
    correlation_id: CorrelationId,
    next_sequence_number: i64,
    last_sequence_number: i64,
}

impl CatchupReplayer {
    fn attempt(&mut self) -> StepResult {
        while self.next_sequence_number <= self.last_sequence_number {
            let message = self
                .replay_query
                .message(self.session_id, self.next_sequence_number);
            match message {
                Some(payload) => {
                    let offer = self.publication.save_message(
                        self.library_id,
                        self.connection_id,
                        Some(self.session_id),
                        &payload,
                    );
                    if offer.is_back_pressured() {
                        return StepResult::BackPressured;
                    }
                    self.next_sequence_number += 1;
                }
                None => {
                    warn!(
                        session_id = %self.session_id,
                        sequence_number = self.next_sequence_number,
                        "archived message missing during catch-up"
                    );
                    self.next_sequence_number += 1;
                }
            }
        }

        self.publication
            .save_request_session_reply(SessionReplyStatus::Ok, self.correlation_id)
            .into()
    }
}

/// Lifecycle adapter handed to ILink3 sessions during event handling.
struct SessionOwnerAdapter<'a> {
    outbound_publication: &'a dyn GatewayPublication,
    pending_disconnects: &'a mut Vec<(ConnectionId, DisconnectReason)>,
}

impl Ilink3SessionOwner for SessionOwnerAdapter<'_> {
    fn on_established(&mut self, connection_id: ConnectionId, uuid: u64) {
        info!(%connection_id, uuid, "ilink3 session established");
    }

    fn request_disconnect(
        &mut self,
        library_id: LibraryId,
        connection_id: ConnectionId,
        reason: DisconnectReason,
    ) -> Offer {
        self.pending_disconnects.push((connection_id, reason));
        self.outbound_publication
            .save_request_disconnect(library_id, connection_id, reason)
    }

    fn on_unbind(&mut self, connection_id: ConnectionId, uuid: u64) {
        debug!(%connection_id, uuid, "ilink3 session unbound");
    }
}

/// State shared between the work loop and the endpoint event callbacks.
struct FramerContext {
    epoch_clock: Rc<dyn EpochClock>,
    nano_clock: Rc<dyn NanoClock>,
    inbound_publication: Rc<dyn GatewayPublication>,
    outbound_publication: Rc<dyn GatewayPublication>,
    session_ids: Rc<dyn SessionIds>,
    session_id_strategy: Box<dyn SessionIdStrategy>,
    sent_sequence_number_index: Rc<dyn SequenceNumberIndex>,
    received_sequence_number_index: Rc<dyn SequenceNumberIndex>,
    replay_query: Rc<dyn ReplayQuery>,
    error_handler: Box<dyn ErrorHandler>,
    idle_strategy: Box<dyn IdleStrategy>,
    ilink_proxy_factory: Option<Box<dyn Ilink3ProxyFactory>>,
    ilink_event_decoder: Option<Rc<dyn Ilink3EventDecoder>>,

    sender_end_points: SenderEndPoints,
    gateway_sessions: GatewaySessions,
    id_to_library: HashMap<LibraryId, LibraryInfo>,
    retry_manager: RetryManager,
    ilink_sessions: HashMap<ConnectionId, Ilink3Session>,
    pending_disconnects: Vec<(ConnectionId, DisconnectReason)>,

    no_logon_disconnect_timeout_in_ms: u64,
    reply_timeout_in_ms: u64,
    default_heartbeat_interval_in_s: u32,
    acceptor_sequence_numbers_reset_upon_reconnect: bool,

    failed_catchup_spins: u64,
}

impl FramerContext {
    fn save_error(
        &mut self,
        error: GatewayError,
        library_id: LibraryId,
        reply_to_id: CorrelationId,
        message: &str,
    ) {
        let offer = self
            .inbound_publication
            .save_error(error, library_id, reply_to_id, message);
        if offer.is_back_pressured() {
            let text = if message.is_empty() {
                format!("Back pressured {error} for {library_id}")
            } else {
                format!("Back pressured {error}: {message} for {library_id}")
            };
            self.error_handler.on_error(&EngineError::IllegalState(text));
        }
    }

    /// Attempts a unit of work immediately, queueing it only when incomplete.
    fn schedule(&mut self, mut unit: UnitOfWork) {
        if unit.attempt() == Action::Abort {
            self.retry_manager.schedule(unit);
        }
    }

    /// Spins the idle strategy until the sent-sequence indexer has processed
    /// the channel up to `position`, bounded so a stalled indexer degrades to
    /// stale sequence numbers instead of wedging the worker.
    fn await_indexing_up_to(&mut self, channel_id: i32, position: u64) {
        let mut spins = 0;
        while self.sent_sequence_number_index.indexed_up_to(channel_id) < position {
            if spins >= AWAIT_INDEXING_SPIN_LIMIT {
                self.failed_catchup_spins += 1;
                warn!(channel_id, position, "gave up awaiting the sequence-number indexer");
                return;
            }
            spins += 1;
            self.idle_strategy.idle();
        }
        self.idle_strategy.reset();
    }

    /// Re-acquires every session of a dead library into the gateway pool.
    fn acquire_library_sessions(&mut self, library: &mut LibraryInfo, position: u64) {
        self.await_indexing_up_to(library.channel_id(), position);

        for session in library.take_sessions() {
            let (last_sent, last_received) = match session.session_id() {
                Some(session_id) => (
                    self.sent_sequence_number_index
                        .last_known_sequence_number(session_id),
                    self.received_sequence_number_index
                        .last_known_sequence_number(session_id),
                ),
                None => (UNKNOWN_SEQUENCE_NUMBER, UNKNOWN_SEQUENCE_NUMBER),
            };
            let has_logged_in = last_received != UNKNOWN_SEQUENCE_NUMBER;
            let state = if has_logged_in {
                SessionState::Active
            } else {
                SessionState::Connected
            };

            let heartbeat_interval_in_s = session.heartbeat_interval_in_s();
            let username = session.username().map(str::to_string);
            let password = session.password().map(str::to_string);
            self.gateway_sessions.acquire(
                session,
                state,
                heartbeat_interval_in_s,
                last_sent,
                last_received,
                username,
                password,
            );
        }
    }

    /// Removes every trace of a connection except its receiver endpoint,
    /// which the caller removes from the table it owns.
    fn cleanup_connection(&mut self, connection_id: ConnectionId, reason: DisconnectReason) {
        info!(%connection_id, %reason, "connection closed");
        self.sender_end_points.remove(connection_id);
        self.ilink_sessions.remove(&connection_id);

        let mut removed = None;
        for library in self.id_to_library.values_mut() {
            if let Some(session) = library.remove_session(connection_id) {
                removed = Some(session);
                break;
            }
        }
        let removed =
            removed.or_else(|| self.gateway_sessions.release_by_connection(connection_id));

        if let Some(session) = removed
            && let Some(key) = session.key()
        {
            self.session_ids.on_disconnect(key);
        }
    }

    /// Drives heartbeats and the no-logon disconnect deadline for
    /// gateway-owned sessions.
    fn poll_gateway_sessions(&mut self, time_in_ms: u64) -> usize {
        let mut work = 0;
        let mut expired = Vec::new();

        for session in self.gateway_sessions.sessions_mut() {
            if let Some(deadline) = session.disconnect_deadline_in_ms()
                && time_in_ms >= deadline
            {
                expired.push(session.connection_id());
                continue;
            }

            if session.heartbeat_due(time_in_ms)
                && let (Some(key), Some(begin_string)) = (
                    session.key().cloned(),
                    session.begin_string().map(str::to_string),
                )
            {
                let sequence_number = session.allocate_sent_sequence_number();
                let heartbeat = encode_heartbeat(
                    &begin_string,
                    key.sender_comp_id.as_str(),
                    key.target_comp_id.as_str(),
                    sequence_number as u64,
                    &format_sending_time(time_in_ms),
                );
                session.on_heartbeat_sent(time_in_ms);
                self.sender_end_points
                    .on_message(session.connection_id(), &heartbeat);
                work += 1;
            }
        }

        for connection_id in expired {
            debug!(%connection_id, "no logon before deadline, disconnecting");
            self.pending_disconnects
                .push((connection_id, DisconnectReason::NoLogon));
            work += 1;
        }

        work
    }

    /// Builds the catch-up phase continuations of a session handover.
    #[allow(clippy::too_many_arguments)]
    fn catchup_session(
        &mut self,
        steps: &mut Vec<Continuation>,
        library_id: LibraryId,
        connection_id: ConnectionId,
        correlation_id: CorrelationId,
        replay_from_sequence_number: i64,
        session_id: Option<SessionId>,
        last_received_sequence_number: i64,
    ) {
        let publication = Rc::clone(&self.inbound_publication);

        if replay_from_sequence_number == NO_MESSAGE_REPLAY {
            steps.push(Box::new(move || {
                publication
                    .save_request_session_reply(SessionReplyStatus::Ok, correlation_id)
                    .into()
            }));
            return;
        }

        let Some(session_id) = session_id else {
            steps.push(Box::new(move || {
                publication
                    .save_request_session_reply(
                        SessionReplyStatus::SessionNotLoggedIn,
                        correlation_id,
                    )
                    .into()
            }));
            return;
        };

        let expected_count = last_received_sequence_number - replay_from_sequence_number;
        if expected_count < 0 {
            self.error_handler.on_error(&EngineError::Session(
                ironlink_core::error::SessionError::SequenceNumberTooHigh {
                    correlation_id,
                    wanted: replay_from_sequence_number,
                    archived: last_received_sequence_number,
                },
            ));
            steps.push(Box::new(move || {
                publication
                    .save_request_session_reply(
                        SessionReplyStatus::SequenceNumberTooHigh,
                        correlation_id,
                    )
                    .into()
            }));
            return;
        }

        steps.push(Box::new({
            let publication = Rc::clone(&self.inbound_publication);
            move || {
                publication
                    .save_catchup(library_id, connection_id, expected_count)
                    .into()
            }
        }));

        // The catch-up can only replay what the indexer has already seen.
        steps.push(Box::new({
            let received_index = Rc::clone(&self.received_sequence_number_index);
            move || {
                if received_index.last_known_sequence_number(session_id)
                    < last_received_sequence_number
                {
                    StepResult::BackPressured
                } else {
                    StepResult::Complete
                }
            }
        }));

        let mut replayer = CatchupReplayer {
            replay_query: Rc::clone(&self.replay_query),
            publication: Rc::clone(&self.inbound_publication),
            library_id,
            connection_id,
            session_id,
            correlation_id,
            next_sequence_number: replay_from_sequence_number,
            last_sequence_number: last_received_sequence_number,
        };
        steps.push(Box::new(move || replayer.attempt()));
    }

    fn on_reset_session_ids(&mut self, backup: Option<PathBuf>, reply: Reply<()>) {
        let inbound = Rc::clone(&self.inbound_publication);
        let outbound = Rc::clone(&self.outbound_publication);
        let session_ids = Rc::clone(&self.session_ids);
        let sent_index = Rc::clone(&self.sent_sequence_number_index);
        let received_index = Rc::clone(&self.received_sequence_number_index);
        let reset_reply = reply.clone();
        let done_reply = reply;

        self.schedule(UnitOfWork::new(vec![
            Box::new(move || inbound.save_reset_session_ids().into()),
            Box::new(move || outbound.save_reset_session_ids().into()),
            Box::new(move || {
                if let Err(e) = session_ids.reset(backup.as_deref()) {
                    reset_reply.fail(e.to_string());
                }
                StepResult::Complete
            }),
            Box::new(move || {
                if done_reply.is_done() {
                    return StepResult::Complete;
                }
                // Session ids restart at 1, so the first allocation is the
                // probe for "has anything been indexed since the reset".
                let probe = SessionId::new(1);
                if sent_index.last_known_sequence_number(probe) != UNKNOWN_SEQUENCE_NUMBER
                    || received_index.last_known_sequence_number(probe)
                        != UNKNOWN_SEQUENCE_NUMBER
                {
                    return StepResult::BackPressured;
                }
                done_reply.complete(());
                StepResult::Complete
            }),
        ]));
    }
}

impl EndPointHandler for FramerContext {
    fn on_accept_logon(
        &mut self,
        connection_id: ConnectionId,
        logon: &LogonMessage,
    ) -> Option<SessionId> {
        let key = self.session_id_strategy.on_acceptor_logon(logon);
        let Some(session_id) = self.session_ids.on_logon(&key) else {
            warn!(%connection_id, %key, "duplicate session logon rejected");
            self.save_error(GatewayError::DuplicateSession, ENGINE_LIBRARY_ID, 0, "");
            return None;
        };

        let (last_sent, last_received) = if self.acceptor_sequence_numbers_reset_upon_reconnect {
            (UNKNOWN_SEQUENCE_NUMBER, UNKNOWN_SEQUENCE_NUMBER)
        } else {
            (
                self.sent_sequence_number_index
                    .last_known_sequence_number(session_id),
                self.received_sequence_number_index
                    .last_known_sequence_number(session_id),
            )
        };
        let heartbeat_interval_in_s = logon
            .heart_bt_int
            .unwrap_or(self.default_heartbeat_interval_in_s);

        let snapshot = {
            let session = self
                .gateway_sessions
                .sessions_mut()
                .iter_mut()
                .find(|session| session.connection_id() == connection_id);
            let Some(session) = session else {
                warn!(%connection_id, "logon on a connection without a gateway session");
                self.session_ids.on_disconnect(&key);
                return None;
            };

            session.set_sequence_numbers(last_sent, last_received);
            session.on_logon(
                session_id,
                key,
                Some(logon.begin_string.clone()),
                logon.username.clone(),
                logon.password.clone(),
                heartbeat_interval_in_s,
                logon.msg_seq_num,
            );
            if last_received != UNKNOWN_SEQUENCE_NUMBER {
                session.set_state(SessionState::Active);
            }
            SessionSnapshot::of(session)
        };

        self.schedule(UnitOfWork::new(vec![
            manage_connection_step(
                Rc::clone(&self.inbound_publication),
                ENGINE_LIBRARY_ID,
                0,
                snapshot.clone(),
            ),
            save_logon_step(
                Rc::clone(&self.inbound_publication),
                ENGINE_LIBRARY_ID,
                snapshot,
                LogonStatus::New,
            ),
        ]));

        Some(session_id)
    }

    fn on_ilink_frame(
        &mut self,
        connection_id: ConnectionId,
        template_id: u16,
        frame: &[u8],
    ) -> Action {
        let event = self
            .ilink_event_decoder
            .as_ref()
            .and_then(|decoder| decoder.decode(template_id, frame));

        let Some(event) = event else {
            // A business frame: route it to the owning library untouched.
            let library_id = self
                .ilink_sessions
                .get(&connection_id)
                .map_or(ENGINE_LIBRARY_ID, Ilink3Session::library_id);
            return match self
                .inbound_publication
                .save_message(library_id, connection_id, None, frame)
            {
                Offer::Published(_) => Action::Continue,
                Offer::BackPressured => Action::Abort,
            };
        };

        let Some(mut session) = self.ilink_sessions.remove(&connection_id) else {
            warn!(%connection_id, template_id, "session frame for unknown ilink3 session");
            return Action::Continue;
        };

        let outbound = Rc::clone(&self.outbound_publication);
        let result = {
            let mut owner = SessionOwnerAdapter {
                outbound_publication: &*outbound,
                pending_disconnects: &mut self.pending_disconnects,
            };
            session.on_event(event, &mut owner)
        };
        if let Err(e) = result {
            self.error_handler.on_error(&e);
        }

        if session.state() != Ilink3State::Unbound {
            self.ilink_sessions.insert(connection_id, session);
        }

        Action::Continue
    }

    fn on_end_point_disconnect(&mut self, connection_id: ConnectionId, reason: DisconnectReason) {
        self.cleanup_connection(connection_id, reason);
    }
}

/// The core worker: owns every socket and composes every other component.
pub struct Framer {
    listener: Option<TcpListener>,
    next_connection_id: ConnectionId,
    receiver_end_points: ReceiverEndPoints,
    outbound_subscription: OutboundSubscription,
    slow_subscription: OutboundSubscription,
    replay_subscription: OutboundSubscription,
    admin_commands: Receiver<AdminCommand>,
    outbound_library_fragment_limit: usize,
    replay_fragment_limit: usize,
    inbound_bytes_received_limit: usize,
    receiver_socket_buffer_size: usize,
    sender_socket_buffer_size: usize,
    context: FramerContext,
}

impl Framer {
    /// Starts configuring a framer.
    #[must_use]
    pub fn builder(configuration: EngineConfiguration) -> FramerBuilder {
        FramerBuilder::new(configuration)
    }

    /// Returns the address of the listening socket, when accepting.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Performs one non-blocking pass over all work sources.
    ///
    /// Returns the total units of work performed; the driver idles when this
    /// is zero. Internal failures are routed to the error handler and never
    /// propagate.
    pub fn do_work(&mut self) -> usize {
        let time_in_ms = self.context.epoch_clock.time_millis();

        let mut work = self.context.retry_manager.attempt_steps();
        work += self.send_outbound_messages();
        work += self.send_replay_messages();
        work += self.poll_end_points();
        work += self.poll_new_connections(time_in_ms);
        work += self.poll_libraries(time_in_ms);
        work += self.context.poll_gateway_sessions(time_in_ms);
        work += self.drain_admin_commands();
        work += self.process_pending_disconnects();
        work
    }

    fn mint_connection_id(&mut self) -> ConnectionId {
        let connection_id = self.next_connection_id;
        self.next_connection_id = connection_id.next();
        connection_id
    }

    fn send_outbound_messages(&mut self) -> usize {
        let mut new_messages_read = 0;
        while new_messages_read < self.outbound_library_fragment_limit {
            let Some(event) = self.outbound_subscription.poll_next() else {
                break;
            };
            match self.on_library_event(&event) {
                Action::Continue => new_messages_read += 1,
                Action::Abort => {
                    self.outbound_subscription.push_back(event);
                    break;
                }
            }
        }

        let mut slow_messages_read = 0;
        while slow_messages_read < self.outbound_library_fragment_limit {
            let Some(event) = self.slow_subscription.poll_next() else {
                break;
            };
            if let LibraryEvent::Message { connection_id, .. } = &event {
                self.context.sender_end_points.on_slow_message(*connection_id);
            }
            slow_messages_read += 1;
        }

        if new_messages_read > 0 {
            self.send_positions();
        }

        new_messages_read + slow_messages_read
    }

    /// Broadcasts the consumed outbound position to each per-library image.
    fn send_positions(&mut self) {
        let position = self.outbound_subscription.position();
        for library in self.context.id_to_library.values() {
            let offer = self
                .context
                .inbound_publication
                .save_new_sent_position(library.channel_id(), position);
            if offer.is_back_pressured() {
                trace!(library_id = library.library_id(), "position broadcast pressured");
            }
        }
    }

    fn send_replay_messages(&mut self) -> usize {
        let mut messages_read = 0;
        while messages_read < self.replay_fragment_limit {
            let Some(event) = self.replay_subscription.poll_next() else {
                break;
            };
            match self.on_library_event(&event) {
                Action::Continue => messages_read += 1,
                Action::Abort => {
                    self.replay_subscription.push_back(event);
                    break;
                }
            }
        }
        messages_read
    }

    fn poll_end_points(&mut self) -> usize {
        let inbound_bytes_received_limit = self.inbound_bytes_received_limit;

        let mut total_bytes_received = 0;
        loop {
            let bytes_received = self
                .receiver_end_points
                .poll_end_points(&mut self.context);
            total_bytes_received += bytes_received;
            if bytes_received == 0 || total_bytes_received >= inbound_bytes_received_limit {
                break;
            }
        }

        total_bytes_received
    }

    fn poll_new_connections(&mut self, time_in_ms: u64) -> usize {
        let mut accepted = 0;
        loop {
            let Some(result) = self.listener.as_ref().map(TcpListener::accept) else {
                break;
            };
            match result {
                Ok((socket, peer)) => {
                    self.on_accept(socket, peer, time_in_ms);
                    accepted += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.context
                        .error_handler
                        .on_error(&EngineError::Io(e));
                    break;
                }
            }
        }
        accepted
    }

    fn on_accept(&mut self, socket: TcpStream, peer: SocketAddr, time_in_ms: u64) {
        let connection_id = self.mint_connection_id();
        let address = peer.to_string();

        if let Err(e) = self.setup_connection(
            socket,
            connection_id,
            None,
            ENGINE_LIBRARY_ID,
            ConnectionType::Acceptor,
            WireProtocol::Fix,
            address.clone(),
        ) {
            self.context.error_handler.on_error(&EngineError::Io(e));
            return;
        }

        let mut session =
            GatewaySession::new(connection_id, address.clone(), ConnectionType::Acceptor);
        session.disconnect_at(time_in_ms + self.context.no_logon_disconnect_timeout_in_ms);
        let default_heartbeat = self.context.default_heartbeat_interval_in_s;
        self.context.gateway_sessions.acquire(
            session,
            SessionState::Connected,
            default_heartbeat,
            UNKNOWN_SEQUENCE_NUMBER,
            UNKNOWN_SEQUENCE_NUMBER,
            None,
            None,
        );

        info!(%connection_id, %address, "accepted connection");

        // The connect notice is logged for posterity; under back-pressure it
        // is dropped rather than retried.
        if self
            .context
            .inbound_publication
            .save_connect(connection_id, &address)
            .is_back_pressured()
        {
            self.context
                .error_handler
                .on_error(&EngineError::IllegalState(format!(
                    "Failed to log connect from {address} due to backpressure"
                )));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setup_connection(
        &mut self,
        socket: TcpStream,
        connection_id: ConnectionId,
        session_id: Option<SessionId>,
        library_id: LibraryId,
        connection_type: ConnectionType,
        protocol: WireProtocol,
        address: String,
    ) -> std::io::Result<()> {
        configure_stream(
            &socket,
            self.receiver_socket_buffer_size,
            self.sender_socket_buffer_size,
        )?;
        let write_half = socket.try_clone()?;

        let mode = match protocol {
            WireProtocol::Fix => ProtocolMode::Fix(FixFrameDecoder::new()),
            WireProtocol::Ilink3 => ProtocolMode::Ilink3(SofhFrameDecoder::new()),
        };
        self.receiver_end_points.add(ReceiverEndPoint::new(
            socket,
            connection_id,
            library_id,
            session_id,
            connection_type,
            address,
            mode,
            Rc::clone(&self.context.inbound_publication),
        ));
        self.context
            .sender_end_points
            .add(SenderEndPoint::new(write_half, connection_id));

        Ok(())
    }

    fn on_library_event(&mut self, event: &LibraryEvent) -> Action {
        match event {
            LibraryEvent::InitiateConnection {
                library_id,
                host,
                port,
                sender_comp_id,
                sender_sub_id,
                sender_location_id,
                target_comp_id,
                sequence_number_type,
                username,
                password,
                heartbeat_interval_in_s,
                correlation_id,
            } => self.on_initiate_connection(
                *library_id,
                host,
                *port,
                sender_comp_id,
                sender_sub_id.as_deref(),
                sender_location_id.as_deref(),
                target_comp_id,
                *sequence_number_type,
                username.clone(),
                password.clone(),
                *heartbeat_interval_in_s,
                *correlation_id,
            ),
            LibraryEvent::InitiateIlink3Connection {
                library_id,
                host,
                port,
                config,
                correlation_id,
            } => self.on_initiate_ilink3_connection(*library_id, host, *port, config, *correlation_id),
            LibraryEvent::RequestDisconnect {
                library_id: _,
                connection_id,
            } => {
                self.receiver_end_points.remove(*connection_id);
                self.context
                    .cleanup_connection(*connection_id, DisconnectReason::ApplicationRequest);
                Action::Continue
            }
            LibraryEvent::LibraryConnect {
                library_id,
                correlation_id,
                channel_id,
            } => self.on_library_connect(*library_id, *correlation_id, *channel_id),
            LibraryEvent::ApplicationHeartbeat { library_id } => {
                let time_in_ms = self.context.epoch_clock.time_millis();
                if let Some(library) = self.context.id_to_library.get_mut(library_id) {
                    library.on_heartbeat(time_in_ms);
                }
                Action::Continue
            }
            LibraryEvent::ReleaseSession {
                library_id,
                connection_id,
                correlation_id,
                state,
                heartbeat_interval_in_ms,
                last_sent_sequence_number,
                last_received_sequence_number,
                username,
                password,
            } => self.on_release_session(
                *library_id,
                *connection_id,
                *correlation_id,
                *state,
                *heartbeat_interval_in_ms,
                *last_sent_sequence_number,
                *last_received_sequence_number,
                username.clone(),
                password.clone(),
            ),
            LibraryEvent::RequestSession {
                library_id,
                session_id,
                correlation_id,
                replay_from_sequence_number,
            } => self.on_request_session(
                *library_id,
                *session_id,
                *correlation_id,
                *replay_from_sequence_number,
            ),
            LibraryEvent::Message {
                connection_id,
                payload,
                ..
            } => {
                self.context.sender_end_points.on_message(*connection_id, payload);
                Action::Continue
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_initiate_connection(
        &mut self,
        library_id: LibraryId,
        host: &str,
        port: u16,
        sender_comp_id: &str,
        sender_sub_id: Option<&str>,
        sender_location_id: Option<&str>,
        target_comp_id: &str,
        sequence_number_type: SequenceNumberType,
        username: Option<String>,
        password: Option<String>,
        heartbeat_interval_in_s: u32,
        correlation_id: CorrelationId,
    ) -> Action {
        if let Some(action) = self.context.retry_manager.retry(correlation_id) {
            return action;
        }

        let Some(channel_id) = self
            .context
            .id_to_library
            .get(&library_id)
            .map(LibraryInfo::channel_id)
        else {
            self.context
                .save_error(GatewayError::UnknownLibrary, library_id, correlation_id, "");
            return Action::Continue;
        };

        let address = format!("{host}:{port}");
        let socket = match TcpStream::connect(&address) {
            Ok(socket) => socket,
            Err(e) => {
                self.context.save_error(
                    GatewayError::UnableToConnect,
                    library_id,
                    correlation_id,
                    &e.to_string(),
                );
                return Action::Continue;
            }
        };

        let key = self.context.session_id_strategy.on_initiate_logon(
            sender_comp_id,
            sender_sub_id,
            sender_location_id,
            target_comp_id,
        );
        let Some(key) = key else {
            self.context.save_error(
                GatewayError::Exception,
                library_id,
                correlation_id,
                "comp id too long",
            );
            return Action::Continue;
        };
        let Some(session_id) = self.context.session_ids.on_logon(&key) else {
            self.context.save_error(
                GatewayError::DuplicateSession,
                library_id,
                correlation_id,
                "",
            );
            return Action::Continue;
        };

        let connection_id = self.mint_connection_id();
        if let Err(e) = self.setup_connection(
            socket,
            connection_id,
            Some(session_id),
            library_id,
            ConnectionType::Initiator,
            WireProtocol::Fix,
            address.clone(),
        ) {
            self.context.session_ids.on_disconnect(&key);
            self.context.save_error(
                GatewayError::Exception,
                library_id,
                correlation_id,
                &e.to_string(),
            );
            return Action::Continue;
        }

        let position = self.outbound_subscription.position();
        self.context.await_indexing_up_to(channel_id, position);

        let (last_sent, last_received) =
            if sequence_number_type == SequenceNumberType::Transient {
                (UNKNOWN_SEQUENCE_NUMBER, UNKNOWN_SEQUENCE_NUMBER)
            } else {
                (
                    self.context
                        .sent_sequence_number_index
                        .last_known_sequence_number(session_id),
                    self.context
                        .received_sequence_number_index
                        .last_known_sequence_number(session_id),
                )
            };

        let mut session =
            GatewaySession::new(connection_id, address, ConnectionType::Initiator);
        session.set_sequence_numbers(last_sent, last_received);
        session.on_logon(
            session_id,
            key,
            None,
            username,
            password,
            heartbeat_interval_in_s,
            UNKNOWN_SEQUENCE_NUMBER,
        );
        let snapshot = SessionSnapshot::of(&session);

        if let Some(library) = self.context.id_to_library.get_mut(&library_id) {
            library.add_session(session);
        }

        let unit = UnitOfWork::new(vec![
            manage_connection_step(
                Rc::clone(&self.context.inbound_publication),
                library_id,
                correlation_id,
                snapshot.clone(),
            ),
            save_logon_step(
                Rc::clone(&self.context.inbound_publication),
                library_id,
                snapshot,
                LogonStatus::New,
            ),
        ]);
        self.context.retry_manager.first_attempt(correlation_id, unit)
    }

    fn on_initiate_ilink3_connection(
        &mut self,
        library_id: LibraryId,
        host: &str,
        port: u16,
        config: &Ilink3SessionConfig,
        correlation_id: CorrelationId,
    ) -> Action {
        if !self.context.id_to_library.contains_key(&library_id) {
            self.context
                .save_error(GatewayError::UnknownLibrary, library_id, correlation_id, "");
            return Action::Continue;
        }
        if self.context.ilink_proxy_factory.is_none() {
            self.context.save_error(
                GatewayError::Exception,
                library_id,
                correlation_id,
                "no ilink3 proxy factory configured",
            );
            return Action::Continue;
        }

        let address = format!("{host}:{port}");
        let socket = match TcpStream::connect(&address) {
            Ok(socket) => socket,
            Err(e) => {
                self.context.save_error(
                    GatewayError::UnableToConnect,
                    library_id,
                    correlation_id,
                    &e.to_string(),
                );
                return Action::Continue;
            }
        };

        let connection_id = self.mint_connection_id();
        if let Err(e) = self.setup_connection(
            socket,
            connection_id,
            None,
            library_id,
            ConnectionType::Initiator,
            WireProtocol::Ilink3,
            address.clone(),
        ) {
            self.context.save_error(
                GatewayError::Exception,
                library_id,
                correlation_id,
                &e.to_string(),
            );
            return Action::Continue;
        }

        let Some(proxy) = self
            .context
            .ilink_proxy_factory
            .as_ref()
            .map(|factory| factory.new_proxy(connection_id))
        else {
            return Action::Continue;
        };

        let session = Ilink3Session::connect(
            config.clone(),
            connection_id,
            library_id,
            proxy,
            Rc::clone(&self.context.epoch_clock),
            Rc::clone(&self.context.nano_clock),
        );
        match session {
            Ok(session) => {
                self.context.ilink_sessions.insert(connection_id, session);

                let publication = Rc::clone(&self.context.inbound_publication);
                self.context.schedule(UnitOfWork::new(vec![Box::new(move || {
                    publication
                        .save_manage_connection(
                            connection_id,
                            None,
                            &address,
                            library_id,
                            ConnectionType::Initiator,
                            UNKNOWN_SEQUENCE_NUMBER,
                            UNKNOWN_SEQUENCE_NUMBER,
                            SessionState::Connected,
                            0,
                            correlation_id,
                        )
                        .into()
                })]));
                Action::Continue
            }
            Err(e) => {
                self.receiver_end_points.remove(connection_id);
                self.context.sender_end_points.remove(connection_id);
                self.context.save_error(
                    GatewayError::Exception,
                    library_id,
                    correlation_id,
                    &e.to_string(),
                );
                Action::Continue
            }
        }
    }

    fn on_library_connect(
        &mut self,
        library_id: LibraryId,
        correlation_id: CorrelationId,
        channel_id: i32,
    ) -> Action {
        if let Some(action) = self.context.retry_manager.retry(correlation_id) {
            return action;
        }

        if self.context.id_to_library.contains_key(&library_id) {
            self.context.save_error(
                GatewayError::DuplicateLibraryId,
                library_id,
                correlation_id,
                "",
            );
            return Action::Continue;
        }

        let time_in_ms = self.context.epoch_clock.time_millis();
        let liveness = LivenessDetector::new(self.context.reply_timeout_in_ms, time_in_ms);
        self.context
            .id_to_library
            .insert(library_id, LibraryInfo::new(library_id, channel_id, liveness));
        info!(library_id, channel_id, "library connected");

        // Tell the new library about the sessions the gateway already holds.
        let steps: Vec<Continuation> = self
            .context
            .gateway_sessions
            .sessions()
            .iter()
            .map(|session| {
                let mut snapshot = SessionSnapshot::of(session);
                snapshot.last_sent_sequence_number = UNKNOWN_SEQUENCE_NUMBER;
                snapshot.last_received_sequence_number = UNKNOWN_SEQUENCE_NUMBER;
                save_logon_step(
                    Rc::clone(&self.context.inbound_publication),
                    library_id,
                    snapshot,
                    LogonStatus::LibraryNotification,
                )
            })
            .collect();

        self.context
            .retry_manager
            .first_attempt(correlation_id, UnitOfWork::new(steps))
    }

    #[allow(clippy::too_many_arguments)]
    fn on_release_session(
        &mut self,
        library_id: LibraryId,
        connection_id: ConnectionId,
        correlation_id: CorrelationId,
        state: SessionState,
        heartbeat_interval_in_ms: u64,
        last_sent_sequence_number: i64,
        last_received_sequence_number: i64,
        username: Option<String>,
        password: Option<String>,
    ) -> Action {
        let Some(library) = self.context.id_to_library.get_mut(&library_id) else {
            return pressure(self.context.inbound_publication.save_release_session_reply(
                SessionReplyStatus::UnknownLibrary,
                correlation_id,
            ));
        };

        let Some(session) = library.remove_session(connection_id) else {
            return pressure(self.context.inbound_publication.save_release_session_reply(
                SessionReplyStatus::UnknownSession,
                correlation_id,
            ));
        };

        let offer = self
            .context
            .inbound_publication
            .save_release_session_reply(SessionReplyStatus::Ok, correlation_id);
        if offer.is_back_pressured() {
            // Atomic from the library's view: the session stays with it until
            // the reply lands.
            library.add_session(session);
            return Action::Abort;
        }

        self.receiver_end_points
            .set_library(connection_id, ENGINE_LIBRARY_ID);
        self.context.gateway_sessions.acquire(
            session,
            state,
            (heartbeat_interval_in_ms / 1_000) as u32,
            last_sent_sequence_number,
            last_received_sequence_number,
            username,
            password,
        );
        Action::Continue
    }

    fn on_request_session(
        &mut self,
        library_id: LibraryId,
        session_id: SessionId,
        correlation_id: CorrelationId,
        replay_from_sequence_number: i64,
    ) -> Action {
        if let Some(action) = self.context.retry_manager.retry(correlation_id) {
            return action;
        }

        if !self.context.id_to_library.contains_key(&library_id) {
            return pressure(self.context.inbound_publication.save_request_session_reply(
                SessionReplyStatus::UnknownLibrary,
                correlation_id,
            ));
        }

        let Some(session) = self.context.gateway_sessions.release(session_id) else {
            return pressure(self.context.inbound_publication.save_request_session_reply(
                SessionReplyStatus::UnknownSession,
                correlation_id,
            ));
        };

        let snapshot = SessionSnapshot::of(&session);
        let connection_id = session.connection_id();

        self.receiver_end_points.set_library(connection_id, library_id);
        match self.context.id_to_library.get_mut(&library_id) {
            Some(library) => library.add_session(session),
            None => {
                // The library vanished between the check and the move.
                self.context.gateway_sessions.acquire(
                    session,
                    snapshot.state,
                    snapshot.heartbeat_interval_in_s,
                    snapshot.last_sent_sequence_number,
                    snapshot.last_received_sequence_number,
                    None,
                    None,
                );
                return pressure(self.context.inbound_publication.save_request_session_reply(
                    SessionReplyStatus::UnknownLibrary,
                    correlation_id,
                ));
            }
        }

        let mut steps: Vec<Continuation> = vec![
            manage_connection_step(
                Rc::clone(&self.context.inbound_publication),
                library_id,
                correlation_id,
                snapshot.clone(),
            ),
            save_logon_step(
                Rc::clone(&self.context.inbound_publication),
                library_id,
                snapshot.clone(),
                LogonStatus::New,
            ),
        ];
        self.context.catchup_session(
            &mut steps,
            library_id,
            connection_id,
            correlation_id,
            replay_from_sequence_number,
            snapshot.session_id,
            snapshot.last_received_sequence_number,
        );

        self.context
            .retry_manager
            .first_attempt(correlation_id, UnitOfWork::new(steps))
    }

    fn poll_libraries(&mut self, time_in_ms: u64) -> usize {
        let dead: Vec<LibraryId> = self
            .context
            .id_to_library
            .iter()
            .filter(|(_, library)| !library.is_connected(time_in_ms))
            .map(|(library_id, _)| *library_id)
            .collect();

        let mut work = 0;
        for library_id in dead {
            let Some(mut library) = self.context.id_to_library.remove(&library_id) else {
                continue;
            };
            warn!(library_id, "library timed out, re-acquiring its sessions");

            for session in library.sessions() {
                self.receiver_end_points
                    .set_library(session.connection_id(), ENGINE_LIBRARY_ID);
            }
            let position = self.outbound_subscription.position();
            self.context.acquire_library_sessions(&mut library, position);
            work += 1;
        }
        work
    }

    fn drain_admin_commands(&mut self) -> usize {
        let mut work = 0;
        while let Ok(command) = self.admin_commands.try_recv() {
            self.on_admin_command(command);
            work += 1;
        }
        work
    }

    fn on_admin_command(&mut self, command: AdminCommand) {
        match command {
            AdminCommand::QueryLibraries(reply) => {
                let views = self
                    .context
                    .id_to_library
                    .values()
                    .map(|library| LibraryView {
                        library_id: library.library_id(),
                        channel_id: library.channel_id(),
                        connection_ids: library
                            .sessions()
                            .iter()
                            .map(GatewaySession::connection_id)
                            .collect(),
                    })
                    .collect();
                reply.complete(views);
            }
            AdminCommand::GatewaySessions(reply) => {
                let views = self
                    .context
                    .gateway_sessions
                    .sessions()
                    .iter()
                    .map(|session| GatewaySessionView {
                        connection_id: session.connection_id(),
                        session_id: session.session_id(),
                        address: session.address().to_string(),
                        state: session.state(),
                    })
                    .collect();
                reply.complete(views);
            }
            AdminCommand::ResetSessionIds { backup, reply } => {
                self.context.on_reset_session_ids(backup, reply);
            }
        }
    }

    fn process_pending_disconnects(&mut self) -> usize {
        let pending = std::mem::take(&mut self.context.pending_disconnects);
        let work = pending.len();
        for (connection_id, reason) in pending {
            self.receiver_end_points.remove(connection_id);
            self.context.cleanup_connection(connection_id, reason);
        }
        work
    }
}

fn pressure(offer: Offer) -> Action {
    if offer.is_back_pressured() {
        Action::Abort
    } else {
        Action::Continue
    }
}

fn format_sending_time(time_in_ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(time_in_ms as i64)
        .map(|dt| dt.format("%Y%m%d-%H:%M:%S%.3f").to_string())
        .unwrap_or_default()
}

/// Library-facing handle to a built framer: event streams plus admin
/// commands. Cloneable and usable from other threads.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    library_events: Sender<LibraryEvent>,
    slow_events: Sender<LibraryEvent>,
    replay_events: Sender<LibraryEvent>,
    admin_commands: Sender<AdminCommand>,
}

impl GatewayHandle {
    /// Offers an event on the outbound library stream.
    pub fn offer(&self, event: LibraryEvent) -> bool {
        self.library_events.try_send(event).is_ok()
    }

    /// Offers an event on the slow fan-out stream.
    pub fn offer_slow(&self, event: LibraryEvent) -> bool {
        self.slow_events.try_send(event).is_ok()
    }

    /// Offers an event on the replay stream.
    pub fn offer_replay(&self, event: LibraryEvent) -> bool {
        self.replay_events.try_send(event).is_ok()
    }

    /// Asks the framer for the attached libraries.
    #[must_use]
    pub fn query_libraries(&self) -> ReplyHandle<Vec<LibraryView>> {
        let (reply, handle) = reply_pair();
        if let Err(e) = self.admin_commands.try_send(AdminCommand::QueryLibraries(reply)) {
            fail_admin(e);
        }
        handle
    }

    /// Asks the framer for the gateway-owned sessions.
    #[must_use]
    pub fn gateway_sessions(&self) -> ReplyHandle<Vec<GatewaySessionView>> {
        let (reply, handle) = reply_pair();
        if let Err(e) = self
            .admin_commands
            .try_send(AdminCommand::GatewaySessions(reply))
        {
            fail_admin(e);
        }
        handle
    }

    /// Asks the framer to reset all session ids.
    #[must_use]
    pub fn reset_session_ids(&self, backup: Option<PathBuf>) -> ReplyHandle<()> {
        let (reply, handle) = reply_pair();
        if let Err(e) = self
            .admin_commands
            .try_send(AdminCommand::ResetSessionIds { backup, reply })
        {
            fail_admin(e);
        }
        handle
    }
}

fn fail_admin(error: TrySendError<AdminCommand>) {
    match error.into_inner() {
        AdminCommand::QueryLibraries(reply) => reply.fail("admin command queue full"),
        AdminCommand::GatewaySessions(reply) => reply.fail("admin command queue full"),
        AdminCommand::ResetSessionIds { reply, .. } => reply.fail("admin command queue full"),
    }
}

/// Configures and builds a [`Framer`] plus its [`GatewayHandle`].
pub struct FramerBuilder {
    configuration: EngineConfiguration,
    inbound_publication: Option<Rc<dyn GatewayPublication>>,
    outbound_publication: Option<Rc<dyn GatewayPublication>>,
    session_ids: Option<Rc<dyn SessionIds>>,
    session_id_strategy: Option<Box<dyn SessionIdStrategy>>,
    sent_sequence_number_index: Option<Rc<dyn SequenceNumberIndex>>,
    received_sequence_number_index: Option<Rc<dyn SequenceNumberIndex>>,
    replay_query: Option<Rc<dyn ReplayQuery>>,
    error_handler: Option<Box<dyn ErrorHandler>>,
    epoch_clock: Option<Rc<dyn EpochClock>>,
    nano_clock: Option<Rc<dyn NanoClock>>,
    ilink_proxy_factory: Option<Box<dyn Ilink3ProxyFactory>>,
    ilink_event_decoder: Option<Rc<dyn Ilink3EventDecoder>>,
}

impl FramerBuilder {
    /// Starts a builder from an engine configuration.
    #[must_use]
    pub fn new(configuration: EngineConfiguration) -> Self {
        Self {
            configuration,
            inbound_publication: None,
            outbound_publication: None,
            session_ids: None,
            session_id_strategy: None,
            sent_sequence_number_index: None,
            received_sequence_number_index: None,
            replay_query: None,
            error_handler: None,
            epoch_clock: None,
            nano_clock: None,
            ilink_proxy_factory: None,
            ilink_event_decoder: None,
        }
    }

    /// Sets the inbound publication (gateway → libraries).
    #[must_use]
    pub fn with_inbound_publication(mut self, publication: Rc<dyn GatewayPublication>) -> Self {
        self.inbound_publication = Some(publication);
        self
    }

    /// Sets the outbound publication (gateway control markers).
    #[must_use]
    pub fn with_outbound_publication(mut self, publication: Rc<dyn GatewayPublication>) -> Self {
        self.outbound_publication = Some(publication);
        self
    }

    /// Sets the session-id allocator.
    #[must_use]
    pub fn with_session_ids(mut self, session_ids: Rc<dyn SessionIds>) -> Self {
        self.session_ids = Some(session_ids);
        self
    }

    /// Sets the composite-key strategy.
    #[must_use]
    pub fn with_session_id_strategy(mut self, strategy: Box<dyn SessionIdStrategy>) -> Self {
        self.session_id_strategy = Some(strategy);
        self
    }

    /// Sets the sent sequence-number index.
    #[must_use]
    pub fn with_sent_sequence_number_index(mut self, index: Rc<dyn SequenceNumberIndex>) -> Self {
        self.sent_sequence_number_index = Some(index);
        self
    }

    /// Sets the received sequence-number index.
    #[must_use]
    pub fn with_received_sequence_number_index(
        mut self,
        index: Rc<dyn SequenceNumberIndex>,
    ) -> Self {
        self.received_sequence_number_index = Some(index);
        self
    }

    /// Sets the replay query used during catch-up.
    #[must_use]
    pub fn with_replay_query(mut self, replay_query: Rc<dyn ReplayQuery>) -> Self {
        self.replay_query = Some(replay_query);
        self
    }

    /// Sets the error handler.
    #[must_use]
    pub fn with_error_handler(mut self, error_handler: Box<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(error_handler);
        self
    }

    /// Sets the wall clock.
    #[must_use]
    pub fn with_epoch_clock(mut self, clock: Rc<dyn EpochClock>) -> Self {
        self.epoch_clock = Some(clock);
        self
    }

    /// Sets the monotonic clock.
    #[must_use]
    pub fn with_nano_clock(mut self, clock: Rc<dyn NanoClock>) -> Self {
        self.nano_clock = Some(clock);
        self
    }

    /// Sets the ILink3 encoding factory.
    #[must_use]
    pub fn with_ilink_proxy_factory(mut self, factory: Box<dyn Ilink3ProxyFactory>) -> Self {
        self.ilink_proxy_factory = Some(factory);
        self
    }

    /// Sets the ILink3 event decoder.
    #[must_use]
    pub fn with_ilink_event_decoder(mut self, decoder: Rc<dyn Ilink3EventDecoder>) -> Self {
        self.ilink_event_decoder = Some(decoder);
        self
    }

    /// Builds the framer and its library-facing handle.
    ///
    /// # Errors
    /// Returns [`EngineError::Io`] when the bind address cannot be bound.
    pub fn build(self) -> Result<(Framer, GatewayHandle), EngineError> {
        let configuration = self.configuration;

        let listener = match configuration.bind_address {
            Some(address) => {
                let listener = TcpListener::bind(address)?;
                listener.set_nonblocking(true)?;
                Some(listener)
            }
            None => None,
        };

        let (library_events_tx, library_events_rx) = bounded(CHANNEL_CAPACITY);
        let (slow_events_tx, slow_events_rx) = bounded(CHANNEL_CAPACITY);
        let (replay_events_tx, replay_events_rx) = bounded(CHANNEL_CAPACITY);
        let (admin_tx, admin_rx) = bounded(CHANNEL_CAPACITY);

        let context = FramerContext {
            epoch_clock: self
                .epoch_clock
                .unwrap_or_else(|| Rc::new(SystemEpochClock)),
            nano_clock: self
                .nano_clock
                .unwrap_or_else(|| Rc::new(SystemNanoClock::new())),
            inbound_publication: self
                .inbound_publication
                .unwrap_or_else(|| Rc::new(MemoryPublication::default())),
            outbound_publication: self
                .outbound_publication
                .unwrap_or_else(|| Rc::new(MemoryPublication::default())),
            session_ids: self
                .session_ids
                .unwrap_or_else(|| Rc::new(MapSessionIds::new())),
            session_id_strategy: self
                .session_id_strategy
                .unwrap_or_else(|| Box::new(SenderTargetSessionIdStrategy)),
            sent_sequence_number_index: self
                .sent_sequence_number_index
                .unwrap_or_else(|| Rc::new(MemorySequenceNumberIndex::new())),
            received_sequence_number_index: self
                .received_sequence_number_index
                .unwrap_or_else(|| Rc::new(MemorySequenceNumberIndex::new())),
            replay_query: self
                .replay_query
                .unwrap_or_else(|| Rc::new(MemoryReplayQuery::new())),
            error_handler: self
                .error_handler
                .unwrap_or_else(|| Box::new(LoggingErrorHandler)),
            idle_strategy: configuration.framer_idle_strategy,
            ilink_proxy_factory: self.ilink_proxy_factory,
            ilink_event_decoder: self.ilink_event_decoder,
            sender_end_points: SenderEndPoints::new(),
            gateway_sessions: GatewaySessions::new(),
            id_to_library: HashMap::new(),
            retry_manager: RetryManager::new(),
            ilink_sessions: HashMap::new(),
            pending_disconnects: Vec::new(),
            no_logon_disconnect_timeout_in_ms: configuration.no_logon_disconnect_timeout_in_ms,
            reply_timeout_in_ms: configuration.reply_timeout_in_ms,
            default_heartbeat_interval_in_s: configuration.default_heartbeat_interval_in_s,
            acceptor_sequence_numbers_reset_upon_reconnect: configuration
                .acceptor_sequence_numbers_reset_upon_reconnect,
            failed_catchup_spins: 0,
        };

        let framer = Framer {
            listener,
            next_connection_id: ConnectionId::new(rand::random::<u64>()),
            receiver_end_points: ReceiverEndPoints::new(),
            outbound_subscription: OutboundSubscription::new(library_events_rx),
            slow_subscription: OutboundSubscription::new(slow_events_rx),
            replay_subscription: OutboundSubscription::new(replay_events_rx),
            admin_commands: admin_rx,
            outbound_library_fragment_limit: configuration.outbound_library_fragment_limit,
            replay_fragment_limit: configuration.replay_fragment_limit,
            inbound_bytes_received_limit: configuration.inbound_bytes_received_limit,
            receiver_socket_buffer_size: configuration.receiver_socket_buffer_size,
            sender_socket_buffer_size: configuration.sender_socket_buffer_size,
            context,
        };

        let handle = GatewayHandle {
            library_events: library_events_tx,
            slow_events: slow_events_tx,
            replay_events: replay_events_tx,
            admin_commands: admin_tx,
        };

        Ok((framer, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idle::BusySpinIdleStrategy;
    use crate::publication::PublishedFrame;
    use ironlink_core::clock::ManualClock;
    use ironlink_session::ilink3::{Ilink3Event, Ilink3Proxy};
    use ironlink_session::signing::SIGNATURE_LEN;
    use ironlink_transport::frame::calculate_checksum;
    use ironlink_transport::sofh::encode_sofh;
    use std::cell::{Cell, RefCell};
    use std::io::Write;
    use std::time::Duration;

    const T0: u64 = 1_000_000;
    const ZERO_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    struct RecordingErrorHandler {
        errors: Rc<RefCell<Vec<String>>>,
    }

    impl ErrorHandler for RecordingErrorHandler {
        fn on_error(&mut self, error: &EngineError) {
            self.errors.borrow_mut().push(error.to_string());
        }
    }

    struct Harness {
        framer: Framer,
        handle: GatewayHandle,
        publication: Rc<MemoryPublication>,
        outbound_publication: Rc<MemoryPublication>,
        clock: Rc<ManualClock>,
        sent_index: Rc<MemorySequenceNumberIndex>,
        received_index: Rc<MemorySequenceNumberIndex>,
        replay_query: Rc<MemoryReplayQuery>,
        errors: Rc<RefCell<Vec<String>>>,
    }

    fn configuration() -> EngineConfiguration {
        EngineConfiguration::new()
            .with_bind_address("127.0.0.1:0".parse().unwrap())
            .with_reply_timeout_in_ms(1_000)
            .with_no_logon_disconnect_timeout_in_ms(3_600_000)
            .with_framer_idle_strategy(Box::new(BusySpinIdleStrategy))
    }

    fn harness() -> Harness {
        harness_of(Framer::builder(configuration()))
    }

    fn harness_of(builder: FramerBuilder) -> Harness {
        let publication = Rc::new(MemoryPublication::new(1024));
        let outbound_publication = Rc::new(MemoryPublication::new(1024));
        let clock = Rc::new(ManualClock::new(T0));
        let sent_index = Rc::new(MemorySequenceNumberIndex::new());
        let received_index = Rc::new(MemorySequenceNumberIndex::new());
        let replay_query = Rc::new(MemoryReplayQuery::new());
        let errors = Rc::new(RefCell::new(Vec::new()));

        let (framer, handle) = builder
            .with_inbound_publication(Rc::clone(&publication) as Rc<dyn GatewayPublication>)
            .with_outbound_publication(
                Rc::clone(&outbound_publication) as Rc<dyn GatewayPublication>
            )
            .with_epoch_clock(Rc::clone(&clock) as Rc<dyn EpochClock>)
            .with_nano_clock(Rc::clone(&clock) as Rc<dyn NanoClock>)
            .with_sent_sequence_number_index(
                Rc::clone(&sent_index) as Rc<dyn SequenceNumberIndex>
            )
            .with_received_sequence_number_index(
                Rc::clone(&received_index) as Rc<dyn SequenceNumberIndex>
            )
            .with_replay_query(Rc::clone(&replay_query) as Rc<dyn ReplayQuery>)
            .with_error_handler(Box::new(RecordingErrorHandler {
                errors: Rc::clone(&errors),
            }))
            .build()
            .unwrap();

        Harness {
            framer,
            handle,
            publication,
            outbound_publication,
            clock,
            sent_index,
            received_index,
            replay_query,
            errors,
        }
    }

    fn work_until(framer: &mut Framer, mut done: impl FnMut() -> bool) {
        for _ in 0..2_000 {
            framer.do_work();
            if done() {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached");
    }

    /// Pumps the framer until `count` frames (ignoring position broadcasts)
    /// have been published, and returns them in order.
    fn collect_frames(
        framer: &mut Framer,
        publication: &MemoryPublication,
        count: usize,
    ) -> Vec<PublishedFrame> {
        let mut collected = Vec::new();
        for _ in 0..2_000 {
            framer.do_work();
            collected.extend(
                publication
                    .drain()
                    .into_iter()
                    .filter(|frame| !matches!(frame, PublishedFrame::NewSentPosition { .. })),
            );
            if collected.len() >= count {
                return collected;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("only {} of {count} frames arrived: {collected:?}", collected.len());
    }

    fn admin<T>(framer: &mut Framer, reply: ReplyHandle<T>) -> T {
        for _ in 0..2_000 {
            framer.do_work();
            if let Some(result) = reply.try_take() {
                return result.unwrap();
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("admin command did not complete");
    }

    fn fix_message(body: &str) -> Vec<u8> {
        let header = format!("8=FIX.4.4\x019={}\x01", body.len());
        let without_checksum = format!("{header}{body}");
        let checksum = calculate_checksum(without_checksum.as_bytes());
        format!("{without_checksum}10={checksum:03}\x01").into_bytes()
    }

    fn logon_message(sender: &str, target: &str) -> Vec<u8> {
        fix_message(&format!(
            "35=A\x0134=1\x0149={sender}\x0156={target}\x01108=30\x01553=bob\x01554=pw\x01"
        ))
    }

    fn library_connect(library_id: LibraryId, correlation_id: CorrelationId) -> LibraryEvent {
        LibraryEvent::LibraryConnect {
            library_id,
            correlation_id,
            channel_id: 10,
        }
    }

    fn request_session(
        library_id: LibraryId,
        session_id: u64,
        correlation_id: CorrelationId,
    ) -> LibraryEvent {
        LibraryEvent::RequestSession {
            library_id,
            session_id: SessionId::new(session_id),
            correlation_id,
            replay_from_sequence_number: NO_MESSAGE_REPLAY,
        }
    }

    #[test]
    fn test_accept_logon_request_and_release_session() {
        let mut h = harness();
        let addr = h.framer.local_addr().unwrap();

        assert!(h.handle.offer(library_connect(1, 7)));
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(&logon_message("CLIENT", "GATEWAY")).unwrap();

        let frames = collect_frames(&mut h.framer, &h.publication, 3);
        assert!(matches!(frames[0], PublishedFrame::Connect { .. }));
        let connection_id = match &frames[1] {
            PublishedFrame::ManageConnection {
                connection_id,
                library_id: ENGINE_LIBRARY_ID,
                session_id: Some(session_id),
                ..
            } if *session_id == SessionId::new(1) => *connection_id,
            other => panic!("expected a gateway manage connection, got {other:?}"),
        };
        assert!(matches!(
            &frames[2],
            PublishedFrame::Logon {
                library_id: ENGINE_LIBRARY_ID,
                status: LogonStatus::New,
                ..
            }
        ));

        // The library acquires the session.
        assert!(h.handle.offer(request_session(1, 1, 42)));
        let frames = collect_frames(&mut h.framer, &h.publication, 3);
        assert!(matches!(
            &frames[0],
            PublishedFrame::ManageConnection {
                library_id: 1,
                correlation_id: 42,
                ..
            }
        ));
        assert!(matches!(
            &frames[1],
            PublishedFrame::Logon {
                library_id: 1,
                status: LogonStatus::New,
                ..
            }
        ));
        assert!(matches!(
            frames[2],
            PublishedFrame::RequestSessionReply {
                status: SessionReplyStatus::Ok,
                correlation_id: 42,
            }
        ));

        // And releases it back.
        assert!(h.handle.offer(LibraryEvent::ReleaseSession {
            library_id: 1,
            connection_id,
            correlation_id: 43,
            state: SessionState::Active,
            heartbeat_interval_in_ms: 30_000,
            last_sent_sequence_number: 1,
            last_received_sequence_number: 1,
            username: None,
            password: None,
        }));
        let frames = collect_frames(&mut h.framer, &h.publication, 1);
        assert!(matches!(
            frames[0],
            PublishedFrame::ReleaseSessionReply {
                status: SessionReplyStatus::Ok,
                correlation_id: 43,
            }
        ));

        let sessions = admin(&mut h.framer, h.handle.gateway_sessions());
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, SessionState::Active);
    }

    #[test]
    fn test_duplicate_library_connect_is_rejected() {
        let mut h = harness();

        assert!(h.handle.offer(library_connect(7, 1)));
        assert!(h.handle.offer(library_connect(7, 1)));

        let frames = collect_frames(&mut h.framer, &h.publication, 1);
        assert!(matches!(
            &frames[0],
            PublishedFrame::Error {
                error: GatewayError::DuplicateLibraryId,
                library_id: 7,
                reply_to_id: 1,
                message,
            } if message.is_empty()
        ));
    }

    #[test]
    fn test_back_pressured_connect_notice_is_dropped_not_fatal() {
        let mut h = harness();
        let addr = h.framer.local_addr().unwrap();

        h.publication.fill_to_capacity();
        let _client = TcpStream::connect(addr).unwrap();

        work_until(&mut h.framer, || !h.errors.borrow().is_empty());
        {
            let errors = h.errors.borrow();
            assert!(
                errors
                    .iter()
                    .any(|e| e.contains("due to backpressure") && e.contains("127.0.0.1")),
                "unexpected errors: {errors:?}"
            );
        }

        // The accept completed anyway.
        let _ = h.publication.drain();
        let sessions = admin(&mut h.framer, h.handle.gateway_sessions());
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, SessionState::Connected);
    }

    #[test]
    fn test_library_timeout_reacquires_sessions() {
        let mut h = harness();
        let addr = h.framer.local_addr().unwrap();

        assert!(h.handle.offer(library_connect(1, 7)));
        let mut first = TcpStream::connect(addr).unwrap();
        first.write_all(&logon_message("CLIENT1", "GATEWAY")).unwrap();
        let mut second = TcpStream::connect(addr).unwrap();
        second.write_all(&logon_message("CLIENT2", "GATEWAY")).unwrap();
        let _ = collect_frames(&mut h.framer, &h.publication, 6);

        assert!(h.handle.offer(request_session(1, 1, 100)));
        assert!(h.handle.offer(request_session(1, 2, 101)));
        let _ = collect_frames(&mut h.framer, &h.publication, 6);
        assert!(admin(&mut h.framer, h.handle.gateway_sessions()).is_empty());

        // Both sessions have prior logons according to the indices.
        h.received_index.set_sequence_number(SessionId::new(1), 5);
        h.received_index.set_sequence_number(SessionId::new(2), 9);
        h.sent_index.set_sequence_number(SessionId::new(1), 4);
        h.sent_index.set_sequence_number(SessionId::new(2), 8);
        h.sent_index.set_indexed_up_to(10, u64::MAX);

        h.clock.advance_millis(1_001);
        h.framer.do_work();

        assert!(admin(&mut h.framer, h.handle.query_libraries()).is_empty());
        let sessions = admin(&mut h.framer, h.handle.gateway_sessions());
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| s.state == SessionState::Active));

        // Re-acquired exactly once.
        h.clock.advance_millis(5_000);
        h.framer.do_work();
        assert_eq!(admin(&mut h.framer, h.handle.gateway_sessions()).len(), 2);
    }

    #[test]
    fn test_heartbeat_keeps_library_alive() {
        let mut h = harness();

        assert!(h.handle.offer(library_connect(1, 7)));
        h.framer.do_work();

        h.clock.advance_millis(900);
        assert!(h
            .handle
            .offer(LibraryEvent::ApplicationHeartbeat { library_id: 1 }));
        h.framer.do_work();

        // Within the refreshed deadline the library survives.
        h.clock.advance_millis(900);
        h.framer.do_work();
        assert_eq!(admin(&mut h.framer, h.handle.query_libraries()).len(), 1);

        // Past it the library is removed.
        h.clock.advance_millis(1_001);
        h.framer.do_work();
        assert!(admin(&mut h.framer, h.handle.query_libraries()).is_empty());
    }

    #[test]
    fn test_initiate_connection() {
        let mut h = harness();
        let exchange = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = exchange.local_addr().unwrap().port();

        assert!(h.handle.offer(library_connect(2, 1)));
        h.sent_index.set_indexed_up_to(10, u64::MAX);

        assert!(h.handle.offer(LibraryEvent::InitiateConnection {
            library_id: 2,
            host: "127.0.0.1".to_string(),
            port,
            sender_comp_id: "GW".to_string(),
            sender_sub_id: None,
            sender_location_id: None,
            target_comp_id: "CME".to_string(),
            sequence_number_type: SequenceNumberType::Persistent,
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            heartbeat_interval_in_s: 30,
            correlation_id: 55,
        }));

        let frames = collect_frames(&mut h.framer, &h.publication, 2);
        assert!(matches!(
            &frames[0],
            PublishedFrame::ManageConnection {
                library_id: 2,
                connection_type: ConnectionType::Initiator,
                correlation_id: 55,
                session_id: Some(_),
                ..
            }
        ));
        assert!(matches!(
            &frames[1],
            PublishedFrame::Logon {
                library_id: 2,
                status: LogonStatus::New,
                ..
            }
        ));

        let libraries = admin(&mut h.framer, h.handle.query_libraries());
        assert_eq!(libraries.len(), 1);
        assert_eq!(libraries[0].connection_ids.len(), 1);

        // An unknown library cannot initiate.
        assert!(h.handle.offer(LibraryEvent::InitiateConnection {
            library_id: 9,
            host: "127.0.0.1".to_string(),
            port,
            sender_comp_id: "GW".to_string(),
            sender_sub_id: None,
            sender_location_id: None,
            target_comp_id: "CME".to_string(),
            sequence_number_type: SequenceNumberType::Persistent,
            username: None,
            password: None,
            heartbeat_interval_in_s: 30,
            correlation_id: 56,
        }));
        let frames = collect_frames(&mut h.framer, &h.publication, 1);
        assert!(matches!(
            frames[0],
            PublishedFrame::Error {
                error: GatewayError::UnknownLibrary,
                library_id: 9,
                reply_to_id: 56,
                ..
            }
        ));
    }

    #[test]
    fn test_request_session_sequence_number_too_high() {
        let mut h = harness();
        let addr = h.framer.local_addr().unwrap();

        assert!(h.handle.offer(library_connect(1, 7)));
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(&logon_message("CLIENT", "GATEWAY")).unwrap();
        let _ = collect_frames(&mut h.framer, &h.publication, 3);

        // The logon left last-received at 1; replaying from 5 is beyond it.
        assert!(h.handle.offer(LibraryEvent::RequestSession {
            library_id: 1,
            session_id: SessionId::new(1),
            correlation_id: 42,
            replay_from_sequence_number: 5,
        }));

        let frames = collect_frames(&mut h.framer, &h.publication, 3);
        assert!(matches!(
            frames[2],
            PublishedFrame::RequestSessionReply {
                status: SessionReplyStatus::SequenceNumberTooHigh,
                correlation_id: 42,
            }
        ));
        assert!(h
            .errors
            .borrow()
            .iter()
            .any(|e| e.contains("sequence number too high")));
    }

    #[test]
    fn test_request_session_with_catchup() {
        let mut h = harness();
        let addr = h.framer.local_addr().unwrap();

        // The indexer already knows this session's last received number.
        h.received_index.set_sequence_number(SessionId::new(1), 1);
        h.replay_query
            .insert(SessionId::new(1), 1, b"35=8\x01".to_vec());

        assert!(h.handle.offer(library_connect(1, 7)));
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(&logon_message("CLIENT", "GATEWAY")).unwrap();
        let _ = collect_frames(&mut h.framer, &h.publication, 3);

        assert!(h.handle.offer(LibraryEvent::RequestSession {
            library_id: 1,
            session_id: SessionId::new(1),
            correlation_id: 42,
            replay_from_sequence_number: 1,
        }));

        let frames = collect_frames(&mut h.framer, &h.publication, 5);
        assert!(matches!(
            frames[2],
            PublishedFrame::Catchup {
                library_id: 1,
                expected_count: 0,
                ..
            }
        ));
        assert!(matches!(
            &frames[3],
            PublishedFrame::Message { payload, .. } if payload == b"35=8\x01"
        ));
        assert!(matches!(
            frames[4],
            PublishedFrame::RequestSessionReply {
                status: SessionReplyStatus::Ok,
                correlation_id: 42,
            }
        ));
    }

    #[test]
    fn test_endpoint_tables_stay_in_parity() {
        let mut h = harness();
        let addr = h.framer.local_addr().unwrap();

        let first = TcpStream::connect(addr).unwrap();
        let _second = TcpStream::connect(addr).unwrap();

        for _ in 0..2_000 {
            h.framer.do_work();
            if h.framer.receiver_end_points.len() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(h.framer.receiver_end_points.len(), 2);
        assert_eq!(h.framer.context.sender_end_points.len(), 2);
        assert_eq!(h.framer.context.gateway_sessions.len(), 2);

        drop(first);
        for _ in 0..2_000 {
            h.framer.do_work();
            if h.framer.receiver_end_points.len() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(h.framer.receiver_end_points.len(), 1);
        assert_eq!(h.framer.context.sender_end_points.len(), 1);
        assert_eq!(h.framer.context.gateway_sessions.len(), 1);
    }

    #[test]
    fn test_reset_session_ids() {
        let mut h = harness();

        let reply = h.handle.reset_session_ids(None);
        admin(&mut h.framer, reply);

        assert!(h
            .publication
            .drain()
            .iter()
            .any(|f| matches!(f, PublishedFrame::ResetSessionIds)));
        assert!(h
            .outbound_publication
            .drain()
            .iter()
            .any(|f| matches!(f, PublishedFrame::ResetSessionIds)));
    }

    struct StubProxy {
        sent: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Ilink3Proxy for StubProxy {
        fn send_negotiate(
            &mut self,
            _hmac_signature: &[u8; SIGNATURE_LEN],
            _access_key_id: &str,
            _uuid: u64,
            _request_timestamp: u64,
            _session_id: &str,
            _firm_id: &str,
        ) -> Offer {
            self.sent.borrow_mut().push("negotiate");
            Offer::Published(1)
        }

        fn send_establish(
            &mut self,
            _hmac_signature: &[u8; SIGNATURE_LEN],
            _access_key_id: &str,
            _trading_system_name: &str,
            _trading_system_vendor: &str,
            _trading_system_version: &str,
            _uuid: u64,
            _request_timestamp: u64,
            _next_sent_seq_no: u64,
            _session_id: &str,
            _firm_id: &str,
            _keep_alive_interval: u32,
        ) -> Offer {
            self.sent.borrow_mut().push("establish");
            Offer::Published(1)
        }

        fn send_terminate(
            &mut self,
            _reason: &str,
            _uuid: u64,
            _request_timestamp: u64,
            _error_codes: u16,
        ) -> Offer {
            self.sent.borrow_mut().push("terminate");
            Offer::Published(1)
        }

        fn claim_message(&mut self, _block_length: usize) -> Offer {
            Offer::Published(1)
        }

        fn commit(&mut self) {}
    }

    struct StubFactory {
        sent: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Ilink3ProxyFactory for StubFactory {
        fn new_proxy(&self, _connection_id: ConnectionId) -> Box<dyn Ilink3Proxy> {
            Box::new(StubProxy {
                sent: Rc::clone(&self.sent),
            })
        }
    }

    struct StubDecoder {
        uuid: Rc<Cell<u64>>,
    }

    impl Ilink3EventDecoder for StubDecoder {
        fn decode(&self, template_id: u16, _frame: &[u8]) -> Option<Ilink3Event> {
            (template_id == 501).then(|| Ilink3Event::NegotiationResponse {
                uuid: self.uuid.get(),
                request_timestamp: 1,
                secret_key_secure_id_expiration: 365,
                previous_seq_no: 0,
                previous_uuid: 0,
            })
        }
    }

    #[test]
    fn test_ilink3_negotiate_round_trip() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let uuid_slot = Rc::new(Cell::new(0_u64));
        let builder = Framer::builder(configuration())
            .with_ilink_proxy_factory(Box::new(StubFactory {
                sent: Rc::clone(&sent),
            }))
            .with_ilink_event_decoder(Rc::new(StubDecoder {
                uuid: Rc::clone(&uuid_slot),
            }));
        let mut h = harness_of(builder);

        let exchange = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = exchange.local_addr().unwrap().port();

        assert!(h.handle.offer(library_connect(3, 1)));
        assert!(h.handle.offer(LibraryEvent::InitiateIlink3Connection {
            library_id: 3,
            host: "127.0.0.1".to_string(),
            port,
            config: Ilink3SessionConfig::new("ABC", "FIRM", "KEY_ID", ZERO_KEY),
            correlation_id: 9,
        }));

        work_until(&mut h.framer, || sent.borrow().contains(&"negotiate"));
        let uuid = h
            .framer
            .context
            .ilink_sessions
            .values()
            .next()
            .unwrap()
            .uuid();
        uuid_slot.set(uuid);

        // The exchange accepts the negotiation.
        let (mut server, _) = exchange.accept().unwrap();
        let mut body = Vec::new();
        body.extend_from_slice(&0_u16.to_le_bytes());
        body.extend_from_slice(&501_u16.to_le_bytes());
        body.extend_from_slice(&8_u16.to_le_bytes());
        body.extend_from_slice(&5_u16.to_le_bytes());
        server.write_all(&encode_sofh(&body)).unwrap();

        work_until(&mut h.framer, || sent.borrow().contains(&"establish"));
        let session = h.framer.context.ilink_sessions.values().next().unwrap();
        assert_eq!(session.state(), Ilink3State::SentEstablish);
    }
}
