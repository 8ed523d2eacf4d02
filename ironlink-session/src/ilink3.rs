/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! ILink3 session state machine.
//!
//! Drives the negotiate/establish/terminate handshake of the CME ILink3
//! binary protocol. The session owns no socket: outgoing messages go through
//! an [`Ilink3Proxy`] (the SBE encoding layer) and lifecycle notifications go
//! to an [`Ilink3SessionOwner`] passed by reference into each event handler,
//! so no reference cycle with the framer exists.
//!
//! ```text
//! CONNECTED ──send_negotiate──▶ SENT_NEGOTIATE
//! SENT_NEGOTIATE ──on_negotiation_response──▶ NEGOTIATED ──send_establish──▶ SENT_ESTABLISH
//! SENT_NEGOTIATE ──reject──▶ NEGOTIATE_REJECTED
//! SENT_ESTABLISH ──on_establishment_ack──▶ ESTABLISHED
//! SENT_ESTABLISH ──reject──▶ ESTABLISH_REJECTED
//! ESTABLISHED ──terminate──▶ UNBINDING ──on_terminate──▶ UNBOUND
//! ESTABLISHED ──on_terminate (peer)──▶ (echo terminate) ──▶ UNBOUND
//! ```

use crate::config::{Ilink3SessionConfig, AUTOMATIC_INITIAL_SEQUENCE_NUMBER};
use crate::signing::{establish_canonical, negotiate_canonical, sign_request, SIGNATURE_LEN};
use ironlink_core::clock::{EpochClock, NanoClock};
use ironlink_core::error::{EngineError, SessionError};
use ironlink_core::types::{ConnectionId, DisconnectReason, LibraryId, Offer};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

const MICROS_IN_MILLIS: u64 = 1_000;
const NANOS_IN_MICROS: u64 = 1_000;
const NANOS_IN_MILLIS: u64 = MICROS_IN_MILLIS * NANOS_IN_MICROS;

/// Protocol state of an ILink3 session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ilink3State {
    /// TCP connection established, Negotiate not sent.
    Connected,
    /// Negotiate sent but no reply received.
    SentNegotiate,
    /// Negotiate was rejected by the exchange. Terminal.
    NegotiateRejected,
    /// Negotiate accepted, Establish not sent.
    Negotiated,
    /// Negotiate accepted, Establish sent.
    SentEstablish,
    /// Establish was rejected by the exchange. Terminal.
    EstablishRejected,
    /// Establish accepted, messages can be exchanged.
    Established,
    /// We initiated termination and await the peer's Terminate.
    Unbinding,
    /// A Terminate was sent and the session lingers before unbinding.
    SentTerminate,
    /// The session is unbound. Terminal.
    Unbound,
}

impl Ilink3State {
    /// Returns true for states from which no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::NegotiateRejected | Self::EstablishRejected | Self::Unbound
        )
    }
}

impl fmt::Display for Ilink3State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "CONNECTED",
            Self::SentNegotiate => "SENT_NEGOTIATE",
            Self::NegotiateRejected => "NEGOTIATE_REJECTED",
            Self::Negotiated => "NEGOTIATED",
            Self::SentEstablish => "SENT_ESTABLISH",
            Self::EstablishRejected => "ESTABLISH_REJECTED",
            Self::Established => "ESTABLISHED",
            Self::Unbinding => "UNBINDING",
            Self::SentTerminate => "SENT_TERMINATE",
            Self::Unbound => "UNBOUND",
        };
        write!(f, "{name}")
    }
}

/// Encoding side of the session: claims and sends SBE-encoded ILink3
/// messages. Implemented by the codec layer.
pub trait Ilink3Proxy {
    /// Sends a Negotiate request.
    #[allow(clippy::too_many_arguments)]
    fn send_negotiate(
        &mut self,
        hmac_signature: &[u8; SIGNATURE_LEN],
        access_key_id: &str,
        uuid: u64,
        request_timestamp: u64,
        session_id: &str,
        firm_id: &str,
    ) -> Offer;

    /// Sends an Establish request.
    #[allow(clippy::too_many_arguments)]
    fn send_establish(
        &mut self,
        hmac_signature: &[u8; SIGNATURE_LEN],
        access_key_id: &str,
        trading_system_name: &str,
        trading_system_vendor: &str,
        trading_system_version: &str,
        uuid: u64,
        request_timestamp: u64,
        next_sent_seq_no: u64,
        session_id: &str,
        firm_id: &str,
        keep_alive_interval: u32,
    ) -> Offer;

    /// Sends a Terminate.
    fn send_terminate(
        &mut self,
        reason: &str,
        uuid: u64,
        request_timestamp: u64,
        error_codes: u16,
    ) -> Offer;

    /// Claims space for a business message of the given block length.
    fn claim_message(&mut self, block_length: usize) -> Offer;

    /// Commits the previously claimed message.
    fn commit(&mut self);
}

/// Lifecycle callbacks from the session to whoever owns it.
///
/// Passed by reference into each event handler rather than stored, so the
/// session cannot form a reference cycle with the framer that holds it.
pub trait Ilink3SessionOwner {
    /// The session reached [`Ilink3State::Established`].
    fn on_established(&mut self, connection_id: ConnectionId, uuid: u64);

    /// The session asks for its socket to be disconnected.
    fn request_disconnect(
        &mut self,
        library_id: LibraryId,
        connection_id: ConnectionId,
        reason: DisconnectReason,
    ) -> Offer;

    /// The session unbound and should be removed from its registry.
    fn on_unbind(&mut self, connection_id: ConnectionId, uuid: u64);
}

/// Session-layer events decoded from inbound ILink3 frames by the SBE codec
/// layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Ilink3Event {
    /// Negotiation accepted.
    NegotiationResponse {
        /// UUID echoed by the exchange.
        uuid: u64,
        /// Exchange request timestamp.
        request_timestamp: u64,
        /// Days until the secret key expires.
        secret_key_secure_id_expiration: u32,
        /// Last sequence number of the previous UUID's stream.
        previous_seq_no: u64,
        /// The previous UUID, if any.
        previous_uuid: u64,
    },
    /// Negotiation rejected.
    NegotiationReject {
        /// Human-readable reason.
        reason: String,
        /// UUID echoed by the exchange.
        uuid: u64,
        /// Exchange request timestamp.
        request_timestamp: u64,
        /// Error code bitfield.
        error_codes: u16,
    },
    /// Establishment accepted.
    EstablishmentAck {
        /// UUID echoed by the exchange.
        uuid: u64,
        /// Exchange request timestamp.
        request_timestamp: u64,
        /// Next sequence number the exchange will send.
        next_seq_no: u64,
        /// Last sequence number of the previous UUID's stream.
        previous_seq_no: u64,
        /// The previous UUID, if any.
        previous_uuid: u64,
        /// Granted keep-alive interval in milliseconds.
        keep_alive_interval: u32,
        /// Days until the secret key expires.
        secret_key_secure_id_expiration: u32,
    },
    /// Establishment rejected.
    EstablishmentReject {
        /// Human-readable reason.
        reason: String,
        /// UUID echoed by the exchange.
        uuid: u64,
        /// Exchange request timestamp.
        request_timestamp: u64,
        /// Error code bitfield.
        error_codes: u16,
    },
    /// Terminate, initiated by either side.
    Terminate {
        /// Human-readable reason.
        reason: String,
        /// UUID echoed by the exchange.
        uuid: u64,
        /// Exchange request timestamp.
        request_timestamp: u64,
        /// Error code bitfield.
        error_codes: u16,
    },
}

/// Per-connection ILink3 protocol state machine.
pub struct Ilink3Session {
    config: Ilink3SessionConfig,
    connection_id: ConnectionId,
    library_id: LibraryId,
    epoch_clock: Rc<dyn EpochClock>,
    nano_clock: Rc<dyn NanoClock>,

    uuid: u64,
    state: Ilink3State,
    next_sent_seq_no: u64,
    proxy: Box<dyn Ilink3Proxy>,
}

impl fmt::Debug for Ilink3Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ilink3Session")
            .field("connection_id", &self.connection_id)
            .field("uuid", &self.uuid)
            .field("state", &self.state)
            .field("next_sent_seq_no", &self.next_sent_seq_no)
            .finish_non_exhaustive()
    }
}

impl Ilink3Session {
    /// Creates a session for a freshly connected socket and immediately sends
    /// Negotiate.
    ///
    /// # Arguments
    /// * `config` - Credentials and connection options
    /// * `connection_id` - Id of the connection carrying this session
    /// * `library_id` - Id of the library that initiated the connection
    /// * `proxy` - SBE encoding side for outgoing messages
    /// * `epoch_clock` - Wall-clock milliseconds source
    /// * `nano_clock` - Monotonic nanoseconds source
    ///
    /// # Errors
    /// Returns [`EngineError::Crypto`] when the configured user key is
    /// unusable; the session cannot proceed safely without it.
    pub fn connect(
        config: Ilink3SessionConfig,
        connection_id: ConnectionId,
        library_id: LibraryId,
        proxy: Box<dyn Ilink3Proxy>,
        epoch_clock: Rc<dyn EpochClock>,
        nano_clock: Rc<dyn NanoClock>,
    ) -> Result<Self, EngineError> {
        let next_sent_seq_no = initial_sent_sequence_number(&config);

        let mut session = Self {
            config,
            connection_id,
            library_id,
            epoch_clock,
            nano_clock,
            uuid: 0,
            state: Ilink3State::Connected,
            next_sent_seq_no,
            proxy,
        };
        session.uuid = session.microsecond_timestamp();
        session.send_negotiate()?;

        Ok(session)
    }

    /// Returns the session UUID.
    #[must_use]
    pub const fn uuid(&self) -> u64 {
        self.uuid
    }

    /// Returns the id of the connection carrying this session.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Returns the id of the owning library.
    #[must_use]
    pub const fn library_id(&self) -> LibraryId {
        self.library_id
    }

    /// Returns the current protocol state.
    #[must_use]
    pub const fn state(&self) -> Ilink3State {
        self.state
    }

    /// Returns the next sequence number that will be sent.
    #[must_use]
    pub const fn next_sent_seq_no(&self) -> u64 {
        self.next_sent_seq_no
    }

    /// Claims space for a business message.
    ///
    /// # Errors
    /// Returns [`SessionError::IllegalState`] unless the session is
    /// established.
    pub fn claim_message(&mut self, block_length: usize) -> Result<Offer, EngineError> {
        self.validate_can_send("claim a message")?;
        Ok(self.proxy.claim_message(block_length))
    }

    /// Commits the previously claimed message.
    pub fn commit(&mut self) {
        self.proxy.commit();
    }

    /// Initiates termination of an established session.
    ///
    /// # Errors
    /// Returns [`SessionError::IllegalState`] unless the session is
    /// established.
    pub fn terminate(&mut self, reason: &str, error_codes: u16) -> Result<Offer, EngineError> {
        self.validate_can_send("terminate")?;

        let offer = self.send_terminate(reason, error_codes);
        if !offer.is_back_pressured() {
            self.state = Ilink3State::Unbinding;
        }

        Ok(offer)
    }

    /// Drives time-based session work.
    pub fn poll(&mut self, _time_ms: u64) -> usize {
        // TODO: resend Negotiate/Establish when the initial send was
        // back-pressured and we are still in CONNECTED/NEGOTIATED.
        0
    }

    /// Dispatches a decoded session-layer event to the matching handler.
    ///
    /// # Errors
    /// Propagates the individual handler errors.
    pub fn on_event(
        &mut self,
        event: Ilink3Event,
        owner: &mut dyn Ilink3SessionOwner,
    ) -> Result<usize, EngineError> {
        match event {
            Ilink3Event::NegotiationResponse { uuid, .. } => {
                self.on_negotiation_response(uuid, owner)
            }
            Ilink3Event::NegotiationReject { reason, uuid, .. } => {
                self.on_negotiation_reject(&reason, uuid, owner)
            }
            Ilink3Event::EstablishmentAck {
                uuid, next_seq_no, ..
            } => self.on_establishment_ack(uuid, next_seq_no, owner),
            Ilink3Event::EstablishmentReject { reason, uuid, .. } => {
                self.on_establishment_reject(&reason, uuid, owner)
            }
            Ilink3Event::Terminate {
                reason,
                uuid,
                error_codes,
                ..
            } => self.on_terminate(&reason, uuid, error_codes, owner),
        }
    }

    /// Handles a NegotiationResponse: the session becomes negotiated and
    /// immediately sends Establish.
    ///
    /// # Errors
    /// [`SessionError::UuidMismatch`] disconnects with a protocol violation;
    /// [`SessionError::IllegalState`] when no Negotiate is outstanding.
    pub fn on_negotiation_response(
        &mut self,
        uuid: u64,
        owner: &mut dyn Ilink3SessionOwner,
    ) -> Result<usize, EngineError> {
        self.validate_uuid(uuid, owner)?;
        self.validate_state(Ilink3State::SentNegotiate, "accept a negotiation response")?;

        self.state = Ilink3State::Negotiated;
        self.send_establish()?;

        Ok(1)
    }

    /// Handles a NegotiationReject. Terminal.
    ///
    /// # Errors
    /// As [`Self::on_negotiation_response`].
    pub fn on_negotiation_reject(
        &mut self,
        reason: &str,
        uuid: u64,
        owner: &mut dyn Ilink3SessionOwner,
    ) -> Result<usize, EngineError> {
        self.validate_uuid(uuid, owner)?;
        self.validate_state(Ilink3State::SentNegotiate, "accept a negotiation reject")?;

        warn!(uuid = self.uuid, reason, "negotiate rejected");
        self.state = Ilink3State::NegotiateRejected;

        Ok(1)
    }

    /// Handles an EstablishmentAck: the session is established.
    ///
    /// # Errors
    /// As [`Self::on_negotiation_response`].
    pub fn on_establishment_ack(
        &mut self,
        uuid: u64,
        _next_seq_no: u64,
        owner: &mut dyn Ilink3SessionOwner,
    ) -> Result<usize, EngineError> {
        self.validate_uuid(uuid, owner)?;
        self.validate_state(Ilink3State::SentEstablish, "accept an establishment ack")?;

        self.state = Ilink3State::Established;
        debug!(uuid = self.uuid, "session established");
        owner.on_established(self.connection_id, self.uuid);

        Ok(1)
    }

    /// Handles an EstablishmentReject. Terminal.
    ///
    /// # Errors
    /// As [`Self::on_negotiation_response`].
    pub fn on_establishment_reject(
        &mut self,
        reason: &str,
        uuid: u64,
        owner: &mut dyn Ilink3SessionOwner,
    ) -> Result<usize, EngineError> {
        self.validate_uuid(uuid, owner)?;
        self.validate_state(Ilink3State::SentEstablish, "accept an establishment reject")?;

        warn!(uuid = self.uuid, reason, "establish rejected");
        self.state = Ilink3State::EstablishRejected;

        Ok(1)
    }

    /// Handles a Terminate from the peer.
    ///
    /// When we initiated termination this completes the unbind; otherwise the
    /// Terminate is echoed back before unbinding.
    ///
    /// # Errors
    /// As [`Self::on_negotiation_response`].
    pub fn on_terminate(
        &mut self,
        reason: &str,
        uuid: u64,
        error_codes: u16,
        owner: &mut dyn Ilink3SessionOwner,
    ) -> Result<usize, EngineError> {
        self.validate_uuid(uuid, owner)?;

        match self.state {
            // We initiated termination.
            Ilink3State::Unbinding => {
                self.unbind(owner, DisconnectReason::Logout);
            }
            // The exchange initiated termination.
            Ilink3State::Established => {
                let offer = self.send_terminate(reason, error_codes);
                if offer.is_back_pressured() {
                    // The echoed terminate is lost; the disconnect below still
                    // tears the connection down.
                    warn!(uuid = self.uuid, "echoed terminate was back-pressured");
                }
                self.unbind(owner, DisconnectReason::Logout);
            }
            state => {
                return Err(SessionError::IllegalState {
                    expected: "ESTABLISHED or UNBINDING".to_string(),
                    current: state.to_string(),
                    operation: "accept a terminate".to_string(),
                }
                .into());
            }
        }

        Ok(1)
    }

    fn send_negotiate(&mut self) -> Result<(), EngineError> {
        let request_timestamp = self.request_timestamp();
        let canonical = negotiate_canonical(
            request_timestamp,
            self.uuid,
            &self.config.session_id,
            &self.config.firm_id,
        );
        let hmac_signature = sign_request(&self.config.user_key, &canonical)?;

        debug!(uuid = self.uuid, request_timestamp, "sending negotiate");
        let offer = self.proxy.send_negotiate(
            &hmac_signature,
            &self.config.access_key_id,
            self.uuid,
            request_timestamp,
            &self.config.session_id,
            &self.config.firm_id,
        );

        if !offer.is_back_pressured() {
            self.state = Ilink3State::SentNegotiate;
        }

        Ok(())
    }

    fn send_establish(&mut self) -> Result<(), EngineError> {
        let request_timestamp = self.request_timestamp();
        let config = &self.config;
        let canonical = establish_canonical(
            request_timestamp,
            self.uuid,
            &config.session_id,
            &config.firm_id,
            &config.trading_system_name,
            &config.trading_system_version,
            &config.trading_system_vendor,
            self.next_sent_seq_no,
            config.requested_keep_alive_interval,
        );
        let hmac_signature = sign_request(&config.user_key, &canonical)?;

        debug!(uuid = self.uuid, request_timestamp, "sending establish");
        let offer = self.proxy.send_establish(
            &hmac_signature,
            &config.access_key_id,
            &config.trading_system_name,
            &config.trading_system_vendor,
            &config.trading_system_version,
            self.uuid,
            request_timestamp,
            self.next_sent_seq_no,
            &config.session_id,
            &config.firm_id,
            config.requested_keep_alive_interval,
        );

        if !offer.is_back_pressured() {
            self.state = Ilink3State::SentEstablish;
        }

        Ok(())
    }

    fn send_terminate(&mut self, reason: &str, error_codes: u16) -> Offer {
        let request_timestamp = self.request_timestamp();
        self.proxy
            .send_terminate(reason, self.uuid, request_timestamp, error_codes)
    }

    fn unbind(&mut self, owner: &mut dyn Ilink3SessionOwner, reason: DisconnectReason) {
        self.state = Ilink3State::Unbound;
        let offer = owner.request_disconnect(self.library_id, self.connection_id, reason);
        if offer.is_back_pressured() {
            warn!(uuid = self.uuid, "disconnect request was back-pressured");
        }
        owner.on_unbind(self.connection_id, self.uuid);
    }

    fn validate_can_send(&self, operation: &str) -> Result<(), SessionError> {
        self.validate_state(Ilink3State::Established, operation)
    }

    fn validate_state(
        &self,
        expected: Ilink3State,
        operation: &str,
    ) -> Result<(), SessionError> {
        if self.state != expected {
            return Err(SessionError::IllegalState {
                expected: expected.to_string(),
                current: self.state.to_string(),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// A mismatched UUID cannot be repaired: the peer is answering some other
    /// session, so the connection is torn down as a protocol violation.
    fn validate_uuid(
        &mut self,
        received: u64,
        owner: &mut dyn Ilink3SessionOwner,
    ) -> Result<(), SessionError> {
        if received != self.uuid {
            let error = SessionError::UuidMismatch {
                expected: self.uuid,
                received,
            };
            warn!(uuid = self.uuid, received, "uuid mismatch, disconnecting");
            self.unbind(owner, DisconnectReason::ProtocolViolation);
            return Err(error);
        }
        Ok(())
    }

    /// Microsecond-resolution epoch timestamp used as the session UUID.
    fn microsecond_timestamp(&self) -> u64 {
        let microseconds =
            (self.nano_clock.nano_time().wrapping_mul(NANOS_IN_MICROS)) % MICROS_IN_MILLIS;
        self.epoch_clock.time_millis() * MICROS_IN_MILLIS + microseconds
    }

    /// Nanosecond-resolution epoch timestamp sent with each request.
    fn request_timestamp(&self) -> u64 {
        let nanoseconds = self.nano_clock.nano_time() % NANOS_IN_MILLIS;
        self.epoch_clock.time_millis() * NANOS_IN_MILLIS + nanoseconds
    }
}

fn initial_sent_sequence_number(config: &Ilink3SessionConfig) -> u64 {
    let initial = config.initial_sent_sequence_number;
    if initial == AUTOMATIC_INITIAL_SEQUENCE_NUMBER {
        return 1;
    }
    initial as u64
}
