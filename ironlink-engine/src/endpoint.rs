/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Receiver and sender endpoints.
//!
//! Each live connection has exactly one [`ReceiverEndPoint`] (socket → parser
//! → publication) and one [`SenderEndPoint`] (outbound dispatch → socket).
//! Receiver endpoints report protocol events to the framer through the
//! [`EndPointHandler`] interface the framer's context implements, inverting
//! the reference so no cycle exists.

use crate::publication::GatewayPublication;
use crate::retry::Action;
use bytes::BytesMut;
use ironlink_core::types::{
    ConnectionId, ConnectionType, DisconnectReason, LibraryId, Offer, SessionId,
};
use ironlink_transport::frame::FixFrameDecoder;
use ironlink_transport::scan::{message_type, LogonMessage};
use ironlink_transport::sofh::{SbeHeader, SofhFrameDecoder, SOFH_LEN};
use std::collections::HashMap;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::rc::Rc;
use tracing::{debug, warn};

/// Bytes read from a socket per endpoint poll.
const READ_CHUNK: usize = 8 * 1024;

/// Protocol events surfaced from receiver endpoints to the framer.
pub trait EndPointHandler {
    /// A Logon was framed on an accepted connection.
    ///
    /// Returns the assigned session id, or `None` when the logon must be
    /// rejected (duplicate session).
    fn on_accept_logon(
        &mut self,
        connection_id: ConnectionId,
        logon: &LogonMessage,
    ) -> Option<SessionId>;

    /// A SOFH frame was read on an ILink3 connection.
    ///
    /// Returns [`Action::Abort`] when the frame could not be consumed and
    /// must be redelivered on the next pass.
    fn on_ilink_frame(
        &mut self,
        connection_id: ConnectionId,
        template_id: u16,
        frame: &[u8],
    ) -> Action;

    /// A receiver endpoint disconnected and was removed from its table.
    fn on_end_point_disconnect(&mut self, connection_id: ConnectionId, reason: DisconnectReason);
}

/// Wire protocol framed by a receiver endpoint.
#[derive(Debug)]
pub enum ProtocolMode {
    /// FIX tag=value framing.
    Fix(FixFrameDecoder),
    /// ILink3 SOFH framing.
    Ilink3(SofhFrameDecoder),
}

/// Owns the read side of a connection: socket, per-connection buffer, and
/// parser.
pub struct ReceiverEndPoint {
    connection_id: ConnectionId,
    library_id: LibraryId,
    session_id: Option<SessionId>,
    connection_type: ConnectionType,
    address: String,
    socket: TcpStream,
    buffer: BytesMut,
    mode: ProtocolMode,
    publication: Rc<dyn GatewayPublication>,
    pending_frame: Option<BytesMut>,
    disconnect_reason: Option<DisconnectReason>,
}

impl fmt::Debug for ReceiverEndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverEndPoint")
            .field("connection_id", &self.connection_id)
            .field("library_id", &self.library_id)
            .field("session_id", &self.session_id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl ReceiverEndPoint {
    /// Creates a receiver endpoint over a configured non-blocking socket.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        socket: TcpStream,
        connection_id: ConnectionId,
        library_id: LibraryId,
        session_id: Option<SessionId>,
        connection_type: ConnectionType,
        address: String,
        mode: ProtocolMode,
        publication: Rc<dyn GatewayPublication>,
    ) -> Self {
        Self {
            connection_id,
            library_id,
            session_id,
            connection_type,
            address,
            socket,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            mode,
            publication,
            pending_frame: None,
            disconnect_reason: None,
        }
    }

    /// Returns the connection id.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Returns the remote peer address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Re-routes published frames to a new owning library.
    pub fn set_library(&mut self, library_id: LibraryId) {
        self.library_id = library_id;
    }

    /// Reads available bytes, frames messages, and publishes them.
    ///
    /// Returns the number of bytes read from the socket.
    pub fn poll(&mut self, handler: &mut dyn EndPointHandler) -> usize {
        if let Some(frame) = self.pending_frame.take() {
            if self.dispatch(&frame, handler) == Action::Abort {
                self.pending_frame = Some(frame);
                return 0;
            }
        }

        let mut chunk = [0u8; READ_CHUNK];
        let bytes_read = match self.socket.read(&mut chunk) {
            Ok(0) => {
                self.disconnect_reason = Some(DisconnectReason::RemoteDisconnect);
                return 0;
            }
            Ok(bytes_read) => bytes_read,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                return 0;
            }
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "socket read failed");
                self.disconnect_reason = Some(DisconnectReason::RemoteDisconnect);
                return 0;
            }
        };

        self.buffer.extend_from_slice(&chunk[..bytes_read]);
        self.extract_frames(handler);

        bytes_read
    }

    /// Returns the reason this endpoint should be torn down, if any.
    #[must_use]
    pub const fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.disconnect_reason
    }

    fn extract_frames(&mut self, handler: &mut dyn EndPointHandler) {
        loop {
            if self.disconnect_reason.is_some() || self.pending_frame.is_some() {
                return;
            }

            let decoded = match &mut self.mode {
                ProtocolMode::Fix(decoder) => decoder.decode(&mut self.buffer),
                ProtocolMode::Ilink3(decoder) => decoder.decode(&mut self.buffer),
            };

            match decoded {
                Ok(Some(frame)) => {
                    if self.is_acceptor_logon(&frame) {
                        self.on_logon_frame(&frame, handler);
                        continue;
                    }
                    if self.dispatch(&frame, handler) == Action::Abort {
                        self.pending_frame = Some(frame);
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(
                        connection_id = %self.connection_id,
                        address = %self.address,
                        error = %e,
                        "unframeable bytes, disconnecting"
                    );
                    self.disconnect_reason = Some(DisconnectReason::ProtocolViolation);
                    return;
                }
            }
        }
    }

    fn is_acceptor_logon(&self, frame: &[u8]) -> bool {
        matches!(self.mode, ProtocolMode::Fix(_))
            && self.connection_type == ConnectionType::Acceptor
            && self.session_id.is_none()
            && message_type(frame) == Some(b"A")
    }

    fn on_logon_frame(&mut self, frame: &[u8], handler: &mut dyn EndPointHandler) {
        match LogonMessage::scan(frame) {
            Ok(logon) => match handler.on_accept_logon(self.connection_id, &logon) {
                Some(session_id) => {
                    debug!(connection_id = %self.connection_id, %session_id, "logged on");
                    self.session_id = Some(session_id);
                }
                None => {
                    self.disconnect_reason = Some(DisconnectReason::DuplicateSession);
                }
            },
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "bad logon");
                self.disconnect_reason = Some(DisconnectReason::ProtocolViolation);
            }
        }
    }

    fn dispatch(&mut self, frame: &[u8], handler: &mut dyn EndPointHandler) -> Action {
        match &self.mode {
            ProtocolMode::Fix(_) => {
                let offer = self.publication.save_message(
                    self.library_id,
                    self.connection_id,
                    self.session_id,
                    frame,
                );
                match offer {
                    Offer::Published(_) => Action::Continue,
                    Offer::BackPressured => Action::Abort,
                }
            }
            ProtocolMode::Ilink3(_) => match SbeHeader::read(&frame[SOFH_LEN..]) {
                Some(header) => {
                    handler.on_ilink_frame(self.connection_id, header.template_id, frame)
                }
                None => {
                    warn!(connection_id = %self.connection_id, "frame too short for SBE header");
                    Action::Continue
                }
            },
        }
    }
}

/// Table of receiver endpoints keyed by connection id.
#[derive(Debug, Default)]
pub struct ReceiverEndPoints {
    end_points: HashMap<ConnectionId, ReceiverEndPoint>,
}

impl ReceiverEndPoints {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint.
    pub fn add(&mut self, end_point: ReceiverEndPoint) {
        self.end_points.insert(end_point.connection_id(), end_point);
    }

    /// Removes the endpoint of a connection.
    pub fn remove(&mut self, connection_id: ConnectionId) {
        self.end_points.remove(&connection_id);
    }

    /// Re-routes a connection's published frames to a new owning library.
    pub fn set_library(&mut self, connection_id: ConnectionId, library_id: LibraryId) {
        if let Some(end_point) = self.end_points.get_mut(&connection_id) {
            end_point.set_library(library_id);
        }
    }

    /// Polls every endpoint once, removing and reporting any that
    /// disconnected.
    ///
    /// Returns the total bytes read.
    pub fn poll_end_points(&mut self, handler: &mut dyn EndPointHandler) -> usize {
        let mut bytes_received = 0;
        let mut disconnected = Vec::new();

        for end_point in self.end_points.values_mut() {
            bytes_received += end_point.poll(handler);
            if let Some(reason) = end_point.disconnect_reason() {
                disconnected.push((end_point.connection_id(), reason));
            }
        }

        for (connection_id, reason) in disconnected {
            self.end_points.remove(&connection_id);
            handler.on_end_point_disconnect(connection_id, reason);
        }

        bytes_received
    }

    /// Returns the number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end_points.len()
    }

    /// Returns true when no endpoints are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end_points.is_empty()
    }
}

/// Owns the write side of a connection, buffering partial writes across
/// passes.
#[derive(Debug)]
pub struct SenderEndPoint {
    connection_id: ConnectionId,
    socket: TcpStream,
    buffered: BytesMut,
    broken: bool,
}

impl SenderEndPoint {
    /// Creates a sender endpoint over a configured non-blocking socket.
    #[must_use]
    pub fn new(socket: TcpStream, connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            socket,
            buffered: BytesMut::new(),
            broken: false,
        }
    }

    /// Returns the connection id.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queues or writes a payload; bytes that do not fit the socket buffer
    /// are retained and drained by the slow path.
    pub fn on_message(&mut self, payload: &[u8]) {
        if self.broken {
            return;
        }
        if !self.buffered.is_empty() {
            // Keep per-connection ordering: never overtake buffered bytes.
            self.buffered.extend_from_slice(payload);
            return;
        }

        let written = self.write_available(payload);
        if written < payload.len() {
            self.buffered.extend_from_slice(&payload[written..]);
        }
    }

    /// Attempts to drain buffered bytes. Returns how many were written.
    pub fn flush(&mut self) -> usize {
        if self.broken || self.buffered.is_empty() {
            return 0;
        }

        let buffered = self.buffered.split();
        let written = self.write_available(&buffered);
        if written < buffered.len() {
            self.buffered.extend_from_slice(&buffered[written..]);
        }
        written
    }

    /// Returns true while this endpoint has buffered bytes and therefore
    /// registered interest in the slow path.
    #[must_use]
    pub fn is_slow(&self) -> bool {
        !self.buffered.is_empty()
    }

    fn write_available(&mut self, payload: &[u8]) -> usize {
        let mut written = 0;
        while written < payload.len() {
            match self.socket.write(&payload[written..]) {
                Ok(0) => break,
                Ok(bytes) => written += bytes,
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock
                        || e.kind() == ErrorKind::Interrupted =>
                {
                    break;
                }
                Err(e) => {
                    warn!(connection_id = %self.connection_id, error = %e, "socket write failed");
                    self.broken = true;
                    break;
                }
            }
        }
        written
    }
}

/// Table of sender endpoints keyed by connection id.
#[derive(Debug, Default)]
pub struct SenderEndPoints {
    end_points: HashMap<ConnectionId, SenderEndPoint>,
}

impl SenderEndPoints {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint.
    pub fn add(&mut self, end_point: SenderEndPoint) {
        self.end_points.insert(end_point.connection_id(), end_point);
    }

    /// Removes the endpoint of a connection.
    pub fn remove(&mut self, connection_id: ConnectionId) {
        self.end_points.remove(&connection_id);
    }

    /// Routes an outbound payload to its connection.
    pub fn on_message(&mut self, connection_id: ConnectionId, payload: &[u8]) {
        match self.end_points.get_mut(&connection_id) {
            Some(end_point) => end_point.on_message(payload),
            None => {
                debug!(%connection_id, "dropping message for unknown connection");
            }
        }
    }

    /// Handles a frame from the slow fan-out stream: only endpoints that
    /// registered slow interest still need it drained.
    pub fn on_slow_message(&mut self, connection_id: ConnectionId) -> usize {
        self.end_points
            .get_mut(&connection_id)
            .filter(|end_point| end_point.is_slow())
            .map_or(0, SenderEndPoint::flush)
    }

    /// Returns the number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end_points.len()
    }

    /// Returns true when no endpoints are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end_points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publication::{MemoryPublication, PublishedFrame};
    use ironlink_transport::frame::calculate_checksum;
    use ironlink_transport::socket::configure_stream;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    #[derive(Default)]
    struct StubHandler {
        logons: Vec<(ConnectionId, LogonMessage)>,
        ilink_frames: Vec<(ConnectionId, u16)>,
        disconnects: Vec<(ConnectionId, DisconnectReason)>,
        reject_logons: bool,
    }

    impl EndPointHandler for StubHandler {
        fn on_accept_logon(
            &mut self,
            connection_id: ConnectionId,
            logon: &LogonMessage,
        ) -> Option<SessionId> {
            self.logons.push((connection_id, logon.clone()));
            if self.reject_logons {
                None
            } else {
                Some(SessionId::new(5))
            }
        }

        fn on_ilink_frame(
            &mut self,
            connection_id: ConnectionId,
            template_id: u16,
            _frame: &[u8],
        ) -> Action {
            self.ilink_frames.push((connection_id, template_id));
            Action::Continue
        }

        fn on_end_point_disconnect(
            &mut self,
            connection_id: ConnectionId,
            reason: DisconnectReason,
        ) {
            self.disconnects.push((connection_id, reason));
        }
    }

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        configure_stream(&server, 0, 0).unwrap();
        (client, server)
    }

    fn fix_message(body: &str) -> Vec<u8> {
        let header = format!("8=FIX.4.4\x019={}\x01", body.len());
        let without_checksum = format!("{header}{body}");
        let checksum = calculate_checksum(without_checksum.as_bytes());
        format!("{without_checksum}10={checksum:03}\x01").into_bytes()
    }

    fn receiver(
        server: TcpStream,
        publication: &Rc<MemoryPublication>,
    ) -> ReceiverEndPoint {
        ReceiverEndPoint::new(
            server,
            ConnectionId::new(1),
            -1,
            None,
            ConnectionType::Acceptor,
            "127.0.0.1:0".to_string(),
            ProtocolMode::Fix(FixFrameDecoder::new()),
            Rc::clone(publication) as Rc<dyn GatewayPublication>,
        )
    }

    fn poll_until(
        end_point: &mut ReceiverEndPoint,
        handler: &mut StubHandler,
        mut done: impl FnMut(&StubHandler, &ReceiverEndPoint) -> bool,
    ) {
        for _ in 0..500 {
            end_point.poll(handler);
            if done(handler, end_point) {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_logon_is_routed_to_handler_not_published() {
        let (mut client, server) = socket_pair();
        let publication = Rc::new(MemoryPublication::default());
        let mut end_point = receiver(server, &publication);
        let mut handler = StubHandler::default();

        client
            .write_all(&fix_message("35=A\x0134=1\x0149=CLIENT\x0156=GATEWAY\x01108=30\x01"))
            .unwrap();

        poll_until(&mut end_point, &mut handler, |h, _| !h.logons.is_empty());
        assert_eq!(handler.logons[0].1.sender_comp_id.as_str(), "CLIENT");
        assert_eq!(end_point.session_id, Some(SessionId::new(5)));
        assert!(publication.is_empty());
    }

    #[test]
    fn test_application_message_is_published() {
        let (mut client, server) = socket_pair();
        let publication = Rc::new(MemoryPublication::default());
        let mut end_point = receiver(server, &publication);
        let mut handler = StubHandler::default();

        let message = fix_message("35=0\x0134=2\x01");
        client.write_all(&message).unwrap();

        poll_until(&mut end_point, &mut handler, |_, _| !publication.is_empty());
        let frames = publication.drain();
        assert!(matches!(
            &frames[0],
            PublishedFrame::Message { payload, .. } if payload == &message
        ));
    }

    #[test]
    fn test_back_pressured_publish_is_retried() {
        let (mut client, server) = socket_pair();
        let publication = Rc::new(MemoryPublication::new(0));
        let mut end_point = receiver(server, &publication);
        let mut handler = StubHandler::default();

        client.write_all(&fix_message("35=0\x0134=2\x01")).unwrap();
        poll_until(&mut end_point, &mut handler, |_, ep| {
            ep.pending_frame.is_some()
        });

        // Still pressured: the frame stays pending.
        end_point.poll(&mut handler);
        assert!(end_point.pending_frame.is_some());
    }

    #[test]
    fn test_rejected_logon_disconnects() {
        let (mut client, server) = socket_pair();
        let publication = Rc::new(MemoryPublication::default());
        let mut end_point = receiver(server, &publication);
        let mut handler = StubHandler {
            reject_logons: true,
            ..StubHandler::default()
        };

        client
            .write_all(&fix_message("35=A\x0134=1\x0149=CLIENT\x0156=GATEWAY\x01"))
            .unwrap();

        poll_until(&mut end_point, &mut handler, |_, ep| {
            ep.disconnect_reason().is_some()
        });
        assert_eq!(
            end_point.disconnect_reason(),
            Some(DisconnectReason::DuplicateSession)
        );
    }

    #[test]
    fn test_remote_close_reports_disconnect() {
        let (client, server) = socket_pair();
        let publication = Rc::new(MemoryPublication::default());
        let mut table = ReceiverEndPoints::new();
        table.add(receiver(server, &publication));
        let mut handler = StubHandler::default();

        drop(client);
        for _ in 0..500 {
            table.poll_end_points(&mut handler);
            if !handler.disconnects.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(
            handler.disconnects,
            vec![(ConnectionId::new(1), DisconnectReason::RemoteDisconnect)]
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_sender_end_point_writes() {
        let (client, server) = socket_pair();
        configure_stream(&client, 0, 0).unwrap();
        let mut sender = SenderEndPoint::new(client, ConnectionId::new(1));

        sender.on_message(b"hello");
        assert!(!sender.is_slow());

        let mut server = server;
        let mut read = Vec::new();
        for _ in 0..500 {
            let mut chunk = [0u8; 64];
            match server.read(&mut chunk) {
                Ok(n) => {
                    read.extend_from_slice(&chunk[..n]);
                    if read == b"hello" {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => panic!("read failed: {e}"),
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(read, b"hello");
    }

    #[test]
    fn test_ilink_frames_route_by_template() {
        let (mut client, server) = socket_pair();
        let publication = Rc::new(MemoryPublication::default());
        let mut end_point = ReceiverEndPoint::new(
            server,
            ConnectionId::new(2),
            1,
            None,
            ConnectionType::Initiator,
            "127.0.0.1:0".to_string(),
            ProtocolMode::Ilink3(SofhFrameDecoder::new()),
            Rc::clone(&publication) as Rc<dyn GatewayPublication>,
        );
        let mut handler = StubHandler::default();

        let mut body = Vec::new();
        body.extend_from_slice(&0_u16.to_le_bytes());
        body.extend_from_slice(&501_u16.to_le_bytes());
        body.extend_from_slice(&8_u16.to_le_bytes());
        body.extend_from_slice(&5_u16.to_le_bytes());
        client
            .write_all(&ironlink_transport::sofh::encode_sofh(&body))
            .unwrap();

        poll_until(&mut end_point, &mut handler, |h, _| {
            !h.ilink_frames.is_empty()
        });
        assert_eq!(handler.ilink_frames, vec![(ConnectionId::new(2), 501)]);
    }
}
