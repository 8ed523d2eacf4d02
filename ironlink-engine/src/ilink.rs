/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! ILink3 codec-layer collaborator interfaces.
//!
//! SBE encoding and decoding live outside the core: the framer asks an
//! [`Ilink3ProxyFactory`] for the encoding side of each new exchange
//! connection, and routes inbound session-layer frames through an
//! [`Ilink3EventDecoder`].

use ironlink_core::types::ConnectionId;
use ironlink_session::ilink3::{Ilink3Event, Ilink3Proxy};

/// Creates the encoding proxy for a freshly connected ILink3 session.
pub trait Ilink3ProxyFactory {
    /// Returns a proxy bound to the given connection.
    fn new_proxy(&self, connection_id: ConnectionId) -> Box<dyn Ilink3Proxy>;
}

/// Decodes inbound session-layer frames into typed events.
///
/// Returns `None` for frames the session layer does not handle (business
/// messages), which the framer then publishes for the owning library.
pub trait Ilink3EventDecoder {
    /// Decodes the SOFH frame with the given SBE template id.
    fn decode(&self, template_id: u16, frame: &[u8]) -> Option<Ilink3Event>;
}
