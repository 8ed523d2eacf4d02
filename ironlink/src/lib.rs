/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronLink
//!
//! A low-latency FIX/ILink3 market-access gateway core for Rust.
//!
//! IronLink sits between trading applications ("libraries") and exchange
//! endpoints, multiplexing many TCP connections over a single cooperative
//! worker, enforcing per-session protocol state machines, and bridging
//! socket I/O to an in-process publish/subscribe log.
//!
//! ## Architecture
//!
//! - The **framer** owns every client-facing socket and performs one bounded
//!   non-blocking pass per [`engine::Framer::do_work`] invocation
//! - **Libraries** communicate with the worker over bounded SPSC channels
//!   and read framed control messages from the publication log
//! - The **ILink3 session** drives the negotiate/establish/terminate
//!   handshake towards CME, with HMAC-SHA256 request signing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ironlink::prelude::*;
//!
//! let configuration = EngineConfiguration::new()
//!     .with_bind_address("0.0.0.0:9999".parse()?);
//! let (mut framer, handle) = Framer::builder(configuration).build()?;
//!
//! loop {
//!     if framer.do_work() == 0 {
//!         std::thread::yield_now();
//!     }
//! }
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`]: fundamental types, clocks, and error definitions
//! - [`transport`]: FIX and SOFH framing plus socket plumbing
//! - [`session`]: the ILink3 session state machine and request signing
//! - [`engine`]: the framer worker and everything it composes

pub mod core {
    //! Fundamental types, clocks, and error definitions.
    pub use ironlink_core::*;
}

pub mod transport {
    //! FIX and SOFH framing plus socket plumbing.
    pub use ironlink_transport::*;
}

pub mod session {
    //! The ILink3 session state machine and request signing.
    pub use ironlink_session::*;
}

pub mod engine {
    //! The framer worker and everything it composes.
    pub use ironlink_engine::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use ironlink_core::{
        CompId, CompositeKey, ConnectionId, ConnectionType, CorrelationId, DisconnectReason,
        EngineError, EpochClock, GatewayError, LibraryId, LogonStatus, NanoClock, Offer, Result,
        SessionId, SessionReplyStatus, SessionState, SystemEpochClock, SystemNanoClock,
    };

    // Transport
    pub use ironlink_transport::{FixFrameDecoder, LogonMessage, SofhFrameDecoder};

    // Session
    pub use ironlink_session::{
        Ilink3Event, Ilink3Proxy, Ilink3Session, Ilink3SessionConfig, Ilink3SessionOwner,
        Ilink3State,
    };

    // Engine
    pub use ironlink_engine::{
        EngineConfiguration, Framer, FramerBuilder, GatewayHandle, GatewayPublication,
        LibraryEvent, MemoryPublication, PublishedFrame, SequenceNumberIndex, SessionIds,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _connection = ConnectionId::new(1);
        let _offer = Offer::Published(1);
        let _state = Ilink3State::Connected;
    }

    #[test]
    fn test_engine_is_constructible() {
        let (mut framer, _handle) = Framer::builder(EngineConfiguration::new())
            .build()
            .unwrap();
        // No work sources attached: an idle pass performs no work.
        assert_eq!(framer.do_work(), 0);
    }
}
