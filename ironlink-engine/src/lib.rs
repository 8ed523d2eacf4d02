/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronLink Engine
//!
//! The session and framing core of the IronLink FIX/ILink3 gateway.
//!
//! This crate provides:
//! - **Framer**: the single-threaded cooperative worker owning every
//!   client-facing TCP socket
//! - **RetryManager**: back-pressure-aware retry of multi-step units of work
//! - **Endpoint tables**: per-connection receiver/sender endpoints bridging
//!   sockets and the publication log
//! - **Library registry and session pool**: liveness-tracked session
//!   ownership with move-based handover
//! - **External collaborator interfaces**: publication log, sequence-number
//!   indices, replay query, session-id store, and the ILink3 codec layer

pub mod command;
pub mod config;
pub mod endpoint;
pub mod framer;
pub mod idle;
pub mod ids;
pub mod ilink;
pub mod index;
pub mod library;
pub mod publication;
pub mod retry;
pub mod session;
pub mod subscription;

pub use command::{AdminCommand, GatewaySessionView, LibraryView, Reply, ReplyHandle, reply_pair};
pub use config::EngineConfiguration;
pub use endpoint::{
    EndPointHandler, ProtocolMode, ReceiverEndPoint, ReceiverEndPoints, SenderEndPoint,
    SenderEndPoints,
};
pub use framer::{ErrorHandler, Framer, FramerBuilder, GatewayHandle, LoggingErrorHandler};
pub use idle::{BackoffIdleStrategy, BusySpinIdleStrategy, IdleStrategy, YieldingIdleStrategy};
pub use ids::{MapSessionIds, SenderTargetSessionIdStrategy, SessionIdStrategy, SessionIds};
pub use ilink::{Ilink3EventDecoder, Ilink3ProxyFactory};
pub use index::{
    MemoryReplayQuery, MemorySequenceNumberIndex, ReplayQuery, SequenceNumberIndex,
};
pub use library::{LibraryInfo, LivenessDetector};
pub use publication::{GatewayPublication, MemoryPublication, PublishedFrame};
pub use retry::{Action, Continuation, RetryManager, StepResult, UnitOfWork};
pub use session::{GatewaySession, GatewaySessions};
pub use subscription::{LibraryEvent, OutboundSubscription, SequenceNumberType};
