/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Engine configuration.
//!
//! This module provides the recognized configuration options of the framer
//! worker, with defaults sized for a single busy gateway process.

use crate::idle::{BackoffIdleStrategy, IdleStrategy};
use std::net::SocketAddr;

/// Configuration for the framer worker.
#[derive(Debug)]
pub struct EngineConfiguration {
    /// Address to accept client connections on; `None` disables accepting.
    pub bind_address: Option<SocketAddr>,
    /// Maximum outbound library fragments handled per pass.
    pub outbound_library_fragment_limit: usize,
    /// Maximum replay fragments handled per pass.
    pub replay_fragment_limit: usize,
    /// Inbound byte budget per pass across all receiver endpoints.
    pub inbound_bytes_received_limit: usize,
    /// How long an accepted connection may stay silent before disconnect, in
    /// milliseconds.
    pub no_logon_disconnect_timeout_in_ms: u64,
    /// Library heartbeat grace period in milliseconds.
    pub reply_timeout_in_ms: u64,
    /// Heartbeat interval assigned to accepted sessions before logon.
    pub default_heartbeat_interval_in_s: u32,
    /// Whether acceptor sessions restart their sequence numbers on reconnect.
    pub acceptor_sequence_numbers_reset_upon_reconnect: bool,
    /// SO_RCVBUF for framer sockets, 0 for the OS default.
    pub receiver_socket_buffer_size: usize,
    /// SO_SNDBUF for framer sockets, 0 for the OS default.
    pub sender_socket_buffer_size: usize,
    /// Idle hook used inside cooperative waits.
    pub framer_idle_strategy: Box<dyn IdleStrategy>,
}

impl EngineConfiguration {
    /// Creates a configuration with defaults and no bind address.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bind_address: None,
            outbound_library_fragment_limit: 100,
            replay_fragment_limit: 100,
            inbound_bytes_received_limit: 8 * 1024,
            no_logon_disconnect_timeout_in_ms: 10_000,
            reply_timeout_in_ms: 10_000,
            default_heartbeat_interval_in_s: 10,
            acceptor_sequence_numbers_reset_upon_reconnect: false,
            receiver_socket_buffer_size: 0,
            sender_socket_buffer_size: 0,
            framer_idle_strategy: Box::new(BackoffIdleStrategy::default()),
        }
    }

    /// Sets the accept address.
    #[must_use]
    pub fn with_bind_address(mut self, address: SocketAddr) -> Self {
        self.bind_address = Some(address);
        self
    }

    /// Sets the outbound library fragment budget per pass.
    #[must_use]
    pub const fn with_outbound_library_fragment_limit(mut self, limit: usize) -> Self {
        self.outbound_library_fragment_limit = limit;
        self
    }

    /// Sets the replay fragment budget per pass.
    #[must_use]
    pub const fn with_replay_fragment_limit(mut self, limit: usize) -> Self {
        self.replay_fragment_limit = limit;
        self
    }

    /// Sets the inbound byte budget per pass.
    #[must_use]
    pub const fn with_inbound_bytes_received_limit(mut self, limit: usize) -> Self {
        self.inbound_bytes_received_limit = limit;
        self
    }

    /// Sets the silent-connection disconnect timeout.
    #[must_use]
    pub const fn with_no_logon_disconnect_timeout_in_ms(mut self, timeout: u64) -> Self {
        self.no_logon_disconnect_timeout_in_ms = timeout;
        self
    }

    /// Sets the library heartbeat grace period.
    #[must_use]
    pub const fn with_reply_timeout_in_ms(mut self, timeout: u64) -> Self {
        self.reply_timeout_in_ms = timeout;
        self
    }

    /// Sets the pre-logon heartbeat interval.
    #[must_use]
    pub const fn with_default_heartbeat_interval_in_s(mut self, interval: u32) -> Self {
        self.default_heartbeat_interval_in_s = interval;
        self
    }

    /// Sets the acceptor sequence-number reset policy.
    #[must_use]
    pub const fn with_acceptor_sequence_numbers_reset_upon_reconnect(
        mut self,
        reset: bool,
    ) -> Self {
        self.acceptor_sequence_numbers_reset_upon_reconnect = reset;
        self
    }

    /// Sets the receive socket buffer size (0 keeps the OS default).
    #[must_use]
    pub const fn with_receiver_socket_buffer_size(mut self, size: usize) -> Self {
        self.receiver_socket_buffer_size = size;
        self
    }

    /// Sets the send socket buffer size (0 keeps the OS default).
    #[must_use]
    pub const fn with_sender_socket_buffer_size(mut self, size: usize) -> Self {
        self.sender_socket_buffer_size = size;
        self
    }

    /// Sets the idle strategy used in cooperative waits.
    #[must_use]
    pub fn with_framer_idle_strategy(mut self, strategy: Box<dyn IdleStrategy>) -> Self {
        self.framer_idle_strategy = strategy;
        self
    }

    /// Returns true when accepting is enabled.
    #[must_use]
    pub const fn has_bind_address(&self) -> bool {
        self.bind_address.is_some()
    }
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idle::BusySpinIdleStrategy;

    #[test]
    fn test_defaults() {
        let config = EngineConfiguration::new();
        assert!(!config.has_bind_address());
        assert_eq!(config.outbound_library_fragment_limit, 100);
        assert_eq!(config.inbound_bytes_received_limit, 8 * 1024);
        assert_eq!(config.receiver_socket_buffer_size, 0);
        assert!(!config.acceptor_sequence_numbers_reset_upon_reconnect);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfiguration::new()
            .with_bind_address("127.0.0.1:9999".parse().unwrap())
            .with_inbound_bytes_received_limit(64)
            .with_reply_timeout_in_ms(2_000)
            .with_framer_idle_strategy(Box::new(BusySpinIdleStrategy));

        assert!(config.has_bind_address());
        assert_eq!(config.inbound_bytes_received_limit, 64);
        assert_eq!(config.reply_timeout_in_ms, 2_000);
    }
}
