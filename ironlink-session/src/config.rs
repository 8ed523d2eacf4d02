/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! ILink3 session configuration.
//!
//! This module provides the per-connection options for an ILink3 session.

/// Sentinel for "let the gateway choose the initial sent sequence number".
pub const AUTOMATIC_INITIAL_SEQUENCE_NUMBER: i64 = -1;

/// Configuration for an ILink3 session.
#[derive(Debug, Clone)]
pub struct Ilink3SessionConfig {
    /// CME-assigned session id (three characters).
    pub session_id: String,
    /// CME-assigned firm id.
    pub firm_id: String,
    /// Access key id published to the exchange alongside each signature.
    pub access_key_id: String,
    /// base64url-encoded HMAC secret associated with the access key.
    pub user_key: String,
    /// Trading system name reported in Establish.
    pub trading_system_name: String,
    /// Trading system version reported in Establish.
    pub trading_system_version: String,
    /// Trading system vendor reported in Establish.
    pub trading_system_vendor: String,
    /// Requested keep-alive interval in milliseconds.
    pub requested_keep_alive_interval: u32,
    /// Initial sent sequence number, or
    /// [`AUTOMATIC_INITIAL_SEQUENCE_NUMBER`] to start at 1.
    pub initial_sent_sequence_number: i64,
}

impl Ilink3SessionConfig {
    /// Creates a configuration with required credentials.
    ///
    /// # Arguments
    /// * `session_id` - The CME-assigned session id
    /// * `firm_id` - The CME-assigned firm id
    /// * `access_key_id` - The access key id
    /// * `user_key` - The base64url-encoded HMAC secret
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        firm_id: impl Into<String>,
        access_key_id: impl Into<String>,
        user_key: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            firm_id: firm_id.into(),
            access_key_id: access_key_id.into(),
            user_key: user_key.into(),
            trading_system_name: "IronLink".to_string(),
            trading_system_version: env!("CARGO_PKG_VERSION").to_string(),
            trading_system_vendor: "IronLink".to_string(),
            requested_keep_alive_interval: 30_000,
            initial_sent_sequence_number: AUTOMATIC_INITIAL_SEQUENCE_NUMBER,
        }
    }

    /// Sets the trading system identification reported in Establish.
    #[must_use]
    pub fn with_trading_system(
        mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        vendor: impl Into<String>,
    ) -> Self {
        self.trading_system_name = name.into();
        self.trading_system_version = version.into();
        self.trading_system_vendor = vendor.into();
        self
    }

    /// Sets the requested keep-alive interval in milliseconds.
    #[must_use]
    pub const fn with_keep_alive_interval(mut self, interval_ms: u32) -> Self {
        self.requested_keep_alive_interval = interval_ms;
        self
    }

    /// Sets an explicit initial sent sequence number.
    #[must_use]
    pub const fn with_initial_sent_sequence_number(mut self, sequence_number: i64) -> Self {
        self.initial_sent_sequence_number = sequence_number;
        self
    }
}
