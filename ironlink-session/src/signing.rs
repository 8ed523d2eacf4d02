/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! HMAC-SHA256 request signing for ILink3.
//!
//! Each Negotiate/Establish request carries a signature over a canonical
//! newline-separated string of its fields. The key is the user's
//! base64url-encoded secret, decoded to raw bytes before use.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use ironlink_core::error::CryptoError;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 signature in bytes.
pub const SIGNATURE_LEN: usize = 32;

/// Builds the canonical request string for a Negotiate.
///
/// Fields in order: request timestamp, uuid, session id, firm id.
#[must_use]
pub fn negotiate_canonical(
    request_timestamp: u64,
    uuid: u64,
    session_id: &str,
    firm_id: &str,
) -> String {
    format!("{request_timestamp}\n{uuid}\n{session_id}\n{firm_id}")
}

/// Builds the canonical request string for an Establish.
///
/// Extends the Negotiate canonical string with the trading system
/// identification, the next sent sequence number, and the keep-alive
/// interval.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn establish_canonical(
    request_timestamp: u64,
    uuid: u64,
    session_id: &str,
    firm_id: &str,
    trading_system_name: &str,
    trading_system_version: &str,
    trading_system_vendor: &str,
    next_sent_seq_no: u64,
    keep_alive_interval: u32,
) -> String {
    format!(
        "{request_timestamp}\n{uuid}\n{session_id}\n{firm_id}\n{trading_system_name}\n\
         {trading_system_version}\n{trading_system_vendor}\n{next_sent_seq_no}\n\
         {keep_alive_interval}"
    )
}

/// Signs a canonical request string.
///
/// # Arguments
/// * `user_key` - The base64url-encoded secret
/// * `canonical_request` - The canonical request string
///
/// # Errors
/// Returns [`CryptoError`] when the key cannot be decoded or is rejected by
/// the MAC; this is a fatal misconfiguration.
pub fn sign_request(
    user_key: &str,
    canonical_request: &str,
) -> Result<[u8; SIGNATURE_LEN], CryptoError> {
    let decoded_key = URL_SAFE_NO_PAD
        .decode(user_key)
        .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;

    let mut mac = HmacSha256::new_from_slice(&decoded_key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(canonical_request.as_bytes());

    Ok(mac.finalize().into_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    #[test]
    fn test_negotiate_canonical() {
        let canonical =
            negotiate_canonical(1_600_000_000_000_000_000, 1_600_000_000_000_000, "ABC", "FIRM");
        assert_eq!(canonical, "1600000000000000000\n1600000000000000\nABC\nFIRM");
    }

    #[test]
    fn test_establish_canonical_extends_negotiate() {
        let canonical = establish_canonical(
            1_600_000_000_000_000_000,
            1_600_000_000_000_000,
            "ABC",
            "FIRM",
            "Gateway",
            "2.1",
            "ACME",
            1,
            30_000,
        );
        assert_eq!(
            canonical,
            "1600000000000000000\n1600000000000000\nABC\nFIRM\nGateway\n2.1\nACME\n1\n30000"
        );
    }

    #[test]
    fn test_sign_request_is_deterministic() {
        let canonical = negotiate_canonical(1, 2, "ABC", "FIRM");
        let first = sign_request(ZERO_KEY, &canonical).unwrap();
        let second = sign_request(ZERO_KEY, &canonical).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), SIGNATURE_LEN);
    }

    #[test]
    fn test_sign_request_is_field_sensitive() {
        let base = sign_request(ZERO_KEY, &negotiate_canonical(1, 2, "ABC", "FIRM")).unwrap();

        let timestamp = sign_request(ZERO_KEY, &negotiate_canonical(9, 2, "ABC", "FIRM")).unwrap();
        let uuid = sign_request(ZERO_KEY, &negotiate_canonical(1, 9, "ABC", "FIRM")).unwrap();
        let session = sign_request(ZERO_KEY, &negotiate_canonical(1, 2, "XYZ", "FIRM")).unwrap();
        let firm = sign_request(ZERO_KEY, &negotiate_canonical(1, 2, "ABC", "OTHER")).unwrap();

        assert_ne!(base, timestamp);
        assert_ne!(base, uuid);
        assert_ne!(base, session);
        assert_ne!(base, firm);
    }

    #[test]
    fn test_zero_key_decodes_to_32_bytes() {
        let decoded = URL_SAFE_NO_PAD.decode(ZERO_KEY).unwrap();
        assert_eq!(decoded, vec![0u8; 32]);
    }

    #[test]
    fn test_malformed_key_is_fatal() {
        let err = sign_request("not base64url!!", "canonical").unwrap_err();
        assert!(matches!(err, CryptoError::MalformedKey(_)));
    }
}
