// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HMAC helpers for subscription client states and post-action payloads.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn sign(secret: &[u8], payload: &str) -> String {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of two secrets.
pub fn secrets_match(expected: &str, actual: &str) -> bool {
    expected.as_bytes().ct_eq(actual.as_bytes()).into()
}

/// Fresh client state for a new subscription owned by `chat_user_id`.
///
/// The provider echoes it on every notification; a timestamp keeps
/// successive subscriptions for the same user distinct.
pub fn new_client_state(secret: &[u8], chat_user_id: &str) -> String {
    let nonce = chrono::Utc::now().timestamp_millis();
    sign(secret, &format!("{}|{:x}", chat_user_id, nonce))
}

/// Signature embedded in interactive post actions sent to `chat_user_id`.
pub fn action_signature(secret: &[u8], chat_user_id: &str) -> String {
    sign(secret, &format!("action|{}", chat_user_id))
}

/// Check an action signature received back from the chat server.
pub fn verify_action_signature(secret: &[u8], chat_user_id: &str, signature: &str) -> bool {
    secrets_match(&action_signature(secret, chat_user_id), signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_signature_round_trip() {
        let secret = b"secret_key";
        let sig = action_signature(secret, "user-1");
        assert!(verify_action_signature(secret, "user-1", &sig));
        assert!(!verify_action_signature(secret, "user-2", &sig));
        assert!(!verify_action_signature(b"wrong_key", "user-1", &sig));
    }

    #[test]
    fn test_secrets_match_rejects_prefix() {
        assert!(secrets_match("abcdef", "abcdef"));
        assert!(!secrets_match("abcdef", "abc"));
        assert!(!secrets_match("abcdef", ""));
    }

    #[test]
    fn test_client_state_is_hex_sha256() {
        let state = new_client_state(b"secret", "user-1");
        assert_eq!(state.len(), 64);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
