//! Signed QR payloads.
//!
//! Tokens carry their payload: `base64url(payload).hex(hmac).timestamp`.
//! The HMAC-SHA256 covers the encoded payload and the timestamp, so
//! neither can be altered without invalidating the signature. Integrity
//! is checked before freshness: a tampered token is `SignatureInvalid`
//! (reject and alert), a stale one is `SignatureExpired` (ask for a
//! rescan). Verification never mutates state.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{CoreError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock skew for tokens stamped slightly in the future.
const MAX_CLOCK_SKEW_SECS: i64 = 30;

/// Identity embedded in a scannable QR code.
///
/// Identifies the enrollment (account, program) rather than only the
/// card, so a scan can reach an enrolled-but-card-less customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    pub account_id: String,
    pub program_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub card_number: Option<String>,
}

/// Signs and verifies QR payloads with a server-held secret.
pub struct QrSigner {
    secret: Vec<u8>,
    validity_secs: i64,
}

impl QrSigner {
    /// Create a signer. `validity_secs` is the QR rotation period;
    /// tokens older than this are rejected as expired.
    pub fn new(secret: impl Into<Vec<u8>>, validity_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            validity_secs,
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| CoreError::Internal("hmac key rejected".to_string()))
    }

    /// Produce a signed token for a payload at the given instant.
    pub fn sign(&self, payload: &QrPayload, now: DateTime<Utc>) -> Result<String> {
        let encoded = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?);
        let timestamp = now.timestamp();

        let mut mac = self.mac()?;
        mac.update(encoded.as_bytes());
        mac.update(b".");
        mac.update(timestamp.to_string().as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{encoded}.{signature}.{timestamp}"))
    }

    /// Verify a token and extract its payload.
    ///
    /// Malformed tokens are indistinguishable from tampered ones and
    /// report `SignatureInvalid`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<QrPayload> {
        let mut parts = token.split('.');
        let (encoded, signature, timestamp) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(p), Some(s), Some(t), None) => (p, s, t),
                _ => return Err(CoreError::SignatureInvalid),
            };

        let stamped: i64 = timestamp.parse().map_err(|_| CoreError::SignatureInvalid)?;
        let signature = hex::decode(signature).map_err(|_| CoreError::SignatureInvalid)?;

        let mut mac = self.mac()?;
        mac.update(encoded.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        // Constant-time comparison.
        mac.verify_slice(&signature)
            .map_err(|_| CoreError::SignatureInvalid)?;

        let age = now.timestamp() - stamped;
        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(CoreError::SignatureInvalid);
        }
        if age > self.validity_secs {
            return Err(CoreError::SignatureExpired {
                age_secs: age - self.validity_secs,
            });
        }

        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CoreError::SignatureInvalid)?;
        let payload = serde_json::from_slice(&json).map_err(|_| CoreError::SignatureInvalid)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signer() -> QrSigner {
        QrSigner::new(b"test-secret".to_vec(), 900)
    }

    fn payload() -> QrPayload {
        QrPayload {
            account_id: "acct-1".into(),
            program_id: Uuid::new_v4(),
            card_number: Some("1234567890123456".into()),
        }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let signer = signer();
        let now = Utc::now();
        let original = payload();
        let token = signer.sign(&original, now).unwrap();
        let verified = signer.verify(&token, now).unwrap();
        assert_eq!(verified, original);
    }

    #[test]
    fn test_single_altered_byte_fails_as_invalid() {
        let signer = signer();
        let now = Utc::now();
        let token = signer.sign(&payload(), now).unwrap();

        let mut bytes = token.into_bytes();
        bytes[1] = if bytes[1] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        let err = signer.verify(&tampered, now).unwrap_err();
        assert_eq!(err.code(), "SIGNATURE_INVALID");
    }

    #[test]
    fn test_stale_token_fails_as_expired() {
        let signer = signer();
        let signed_at = Utc::now();
        let token = signer.sign(&payload(), signed_at).unwrap();

        let later = signed_at + Duration::seconds(901);
        let err = signer.verify(&token, later).unwrap_err();
        assert_eq!(err.code(), "SIGNATURE_EXPIRED");
    }

    #[test]
    fn test_token_at_window_edge_still_verifies() {
        let signer = signer();
        let signed_at = Utc::now();
        let token = signer.sign(&payload(), signed_at).unwrap();
        assert!(signer.verify(&token, signed_at + Duration::seconds(900)).is_ok());
    }

    #[test]
    fn test_wrong_secret_fails_as_invalid() {
        let now = Utc::now();
        let token = signer().sign(&payload(), now).unwrap();
        let other = QrSigner::new(b"other-secret".to_vec(), 900);
        let err = other.verify(&token, now).unwrap_err();
        assert_eq!(err.code(), "SIGNATURE_INVALID");
    }

    #[test]
    fn test_far_future_token_fails_as_invalid() {
        let signer = signer();
        let now = Utc::now();
        let token = signer.sign(&payload(), now + Duration::seconds(300)).unwrap();
        let err = signer.verify(&token, now).unwrap_err();
        assert_eq!(err.code(), "SIGNATURE_INVALID");
    }

    #[test]
    fn test_malformed_tokens_fail_as_invalid() {
        let signer = signer();
        let now = Utc::now();
        for token in ["", "a.b", "a.b.c.d", "xx.yy.zz", "payload.sig.notanumber"] {
            let err = signer.verify(token, now).unwrap_err();
            assert_eq!(err.code(), "SIGNATURE_INVALID", "token: {token}");
        }
    }
}
