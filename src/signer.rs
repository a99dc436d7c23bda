//! Payload signing seam.
//!
//! Signing is an external capability from the engine's point of view: the
//! executor asks a [`Signer`] for a signature header value and passes it
//! through. The default implementation computes HMAC-SHA256 over
//! `{timestamp}.{body}` so subscribers can verify both integrity and
//! freshness.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Produces the value for the signature header of an outgoing delivery.
pub trait Signer: Send + Sync {
    /// Compute the signature header value for a payload.
    ///
    /// `secret` is the subscription's opaque signing credential; `timestamp`
    /// is the unix-seconds string also sent in the timestamp header.
    fn sign(&self, secret: &str, timestamp: &str, body: &[u8]) -> String;
}

/// Default signer: `sha256=<hex(hmac_sha256(secret, timestamp + "." + body))>`.
#[derive(Debug, Clone, Default)]
pub struct HmacSigner;

impl Signer for HmacSigner {
    fn sign(&self, secret: &str, timestamp: &str, body: &[u8]) -> String {
        format!("sha256={}", compute_hmac_signature(secret, timestamp, body))
    }
}

/// Compute the hex-encoded HMAC-SHA256 signature over `{timestamp}.{body}`.
pub fn compute_hmac_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");

    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    hex::encode(mac.finalize().into_bytes())
}

/// Verify an HMAC-SHA256 signature using constant-time comparison.
pub fn verify_hmac_signature(
    expected_hex: &str,
    secret: &str,
    timestamp: &str,
    body: &[u8],
) -> bool {
    let computed = compute_hmac_signature(secret, timestamp, body);
    constant_time_eq(expected_hex.as_bytes(), computed.as_bytes())
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_signature_deterministic() {
        let sig1 = compute_hmac_signature("secret", "1754400000", b"payload");
        let sig2 = compute_hmac_signature("secret", "1754400000", b"payload");
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn test_hmac_signature_changes_with_inputs() {
        let base = compute_hmac_signature("secret", "1754400000", b"payload");
        assert_ne!(base, compute_hmac_signature("other", "1754400000", b"payload"));
        assert_ne!(base, compute_hmac_signature("secret", "1754400001", b"payload"));
        assert_ne!(base, compute_hmac_signature("secret", "1754400000", b"other"));
    }

    #[test]
    fn test_hmac_signature_is_hex_encoded() {
        let sig = compute_hmac_signature("secret", "1754400000", b"payload");
        // SHA256 = 32 bytes = 64 hex chars
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signer_header_format() {
        let sig = HmacSigner.sign("secret", "1754400000", b"payload");
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
    }

    #[test]
    fn test_verify_round_trip() {
        let secret = "whsec_test";
        let timestamp = "1754400000";
        let body = b"test-body";

        let sig = compute_hmac_signature(secret, timestamp, body);
        assert!(verify_hmac_signature(&sig, secret, timestamp, body));
        assert!(!verify_hmac_signature(&sig, "wrong", timestamp, body));
    }

    #[test]
    fn test_verify_invalid_signature() {
        assert!(!verify_hmac_signature(
            "invalid-hex",
            "secret",
            "1754400000",
            b"payload"
        ));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"hi"));
        assert!(!constant_time_eq(b"hello", b"world"));
    }
}
