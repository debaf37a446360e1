use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Header carrying the hex HMAC of the request body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Compute the HMAC-SHA256 hex digest of a payload.
///
/// Receivers recompute this over the exact raw body bytes with the
/// shared secret and compare digests case-insensitively.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature against a payload and secret.
///
/// The comparison is constant-time to avoid timing side-channels, and
/// digest case does not matter.
pub fn verify(payload: &[u8], secret: &str, signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_verifies() {
        let payload = br#"{"id":"evt_1","type":"OrderCreated"}"#;
        let signature = sign(payload, "s3cr3t");

        assert!(verify(payload, "s3cr3t", &signature));
    }

    #[test]
    fn verify_is_case_insensitive_over_hex() {
        let payload = b"hello";
        let signature = sign(payload, "key").to_uppercase();

        assert!(verify(payload, "key", &signature));
    }

    #[test]
    fn tampered_payload_fails() {
        let signature = sign(b"payload", "key");

        assert!(!verify(b"payloae", "key", &signature));
    }

    #[test]
    fn tampered_signature_fails() {
        let mut signature = sign(b"payload", "key").into_bytes();
        // Flip one hex digit.
        signature[0] = if signature[0] == b'0' { b'1' } else { b'0' };
        let signature = String::from_utf8(signature).unwrap();

        assert!(!verify(b"payload", "key", &signature));
    }

    #[test]
    fn wrong_secret_fails() {
        let signature = sign(b"payload", "key");

        assert!(!verify(b"payload", "other", &signature));
    }

    #[test]
    fn malformed_hex_fails() {
        assert!(!verify(b"payload", "key", "not-hex"));
        assert!(!verify(b"payload", "key", ""));
    }
}
