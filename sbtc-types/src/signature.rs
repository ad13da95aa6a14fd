//! Webhook payload signing and verification.
//!
//! The signature header reads `t=<unix seconds>,v1=<hex hmac-sha256>` where
//! the MAC covers `"{t}.{raw body}"`. Receivers recompute it with the
//! endpoint secret and compare in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_TYPE_HEADER: &str = "X-Webhook-Event";
pub const EVENT_ID_HEADER: &str = "X-Webhook-Id";

fn mac_hex(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Signs `payload` and renders the header value.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    format!("t={},v1={}", timestamp, mac_hex(payload, secret, timestamp))
}

/// Fields of a parsed signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    /// `None` on any malformed input: missing `t`, no `v1`, bad timestamp.
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=')?;
            match key.trim() {
                "t" => timestamp = Some(value.trim().parse::<i64>().ok()?),
                "v1" => signatures.push(value.trim().to_string()),
                _ => {}
            }
        }

        if signatures.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: timestamp?,
            signatures,
        })
    }
}

/// Checks `header` against `raw_payload`. Never panics on bad input.
pub fn verify(raw_payload: &[u8], header: &str, secret: &str) -> bool {
    let Some(parsed) = SignatureHeader::parse(header) else {
        return false;
    };
    let expected = mac_hex(raw_payload, secret, parsed.timestamp);
    parsed
        .signatures
        .iter()
        .any(|candidate| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())))
}

/// [`verify`] plus a replay window: the header timestamp must lie within
/// `tolerance_secs` of `now` in either direction.
pub fn verify_fresh(
    raw_payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> bool {
    let Some(parsed) = SignatureHeader::parse(header) else {
        return false;
    };
    if now.abs_diff(parsed.timestamp) > tolerance_secs.unsigned_abs() {
        return false;
    }
    verify(raw_payload, header, secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;

    #[test]
    fn test_sign_format() {
        let header = sign(PAYLOAD, SECRET, 1_700_000_000);
        assert!(header.starts_with("t=1700000000,v1="));
        let hex_part = header.split("v1=").nth(1).unwrap();
        assert_eq!(hex_part.len(), 64);
    }

    #[test]
    fn test_round_trip() {
        let header = sign(PAYLOAD, SECRET, 1_700_000_000);
        assert!(verify(PAYLOAD, &header, SECRET));
    }

    #[test]
    fn test_altered_payload_fails() {
        let header = sign(PAYLOAD, SECRET, 1_700_000_000);
        for i in 0..PAYLOAD.len() {
            let mut tampered = PAYLOAD.to_vec();
            tampered[i] ^= 0x01;
            assert!(!verify(&tampered, &header, SECRET), "byte {} altered", i);
        }
    }

    #[test]
    fn test_different_timestamp_fails() {
        let header = sign(PAYLOAD, SECRET, 1_700_000_000);
        let sig = header.split("v1=").nth(1).unwrap();
        let forged = format!("t=1700000001,v1={}", sig);
        assert!(!verify(PAYLOAD, &forged, SECRET));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let header = sign(PAYLOAD, SECRET, 1_700_000_000);
        assert!(!verify(PAYLOAD, &header, "whsec_other"));
    }

    #[test]
    fn test_malformed_headers_fail() {
        for header in [
            "",
            "garbage",
            "t=abc,v1=00",
            "t=1700000000",
            "v1=deadbeef",
            "t=1700000000,v1",
            "t=1700000000,v1=not-hex",
        ] {
            assert!(!verify(PAYLOAD, header, SECRET), "{:?}", header);
        }
    }

    #[test]
    fn test_header_with_spaces_and_extra_fields() {
        let header = sign(PAYLOAD, SECRET, 42);
        let spaced = header.replace(',', ", ") + ", v0=legacy";
        assert!(verify(PAYLOAD, &spaced, SECRET));
    }

    #[test]
    fn test_verify_fresh_window() {
        let header = sign(PAYLOAD, SECRET, 1_000);
        assert!(verify_fresh(PAYLOAD, &header, SECRET, 1_200, 300));
        assert!(!verify_fresh(PAYLOAD, &header, SECRET, 1_400, 300));
        assert!(!verify_fresh(PAYLOAD, &header, SECRET, 600, 300));
    }

    #[test]
    fn test_verify_fresh_extreme_timestamps_fail() {
        for header in [
            format!("t={},v1=00", i64::MIN),
            format!("t={},v1=00", i64::MAX),
            sign(PAYLOAD, SECRET, i64::MIN),
        ] {
            assert!(!verify_fresh(PAYLOAD, &header, SECRET, 1_700_000_000, 300));
            assert!(!verify_fresh(PAYLOAD, &header, SECRET, i64::MAX, 300));
        }

        let header = sign(PAYLOAD, SECRET, i64::MIN);
        assert!(verify_fresh(PAYLOAD, &header, SECRET, i64::MIN + 1, 300));
        assert!(!verify_fresh(PAYLOAD, &header, SECRET, i64::MAX, i64::MAX));
    }
}
