//! Webhook signature validation.
//!
//! The upstream system signs every delivery with
//! `Signature: t=<unix_seconds>,v1=<hex_hmac_sha256>`, where the digest
//! covers `"{timestamp}.{raw_body}"`. Verification is a pure function of the
//! inputs plus the injected current time: parse the header, check the
//! timestamp against the tolerance window, recompute the HMAC, and compare
//! in constant time.
//!
//! The tolerance window is a coarse replay defense only; true deduplication
//! is owned by the delivery ledger.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default clock-skew tolerance for signature timestamps.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Signature validation errors.
///
/// All variants map to HTTP 401; the distinction exists for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The signature header is absent or empty.
    #[error("signature header missing")]
    MissingHeader,

    /// The header does not match `t=<unix_seconds>,v1=<hex>`.
    #[error("malformed signature header: {0}")]
    MalformedHeader(String),

    /// The timestamp is outside the tolerance window.
    #[error("signature timestamp outside tolerance window")]
    StaleTimestamp,

    /// Digest comparison failed.
    #[error("signature verification failed")]
    VerificationFailed,
}

/// A parsed `t=<unix_seconds>,v1=<hex>` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    /// Unix timestamp the sender signed.
    pub timestamp: i64,
    /// Decoded HMAC-SHA256 digest.
    pub digest: Vec<u8>,
}

/// Parses the signature header into its timestamp and digest.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, SignatureError> {
    if header.is_empty() {
        return Err(SignatureError::MissingHeader);
    }

    let mut timestamp = None;
    let mut digest_hex = None;

    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            return Err(SignatureError::MalformedHeader(format!(
                "expected key=value pairs, got '{part}'"
            )));
        };

        match key.trim() {
            "t" => timestamp = Some(value.trim()),
            "v1" => digest_hex = Some(value.trim()),
            // Unknown keys are ignored so the sender can add schemes.
            _ => {},
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| SignatureError::MalformedHeader("missing 't' component".to_string()))?
        .parse::<i64>()
        .map_err(|_| SignatureError::MalformedHeader("'t' is not a unix timestamp".to_string()))?;

    let digest_hex = digest_hex
        .ok_or_else(|| SignatureError::MalformedHeader("missing 'v1' component".to_string()))?;

    let digest = hex::decode(digest_hex)
        .map_err(|_| SignatureError::MalformedHeader("'v1' is not valid hex".to_string()))?;

    if digest.len() != 32 {
        return Err(SignatureError::MalformedHeader(format!(
            "'v1' must be a 32-byte digest, got {} bytes",
            digest.len()
        )));
    }

    Ok(ParsedSignature { timestamp, digest })
}

/// Verifies a signed payload.
///
/// Checks the timestamp against `now ± tolerance` first (rejecting replays of
/// old captures and signatures from badly skewed clocks), then recomputes the
/// HMAC over `"{timestamp}.{payload}"` and compares digests in constant time.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<(), SignatureError> {
    let parsed = parse_signature_header(header)?;

    let skew = (now.timestamp() - parsed.timestamp).abs();
    if skew > tolerance.num_seconds() {
        return Err(SignatureError::StaleTimestamp);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::VerificationFailed)?;
    mac.update(parsed.timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    // verify_slice is constant-time; never compare digests with ==.
    mac.verify_slice(&parsed.digest).map_err(|_| SignatureError::VerificationFailed)
}

/// Produces a signature header for a payload.
///
/// The sender-side counterpart of [`verify_signature`]; used by tests and by
/// internal systems that feed deliveries into their own Inlet instance.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| HmacSha256::new_from_slice(b"-").expect("hmac accepts any key length"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}
