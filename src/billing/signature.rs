//! # billing::signature — `Stripe-Signature` verification
//!
//! ```text
//! Stripe-Signature: t=1700000000,v1=5257a869e7ecebeda32affa62cdca3fa51cad7e77a0e56ff536d0ce8e108d8bd,v0=...
//! signed payload  = "{t}.{raw request body}"
//! expected        = hex(HMAC-SHA256(webhook_secret, signed payload))
//! ```
//!
//! The request is accepted when any `v1` entry matches (Stripe sends several
//! while a secret is being rolled) and `t` is within the tolerance window.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed Stripe-Signature header")]
    MalformedHeader,

    #[error("webhook timestamp outside the tolerance window")]
    StaleTimestamp,

    #[error("no matching v1 signature")]
    Mismatch,
}

#[derive(Debug)]
struct ParsedHeader<'a> {
    timestamp:  i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Result<ParsedHeader<'_>, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or(SignatureError::MalformedHeader)?;
        match key {
            "t"  => timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::MalformedHeader)?),
            "v1" => signatures.push(value),
            _    => {} // v0 / future schemes
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(ParsedHeader { timestamp, signatures }),
        _ => Err(SignatureError::MalformedHeader),
    }
}

/// Hex HMAC of `"{timestamp}.{payload}"`.
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies `header` against the raw body.  `now` is unix seconds.
pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;

    if now.abs_diff(parsed.timestamp) > tolerance.as_secs() {
        return Err(SignatureError::StaleTimestamp);
    }

    let expected = hex::decode(compute_signature(secret, parsed.timestamp, payload))
        .map_err(|_| SignatureError::Mismatch)?;

    let matched = parsed
        .signatures
        .iter()
        .filter_map(|sig| hex::decode(sig).ok())
        .any(|provided| provided.len() == expected.len() && bool::from(provided.ct_eq(&expected)));

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
