// src/signature.rs
//! HMAC verification for inbound push notifications.
//!
//! Two schemes exist because the notification sources hash differently:
//! the video-platform hub signs with `sha1=<hex>` in `x-hub-signature`,
//! the social platform with `sha256=<base64>` in
//! `x-twitter-webhooks-signature`. One scheme is pinned per provider.
//!
//! Verification happens over the fully buffered raw body, before the
//! payload is parsed or acted on in any way. The comparison runs in
//! constant time via `Mac::verify_slice`; mismatched lengths and bad
//! encodings are plain rejections, never panics.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::error::{IngestError, IngestResult};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// `sha1=<hex digest>` — video-platform hub notifications.
    Sha1Hex,
    /// `sha256=<base64 digest>` — social-platform notifications.
    Sha256Base64,
}

impl SignatureScheme {
    fn prefix(&self) -> &'static str {
        match self {
            SignatureScheme::Sha1Hex => "sha1=",
            SignatureScheme::Sha256Base64 => "sha256=",
        }
    }
}

/// Everything needed for one verification call. Constructed per inbound
/// request and discarded afterwards.
pub struct SignatureContext<'a> {
    pub scheme: SignatureScheme,
    pub secret: &'a str,
    pub payload: &'a [u8],
    pub provided: &'a str,
}

impl SignatureContext<'_> {
    /// Verify the provided signature against `HMAC(secret, payload)`.
    /// Every failure mode collapses to `SignatureMismatch`; the caller
    /// must reject the request outright without parsing the payload.
    pub fn verify(&self) -> IngestResult<()> {
        let encoded = self
            .provided
            .strip_prefix(self.scheme.prefix())
            .unwrap_or(self.provided);

        let raw: Vec<u8> = match self.scheme {
            SignatureScheme::Sha1Hex => {
                hex::decode(encoded).map_err(|_| IngestError::SignatureMismatch)?
            }
            SignatureScheme::Sha256Base64 => BASE64
                .decode(encoded)
                .map_err(|_| IngestError::SignatureMismatch)?,
        };

        let ok = match self.scheme {
            SignatureScheme::Sha1Hex => HmacSha1::new_from_slice(self.secret.as_bytes())
                .map(|mut mac| {
                    mac.update(self.payload);
                    mac.verify_slice(&raw).is_ok()
                })
                .unwrap_or(false),
            SignatureScheme::Sha256Base64 => HmacSha256::new_from_slice(self.secret.as_bytes())
                .map(|mut mac| {
                    mac.update(self.payload);
                    mac.verify_slice(&raw).is_ok()
                })
                .unwrap_or(false),
        };

        if ok {
            Ok(())
        } else {
            Err(IngestError::SignatureMismatch)
        }
    }
}

/// Compute the `sha256=<base64>` proof of secret possession for a
/// challenge token (the social platform's CRC handshake).
pub fn challenge_proof(secret: &str, token: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(token.as_bytes());
    format!("sha256={}", BASE64.encode(mac.finalize().into_bytes()))
}

/// Compute the signature a hub would attach to `payload`; used by tests
/// and by outbound notification plumbing.
pub fn sign(scheme: SignatureScheme, secret: &str, payload: &[u8]) -> String {
    match scheme {
        SignatureScheme::Sha1Hex => {
            let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(payload);
            format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
        }
        SignatureScheme::Sha256Base64 => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(payload);
            format!("sha256={}", BASE64.encode(mac.finalize().into_bytes()))
        }
    }
}
