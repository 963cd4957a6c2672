//! Signature scheme for inbound bank-transfer notifications.
//!
//! The notification sender signs the raw JSON body with a shared secret.
//! The header wire format is:
//!
//! ```text
//! Bridgepay-Signature: {unix_timestamp}.{base64_signature}
//! ```
//!
//! where the signature is `HMAC-SHA256("{timestamp}.{json_body}", secret)`.
//! Redelivered notifications are signed again with a fresh timestamp, so a
//! stale signature is rejected even if the body is valid.

/// Header name for the HMAC signature.
pub const SIGNATURE_HEADER: &str = "Bridgepay-Signature";

/// Header name for admin API authentication (plaintext secret).
pub const ADMIN_AUTH_HEADER: &str = "Bridgepay-Admin-Authorization";

/// Maximum allowed age of a signature (in seconds).
pub const MAX_SIGNATURE_AGE: i64 = 5 * 60;

/// Maximum allowed clock skew into the future (in seconds).
pub const MAX_CLOCK_SKEW: i64 = 30;

/// Marker trait for payloads that travel as signed JSON bodies.
pub trait Signature: for<'de> serde::Deserialize<'de> + serde::Serialize {}

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

/// A signed body: the typed payload plus the exact JSON text that was signed.
///
/// Verification always runs over `json`, never over a re-serialisation of
/// `body`, so field order and whitespace chosen by the sender do not matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload<T: Signature> {
    pub body: T,
    pub timestamp: i64,
    pub json: String,
    pub signature: Box<[u8]>,
}

impl<T: Signature> SignedPayload<T> {
    /// Serialize and sign `body` with the current time.
    pub fn sign(body: T, key: &[u8]) -> Result<Self, serde_json::Error> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        Self::sign_at(body, key, now)
    }

    /// Serialize and sign `body` as of `timestamp`.
    pub fn sign_at(body: T, key: &[u8], timestamp: i64) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(&body)?;
        let signature = hmac(key, &signing_input(timestamp, &json));
        Ok(Self {
            body,
            timestamp,
            json,
            signature,
        })
    }

    /// Rebuild a payload from the `Bridgepay-Signature` header and the raw body.
    ///
    /// Does **not** verify; call [`verify`](Self::verify).
    pub fn from_header_and_body(header_value: &str, json: String) -> Result<Self, SignatureError> {
        let (timestamp, signature) = parse_signature_header(header_value)?;
        let body: T = serde_json::from_str(&json)?;
        Ok(Self {
            body,
            timestamp,
            json,
            signature,
        })
    }

    /// Verify the HMAC and the timestamp window, returning the payload.
    pub fn verify(self, key: &[u8]) -> Result<T, SignatureError> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        self.verify_at(key, now)
    }

    /// Verify as of `now` (unix seconds).
    pub fn verify_at(self, key: &[u8], now: i64) -> Result<T, SignatureError> {
        ring::hmac::verify(
            &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
            signing_input(self.timestamp, &self.json).as_bytes(),
            &self.signature,
        )?;
        check_timestamp(self.timestamp, now)?;
        Ok(self.body)
    }

    /// Format the full header value (`{timestamp}.{b64}`).
    pub fn to_header(&self) -> String {
        format_signature_header(self.timestamp, &self.signature)
    }
}

fn signing_input(timestamp: i64, json: &str) -> String {
    format!("{timestamp}.{json}")
}

fn hmac(key: &[u8], data: &str) -> Box<[u8]> {
    let tag = ring::hmac::sign(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        data.as_bytes(),
    );
    tag.as_ref().to_owned().into_boxed_slice()
}

/// Parse a header value (`{timestamp}.{base64}`) into its parts.
pub fn parse_signature_header(value: &str) -> Result<(i64, Box<[u8]>), SignatureError> {
    let (timestamp, encoded) = value
        .trim()
        .split_once('.')
        .ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidFormat)?;
    let signature = fast32::base64::RFC4648_NOPAD
        .decode_str(encoded)
        .map_err(|_| SignatureError::InvalidBase64)?
        .into_boxed_slice();
    Ok((timestamp, signature))
}

/// Format a `{timestamp}.{base64}` header value.
pub fn format_signature_header(timestamp: i64, signature: &[u8]) -> String {
    format!(
        "{}.{}",
        timestamp,
        fast32::base64::RFC4648_NOPAD.encode(signature)
    )
}

/// Check that `timestamp` lies within the accepted window around `now`.
pub fn check_timestamp(timestamp: i64, now: i64) -> Result<(), SignatureError> {
    if now - timestamp > MAX_SIGNATURE_AGE || timestamp - now > MAX_CLOCK_SKEW {
        return Err(SignatureError::Expired);
    }
    Ok(())
}
