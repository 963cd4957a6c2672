//! Custom Axum extractors for request authentication.
//!
//! - `SignedBody<T>` verifies the `Bridgepay-Signature` header against the
//!   raw JSON body (bank-transfer notifications).
//! - `AdminAuth` checks the `Bridgepay-Admin-Authorization` header against
//!   the hashed admin secret (refunds).
//!
//! Cryptographic checks are delegated to [`bridgepay_sdk::signature`].

use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use bridgepay_sdk::signature::{
    ADMIN_AUTH_HEADER, SIGNATURE_HEADER, Signature, SignatureError, SignedPayload,
};

use crate::state::AppState;

/// Largest notification body accepted.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// A JSON body authenticated by the `Bridgepay-Signature` header.
///
/// ```text
/// Bridgepay-Signature: {unix_timestamp}.{base64_signature}
/// ```
pub struct SignedBody<T: Signature>(pub T);

#[derive(Debug, thiserror::Error)]
pub enum SignedBodyError {
    #[error("missing Bridgepay-Signature header")]
    MissingHeader,
    #[error("invalid Bridgepay-Signature header format")]
    InvalidHeader,
    #[error("invalid signature encoding")]
    InvalidBase64,
    #[error("failed to read request body")]
    BodyReadError,
    #[error("invalid JSON body: {0}")]
    JsonError(serde_json::Error),
    #[error("signature verification failed")]
    VerificationFailed,
}

impl From<SignatureError> for SignedBodyError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidFormat => Self::InvalidHeader,
            SignatureError::InvalidBase64 => Self::InvalidBase64,
            SignatureError::Json(e) => Self::JsonError(e),
            SignatureError::SignatureMismatch | SignatureError::Expired => Self::VerificationFailed,
        }
    }
}

impl IntoResponse for SignedBodyError {
    fn into_response(self) -> Response {
        let status = match self {
            SignedBodyError::MissingHeader | SignedBodyError::VerificationFailed => {
                StatusCode::UNAUTHORIZED
            }
            SignedBodyError::InvalidHeader
            | SignedBodyError::InvalidBase64
            | SignedBodyError::BodyReadError
            | SignedBodyError::JsonError(_) => StatusCode::BAD_REQUEST,
        };
        tracing::warn!(error = %self, "Rejected notification request");
        (status, self.to_string()).into_response()
    }
}

impl<T: Signature + Send> FromRequest<AppState> for SignedBody<T> {
    type Rejection = SignedBodyError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = req
            .headers()
            .get(SIGNATURE_HEADER)
            .ok_or(SignedBodyError::MissingHeader)?
            .to_str()
            .map_err(|_| SignedBodyError::InvalidHeader)?
            .to_owned();

        let body_bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|_| SignedBodyError::BodyReadError)?;
        let json =
            String::from_utf8(body_bytes.to_vec()).map_err(|_| SignedBodyError::BodyReadError)?;

        let signed = SignedPayload::<T>::from_header_and_body(&header_value, json)?;

        let secret = state.webhook_secret.read().await;
        let verified = signed.verify(&secret)?;
        drop(secret);

        Ok(SignedBody(verified))
    }
}

/// Proof that the request carries the admin secret.
pub struct AdminAuth;

#[derive(Debug)]
pub enum AdminAuthError {
    Missing,
    Invalid,
}

impl IntoResponse for AdminAuthError {
    fn into_response(self) -> Response {
        match self {
            AdminAuthError::Missing => {
                (StatusCode::UNAUTHORIZED, "missing admin authorization").into_response()
            }
            AdminAuthError::Invalid => {
                (StatusCode::UNAUTHORIZED, "invalid admin authorization").into_response()
            }
        }
    }
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AdminAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let secret = parts
            .headers
            .get(ADMIN_AUTH_HEADER)
            .ok_or(AdminAuthError::Missing)?
            .to_str()
            .map_err(|_| AdminAuthError::Invalid)?
            .to_owned();

        let admin = state.admin.read().await.clone();
        // argon2 verification blocks
        let verified = tokio::task::spawn_blocking(move || admin.verify(&secret))
            .await
            .unwrap_or(false);
        if !verified {
            tracing::warn!("Rejected admin request");
            return Err(AdminAuthError::Invalid);
        }
        Ok(AdminAuth)
    }
}
