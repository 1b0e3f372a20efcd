use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::marker::PhantomData;

use crate::payments::signature::{sign_hex, verify_hex, SignatureError};
use crate::AppState;

pub const SEPAY_SIGNATURE_HEADER: &str = "X-SePay-Signature";
pub const CASSO_SIGNATURE_HEADER: &str = "X-Casso-Signature";

/// Where a webhook comes from: which header carries its signature and
/// which secret signs it.
pub trait WebhookSource: Send + Sync + 'static {
    const NAME: &'static str;
    const SIGNATURE_HEADER: &'static str;

    fn secret(state: &AppState) -> Option<&str>;
}

/// SePay payment gateway callbacks for provider-minted QRs.
pub struct SepayGateway;

/// SePay bank transfer notifications.
pub struct SepayBank;

/// Casso batch bank notifications.
pub struct Casso;

impl WebhookSource for SepayGateway {
    const NAME: &'static str = "sepay";
    const SIGNATURE_HEADER: &'static str = SEPAY_SIGNATURE_HEADER;

    fn secret(state: &AppState) -> Option<&str> {
        state.sepay_webhook_secret.as_deref()
    }
}

impl WebhookSource for SepayBank {
    const NAME: &'static str = "sepay-bank";
    const SIGNATURE_HEADER: &'static str = SEPAY_SIGNATURE_HEADER;

    fn secret(state: &AppState) -> Option<&str> {
        state.sepay_webhook_secret.as_deref()
    }
}

impl WebhookSource for Casso {
    const NAME: &'static str = "casso";
    const SIGNATURE_HEADER: &'static str = CASSO_SIGNATURE_HEADER;

    fn secret(state: &AppState) -> Option<&str> {
        state.casso_webhook_secret.as_deref()
    }
}

/// Verify a webhook signature over the exact received bytes.
///
/// On mismatch the received and expected signatures are logged; the secret
/// never is.
pub fn verify_signature(
    source: &str,
    secret: Option<&str>,
    body: &[u8],
    signature_header: Option<&str>,
) -> Result<(), SignatureError> {
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::SecretNotConfigured)?;
    let received = signature_header.ok_or(SignatureError::Missing)?;

    verify_hex(secret, body, received).map_err(|e| {
        if e == SignatureError::Mismatch {
            tracing::warn!(
                source,
                received = %received,
                expected = %sign_hex(secret, body),
                "webhook signature mismatch"
            );
        }
        e
    })
}

/// Extractor that verifies the source's signature header against the raw
/// request body using HMAC-SHA256.
pub struct VerifiedWebhook<S> {
    pub body: Bytes,
    _source: PhantomData<S>,
}

#[async_trait]
impl<S: WebhookSource> FromRequest<AppState> for VerifiedWebhook<S> {
    type Rejection = AuthError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let signature = req
            .headers()
            .get(S::SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| AuthError::BodyReadError)?;

        verify_signature(S::NAME, S::secret(state), &body, signature.as_deref())
            .map_err(|e| AuthError::Signature(S::NAME, e))?;

        Ok(VerifiedWebhook {
            body,
            _source: PhantomData,
        })
    }
}

#[derive(Debug)]
pub enum AuthError {
    Signature(&'static str, SignatureError),
    BodyReadError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::Signature(_, SignatureError::Missing) => {
                (StatusCode::UNAUTHORIZED, "Missing webhook signature header")
            }
            AuthError::Signature(_, SignatureError::SecretNotConfigured) => {
                (StatusCode::UNAUTHORIZED, "Webhook secret is not configured")
            }
            AuthError::Signature(_, SignatureError::InvalidFormat) => {
                (StatusCode::UNAUTHORIZED, "Invalid signature format")
            }
            AuthError::Signature(_, SignatureError::Mismatch) => {
                (StatusCode::UNAUTHORIZED, "Signature verification failed")
            }
            AuthError::BodyReadError => (StatusCode::BAD_REQUEST, "Failed to read request body"),
        };

        tracing::warn!("Webhook authentication failed: {:?}", self);
        let body = Json(json!({ "error": message, "status": status.as_u16() }));
        (status, body).into_response()
    }
}
