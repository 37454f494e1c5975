use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use log::error;
use serde_json::json;
use thiserror::Error;
use upscale_gate_engine::{
    helpers::{AccessTokenError, WebhookSignatureError},
    EntitlementError,
    ReconcileError,
};

use crate::integrations::replicate::UpstreamError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("No installation id was provided.")]
    MissingInstallId,
    #[error("The installation id is not valid. {0}")]
    InvalidInstallId(String),
    #[error("No bearer token was provided.")]
    MissingAccessToken,
    #[error("{0}")]
    AccessTokenError(#[from] AccessTokenError),
    #[error("Too many requests. Try again after {reset_at}.")]
    RateLimited { reset_at: i64 },
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Payload deserialization error. {0}")]
    CouldNotDeserializePayload(String),
    #[error("Invalid parameter. {0}")]
    InvalidParameter(String),
    #[error("No image was provided.")]
    MissingImage,
    #[error("The request body exceeds the {0} byte limit.")]
    PayloadTooLarge(usize),
    #[error("Unsupported content type: {0}")]
    UnsupportedMediaType(String),
    #[error("A x{0} upscale needs a paid entitlement.")]
    ProRequired(u32),
    #[error("Webhook signature check failed. {0}")]
    InvalidWebhookSignature(#[from] WebhookSignatureError),
    #[error("An error occurred on the storage backend. {0}")]
    BackendError(String),
    #[error("{0}")]
    UpstreamError(#[from] UpstreamError),
}

impl ServerError {
    /// A short, machine-stable identifier for the error. Clients branch on this, never on the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InitializeError(_) => "server_init_failed",
            Self::ConfigurationError(_) => "server_misconfigured",
            Self::IOError(_) => "io_error",
            Self::MissingInstallId => "missing_install_id",
            Self::InvalidInstallId(_) => "invalid_install_id",
            Self::MissingAccessToken => "missing_token",
            Self::AccessTokenError(e) => e.code(),
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidRequestBody(_) => "invalid_request",
            Self::CouldNotDeserializePayload(_) => "invalid_json",
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::MissingImage => "missing_image",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::ProRequired(_) => "pro_required",
            Self::InvalidWebhookSignature(_) => "invalid_signature",
            Self::BackendError(_) => "backend_error",
            Self::UpstreamError(UpstreamError::NotConfigured(_)) => "server_misconfigured",
            Self::UpstreamError(_) => "upstream_error",
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingInstallId => StatusCode::BAD_REQUEST,
            Self::InvalidInstallId(_) => StatusCode::BAD_REQUEST,
            Self::MissingAccessToken => StatusCode::UNAUTHORIZED,
            Self::AccessTokenError(e) => match e {
                AccessTokenError::Malformed(_) => StatusCode::UNAUTHORIZED,
                AccessTokenError::UnsupportedAlgorithm(_) => StatusCode::UNAUTHORIZED,
                AccessTokenError::InvalidSignature => StatusCode::UNAUTHORIZED,
                AccessTokenError::Expired(_) => StatusCode::UNAUTHORIZED,
                AccessTokenError::InvalidAudience(_) => StatusCode::FORBIDDEN,
                AccessTokenError::InvalidScope(_) => StatusCode::FORBIDDEN,
                AccessTokenError::InstallationMismatch => StatusCode::FORBIDDEN,
                AccessTokenError::MissingInstallId => StatusCode::BAD_REQUEST,
                AccessTokenError::MissingSecretConfig => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::CouldNotDeserializePayload(_) => StatusCode::BAD_REQUEST,
            Self::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Self::MissingImage => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::ProRequired(_) => StatusCode::FORBIDDEN,
            Self::InvalidWebhookSignature(_) => StatusCode::UNAUTHORIZED,
            Self::BackendError(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamError(UpstreamError::NotConfigured(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("💻️ {status}: {self}");
        }
        let mut body = json!({ "error": self.code(), "message": self.to_string() });
        if let Self::RateLimited { reset_at } = self {
            body["resetAt"] = json!(reset_at);
        }
        HttpResponse::build(status).insert_header(ContentType::json()).body(body.to_string())
    }
}

impl From<EntitlementError> for ServerError {
    fn from(e: EntitlementError) -> Self {
        match e {
            EntitlementError::InvalidEntitlement => Self::InvalidRequestBody(e.to_string()),
            EntitlementError::BackendError(_) | EntitlementError::SerializationError(_) => {
                Self::BackendError(e.to_string())
            },
        }
    }
}

impl From<ReconcileError> for ServerError {
    fn from(e: ReconcileError) -> Self {
        Self::BackendError(e.to_string())
    }
}
