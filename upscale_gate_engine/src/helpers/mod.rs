pub mod access_token;
pub mod webhook_signature;

pub use access_token::{AccessClaims, AccessTokenError, IssuedToken, TokenIssuer, TokenVerifier};
pub use webhook_signature::{SignatureScheme, WebhookSignatureError};
