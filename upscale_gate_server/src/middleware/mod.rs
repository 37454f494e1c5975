mod webhook_signature;

pub use webhook_signature::{WebhookSecrets, WebhookSignatureFactory, WebhookSignatureService};
