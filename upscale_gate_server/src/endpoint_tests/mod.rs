mod entitlement;
mod helpers;
mod mocks;
mod token;
mod upscale;
mod webhooks;
