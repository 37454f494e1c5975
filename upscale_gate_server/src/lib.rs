//! # Upscale Gate server
//! This crate hosts the HTTP surface of the upscale gate. It is responsible for:
//! * Issuing short-lived access tokens to extension installations.
//! * Guarding the paid upscale endpoint: token verification, rate limiting and the entitlement check for large scale
//!   factors, all before the image provider is called.
//! * Receiving signed Paddle and Creem webhooks and reconciling them into entitlement records.
//! * Reporting an installation's entitlement status and the early-bird inventory.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/api/token`: Issues access tokens.
//! * `/api/upscale`: The paid image upscale endpoint.
//! * `/api/entitlement`: Entitlement status for an installation.
//! * `/webhooks/paddle` and `/webhooks/creem`: Payment provider webhooks.

pub mod auth;
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod integrations;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod sweeper;
pub mod upscale_input;

#[cfg(test)]
mod endpoint_tests;
