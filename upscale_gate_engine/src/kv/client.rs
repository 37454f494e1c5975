//! A minimal client for REST key-value services that speak the Redis command set over HTTP (e.g. Upstash).
//!
//! Commands are POSTed to the base URL as a JSON array of strings, with a bearer token. Replies are
//! `{"result": <value>}` on success and `{"error": "<message>"}` on failure. Several commands can be sent in one round
//! trip by POSTing an array of arrays to `/pipeline`.
use std::{sync::Arc, time::Duration};

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use upg_common::Secret;

use crate::traits::{DedupError, EntitlementError, RateLimitError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Error)]
pub enum KvError {
    #[error("Could not initialize KV client: {0}")]
    Initialization(String),
    #[error("KV request failed: {0}")]
    Transport(String),
    #[error("KV command failed ({status}): {message}")]
    Command { status: u16, message: String },
    #[error("Unexpected KV response: {0}")]
    UnexpectedResponse(String),
}

impl From<KvError> for EntitlementError {
    fn from(e: KvError) -> Self {
        EntitlementError::BackendError(e.to_string())
    }
}

impl From<KvError> for DedupError {
    fn from(e: KvError) -> Self {
        DedupError(e.to_string())
    }
}

impl From<KvError> for RateLimitError {
    fn from(e: KvError) -> Self {
        RateLimitError(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct KvConfig {
    pub base_url: String,
    pub token: Secret<String>,
    pub timeout: Duration,
}

impl KvConfig {
    pub fn new(base_url: &str, token: Secret<String>) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_string(), token, timeout: DEFAULT_TIMEOUT }
    }
}

#[derive(Debug, Deserialize)]
struct KvReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl KvReply {
    fn into_result(self, status: u16) -> Result<Value, KvError> {
        match self.error {
            Some(message) => Err(KvError::Command { status, message }),
            None => Ok(self.result),
        }
    }
}

#[derive(Clone)]
pub struct KvRestClient {
    base_url: String,
    client: Arc<Client>,
}

impl KvRestClient {
    pub fn new(config: KvConfig) -> Result<Self, KvError> {
        let mut headers = HeaderMap::with_capacity(1);
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.token.reveal()))
            .map_err(|e| KvError::Initialization(e.to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| KvError::Initialization(e.to_string()))?;
        Ok(Self { base_url: config.base_url, client: Arc::new(client) })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Runs a single command, e.g. `["GET", "key"]`.
    pub async fn command(&self, args: &[&str]) -> Result<Value, KvError> {
        trace!("🗄️ KV {}", args.first().unwrap_or(&""));
        let response = self
            .client
            .post(&self.base_url)
            .json(&args)
            .send()
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let reply = response.json::<KvReply>().await.map_err(|e| KvError::UnexpectedResponse(e.to_string()))?;
        reply.into_result(status)
    }

    /// Runs several commands in one round trip. The replies are returned in order. Any failed command fails the whole
    /// call.
    pub async fn pipeline(&self, commands: &[Vec<String>]) -> Result<Vec<Value>, KvError> {
        trace!("🗄️ KV pipeline of {} commands", commands.len());
        let url = format!("{}/pipeline", self.base_url);
        let response =
            self.client.post(url).json(commands).send().await.map_err(|e| KvError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.map_err(|e| KvError::Transport(e.to_string()))?;
            return Err(KvError::Command { status, message });
        }
        let replies =
            response.json::<Vec<KvReply>>().await.map_err(|e| KvError::UnexpectedResponse(e.to_string()))?;
        if replies.len() != commands.len() {
            return Err(KvError::UnexpectedResponse(format!(
                "expected {} replies, got {}",
                commands.len(),
                replies.len()
            )));
        }
        replies.into_iter().map(|r| r.into_result(status)).collect()
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        match self.command(&["GET", key]).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.command(&["SET", key, value]).await.map(|_| ())
    }

    /// `SET key value NX EX ttl`. Returns `true` if the key was set, `false` if it already existed.
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: i64) -> Result<bool, KvError> {
        let ttl = ttl_secs.max(1).to_string();
        match self.command(&["SET", key, value, "NX", "EX", &ttl]).await? {
            Value::Null => Ok(false),
            Value::String(s) if s == "OK" => Ok(true),
            other => Err(KvError::UnexpectedResponse(format!("SET NX replied {other}"))),
        }
    }

    pub async fn incr_by(&self, key: &str, amount: u64) -> Result<i64, KvError> {
        let amount = amount.to_string();
        let value = self.command(&["INCRBY", key, &amount]).await?;
        as_integer(&value)
    }

    pub async fn del(&self, key: &str) -> Result<(), KvError> {
        self.command(&["DEL", key]).await.map(|_| ())
    }
}

/// Integers come back as JSON numbers, but some services stringify them.
pub(crate) fn as_integer(value: &Value) -> Result<i64, KvError> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| KvError::UnexpectedResponse(format!("{n} is not an i64"))),
        Value::String(s) => s.parse::<i64>().map_err(|e| KvError::UnexpectedResponse(format!("{s}: {e}"))),
        other => Err(KvError::UnexpectedResponse(format!("expected an integer, got {other}"))),
    }
}
