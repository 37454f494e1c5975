//! Client for the hosted image-upscaling model.
//!
//! A prediction is created with `Prefer: wait`, so short jobs complete within the first request. Jobs that are still
//! `starting` or `processing` when that request returns are polled at the prediction's `urls.get` until they settle
//! or the attempt budget runs out.
use std::{sync::Arc, time::Duration};

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use upg_common::Secret;

pub const DEFAULT_REPLICATE_BASE_URL: &str = "https://api.replicate.com/v1";
/// Real-ESRGAN with optional GFPGAN face enhancement.
pub const DEFAULT_REPLICATE_MODEL: &str =
    "nightmareai/real-esrgan:f121d640bd286e1fdc67f9799164c1d5be36ff74576ee11c803ae5b665dd46aa";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_POLLS: u32 = 90;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("The image provider is not configured. {0}")]
    NotConfigured(String),
    #[error("Could not reach the image provider. {0}")]
    Transport(String),
    #[error("The image provider rejected the request ({status}). {message}")]
    Rejected { status: u16, message: String },
    #[error("The upscale job failed. {0}")]
    JobFailed(String),
    #[error("The upscale job {0} did not finish in time.")]
    TimedOut(String),
    #[error("Unexpected response from the image provider. {0}")]
    UnexpectedResponse(String),
}

/// One upscale job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpscaleRequest {
    /// A public URL or a `data:` URI.
    pub image: String,
    pub scale: u32,
    pub face_enhance: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaleOutput {
    pub job_id: String,
    pub output_url: String,
}

#[allow(async_fn_in_trait)]
pub trait ImageUpscaler {
    async fn upscale(&self, request: &UpscaleRequest) -> Result<UpscaleOutput, UpstreamError>;
}

#[derive(Clone, Debug)]
pub struct ReplicateConfig {
    pub api_token: Option<Secret<String>>,
    /// `owner/name:version` or a bare version id.
    pub model: String,
    pub base_url: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub request_timeout: Duration,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            model: DEFAULT_REPLICATE_MODEL.to_string(),
            base_url: DEFAULT_REPLICATE_BASE_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ReplicateConfig {
    /// The version id, i.e. everything after the `:` in `owner/name:version`.
    pub fn version(&self) -> &str {
        self.model.rsplit_once(':').map(|(_, v)| v).unwrap_or(&self.model).trim()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Clone, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

enum PredictionState {
    Done(UpscaleOutput),
    Pending(Option<String>),
}

impl Prediction {
    fn state(self) -> Result<PredictionState, UpstreamError> {
        match self.status.as_str() {
            "succeeded" => {
                let url = output_url(&self.output).ok_or_else(|| {
                    UpstreamError::UnexpectedResponse(format!("prediction {} succeeded without an output", self.id))
                })?;
                Ok(PredictionState::Done(UpscaleOutput { job_id: self.id, output_url: url }))
            },
            "failed" | "canceled" => {
                let reason = match self.error {
                    Value::String(s) => s,
                    Value::Null => self.status,
                    other => other.to_string(),
                };
                Err(UpstreamError::JobFailed(reason))
            },
            _ => Ok(PredictionState::Pending(self.urls.and_then(|u| u.get))),
        }
    }
}

/// The model returns either a single URL or a list of them. The last entry is the final image.
fn output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().rev().find_map(|v| v.as_str().map(String::from)),
        _ => None,
    }
}

#[derive(Clone)]
pub struct ReplicateClient {
    config: Arc<ReplicateConfig>,
    client: Arc<Client>,
}

impl ReplicateClient {
    pub fn new(config: ReplicateConfig) -> Result<Self, UpstreamError> {
        let mut headers = HeaderMap::with_capacity(1);
        if let Some(token) = &config.api_token {
            let val = HeaderValue::from_str(&format!("Bearer {}", token.reveal()))
                .map_err(|e| UpstreamError::NotConfigured(e.to_string()))?;
            headers.insert(AUTHORIZATION, val);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| UpstreamError::NotConfigured(e.to_string()))?;
        Ok(Self { config: Arc::new(config), client: Arc::new(client) })
    }

    async fn read_prediction(&self, response: reqwest::Response) -> Result<Prediction, UpstreamError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.map_err(|e| UpstreamError::Transport(e.to_string()))?;
            warn!("🖼️ Image provider replied {status}: {message}");
            return Err(UpstreamError::Rejected { status: status.as_u16(), message });
        }
        response.json::<Prediction>().await.map_err(|e| UpstreamError::UnexpectedResponse(e.to_string()))
    }

    async fn poll(&self, job_id: &str, url: &str) -> Result<UpscaleOutput, UpstreamError> {
        for attempt in 1..=self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval).await;
            trace!("🖼️ Polling job {job_id} (attempt {attempt})");
            let response =
                self.client.get(url).send().await.map_err(|e| UpstreamError::Transport(e.to_string()))?;
            match self.read_prediction(response).await?.state()? {
                PredictionState::Done(output) => return Ok(output),
                PredictionState::Pending(_) => continue,
            }
        }
        Err(UpstreamError::TimedOut(job_id.to_string()))
    }
}

impl ImageUpscaler for ReplicateClient {
    async fn upscale(&self, request: &UpscaleRequest) -> Result<UpscaleOutput, UpstreamError> {
        if self.config.api_token.is_none() {
            error!("🖼️ Cannot upscale: UPG_REPLICATE_API_TOKEN is not set.");
            return Err(UpstreamError::NotConfigured("The image provider API token is not set.".into()));
        }
        let body = json!({
            "version": self.config.version(),
            "input": {
                "image": request.image,
                "scale": request.scale,
                "face_enhance": request.face_enhance,
            }
        });
        let url = format!("{}/predictions", self.config.base_url.trim_end_matches('/'));
        debug!("🖼️ Requesting a x{} upscale (face enhance: {})", request.scale, request.face_enhance);
        let response = self
            .client
            .post(url)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        let prediction = self.read_prediction(response).await?;
        let job_id = prediction.id.clone();
        match prediction.state()? {
            PredictionState::Done(output) => {
                info!("🖼️ Upscale job {job_id} finished");
                Ok(output)
            },
            PredictionState::Pending(Some(get_url)) => {
                debug!("🖼️ Upscale job {job_id} is still running. Polling.");
                let output = self.poll(&job_id, &get_url).await?;
                info!("🖼️ Upscale job {job_id} finished");
                Ok(output)
            },
            PredictionState::Pending(None) => {
                Err(UpstreamError::UnexpectedResponse(format!("job {job_id} is pending but has no status URL")))
            },
        }
    }
}
