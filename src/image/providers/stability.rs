//! Stability AI image generation provider (synchronous multipart API).

use crate::error::{upstream_message, ImageGenError, Result};
use crate::image::normalize::{NormalizedParameters, ProviderSpec};
use crate::image::provider::ImageBackend;
use crate::image::types::{GeneratedImage, GenerationMetadata, ImageFormat, ProviderKind};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_BASE_URL: &str = "https://api.stability.ai";
const GENERATE_PATH: &str = "/v2beta/stable-image/generate/sd3";
const CLIENT_ID: &str = "mcp-images";

/// Stability AI model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StabilityModel {
    /// SD3 Large.
    Sd3Large,
    /// SD3 Large Turbo.
    Sd3LargeTurbo,
    /// SD3 Medium.
    Sd3Medium,
    /// SD3.5 Large.
    #[default]
    Sd35Large,
    /// SD3.5 Large Turbo.
    Sd35LargeTurbo,
    /// SD3.5 Medium.
    Sd35Medium,
}

impl StabilityModel {
    /// Returns the API model identifier string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sd3Large => "sd3-large",
            Self::Sd3LargeTurbo => "sd3-large-turbo",
            Self::Sd3Medium => "sd3-medium",
            Self::Sd35Large => "sd3.5-large",
            Self::Sd35LargeTurbo => "sd3.5-large-turbo",
            Self::Sd35Medium => "sd3.5-medium",
        }
    }

    /// Turbo variants cannot apply a negative prompt.
    pub const fn supports_negative_prompt(&self) -> bool {
        !matches!(self, Self::Sd3LargeTurbo | Self::Sd35LargeTurbo)
    }
}

const MODELS: &[&str] = &[
    StabilityModel::Sd3Large.as_str(),
    StabilityModel::Sd3LargeTurbo.as_str(),
    StabilityModel::Sd3Medium.as_str(),
    StabilityModel::Sd35Large.as_str(),
    StabilityModel::Sd35LargeTurbo.as_str(),
    StabilityModel::Sd35Medium.as_str(),
];

const TURBO_MODELS: &[&str] = &[
    StabilityModel::Sd3LargeTurbo.as_str(),
    StabilityModel::Sd35LargeTurbo.as_str(),
];

/// Parameters Stability AI accepts.
pub const SPEC: ProviderSpec = ProviderSpec {
    kind: ProviderKind::Stability,
    models: MODELS,
    default_model: StabilityModel::Sd35Large.as_str(),
    supports_negative_prompt: true,
    negative_prompt_blocked_models: TURBO_MODELS,
    supports_guidance_scale: true,
    supports_seed: true,
};

/// Builder for [`StabilityProvider`].
#[derive(Debug, Clone)]
pub struct StabilityProviderBuilder {
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl Default for StabilityProviderBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl StabilityProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `STABILITY_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the API origin (default `https://api.stability.ai`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the bound on the single generation call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the provider, resolving the API key.
    pub fn build(self) -> Result<StabilityProvider> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var("STABILITY_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ImageGenError::Configuration(
                    "STABILITY_API_KEY not set and no API key provided".into(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ImageGenError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(StabilityProvider {
            client: Mutex::new(Some(client)),
            api_key,
            base_url: self.base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Stability AI image generation provider.
pub struct StabilityProvider {
    client: Mutex<Option<reqwest::Client>>,
    api_key: String,
    base_url: String,
}

impl StabilityProvider {
    /// Creates a new [`StabilityProviderBuilder`].
    pub fn builder() -> StabilityProviderBuilder {
        StabilityProviderBuilder::new()
    }

    async fn client(&self) -> Result<reqwest::Client> {
        self.client.lock().await.clone().ok_or_else(|| {
            ImageGenError::Configuration("Stability AI provider has been closed".into())
        })
    }

    fn build_form(params: &NormalizedParameters) -> reqwest::multipart::Form {
        let mut form = reqwest::multipart::Form::new()
            .text("prompt", params.prompt.clone())
            .text("model", params.model.clone())
            .text("output_format", ImageFormat::Png.as_output_format())
            .text("cfg_scale", params.guidance_scale.to_string())
            .text("aspect_ratio", params.aspect_ratio.as_str());

        if let Some(seed) = params.seed {
            form = form.text("seed", seed.to_string());
        }
        if let Some(negative) = &params.negative_prompt {
            form = form.text("negative_prompt", negative.clone());
        }
        form
    }

    fn parse_error(status: u16, text: &str) -> ImageGenError {
        let message = upstream_message(text);
        match status {
            402 => ImageGenError::QuotaExceeded(
                message.unwrap_or_else(|| "Insufficient Stability AI credits".into()),
            ),
            429 => ImageGenError::RateLimited(
                message.unwrap_or_else(|| "Too many Stability AI requests".into()),
            ),
            _ => ImageGenError::BackendRejected {
                provider: "stability",
                status,
                message: message.unwrap_or_else(|| format!("HTTP {} - {}", status, text)),
            },
        }
    }

    /// Reads the backend-assigned seed. Non-numeric values are dropped.
    fn parse_seed(headers: &reqwest::header::HeaderMap) -> Option<u64> {
        let raw = headers.get("seed")?.to_str().ok()?.trim();
        match raw.parse::<u64>() {
            Ok(seed) => Some(seed),
            Err(_) => {
                tracing::warn!(seed = raw, "invalid seed in response");
                None
            }
        }
    }
}

#[async_trait]
impl ImageBackend for StabilityProvider {
    async fn generate(&self, params: &NormalizedParameters) -> Result<GeneratedImage> {
        let start = Instant::now();
        let client = self.client().await?;

        tracing::info!(model = %params.model, "generating image with Stability AI");
        tracing::debug!(prompt = %truncate(&params.prompt, 100), "prompt");

        let response = client
            .post(format!("{}{}", self.base_url, GENERATE_PATH))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "image/*")
            .header("stability-client-id", CLIENT_ID)
            .header("stability-client-version", env!("CARGO_PKG_VERSION"))
            .multipart(Self::build_form(params))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() != 200 {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::parse_error(status.as_u16(), &text));
        }

        let seed = Self::parse_seed(response.headers());
        let data = response.bytes().await?.to_vec();
        if data.is_empty() {
            return Err(ImageGenError::UnexpectedResponse(
                "Stability AI returned an empty image".into(),
            ));
        }

        Ok(GeneratedImage::new(
            data,
            ProviderKind::Stability,
            GenerationMetadata {
                model: Some(params.model.clone()),
                seed,
                request_id: None,
                width: None,
                height: None,
                duration_ms: Some(start.elapsed().as_millis() as u64),
            },
        ))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Stability
    }

    async fn close(&self) {
        if self.client.lock().await.take().is_some() {
            tracing::debug!("closed Stability AI client");
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
