//! Black Forest Labs (Flux) image generation provider.
//!
//! Generation is a job: submit, poll `get_result` until the job is terminal,
//! then download the signed sample URL without credentials.

use crate::error::{upstream_message, ImageGenError, Result};
use crate::image::normalize::{NormalizedParameters, ProviderSpec};
use crate::image::provider::ImageBackend;
use crate::image::types::{
    AspectRatio, GeneratedImage, GenerationMetadata, ImageFormat, ProviderKind,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_BASE_URL: &str = "https://api.us1.bfl.ai/v1";

/// Default delay between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of status polls before giving up.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 120;

/// Flux model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BflModel {
    /// FLUX1.1 [pro] Ultra.
    FluxPro11Ultra,
    /// FLUX1.1 [pro].
    #[default]
    FluxPro11,
    /// FLUX.1 [pro].
    FluxPro,
    /// FLUX.1 [dev].
    FluxDev,
}

impl BflModel {
    /// Returns the API route segment for this model.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FluxPro11Ultra => "flux-pro-1.1-ultra",
            Self::FluxPro11 => "flux-pro-1.1",
            Self::FluxPro => "flux-pro",
            Self::FluxDev => "flux-dev",
        }
    }
}

const MODELS: &[&str] = &[
    BflModel::FluxPro11Ultra.as_str(),
    BflModel::FluxPro11.as_str(),
    BflModel::FluxPro.as_str(),
    BflModel::FluxDev.as_str(),
];

/// Parameters Black Forest Labs accepts.
pub const SPEC: ProviderSpec = ProviderSpec {
    kind: ProviderKind::Bfl,
    models: MODELS,
    default_model: BflModel::FluxPro11.as_str(),
    supports_negative_prompt: false,
    negative_prompt_blocked_models: &[],
    supports_guidance_scale: false,
    supports_seed: false,
};

/// Pixel dimensions submitted for each aspect ratio.
pub fn dimensions(ratio: AspectRatio) -> (u32, u32) {
    match ratio {
        AspectRatio::Landscape => (1344, 768),
        AspectRatio::Square => (1024, 1024),
        AspectRatio::Ultrawide => (1536, 640),
        AspectRatio::TwoThree => (832, 1216),
        AspectRatio::ThreeTwo => (1216, 832),
        AspectRatio::FourFive => (896, 1152),
        AspectRatio::FiveFour => (1152, 896),
        AspectRatio::Portrait => (768, 1344),
        AspectRatio::UltraTall => (640, 1536),
    }
}

/// Like [`dimensions`], for a raw ratio string. Unrecognized ratios are square.
pub fn dimensions_for(ratio: &str) -> (u32, u32) {
    AspectRatio::parse(ratio)
        .map(dimensions)
        .unwrap_or((1024, 1024))
}

/// Lifecycle of a submitted generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Accepted by the backend, not finished yet.
    Submitted,
    /// Finished; the sample can be downloaded.
    Ready,
    /// Finished unsuccessfully.
    Failed,
    /// Poll budget exhausted before the job finished.
    TimedOut,
}

impl JobStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted)
    }
}

/// What one status poll revealed.
#[derive(Debug, Clone, PartialEq)]
enum PollObservation {
    Pending(String),
    Ready { sample: String, seed: Option<u64> },
    Failed(String),
}

/// Handle to one in-flight job, owned by the polling loop.
#[derive(Debug)]
struct Job {
    id: String,
    status: JobStatus,
    attempts: u32,
}

impl Job {
    fn new(id: String) -> Self {
        Self {
            id,
            status: JobStatus::Submitted,
            attempts: 0,
        }
    }

    /// Moves to `next` unless already terminal. Returns the resulting status.
    fn transition(&mut self, next: JobStatus) -> &JobStatus {
        if !self.status.is_terminal() {
            self.status = next;
        }
        &self.status
    }
}

/// Builder for [`BflProvider`].
#[derive(Debug, Clone)]
pub struct BflProviderBuilder {
    api_key: Option<String>,
    base_url: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
    timeout: Duration,
}

impl Default for BflProviderBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            timeout: Duration::from_secs(120),
        }
    }
}

impl BflProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `BFL_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the API root (default `https://api.us1.bfl.ai/v1`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the delay between status polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets how many status polls are made before timing out.
    pub fn max_poll_attempts(mut self, attempts: u32) -> Self {
        self.max_poll_attempts = attempts;
        self
    }

    /// Sets the bound on each individual HTTP call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the provider, resolving the API key.
    pub fn build(self) -> Result<BflProvider> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var("BFL_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ImageGenError::Configuration("BFL_API_KEY not set and no API key provided".into())
            })?;
        let api_key = api_key
            .strip_prefix("bfl_")
            .map(str::to_string)
            .unwrap_or(api_key);

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ImageGenError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(BflProvider {
            client: Mutex::new(Some(client)),
            api_key,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            poll_interval: self.poll_interval,
            max_poll_attempts: self.max_poll_attempts,
        })
    }
}

/// Black Forest Labs image generation provider.
pub struct BflProvider {
    client: Mutex<Option<reqwest::Client>>,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl BflProvider {
    /// Creates a new [`BflProviderBuilder`].
    pub fn builder() -> BflProviderBuilder {
        BflProviderBuilder::new()
    }

    async fn client(&self) -> Result<reqwest::Client> {
        self.client
            .lock()
            .await
            .clone()
            .ok_or_else(|| ImageGenError::Configuration("BFL provider has been closed".into()))
    }

    fn parse_error(status: u16, text: &str) -> ImageGenError {
        match status {
            402 => ImageGenError::QuotaExceeded("Insufficient BFL credits".into()),
            429 => ImageGenError::RateLimited("Too many active BFL tasks".into()),
            _ => ImageGenError::BackendRejected {
                provider: "bfl",
                status,
                message: upstream_message(text).unwrap_or_else(|| format!("HTTP {} - {}", status, text)),
            },
        }
    }

    async fn submit(&self, client: &reqwest::Client, params: &NormalizedParameters) -> Result<String> {
        let (width, height) = dimensions(params.aspect_ratio);
        let body = BflRequest {
            prompt: &params.prompt,
            width,
            height,
            output_format: ImageFormat::Png.as_output_format(),
        };

        let response = client
            .post(format!("{}/{}", self.base_url, params.model))
            .header("x-key", &self.api_key)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() != 200 {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::parse_error(status.as_u16(), &text));
        }

        let text = response.text().await?;
        let submit: BflSubmitResponse = serde_json::from_str(&text)?;
        Ok(submit.id)
    }

    async fn poll_once(&self, client: &reqwest::Client, job_id: &str) -> Result<PollObservation> {
        let response = client
            .get(format!("{}/get_result", self.base_url))
            .query(&[("id", job_id)])
            .header("x-key", &self.api_key)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::parse_error(status.as_u16(), &text));
        }

        let text = response.text().await?;
        let result: BflResultResponse = serde_json::from_str(&text)?;
        Ok(result.observe())
    }

    /// Polls until the job is terminal or the attempt budget is spent.
    ///
    /// Returns the signed sample URL and the seed the backend reports.
    async fn poll_until_ready(
        &self,
        client: &reqwest::Client,
        job: &mut Job,
    ) -> Result<(String, Option<u64>)> {
        while job.attempts < self.max_poll_attempts {
            tokio::time::sleep(self.poll_interval).await;
            job.attempts += 1;

            match self.poll_once(client, &job.id).await? {
                PollObservation::Pending(status) => {
                    tracing::debug!(
                        job_id = %job.id,
                        status = %status,
                        attempt = job.attempts,
                        "BFL generation pending"
                    );
                }
                PollObservation::Ready { sample, seed } => {
                    job.transition(JobStatus::Ready);
                    return Ok((sample, seed));
                }
                PollObservation::Failed(message) => {
                    job.transition(JobStatus::Failed);
                    return Err(ImageGenError::JobFailed(message));
                }
            }
        }

        job.transition(JobStatus::TimedOut);
        Err(ImageGenError::Timeout(format!(
            "BFL job {} not finished after {} polls ({:?} apart)",
            job.id, job.attempts, self.poll_interval
        )))
    }

    async fn download(&self, client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
        // Signed URL: no credentials.
        let response = client.get(url).send().await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = if status == 403 || status == 410 {
                "signed download URL expired".to_string()
            } else {
                "failed to download image".to_string()
            };
            return Err(ImageGenError::BackendRejected {
                provider: "bfl",
                status,
                message,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ImageBackend for BflProvider {
    async fn generate(&self, params: &NormalizedParameters) -> Result<GeneratedImage> {
        let start = Instant::now();
        let client = self.client().await?;
        let (width, height) = dimensions(params.aspect_ratio);

        tracing::info!(model = %params.model, width, height, "generating image with BFL");

        let mut job = Job::new(self.submit(&client, params).await?);
        tracing::info!(job_id = %job.id, "BFL generation started");

        let (sample, seed) = self.poll_until_ready(&client, &mut job).await?;
        tracing::debug!(job_id = %job.id, attempts = job.attempts, "BFL generation ready");

        let data = self.download(&client, &sample).await?;

        Ok(GeneratedImage::new(
            data,
            ProviderKind::Bfl,
            GenerationMetadata {
                model: Some(params.model.clone()),
                seed,
                request_id: Some(job.id),
                width: Some(width),
                height: Some(height),
                duration_ms: Some(start.elapsed().as_millis() as u64),
            },
        ))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Bfl
    }

    async fn close(&self) {
        if self.client.lock().await.take().is_some() {
            tracing::debug!("closed BFL client");
        }
    }
}

#[derive(Debug, Serialize)]
struct BflRequest<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    output_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct BflSubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BflResultResponse {
    status: String,
    #[serde(default)]
    result: Option<BflResult>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BflResult {
    #[serde(default)]
    sample: Option<String>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl BflResultResponse {
    fn failure_message(self, fallback: &str) -> String {
        self.error
            .or_else(|| self.result.and_then(|r| r.error))
            .or_else(|| self.details.map(|d| d.to_string()))
            .unwrap_or_else(|| fallback.to_string())
    }

    fn observe(self) -> PollObservation {
        match self.status.as_str() {
            "Ready" => match self.result.as_ref().and_then(|r| r.sample.clone()) {
                Some(sample) => PollObservation::Ready {
                    sample,
                    seed: self.result.as_ref().and_then(|r| r.seed),
                },
                None => PollObservation::Failed("Ready status but no sample URL".into()),
            },
            "Failed" | "Error" => PollObservation::Failed(self.failure_message("Unknown error")),
            "Content Moderated" | "Request Moderated" => {
                let status = self.status.clone();
                PollObservation::Failed(self.failure_message(&status))
            }
            "Task not found" => PollObservation::Failed("Task not found".into()),
            _ => PollObservation::Pending(self.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::image::normalize::normalize;
    use crate::image::types::GenerationRequest;
    use httpmock::{
        Method::{GET, POST},
        MockServer,
    };
    use serde_json::json;

    const PNG_BYTES: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3, 4];

    fn provider(server: &MockServer, attempts: u32) -> BflProvider {
        BflProvider::builder()
            .api_key("bfl_secret")
            .base_url(server.url("/v1"))
            .poll_interval(Duration::from_millis(1))
            .max_poll_attempts(attempts)
            .build()
            .unwrap()
    }

    fn params(req: GenerationRequest) -> NormalizedParameters {
        normalize(&req, &SPEC).unwrap()
    }

    #[test]
    fn test_dimensions_table() {
        assert_eq!(dimensions_for("3:2"), (1216, 832));
        assert_eq!(dimensions_for("16:9"), (1344, 768));
        assert_eq!(dimensions_for("9:21"), (640, 1536));
        assert_eq!(dimensions_for("4:5"), (896, 1152));
        assert_eq!(dimensions_for("7:3"), (1024, 1024));
        assert_eq!(dimensions_for(""), (1024, 1024));
    }

    #[test]
    fn test_every_ratio_has_distinct_dimensions() {
        let mut seen: Vec<(u32, u32)> = AspectRatio::ALL.into_iter().map(dimensions).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), AspectRatio::ALL.len());
    }

    #[test]
    fn test_model_as_str() {
        assert_eq!(BflModel::default().as_str(), "flux-pro-1.1");
        assert_eq!(BflModel::FluxPro11Ultra.as_str(), "flux-pro-1.1-ultra");
        assert_eq!(SPEC.models.len(), 4);
    }

    #[test]
    fn test_builder_strips_key_prefix() {
        let provider = BflProviderBuilder::new().api_key("bfl_abc").build().unwrap();
        assert_eq!(provider.api_key, "abc");

        let provider = BflProviderBuilder::new().api_key("abc").build().unwrap();
        assert_eq!(provider.api_key, "abc");
    }

    #[test]
    fn test_job_never_leaves_terminal_status() {
        let mut job = Job::new("job-1".into());
        assert_eq!(job.transition(JobStatus::Submitted), &JobStatus::Submitted);
        assert_eq!(job.transition(JobStatus::Failed), &JobStatus::Failed);
        assert_eq!(job.transition(JobStatus::Ready), &JobStatus::Failed);
        assert_eq!(job.transition(JobStatus::Submitted), &JobStatus::Failed);
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_observe_statuses() {
        let ready: BflResultResponse = serde_json::from_value(json!({
            "id": "j", "status": "Ready",
            "result": {"sample": "https://cdn/x.png", "seed": 7}
        }))
        .unwrap();
        assert_eq!(
            ready.observe(),
            PollObservation::Ready {
                sample: "https://cdn/x.png".into(),
                seed: Some(7)
            }
        );

        let pending: BflResultResponse =
            serde_json::from_value(json!({"id": "j", "status": "Pending", "result": null})).unwrap();
        assert_eq!(pending.observe(), PollObservation::Pending("Pending".into()));

        let failed: BflResultResponse =
            serde_json::from_value(json!({"status": "Failed", "error": "boom"})).unwrap();
        assert_eq!(failed.observe(), PollObservation::Failed("boom".into()));

        let moderated: BflResultResponse =
            serde_json::from_value(json!({"status": "Content Moderated"})).unwrap();
        assert_eq!(
            moderated.observe(),
            PollObservation::Failed("Content Moderated".into())
        );

        let empty_ready: BflResultResponse =
            serde_json::from_value(json!({"status": "Ready", "result": {}})).unwrap();
        assert!(matches!(empty_ready.observe(), PollObservation::Failed(_)));
    }

    #[test]
    fn test_parse_error_known_codes() {
        let err = BflProvider::parse_error(402, "");
        assert_eq!(err.to_string(), "quota exceeded: Insufficient BFL credits");
        let err = BflProvider::parse_error(429, "");
        assert_eq!(err.to_string(), "rate limited: Too many active BFL tasks");
        let err = BflProvider::parse_error(422, r#"{"detail": [{"msg": "bad width"}]}"#);
        assert!(matches!(err, ImageGenError::BackendRejected { status: 422, .. }));
    }

    #[tokio::test]
    async fn test_generate_submit_poll_download() {
        let server = MockServer::start_async().await;
        let submit = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/flux-dev")
                    .header("x-key", "secret")
                    .json_body(json!({
                        "prompt": "A red fox",
                        "width": 1216,
                        "height": 832,
                        "output_format": "png"
                    }));
                then.status(200).json_body(json!({"id": "job-42"}));
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/get_result")
                    .query_param("id", "job-42")
                    .header("x-key", "secret");
                then.status(200).json_body(json!({
                    "id": "job-42",
                    "status": "Ready",
                    "result": {"sample": server.url("/samples/job-42.png"), "seed": 99}
                }));
            })
            .await;
        let download = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/samples/job-42.png")
                    .header_missing("x-key");
                then.status(200).body(PNG_BYTES);
            })
            .await;

        let params = params(
            GenerationRequest::new("A red fox")
                .with_model("flux-dev")
                .with_aspect_ratio("3:2"),
        );
        let image = provider(&server, 5).generate(&params).await.unwrap();

        submit.assert_async().await;
        poll.assert_async().await;
        download.assert_async().await;
        assert_eq!(image.data, PNG_BYTES.to_vec());
        assert_eq!(image.metadata.request_id.as_deref(), Some("job-42"));
        assert_eq!(image.metadata.seed, Some(99));
        assert_eq!(image.metadata.width, Some(1216));
        assert_eq!(image.metadata.height, Some(832));
    }

    #[tokio::test]
    async fn test_generate_surfaces_job_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/flux-pro-1.1");
                then.status(200).json_body(json!({"id": "job-7"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/get_result");
                then.status(200).json_body(json!({
                    "id": "job-7",
                    "status": "Failed",
                    "error": "NSFW content detected"
                }));
            })
            .await;

        let err = provider(&server, 5)
            .generate(&params(GenerationRequest::new("something")))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageGenError::JobFailed(_)));
        assert!(err.to_string().contains("NSFW content detected"));
    }

    #[tokio::test]
    async fn test_generate_times_out_after_attempt_budget() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/flux-pro-1.1");
                then.status(200).json_body(json!({"id": "job-slow"}));
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/get_result");
                then.status(200)
                    .json_body(json!({"id": "job-slow", "status": "Pending", "result": null}));
            })
            .await;

        let err = provider(&server, 3)
            .generate(&params(GenerationRequest::new("slow")))
            .await
            .unwrap_err();

        assert_eq!(poll.calls_async().await, 3);
        assert!(matches!(err, ImageGenError::Timeout(_)));
        assert!(err.to_string().contains("job-slow"));
    }

    #[tokio::test]
    async fn test_submit_maps_quota_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/flux-pro-1.1");
                then.status(402).body("payment required");
            })
            .await;

        let err = provider(&server, 1)
            .generate(&params(GenerationRequest::new("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageGenError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/flux-pro-1.1");
                then.status(200).body("<html>gateway says hi</html>");
            })
            .await;

        let err = provider(&server, 1)
            .generate(&params(GenerationRequest::new("x")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_poll_rejects_malformed_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/flux-pro-1.1");
                then.status(200).json_body(json!({"id": "job-7"}));
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/get_result");
                then.status(200).json_body(json!({"state": "unknown"}));
            })
            .await;

        let err = provider(&server, 3)
            .generate(&params(GenerationRequest::new("x")))
            .await
            .unwrap_err();
        assert_eq!(poll.calls_async().await, 1);
        assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_download_expired_url() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/flux-pro-1.1");
                then.status(200).json_body(json!({"id": "job-9"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/get_result");
                then.status(200).json_body(json!({
                    "status": "Ready",
                    "result": {"sample": server.url("/samples/gone.png")}
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/samples/gone.png");
                then.status(410);
            })
            .await;

        let err = provider(&server, 2)
            .generate(&params(GenerationRequest::new("x")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expired"));
    }
}
