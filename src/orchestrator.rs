//! Generation pipeline: normalize, name, generate, save.

use crate::config::GeneratorConfig;
use crate::error::{ImageGenError, Result};
use crate::image::providers::{spec_for, BflProvider, StabilityProvider};
use crate::image::{
    normalize, EchoedParameters, GenerationRequest, GenerationResult, ImageBackend, ImageFormat,
    NormalizedParameters, ProviderKind, ProviderSpec,
};
use crate::template::{render, FilenameContext};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Runs generation requests against the configured providers.
///
/// Each request builds its own backend, so concurrent calls share nothing
/// but the filesystem.
#[derive(Debug, Clone)]
pub struct Generator {
    config: GeneratorConfig,
}

impl Generator {
    /// Creates a generator with explicit configuration.
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Returns what `kind` accepts, honouring a configured default model.
    pub fn spec(&self, kind: ProviderKind) -> ProviderSpec {
        let spec = spec_for(kind);
        match &self.config.provider(kind).default_model {
            Some(model) => spec.with_default_model(model),
            None => spec,
        }
    }

    /// Starts a request using the configured output directory and template.
    pub fn request(&self, prompt: impl Into<String>) -> GenerationRequest {
        GenerationRequest::new(prompt)
            .with_output_dir(self.config.output_dir.clone())
            .with_filename_template(self.config.filename_template.clone())
    }

    fn backend(&self, kind: ProviderKind) -> Result<Box<dyn ImageBackend>> {
        let settings = self.config.provider(kind);
        let api_key = self.config.require_api_key(kind)?;

        let backend: Box<dyn ImageBackend> = match kind {
            ProviderKind::Stability => {
                let mut builder = StabilityProvider::builder()
                    .api_key(api_key)
                    .timeout(self.config.http_timeout);
                if let Some(url) = &settings.base_url {
                    builder = builder.base_url(url);
                }
                Box::new(builder.build()?)
            }
            ProviderKind::Bfl => {
                let mut builder = BflProvider::builder()
                    .api_key(api_key)
                    .timeout(self.config.http_timeout)
                    .poll_interval(self.config.poll_interval)
                    .max_poll_attempts(self.config.max_poll_attempts);
                if let Some(url) = &settings.base_url {
                    builder = builder.base_url(url);
                }
                Box::new(builder.build()?)
            }
        };
        Ok(backend)
    }

    /// Generates one image and saves it.
    ///
    /// Nothing is written unless the backend returned bytes; the file only
    /// appears under its final name once fully written.
    pub async fn run(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let kind: ProviderKind = request
            .provider
            .parse()
            .map_err(ImageGenError::Configuration)?;
        let backend = self.backend(kind)?;
        self.run_with_backend(request, backend.as_ref()).await
    }

    pub(crate) async fn run_with_backend(
        &self,
        request: &GenerationRequest,
        backend: &dyn ImageBackend,
    ) -> Result<GenerationResult> {
        let outcome = self.execute(request, backend).await;
        backend.close().await;

        match &outcome {
            Ok(result) => tracing::info!(
                provider = %result.provider,
                path = %result.saved_path.display(),
                bytes = result.image_size,
                duration_ms = result.duration_ms,
                "image saved"
            ),
            Err(err) => tracing::warn!(provider = %backend.kind(), error = %err, "generation failed"),
        }
        outcome
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        backend: &dyn ImageBackend,
    ) -> Result<GenerationResult> {
        let start = Instant::now();
        let kind = backend.kind();
        let params = normalize(request, &self.spec(kind))?;

        let ctx = FilenameContext::new(&request.prompt, kind.as_str(), &params.model);
        let format = ImageFormat::Png;
        let path = render(
            &request.filename_template,
            &ctx,
            &request.output_dir,
            format.extension(),
        );
        tokio::fs::create_dir_all(&request.output_dir).await?;

        tracing::info!(
            provider = %kind,
            model = %params.model,
            aspect_ratio = params.aspect_ratio.as_str(),
            "generating image"
        );
        let image = backend.generate(&params).await?;
        if image.data.is_empty() {
            return Err(ImageGenError::UnexpectedResponse(format!(
                "{} returned an empty image",
                backend.name()
            )));
        }
        if let Some(actual) = image.format.filter(|f| *f != format) {
            tracing::warn!(?actual, "backend returned a different image format than requested");
        }

        write_atomic(&path, &image.data).await?;

        let metadata = image.metadata;
        Ok(GenerationResult {
            success: true,
            provider: kind,
            model: params.model.clone(),
            image_size: image.data.len(),
            ignored_parameters: params
                .ignored
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            parameters: echo(&params, metadata.seed, metadata.width, metadata.height, format),
            request_id: metadata.request_id,
            saved_path: path,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn echo(
    params: &NormalizedParameters,
    actual_seed: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    format: ImageFormat,
) -> EchoedParameters {
    EchoedParameters {
        prompt: params.prompt.clone(),
        negative_prompt: params.negative_prompt.clone(),
        model: params.model.clone(),
        aspect_ratio: params.aspect_ratio.as_str().to_string(),
        guidance_scale: params.guidance_scale,
        seed: params.seed,
        actual_seed,
        width,
        height,
        output_format: format.as_output_format().to_string(),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes to a sibling temp file and renames it into place.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    if let Err(err) = tokio::fs::write(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}

/// Human-readable summary of a saved image.
pub fn describe_result(result: &GenerationResult) -> String {
    let p = &result.parameters;
    let provider = result.provider.display_name();

    let mut lines = vec![
        "Image generated successfully.".to_string(),
        String::new(),
        format!("- Saved to: {}", result.saved_path.display()),
        format!("- Size: {} bytes", result.image_size),
        format!("- Provider: {}", provider),
        format!("- Model: {}", result.model),
        format!("- Prompt: {}", p.prompt),
    ];
    if let Some(negative) = &p.negative_prompt {
        lines.push(format!("- Negative prompt: {}", negative));
    }
    lines.push(format!("- Aspect ratio: {}", p.aspect_ratio));
    if let (Some(w), Some(h)) = (p.width, p.height) {
        lines.push(format!("- Dimensions: {}x{}", w, h));
    }
    lines.push(format!("- Guidance scale: {}", p.guidance_scale));
    let seed = match p.actual_seed.or(p.seed) {
        Some(seed) => seed.to_string(),
        None => "random".to_string(),
    };
    lines.push(format!("- Seed: {}", seed));
    lines.push(format!("- Format: {}", p.output_format));
    if let Some(id) = &result.request_id {
        lines.push(format!("- Request id: {}", id));
    }
    if !result.ignored_parameters.is_empty() {
        lines.push(format!(
            "- Ignored by {}: {}",
            provider,
            result.ignored_parameters.join(", ")
        ));
    }
    lines.push(format!("- Duration: {} ms", result.duration_ms));

    lines.join("\n")
}

/// Human-readable description of a failed generation.
pub fn describe_error(err: &ImageGenError) -> String {
    format!("Image generation failed ({:?}): {}", err.kind(), err)
}
