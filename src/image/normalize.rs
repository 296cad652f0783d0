//! Coercion of caller parameters into the value sets a backend accepts.
//!
//! Out-of-domain values are replaced by defaults and logged; only prompt
//! misuse is an error.

use crate::error::{ImageGenError, Result};
use crate::image::types::{AspectRatio, GenerationRequest, ProviderKind};
use serde::Serialize;

/// Hard limit on prompt and negative prompt length, in characters.
pub const MAX_PROMPT_CHARS: usize = 10_000;

/// Lower bound of the guidance scale.
pub const MIN_GUIDANCE_SCALE: f64 = 1.0;

/// Upper bound of the guidance scale.
pub const MAX_GUIDANCE_SCALE: f64 = 10.0;

/// Guidance scale used when the caller gives none.
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.0;

/// Largest seed accepted by the backends.
pub const MAX_SEED: u64 = 4_294_967_294;

/// What a backend accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderSpec {
    /// Backend this spec describes.
    pub kind: ProviderKind,
    /// Valid model identifiers.
    pub models: &'static [&'static str],
    /// Model used when the caller's choice is absent or unknown.
    pub default_model: &'static str,
    /// Whether the backend applies negative prompts at all.
    pub supports_negative_prompt: bool,
    /// Models that cannot apply a negative prompt even though the backend can.
    pub negative_prompt_blocked_models: &'static [&'static str],
    /// Whether the backend applies a guidance scale.
    pub supports_guidance_scale: bool,
    /// Whether the backend honours a caller seed.
    pub supports_seed: bool,
}

impl ProviderSpec {
    /// Returns a copy with a different default model.
    ///
    /// Unknown names leave the spec unchanged.
    pub fn with_default_model(mut self, model: &str) -> Self {
        match self.find_model(model) {
            Some(known) => self.default_model = known,
            None => tracing::warn!(
                provider = %self.kind,
                model,
                "configured default model is not valid for this provider, keeping {}",
                self.default_model
            ),
        }
        self
    }

    fn find_model(&self, model: &str) -> Option<&'static str> {
        let wanted = model.trim();
        self.models
            .iter()
            .copied()
            .find(|m| m.eq_ignore_ascii_case(wanted))
    }
}

/// A caller parameter the selected backend does not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoredParameter {
    /// Negative prompt.
    NegativePrompt,
    /// Guidance scale.
    GuidanceScale,
    /// Seed.
    Seed,
}

impl IgnoredParameter {
    /// Returns the tool argument name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NegativePrompt => "negative_prompt",
            Self::GuidanceScale => "guidance_scale",
            Self::Seed => "seed",
        }
    }
}

impl std::fmt::Display for IgnoredParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters guaranteed to satisfy a [`ProviderSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedParameters {
    /// Prompt, unchanged.
    pub prompt: String,
    /// Negative prompt, dropped when the model cannot apply it.
    pub negative_prompt: Option<String>,
    /// Model from the provider's valid set.
    pub model: String,
    /// Aspect ratio from the supported set.
    pub aspect_ratio: AspectRatio,
    /// Guidance scale within `[1.0, 10.0]`.
    pub guidance_scale: f64,
    /// Seed within `[0, MAX_SEED]`.
    pub seed: Option<u64>,
    /// Supplied parameters the backend will not apply.
    pub ignored: Vec<IgnoredParameter>,
}

impl NormalizedParameters {
    /// Returns true if the backend will not apply `param`.
    pub fn is_ignored(&self, param: IgnoredParameter) -> bool {
        self.ignored.contains(&param)
    }
}

/// Clamps a guidance scale into `[1.0, 10.0]`. Non-finite input yields the default.
pub fn clamp_guidance_scale(scale: f64) -> f64 {
    if !scale.is_finite() {
        return DEFAULT_GUIDANCE_SCALE;
    }
    scale.clamp(MIN_GUIDANCE_SCALE, MAX_GUIDANCE_SCALE)
}

/// Normalizes `request` against `spec`.
///
/// Fails only when a prompt is empty or longer than [`MAX_PROMPT_CHARS`].
pub fn normalize(request: &GenerationRequest, spec: &ProviderSpec) -> Result<NormalizedParameters> {
    if request.prompt.trim().is_empty() {
        return Err(ImageGenError::InvalidInput("prompt must not be empty".into()));
    }
    if request.prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(ImageGenError::InvalidInput(format!(
            "prompt must be {} characters or less",
            MAX_PROMPT_CHARS
        )));
    }
    if let Some(negative) = &request.negative_prompt {
        if negative.chars().count() > MAX_PROMPT_CHARS {
            return Err(ImageGenError::InvalidInput(format!(
                "negative prompt must be {} characters or less",
                MAX_PROMPT_CHARS
            )));
        }
    }

    let model = match request.model.as_deref() {
        None => spec.default_model,
        Some(requested) => spec.find_model(requested).unwrap_or_else(|| {
            tracing::warn!(
                provider = %spec.kind,
                model = requested,
                "invalid model, using default {}",
                spec.default_model
            );
            spec.default_model
        }),
    };

    let aspect_ratio = AspectRatio::parse(&request.aspect_ratio).unwrap_or_else(|| {
        tracing::warn!(
            aspect_ratio = %request.aspect_ratio,
            "invalid aspect ratio, using default 1:1"
        );
        AspectRatio::Square
    });

    let guidance_scale = match request.guidance_scale {
        Some(requested) => {
            let clamped = clamp_guidance_scale(requested);
            if clamped != requested {
                tracing::warn!(requested, clamped, "guidance scale out of range, clamped");
            }
            clamped
        }
        None => DEFAULT_GUIDANCE_SCALE,
    };

    let seed = match request.seed {
        Some(seed) if seed > MAX_SEED => {
            tracing::warn!(seed, max = MAX_SEED, "seed out of range, using a random seed");
            None
        }
        other => other,
    };

    let mut ignored = Vec::new();
    let mut negative_prompt = request
        .negative_prompt
        .clone()
        .filter(|n| !n.trim().is_empty());

    if negative_prompt.is_some() {
        if !spec.supports_negative_prompt {
            tracing::info!(provider = %spec.kind, "negative prompts not supported, parameter ignored");
            ignored.push(IgnoredParameter::NegativePrompt);
        } else if spec.negative_prompt_blocked_models.contains(&model) {
            tracing::warn!(model, "negative prompts not supported with this model, dropping it");
            negative_prompt = None;
            ignored.push(IgnoredParameter::NegativePrompt);
        }
    }
    if request.guidance_scale.is_some() && !spec.supports_guidance_scale {
        tracing::info!(provider = %spec.kind, "guidance scale not supported, parameter ignored");
        ignored.push(IgnoredParameter::GuidanceScale);
    }
    if seed.is_some() && !spec.supports_seed {
        tracing::info!(provider = %spec.kind, "custom seeds not supported, parameter ignored");
        ignored.push(IgnoredParameter::Seed);
    }

    Ok(NormalizedParameters {
        prompt: request.prompt.clone(),
        negative_prompt,
        model: model.to_string(),
        aspect_ratio,
        guidance_scale,
        seed,
        ignored,
    })
}
