//! Core types for image generation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Default directory generated images are written to.
pub const DEFAULT_OUTPUT_DIR: &str = "./images";

/// Default filename template.
pub const DEFAULT_FILENAME_TEMPLATE: &str = "{{.Timestamp}}-{{.Subject}}";

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format.
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Returns the value backends expect in `output_format` fields.
    pub fn as_output_format(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::WebP => "webp",
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }
}

/// Image provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Stability AI (synchronous multipart API).
    Stability,
    /// Black Forest Labs Flux (asynchronous job API).
    Bfl,
}

impl ProviderKind {
    /// All supported providers, in listing order.
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Stability, ProviderKind::Bfl];

    /// Returns the identifier used in tool arguments and filenames.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stability => "stability",
            Self::Bfl => "bfl",
        }
    }

    /// Returns the name of this provider for display.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Stability => "Stability AI",
            Self::Bfl => "Black Forest Labs (Flux)",
        }
    }

    /// Returns the environment variable holding this provider's API key.
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            Self::Stability => "STABILITY_API_KEY",
            Self::Bfl => "BFL_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stability" | "stability-ai" | "stabilityai" => Ok(Self::Stability),
            "bfl" | "black-forest-labs" | "flux" => Ok(Self::Bfl),
            other => Err(format!(
                "unsupported provider '{}'. Valid values: stability, bfl",
                other
            )),
        }
    }
}

/// The nine aspect ratios accepted by the `generate_image` tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    /// 16:9 landscape (widescreen).
    #[serde(rename = "16:9")]
    Landscape,
    /// 1:1 square.
    #[default]
    #[serde(rename = "1:1")]
    Square,
    /// 21:9 ultrawide.
    #[serde(rename = "21:9")]
    Ultrawide,
    /// 2:3 portrait.
    #[serde(rename = "2:3")]
    TwoThree,
    /// 3:2 landscape.
    #[serde(rename = "3:2")]
    ThreeTwo,
    /// 4:5 portrait.
    #[serde(rename = "4:5")]
    FourFive,
    /// 5:4 landscape.
    #[serde(rename = "5:4")]
    FiveFour,
    /// 9:16 portrait (tall).
    #[serde(rename = "9:16")]
    Portrait,
    /// 9:21 ultra-tall.
    #[serde(rename = "9:21")]
    UltraTall,
}

impl AspectRatio {
    /// Every supported ratio, in the order they are advertised.
    pub const ALL: [AspectRatio; 9] = [
        AspectRatio::Landscape,
        AspectRatio::Square,
        AspectRatio::Ultrawide,
        AspectRatio::TwoThree,
        AspectRatio::ThreeTwo,
        AspectRatio::FourFive,
        AspectRatio::FiveFour,
        AspectRatio::Portrait,
        AspectRatio::UltraTall,
    ];

    /// Returns the aspect ratio as a string (e.g., "16:9").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Square => "1:1",
            Self::Ultrawide => "21:9",
            Self::TwoThree => "2:3",
            Self::ThreeTwo => "3:2",
            Self::FourFive => "4:5",
            Self::FiveFour => "5:4",
            Self::Portrait => "9:16",
            Self::UltraTall => "9:21",
        }
    }

    /// Parses a ratio string such as `"3:2"`. Surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|ar| ar.as_str() == s)
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request to generate and save one image.
///
/// Values are taken as the caller supplied them; the normalizer decides
/// what each backend actually receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The text prompt describing the desired image.
    pub prompt: String,
    /// Things to keep out of the image.
    pub negative_prompt: Option<String>,
    /// Provider identifier (`stability` or `bfl`).
    pub provider: String,
    /// Model variant; the provider default is used when absent or unknown.
    pub model: Option<String>,
    /// Aspect ratio string, e.g. `"16:9"`.
    pub aspect_ratio: String,
    /// Classifier-free guidance scale.
    pub guidance_scale: Option<f64>,
    /// Seed for reproducible generation.
    pub seed: Option<u64>,
    /// Directory the image is written to.
    pub output_dir: PathBuf,
    /// Template used to name the image file.
    pub filename_template: String,
}

impl GenerationRequest {
    /// Creates a new request with the given prompt and default settings.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            provider: ProviderKind::Stability.as_str().to_string(),
            model: None,
            aspect_ratio: AspectRatio::Square.as_str().to_string(),
            guidance_scale: None,
            seed: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
        }
    }

    /// Sets the negative prompt.
    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative.into());
        self
    }

    /// Sets the provider identifier.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Sets the model variant.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the aspect ratio.
    pub fn with_aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.aspect_ratio = ratio.into();
        self
    }

    /// Sets the guidance scale.
    pub fn with_guidance_scale(mut self, scale: f64) -> Self {
        self.guidance_scale = Some(scale);
        self
    }

    /// Sets the seed for deterministic generation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Sets the filename template.
    pub fn with_filename_template(mut self, template: impl Into<String>) -> Self {
        self.filename_template = template.into();
        self
    }
}

/// Metadata a backend reports alongside the image bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationMetadata {
    /// Model used for generation.
    pub model: Option<String>,
    /// Seed assigned by the backend, when it reports one.
    pub seed: Option<u64>,
    /// Backend job identifier (asynchronous backends only).
    pub request_id: Option<String>,
    /// Pixel width requested from the backend, when it takes dimensions.
    pub width: Option<u32>,
    /// Pixel height requested from the backend, when it takes dimensions.
    pub height: Option<u32>,
    /// Generation duration in milliseconds.
    pub duration_ms: Option<u64>,
}

/// A generated image with its data and metadata.
#[derive(Debug, Clone)]
#[must_use = "generated image should be saved or processed"]
pub struct GeneratedImage {
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// Format detected from the bytes, when recognizable.
    pub format: Option<ImageFormat>,
    /// Provider that generated this image.
    pub provider: ProviderKind,
    /// Generation metadata.
    pub metadata: GenerationMetadata,
}

impl GeneratedImage {
    /// Creates a new generated image, detecting the format from magic bytes.
    pub fn new(data: Vec<u8>, provider: ProviderKind, metadata: GenerationMetadata) -> Self {
        let format = ImageFormat::from_magic_bytes(&data);
        Self {
            data,
            format,
            provider,
            metadata,
        }
    }

    /// Returns the size of the image data in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Parameters as they were applied, echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoedParameters {
    /// Prompt sent to the backend.
    pub prompt: String,
    /// Negative prompt sent to the backend, if any survived normalization.
    pub negative_prompt: Option<String>,
    /// Resolved model.
    pub model: String,
    /// Resolved aspect ratio.
    pub aspect_ratio: String,
    /// Guidance scale after clamping.
    pub guidance_scale: f64,
    /// Seed requested by the caller.
    pub seed: Option<u64>,
    /// Seed the backend reports having used.
    pub actual_seed: Option<u64>,
    /// Requested pixel width (dimension-based backends).
    pub width: Option<u32>,
    /// Requested pixel height (dimension-based backends).
    pub height: Option<u32>,
    /// Output encoding requested from the backend.
    pub output_format: String,
}

/// Outcome of one successful generation.
///
/// Only built once the image bytes are on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Always `true`; failures are reported as errors instead.
    pub success: bool,
    /// Provider that produced the image.
    pub provider: ProviderKind,
    /// Resolved model.
    pub model: String,
    /// Size of the saved file in bytes.
    pub image_size: usize,
    /// Parameters as applied.
    pub parameters: EchoedParameters,
    /// Parameters the caller supplied that had no effect on this backend.
    pub ignored_parameters: Vec<String>,
    /// Backend job identifier (asynchronous backends only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Where the image was written.
    pub saved_path: PathBuf,
    /// End-to-end duration in milliseconds.
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_MAGIC: [u8; 12] = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0];
    const WEBP_MAGIC: [u8; 12] = *b"RIFF\x00\x00\x00\x00WEBP";

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            ImageFormat::from_magic_bytes(&PNG_MAGIC),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&JPEG_MAGIC),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&WEBP_MAGIC),
            Some(ImageFormat::WebP)
        );
        assert_eq!(ImageFormat::from_magic_bytes(b"short"), None);
    }

    #[test]
    fn test_aspect_ratio_parse() {
        assert_eq!(AspectRatio::parse("3:2"), Some(AspectRatio::ThreeTwo));
        assert_eq!(AspectRatio::parse(" 9:21 "), Some(AspectRatio::UltraTall));
        assert_eq!(AspectRatio::parse("4:3"), None);
        assert_eq!(AspectRatio::parse(""), None);

        for ratio in AspectRatio::ALL {
            assert_eq!(AspectRatio::parse(ratio.as_str()), Some(ratio));
        }
    }

    #[test]
    fn test_aspect_ratio_serde_uses_ratio_strings() {
        let json = serde_json::to_string(&AspectRatio::FiveFour).unwrap();
        assert_eq!(json, "\"5:4\"");
        let parsed: AspectRatio = serde_json::from_str("\"21:9\"").unwrap();
        assert_eq!(parsed, AspectRatio::Ultrawide);
    }

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!(
            "stability".parse::<ProviderKind>(),
            Ok(ProviderKind::Stability)
        );
        assert_eq!("BFL".parse::<ProviderKind>(), Ok(ProviderKind::Bfl));
        assert!("midjourney".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_provider_kind_display() {
        assert_eq!(ProviderKind::Stability.to_string(), "stability");
        assert_eq!(ProviderKind::Bfl.to_string(), "bfl");
    }

    #[test]
    fn test_request_defaults() {
        let req = GenerationRequest::new("A lighthouse");
        assert_eq!(req.provider, "stability");
        assert_eq!(req.aspect_ratio, "1:1");
        assert_eq!(req.output_dir, PathBuf::from("./images"));
        assert_eq!(req.filename_template, "{{.Timestamp}}-{{.Subject}}");
        assert!(req.model.is_none());
        assert!(req.seed.is_none());
    }

    #[test]
    fn test_generated_image_detects_format() {
        let image = GeneratedImage::new(
            PNG_MAGIC.to_vec(),
            ProviderKind::Stability,
            GenerationMetadata::default(),
        );
        assert_eq!(image.format, Some(ImageFormat::Png));
        assert_eq!(image.size(), 12);
    }
}
