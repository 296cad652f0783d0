//! Image generation module.

pub mod normalize;
mod provider;
pub mod providers;
mod types;

pub use normalize::{normalize, IgnoredParameter, NormalizedParameters, ProviderSpec};
pub use provider::ImageBackend;
pub use types::{
    AspectRatio, EchoedParameters, GeneratedImage, GenerationMetadata, GenerationRequest,
    GenerationResult, ImageFormat, ProviderKind, DEFAULT_FILENAME_TEMPLATE, DEFAULT_OUTPUT_DIR,
};
