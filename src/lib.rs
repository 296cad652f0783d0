#![warn(missing_docs)]
//! Text-to-image generation behind a Model Context Protocol tool.
//!
//! A [`GenerationRequest`] is normalized against the selected provider,
//! sent to Stability AI (one synchronous multipart call) or Black Forest Labs
//! (a job that is polled to completion), and the bytes are written to a file
//! named from a template such as `{{.Timestamp}}-{{.Subject}}`.
//!
//! # Quick Start
//!
//! ```no_run
//! use mcp_images::{Generator, GeneratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> mcp_images::Result<()> {
//!     let generator = Generator::new(GeneratorConfig::from_env());
//!     let request = generator
//!         .request("A golden retriever puppy")
//!         .with_provider("bfl")
//!         .with_aspect_ratio("3:2");
//!     let result = generator.run(&request).await?;
//!     println!("saved to {}", result.saved_path.display());
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `cli` (default): the `mcp-images` binary and the stdio MCP server.

pub mod config;
mod error;
pub mod image;
mod orchestrator;
pub mod template;

#[cfg(feature = "cli")]
#[doc(hidden)]
pub mod mcp;

pub use config::{GeneratorConfig, ProviderSettings};
pub use error::{ErrorKind, ImageGenError, Result};
pub use image::providers::{BflProvider, StabilityProvider};
pub use image::{
    AspectRatio, GeneratedImage, GenerationMetadata, GenerationRequest, GenerationResult,
    ImageBackend, ImageFormat, ProviderKind,
};
pub use orchestrator::{describe_error, describe_result, Generator};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::GeneratorConfig;
    pub use crate::error::{ImageGenError, Result};
    pub use crate::image::{GenerationRequest, GenerationResult, ImageBackend};
    pub use crate::orchestrator::Generator;
}
