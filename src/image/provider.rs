//! Image backend trait.

use crate::error::Result;
use crate::image::normalize::NormalizedParameters;
use crate::image::types::{GeneratedImage, ProviderKind};
use async_trait::async_trait;

/// A text-to-image backend.
///
/// Implementations own their HTTP client; nothing is shared between backends.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Generates one image from already-normalized parameters.
    async fn generate(&self, params: &NormalizedParameters) -> Result<GeneratedImage>;

    /// Returns the kind of this backend.
    fn kind(&self) -> ProviderKind;

    /// Returns the name of this backend for display.
    fn name(&self) -> &str {
        self.kind().display_name()
    }

    /// Releases held connection resources.
    ///
    /// Called once per request whether generation succeeded or not.
    async fn close(&self) {}
}
