//! Process-wide defaults handed to the generator at construction.

use crate::error::{ImageGenError, Result};
use crate::image::providers::bfl::{DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use crate::image::{ProviderKind, DEFAULT_FILENAME_TEMPLATE, DEFAULT_OUTPUT_DIR};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default bound on each backend HTTP call.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Credentials and endpoint for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    /// API key. `None` means the provider cannot be used.
    pub api_key: Option<String>,
    /// API root override.
    pub base_url: Option<String>,
    /// Model used when a request names none.
    pub default_model: Option<String>,
}

impl ProviderSettings {
    /// Returns the key if one is set and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// Configuration for a [`Generator`](crate::Generator).
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Stability AI settings.
    pub stability: ProviderSettings,
    /// Black Forest Labs settings.
    pub bfl: ProviderSettings,
    /// Bound on each backend HTTP call.
    pub http_timeout: Duration,
    /// Delay between job status polls.
    pub poll_interval: Duration,
    /// Status polls made before a job times out.
    pub max_poll_attempts: u32,
    /// Output directory for requests that do not name one.
    pub output_dir: PathBuf,
    /// Filename template for requests that do not name one.
    pub filename_template: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            stability: ProviderSettings::default(),
            bfl: ProviderSettings::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
        }
    }
}

impl GeneratorConfig {
    /// Creates a configuration with defaults and no credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads credentials and overrides from the process environment.
    ///
    /// `STABILITY_API_KEY`, `BFL_API_KEY`, `STABILITY_BASE_URL`,
    /// `BFL_BASE_URL`, `IMAGES_OUTPUT_DIR` and `IMAGES_FILENAME_TEMPLATE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.stability.api_key = var(ProviderKind::Stability.api_key_env_var());
        config.stability.base_url = var("STABILITY_BASE_URL");
        config.bfl.api_key = var(ProviderKind::Bfl.api_key_env_var());
        config.bfl.base_url = var("BFL_BASE_URL");

        if let Some(dir) = var("IMAGES_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(template) = var("IMAGES_FILENAME_TEMPLATE") {
            config.filename_template = template;
        }
        config
    }

    /// Sets the API key of a provider.
    pub fn with_api_key(mut self, kind: ProviderKind, key: impl Into<String>) -> Self {
        self.provider_mut(kind).api_key = Some(key.into());
        self
    }

    /// Overrides the API root of a provider.
    pub fn with_base_url(mut self, kind: ProviderKind, url: impl Into<String>) -> Self {
        self.provider_mut(kind).base_url = Some(url.into());
        self
    }

    /// Sets the model a provider uses when a request names none.
    pub fn with_default_model(mut self, kind: ProviderKind, model: impl Into<String>) -> Self {
        self.provider_mut(kind).default_model = Some(model.into());
        self
    }

    /// Sets the bound on each backend HTTP call.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the job polling cadence.
    pub fn with_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = interval;
        self.max_poll_attempts = max_attempts;
        self
    }

    /// Sets the default output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Sets the default filename template.
    pub fn with_filename_template(mut self, template: impl Into<String>) -> Self {
        self.filename_template = template.into();
        self
    }

    /// Returns the settings of a provider.
    pub fn provider(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::Stability => &self.stability,
            ProviderKind::Bfl => &self.bfl,
        }
    }

    fn provider_mut(&mut self, kind: ProviderKind) -> &mut ProviderSettings {
        match kind {
            ProviderKind::Stability => &mut self.stability,
            ProviderKind::Bfl => &mut self.bfl,
        }
    }

    /// Whether a provider has a usable API key.
    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        self.provider(kind).api_key().is_some()
    }

    /// Returns the API key of a provider or a configuration error.
    pub fn require_api_key(&self, kind: ProviderKind) -> Result<&str> {
        self.provider(kind).api_key().ok_or_else(|| {
            ImageGenError::Configuration(format!(
                "{} environment variable is required for provider '{}'",
                kind.api_key_env_var(),
                kind
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("./images"));
        assert_eq!(config.filename_template, "{{.Timestamp}}-{{.Subject}}");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_poll_attempts, 120);
        assert_eq!(config.http_timeout, Duration::from_secs(120));
        assert!(!config.is_configured(ProviderKind::Stability));
    }

    #[test]
    fn test_from_lookup() {
        let config = GeneratorConfig::from_lookup(lookup(&[
            ("STABILITY_API_KEY", "sk-1"),
            ("BFL_API_KEY", "  "),
            ("BFL_BASE_URL", "http://localhost:9000/v1"),
            ("IMAGES_OUTPUT_DIR", "/tmp/out"),
        ]));

        assert_eq!(config.stability.api_key.as_deref(), Some("sk-1"));
        assert!(config.is_configured(ProviderKind::Stability));
        assert!(!config.is_configured(ProviderKind::Bfl));
        assert_eq!(
            config.bfl.base_url.as_deref(),
            Some("http://localhost:9000/v1")
        );
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.filename_template, DEFAULT_FILENAME_TEMPLATE);
    }

    #[test]
    fn test_require_api_key_names_variable() {
        let config = GeneratorConfig::new().with_api_key(ProviderKind::Bfl, "k");
        assert_eq!(config.require_api_key(ProviderKind::Bfl).unwrap(), "k");

        let err = config.require_api_key(ProviderKind::Stability).unwrap_err();
        assert!(matches!(err, ImageGenError::Configuration(_)));
        assert!(err.to_string().contains("STABILITY_API_KEY"));
    }

    #[test]
    fn test_builder_setters() {
        let config = GeneratorConfig::new()
            .with_base_url(ProviderKind::Stability, "http://x")
            .with_default_model(ProviderKind::Stability, "sd3-medium")
            .with_polling(Duration::from_millis(5), 3)
            .with_filename_template("{{.Hash}}");

        assert_eq!(config.stability.base_url.as_deref(), Some("http://x"));
        assert_eq!(
            config.provider(ProviderKind::Stability).default_model.as_deref(),
            Some("sd3-medium")
        );
        assert_eq!(config.max_poll_attempts, 3);
        assert_eq!(config.filename_template, "{{.Hash}}");
    }
}
