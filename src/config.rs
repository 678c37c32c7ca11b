//! Configuration types for the illustration pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`], and handed to each component at
//! construction. Nothing in the library reads process-wide settings except
//! the Gemini API key fallback (`GEMINI_API_KEY`) resolved in
//! [`PipelineConfig::resolve_gemini_api_key`].

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default text-generation candidates, tried in order.
pub const DEFAULT_TEXT_MODELS: &[&str] = &["gemini-2.5-flash", "gemini-flash-latest", "gemini-2.0-flash"];

/// Default image-generation candidates, tried in order.
pub const DEFAULT_IMAGE_MODELS: &[&str] = &[
    "imagen-3.0-generate-001",
    "imagen-4.0-generate-001",
    "gemini-2.0-flash-exp-image-generation",
];

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// How illustration placeholders get their images. Never mixed within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageMode {
    /// Generate each image from its prompt via the image-model candidates.
    #[default]
    Generate,
    /// Assign local pool images cyclically, ignoring the prompts.
    Test,
}

/// Configuration for an illustration pipeline.
///
/// # Example
/// ```rust
/// use book_illustrator::{ImageMode, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .image_mode(ImageMode::Test)
///     .test_image_dir("test_images")
///     .text_models(["gemini-2.5-flash"])
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Generation vs. test-pool image resolution. Default: [`ImageMode::Generate`].
    pub image_mode: ImageMode,

    /// Ordered text-generation model identifiers.
    pub text_models: Vec<String>,

    /// Ordered image-generation model identifiers.
    pub image_models: Vec<String>,

    /// edgequake-llm provider name used for text generation. Default: "gemini".
    pub text_provider: String,

    /// Directory holding the local test-image pool. Default: `test_images`.
    pub test_image_dir: PathBuf,

    /// Optional TrueType font embedded in the PDF. Falls back to Helvetica
    /// silently when missing or unreadable.
    pub font_path: Option<PathBuf>,

    /// Root directory of [`crate::storage::FsStorage`]. Default: `media`.
    pub storage_root: PathBuf,

    /// Where the PDF is written while rendering. `None` uses the OS temp dir.
    pub scratch_dir: Option<PathBuf>,

    /// Back-off applied process-wide after a rate-limit signal. Default: 10.
    pub rate_limit_backoff_secs: u64,

    /// Number of image placeholders resolved concurrently. Default: 1.
    pub image_concurrency: usize,

    /// Caller-side timeout for one model call, in seconds. 0 disables. Default: 120.
    pub api_timeout_secs: u64,

    /// Sampling temperature for the structuring call. Default: 0.7.
    pub temperature: f32,

    /// Illustration count requested from the structuring model. Default: 5–7.
    pub min_illustrations: usize,
    pub max_illustrations: usize,

    /// Gemini API key for image generation. `None` reads `GEMINI_API_KEY`.
    pub gemini_api_key: Option<String>,

    pub gemini_base_url: String,

    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_mode: ImageMode::default(),
            text_models: DEFAULT_TEXT_MODELS.iter().map(|s| s.to_string()).collect(),
            image_models: DEFAULT_IMAGE_MODELS.iter().map(|s| s.to_string()).collect(),
            text_provider: "gemini".to_string(),
            test_image_dir: PathBuf::from("test_images"),
            font_path: Some(PathBuf::from("DejaVu_Sans/DejaVuSans.ttf")),
            storage_root: PathBuf::from("media"),
            scratch_dir: None,
            rate_limit_backoff_secs: 10,
            image_concurrency: 1,
            api_timeout_secs: 120,
            temperature: 0.7,
            min_illustrations: 5,
            max_illustrations: 7,
            gemini_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("image_mode", &self.image_mode)
            .field("text_models", &self.text_models)
            .field("image_models", &self.image_models)
            .field("text_provider", &self.text_provider)
            .field("test_image_dir", &self.test_image_dir)
            .field("font_path", &self.font_path)
            .field("storage_root", &self.storage_root)
            .field("scratch_dir", &self.scratch_dir)
            .field("rate_limit_backoff_secs", &self.rate_limit_backoff_secs)
            .field("image_concurrency", &self.image_concurrency)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("temperature", &self.temperature)
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("gemini_base_url", &self.gemini_base_url)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }

    /// Per-call timeout, or `None` when disabled.
    pub fn api_timeout(&self) -> Option<Duration> {
        (self.api_timeout_secs > 0).then(|| Duration::from_secs(self.api_timeout_secs))
    }

    /// Explicit key first, then `GEMINI_API_KEY`.
    pub fn resolve_gemini_api_key(&self) -> Option<String> {
        self.gemini_api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn image_mode(mut self, mode: ImageMode) -> Self {
        self.config.image_mode = mode;
        self
    }

    /// Shorthand for `image_mode(ImageMode::Test)` / `ImageMode::Generate`.
    pub fn test_mode(self, enabled: bool) -> Self {
        self.image_mode(if enabled { ImageMode::Test } else { ImageMode::Generate })
    }

    pub fn text_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.text_models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn image_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.image_models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn text_provider(mut self, name: impl Into<String>) -> Self {
        self.config.text_provider = name.into();
        self
    }

    pub fn test_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.test_image_dir = dir.into();
        self
    }

    pub fn font_path(mut self, path: Option<PathBuf>) -> Self {
        self.config.font_path = path;
        self
    }

    pub fn storage_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_root = dir.into();
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn rate_limit_backoff_secs(mut self, secs: u64) -> Self {
        self.config.rate_limit_backoff_secs = secs;
        self
    }

    pub fn image_concurrency(mut self, n: usize) -> Self {
        self.config.image_concurrency = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn illustrations(mut self, min: usize, max: usize) -> Self {
        self.config.min_illustrations = min;
        self.config.max_illustrations = max;
        self
    }

    pub fn gemini_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.gemini_api_key = Some(key.into());
        self
    }

    pub fn gemini_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.gemini_base_url = url.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.text_models.iter().all(|m| m.trim().is_empty()) {
            return Err(PipelineError::ConfigurationError(
                "At least one text model is required".into(),
            ));
        }
        if c.image_mode == ImageMode::Generate && c.image_models.iter().all(|m| m.trim().is_empty()) {
            return Err(PipelineError::ConfigurationError(
                "Generation mode requires at least one image model".into(),
            ));
        }
        if c.min_illustrations > c.max_illustrations {
            return Err(PipelineError::ConfigurationError(format!(
                "Illustration range is inverted: {}–{}",
                c.min_illustrations, c.max_illustrations
            )));
        }
        if c.image_concurrency == 0 {
            return Err(PipelineError::ConfigurationError(
                "Image concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.image_mode, ImageMode::Generate);
        assert_eq!(c.text_models[0], "gemini-2.5-flash");
        assert_eq!(c.image_models.len(), 3);
        assert_eq!(c.rate_limit_backoff(), Duration::from_secs(10));
        assert_eq!(c.image_concurrency, 1);
    }

    #[test]
    fn empty_text_models_rejected() {
        let err = PipelineConfig::builder()
            .text_models(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn test_mode_does_not_need_image_models() {
        let c = PipelineConfig::builder()
            .test_mode(true)
            .image_models(Vec::<String>::new())
            .build()
            .expect("test mode ignores image models");
        assert_eq!(c.image_mode, ImageMode::Test);
    }

    #[test]
    fn inverted_illustration_range_rejected() {
        assert!(PipelineConfig::builder().illustrations(8, 3).build().is_err());
    }

    #[test]
    fn zero_image_concurrency_rejected() {
        let err = PipelineConfig::builder().image_concurrency(0).build().unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
        let c = PipelineConfig::builder().image_concurrency(4).build().unwrap();
        assert_eq!(c.image_concurrency, 4);
    }

    #[test]
    fn api_timeout_zero_disables() {
        let c = PipelineConfig::builder().api_timeout_secs(0).build().unwrap();
        assert_eq!(c.api_timeout(), None);
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = PipelineConfig::builder().gemini_api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
