//! ImageAcquirer: attach an image to every `image_prompt` block it can.
//!
//! ## Modes
//!
//! * **Generate**: each prompt runs its own ordered fallback over the image
//!   models. A block whose candidates all fail stays unresolved; that is an
//!   expected outcome, reported in [`ResolutionSummary`], never an error.
//! * **Test**: prompts are ignored and block *i* gets pool image `i mod N`.
//!   An empty pool is a [`PipelineError::ConfigurationError`].
//!
//! Either way every resolved block gets its own stored artifact, and the input
//! [`StructuredContent`] is left untouched: the caller receives a new value.

use crate::config::{ImageMode, PipelineConfig};
use crate::error::{CandidateError, PipelineError};
use crate::model::{ImageHandle, ManuscriptId, ResolutionSummary, StructuredContent};
use crate::pipeline::encode::normalise_to_png;
use crate::pipeline::fallback::{first_success, FallbackPolicy};
use crate::progress::ProgressCallback;
use crate::providers::ImageGenerator;
use crate::storage::Storage;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// File extensions accepted in the test-image pool (compared case-insensitively).
pub const POOL_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct ImageAcquirer {
    mode: ImageMode,
    generator: Option<Arc<dyn ImageGenerator>>,
    storage: Arc<dyn Storage>,
    models: Vec<String>,
    pool_dir: PathBuf,
    concurrency: usize,
    policy: FallbackPolicy,
    progress: Option<ProgressCallback>,
}

impl ImageAcquirer {
    pub fn new(
        config: &PipelineConfig,
        generator: Option<Arc<dyn ImageGenerator>>,
        storage: Arc<dyn Storage>,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            mode: config.image_mode,
            generator,
            storage,
            models: config.image_models.clone(),
            pool_dir: config.test_image_dir.clone(),
            concurrency: config.image_concurrency.max(1),
            policy,
            progress: config.progress_callback.clone(),
        }
    }

    /// Resolve every `image_prompt` block of `content`.
    pub async fn acquire(
        &self,
        id: ManuscriptId,
        content: &StructuredContent,
    ) -> Result<(StructuredContent, ResolutionSummary), PipelineError> {
        let start = Instant::now();
        let prompts: Vec<(usize, String)> = content
            .image_prompts()
            .into_iter()
            .map(|(block, prompt)| (block, prompt.to_string()))
            .collect();
        let total = prompts.len();

        if let Some(cb) = &self.progress {
            cb.on_images_start(total);
        }

        let resolved = match self.mode {
            ImageMode::Generate => self.acquire_generated(id, &prompts).await?,
            ImageMode::Test => self.acquire_from_pool(id, &prompts).await?,
        };

        let summary = ResolutionSummary {
            resolved: resolved.iter().filter(|(_, h)| h.is_some()).count(),
            unresolved: resolved.iter().filter(|(_, h)| h.is_none()).count(),
        };
        info!(
            "Images: {}/{} resolved ({} unresolved) in {:?}",
            summary.resolved,
            total,
            summary.unresolved,
            start.elapsed()
        );

        Ok((content.with_resolved_images(&resolved), summary))
    }

    // ── Generation mode ──────────────────────────────────────────────────

    async fn acquire_generated(
        &self,
        id: ManuscriptId,
        prompts: &[(usize, String)],
    ) -> Result<Vec<(usize, Option<ImageHandle>)>, PipelineError> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }
        let total = prompts.len();

        // `buffered` yields in input order whatever order the calls finish in.
        let results: Vec<Result<(usize, Option<ImageHandle>), PipelineError>> =
            stream::iter(prompts.iter().enumerate())
                .map(|(n, (block, prompt))| async move {
                    self.resolve_generated(id, n, total, prompt)
                        .await
                        .map(|handle| (*block, handle))
                })
                .buffered(self.concurrency)
                .collect()
                .await;

        results.into_iter().collect()
    }

    /// Run the image-model fallback for one prompt.
    ///
    /// `Ok(None)` when every candidate failed. Only storage failures are errors.
    pub async fn resolve_generated(
        &self,
        id: ManuscriptId,
        index: usize,
        total: usize,
        prompt: &str,
    ) -> Result<Option<ImageHandle>, PipelineError> {
        let generator = self.generator.as_deref().ok_or_else(|| {
            PipelineError::ConfigurationError("generation mode needs an image generator".into())
        })?;

        let label = format!("image {}/{}", index + 1, total);
        debug!("{}: {}", label, preview(prompt));

        let outcome = first_success(&label, &self.models, &self.policy, |model| async move {
            let payloads = generator.generate(&model, prompt).await?;
            let mut last = CandidateError::NoImageData;
            for payload in &payloads {
                match normalise_to_png(payload) {
                    Ok(png) => return Ok(png),
                    Err(e) => last = e,
                }
            }
            Err(last)
        })
        .await;

        match outcome {
            Ok((model, png)) => {
                let handle = self.storage.store_image(id, &png, "png", prompt).await?;
                info!("{}: generated by {} → {}", label, model, handle.key);
                if let Some(cb) = &self.progress {
                    cb.on_image_resolved(index, total);
                }
                Ok(Some(handle))
            }
            Err(failures) => {
                let reason = failures
                    .last()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "no image models configured".to_string());
                warn!(
                    "{}: all {} image models failed, block will be left out ({})",
                    label,
                    failures.len(),
                    reason
                );
                if let Some(cb) = &self.progress {
                    cb.on_image_unresolved(index, total, &reason);
                }
                Ok(None)
            }
        }
    }

    // ── Test mode ────────────────────────────────────────────────────────

    async fn acquire_from_pool(
        &self,
        id: ManuscriptId,
        prompts: &[(usize, String)],
    ) -> Result<Vec<(usize, Option<ImageHandle>)>, PipelineError> {
        let pool = discover_pool(&self.pool_dir).await?;
        info!("Test mode: {} pool images for {} prompts", pool.len(), prompts.len());

        let total = prompts.len();
        let mut resolved = Vec::with_capacity(total);
        for (n, (block, prompt)) in prompts.iter().enumerate() {
            let handle = self.resolve_from_pool(id, n, &pool, prompt).await?;
            if let Some(cb) = &self.progress {
                cb.on_image_resolved(n, total);
            }
            resolved.push((*block, Some(handle)));
        }
        Ok(resolved)
    }

    /// Copy pool image `index mod pool.len()` into a new artifact for this block.
    pub async fn resolve_from_pool(
        &self,
        id: ManuscriptId,
        index: usize,
        pool: &[PathBuf],
        prompt: &str,
    ) -> Result<ImageHandle, PipelineError> {
        if pool.is_empty() {
            return Err(PipelineError::ConfigurationError(
                "test-image pool is empty".into(),
            ));
        }
        let source = &pool[index % pool.len()];
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| PipelineError::storage("read test image", source, e))?;
        let ext = extension_of(source).unwrap_or_else(|| "png".to_string());

        let handle = self.storage.store_image(id, &bytes, &ext, prompt).await?;
        debug!("Block image {} ← {}", handle.key, source.display());
        Ok(handle)
    }
}

/// List the test-image pool: image files in `dir`, sorted by file name.
pub async fn discover_pool(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        PipelineError::ConfigurationError(format!(
            "test-image pool '{}' is not readable: {e}",
            dir.display()
        ))
    })?;

    let mut pool = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::storage("list test images", dir, e))?
    {
        let path = entry.path();
        let is_image = extension_of(&path).is_some_and(|ext| POOL_EXTENSIONS.contains(&ext.as_str()));
        if is_image && path.is_file() {
            pool.push(path);
        }
    }
    pool.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    if pool.is_empty() {
        return Err(PipelineError::ConfigurationError(format!(
            "test mode selected but '{}' contains no .png/.jpg/.jpeg images",
            dir.display()
        )));
    }
    Ok(pool)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn preview(prompt: &str) -> String {
    let mut chars = prompt.chars();
    let head: String = chars.by_ref().take(50).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentBlock;
    use crate::pipeline::fallback::BackoffGate;
    use crate::providers::ImagePayload;
    use crate::storage::FsStorage;
    use async_trait::async_trait;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn png(color: [u8; 3]) -> Vec<u8> {
        crate::pipeline::encode::encode_png(&DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb(color))))
            .unwrap()
    }

    fn content(prompts: usize) -> StructuredContent {
        let mut blocks = vec![ContentBlock::text("start")];
        for i in 0..prompts {
            blocks.push(ContentBlock::image_prompt(format!("prompt {i}")));
            blocks.push(ContentBlock::text(format!("after {i}")));
        }
        StructuredContent {
            title: "T".into(),
            author: "A".into(),
            blocks,
        }
    }

    /// Fails every model except `good`, which returns one small PNG.
    struct OneGoodModel {
        good: &'static str,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageGenerator for OneGoodModel {
        async fn generate(&self, model: &str, _prompt: &str) -> Result<Vec<ImagePayload>, CandidateError> {
            self.calls.lock().unwrap().push(model.to_string());
            if model == self.good {
                Ok(vec![ImagePayload {
                    mime_type: "image/png".into(),
                    data: png([0, 128, 0]),
                }])
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn acquirer(
        config: &PipelineConfig,
        generator: Option<Arc<dyn ImageGenerator>>,
        storage: Arc<FsStorage>,
    ) -> ImageAcquirer {
        let policy = FallbackPolicy::new(BackoffGate::new(), Duration::from_millis(1), None);
        ImageAcquirer::new(config, generator, storage, policy)
    }

    #[tokio::test]
    async fn generation_uses_first_model_with_image_data() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FsStorage::open(dir.path()).unwrap());
        let gen = Arc::new(OneGoodModel {
            good: "B",
            calls: Mutex::new(Vec::new()),
        });
        let config = PipelineConfig::builder().image_models(["A", "B", "C"]).build().unwrap();
        let acq = acquirer(&config, Some(gen.clone() as Arc<dyn ImageGenerator>), storage);

        let input = content(2);
        let (out, summary) = acq.acquire(ManuscriptId::new(), &input).await.unwrap();

        assert_eq!(summary, ResolutionSummary { resolved: 2, unresolved: 0 });
        assert_eq!(*gen.calls.lock().unwrap(), vec!["A", "B", "A", "B"]);
        assert!(out.blocks[1].resolved_image().is_some());
        assert_ne!(out.blocks[1].resolved_image(), out.blocks[3].resolved_image());
        // The input value is never mutated.
        assert!(input.blocks[1].resolved_image().is_none());
    }

    #[tokio::test]
    async fn exhausted_candidates_leave_block_unresolved() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FsStorage::open(dir.path()).unwrap());
        let gen = Arc::new(OneGoodModel {
            good: "none",
            calls: Mutex::new(Vec::new()),
        });
        let config = PipelineConfig::builder().image_models(["A", "B"]).build().unwrap();
        let acq = acquirer(&config, Some(gen as Arc<dyn ImageGenerator>), storage);

        let (out, summary) = acq.acquire(ManuscriptId::new(), &content(1)).await.unwrap();
        assert_eq!(summary, ResolutionSummary { resolved: 0, unresolved: 1 });
        assert!(out.blocks[1].resolved_image().is_none());
    }

    #[tokio::test]
    async fn concurrent_generation_keeps_block_order() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FsStorage::open(dir.path()).unwrap());
        let gen = Arc::new(OneGoodModel {
            good: "A",
            calls: Mutex::new(Vec::new()),
        });
        let config = PipelineConfig::builder()
            .image_models(["A"])
            .image_concurrency(3)
            .build()
            .unwrap();
        let acq = acquirer(&config, Some(gen as Arc<dyn ImageGenerator>), storage);

        let (out, _) = acq.acquire(ManuscriptId::new(), &content(5)).await.unwrap();
        for (n, (block, prompt)) in out.image_prompts().into_iter().enumerate() {
            assert_eq!(prompt, format!("prompt {n}"));
            assert_eq!(out.blocks[block].resolved_image().unwrap().prompt, prompt);
        }
    }

    #[tokio::test]
    async fn test_mode_assigns_pool_cyclically_with_distinct_artifacts() {
        let dir = TempDir::new().unwrap();
        let pool_dir = dir.path().join("pool");
        std::fs::create_dir(&pool_dir).unwrap();
        std::fs::write(pool_dir.join("b.PNG"), png([0, 0, 255])).unwrap();
        std::fs::write(pool_dir.join("a.png"), png([255, 0, 0])).unwrap();
        std::fs::write(pool_dir.join("notes.txt"), b"ignored").unwrap();

        let storage = Arc::new(FsStorage::open(dir.path().join("store")).unwrap());
        let config = PipelineConfig::builder()
            .test_mode(true)
            .test_image_dir(&pool_dir)
            .build()
            .unwrap();
        let acq = acquirer(&config, None, storage.clone());

        let (out, summary) = acq.acquire(ManuscriptId::new(), &content(3)).await.unwrap();
        assert_eq!(summary.resolved, 3);

        let handles: Vec<_> = out.blocks.iter().filter_map(|b| b.resolved_image()).collect();
        assert_eq!(handles.len(), 3);
        let keys: std::collections::HashSet<_> = handles.iter().map(|h| h.key.clone()).collect();
        assert_eq!(keys.len(), 3, "every block owns its artifact");

        // Sorted pool: [a.png, b.PNG] → blocks get a, b, a.
        let red = png([255, 0, 0]);
        let blue = png([0, 0, 255]);
        assert_eq!(storage.load_image(handles[0]).await.unwrap(), red);
        assert_eq!(storage.load_image(handles[1]).await.unwrap(), blue);
        assert_eq!(storage.load_image(handles[2]).await.unwrap(), red);
    }

    #[tokio::test]
    async fn empty_pool_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let pool_dir = dir.path().join("empty");
        std::fs::create_dir(&pool_dir).unwrap();
        let storage = Arc::new(FsStorage::open(dir.path().join("store")).unwrap());
        let config = PipelineConfig::builder()
            .test_mode(true)
            .test_image_dir(&pool_dir)
            .build()
            .unwrap();
        let acq = acquirer(&config, None, storage);

        let err = acq.acquire(ManuscriptId::new(), &content(1)).await.unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn preview_truncates_long_prompts() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview(&"x".repeat(60)).chars().count(), 51);
    }
}
