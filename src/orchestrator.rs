//! Pipeline orchestration: manuscript in, illustrated PDF out.
//!
//! [`Pipeline::run`] sequences the three stages and persists what each one
//! produces, advancing a [`PipelineRun`] through
//! `received → structuring → image_resolving → rendering → persisted → delivered`.
//! Any stage failure moves the run to `failed` and is returned as-is.
//! Artifacts already written (the manuscript, earlier snapshots, stored
//! images) stay in storage; nothing is rolled back.
//!
//! At most one run per manuscript may be in flight. Runs for different
//! manuscripts share only the rate-limit back-off gate.

use crate::config::{ImageMode, PipelineConfig};
use crate::error::PipelineError;
use crate::model::{
    DeliveredBook, Manuscript, ManuscriptId, NewManuscript, PipelineRun, ResolutionSummary, StructuredContent,
};
use crate::pipeline::fallback::{BackoffGate, FallbackPolicy};
use crate::pipeline::images::ImageAcquirer;
use crate::pipeline::render::{self, ImageAssets};
use crate::pipeline::structure::ContentStructurer;
use crate::providers::{GeminiImageGenerator, ImageGenerator, LlmTextGenerator, TextGenerator};
use crate::storage::{FsStorage, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// A configured pipeline. Cheap to share behind an `Arc`; every method
/// takes `&self`.
pub struct Pipeline {
    config: PipelineConfig,
    storage: Arc<dyn Storage>,
    structurer: ContentStructurer,
    images: ImageAcquirer,
}

impl Pipeline {
    /// Assemble a pipeline from explicit collaborators.
    ///
    /// `images` may be `None` only in [`ImageMode::Test`].
    pub fn new(
        config: PipelineConfig,
        storage: Arc<dyn Storage>,
        text: Arc<dyn TextGenerator>,
        images: Option<Arc<dyn ImageGenerator>>,
    ) -> Result<Self, PipelineError> {
        if config.image_mode == ImageMode::Generate && images.is_none() {
            return Err(PipelineError::ConfigurationError(
                "Generation mode requires an image generator".into(),
            ));
        }

        let policy = FallbackPolicy::new(BackoffGate::new(), config.rate_limit_backoff(), config.api_timeout());
        let structurer = ContentStructurer::new(&config, text, policy.clone());
        let acquirer = ImageAcquirer::new(&config, images, Arc::clone(&storage), policy);

        Ok(Self {
            config,
            storage,
            structurer,
            images: acquirer,
        })
    }

    /// Build the production pipeline: filesystem storage under
    /// `storage_root`, text via edgequake-llm and, in generation mode,
    /// images via the Gemini REST API.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::open(config.storage_root.clone())?);
        let text: Arc<dyn TextGenerator> = Arc::new(LlmTextGenerator::from_config(&config));
        let images: Option<Arc<dyn ImageGenerator>> = match config.image_mode {
            ImageMode::Generate => Some(Arc::new(GeminiImageGenerator::from_config(&config)?)),
            ImageMode::Test => None,
        };
        Self::new(config, storage, text, images)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Store a new manuscript and run the pipeline on it.
    ///
    /// The manuscript is persisted before any model is called, so it
    /// survives a failed run and can be retried with [`Pipeline::run`].
    pub async fn submit(&self, manuscript: NewManuscript) -> Result<DeliveredBook, PipelineError> {
        if manuscript.text.trim().is_empty() {
            return Err(PipelineError::InvalidInput("Manuscript text is empty".into()));
        }
        let stored = self.storage.create_manuscript(manuscript).await?;
        info!("Received manuscript {} ({:?} by {:?})", stored.id, stored.title, stored.author);
        self.run(stored.id).await
    }

    /// Run the pipeline on an already stored manuscript.
    pub async fn run(&self, id: ManuscriptId) -> Result<DeliveredBook, PipelineError> {
        let start = Instant::now();
        let manuscript = self.storage.load_manuscript(id).await?;
        let mut run = PipelineRun::new(id);

        match self.drive(&mut run, &manuscript).await {
            Ok(summary) => {
                let pdf = run
                    .pdf
                    .take()
                    .ok_or_else(|| PipelineError::Internal("delivered run has no PDF".into()))?;
                info!(
                    "Book for {} delivered: {} bytes, {} illustrations ({} unresolved) in {}ms",
                    id,
                    pdf.len(),
                    summary.resolved,
                    summary.unresolved,
                    start.elapsed().as_millis()
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_run_complete(summary);
                }
                Ok(DeliveredBook {
                    manuscript_id: id,
                    filename: download_name(id),
                    pdf,
                    summary,
                })
            }
            Err(e) => {
                let failed_in = run.stage();
                run.fail();
                error!("Run for {} failed during {}: {}", id, failed_in, e);
                for failure in e.candidate_failures() {
                    error!("  {}", failure);
                }
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_stage(run.stage());
                }
                Err(e)
            }
        }
    }

    /// Re-render the stored snapshot without calling any model.
    ///
    /// Returns `NotFound` when the manuscript has never been structured.
    pub async fn render_stored(&self, id: ManuscriptId) -> Result<Vec<u8>, PipelineError> {
        render_stored(self.storage.as_ref(), id, self.config.font_path.clone()).await
    }

    async fn drive(&self, run: &mut PipelineRun, manuscript: &Manuscript) -> Result<ResolutionSummary, PipelineError> {
        let id = manuscript.id;

        // ── Step 1: Structure the manuscript ─────────────────────────────────
        self.advance(run);
        let content = self.structurer.structure(manuscript).await?;
        self.save_snapshot(id, &content).await?;

        // ── Step 2: Resolve illustrations ────────────────────────────────────
        self.advance(run);
        let (content, summary) = self.images.acquire(id, &content).await?;
        self.save_snapshot(id, &content).await?;
        run.images = content.blocks.iter().filter_map(|b| b.resolved_image().cloned()).collect();

        // ── Step 3: Render into a scratch file ───────────────────────────────
        self.advance(run);
        let assets = load_assets(self.storage.as_ref(), &content).await?;
        let scratch = self.scratch_file()?;
        let size = render::render_to_file(content.clone(), assets, self.config.font_path.clone(), scratch.path())
            .await?;
        run.content = Some(content);
        info!("Rendered {} bytes for {}", size, id);

        // ── Step 4: Persist the PDF ──────────────────────────────────────────
        let key = self
            .storage
            .import_pdf(id, scratch.path())
            .await
            .map_err(|e| PipelineError::RenderingFailure(format!("cannot persist rendered PDF: {e}")))?;
        drop(scratch);
        self.advance(run);
        info!("Stored book for {} as {}", id, key);

        // ── Step 5: Deliver ──────────────────────────────────────────────────
        run.pdf = Some(self.storage.load_pdf(id).await?);
        self.advance(run);

        Ok(summary)
    }

    fn advance(&self, run: &mut PipelineRun) {
        if let Some(stage) = run.advance() {
            info!("Manuscript {}: {}", run.manuscript_id, stage);
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_stage(stage);
            }
        }
    }

    async fn save_snapshot(&self, id: ManuscriptId, content: &StructuredContent) -> Result<(), PipelineError> {
        let snapshot = content
            .to_snapshot()
            .map_err(|e| PipelineError::Internal(format!("snapshot serialisation failed: {e}")))?;
        self.storage.save_snapshot(id, &snapshot).await
    }

    fn scratch_file(&self) -> Result<tempfile::NamedTempFile, PipelineError> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("book_").suffix(".pdf");
            b
        };
        let file = match self.config.scratch_dir {
            Some(ref dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        file.map_err(|e| PipelineError::RenderingFailure(format!("cannot create scratch file: {e}")))
    }
}

/// Re-render a stored snapshot using nothing but storage.
///
/// No model client is built, so this works without API keys.
pub async fn render_stored(
    storage: &dyn Storage,
    id: ManuscriptId,
    font_path: Option<PathBuf>,
) -> Result<Vec<u8>, PipelineError> {
    let raw = storage
        .load_snapshot(id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("snapshot for {}", id)))?;
    let content = StructuredContent::from_snapshot(&raw).map_err(|e| PipelineError::CorruptRecord {
        path: format!("snapshot of {}", id).into(),
        detail: e.to_string(),
    })?;
    let assets = load_assets(storage, &content).await?;
    render::render_detached(content, assets, font_path).await
}

/// Read the bytes of every resolved image. Images that vanished from
/// storage are left out of the book like unresolved ones.
async fn load_assets(storage: &dyn Storage, content: &StructuredContent) -> Result<ImageAssets, PipelineError> {
    let mut assets = ImageAssets::new();
    for handle in content.blocks.iter().filter_map(|b| b.resolved_image()) {
        if assets.contains_key(&handle.key) {
            continue;
        }
        match storage.load_image(handle).await {
            Ok(bytes) => {
                assets.insert(handle.key.clone(), bytes);
            }
            Err(PipelineError::NotFound(what)) => warn!("Image {} missing from storage: {}", handle.id, what),
            Err(e) => return Err(e),
        }
    }
    Ok(assets)
}

/// File name the book is delivered under.
pub fn download_name(id: ManuscriptId) -> String {
    format!("generated_book_{}.pdf", id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CandidateError;
    use crate::model::RunStage;
    use crate::progress::PipelineProgressCallback;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedText(String);

    #[async_trait]
    impl TextGenerator for FixedText {
        async fn generate(&self, _model: &str, _instruction: &str, _text: &str) -> Result<String, CandidateError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct StageLog(Mutex<Vec<RunStage>>);

    impl PipelineProgressCallback for StageLog {
        fn on_stage(&self, stage: RunStage) {
            self.0.lock().unwrap().push(stage);
        }
    }

    fn pool_with_one_image(dir: &std::path::Path) {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(4, 4, image::Rgb([0, 120, 200])));
        img.save(dir.join("a.png")).unwrap();
    }

    #[tokio::test]
    async fn stages_are_reported_in_order() {
        let root = tempfile::TempDir::new().unwrap();
        let pool = tempfile::TempDir::new().unwrap();
        pool_with_one_image(pool.path());

        let log = Arc::new(StageLog::default());
        let config = PipelineConfig::builder()
            .test_mode(true)
            .test_image_dir(pool.path())
            .font_path(None)
            .storage_root(root.path())
            .scratch_dir(root.path())
            .progress_callback(log.clone())
            .build()
            .unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::open(root.path()).unwrap());
        let text = Arc::new(FixedText(
            r#"{"title":"T","author":"A","content":[{"type":"text","data":"x"},{"type":"image_prompt","data":"y"}]}"#.into(),
        ));
        let pipeline = Pipeline::new(config, storage, text, None).unwrap();

        let book = pipeline.submit(NewManuscript::new("T", "A", "x")).await.unwrap();
        assert_eq!(book.summary, ResolutionSummary { resolved: 1, unresolved: 0 });
        assert_eq!(book.filename, format!("generated_book_{}.pdf", book.manuscript_id));
        assert!(book.pdf.starts_with(b"%PDF-"));
        assert_eq!(
            *log.0.lock().unwrap(),
            vec![
                RunStage::Structuring,
                RunStage::ImageResolving,
                RunStage::Rendering,
                RunStage::Persisted,
                RunStage::Delivered,
            ]
        );

        // No scratch file outlives the run.
        let leftovers: Vec<_> = std::fs::read_dir(root.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("book_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn malformed_reply_fails_in_structuring() {
        let root = tempfile::TempDir::new().unwrap();
        let log = Arc::new(StageLog::default());
        let config = PipelineConfig::builder()
            .test_mode(true)
            .storage_root(root.path())
            .rate_limit_backoff_secs(0)
            .progress_callback(log.clone())
            .build()
            .unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::open(root.path()).unwrap());
        let text = Arc::new(FixedText("I am not JSON".into()));
        let pipeline = Pipeline::new(config, storage, text, None).unwrap();

        let err = pipeline.submit(NewManuscript::new("T", "A", "x")).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_unavailable");
        assert_eq!(*log.0.lock().unwrap(), vec![RunStage::Structuring, RunStage::Failed]);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_storing() {
        let root = tempfile::TempDir::new().unwrap();
        let config = PipelineConfig::builder()
            .test_mode(true)
            .storage_root(root.path())
            .build()
            .unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::open(root.path()).unwrap());
        let pipeline = Pipeline::new(config, storage, Arc::new(FixedText(String::new())), None).unwrap();

        let err = pipeline.submit(NewManuscript::new("T", "A", "  \n")).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        let stored = std::fs::read_dir(root.path().join("books")).unwrap().count();
        assert_eq!(stored, 0);
    }

    #[test]
    fn generate_mode_needs_an_image_generator() {
        let root = tempfile::TempDir::new().unwrap();
        let config = PipelineConfig::builder().storage_root(root.path()).build().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::open(root.path()).unwrap());
        let err = Pipeline::new(config, storage, Arc::new(FixedText(String::new())), None)
            .err()
            .expect("must be rejected");
        assert_eq!(err.kind(), "configuration_error");
    }

    #[tokio::test]
    async fn render_stored_without_snapshot_is_not_found() {
        let root = tempfile::TempDir::new().unwrap();
        let config = PipelineConfig::builder()
            .test_mode(true)
            .storage_root(root.path())
            .build()
            .unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::open(root.path()).unwrap());
        let m = storage.create_manuscript(NewManuscript::new("T", "A", "x")).await.unwrap();
        let pipeline = Pipeline::new(config, storage, Arc::new(FixedText(String::new())), None).unwrap();

        let err = pipeline.render_stored(m.id).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_reported() {
        let root = tempfile::TempDir::new().unwrap();
        let storage = FsStorage::open(root.path()).unwrap();
        let m = storage.create_manuscript(NewManuscript::new("T", "A", "x")).await.unwrap();
        storage.save_snapshot(m.id, "{not json").await.unwrap();

        let err = render_stored(&storage, m.id, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::CorruptRecord { .. }), "{err:?}");
    }
}
