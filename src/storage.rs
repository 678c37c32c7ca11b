//! Durable storage collaborator.
//!
//! The pipeline persists four kinds of objects, all scoped to a
//! [`ManuscriptId`]: the manuscript record, the structured-content snapshot,
//! image artifacts and the final PDF. [`Storage`] is the seam; [`FsStorage`]
//! keeps everything under one directory:
//!
//! ```text
//! <root>/books/<id>/manuscript.json
//! <root>/books/<id>/structured.json
//! <root>/books/<id>/images/<id>_<n>.<ext>
//! <root>/books/<id>/book_<id>.pdf
//! ```
//!
//! Every write goes to a sibling `.tmp` file first and is renamed into place,
//! so readers never observe a half-written record.

use crate::error::PipelineError;
use crate::model::{ImageHandle, Manuscript, ManuscriptId, NewManuscript};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Persistence operations the pipeline needs.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a new manuscript and assign its id.
    async fn create_manuscript(&self, manuscript: NewManuscript) -> Result<Manuscript, PipelineError>;

    async fn load_manuscript(&self, id: ManuscriptId) -> Result<Manuscript, PipelineError>;

    /// Write (or overwrite) the structured-content snapshot.
    async fn save_snapshot(&self, id: ManuscriptId, snapshot: &str) -> Result<(), PipelineError>;

    /// `Ok(None)` when no snapshot has been written yet.
    async fn load_snapshot(&self, id: ManuscriptId) -> Result<Option<String>, PipelineError>;

    /// Persist an image under the next per-manuscript counter value.
    async fn store_image(
        &self,
        id: ManuscriptId,
        bytes: &[u8],
        extension: &str,
        prompt: &str,
    ) -> Result<ImageHandle, PipelineError>;

    async fn load_image(&self, handle: &ImageHandle) -> Result<Vec<u8>, PipelineError>;

    /// Copy a rendered PDF from `scratch` into durable storage and return its key.
    /// The caller owns (and removes) the scratch file.
    async fn import_pdf(&self, id: ManuscriptId, scratch: &Path) -> Result<String, PipelineError>;

    async fn load_pdf(&self, id: ManuscriptId) -> Result<Vec<u8>, PipelineError>;
}

/// Filesystem-backed [`Storage`].
#[derive(Debug)]
pub struct FsStorage {
    root: PathBuf,
    /// Last image counter handed out per manuscript.
    counters: Mutex<HashMap<ManuscriptId, u32>>,
}

const MANUSCRIPT_FILE: &str = "manuscript.json";
const SNAPSHOT_FILE: &str = "structured.json";
const IMAGES_DIR: &str = "images";

impl FsStorage {
    /// Open (creating if needed) a storage root.
    ///
    /// An unwritable root is a configuration error: nothing downstream can
    /// succeed without it.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("books")).map_err(|e| {
            PipelineError::ConfigurationError(format!(
                "storage root '{}' is not writable: {e}",
                root.display()
            ))
        })?;
        debug!("Opened storage at {}", root.display());
        Ok(Self {
            root,
            counters: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn book_key(id: ManuscriptId) -> String {
        format!("books/{id}")
    }

    fn book_dir(&self, id: ManuscriptId) -> PathBuf {
        self.root.join(Self::book_key(id))
    }

    fn pdf_key(id: ManuscriptId) -> String {
        format!("{}/book_{id}.pdf", Self::book_key(id))
    }

    /// Resolve a storage key to a path, refusing keys that escape the root.
    fn resolve_key(&self, key: &str) -> Result<PathBuf, PipelineError> {
        let rel = Path::new(key);
        if rel.is_absolute() || rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(PipelineError::NotFound(format!("invalid storage key '{key}'")));
        }
        Ok(self.root.join(rel))
    }

    /// Highest image counter already on disk for `id` (0 when none).
    async fn scan_image_counter(&self, id: ManuscriptId) -> Result<u32, PipelineError> {
        let dir = self.book_dir(id).join(IMAGES_DIR);
        let prefix = format!("{id}_");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PipelineError::storage("scan images", dir, e)),
        };

        let mut max = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::storage("scan images", &dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let n = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.split('.').next())
                .and_then(|n| n.parse::<u32>().ok());
            if let Some(n) = n {
                max = max.max(n);
            }
        }
        Ok(max)
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn create_manuscript(&self, manuscript: NewManuscript) -> Result<Manuscript, PipelineError> {
        let record = Manuscript {
            id: ManuscriptId::new(),
            title: manuscript.title,
            author: manuscript.author,
            text: manuscript.text,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| PipelineError::Internal(format!("serialise manuscript: {e}")))?;
        let path = self.book_dir(record.id).join(MANUSCRIPT_FILE);
        write_atomic(&path, json.as_bytes(), "write manuscript").await?;
        info!("Stored manuscript {} ({} chars)", record.id, record.text.chars().count());
        Ok(record)
    }

    async fn load_manuscript(&self, id: ManuscriptId) -> Result<Manuscript, PipelineError> {
        let path = self.book_dir(id).join(MANUSCRIPT_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::NotFound(format!("manuscript {id}")))
            }
            Err(e) => return Err(PipelineError::storage("read manuscript", path, e)),
        };
        serde_json::from_str(&raw).map_err(|e| PipelineError::CorruptRecord {
            path,
            detail: e.to_string(),
        })
    }

    async fn save_snapshot(&self, id: ManuscriptId, snapshot: &str) -> Result<(), PipelineError> {
        let path = self.book_dir(id).join(SNAPSHOT_FILE);
        write_atomic(&path, snapshot.as_bytes(), "write snapshot").await?;
        debug!("Snapshot for {} saved ({} bytes)", id, snapshot.len());
        Ok(())
    }

    async fn load_snapshot(&self, id: ManuscriptId) -> Result<Option<String>, PipelineError> {
        let path = self.book_dir(id).join(SNAPSHOT_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::storage("read snapshot", path, e)),
        }
    }

    async fn store_image(
        &self,
        id: ManuscriptId,
        bytes: &[u8],
        extension: &str,
        prompt: &str,
    ) -> Result<ImageHandle, PipelineError> {
        // Hold the lock across the write so two workers never share a counter.
        let mut counters = self.counters.lock().await;
        let last = match counters.get(&id) {
            Some(n) => *n,
            None => self.scan_image_counter(id).await?,
        };
        let n = last + 1;

        let image_id = format!("{id}_{n}");
        let key = format!("{}/{IMAGES_DIR}/{image_id}.{extension}", Self::book_key(id));
        let path = self.resolve_key(&key)?;
        write_atomic(&path, bytes, "write image").await?;
        counters.insert(id, n);

        debug!("Stored image {} ({} bytes)", key, bytes.len());
        Ok(ImageHandle {
            id: image_id,
            key,
            prompt: prompt.to_string(),
        })
    }

    async fn load_image(&self, handle: &ImageHandle) -> Result<Vec<u8>, PipelineError> {
        let path = self.resolve_key(&handle.key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::NotFound(format!("image {}", handle.key)))
            }
            Err(e) => Err(PipelineError::storage("read image", path, e)),
        }
    }

    async fn import_pdf(&self, id: ManuscriptId, scratch: &Path) -> Result<String, PipelineError> {
        let key = Self::pdf_key(id);
        let dest = self.resolve_key(&key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::storage("create book dir", parent, e))?;
        }

        // Copy (the scratch file may live on another filesystem), then rename.
        let tmp = tmp_path(&dest);
        tokio::fs::copy(scratch, &tmp)
            .await
            .map_err(|e| PipelineError::storage("copy pdf", &tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(PipelineError::storage("persist pdf", dest, e));
        }

        info!("Stored PDF {}", key);
        Ok(key)
    }

    async fn load_pdf(&self, id: ManuscriptId) -> Result<Vec<u8>, PipelineError> {
        let path = self.resolve_key(&Self::pdf_key(id))?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::NotFound(format!("pdf for {id}")))
            }
            Err(e) => Err(PipelineError::storage("read pdf", path, e)),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write via temp file + rename.
async fn write_atomic(path: &Path, bytes: &[u8], op: &'static str) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::storage(op, parent, e))?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| PipelineError::storage(op, &tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PipelineError::storage(op, path, e));
    }
    Ok(())
}
