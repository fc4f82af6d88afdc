// src/services/artifact_store.rs
use crate::errors::ColoringError;
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

pub const INPUT_DIR: &str = "input";
pub const ANALYSIS_FILE: &str = "analysis.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const OUTPUTS_DIR: &str = "outputs";

/// Persistence for one directory per batch run.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save_input(&self, run_id: &str, file_name: &str, data: &[u8])
    -> Result<(), ColoringError>;

    async fn save_analysis(&self, run_id: &str, record: &AnalysisRecord)
    -> Result<(), ColoringError>;

    async fn save_output(&self, run_id: &str, file_name: &str, data: &[u8])
    -> Result<(), ColoringError>;

    /// Write run metadata. Ratings already stored for the run are kept.
    async fn save_run(&self, run: &BatchRun) -> Result<(), ColoringError>;

    async fn load_run(&self, run_id: &str) -> Result<BatchRun, ColoringError>;

    /// Newest first.
    async fn list_runs(&self) -> Result<Vec<RunSummary>, ColoringError>;

    /// Merge reviewer ratings into a stored run as one atomic step.
    async fn update_ratings(
        &self,
        run_id: &str,
        updates: &RatingsUpdate,
    ) -> Result<BatchRun, ColoringError>;
}

/// Sortable id: timestamp prefix plus a random suffix.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d-%H%M%S"), &suffix[..8])
}

/// Reject names that could escape the run directory.
pub fn validate_path_component(name: &str) -> Result<(), ColoringError> {
    if name.is_empty() {
        return Err(ColoringError::Validation("Name cannot be empty".to_string()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ColoringError::Validation(format!(
            "'{}' cannot contain path separators",
            name
        )));
    }
    if name.contains("..") || name.starts_with('.') {
        return Err(ColoringError::Validation(format!(
            "'{}' cannot reference hidden or parent paths",
            name
        )));
    }
    if name.contains('\0') {
        return Err(ColoringError::Validation(
            "Name cannot contain null bytes".to_string(),
        ));
    }
    Ok(())
}

/// Last path segment of an uploaded file name, or `input` if nothing usable remains.
pub fn sanitize_file_name(name: &str) -> String {
    let candidate = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if validate_path_component(candidate).is_ok() {
        candidate.to_string()
    } else {
        "input".to_string()
    }
}

/// Filesystem layout:
/// `{root}/{run_id}/{input/<name>, analysis.json, metadata.json, outputs/}`.
///
/// Metadata writes for a run are serialized and replace the file atomically,
/// so readers never observe a half-written document.
pub struct FsArtifactStore {
    root: PathBuf,
    run_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf, ColoringError> {
        validate_path_component(run_id)?;
        Ok(self.root.join(run_id))
    }

    fn run_lock(&self, run_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.run_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(run_id.to_string()).or_default().clone()
    }

    async fn write(&self, path: PathBuf, data: &[u8]) -> Result<(), ColoringError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ColoringError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| ColoringError::Storage(format!("Failed to write {}: {}", path.display(), e)))
    }

    async fn read_run(&self, run_id: &str) -> Result<BatchRun, ColoringError> {
        let path = self.run_dir(run_id)?.join(METADATA_FILE);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ColoringError::NotFound(format!("Run {}", run_id)));
            }
            Err(e) => {
                return Err(ColoringError::Storage(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        serde_json::from_slice(&data)
            .map_err(|e| ColoringError::Storage(format!("Corrupt metadata for {}: {}", run_id, e)))
    }

    /// Caller holds the run lock.
    async fn write_run(&self, run: &BatchRun) -> Result<(), ColoringError> {
        let json = serde_json::to_vec_pretty(run)
            .map_err(|e| ColoringError::Storage(format!("Failed to serialize run: {}", e)))?;
        let dir = self.run_dir(&run.id)?;
        let staging = dir.join(format!(".{}.tmp", METADATA_FILE));
        let path = dir.join(METADATA_FILE);

        self.write(staging.clone(), &json).await?;
        tokio::fs::rename(&staging, &path).await.map_err(|e| {
            ColoringError::Storage(format!("Failed to replace {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save_input(
        &self,
        run_id: &str,
        file_name: &str,
        data: &[u8],
    ) -> Result<(), ColoringError> {
        validate_path_component(file_name)?;
        let path = self.run_dir(run_id)?.join(INPUT_DIR).join(file_name);
        self.write(path, data).await
    }

    async fn save_analysis(
        &self,
        run_id: &str,
        record: &AnalysisRecord,
    ) -> Result<(), ColoringError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| ColoringError::Storage(format!("Failed to serialize analysis: {}", e)))?;
        self.write(self.run_dir(run_id)?.join(ANALYSIS_FILE), &json)
            .await
    }

    async fn save_output(
        &self,
        run_id: &str,
        file_name: &str,
        data: &[u8],
    ) -> Result<(), ColoringError> {
        validate_path_component(file_name)?;
        let path = self.run_dir(run_id)?.join(OUTPUTS_DIR).join(file_name);
        self.write(path, data).await
    }

    async fn save_run(&self, run: &BatchRun) -> Result<(), ColoringError> {
        let lock = self.run_lock(&run.id);
        let _guard = lock.lock().await;

        let mut run = run.clone();
        match self.read_run(&run.id).await {
            Ok(stored) => run.keep_ratings_from(&stored),
            Err(ColoringError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.write_run(&run).await
    }

    async fn load_run(&self, run_id: &str) -> Result<BatchRun, ColoringError> {
        self.read_run(run_id).await
    }

    async fn list_runs(&self) -> Result<Vec<RunSummary>, ColoringError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ColoringError::Storage(e.to_string())),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ColoringError::Storage(e.to_string()))?
        {
            let Ok(run_id) = entry.file_name().into_string() else {
                continue;
            };
            if validate_path_component(&run_id).is_err() {
                continue;
            }
            match self.read_run(&run_id).await {
                Ok(run) => runs.push(RunSummary::from(&run)),
                // Still running or not a run directory.
                Err(ColoringError::NotFound(_)) => {}
                Err(e) => warn!("Skipping run {}: {}", run_id, e),
            }
        }

        runs.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(runs)
    }

    async fn update_ratings(
        &self,
        run_id: &str,
        updates: &RatingsUpdate,
    ) -> Result<BatchRun, ColoringError> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().await;

        let mut run = self.read_run(run_id).await?;
        let updated = run.apply_ratings(updates)?;
        debug!("Merged ratings into {} results of run {}", updated, run_id);
        self.write_run(&run).await?;
        Ok(run)
    }
}
