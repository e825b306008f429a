//! JSON file store implementation.
//!
//! Stores each record as its own JSON file under a root directory. Writes
//! go to a temp file first and land via rename, so a crash mid-write never
//! leaves a half-written record behind.

use std::path::{Path, PathBuf};

use drill_core::{ExerciseId, ProgressRecord, QueuedOperation, Submission};
use tokio::fs;
use tracing::debug;

use super::{Result, Store, StoreError};

/// File-based JSON store backend.
pub struct JsonStore {
    root: PathBuf,
    history_cap: usize,
}

impl JsonStore {
    /// Create a store rooted at `root`, retaining at most `history_cap`
    /// submissions per exercise.
    pub async fn new(root: impl AsRef<Path>, history_cap: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("records")).await?;
        fs::create_dir_all(root.join("submissions")).await?;

        Ok(Self { root, history_cap })
    }

    fn record_path(&self, id: &ExerciseId) -> PathBuf {
        self.root.join("records").join(format!("{}.json", id))
    }

    fn submission_dir(&self, id: &ExerciseId) -> PathBuf {
        self.root.join("submissions").join(id.as_str())
    }

    fn queue_path(&self) -> PathBuf {
        self.root.join("queue.json")
    }

    /// Serialize and write atomically: temp file in the same directory,
    /// then rename over the target.
    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for JsonStore {
    async fn save_record(&mut self, record: &ProgressRecord) -> Result<()> {
        self.write_json(&self.record_path(&record.exercise_id), record)
            .await
    }

    async fn load_record(&self, id: &ExerciseId) -> Result<Option<ProgressRecord>> {
        read_json(&self.record_path(id)).await
    }

    async fn list_records(&self) -> Result<Vec<ProgressRecord>> {
        list_dir(&self.root.join("records")).await
    }

    async fn save_submission(&mut self, submission: &Submission) -> Result<()> {
        let dir = self.submission_dir(&submission.exercise_id);
        fs::create_dir_all(&dir).await?;
        self.write_json(&dir.join(format!("{}.json", submission.id)), submission)
            .await?;

        // Retention: keep the N highest sequence numbers.
        let mut all: Vec<Submission> = list_dir(&dir).await?;
        if all.len() > self.history_cap {
            all.sort_by(|a, b| b.sequence.cmp(&a.sequence));
            for evicted in &all[self.history_cap..] {
                debug!(
                    exercise = %evicted.exercise_id,
                    sequence = evicted.sequence,
                    "evicting submission beyond retention cap"
                );
                remove_if_present(&dir.join(format!("{}.json", evicted.id))).await?;
            }
        }
        Ok(())
    }

    async fn list_submissions(&self, id: &ExerciseId) -> Result<Vec<Submission>> {
        let dir = self.submission_dir(id);
        if fs::try_exists(&dir).await? {
            let mut all: Vec<Submission> = list_dir(&dir).await?;
            all.sort_by(|a, b| b.sequence.cmp(&a.sequence));
            Ok(all)
        } else {
            Ok(Vec::new())
        }
    }

    async fn save_queue(&mut self, ops: &[QueuedOperation]) -> Result<()> {
        self.write_json(&self.queue_path(), &ops).await
    }

    async fn load_queue(&self) -> Result<Vec<QueuedOperation>> {
        Ok(read_json(&self.queue_path()).await?.unwrap_or_default())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Ok(Some(item)) = read_json(&entry.path()).await {
            items.push(item);
        }
    }
    Ok(items)
}

async fn remove_if_present(path: &Path) -> Result<()> {
    fs::remove_file(path).await.or_else(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Ok(())
        } else {
            Err(e)
        }
    })?;
    Ok(())
}
