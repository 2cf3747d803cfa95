//! JSON-lines store on the local filesystem.
//!
//! ```text
//! <root>/texts.jsonl               one Text per distinct content hash
//! <root>/runs/<run_id>/run.json    latest JobRun record
//! <root>/runs/<run_id>/results.jsonl  one ResultRecord per line
//! ```
//!
//! Every bundle is appended with a single write followed by a sync. A line
//! cut short by a crash is dropped the next time the run is touched.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ResultRecord, ResultStore};
use crate::error::StoreError;
use crate::job::run::JobRun;
use crate::pipeline::PipelineRunOutput;
use crate::text::Text;

const TEXTS_FILE: &str = "texts.jsonl";
const RUNS_DIR: &str = "runs";
const RUN_FILE: &str = "run.json";
const RESULTS_FILE: &str = "results.jsonl";

pub struct FileStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
    known_texts: Mutex<HashSet<String>>,
    completed: DashMap<Uuid, HashSet<String>>,
}

impl FileStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(RUNS_DIR)).await?;

        let texts_path = root.join(TEXTS_FILE);
        let (texts, _) = read_jsonl::<Text>(&texts_path).await?;
        repair_tail(&texts_path).await?;
        let known: HashSet<String> = texts.into_iter().map(|t| t.hash).collect();

        info!(root = %root.display(), texts = known.len(), "Opened file store");

        Ok(Self {
            root,
            write_lock: tokio::sync::Mutex::new(()),
            known_texts: Mutex::new(known),
            completed: DashMap::new(),
        })
    }

    pub fn text_count(&self) -> usize {
        self.known_texts.lock().len()
    }

    fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join(RUNS_DIR).join(run_id.to_string())
    }

    fn results_path(&self, run_id: Uuid) -> PathBuf {
        self.run_dir(run_id).join(RESULTS_FILE)
    }

    /// Loads the raw-text hashes of a run into the cache.
    ///
    /// Caller holds the write lock.
    async fn ensure_completed(&self, run_id: Uuid) -> Result<(), StoreError> {
        if self.completed.contains_key(&run_id) {
            return Ok(());
        }

        let path = self.results_path(run_id);
        let (records, _) = read_jsonl::<ResultRecord>(&path).await?;
        repair_tail(&path).await?;
        let done: HashSet<String> = records.into_iter().map(|r| r.raw_hash).collect();
        self.completed.insert(run_id, done);
        Ok(())
    }

    async fn remember_text(&self, content: &str) -> Result<(), StoreError> {
        let text = Text::new(content);
        if self.known_texts.lock().contains(&text.hash) {
            return Ok(());
        }
        append_line(&self.root.join(TEXTS_FILE), &text).await?;
        self.known_texts.lock().insert(text.hash);
        Ok(())
    }
}

#[async_trait]
impl ResultStore for FileStore {
    async fn save_run(&self, run: &JobRun) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let dir = self.run_dir(run.id);
        tokio::fs::create_dir_all(&dir).await?;

        let json = serde_json::to_vec_pretty(run)?;
        let tmp = dir.join(format!("{}.tmp", RUN_FILE));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, dir.join(RUN_FILE)).await?;

        debug!(run_id = %run.id, status = %run.status, "Saved job run");
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<JobRun, StoreError> {
        let path = self.run_dir(run_id).join(RUN_FILE);
        let json = match tokio::fs::read(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::RunNotFound(run_id));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&json)?)
    }

    async fn save_output(
        &self,
        run_id: Uuid,
        output: &PipelineRunOutput,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let record = ResultRecord::new(run_id, output.clone());

        self.ensure_completed(run_id).await?;
        let already_stored = self
            .completed
            .get(&run_id)
            .is_some_and(|done| done.contains(&record.raw_hash));
        if already_stored {
            debug!(run_id = %run_id, hash = %record.raw_hash, "Bundle already stored");
            return Ok(false);
        }

        self.remember_text(&output.raw_text).await?;
        self.remember_text(&output.preprocessed_text).await?;

        tokio::fs::create_dir_all(self.run_dir(run_id)).await?;
        append_line(&self.results_path(run_id), &record).await?;

        self.completed
            .entry(run_id)
            .or_default()
            .insert(record.raw_hash);
        Ok(true)
    }

    async fn completed_hashes(&self, run_id: Uuid) -> Result<HashSet<String>, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.ensure_completed(run_id).await?;
        Ok(self
            .completed
            .get(&run_id)
            .map(|done| done.value().clone())
            .unwrap_or_default())
    }

    async fn records(&self, run_id: Uuid) -> Result<Vec<ResultRecord>, StoreError> {
        let (records, _) = read_jsonl(&self.results_path(run_id)).await?;
        Ok(records)
    }
}

/// Parses every line of a JSON-lines file.
///
/// A malformed last line is skipped; a malformed line elsewhere is an error.
/// Also returns the byte length of the well-formed prefix.
async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<(Vec<T>, usize), StoreError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e.into()),
    };

    let mut values = Vec::new();
    let mut valid_len = 0;
    let mut offset = 0;
    let mut lines = content.split_inclusive('\n').peekable();

    while let Some(line) = lines.next() {
        offset += line.len();
        let is_last = lines.peek().is_none();
        if line.trim().is_empty() {
            valid_len = offset;
            continue;
        }
        match serde_json::from_str::<T>(line.trim_end()) {
            Ok(value) if line.ends_with('\n') => {
                values.push(value);
                valid_len = offset;
            }
            Err(e) if !is_last => return Err(e.into()),
            _ => warn!(path = %path.display(), "Ignoring incomplete trailing record"),
        }
    }
    Ok((values, valid_len))
}

/// Cuts an incomplete trailing line so the next append starts clean.
async fn repair_tail(path: &Path) -> Result<(), StoreError> {
    let len = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let (_, valid_len) = read_jsonl::<serde_json::Value>(path).await?;
    if (valid_len as u64) < len {
        warn!(
            path = %path.display(),
            dropped_bytes = len - valid_len as u64,
            "Truncating incomplete record"
        );
        let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        file.set_len(valid_len as u64).await?;
        file.sync_all().await?;
    }
    Ok(())
}

/// Appends one record line; a failed write is rolled back to the previous length.
async fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');

    if !ends_with_newline(path).await? {
        repair_tail(path).await?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let start = file.metadata().await?.len();
    if let Err(e) = write_synced(&mut file, line.as_bytes()).await {
        warn!(path = %path.display(), error = %e, "Append failed, rolling back");
        if let Err(rollback) = file.set_len(start).await {
            warn!(path = %path.display(), error = %rollback, "Rollback failed");
        }
        return Err(e.into());
    }
    Ok(())
}

async fn write_synced(file: &mut tokio::fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.sync_data().await
}

/// True for a missing or empty file, or one whose last byte is a newline.
async fn ends_with_newline(path: &Path) -> Result<bool, StoreError> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}
