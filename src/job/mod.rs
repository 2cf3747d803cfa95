//! Job definitions, data sources, run records and the run orchestrator.

pub mod orchestrator;
pub mod run;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::generation::ModelDescriptor;
use crate::text::Text;

pub use orchestrator::{Orchestrator, RunSummary};
pub use run::{JobRun, RunStatus, StatusTransition};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Direct,
    #[default]
    BackoffRetry,
}

/// One generation backend as declared in a job file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Registry key; defaults to `vendor/version`.
    #[serde(default)]
    pub key: Option<String>,
    pub vendor: String,
    pub version: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl ModelSpec {
    pub fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::new(&self.vendor, &self.version)
    }

    pub fn key(&self) -> String {
        self.key.clone().unwrap_or_else(|| self.descriptor().key())
    }
}

/// A job file: which texts to run through which models, prompts and evaluators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub data_source: PathBuf,
    pub preprocessor: String,
    #[serde(default)]
    pub strategy: StrategyKind,
    pub models: Vec<ModelSpec>,
    pub templates: Vec<PathBuf>,
    pub evaluators: Vec<String>,
}

impl JobDefinition {
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Invalid job definition")
    }

    /// Loads a job file; relative paths inside it are resolved against its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job definition {}", path.display()))?;
        let mut job = Self::parse(&content)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        job.data_source = resolve(base, &job.data_source);
        for template in &mut job.templates {
            *template = resolve(base, template);
        }

        info!(
            job = %job.name,
            models = job.models.len(),
            templates = job.templates.len(),
            evaluators = job.evaluators.len(),
            "Loaded job definition"
        );
        Ok(job)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    text: String,
}

/// Ordered, deduplicated input texts of a job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSource {
    texts: Vec<Text>,
}

impl DataSource {
    /// Keeps the first occurrence of every content hash.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        let mut duplicates = 0usize;
        for content in texts {
            let text = Text::new(content);
            if seen.insert(text.hash.clone()) {
                kept.push(text);
            } else {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            debug!(duplicates, "Dropped duplicate texts from data source");
        }
        Self { texts: kept }
    }

    /// Parses a JSON array of `{"text": ...}` objects.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<SourceEntry> = serde_json::from_str(json)
            .context("Data source must be a JSON array of {\"text\": ...} objects")?;
        Ok(Self::from_texts(entries.into_iter().map(|e| e.text)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read data source {}", path.display()))?;
        let source = Self::from_json(&json)?;
        info!(path = %path.display(), texts = source.len(), "Loaded data source");
        Ok(source)
    }

    pub fn texts(&self) -> &[Text] {
        &self.texts
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}
