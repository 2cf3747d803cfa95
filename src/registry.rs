//! Keyed catalogs of everything a job refers to by name.
//!
//! Built once at startup, then only read. Preprocessors and evaluators are
//! built in; models and prompt templates come from the job definition.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::evaluation::Evaluator;
use crate::generation::openai::vendor_base_url;
use crate::generation::{Model, OpenAiCompatibleClient, ProcessingStrategy};
use crate::job::{JobDefinition, ModelSpec};
use crate::pipeline::PipelineRunner;
use crate::preprocess::Preprocessor;
use crate::prompt::PromptTemplate;

pub struct Registry {
    preprocessors: BTreeMap<String, Preprocessor>,
    evaluators: BTreeMap<String, Evaluator>,
    models: BTreeMap<String, Model>,
    templates: BTreeMap<String, PromptTemplate>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            preprocessors: Preprocessor::ALL
                .iter()
                .map(|p| (p.key().to_string(), *p))
                .collect(),
            evaluators: Evaluator::catalog()
                .into_iter()
                .map(|e| (e.key(), e))
                .collect(),
            models: BTreeMap::new(),
            templates: BTreeMap::new(),
        }
    }

    /// Registers the models and templates a job definition names.
    ///
    /// API keys are read from the environment variables the job file lists.
    pub fn from_job(job: &JobDefinition, request_timeout: Duration) -> Result<Self> {
        let mut registry = Self::new();

        for spec in &job.models {
            let model = build_model(spec, request_timeout)?;
            registry.register_model(spec.key(), model)?;
        }
        let mut seen: BTreeMap<String, &Path> = BTreeMap::new();
        for path in &job.templates {
            let name = template_name(path);
            if let Some(first) = seen.insert(name.clone(), path.as_path()) {
                anyhow::bail!(
                    "Prompt templates {} and {} share the file name '{}'",
                    first.display(),
                    path.display(),
                    name
                );
            }
            let template = PromptTemplate::from_file(path)?;
            registry.register_template(template)?;
        }

        info!(
            models = registry.models.len(),
            templates = registry.templates.len(),
            "Registry built"
        );
        Ok(registry)
    }

    pub fn register_model(
        &mut self,
        key: impl Into<String>,
        model: Model,
    ) -> Result<(), RegistryError> {
        let key = key.into();
        if self.models.contains_key(&key) {
            return Err(RegistryError::Duplicate { kind: "model", key });
        }
        debug!(key = %key, model = %model.descriptor(), "Registered model");
        self.models.insert(key, model);
        Ok(())
    }

    /// Registers a template under its name.
    pub fn register_template(&mut self, template: PromptTemplate) -> Result<(), RegistryError> {
        let key = template.name().to_string();
        if self.templates.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                kind: "prompt template",
                key,
            });
        }
        debug!(key = %key, hash = %template.hash(), "Registered prompt template");
        self.templates.insert(key, template);
        Ok(())
    }

    pub fn preprocessor(&self, key: &str) -> Result<Preprocessor, RegistryError> {
        self.preprocessors
            .get(&key.to_uppercase())
            .copied()
            .ok_or_else(|| unknown("preprocessor", key))
    }

    pub fn evaluator(&self, key: &str) -> Result<Evaluator, RegistryError> {
        Evaluator::from_key(key)
            .and_then(|e| self.evaluators.get(&e.key()).copied())
            .ok_or_else(|| unknown("evaluator", key))
    }

    pub fn model(&self, key: &str) -> Result<Model, RegistryError> {
        self.models
            .get(key)
            .cloned()
            .ok_or_else(|| unknown("model", key))
    }

    pub fn template(&self, key: &str) -> Result<PromptTemplate, RegistryError> {
        self.templates
            .get(key)
            .cloned()
            .ok_or_else(|| unknown("prompt template", key))
    }

    pub fn preprocessor_keys(&self) -> Vec<&str> {
        self.preprocessors.keys().map(String::as_str).collect()
    }

    pub fn evaluator_keys(&self) -> Vec<&str> {
        self.evaluators.keys().map(String::as_str).collect()
    }

    pub fn model_keys(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn template_keys(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    /// Resolves every key of a job into a ready [`PipelineRunner`].
    pub fn build_pipeline(
        &self,
        job: &JobDefinition,
        strategy: ProcessingStrategy,
        generation_workers: usize,
    ) -> Result<PipelineRunner> {
        let preprocessor = self.preprocessor(&job.preprocessor)?;

        let models = job
            .models
            .iter()
            .map(|spec| self.model(&spec.key()))
            .collect::<Result<Vec<_>, _>>()?;

        let templates = job
            .templates
            .iter()
            .map(|path| self.template(&template_name(path)))
            .collect::<Result<Vec<_>, _>>()?;

        let evaluators = job
            .evaluators
            .iter()
            .map(|key| self.evaluator(key))
            .collect::<Result<Vec<_>, _>>()?;

        let runner = PipelineRunner::new(preprocessor, strategy, models, templates, evaluators)
            .with_context(|| format!("Invalid pipeline for job '{}'", job.name))?
            .with_workers(generation_workers);
        Ok(runner)
    }
}

/// Key a template file is registered under.
fn template_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn unknown(kind: &'static str, key: &str) -> RegistryError {
    RegistryError::Unknown {
        kind,
        key: key.to_string(),
    }
}

fn build_model(spec: &ModelSpec, request_timeout: Duration) -> Result<Model> {
    let api_key = std::env::var(&spec.api_key_env).with_context(|| {
        format!(
            "Environment variable {} is not set (API key for model {})",
            spec.api_key_env,
            spec.key()
        )
    })?;

    let base_url = match &spec.base_url {
        Some(url) => url.clone(),
        None => vendor_base_url(&spec.vendor)
            .map(str::to_string)
            .with_context(|| {
                format!(
                    "No base_url for model {} and vendor '{}' is not a known vendor",
                    spec.key(),
                    spec.vendor
                )
            })?,
    };

    let client = OpenAiCompatibleClient::new(base_url, api_key, &spec.version, request_timeout)?;
    Ok(Model::new(spec.descriptor(), Arc::new(client)))
}
