use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, info, warn};

use crate::error::{GenerationError, PipelineError};
use crate::evaluation::{evaluate_all, EvaluationResult, Evaluator};
use crate::generation::{Generation, Model, ModelDescriptor, ProcessingStrategy};
use crate::preprocess::Preprocessor;
use crate::prompt::PromptTemplate;

pub const DEFAULT_GENERATION_WORKERS: usize = 16;

type PairResult = (ModelDescriptor, String, String, Result<Generation, GenerationError>);

/// A successful generation for one (model, template) pair, with its scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub model: ModelDescriptor,
    pub template: String,
    pub prompt: String,
    pub output: String,
    /// Seconds spent in the successful call.
    pub generation_time: f64,
    pub evals: Vec<EvaluationResult>,
}

impl GenerationOutput {
    pub fn score(&self, evaluator: &str) -> Option<f64> {
        self.evals
            .iter()
            .find(|e| e.evaluator == evaluator)
            .map(|e| e.score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationFailure {
    pub model: ModelDescriptor,
    pub template: String,
    pub prompt: String,
    pub error: String,
}

/// Outcome of one (model, template) pair for one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationAttempt {
    Succeeded(GenerationOutput),
    Failed(GenerationFailure),
}

impl GenerationAttempt {
    pub fn model(&self) -> &ModelDescriptor {
        match self {
            GenerationAttempt::Succeeded(o) => &o.model,
            GenerationAttempt::Failed(f) => &f.model,
        }
    }

    pub fn template(&self) -> &str {
        match self {
            GenerationAttempt::Succeeded(o) => &o.template,
            GenerationAttempt::Failed(f) => &f.template,
        }
    }
}

/// Everything produced for one raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunOutput {
    pub raw_text: String,
    pub preprocessor: Preprocessor,
    pub preprocessed_text: String,
    pub attempts: Vec<GenerationAttempt>,
}

impl PipelineRunOutput {
    pub fn outputs(&self) -> impl Iterator<Item = &GenerationOutput> {
        self.attempts.iter().filter_map(|a| match a {
            GenerationAttempt::Succeeded(o) => Some(o),
            GenerationAttempt::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &GenerationFailure> {
        self.attempts.iter().filter_map(|a| match a {
            GenerationAttempt::Failed(f) => Some(f),
            GenerationAttempt::Succeeded(_) => None,
        })
    }

    /// Successful outputs, best first by their first evaluator score.
    ///
    /// Ties fall back to model key and template name so the order is stable.
    pub fn ranked(&self) -> Vec<&GenerationOutput> {
        let mut outputs: Vec<&GenerationOutput> = self.outputs().collect();
        outputs.sort_by(|a, b| {
            let sa = a.evals.first().map(|e| e.score).unwrap_or(0.0);
            let sb = b.evals.first().map(|e| e.score).unwrap_or(0.0);
            sb.total_cmp(&sa)
                .then_with(|| a.model.key().cmp(&b.model.key()))
                .then_with(|| a.template.cmp(&b.template))
        });
        outputs
    }
}

/// Runs one text through preprocess, generation fan-out and scoring.
///
/// Stateless apart from its configuration; one runner is shared by every
/// text of a job run.
pub struct PipelineRunner {
    preprocessor: Preprocessor,
    strategy: ProcessingStrategy,
    models: Vec<Model>,
    templates: Vec<Arc<PromptTemplate>>,
    evaluators: Vec<Evaluator>,
    workers: usize,
}

impl PipelineRunner {
    pub fn new(
        preprocessor: Preprocessor,
        strategy: ProcessingStrategy,
        models: Vec<Model>,
        templates: Vec<PromptTemplate>,
        evaluators: Vec<Evaluator>,
    ) -> Result<Self, PipelineError> {
        if models.is_empty() || templates.is_empty() {
            return Err(PipelineError::EmptyCrossProduct);
        }

        let mut seen = HashSet::new();
        for model in &models {
            if !seen.insert(model.descriptor().key()) {
                return Err(PipelineError::DuplicateModel(model.descriptor().key()));
            }
        }
        let mut seen = HashSet::new();
        for template in &templates {
            if !seen.insert(template.name().to_string()) {
                return Err(PipelineError::DuplicateTemplate(template.name().to_string()));
            }
        }

        Ok(Self {
            preprocessor,
            strategy,
            models,
            templates: templates.into_iter().map(Arc::new).collect(),
            evaluators,
            workers: DEFAULT_GENERATION_WORKERS,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn preprocessor(&self) -> Preprocessor {
        self.preprocessor
    }

    pub fn strategy(&self) -> ProcessingStrategy {
        self.strategy
    }

    pub fn evaluators(&self) -> &[Evaluator] {
        &self.evaluators
    }

    /// Number of generation calls made per text.
    pub fn pair_count(&self) -> usize {
        self.models.len() * self.templates.len()
    }

    pub async fn run(&self, raw_text: &str) -> PipelineRunOutput {
        let preprocessed_text = self.preprocessor.preprocess(raw_text);
        let generations = self.generate_all(&preprocessed_text).await;

        let attempts: Vec<GenerationAttempt> = generations
            .into_iter()
            .map(|(model, template, prompt, result)| match result {
                Ok(generation) => GenerationAttempt::Succeeded(GenerationOutput {
                    evals: evaluate_all(&self.evaluators, raw_text, &generation.text),
                    model,
                    template,
                    prompt,
                    output: generation.text,
                    generation_time: generation.elapsed.as_secs_f64(),
                }),
                Err(e) => GenerationAttempt::Failed(GenerationFailure {
                    model,
                    template,
                    prompt,
                    error: e.to_string(),
                }),
            })
            .collect();

        let failed = attempts
            .iter()
            .filter(|a| matches!(a, GenerationAttempt::Failed(_)))
            .count();
        info!(
            text = %crate::text::short_text(raw_text),
            pairs = attempts.len(),
            failed,
            "Pipeline run complete"
        );

        PipelineRunOutput {
            raw_text: raw_text.to_string(),
            preprocessor: self.preprocessor,
            preprocessed_text,
            attempts,
        }
    }

    /// Runs every (model, template) pair on the bounded pool.
    ///
    /// Results are collected as tasks finish, so the order is not fixed.
    async fn generate_all(&self, preprocessed_text: &str) -> Vec<PairResult> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set = JoinSet::new();
        let mut pending: HashMap<task::Id, (ModelDescriptor, String, String)> =
            HashMap::with_capacity(self.pair_count());

        for model in &self.models {
            for template in &self.templates {
                let prompt = template.render(preprocessed_text);
                let descriptor = model.descriptor().clone();
                let model = model.clone();
                let strategy = self.strategy;
                let sem = Arc::clone(&semaphore);
                let task_prompt = prompt.clone();

                let handle = join_set.spawn(async move {
                    let _permit = sem.acquire_owned().await.map_err(|_| {
                        GenerationError::Request("Generation worker pool closed".to_string())
                    })?;
                    strategy.process(&model, &task_prompt).await
                });
                pending.insert(handle.id(), (descriptor, template.name().to_string(), prompt));
            }
        }

        let mut results = Vec::with_capacity(pending.len());
        while let Some(joined) = join_set.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => {
                    let message = format!("Generation task panicked: {}", e);
                    (e.id(), Err(GenerationError::Request(message)))
                }
            };
            let Some((model, template, prompt)) = pending.remove(&id) else {
                continue;
            };
            match &result {
                Ok(g) => debug!(
                    model = %model,
                    template = %template,
                    elapsed_ms = g.elapsed.as_millis() as u64,
                    "Generation succeeded"
                ),
                Err(e) => warn!(
                    model = %model,
                    template = %template,
                    error = %e,
                    "Generation failed, pair produced no output"
                ),
            }
            results.push((model, template, prompt, result));
        }
        results
    }
}
