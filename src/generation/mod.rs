//! Text generation capability.
//!
//! The core only knows [`GenerationClient`]: given a rendered prompt it
//! returns text or fails. Vendor clients implement it; [`Model`] pairs a
//! client with the descriptor that identifies it in results, and
//! [`strategy::ProcessingStrategy`] decides how failures are retried.

pub mod openai;
pub mod strategy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::GenerationError;

pub use openai::OpenAiCompatibleClient;
pub use strategy::{BackoffPolicy, ProcessingStrategy};

#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Identifies a generation backend: vendor plus model version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub vendor: String,
    pub version: String,
}

impl ModelDescriptor {
    pub fn new(vendor: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            version: version.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.vendor, self.version)
    }
}

impl fmt::Display for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vendor, self.version)
    }
}

/// Text produced by one successful call, with the time the call took.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct Model {
    descriptor: ModelDescriptor,
    client: Arc<dyn GenerationClient>,
}

impl Model {
    pub fn new(descriptor: ModelDescriptor, client: Arc<dyn GenerationClient>) -> Self {
        Self { descriptor, client }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    /// One timed call to the underlying client.
    pub async fn generate(&self, prompt: &str) -> Result<Generation, GenerationError> {
        let start = Instant::now();
        let text = self.client.generate(prompt).await?;
        Ok(Generation {
            text,
            elapsed: start.elapsed(),
        })
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
