pub mod config;
pub mod error;
pub mod evaluation;
pub mod generation;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod preprocess;
pub mod prompt;
pub mod registry;
pub mod store;
pub mod text;
