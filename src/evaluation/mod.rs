pub mod distance;
pub mod evaluator;

use serde::{Deserialize, Serialize};

pub use distance::levenshtein;
pub use evaluator::{Evaluator, EvaluatorConfig, EvaluatorKind, Granularity};

/// Score one evaluator assigned to one generated output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub evaluator: String,
    pub score: f64,
}

/// Runs every evaluator over the pair, in evaluator order.
pub fn evaluate_all(
    evaluators: &[Evaluator],
    reference: &str,
    candidate: &str,
) -> Vec<EvaluationResult> {
    evaluators
        .iter()
        .map(|e| EvaluationResult {
            evaluator: e.key(),
            score: e.evaluate(reference, candidate),
        })
        .collect()
}
