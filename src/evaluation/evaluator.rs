use std::fmt;

use super::distance::levenshtein;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Character,
    Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluatorKind {
    /// Fraction of positionally matching elements; zero on length mismatch.
    RestorationAccuracy,
    /// One minus the edit distance normalized by the reference length.
    RestorationErrorRate,
    /// Harmonic mean of positional precision and recall.
    RestorationF1,
}

impl EvaluatorKind {
    pub const ALL: [EvaluatorKind; 3] = [
        EvaluatorKind::RestorationAccuracy,
        EvaluatorKind::RestorationErrorRate,
        EvaluatorKind::RestorationF1,
    ];

    fn code(&self) -> &'static str {
        match self {
            EvaluatorKind::RestorationAccuracy => "RA",
            EvaluatorKind::RestorationErrorRate => "RER",
            EvaluatorKind::RestorationF1 => "RF1",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            EvaluatorKind::RestorationAccuracy => "Restoration Accuracy",
            EvaluatorKind::RestorationErrorRate => "Restoration Error Rate",
            EvaluatorKind::RestorationF1 => "Restoration F1",
        }
    }
}

/// Input adjustment and comparison unit shared by every evaluator family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvaluatorConfig {
    pub case_sensitive: bool,
    pub strip_padding: bool,
    pub granularity: Granularity,
}

impl EvaluatorConfig {
    pub fn new(case_sensitive: bool, granularity: Granularity) -> Self {
        Self {
            case_sensitive,
            strip_padding: true,
            granularity,
        }
    }

    pub fn keep_padding(mut self) -> Self {
        self.strip_padding = false;
        self
    }

    fn adjust(&self, text: &str) -> String {
        let text = if self.strip_padding { text.trim() } else { text };
        if self.case_sensitive {
            text.to_string()
        } else {
            text.to_lowercase()
        }
    }
}

/// Pure scorer for one (reference, candidate) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Evaluator {
    kind: EvaluatorKind,
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(kind: EvaluatorKind, config: EvaluatorConfig) -> Self {
        Self { kind, config }
    }

    /// Every family crossed with every flag combination.
    pub fn catalog() -> Vec<Evaluator> {
        let mut all = Vec::new();
        for kind in EvaluatorKind::ALL {
            for keep_padding in [false, true] {
                for case_sensitive in [true, false] {
                    for granularity in [Granularity::Character, Granularity::Word] {
                        let config = EvaluatorConfig::new(case_sensitive, granularity);
                        let config = if keep_padding {
                            config.keep_padding()
                        } else {
                            config
                        };
                        all.push(Evaluator::new(kind, config));
                    }
                }
            }
        }
        all
    }

    pub fn kind(&self) -> EvaluatorKind {
        self.kind
    }

    pub fn config(&self) -> EvaluatorConfig {
        self.config
    }

    /// Stable key such as `RA_CS_CL` or `RER_CI_WL_KP`.
    pub fn key(&self) -> String {
        let case = if self.config.case_sensitive { "CS" } else { "CI" };
        let unit = match self.config.granularity {
            Granularity::Character => "CL",
            Granularity::Word => "WL",
        };
        let mut key = format!("{}_{}_{}", self.kind.code(), case, unit);
        if !self.config.strip_padding {
            key.push_str("_KP");
        }
        key
    }

    pub fn from_key(key: &str) -> Option<Evaluator> {
        let parts: Vec<&str> = key.trim().split('_').collect();
        let (family, case, unit, padding) = match parts.as_slice() {
            [f, c, u] => (*f, *c, *u, None),
            [f, c, u, p] => (*f, *c, *u, Some(*p)),
            _ => return None,
        };

        let kind = EvaluatorKind::ALL
            .into_iter()
            .find(|k| k.code().eq_ignore_ascii_case(family))?;
        let case_sensitive = match case.to_ascii_uppercase().as_str() {
            "CS" => true,
            "CI" => false,
            _ => return None,
        };
        let granularity = match unit.to_ascii_uppercase().as_str() {
            "CL" => Granularity::Character,
            "WL" => Granularity::Word,
            _ => return None,
        };
        let config = EvaluatorConfig::new(case_sensitive, granularity);
        let config = match padding {
            None => config,
            Some(p) if p.eq_ignore_ascii_case("KP") => config.keep_padding(),
            Some(_) => return None,
        };

        Some(Evaluator::new(kind, config))
    }

    pub fn description(&self) -> String {
        format!(
            "{} ({}, {}, {})",
            self.kind.label(),
            if self.config.case_sensitive {
                "case sensitive"
            } else {
                "case insensitive"
            },
            match self.config.granularity {
                Granularity::Character => "character level",
                Granularity::Word => "word level",
            },
            if self.config.strip_padding {
                "padding stripped"
            } else {
                "padding kept"
            },
        )
    }

    /// Scores `candidate` against `reference`; always within `[0, 1]`.
    pub fn evaluate(&self, reference: &str, candidate: &str) -> f64 {
        let reference = self.config.adjust(reference);
        let candidate = self.config.adjust(candidate);

        match self.config.granularity {
            Granularity::Character => {
                let r: Vec<char> = reference.chars().collect();
                let c: Vec<char> = candidate.chars().collect();
                match self.kind {
                    EvaluatorKind::RestorationAccuracy => accuracy(&r, &c),
                    EvaluatorKind::RestorationErrorRate => error_rate(&r, &c),
                    EvaluatorKind::RestorationF1 => f1_chars(&r, &c),
                }
            }
            Granularity::Word => {
                let r: Vec<&str> = reference.split_whitespace().collect();
                let c: Vec<&str> = candidate.split_whitespace().collect();
                match self.kind {
                    EvaluatorKind::RestorationAccuracy => accuracy(&r, &c),
                    EvaluatorKind::RestorationErrorRate => error_rate(&r, &c),
                    EvaluatorKind::RestorationF1 => f1_words(&r, &c),
                }
            }
        }
    }
}

impl fmt::Display for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn accuracy<T: PartialEq>(reference: &[T], candidate: &[T]) -> f64 {
    if reference.len() != candidate.len() {
        return 0.0;
    }
    if reference.is_empty() {
        return 1.0;
    }
    let correct = reference
        .iter()
        .zip(candidate)
        .filter(|(r, c)| r == c)
        .count();
    correct as f64 / reference.len() as f64
}

fn error_rate<T: PartialEq>(reference: &[T], candidate: &[T]) -> f64 {
    if reference.is_empty() {
        return if candidate.is_empty() { 1.0 } else { 0.0 };
    }
    let distance = levenshtein(reference, candidate);
    (1.0 - distance as f64 / reference.len() as f64).max(0.0)
}

fn f1(tp: usize, fp: usize, fn_: usize) -> f64 {
    let precision = if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    };
    let recall = if tp + fn_ > 0 {
        tp as f64 / (tp + fn_) as f64
    } else {
        0.0
    };
    if precision + recall > 0.0 {
        2.0 * (precision * recall) / (precision + recall)
    } else {
        0.0
    }
}

// A mismatch that only differs by case counts as a missed restoration (FN),
// any other mismatch as a wrong one (FP).
fn f1_chars(reference: &[char], candidate: &[char]) -> f64 {
    if reference.is_empty() && candidate.is_empty() {
        return 1.0;
    }
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (r, c) in reference.iter().zip(candidate) {
        if r == c {
            tp += 1;
        } else if r.to_lowercase().eq(c.to_lowercase()) {
            fn_ += 1;
        } else {
            fp += 1;
        }
    }
    fp += reference.len().abs_diff(candidate.len());
    f1(tp, fp, fn_)
}

fn f1_words(reference: &[&str], candidate: &[&str]) -> f64 {
    if reference.is_empty() && candidate.is_empty() {
        return 1.0;
    }
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (r, c) in reference.iter().zip(candidate) {
        if r == c {
            tp += 1;
        } else {
            fp += 1;
            fn_ += 1;
        }
    }
    let len_diff = reference.len().abs_diff(candidate.len());
    fp += len_diff;
    fn_ += len_diff;
    f1(tp, fp, fn_)
}
