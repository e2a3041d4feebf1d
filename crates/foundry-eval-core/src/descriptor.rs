use foundry_eval_types::{Category, ConfigKind};
use serde::{Deserialize, Serialize};

/// Inclusive bounds of an evaluator's score scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, score: f64) -> bool {
        score.is_finite() && score >= self.min && score <= self.max
    }
}

/// Static metadata about an evaluator. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorDescriptor {
    pub name: String,
    pub category: Category,
    pub required_fields: Vec<String>,
    pub config_kind: ConfigKind,
    pub range: ScoreRange,
    pub threshold: f64,
    /// `true` for quality scales (pass at or above threshold), `false` for risk scales
    /// (pass strictly below threshold).
    pub higher_is_better: bool,
}

impl EvaluatorDescriptor {
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
            required_fields: Vec::new(),
            config_kind: ConfigKind::None,
            range: ScoreRange::new(1.0, 5.0),
            threshold: 3.0,
            higher_is_better: true,
        }
    }

    pub fn requires(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn config(mut self, kind: ConfigKind) -> Self {
        self.config_kind = kind;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.range = ScoreRange::new(min, max);
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn lower_is_better(mut self) -> Self {
        self.higher_is_better = false;
        self
    }

    /// Pass/fail for one in-range score under this descriptor's direction.
    pub fn passes(&self, score: f64) -> bool {
        if self.higher_is_better {
            score >= self.threshold
        } else {
            score < self.threshold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality() -> EvaluatorDescriptor {
        EvaluatorDescriptor::new("coherence", Category::GeneralPurpose)
            .range(1.0, 5.0)
            .threshold(3.0)
    }

    fn risk() -> EvaluatorDescriptor {
        EvaluatorDescriptor::new("violence", Category::SafetySecurity)
            .range(0.0, 7.0)
            .threshold(3.0)
            .lower_is_better()
    }

    #[test]
    fn quality_scale_passes_at_or_above_threshold() {
        let d = quality();
        let mut score = d.range.min;
        while score <= d.range.max {
            assert_eq!(d.passes(score), score >= 3.0, "score {score}");
            score += 0.25;
        }
        assert!(d.passes(4.0));
    }

    #[test]
    fn risk_scale_passes_strictly_below_threshold() {
        let d = risk();
        for score in 0..=7 {
            assert_eq!(d.passes(score as f64), score < 3, "score {score}");
        }
        assert!(!d.passes(6.0));
    }

    #[test]
    fn range_rejects_out_of_bounds_and_nan() {
        let r = ScoreRange::new(0.0, 7.0);
        assert!(r.contains(0.0));
        assert!(r.contains(7.0));
        assert!(!r.contains(7.5));
        assert!(!r.contains(-0.1));
        assert!(!r.contains(f64::NAN));
    }
}
