//! Composite Score Engine
//!
//! Combines component scores (each already on 0-100) into one weighted score.
//! Only components that are present contribute weight, so dropping an
//! indicator redistributes its share proportionally over the rest.

use serde::{Deserialize, Serialize};

/// Score reported when nothing contributes
pub const NEUTRAL_SCORE: f64 = 50.0;

/// One weighted input to a composite score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeComponent {
    /// Normalized score in `[0, 100]`
    pub score: f64,
    /// Relative weight (need not sum to 1 across components)
    pub weight: f64,
    pub label: String,
}

impl CompositeComponent {
    pub fn new(label: impl Into<String>, score: f64, weight: f64) -> Self {
        Self {
            score,
            weight,
            label: label.into(),
        }
    }

    /// Non-finite scores and non-positive weights are left out
    fn contributes(&self) -> bool {
        self.score.is_finite() && self.weight.is_finite() && self.weight > 0.0
    }
}

/// Weighted result plus the labels of the components that fed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub score: f64,
    pub labels: Vec<String>,
}

impl CompositeScore {
    fn neutral() -> Self {
        Self {
            score: NEUTRAL_SCORE,
            labels: Vec::new(),
        }
    }
}

/// Weighted average of `components`, clamped to `[0, 100]`
///
/// Zero total weight yields `(50.0, [])`.
pub fn weighted_average(components: &[CompositeComponent]) -> CompositeScore {
    let present: Vec<&CompositeComponent> = components.iter().filter(|c| c.contributes()).collect();

    let total_weight: f64 = present.iter().map(|c| c.weight).sum();
    if total_weight <= 0.0 {
        return CompositeScore::neutral();
    }

    let weighted: f64 = present.iter().map(|c| c.score * c.weight).sum();
    CompositeScore {
        score: (weighted / total_weight).clamp(0.0, 100.0),
        labels: present.iter().map(|c| c.label.clone()).collect(),
    }
}

/// Map a raw signal onto `[0, 100]` with a logistic curve
///
/// With `average == 0` the signal is zero-centred (funding rates) and
/// `100 / (1 + e^(-k * value))` is used. Otherwise the value is compared to
/// its average, `100 / (1 + e^(-k * (value / average - 1)))`, so a value equal
/// to its average maps to exactly 50. `k` is a per-signal calibration.
pub fn sigmoid_normalize(value: f64, average: f64, k: f64) -> f64 {
    if !value.is_finite() || !average.is_finite() || !k.is_finite() {
        return NEUTRAL_SCORE;
    }

    let x = if average == 0.0 {
        value
    } else {
        value / average - 1.0
    };
    100.0 / (1.0 + (-k * x).exp())
}

// =============================================================================
// Tests
// =============================================================================
