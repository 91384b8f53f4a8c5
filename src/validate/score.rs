//! Quality score weighting, pass thresholds and letter grades.

use serde::{Deserialize, Serialize};

/// Weights of each dimension in the overall score.
const COMPLETENESS_WEIGHT: f64 = 0.4;
const CONSISTENCY_WEIGHT: f64 = 0.3;
const ACCURACY_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub completeness: f64,
    pub consistency: f64,
    pub accuracy: f64,
    pub overall: f64,
}

impl QualityScores {
    /// Combines the three dimensions; every score is rounded to 4 decimals.
    pub fn new(completeness: f64, consistency: f64, accuracy: f64) -> Self {
        let weighted = completeness * COMPLETENESS_WEIGHT
            + consistency * CONSISTENCY_WEIGHT
            + accuracy * ACCURACY_WEIGHT;

        Self {
            completeness: round4(completeness),
            consistency: round4(consistency),
            accuracy: round4(accuracy),
            overall: round4(weighted),
        }
    }

    pub fn perfect() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }

    pub fn grade(&self) -> &'static str {
        grade(self.overall)
    }
}

/// Minimums a dataset must meet to pass. Defaults are heuristics and can be
/// overridden from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub min_overall: f64,
    pub min_completeness: f64,
    pub min_consistency: f64,
    pub min_accuracy: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            min_overall: 0.90,
            min_completeness: 0.95,
            min_consistency: 0.90,
            min_accuracy: 0.85,
        }
    }
}

impl ValidationThresholds {
    pub fn passes(&self, scores: &QualityScores) -> bool {
        scores.overall >= self.min_overall
            && scores.completeness >= self.min_completeness
            && scores.consistency >= self.min_consistency
            && scores.accuracy >= self.min_accuracy
    }
}

/// Lowest overall score earning each grade, best first. Anything under the
/// last step is an `F`.
const GRADE_STEPS: [(f64, &str); 5] = [(0.95, "A+"), (0.90, "A"), (0.80, "B"), (0.65, "C"), (0.40, "D")];

/// Letter grade for an overall quality score. A dataset that only just
/// clears the default pass thresholds lands in the `A` band.
pub fn grade(overall: f64) -> &'static str {
    GRADE_STEPS
        .iter()
        .find(|(min, _)| overall >= *min)
        .map_or("F", |&(_, letter)| letter)
}

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        part as f64 / total as f64
    }
}

pub(crate) fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_follows_weighted_overall() {
        assert_eq!(QualityScores::perfect().grade(), "A+");
        // Half the required values missing: 0.4 * 0.5 + 0.6 = 0.8.
        assert_eq!(QualityScores::new(0.5, 1.0, 1.0).grade(), "B");
        // Just under the pass thresholds on every dimension.
        assert_eq!(QualityScores::new(0.94, 0.89, 0.84).grade(), "B");
        assert_eq!(QualityScores::new(0.95, 0.90, 0.85).grade(), "A");
        assert_eq!(QualityScores::new(0.0, 1.0, 1.0).grade(), "D");
        assert_eq!(QualityScores::new(0.0, 0.5, 0.5).grade(), "F");
    }

    #[test]
    fn test_grade_step_edges() {
        assert_eq!(grade(0.95), "A+");
        assert_eq!(grade(0.9499), "A");
        assert_eq!(grade(0.40), "D");
        assert_eq!(grade(0.3999), "F");
    }

    #[test]
    fn test_weighted_overall() {
        assert_eq!(QualityScores::perfect().overall, 1.0);
        let scores = QualityScores::new(0.5, 1.0, 1.0);
        assert_eq!(scores.overall, 0.8);
        assert_eq!(QualityScores::new(0.0, 0.0, 0.0).overall, 0.0);
    }

    #[test]
    fn test_thresholds() {
        let thresholds = ValidationThresholds::default();
        assert!(thresholds.passes(&QualityScores::perfect()));
        // Overall passes, completeness does not.
        assert!(!thresholds.passes(&QualityScores::new(0.94, 1.0, 1.0)));
        assert!(!thresholds.passes(&QualityScores::new(1.0, 1.0, 0.84)));
        assert!(thresholds.passes(&QualityScores::new(0.95, 0.9, 0.9)));
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[0.5, 1.0]), 0.75);
    }
}
