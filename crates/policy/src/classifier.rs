//! Template classification.
//!
//! An external [`TemplateClassifier`] (typically backed by a reasoning
//! service) gets the first say. Whenever it is missing, fails, times out or
//! names a key the catalog doesn't know, [`heuristic_template`] decides.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;
use crate::request::{Constraints, Preferences, Priority, QualityLevel};
use crate::templates::TemplateKey;

/// Duration limits below this pick the rapid template.
pub const RAPID_DURATION_THRESHOLD_MS: u64 = 60_000;

#[async_trait]
pub trait TemplateClassifier: Send + Sync {
    /// Name a template for `objective`. The answer is parsed as a
    /// [`TemplateKey`]; anything unparseable falls back to the heuristic.
    async fn classify(
        &self,
        objective: &str,
        constraints: &Constraints,
        candidates: &[TemplateKey],
    ) -> Result<String, ClassifierError>;
}

/// Who picked the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Classifier,
    Heuristic,
}

/// Deterministic fallback selection.
pub fn heuristic_template(constraints: &Constraints, preferences: &Preferences) -> TemplateKey {
    if constraints
        .max_duration_ms
        .is_some_and(|ms| ms < RAPID_DURATION_THRESHOLD_MS)
    {
        return TemplateKey::Rapid;
    }
    if preferences.priority == Priority::Quality
        || constraints.quality == Some(QualityLevel::Excellent)
    {
        return TemplateKey::Deep;
    }
    TemplateKey::Comprehensive
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tight_deadline_wins_over_quality() {
        let constraints = Constraints {
            max_duration_ms: Some(30_000),
            quality: Some(QualityLevel::Excellent),
            ..Constraints::default()
        };
        let prefs = Preferences::prioritising(Priority::Quality);
        assert_eq!(heuristic_template(&constraints, &prefs), TemplateKey::Rapid);
    }

    #[test]
    fn quality_signals_pick_deep() {
        let excellent = Constraints {
            quality: Some(QualityLevel::Excellent),
            ..Constraints::default()
        };
        assert_eq!(
            heuristic_template(&excellent, &Preferences::default()),
            TemplateKey::Deep
        );
        assert_eq!(
            heuristic_template(&Constraints::default(), &Preferences::prioritising(Priority::Quality)),
            TemplateKey::Deep
        );
    }

    #[test]
    fn everything_else_is_comprehensive() {
        let relaxed = Constraints {
            max_duration_ms: Some(RAPID_DURATION_THRESHOLD_MS),
            quality: Some(QualityLevel::High),
            ..Constraints::default()
        };
        assert_eq!(
            heuristic_template(&relaxed, &Preferences::prioritising(Priority::Cost)),
            TemplateKey::Comprehensive
        );
    }
}
