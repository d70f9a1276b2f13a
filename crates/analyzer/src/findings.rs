use serde::{Deserialize, Serialize};

/// Ranking used to order recommendations; later variants rank higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Cost,
    Duration,
    Reliability,
    Coverage,
    Quality,
}

/// An observation about a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub category: Category,
    pub severity: Severity,
    pub message: String,
}

impl Insight {
    pub fn new(category: Category, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
        }
    }
}

/// Something an operator could change before the next run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub category: Category,
    pub severity: Severity,
    /// 0.0 ..= 1.0; breaks ties between equally severe recommendations.
    pub confidence: f64,
    pub action: String,
    pub rationale: String,
}

impl Recommendation {
    pub fn new(
        category: Category,
        severity: Severity,
        confidence: f64,
        action: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            confidence: confidence.clamp(0.0, 1.0),
            action: action.into(),
            rationale: rationale.into(),
        }
    }
}

/// Most severe first, then most confident first; keeps at most `limit`.
pub fn rank(recommendations: &mut Vec<Recommendation>, limit: usize) {
    recommendations.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
    recommendations.truncate(limit);
}
