//! Compare a terminal execution record with its plan-time estimate.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use engine::{ExecutionRecord, ExecutionStatus};
use policy::templates::EVALUATION_STEP_ID;
use policy::Estimate;

use crate::findings::{rank, Category, Insight, Recommendation, Severity};

/// Variances beyond this (either direction) are reported as insights.
pub const INSIGHT_VARIANCE_PCT: f64 = 20.0;
/// Overruns beyond this produce a recommendation.
pub const RECOMMENDATION_VARIANCE_PCT: f64 = 50.0;
/// Success rates below this are called out as a reliability problem.
pub const LOW_SUCCESS_RATE: f64 = 0.8;
/// Quality scores below this suggest a more thorough template.
pub const LOW_QUALITY_SCORE: f64 = 0.7;
pub const MAX_RECOMMENDATIONS: usize = 8;

/// Key the evaluation step reports its score under.
pub const SCORE_KEY: &str = "score";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub actual_cost: f64,
    pub estimated_cost: f64,
    /// `None` when nothing was estimated to cost anything.
    pub cost_variance_pct: Option<f64>,
    pub actual_duration_ms: u64,
    pub estimated_duration_ms: u64,
    pub duration_variance_pct: Option<f64>,
    pub success_rate: f64,
    pub quality_score: f64,
    /// Whether `quality_score` came from the evaluation step.
    pub evaluated: bool,
    pub insights: Vec<Insight>,
    pub recommendations: Vec<Recommendation>,
}

/// Analyse `record` against `estimate`.
///
/// The duration estimate used is the critical path when one was computed,
/// otherwise the running-max approximation.
pub fn analyze(record: &ExecutionRecord, estimate: &Estimate) -> Analysis {
    if !record.status.is_terminal() {
        warn!(execution_id = %record.id, status = %record.status, "analysing a run that has not finished");
    }

    let mut insights = Vec::new();
    let mut recommendations = Vec::new();

    let actual_cost = record.metrics.cost_incurred;
    let cost_variance_pct = variance_pct(actual_cost, estimate.cost);
    if let Some(pct) = cost_variance_pct {
        if pct.abs() > INSIGHT_VARIANCE_PCT {
            insights.push(Insight::new(
                Category::Cost,
                Severity::Info,
                format!(
                    "actual cost {actual_cost:.4} is {pct:+.1}% against the estimate of {:.4}",
                    estimate.cost
                ),
            ));
        }
        if pct > RECOMMENDATION_VARIANCE_PCT {
            recommendations.push(Recommendation::new(
                Category::Cost,
                Severity::Warning,
                variance_confidence(pct),
                "Optimize provider selection: prefer cheaper providers for the costliest steps",
                format!("cost overran the estimate by {pct:.1}%"),
            ));
        }
    }

    let actual_duration_ms = record.metrics.total_duration_ms;
    let estimated_duration_ms = if estimate.critical_path_ms > 0 {
        estimate.critical_path_ms
    } else {
        estimate.duration_ms
    };
    let duration_variance_pct = variance_pct(actual_duration_ms as f64, estimated_duration_ms as f64);
    if let Some(pct) = duration_variance_pct {
        if pct.abs() > INSIGHT_VARIANCE_PCT {
            insights.push(Insight::new(
                Category::Duration,
                Severity::Info,
                format!(
                    "run took {actual_duration_ms}ms, {pct:+.1}% against the estimate of {estimated_duration_ms}ms"
                ),
            ));
        }
        if pct > RECOMMENDATION_VARIANCE_PCT {
            recommendations.push(Recommendation::new(
                Category::Duration,
                Severity::Warning,
                variance_confidence(pct),
                "Parallelize independent steps or use faster providers",
                format!("duration overran the estimate by {pct:.1}%"),
            ));
        }
    }

    let total = record.metrics.total_steps;
    let success_rate = if total == 0 {
        1.0
    } else {
        total.saturating_sub(record.failed_steps.len()) as f64 / total as f64
    };

    let evaluation_score = evaluation_score(record);
    let quality_score = evaluation_score.unwrap_or(success_rate);

    for step_id in &record.failed_steps {
        let reason = record
            .errors
            .iter()
            .rev()
            .find(|e| &e.step_id == step_id)
            .map_or("no error recorded", |e| e.message.as_str());
        insights.push(Insight::new(
            Category::Reliability,
            Severity::Warning,
            format!("step '{step_id}' failed: {reason}"),
        ));
    }
    if !record.failed_steps.is_empty() {
        let steps = join(&record.failed_steps);
        let (severity, confidence) = if record.status == ExecutionStatus::Failed {
            (Severity::Critical, 0.9)
        } else {
            (Severity::Warning, 0.7)
        };
        recommendations.push(Recommendation::new(
            Category::Reliability,
            severity,
            confidence,
            format!("Investigate failing steps ({steps}): raise retry limits or register a fallback provider"),
            format!("{} of {total} steps failed", record.failed_steps.len()),
        ));
    }
    if success_rate < LOW_SUCCESS_RATE {
        recommendations.push(Recommendation::new(
            Category::Reliability,
            Severity::Critical,
            0.8,
            "Switch to providers with higher success rates",
            format!("success rate {:.0}% is below {:.0}%", success_rate * 100.0, LOW_SUCCESS_RATE * 100.0),
        ));
    }

    if !record.skipped_steps.is_empty() {
        let steps = join(&record.skipped_steps);
        insights.push(Insight::new(
            Category::Coverage,
            Severity::Info,
            format!("{} optional step(s) skipped: {steps}", record.skipped_steps.len()),
        ));
        recommendations.push(Recommendation::new(
            Category::Coverage,
            Severity::Info,
            0.6,
            format!("Register or enable providers for skipped steps ({steps})"),
            "skipped steps leave their part of the objective uncovered",
        ));
    }

    match record.status {
        ExecutionStatus::Failed => insights.push(Insight::new(
            Category::Reliability,
            Severity::Critical,
            format!(
                "execution failed: {}",
                record.error.as_deref().unwrap_or("no reason recorded")
            ),
        )),
        ExecutionStatus::Cancelled => insights.push(Insight::new(
            Category::Coverage,
            Severity::Info,
            format!("execution was cancelled after {} of {total} steps settled", record.settled_count()),
        )),
        _ => {}
    }

    if quality_score < LOW_QUALITY_SCORE {
        let source = if evaluation_score.is_some() { "evaluation score" } else { "success rate" };
        recommendations.push(Recommendation::new(
            Category::Quality,
            Severity::Warning,
            0.65,
            "Use a more thorough template or higher-quality providers",
            format!("quality score {quality_score:.2} ({source}) is below {LOW_QUALITY_SCORE}"),
        ));
    }

    rank(&mut recommendations, MAX_RECOMMENDATIONS);

    info!(
        execution_id = %record.id,
        success_rate,
        quality_score,
        insights = insights.len(),
        recommendations = recommendations.len(),
        "execution analysed"
    );

    Analysis {
        execution_id: record.id,
        workflow_id: record.workflow_id.clone(),
        status: record.status,
        actual_cost,
        estimated_cost: estimate.cost,
        cost_variance_pct,
        actual_duration_ms,
        estimated_duration_ms,
        duration_variance_pct,
        success_rate,
        quality_score,
        evaluated: evaluation_score.is_some(),
        insights,
        recommendations,
    }
}

fn variance_pct(actual: f64, estimated: f64) -> Option<f64> {
    (estimated > 0.0).then(|| (actual - estimated) / estimated * 100.0)
}

/// Larger overruns are more certainly worth acting on.
fn variance_confidence(pct: f64) -> f64 {
    (0.5 + pct.abs() / 200.0).min(0.95)
}

/// The evaluation step's own score, if it completed and reported one.
fn evaluation_score(record: &ExecutionRecord) -> Option<f64> {
    if !record.completed_steps.contains(EVALUATION_STEP_ID) {
        return None;
    }
    record
        .step_results
        .get(EVALUATION_STEP_ID)
        .and_then(|result| result.get(SCORE_KEY))
        .and_then(Value::as_f64)
}

fn join<'a>(ids: impl IntoIterator<Item = &'a String>) -> String {
    ids.into_iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{Budget, Step, WorkflowDefinition};
    use policy::RiskLevel;
    use serde_json::{json, Map};

    fn workflow(n: usize) -> WorkflowDefinition {
        WorkflowDefinition::new(
            "wf",
            "wf",
            (0..n).map(|i| Step::new(format!("s{i}"), "p")).collect(),
        )
    }

    fn estimate(cost: f64, duration_ms: u64) -> Estimate {
        Estimate {
            cost,
            duration_ms,
            critical_path_ms: duration_ms,
            quality: 1.0,
            risk: RiskLevel::Low,
        }
    }

    fn finished(n: usize, cost: f64, duration_ms: u64) -> ExecutionRecord {
        let mut record = ExecutionRecord::new(&workflow(n), Map::new(), Budget::unlimited());
        record.transition(ExecutionStatus::Running);
        for i in 0..n {
            record.mark_completed(&format!("s{i}"), json!({}), cost / n as f64);
        }
        record.metrics.total_duration_ms = duration_ms;
        record.transition(ExecutionStatus::Completed);
        record
    }

    #[test]
    fn run_on_estimate_has_nothing_to_say() {
        let analysis = analyze(&finished(3, 0.15, 200), &estimate(0.15, 200));

        assert!(analysis.insights.is_empty());
        assert!(analysis.recommendations.is_empty());
        assert!(analysis.cost_variance_pct.unwrap().abs() < 1e-9);
        assert_eq!(analysis.success_rate, 1.0);
        assert_eq!(analysis.quality_score, 1.0);
        assert!(!analysis.evaluated);
    }

    #[test]
    fn moderate_overrun_is_an_insight_only() {
        let analysis = analyze(&finished(2, 0.13, 100), &estimate(0.10, 100));

        assert!((analysis.cost_variance_pct.unwrap() - 30.0).abs() < 1e-6);
        assert_eq!(analysis.insights.len(), 1);
        assert_eq!(analysis.insights[0].category, Category::Cost);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn large_overruns_produce_recommendations() {
        let analysis = analyze(&finished(2, 0.20, 400), &estimate(0.10, 200));

        let categories: Vec<_> = analysis.recommendations.iter().map(|r| r.category).collect();
        assert!(categories.contains(&Category::Cost));
        assert!(categories.contains(&Category::Duration));
        let cost = analysis
            .recommendations
            .iter()
            .find(|r| r.category == Category::Cost)
            .unwrap();
        assert!(cost.action.contains("Optimize provider selection"));
        let duration = analysis
            .recommendations
            .iter()
            .find(|r| r.category == Category::Duration)
            .unwrap();
        assert!(duration.action.contains("Parallelize"));
    }

    #[test]
    fn zero_estimates_have_no_variance() {
        let analysis = analyze(&finished(1, 0.0, 0), &estimate(0.0, 0));
        assert_eq!(analysis.cost_variance_pct, None);
        assert_eq!(analysis.duration_variance_pct, None);
    }

    #[test]
    fn failures_lower_success_rate_and_rank_critical_first() {
        let mut record = ExecutionRecord::new(&workflow(4), Map::new(), Budget::unlimited());
        record.transition(ExecutionStatus::Running);
        record.mark_completed("s0", json!({}), 0.0);
        record.mark_failed("s1", "boom");
        record.mark_failed("s2", "timed out");
        record.mark_skipped("s3");
        record.error = Some("step 's1' failed".into());
        record.transition(ExecutionStatus::Failed);

        let analysis = analyze(&record, &estimate(0.0, 0));

        assert_eq!(analysis.success_rate, 0.5);
        assert!(analysis
            .insights
            .iter()
            .any(|i| i.message == "step 's2' failed: timed out"));
        assert!(analysis
            .insights
            .iter()
            .any(|i| i.severity == Severity::Critical && i.message.contains("execution failed")));

        let severities: Vec<_> = analysis.recommendations.iter().map(|r| r.severity).collect();
        let mut sorted = severities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(severities, sorted);
        assert_eq!(analysis.recommendations[0].severity, Severity::Critical);
        assert_eq!(analysis.recommendations[0].confidence, 0.9);
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.category == Category::Coverage));
    }

    #[test]
    fn completed_evaluation_overrides_quality() {
        let mut wf = workflow(1);
        wf.steps.push(Step::new(EVALUATION_STEP_ID, "evaluation").depends_on(["s0"]));
        let mut record = ExecutionRecord::new(&wf, Map::new(), Budget::unlimited());
        record.transition(ExecutionStatus::Running);
        record.mark_completed("s0", json!({}), 0.0);
        record.mark_completed(EVALUATION_STEP_ID, json!({ "score": 0.42 }), 0.0);
        record.transition(ExecutionStatus::Completed);

        let analysis = analyze(&record, &estimate(0.0, 0));
        assert!(analysis.evaluated);
        assert_eq!(analysis.quality_score, 0.42);
        assert_eq!(analysis.success_rate, 1.0);
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.category == Category::Quality));
    }

    #[test]
    fn failed_evaluation_does_not_override_quality() {
        let mut wf = workflow(1);
        wf.steps.push(Step::new(EVALUATION_STEP_ID, "evaluation").optional());
        let mut record = ExecutionRecord::new(&wf, Map::new(), Budget::unlimited());
        record.transition(ExecutionStatus::Running);
        record.mark_completed("s0", json!({}), 0.0);
        record.mark_failed(EVALUATION_STEP_ID, "down");
        record.transition(ExecutionStatus::Completed);

        let analysis = analyze(&record, &estimate(0.0, 0));
        assert!(!analysis.evaluated);
        assert_eq!(analysis.quality_score, 0.5);
    }

    #[test]
    fn recommendations_are_capped() {
        let n = 20;
        let mut record = ExecutionRecord::new(&workflow(n), Map::new(), Budget::unlimited());
        record.transition(ExecutionStatus::Running);
        for i in 0..n {
            record.mark_skipped(&format!("s{i}"));
        }
        record.metrics.cost_incurred = 10.0;
        record.metrics.total_duration_ms = 10_000;
        record.transition(ExecutionStatus::Completed);

        let analysis = analyze(&record, &estimate(1.0, 1_000));
        assert!(analysis.recommendations.len() <= MAX_RECOMMENDATIONS);
    }

    #[test]
    fn cancelled_runs_are_reported() {
        let mut record = ExecutionRecord::new(&workflow(3), Map::new(), Budget::unlimited());
        record.transition(ExecutionStatus::Running);
        record.mark_completed("s0", json!({}), 0.0);
        record.transition(ExecutionStatus::Cancelled);

        let analysis = analyze(&record, &estimate(0.0, 0));
        assert!(analysis
            .insights
            .iter()
            .any(|i| i.message == "execution was cancelled after 1 of 3 steps settled"));
    }
}
