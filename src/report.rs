//! Human-readable run summaries.

use fly_compose_reconciler::{ReconciliationResult, ServicePlan};
use itertools::Itertools;

/// Whether every service reconciled without a single failure.
#[must_use]
pub fn all_succeeded(results: &[ReconciliationResult]) -> bool {
    results.iter().all(ReconciliationResult::is_success)
}

/// One `[done/total] name: status` progress line.
#[must_use]
pub fn progress_line(done: usize, total: usize, result: &ReconciliationResult) -> String {
    let status = if result.is_success() { "ok" } else { "failed" };
    format!("[{done}/{total}] {}: {status}", result.service_name)
}

/// Per-service summary of an `up` run.
#[must_use]
pub fn summarize(results: &[ReconciliationResult]) -> String {
    let failed = results.iter().filter(|r| !r.is_success()).count();

    results
        .iter()
        .flat_map(service_lines)
        .chain(std::iter::once(format!(
            "{} service(s), {failed} failed",
            results.len()
        )))
        .map(|line| line + "\n")
        .collect()
}

fn service_lines(result: &ReconciliationResult) -> Vec<String> {
    let status = if result.is_success() { "ok" } else { "FAILED" };
    let mut lines = vec![format!(
        "{status:<6} {} ({} succeeded, {} failed, {} skipped)",
        result.service_name,
        result.succeeded_count(),
        result.failed_count(),
        result.skipped.len()
    )];

    if let Some(abort) = &result.aborted {
        lines.push(format!("       aborted: {abort}"));
    }
    lines.extend(result.failed.iter().map(|failed| {
        format!(
            "       {}: {} ({})",
            failed.kind, failed.action, failed.message
        )
    }));
    if let Some(state) = &result.final_state {
        lines.push(format!(
            "       now: {} machine(s), volumes [{}]",
            state.machines.len(),
            state.existing_volume_names().iter().join(", ")
        ));
    }
    lines
}

/// Planned actions per service for a `plan` run.
#[must_use]
pub fn render_plans(plans: &[ServicePlan]) -> String {
    plans
        .iter()
        .flat_map(|plan| match &plan.outcome {
            Ok(preview) if preview.actions.is_empty() => {
                vec![format!("{}: nothing to do", plan.service_name)]
            }
            Ok(preview) => std::iter::once(format!("{}:", plan.service_name))
                .chain(
                    preview
                        .actions
                        .iter()
                        .enumerate()
                        .map(|(step, action)| format!("  {}. {action}", step.saturating_add(1))),
                )
                .collect(),
            Err(failure) => vec![format!("{}: cannot plan: {failure}", plan.service_name)],
        })
        .map(|line| line + "\n")
        .collect()
}
