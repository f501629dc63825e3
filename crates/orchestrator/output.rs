use supabase_stack::applier::ApplyOutcome;
use supabase_stack::scheduler::{AppliedResource, FailureReason, ServiceStatus};
use supabase_stack::{DeploymentResult, DestroyResult};

fn changes(resources: &[AppliedResource]) -> String {
    let count = |outcome| resources.iter().filter(|r| r.outcome == outcome).count();
    format!(
        "{} created, {} updated, {} unchanged",
        count(ApplyOutcome::Created),
        count(ApplyOutcome::Updated),
        count(ApplyOutcome::Unchanged)
    )
}

fn row(status: &ServiceStatus) -> (&'static str, String) {
    match status {
        ServiceStatus::Applied { resources } => ("applied", changes(resources)),
        ServiceStatus::Skipped { blocked_by } => ("skipped", format!("blocked by {blocked_by}")),
        ServiceStatus::Failed { reason, .. } => match reason {
            FailureReason::Apply {
                kind,
                name,
                message,
            } => ("failed", format!("{kind}/{name}: {message}")),
            FailureReason::HealthTimeout { last_condition } => {
                ("unhealthy", last_condition.clone())
            }
        },
        ServiceStatus::Cancelled => ("cancelled", String::new()),
    }
}

pub fn deployment_table(result: &DeploymentResult) -> String {
    let mut out = format!("{:<10} {:<10} DETAIL\n", "SERVICE", "STATUS");
    for (service, status) in &result.services {
        let (label, detail) = row(status);
        out.push_str(&format!("{:<10} {label:<10} {detail}\n", service.as_str()));
    }
    if let Some(failure) = &result.shared_failure {
        out.push_str(&format!("\nshared resources failed: {failure}\n"));
    }
    for warning in &result.warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }
    let elapsed = result.finished_at - result.started_at;
    out.push_str(&format!(
        "\nnamespace {} {} in {}s\n",
        result.namespace,
        if result.success { "ready" } else { "not ready" },
        elapsed.num_seconds()
    ));
    out
}

pub fn destroy_line(result: &DestroyResult) -> String {
    if result.already_absent {
        format!("namespace {} was already absent", result.namespace)
    } else {
        format!("namespace {} deletion accepted", result.namespace)
    }
}
