use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use super::{AgentDispatchFacade, Params};

/// Converts a 5-field crontab expression to the seconds-first form the scheduler expects.
/// Six- and seven-field expressions pass through unchanged.
pub fn cron_to_scheduler_expr(expr: &str) -> Option<String> {
    let fields = expr.split_whitespace().count();
    match fields {
        5 => Some(format!("0 {}", expr.trim())),
        6 | 7 => Some(expr.trim().to_string()),
        _ => None,
    }
}

/// Registers every `type = "scheduled"` workflow trigger on `scheduler`.
/// Each firing dispatches `{operation: <action>}` to the owning agent.
pub async fn schedule_workflow_triggers(
    scheduler: &JobScheduler,
    facade: Arc<AgentDispatchFacade>,
) -> Result<usize> {
    let mut registered = 0;
    for (agent_name, trigger) in facade.registry().workflow_triggers().await {
        if trigger.config.get("type").and_then(Value::as_str) != Some("scheduled") {
            continue;
        }
        let Some(schedule) = trigger.config.get("schedule").and_then(Value::as_str) else {
            warn!(
                "Scheduled trigger '{}' on agent {} has no schedule; skipped",
                trigger.name, agent_name
            );
            continue;
        };
        let Some(cron_expr) = cron_to_scheduler_expr(schedule) else {
            warn!(
                "Scheduled trigger '{}' on agent {} has invalid schedule '{}'",
                trigger.name, agent_name, schedule
            );
            continue;
        };
        let action = trigger
            .config
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("process_documents")
            .to_string();

        let facade_for_job = facade.clone();
        let agent_for_job = agent_name.clone();
        let trigger_for_job = trigger.name.clone();
        let job = Job::new_async(cron_expr.as_str(), move |_uuid, mut _l| {
            let facade = facade_for_job.clone();
            let agent = agent_for_job.clone();
            let trigger_name = trigger_for_job.clone();
            let mut params = Params::new();
            params.insert("operation".into(), Value::String(action.clone()));

            Box::pin(async move {
                info!("Scheduled trigger '{}' firing for agent {}", trigger_name, agent);
                match facade.dispatch(&agent, params).await {
                    Ok(report) if !report.outcome.is_success() => warn!(
                        "Scheduled run of {} failed: {}",
                        agent,
                        report.outcome.error().unwrap_or("Unknown error")
                    ),
                    Ok(_) => {}
                    Err(e) => warn!("Scheduled run of {} rejected: {}", agent, e),
                }
            })
        });

        match job {
            Ok(job) => match scheduler.add(job).await {
                Ok(_) => {
                    info!(
                        "Scheduled trigger '{}' for agent {} ({})",
                        trigger.name, agent_name, schedule
                    );
                    registered += 1;
                }
                Err(e) => error!(
                    "Failed to register scheduled trigger '{}' for agent {}: {}",
                    trigger.name, agent_name, e
                ),
            },
            Err(e) => error!(
                "Invalid cron expression '{}' on trigger '{}': {}",
                schedule, trigger.name, e
            ),
        }
    }
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_cron_gains_a_seconds_column() {
        assert_eq!(
            cron_to_scheduler_expr("0 */6 * * *").as_deref(),
            Some("0 0 */6 * * *")
        );
        assert_eq!(
            cron_to_scheduler_expr("0 0/5 * * * *").as_deref(),
            Some("0 0/5 * * * *")
        );
        assert_eq!(cron_to_scheduler_expr("* *"), None);
        assert_eq!(cron_to_scheduler_expr(""), None);
    }
}
