//! Alert rule evaluator (C7): pure functions over query-layer aggregates,
//! driven by an externally owned tick. No timer of its own.

use chrono::Duration;
use sqlx::PgPool;

use orc_db::models::AlertRule;
use orc_db::queries::{runs as run_db, workers};

/// A firing of one alert rule, carrying the human-readable message.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertFiring {
    pub rule_id: uuid::Uuid,
    pub message: String,
}

/// Evaluate every enabled rule and return the ones that fired.
pub async fn check_rules(pool: &PgPool, rules: &[AlertRule]) -> anyhow::Result<Vec<AlertFiring>> {
    let mut firings = Vec::new();
    for rule in rules.iter().filter(|r| r.enabled) {
        if let Some(firing) = check_rule(pool, rule).await? {
            firings.push(firing);
        }
    }
    Ok(firings)
}

async fn check_rule(pool: &PgPool, rule: &AlertRule) -> anyhow::Result<Option<AlertFiring>> {
    use orc_db::models::AlertRuleType::*;

    let window = Duration::minutes(rule.window_minutes as i64);

    match rule.rule_type {
        MissingHeartbeat => {
            let stale = workers::list_stale_heartbeats(pool, window).await?;
            if stale.is_empty() {
                return Ok(None);
            }
            let ids: Vec<String> = stale.iter().map(|w| w.id.to_string()).collect();
            Ok(Some(AlertFiring {
                rule_id: rule.id,
                message: format!("stale worker heartbeats: {}", ids.join(", ")),
            }))
        }
        FailureRateSpike => {
            let count = run_db::count_failed_since(pool, window).await?;
            if (count as f64) < rule.threshold {
                return Ok(None);
            }
            Ok(Some(AlertFiring {
                rule_id: rule.id,
                message: format!(
                    "{count} runs failed in the last {} minutes (threshold {})",
                    rule.window_minutes, rule.threshold
                ),
            }))
        }
        QueueBacklog => {
            let active = run_db::count_active_runs(pool).await?;
            if (active as f64) < rule.threshold {
                return Ok(None);
            }
            Ok(Some(AlertFiring {
                rule_id: rule.id,
                message: format!("{active} active runs (threshold {})", rule.threshold),
            }))
        }
        RepeatedPrFailures => {
            let by_repo = run_db::count_failed_pr_runs_by_repo(pool, window).await?;
            let offenders: Vec<String> = by_repo
                .into_iter()
                .filter(|(_, count)| (*count as f64) >= rule.threshold)
                .map(|(repo_id, count)| format!("{repo_id} ({count})"))
                .collect();
            if offenders.is_empty() {
                return Ok(None);
            }
            Ok(Some(AlertFiring {
                rule_id: rule.id,
                message: format!("repeated PR failures: {}", offenders.join(", ")),
            }))
        }
        RouteLeakDetection => {
            let count = run_db::count_route_leak_candidates(pool, window).await?;
            if (count as f64) < rule.threshold {
                return Ok(None);
            }
            Ok(Some(AlertFiring {
                rule_id: rule.id,
                message: format!(
                    "{count} runs with leaked routes in the last {} minutes (threshold {})",
                    rule.window_minutes, rule.threshold
                ),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_firing_carries_rule_id_and_message() {
        let firing = AlertFiring {
            rule_id: uuid::Uuid::nil(),
            message: "boom".to_string(),
        };
        assert_eq!(firing.message, "boom");
    }
}
