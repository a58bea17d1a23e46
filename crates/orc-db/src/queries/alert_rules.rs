//! Database query functions for the `alert_rules` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{AlertRule, AlertRuleType};

/// Insert a new alert rule.
pub async fn insert_alert_rule(
    pool: &PgPool,
    rule_type: AlertRuleType,
    threshold: f64,
    window_minutes: i32,
) -> Result<AlertRule> {
    let rule = sqlx::query_as::<_, AlertRule>(
        "INSERT INTO alert_rules (rule_type, threshold, window_minutes, enabled) \
         VALUES ($1, $2, $3, true) \
         RETURNING *",
    )
    .bind(rule_type)
    .bind(threshold)
    .bind(window_minutes)
    .fetch_one(pool)
    .await
    .context("failed to insert alert rule")?;

    Ok(rule)
}

/// List every enabled alert rule, evaluated once per checker tick.
pub async fn list_enabled_alert_rules(pool: &PgPool) -> Result<Vec<AlertRule>> {
    let rules = sqlx::query_as::<_, AlertRule>(
        "SELECT * FROM alert_rules WHERE enabled = true ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list enabled alert rules")?;

    Ok(rules)
}

/// Enable or disable an alert rule.
pub async fn set_alert_rule_enabled(pool: &PgPool, id: Uuid, enabled: bool) -> Result<u64> {
    let result = sqlx::query("UPDATE alert_rules SET enabled = $1 WHERE id = $2")
        .bind(enabled)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update alert rule")?;

    Ok(result.rows_affected())
}
