//! `orc alert-check` command: evaluate every enabled alert rule once.

use sqlx::PgPool;

use orc_core::alerts;
use orc_db::queries::alert_rules;

pub async fn run(pool: &PgPool) -> anyhow::Result<()> {
    let rules = alert_rules::list_enabled_alert_rules(pool).await?;
    let firings = alerts::check_rules(pool, &rules).await?;

    if firings.is_empty() {
        println!("No alerts firing.");
        return Ok(());
    }

    for firing in &firings {
        println!("ALERT [{}]: {}", firing.rule_id, firing.message);
    }

    Ok(())
}
