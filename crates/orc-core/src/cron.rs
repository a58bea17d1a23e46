//! Cron next-fire computation for scheduled tasks (C7).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use thiserror::Error;

use orc_db::models::{Task, TaskKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("invalid cron expression: {0}")]
    InvalidExpression(String),
}

/// `cron_expression` is accepted in either the conventional 5-field form
/// (`min hour day month day_of_week`) or the `cron` crate's native 6/7-field
/// form with an explicit leading seconds field. A 5-field expression is
/// normalized by prepending a `0` seconds field before parsing, so
/// `"0 * * * *"` fires on the hour exactly as the 5-field convention
/// documents.
fn normalize_cron_expr(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// The next time `task` should fire, relative to `now`.
///
/// - `OneShot` tasks are always "due now".
/// - Disabled tasks, and tasks of any kind other than `Cron`, never fire.
/// - `Cron` tasks fire at the next occurrence of their cron expression.
pub fn next_fire(task: &Task, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CronError> {
    if !task.enabled {
        return Ok(None);
    }

    match task.kind {
        TaskKind::OneShot => Ok(Some(now)),
        TaskKind::EventDriven => Ok(None),
        TaskKind::Cron => {
            let Some(expr) = &task.cron_expression else {
                return Ok(None);
            };
            let normalized = normalize_cron_expr(expr);
            let schedule = Schedule::from_str(&normalized)
                .map_err(|e| CronError::InvalidExpression(format!("{expr}: {e}")))?;
            Ok(schedule.after(&now).next())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn base_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            harness: "codex".to_string(),
            prompt: "do the thing".to_string(),
            command: None,
            concurrency_limit: 0,
            require_approval: false,
            execution_timeout_seconds: 3600,
            retry_max_attempts: 0,
            retry_backoff_base_seconds: 30,
            retry_backoff_mult: 2.0,
            artifact_patterns: vec![],
            instruction_files: vec![],
            kind: TaskKind::OneShot,
            cron_expression: None,
            enabled: true,
            auto_create_pr: false,
            last_git_sync_at: None,
            last_git_error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn one_shot_is_due_now() {
        let task = base_task();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_fire(&task, now).unwrap(), Some(now));
    }

    #[test]
    fn disabled_task_never_fires() {
        let mut task = base_task();
        task.enabled = false;
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_fire(&task, now).unwrap(), None);
    }

    #[test]
    fn event_driven_never_fires() {
        let mut task = base_task();
        task.kind = TaskKind::EventDriven;
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_fire(&task, now).unwrap(), None);
    }

    #[test]
    fn cron_without_expression_never_fires() {
        let mut task = base_task();
        task.kind = TaskKind::Cron;
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_fire(&task, now).unwrap(), None);
    }

    #[test]
    fn cron_computes_next_occurrence_from_conventional_five_field_expression() {
        let mut task = base_task();
        task.kind = TaskKind::Cron;
        task.cron_expression = Some("0 * * * *".to_string());
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 30, 0).unwrap();
        let fire = next_fire(&task, now).unwrap().unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn cron_accepts_explicit_seconds_field() {
        let mut task = base_task();
        task.kind = TaskKind::Cron;
        task.cron_expression = Some("0 0 * * * * *".to_string());
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 30, 0).unwrap();
        let fire = next_fire(&task, now).unwrap().unwrap();
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn invalid_cron_expression_is_an_error() {
        let mut task = base_task();
        task.kind = TaskKind::Cron;
        task.cron_expression = Some("not a cron expression".to_string());
        let now = Utc::now();
        assert!(matches!(next_fire(&task, now), Err(CronError::InvalidExpression(_))));
    }
}
