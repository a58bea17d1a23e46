//! Layered configuration for the orchestrator core.
//!
//! Resolution chain for every key: explicit constructor argument > `ORC_*`
//! environment variable > `[orchestrator]` table in the TOML config file >
//! compile-time default. A value present but unparseable at any tier is
//! logged at `warn` and treated as absent rather than a hard failure.

use std::path::PathBuf;

use serde::Deserialize;

/// Return the orc config directory: `$XDG_CONFIG_HOME/orc` or `~/.config/orc`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("orc");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("orc")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    orchestrator: OrchestratorFileSection,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestratorFileSection {
    max_global_concurrent_runs: Option<i64>,
    per_project_concurrency_limit: Option<i64>,
    per_repo_concurrency_limit: Option<i64>,
    dead_run_detection: DeadRunDetectionFileSection,
    stage_timeout: StageTimeoutFileSection,
}

#[derive(Debug, Default, Deserialize)]
struct DeadRunDetectionFileSection {
    check_interval_seconds: Option<i64>,
    stale_run_threshold_minutes: Option<i64>,
    zombie_run_threshold_minutes: Option<i64>,
    max_run_age_hours: Option<i64>,
    force_kill_on_timeout: Option<bool>,
    enable_auto_termination: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct StageTimeoutFileSection {
    default_task_stage_timeout_minutes: Option<i64>,
    default_approval_stage_timeout_hours: Option<i64>,
    default_parallel_stage_timeout_minutes: Option<i64>,
    max_stage_timeout_hours: Option<i64>,
}

fn load_file_section() -> OrchestratorFileSection {
    let path = config_path();
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return OrchestratorFileSection::default();
    };
    match toml::from_str::<ConfigFile>(&contents) {
        Ok(cfg) => cfg.orchestrator,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse config file, ignoring");
            OrchestratorFileSection::default()
        }
    }
}

/// Resolve an integer key through env var > file value > default, warning
/// and falling through on an unparseable env var.
fn resolve_int(env_key: &str, file_value: Option<i64>, default: i64) -> i64 {
    if let Ok(raw) = std::env::var(env_key) {
        match raw.parse::<i64>() {
            Ok(v) => return v,
            Err(_) => {
                tracing::warn!(env_key, raw, "unparseable integer env var, ignoring");
            }
        }
    }
    file_value.unwrap_or(default)
}

fn resolve_bool(env_key: &str, file_value: Option<bool>, default: bool) -> bool {
    if let Ok(raw) = std::env::var(env_key) {
        match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => return true,
            "false" | "0" | "no" => return false,
            _ => {
                tracing::warn!(env_key, raw, "unparseable boolean env var, ignoring");
            }
        }
    }
    file_value.unwrap_or(default)
}

/// Admission gates evaluated by the dispatcher (C1).
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub max_global_concurrent_runs: i64,
    pub per_project_concurrency_limit: i64,
    pub per_repo_concurrency_limit: i64,
    /// Per-project admission is optional, gated by this flag.
    pub enforce_project_limit: bool,
}

/// Dead-run detection thresholds consumed by the recovery service (C6).
#[derive(Debug, Clone)]
pub struct DeadRunDetectionConfig {
    pub check_interval_seconds: i64,
    pub stale_run_threshold_minutes: i64,
    pub zombie_run_threshold_minutes: i64,
    pub max_run_age_hours: i64,
    pub force_kill_on_timeout: bool,
    pub enable_auto_termination: bool,
}

/// Stage timeout defaults for the workflow executor (C5).
#[derive(Debug, Clone)]
pub struct StageTimeoutConfig {
    pub default_task_stage_timeout_minutes: i64,
    pub default_approval_stage_timeout_hours: i64,
    pub default_parallel_stage_timeout_minutes: i64,
    pub max_stage_timeout_hours: i64,
}

/// The fully resolved configuration surface for the orchestrator core.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub admission: AdmissionConfig,
    pub dead_run_detection: DeadRunDetectionConfig,
    pub stage_timeout: StageTimeoutConfig,
}

impl OrchestratorConfig {
    /// Resolve every key via env var > TOML file > compile-time default.
    pub fn resolve() -> Self {
        let file = load_file_section();

        let per_project_configured = file.per_project_concurrency_limit.is_some()
            || std::env::var("ORC_PER_PROJECT_CONCURRENCY_LIMIT").is_ok();

        let admission = AdmissionConfig {
            max_global_concurrent_runs: resolve_int(
                "ORC_MAX_GLOBAL_CONCURRENT_RUNS",
                file.max_global_concurrent_runs,
                50,
            ),
            per_project_concurrency_limit: resolve_int(
                "ORC_PER_PROJECT_CONCURRENCY_LIMIT",
                file.per_project_concurrency_limit,
                10,
            ),
            per_repo_concurrency_limit: resolve_int(
                "ORC_PER_REPO_CONCURRENCY_LIMIT",
                file.per_repo_concurrency_limit,
                5,
            ),
            enforce_project_limit: per_project_configured,
        };

        let d = file.dead_run_detection;
        let dead_run_detection = DeadRunDetectionConfig {
            check_interval_seconds: resolve_int(
                "ORC_DEAD_RUN_DETECTION_CHECK_INTERVAL_SECONDS",
                d.check_interval_seconds,
                60,
            ),
            stale_run_threshold_minutes: resolve_int(
                "ORC_DEAD_RUN_DETECTION_STALE_RUN_THRESHOLD_MINUTES",
                d.stale_run_threshold_minutes,
                30,
            ),
            zombie_run_threshold_minutes: resolve_int(
                "ORC_DEAD_RUN_DETECTION_ZOMBIE_RUN_THRESHOLD_MINUTES",
                d.zombie_run_threshold_minutes,
                120,
            ),
            max_run_age_hours: resolve_int(
                "ORC_DEAD_RUN_DETECTION_MAX_RUN_AGE_HOURS",
                d.max_run_age_hours,
                24,
            ),
            force_kill_on_timeout: resolve_bool(
                "ORC_DEAD_RUN_DETECTION_FORCE_KILL_ON_TIMEOUT",
                d.force_kill_on_timeout,
                true,
            ),
            enable_auto_termination: resolve_bool(
                "ORC_DEAD_RUN_DETECTION_ENABLE_AUTO_TERMINATION",
                d.enable_auto_termination,
                true,
            ),
        };

        let s = file.stage_timeout;
        let stage_timeout = StageTimeoutConfig {
            default_task_stage_timeout_minutes: resolve_int(
                "ORC_STAGE_TIMEOUT_DEFAULT_TASK_STAGE_TIMEOUT_MINUTES",
                s.default_task_stage_timeout_minutes,
                60,
            ),
            default_approval_stage_timeout_hours: resolve_int(
                "ORC_STAGE_TIMEOUT_DEFAULT_APPROVAL_STAGE_TIMEOUT_HOURS",
                s.default_approval_stage_timeout_hours,
                24,
            ),
            default_parallel_stage_timeout_minutes: resolve_int(
                "ORC_STAGE_TIMEOUT_DEFAULT_PARALLEL_STAGE_TIMEOUT_MINUTES",
                s.default_parallel_stage_timeout_minutes,
                90,
            ),
            max_stage_timeout_hours: resolve_int(
                "ORC_STAGE_TIMEOUT_MAX_STAGE_TIMEOUT_HOURS",
                s.max_stage_timeout_hours,
                48,
            ),
        };

        Self {
            admission,
            dead_run_detection,
            stage_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_int_falls_back_to_default_when_absent() {
        unsafe { std::env::remove_var("ORC_TEST_NOT_SET") };
        assert_eq!(resolve_int("ORC_TEST_NOT_SET", None, 42), 42);
    }

    #[test]
    fn resolve_int_prefers_file_value_over_default() {
        unsafe { std::env::remove_var("ORC_TEST_NOT_SET_2") };
        assert_eq!(resolve_int("ORC_TEST_NOT_SET_2", Some(7), 42), 7);
    }

    #[test]
    fn resolve_int_prefers_env_over_file() {
        unsafe { std::env::set_var("ORC_TEST_ENV_OVERRIDE", "99") };
        assert_eq!(resolve_int("ORC_TEST_ENV_OVERRIDE", Some(7), 42), 99);
        unsafe { std::env::remove_var("ORC_TEST_ENV_OVERRIDE") };
    }

    #[test]
    fn resolve_int_ignores_unparseable_env_var() {
        unsafe { std::env::set_var("ORC_TEST_BAD_INT", "not-a-number") };
        assert_eq!(resolve_int("ORC_TEST_BAD_INT", Some(7), 42), 7);
        unsafe { std::env::remove_var("ORC_TEST_BAD_INT") };
    }

    #[test]
    fn resolve_bool_parses_common_forms() {
        unsafe { std::env::set_var("ORC_TEST_BOOL", "false") };
        assert!(!resolve_bool("ORC_TEST_BOOL", Some(true), true));
        unsafe { std::env::remove_var("ORC_TEST_BOOL") };
    }

    #[test]
    fn default_config_has_documented_defaults() {
        unsafe { std::env::remove_var("ORC_MAX_GLOBAL_CONCURRENT_RUNS") };
        unsafe { std::env::remove_var("ORC_PER_PROJECT_CONCURRENCY_LIMIT") };
        let config = OrchestratorConfig::resolve();
        assert_eq!(config.admission.max_global_concurrent_runs, 50);
        assert_eq!(config.dead_run_detection.max_run_age_hours, 24);
        assert_eq!(config.stage_timeout.max_stage_timeout_hours, 48);
    }
}
