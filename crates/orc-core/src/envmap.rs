//! Environment variable and secret mapping assembly for a dispatch request.

use std::collections::HashMap;

use orc_db::models::{ExecutionMode, ProviderSecret, Repository, Task};

use crate::github::{parse_github_repo_slug, pr_branch_name};

/// Map a provider name to the environment variable name(s) its secret value
/// should be injected under.
pub fn secret_env_keys(provider: &str) -> Vec<&'static str> {
    match provider {
        "github" => vec!["GH_TOKEN", "GITHUB_TOKEN"],
        "codex" => vec!["CODEX_API_KEY"],
        "opencode" => vec!["OPENCODE_API_KEY"],
        "claude-code" => vec!["ANTHROPIC_API_KEY"],
        "zai" => vec!["Z_AI_API_KEY"],
        _ => vec![],
    }
}

/// Build the core + harness-specific environment for a dispatch request.
/// `zai_secret` is the already-decrypted value of the repository's `zai`
/// secret, or the global `llmtornado` fallback, when harness is `zai`.
pub fn build_env(
    repository: &Repository,
    task: &Task,
    execution_mode: ExecutionMode,
    run_id: &uuid::Uuid,
    zai_secret: Option<&str>,
) -> HashMap<String, String> {
    let mut env = HashMap::new();

    env.insert("GIT_URL".to_string(), repository.git_url.clone());
    env.insert("DEFAULT_BRANCH".to_string(), repository.default_branch.clone());
    env.insert("HARNESS_NAME".to_string(), task.harness.clone());
    env.insert("GH_REPO".to_string(), parse_github_repo_slug(&repository.git_url));

    let mode_str = match execution_mode {
        ExecutionMode::Default => "default",
        ExecutionMode::Review => "review",
    };
    env.insert("TASK_MODE".to_string(), mode_str.to_string());
    env.insert("RUN_MODE".to_string(), mode_str.to_string());

    if task.auto_create_pr {
        env.insert("AUTO_CREATE_PR".to_string(), "true".to_string());
        let branch = pr_branch_name(&repository.name, &task.harness, run_id);
        env.insert("PR_BRANCH".to_string(), branch);
        env.insert("PR_TITLE".to_string(), format!("[agent] {}", task.harness));
        env.insert("PR_BODY".to_string(), task.prompt.clone());
    }

    match task.harness.as_str() {
        "codex" => {
            env.insert("CODEX_TRANSPORT".to_string(), "app-server".to_string());
            let policy = if execution_mode == ExecutionMode::Review {
                "never"
            } else {
                "on-failure"
            };
            env.insert("CODEX_APPROVAL_POLICY".to_string(), policy.to_string());
        }
        "zai" => {
            if let Some(secret) = zai_secret {
                env.insert("Z_AI_API_KEY".to_string(), secret.to_string());
                env.insert("ANTHROPIC_AUTH_TOKEN".to_string(), secret.to_string());
                env.insert("ANTHROPIC_API_KEY".to_string(), secret.to_string());
                env.insert(
                    "ANTHROPIC_BASE_URL".to_string(),
                    "https://api.z.ai/api/anthropic".to_string(),
                );
                env.insert("HARNESS_MODEL".to_string(), "glm-5".to_string());
                env.insert("ZAI_MODEL".to_string(), "glm-5".to_string());
            }
        }
        _ => {}
    }

    env
}

/// Inject a decrypted secret value into `env` under the key(s) its provider
/// maps to; unknown providers fall back to `SECRET_<PROVIDER>`.
pub fn apply_secret(env: &mut HashMap<String, String>, secret: &ProviderSecret, decrypted_value: &str) {
    let keys = secret_env_keys(&secret.provider);
    if keys.is_empty() {
        let key = format!("SECRET_{}", secret.provider.to_uppercase());
        env.insert(key, decrypted_value.to_string());
    } else {
        for key in keys {
            env.insert(key.to_string(), decrypted_value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn repository() -> Repository {
        Repository {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "widgets".to_string(),
            git_url: "https://github.com/acme/widgets".to_string(),
            default_branch: "main".to_string(),
            instruction_files: vec![],
            created_at: Utc::now(),
        }
    }

    fn task(harness: &str, auto_create_pr: bool) -> Task {
        Task {
            id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            harness: harness.to_string(),
            prompt: "do the thing".to_string(),
            command: None,
            concurrency_limit: 0,
            require_approval: false,
            execution_timeout_seconds: 3600,
            retry_max_attempts: 0,
            retry_backoff_base_seconds: 1,
            retry_backoff_mult: 2.0,
            artifact_patterns: vec![],
            instruction_files: vec![],
            kind: orc_db::models::TaskKind::OneShot,
            cron_expression: None,
            enabled: true,
            auto_create_pr,
            last_git_sync_at: None,
            last_git_error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn zai_secret_maps_to_all_expected_keys() {
        let r = repository();
        let t = task("zai", false);
        let run_id = Uuid::new_v4();
        let env = build_env(&r, &t, ExecutionMode::Default, &run_id, Some("zai-secret"));

        assert_eq!(env.get("Z_AI_API_KEY"), Some(&"zai-secret".to_string()));
        assert_eq!(env.get("ANTHROPIC_AUTH_TOKEN"), Some(&"zai-secret".to_string()));
        assert_eq!(env.get("ANTHROPIC_API_KEY"), Some(&"zai-secret".to_string()));
        assert_eq!(
            env.get("ANTHROPIC_BASE_URL"),
            Some(&"https://api.z.ai/api/anthropic".to_string())
        );
        assert_eq!(env.get("HARNESS_MODEL"), Some(&"glm-5".to_string()));
        assert_eq!(env.get("ZAI_MODEL"), Some(&"glm-5".to_string()));
    }

    #[test]
    fn codex_review_mode_sets_never_approval_policy() {
        let r = repository();
        let t = task("codex", false);
        let run_id = Uuid::new_v4();
        let env = build_env(&r, &t, ExecutionMode::Review, &run_id, None);

        assert_eq!(env.get("CODEX_APPROVAL_POLICY"), Some(&"never".to_string()));
        assert_eq!(env.get("TASK_MODE"), Some(&"review".to_string()));
        assert_eq!(env.get("RUN_MODE"), Some(&"review".to_string()));
    }

    #[test]
    fn codex_default_mode_sets_on_failure_approval_policy() {
        let r = repository();
        let t = task("codex", false);
        let run_id = Uuid::new_v4();
        let env = build_env(&r, &t, ExecutionMode::Default, &run_id, None);

        assert_eq!(env.get("CODEX_APPROVAL_POLICY"), Some(&"on-failure".to_string()));
    }

    #[test]
    fn auto_create_pr_sets_branch_and_title() {
        let r = repository();
        let t = task("codex", true);
        let run_id = Uuid::new_v4();
        let env = build_env(&r, &t, ExecutionMode::Default, &run_id, None);

        assert_eq!(env.get("AUTO_CREATE_PR"), Some(&"true".to_string()));
        assert!(env.contains_key("PR_BRANCH"));
        assert!(env.contains_key("PR_TITLE"));
    }

    #[test]
    fn unknown_provider_falls_back_to_secret_prefixed_key() {
        let mut env = HashMap::new();
        let secret = ProviderSecret {
            repository_id: Uuid::new_v4(),
            provider: "slack".to_string(),
            encrypted_value: "enc".to_string(),
            created_at: Utc::now(),
        };
        apply_secret(&mut env, &secret, "decrypted-value");
        assert_eq!(env.get("SECRET_SLACK"), Some(&"decrypted-value".to_string()));
    }

    #[test]
    fn known_provider_maps_to_dedicated_key() {
        let mut env = HashMap::new();
        let secret = ProviderSecret {
            repository_id: Uuid::new_v4(),
            provider: "github".to_string(),
            encrypted_value: "enc".to_string(),
            created_at: Utc::now(),
        };
        apply_secret(&mut env, &secret, "ghp_abc123");
        assert_eq!(env.get("GH_TOKEN"), Some(&"ghp_abc123".to_string()));
        assert_eq!(env.get("GITHUB_TOKEN"), Some(&"ghp_abc123".to_string()));
    }
}
