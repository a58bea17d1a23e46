//! Layered prompt assembly for a dispatched run.

use std::collections::HashMap;

use orc_db::models::{Repository, Task};

/// Concatenate repository instructions (in list order), then task
/// instructions (in list order), then the task prompt, each under a
/// labelled header. If every instruction list is empty, the result is the
/// task prompt verbatim.
pub fn assemble_prompt(repository: &Repository, task: &Task) -> String {
    if repository.instruction_files.is_empty() && task.instruction_files.is_empty() {
        return task.prompt.clone();
    }

    let mut sections = Vec::new();

    for (i, instruction) in repository.instruction_files.iter().enumerate() {
        sections.push(format!("## Repository instruction {}\n{}", i + 1, instruction));
    }
    for (i, instruction) in task.instruction_files.iter().enumerate() {
        sections.push(format!("## Task instruction {}\n{}", i + 1, instruction));
    }
    sections.push(format!("## Task\n{}", task.prompt));

    sections.join("\n\n")
}

/// Replace every `{{placeholder}}` token in `prompt` with its resolved
/// value from `substitutions`. An unmapped placeholder is left as-is, since
/// a task dispatched outside a workflow node has no substitutions to offer.
pub fn apply_substitutions(prompt: &str, substitutions: &HashMap<String, String>) -> String {
    if substitutions.is_empty() {
        return prompt.to_string();
    }

    let mut result = prompt.to_string();
    for (placeholder, value) in substitutions {
        result = result.replace(&format!("{{{{{placeholder}}}}}"), value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn repo(instruction_files: Vec<String>) -> Repository {
        Repository {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "widgets".to_string(),
            git_url: "https://github.com/acme/widgets".to_string(),
            default_branch: "main".to_string(),
            instruction_files,
            created_at: Utc::now(),
        }
    }

    fn task(prompt: &str, instruction_files: Vec<String>) -> Task {
        Task {
            id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            harness: "codex".to_string(),
            prompt: prompt.to_string(),
            command: None,
            concurrency_limit: 0,
            require_approval: false,
            execution_timeout_seconds: 3600,
            retry_max_attempts: 0,
            retry_backoff_base_seconds: 1,
            retry_backoff_mult: 2.0,
            artifact_patterns: vec![],
            instruction_files,
            kind: orc_db::models::TaskKind::OneShot,
            cron_expression: None,
            enabled: true,
            auto_create_pr: false,
            last_git_sync_at: None,
            last_git_error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn no_instructions_returns_prompt_verbatim() {
        let r = repo(vec![]);
        let t = task("fix the bug", vec![]);
        assert_eq!(assemble_prompt(&r, &t), "fix the bug");
    }

    #[test]
    fn layers_repository_then_task_instructions_then_prompt() {
        let r = repo(vec!["follow style guide".to_string()]);
        let t = task("fix the bug", vec!["use TDD".to_string()]);
        let assembled = assemble_prompt(&r, &t);

        let style_pos = assembled.find("follow style guide").unwrap();
        let tdd_pos = assembled.find("use TDD").unwrap();
        let prompt_pos = assembled.find("fix the bug").unwrap();

        assert!(style_pos < tdd_pos);
        assert!(tdd_pos < prompt_pos);
    }

    #[test]
    fn substitutions_replace_matching_placeholders() {
        let subs = HashMap::from([("score".to_string(), "7".to_string())]);
        let result = apply_substitutions("review the diff, prior score was {{score}}", &subs);
        assert_eq!(result, "review the diff, prior score was 7");
    }

    #[test]
    fn unmapped_placeholder_is_left_untouched() {
        let subs = HashMap::new();
        let result = apply_substitutions("hello {{name}}", &subs);
        assert_eq!(result, "hello {{name}}");
    }
}
