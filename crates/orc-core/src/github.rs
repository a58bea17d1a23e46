//! Parsing conventions for GitHub repository URLs and PR branch names.

/// Strip a GitHub URL down to its `owner/repo` slug.
///
/// Accepts `https://github.com/owner/repo(.git)?` and
/// `git@github.com:owner/repo(.git)?`. Empty or whitespace-only input
/// returns an empty string.
pub fn parse_github_repo_slug(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let stripped = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .or_else(|| trimmed.strip_prefix("git@github.com:"))
        .unwrap_or(trimmed);

    stripped
        .trim_end_matches(".git")
        .trim_matches('/')
        .to_string()
}

/// Build the `PR_BRANCH` name: `agent/<repo>/<task>/<run_id[0:8]>`,
/// lowercased with spaces replaced by `-`.
pub fn pr_branch_name(repo_name: &str, task_name: &str, run_id: &uuid::Uuid) -> String {
    let run_prefix = run_id.simple().to_string();
    let run_prefix = &run_prefix[..8.min(run_prefix.len())];
    let raw = format!("agent/{repo_name}/{task_name}/{run_prefix}");
    raw.to_lowercase().replace(' ', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_url() {
        assert_eq!(
            parse_github_repo_slug("https://github.com/acme/widgets"),
            "acme/widgets"
        );
    }

    #[test]
    fn parses_https_url_with_git_suffix() {
        assert_eq!(
            parse_github_repo_slug("https://github.com/acme/widgets.git"),
            "acme/widgets"
        );
    }

    #[test]
    fn parses_ssh_url() {
        assert_eq!(
            parse_github_repo_slug("git@github.com:acme/widgets.git"),
            "acme/widgets"
        );
    }

    #[test]
    fn trims_trailing_slash() {
        assert_eq!(
            parse_github_repo_slug("https://github.com/acme/widgets/"),
            "acme/widgets"
        );
    }

    #[test]
    fn empty_or_whitespace_yields_empty_string() {
        assert_eq!(parse_github_repo_slug(""), "");
        assert_eq!(parse_github_repo_slug("   "), "");
    }

    #[test]
    fn pr_branch_name_lowercases_and_replaces_spaces() {
        let run_id = uuid::Uuid::parse_str("12345678-90ab-cdef-1234-567890abcdef").unwrap();
        let name = pr_branch_name("My Repo", "Fix Bug", &run_id);
        assert_eq!(name, "agent/my-repo/fix-bug/12345678");
    }
}
