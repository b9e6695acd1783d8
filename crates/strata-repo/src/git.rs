//! Git checkouts through the `git` executable

use std::path::Path;
use std::process::{Output, Stdio};

use tokio::process::Command;

use crate::error::{RepoError, Result};

/// Shallow-fetch `git_ref` of `repo` into `dest`
///
/// `dest` must be an empty directory. Branches, tags and commit ids are all
/// accepted; without a ref the remote `HEAD` is used.
pub async fn checkout(repo: &str, git_ref: Option<&str>, dest: &Path) -> Result<()> {
    let target = git_ref.unwrap_or("HEAD");
    tracing::debug!(repo, git_ref = target, dest = %dest.display(), "fetching git remote");

    run_git(repo, dest, "init", &["init", "--quiet"]).await?;
    run_git(repo, dest, "remote add", &["remote", "add", "origin", repo]).await?;
    run_git(
        repo,
        dest,
        "fetch",
        &["fetch", "--quiet", "--depth", "1", "origin", target],
    )
    .await?;
    run_git(
        repo,
        dest,
        "checkout",
        &["checkout", "--quiet", "--detach", "FETCH_HEAD"],
    )
    .await?;

    // Only the working tree is content; drop history
    tokio::fs::remove_dir_all(dest.join(".git")).await?;
    Ok(())
}

async fn run_git(repo: &str, dir: &Path, operation: &str, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| RepoError::GitFailed {
            reference: repo.to_string(),
            operation: operation.to_string(),
            message: format!("could not run git: {}", e),
        })?;

    if output.status.success() {
        return Ok(());
    }

    let message = format_git_error(&output);
    if is_auth_failure(&message) {
        return Err(RepoError::AuthFailed {
            message: format!("{}: {}", repo, message),
        });
    }
    Err(RepoError::GitFailed {
        reference: repo.to_string(),
        operation: operation.to_string(),
        message,
    })
}

fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

fn is_auth_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("permission denied (publickey)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_detection() {
        assert!(is_auth_failure(
            "fatal: could not read Username for 'https://github.com': terminal prompts disabled"
        ));
        assert!(is_auth_failure("git@github.com: Permission denied (publickey)."));
        assert!(!is_auth_failure("fatal: couldn't find remote ref v9"));
    }
}
