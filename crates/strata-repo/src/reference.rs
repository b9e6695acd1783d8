//! Remote resource references
//!
//! Supported forms:
//! - `https://host/org/repo//subdir?ref=v1` (git over HTTPS, `//` separates the subdirectory)
//! - `https://host/org/repo.git/subdir?ref=v1`
//! - `git@host:org/repo.git//subdir?ref=main` and `ssh://git@host/org/repo.git//subdir`
//! - `github.com/org/repo/subdir?ref=v1` (also gitlab.com, bitbucket.org)
//! - `https://host/path/file.yaml` (plain HTTP file)
//!
//! Any form accepts `digest=sha256:<hex>` in its query to pin the content.

use std::fmt;
use url::Url;

use crate::error::{RepoError, Result};

/// Hosts that may be written without a scheme
const SCHEMELESS_GIT_HOSTS: &[&str] = &["github.com/", "gitlab.com/", "bitbucket.org/"];

/// What a reference points at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteSource {
    /// A git repository, optionally narrowed to a subdirectory
    Git {
        repo: String,
        subdir: Option<String>,
        git_ref: Option<String>,
    },

    /// A single file served over HTTP(S)
    Http { url: String },
}

/// A parsed remote reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteRef {
    raw: String,
    pub source: RemoteSource,
    /// Expected `sha256:<hex>` content digest
    pub digest: Option<String>,
}

/// Whether a resource entry names a remote rather than a local path
pub fn is_remote(reference: &str) -> bool {
    let reference = reference.trim();
    reference.starts_with("https://")
        || reference.starts_with("http://")
        || reference.starts_with("git@")
        || reference.starts_with("ssh://")
        || reference.starts_with("git::")
        || SCHEMELESS_GIT_HOSTS.iter().any(|h| reference.starts_with(h))
}

impl RemoteRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let raw = reference.trim().to_string();
        let invalid = |reason: &str| RepoError::InvalidReference {
            reference: raw.clone(),
            reason: reason.to_string(),
        };

        if !is_remote(&raw) {
            return Err(invalid("not a remote reference"));
        }

        let (location, query) = match raw.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (raw.as_str(), None),
        };

        let mut git_ref = None;
        let mut digest = None;
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            match pair.split_once('=') {
                Some(("ref" | "version", value)) if !value.is_empty() => {
                    git_ref = Some(value.to_string())
                }
                Some(("digest", value)) => digest = Some(normalize_digest(value).ok_or_else(|| {
                    invalid("digest must be sha256:<64 hex characters>")
                })?),
                Some(("timeout" | "submodules", _)) => {}
                _ => return Err(invalid(&format!("unsupported query parameter '{}'", pair))),
            }
        }

        let location = location.strip_prefix("git::").unwrap_or(location);
        let source = if location.starts_with("git@") || location.starts_with("ssh://") {
            let (repo, subdir) = split_repo_subdir(location, true);
            RemoteSource::Git {
                repo,
                subdir,
                git_ref,
            }
        } else if let Some(host) = SCHEMELESS_GIT_HOSTS.iter().find(|h| location.starts_with(**h)) {
            let (repo, subdir) = split_hosted(location, host).ok_or_else(|| invalid("expected host/org/repo"))?;
            RemoteSource::Git {
                repo,
                subdir,
                git_ref,
            }
        } else {
            let url = Url::parse(location).map_err(|e| invalid(&e.to_string()))?;
            if looks_like_git(url.path()) || git_ref.is_some() {
                let (repo, subdir) = split_repo_subdir(location, false);
                RemoteSource::Git {
                    repo,
                    subdir,
                    git_ref,
                }
            } else {
                RemoteSource::Http {
                    url: location.to_string(),
                }
            }
        };

        if let RemoteSource::Git { subdir: Some(dir), .. } = &source
            && dir.split('/').any(|segment| segment == "..")
        {
            return Err(invalid("subdirectory must not leave the repository"));
        }

        Ok(Self {
            raw,
            source,
            digest,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Key under which concurrent fetches of this reference are merged
    pub fn cache_key(&self) -> String {
        match &self.source {
            RemoteSource::Git {
                repo,
                subdir,
                git_ref,
            } => format!(
                "git:{}//{}?ref={}",
                repo,
                subdir.as_deref().unwrap_or(""),
                git_ref.as_deref().unwrap_or("HEAD")
            ),
            RemoteSource::Http { url } => format!("http:{}", url),
        }
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// `https://host/org/repo//dir`, `https://host/org/repo.git/dir`, `git@host:org/repo.git//dir`
fn split_repo_subdir(location: &str, ssh: bool) -> (String, Option<String>) {
    let scheme_end = location.find("://").map(|i| i + 3).unwrap_or(0);
    let (head, rest) = location.split_at(scheme_end);

    if let Some((repo, subdir)) = rest.split_once("//") {
        return (format!("{}{}", head, repo), non_empty(subdir));
    }
    if let Some(i) = rest.find(".git/") {
        let (repo, subdir) = rest.split_at(i + 4);
        return (format!("{}{}", head, repo), non_empty(&subdir[1..]));
    }
    if !ssh && !rest.ends_with(".git") {
        // host/org/repo/subdir without an explicit separator
        let parts: Vec<&str> = rest.splitn(4, '/').collect();
        if parts.len() == 4 {
            return (
                format!("{}{}/{}/{}", head, parts[0], parts[1], parts[2]),
                non_empty(parts[3]),
            );
        }
    }
    (location.to_string(), None)
}

/// `github.com/org/repo[/subdir]`, always cloned over HTTPS
fn split_hosted(location: &str, host: &str) -> Option<(String, Option<String>)> {
    let rest = location.strip_prefix(host)?;
    let rest = rest.replace("//", "/");
    let mut parts = rest.splitn(3, '/');
    let org = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let repo = repo.trim_end_matches(".git");
    let subdir = parts.next().and_then(non_empty);
    Some((
        format!("https://{}{}/{}.git", host, org, repo),
        subdir,
    ))
}

fn looks_like_git(path: &str) -> bool {
    path.contains("//") || path.ends_with(".git") || path.contains(".git/")
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim_matches('/');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Accept `sha256:<hex>` or bare hex, return `sha256:<lowercase hex>`
pub fn normalize_digest(digest: &str) -> Option<String> {
    let hex = digest
        .trim()
        .strip_prefix("sha256:")
        .unwrap_or(digest.trim())
        .to_lowercase();
    (hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit())).then(|| format!("sha256:{}", hex))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    fn git(reference: &str) -> (String, Option<String>, Option<String>) {
        match RemoteRef::parse(reference).unwrap().source {
            RemoteSource::Git {
                repo,
                subdir,
                git_ref,
            } => (repo, subdir, git_ref),
            other => panic!("expected git source, got {:?}", other),
        }
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://example.com/a.yaml"));
        assert!(is_remote("github.com/org/repo"));
        assert!(is_remote("git@github.com:org/repo.git"));
        assert!(!is_remote("../base"));
        assert!(!is_remote("deployment.yaml"));
    }

    #[test]
    fn test_https_double_slash() {
        let (repo, subdir, git_ref) = git("https://example.com/org/repo//deploy/base?ref=v1");
        assert_eq!(repo, "https://example.com/org/repo");
        assert_eq!(subdir.as_deref(), Some("deploy/base"));
        assert_eq!(git_ref.as_deref(), Some("v1"));
    }

    #[test]
    fn test_https_dot_git() {
        let (repo, subdir, git_ref) = git("https://example.com/org/repo.git/base");
        assert_eq!(repo, "https://example.com/org/repo.git");
        assert_eq!(subdir.as_deref(), Some("base"));
        assert_eq!(git_ref, None);
    }

    #[test]
    fn test_ssh_form() {
        let (repo, subdir, git_ref) = git("git@github.com:org/repo.git//overlays/prod?ref=main");
        assert_eq!(repo, "git@github.com:org/repo.git");
        assert_eq!(subdir.as_deref(), Some("overlays/prod"));
        assert_eq!(git_ref.as_deref(), Some("main"));
    }

    #[test]
    fn test_schemeless_github() {
        let (repo, subdir, git_ref) = git("github.com/org/repo/examples/app?ref=v2.0.0");
        assert_eq!(repo, "https://github.com/org/repo.git");
        assert_eq!(subdir.as_deref(), Some("examples/app"));
        assert_eq!(git_ref.as_deref(), Some("v2.0.0"));

        let (repo, subdir, _) = git("github.com/org/repo");
        assert_eq!(repo, "https://github.com/org/repo.git");
        assert_eq!(subdir, None);
    }

    #[test]
    fn test_plain_http_file_with_digest() {
        let remote = RemoteRef::parse(&format!(
            "https://example.com/manifests/app.yaml?digest={}",
            DIGEST
        ))
        .unwrap();
        assert_eq!(
            remote.source,
            RemoteSource::Http {
                url: "https://example.com/manifests/app.yaml".into()
            }
        );
        assert_eq!(remote.digest.as_deref(), Some(DIGEST));
        assert_eq!(remote.cache_key(), "http:https://example.com/manifests/app.yaml");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(RemoteRef::parse("https://example.com/a.yaml?digest=md5:abc").is_err());
        assert!(RemoteRef::parse("https://example.com/a.yaml?foo=bar").is_err());
        assert!(RemoteRef::parse("github.com/org").is_err());
        assert!(RemoteRef::parse("https://example.com/org/repo//../etc?ref=x").is_err());
        assert!(RemoteRef::parse("../local").is_err());
    }

    #[test]
    fn test_normalize_digest() {
        let upper = DIGEST.to_uppercase().replace("SHA256:", "");
        assert_eq!(normalize_digest(&upper).as_deref(), Some(DIGEST));
        assert_eq!(normalize_digest("sha256:abc"), None);
    }
}
