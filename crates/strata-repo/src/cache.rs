//! Content-addressed cache for remote references
//!
//! Features:
//! - Single-flight: concurrent requests for one reference share a fetch
//! - Content-addressed store: `<cache>/objects/<sha256>/` holds fetched trees
//! - Digest pins (`?digest=sha256:...`) are verified, and a pinned reference
//!   already in the store is served without touching the network
//! - Every network fetch is bounded by a timeout

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::error::{RepoError, Result};
use crate::git;
use crate::http::{HttpFetcher, compute_digest, digest_matches};
use crate::reference::{RemoteRef, RemoteSource};

/// Name of a fetched single file inside its object directory
const FILE_OBJECT: &str = "resource.yaml";

/// Name of a fetched tree inside its object directory
const TREE_OBJECT: &str = "unit";

/// What a fetched reference resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteContent {
    /// A directory expected to hold a unit file
    Directory(PathBuf),

    /// A single manifest file
    File(PathBuf),
}

/// A remote reference materialized on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRemote {
    pub reference: String,
    pub content: RemoteContent,
    /// `sha256:<hex>` over the fetched content
    pub digest: String,
}

/// Shared fetch cache, one per build
pub struct RemoteCache {
    root: PathBuf,
    timeout: Duration,
    http: HttpFetcher,
    inflight: Mutex<HashMap<String, Arc<OnceCell<FetchedRemote>>>>,
}

impl RemoteCache {
    /// Open a cache rooted at `root`
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            timeout,
            http: HttpFetcher::new()?,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Default location: the user cache directory, or the temp dir
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("strata")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch a reference, sharing in-flight and completed fetches
    pub async fn fetch(&self, remote: &RemoteRef) -> Result<FetchedRemote> {
        let key = remote.cache_key();
        let cell = {
            let mut inflight = self.inflight.lock().map_err(|_| RepoError::CacheError {
                message: "fetch table lock poisoned".to_string(),
            })?;
            inflight.entry(key).or_default().clone()
        };

        let fetched = cell
            .get_or_try_init(|| self.fetch_uncached(remote))
            .await?
            .clone();

        if let Some(expected) = &remote.digest
            && !digest_matches(expected, &fetched.digest)
        {
            return Err(RepoError::IntegrityCheckFailed {
                reference: remote.to_string(),
                expected: expected.clone(),
                actual: fetched.digest,
            });
        }

        Ok(FetchedRemote {
            reference: remote.to_string(),
            ..fetched
        })
    }

    async fn fetch_uncached(&self, remote: &RemoteRef) -> Result<FetchedRemote> {
        if let Some(expected) = &remote.digest
            && let Some(content) = self.lookup(expected)
        {
            tracing::debug!(reference = %remote, digest = %expected, "remote served from cache");
            return Ok(FetchedRemote {
                reference: remote.to_string(),
                content,
                digest: expected.clone(),
            });
        }

        tracing::info!(reference = %remote, "fetching remote");
        match tokio::time::timeout(self.timeout, self.download(remote)).await {
            Ok(result) => result,
            Err(_) => Err(RepoError::Timeout {
                reference: remote.to_string(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    fn object_dir(&self, digest: &str) -> PathBuf {
        let hex = digest.trim_start_matches("sha256:");
        self.root.join("objects").join(hex)
    }

    fn lookup(&self, digest: &str) -> Option<RemoteContent> {
        let dir = self.object_dir(digest);
        let file = dir.join(FILE_OBJECT);
        let tree = dir.join(TREE_OBJECT);
        if file.is_file() {
            Some(RemoteContent::File(file))
        } else if tree.is_dir() {
            Some(RemoteContent::Directory(tree))
        } else {
            None
        }
    }

    async fn download(&self, remote: &RemoteRef) -> Result<FetchedRemote> {
        match &remote.source {
            RemoteSource::Http { url } => {
                let data = self.http.get_bytes(url).await?;
                self.store_file(remote, &data).await
            }
            RemoteSource::Git {
                repo,
                subdir,
                git_ref,
            } => {
                let scratch = self.root.join("tmp");
                tokio::fs::create_dir_all(&scratch).await?;
                let checkout = tempfile::Builder::new()
                    .prefix("checkout-")
                    .tempdir_in(&scratch)?;

                git::checkout(repo, git_ref.as_deref(), checkout.path()).await?;

                let selected = match subdir {
                    Some(dir) => checkout.path().join(dir),
                    None => checkout.path().to_path_buf(),
                };
                if selected.is_file() {
                    let data = tokio::fs::read(&selected).await?;
                    return self.store_file(remote, &data).await;
                }
                if !selected.is_dir() {
                    return Err(RepoError::SubdirNotFound {
                        reference: remote.to_string(),
                        path: subdir.clone().unwrap_or_default(),
                    });
                }

                let tree = selected.clone();
                let digest = tokio::task::spawn_blocking(move || tree_digest(&tree))
                    .await
                    .map_err(|e| RepoError::CacheError {
                        message: format!("digest task failed: {}", e),
                    })??;
                let content = self.store_tree(&digest, &selected).await?;
                Ok(FetchedRemote {
                    reference: remote.to_string(),
                    content,
                    digest,
                })
            }
        }
    }

    async fn store_file(&self, remote: &RemoteRef, data: &[u8]) -> Result<FetchedRemote> {
        let digest = compute_digest(data);
        let dir = self.object_dir(&digest);
        let path = dir.join(FILE_OBJECT);

        if !path.is_file() {
            tokio::fs::create_dir_all(&dir).await?;
            let staged = dir.join(format!("{}.partial", FILE_OBJECT));
            tokio::fs::write(&staged, data).await?;
            tokio::fs::rename(&staged, &path).await?;
        }

        Ok(FetchedRemote {
            reference: remote.to_string(),
            content: RemoteContent::File(path),
            digest,
        })
    }

    async fn store_tree(&self, digest: &str, tree: &Path) -> Result<RemoteContent> {
        let dir = self.object_dir(digest);
        let target = dir.join(TREE_OBJECT);
        if target.is_dir() {
            return Ok(RemoteContent::Directory(target));
        }

        tokio::fs::create_dir_all(&dir).await?;
        if let Err(e) = tokio::fs::rename(tree, &target).await {
            // Another process stored the same content first
            if !target.is_dir() {
                return Err(e.into());
            }
        }
        Ok(RemoteContent::Directory(target))
    }
}

/// Digest of a directory tree: relative paths and file contents in sorted order
///
/// Symlinks are skipped so a checkout cannot pull in files from outside itself.
pub fn tree_digest(root: &Path) -> Result<String> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for relative in files {
        let data = std::fs::read(root.join(&relative))?;
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update((data.len() as u64).to_be_bytes());
        hasher.update(&data);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| RepoError::CacheError {
                    message: e.to_string(),
                })?
                .to_string_lossy()
                .replace('\\', "/");
            out.push(relative);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONFIGMAP: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: remote\n";

    async fn serve(body: &str, delay: Duration, expected_calls: Option<u64>) -> MockServer {
        let server = MockServer::start().await;
        let mock = Mock::given(method("GET")).and(path("/cm.yaml")).respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .set_delay(delay),
        );
        match expected_calls {
            Some(calls) => mock.expect(calls).mount(&server).await,
            None => mock.mount(&server).await,
        }
        server
    }

    fn remote(server: &MockServer, digest: Option<&str>) -> RemoteRef {
        let mut reference = format!("{}/cm.yaml", server.uri());
        if let Some(digest) = digest {
            reference.push_str("?digest=");
            reference.push_str(digest);
        }
        RemoteRef::parse(&reference).unwrap()
    }

    #[test]
    fn test_tree_digest_is_stable() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();

        std::fs::create_dir(a.path().join("sub")).unwrap();
        std::fs::write(a.path().join("sub/x.yaml"), "x").unwrap();
        std::fs::write(a.path().join("kustomization.yaml"), "k").unwrap();

        std::fs::write(b.path().join("kustomization.yaml"), "k").unwrap();
        std::fs::create_dir(b.path().join("sub")).unwrap();
        std::fs::write(b.path().join("sub/x.yaml"), "x").unwrap();

        assert_eq!(tree_digest(a.path()).unwrap(), tree_digest(b.path()).unwrap());

        std::fs::write(b.path().join("sub/x.yaml"), "y").unwrap();
        assert_ne!(tree_digest(a.path()).unwrap(), tree_digest(b.path()).unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_request() {
        let server = serve(CONFIGMAP, Duration::from_millis(100), Some(1)).await;
        let dir = TempDir::new().unwrap();
        let cache = RemoteCache::new(dir.path(), Duration::from_secs(10)).unwrap();
        let reference = remote(&server, None);

        let (a, b) = tokio::join!(cache.fetch(&reference), cache.fetch(&reference));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a, b);
        assert_eq!(a.digest, compute_digest(CONFIGMAP.as_bytes()));

        let RemoteContent::File(path) = &a.content else {
            panic!("expected a file");
        };
        assert_eq!(std::fs::read_to_string(path).unwrap(), CONFIGMAP);
        assert!(path.starts_with(dir.path().join("objects")));
    }

    #[tokio::test]
    async fn test_pinned_digest_served_from_store() {
        let server = serve(CONFIGMAP, Duration::ZERO, Some(1)).await;
        let dir = TempDir::new().unwrap();
        let digest = compute_digest(CONFIGMAP.as_bytes());

        let first = RemoteCache::new(dir.path(), Duration::from_secs(10)).unwrap();
        first.fetch(&remote(&server, Some(&digest))).await.unwrap();

        // A fresh cache over the same directory must not hit the server again
        let second = RemoteCache::new(dir.path(), Duration::from_secs(10)).unwrap();
        let fetched = second.fetch(&remote(&server, Some(&digest))).await.unwrap();
        assert_eq!(fetched.digest, digest);
    }

    #[tokio::test]
    async fn test_digest_mismatch() {
        let server = serve(CONFIGMAP, Duration::ZERO, Some(1)).await;
        let dir = TempDir::new().unwrap();
        let cache = RemoteCache::new(dir.path(), Duration::from_secs(10)).unwrap();
        let wrong = compute_digest(b"something else");

        let err = cache.fetch(&remote(&server, Some(&wrong))).await.unwrap_err();
        assert!(matches!(err, RepoError::IntegrityCheckFailed { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = serve(CONFIGMAP, Duration::from_secs(5), None).await;
        let dir = TempDir::new().unwrap();
        let cache = RemoteCache::new(dir.path(), Duration::from_millis(200)).unwrap();

        let err = cache.fetch(&remote(&server, None)).await.unwrap_err();
        assert!(matches!(err, RepoError::Timeout { .. }));
    }
}
