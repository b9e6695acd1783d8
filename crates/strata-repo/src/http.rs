//! HTTP file fetcher

use std::time::Duration;

use url::Url;

use crate::error::{RepoError, Result};

/// Environment variable holding a bearer token for HTTP remotes
pub const TOKEN_ENV: &str = "STRATA_HTTP_TOKEN";

/// HTTP client for single-file remotes
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpFetcher {
    /// Create a client; the overall deadline is left to the caller
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            // Redirects are followed by hand so credentials stay on one origin
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("strata/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            token: std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()),
        })
    }

    /// Use an explicit bearer token instead of the environment
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Fetch `url`, following up to 10 redirects
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let original = Url::parse(url)?;
        let mut current = original.clone();
        let mut redirects = 0;

        loop {
            let mut request = self.client.get(current.as_str());
            if let Some(token) = &self.token {
                if same_origin(&original, &current) {
                    request = request.bearer_auth(token);
                } else {
                    tracing::warn!(
                        from = %original,
                        to = %current,
                        "cross-origin redirect, credentials not forwarded"
                    );
                }
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() {
                redirects += 1;
                if redirects > 10 {
                    return Err(RepoError::NetworkError {
                        message: "Too many redirects (max 10)".to_string(),
                    });
                }
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| RepoError::NetworkError {
                        message: "Redirect without Location header".to_string(),
                    })?;
                current = current.join(location)?;
                continue;
            }

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(RepoError::AuthRequired {
                    url: current.to_string(),
                });
            }
            if status == reqwest::StatusCode::FORBIDDEN {
                return Err(RepoError::AuthFailed {
                    message: format!("Access denied to {}", current),
                });
            }
            if !status.is_success() {
                return Err(RepoError::HttpError {
                    status: status.as_u16(),
                    message: format!("Request to {} failed", current),
                });
            }

            let bytes = response.bytes().await.map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;
            return Ok(bytes.to_vec());
        }
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host() == b.host()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Compute the `sha256:<hex>` digest of data
pub fn compute_digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Compare digests ignoring case and the `sha256:` / `sha256-` prefix
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |d: &str| {
        d.trim()
            .to_lowercase()
            .replace("sha256:", "")
            .replace("sha256-", "")
    };
    normalize(expected) == normalize(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_compute_digest() {
        let digest = compute_digest(b"hello world");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), 7 + 64);
    }

    #[test]
    fn test_digest_matches() {
        assert!(digest_matches("sha256:abc123", "sha256:ABC123"));
        assert!(digest_matches("sha256:abc123", "abc123"));
        assert!(digest_matches("sha256:abc123", "sha256-abc123"));
        assert!(!digest_matches("sha256:abc123", "sha256:xyz789"));
    }

    #[tokio::test]
    async fn test_get_follows_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old.yaml"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new.yaml"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("kind: ConfigMap\n"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new()
            .unwrap()
            .with_token(None);
        let body = fetcher
            .get_bytes(&format!("{}/old.yaml", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, b"kind: ConfigMap\n");
    }

    #[tokio::test]
    async fn test_get_sends_token_and_maps_auth_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private.yaml"))
            .and(header("Authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/private.yaml"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let url = format!("{}/private.yaml", server.uri());
        let anonymous = HttpFetcher::new()
            .unwrap()
            .with_token(None);
        let err = anonymous.get_bytes(&url).await.unwrap_err();
        assert!(err.is_auth());

        let authed = anonymous.with_token(Some("s3cret".into()));
        assert_eq!(authed.get_bytes(&url).await.unwrap(), b"ok");
    }
}
