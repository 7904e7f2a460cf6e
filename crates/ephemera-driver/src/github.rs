//! C2 — Source-Host Driver. Authenticates as a GitHub App, minting a
//! short-lived installation access token per installation (JWT signed with
//! the app's RSA private key, exchanged for a token), then uses that token
//! for the REST calls the lifecycle controller needs.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::DriverError;

const JWT_TTL_SECS: i64 = 600; // 10 minutes, GitHub's max
const TOKEN_REFRESH_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

impl CommitState {
    fn as_str(self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
            CommitState::Error => "error",
        }
    }
}

#[async_trait]
pub trait SourceHostDriver: Send + Sync + 'static {
    async fn post_comment(&self, installation_id: i64, repo_full_name: &str, pr_number: i64, body: &str) -> Result<(), DriverError>;

    #[allow(clippy::too_many_arguments)]
    async fn set_commit_status(
        &self,
        installation_id: i64,
        repo_full_name: &str,
        sha: &str,
        state: CommitState,
        description: &str,
        context: &str,
        target_url: Option<&str>,
    ) -> Result<(), DriverError>;

    async fn fetch_file(&self, installation_id: i64, repo_full_name: &str, path: &str, git_ref: &str) -> Result<Option<Vec<u8>>, DriverError>;
}

/// `https://pr-{n}-{repo_name, lowercased, _->-}.{base_domain}`.
pub fn build_environment_url(pr_number: i64, repo_name: &str, base_domain: &str) -> String {
    let slug: String = repo_name.to_lowercase().chars().map(|c| if c == '_' { '-' } else { c }).collect();
    format!("https://pr-{pr_number}-{slug}.{base_domain}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

/// Real GitHub App driver. One HTTP client shared across installations; an
/// in-process cache of installation tokens keyed by installation id, since
/// minting a new JWT + exchanging it on every call would be wasteful and the
/// tokens are valid for an hour.
pub struct GitHubDriver {
    client: reqwest::Client,
    app_id: String,
    encoding_key: EncodingKey,
    tokens: RwLock<std::collections::HashMap<i64, CachedToken>>,
    base_url: String,
}

impl GitHubDriver {
    pub fn new(app_id: impl Into<String>, private_key_pem: &[u8]) -> Result<Arc<Self>, DriverError> {
        Self::with_base_url(app_id, private_key_pem, "https://api.github.com")
    }

    /// Same as [`GitHubDriver::new`] but pointed at an arbitrary base URL,
    /// for tests to redirect at a `wiremock` server.
    pub(crate) fn with_base_url(app_id: impl Into<String>, private_key_pem: &[u8], base_url: impl Into<String>) -> Result<Arc<Self>, DriverError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| DriverError::SourceHostApi(format!("invalid app private key: {e}")))?;
        Ok(Arc::new(GitHubDriver {
            client: reqwest::Client::builder()
                .user_agent("ephemera")
                .build()
                .expect("reqwest client builder never fails with static config"),
            app_id: app_id.into(),
            encoding_key,
            tokens: RwLock::new(std::collections::HashMap::new()),
            base_url: base_url.into(),
        }))
    }

    fn app_jwt(&self) -> Result<String, DriverError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
        let claims = Claims { iat: now - 10, exp: now + JWT_TTL_SECS, iss: self.app_id.clone() };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| DriverError::SourceHostApi(format!("signing app JWT: {e}")))
    }

    async fn installation_token(&self, installation_id: i64) -> Result<String, DriverError> {
        {
            let cache = self.tokens.read().await;
            if let Some(cached) = cache.get(&installation_id) {
                if cached.expires_at > SystemTime::now() + Duration::from_secs(TOKEN_REFRESH_SKEW_SECS as u64) {
                    return Ok(cached.token.clone());
                }
            }
        }

        let jwt = self.app_jwt()?;
        let url = format!("{}/app/installations/{installation_id}/access_tokens", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| DriverError::SourceHostApi(format!("minting installation token: {e}")))?;

        if !resp.status().is_success() {
            return Err(DriverError::SourceHostApi(format!("installation token exchange failed: {}", resp.status())));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
        }
        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| DriverError::SourceHostApi(format!("decoding installation token response: {e}")))?;

        let cached = CachedToken { token: parsed.token.clone(), expires_at: SystemTime::now() + Duration::from_secs(3600) };
        self.tokens.write().await.insert(installation_id, cached);
        Ok(parsed.token)
    }
}

#[async_trait]
impl SourceHostDriver for GitHubDriver {
    async fn post_comment(&self, installation_id: i64, repo_full_name: &str, pr_number: i64, body: &str) -> Result<(), DriverError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!("{}/repos/{repo_full_name}/issues/{pr_number}/comments", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| DriverError::SourceHostApi(format!("post_comment: {e}")))?;
        if !resp.status().is_success() {
            return Err(DriverError::SourceHostApi(format!("post_comment failed: {}", resp.status())));
        }
        Ok(())
    }

    async fn set_commit_status(
        &self,
        installation_id: i64,
        repo_full_name: &str,
        sha: &str,
        state: CommitState,
        description: &str,
        context: &str,
        target_url: Option<&str>,
    ) -> Result<(), DriverError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!("{}/repos/{repo_full_name}/statuses/{sha}", self.base_url);
        let mut body = serde_json::json!({
            "state": state.as_str(),
            "description": description,
            "context": context,
        });
        if let Some(target_url) = target_url {
            body["target_url"] = serde_json::Value::String(target_url.to_string());
        }
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| DriverError::SourceHostApi(format!("set_commit_status: {e}")))?;
        if !resp.status().is_success() {
            return Err(DriverError::SourceHostApi(format!("set_commit_status failed: {}", resp.status())));
        }
        Ok(())
    }

    async fn fetch_file(&self, installation_id: i64, repo_full_name: &str, path: &str, git_ref: &str) -> Result<Option<Vec<u8>>, DriverError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!("{}/repos/{repo_full_name}/contents/{path}?ref={git_ref}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .await
            .map_err(|e| DriverError::SourceHostApi(format!("fetch_file({path}): {e}")))?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(DriverError::SourceHostApi(format!("fetch_file({path}) failed: {}", resp.status())));
        }
        let bytes = resp.bytes().await.map_err(|e| DriverError::SourceHostApi(format!("fetch_file({path}) body: {e}")))?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Returned when no GitHub App credentials are configured; every call is
/// fatal for the caller, as with the cluster driver's disabled mode.
pub struct DisabledSourceHostDriver;

#[async_trait]
impl SourceHostDriver for DisabledSourceHostDriver {
    async fn post_comment(&self, installation_id: i64, _repo: &str, _pr: i64, _body: &str) -> Result<(), DriverError> {
        Err(DriverError::SourceHostNotConfigured(installation_id))
    }

    async fn set_commit_status(
        &self,
        installation_id: i64,
        _repo: &str,
        _sha: &str,
        _state: CommitState,
        _description: &str,
        _context: &str,
        _target_url: Option<&str>,
    ) -> Result<(), DriverError> {
        Err(DriverError::SourceHostNotConfigured(installation_id))
    }

    async fn fetch_file(&self, installation_id: i64, _repo: &str, _path: &str, _git_ref: &str) -> Result<Option<Vec<u8>>, DriverError> {
        Err(DriverError::SourceHostNotConfigured(installation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_url_matches_naming_rule() {
        let url = build_environment_url(7, "My_Widget", "preview.example.com");
        assert_eq!(url, "https://pr-7-my-widget.preview.example.com");
    }

    #[tokio::test]
    async fn disabled_driver_is_fatal() {
        let driver = DisabledSourceHostDriver;
        assert!(matches!(
            driver.post_comment(1, "a/b", 1, "hi").await,
            Err(DriverError::SourceHostNotConfigured(1))
        ));
    }

    #[test]
    fn commit_state_strings() {
        assert_eq!(CommitState::Pending.as_str(), "pending");
        assert_eq!(CommitState::Success.as_str(), "success");
        assert_eq!(CommitState::Failure.as_str(), "failure");
        assert_eq!(CommitState::Error.as_str(), "error");
    }
}
