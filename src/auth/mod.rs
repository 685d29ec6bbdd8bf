//! AuthProvider — injected credential source for `GasApi` (spec §9 redesign
//! flag: "Global OAuth singleton. Replace with an injected `AuthProvider`
//! trait so tests can supply a fake token").

use anyhow::{Context, Result};
use async_trait::async_trait;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current bearer token for `script.googleapis.com`. Implementations own
    /// refresh; callers treat the returned string as usable immediately.
    async fn bearer_token(&self) -> Result<String>;
}

/// Wraps a token supplied once at startup. Used by tests and by
/// `doctor`-style one-shot invocations where a token is passed in directly.
pub struct StaticAuthProvider {
    token: String,
}

impl StaticAuthProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Reads the token from `GASMCP_OAUTH_TOKEN` on every call, so an external
/// refresher (e.g. `clasp login` re-run, or a sidecar process) can rotate it
/// without restarting the server.
pub struct EnvAuthProvider {
    var_name: String,
}

impl EnvAuthProvider {
    pub fn new() -> Self {
        Self {
            var_name: "GASMCP_OAUTH_TOKEN".to_string(),
        }
    }
}

impl Default for EnvAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for EnvAuthProvider {
    async fn bearer_token(&self) -> Result<String> {
        std::env::var(&self.var_name)
            .with_context(|| format!("{} is not set", self.var_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_returns_fixed_token() {
        let provider = StaticAuthProvider::new("tok-123");
        assert_eq!(provider.bearer_token().await.unwrap(), "tok-123");
    }

    #[tokio::test]
    async fn env_provider_reads_var() {
        std::env::set_var("GASMCP_OAUTH_TOKEN", "env-tok");
        let provider = EnvAuthProvider::new();
        assert_eq!(provider.bearer_token().await.unwrap(), "env-tok");
        std::env::remove_var("GASMCP_OAUTH_TOKEN");
    }

    #[tokio::test]
    async fn env_provider_errors_when_unset() {
        std::env::remove_var("GASMCP_OAUTH_TOKEN");
        let provider = EnvAuthProvider::new();
        assert!(provider.bearer_token().await.is_err());
    }
}
