//! Credential providers and the ordered provider chain.
//!
//! A [`CredentialProvider`] is one source of client credentials. A
//! [`CredentialChain`] asks its providers in order, keeps the first success
//! and returns it until [`CredentialChain::invalidate`] is called.

use crate::error::ProviderFailure;
use crate::transport::{HttpRequest, Transport};
use crate::{Error, Result};
use async_trait::async_trait;
use http::header::ACCEPT;
use http::{HeaderValue, Method};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// Default variable holding the client id.
pub const ENV_CLIENT_ID: &str = "CLOUD_CLIENT_ID";
/// Default variable holding the client secret.
pub const ENV_CLIENT_SECRET: &str = "CLOUD_CLIENT_SECRET";
/// Variable overriding the profile file location.
pub const ENV_CREDENTIALS_FILE: &str = "CLOUD_CREDENTIALS_FILE";
/// Variable selecting the profile.
pub const ENV_PROFILE: &str = "CLOUD_PROFILE";

const DEFAULT_PROFILE: &str = "default";

/// Client credentials used to obtain access tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The client id.
    pub client_id: String,
    /// The client secret.
    pub client_secret: String,
    /// Name of the provider that supplied these credentials.
    pub provider: String,
}

impl Credentials {
    /// Creates credentials attributed to `provider`.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            provider: provider.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("provider", &self.provider)
            .finish()
    }
}

/// Shape shared by profile entries and remote responses.
#[derive(Deserialize)]
struct RawCredentials {
    client_id: String,
    client_secret: String,
}

impl RawCredentials {
    fn into_credentials(self, provider: &str) -> Result<Credentials> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(unavailable(provider, "client_id or client_secret is empty"));
        }
        Ok(Credentials::new(self.client_id, self.client_secret, provider))
    }
}

fn unavailable(provider: &str, reason: impl Into<String>) -> Error {
    Error::CredentialsUnavailable {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}

/// A single source of credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A short name used in logs and errors.
    fn name(&self) -> &str;

    /// Fetches credentials from this source.
    async fn retrieve(&self) -> Result<Credentials>;
}

/// Reads credentials from environment variables.
#[derive(Debug, Clone)]
pub struct EnvProvider {
    id_var: String,
    secret_var: String,
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new(ENV_CLIENT_ID, ENV_CLIENT_SECRET)
    }
}

impl EnvProvider {
    /// Reads the given variables instead of the defaults.
    pub fn new(id_var: impl Into<String>, secret_var: impl Into<String>) -> Self {
        Self {
            id_var: id_var.into(),
            secret_var: secret_var.into(),
        }
    }

    fn read(&self, var: &str) -> Result<String> {
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(unavailable(self.name(), format!("{} not set", var))),
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let client_id = self.read(&self.id_var)?;
        let client_secret = self.read(&self.secret_var)?;
        Ok(Credentials::new(client_id, client_secret, self.name()))
    }
}

/// Reads a named profile from a JSON credentials file.
///
/// The file maps profile names to `{"client_id", "client_secret"}` objects.
#[derive(Debug, Clone)]
pub struct ProfileFileProvider {
    path: Option<PathBuf>,
    profile: String,
}

impl Default for ProfileFileProvider {
    /// Uses `CLOUD_CREDENTIALS_FILE` or `<home>/.cloud/credentials.json`,
    /// and profile `CLOUD_PROFILE` or `default`.
    fn default() -> Self {
        let path = std::env::var_os(ENV_CREDENTIALS_FILE)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".cloud").join("credentials.json")));
        let profile = std::env::var(ENV_PROFILE)
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        Self { path, profile }
    }
}

impl ProfileFileProvider {
    /// Reads `profile` from the file at `path`.
    pub fn new(path: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            profile: profile.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for ProfileFileProvider {
    fn name(&self) -> &str {
        "profile"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| unavailable(self.name(), "no home directory"))?;
        let contents = tokio::fs::read(path)
            .await
            .map_err(|e| unavailable(self.name(), format!("{}: {}", path.display(), e)))?;
        let mut profiles: HashMap<String, RawCredentials> = serde_json::from_slice(&contents)
            .map_err(|e| unavailable(self.name(), format!("{}: {}", path.display(), e)))?;
        profiles
            .remove(&self.profile)
            .ok_or_else(|| {
                unavailable(
                    self.name(),
                    format!("profile `{}` not found", self.profile),
                )
            })?
            .into_credentials(self.name())
    }
}

/// Supplies fixed credentials.
#[derive(Clone)]
pub struct StaticProvider {
    client_id: String,
    client_secret: String,
}

impl fmt::Debug for StaticProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticProvider")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl StaticProvider {
    /// Creates a provider that always returns these credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        RawCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
        .into_credentials(self.name())
    }
}

/// Fetches credentials as JSON from a remote endpoint with a GET request.
pub struct RemoteProvider {
    url: Url,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for RemoteProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProvider")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl RemoteProvider {
    /// Creates a provider reading from `url` through `transport`.
    pub fn new(url: Url, transport: Arc<dyn Transport>) -> Self {
        Self { url, transport }
    }
}

#[async_trait]
impl CredentialProvider for RemoteProvider {
    fn name(&self) -> &str {
        "remote"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let mut request = HttpRequest::new(Method::GET, self.url.clone());
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| unavailable(self.name(), e.to_string()))?;
        if !response.status.is_success() {
            return Err(unavailable(
                self.name(),
                format!("{} returned {}", self.url, response.status),
            ));
        }
        serde_json::from_slice::<RawCredentials>(&response.body)
            .map_err(|e| unavailable(self.name(), format!("invalid response: {}", e)))?
            .into_credentials(self.name())
    }
}

/// Ordered fallback over several providers.
///
/// The first provider to succeed wins and its credentials are kept until
/// [`invalidate`](CredentialChain::invalidate). A provider becoming
/// available later does not replace the cached selection.
///
/// # Examples
///
/// ```
/// use cloudcall::credentials::{CredentialChain, EnvProvider, StaticProvider};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), cloudcall::Error> {
/// let chain = CredentialChain::new(vec![
///     Arc::new(EnvProvider::new("DOCTEST_UNSET_ID", "DOCTEST_UNSET_SECRET")),
///     Arc::new(StaticProvider::new("id", "secret")),
/// ]);
/// let creds = chain.resolve().await?;
/// assert_eq!(creds.provider, "static");
/// # Ok(())
/// # }
/// ```
pub struct CredentialChain {
    providers: Vec<Arc<dyn CredentialProvider>>,
    cached: RwLock<Option<Credentials>>,
}

impl fmt::Debug for CredentialChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("CredentialChain")
            .field("providers", &names)
            .finish_non_exhaustive()
    }
}

impl CredentialChain {
    /// Creates a chain querying `providers` in order.
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Self {
        Self {
            providers,
            cached: RwLock::new(None),
        }
    }

    /// Environment variables, then the default profile file.
    pub fn default_chain() -> Self {
        Self::new(vec![
            Arc::new(EnvProvider::default()),
            Arc::new(ProfileFileProvider::default()),
        ])
    }

    /// Returns cached credentials, or resolves them from the providers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredentials`] naming every provider and its
    /// failure when none succeeds.
    pub async fn resolve(&self) -> Result<Credentials> {
        if let Some(creds) = self.cached.read().await.as_ref() {
            return Ok(creds.clone());
        }

        let mut attempts = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            match provider.retrieve().await {
                Ok(mut creds) => {
                    creds.provider = provider.name().to_string();
                    tracing::debug!(provider = provider.name(), "Resolved credentials");
                    let mut cached = self.cached.write().await;
                    // A concurrent resolve may have latched first; keep its result.
                    return Ok(cached.get_or_insert(creds).clone());
                }
                Err(e) => {
                    tracing::debug!(
                        provider = provider.name(),
                        error = %e,
                        "Credential provider failed"
                    );
                    let reason = match e {
                        Error::CredentialsUnavailable { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    attempts.push(ProviderFailure {
                        provider: provider.name().to_string(),
                        reason,
                    });
                }
            }
        }

        tracing::warn!(providers = attempts.len(), "No credential provider succeeded");
        Err(Error::NoCredentials { attempts })
    }

    /// Drops the cached credentials so the next resolve queries providers again.
    pub async fn invalidate(&self) {
        if self.cached.write().await.take().is_some() {
            tracing::info!("Invalidated cached credentials");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing(&'static str);

    #[async_trait]
    impl CredentialProvider for Failing {
        fn name(&self) -> &str {
            self.0
        }

        async fn retrieve(&self) -> Result<Credentials> {
            Err(unavailable(self.0, "nothing here"))
        }
    }

    struct Counting {
        name: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for Counting {
        fn name(&self) -> &str {
            self.name
        }

        async fn retrieve(&self) -> Result<Credentials> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Credentials::new(format!("id-{}", n), "secret", self.name))
        }
    }

    #[tokio::test]
    async fn test_chain_returns_first_success() {
        let chain = CredentialChain::new(vec![
            Arc::new(Failing("first")),
            Arc::new(Failing("second")),
            Arc::new(StaticProvider::new("id", "secret")),
            Arc::new(Failing("never-reached")),
        ]);

        let creds = chain.resolve().await.unwrap();
        assert_eq!(creds.client_id, "id");
        assert_eq!(creds.provider, "static");
    }

    #[tokio::test]
    async fn test_chain_exhaustion_names_every_provider() {
        let chain = CredentialChain::new(vec![Arc::new(Failing("a")), Arc::new(Failing("b"))]);

        match chain.resolve().await {
            Err(Error::NoCredentials { attempts }) => {
                let names: Vec<_> = attempts.iter().map(|a| a.provider.as_str()).collect();
                assert_eq!(names, vec!["a", "b"]);
                assert!(attempts.iter().all(|a| a.reason == "nothing here"));
            }
            other => panic!("Expected NoCredentials, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_chain_fails() {
        let chain = CredentialChain::new(Vec::new());
        assert!(matches!(
            chain.resolve().await,
            Err(Error::NoCredentials { attempts }) if attempts.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_chain_is_sticky_until_invalidated() {
        let provider = Arc::new(Counting {
            name: "counting",
            calls: AtomicUsize::new(0),
        });
        let chain = CredentialChain::new(vec![provider.clone() as Arc<dyn CredentialProvider>]);

        assert_eq!(chain.resolve().await.unwrap().client_id, "id-0");
        assert_eq!(chain.resolve().await.unwrap().client_id, "id-0");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        chain.invalidate().await;
        assert_eq!(chain.resolve().await.unwrap().client_id, "id-1");
    }

    #[tokio::test]
    async fn test_env_provider() {
        std::env::set_var("CLOUDCALL_TEST_ID", "env-id");
        std::env::set_var("CLOUDCALL_TEST_SECRET", "env-secret");
        let provider = EnvProvider::new("CLOUDCALL_TEST_ID", "CLOUDCALL_TEST_SECRET");

        let creds = provider.retrieve().await.unwrap();
        assert_eq!(creds.client_id, "env-id");
        assert_eq!(creds.provider, "env");

        let missing = EnvProvider::new("CLOUDCALL_TEST_ID", "CLOUDCALL_TEST_MISSING");
        let err = missing.retrieve().await.unwrap_err();
        assert!(err.to_string().contains("CLOUDCALL_TEST_MISSING not set"));
    }

    #[tokio::test]
    async fn test_profile_file_provider() {
        let path = std::env::temp_dir().join(format!(
            "cloudcall-profile-{}.json",
            std::process::id()
        ));
        tokio::fs::write(
            &path,
            r#"{"default":{"client_id":"d","client_secret":"ds"},"staging":{"client_id":"s","client_secret":"ss"}}"#,
        )
        .await
        .unwrap();

        let creds = ProfileFileProvider::new(&path, "staging")
            .retrieve()
            .await
            .unwrap();
        assert_eq!(creds.client_id, "s");
        assert_eq!(creds.provider, "profile");

        let err = ProfileFileProvider::new(&path, "prod")
            .retrieve()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("profile `prod` not found"));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("id", "hunter2", "static");
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("[REDACTED]"));
    }
}
