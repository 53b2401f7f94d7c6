//! Credentials module - Per-request credential injection
//!
//! Resolves abstract provider keys to environment variables for a single
//! execution. Nothing here is cached: every request decrypts what it needs
//! and drops it when the execution finishes.

mod cipher;
mod store;

pub use cipher::{AesGcmCipher, CredentialCipher};
pub use store::{ConnectionRecord, CredentialStore, PgCredentialStore};

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Static allow-list: provider key to (payload field, env var) pairs
const PROVIDER_ENV_VARS: &[(&str, &[(&str, &str)])] = &[
    (
        "aws",
        &[
            ("access_key_id", "AWS_ACCESS_KEY_ID"),
            ("secret_access_key", "AWS_SECRET_ACCESS_KEY"),
            ("session_token", "AWS_SESSION_TOKEN"),
            ("region", "AWS_DEFAULT_REGION"),
        ],
    ),
    ("gcp", &[("access_token", "GOOGLE_OAUTH_ACCESS_TOKEN")]),
    (
        "azure",
        &[
            ("client_id", "AZURE_CLIENT_ID"),
            ("client_secret", "AZURE_CLIENT_SECRET"),
            ("tenant_id", "AZURE_TENANT_ID"),
        ],
    ),
    ("github", &[("access_token", "GITHUB_TOKEN")]),
    ("vercel", &[("access_token", "VERCEL_TOKEN")]),
    (
        "cloudflare",
        &[
            ("api_token", "CLOUDFLARE_API_TOKEN"),
            ("account_id", "CLOUDFLARE_ACCOUNT_ID"),
        ],
    ),
    ("stripe", &[("api_key", "STRIPE_API_KEY")]),
    ("openai", &[("api_key", "OPENAI_API_KEY")]),
    ("anthropic", &[("api_key", "ANTHROPIC_API_KEY")]),
    ("supabase", &[("url", "SUPABASE_URL"), ("service_role_key", "SUPABASE_SERVICE_ROLE_KEY")]),
];

/// Field to env-var pairs registered for a provider
pub fn provider_env_vars(provider: &str) -> Option<&'static [(&'static str, &'static str)]> {
    PROVIDER_ENV_VARS
        .iter()
        .find(|(name, _)| *name == provider)
        .map(|(_, fields)| *fields)
}

/// Provider keys known to the allow-list
pub fn known_providers() -> impl Iterator<Item = &'static str> {
    PROVIDER_ENV_VARS.iter().map(|(name, _)| *name)
}

/// Env-var name to secret value, scoped to one execution
#[derive(Default)]
pub struct CredentialEnvMap {
    vars: BTreeMap<String, SecretString>,
}

impl CredentialEnvMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: SecretString) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&SecretString> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Variable names only; safe to log
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretString)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl std::fmt::Debug for CredentialEnvMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.vars.keys()).finish()
    }
}

/// Best-effort resolution of provider keys into a [`CredentialEnvMap`]
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
    cipher: Arc<dyn CredentialCipher>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>, cipher: Arc<dyn CredentialCipher>) -> Self {
        CredentialResolver { store, cipher }
    }

    /// Resolve every requested provider for `tenant_id`.
    ///
    /// Unknown providers, missing connections and decrypt failures drop only
    /// that provider's entries; this never fails.
    pub async fn resolve(&self, provider_keys: &[String], tenant_id: &str) -> CredentialEnvMap {
        let mut env = CredentialEnvMap::new();

        let requested: BTreeSet<String> = provider_keys
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        for provider in &requested {
            let Some(fields) = provider_env_vars(provider) else {
                warn!(provider = %provider, "Ignoring unknown credential provider");
                continue;
            };

            match self.resolve_provider(provider, tenant_id, fields).await {
                Ok(resolved) if resolved.is_empty() => {
                    debug!(provider = %provider, tenant = %tenant_id, "No credentials resolved");
                }
                Ok(resolved) => {
                    for (name, value) in resolved {
                        env.insert(name, value);
                    }
                }
                Err(e) => {
                    warn!(
                        provider = %provider,
                        tenant = %tenant_id,
                        "Credential resolution failed, omitting provider: {}",
                        e
                    );
                }
            }
        }

        debug!(tenant = %tenant_id, vars = ?env, "Resolved credentials");
        env
    }

    async fn resolve_provider(
        &self,
        provider: &str,
        tenant_id: &str,
        fields: &[(&str, &str)],
    ) -> Result<Vec<(String, SecretString)>> {
        let Some(record) = self.store.latest_active(tenant_id, provider).await? else {
            return Ok(Vec::new());
        };

        let plaintext = self.cipher.decrypt(&record.encrypted_credentials)?;
        let payload: Value = serde_json::from_str(plaintext.expose_secret())
            .map_err(|_| Error::Credential(format!("connection {} payload is not JSON", record.id)))?;

        let mut resolved = Vec::new();
        for (field, env_var) in fields {
            match payload.get(field) {
                Some(Value::String(s)) if !s.is_empty() => {
                    resolved.push((env_var.to_string(), SecretString::from(s.clone())));
                }
                Some(Value::Number(n)) => {
                    resolved.push((env_var.to_string(), SecretString::from(n.to_string())));
                }
                _ => {}
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    /// Connection records keyed by (tenant, provider)
    #[derive(Default)]
    struct FakeStore {
        records: HashMap<(String, String), String>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl CredentialStore for FakeStore {
        async fn latest_active(
            &self,
            tenant_id: &str,
            provider: &str,
        ) -> Result<Option<ConnectionRecord>> {
            if self.failing.iter().any(|p| p == provider) {
                return Err(Error::Credential("store offline".into()));
            }
            Ok(self
                .records
                .get(&(tenant_id.to_string(), provider.to_string()))
                .map(|sealed| ConnectionRecord {
                    id: Uuid::new_v4(),
                    organization_id: tenant_id.to_string(),
                    provider: provider.to_string(),
                    encrypted_credentials: sealed.clone(),
                    updated_at: Utc::now(),
                }))
        }
    }

    fn resolver(store: FakeStore) -> CredentialResolver {
        let cipher = AesGcmCipher::from_base64_key(&cipher::test_key()).unwrap();
        CredentialResolver::new(Arc::new(store), Arc::new(cipher))
    }

    fn seal(payload: &str) -> String {
        AesGcmCipher::from_base64_key(&cipher::test_key())
            .unwrap()
            .encrypt(payload)
            .unwrap()
    }

    #[tokio::test]
    async fn test_resolves_only_allow_listed_fields() {
        let mut store = FakeStore::default();
        store.records.insert(
            ("acme".into(), "aws".into()),
            seal(r#"{"access_key_id":"AKIA","secret_access_key":"s3cr3t","extra":"ignored"}"#),
        );

        let env = resolver(store).resolve(&["AWS".to_string()], "acme").await;

        assert_eq!(env.len(), 2);
        assert_eq!(
            env.get("AWS_ACCESS_KEY_ID").unwrap().expose_secret(),
            "AKIA"
        );
        assert_eq!(
            env.get("AWS_SECRET_ACCESS_KEY").unwrap().expose_secret(),
            "s3cr3t"
        );
        assert!(!env.names().any(|n| n.contains("EXTRA")));
    }

    #[tokio::test]
    async fn test_failures_are_non_fatal() {
        let mut store = FakeStore::default();
        store
            .records
            .insert(("acme".into(), "stripe".into()), seal(r#"{"api_key":"sk_live"}"#));
        store
            .records
            .insert(("acme".into(), "github".into()), "garbage".to_string());
        store.failing.push("openai".to_string());

        let keys: Vec<String> = ["stripe", "github", "openai", "vercel", "nonsense"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let env = resolver(store).resolve(&keys, "acme").await;

        assert_eq!(env.names().collect::<Vec<_>>(), vec!["STRIPE_API_KEY"]);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let mut store = FakeStore::default();
        store
            .records
            .insert(("acme".into(), "github".into()), seal(r#"{"access_token":"ghp"}"#));

        let env = resolver(store)
            .resolve(&["github".to_string()], "globex")
            .await;
        assert!(env.is_empty());
    }

    #[test]
    fn test_debug_never_prints_values() {
        let mut env = CredentialEnvMap::new();
        env.insert("GITHUB_TOKEN", SecretString::from("ghp_supersecret"));
        let printed = format!("{:?}", env);
        assert!(printed.contains("GITHUB_TOKEN"));
        assert!(!printed.contains("ghp_supersecret"));
    }

    #[test]
    fn test_allow_list_lookup() {
        assert!(provider_env_vars("stripe").is_some());
        assert!(provider_env_vars("myspace").is_none());
        assert!(known_providers().any(|p| p == "aws"));
    }
}
