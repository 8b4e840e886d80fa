//! Secret providers.
//!
//! [`KeyVaultSecretProvider`] reads secrets from Azure Key Vault using a
//! managed-identity token from the instance metadata endpoint.
//! [`EnvSecretProvider`] maps secret names onto environment variables.

use async_trait::async_trait;
use ember_abstraction::{SecretError, SecretProvider};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_IMDS_URL: &str = "http://169.254.169.254";
const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";
const KEY_VAULT_API_VERSION: &str = "7.4";
const IDENTITY_API_VERSION: &str = "2018-02-01";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SecretBundle {
    #[serde(default)]
    value: Option<String>,
}

/// Azure Key Vault secret provider.
#[derive(Debug, Clone)]
pub struct KeyVaultSecretProvider {
    client: Client,
    vault_url: String,
    identity_url: String,
}

impl KeyVaultSecretProvider {
    /// Creates a provider for the vault named `vault_name` (`https://{name}.vault.azure.net`).
    pub fn for_vault_name(vault_name: &str) -> Result<Self, SecretError> {
        Self::with_urls(format!("https://{vault_name}.vault.azure.net"), DEFAULT_IMDS_URL.to_string())
    }

    /// Creates a provider with explicit vault and identity endpoints.
    pub fn with_urls(vault_url: String, identity_url: String) -> Result<Self, SecretError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SecretError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            vault_url: vault_url.trim_end_matches('/').to_string(),
            identity_url: identity_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn vault_url(&self) -> &str {
        &self.vault_url
    }

    async fn access_token(&self) -> Result<String, SecretError> {
        let url = format!("{}/metadata/identity/oauth2/token", self.identity_url);
        let response = self
            .client
            .get(&url)
            .query(&[("api-version", IDENTITY_API_VERSION), ("resource", KEY_VAULT_RESOURCE)])
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| SecretError::Transport(format!("managed identity token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SecretError::Transport(format!(
                "managed identity token request returned HTTP {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SecretError::Transport(format!("invalid token response: {e}")))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl SecretProvider for KeyVaultSecretProvider {
    async fn resolve(&self, name: &str) -> Result<String, SecretError> {
        info!(vault = %self.vault_url, secret = name, "Retrieving secret from Key Vault");
        let token = self.access_token().await?;

        let url = format!("{}/secrets/{}", self.vault_url, urlencoding::encode(name));
        let response = self
            .client
            .get(&url)
            .query(&[("api-version", KEY_VAULT_API_VERSION)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SecretError::Transport(format!("{url}: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(SecretError::NotFound(name.to_string())),
            status if !status.is_success() => {
                return Err(SecretError::Transport(format!("{url}: HTTP {status}")));
            }
            _ => {}
        }

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|e| SecretError::Transport(format!("invalid secret response: {e}")))?;

        match bundle.value {
            Some(value) if !value.trim().is_empty() => {
                debug!(secret = name, "Secret retrieved");
                Ok(value)
            }
            _ => Err(SecretError::Empty(name.to_string())),
        }
    }
}

/// Resolves secrets from environment variables named `{prefix}{UPPER_SNAKE_NAME}`.
///
/// `AzureStorageConnectionString` becomes `EMBER_SECRET_AZURE_STORAGE_CONNECTION_STRING`.
#[derive(Debug, Clone)]
pub struct EnvSecretProvider {
    prefix: String,
}

impl Default for EnvSecretProvider {
    fn default() -> Self {
        Self { prefix: "EMBER_SECRET_".to_string() }
    }
}

impl EnvSecretProvider {
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    #[must_use]
    pub fn env_var_name(&self, name: &str) -> String {
        let mut out = self.prefix.clone();
        let mut prev_lower = false;
        for ch in name.chars() {
            if ch == '-' || ch == '.' || ch == ' ' {
                out.push('_');
                prev_lower = false;
                continue;
            }
            if ch.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch.to_ascii_uppercase());
        }
        out
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn resolve(&self, name: &str) -> Result<String, SecretError> {
        let var = self.env_var_name(name);
        match std::env::var(&var) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            Ok(_) => Err(SecretError::Empty(var)),
            Err(_) => Err(SecretError::NotFound(var)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_env_var_name_conversion() {
        let provider = EnvSecretProvider::default();
        assert_eq!(
            provider.env_var_name("AzureStorageConnectionString"),
            "EMBER_SECRET_AZURE_STORAGE_CONNECTION_STRING"
        );
        assert_eq!(provider.env_var_name("storage-key"), "EMBER_SECRET_STORAGE_KEY");
    }

    #[tokio::test]
    async fn test_env_provider_missing_var_is_not_found() {
        let provider = EnvSecretProvider::with_prefix("EMBER_TEST_NEVER_SET_");
        let err = provider.resolve("Nothing").await.unwrap_err();
        assert!(matches!(err, SecretError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_key_vault_resolves_secret_with_identity_token() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("GET", "/metadata/identity/oauth2/token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api-version".into(), IDENTITY_API_VERSION.into()),
                Matcher::UrlEncoded("resource".into(), KEY_VAULT_RESOURCE.into()),
            ]))
            .match_header("metadata", "true")
            .with_status(200)
            .with_body(r#"{"access_token":"tok-123","expires_in":"3599"}"#)
            .create_async()
            .await;
        let secret = server
            .mock("GET", "/secrets/AzureStorageConnectionString")
            .match_query(Matcher::UrlEncoded("api-version".into(), KEY_VAULT_API_VERSION.into()))
            .match_header("authorization", "Bearer tok-123")
            .with_status(200)
            .with_body(r#"{"value":"AccountName=a;AccountKey=b","id":"x"}"#)
            .create_async()
            .await;

        let provider = KeyVaultSecretProvider::with_urls(server.url(), server.url()).unwrap();
        let value = provider.resolve("AzureStorageConnectionString").await.unwrap();
        assert_eq!(value, "AccountName=a;AccountKey=b");
        token.assert_async().await;
        secret.assert_async().await;
    }

    #[tokio::test]
    async fn test_key_vault_empty_secret_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("GET", "/metadata/identity/oauth2/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"access_token":"tok"}"#)
            .create_async()
            .await;
        let _secret = server
            .mock("GET", "/secrets/Empty")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"value":""}"#)
            .create_async()
            .await;

        let provider = KeyVaultSecretProvider::with_urls(server.url(), server.url()).unwrap();
        let err = provider.resolve("Empty").await.unwrap_err();
        assert!(matches!(err, SecretError::Empty(_)));
    }

    #[tokio::test]
    async fn test_key_vault_missing_secret_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("GET", "/metadata/identity/oauth2/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"access_token":"tok"}"#)
            .create_async()
            .await;
        let _secret = server
            .mock("GET", "/secrets/Nope")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let provider = KeyVaultSecretProvider::with_urls(server.url(), server.url()).unwrap();
        let err = provider.resolve("Nope").await.unwrap_err();
        assert!(matches!(err, SecretError::NotFound(_)));
    }
}
