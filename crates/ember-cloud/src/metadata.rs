//! Instance metadata lookup.

use async_trait::async_trait;
use ember_abstraction::{UNKNOWN_VM_LABEL, VmLabelSource};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_IMDS_URL: &str = "http://169.254.169.254";
const API_VERSION: &str = "2021-02-01";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeMetadata {
    #[serde(default)]
    vm_size: Option<String>,
}

/// Reads the VM size from the Azure Instance Metadata Service.
///
/// Any failure (no endpoint, non-200, malformed body) yields [`UNKNOWN_VM_LABEL`].
#[derive(Debug, Clone)]
pub struct InstanceMetadataClient {
    client: Client,
    base_url: String,
}

impl Default for InstanceMetadataClient {
    fn default() -> Self {
        Self::with_base_url(DEFAULT_IMDS_URL.to_string())
    }
}

impl InstanceMetadataClient {
    #[must_use]
    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }

    async fn fetch(&self) -> Result<String, String> {
        let url = format!("{}/metadata/instance/compute", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("api-version", API_VERSION)])
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let compute: ComputeMetadata = response.json().await.map_err(|e| e.to_string())?;
        compute
            .vm_size
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "vmSize missing from compute metadata".to_string())
    }
}

#[async_trait]
impl VmLabelSource for InstanceMetadataClient {
    async fn vm_label(&self) -> String {
        match self.fetch().await {
            Ok(size) => {
                info!(vm_size = %size, "VM size retrieved");
                size
            }
            Err(e) => {
                warn!(error = %e, "Error fetching VM size, using sentinel");
                UNKNOWN_VM_LABEL.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_vm_label_reads_vm_size() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/metadata/instance/compute")
            .match_query(Matcher::UrlEncoded("api-version".into(), API_VERSION.into()))
            .match_header("metadata", "true")
            .with_status(200)
            .with_body(r#"{"vmSize":"Standard_NC6s_v3","location":"westeurope"}"#)
            .create_async()
            .await;

        let client = InstanceMetadataClient::with_base_url(server.url());
        assert_eq!(client.vm_label().await, "Standard_NC6s_v3");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_vm_label_falls_back_on_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/metadata/instance/compute")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let client = InstanceMetadataClient::with_base_url(server.url());
        assert_eq!(client.vm_label().await, UNKNOWN_VM_LABEL);
    }

    #[tokio::test]
    async fn test_vm_label_falls_back_when_unreachable() {
        // Port 9 (discard) on localhost is not expected to serve HTTP.
        let client = InstanceMetadataClient::with_base_url("http://127.0.0.1:9".to_string());
        assert_eq!(client.vm_label().await, UNKNOWN_VM_LABEL);
    }
}
