//! Storage connection string parsing.
//!
//! Accepts the two shapes Azure hands out:
//! `DefaultEndpointsProtocol=https;AccountName=..;AccountKey=..;EndpointSuffix=..`
//! and `BlobEndpoint=..;SharedAccessSignature=..`, plus `UseDevelopmentStorage=true`.

use crate::blob::BlobAuth;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ember_abstraction::StorageError;

const DEV_ACCOUNT: &str = "devstoreaccount1";
const DEV_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub blob_endpoint: String,
    pub sas: Option<String>,
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "<redacted>"))
            .field("blob_endpoint", &self.blob_endpoint)
            .field("sas", &self.sas.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let mut protocol = "https".to_string();
        let mut suffix = "core.windows.net".to_string();
        let mut account_name = None;
        let mut account_key = None;
        let mut blob_endpoint = None;
        let mut sas = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Values (base64 keys, SAS tokens) may contain '=' themselves.
            let Some((key, value)) = part.split_once('=') else {
                return Err(StorageError::InvalidConfig(format!(
                    "malformed connection string segment: {}",
                    key_only(part)
                )));
            };
            match key.to_ascii_lowercase().as_str() {
                "defaultendpointsprotocol" => protocol = value.to_string(),
                "endpointsuffix" => suffix = value.to_string(),
                "accountname" => account_name = Some(value.to_string()),
                "accountkey" => account_key = Some(value.to_string()),
                "blobendpoint" => blob_endpoint = Some(value.trim_end_matches('/').to_string()),
                "sharedaccesssignature" => sas = Some(value.trim_start_matches('?').to_string()),
                "usedevelopmentstorage" if value.eq_ignore_ascii_case("true") => {
                    return Ok(Self {
                        account_name: Some(DEV_ACCOUNT.to_string()),
                        account_key: Some(DEV_KEY.to_string()),
                        blob_endpoint: DEV_BLOB_ENDPOINT.to_string(),
                        sas: None,
                    });
                }
                _ => {}
            }
        }

        let blob_endpoint = match (blob_endpoint, &account_name) {
            (Some(endpoint), _) => endpoint,
            (None, Some(account)) => format!("{protocol}://{account}.blob.{suffix}"),
            (None, None) => {
                return Err(StorageError::InvalidConfig(
                    "connection string needs AccountName or BlobEndpoint".to_string(),
                ));
            }
        };

        if account_key.is_none() && sas.is_none() {
            return Err(StorageError::InvalidConfig(
                "connection string needs AccountKey or SharedAccessSignature".to_string(),
            ));
        }

        Ok(Self { account_name, account_key, blob_endpoint, sas })
    }

    /// Picks the credential to sign requests with. A SAS token wins over a key.
    pub fn auth(&self) -> Result<BlobAuth, StorageError> {
        if let Some(sas) = &self.sas {
            return Ok(BlobAuth::Sas(sas.clone()));
        }
        match (&self.account_name, &self.account_key) {
            (Some(account), Some(key)) => {
                let key = STANDARD
                    .decode(key)
                    .map_err(|e| StorageError::InvalidConfig(format!("AccountKey is not base64: {e}")))?;
                Ok(BlobAuth::SharedKey { account: account.clone(), key })
            }
            _ => Err(StorageError::InvalidConfig(
                "AccountKey requires AccountName".to_string(),
            )),
        }
    }
}

fn key_only(part: &str) -> &str {
    part.split('=').next().unwrap_or(part)
}
