//! Azure Blob Storage implementation of [`ObjectStore`].
//!
//! Talks to the Blob REST API directly with reqwest. Reads address the
//! container the store was built for; uploads name their container.

use crate::connection::ConnectionString;
use crate::signing::{SignableRequest, authorization_header};
use async_trait::async_trait;
use bytes::Bytes;
use ember_abstraction::{ByteStream, ObjectStore, StorageError};
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, IF_NONE_MATCH};
use reqwest::{Client, Method, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

const API_VERSION: &str = "2021-08-06";
const OCTET_STREAM: &str = "application/octet-stream";

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Name>([^<]*)</Name>").expect("static regex"));
static NEXT_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<NextMarker>([^<]*)</NextMarker>").expect("static regex"));

/// Credential attached to every request.
#[derive(Clone)]
pub enum BlobAuth {
    /// Sign with the account key.
    SharedKey { account: String, key: Vec<u8> },
    /// Append a SAS token to every URL.
    Sas(String),
    /// No credential (public containers, local emulators behind a proxy, tests).
    Anonymous,
}

impl std::fmt::Debug for BlobAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { account, .. } => write!(f, "SharedKey({account})"),
            Self::Sas(_) => f.write_str("Sas(<redacted>)"),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Azure Blob Storage client bound to one container.
#[derive(Debug, Clone)]
pub struct AzureBlobStore {
    client: Client,
    endpoint: String,
    container: String,
    auth: BlobAuth,
}

struct BlobRequest<'a> {
    method: Method,
    container: &'a str,
    blob: Option<&'a str>,
    query: Vec<(String, String)>,
    ms_headers: Vec<(String, String)>,
    body: Option<Bytes>,
    if_none_match: Option<&'a str>,
}

impl<'a> BlobRequest<'a> {
    fn new(method: Method, container: &'a str, blob: Option<&'a str>) -> Self {
        Self {
            method,
            container,
            blob,
            query: Vec::new(),
            ms_headers: Vec::new(),
            body: None,
            if_none_match: None,
        }
    }
}

/// One page of a container listing.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ListPage {
    pub names: Vec<String>,
    pub next_marker: Option<String>,
}

impl AzureBlobStore {
    /// Creates a store for `container` at `endpoint` (e.g. `https://acct.blob.core.windows.net`).
    pub fn new(
        endpoint: impl Into<String>,
        container: impl Into<String>,
        auth: BlobAuth,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StorageError::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            container: container.into(),
            auth,
        })
    }

    /// Creates a store from a storage account connection string.
    pub fn from_connection_string(raw: &str, container: &str) -> Result<Self, StorageError> {
        let parsed = ConnectionString::parse(raw)?;
        let auth = parsed.auth()?;
        info!(endpoint = %parsed.blob_endpoint, container, "Initializing blob store");
        Self::new(parsed.blob_endpoint, container, auth)
    }

    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Same account and credential, different container.
    #[must_use]
    pub fn for_container(&self, container: &str) -> Self {
        Self { container: container.to_string(), ..self.clone() }
    }

    fn url_for(&self, container: &str, blob: Option<&str>, query: &[(String, String)]) -> String {
        let mut url = format!("{}/{}", self.endpoint, urlencoding::encode(container));
        if let Some(blob) = blob {
            url.push('/');
            url.push_str(&encode_blob_path(blob));
        }

        let mut params: Vec<String> =
            query.iter().map(|(k, v)| format!("{k}={}", urlencoding::encode(v))).collect();
        if let BlobAuth::Sas(sas) = &self.auth {
            params.push(sas.clone());
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    async fn send(&self, req: BlobRequest<'_>) -> Result<Response, StorageError> {
        let url = self.url_for(req.container, req.blob, &req.query);

        let mut ms_headers = req.ms_headers;
        ms_headers.push((
            "x-ms-date".to_string(),
            chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        ));
        ms_headers.push(("x-ms-version".to_string(), API_VERSION.to_string()));

        let content_length = req.body.as_ref().map_or(0, |b| b.len() as u64);
        let content_type = req.body.as_ref().map(|_| OCTET_STREAM);

        let mut builder = self.client.request(req.method.clone(), &url);
        for (name, value) in &ms_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(tag) = req.if_none_match {
            builder = builder.header(IF_NONE_MATCH, tag);
        }

        if let BlobAuth::SharedKey { account, key } = &self.auth {
            let parsed = reqwest::Url::parse(&url)
                .map_err(|e| StorageError::InvalidConfig(format!("invalid blob url {url}: {e}")))?;
            let signable = SignableRequest {
                verb: req.method.as_str(),
                path: parsed.path(),
                query: &req.query,
                ms_headers: &ms_headers,
                content_length,
                content_type,
                if_none_match: req.if_none_match,
            };
            builder = builder.header(
                AUTHORIZATION,
                authorization_header(account, key, &signable.string_to_sign(account)),
            );
        }

        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        debug!(method = %req.method, container = req.container, blob = ?req.blob, "Blob request");
        builder.send().await.map_err(|e| StorageError::Transport(format!("{url}: {e}")))
    }

    async fn get(&self, key: &str) -> Result<Response, StorageError> {
        let response = self.send(BlobRequest::new(Method::GET, &self.container, Some(key))).await?;
        check_status(response, &format!("{}/{}", self.container, key)).await
    }
}

fn encode_blob_path(blob: &str) -> String {
    blob.split('/').map(|segment| urlencoding::encode(segment).into_owned()).collect::<Vec<_>>().join("/")
}

async fn check_status(response: Response, what: &str) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(StorageError::NotFound(what.to_string()));
    }
    Err(StorageError::Transport(format!("{what}: HTTP {status}: {}", body.trim())))
}

fn unescape_xml(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub(crate) fn parse_list_page(body: &str) -> ListPage {
    let names = NAME_RE.captures_iter(body).map(|c| unescape_xml(&c[1])).collect();
    let next_marker = NEXT_MARKER_RE
        .captures(body)
        .map(|c| unescape_xml(&c[1]))
        .filter(|m| !m.is_empty());
    ListPage { names, next_marker }
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut req = BlobRequest::new(Method::GET, &self.container, None);
            req.query.push(("restype".to_string(), "container".to_string()));
            req.query.push(("comp".to_string(), "list".to_string()));
            if !prefix.is_empty() {
                req.query.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(m) = &marker {
                req.query.push(("marker".to_string(), m.clone()));
            }

            let response = check_status(self.send(req).await?, &self.container).await?;
            let body = response
                .text()
                .await
                .map_err(|e| StorageError::Transport(format!("listing {}: {e}", self.container)))?;
            let page = parse_list_page(&body);
            keys.extend(page.names);

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        debug!(container = %self.container, prefix, count = keys.len(), "Listed blobs");
        Ok(keys)
    }

    async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let response = self.get(key).await?;
        response
            .bytes()
            .await
            .map_err(|e| StorageError::Transport(format!("{}/{key}: {e}", self.container)))
    }

    async fn get_stream(&self, key: &str) -> Result<ByteStream, StorageError> {
        let response = self.get(key).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StorageError::Transport(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn put_bytes(
        &self,
        container: &str,
        name: &str,
        bytes: Bytes,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        let size = bytes.len();
        let mut req = BlobRequest::new(Method::PUT, container, Some(name));
        req.ms_headers.push(("x-ms-blob-type".to_string(), "BlockBlob".to_string()));
        req.body = Some(bytes);
        if !overwrite {
            req.if_none_match = Some("*");
        }

        let response = self.send(req).await?;
        let status = response.status();
        if !overwrite && (status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED) {
            return Err(StorageError::AlreadyExists(format!("{container}/{name}")));
        }
        check_status(response, &format!("{container}/{name}")).await?;

        info!(container, name, size, "Uploaded blob");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const PAGE_ONE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://firedata.blob.core.windows.net/" ContainerName="datasets">
  <Prefix>fire/</Prefix>
  <Blobs>
    <Blob><Name>fire/img_001.jpg</Name><Properties><Content-Length>10</Content-Length></Properties></Blob>
    <Blob><Name>fire/a&amp;b.jpg</Name><Properties><Content-Length>12</Content-Length></Properties></Blob>
  </Blobs>
  <NextMarker>page-2</NextMarker>
</EnumerationResults>"#;

    const PAGE_TWO: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ContainerName="datasets">
  <Blobs>
    <Blob><Name>fire/img_003.jpg</Name></Blob>
  </Blobs>
  <NextMarker />
</EnumerationResults>"#;

    #[test]
    fn test_parse_list_page() {
        let page = parse_list_page(PAGE_ONE);
        assert_eq!(page.names, vec!["fire/img_001.jpg".to_string(), "fire/a&b.jpg".to_string()]);
        assert_eq!(page.next_marker.as_deref(), Some("page-2"));

        let last = parse_list_page(PAGE_TWO);
        assert_eq!(last.names.len(), 1);
        assert_eq!(last.next_marker, None);
    }

    #[test]
    fn test_encode_blob_path_keeps_separators() {
        assert_eq!(encode_blob_path("fire/img 1.jpg"), "fire/img%201.jpg");
    }

    #[tokio::test]
    async fn test_list_follows_next_marker() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/datasets")
            .match_query(Matcher::Exact("restype=container&comp=list&prefix=fire%2F".to_string()))
            .match_header("x-ms-version", API_VERSION)
            .with_status(200)
            .with_body(PAGE_ONE)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/datasets")
            .match_query(Matcher::Exact(
                "restype=container&comp=list&prefix=fire%2F&marker=page-2".to_string(),
            ))
            .with_status(200)
            .with_body(PAGE_TWO)
            .create_async()
            .await;

        let store = AzureBlobStore::new(server.url(), "datasets", BlobAuth::Anonymous).unwrap();
        let keys = store.list("fire/").await.unwrap();

        assert_eq!(keys.len(), 3);
        assert_eq!(keys[2], "fire/img_003.jpg");
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_bytes_maps_404_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/datasets/fire/missing.jpg")
            .with_status(404)
            .with_body("<Error><Code>BlobNotFound</Code></Error>")
            .create_async()
            .await;

        let store = AzureBlobStore::new(server.url(), "datasets", BlobAuth::Anonymous).unwrap();
        let err = store.get_bytes("fire/missing.jpg").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_stream_collects_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/datasets/archive.zip")
            .with_status(200)
            .with_body(vec![7u8; 4096])
            .create_async()
            .await;

        let store = AzureBlobStore::new(server.url(), "datasets", BlobAuth::Anonymous).unwrap();
        let mut stream = store.get_stream("archive.zip").await.unwrap();
        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 4096);
    }

    #[tokio::test]
    async fn test_sas_token_is_appended_to_query() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/datasets/k.jpg")
            .match_query(Matcher::Exact("sv=2022-11-02&sig=abc".to_string()))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let store =
            AzureBlobStore::new(server.url(), "datasets", BlobAuth::Sas("sv=2022-11-02&sig=abc".to_string()))
                .unwrap();
        let bytes = store.get_bytes("k.jpg").await.unwrap();
        assert_eq!(&bytes[..], b"ok");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_shared_key_requests_carry_authorization() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/datasets/k.jpg")
            .match_header("authorization", Matcher::Regex(r"^SharedKey firedata:[A-Za-z0-9+/=]+$".to_string()))
            .match_header("x-ms-date", Matcher::Any)
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let auth = BlobAuth::SharedKey { account: "firedata".to_string(), key: b"secret".to_vec() };
        let store = AzureBlobStore::new(server.url(), "datasets", auth).unwrap();
        store.get_bytes("k.jpg").await.unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_put_without_overwrite_reports_conflict() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("PUT", "/models/2026-10-18-GPU-x.json")
            .match_header("if-none-match", "*")
            .match_header("x-ms-blob-type", "BlockBlob")
            .with_status(409)
            .with_body("<Error><Code>BlobAlreadyExists</Code></Error>")
            .create_async()
            .await;

        let store = AzureBlobStore::new(server.url(), "datasets", BlobAuth::Anonymous).unwrap();
        let err = store
            .put_bytes("models", "2026-10-18-GPU-x.json", Bytes::from_static(b"{}"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_put_with_overwrite_targets_named_container() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("PUT", "/models/snapshot.json")
            .match_header("if-none-match", Matcher::Missing)
            .match_body("{\"w\":1}")
            .with_status(201)
            .create_async()
            .await;

        let store = AzureBlobStore::new(server.url(), "datasets", BlobAuth::Anonymous).unwrap();
        store
            .put_bytes("models", "snapshot.json", Bytes::from_static(b"{\"w\":1}"), true)
            .await
            .unwrap();
        m.assert_async().await;
    }
}
