use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use holdfast_core::models::{ClusterStatusEntry, PeerStatus};
use holdfast_core::{PinError, PinResult};

use crate::traits::ClusterApi;

#[derive(Debug, Deserialize)]
struct ClusterErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PeerInfo {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: String,
}

/// Pin info as returned by `/pins` endpoints. Older cluster versions encode
/// the CID as `{"/": "<cid>"}`, newer ones as a plain string.
#[derive(Debug, Deserialize)]
struct GlobalPinInfo {
    cid: serde_json::Value,
    #[serde(default)]
    peer_map: BTreeMap<String, PeerInfo>,
}

impl GlobalPinInfo {
    fn content_id(&self) -> Option<String> {
        match &self.cid {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map.get("/").and_then(|v| v.as_str()).map(String::from),
            _ => None,
        }
    }

    fn into_entry(self, fallback_cid: &str) -> ClusterStatusEntry {
        let content_id = self.content_id().unwrap_or_else(|| fallback_cid.to_string());
        let peers = self
            .peer_map
            .into_iter()
            .map(|(peer_id, info)| PeerStatus {
                peer_id,
                status: info.status,
                error: (!info.error.is_empty()).then_some(info.error),
            })
            .collect();
        ClusterStatusEntry::from_peers(content_id, peers)
    }
}

/// Client for the IPFS Cluster REST API.
#[derive(Clone)]
pub struct ClusterClient {
    http: Client,
    base_url: String,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ClusterClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> PinResult<Self> {
        let http = Client::builder().timeout(timeout).build().map_err(|e| {
            PinError::ClusterStatus(format!("Failed to create HTTP client for cluster: {}", e))
        })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn status(&self, content_id: &str, local: bool) -> PinResult<ClusterStatusEntry> {
        let response = self
            .http
            .get(self.url(&format!("/pins/{}", content_id)))
            .query(&[("local", local.to_string())])
            .send()
            .await
            .map_err(|e| PinError::ClusterStatus(format!("status request failed: {}", e)))?;
        let response = ensure_success(response)
            .await
            .map_err(PinError::ClusterStatus)?;
        let info: GlobalPinInfo = response
            .json()
            .await
            .map_err(|e| PinError::ClusterStatus(format!("invalid status response: {}", e)))?;
        Ok(info.into_entry(content_id))
    }
}

/// Returns the response when the status is 2xx, otherwise a message built
/// from the cluster's error body.
async fn ensure_success(response: Response) -> Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = serde_json::from_str::<ClusterErrorBody>(&body)
        .ok()
        .filter(|b| !b.message.is_empty())
        .map(|b| b.message)
        .unwrap_or(body);
    Err(format!("{} - {}", status, message))
}

/// The bulk listing is either a JSON array or newline-delimited JSON objects
/// depending on the cluster version.
fn parse_listing_line(line: &[u8], out: &mut Vec<ClusterStatusEntry>) -> PinResult<()> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Ok(());
    }
    if trimmed.first() == Some(&b'[') {
        let infos: Vec<GlobalPinInfo> = serde_json::from_slice(trimmed)
            .map_err(|e| PinError::ClusterStatus(format!("invalid pin listing: {}", e)))?;
        for info in infos {
            if let Some(cid) = info.content_id() {
                out.push(info.into_entry(&cid));
            }
        }
        return Ok(());
    }
    let info: GlobalPinInfo = serde_json::from_slice(trimmed)
        .map_err(|e| PinError::ClusterStatus(format!("invalid pin listing entry: {}", e)))?;
    if let Some(cid) = info.content_id() {
        out.push(info.into_entry(&cid));
    }
    Ok(())
}

#[async_trait]
impl ClusterApi for ClusterClient {
    #[tracing::instrument(skip(self))]
    async fn local_status(&self, content_id: &str) -> PinResult<ClusterStatusEntry> {
        self.status(content_id, true).await
    }

    #[tracing::instrument(skip(self))]
    async fn global_status(&self, content_id: &str) -> PinResult<ClusterStatusEntry> {
        self.status(content_id, false).await
    }

    #[tracing::instrument(skip(self))]
    async fn all_local_statuses(&self) -> PinResult<Vec<ClusterStatusEntry>> {
        let mut response = self
            .http
            .get(self.url("/pins"))
            .query(&[("local", "true")])
            .send()
            .await
            .map_err(|e| PinError::ClusterStatus(format!("listing request failed: {}", e)))?;
        response = ensure_success(response)
            .await
            .map_err(PinError::ClusterStatus)?;

        // Read chunk by chunk so large NDJSON listings are decoded as they
        // arrive instead of being buffered whole.
        let mut entries = Vec::new();
        let mut buffer = BytesMut::new();
        let mut array_mode = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PinError::ClusterStatus(format!("listing read failed: {}", e)))?
        {
            buffer.extend_from_slice(&chunk);
            if !array_mode && buffer.trim_ascii_start().first() == Some(&b'[') {
                array_mode = true;
            }
            if array_mode {
                continue;
            }
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line = buffer.split_to(pos + 1);
                parse_listing_line(&line, &mut entries)?;
            }
        }
        parse_listing_line(&buffer, &mut entries)?;

        tracing::debug!(count = entries.len(), "Fetched local cluster statuses");
        Ok(entries)
    }

    #[tracing::instrument(skip(self))]
    async fn recover_local(&self, content_id: &str) -> PinResult<ClusterStatusEntry> {
        let response = self
            .http
            .post(self.url(&format!("/pins/{}/recover", content_id)))
            .query(&[("local", "true")])
            .send()
            .await
            .map_err(|e| PinError::ClusterStatus(format!("recover request failed: {}", e)))?;
        let response = ensure_success(response)
            .await
            .map_err(PinError::ClusterStatus)?;
        let info: GlobalPinInfo = response
            .json()
            .await
            .map_err(|e| PinError::ClusterStatus(format!("invalid recover response: {}", e)))?;

        tracing::info!("Local pin recovery triggered");
        Ok(info.into_entry(content_id))
    }

    #[tracing::instrument(skip(self))]
    async fn remove_pin(&self, content_id: &str) -> PinResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/pins/{}", content_id)))
            .send()
            .await
            .map_err(|e| PinError::ClusterPinRemoval {
                content_id: content_id.to_string(),
                reason: e.to_string(),
            })?;
        ensure_success(response)
            .await
            .map_err(|reason| PinError::ClusterPinRemoval {
                content_id: content_id.to_string(),
                reason,
            })?;

        tracing::info!("Pin removed from cluster");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn pin(&self, content_id: &str) -> PinResult<()> {
        let response = self
            .http
            .post(self.url(&format!("/pins/{}", content_id)))
            .send()
            .await
            .map_err(|e| PinError::StorageBackend(format!("cluster pin request failed: {}", e)))?;
        ensure_success(response)
            .await
            .map_err(|reason| PinError::StorageBackend(format!("cluster pin failed: {}", reason)))?;

        tracing::info!("Pin submitted to cluster");
        Ok(())
    }
}
