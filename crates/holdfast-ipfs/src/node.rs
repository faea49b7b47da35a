use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use holdfast_core::validation::format_duration;
use holdfast_core::{PinError, PinResult};

use crate::traits::{AddedContent, NamePublish, PublishedName, StorageBackend};

/// Error messages the node returns when unpinning or listing content that
/// is not pinned.
const NOT_PINNED_MARKERS: [&str; 2] = ["not pinned", "is not pinned"];

#[derive(Debug, Deserialize)]
struct NodeError {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size", default)]
    size: String,
}

#[derive(Debug, Deserialize)]
struct ObjectStat {
    #[serde(rename = "CumulativeSize")]
    cumulative_size: u64,
}

#[derive(Debug, Deserialize)]
struct PinLsResponse {
    #[serde(rename = "Keys", default)]
    keys: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct NamePublishResponse {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: String,
}

/// Client for the HTTP RPC API of one IPFS node (`/api/v0/...`).
#[derive(Clone)]
pub struct IpfsNodeClient {
    http: Client,
    base_url: String,
}

impl std::fmt::Debug for IpfsNodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpfsNodeClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl IpfsNodeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> PinResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                PinError::StorageBackend(format!("Failed to create HTTP client for IPFS node: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.base_url, command)
    }

    async fn call(&self, command: &str, query: &[(&str, String)]) -> PinResult<Response> {
        let response = self
            .http
            .post(self.endpoint(command))
            .query(query)
            .send()
            .await
            .map_err(|e| {
                PinError::StorageBackend(format!("IPFS {} request failed: {}", command, e))
            })?;
        check_status(command, response).await
    }
}

async fn check_status(command: &str, response: Response) -> PinResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = serde_json::from_str::<NodeError>(&body)
        .map(|e| e.message)
        .unwrap_or(body);
    Err(PinError::StorageBackend(format!(
        "IPFS {} failed: {} - {}",
        command, status, message
    )))
}

async fn decode<T: for<'de> Deserialize<'de>>(command: &str, response: Response) -> PinResult<T> {
    response.json::<T>().await.map_err(|e| {
        PinError::StorageBackend(format!("Failed to parse IPFS {} response: {}", command, e))
    })
}

fn is_not_pinned(err: &PinError) -> bool {
    match err {
        PinError::StorageBackend(msg) => NOT_PINNED_MARKERS.iter().any(|m| msg.contains(m)),
        _ => false,
    }
}

#[async_trait]
impl StorageBackend for IpfsNodeClient {
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    async fn add_content(&self, data: Vec<u8>, file_name: Option<&str>) -> PinResult<AddedContent> {
        let part = Part::bytes(data).file_name(file_name.unwrap_or("file").to_string());
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(self.endpoint("add"))
            .query(&[("pin", "false"), ("cid-version", "0")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| PinError::StorageBackend(format!("IPFS add request failed: {}", e)))?;
        let response = check_status("add", response).await?;
        let added: AddResponse = decode("add", response).await?;

        tracing::info!(content_id = %added.hash, "Content added to node");

        Ok(AddedContent {
            size: added.size.parse().unwrap_or(0),
            content_id: added.hash,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn pin(&self, content_id: &str) -> PinResult<()> {
        self.call("pin/add", &[("arg", content_id.to_string())])
            .await?;
        tracing::debug!("Content pinned on node");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn unpin(&self, content_id: &str) -> PinResult<()> {
        match self.call("pin/rm", &[("arg", content_id.to_string())]).await {
            Ok(_) => {
                tracing::debug!("Content unpinned on node");
                Ok(())
            }
            Err(e) if is_not_pinned(&e) => {
                tracing::debug!("Content was not pinned, nothing to remove");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn object_size(&self, content_id: &str) -> PinResult<u64> {
        let response = self
            .call("object/stat", &[("arg", content_id.to_string())])
            .await?;
        let stat: ObjectStat = decode("object/stat", response).await?;
        Ok(stat.cumulative_size)
    }

    #[tracing::instrument(skip(self))]
    async fn has_pin(&self, content_id: &str) -> PinResult<bool> {
        let result = self
            .call(
                "pin/ls",
                &[
                    ("arg", content_id.to_string()),
                    ("type", "recursive".to_string()),
                ],
            )
            .await;
        match result {
            Ok(response) => {
                let listing: PinLsResponse = decode("pin/ls", response).await?;
                Ok(listing.keys.contains_key(content_id))
            }
            Err(e) if is_not_pinned(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self), fields(content_id = %request.content_id, key = %request.key))]
    async fn publish_name(&self, request: &NamePublish) -> PinResult<PublishedName> {
        let response = self
            .call(
                "name/publish",
                &[
                    ("arg", format!("/ipfs/{}", request.content_id)),
                    ("key", request.key.clone()),
                    ("lifetime", format_duration(request.lifetime)),
                    ("ttl", format_duration(request.ttl)),
                    ("resolve", request.resolve.to_string()),
                ],
            )
            .await?;
        let published: NamePublishResponse = decode("name/publish", response).await?;

        tracing::info!(name = %published.name, "IPNS record published");

        Ok(PublishedName {
            name: published.name,
            value: published.value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    fn client(url: &str) -> IpfsNodeClient {
        IpfsNodeClient::new(url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_add_content_returns_hash() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v0/add")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"Name":"hello.txt","Hash":"{}","Size":"19"}}"#, CID))
            .create_async()
            .await;

        let added = client(&server.url())
            .add_content(b"hello holdfast".to_vec(), Some("hello.txt"))
            .await
            .unwrap();

        assert_eq!(added.content_id, CID);
        assert_eq!(added.size, 19);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unpin_of_unpinned_content_succeeds() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v0/pin/rm")
            .match_query(Matcher::UrlEncoded("arg".into(), CID.into()))
            .with_status(500)
            .with_body(r#"{"Message":"not pinned or pinned indirectly","Code":0,"Type":"error"}"#)
            .create_async()
            .await;

        assert!(client(&server.url()).unpin(CID).await.is_ok());
    }

    #[tokio::test]
    async fn test_pin_failure_is_storage_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v0/pin/add")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body(r#"{"Message":"merkledag: not found","Code":0,"Type":"error"}"#)
            .create_async()
            .await;

        let err = client(&server.url()).pin(CID).await.unwrap_err();
        match err {
            PinError::StorageBackend(msg) => assert!(msg.contains("merkledag: not found")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_object_size_and_pin_presence() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v0/object/stat")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!(
                r#"{{"Hash":"{}","NumLinks":0,"BlockSize":27,"LinksSize":2,"DataSize":25,"CumulativeSize":27}}"#,
                CID
            ))
            .create_async()
            .await;
        server
            .mock("POST", "/api/v0/pin/ls")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body(format!(r#"{{"Message":"path '{}' is not pinned","Code":0}}"#, CID))
            .create_async()
            .await;

        let node = client(&server.url());
        assert_eq!(node.object_size(CID).await.unwrap(), 27);
        assert!(!node.has_pin(CID).await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_name_sends_go_durations() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v0/name/publish")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("arg".into(), format!("/ipfs/{}", CID)),
                Matcher::UrlEncoded("lifetime".into(), "24h".into()),
                Matcher::UrlEncoded("ttl".into(), "90m".into()),
                Matcher::UrlEncoded("key".into(), "self".into()),
                Matcher::UrlEncoded("resolve".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body(format!(
                r#"{{"Name":"k51qzi5uqu5dlvj2baxnqndepeb86cbk3ng7n3i46uzyxzyqj2xjonzllnv0v8","Value":"/ipfs/{}"}}"#,
                CID
            ))
            .create_async()
            .await;

        let published = client(&server.url())
            .publish_name(&NamePublish {
                content_id: CID.to_string(),
                key: "self".to_string(),
                lifetime: Duration::from_secs(86_400),
                ttl: Duration::from_secs(5_400),
                resolve: true,
            })
            .await
            .unwrap();

        assert_eq!(published.value, format!("/ipfs/{}", CID));
        mock.assert_async().await;
    }
}
