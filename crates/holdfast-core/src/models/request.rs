use serde::Deserialize;
use validator::Validate;

use crate::constants::PUBLIC_NETWORK;
use crate::error::PinResult;
use crate::validation::{validate_content_id, validate_network_name};

fn default_network() -> String {
    PUBLIC_NETWORK.to_string()
}

/// Request to pin existing content on a network or on the cluster.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PinRequest {
    #[validate(length(min = 1, max = 255, message = "content id must be 1-255 characters"))]
    pub content_id: String,
    #[serde(default = "default_network")]
    pub network_name: String,
    #[validate(range(min = 0, message = "hold time must be >= 0 months"))]
    pub hold_months: i64,
}

impl PinRequest {
    pub fn new(content_id: &str, network_name: &str, hold_months: i64) -> Self {
        Self {
            content_id: content_id.to_string(),
            network_name: network_name.to_string(),
            hold_months,
        }
    }

    /// Field checks plus structural CID and network name checks.
    pub fn check(&self) -> PinResult<()> {
        self.validate()?;
        validate_content_id(&self.content_id)?;
        validate_network_name(&self.network_name)
    }
}

/// Request to stage a file for addition to a network.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddFileRequest {
    #[serde(default = "default_network")]
    pub network_name: String,
    #[validate(length(min = 1, max = 255, message = "file name must be 1-255 characters"))]
    pub file_name: Option<String>,
    #[validate(range(min = 0, message = "hold time must be >= 0 months"))]
    pub hold_months: i64,
}

impl AddFileRequest {
    pub fn check(&self) -> PinResult<()> {
        self.validate()?;
        validate_network_name(&self.network_name)
    }
}

/// Request to point an IPNS name at content.
///
/// `lifetime` and `ttl` are duration strings such as `24h` or `1h30m`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PublishNameRequest {
    #[validate(length(min = 1, max = 255, message = "content id must be 1-255 characters"))]
    pub content_id: String,
    #[serde(default = "default_network")]
    pub network_name: String,
    #[validate(length(min = 1, max = 255, message = "key must be 1-255 characters"))]
    pub key: String,
    #[validate(length(min = 1, max = 32, message = "lifetime must be 1-32 characters"))]
    pub lifetime: String,
    #[validate(length(min = 1, max = 32, message = "ttl must be 1-32 characters"))]
    pub ttl: String,
    #[serde(default)]
    pub resolve: bool,
}

impl PublishNameRequest {
    pub fn check(&self) -> PinResult<()> {
        self.validate()?;
        validate_content_id(&self.content_id)?;
        validate_network_name(&self.network_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PinError;

    const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    #[test]
    fn pin_request_defaults_to_public_network() {
        let req: PinRequest =
            serde_json::from_str(&format!(r#"{{"content_id":"{}","hold_months":1}}"#, CID)).unwrap();
        assert_eq!(req.network_name, PUBLIC_NETWORK);
        assert!(req.check().is_ok());
    }

    #[test]
    fn pin_request_rejects_negative_hold_and_bad_cid() {
        assert!(matches!(
            PinRequest::new(CID, "public", -1).check(),
            Err(PinError::Validation(_))
        ));
        assert!(matches!(
            PinRequest::new("not-a-cid", "public", 1).check(),
            Err(PinError::Validation(_))
        ));
    }

    #[test]
    fn publish_name_request_requires_key() {
        let req = PublishNameRequest {
            content_id: CID.to_string(),
            network_name: "public".to_string(),
            key: String::new(),
            lifetime: "24h".to_string(),
            ttl: "1h".to_string(),
            resolve: true,
        };
        assert!(req.check().is_err());
    }
}
