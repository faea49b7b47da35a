//! Structural validation of content identifiers.
//!
//! Only the shape is checked (version prefix, multibase alphabet, length);
//! the multihash itself is not decoded.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{PinError, PinResult};

/// CIDv0: base58btc sha2-256 multihash, always 46 characters starting with `Qm`.
static CID_V0: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Qm[1-9A-HJ-NP-Za-km-z]{44}$").expect("valid CIDv0 pattern"));

/// CIDv1 in the multibase encodings the gateways hand out: base32 (`b`),
/// base58btc (`z`) and base16 (`f`).
static CID_V1: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(b[a-z2-7]{50,}|z[1-9A-HJ-NP-Za-km-z]{40,}|f[0-9a-f]{60,})$")
        .expect("valid CIDv1 pattern")
});

const MAX_CONTENT_ID_LENGTH: usize = 255;

pub fn validate_content_id(content_id: &str) -> PinResult<()> {
    if content_id.is_empty() {
        return Err(PinError::validation("content identifier cannot be empty"));
    }
    if content_id.len() > MAX_CONTENT_ID_LENGTH {
        return Err(PinError::validation(format!(
            "content identifier exceeds {} characters",
            MAX_CONTENT_ID_LENGTH
        )));
    }
    if CID_V0.is_match(content_id) || CID_V1.is_match(content_id) {
        Ok(())
    } else {
        Err(PinError::validation(format!(
            "'{}' is not a well-formed content identifier",
            content_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_v0_and_v1() {
        validate_content_id("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").unwrap();
        validate_content_id("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi")
            .unwrap();
    }

    #[test]
    fn rejects_malformed() {
        for bad in [
            "",
            "Qm123",
            "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbd0",
            "hello world",
            "bafy",
        ] {
            assert!(
                matches!(validate_content_id(bad), Err(PinError::Validation(_))),
                "{} should be rejected",
                bad
            );
        }
    }
}
