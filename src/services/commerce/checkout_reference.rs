use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Longest client reference the gateway accepts.
pub const MAX_REFERENCE_LEN: usize = 200;

/// Correlation token threaded through the payment gateway as the checkout
/// session's client reference. Untrusted when it comes back.
///
/// Ids are written as unpadded base64url so the encoded object stays under
/// [`MAX_REFERENCE_LEN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReference {
    #[serde(with = "compact_uuid")]
    pub bag_id: Uuid,
    #[serde(with = "compact_uuid")]
    pub store_id: Uuid,
    #[serde(with = "compact_uuid")]
    pub seller_id: Uuid,
    #[serde(with = "compact_uuid")]
    pub user_id: Uuid,
    #[serde(with = "compact_uuid")]
    pub address_id: Uuid,
}

impl CheckoutReference {
    pub fn encode(&self) -> Result<String, ServiceError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, ServiceError> {
        serde_json::from_str(raw)
            .map_err(|e| ServiceError::BadRequest(format!("Invalid checkout reference: {}", e)))
    }
}

/// 22-character base64url UUIDs. Hyphenated UUIDs are still read.
mod compact_uuid {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(id: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(id.as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uuid, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.len() == 22 {
            let bytes = URL_SAFE_NO_PAD.decode(raw.as_bytes()).map_err(de::Error::custom)?;
            Uuid::from_slice(&bytes).map_err(de::Error::custom)
        } else {
            Uuid::parse_str(&raw).map_err(de::Error::custom)
        }
    }
}
