//! HMAC-SHA256 sealing of stored records
//!
//! Each record is stored as a JSON object with an extra `_signature` field:
//! the hex HMAC over the canonical (sorted-key, compact) JSON of every other
//! field.

use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::Sha256;

use super::backend::RecordKey;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Name of the embedded signature field
pub const SIGNATURE_FIELD: &str = "_signature";

/// Signs and verifies records with a shared secret
#[derive(Clone)]
pub struct RecordSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for RecordSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSigner").finish_non_exhaustive()
    }
}

impl RecordSigner {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    fn mac(&self, fields: &Map<String, Value>) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Config(format!("Unusable signing key: {}", e)))?;
        mac.update(&canonical_bytes(fields)?);
        Ok(mac)
    }

    /// Serialize a record and embed its signature
    pub fn seal<T: Serialize>(&self, key: &RecordKey, record: &T) -> Result<Vec<u8>> {
        let Value::Object(mut fields) = serde_json::to_value(record)? else {
            return Err(Error::InvalidState {
                key: key.to_string(),
                reason: "record does not serialize to a JSON object".to_string(),
            });
        };
        fields.remove(SIGNATURE_FIELD);

        let signature = hex::encode(self.mac(&fields)?.finalize().into_bytes());
        fields.insert(SIGNATURE_FIELD.to_string(), Value::String(signature));

        let mut bytes = serde_json::to_vec_pretty(&Value::Object(fields))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Verify a stored record and deserialize it
    ///
    /// Anything that fails verification is [`Error::Corrupt`]; authentic
    /// content that does not fit `T` is [`Error::InvalidState`].
    pub fn open<T: DeserializeOwned>(&self, key: &RecordKey, bytes: &[u8]) -> Result<T> {
        let corrupt = |reason: String| Error::Corrupt {
            key: key.to_string(),
            reason,
        };

        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| corrupt(format!("not valid JSON: {}", e)))?;
        let Value::Object(mut fields) = value else {
            return Err(corrupt("not a JSON object".to_string()));
        };

        let signature = match fields.remove(SIGNATURE_FIELD) {
            None => return Err(corrupt("missing signature".to_string())),
            Some(Value::String(s)) => s,
            Some(_) => return Err(corrupt("malformed signature".to_string())),
        };
        let signature = hex::decode(&signature)
            .map_err(|_| corrupt("malformed signature".to_string()))?;

        self.mac(&fields)?
            .verify_slice(&signature)
            .map_err(|_| corrupt("signature mismatch".to_string()))?;

        serde_json::from_value(Value::Object(fields)).map_err(|e| Error::InvalidState {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Compact JSON with object keys sorted at every level
fn canonical_bytes(fields: &Map<String, Value>) -> Result<Vec<u8>> {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                Value::Object(entries.into_iter().map(|(k, v)| (k.clone(), sorted(v))).collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    Ok(serde_json::to_vec(&sorted(&Value::Object(fields.clone())))?)
}
