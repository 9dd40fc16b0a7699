//! Versioned, validated payloads for activity inputs and outputs.
//!
//! Every payload crosses the serialization boundary wrapped as
//! `{"v": <version>, "data": <body>}`. Decoding rejects unknown versions and
//! runs [`Payload::validate`], so an activity never sees a malformed input.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A strongly typed payload with a schema version.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const VERSION: u16 = 1;

    /// Checks business-independent shape constraints (required ids, etc).
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("unsupported payload version {found} (expected {expected})")]
    Version { expected: u16, found: u16 },

    #[error("invalid payload: {0}")]
    Invalid(String),

    #[error("malformed payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    v: u16,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    v: u16,
    data: Value,
}

pub fn encode<P: Payload>(payload: &P) -> Result<Value, PayloadError> {
    payload.validate().map_err(PayloadError::Invalid)?;
    Ok(serde_json::to_value(EnvelopeRef {
        v: P::VERSION,
        data: payload,
    })?)
}

pub fn decode<P: Payload>(value: &Value) -> Result<P, PayloadError> {
    let envelope = Envelope::deserialize(value)?;
    if envelope.v != P::VERSION {
        return Err(PayloadError::Version {
            expected: P::VERSION,
            found: envelope.v,
        });
    }
    let payload: P = serde_json::from_value(envelope.data)?;
    payload.validate().map_err(PayloadError::Invalid)?;
    Ok(payload)
}

impl Payload for () {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Release {
        order_id: String,
    }

    impl Payload for Release {
        const VERSION: u16 = 2;

        fn validate(&self) -> Result<(), String> {
            if self.order_id.is_empty() {
                return Err("order_id is required".into());
            }
            Ok(())
        }
    }

    #[test]
    fn encodes_with_version_wrapper() {
        let value = encode(&Release {
            order_id: "ORD-1".into(),
        })
        .unwrap();
        assert_eq!(value, json!({"v": 2, "data": {"order_id": "ORD-1"}}));
        assert_eq!(
            decode::<Release>(&value).unwrap(),
            Release {
                order_id: "ORD-1".into()
            }
        );
    }

    #[test]
    fn rejects_other_versions_and_invalid_bodies() {
        let old = json!({"v": 1, "data": {"order_id": "ORD-1"}});
        assert!(matches!(
            decode::<Release>(&old),
            Err(PayloadError::Version { found: 1, .. })
        ));

        let empty = json!({"v": 2, "data": {"order_id": ""}});
        assert!(matches!(
            decode::<Release>(&empty),
            Err(PayloadError::Invalid(_))
        ));

        let unwrapped = json!({"order_id": "ORD-1"});
        assert!(matches!(
            decode::<Release>(&unwrapped),
            Err(PayloadError::Serialization(_))
        ));
    }
}
