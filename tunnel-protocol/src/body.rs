use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

/// Arbitrary request/response bytes, always carried as a base64 string on
/// the wire. Spec leaves the string-vs-base64 choice to the implementer;
/// this crate fixes base64 only (see DESIGN.md).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Base64Body(pub Vec<u8>);

impl Base64Body {
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Base64Body {
    fn from(bytes: Vec<u8>) -> Self {
        Base64Body(bytes)
    }
}

impl Serialize for Base64Body {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Body {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| D::Error::custom(format!("invalid base64 body: {e}")))?;
        Ok(Base64Body(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let body = Base64Body(b"hello world".to_vec());
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, "\"aGVsbG8gd29ybGQ=\"");
        let back: Base64Body = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn empty_body_round_trips() {
        let body = Base64Body::default();
        let json = serde_json::to_string(&body).unwrap();
        let back: Base64Body = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = serde_json::from_str::<Base64Body>("\"not-base64!!\"");
        assert!(err.is_err());
    }
}
