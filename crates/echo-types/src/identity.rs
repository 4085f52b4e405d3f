use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

const ID_LENGTH: usize = 32;

fn random_bytes() -> [u8; ID_LENGTH] {
    let mut bytes = [0u8; ID_LENGTH];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    bytes
}

fn decode_hex(s: &str) -> Result<[u8; ID_LENGTH], TypeError> {
    let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
    if bytes.len() != ID_LENGTH {
        return Err(TypeError::InvalidLength {
            expected: ID_LENGTH,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; ID_LENGTH];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// Identity of a live object.
///
/// Generated on the client when the object is constructed and never
/// reassigned afterwards; clones carry the same id as their source.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ObjectId {
    bytes: [u8; ID_LENGTH],
}

impl ObjectId {
    /// Allocate a fresh random id.
    pub fn random() -> Self {
        Self {
            bytes: random_bytes(),
        }
    }

    /// Create from raw bytes.
    pub fn from_raw(bytes: [u8; ID_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        decode_hex(s).map(|bytes| Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.bytes
    }

    /// Full hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// First 8 hex characters, for logs.
    pub fn short_id(&self) -> String {
        hex::encode(&self.bytes[..4])
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_hex()
    }
}

impl TryFrom<String> for ObjectId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short_id())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Identity of a space: one backing store namespace registered with the
/// graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SpaceKey {
    bytes: [u8; ID_LENGTH],
}

impl SpaceKey {
    /// Create a random space key for tests and embedding.
    pub fn random() -> Self {
        Self {
            bytes: random_bytes(),
        }
    }

    pub fn from_raw(bytes: [u8; ID_LENGTH]) -> Self {
        Self { bytes }
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        decode_hex(s).map(|bytes| Self { bytes })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn short_id(&self) -> String {
        format!("space:{}", hex::encode(&self.bytes[..4]))
    }
}

impl From<SpaceKey> for String {
    fn from(key: SpaceKey) -> Self {
        key.to_hex()
    }
}

impl TryFrom<String> for SpaceKey {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl fmt::Debug for SpaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpaceKey({})", self.short_id())
    }
}

impl fmt::Display for SpaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_unique() {
        assert_ne!(ObjectId::random(), ObjectId::random());
        assert_ne!(SpaceKey::random(), SpaceKey::random());
    }

    #[test]
    fn hex_roundtrip() {
        let id = ObjectId::random();
        let parsed = ObjectId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = ObjectId::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(matches!(
            SpaceKey::from_hex("zz"),
            Err(TypeError::InvalidHex(_))
        ));
    }

    #[test]
    fn serializes_as_hex_string() {
        let id = ObjectId::from_raw([0xab; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn short_id_format() {
        let key = SpaceKey::from_raw([0; 32]);
        assert_eq!(key.short_id(), "space:00000000");
        assert_eq!(ObjectId::from_raw([1; 32]).short_id(), "01010101");
    }

    proptest::proptest! {
        #[test]
        fn hex_and_serde_roundtrip(bytes in proptest::prelude::any::<[u8; 32]>()) {
            let id = ObjectId::from_raw(bytes);
            let hex = id.to_hex();
            proptest::prop_assert_eq!(hex.len(), 64);
            proptest::prop_assert!(hex.starts_with(&id.short_id()));
            proptest::prop_assert_eq!(ObjectId::from_hex(&hex).unwrap(), id);

            let json = serde_json::to_string(&id).unwrap();
            proptest::prop_assert_eq!(serde_json::from_str::<ObjectId>(&json).unwrap(), id);

            let key = SpaceKey::from_raw(bytes);
            proptest::prop_assert_eq!(SpaceKey::from_hex(&key.to_hex()).unwrap(), key);
        }
    }
}
