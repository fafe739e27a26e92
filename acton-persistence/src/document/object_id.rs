//! Store-native 12-byte object identifiers
//!
//! Layout (big-endian): 4-byte seconds since the Unix epoch, 5-byte value
//! unique to this process, 3-byte counter starting at a random value. Ids
//! created by one process therefore sort by creation second and never
//! collide within a process.
//!
//! Object ids render as 24 lowercase hex characters and serialize in
//! extended-JSON form:
//!
//! ```rust
//! use acton_persistence::document::ObjectId;
//! use std::str::FromStr;
//!
//! let id = ObjectId::from_str("65a1f0c2e4b0a1b2c3d4e5f6").unwrap();
//! assert_eq!(
//!     serde_json::to_value(id).unwrap(),
//!     serde_json::json!({"$oid": "65a1f0c2e4b0a1b2c3d4e5f6"})
//! );
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const COUNTER_MASK: u32 = 0x00FF_FFFF;

static PROCESS_UNIQUE: Lazy<[u8; 5]> = Lazy::new(|| {
    let random = uuid::Uuid::new_v4();
    let mut bytes = [0u8; 5];
    bytes.copy_from_slice(&random.as_bytes()[..5]);
    bytes
});

static COUNTER: Lazy<AtomicU32> = Lazy::new(|| {
    let random = uuid::Uuid::new_v4();
    let b = random.as_bytes();
    AtomicU32::new(u32::from_be_bytes([0, b[0], b[1], b[2]]))
});

/// A 12-byte store-native identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a new object id
    #[must_use]
    pub fn new() -> Self {
        let seconds = Utc::now().timestamp().clamp(0, i64::from(u32::MAX)) as u32;
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(bytes)
    }

    /// Build an object id from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Lowercase hex rendering
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creation second encoded in the id
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        let seconds = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        Utc.timestamp_opt(i64::from(seconds), 0)
            .single()
            .unwrap_or_default()
    }

    /// Parse a 24-character hex string
    pub fn parse_str(s: &str) -> Result<Self, ObjectIdError> {
        if s.len() != 24 {
            return Err(ObjectIdError::InvalidLength(s.len()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId(\"{}\")", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$oid", &self.to_hex())?;
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ObjectIdRepr {
    Hex(String),
    Extended {
        #[serde(rename = "$oid")]
        oid: String,
    },
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = match ObjectIdRepr::deserialize(deserializer)? {
            ObjectIdRepr::Hex(hex) => hex,
            ObjectIdRepr::Extended { oid } => oid,
        };
        Self::parse_str(&hex).map_err(serde::de::Error::custom)
    }
}

/// Error type for object id parsing
#[derive(Debug, thiserror::Error)]
pub enum ObjectIdError {
    /// The string is not 24 characters long
    #[error("object id must be 24 hex characters, got {0}")]
    InvalidLength(usize),

    /// The string contains non-hex characters
    #[error("invalid object id: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_ids_are_unique_and_ordered_within_process() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
        assert_eq!(a.bytes()[4..9], b.bytes()[4..9]);
    }

    #[test]
    fn test_hex_round_trip() {
        let id = ObjectId::new();
        let parsed = ObjectId::from_str(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.to_string().len(), 24);
    }

    #[test]
    fn test_timestamp_is_creation_second() {
        let before = Utc::now().timestamp();
        let id = ObjectId::new();
        let after = Utc::now().timestamp();
        let ts = id.timestamp().timestamp();
        assert!(ts >= before && ts <= after);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        match ObjectId::parse_str("abc") {
            Err(ObjectIdError::InvalidLength(3)) => {}
            other => panic!("expected InvalidLength, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let result = ObjectId::parse_str("zzzzzzzzzzzzzzzzzzzzzzzz");
        assert!(matches!(result, Err(ObjectIdError::InvalidHex(_))));
    }

    #[test]
    fn test_deserialize_both_forms() {
        let hex = "65a1f0c2e4b0a1b2c3d4e5f6";
        let from_ext: ObjectId = serde_json::from_value(json!({"$oid": hex})).unwrap();
        let from_str: ObjectId = serde_json::from_value(json!(hex)).unwrap();
        assert_eq!(from_ext, from_str);
    }

    #[test]
    fn test_debug_format() {
        let id = ObjectId::from_bytes([0xab; 12]);
        assert_eq!(format!("{:?}", id), "ObjectId(\"abababababababababababab\")");
    }
}
