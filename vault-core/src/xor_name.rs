use crate::error::{Result, VaultError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub const XOR_NAME_LEN: usize = 32;

/// A 256-bit name in the XOR address space shared by vaults and data.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct XorName(pub [u8; XOR_NAME_LEN]);

impl XorName {
    /// SHA256 of the given content.
    pub fn from_content(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        XorName(hasher.finalize().into())
    }

    /// A fresh name not derived from any content, used for vault and client identities.
    pub fn random() -> Self {
        XorName(rand::random())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value)
            .map_err(|e| VaultError::InvalidMessage(format!("invalid name hex: {}", e)))?;
        let array: [u8; XOR_NAME_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            VaultError::InvalidMessage(format!("invalid name length: {}", bytes.len()))
        })?;
        Ok(XorName(array))
    }

    /// Compares the distances of `lhs` and `rhs` to `self`.
    pub fn cmp_distance(&self, lhs: &XorName, rhs: &XorName) -> Ordering {
        for i in 0..XOR_NAME_LEN {
            let lhs_dist = lhs.0[i] ^ self.0[i];
            let rhs_dist = rhs.0[i] ^ self.0[i];
            if lhs_dist != rhs_dist {
                return lhs_dist.cmp(&rhs_dist);
            }
        }
        Ordering::Equal
    }

    /// Returns `true` if `lhs` is strictly closer to `self` than `rhs`.
    pub fn closer(&self, lhs: &XorName, rhs: &XorName) -> bool {
        self.cmp_distance(lhs, rhs) == Ordering::Less
    }
}

impl fmt::Debug for XorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell names apart in logs.
        write!(f, "{:02x}{:02x}{:02x}..", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Display for XorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for XorName {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for XorName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for XorName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        XorName::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_with_first_byte(byte: u8) -> XorName {
        let mut bytes = [0u8; XOR_NAME_LEN];
        bytes[0] = byte;
        XorName(bytes)
    }

    #[test]
    fn test_closer() {
        let target = name_with_first_byte(0b0000_0000);
        let near = name_with_first_byte(0b0000_0001);
        let far = name_with_first_byte(0b1000_0000);

        assert!(target.closer(&near, &far));
        assert!(!target.closer(&far, &near));
        assert!(!target.closer(&near, &near));
        assert_eq!(target.cmp_distance(&near, &far), Ordering::Less);
    }

    #[test]
    fn test_hex_roundtrip_and_serde() {
        let name = XorName::from_content(b"hello world");
        assert_eq!(name.to_hex().len(), 64);
        assert_eq!(XorName::from_hex(&name.to_hex()).unwrap(), name);

        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, format!("\"{}\"", name.to_hex()));
        let parsed: XorName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, name);

        assert!(XorName::from_hex("abcd").is_err());
        assert!("zz".parse::<XorName>().is_err());
    }

    #[test]
    fn test_random_names_differ() {
        assert_ne!(XorName::random(), XorName::random());
    }
}
