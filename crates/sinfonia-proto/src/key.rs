//! WireGuard key material
//!
//! Keys are 32-byte Curve25519 values exchanged as standard padded base64,
//! the same text form `wg genkey` and `wg pubkey` produce.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

/// Length of a Curve25519 key in bytes
pub const KEY_LENGTH: usize = 32;

/// Key parsing errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyFormatError {
    #[error("Invalid base64 key: {0}")]
    Base64(String),

    #[error("Invalid key length: expected {KEY_LENGTH} bytes, got {0}")]
    Length(usize),
}

/// A single Curve25519 key (private, public or pre-shared)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key([u8; KEY_LENGTH]);

impl Key {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Decode a key from its base64 text form
    pub fn from_base64(encoded: &str) -> Result<Self, KeyFormatError> {
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| KeyFormatError::Base64(e.to_string()))?;

        let bytes: [u8; KEY_LENGTH] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| KeyFormatError::Length(decoded.len()))?;

        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl FromStr for Key {
    type Err = KeyFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.to_base64())
    }
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Key::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// A Curve25519 key pair used as the local side of a tunnel
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    private_key: Key,
    public_key: Key,
}

impl KeyPair {
    /// Generate a fresh key pair from the operating system RNG
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        Self::from_secret(secret)
    }

    /// Rebuild a key pair from a stored private key
    pub fn from_private_key(private_key: Key) -> Self {
        Self::from_secret(StaticSecret::from(*private_key.as_bytes()))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self {
            private_key: Key::from_bytes(secret.to_bytes()),
            public_key: Key::from_bytes(*public.as_bytes()),
        }
    }

    pub fn private_key(&self) -> &Key {
        &self.private_key
    }

    pub fn public_key(&self) -> &Key {
        &self.public_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_base64() {
        let key = Key::from_base64("HUN1dBaBCwl27MO4QayVEJrjBC1zh1thTTYpti7FWSY=").unwrap();
        assert_eq!(
            key.to_base64(),
            "HUN1dBaBCwl27MO4QayVEJrjBC1zh1thTTYpti7FWSY="
        );
    }

    #[test]
    fn test_key_invalid_base64() {
        let result = Key::from_base64("not base64!");
        assert!(matches!(result, Err(KeyFormatError::Base64(_))));
    }

    #[test]
    fn test_key_invalid_length() {
        // 3 bytes
        let result = Key::from_base64("AQID");
        assert_eq!(result, Err(KeyFormatError::Length(3)));
    }

    #[test]
    fn test_keypair_rebuild_from_private_key() {
        let pair = KeyPair::generate();
        let rebuilt = KeyPair::from_private_key(*pair.private_key());

        assert_eq!(pair, rebuilt);
        assert_eq!(pair.public_key(), rebuilt.public_key());
    }

    #[test]
    fn test_generated_keypairs_differ() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.private_key(), b.private_key());
    }

    #[test]
    fn test_keypair_debug_hides_private_key() {
        let pair = KeyPair::generate();
        let debug = format!("{:?}", pair);

        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&pair.private_key().to_base64()));
    }
}
