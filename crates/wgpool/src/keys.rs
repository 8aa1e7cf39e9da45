//! WireGuard keys and key generation.
//!
//! Keys are 32-byte Curve25519 values written as base64. Generation is a
//! capability ([`KeyGenerator`]) so the rest of the crate never shells out
//! directly: [`WgTool`] delegates to `wg genkey` / `wg pubkey`, and
//! [`NativeKeys`] computes keys in process.

use std::fmt;
use std::io;
use std::str::FromStr;

use base64::prelude::*;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::command::CommandRunner;
use crate::error::{Error, Result};

/// Size of a WireGuard key in bytes.
pub const WG_KEY_LEN: usize = 32;

/// A WireGuard key (private, public or preshared).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WgKey([u8; WG_KEY_LEN]);

impl WgKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; WG_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; WG_KEY_LEN] {
        &self.0
    }

    /// Base64 text form.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }
}

impl FromStr for WgKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = BASE64_STANDARD
            .decode(s.trim())
            .map_err(|e| Error::InvalidKey(format!("invalid base64: {}", e)))?;

        if bytes.len() != WG_KEY_LEN {
            return Err(Error::InvalidKey(format!(
                "invalid key length: expected {}, got {}",
                WG_KEY_LEN,
                bytes.len()
            )));
        }

        let mut key = [0u8; WG_KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }
}

impl fmt::Display for WgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

// Never print key material through Debug.
impl fmt::Debug for WgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WgKey(..)")
    }
}

/// A private key and the public key derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// Private key.
    pub private: WgKey,
    /// Public key.
    pub public: WgKey,
}

/// Source of WireGuard keys.
#[allow(async_fn_in_trait)]
pub trait KeyGenerator {
    /// Generate a fresh keypair.
    async fn generate_keypair(&self) -> Result<KeyPair>;

    /// Derive the public key for a private key.
    async fn derive_public_key(&self, private: &WgKey) -> Result<WgKey>;
}

/// Key generation through the `wg` tool.
#[derive(Debug, Clone, Copy)]
pub struct WgTool {
    runner: CommandRunner,
}

impl WgTool {
    /// Create a generator that runs `wg` with the given runner.
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    async fn wg(&self, args: &[&str], stdin: Option<&str>) -> Result<WgKey> {
        let out = self
            .runner
            .run_checked("wg", args, stdin)
            .await
            .map_err(|e| match e {
                Error::Io(io) if io.kind() == io::ErrorKind::NotFound => {
                    Error::KeygenUnavailable("wg not found in PATH".to_string())
                }
                Error::Io(io) => Error::KeygenUnavailable(io.to_string()),
                other => other,
            })?;
        out.parse()
            .map_err(|e: Error| Error::KeygenUnavailable(format!("wg {}: {}", args.join(" "), e)))
    }
}

impl KeyGenerator for WgTool {
    async fn generate_keypair(&self) -> Result<KeyPair> {
        let private = self.wg(&["genkey"], None).await?;
        let public = self.derive_public_key(&private).await?;
        Ok(KeyPair { private, public })
    }

    async fn derive_public_key(&self, private: &WgKey) -> Result<WgKey> {
        self.wg(&["pubkey"], Some(&private.to_base64())).await
    }
}

/// In-process key generation with x25519.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeKeys;

impl NativeKeys {
    /// Generate a clamped Curve25519 private key.
    pub fn private_key() -> WgKey {
        let mut key = [0u8; WG_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);

        // Clamp for Curve25519 (this is what WireGuard expects)
        key[0] &= 248;
        key[31] &= 127;
        key[31] |= 64;

        WgKey(key)
    }

    /// Derive a public key without any I/O.
    pub fn public_key(private: &WgKey) -> WgKey {
        let secret = StaticSecret::from(private.0);
        WgKey(*PublicKey::from(&secret).as_bytes())
    }
}

impl KeyGenerator for NativeKeys {
    async fn generate_keypair(&self) -> Result<KeyPair> {
        let private = Self::private_key();
        Ok(KeyPair {
            public: Self::public_key(&private),
            private,
        })
    }

    async fn derive_public_key(&self, private: &WgKey) -> Result<WgKey> {
        Ok(Self::public_key(private))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7748 section 6.1 test vector (Alice).
    const ALICE_PRIVATE: [u8; 32] = [
        0x77, 0x07, 0x6d, 0x0a, 0x73, 0x18, 0xa5, 0x7d, 0x3c, 0x16, 0xc1, 0x72, 0x51, 0xb2, 0x66,
        0x45, 0xdf, 0x4c, 0x2f, 0x87, 0xeb, 0xc0, 0x99, 0x2a, 0xb1, 0x77, 0xfb, 0xa5, 0x1d, 0xb9,
        0x2c, 0x2a,
    ];
    const ALICE_PUBLIC: [u8; 32] = [
        0x85, 0x20, 0xf0, 0x09, 0x89, 0x30, 0xa7, 0x54, 0x74, 0x8b, 0x7d, 0xdc, 0xb4, 0x3e, 0xf7,
        0x5a, 0x0d, 0xbf, 0x3a, 0x0d, 0x26, 0x38, 0x1a, 0xf4, 0xeb, 0xa4, 0xa9, 0x8e, 0xaa, 0x9b,
        0x4e, 0x6a,
    ];

    #[test]
    fn test_key_text_round_trip() {
        let key = WgKey::from_bytes(ALICE_PUBLIC);
        let text = key.to_base64();
        assert_eq!(text.len(), 44);
        assert_eq!(text.parse::<WgKey>().unwrap(), key);
        assert_eq!(key.to_string(), text);
    }

    #[test]
    fn test_key_parse_errors() {
        assert!(matches!(
            "not base64!".parse::<WgKey>(),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!("YWJj".parse::<WgKey>(), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_debug_hides_material() {
        let key = WgKey::from_bytes(ALICE_PRIVATE);
        assert_eq!(format!("{:?}", key), "WgKey(..)");
    }

    #[test]
    fn test_native_public_key_matches_rfc7748() {
        let public = NativeKeys::public_key(&WgKey::from_bytes(ALICE_PRIVATE));
        assert_eq!(public.as_bytes(), &ALICE_PUBLIC);
    }

    #[tokio::test]
    async fn test_native_keypair_is_clamped_and_consistent() {
        let pair = NativeKeys.generate_keypair().await.unwrap();
        let bytes = pair.private.as_bytes();
        assert_eq!(bytes[0] & 7, 0);
        assert_eq!(bytes[31] & 128, 0);
        assert_eq!(bytes[31] & 64, 64);
        assert_eq!(
            NativeKeys.derive_public_key(&pair.private).await.unwrap(),
            pair.public
        );
    }
}
