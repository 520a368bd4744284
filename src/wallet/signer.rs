//! Transaction signer
//!
//! SECURITY: This is the ONLY place where private keys exist.
//! - Key material is read into a `SecretString` and parsed directly into
//!   alloy's `PrivateKeySigner`, which handles the crypto
//! - Keys are never serialized and never logged
//! - Everything outside this module sees only the public address and the
//!   `EthereumWallet` signing handle

use crate::{Error, Result};
use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use secrecy::{ExposeSecret, SecretString};

/// Holds the signing key for send-capable pipeline runs.
pub struct Signer {
    address: Address,
    wallet: EthereumWallet,
}

impl Signer {
    /// Loads the key from an environment variable (hex encoded, with or
    /// without 0x prefix).
    pub fn from_env(var_name: &str) -> Result<Self> {
        let key = SecretString::from(std::env::var(var_name).map_err(|_| {
            Error::Wallet(format!(
                "environment variable {} not set; required for signing",
                var_name
            ))
        })?);
        Self::from_secret(&key)
    }

    pub fn from_secret(key: &SecretString) -> Result<Self> {
        let key_hex = key.expose_secret();
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| Error::Wallet(format!("invalid private key: {}", e)))?;

        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        Ok(Self { address, wallet })
    }

    /// Public address (safe to share)
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signing handle for alloy providers. Exposes signing operations only,
    /// never the raw key.
    pub fn wallet(&self) -> &EthereumWallet {
        &self.wallet
    }
}

// Manual Debug so key material can never leak through formatting
impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known test vector key (never fund this account)
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn derives_expected_address() {
        let signer = Signer::from_secret(&SecretString::from(TEST_KEY)).unwrap();
        assert_eq!(
            format!("{:?}", signer.address()).to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn debug_redacts_key() {
        let signer = Signer::from_secret(&SecretString::from(TEST_KEY)).unwrap();
        let debug_str = format!("{:?}", signer);
        assert!(!debug_str.contains("ac0974bec"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn rejects_garbage_key() {
        let err = Signer::from_secret(&SecretString::from("not-a-key")).unwrap_err();
        assert!(matches!(err, Error::Wallet(_)));
    }
}
