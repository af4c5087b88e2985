//! Wallet signing for authenticated CLOB requests.
//!
//! This module provides:
//! - Wallet kinds accepted by the exchange
//! - Signers created from hex private keys, cached per key
//! - Auth headers and order signatures

use std::collections::HashMap;
use std::sync::RwLock;

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use once_cell::sync::Lazy;
use strum::Display;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{ExecutionError, ValidationError};

/// Signers keyed by a hash of the private key, so raw keys are never map keys.
static SIGNER_CACHE: Lazy<RwLock<HashMap<u64, PrivateKeySigner>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn key_hash(private_key: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    private_key.hash(&mut hasher);
    hasher.finish()
}

/// Wallet kind behind `POLYMARKET_SIGNATURE_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum WalletKind {
    /// Plain externally owned account.
    Eoa = 0,
    /// Magic.link proxy wallet.
    Proxy = 1,
    /// Gnosis Safe.
    GnosisSafe = 2,
}

impl TryFrom<u8> for WalletKind {
    type Error = ValidationError;

    fn try_from(sig_type: u8) -> Result<Self, Self::Error> {
        match sig_type {
            0 => Ok(WalletKind::Eoa),
            1 => Ok(WalletKind::Proxy),
            2 => Ok(WalletKind::GnosisSafe),
            other => Err(ValidationError::InvalidConfig {
                field: "POLYMARKET_SIGNATURE_TYPE",
                reason: format!("unknown signature type {other}, expected 0, 1 or 2"),
            }),
        }
    }
}

/// Create a signer from a hex private key, with or without `0x`.
pub fn create_signer(private_key: &str) -> Result<PrivateKeySigner, ExecutionError> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = hex::decode(key)
        .map_err(|e| ExecutionError::SigningError(format!("invalid private key hex: {e}")))?;

    let key_bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        ExecutionError::SigningError(format!("private key must be 32 bytes, got {}", bytes.len()))
    })?;

    PrivateKeySigner::from_bytes(&key_bytes.into())
        .map_err(|e| ExecutionError::SigningError(format!("failed to create signer: {e}")))
}

/// Cached signer for `private_key`, created on first use.
pub fn cached_signer(private_key: &str) -> Result<PrivateKeySigner, ExecutionError> {
    let hash = key_hash(private_key);

    {
        let cache = SIGNER_CACHE
            .read()
            .map_err(|e| ExecutionError::SigningError(format!("signer cache poisoned: {e}")))?;
        if let Some(signer) = cache.get(&hash) {
            return Ok(signer.clone());
        }
    }

    let signer = create_signer(private_key)?;
    let mut cache = SIGNER_CACHE
        .write()
        .map_err(|e| ExecutionError::SigningError(format!("signer cache poisoned: {e}")))?;
    debug!("caching new signer");
    Ok(cache.entry(hash).or_insert(signer).clone())
}

/// Checksummed wallet address for a private key.
pub fn address_from_private_key(private_key: &str) -> Result<String, ExecutionError> {
    let signer = cached_signer(private_key)?;
    Ok(format!("{:?}", signer.address()))
}

/// Sign arbitrary bytes, returning a `0x` hex signature.
pub async fn sign_message(private_key: &str, message: &[u8]) -> Result<String, ExecutionError> {
    let signer = cached_signer(private_key)?;
    let signature = signer
        .sign_message(message)
        .await
        .map_err(|e| ExecutionError::SigningError(format!("failed to sign message: {e}")))?;
    Ok(format!("0x{}", hex::encode(signature.as_bytes())))
}

/// CLOB auth headers: the wallet signs a millisecond timestamp.
pub async fn generate_auth_headers(
    private_key: &str,
    wallet: WalletKind,
) -> Result<Vec<(String, String)>, ExecutionError> {
    let address = address_from_private_key(private_key)?;
    let timestamp = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).to_string();
    let signature = sign_message(private_key, format!("polymarket:{timestamp}").as_bytes()).await?;

    debug!(%address, %wallet, "generated auth headers");

    Ok(vec![
        ("POLY_ADDRESS".to_string(), address),
        ("POLY_SIGNATURE".to_string(), signature),
        ("POLY_TIMESTAMP".to_string(), timestamp),
        ("POLY_NONCE".to_string(), "0".to_string()),
    ])
}
