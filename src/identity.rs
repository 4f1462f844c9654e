//! Node identity
//!
//! Each node has an Ed25519 keypair. The private key lives in
//! `<data_dir>/node_key` and never leaves the host; the public key is the
//! creator key of every package this node publishes and the signer of every
//! vote block it appends.

use std::fs;
use std::io::Write;
use std::path::Path;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tracing::info;

use crate::error::LedgerError;
use crate::package::PublicKey;

/// File name of the node key under the data directory.
pub const KEY_FILE: &str = "node_key";

/// Load the key at `path`, or generate and save one if it doesn't exist.
pub fn load_or_generate(path: &Path) -> Result<SigningKey, LedgerError> {
    if path.exists() {
        return load(path);
    }

    let key = SigningKey::generate(&mut OsRng);
    save(&key, path)?;
    info!(public_key = %public_key(&key).short(), "Generated new node identity");
    Ok(key)
}

pub fn load(path: &Path) -> Result<SigningKey, LedgerError> {
    let bytes = fs::read(path)?;
    let key_bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        LedgerError::InvalidKey(format!(
            "{:?}: expected 32 bytes, got {}",
            path,
            bytes.len()
        ))
    })?;

    Ok(SigningKey::from_bytes(&key_bytes))
}

pub fn save(key: &SigningKey, path: &Path) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(path)?;
    file.write_all(key.as_bytes())?;
    Ok(())
}

/// Public half of `key` as the catalog sees it.
pub fn public_key(key: &SigningKey) -> PublicKey {
    PublicKey::new(key.verifying_key().to_bytes().to_vec())
}
