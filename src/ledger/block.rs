//! Ledger blocks and the vote transaction format

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use super::{KEY_CONTENT_HASH, KEY_CREATOR, KEY_NAME, VOTE_BLOCK_TYPE};
use crate::error::LedgerError;
use crate::package::{is_safe_component, Identifier, PublicKey};

/// Transaction payload: an ordered key/value map, so the signed bytes are
/// deterministic.
pub type Transaction = BTreeMap<String, TxValue>;

/// A typed transaction value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TxValue {
    Bytes(#[serde(with = "hex_bytes")] Vec<u8>),
    Text(String),
    Integer(i64),
}

impl TxValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            TxValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TxValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Build the transaction of a vote for `id` under `name`.
pub fn vote_transaction(id: &Identifier, name: &str) -> Transaction {
    let mut tx = Transaction::new();
    tx.insert(KEY_CREATOR.to_string(), TxValue::Bytes(id.creator.as_bytes().to_vec()));
    tx.insert(KEY_CONTENT_HASH.to_string(), TxValue::Text(id.content_hash.clone()));
    tx.insert(KEY_NAME.to_string(), TxValue::Text(name.to_string()));
    tx
}

/// One signed entry on a peer's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub block_type: String,
    pub transaction: Transaction,
    #[serde(rename = "public_key")]
    pub signer: PublicKey,
    pub sequence_number: u64,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// The bytes covered by a block signature.
#[derive(Serialize)]
struct SignedFields<'a> {
    block_type: &'a str,
    transaction: &'a Transaction,
    signer: &'a PublicKey,
    sequence_number: u64,
}

impl Block {
    /// Sign a new block as `key`.
    pub fn new_signed(
        key: &SigningKey,
        block_type: &str,
        transaction: Transaction,
        sequence_number: u64,
    ) -> Result<Self, LedgerError> {
        let signer = crate::identity::public_key(key);
        let payload = signing_bytes(block_type, &transaction, &signer, sequence_number)?;
        let signature = key.sign(&payload).to_bytes().to_vec();

        Ok(Self {
            block_type: block_type.to_string(),
            transaction,
            signer,
            sequence_number,
            signature,
        })
    }

    /// Check the signature against the signer key.
    pub fn verify(&self) -> Result<(), LedgerError> {
        let invalid = || LedgerError::InvalidSignature {
            signer: self.signer.short(),
            sequence: self.sequence_number,
        };

        let key_bytes: [u8; 32] = self
            .signer
            .as_bytes()
            .try_into()
            .map_err(|_| LedgerError::InvalidKey(self.signer.to_hex()))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| LedgerError::InvalidKey(e.to_string()))?;
        let signature = Signature::from_slice(&self.signature).map_err(|_| invalid())?;

        let payload = signing_bytes(
            &self.block_type,
            &self.transaction,
            &self.signer,
            self.sequence_number,
        )?;
        verifying_key.verify(&payload, &signature).map_err(|_| invalid())
    }

    /// A vote block carries exactly `creator` (bytes), `content_hash` (text)
    /// and `name` (text), and nothing else. Both text fields must be single
    /// path components.
    pub fn is_valid_vote_block(&self) -> bool {
        let safe_text = |key: &str| {
            matches!(self.transaction.get(key), Some(TxValue::Text(s)) if is_safe_component(s))
        };

        self.block_type == VOTE_BLOCK_TYPE
            && self.transaction.len() == 3
            && matches!(self.transaction.get(KEY_CREATOR), Some(TxValue::Bytes(_)))
            && safe_text(KEY_CONTENT_HASH)
            && safe_text(KEY_NAME)
    }

    /// Package identifier and name this vote is for; `None` unless the block
    /// is a valid vote block.
    pub fn vote_subject(&self) -> Option<(Identifier, String)> {
        if !self.is_valid_vote_block() {
            return None;
        }

        let creator = self.transaction.get(KEY_CREATOR)?.as_bytes()?;
        let content_hash = self.transaction.get(KEY_CONTENT_HASH)?.as_text()?;
        let name = self.transaction.get(KEY_NAME)?.as_text()?;

        Some((
            Identifier::new(PublicKey::new(creator.to_vec()), content_hash),
            name.to_string(),
        ))
    }
}

fn signing_bytes(
    block_type: &str,
    transaction: &Transaction,
    signer: &PublicKey,
    sequence_number: u64,
) -> Result<Vec<u8>, LedgerError> {
    Ok(serde_json::to_vec(&SignedFields {
        block_type,
        transaction,
        signer,
        sequence_number,
    })?)
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
