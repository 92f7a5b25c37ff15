//! Domain models shared across the indexer.
//!
//! Everything here is chain-agnostic data: canonical addresses, event
//! selectors, the block/transaction/event shapes the handlers consume, and
//! the checkpoint records the block loop persists.

use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

use crate::error::{RegistryError, RegistryResult};

/// Metadata key under which the last fully indexed block number is stored.
pub const METADATA_LAST_INDEXED_BLOCK: &str = "last_indexed_block";

// =============================================================================
// Address
// =============================================================================

/// A canonical contract address.
///
/// Addresses arrive in many spellings (mixed case, short hex, with or
/// without leading zeros). All comparisons inside the indexer go through
/// this newtype, which stores exactly one spelling: lowercase hex,
/// left-padded to 64 nibbles, with a `0x` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parses and canonicalizes an address from any accepted hex spelling.
    pub fn parse(raw: &str) -> RegistryResult<Self> {
        let hex_part = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")).unwrap_or(raw);
        if hex_part.is_empty() || hex_part.len() > 64 {
            return Err(RegistryError::InvalidAddress {
                address: raw.to_string(),
                reason: format!("expected 1..=64 hex digits, got {}", hex_part.len()),
            });
        }
        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RegistryError::InvalidAddress {
                address: raw.to_string(),
                reason: "non-hex character".to_string(),
            });
        }
        Ok(Self(format!("0x{:0>64}", hex_part.to_lowercase())))
    }

    /// The canonical `0x`-prefixed, 64-nibble, lowercase form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

// =============================================================================
// Selector
// =============================================================================

/// A 250-bit event selector, stored in canonical hex form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector(String);

impl Selector {
    /// Computes the selector for an event name.
    ///
    /// Keccak-256 of the ASCII name, with the top six bits masked off so
    /// the result fits in a field element.
    pub fn from_event_name(name: &str) -> Self {
        let mut hasher = Keccak::v256();
        hasher.update(name.as_bytes());
        let mut out = [0u8; 32];
        hasher.finalize(&mut out);
        out[0] &= 0x03;
        Self(format!("0x{}", hex::encode(out)))
    }

    /// Wraps an already-canonical selector value taken from chain data.
    pub fn from_raw(raw: &str) -> RegistryResult<Self> {
        let hex_part = raw.strip_prefix("0x").unwrap_or(raw);
        if hex_part.is_empty() || hex_part.len() > 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RegistryError::InvalidAddress {
                address: raw.to_string(),
                reason: "invalid selector hex".to_string(),
            });
        }
        Ok(Self(format!("0x{:0>64}", hex_part.to_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Chain data
// =============================================================================

/// Transaction kind, as reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    /// Contract deployment.
    Deploy,
    /// Contract invocation.
    Invoke,
}

/// A transaction inside a fetched block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash.
    pub hash: String,
    /// Transaction kind.
    #[serde(rename = "type")]
    pub tx_type: TxType,
    /// Address of the contract the transaction targets (or deploys).
    pub contract_address: Option<String>,
}

/// A single event emitted during a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Emitting contract address (raw spelling from the node).
    pub from_address: String,
    /// Event keys; the first key is the event selector.
    pub keys: Vec<String>,
    /// Event payload.
    pub data: Vec<String>,
}

/// Per-transaction receipt carrying the emitted events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Hash of the transaction this receipt belongs to.
    pub transaction_hash: String,
    /// Events emitted by the transaction, in emission order.
    pub events: Vec<Event>,
}

/// A full block as fetched from the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Block height.
    pub block_number: u64,
    /// Block hash.
    pub block_hash: String,
    /// Unix timestamp of the block.
    pub timestamp: u64,
    /// Transactions, in block order.
    pub transactions: Vec<Transaction>,
    /// Receipts for `transactions`, paired by transaction hash at
    /// dispatch time; order is not significant.
    pub transaction_receipts: Vec<Receipt>,
}

// =============================================================================
// Checkpoints
// =============================================================================

/// One unit of indexing progress: a contract of interest was seen at a
/// block.
///
/// Persisted so that a later run (or a template instantiated mid-stream)
/// can replay relevant history without rescanning every block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Block at which the contract was active.
    pub block_number: u64,
    /// Canonical contract address.
    pub contract_address: Address,
}

impl CheckpointRecord {
    pub fn new(block_number: u64, contract_address: Address) -> Self {
        Self {
            block_number,
            contract_address,
        }
    }
}
