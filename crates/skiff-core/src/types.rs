//! Core transaction types.
//!
//! Transactions are Bitcoin-style: inputs spend outpoints of prior
//! transactions and carry a signature script; outputs carry a value and a
//! payment script. Two identifiers exist for every transaction (see
//! [`codec`](crate::codec)): the `txid` over the full encoding, and the
//! `ntxid` over the encoding with all signature scripts blanked. Rewriting
//! signatures (malleation) changes the former but never the latter.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::script::Script;

/// A 32-byte hash value.
///
/// Used for transaction IDs, normalized transaction IDs, and pubkey hashes
/// (all BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    /// The outpoint being spent.
    pub previous_output: OutPoint,
    /// Signature script authorizing the spend. Opaque signature material;
    /// blanked when computing the normalized transaction ID.
    pub script_sig: Script,
}

/// A transaction output, creating a new spendable coin.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    /// Value in base units.
    pub value: u64,
    /// Payment script naming the recipient.
    pub script_pubkey: Script,
}

/// A transaction transferring value between addresses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Protocol version.
    pub version: u32,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Address;

    #[test]
    fn hash256_zero_is_zero() {
        let h = Hash256::ZERO;
        assert!(h.is_zero());
        assert_eq!(h, Hash256::default());
    }

    #[test]
    fn hash256_nonzero_is_not_zero() {
        assert!(!Hash256([1; 32]).is_zero());
    }

    #[test]
    fn hash256_display_hex() {
        let h = Hash256([0xAB; 32]);
        let s = format!("{h}");
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(&s[0..2], "ab");
    }

    #[test]
    fn hash256_from_bytes() {
        let bytes = [42u8; 32];
        let h = Hash256::from_bytes(bytes);
        assert_eq!(h.as_bytes(), &bytes);
        assert_eq!(Hash256::from(bytes), h);
    }

    #[test]
    fn outpoint_display() {
        let op = OutPoint {
            txid: Hash256([0xFF; 32]),
            index: 3,
        };
        let s = format!("{op}");
        assert!(s.ends_with(":3"));
        assert!(s.starts_with("ff"));
    }

    #[test]
    fn outpoint_usable_as_set_key() {
        use std::collections::HashSet;
        let a = OutPoint {
            txid: Hash256([1; 32]),
            index: 0,
        };
        let b = OutPoint {
            txid: Hash256([1; 32]),
            index: 1,
        };
        let mut set = HashSet::new();
        assert!(set.insert(a));
        assert!(set.insert(b));
        assert!(!set.insert(a));
    }

    #[test]
    fn transaction_construction() {
        let addr = Address::from_pubkey_hash(Hash256([0xAA; 32]));
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    txid: Hash256([0x11; 32]),
                    index: 0,
                },
                script_sig: Script::empty(),
            }],
            outputs: vec![TxOutput {
                value: 100,
                script_pubkey: Script::pay_to_address(&addr),
            }],
            lock_time: 0,
        };
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs[0].script_pubkey.extract_address(), Some(addr));
    }
}
