//! Script system for payments and spends.
//!
//! Two standard script forms exist:
//! - Payment scripts (`OP_DUP OP_HASH256 <32-byte pubkey hash>
//!   OP_EQUALVERIFY OP_CHECKSIG`) name the recipient of an output.
//! - Signature scripts (`<64-byte signature> <32-byte public key>`)
//!   authorize an input.
//!
//! [`Script::extract_address`] recovers the payment address from either
//! form: directly from the embedded hash of a payment script, or by hashing
//! the public key of a signature script. Anything nonstandard yields `None`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Hash256;

/// Script opcodes (Bitcoin-compatible subset).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Duplicate the top stack item.
    OpDup = 0x76,
    /// BLAKE3 hash of the top stack item.
    OpHash256 = 0xa9,
    /// Pop two items and fail unless equal.
    OpEqualVerify = 0x88,
    /// Verify a signature against a public key.
    OpCheckSig = 0xac,
}

/// Direct push of 32 bytes.
const PUSH_32: u8 = 0x20;
/// Direct push of 64 bytes.
const PUSH_64: u8 = 0x40;

/// Byte length of a standard payment script.
const PAYMENT_SCRIPT_LEN: usize = 37;
/// Byte length of a standard signature script.
const SIGNATURE_SCRIPT_LEN: usize = 98;

/// A payment address: the BLAKE3 hash of the recipient's public key.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(Hash256);

impl Address {
    /// Create an address from a pubkey hash.
    pub fn from_pubkey_hash(pubkey_hash: Hash256) -> Self {
        Self(pubkey_hash)
    }

    /// Create an address from a raw public key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(Hash256(blake3::hash(public_key).into()))
    }

    /// The pubkey hash encoded in this address.
    pub fn pubkey_hash(&self) -> Hash256 {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A script: a raw sequence of opcodes and pushed data.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Script(Vec<u8>);

impl Script {
    /// Create a script from raw bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The empty script. Also the normalized form of any signature script.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build the standard payment script for an address:
    /// `OP_DUP OP_HASH256 <32-byte pubkey hash> OP_EQUALVERIFY OP_CHECKSIG`.
    pub fn pay_to_address(address: &Address) -> Self {
        let mut bytes = Vec::with_capacity(PAYMENT_SCRIPT_LEN);
        bytes.push(OpCode::OpDup as u8);
        bytes.push(OpCode::OpHash256 as u8);
        bytes.push(PUSH_32);
        bytes.extend_from_slice(address.pubkey_hash().as_bytes());
        bytes.push(OpCode::OpEqualVerify as u8);
        bytes.push(OpCode::OpCheckSig as u8);
        Self(bytes)
    }

    /// Build the standard signature script for an input:
    /// `<64-byte signature> <32-byte public key>`.
    pub fn spend_with(signature: &[u8; 64], public_key: &[u8; 32]) -> Self {
        let mut bytes = Vec::with_capacity(SIGNATURE_SCRIPT_LEN);
        bytes.push(PUSH_64);
        bytes.extend_from_slice(signature);
        bytes.push(PUSH_32);
        bytes.extend_from_slice(public_key);
        Self(bytes)
    }

    /// Raw script bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Script length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the script is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Best-effort recovery of the payment address this script commits to.
    ///
    /// Recognizes the two standard forms; returns `None` for anything else.
    pub fn extract_address(&self) -> Option<Address> {
        let b = &self.0;

        if b.len() == PAYMENT_SCRIPT_LEN
            && b[0] == OpCode::OpDup as u8
            && b[1] == OpCode::OpHash256 as u8
            && b[2] == PUSH_32
            && b[35] == OpCode::OpEqualVerify as u8
            && b[36] == OpCode::OpCheckSig as u8
        {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&b[3..35]);
            return Some(Address::from_pubkey_hash(Hash256(hash)));
        }

        if b.len() == SIGNATURE_SCRIPT_LEN && b[0] == PUSH_64 && b[65] == PUSH_32 {
            let mut key = [0u8; 32];
            key.copy_from_slice(&b[66..98]);
            return Some(Address::from_public_key(&key));
        }

        None
    }
}
