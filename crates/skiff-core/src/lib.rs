//! # skiff-core
//! Foundation types for the Skiff wallet: transactions, scripts, and the
//! wire codec.
//!
//! # Modules
//!
//! - [`types`] — `Hash256`, `OutPoint`, transaction structures
//! - [`script`] — payment/signature scripts and address extraction
//! - [`codec`] — wire encoding, `txid` and `ntxid` computation
//! - [`error`] — `CodecError` enum

pub mod codec;
pub mod error;
pub mod script;
pub mod types;

// Re-exports for convenient access
pub use error::CodecError;
pub use script::{Address, Script};
pub use types::{Hash256, OutPoint, Transaction, TxInput, TxOutput};
