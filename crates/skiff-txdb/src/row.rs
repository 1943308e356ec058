//! Per-transaction cache records.

use skiff_core::{Hash256, Transaction};

/// Confirmation state of a cached transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TxState {
    /// Seen on the network but not yet in a block.
    Unconfirmed,
    /// Included in a block.
    Confirmed,
}

impl TxState {
    /// Snapshot wire value.
    pub(crate) fn wire_byte(self) -> u8 {
        match self {
            TxState::Unconfirmed => 0,
            TxState::Confirmed => 1,
        }
    }

    /// Parse a snapshot wire value.
    pub(crate) fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TxState::Unconfirmed),
            1 => Some(TxState::Confirmed),
            _ => None,
        }
    }
}

/// One record per stored transaction.
///
/// `block_height` is meaningful only when `state` is confirmed; on an
/// unconfirmed row the sentinel `-1` marks "known malleated and currently
/// unconfirmed". `timestamp` is refreshed whenever the row is touched while
/// unconfirmed and drives the stale purge at snapshot time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TxRow {
    /// The transaction body.
    pub(crate) tx: Transaction,
    /// Hash of the full transaction encoding.
    pub(crate) txid: Hash256,
    /// Hash of the encoding with signature scripts blanked; shared across
    /// malleated siblings.
    pub(crate) ntxid: Hash256,
    /// Confirmation state.
    pub(crate) state: TxState,
    /// Block height when confirmed; `0` or the `-1` sentinel otherwise.
    pub(crate) block_height: i64,
    /// Unix seconds when the row was last touched while unconfirmed.
    pub(crate) timestamp: u64,
    /// Set by the fork detector; the row's confirmation should be
    /// re-verified by an external validator.
    pub(crate) need_check: bool,
    /// Set when two or more rows share this row's ntxid.
    pub(crate) malleated: bool,
    /// Set when this particular txid is the one observed confirming
    /// on-chain, as opposed to a sibling that inherited the confirmation.
    pub(crate) master_confirm: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_byte_round_trip() {
        for state in [TxState::Unconfirmed, TxState::Confirmed] {
            assert_eq!(TxState::from_wire(state.wire_byte()), Some(state));
        }
    }

    #[test]
    fn unknown_wire_byte_rejected() {
        assert_eq!(TxState::from_wire(2), None);
        assert_eq!(TxState::from_wire(0xFF), None);
    }
}
