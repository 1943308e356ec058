//! Versioned binary snapshots of the row table.
//!
//! Layout (little-endian):
//!
//! ```text
//! u32   magic = 0xFECDB763
//! u64   last_height
//! repeat until end of input:
//!   u8     record kind = 0x42
//!   hash32 row key
//!   bytes  transaction encoding   (self-delimiting, skiff-core codec)
//!   u8     state                  (0 unconfirmed / 1 confirmed)
//!   i64    height_or_timestamp
//!   u8     need_check
//!   hash32 txid
//!   hash32 ntxid
//!   u8     malleated
//!   u8     master_confirm
//! ```
//!
//! The shared `height_or_timestamp` field carries the block height of a
//! confirmed row and the timestamp of an unconfirmed one, so both survive a
//! round trip. Unconfirmed rows older than the configured timeout are
//! omitted at write time.

use std::collections::HashMap;

use tracing::debug;

use skiff_core::{codec, CodecError, Hash256};

use crate::error::TxDbError;
use crate::row::{TxRow, TxState};

/// Current snapshot magic.
const SNAPSHOT_MAGIC: u32 = 0xFECD_B763;
/// Magic of the legacy format; recognized only to report it as outdated.
const LEGACY_MAGIC: u32 = 0x3EAB_61C3;
/// Record kind for one transaction row.
const RECORD_TX: u8 = 0x42;

/// Serialize the row table. Cannot fail; stale unconfirmed rows (older
/// than `unconfirmed_timeout` seconds at `now`) are dropped.
pub(crate) fn write_snapshot(
    rows: &HashMap<Hash256, TxRow>,
    last_height: u64,
    unconfirmed_timeout: u64,
    now: u64,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
    out.extend_from_slice(&last_height.to_le_bytes());

    for (key, row) in rows {
        if row.state == TxState::Unconfirmed
            && row.timestamp.saturating_add(unconfirmed_timeout) < now
        {
            debug!(txid = %row.txid, "purging stale unconfirmed tx from snapshot");
            continue;
        }

        let height_or_timestamp = match row.state {
            TxState::Confirmed => row.block_height,
            TxState::Unconfirmed => row.timestamp as i64,
        };

        out.push(RECORD_TX);
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(&codec::encode(&row.tx));
        out.push(row.state.wire_byte());
        out.extend_from_slice(&height_or_timestamp.to_le_bytes());
        out.push(row.need_check as u8);
        out.extend_from_slice(row.txid.as_bytes());
        out.extend_from_slice(row.ntxid.as_bytes());
        out.push(row.malleated as u8);
        out.push(row.master_confirm as u8);
    }

    out
}

/// Parse a snapshot into a fresh row table plus the stored tip height.
///
/// The caller swaps the result in only on success, so a malformed snapshot
/// never disturbs existing state. Confirmed rows come back with their
/// timestamp set to `now`; unconfirmed rows restore their timestamp from
/// the shared field and their height sentinel from the malleated flag.
pub(crate) fn read_snapshot(
    data: &[u8],
    now: u64,
) -> Result<(HashMap<Hash256, TxRow>, u64), TxDbError> {
    let mut reader = Reader::new(data);

    let magic = reader.read_u32()?;
    if magic != SNAPSHOT_MAGIC {
        return Err(if magic == LEGACY_MAGIC {
            TxDbError::OutdatedFormat
        } else {
            TxDbError::UnknownHeader
        });
    }

    let last_height = reader.read_u64()?;

    let mut rows = HashMap::new();
    while reader.remaining() > 0 {
        if reader.read_u8()? != RECORD_TX {
            return Err(TxDbError::UnknownRecord);
        }

        let key = reader.read_hash()?;
        let tx = reader.read_tx()?;
        let state = TxState::from_wire(reader.read_u8()?).ok_or(TxDbError::UnknownRecord)?;
        let height_or_timestamp = reader.read_i64()?;
        let need_check = reader.read_u8()? != 0;
        let txid = reader.read_hash()?;
        let ntxid = reader.read_hash()?;
        let malleated = reader.read_u8()? != 0;
        let master_confirm = reader.read_u8()? != 0;

        let (block_height, timestamp) = match state {
            TxState::Confirmed => (height_or_timestamp, now),
            TxState::Unconfirmed => (
                if malleated { -1 } else { 0 },
                height_or_timestamp.max(0) as u64,
            ),
        };

        rows.insert(
            key,
            TxRow {
                tx,
                txid,
                ntxid,
                state,
                block_height,
                timestamp,
                need_check,
                malleated,
                master_confirm,
            },
        );
    }

    Ok((rows, last_height))
}

/// Bounds-checked snapshot reader.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TxDbError> {
        if self.remaining() < n {
            return Err(TxDbError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, TxDbError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, TxDbError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, TxDbError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64, TxDbError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_hash(&mut self) -> Result<Hash256, TxDbError> {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(self.take(32)?);
        Ok(Hash256(bytes))
    }

    fn read_tx(&mut self) -> Result<skiff_core::Transaction, TxDbError> {
        let (tx, consumed) = codec::decode(&self.data[self.pos..]).map_err(|e| match e {
            CodecError::Truncated { .. } => TxDbError::Truncated,
            other => TxDbError::Codec(other),
        })?;
        self.pos += consumed;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::{Address, OutPoint, Script, Transaction, TxInput, TxOutput};

    const NOW: u64 = 1_700_000_000;

    fn sample_tx(tag: u8) -> Transaction {
        let addr = Address::from_pubkey_hash(Hash256([tag; 32]));
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    txid: Hash256([tag.wrapping_add(1); 32]),
                    index: 0,
                },
                script_sig: Script::spend_with(&[tag; 64], &[tag; 32]),
            }],
            outputs: vec![TxOutput {
                value: 100 + tag as u64,
                script_pubkey: Script::pay_to_address(&addr),
            }],
            lock_time: 0,
        }
    }

    fn confirmed_row(tag: u8, height: i64) -> TxRow {
        let tx = sample_tx(tag);
        let txid = codec::txid(&tx);
        let ntxid = codec::ntxid(&tx);
        TxRow {
            tx,
            txid,
            ntxid,
            state: TxState::Confirmed,
            block_height: height,
            timestamp: NOW,
            need_check: false,
            malleated: false,
            master_confirm: true,
        }
    }

    fn unconfirmed_row(tag: u8, timestamp: u64) -> TxRow {
        let tx = sample_tx(tag);
        let txid = codec::txid(&tx);
        let ntxid = codec::ntxid(&tx);
        TxRow {
            tx,
            txid,
            ntxid,
            state: TxState::Unconfirmed,
            block_height: 0,
            timestamp,
            need_check: false,
            malleated: false,
            master_confirm: false,
        }
    }

    fn table(rows: Vec<TxRow>) -> HashMap<Hash256, TxRow> {
        rows.into_iter().map(|r| (r.txid, r)).collect()
    }

    #[test]
    fn round_trip_preserves_rows_and_height() {
        let rows = table(vec![
            confirmed_row(0x10, 500),
            unconfirmed_row(0x20, NOW - 5),
        ]);
        let blob = write_snapshot(&rows, 1234, 60, NOW);
        let (loaded, height) = read_snapshot(&blob, NOW).unwrap();

        assert_eq!(height, 1234);
        assert_eq!(loaded, rows);
    }

    #[test]
    fn round_trip_preserves_flags() {
        let mut row = confirmed_row(0x10, 500);
        row.need_check = true;
        row.malleated = true;
        row.master_confirm = true;
        let rows = table(vec![row]);

        let blob = write_snapshot(&rows, 7, 60, NOW);
        let (loaded, _) = read_snapshot(&blob, NOW).unwrap();
        let loaded_row = loaded.values().next().unwrap();
        assert!(loaded_row.need_check);
        assert!(loaded_row.malleated);
        assert!(loaded_row.master_confirm);
    }

    #[test]
    fn unconfirmed_timestamp_survives_round_trip() {
        let rows = table(vec![unconfirmed_row(0x20, NOW - 42)]);
        let blob = write_snapshot(&rows, 0, 3600, NOW);
        let (loaded, _) = read_snapshot(&blob, NOW).unwrap();
        assert_eq!(loaded.values().next().unwrap().timestamp, NOW - 42);
    }

    #[test]
    fn malleated_unconfirmed_restores_sentinel_height() {
        let mut row = unconfirmed_row(0x20, NOW);
        row.block_height = -1;
        row.malleated = true;
        let rows = table(vec![row]);

        let blob = write_snapshot(&rows, 0, 3600, NOW);
        let (loaded, _) = read_snapshot(&blob, NOW).unwrap();
        assert_eq!(loaded.values().next().unwrap().block_height, -1);
    }

    #[test]
    fn stale_unconfirmed_rows_are_purged() {
        let rows = table(vec![
            confirmed_row(0x10, 500),
            unconfirmed_row(0x20, NOW - 120),
        ]);
        let blob = write_snapshot(&rows, 9, 60, NOW);
        let (loaded, _) = read_snapshot(&blob, NOW).unwrap();

        assert_eq!(loaded.len(), 1);
        assert!(loaded.values().all(|r| r.state == TxState::Confirmed));
    }

    #[test]
    fn stale_purge_is_exclusive_at_the_boundary() {
        // timestamp + timeout == now is not yet stale.
        let rows = table(vec![unconfirmed_row(0x20, NOW - 60)]);
        let blob = write_snapshot(&rows, 0, 60, NOW);
        let (loaded, _) = read_snapshot(&blob, NOW).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn confirmed_rows_never_go_stale() {
        let mut row = confirmed_row(0x10, 500);
        row.timestamp = 0;
        let rows = table(vec![row]);
        let blob = write_snapshot(&rows, 0, 60, NOW);
        let (loaded, _) = read_snapshot(&blob, NOW).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn empty_table_round_trips() {
        let blob = write_snapshot(&HashMap::new(), 55, 60, NOW);
        let (loaded, height) = read_snapshot(&blob, NOW).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(height, 55);
    }

    #[test]
    fn legacy_magic_reports_outdated() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&LEGACY_MAGIC.to_le_bytes());
        blob.extend_from_slice(&0u64.to_le_bytes());
        assert_eq!(
            read_snapshot(&blob, NOW).unwrap_err(),
            TxDbError::OutdatedFormat
        );
    }

    #[test]
    fn unknown_magic_reports_unknown_header() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        blob.extend_from_slice(&0u64.to_le_bytes());
        assert_eq!(
            read_snapshot(&blob, NOW).unwrap_err(),
            TxDbError::UnknownHeader
        );
    }

    #[test]
    fn unknown_record_kind_rejected() {
        let rows = table(vec![confirmed_row(0x10, 500)]);
        let mut blob = write_snapshot(&rows, 0, 60, NOW);
        blob[12] = 0x43; // first record kind byte
        assert_eq!(
            read_snapshot(&blob, NOW).unwrap_err(),
            TxDbError::UnknownRecord
        );
    }

    #[test]
    fn bad_state_byte_rejected() {
        let rows = table(vec![confirmed_row(0x10, 500)]);
        let mut blob = write_snapshot(&rows, 0, 60, NOW);
        // The state byte follows the record kind, key, and tx encoding.
        let tx_len = codec::encode(&sample_tx(0x10)).len();
        blob[12 + 1 + 32 + tx_len] = 9;
        assert_eq!(
            read_snapshot(&blob, NOW).unwrap_err(),
            TxDbError::UnknownRecord
        );
    }

    #[test]
    fn truncation_mid_record_rejected() {
        let rows = table(vec![confirmed_row(0x10, 500)]);
        let blob = write_snapshot(&rows, 0, 60, NOW);
        for cut in [13, 40, blob.len() - 1] {
            assert_eq!(
                read_snapshot(&blob[..cut], NOW).unwrap_err(),
                TxDbError::Truncated,
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn truncated_header_rejected() {
        assert_eq!(read_snapshot(&[], NOW).unwrap_err(), TxDbError::Truncated);
        let blob = SNAPSHOT_MAGIC.to_le_bytes();
        assert_eq!(
            read_snapshot(&blob, NOW).unwrap_err(),
            TxDbError::Truncated
        );
    }

    // --- proptest ---

    use proptest::prelude::*;

    fn arb_row() -> impl Strategy<Value = TxRow> {
        (
            any::<u8>(),
            any::<bool>(),
            1i64..1_000_000,
            0u64..2_000_000_000,
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(
                |(tag, confirmed, height, timestamp, need_check, malleated, master)| {
                    let tx = sample_tx(tag);
                    let txid = codec::txid(&tx);
                    let ntxid = codec::ntxid(&tx);
                    if confirmed {
                        TxRow {
                            tx,
                            txid,
                            ntxid,
                            state: TxState::Confirmed,
                            block_height: height,
                            timestamp: NOW,
                            need_check,
                            malleated,
                            master_confirm: master,
                        }
                    } else {
                        TxRow {
                            tx,
                            txid,
                            ntxid,
                            state: TxState::Unconfirmed,
                            block_height: if malleated { -1 } else { 0 },
                            timestamp,
                            need_check,
                            malleated,
                            master_confirm: false,
                        }
                    }
                },
            )
    }

    proptest! {
        #[test]
        fn arbitrary_tables_round_trip(
            rows in prop::collection::vec(arb_row(), 0..8),
            last_height in 0u64..10_000_000,
        ) {
            let rows = table(rows);
            // No purge: every timestamp is within the timeout window.
            let blob = write_snapshot(&rows, last_height, u64::MAX, NOW);
            let (loaded, height) = read_snapshot(&blob, NOW).unwrap();
            prop_assert_eq!(height, last_height);
            prop_assert_eq!(loaded, rows);
        }
    }
}
