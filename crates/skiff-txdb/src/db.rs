//! The transaction database.
//!
//! Stores one [`TxRow`] per txid, tracks the chain tip height it has been
//! told about, clusters malleated siblings by ntxid, and answers UTXO and
//! history queries for the wallet. A single internal mutex guards the row
//! table and tip height; every public operation locks on entry and
//! completes synchronously, so operations are linearizable against one
//! another.
//!
//! The `foreach_*` callbacks run under that lock: re-entering the database
//! from a callback deadlocks. Callbacks receive the txid by value and must
//! copy out anything else they need via a later query.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use skiff_core::{codec, Address, Hash256, OutPoint, Transaction};

use crate::analyzer::{SafetyAnalyzer, SpendSets};
use crate::error::TxDbError;
use crate::row::{TxRow, TxState};
use crate::snapshot;

/// One spendable output belonging to the queried addresses.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct UtxoInfo {
    /// The output's location in the transaction graph.
    pub outpoint: OutPoint,
    /// Value in base units.
    pub value: u64,
}

/// The mutex-guarded interior: the row table and the tip height.
struct Table {
    rows: HashMap<Hash256, TxRow>,
    last_height: u64,
}

impl Table {
    /// Mark transactions that may have been orphaned by a reorganization.
    ///
    /// Finds the greatest confirmed height strictly below `height` and
    /// flags every confirmed row at exactly that height for re-check.
    fn check_fork(&mut self, height: i64) {
        // Find the height of the next-lower block that has transactions in it:
        let mut prev_height = 0;
        for row in self.rows.values() {
            if row.state == TxState::Confirmed
                && row.block_height < height
                && prev_height < row.block_height
            {
                prev_height = row.block_height;
            }
        }
        if prev_height == 0 {
            return;
        }

        for row in self.rows.values_mut() {
            if row.state == TxState::Confirmed && row.block_height == prev_height {
                row.need_check = true;
            }
        }
    }
}

/// In-memory, persistable store of wallet-relevant transactions.
///
/// Tracks confirmation state, malleation clusters, and fork suspicion per
/// transaction; computes the unspent outputs belonging to a set of
/// addresses; and round-trips through a versioned binary snapshot.
///
/// Safe to share across threads behind an `Arc`; all operations take
/// `&self` and serialize on an internal lock.
pub struct TxDatabase {
    table: Mutex<Table>,
    /// Lifetime in seconds of unconfirmed rows in serialized snapshots.
    unconfirmed_timeout: u64,
}

impl TxDatabase {
    /// Construct an empty database.
    ///
    /// `unconfirmed_timeout` is the age in seconds past which unconfirmed
    /// rows are dropped from snapshots.
    pub fn new(unconfirmed_timeout: u64) -> Self {
        Self {
            table: Mutex::new(Table {
                rows: HashMap::new(),
                last_height: 0,
            }),
            unconfirmed_timeout,
        }
    }

    /// The highest block height the database has been told about.
    pub fn last_height(&self) -> u64 {
        self.table.lock().last_height
    }

    /// Whether a transaction with this txid is stored.
    pub fn txid_exists(&self, txid: &Hash256) -> bool {
        self.table.lock().rows.contains_key(txid)
    }

    /// Whether any stored transaction has this ntxid.
    pub fn ntxid_exists(&self, ntxid: &Hash256) -> bool {
        self.table
            .lock()
            .rows
            .values()
            .any(|row| row.ntxid == *ntxid)
    }

    /// The stored transaction body for a txid.
    pub fn txid_lookup(&self, txid: &Hash256) -> Option<Transaction> {
        self.table.lock().rows.get(txid).map(|row| row.tx.clone())
    }

    /// The preferred transaction body for an ntxid cluster.
    ///
    /// A row observed confirming on-chain wins; otherwise any confirmed
    /// row; otherwise any row in the cluster.
    pub fn ntxid_lookup(&self, ntxid: &Hash256) -> Option<Transaction> {
        let t = self.table.lock();
        let mut found: Option<&TxRow> = None;
        for row in t.rows.values().filter(|r| r.ntxid == *ntxid) {
            if row.master_confirm {
                return Some(row.tx.clone());
            }
            match found {
                None => found = Some(row),
                Some(current) => {
                    if current.state != TxState::Confirmed && row.state == TxState::Confirmed {
                        found = Some(row);
                    }
                }
            }
        }
        found.map(|row| row.tx.clone())
    }

    /// The confirmation height of a txid: `0` if unknown or unconfirmed.
    pub fn txid_height(&self, txid: &Hash256) -> i64 {
        let t = self.table.lock();
        match t.rows.get(txid) {
            Some(row) if row.state == TxState::Confirmed => row.block_height,
            _ => 0,
        }
    }

    /// The confirmation height of an ntxid cluster.
    ///
    /// The maximum height over confirmed rows in the cluster; `-1` if the
    /// cluster is malleated (more than one row) with nothing confirmed;
    /// `0` for a single unconfirmed row.
    ///
    /// # Errors
    ///
    /// [`TxDbError::NotInDatabase`] if no row has this ntxid.
    pub fn ntxid_height(&self, ntxid: &Hash256) -> Result<i64, TxDbError> {
        let t = self.table.lock();
        let mut cluster_size = 0;
        let mut height = 0;
        for row in t.rows.values().filter(|r| r.ntxid == *ntxid) {
            cluster_size += 1;
            if row.state == TxState::Confirmed && height < row.block_height {
                height = row.block_height;
            }
        }
        if cluster_size == 0 {
            return Err(TxDbError::NotInDatabase);
        }

        // Special signal to the caller that the transaction is both
        // malleated and unconfirmed:
        if cluster_size > 1 && height == 0 {
            height = -1;
        }
        Ok(height)
    }

    /// Whether any output of any stored transaction pays `address`.
    pub fn has_history(&self, address: &Address) -> bool {
        let t = self.table.lock();
        for row in t.rows.values() {
            for output in &row.tx.outputs {
                if output.script_pubkey.extract_address() == Some(*address) {
                    return true;
                }
            }
        }
        false
    }

    /// The unspent outputs paying any of `addresses`.
    ///
    /// An output qualifies when no stored transaction spends it, its
    /// script decodes to one of the addresses, and its transaction is safe
    /// (its input ancestry sources no double-spent outpoint). With
    /// `filter` set, unconfirmed transactions additionally must be change:
    /// every input has to resolve to one of `addresses`.
    ///
    /// Output order is unspecified.
    pub fn utxos(&self, addresses: &HashSet<Address>, filter: bool) -> Vec<UtxoInfo> {
        let t = self.table.lock();
        let sets = SpendSets::build(&t.rows);
        let mut checker = SafetyAnalyzer::new(&t.rows, &sets.double_spends, addresses);

        let mut out = Vec::new();
        for (txid, row) in &t.rows {
            for (index, output) in row.tx.outputs.iter().enumerate() {
                let outpoint = OutPoint {
                    txid: *txid,
                    index: index as u32,
                };
                if sets.spends.contains(&outpoint) {
                    continue;
                }
                let Some(address) = output.script_pubkey.extract_address() else {
                    continue;
                };
                if !addresses.contains(&address) {
                    continue;
                }
                if checker.check(*txid, row, filter) {
                    out.push(UtxoInfo {
                        outpoint,
                        value: output.value,
                    });
                }
            }
        }
        out
    }

    /// Store a transaction. Returns false (and changes nothing) when the
    /// txid is already present.
    ///
    /// A new row joins its ntxid cluster: it inherits state and height
    /// from a sibling (a confirmed sibling with the greatest height wins,
    /// else the greatest sibling height) and the whole cluster, new row
    /// included, is marked malleated.
    pub fn insert(&self, tx: Transaction) -> bool {
        let txid = codec::txid(&tx);
        let ntxid = codec::ntxid(&tx);

        let mut t = self.table.lock();
        if t.rows.contains_key(&txid) {
            return false;
        }

        let mut donor: Option<(TxState, i64)> = None;
        for sibling in t.rows.values_mut().filter(|r| r.ntxid == ntxid) {
            sibling.malleated = true;
            let candidate = (sibling.state, sibling.block_height);
            donor = Some(match donor {
                None => candidate,
                Some(current) => {
                    let wins = (candidate.0 == TxState::Confirmed
                        && current.0 != TxState::Confirmed)
                        || (candidate.0 == current.0 && candidate.1 > current.1);
                    if wins {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        let malleated = donor.is_some();
        let (state, block_height) = donor.unwrap_or((TxState::Unconfirmed, 0));

        debug!(%txid, malleated, "inserting transaction");
        t.rows.insert(
            txid,
            TxRow {
                tx,
                txid,
                ntxid,
                state,
                block_height,
                timestamp: unix_now(),
                need_check: false,
                malleated,
                master_confirm: false,
            },
        );
        true
    }

    /// Record that a transaction confirmed at `block_height`.
    ///
    /// The row and its whole ntxid cluster become confirmed at that
    /// height; only this txid keeps the master-confirm flag. Seeing a row
    /// re-confirm at a different height means the chain forked, so the
    /// fork detector runs against the old height first.
    ///
    /// # Panics
    ///
    /// Panics if the txid is not stored. Callers learn about
    /// confirmations for transactions they previously inserted.
    pub fn confirmed(&self, txid: &Hash256, block_height: i64) {
        let mut t = self.table.lock();
        let (ntxid, old_state, old_height) = {
            let row = t.rows.get(txid).expect("confirmed: tx not in database");
            (row.ntxid, row.state, row.block_height)
        };

        // If the transaction was already confirmed in another block,
        // the chain has forked:
        if old_state == TxState::Confirmed && old_height != block_height {
            debug!(%txid, old_height, block_height, "re-confirmed at a new height");
            t.check_fork(old_height);
        }

        let mut cluster_size = 0;
        for row in t.rows.values_mut().filter(|r| r.ntxid == ntxid) {
            cluster_size += 1;
            row.state = TxState::Confirmed;
            row.block_height = block_height;
            row.master_confirm = row.txid == *txid;
        }
        if cluster_size > 1 {
            for row in t.rows.values_mut().filter(|r| r.ntxid == ntxid) {
                row.malleated = true;
            }
        }
    }

    /// Record that a transaction is no longer in a block.
    ///
    /// Demoting a confirmed row walks its ntxid cluster: a sibling that
    /// itself confirmed on-chain donates its state and height back to this
    /// row; every other sibling is demoted with the malleated-unconfirmed
    /// height sentinel. Demotion of a confirmed row also runs the fork
    /// detector against its old height.
    ///
    /// # Panics
    ///
    /// Panics if the txid is not stored.
    pub fn unconfirmed(&self, txid: &Hash256) {
        let mut t = self.table.lock();
        let (ntxid, was_confirmed, old_height, mut malleated) = {
            let row = t.rows.get(txid).expect("unconfirmed: tx not in database");
            (
                row.ntxid,
                row.state == TxState::Confirmed,
                row.block_height,
                row.malleated,
            )
        };

        let mut state = TxState::Unconfirmed;
        let mut block_height: i64 = 0;

        if was_confirmed {
            let mut inherited = false;
            let mut demoted = false;
            for sibling in t
                .rows
                .values_mut()
                .filter(|r| r.ntxid == ntxid && r.txid != *txid)
            {
                if sibling.master_confirm {
                    state = sibling.state;
                    block_height = sibling.block_height;
                    inherited = true;
                } else {
                    debug!(sibling = %sibling.txid, %ntxid, "demoting malleated sibling");
                    sibling.state = TxState::Unconfirmed;
                    sibling.block_height = -1;
                    sibling.malleated = true;
                    malleated = true;
                    demoted = true;
                }
            }
            if demoted && !inherited {
                block_height = -1;
            }

            // The chain dropped a block out from under this row:
            t.check_fork(old_height);
        }

        let row = t.rows.get_mut(txid).expect("row present under lock");
        row.state = state;
        row.block_height = block_height;
        row.malleated = malleated;
    }

    /// Record the current chain tip and look for a fork at that height.
    pub fn at_height(&self, height: u64) {
        let mut t = self.table.lock();
        t.last_height = height;
        t.check_fork(height as i64);
    }

    /// Refresh a row's timestamp to now, keeping it out of the stale
    /// purge. No-op for unknown txids.
    pub fn reset_timestamp(&self, txid: &Hash256) {
        let mut t = self.table.lock();
        if let Some(row) = t.rows.get_mut(txid) {
            row.timestamp = unix_now();
        }
    }

    /// Invoke `f` with the txid of every row that is not confirmed.
    ///
    /// `f` runs under the database lock and must not call back into the
    /// database.
    pub fn foreach_unconfirmed(&self, mut f: impl FnMut(Hash256)) {
        let t = self.table.lock();
        for (txid, row) in &t.rows {
            if row.state != TxState::Confirmed {
                f(*txid);
            }
        }
    }

    /// Invoke `f` with the txid of every confirmed row flagged by the
    /// fork detector.
    ///
    /// `f` runs under the database lock and must not call back into the
    /// database.
    pub fn foreach_forked(&self, mut f: impl FnMut(Hash256)) {
        let t = self.table.lock();
        for (txid, row) in &t.rows {
            if row.state == TxState::Confirmed && row.need_check {
                f(*txid);
            }
        }
    }

    /// Forget all rows and reset the tip height.
    pub fn clear(&self) {
        let mut t = self.table.lock();
        t.rows.clear();
        t.last_height = 0;
    }

    /// Serialize the database to a snapshot blob.
    ///
    /// Unconfirmed rows older than the configured timeout are left out.
    pub fn serialize(&self) -> Vec<u8> {
        let t = self.table.lock();
        snapshot::write_snapshot(&t.rows, t.last_height, self.unconfirmed_timeout, unix_now())
    }

    /// Replace the database contents from a snapshot blob.
    ///
    /// # Errors
    ///
    /// Any parse failure (see [`TxDbError`]) leaves the database
    /// unchanged.
    pub fn load(&self, data: &[u8]) -> Result<(), TxDbError> {
        let mut t = self.table.lock();
        let (rows, last_height) = snapshot::read_snapshot(data, unix_now())?;
        t.rows = rows;
        t.last_height = last_height;
        debug!(height = last_height, rows = t.rows.len(), "loaded transaction database");
        Ok(())
    }

    /// Render the whole table for diagnostics.
    pub fn dump(&self) -> String {
        let t = self.table.lock();
        let mut out = String::new();
        let _ = writeln!(out, "height: {}", t.last_height);
        for (key, row) in &t.rows {
            let _ = writeln!(out, "================");
            let _ = writeln!(out, "hash: {key}");
            match row.state {
                TxState::Unconfirmed => {
                    let _ = writeln!(out, "state: unconfirmed");
                    let _ = writeln!(out, "timestamp: {}", row.timestamp);
                }
                TxState::Confirmed => {
                    let _ = writeln!(out, "state: confirmed");
                    let _ = writeln!(out, "height: {}", row.block_height);
                    if row.need_check {
                        let _ = writeln!(out, "needs check.");
                    }
                }
            }
            for input in &row.tx.inputs {
                if let Some(address) = input.script_sig.extract_address() {
                    let _ = writeln!(out, "input: {address}");
                }
            }
            for output in &row.tx.outputs {
                if let Some(address) = output.script_pubkey.extract_address() {
                    let _ = writeln!(out, "output: {address} {}", output.value);
                }
            }
        }
        out
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
