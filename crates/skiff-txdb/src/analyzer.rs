//! Double-spend analysis over the transaction graph.
//!
//! Works in two stages: [`SpendSets`] collects every outpoint referenced as
//! an input and the subset referenced more than once, then
//! [`SafetyAnalyzer`] answers whether a transaction's input ancestry ever
//! sources a contested outpoint. The analyzer memoizes per txid, so the
//! more checks it performs over a fixed graph, the cheaper they become.
//!
//! Both stages run under the database lock over the row table; an analyzer
//! lives for exactly one query so that new rows invalidate nothing.

use std::collections::{HashMap, HashSet};

use skiff_core::{Address, Hash256, OutPoint};

use crate::row::{TxRow, TxState};

/// Outpoints referenced as inputs across the whole row table.
pub(crate) struct SpendSets {
    /// Every outpoint spent by some stored transaction.
    pub(crate) spends: HashSet<OutPoint>,
    /// Outpoints spent by more than one stored transaction.
    pub(crate) double_spends: HashSet<OutPoint>,
}

impl SpendSets {
    /// Walk every input of every row. The result depends only on the
    /// multiset of inputs, not on iteration order.
    pub(crate) fn build(rows: &HashMap<Hash256, TxRow>) -> Self {
        let mut spends = HashSet::new();
        let mut double_spends = HashSet::new();
        for row in rows.values() {
            for input in &row.tx.inputs {
                if !spends.insert(input.previous_output) {
                    double_spends.insert(input.previous_output);
                }
            }
        }
        Self {
            spends,
            double_spends,
        }
    }
}

/// Checks transactions for double-spend ancestry.
pub(crate) struct SafetyAnalyzer<'a> {
    rows: &'a HashMap<Hash256, TxRow>,
    double_spends: &'a HashSet<OutPoint>,
    addresses: &'a HashSet<Address>,
    visited: HashMap<Hash256, bool>,
}

impl<'a> SafetyAnalyzer<'a> {
    pub(crate) fn new(
        rows: &'a HashMap<Hash256, TxRow>,
        double_spends: &'a HashSet<OutPoint>,
        addresses: &'a HashSet<Address>,
    ) -> Self {
        Self {
            rows,
            double_spends,
            addresses,
            visited: HashMap::new(),
        }
    }

    /// Returns true if a transaction is safe to spend from.
    ///
    /// With `filter` set, unconfirmed transactions must be change: every
    /// input has to resolve to one of our addresses.
    pub(crate) fn check(&mut self, txid: Hash256, row: &TxRow, filter: bool) -> bool {
        if filter && row.state != TxState::Confirmed {
            for input in &row.tx.inputs {
                let ours = input
                    .script_sig
                    .extract_address()
                    .is_some_and(|addr| self.addresses.contains(&addr));
                if !ours {
                    return false;
                }
            }
        }

        self.is_safe(txid)
    }

    /// Recursively checks the transaction graph for double-spends.
    ///
    /// Returns true if the transaction never sources a double spend.
    /// Missing transactions are trusted, confirmed transactions are safe.
    /// The memo entry is seeded before recursing, so a cycle in the graph
    /// resolves to the optimistic default instead of looping.
    pub(crate) fn is_safe(&mut self, txid: Hash256) -> bool {
        if let Some(&known) = self.visited.get(&txid) {
            return known;
        }

        let Some(row) = self.rows.get(&txid) else {
            self.visited.insert(txid, true);
            return true;
        };

        if row.state == TxState::Confirmed {
            self.visited.insert(txid, true);
            return true;
        }

        self.visited.insert(txid, true);
        let mut safe = true;
        for input in &row.tx.inputs {
            if self.double_spends.contains(&input.previous_output)
                || !self.is_safe(input.previous_output.txid)
            {
                safe = false;
                break;
            }
        }
        self.visited.insert(txid, safe);
        safe
    }
}
