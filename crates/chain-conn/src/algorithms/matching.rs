//! # Watch-list Matching
//!
//! A transaction is relevant to a client if any output pays a watched script
//! or any input spends a watched outpoint.

use bitcoin::{Block, OutPoint, Transaction};

use crate::domain::WatchList;

/// Whether `tx` touches anything in the watch-list.
pub fn tx_matches(watch: &WatchList, tx: &Transaction) -> bool {
    let spends_watched = tx
        .input
        .iter()
        .any(|input| watch.contains_outpoint(&input.previous_output));

    spends_watched
        || tx
            .output
            .iter()
            .any(|output| watch.contains_script(&output.script_pubkey))
}

/// Outpoints created by `tx` that pay a watched script.
pub fn paid_outpoints(watch: &WatchList, tx: &Transaction) -> Vec<OutPoint> {
    let txid = tx.compute_txid();
    tx.output
        .iter()
        .enumerate()
        .filter(|(_, output)| watch.contains_script(&output.script_pubkey))
        .map(|(vout, _)| OutPoint::new(txid, vout as u32))
        .collect()
}

/// Transactions of `block` relevant to the watch-list, in block order.
///
/// Outputs paying watched scripts are added to the watch-list as they are
/// found, so a spend later in the same block also matches.
pub fn filter_block(watch: &mut WatchList, block: &Block) -> Vec<Transaction> {
    if watch.is_empty() {
        return Vec::new();
    }
    let mut relevant = Vec::new();
    for tx in &block.txdata {
        if !tx_matches(watch, tx) {
            continue;
        }
        for outpoint in paid_outpoints(watch, tx) {
            watch.add_outpoint(outpoint);
        }
        relevant.push(tx.clone());
    }
    relevant
}
