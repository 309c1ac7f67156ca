//! Fixtures for tests built on top of `MockChainBackend`.
//!
//! Available to this crate's own tests and, behind the `test-utils`
//! feature, to downstream test crates.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};

/// Deterministic P2WPKH script whose key hash is `tag` repeated.
pub fn script(tag: u8) -> ScriptBuf {
    let mut bytes = vec![0x00, 0x14];
    bytes.extend_from_slice(&[tag; 20]);
    ScriptBuf::from_bytes(bytes)
}

/// Regtest address for `script(tag)`.
pub fn address(tag: u8) -> Address {
    Address::from_script(&script(tag), Network::Regtest).expect("P2WPKH is a standard script")
}

/// Transaction spending `spends` into one output paying `pays`.
///
/// `nonce` goes into the lock time so otherwise identical transactions get
/// distinct ids.
pub fn tx_spending(spends: OutPoint, pays: ScriptBuf, nonce: u32) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(nonce),
        input: vec![TxIn {
            previous_output: spends,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: pays,
        }],
    }
}

/// Transaction paying `pays` out of an unrelated outpoint.
pub fn tx_paying(pays: ScriptBuf, nonce: u32) -> Transaction {
    tx_spending(OutPoint::new(Txid::all_zeros(), nonce), pays, nonce)
}

/// Transaction touching nothing anyone watches.
pub fn unrelated_tx(nonce: u32) -> Transaction {
    tx_paying(script(0xee), nonce)
}
