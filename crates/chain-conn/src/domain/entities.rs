//! # Domain Entities
//!
//! Mutable per-client state: the watch-list a subscriber registers interest with.

use std::collections::HashSet;

use bitcoin::{Address, OutPoint, Script, ScriptBuf};

/// Set of output scripts and outpoints a client is interested in.
///
/// Addresses are stored by their `script_pubkey`, so an address and the raw
/// script it encodes are the same entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchList {
    scripts: HashSet<ScriptBuf>,
    outpoints: HashSet<OutPoint>,
}

impl WatchList {
    /// Create an empty watch-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch an address. Returns `false` if it was already watched.
    pub fn add_address(&mut self, address: &Address) -> bool {
        self.scripts.insert(address.script_pubkey())
    }

    /// Watch a raw output script. Returns `false` if it was already watched.
    pub fn add_script(&mut self, script: ScriptBuf) -> bool {
        self.scripts.insert(script)
    }

    /// Watch an outpoint for spends. Returns `false` if it was already watched.
    pub fn add_outpoint(&mut self, outpoint: OutPoint) -> bool {
        self.outpoints.insert(outpoint)
    }

    /// Whether the script is watched.
    pub fn contains_script(&self, script: &Script) -> bool {
        self.scripts.contains(script)
    }

    /// Whether the outpoint is watched.
    pub fn contains_outpoint(&self, outpoint: &OutPoint) -> bool {
        self.outpoints.contains(outpoint)
    }

    /// Number of watched scripts.
    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    /// Number of watched outpoints.
    pub fn outpoint_count(&self) -> usize {
        self.outpoints.len()
    }

    /// Whether nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty() && self.outpoints.is_empty()
    }
}
