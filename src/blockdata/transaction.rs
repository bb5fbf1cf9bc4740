// SPDX-License-Identifier: CC0-1.0

//! Genesis transactions.
//!
//! The payment subsystem only ever inspects and fills coinbase transactions,
//! but the structures here are the general ones: a transaction consumes
//! previously-unspent outputs and produces new ones. The collateral outpoint
//! of a masternode doubles as its identity on the voting wire.

use core::fmt;

use hashes::Hash;

use crate::blockdata::script::ScriptBuf;
use crate::consensus::encode;
use crate::hash_types::Txid;

/// A reference to a transaction output.
///
/// For masternodes this is the collateral outpoint, which uniquely
/// identifies the masternode across the network.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutPoint {
    /// The referenced transaction's txid.
    pub txid: Txid,
    /// The index of the referenced output in its transaction's vout.
    pub vout: u32,
}

impl OutPoint {
    /// Creates a new [`OutPoint`].
    #[inline]
    pub fn new(txid: Txid, vout: u32) -> OutPoint {
        OutPoint { txid, vout }
    }

    /// Creates a "null" `OutPoint`.
    ///
    /// This value is used for coinbase transactions because they don't have
    /// any previous outputs.
    #[inline]
    pub fn null() -> OutPoint {
        OutPoint { txid: Txid::all_zeros(), vout: u32::MAX }
    }

    /// Checks if an `OutPoint` is "null".
    #[inline]
    pub fn is_null(&self) -> bool {
        *self == OutPoint::null()
    }

    /// Renders the outpoint in the abbreviated form used in log lines and
    /// in the legacy vote signing message.
    pub fn to_short_string(&self) -> String {
        let mut txid = self.txid.to_string();
        txid.truncate(16);
        format!("{}-{}", txid, self.vout)
    }
}

impl Default for OutPoint {
    fn default() -> Self {
        OutPoint::null()
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl_consensus_encoding!(OutPoint, txid, vout);

/// A transaction input, which defines old coins to be consumed.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TxIn {
    /// The reference to the previous output that is being used as an input.
    pub previous_output: OutPoint,
    /// The script which pushes values on the stack which will cause
    /// the referenced output's script to be accepted.
    pub script_sig: ScriptBuf,
    /// The sequence number, which suggests to miners which of two
    /// conflicting transactions should be preferred.
    pub sequence: u32,
}

impl Default for TxIn {
    fn default() -> TxIn {
        TxIn { previous_output: OutPoint::null(), script_sig: ScriptBuf::new(), sequence: u32::MAX }
    }
}

impl_consensus_encoding!(TxIn, previous_output, script_sig, sequence);

/// A transaction output, which defines new coins to be created from old ones.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TxOut {
    /// The value of the output, in satoshis.
    pub value: u64,
    /// The script which must be satisfied for the output to be spent.
    pub script_pubkey: ScriptBuf,
}

impl TxOut {
    /// Creates an output paying `value` satoshis to `script_pubkey`.
    pub fn new(value: u64, script_pubkey: ScriptBuf) -> TxOut {
        TxOut { value, script_pubkey }
    }
}

impl_consensus_encoding!(TxOut, value, script_pubkey);

/// A Genesis transaction.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transaction {
    /// The protocol version, is currently expected to be 1 or 2 (BIP 68).
    pub version: i32,
    /// Block height or timestamp before which the transaction may not be
    /// included in a block.
    pub lock_time: u32,
    /// List of transaction inputs.
    pub input: Vec<TxIn>,
    /// List of transaction outputs.
    pub output: Vec<TxOut>,
}

impl Transaction {
    /// Computes the txid of the transaction.
    pub fn txid(&self) -> Txid {
        Txid::hash(&encode::serialize(self))
    }

    /// Returns whether this is a coinbase transaction.
    pub fn is_coin_base(&self) -> bool {
        self.input.len() == 1 && self.input[0].previous_output.is_null()
    }

    /// Returns the total value of all outputs, in satoshis.
    pub fn value_out(&self) -> u64 {
        self.output.iter().map(|txout| txout.value).sum()
    }
}

impl_consensus_encoding!(Transaction, version, lock_time, input, output);
