// SPDX-License-Identifier: CC0-1.0

//! Genesis blocks.
//!
//! A block is a bundle of transactions with a proof-of-work attached. The
//! payment gate only ever looks at the first transaction of a block, the
//! coinbase, whose outputs carry the miner, masternode and governance
//! payments.

use hashes::Hash;

use crate::blockdata::transaction::Transaction;
use crate::consensus::encode;
use crate::hash_types::BlockHash;

/// A block header, the part of the block that is hashed for proof-of-work.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockHeader {
    /// The block version, now repurposed for soft fork signalling.
    pub version: i32,
    /// Reference to the previous block in the chain.
    pub prev_blockhash: BlockHash,
    /// The root hash of the merkle tree of transactions in the block.
    pub merkle_root: BlockHash,
    /// The timestamp of the block, as claimed by the miner.
    pub time: u32,
    /// The target value below which the blockhash must lie.
    pub bits: u32,
    /// The nonce, selected to obtain a low enough blockhash.
    pub nonce: u32,
}

impl BlockHeader {
    /// Computes the hash of the header.
    pub fn block_hash(&self) -> BlockHash {
        BlockHash::hash(&encode::serialize(self))
    }
}

impl_consensus_encoding!(BlockHeader, version, prev_blockhash, merkle_root, time, bits, nonce);

/// A Genesis block.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
    /// List of transactions contained in the block.
    pub txdata: Vec<Transaction>,
}

impl Block {
    /// Returns the coinbase transaction, if one is present.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.txdata.first().filter(|tx| tx.is_coin_base())
    }
}

impl_consensus_encoding!(Block, header, txdata);
