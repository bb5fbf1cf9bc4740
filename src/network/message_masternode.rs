// SPDX-License-Identifier: CC0-1.0

//! Masternode payment network messages.
//!
//! This module describes the network messages which are used for syncing and
//! relaying masternode payment votes. Only the payloads and the inventory
//! categories are defined here; the message header framing belongs to the
//! transport layer.

use crate::consensus::{encode, Decodable, Encodable};
use crate::hash_types::{BlockHash, VoteHash};
use crate::masternodes::payments::PaymentVote;
use std::io;

/// The command string of a payment vote sync request.
pub const CMD_MASTERNODE_PAYMENT_SYNC: &str = "mnpaymentsync";
/// The command string of a primary payment vote.
pub const CMD_MASTERNODE_PAYMENT_VOTE_PRIMARY: &str = "mnw";
/// The command string of a secondary payment vote.
pub const CMD_MASTERNODE_PAYMENT_VOTE_SECONDARY: &str = "mnwsecondary";
/// The command string of a sync status count.
pub const CMD_SYNC_STATUS_COUNT: &str = "ssc";

/// Reject code sent to peers speaking an obsolete protocol version.
pub const REJECT_OBSOLETE: u8 = 0x11;

/// An inventory item announced or requested on the payments wire.
#[derive(PartialEq, Eq, Clone, Debug, Copy, Hash, PartialOrd, Ord)]
pub enum Inventory {
    /// Error --- these inventories can be ignored.
    Error,
    /// A primary masternode payment vote.
    PaymentVote(VoteHash),
    /// All primary payment votes for one block.
    PaymentBlock(BlockHash),
    /// A secondary masternode payment vote. Recognized on the wire but not
    /// processed.
    PaymentVoteSecondary(VoteHash),
    /// All secondary payment votes for one block. Recognized on the wire but
    /// not processed.
    PaymentBlockSecondary(BlockHash),
    /// Unknown inventory type.
    Unknown {
        /// The inventory item type.
        inv_type: u32,
        /// The hash of the inventory item.
        hash: [u8; 32],
    },
}

impl Encodable for Inventory {
    #[inline]
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        macro_rules! encode_inv {
            ($code:expr, $item:expr) => {
                u32::consensus_encode(&$code, w)? + $item.consensus_encode(w)?
            };
        }
        Ok(match *self {
            Inventory::Error => encode_inv!(0, [0u8; 32]),
            Inventory::PaymentVote(ref hash) => encode_inv!(7, hash),
            Inventory::PaymentBlock(ref hash) => encode_inv!(8, hash),
            Inventory::PaymentVoteSecondary(ref hash) => encode_inv!(9, hash),
            Inventory::PaymentBlockSecondary(ref hash) => encode_inv!(10, hash),
            Inventory::Unknown { inv_type, hash } => encode_inv!(inv_type, hash),
        })
    }
}

impl Decodable for Inventory {
    #[inline]
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let inv_type = u32::consensus_decode(r)?;
        Ok(match inv_type {
            0 => {
                <[u8; 32]>::consensus_decode(r)?;
                Inventory::Error
            }
            7 => Inventory::PaymentVote(Decodable::consensus_decode(r)?),
            8 => Inventory::PaymentBlock(Decodable::consensus_decode(r)?),
            9 => Inventory::PaymentVoteSecondary(Decodable::consensus_decode(r)?),
            10 => Inventory::PaymentBlockSecondary(Decodable::consensus_decode(r)?),
            tp => Inventory::Unknown { inv_type: tp, hash: Decodable::consensus_decode(r)? },
        })
    }
}

/// The progress report sent after serving a sync batch.
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct SyncStatusCount {
    /// Which sync asset the count is about.
    pub asset_id: i32,
    /// How many items were sent.
    pub count: i32,
}

impl SyncStatusCount {
    /// Creates a new status count for the given sync asset.
    pub fn new(asset_id: i32, count: i32) -> Self {
        SyncStatusCount { asset_id, count }
    }
}

impl_consensus_encoding!(SyncStatusCount, asset_id, count);

/// A `reject` payload, sent back to peers whose message cannot be processed.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Reject {
    /// The command of the rejected message.
    pub message: String,
    /// The reject code.
    pub ccode: u8,
    /// A human-readable rejection reason.
    pub reason: String,
}

impl Reject {
    /// Builds the rejection sent to peers below the minimum protocol version.
    pub fn obsolete(command: &str, min_version: u32) -> Self {
        Reject {
            message: command.to_owned(),
            ccode: REJECT_OBSOLETE,
            reason: format!("Version must be {} or greater", min_version),
        }
    }
}

impl_consensus_encoding!(Reject, message, ccode, reason);

/// A deserialized message of the masternode payments subsystem.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum PaymentsMessage {
    /// `mnpaymentsync` --- request to sync payment votes.
    PaymentSync,
    /// `mnw` --- a primary payment vote.
    PaymentVote(PaymentVote),
    /// `mnwsecondary` --- the secondary vote track, carried but not
    /// processed.
    PaymentVoteSecondary(Vec<u8>),
}

impl PaymentsMessage {
    /// The command string of this message.
    pub fn command(&self) -> &'static str {
        match self {
            PaymentsMessage::PaymentSync => CMD_MASTERNODE_PAYMENT_SYNC,
            PaymentsMessage::PaymentVote(_) => CMD_MASTERNODE_PAYMENT_VOTE_PRIMARY,
            PaymentsMessage::PaymentVoteSecondary(_) => CMD_MASTERNODE_PAYMENT_VOTE_SECONDARY,
        }
    }
}

#[cfg(test)]
mod tests {
    use hashes::Hash;

    use super::*;
    use crate::consensus::encode::{deserialize, serialize};

    #[test]
    fn inventory_roundtrip() {
        let items = vec![
            Inventory::Error,
            Inventory::PaymentVote(VoteHash::hash(b"vote")),
            Inventory::PaymentBlock(BlockHash::hash(b"block")),
            Inventory::PaymentVoteSecondary(VoteHash::hash(b"vote2")),
            Inventory::PaymentBlockSecondary(BlockHash::hash(b"block2")),
            Inventory::Unknown { inv_type: 0x49, hash: [0x42; 32] },
        ];
        for item in &items {
            assert_eq!(serialize(item).len(), 36);
        }
        let decoded: Vec<Inventory> = deserialize(&serialize(&items)).unwrap();
        assert_eq!(decoded, items);
    }

    #[test]
    fn sync_status_count_encoding() {
        let ssc = SyncStatusCount::new(3, 12);
        assert_eq!(serialize(&ssc), [3u8, 0, 0, 0, 12, 0, 0, 0]);
    }

    #[test]
    fn reject_roundtrip() {
        let reject = Reject::obsolete(CMD_MASTERNODE_PAYMENT_SYNC, 70209);
        let decoded: Reject = deserialize(&serialize(&reject)).unwrap();
        assert_eq!(decoded, reject);
        assert_eq!(decoded.ccode, REJECT_OBSOLETE);
    }
}
