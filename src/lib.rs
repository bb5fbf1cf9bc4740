// SPDX-License-Identifier: CC0-1.0

//! # Rust Genesis Masternodes Library
//!
//! This library implements the masternode payment and governance-block
//! subsystem of the Genesis network. For every block height it decides who
//! must be paid by the coinbase transaction and how much, and it validates
//! that incoming blocks obey that decision.
//!
//! Two payment regimes coexist:
//!
//! * **Regular blocks** — a deterministic round-robin selects one masternode
//!   from the registry; masternodes vote for that choice and the payee with a
//!   quorum of votes is authoritative. See [`masternodes::PaymentEngine`].
//! * **Governance blocks** — at fixed offsets inside a long cycle the
//!   coinbase must instead carry the payment schedule of a funded governance
//!   trigger. See [`governance::GovernanceTriggerManager`].
//!
//! The top-level dispatcher between the two regimes is
//! [`masternodes::BlockPaymentGate`].
//!
//! Chain storage, the peer-to-peer transport, the governance object gossip
//! layer, wallet keys and the masternode registry itself are external
//! collaborators, reached through the traits in [`masternodes`] and
//! [`governance::object`]. Tests construct in-memory implementations of
//! them; nothing in this crate is a process-wide singleton.

// Coding conventions
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(missing_docs)]

#[macro_use]
mod internal_macros;

pub mod blockdata;
pub mod consensus;
pub mod governance;
pub mod hash_types;
pub mod masternodes;
pub mod network;
pub mod util;

pub use crate::blockdata::block::{Block, BlockHeader};
pub use crate::blockdata::constants::{COIN_VALUE, MAX_MONEY};
pub use crate::blockdata::script::ScriptBuf;
pub use crate::blockdata::transaction::{OutPoint, Transaction, TxIn, TxOut};
pub use crate::consensus::encode::VarInt;
pub use crate::consensus::params::Params;
pub use crate::governance::classes::GovernanceTriggerManager;
pub use crate::hash_types::{BlockHash, GovernanceObjectHash, PubkeyHash, ScriptHash, Txid, VoteHash};
pub use crate::masternodes::gate::BlockPaymentGate;
pub use crate::masternodes::payments::{PaymentEngine, PaymentVote};
pub use crate::network::constants::Network;
pub use crate::util::address::Address;
