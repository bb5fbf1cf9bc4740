// SPDX-License-Identifier: CC0-1.0

//! The masternode registry interface.
//!
//! The registry itself --- collateral tracking, ping liveness, deterministic
//! ranking --- lives outside this crate. The payment engine only consumes
//! its lookup and rank API, declared here.

use secp256k1::{PublicKey, Secp256k1, SecretKey, Signing};

use crate::blockdata::script::ScriptBuf;
use crate::blockdata::transaction::OutPoint;
use crate::network::PeerId;

/// The registry's view of a single masternode.
#[derive(Clone, Debug)]
pub struct MasternodeInfo {
    /// The collateral outpoint, the masternode's identity.
    pub outpoint: OutPoint,
    /// The operator key that signs payment votes.
    pub operator_pubkey: PublicKey,
    /// The script the masternode is paid to.
    pub payee: ScriptBuf,
    /// The protocol version the masternode advertised.
    pub protocol_version: u32,
}

/// Deterministic lookup and ranking over the registered masternodes.
pub trait MasternodeRegistry: Send + Sync {
    /// Looks a masternode up by its collateral outpoint.
    fn masternode_info(&self, outpoint: &OutPoint) -> Option<MasternodeInfo>;

    /// Computes the rank (1-based) of a masternode in the deterministic
    /// ordering seeded at `seed_height`.
    ///
    /// Returns `None` when the rank cannot be calculated, for instance
    /// because the seed block is unknown or the masternode is not listed.
    fn rank(&self, outpoint: &OutPoint, seed_height: u32, min_protocol: u32) -> Option<usize>;

    /// Returns the masternodes in deterministic rank order, best first,
    /// seeded at `seed_height`.
    fn ranks(&self, seed_height: u32, min_protocol: u32) -> Vec<MasternodeInfo>;

    /// Selects the masternode next in line for payment at `height`: the one
    /// longest unpaid whose collateral and activity are old enough.
    fn next_in_queue_for_payment(&self, height: u32) -> Option<MasternodeInfo>;

    /// The number of registered masternodes.
    fn count(&self) -> usize;

    /// Asks a peer for a masternode announcement we appear to be missing.
    fn request_masternode(&self, peer: PeerId, outpoint: &OutPoint);
}

/// The identity of the locally running masternode, if any.
#[derive(Clone)]
pub struct ActiveMasternode {
    /// The collateral outpoint this daemon operates.
    pub outpoint: OutPoint,
    /// The operator secret key used to sign votes.
    pub secret_key: SecretKey,
    /// The public half of the operator key.
    pub public_key: PublicKey,
}

impl ActiveMasternode {
    /// Builds the active identity from an operator secret key.
    pub fn new<C: Signing>(
        secp: &Secp256k1<C>,
        outpoint: OutPoint,
        secret_key: SecretKey,
    ) -> ActiveMasternode {
        let public_key = PublicKey::from_secret_key(secp, &secret_key);
        ActiveMasternode { outpoint, secret_key, public_key }
    }
}
