// SPDX-License-Identifier: CC0-1.0

//! Masternode payment votes and the payment engine.
//!
//! Keeps track of who should get paid on which blocks: votes arrive from the
//! top-ranked masternodes for a height, are verified against the registry,
//! tallied per payee, and the payee with a quorum of votes becomes the
//! required coinbase destination for that height.

use core::fmt;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use secp256k1::{All, PublicKey, Secp256k1};
use tracing::{debug, info, trace, warn};

use crate::blockdata::script::ScriptBuf;
use crate::blockdata::transaction::{OutPoint, Transaction, TxOut};
use crate::consensus::params::Params;
use crate::consensus::Encodable;
use crate::hash_types::VoteHash;
use crate::masternodes::registry::{ActiveMasternode, MasternodeInfo, MasternodeRegistry};
use crate::masternodes::sync::{RequestTracker, SyncTracker, MASTERNODE_SYNC_MNW};
use crate::masternodes::NetGateway;
use crate::network::constants::MIN_MASTERNODE_PAYMENT_PROTO_VERSION;
use crate::network::message_masternode::{
    Inventory, PaymentsMessage, Reject, SyncStatusCount, CMD_MASTERNODE_PAYMENT_SYNC,
    CMD_MASTERNODE_PAYMENT_VOTE_PRIMARY,
};
use crate::network::PeerId;
use crate::util::address::Address;
use crate::util::amount::fmt_coin_amount;
use crate::util::signer;

/// The acceptance band above the exact masternode payment.
///
/// A coinbase output satisfies a winning payee when its value lies in
/// `[masternode_payment, masternode_payment + PAYMENT_TOLERANCE]`.
pub const PAYMENT_TOLERANCE: u64 = 10_000_000;

/// Votes are ranked against the masternode ordering seeded this many blocks
/// before the payment height.
pub const RANK_SEED_OFFSET: u32 = 101;

/// How many blocks of future votes are accepted past the current tip.
pub const FUTURE_VOTE_WINDOW: u32 = 20;

/// The input a payment vote signature commits to.
///
/// Which variant is in force depends on the chain tip against the sign-hash
/// threshold; verification accepts a legacy signature after the threshold to
/// cover votes signed just before the switch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SignScheme {
    /// Sign the raw sha256d hash of the serialized vote.
    RawHash,
    /// Sign the legacy `"<outpoint-short>|<height>|<payee-asm>"` string.
    LegacyMessage,
}

impl SignScheme {
    /// Selects the scheme in force at the given chain tip.
    pub fn for_height(tip: u32, params: &Params) -> SignScheme {
        if tip > params.sign_hash_threshold {
            SignScheme::RawHash
        } else {
            SignScheme::LegacyMessage
        }
    }
}

/// A masternode's vote for the payee of one block height.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PaymentVote {
    /// The collateral outpoint of the voting masternode.
    pub masternode_outpoint: OutPoint,
    /// The height the vote is for.
    pub block_height: u32,
    /// The payee the voter selected.
    pub payee: ScriptBuf,
    /// The operator signature; empty while the vote is unverified.
    pub signature: Vec<u8>,
}

impl_consensus_encoding!(PaymentVote, masternode_outpoint, block_height, payee, signature);

impl PaymentVote {
    /// Creates a new, unsigned vote.
    pub fn new(masternode_outpoint: OutPoint, block_height: u32, payee: ScriptBuf) -> PaymentVote {
        PaymentVote { masternode_outpoint, block_height, payee, signature: Vec::new() }
    }

    /// Computes the deterministic vote hash used for inventory and storage.
    ///
    /// Committed fields are (payee, height, voter); the signature does not
    /// participate, so the hash is stable across verification state.
    pub fn vote_hash(&self) -> VoteHash {
        use hashes::Hash;
        let mut data = Vec::with_capacity(self.payee.len() + 41);
        self.payee.consensus_encode(&mut data).expect("in-memory writers don't error");
        self.block_height.consensus_encode(&mut data).expect("in-memory writers don't error");
        self.masternode_outpoint.consensus_encode(&mut data).expect("in-memory writers don't error");
        VoteHash::hash(&data)
    }

    /// Computes the hash signed under the raw-hash scheme.
    pub fn signature_hash(&self) -> hashes::sha256d::Hash {
        use hashes::Hash;
        let mut data = Vec::with_capacity(self.payee.len() + 41);
        self.masternode_outpoint.consensus_encode(&mut data).expect("in-memory writers don't error");
        self.block_height.consensus_encode(&mut data).expect("in-memory writers don't error");
        self.payee.consensus_encode(&mut data).expect("in-memory writers don't error");
        hashes::sha256d::Hash::hash(&data)
    }

    /// Builds the string signed under the legacy message scheme.
    pub fn legacy_message(&self) -> String {
        format!(
            "{}|{}|{}",
            self.masternode_outpoint.to_short_string(),
            self.block_height,
            self.payee.to_asm_string()
        )
    }

    /// Whether the vote carries a signature that verified at ingest.
    pub fn is_verified(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Drops the signature, marking the vote as an unverified placeholder.
    pub fn mark_unverified(&mut self) {
        self.signature.clear();
    }

    /// Signs the vote with the local operator key under the given scheme.
    pub fn sign(
        &mut self,
        secp: &Secp256k1<All>,
        active: &ActiveMasternode,
        scheme: SignScheme,
    ) -> Result<(), signer::SignatureError> {
        self.signature = match scheme {
            SignScheme::RawHash => signer::sign_hash(secp, self.signature_hash(), &active.secret_key),
            SignScheme::LegacyMessage => {
                signer::sign_message(secp, &self.legacy_message(), &active.secret_key)
            }
        };
        // Verify what we just produced; a key mismatch here means the active
        // identity is misconfigured.
        self.verify_signature(secp, &active.public_key, scheme)
    }

    /// Verifies the signature under one specific scheme.
    pub fn verify_signature(
        &self,
        secp: &Secp256k1<All>,
        pubkey: &PublicKey,
        scheme: SignScheme,
    ) -> Result<(), signer::SignatureError> {
        match scheme {
            SignScheme::RawHash => {
                signer::verify_hash(secp, self.signature_hash(), pubkey, &self.signature)
            }
            SignScheme::LegacyMessage => {
                signer::verify_message(secp, &self.legacy_message(), pubkey, &self.signature)
            }
        }
    }
}

impl fmt::Display for PaymentVote {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}",
            self.masternode_outpoint.to_short_string(),
            self.block_height,
            self.payee.to_asm_string(),
            self.signature.len()
        )
    }
}

/// Why a payment vote was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VoteError {
    /// The sending peer speaks an obsolete protocol version.
    ObsoletePeer {
        /// The peer's version.
        version: u32,
        /// The minimum accepted version.
        min: u32,
    },
    /// The node is not synced far enough to judge votes.
    NotSynced,
    /// The vote hash is already known and verified.
    AlreadyKnown,
    /// The vote height is outside the acceptance window.
    OutOfRange {
        /// The vote's height.
        height: u32,
        /// The lowest accepted height.
        first: u32,
        /// The highest accepted height.
        last: u32,
    },
    /// The registry has no record of the voter.
    UnknownVoter(OutPoint),
    /// The voting masternode advertises an obsolete protocol version.
    ObsoleteMasternode {
        /// The masternode's version.
        version: u32,
        /// The minimum required version.
        min: u32,
    },
    /// The voter's rank could not be calculated.
    RankNotCalculable(OutPoint),
    /// The voter is not in the top voting set for the height.
    OutOfRank {
        /// The calculated rank.
        rank: usize,
        /// The highest rank allowed to vote.
        max: usize,
    },
    /// The signature did not verify under any accepted scheme.
    BadSignature,
    /// The voter already voted for this height.
    DuplicateVote {
        /// The voter.
        outpoint: OutPoint,
        /// The height voted for twice.
        height: u32,
    },
}

impl fmt::Display for VoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            VoteError::ObsoletePeer { version, min } => {
                write!(f, "peer version {} is obsolete, need {} or greater", version, min)
            }
            VoteError::NotSynced => write!(f, "masternode list is not synced"),
            VoteError::AlreadyKnown => write!(f, "vote already known and verified"),
            VoteError::OutOfRange { height, first, last } => {
                write!(f, "vote height {} outside window [{}, {}]", height, first, last)
            }
            VoteError::UnknownVoter(ref outpoint) => {
                write!(f, "unknown masternode {}", outpoint.to_short_string())
            }
            VoteError::ObsoleteMasternode { version, min } => {
                write!(f, "masternode protocol {} is too old, need {}", version, min)
            }
            VoteError::RankNotCalculable(ref outpoint) => {
                write!(f, "can't calculate rank for masternode {}", outpoint.to_short_string())
            }
            VoteError::OutOfRank { rank, max } => {
                write!(f, "masternode is not in the top {} ({})", max, rank)
            }
            VoteError::BadSignature => write!(f, "bad masternode payment signature"),
            VoteError::DuplicateVote { ref outpoint, height } => {
                write!(
                    f,
                    "masternode {} already voted for height {}",
                    outpoint.to_short_string(),
                    height
                )
            }
        }
    }
}

impl std::error::Error for VoteError {}

/// One payee of a tallied block, with the votes backing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payee {
    script: ScriptBuf,
    vote_hashes: Vec<VoteHash>,
}

impl Payee {
    /// Creates a payee entry from its first backing vote.
    pub fn new(script: ScriptBuf, vote_hash: VoteHash) -> Payee {
        Payee { script, vote_hashes: vec![vote_hash] }
    }

    /// The payee script.
    pub fn script(&self) -> &ScriptBuf {
        &self.script
    }

    /// Adds a backing vote hash. Idempotent.
    pub fn add_vote_hash(&mut self, vote_hash: VoteHash) {
        if !self.vote_hashes.contains(&vote_hash) {
            self.vote_hashes.push(vote_hash);
        }
    }

    /// The backing vote hashes.
    pub fn vote_hashes(&self) -> &[VoteHash] {
        &self.vote_hashes
    }

    /// The number of votes backing this payee.
    pub fn vote_count(&self) -> usize {
        self.vote_hashes.len()
    }
}

impl_consensus_encoding!(Payee, script, vote_hashes);

/// The vote tally of one block height.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockPayees {
    /// The height the tally is for.
    pub height: u32,
    /// The payees voted for at this height, in order of first vote.
    pub payees: Vec<Payee>,
}

impl_consensus_encoding!(BlockPayees, height, payees);

impl BlockPayees {
    /// Creates an empty tally for a height.
    pub fn new(height: u32) -> BlockPayees {
        BlockPayees { height, payees: Vec::new() }
    }

    /// Registers a verified vote in the tally.
    pub fn add_vote(&mut self, vote: &PaymentVote) {
        let vote_hash = vote.vote_hash();
        for payee in &mut self.payees {
            if payee.script == vote.payee {
                payee.add_vote_hash(vote_hash);
                return;
            }
        }
        self.payees.push(Payee::new(vote.payee.clone(), vote_hash));
    }

    /// The payee with the most votes.
    ///
    /// Ties break towards the first-inserted entry, which is deterministic
    /// only for nodes that saw the same arrival order; consensus never
    /// relies on it because enforcement requires a quorum.
    pub fn best_payee(&self) -> Option<&ScriptBuf> {
        let mut best: Option<&Payee> = None;
        for payee in &self.payees {
            if best.map_or(true, |b| payee.vote_count() > b.vote_count()) {
                best = Some(payee);
            }
        }
        best.map(|payee| &payee.script)
    }

    /// Whether some entry for `script` has at least `required` votes.
    pub fn has_payee_with_votes(&self, script: &ScriptBuf, required: usize) -> bool {
        self.payees.iter().any(|p| p.vote_count() >= required && p.script == *script)
    }

    /// The highest vote count across payees.
    pub fn max_signatures(&self) -> usize {
        self.payees.iter().map(Payee::vote_count).max().unwrap_or(0)
    }

    /// Checks a coinbase against this tally.
    ///
    /// With fewer than the required quorum of votes on every payee the
    /// transaction is accepted; the chain decides. Otherwise some output
    /// must pay a quorum payee the masternode payment, within the
    /// [`PAYMENT_TOLERANCE`] band.
    pub fn is_transaction_valid(
        &self,
        tx: &Transaction,
        height: u32,
        block_reward: u64,
        params: &Params,
    ) -> Result<(), PayeeValidationError> {
        if self.max_signatures() < params.signatures_required {
            return Ok(());
        }

        let payment = params.masternode_payment(height, block_reward);
        let mut possible = Vec::new();
        for payee in &self.payees {
            if payee.vote_count() >= params.signatures_required {
                for txout in &tx.output {
                    if payee.script == txout.script_pubkey
                        && txout.value >= payment
                        && txout.value <= payment + PAYMENT_TOLERANCE
                    {
                        trace!(height, "found required masternode payment");
                        return Ok(());
                    }
                }
            }
            possible.push(payee_display(&payee.script, params));
        }

        Err(PayeeValidationError::MissingRequiredPayment {
            possible_payees: possible.join(","),
            payment,
        })
    }

    /// Renders the tally as `address:votes` pairs for diagnostics.
    pub fn required_payments_string(&self, params: &Params) -> String {
        if self.payees.is_empty() {
            return "Unknown".to_owned();
        }
        self.payees
            .iter()
            .map(|p| format!("{}:{}", payee_display(&p.script, params), p.vote_count()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn payee_display(script: &ScriptBuf, params: &Params) -> String {
    match Address::from_script(script, params.network) {
        Ok(address) => address.to_string(),
        Err(_) => script.to_asm_string(),
    }
}

/// A coinbase that does not pay the payee the network voted for.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PayeeValidationError {
    /// No output paid a quorum payee the masternode payment.
    MissingRequiredPayment {
        /// The payees that had votes, comma separated.
        possible_payees: String,
        /// The expected masternode payment.
        payment: u64,
    },
}

impl fmt::Display for PayeeValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PayeeValidationError::MissingRequiredPayment { ref possible_payees, payment } => {
                write!(
                    f,
                    "missing required payment, possible payees: '{}', amount: {} GENX",
                    possible_payees,
                    fmt_coin_amount(payment)
                )
            }
        }
    }
}

impl std::error::Error for PayeeValidationError {}

/// The set of observed payment votes, verified and placeholder.
#[derive(Debug, Default)]
pub struct VoteStore {
    votes: HashMap<VoteHash, PaymentVote>,
    last_vote_height: HashMap<OutPoint, u32>,
}

impl VoteStore {
    /// Creates an empty store.
    pub fn new() -> VoteStore {
        VoteStore::default()
    }

    /// Records the first observation of a vote as an unverified placeholder.
    ///
    /// Returns `false` when the hash is already known verified, in which
    /// case the caller must not process the vote again.
    pub fn observe(&mut self, vote: &PaymentVote) -> bool {
        match self.votes.entry(vote.vote_hash()) {
            Entry::Occupied(entry) => {
                if entry.get().is_verified() {
                    return false;
                }
                true
            }
            Entry::Vacant(entry) => {
                let mut placeholder = vote.clone();
                placeholder.mark_unverified();
                entry.insert(placeholder);
                true
            }
        }
    }

    /// Whether a verified vote with this hash is held.
    pub fn has_verified(&self, hash: &VoteHash) -> bool {
        self.votes.get(hash).map_or(false, PaymentVote::is_verified)
    }

    /// Returns a held vote, verified or placeholder.
    pub fn get(&self, hash: &VoteHash) -> Option<&PaymentVote> {
        self.votes.get(hash)
    }

    /// Enforces the one-vote-per-height rule and tracks the voter's newest
    /// voted height.
    pub fn update_last_vote(&mut self, vote: &PaymentVote) -> Result<(), VoteError> {
        match self.last_vote_height.entry(vote.masternode_outpoint) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == vote.block_height {
                    return Err(VoteError::DuplicateVote {
                        outpoint: vote.masternode_outpoint,
                        height: vote.block_height,
                    });
                }
                // Track the newest height even when votes arrive out of
                // order.
                if vote.block_height > *entry.get() {
                    *entry.get_mut() = vote.block_height;
                }
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(vote.block_height);
                Ok(())
            }
        }
    }

    /// The newest height this voter has voted for, if any.
    pub fn last_vote_height(&self, outpoint: &OutPoint) -> Option<u32> {
        self.last_vote_height.get(outpoint).copied()
    }

    /// Stores a verified vote.
    pub fn insert_verified(&mut self, vote: PaymentVote) -> Result<(), VoteError> {
        debug_assert!(vote.is_verified());
        let hash = vote.vote_hash();
        if self.has_verified(&hash) {
            return Err(VoteError::AlreadyKnown);
        }
        self.votes.insert(hash, vote);
        Ok(())
    }

    /// Removes every vote below the cutoff height. Placeholders included.
    pub fn prune(&mut self, below_height: u32) {
        self.votes.retain(|_, vote| vote.block_height >= below_height);
    }

    /// The number of held verified votes.
    pub fn verified_count(&self) -> usize {
        self.votes.values().filter(|v| v.is_verified()).count()
    }

    /// Snapshot of the verified votes, keyed for deterministic encoding.
    pub fn verified_votes(&self) -> BTreeMap<VoteHash, PaymentVote> {
        self.votes
            .iter()
            .filter(|(_, vote)| vote.is_verified())
            .map(|(hash, vote)| (*hash, vote.clone()))
            .collect()
    }

    /// Clears the store.
    pub fn clear(&mut self) {
        self.votes.clear();
        self.last_vote_height.clear();
    }
}

/// The serialized state of the payment engine.
///
/// `BTreeMap` keys give the blob a deterministic framing: equal state always
/// produces equal bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaymentsSnapshot {
    /// The verified primary votes by hash.
    pub votes: BTreeMap<VoteHash, PaymentVote>,
    /// The per-height tallies.
    pub blocks: BTreeMap<u32, BlockPayees>,
}

impl_consensus_encoding!(PaymentsSnapshot, votes, blocks);

/// The payment vote engine.
///
/// Owns the vote store and the per-height tallies; everything else ---
/// registry, sync state, network --- is reached through injected services.
pub struct PaymentEngine {
    params: Params,
    masternode_mode: bool,
    secp: Secp256k1<All>,
    registry: Arc<dyn MasternodeRegistry>,
    sync: Arc<dyn SyncTracker>,
    requests: Arc<dyn RequestTracker>,
    net: Arc<dyn NetGateway>,
    // Lock order: `blocks` before `votes`, always.
    blocks: Mutex<BTreeMap<u32, BlockPayees>>,
    votes: Mutex<VoteStore>,
    did_not_vote: Mutex<HashMap<OutPoint, u32>>,
    cached_height: AtomicU32,
}

impl PaymentEngine {
    /// Creates an engine over the given collaborators.
    pub fn new(
        params: Params,
        masternode_mode: bool,
        registry: Arc<dyn MasternodeRegistry>,
        sync: Arc<dyn SyncTracker>,
        requests: Arc<dyn RequestTracker>,
        net: Arc<dyn NetGateway>,
    ) -> PaymentEngine {
        PaymentEngine {
            params,
            masternode_mode,
            secp: Secp256k1::new(),
            registry,
            sync,
            requests,
            net,
            blocks: Mutex::new(BTreeMap::new()),
            votes: Mutex::new(VoteStore::new()),
            did_not_vote: Mutex::new(HashMap::new()),
            cached_height: AtomicU32::new(0),
        }
    }

    /// The consensus parameters the engine runs under.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The minimum peer protocol version for payment messages.
    pub fn min_payments_proto(&self) -> u32 {
        MIN_MASTERNODE_PAYMENT_PROTO_VERSION
    }

    /// The chain height last seen by the engine.
    pub fn cached_height(&self) -> u32 {
        self.cached_height.load(Ordering::SeqCst)
    }

    /// The number of recent heights votes are kept for.
    pub fn storage_limit(&self) -> u32 {
        self.params.storage_limit(self.registry.count())
    }

    /// Handles one payments message from a peer. Errors are absorbed here;
    /// they score the peer where deserved but never abort the caller.
    pub fn process_message(&self, peer: PeerId, peer_version: u32, message: PaymentsMessage) {
        match message {
            PaymentsMessage::PaymentSync => self.process_payment_sync(peer, peer_version),
            PaymentsMessage::PaymentVote(vote) => {
                if let Err(error) = self.process_vote(peer, peer_version, vote) {
                    debug!(peer, %error, "payment vote not accepted");
                }
            }
            PaymentsMessage::PaymentVoteSecondary(_) => {
                // Wire shape carried for forward compatibility only.
                trace!(peer, "ignoring secondary payment vote");
            }
        }
    }

    fn process_payment_sync(&self, peer: PeerId, peer_version: u32) {
        if peer_version < self.min_payments_proto() {
            debug!(peer, peer_version, "payment sync from obsolete peer");
            self.net.push_reject(
                peer,
                Reject::obsolete(CMD_MASTERNODE_PAYMENT_SYNC, self.min_payments_proto()),
            );
            return;
        }
        // Serving the votes is heavy; finish syncing ourselves first.
        if !self.sync.is_synced() {
            return;
        }
        if self.requests.has_fulfilled(peer, CMD_MASTERNODE_PAYMENT_SYNC) {
            debug!(peer, "peer already asked for the payment list");
            self.net.misbehaving(peer, 20);
            return;
        }
        self.requests.add_fulfilled(peer, CMD_MASTERNODE_PAYMENT_SYNC);
        self.sync_votes(peer);
    }

    /// Ingests one payment vote from a peer.
    pub fn process_vote(
        &self,
        peer: PeerId,
        peer_version: u32,
        vote: PaymentVote,
    ) -> Result<(), VoteError> {
        if peer_version < self.min_payments_proto() {
            self.net.push_reject(
                peer,
                Reject::obsolete(CMD_MASTERNODE_PAYMENT_VOTE_PRIMARY, self.min_payments_proto()),
            );
            return Err(VoteError::ObsoletePeer {
                version: peer_version,
                min: self.min_payments_proto(),
            });
        }

        if !self.sync.is_masternode_list_synced() {
            return Err(VoteError::NotSynced);
        }

        let vote_hash = vote.vote_hash();
        {
            let mut votes = self.votes.lock().expect("payments lock poisoned");
            if !votes.observe(&vote) {
                trace!(%vote_hash, height = vote.block_height, "vote seen");
                return Err(VoteError::AlreadyKnown);
            }
        }

        let tip = self.cached_height();
        let first = tip.saturating_sub(self.storage_limit());
        let last = tip + FUTURE_VOTE_WINDOW;
        if vote.block_height < first || vote.block_height > last {
            debug!(height = vote.block_height, first, last, "vote out of range");
            return Err(VoteError::OutOfRange { height: vote.block_height, first, last });
        }

        let info = self.check_voter(peer, &vote, tip)?;
        self.check_vote_signature(peer, &vote, &info.operator_pubkey, tip)?;

        self.add_or_update_payment_vote(vote.clone())?;

        info!(
            height = vote.block_height,
            voter = %vote.masternode_outpoint.to_short_string(),
            payee = %payee_display(&vote.payee, &self.params),
            %vote_hash,
            "new payment vote"
        );
        self.relay_vote(vote_hash);
        self.sync.bump_asset_last_time(CMD_MASTERNODE_PAYMENT_VOTE_PRIMARY);
        Ok(())
    }

    /// Announces an accepted vote to the network. Held back until fully
    /// synced so stale votes are not spread around.
    fn relay_vote(&self, vote_hash: VoteHash) {
        if !self.sync.is_synced() {
            debug!(%vote_hash, "won't relay until fully synced");
            return;
        }
        self.net.relay_inventory(Inventory::PaymentVote(vote_hash));
    }

    /// Validates the voter against the registry: existence, protocol
    /// version, and rank at the vote's seed height.
    fn check_voter(
        &self,
        peer: PeerId,
        vote: &PaymentVote,
        tip: u32,
    ) -> Result<MasternodeInfo, VoteError> {
        let info = match self.registry.masternode_info(&vote.masternode_outpoint) {
            Some(info) => info,
            None => {
                // Only ask if we are already synced and still have no idea
                // about this masternode.
                if self.sync.is_masternode_list_synced() {
                    self.registry.request_masternode(peer, &vote.masternode_outpoint);
                }
                return Err(VoteError::UnknownVoter(vote.masternode_outpoint));
            }
        };

        if info.protocol_version < self.min_payments_proto() {
            return Err(VoteError::ObsoleteMasternode {
                version: info.protocol_version,
                min: self.min_payments_proto(),
            });
        }

        // Masternodes must check ranks for historic votes too, to pick the
        // right winner for future blocks. Regular clients only need the
        // rank of future votes.
        if !self.masternode_mode && vote.block_height < tip {
            return Ok(info);
        }

        let seed_height = vote.block_height.saturating_sub(RANK_SEED_OFFSET);
        let rank = match self.registry.rank(
            &vote.masternode_outpoint,
            seed_height,
            self.min_payments_proto(),
        ) {
            Some(rank) => rank,
            None => {
                debug!(voter = %vote.masternode_outpoint.to_short_string(), "can't calculate rank");
                return Err(VoteError::RankNotCalculable(vote.masternode_outpoint));
            }
        };

        if rank > self.params.signatures_total {
            // It's common for masternodes to mistakenly believe they are in
            // the top set; only votes far out of bounds for a future height
            // are punished.
            if rank > self.params.signatures_total * 2 && vote.block_height > tip {
                warn!(
                    voter = %vote.masternode_outpoint.to_short_string(),
                    rank,
                    "masternode far out of voting rank"
                );
                self.net.misbehaving(peer, 20);
            }
            return Err(VoteError::OutOfRank { rank, max: self.params.signatures_total });
        }

        Ok(info)
    }

    fn check_vote_signature(
        &self,
        peer: PeerId,
        vote: &PaymentVote,
        pubkey: &PublicKey,
        tip: u32,
    ) -> Result<(), VoteError> {
        let verified = match SignScheme::for_height(tip, &self.params) {
            SignScheme::RawHash => vote
                .verify_signature(&self.secp, pubkey, SignScheme::RawHash)
                // Could be a vote signed just before the threshold.
                .or_else(|_| vote.verify_signature(&self.secp, pubkey, SignScheme::LegacyMessage)),
            SignScheme::LegacyMessage => {
                vote.verify_signature(&self.secp, pubkey, SignScheme::LegacyMessage)
            }
        };

        if let Err(error) = verified {
            // Our registry info or the vote could be outdated; ask for an
            // update in case it is ours. Punish only votes for future
            // heights, anything older may be signed with a rotated key.
            if self.sync.is_masternode_list_synced() && vote.block_height > tip {
                debug!(%error, "invalid payment vote signature");
                self.net.misbehaving(peer, 20);
            }
            self.registry.request_masternode(peer, &vote.masternode_outpoint);
            return Err(VoteError::BadSignature);
        }
        Ok(())
    }

    /// Stores a verified vote and registers it in the tally of its height.
    fn add_or_update_payment_vote(&self, vote: PaymentVote) -> Result<(), VoteError> {
        let mut blocks = self.blocks.lock().expect("payments lock poisoned");
        let mut votes = self.votes.lock().expect("payments lock poisoned");

        votes.update_last_vote(&vote)?;
        votes.insert_verified(vote.clone())?;
        blocks
            .entry(vote.block_height)
            .or_insert_with(|| BlockPayees::new(vote.block_height))
            .add_vote(&vote);
        Ok(())
    }

    /// Whether a verified vote with this hash is held.
    pub fn has_verified_payment_vote(&self, hash: &VoteHash) -> bool {
        self.votes.lock().expect("payments lock poisoned").has_verified(hash)
    }

    /// The winning payee voted for `height`, if the tally has one.
    pub fn block_payee(&self, height: u32) -> Option<ScriptBuf> {
        let blocks = self.blocks.lock().expect("payments lock poisoned");
        blocks.get(&height).and_then(|payees| payees.best_payee().cloned())
    }

    /// A clone of the tally for `height`, if one exists.
    pub fn block_payees(&self, height: u32) -> Option<BlockPayees> {
        self.blocks.lock().expect("payments lock poisoned").get(&height).cloned()
    }

    /// Fills the masternode payment into a block template's coinbase.
    ///
    /// The payment is subtracted from the miner output and appended as a new
    /// output to the voted payee, falling back to the locally calculated
    /// winner when no votes are in. Returns the appended output.
    pub fn fill_block_payee(
        &self,
        tx: &mut Transaction,
        height: u32,
        block_reward: u64,
    ) -> Option<TxOut> {
        let payee = match self.block_payee(height) {
            Some(payee) => payee,
            // No winner detected; fill with the locally calculated winner
            // and hope for the best.
            None => match self.registry.next_in_queue_for_payment(height) {
                Some(info) => info.payee,
                None => {
                    debug!(height, "failed to detect masternode to pay");
                    return None;
                }
            },
        };

        if tx.output.is_empty() {
            warn!(height, "refusing to fill a coinbase without a miner output");
            return None;
        }

        let payment = self.params.masternode_payment(height, block_reward);
        // Split the reward between the miner and the masternode.
        tx.output[0].value -= payment;
        let txout = TxOut::new(payment, payee);
        tx.output.push(txout.clone());

        info!(
            height,
            amount = %fmt_coin_amount(payment),
            payee = %payee_display(&txout.script_pubkey, &self.params),
            "masternode payment filled"
        );
        Some(txout)
    }

    /// Checks a regular-regime coinbase against the tally for its height.
    ///
    /// Accepts when the height has no tally or no quorum yet.
    pub fn is_transaction_valid(
        &self,
        tx: &Transaction,
        height: u32,
        block_reward: u64,
    ) -> Result<(), PayeeValidationError> {
        let blocks = self.blocks.lock().expect("payments lock poisoned");
        match blocks.get(&height) {
            None => Ok(()),
            Some(payees) => payees.is_transaction_valid(tx, height, block_reward, &self.params),
        }
    }

    /// Whether this masternode is scheduled to get paid soon.
    ///
    /// Looks ahead eight blocks to allow for propagation of the freshest
    /// votes.
    pub fn is_scheduled(&self, info: &MasternodeInfo, not_height: u32) -> bool {
        if !self.sync.is_masternode_list_synced() {
            return false;
        }
        let tip = self.cached_height();
        let blocks = self.blocks.lock().expect("payments lock poisoned");
        for height in tip..=tip + 8 {
            if height == not_height {
                continue;
            }
            let payee = blocks.get(&height).and_then(|payees| payees.best_payee());
            if payee == Some(&info.payee) {
                return true;
            }
        }
        false
    }

    /// Votes for the payee of `height` as the locally running masternode.
    ///
    /// Returns whether a vote was produced, stored and relayed.
    pub fn vote(&self, active: &ActiveMasternode, height: u32) -> bool {
        if !self.masternode_mode {
            return false;
        }
        // With the winners list out of sync we have little chance to pick
        // the right payee, but without enough registry data there is none.
        if !self.sync.is_masternode_list_synced() {
            return false;
        }

        let seed_height = height.saturating_sub(RANK_SEED_OFFSET);
        match self.registry.rank(&active.outpoint, seed_height, self.min_payments_proto()) {
            None => {
                debug!(height, "unknown masternode, not voting");
                return false;
            }
            Some(rank) if rank > self.params.signatures_total => {
                debug!(height, rank, "not in the top voting set, not voting");
                return false;
            }
            Some(_) => {}
        }

        // Pay the masternode longest unpaid with an old enough collateral.
        let winner = match self.registry.next_in_queue_for_payment(height) {
            Some(info) => info,
            None => {
                debug!(height, "failed to find masternode to pay");
                return false;
            }
        };

        let mut vote = PaymentVote::new(active.outpoint, height, winner.payee);
        let scheme = SignScheme::for_height(self.cached_height(), &self.params);
        if let Err(error) = vote.sign(&self.secp, active, scheme) {
            warn!(%error, "failed to sign payment vote");
            return false;
        }

        let vote_hash = vote.vote_hash();
        match self.add_or_update_payment_vote(vote.clone()) {
            Ok(()) => {
                info!(
                    height,
                    payee = %payee_display(&vote.payee, &self.params),
                    "voted for masternode payment"
                );
                self.relay_vote(vote_hash);
                true
            }
            Err(error) => {
                debug!(%error, "own payment vote not stored");
                false
            }
        }
    }

    /// Records which of the expected top-ranked masternodes failed to vote
    /// for a height.
    pub fn check_block_votes(&self, height: u32) {
        if !self.sync.is_winners_list_synced() {
            return;
        }
        let seed_height = height.saturating_sub(RANK_SEED_OFFSET);
        let ranked = self.registry.ranks(seed_height, self.min_payments_proto());
        if ranked.is_empty() {
            debug!(height, "masternode ranks unavailable");
            return;
        }

        let blocks = self.blocks.lock().expect("payments lock poisoned");
        let votes = self.votes.lock().expect("payments lock poisoned");
        let mut missing = Vec::new();
        for info in ranked.iter().take(self.params.signatures_total) {
            let voted = blocks.get(&height).map_or(false, |payees| {
                payees.payees.iter().any(|payee| {
                    payee.vote_hashes().iter().any(|hash| {
                        votes
                            .get(hash)
                            .map_or(false, |vote| vote.masternode_outpoint == info.outpoint)
                    })
                })
            });
            if !voted {
                missing.push(info.outpoint);
            }
        }
        drop(votes);
        drop(blocks);

        if missing.is_empty() {
            return;
        }
        let mut did_not_vote = self.did_not_vote.lock().expect("payments lock poisoned");
        for outpoint in missing {
            let strikes = did_not_vote.entry(outpoint).or_insert(0);
            *strikes += 1;
            debug!(height, voter = %outpoint.to_short_string(), strikes = *strikes, "no vote received");
        }
    }

    /// Announces the verified votes for near-future heights to a peer.
    ///
    /// Only votes for `[tip, tip + 20)` are sent; the peer requests older
    /// payment blocks individually.
    pub fn sync_votes(&self, peer: PeerId) {
        if !self.sync.is_winners_list_synced() {
            return;
        }
        let tip = self.cached_height();
        let mut inv_count = 0i32;
        {
            let blocks = self.blocks.lock().expect("payments lock poisoned");
            let votes = self.votes.lock().expect("payments lock poisoned");
            for height in tip..tip + FUTURE_VOTE_WINDOW {
                if let Some(payees) = blocks.get(&height) {
                    for payee in &payees.payees {
                        for hash in payee.vote_hashes() {
                            if !votes.has_verified(hash) {
                                continue;
                            }
                            self.net.push_inventory(peer, Inventory::PaymentVote(*hash));
                            inv_count += 1;
                        }
                    }
                }
            }
        }
        info!(peer, inv_count, "sent payment votes");
        self.net.push_sync_status(peer, SyncStatusCount::new(MASTERNODE_SYNC_MNW, inv_count));
    }

    /// Serves a `getdata` request for a payments inventory item.
    pub fn process_get_data(&self, peer: PeerId, inv: Inventory) {
        match inv {
            Inventory::PaymentVote(hash) => {
                let votes = self.votes.lock().expect("payments lock poisoned");
                if let Some(vote) = votes.get(&hash).filter(|vote| vote.is_verified()) {
                    self.net.push_payment_vote(peer, vote);
                }
            }
            // Whole payment blocks are keyed by block hash, which requires
            // chain access this subsystem does not have; peers fall back to
            // per-vote requests.
            Inventory::PaymentBlock(_) => trace!(peer, "payment block getdata ignored"),
            _ => {}
        }
    }

    /// Prunes votes and tallies that fell out of the storage window.
    pub fn check_and_remove(&self) {
        if !self.sync.is_blockchain_synced() {
            return;
        }
        let cutoff = self.cached_height().saturating_sub(self.storage_limit());
        let mut blocks = self.blocks.lock().expect("payments lock poisoned");
        let mut votes = self.votes.lock().expect("payments lock poisoned");
        votes.prune(cutoff);
        blocks.retain(|height, _| *height >= cutoff);
        debug!(
            cutoff,
            votes = votes.verified_count(),
            blocks = blocks.len(),
            "pruned payment votes"
        );
    }

    /// Reacts to a new chain tip: re-checks who failed to vote and casts
    /// this node's own vote for the upcoming payment height.
    pub fn updated_block_tip(&self, height: u32, active: Option<&ActiveMasternode>) {
        self.cached_height.store(height, Ordering::SeqCst);
        debug!(height, "payment engine saw new tip");

        let future = height + 10;
        self.check_block_votes(future - 1);
        if let Some(active) = active {
            self.vote(active, future);
        }
    }

    /// Renders the expected payments for a height, for diagnostics and RPC.
    pub fn required_payments_string(&self, height: u32) -> String {
        let blocks = self.blocks.lock().expect("payments lock poisoned");
        match blocks.get(&height) {
            None => "Unknown".to_owned(),
            Some(payees) => payees.required_payments_string(&self.params),
        }
    }

    /// The number of heights with a tally.
    pub fn block_count(&self) -> usize {
        self.blocks.lock().expect("payments lock poisoned").len()
    }

    /// The number of verified votes held.
    pub fn vote_count(&self) -> usize {
        self.votes.lock().expect("payments lock poisoned").verified_count()
    }

    /// Whether enough payment history is stored to stop requesting more.
    pub fn is_enough_data(&self) -> bool {
        let average_votes = (self.params.signatures_total + self.params.signatures_required) / 2;
        let limit = self.storage_limit() as usize;
        self.block_count() > limit && self.vote_count() > limit * average_votes
    }

    /// Exports the engine state for persistence.
    pub fn snapshot(&self) -> PaymentsSnapshot {
        let blocks = self.blocks.lock().expect("payments lock poisoned");
        let votes = self.votes.lock().expect("payments lock poisoned");
        PaymentsSnapshot { votes: votes.verified_votes(), blocks: blocks.clone() }
    }

    /// Restores the engine state from a persisted snapshot.
    ///
    /// Votes outside the current height window are discarded, and tally
    /// entries are reconciled against the votes that survived.
    pub fn restore(&self, snapshot: PaymentsSnapshot) {
        let tip = self.cached_height();
        let cutoff = if tip > 0 { tip.saturating_sub(self.storage_limit()) } else { 0 };

        let mut blocks = self.blocks.lock().expect("payments lock poisoned");
        let mut votes = self.votes.lock().expect("payments lock poisoned");

        votes.clear();
        for (_, vote) in snapshot.votes {
            if !vote.is_verified() || vote.block_height < cutoff {
                continue;
            }
            if votes.update_last_vote(&vote).is_ok() {
                let _ = votes.insert_verified(vote);
            }
        }

        blocks.clear();
        for (height, mut payees) in snapshot.blocks {
            if height < cutoff {
                continue;
            }
            for payee in &mut payees.payees {
                payee.vote_hashes.retain(|hash| votes.has_verified(hash));
            }
            payees.payees.retain(|payee| payee.vote_count() > 0);
            if !payees.payees.is_empty() {
                blocks.insert(height, payees);
            }
        }
        info!(votes = votes.verified_count(), blocks = blocks.len(), "payment state restored");
    }

    /// Drops every vote and tally. Used on reindex.
    pub fn clear(&self) {
        let mut blocks = self.blocks.lock().expect("payments lock poisoned");
        let mut votes = self.votes.lock().expect("payments lock poisoned");
        blocks.clear();
        votes.clear();
        self.did_not_vote.lock().expect("payments lock poisoned").clear();
    }
}

impl fmt::Display for PaymentEngine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Votes: {}, Blocks: {}", self.vote_count(), self.block_count())
    }
}

#[cfg(test)]
mod tests {
    use hashes::Hash;

    use super::*;
    use crate::consensus::encode::{deserialize, serialize};
    use crate::hash_types::{PubkeyHash, Txid};
    use crate::network::constants::Network;

    fn outpoint(tag: u8) -> OutPoint {
        OutPoint::new(Txid::hash(&[tag]), 0)
    }

    fn payee_script(tag: &[u8]) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&PubkeyHash::hash(tag))
    }

    fn vote(voter: u8, height: u32, payee: &[u8]) -> PaymentVote {
        let mut vote = PaymentVote::new(outpoint(voter), height, payee_script(payee));
        vote.signature = vec![1u8; 65];
        vote
    }

    #[test]
    fn vote_hash_ignores_signature() {
        let mut one = vote(1, 1010, b"payee");
        let hash = one.vote_hash();
        one.signature = vec![9u8; 65];
        assert_eq!(one.vote_hash(), hash);
        one.mark_unverified();
        assert_eq!(one.vote_hash(), hash);
        assert!(!one.is_verified());

        // Different voters and heights hash differently.
        assert_ne!(vote(2, 1010, b"payee").vote_hash(), hash);
        assert_ne!(vote(1, 1011, b"payee").vote_hash(), hash);
    }

    #[test]
    fn vote_wire_roundtrip() {
        let one = vote(1, 1010, b"payee");
        let decoded: PaymentVote = deserialize(&serialize(&one)).unwrap();
        assert_eq!(decoded, one);
        assert_eq!(decoded.vote_hash(), one.vote_hash());
    }

    #[test]
    fn vote_signing_schemes_roundtrip() {
        let secp = Secp256k1::new();
        let (secret_key, _) = secp.generate_keypair(&mut secp256k1::rand::thread_rng());
        let active = ActiveMasternode::new(&secp, outpoint(1), secret_key);

        for scheme in [SignScheme::RawHash, SignScheme::LegacyMessage] {
            let mut one = PaymentVote::new(active.outpoint, 1010, payee_script(b"payee"));
            one.sign(&secp, &active, scheme).unwrap();
            assert!(one.is_verified());
            assert!(one.verify_signature(&secp, &active.public_key, scheme).is_ok());

            // The schemes do not cross-verify.
            let other = match scheme {
                SignScheme::RawHash => SignScheme::LegacyMessage,
                SignScheme::LegacyMessage => SignScheme::RawHash,
            };
            assert!(one.verify_signature(&secp, &active.public_key, other).is_err());
        }
    }

    #[test]
    fn scheme_switches_at_threshold() {
        let params = Params::new(Network::Genesis);
        assert_eq!(
            SignScheme::for_height(params.sign_hash_threshold, &params),
            SignScheme::LegacyMessage
        );
        assert_eq!(
            SignScheme::for_height(params.sign_hash_threshold + 1, &params),
            SignScheme::RawHash
        );
    }

    #[test]
    fn tally_counts_and_best_payee() {
        let mut payees = BlockPayees::new(1010);
        assert!(payees.best_payee().is_none());

        for voter in 1..=6 {
            payees.add_vote(&vote(voter, 1010, b"A"));
        }
        for voter in 7..=10 {
            payees.add_vote(&vote(voter, 1010, b"B"));
        }

        assert_eq!(payees.best_payee(), Some(&payee_script(b"A")));
        assert_eq!(payees.max_signatures(), 6);
        assert!(payees.has_payee_with_votes(&payee_script(b"A"), 6));
        assert!(!payees.has_payee_with_votes(&payee_script(b"B"), 6));
        assert!(payees.has_payee_with_votes(&payee_script(b"B"), 4));

        // Re-adding an already counted vote does not inflate the tally.
        payees.add_vote(&vote(1, 1010, b"A"));
        assert_eq!(payees.max_signatures(), 6);
    }

    #[test]
    fn tally_tie_breaks_to_first_inserted() {
        let mut payees = BlockPayees::new(1010);
        payees.add_vote(&vote(1, 1010, b"A"));
        payees.add_vote(&vote(2, 1010, b"B"));
        assert_eq!(payees.best_payee(), Some(&payee_script(b"A")));
    }

    #[test]
    fn tally_validation_without_quorum_accepts_anything() {
        let params = Params::new(Network::Regtest);
        let mut payees = BlockPayees::new(1010);
        for voter in 1..=5 {
            payees.add_vote(&vote(voter, 1010, b"A"));
        }
        let tx = Transaction { version: 1, lock_time: 0, input: vec![], output: vec![] };
        assert!(payees.is_transaction_valid(&tx, 1010, 500, &params).is_ok());
    }

    #[test]
    fn vote_store_duplicate_handling() {
        let mut store = VoteStore::new();
        let first = vote(1, 1010, b"A");
        let second = vote(1, 1010, b"B");

        assert!(store.observe(&first));
        store.update_last_vote(&first).unwrap();
        store.insert_verified(first.clone()).unwrap();
        assert!(store.has_verified(&first.vote_hash()));

        // Observing the now verified hash is refused.
        assert!(!store.observe(&first));

        // A second vote from the same voter at the same height is a
        // duplicate even though its hash differs.
        assert!(store.observe(&second));
        assert!(matches!(
            store.update_last_vote(&second),
            Err(VoteError::DuplicateVote { height: 1010, .. })
        ));

        // A later height is fine and advances the marker.
        let third = vote(1, 1011, b"A");
        store.update_last_vote(&third).unwrap();
        assert_eq!(store.last_vote_height(&outpoint(1)), Some(1011));

        // An earlier one does not move it backwards.
        let historic = vote(1, 900, b"A");
        store.update_last_vote(&historic).unwrap();
        assert_eq!(store.last_vote_height(&outpoint(1)), Some(1011));
    }

    #[test]
    fn vote_store_prune() {
        let mut store = VoteStore::new();
        for height in [100u32, 200, 300] {
            let v = vote(1, height, b"A");
            // different voters so the height rule does not interfere
            let v = PaymentVote { masternode_outpoint: outpoint(height as u8), ..v };
            store.update_last_vote(&v).unwrap();
            store.insert_verified(v).unwrap();
        }
        store.prune(200);
        assert_eq!(store.verified_count(), 2);
        for vote in store.verified_votes().values() {
            assert!(vote.block_height >= 200);
        }
    }

    #[test]
    fn snapshot_roundtrip() {
        let mut store = VoteStore::new();
        let mut payees = BlockPayees::new(1010);
        for voter in 1..=3 {
            let v = vote(voter, 1010, b"A");
            store.update_last_vote(&v).unwrap();
            payees.add_vote(&v);
            store.insert_verified(v).unwrap();
        }
        let snapshot = PaymentsSnapshot {
            votes: store.verified_votes(),
            blocks: [(1010u32, payees)].into_iter().collect(),
        };
        let decoded: PaymentsSnapshot = deserialize(&serialize(&snapshot)).unwrap();
        assert_eq!(decoded, snapshot);
        // Deterministic framing: encoding twice gives identical bytes.
        assert_eq!(serialize(&snapshot), serialize(&decoded));
    }
}
