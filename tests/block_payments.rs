// SPDX-License-Identifier: CC0-1.0

//! End-to-end tests of the payment subsystem: vote ingest through the
//! engine, governance triggers through the manager, and block validation
//! through the gate, all against in-memory collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hashes::Hash;
use secp256k1::{All, Secp256k1, SecretKey};

use genesis_masternodes::blockdata::script::ScriptBuf;
use genesis_masternodes::blockdata::transaction::{OutPoint, Transaction, TxIn, TxOut};
use genesis_masternodes::blockdata::block::{Block, BlockHeader};
use genesis_masternodes::consensus::params::Params;
use genesis_masternodes::governance::classes::GovernanceTriggerManager;
use genesis_masternodes::governance::object::GovernanceStore;
use genesis_masternodes::hash_types::{BlockHash, GovernanceObjectHash, PubkeyHash, Txid, VoteHash};
use genesis_masternodes::masternodes::gate::{BlockPaymentGate, BlockValueError};
use genesis_masternodes::masternodes::payments::{
    PaymentEngine, PaymentVote, PaymentsSnapshot, SignScheme, VoteError,
};
use genesis_masternodes::masternodes::registry::{
    ActiveMasternode, MasternodeInfo, MasternodeRegistry,
};
use genesis_masternodes::masternodes::scheduler::PaymentsScheduler;
use genesis_masternodes::masternodes::sync::{RequestTracker, SyncTracker};
use genesis_masternodes::masternodes::NetGateway;
use genesis_masternodes::network::constants::{Network, MIN_MASTERNODE_PAYMENT_PROTO_VERSION};
use genesis_masternodes::network::message_masternode::{
    Inventory, PaymentsMessage, Reject, SyncStatusCount,
};
use genesis_masternodes::network::PeerId;
use genesis_masternodes::util::address::{Address, Payload};
use genesis_masternodes::util::flatdb::FlatDb;

const COIN: u64 = 100_000_000;
const PROTO: u32 = MIN_MASTERNODE_PAYMENT_PROTO_VERSION;

/// Parameters for the scenarios: governance blocks every 35 blocks with a
/// 35 GENX budget, masternode share 20% of the block reward, enforcement on
/// from the start.
fn scenario_params() -> Params {
    let mut params = Params::new(Network::Regtest);
    params.payments_start_block = 10;
    params.mega_interval = 35;
    params.sub_interval = 10;
    params.bonus_interval = 5;
    params.governance_block_offset = 0;
    params.last_checkpoint_height = 0;
    params.mn_update_threshold = 0;
    params.subsidy_halving_interval = 1_000_000;
    params.reward_finder = 400;
    params.reward_masternode = 100;
    params.reward_founders = 0;
    params.reward_governance = 1;
    params
}

struct TestRegistry {
    masternodes: Vec<MasternodeInfo>,
    requested: Mutex<Vec<OutPoint>>,
}

impl TestRegistry {
    fn new(masternodes: Vec<MasternodeInfo>) -> Self {
        TestRegistry { masternodes, requested: Mutex::new(Vec::new()) }
    }
}

impl MasternodeRegistry for TestRegistry {
    fn masternode_info(&self, outpoint: &OutPoint) -> Option<MasternodeInfo> {
        self.masternodes.iter().find(|info| info.outpoint == *outpoint).cloned()
    }

    fn rank(&self, outpoint: &OutPoint, _seed_height: u32, _min_protocol: u32) -> Option<usize> {
        self.masternodes.iter().position(|info| info.outpoint == *outpoint).map(|i| i + 1)
    }

    fn ranks(&self, _seed_height: u32, _min_protocol: u32) -> Vec<MasternodeInfo> {
        self.masternodes.clone()
    }

    fn next_in_queue_for_payment(&self, _height: u32) -> Option<MasternodeInfo> {
        self.masternodes.first().cloned()
    }

    fn count(&self) -> usize {
        self.masternodes.len()
    }

    fn request_masternode(&self, _peer: PeerId, outpoint: &OutPoint) {
        self.requested.lock().unwrap().push(*outpoint);
    }
}

#[derive(Default)]
struct TestSync {
    unsynced: AtomicBool,
}

impl SyncTracker for TestSync {
    fn is_blockchain_synced(&self) -> bool {
        !self.unsynced.load(Ordering::SeqCst)
    }
    fn is_masternode_list_synced(&self) -> bool {
        !self.unsynced.load(Ordering::SeqCst)
    }
    fn is_winners_list_synced(&self) -> bool {
        !self.unsynced.load(Ordering::SeqCst)
    }
    fn is_synced(&self) -> bool {
        !self.unsynced.load(Ordering::SeqCst)
    }
    fn bump_asset_last_time(&self, _asset: &str) {}
}

#[derive(Default)]
struct TestRequests {
    fulfilled: Mutex<HashSet<(PeerId, String)>>,
}

impl RequestTracker for TestRequests {
    fn has_fulfilled(&self, peer: PeerId, request: &str) -> bool {
        self.fulfilled.lock().unwrap().contains(&(peer, request.to_owned()))
    }
    fn add_fulfilled(&self, peer: PeerId, request: &str) {
        self.fulfilled.lock().unwrap().insert((peer, request.to_owned()));
    }
}

#[derive(Debug)]
enum NetEvent {
    Relay(Inventory),
    Push(PeerId, Inventory),
    Vote(PeerId, VoteHash),
    Status(PeerId, SyncStatusCount),
    Reject(PeerId, Reject),
    Misbehaving(PeerId, u32),
}

#[derive(Default)]
struct TestNet {
    events: Mutex<Vec<NetEvent>>,
}

impl TestNet {
    fn misbehavior_of(&self, peer: PeerId) -> u32 {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| match e {
                NetEvent::Misbehaving(p, score) if *p == peer => *score,
                _ => 0,
            })
            .sum()
    }

    fn relayed(&self) -> Vec<Inventory> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                NetEvent::Relay(inv) => Some(*inv),
                _ => None,
            })
            .collect()
    }

    fn rejects(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, NetEvent::Reject(_, _)))
            .count()
    }
}

impl NetGateway for TestNet {
    fn relay_inventory(&self, inv: Inventory) {
        self.events.lock().unwrap().push(NetEvent::Relay(inv));
    }
    fn push_inventory(&self, peer: PeerId, inv: Inventory) {
        self.events.lock().unwrap().push(NetEvent::Push(peer, inv));
    }
    fn push_payment_vote(&self, peer: PeerId, vote: &PaymentVote) {
        self.events.lock().unwrap().push(NetEvent::Vote(peer, vote.vote_hash()));
    }
    fn push_sync_status(&self, peer: PeerId, status: SyncStatusCount) {
        self.events.lock().unwrap().push(NetEvent::Status(peer, status));
    }
    fn push_reject(&self, peer: PeerId, reject: Reject) {
        self.events.lock().unwrap().push(NetEvent::Reject(peer, reject));
    }
    fn misbehaving(&self, peer: PeerId, score: u32) {
        self.events.lock().unwrap().push(NetEvent::Misbehaving(peer, score));
    }
}

struct StoredObject {
    payload: serde_json::Value,
    funding_cached: bool,
    yes_count: i64,
}

#[derive(Default)]
struct TestGovernanceStore {
    objects: Mutex<HashMap<GovernanceObjectHash, StoredObject>>,
}

impl TestGovernanceStore {
    fn insert(&self, hash: GovernanceObjectHash, payload: serde_json::Value, yes_count: i64) {
        self.objects
            .lock()
            .unwrap()
            .insert(hash, StoredObject { payload, funding_cached: true, yes_count });
    }
}

impl GovernanceStore for TestGovernanceStore {
    fn contains(&self, hash: &GovernanceObjectHash) -> bool {
        self.objects.lock().unwrap().contains_key(hash)
    }
    fn is_trigger(&self, hash: &GovernanceObjectHash) -> bool {
        self.contains(hash)
    }
    fn payload_json(&self, hash: &GovernanceObjectHash) -> Option<serde_json::Value> {
        self.objects.lock().unwrap().get(hash).map(|o| o.payload.clone())
    }
    fn is_funding_cached(&self, hash: &GovernanceObjectHash) -> bool {
        self.objects.lock().unwrap().get(hash).map_or(false, |o| o.funding_cached)
    }
    fn absolute_yes_count(&self, hash: &GovernanceObjectHash) -> i64 {
        self.objects.lock().unwrap().get(hash).map_or(0, |o| o.yes_count)
    }
    fn flag_invalid(&self, _hash: &GovernanceObjectHash) {}
    fn mark_for_deletion(&self, hash: &GovernanceObjectHash, _timestamp: u64) {
        self.objects.lock().unwrap().remove(hash);
    }
    fn flag_expired(&self, _hash: &GovernanceObjectHash, _timestamp: u64) {}
}

/// A fully wired subsystem over in-memory collaborators, with ten ranked
/// masternodes whose keys are held for signing votes.
struct Harness {
    secp: Secp256k1<All>,
    params: Params,
    keys: Vec<SecretKey>,
    registry: Arc<TestRegistry>,
    sync: Arc<TestSync>,
    net: Arc<TestNet>,
    store: Arc<TestGovernanceStore>,
    engine: Arc<PaymentEngine>,
    triggers: Arc<GovernanceTriggerManager>,
    gate: BlockPaymentGate,
}

fn payee_script(tag: &[u8]) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::hash(tag))
}

fn collateral(index: u8) -> OutPoint {
    OutPoint::new(Txid::hash(&[index, 0xC0]), 0)
}

fn harness(tip: u32) -> Harness {
    let secp = Secp256k1::new();
    let params = scenario_params();

    let mut keys = Vec::new();
    let mut masternodes = Vec::new();
    for index in 0..10u8 {
        let (secret_key, public_key) = secp.generate_keypair(&mut secp256k1::rand::thread_rng());
        keys.push(secret_key);
        masternodes.push(MasternodeInfo {
            outpoint: collateral(index),
            operator_pubkey: public_key,
            payee: payee_script(&[b'm', index]),
            protocol_version: PROTO,
        });
    }

    let registry = Arc::new(TestRegistry::new(masternodes));
    let sync = Arc::new(TestSync::default());
    let requests = Arc::new(TestRequests::default());
    let net = Arc::new(TestNet::default());
    let store = Arc::new(TestGovernanceStore::default());

    let engine = Arc::new(PaymentEngine::new(
        params.clone(),
        false,
        registry.clone(),
        sync.clone(),
        requests.clone(),
        net.clone(),
    ));
    engine.updated_block_tip(tip, None);

    let triggers = Arc::new(GovernanceTriggerManager::new(params.clone(), store.clone()));
    let gate = BlockPaymentGate::new(params.clone(), engine.clone(), triggers.clone(), sync.clone());

    Harness { secp, params, keys, registry, sync, net, store, engine, triggers, gate }
}

impl Harness {
    /// Builds and signs a vote from masternode `voter` for `payee`.
    fn signed_vote(&self, voter: usize, height: u32, payee: &ScriptBuf) -> PaymentVote {
        let active =
            ActiveMasternode::new(&self.secp, collateral(voter as u8), self.keys[voter]);
        let mut vote = PaymentVote::new(active.outpoint, height, payee.clone());
        let scheme = SignScheme::for_height(self.engine.cached_height(), &self.params);
        vote.sign(&self.secp, &active, scheme).unwrap();
        vote
    }

    /// Delivers a signed vote from masternode `voter` over the wire.
    fn deliver_vote(
        &self,
        voter: usize,
        height: u32,
        payee: &ScriptBuf,
    ) -> Result<(), VoteError> {
        let vote = self.signed_vote(voter, height, payee);
        self.engine.process_vote(100 + voter as PeerId, PROTO, vote)
    }
}

fn coinbase(outputs: Vec<TxOut>) -> Transaction {
    Transaction { version: 1, lock_time: 0, input: vec![TxIn::default()], output: outputs }
}

fn block_with(outputs: Vec<TxOut>) -> Block {
    Block {
        header: BlockHeader {
            version: 4,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: BlockHash::all_zeros(),
            time: 0,
            bits: 0,
            nonce: 0,
        },
        txdata: vec![coinbase(outputs)],
    }
}

fn test_address(tag: &[u8]) -> Address {
    Address { network: Network::Testnet, payload: Payload::PubkeyHash(PubkeyHash::hash(tag)) }
}

fn governance_payload(height: u32, addresses: &[&Address], amounts: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "event_block_height": height,
        "payment_addresses": addresses.iter().map(|a| a.to_string()).collect::<Vec<_>>().join("|"),
        "payment_amounts": amounts.join("|"),
    })
}

// S1: six of ten masternodes vote for payee A at height 1010; a coinbase
// paying A one fifth of the reward is accepted.
#[test]
fn s1_regular_block_accepted_on_quorum() {
    let h = harness(1000);
    let payee_a = payee_script(b"P_A");
    let payee_b = payee_script(b"P_B");

    for voter in 0..6 {
        h.deliver_vote(voter, 1010, &payee_a).unwrap();
    }
    for voter in 6..10 {
        h.deliver_vote(voter, 1010, &payee_b).unwrap();
    }

    assert_eq!(h.engine.block_payee(1010), Some(payee_a.clone()));

    let reward = 5 * COIN;
    let tx = coinbase(vec![
        TxOut::new(4 * COIN, payee_script(b"miner")),
        TxOut::new(COIN, payee_a),
    ]);
    assert!(h.gate.is_block_payee_valid(&tx, 1010, reward));

    // All ten votes were accepted and relayed.
    assert_eq!(h.net.relayed().len(), 10);
    assert_eq!(h.engine.vote_count(), 10);
}

// S2: same votes, but the coinbase pays an unvoted payee; rejection lists
// the known payees.
#[test]
fn s2_regular_block_rejected_on_wrong_payee() {
    let h = harness(1000);
    let payee_a = payee_script(b"P_A");
    let payee_b = payee_script(b"P_B");

    for voter in 0..6 {
        h.deliver_vote(voter, 1010, &payee_a).unwrap();
    }
    for voter in 6..10 {
        h.deliver_vote(voter, 1010, &payee_b).unwrap();
    }

    let reward = 5 * COIN;
    let tx = coinbase(vec![
        TxOut::new(4 * COIN, payee_script(b"miner")),
        TxOut::new(COIN, payee_script(b"P_C")),
    ]);
    assert!(!h.gate.is_block_payee_valid(&tx, 1010, reward));

    let error = h.engine.is_transaction_valid(&tx, 1010, reward).unwrap_err();
    let message = error.to_string();
    let addr_a = Address::from_script(&payee_a, Network::Regtest).unwrap().to_string();
    let addr_b = Address::from_script(&payee_b, Network::Regtest).unwrap().to_string();
    assert!(message.contains(&format!("{},{}", addr_a, addr_b)), "{}", message);
}

// S3: a governance height with no active trigger falls through to the
// regular rules.
#[test]
fn s3_governance_height_without_trigger() {
    let h = harness(10_070);
    let height = 10_080;
    assert!(h.params.is_governance_block_height(height));
    assert!(!h.triggers.is_triggered(height));

    let reward = 5 * COIN;
    let block = block_with(vec![TxOut::new(reward, payee_script(b"miner"))]);
    assert_eq!(h.gate.is_block_value_valid(&block, height, reward), Ok(()));
    // No tally for the height either, so the payee check accepts.
    assert!(h.gate.is_block_payee_valid(&block.txdata[0], height, reward));

    // The ceiling still binds.
    let greedy = block_with(vec![TxOut::new(reward + 1, payee_script(b"miner"))]);
    assert!(matches!(
        h.gate.is_block_value_valid(&greedy, height, reward),
        Err(BlockValueError::ExceedsBlockReward { .. })
    ));
}

// S4: a parsed and funded trigger at 10080 demands A1 then A2; a coinbase
// carrying them in order is valid.
#[test]
fn s4_governance_block_accepted() {
    let h = harness(10_070);
    let height = 10_080;
    let a1 = test_address(b"A1");
    let a2 = test_address(b"A2");

    let hash = GovernanceObjectHash::hash(b"trigger");
    h.store.insert(hash, governance_payload(height, &[&a1, &a2], &["10.0", "20.0"]), 7);
    h.triggers.add_new_trigger(hash).unwrap();
    assert!(h.triggers.is_triggered(height));

    let reward = 5 * COIN;
    let block = block_with(vec![
        TxOut::new(3 * COIN, payee_script(b"miner")),
        TxOut::new(10 * COIN, a1.script_pubkey()),
        TxOut::new(20 * COIN, a2.script_pubkey()),
    ]);
    assert_eq!(h.params.governance_payments_limit(height), 35 * COIN);
    assert_eq!(h.gate.is_block_value_valid(&block, height, reward), Ok(()));
    assert!(h.gate.is_block_payee_valid(&block.txdata[0], height, reward));

    // After the chain accepts the block, the trigger is executed.
    h.gate.block_connected(height);
    let best = h.triggers.best_governance_block(height).unwrap();
    assert!(best.is_executed());
}

// S5: the same trigger, with the two governance outputs swapped, is
// rejected: validation is order-sensitive.
#[test]
fn s5_governance_block_rejected_on_order_swap() {
    let h = harness(10_070);
    let height = 10_080;
    let a1 = test_address(b"A1");
    let a2 = test_address(b"A2");

    let hash = GovernanceObjectHash::hash(b"trigger");
    h.store.insert(hash, governance_payload(height, &[&a1, &a2], &["10.0", "20.0"]), 7);
    h.triggers.add_new_trigger(hash).unwrap();

    let reward = 5 * COIN;
    let block = block_with(vec![
        TxOut::new(3 * COIN, payee_script(b"miner")),
        TxOut::new(20 * COIN, a2.script_pubkey()),
        TxOut::new(10 * COIN, a1.script_pubkey()),
    ]);
    assert!(matches!(
        h.gate.is_block_value_valid(&block, height, reward),
        Err(BlockValueError::InvalidGovernanceBlock { .. })
    ));
    assert!(!h.gate.is_block_payee_valid(&block.txdata[0], height, reward));
}

// S6: a second vote by the same masternode for the same height is dropped
// as a duplicate and the tally keeps only the first.
#[test]
fn s6_double_vote_rejected() {
    let h = harness(1000);
    let payee_a = payee_script(b"P_A");
    let payee_b = payee_script(b"P_B");

    h.deliver_vote(0, 1010, &payee_a).unwrap();
    let result = h.deliver_vote(0, 1010, &payee_b);
    assert!(matches!(result, Err(VoteError::DuplicateVote { height: 1010, .. })));

    let payees = h.engine.block_payees(1010).unwrap();
    assert_eq!(payees.payees.len(), 1);
    assert_eq!(payees.payees[0].script(), &payee_a);
    assert_eq!(payees.payees[0].vote_count(), 1);

    // No misbehavior for duplicates.
    assert_eq!(h.net.misbehavior_of(100), 0);
}

#[test]
fn obsolete_peer_gets_reject_message() {
    let h = harness(1000);
    let vote = h.signed_vote(0, 1010, &payee_script(b"P_A"));
    let result = h.engine.process_vote(7, PROTO - 1, vote);
    assert!(matches!(result, Err(VoteError::ObsoletePeer { .. })));
    assert_eq!(h.net.rejects(), 1);
    assert_eq!(h.engine.vote_count(), 0);
}

#[test]
fn vote_out_of_storage_window_is_dropped() {
    let h = harness(20_000);
    // Window is [tip - storage_limit, tip + 20].
    let result = h.deliver_vote(0, 20_021, &payee_script(b"P_A"));
    assert!(matches!(result, Err(VoteError::OutOfRange { .. })));

    let accepted = h.deliver_vote(0, 20_020, &payee_script(b"P_A"));
    assert!(accepted.is_ok());
}

#[test]
fn out_of_rank_future_vote_is_punished() {
    let h = harness(1000);
    // Ranks come from the registry order; make the engine see rank 21+.
    let mut extra = Vec::new();
    for index in 10..25u8 {
        let (secret_key, public_key) =
            h.secp.generate_keypair(&mut secp256k1::rand::thread_rng());
        extra.push((index, secret_key, public_key));
    }
    // Rebuild the harness with 25 masternodes so high ranks exist.
    let mut masternodes = h.registry.masternodes.clone();
    let mut keys = h.keys.clone();
    for (index, secret_key, public_key) in extra {
        keys.push(secret_key);
        masternodes.push(MasternodeInfo {
            outpoint: collateral(index),
            operator_pubkey: public_key,
            payee: payee_script(&[b'm', index]),
            protocol_version: PROTO,
        });
    }
    let registry = Arc::new(TestRegistry::new(masternodes));
    let sync = Arc::new(TestSync::default());
    let net = Arc::new(TestNet::default());
    let engine = Arc::new(PaymentEngine::new(
        h.params.clone(),
        false,
        registry,
        sync,
        Arc::new(TestRequests::default()),
        net.clone(),
    ));
    engine.updated_block_tip(1000, None);

    // Rank 25 voting for a future height: dropped and punished.
    let active = ActiveMasternode::new(&h.secp, collateral(24), keys[24]);
    let mut vote = PaymentVote::new(active.outpoint, 1010, payee_script(b"P_A"));
    vote.sign(&h.secp, &active, SignScheme::LegacyMessage).unwrap();
    let result = engine.process_vote(55, PROTO, vote);
    assert!(matches!(result, Err(VoteError::OutOfRank { .. })));
    assert_eq!(net.misbehavior_of(55), 20);

    // Rank 11 for a future height: dropped but not punished.
    let active = ActiveMasternode::new(&h.secp, collateral(10), keys[10]);
    let mut vote = PaymentVote::new(active.outpoint, 1010, payee_script(b"P_A"));
    vote.sign(&h.secp, &active, SignScheme::LegacyMessage).unwrap();
    let result = engine.process_vote(56, PROTO, vote);
    assert!(matches!(result, Err(VoteError::OutOfRank { .. })));
    assert_eq!(net.misbehavior_of(56), 0);
}

#[test]
fn bad_signature_scores_only_future_votes() {
    let h = harness(1000);
    // Vote signed by the wrong key.
    let active = ActiveMasternode::new(&h.secp, collateral(0), h.keys[1]);
    let mut vote = PaymentVote::new(active.outpoint, 1010, payee_script(b"P_A"));
    vote.sign(&h.secp, &active, SignScheme::LegacyMessage).unwrap();

    let result = h.engine.process_vote(42, PROTO, vote);
    assert!(matches!(result, Err(VoteError::BadSignature)));
    assert_eq!(h.net.misbehavior_of(42), 20);
    // The engine asked for a registry update for the voter.
    assert!(h.registry.requested.lock().unwrap().contains(&collateral(0)));
}

#[test]
fn unknown_voter_triggers_registry_request() {
    let h = harness(1000);
    let (secret_key, _) = h.secp.generate_keypair(&mut secp256k1::rand::thread_rng());
    let stranger = OutPoint::new(Txid::hash(b"stranger"), 1);
    let active = ActiveMasternode::new(&h.secp, stranger, secret_key);
    let mut vote = PaymentVote::new(stranger, 1010, payee_script(b"P_A"));
    vote.sign(&h.secp, &active, SignScheme::LegacyMessage).unwrap();

    let result = h.engine.process_vote(9, PROTO, vote);
    assert!(matches!(result, Err(VoteError::UnknownVoter(_))));
    assert!(h.registry.requested.lock().unwrap().contains(&stranger));
}

#[test]
fn payment_sync_serves_future_votes_once() {
    let h = harness(1000);
    let payee_a = payee_script(b"P_A");
    for voter in 0..3 {
        h.deliver_vote(voter, 1010, &payee_a).unwrap();
    }

    h.engine.process_message(5, PROTO, PaymentsMessage::PaymentSync);
    {
        let events = h.net.events.lock().unwrap();
        let pushed: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, NetEvent::Push(5, Inventory::PaymentVote(_))))
            .collect();
        assert_eq!(pushed.len(), 3);
        assert!(events
            .iter()
            .any(|e| matches!(e, NetEvent::Status(5, SyncStatusCount { count: 3, .. }))));
    }

    // Asking twice is misbehavior.
    h.engine.process_message(5, PROTO, PaymentsMessage::PaymentSync);
    assert_eq!(h.net.misbehavior_of(5), 20);
}

#[test]
fn getdata_returns_held_votes() {
    let h = harness(1000);
    let vote = h.signed_vote(0, 1010, &payee_script(b"P_A"));
    let hash = vote.vote_hash();
    h.engine.process_vote(3, PROTO, vote).unwrap();

    h.engine.process_get_data(8, Inventory::PaymentVote(hash));
    let events = h.net.events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(e, NetEvent::Vote(8, h) if *h == hash)));
}

// Invariants 1-3: tally and store reference each other exactly, and
// pruning removes everything below the cutoff.
#[test]
fn store_and_tally_stay_consistent() {
    let h = harness(1000);
    for voter in 0..6 {
        h.deliver_vote(voter, 1005 + voter as u32, &payee_script(b"P_A")).unwrap();
    }

    let snapshot = h.engine.snapshot();
    // Every tally hash resolves to a verified vote of the same height and
    // payee, and every vote is referenced by its height's tally.
    let mut referenced = HashSet::new();
    for (height, payees) in &snapshot.blocks {
        for payee in &payees.payees {
            for hash in payee.vote_hashes() {
                let vote = snapshot.votes.get(hash).expect("tally hash not in store");
                assert_eq!(vote.block_height, *height);
                assert_eq!(&vote.payee, payee.script());
                referenced.insert(*hash);
            }
        }
    }
    assert_eq!(referenced.len(), snapshot.votes.len());
}

#[test]
fn pruning_respects_storage_window() {
    let h = harness(1000);
    for voter in 0..6 {
        h.deliver_vote(voter, 1005 + voter as u32, &payee_script(b"P_A")).unwrap();
    }

    // Jump the tip far ahead: everything ages out.
    let far = 1010 + h.engine.storage_limit() + 1;
    h.engine.updated_block_tip(far, None);
    h.engine.check_and_remove();

    let snapshot = h.engine.snapshot();
    let cutoff = far - h.engine.storage_limit();
    assert!(snapshot.votes.values().all(|vote| vote.block_height >= cutoff));
    assert!(snapshot.blocks.keys().all(|height| *height >= cutoff));
    assert_eq!(h.engine.vote_count(), 0);
}

#[test]
fn snapshot_persists_and_restores() {
    let h = harness(1000);
    let payee_a = payee_script(b"P_A");
    for voter in 0..6 {
        h.deliver_vote(voter, 1010, &payee_a).unwrap();
    }

    let mut path = std::env::temp_dir();
    path.push(format!("mnpayments-{}.dat", std::process::id()));
    let db = FlatDb::new(&path, "MasternodePayments", Network::Regtest);
    db.dump(&h.engine.snapshot()).unwrap();

    // A fresh engine at the same tip loads the full state back.
    let restored = harness(1000);
    let snapshot: PaymentsSnapshot = db.load().unwrap();
    restored.engine.restore(snapshot);
    assert_eq!(restored.engine.vote_count(), 6);
    assert_eq!(restored.engine.block_payee(1010), Some(payee_a.clone()));

    // An engine whose tip moved far ahead discards the stale votes.
    let ahead = harness(1010 + h.engine.storage_limit() + 5);
    let snapshot: PaymentsSnapshot = db.load().unwrap();
    ahead.engine.restore(snapshot);
    assert_eq!(ahead.engine.vote_count(), 0);
    assert_eq!(ahead.engine.block_payee(1010), None);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn fill_block_payments_regular_regime() {
    let h = harness(1000);
    let payee_a = payee_script(b"P_A");
    for voter in 0..6 {
        h.deliver_vote(voter, 1010, &payee_a).unwrap();
    }

    let reward = 5 * COIN;
    let mut tx = coinbase(vec![TxOut::new(reward, payee_script(b"miner"))]);
    let (masternode_outputs, governance_outputs) =
        h.gate.fill_block_payments(&mut tx, 1010, reward);

    assert!(governance_outputs.is_empty());
    assert_eq!(masternode_outputs.len(), 1);
    assert_eq!(masternode_outputs[0].value, COIN);
    assert_eq!(masternode_outputs[0].script_pubkey, payee_a);
    assert_eq!(tx.output[0].value, 4 * COIN);
    assert_eq!(tx.value_out(), reward);

    // And the filled block passes its own validation.
    assert!(h.gate.is_block_payee_valid(&tx, 1010, reward));
}

#[test]
fn fill_block_payments_governance_regime() {
    let h = harness(10_070);
    let height = 10_080;
    let a1 = test_address(b"A1");
    let a2 = test_address(b"A2");
    let hash = GovernanceObjectHash::hash(b"trigger");
    h.store.insert(hash, governance_payload(height, &[&a1, &a2], &["10.0", "20.0"]), 7);
    h.triggers.add_new_trigger(hash).unwrap();

    let reward = 5 * COIN;
    let mut tx = coinbase(vec![TxOut::new(3 * COIN, payee_script(b"miner"))]);
    let (masternode_outputs, governance_outputs) =
        h.gate.fill_block_payments(&mut tx, height, reward);

    assert!(masternode_outputs.is_empty());
    assert_eq!(governance_outputs.len(), 2);
    assert!(h.gate.is_block_payee_valid(&tx, height, reward));
    assert_eq!(
        h.gate.is_block_value_valid(&block_with(tx.output.clone()), height, reward),
        Ok(())
    );
}

#[test]
fn unsynced_node_accepts_but_bounds_value() {
    let h = harness(10_070);
    h.sync.unsynced.store(true, Ordering::SeqCst);

    let reward = 5 * COIN;
    // Payee checks are skipped entirely.
    let tx = coinbase(vec![TxOut::new(reward, payee_script(b"anyone"))]);
    assert!(h.gate.is_block_payee_valid(&tx, 1010, reward));

    // Regular heights bound to the reward.
    let greedy = block_with(vec![TxOut::new(reward + 1, payee_script(b"miner"))]);
    assert!(h.gate.is_block_value_valid(&greedy, 1010, reward).is_err());

    // Governance heights bound to the governance ceiling.
    let height = 10_080;
    let limit = reward + h.params.governance_payments_limit(height);
    let big = block_with(vec![TxOut::new(limit, payee_script(b"miner"))]);
    assert_eq!(h.gate.is_block_value_valid(&big, height, reward), Ok(()));
    let too_big = block_with(vec![TxOut::new(limit + 1, payee_script(b"miner"))]);
    assert!(matches!(
        h.gate.is_block_value_valid(&too_big, height, reward),
        Err(BlockValueError::ExceedsGovernanceCeiling { .. })
    ));
}

#[test]
fn own_vote_flows_through_engine() {
    let secp = Secp256k1::new();
    let params = scenario_params();

    let mut keys = Vec::new();
    let mut masternodes = Vec::new();
    for index in 0..10u8 {
        let (secret_key, public_key) = secp.generate_keypair(&mut secp256k1::rand::thread_rng());
        keys.push(secret_key);
        masternodes.push(MasternodeInfo {
            outpoint: collateral(index),
            operator_pubkey: public_key,
            payee: payee_script(&[b'm', index]),
            protocol_version: PROTO,
        });
    }
    let registry = Arc::new(TestRegistry::new(masternodes));
    let net = Arc::new(TestNet::default());
    let engine = Arc::new(PaymentEngine::new(
        params,
        true, // masternode mode
        registry,
        Arc::new(TestSync::default()),
        Arc::new(TestRequests::default()),
        net.clone(),
    ));

    let active = ActiveMasternode::new(&secp, collateral(0), keys[0]);
    engine.updated_block_tip(1000, Some(&active));

    // The engine voted for tip + 10 and relayed the vote.
    assert_eq!(engine.vote_count(), 1);
    assert!(engine.block_payee(1010).is_some());
    assert_eq!(net.relayed().len(), 1);

    // The same tip again: the double-vote guard holds.
    engine.updated_block_tip(1000, Some(&active));
    assert_eq!(engine.vote_count(), 1);
}

#[test]
fn scheduler_drives_tip_updates() {
    let h = harness(1000);
    let scheduler = PaymentsScheduler::start(h.engine.clone(), h.triggers.clone(), None);
    assert!(scheduler.notify_tip(1234));

    // The worker applies the tip asynchronously.
    for _ in 0..400 {
        if h.engine.cached_height() == 1234 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert_eq!(h.engine.cached_height(), 1234);
    scheduler.shutdown();
}
