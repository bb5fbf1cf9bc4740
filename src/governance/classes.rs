// SPDX-License-Identifier: CC0-1.0

//! Governance-block triggers and their payment schedules.
//!
//! A trigger is a governance object parsed into (event height, ordered
//! payment list). The manager keeps the authoritative set of triggers,
//! selects the best one per height by funding votes, builds governance
//! coinbases and validates incoming ones against the schedule.

use core::fmt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::blockdata::script::ScriptBuf;
use crate::blockdata::transaction::{Transaction, TxOut};
use crate::consensus::params::Params;
use crate::governance::object::GovernanceStore;
use crate::hash_types::GovernanceObjectHash;
use crate::network::constants::Network;
use crate::util::address::Address;
use crate::util::amount::{self, ParseAmountError};

/// The lifecycle state of a trigger.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriggerStatus {
    /// Observed but not yet parsed.
    Unknown,
    /// Parsed successfully; eligible for execution.
    Valid,
    /// A block matching the schedule was accepted by the chain.
    Executed,
    /// The backing object vanished or stopped being a trigger.
    ErrorInvalid,
}

/// An error turning a governance object into a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TriggerError {
    /// The trigger is already tracked.
    AlreadyKnown(GovernanceObjectHash),
    /// The backing governance object is not in the store.
    UnknownObject(GovernanceObjectHash),
    /// The backing object is not of the trigger type.
    NotATrigger(GovernanceObjectHash),
    /// A required payload field is missing or of the wrong type.
    MissingField(&'static str),
    /// The address and amount lists have different lengths.
    MismatchedSchedule {
        /// Number of addresses.
        addresses: usize,
        /// Number of amounts.
        amounts: usize,
    },
    /// The payment schedule is empty.
    EmptySchedule,
    /// A pipe-delimited segment was empty.
    EmptySegment,
    /// An address did not decode to a valid destination.
    InvalidAddress(String),
    /// An amount did not parse as a valid fixed-point value.
    InvalidAmount(ParseAmountError),
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TriggerError::AlreadyKnown(ref hash) => write!(f, "trigger {} already known", hash),
            TriggerError::UnknownObject(ref hash) => {
                write!(f, "governance object {} not found", hash)
            }
            TriggerError::NotATrigger(ref hash) => {
                write!(f, "governance object {} is not a trigger", hash)
            }
            TriggerError::MissingField(field) => write!(f, "missing payload field {}", field),
            TriggerError::MismatchedSchedule { addresses, amounts } => {
                write!(f, "mismatched payments and amounts: {} vs {}", addresses, amounts)
            }
            TriggerError::EmptySchedule => write!(f, "no payments in schedule"),
            TriggerError::EmptySegment => write!(f, "empty segment in schedule"),
            TriggerError::InvalidAddress(ref addr) => write!(f, "invalid address: {}", addr),
            TriggerError::InvalidAmount(ref e) => write_err!(f, "invalid amount"; e),
        }
    }
}

impl std::error::Error for TriggerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            TriggerError::InvalidAmount(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseAmountError> for TriggerError {
    fn from(e: ParseAmountError) -> TriggerError {
        TriggerError::InvalidAmount(e)
    }
}

/// A single payment of a governance block.
///
/// Only valid payments exist: the address decoded to a destination and the
/// amount parsed inside the money range, or the schedule was rejected whole.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GovernancePayment {
    /// The payee script, derived from the schedule address.
    pub script: ScriptBuf,
    /// The amount, in satoshis.
    pub amount: u64,
}

impl GovernancePayment {
    /// Parses one (address, amount) schedule entry.
    pub fn from_schedule_entry(
        address: &str,
        amount: &str,
        network: Network,
    ) -> Result<GovernancePayment, TriggerError> {
        let parsed: Address = address
            .parse()
            .map_err(|_| TriggerError::InvalidAddress(address.to_owned()))?;
        if !network_matches(parsed.network, network) {
            return Err(TriggerError::InvalidAddress(address.to_owned()));
        }
        let amount = amount::parse_fixed_point(amount)?;
        Ok(GovernancePayment { script: parsed.script_pubkey(), amount })
    }
}

fn network_matches(parsed: Network, ours: Network) -> bool {
    // Testnet and regtest share address version bytes.
    parsed == ours || (parsed == Network::Testnet && ours == Network::Regtest)
}

/// A governance object parsed into a payment schedule for one height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GovernanceBlock {
    /// The hash of the backing governance object.
    pub object_hash: GovernanceObjectHash,
    /// The height whose coinbase must carry the payments.
    pub event_height: u32,
    /// The lifecycle state of the trigger.
    pub status: TriggerStatus,
    /// The required payments, in schedule order. Order is significant.
    pub payments: Vec<GovernancePayment>,
}

impl GovernanceBlock {
    /// Parses a governance block out of an object's JSON payload.
    pub fn from_payload(
        object_hash: GovernanceObjectHash,
        payload: &serde_json::Value,
        params: &Params,
    ) -> Result<GovernanceBlock, TriggerError> {
        let event_height = payload
            .get("event_block_height")
            .and_then(serde_json::Value::as_u64)
            .ok_or(TriggerError::MissingField("event_block_height"))? as u32;
        let addresses = payload
            .get("payment_addresses")
            .and_then(serde_json::Value::as_str)
            .ok_or(TriggerError::MissingField("payment_addresses"))?;
        let amounts = payload
            .get("payment_amounts")
            .and_then(serde_json::Value::as_str)
            .ok_or(TriggerError::MissingField("payment_amounts"))?;

        let payments = parse_payment_schedule(addresses, amounts, params.network)?;
        debug!(
            %object_hash,
            event_height,
            payments = payments.len(),
            "parsed governance block trigger"
        );
        Ok(GovernanceBlock { object_hash, event_height, status: TriggerStatus::Valid, payments })
    }

    /// The sum of all scheduled payments, in satoshis.
    pub fn payments_total_amount(&self) -> u64 {
        self.payments.iter().map(|payment| payment.amount).sum()
    }

    /// Whether this trigger was executed by an accepted block.
    pub fn is_executed(&self) -> bool {
        self.status == TriggerStatus::Executed
    }

    /// Checks a coinbase against this governance block.
    ///
    /// The scheduled payments must appear as an order-preserving
    /// subsequence of the outputs, byte-exact in script and amount; the
    /// schedule must fit the payments limit and the block value must not
    /// exceed reward plus payments.
    pub fn is_valid_transaction(
        &self,
        tx: &Transaction,
        height: u32,
        block_reward: u64,
        params: &Params,
    ) -> bool {
        if !params.is_governance_block_height(height) {
            debug!(height, "governance block at invalid height");
            return false;
        }

        let outputs = tx.output.len();
        let payments = self.payments.len();
        if outputs < payments {
            // The block cannot carry all governance payments.
            debug!(outputs, payments, "too few outputs for governance payments");
            return false;
        }

        let total = self.payments_total_amount();
        let limit = params.governance_payments_limit(height);
        if total > limit {
            debug!(total, limit, "governance payments exceed limit");
            return false;
        }

        // The miner should not get more than they usually would.
        let block_value = tx.value_out();
        if block_value > block_reward + total {
            debug!(block_value, limit = block_reward + total, "block value limit exceeded");
            return false;
        }

        let mut vout_index = 0;
        for payment in &self.payments {
            let matched = tx.output[vout_index..].iter().position(|txout| {
                payment.script == txout.script_pubkey && payment.amount == txout.value
            });
            match matched {
                Some(offset) => vout_index += offset,
                None => {
                    debug!(
                        amount = payment.amount,
                        payee = %payee_address(&payment.script, params),
                        "governance payment not found in block"
                    );
                    return false;
                }
            }
        }

        true
    }

    /// Whether the trigger has outlived its horizon at the given tip.
    ///
    /// Executed triggers are kept for a full cycle, other valid triggers
    /// for a sub-cycle, broken ones for a bonus interval only.
    pub fn is_expired(&self, tip: u32, params: &Params) -> bool {
        let horizon = match self.status {
            TriggerStatus::Executed => params.mega_interval,
            TriggerStatus::Valid => params.sub_interval,
            TriggerStatus::Unknown | TriggerStatus::ErrorInvalid => params.bonus_interval,
        };
        tip > self.event_height + horizon
    }
}

/// Splits and validates the pipe-delimited payment schedule strings.
pub fn parse_payment_schedule(
    addresses: &str,
    amounts: &str,
    network: Network,
) -> Result<Vec<GovernancePayment>, TriggerError> {
    let address_parts: Vec<&str> = addresses.split('|').collect();
    let amount_parts: Vec<&str> = amounts.split('|').collect();

    if address_parts.len() != amount_parts.len() {
        return Err(TriggerError::MismatchedSchedule {
            addresses: address_parts.len(),
            amounts: amount_parts.len(),
        });
    }
    if addresses.is_empty() || amounts.is_empty() {
        return Err(TriggerError::EmptySchedule);
    }

    let mut payments = Vec::with_capacity(address_parts.len());
    for (address, amount) in address_parts.iter().zip(&amount_parts) {
        if address.is_empty() || amount.is_empty() {
            return Err(TriggerError::EmptySegment);
        }
        payments.push(GovernancePayment::from_schedule_entry(address, amount, network)?);
    }
    Ok(payments)
}

fn payee_address(script: &ScriptBuf, params: &Params) -> String {
    match Address::from_script(script, params.network) {
        Ok(address) => address.to_string(),
        Err(_) => script.to_asm_string(),
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// The authoritative set of governance-block triggers.
///
/// Holds the only strong references to [`GovernanceBlock`]s; callers get
/// clones of the payment schedules, never shared pointers into the set.
pub struct GovernanceTriggerManager {
    params: Params,
    store: Arc<dyn GovernanceStore>,
    triggers: Mutex<BTreeMap<GovernanceObjectHash, GovernanceBlock>>,
}

impl GovernanceTriggerManager {
    /// Creates a manager over the given object store.
    pub fn new(params: Params, store: Arc<dyn GovernanceStore>) -> GovernanceTriggerManager {
        GovernanceTriggerManager { params, store, triggers: Mutex::new(BTreeMap::new()) }
    }

    /// The consensus parameters the manager runs under.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Parses and tracks a new trigger by its governance object hash.
    ///
    /// A schedule that fails any parsing rule rejects the whole trigger and
    /// flags the backing object invalid.
    pub fn add_new_trigger(&self, hash: GovernanceObjectHash) -> Result<(), TriggerError> {
        let mut triggers = self.triggers.lock().expect("trigger lock poisoned");
        if triggers.contains_key(&hash) {
            return Err(TriggerError::AlreadyKnown(hash));
        }

        let parsed = self.parse_trigger(hash);
        match parsed {
            Ok(block) => {
                info!(%hash, event_height = block.event_height, "tracking new trigger");
                triggers.insert(hash, block);
                Ok(())
            }
            Err(error) => {
                warn!(%hash, %error, "rejecting governance trigger");
                if !matches!(error, TriggerError::UnknownObject(_)) {
                    self.store.flag_invalid(&hash);
                }
                Err(error)
            }
        }
    }

    fn parse_trigger(&self, hash: GovernanceObjectHash) -> Result<GovernanceBlock, TriggerError> {
        if !self.store.contains(&hash) {
            return Err(TriggerError::UnknownObject(hash));
        }
        if !self.store.is_trigger(&hash) {
            return Err(TriggerError::NotATrigger(hash));
        }
        let payload = self.store.payload_json(&hash).ok_or(TriggerError::UnknownObject(hash))?;
        GovernanceBlock::from_payload(hash, &payload, &self.params)
    }

    /// The triggers whose backing object still resolves.
    pub fn active_triggers(&self) -> Vec<GovernanceBlock> {
        let triggers = self.triggers.lock().expect("trigger lock poisoned");
        triggers
            .values()
            .filter(|block| self.store.contains(&block.object_hash))
            .cloned()
            .collect()
    }

    /// The number of tracked triggers, active or not.
    pub fn trigger_count(&self) -> usize {
        self.triggers.lock().expect("trigger lock poisoned").len()
    }

    /// Whether a funded, active trigger demands a governance block at this
    /// height.
    pub fn is_triggered(&self, height: u32) -> bool {
        if !self.params.is_governance_block_height(height) {
            return false;
        }
        self.active_triggers().iter().any(|block| {
            block.event_height == height && self.store.is_funding_cached(&block.object_hash)
        })
    }

    /// The trigger that governs `height`: funding-cached, with the highest
    /// absolute yes count. Ties go to the smallest object hash.
    pub fn best_governance_block(&self, height: u32) -> Option<GovernanceBlock> {
        if !self.params.is_governance_block_height(height) {
            return None;
        }
        let mut best: Option<GovernanceBlock> = None;
        let mut best_yes = 0i64;
        // Active triggers iterate in object-hash order, and only a strictly
        // greater count displaces the current best.
        for block in self.active_triggers() {
            if block.event_height != height {
                continue;
            }
            if !self.store.is_funding_cached(&block.object_hash) {
                continue;
            }
            let yes_count = self.store.absolute_yes_count(&block.object_hash);
            if yes_count > best_yes {
                best_yes = yes_count;
                best = Some(block);
            }
        }
        best
    }

    /// Appends the governance payments of the best trigger to a coinbase.
    ///
    /// Returns the appended outputs; empty when no trigger governs the
    /// height.
    pub fn create_governance_block(&self, tx: &mut Transaction, height: u32) -> Vec<TxOut> {
        let block = match self.best_governance_block(height) {
            Some(block) => block,
            None => {
                debug!(height, "can't find governance block for height");
                return Vec::new();
            }
        };

        let mut outputs = Vec::with_capacity(block.payments.len());
        for (index, payment) in block.payments.iter().enumerate() {
            let txout = TxOut::new(payment.amount, payment.script.clone());
            tx.output.push(txout.clone());
            let amount = amount::fmt_coin_amount(payment.amount);
            let payee = payee_address(&payment.script, &self.params);
            info!(index, %amount, %payee, "new governance block output");
            outputs.push(txout);
        }
        outputs
    }

    /// Validates a coinbase against the best trigger for its height.
    pub fn is_valid_governance_block(
        &self,
        tx: &Transaction,
        height: u32,
        block_reward: u64,
    ) -> bool {
        match self.best_governance_block(height) {
            Some(block) => block.is_valid_transaction(tx, height, block_reward, &self.params),
            None => false,
        }
    }

    /// Marks the best trigger for `height` as executed.
    ///
    /// Called by the gate once the chain accepted a block at the trigger's
    /// event height; the checks already ran during validation.
    pub fn execute_best(&self, height: u32) {
        let best = match self.best_governance_block(height) {
            Some(block) => block.object_hash,
            None => return,
        };
        let mut triggers = self.triggers.lock().expect("trigger lock poisoned");
        if let Some(block) = triggers.get_mut(&best) {
            info!(hash = %best, height, "governance block trigger executed");
            block.status = TriggerStatus::Executed;
        }
    }

    /// Sweeps out invalid and expired triggers.
    ///
    /// Triggers whose backing object vanished or stopped being a trigger
    /// become `ErrorInvalid`; those and anything beyond its aging horizon
    /// are removed, marking the backing object for deletion.
    pub fn clean_and_remove(&self, tip: u32) {
        let now = unix_now();
        let mut triggers = self.triggers.lock().expect("trigger lock poisoned");
        debug!(count = triggers.len(), tip, "sweeping governance triggers");

        let mut remove = Vec::new();
        for (hash, block) in triggers.iter_mut() {
            if !self.store.contains(hash) || !self.store.is_trigger(hash) {
                debug!(%hash, "unknown or non-trigger governance block");
                block.status = TriggerStatus::ErrorInvalid;
            }

            let expired = match block.status {
                TriggerStatus::ErrorInvalid | TriggerStatus::Unknown => true,
                TriggerStatus::Valid | TriggerStatus::Executed => {
                    let expired = block.is_expired(tip, &self.params);
                    if expired {
                        debug!(%hash, "outdated trigger found");
                        self.store.flag_expired(hash, now);
                    }
                    expired
                }
            };
            if expired {
                remove.push(*hash);
            }
        }

        for hash in remove {
            debug!(%hash, "removing trigger object");
            self.store.mark_for_deletion(&hash, now);
            triggers.remove(&hash);
        }
    }

    /// Renders the required governance payments for a height.
    pub fn required_payments_string(&self, height: u32) -> String {
        let block = match self.best_governance_block(height) {
            Some(block) => block,
            None => return "error".to_owned(),
        };
        let addresses: Vec<String> =
            block.payments.iter().map(|p| payee_address(&p.script, &self.params)).collect();
        if addresses.is_empty() {
            "Unknown".to_owned()
        } else {
            addresses.join(", ")
        }
    }
}
