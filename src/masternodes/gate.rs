// SPDX-License-Identifier: CC0-1.0

//! The block payment gate.
//!
//! Top-level dispatcher over the two payment regimes: at any height it
//! decides whether the governance rules or the regular masternode payment
//! rules apply, routes validation and coinbase building accordingly, and
//! enforces the reward ceiling.

use core::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::blockdata::block::Block;
use crate::blockdata::transaction::{Transaction, TxOut};
use crate::consensus::params::Params;
use crate::governance::classes::GovernanceTriggerManager;
use crate::masternodes::payments::PaymentEngine;
use crate::masternodes::sync::SyncTracker;
use crate::util::amount::fmt_coin_amount;

/// Why a block's coinbase value was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BlockValueError {
    /// The block has no coinbase transaction to inspect.
    MissingCoinbase,
    /// The coinbase created more than the regular block reward.
    ExceedsBlockReward {
        /// The height checked.
        height: u32,
        /// The coinbase output value.
        actual: u64,
        /// The allowed maximum.
        limit: u64,
    },
    /// The coinbase exceeded even the governance-block ceiling.
    ExceedsGovernanceCeiling {
        /// The height checked.
        height: u32,
        /// The coinbase output value.
        actual: u64,
        /// The allowed maximum.
        limit: u64,
    },
    /// A trigger is active but the coinbase does not match its schedule.
    InvalidGovernanceBlock {
        /// The height checked.
        height: u32,
    },
}

impl fmt::Display for BlockValueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            BlockValueError::MissingCoinbase => write!(f, "block has no coinbase transaction"),
            BlockValueError::ExceedsBlockReward { height, actual, limit } => write!(
                f,
                "coinbase pays too much at height {} (actual={} vs limit={}), exceeded block reward",
                height,
                fmt_coin_amount(actual),
                fmt_coin_amount(limit)
            ),
            BlockValueError::ExceedsGovernanceCeiling { height, actual, limit } => write!(
                f,
                "coinbase pays too much at height {} (actual={} vs limit={}), exceeded governance block max value",
                height,
                fmt_coin_amount(actual),
                fmt_coin_amount(limit)
            ),
            BlockValueError::InvalidGovernanceBlock { height } => {
                write!(f, "invalid governance block detected at height {}", height)
            }
        }
    }
}

impl std::error::Error for BlockValueError {}

/// Dispatches block payment validation and creation between the regular and
/// governance regimes.
pub struct BlockPaymentGate {
    params: Params,
    engine: Arc<PaymentEngine>,
    triggers: Arc<GovernanceTriggerManager>,
    sync: Arc<dyn SyncTracker>,
}

impl BlockPaymentGate {
    /// Creates a gate over the two regime engines.
    pub fn new(
        params: Params,
        engine: Arc<PaymentEngine>,
        triggers: Arc<GovernanceTriggerManager>,
        sync: Arc<dyn SyncTracker>,
    ) -> BlockPaymentGate {
        BlockPaymentGate { params, engine, triggers, sync }
    }

    /// Whether masternode payments are enforced at this height.
    ///
    /// After a hardfork the network needs a window to upgrade; enforcement
    /// starts a threshold past the last checkpoint so stale nodes do not
    /// reject the chain over missing payees.
    pub fn enforce_masternode_payments(&self, height: u32) -> bool {
        height > self.params.last_checkpoint_height + self.params.mn_update_threshold
    }

    /// Checks that the coinbase does not create more money than allowed at
    /// this height.
    ///
    /// Regular blocks are held to the block reward; at governance heights
    /// with an active trigger the schedule is validated instead, and while
    /// out of sync only the governance ceiling is enforced there.
    pub fn is_block_value_valid(
        &self,
        block: &Block,
        height: u32,
        block_reward: u64,
    ) -> Result<(), BlockValueError> {
        let coinbase = match block.coinbase() {
            Some(tx) => tx,
            None => return Err(BlockValueError::MissingCoinbase),
        };
        let value_out = coinbase.value_out();
        let governance_ceiling = block_reward + self.params.governance_payments_limit(height);

        if !self.sync.is_synced() {
            // Not enough data; bound the damage and accept the longest
            // chain.
            if self.params.is_governance_block_height(height) {
                debug!(height, "not enough data, checking governance ceiling only");
                if value_out > governance_ceiling {
                    return Err(BlockValueError::ExceedsGovernanceCeiling {
                        height,
                        actual: value_out,
                        limit: governance_ceiling,
                    });
                }
                return Ok(());
            }
            if value_out > block_reward {
                return Err(BlockValueError::ExceedsBlockReward {
                    height,
                    actual: value_out,
                    limit: block_reward,
                });
            }
            return Ok(());
        }

        if self.triggers.is_triggered(height) {
            if self.triggers.is_valid_governance_block(coinbase, height, block_reward) {
                debug!(height, "valid governance block");
                return Ok(());
            }
            // Triggered but not matching the schedule: never acceptable.
            warn!(height, "invalid governance block detected");
            return Err(BlockValueError::InvalidGovernanceBlock { height });
        }

        debug!(height, "no triggered governance block");
        if value_out > block_reward {
            return Err(BlockValueError::ExceedsBlockReward {
                height,
                actual: value_out,
                limit: block_reward,
            });
        }
        Ok(())
    }

    /// Checks that the coinbase pays the payees required at this height.
    pub fn is_block_payee_valid(&self, tx: &Transaction, height: u32, block_reward: u64) -> bool {
        if !self.sync.is_synced() {
            // There is no payment data to check against; accept the longest
            // chain.
            debug!(height, "not enough data, skipping block payee checks");
            return true;
        }

        if self.triggers.is_triggered(height) {
            return self.triggers.is_valid_governance_block(tx, height, block_reward);
        }

        debug!(height, "no triggered governance block, expecting masternode payment");
        match self.engine.is_transaction_valid(tx, height, block_reward) {
            Ok(()) => true,
            Err(error) => {
                if self.enforce_masternode_payments(height) {
                    warn!(height, %error, "invalid masternode payment");
                    false
                } else {
                    warn!(height, "masternode payment enforcement is disabled, accepting anyway");
                    true
                }
            }
        }
    }

    /// Fills the payments a block template's coinbase must make at `height`.
    ///
    /// Returns the appended masternode and governance outputs.
    pub fn fill_block_payments(
        &self,
        tx: &mut Transaction,
        height: u32,
        block_reward: u64,
    ) -> (Vec<TxOut>, Vec<TxOut>) {
        // Only create a governance block if one is actually triggered.
        if self.triggers.is_triggered(height) {
            debug!(height, "triggered governance block creation");
            return (Vec::new(), self.triggers.create_governance_block(tx, height));
        }

        let masternode_outputs =
            self.engine.fill_block_payee(tx, height, block_reward).into_iter().collect();
        (masternode_outputs, Vec::new())
    }

    /// Reports a block accepted by the chain, marking the governing trigger
    /// executed at its event height.
    pub fn block_connected(&self, height: u32) {
        if self.params.is_governance_block_height(height) {
            self.triggers.execute_best(height);
            info!(height, "governance height connected");
        }
    }

    /// Renders the payments required at a height, for diagnostics and RPC.
    pub fn required_payments_string(&self, height: u32) -> String {
        if self.triggers.is_triggered(height) {
            self.triggers.required_payments_string(height)
        } else {
            self.engine.required_payments_string(height)
        }
    }
}
