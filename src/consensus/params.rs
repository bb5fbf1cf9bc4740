// SPDX-License-Identifier: CC0-1.0

//! Genesis consensus parameters.
//!
//! This module provides the chain constants the payment and governance rules
//! depend on: the governance-block schedule, the payment quorum sizes, the
//! vote storage window and the block reward split.

use crate::blockdata::constants::COIN_VALUE;
use crate::network::constants::Network;

/// Parameters that influence masternode payment and governance-block
/// consensus.
#[derive(Debug, Clone)]
pub struct Params {
    /// Network for which parameters are valid.
    pub network: Network,
    /// The height at which masternode payments become active.
    pub payments_start_block: u32,
    /// The length of the governance cycle: governance blocks occur once per
    /// this many blocks.
    pub mega_interval: u32,
    /// The sub-cycle horizon, used for aging triggers that never executed.
    pub sub_interval: u32,
    /// The bonus-block horizon, used for aging broken triggers.
    pub bonus_interval: u32,
    /// Height offset of governance blocks inside the cycle.
    pub governance_block_offset: u32,
    /// Number of votes a payee needs before the network enforces it.
    pub signatures_required: usize,
    /// Number of top-ranked masternodes expected to vote per height.
    pub signatures_total: usize,
    /// Multiplier over the registry size for the vote storage window.
    pub storage_coefficient: f32,
    /// Lower bound of the vote storage window, in blocks.
    pub min_blocks_to_store: u32,
    /// Above this height votes are signed over the raw signature hash
    /// instead of the legacy message string.
    pub sign_hash_threshold: u32,
    /// Number of blocks past the last checkpoint before masternode payments
    /// are enforced on incoming blocks.
    pub mn_update_threshold: u32,
    /// The height of the last hardcoded checkpoint.
    pub last_checkpoint_height: u32,
    /// Number of confirmations a collateral needs before the masternode may
    /// be paid.
    pub masternode_min_confirmations: u32,
    /// The collateral amount bonded by each masternode, in satoshis.
    pub masternode_collateral: u64,
    /// Number of blocks between subsidy halvings.
    pub subsidy_halving_interval: u32,
    /// Finder (miner) part of the block reward split, in whole coins.
    pub reward_finder: u64,
    /// Masternode part of the block reward split, in whole coins.
    pub reward_masternode: u64,
    /// Founders part of the block reward split, in whole coins.
    pub reward_founders: u64,
    /// Governance accrual per block, in whole coins.
    pub reward_governance: u64,
}

impl Params {
    /// Creates parameters set to the values used by the given network.
    pub fn new(network: Network) -> Self {
        match network {
            Network::Genesis => Params {
                network,
                payments_start_block: 300_000,
                mega_interval: 10_080,
                sub_interval: 1_440,
                bonus_interval: 240,
                governance_block_offset: 1,
                signatures_required: 6,
                signatures_total: 10,
                storage_coefficient: 1.25,
                min_blocks_to_store: 6_000,
                sign_hash_threshold: 600_000,
                mn_update_threshold: 4_000,
                last_checkpoint_height: 20_000,
                masternode_min_confirmations: 15,
                masternode_collateral: 750_000 * COIN_VALUE,
                subsidy_halving_interval: 210_000,
                reward_finder: 350,
                reward_masternode: 200,
                reward_founders: 60,
                reward_governance: 90,
            },
            Network::Testnet | Network::Regtest => Params {
                network,
                payments_start_block: 21,
                mega_interval: 10_080,
                sub_interval: 10,
                bonus_interval: 10,
                governance_block_offset: 1,
                signatures_required: 6,
                signatures_total: 10,
                storage_coefficient: 1.25,
                min_blocks_to_store: 6_000,
                sign_hash_threshold: 600_000,
                mn_update_threshold: 4_000,
                last_checkpoint_height: 0,
                masternode_min_confirmations: 15,
                masternode_collateral: COIN_VALUE,
                subsidy_halving_interval: 210_000,
                reward_finder: 350,
                reward_masternode: 200,
                reward_founders: 60,
                reward_governance: 90,
            },
        }
    }

    /// The total non-governance block reward split, in whole coins.
    pub fn reward_total(&self) -> u64 {
        self.reward_finder + self.reward_masternode + self.reward_founders
    }

    /// Computes the base block subsidy at the given height, in satoshis.
    pub fn block_subsidy(&self, height: u32) -> u64 {
        let halvings = height / self.subsidy_halving_interval;
        if halvings >= 64 {
            return 0;
        }
        (self.reward_total() * COIN_VALUE) >> halvings
    }

    /// Computes the masternode part of a block reward, in satoshis.
    ///
    /// Zero before masternode payments activate.
    pub fn masternode_payment(&self, height: u32, block_reward: u64) -> u64 {
        if height < self.payments_start_block {
            return 0;
        }
        block_reward * self.reward_masternode / self.reward_total()
    }

    /// Returns whether a block at this height must be a governance block.
    pub fn is_governance_block_height(&self, height: u32) -> bool {
        height >= self.payments_start_block
            && height % self.mega_interval == self.governance_block_offset
    }

    /// Returns the heights of the previous (or zero) and next governance
    /// blocks around `height`.
    pub fn nearest_governance_block_heights(&self, height: u32) -> (u32, u32) {
        let cycle = self.mega_interval;
        let offset = self.governance_block_offset;

        let first_offset = ((cycle - self.payments_start_block % cycle) % cycle) + offset;
        let first = self.payments_start_block + first_offset;

        if height < first {
            return (0, first);
        }

        let mut last = height - height % cycle + offset;
        if last > height {
            last -= cycle;
        }
        (last, last + cycle)
    }

    /// The maximum total value of governance payments at a governance block
    /// height, in satoshis.
    ///
    /// The governance share of the subsidy accrues over the whole cycle and
    /// is spendable only at governance heights; elsewhere the limit is zero.
    pub fn governance_payments_limit(&self, height: u32) -> u64 {
        if !self.is_governance_block_height(height) {
            return 0;
        }
        let halvings = height / self.subsidy_halving_interval;
        if halvings >= 64 {
            return 0;
        }
        ((self.reward_governance * COIN_VALUE) >> halvings) * u64::from(self.mega_interval)
    }

    /// The number of recent payment heights to keep votes and tallies for.
    pub fn storage_limit(&self, registry_size: usize) -> u32 {
        let scaled = (registry_size as f32 * self.storage_coefficient) as u32;
        scaled.max(self.min_blocks_to_store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn governance_heights_mainnet() {
        let params = Params::new(Network::Genesis);
        // The first governance height at or after the payment start.
        let (prev, next) = params.nearest_governance_block_heights(params.payments_start_block);
        assert_eq!(prev, 0);
        assert!(params.is_governance_block_height(next));
        assert!(next >= params.payments_start_block);

        // Below the payment start there are no governance blocks at all.
        assert!(!params.is_governance_block_height(10_081));
    }

    #[test]
    fn nearest_heights_laws() {
        let params = Params::new(Network::Genesis);
        let (_, first) = params.nearest_governance_block_heights(0);
        for height in [first, first + 1, first + 5_000, first + 3 * params.mega_interval + 7] {
            let (prev, next) = params.nearest_governance_block_heights(height);
            assert!(prev <= height && height < next, "height {}", height);
            assert_eq!(next - prev, params.mega_interval);
            assert!(params.is_governance_block_height(next));
        }
    }

    #[test]
    fn governance_limit_zero_off_schedule() {
        let params = Params::new(Network::Genesis);
        let (_, governance_height) = params.nearest_governance_block_heights(400_000);
        assert!(params.governance_payments_limit(governance_height) > 0);
        assert_eq!(params.governance_payments_limit(governance_height + 1), 0);
        assert_eq!(params.governance_payments_limit(governance_height - 1), 0);
    }

    #[test]
    fn masternode_payment_split() {
        let params = Params::new(Network::Genesis);
        let reward = params.block_subsidy(310_000);
        let payment = params.masternode_payment(310_000, reward);
        // 200 parts out of 610.
        assert_eq!(payment, reward * 200 / 610);
        // Not active before the start height.
        assert_eq!(params.masternode_payment(100, reward), 0);
    }

    #[test]
    fn storage_limit_floor() {
        let params = Params::new(Network::Genesis);
        assert_eq!(params.storage_limit(100), 6_000);
        assert_eq!(params.storage_limit(8_000), 10_000);
    }
}
