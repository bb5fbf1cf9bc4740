// SPDX-License-Identifier: CC0-1.0

//! Blockdata constants.
//!
//! This module provides various constants relating to the Genesis blockchain
//! and money supply.

/// The number of satoshis in one GENX.
pub const COIN_VALUE: u64 = 100_000_000;

/// The maximum amount of money the network can carry, in satoshis.
pub const MAX_MONEY: u64 = 2_100_000_000 * COIN_VALUE;

/// Returns whether an amount of satoshis is inside the valid money range.
pub fn money_range(value: u64) -> bool {
    value <= MAX_MONEY
}
