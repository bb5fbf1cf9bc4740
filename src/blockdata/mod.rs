// SPDX-License-Identifier: CC0-1.0

//! Genesis block and transaction data.
//!
//! The structures in this module describe the parts of a block that the
//! payment subsystem inspects and fills: coinbase transactions, their
//! outputs, and the payee scripts carried by those outputs.

pub mod block;
pub mod constants;
pub mod script;
pub mod transaction;
