// SPDX-License-Identifier: CC0-1.0

//! Utility functions.
//!
//! Functions needed by all parts of the Genesis masternode library.

pub mod address;
pub mod amount;
pub mod flatdb;
pub mod signer;
