// SPDX-License-Identifier: CC0-1.0

//! Genesis network support.
//!
//! This module defines the network identities the subsystem can run on and
//! the masternode payment wire messages. Message framing and transport are
//! the caller's concern; only the payloads and inventory categories are
//! stable here.

pub mod constants;
pub mod message_masternode;

/// The identifier of a connected peer, assigned by the connection manager.
pub type PeerId = u64;
