// SPDX-License-Identifier: CC0-1.0

//! Masternode sync state.
//!
//! Vote processing is gated on how far the node has caught up with the
//! network. The sync machinery itself is an external collaborator; the
//! payment engine only queries the stages below and bumps the liveness
//! timestamp of the winners-list asset when fresh votes arrive.

use crate::network::PeerId;

/// Sync asset id of the masternode list.
pub const MASTERNODE_SYNC_LIST: i32 = 2;
/// Sync asset id of the payment winners list.
pub const MASTERNODE_SYNC_MNW: i32 = 3;
/// Sync asset id of governance objects.
pub const MASTERNODE_SYNC_GOVERNANCE: i32 = 4;
/// Sync asset id reported once everything is synced.
pub const MASTERNODE_SYNC_FINISHED: i32 = 999;

/// The node's view of its own synchronization progress.
pub trait SyncTracker: Send + Sync {
    /// Whether the block chain itself is caught up.
    fn is_blockchain_synced(&self) -> bool;

    /// Whether the masternode list is caught up.
    fn is_masternode_list_synced(&self) -> bool;

    /// Whether the payment winners list is caught up.
    fn is_winners_list_synced(&self) -> bool;

    /// Whether every sync asset is caught up.
    fn is_synced(&self) -> bool;

    /// Records progress on a sync asset, resetting its timeout.
    fn bump_asset_last_time(&self, asset: &str);
}

/// Bookkeeping of which expensive requests a peer has already used up.
pub trait RequestTracker: Send + Sync {
    /// Whether the peer has already been served this request recently.
    fn has_fulfilled(&self, peer: PeerId, request: &str) -> bool;

    /// Records that the peer has been served this request.
    fn add_fulfilled(&self, peer: PeerId, request: &str);
}
