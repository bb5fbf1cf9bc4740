// SPDX-License-Identifier: CC0-1.0

//! The governance object store interface.
//!
//! Governance objects are gossiped, voted on and funded outside this crate.
//! The trigger manager consumes their parsed payload and funding state, and
//! reports back objects that turned out broken or expired.

use crate::hash_types::GovernanceObjectHash;

/// The store of gossiped governance objects, as seen by the trigger manager.
pub trait GovernanceStore: Send + Sync {
    /// Whether the object is currently known to the store.
    fn contains(&self, hash: &GovernanceObjectHash) -> bool;

    /// Whether the object is marked as a trigger-type object.
    fn is_trigger(&self, hash: &GovernanceObjectHash) -> bool;

    /// The object's JSON payload, if the object is known.
    fn payload_json(&self, hash: &GovernanceObjectHash) -> Option<serde_json::Value>;

    /// Whether the funding signal of the object is cached as passing.
    fn is_funding_cached(&self, hash: &GovernanceObjectHash) -> bool;

    /// The absolute yes count on the object's funding signal.
    fn absolute_yes_count(&self, hash: &GovernanceObjectHash) -> i64;

    /// Flags the object invalid after its trigger failed to parse.
    fn flag_invalid(&self, hash: &GovernanceObjectHash);

    /// Marks the object for deletion at the given unix timestamp.
    fn mark_for_deletion(&self, hash: &GovernanceObjectHash, timestamp: u64);

    /// Flags the object expired at the given unix timestamp.
    fn flag_expired(&self, hash: &GovernanceObjectHash, timestamp: u64);
}
