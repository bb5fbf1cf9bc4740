// SPDX-License-Identifier: CC0-1.0

//! Consensus encoding and consensus parameters.
//!
//! This module defines the traits for encoding objects that cross the wire
//! or the disk boundary, together with the per-network parameters the
//! payment and governance rules depend on.

pub mod encode;
pub mod params;

pub use self::encode::{deserialize, serialize, Decodable, Encodable};
