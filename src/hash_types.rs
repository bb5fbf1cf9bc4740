// SPDX-License-Identifier: CC0-1.0

//! Genesis hash types.
//!
//! This module defines the newtypes for hashes used throughout the library,
//! so that data of the same hash format but of different meaning (a
//! transaction id, a payment vote hash, a governance object hash) cannot be
//! mixed up.

use hashes::{hash160, hash_newtype, sha256d};

macro_rules! impl_hashencode {
    ($hashtype:ident) => {
        impl crate::consensus::Encodable for $hashtype {
            fn consensus_encode<W: std::io::Write + ?Sized>(
                &self,
                w: &mut W,
            ) -> Result<usize, std::io::Error> {
                use hashes::Hash;
                crate::consensus::Encodable::consensus_encode(self.as_byte_array(), w)
            }
        }

        impl crate::consensus::Decodable for $hashtype {
            fn consensus_decode<R: std::io::Read + ?Sized>(
                r: &mut R,
            ) -> Result<Self, crate::consensus::encode::Error> {
                use hashes::Hash;
                Ok(Self::from_byte_array(<[u8; 32]>::consensus_decode(r)?))
            }
        }
    };
}

hash_newtype! {
    /// A Genesis transaction id.
    pub struct Txid(sha256d::Hash);

    /// A Genesis block hash.
    pub struct BlockHash(sha256d::Hash);

    /// The deterministic digest of a masternode payment vote.
    ///
    /// Computed over (payee, block height, voter outpoint) only, so that the
    /// hash of a vote does not depend on its signature.
    pub struct VoteHash(sha256d::Hash);

    /// The hash identifying an on-chain governance object.
    pub struct GovernanceObjectHash(sha256d::Hash);
}

hash_newtype! {
    /// The hash of a public key, as carried in a pay-to-pubkey-hash output.
    pub struct PubkeyHash(hash160::Hash);

    /// The hash of a redeem script, as carried in a pay-to-script-hash output.
    pub struct ScriptHash(hash160::Hash);
}

impl_hashencode!(Txid);
impl_hashencode!(BlockHash);
impl_hashencode!(VoteHash);
impl_hashencode!(GovernanceObjectHash);

#[cfg(test)]
mod tests {
    use hashes::Hash;

    use super::*;
    use crate::consensus::encode::{deserialize, serialize};

    #[test]
    fn hashes_encode_roundtrip() {
        let txid = Txid::hash(b"some collateral transaction");
        let encoded = serialize(&txid);
        assert_eq!(encoded.len(), 32);
        let decoded: Txid = deserialize(&encoded).unwrap();
        assert_eq!(decoded, txid);
    }
}
