// SPDX-License-Identifier: CC0-1.0

//! Genesis network constants.
//!
//! This module provides various constants relating to the Genesis network
//! protocol, such as protocol versioning and magic header bytes.

use core::fmt;
use core::str::FromStr;

use crate::consensus::{encode, Decodable, Encodable};
use std::io;

/// Version of the protocol as appearing in network message headers.
pub const PROTOCOL_VERSION: u32 = 70210;

/// The protocol version that introduced masternode block validation.
pub const MASTERNODE_BLOCK_VALIDATION_VERSION: u32 = 70209;

/// Minimum peer version that can receive and send masternode payment
/// messages, vote for a masternode and be elected as a payment winner.
pub const MIN_MASTERNODE_PAYMENT_PROTO_VERSION: u32 = MASTERNODE_BLOCK_VALIDATION_VERSION;

/// The cryptocurrency network to act on.
#[derive(Copy, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Network {
    /// The Genesis mainnet.
    Genesis,
    /// The Genesis testnet.
    Testnet,
    /// A local regression-testing network.
    Regtest,
}

impl Network {
    /// Returns the network's magic bytes, as they appear in message headers.
    pub fn magic(self) -> u32 {
        // Little-endian of the four message-start bytes.
        match self {
            Network::Genesis => 0xbfa4_176b,
            Network::Testnet => 0xc3aa_54c6,
            Network::Regtest => 0xc38c_74ae,
        }
    }

    /// Returns the network from its magic bytes, if known.
    pub fn from_magic(magic: u32) -> Option<Network> {
        match magic {
            0xbfa4_176b => Some(Network::Genesis),
            0xc3aa_54c6 => Some(Network::Testnet),
            0xc38c_74ae => Some(Network::Regtest),
            _ => None,
        }
    }

    /// The base58 version byte of pay-to-pubkey-hash addresses.
    pub fn pubkey_address_prefix(self) -> u8 {
        match self {
            Network::Genesis => 28,
            Network::Testnet | Network::Regtest => 125,
        }
    }

    /// The base58 version byte of pay-to-script-hash addresses.
    pub fn script_address_prefix(self) -> u8 {
        match self {
            Network::Genesis => 63,
            Network::Testnet | Network::Regtest => 87,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Network::Genesis => "genesis",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        })
    }
}

/// An error in parsing a network name.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ParseNetworkError(String);

impl fmt::Display for ParseNetworkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "failed to parse {} as network", self.0)
    }
}

impl std::error::Error for ParseNetworkError {}

impl FromStr for Network {
    type Err = ParseNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "genesis" => Ok(Network::Genesis),
            "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(ParseNetworkError(s.to_owned())),
        }
    }
}

impl Encodable for Network {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        self.magic().consensus_encode(w)
    }
}

impl Decodable for Network {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let magic = u32::consensus_decode(r)?;
        Network::from_magic(magic).ok_or(encode::Error::ParseFailed("unknown network magic"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::encode::{deserialize, serialize};

    #[test]
    fn magic_roundtrip() {
        for network in [Network::Genesis, Network::Testnet, Network::Regtest] {
            assert_eq!(Network::from_magic(network.magic()), Some(network));
            let decoded: Network = deserialize(&serialize(&network)).unwrap();
            assert_eq!(decoded, network);
        }
        assert_eq!(Network::from_magic(0xdeadbeef), None);
    }

    #[test]
    fn string_roundtrip() {
        for network in [Network::Genesis, Network::Testnet, Network::Regtest] {
            assert_eq!(network.to_string().parse::<Network>().unwrap(), network);
        }
        assert!("fakenet".parse::<Network>().is_err());
    }
}
