// SPDX-License-Identifier: CC0-1.0

//! Genesis addresses.
//!
//! Support for parsing and rendering the base58check destinations that
//! governance payment schedules and diagnostics use. The two supported
//! destination kinds are pay-to-pubkey-hash and pay-to-script-hash.

use core::fmt;
use core::str::FromStr;

use hashes::{hash160, Hash};
use secp256k1::PublicKey;

use crate::blockdata::script::ScriptBuf;
use crate::hash_types::{PubkeyHash, ScriptHash};
use crate::network::constants::Network;

/// An address-related error.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A base58 decoding error.
    Base58(base58::Error),
    /// The decoded payload was not the expected 1 + 20 bytes.
    InvalidLength(usize),
    /// The version byte matched none of the known networks.
    UnknownAddressVersion(u8),
    /// The script has no address form.
    UnrepresentableScript,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Base58(ref e) => write_err!(f, "base58 error"; e),
            Error::InvalidLength(len) => {
                write!(f, "address payload has length {}, expected 21", len)
            }
            Error::UnknownAddressVersion(v) => write!(f, "unknown address version byte {}", v),
            Error::UnrepresentableScript => write!(f, "script has no address form"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Base58(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<base58::Error> for Error {
    fn from(e: base58::Error) -> Error {
        Error::Base58(e)
    }
}

/// The method used to produce an address from a payee script.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum Payload {
    /// A pay-to-pubkey-hash destination.
    PubkeyHash(PubkeyHash),
    /// A pay-to-script-hash destination.
    ScriptHash(ScriptHash),
}

/// A Genesis address.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Address {
    /// The network this address is valid on.
    pub network: Network,
    /// The destination the address encodes.
    pub payload: Payload,
}

impl Address {
    /// Creates a pay-to-pubkey-hash address from a public key.
    pub fn p2pkh(pubkey: &PublicKey, network: Network) -> Address {
        let hash = hash160::Hash::hash(&pubkey.serialize());
        Address {
            network,
            payload: Payload::PubkeyHash(PubkeyHash::from_byte_array(hash.to_byte_array())),
        }
    }

    /// Extracts the destination an output script pays to, if it has one.
    pub fn from_script(script: &ScriptBuf, network: Network) -> Result<Address, Error> {
        if let Some(hash) = script.p2pkh_pubkey_hash() {
            Ok(Address { network, payload: Payload::PubkeyHash(hash) })
        } else if let Some(hash) = script.p2sh_script_hash() {
            Ok(Address { network, payload: Payload::ScriptHash(hash) })
        } else {
            Err(Error::UnrepresentableScript)
        }
    }

    /// Generates the script paying to this address.
    pub fn script_pubkey(&self) -> ScriptBuf {
        match self.payload {
            Payload::PubkeyHash(ref hash) => ScriptBuf::new_p2pkh(hash),
            Payload::ScriptHash(ref hash) => ScriptBuf::new_p2sh(hash),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut prefixed = [0u8; 21];
        prefixed[0] = match self.payload {
            Payload::PubkeyHash(_) => self.network.pubkey_address_prefix(),
            Payload::ScriptHash(_) => self.network.script_address_prefix(),
        };
        match self.payload {
            Payload::PubkeyHash(ref hash) => prefixed[1..].copy_from_slice(&hash.to_byte_array()),
            Payload::ScriptHash(ref hash) => prefixed[1..].copy_from_slice(&hash.to_byte_array()),
        }
        base58::encode_check_to_fmt(f, &prefixed[..])
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Address, Error> {
        let data = base58::decode_check(s)?;
        if data.len() != 21 {
            return Err(Error::InvalidLength(data.len()));
        }

        let (network, payload) = match data[0] {
            28 => (
                Network::Genesis,
                Payload::PubkeyHash(PubkeyHash::from_slice(&data[1..]).expect("length checked")),
            ),
            63 => (
                Network::Genesis,
                Payload::ScriptHash(ScriptHash::from_slice(&data[1..]).expect("length checked")),
            ),
            125 => (
                Network::Testnet,
                Payload::PubkeyHash(PubkeyHash::from_slice(&data[1..]).expect("length checked")),
            ),
            87 => (
                Network::Testnet,
                Payload::ScriptHash(ScriptHash::from_slice(&data[1..]).expect("length checked")),
            ),
            v => return Err(Error::UnknownAddressVersion(v)),
        };

        Ok(Address { network, payload })
    }
}
