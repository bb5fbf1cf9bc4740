// SPDX-License-Identifier: CC0-1.0

//! Genesis payee scripts.
//!
//! The payment subsystem treats scripts as opaque byte strings: two scripts
//! are the same payee exactly when their bytes are equal. Only the two
//! standard destination shapes (pay-to-pubkey-hash and pay-to-script-hash)
//! are ever built by this crate, but arbitrary scripts are carried and
//! compared without interpretation.

use core::fmt::{self, Write as _};

use hashes::Hash;

use crate::consensus::{encode, Decodable, Encodable};
use crate::hash_types::{PubkeyHash, ScriptHash};
use std::io;

// The opcodes that appear in the scripts this crate builds and renders.
const OP_DUP: u8 = 0x76;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;
const OP_RETURN: u8 = 0x6a;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;

/// An owned script, the payee identity used throughout the payment engine.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScriptBuf(Vec<u8>);

impl ScriptBuf {
    /// Creates a new empty script.
    pub fn new() -> ScriptBuf {
        ScriptBuf(Vec::new())
    }

    /// Creates a script from raw bytes, without any checking.
    pub fn from_bytes(bytes: Vec<u8>) -> ScriptBuf {
        ScriptBuf(bytes)
    }

    /// Returns the script bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Converts the script into its underlying byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the length of the script in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the script is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Generates a pay-to-pubkey-hash script paying the given pubkey hash.
    pub fn new_p2pkh(pubkey_hash: &PubkeyHash) -> ScriptBuf {
        let mut bytes = Vec::with_capacity(25);
        bytes.push(OP_DUP);
        bytes.push(OP_HASH160);
        bytes.push(20);
        bytes.extend_from_slice(&pubkey_hash.to_byte_array());
        bytes.push(OP_EQUALVERIFY);
        bytes.push(OP_CHECKSIG);
        ScriptBuf(bytes)
    }

    /// Generates a pay-to-script-hash script paying the given script hash.
    pub fn new_p2sh(script_hash: &ScriptHash) -> ScriptBuf {
        let mut bytes = Vec::with_capacity(23);
        bytes.push(OP_HASH160);
        bytes.push(20);
        bytes.extend_from_slice(&script_hash.to_byte_array());
        bytes.push(OP_EQUAL);
        ScriptBuf(bytes)
    }

    /// Checks whether the script has the pay-to-pubkey-hash shape.
    pub fn is_p2pkh(&self) -> bool {
        self.0.len() == 25
            && self.0[0] == OP_DUP
            && self.0[1] == OP_HASH160
            && self.0[2] == 20
            && self.0[23] == OP_EQUALVERIFY
            && self.0[24] == OP_CHECKSIG
    }

    /// Checks whether the script has the pay-to-script-hash shape.
    pub fn is_p2sh(&self) -> bool {
        self.0.len() == 23 && self.0[0] == OP_HASH160 && self.0[1] == 20 && self.0[22] == OP_EQUAL
    }

    /// Returns the pubkey hash of a pay-to-pubkey-hash script.
    pub fn p2pkh_pubkey_hash(&self) -> Option<PubkeyHash> {
        if self.is_p2pkh() {
            Some(PubkeyHash::from_slice(&self.0[3..23]).expect("length checked above"))
        } else {
            None
        }
    }

    /// Returns the script hash of a pay-to-script-hash script.
    pub fn p2sh_script_hash(&self) -> Option<ScriptHash> {
        if self.is_p2sh() {
            Some(ScriptHash::from_slice(&self.0[2..22]).expect("length checked above"))
        } else {
            None
        }
    }

    /// Renders the script in assembly notation.
    ///
    /// Used for the legacy vote signing message and for diagnostics, never
    /// for consensus.
    pub fn to_asm_string(&self) -> String {
        let mut out = String::new();
        self.fmt_asm(&mut out).expect("string writers don't error");
        out
    }

    fn fmt_asm(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        use hex::DisplayHex;

        let bytes = &self.0;
        let mut index = 0;
        let mut first = true;
        while index < bytes.len() {
            if !first {
                f.write_char(' ')?;
            }
            first = false;

            let opcode = bytes[index];
            index += 1;

            // Data pushes render as the pushed bytes in hex.
            let push_len = match opcode {
                len @ 0x01..=0x4b => Some(len as usize),
                OP_PUSHDATA1 => {
                    if index >= bytes.len() {
                        write!(f, "<unexpected end>")?;
                        break;
                    }
                    let len = bytes[index] as usize;
                    index += 1;
                    Some(len)
                }
                OP_PUSHDATA2 => {
                    if index + 2 > bytes.len() {
                        write!(f, "<unexpected end>")?;
                        break;
                    }
                    let len = u16::from_le_bytes([bytes[index], bytes[index + 1]]) as usize;
                    index += 2;
                    Some(len)
                }
                OP_PUSHDATA4 => {
                    if index + 4 > bytes.len() {
                        write!(f, "<unexpected end>")?;
                        break;
                    }
                    let len = u32::from_le_bytes([
                        bytes[index],
                        bytes[index + 1],
                        bytes[index + 2],
                        bytes[index + 3],
                    ]) as usize;
                    index += 4;
                    Some(len)
                }
                _ => None,
            };

            match push_len {
                Some(len) => {
                    if index + len > bytes.len() {
                        write!(f, "<push past end>")?;
                        break;
                    }
                    write!(f, "{}", bytes[index..index + len].as_hex())?;
                    index += len;
                }
                None => match opcode {
                    0x00 => write!(f, "OP_0")?,
                    OP_RETURN => write!(f, "OP_RETURN")?,
                    OP_DUP => write!(f, "OP_DUP")?,
                    OP_EQUAL => write!(f, "OP_EQUAL")?,
                    OP_EQUALVERIFY => write!(f, "OP_EQUALVERIFY")?,
                    OP_HASH160 => write!(f, "OP_HASH160")?,
                    OP_CHECKSIG => write!(f, "OP_CHECKSIG")?,
                    other => write!(f, "OP_UNKNOWN_{:#04x}", other)?,
                },
            }
        }
        Ok(())
    }
}

impl fmt::Display for ScriptBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_asm(f)
    }
}

impl fmt::Debug for ScriptBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Script({})", self)
    }
}

impl fmt::LowerHex for ScriptBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use hex::DisplayHex;
        fmt::LowerHex::fmt(&self.0.as_hex(), f)
    }
}

impl Encodable for ScriptBuf {
    #[inline]
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(w)
    }
}

impl Decodable for ScriptBuf {
    #[inline]
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(ScriptBuf(Decodable::consensus_decode(r)?))
    }
}
