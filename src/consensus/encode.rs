// SPDX-License-Identifier: CC0-1.0

//! Consensus-encodable types.
//!
//! Anything that goes on the wire or on the disk must be encoded with the
//! [`Encodable`] trait, since this data must be identical for all nodes.
//! The encoding is the classic little-endian coin encoding: fixed-width
//! integers, `VarInt` compact sizes, and length-prefixed collections.
//!
//! Maps are encoded through [`BTreeMap`] so the framing of persisted state
//! is deterministic: equal state always serializes to equal bytes.

use core::fmt;
use std::collections::BTreeMap;
use std::error;
use std::io::{self, Cursor, Read, Write};

/// The maximum number of elements accepted when decoding a collection.
///
/// Bounds allocations performed on behalf of untrusted input.
pub const MAX_VEC_SIZE: usize = 4_000_000;

/// Encoding error.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error.
    Io(io::Error),
    /// Tried to allocate an oversized vector.
    OversizedVectorAllocation {
        /// The capacity requested.
        requested: usize,
        /// The maximum capacity.
        max: usize,
    },
    /// Checksum was invalid.
    InvalidChecksum {
        /// The expected checksum.
        expected: [u8; 4],
        /// The invalid checksum.
        actual: [u8; 4],
    },
    /// A variable-length integer was not minimally encoded.
    NonMinimalVarInt,
    /// Parsing error.
    ParseFailed(&'static str),
    /// Unsupported serialization version.
    UnsupportedVersion(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write_err!(f, "IO error"; e),
            Error::OversizedVectorAllocation { requested, max } => {
                write!(f, "allocation of oversized vector: requested {}, maximum {}", requested, max)
            }
            Error::InvalidChecksum { expected, actual } => {
                use hex::DisplayHex;
                write!(
                    f,
                    "invalid checksum: expected {}, actual {}",
                    expected.as_hex(),
                    actual.as_hex()
                )
            }
            Error::NonMinimalVarInt => write!(f, "non-minimal varint"),
            Error::ParseFailed(ref s) => write!(f, "parse failed: {}", s),
            Error::UnsupportedVersion(v) => write!(f, "unsupported serialization version {}", v),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

#[doc(hidden)]
impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(error)
    }
}

/// Encodes an object into a vector.
pub fn serialize<T: Encodable + ?Sized>(data: &T) -> Vec<u8> {
    let mut encoder = Vec::new();
    let len = data.consensus_encode(&mut encoder).expect("in-memory writers don't error");
    debug_assert_eq!(len, encoder.len());
    encoder
}

/// Encodes an object into a hex-encoded string.
pub fn serialize_hex<T: Encodable + ?Sized>(data: &T) -> String {
    use hex::DisplayHex;
    serialize(data).to_lower_hex_string()
}

/// Deserializes an object from a vector, will error if said deserialization
/// doesn't consume the entire vector.
pub fn deserialize<T: Decodable>(data: &[u8]) -> Result<T, Error> {
    let (rv, consumed) = deserialize_partial(data)?;

    // Fail if data are not consumed entirely.
    if consumed == data.len() {
        Ok(rv)
    } else {
        Err(Error::ParseFailed("data not consumed entirely when explicitly deserializing"))
    }
}

/// Deserializes an object from a vector, but will not report an error if said
/// deserialization doesn't consume the entire vector.
pub fn deserialize_partial<T: Decodable>(data: &[u8]) -> Result<(T, usize), Error> {
    let mut decoder = Cursor::new(data);
    let rv = Decodable::consensus_decode(&mut decoder)?;
    let consumed = decoder.position() as usize;

    Ok((rv, consumed))
}

/// Data which can be encoded in a consensus-consistent way.
pub trait Encodable {
    /// Encodes an object with a well-defined format.
    ///
    /// Returns the number of bytes written on success.
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error>;
}

/// Data which can be decoded in a consensus-consistent way.
pub trait Decodable: Sized {
    /// Decodes an object with a well-defined format.
    fn consensus_decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error>;
}

macro_rules! impl_int_encodable {
    ($ty:ident) => {
        impl Encodable for $ty {
            #[inline]
            fn consensus_encode<W: io::Write + ?Sized>(
                &self,
                w: &mut W,
            ) -> Result<usize, io::Error> {
                w.write_all(&self.to_le_bytes())?;
                Ok(core::mem::size_of::<$ty>())
            }
        }

        impl Decodable for $ty {
            #[inline]
            fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, Error> {
                let mut buf = [0u8; core::mem::size_of::<$ty>()];
                r.read_exact(&mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }
        }
    };
}

impl_int_encodable!(u8);
impl_int_encodable!(u16);
impl_int_encodable!(u32);
impl_int_encodable!(u64);
impl_int_encodable!(i8);
impl_int_encodable!(i16);
impl_int_encodable!(i32);
impl_int_encodable!(i64);

impl Encodable for bool {
    #[inline]
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        u8::consensus_encode(&u8::from(*self), w)
    }
}

impl Decodable for bool {
    #[inline]
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<bool, Error> {
        Ok(u8::consensus_decode(r)? != 0)
    }
}

/// A variable-length unsigned integer.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct VarInt(pub u64);

impl VarInt {
    /// Gets the length of this VarInt when encoded.
    ///
    /// Returns 1 for 0..=0xFC, 3 for 0xFD..=(2^16-1), 5 for 0x10000..=(2^32-1),
    /// and 9 otherwise.
    #[inline]
    pub fn len(&self) -> usize {
        match self.0 {
            0..=0xFC => 1,
            0xFD..=0xFFFF => 3,
            0x10000..=0xFFFFFFFF => 5,
            _ => 9,
        }
    }
}

impl Encodable for VarInt {
    #[inline]
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        match self.0 {
            0..=0xFC => {
                (self.0 as u8).consensus_encode(w)?;
                Ok(1)
            }
            0xFD..=0xFFFF => {
                w.write_all(&[0xFD])?;
                (self.0 as u16).consensus_encode(w)?;
                Ok(3)
            }
            0x10000..=0xFFFFFFFF => {
                w.write_all(&[0xFE])?;
                (self.0 as u32).consensus_encode(w)?;
                Ok(5)
            }
            _ => {
                w.write_all(&[0xFF])?;
                self.0.consensus_encode(w)?;
                Ok(9)
            }
        }
    }
}

impl Decodable for VarInt {
    #[inline]
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, Error> {
        let n = u8::consensus_decode(r)?;
        match n {
            0xFF => {
                let x = u64::consensus_decode(r)?;
                if x < 0x100000000 {
                    Err(Error::NonMinimalVarInt)
                } else {
                    Ok(VarInt(x))
                }
            }
            0xFE => {
                let x = u32::consensus_decode(r)?;
                if x < 0x10000 {
                    Err(Error::NonMinimalVarInt)
                } else {
                    Ok(VarInt(x as u64))
                }
            }
            0xFD => {
                let x = u16::consensus_decode(r)?;
                if x < 0xFD {
                    Err(Error::NonMinimalVarInt)
                } else {
                    Ok(VarInt(x as u64))
                }
            }
            n => Ok(VarInt(n as u64)),
        }
    }
}

impl Encodable for String {
    #[inline]
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let b = self.as_bytes();
        let vi_len = VarInt(b.len() as u64).consensus_encode(w)?;
        w.write_all(b)?;
        Ok(vi_len + b.len())
    }
}

impl Decodable for String {
    #[inline]
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<String, Error> {
        String::from_utf8(Decodable::consensus_decode(r)?)
            .map_err(|_| Error::ParseFailed("String was not valid UTF8"))
    }
}

macro_rules! impl_array {
    ($size:literal) => {
        impl Encodable for [u8; $size] {
            #[inline]
            fn consensus_encode<W: io::Write + ?Sized>(
                &self,
                w: &mut W,
            ) -> Result<usize, io::Error> {
                w.write_all(&self[..])?;
                Ok($size)
            }
        }

        impl Decodable for [u8; $size] {
            #[inline]
            fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, Error> {
                let mut ret = [0; $size];
                r.read_exact(&mut ret)?;
                Ok(ret)
            }
        }
    };
}

impl_array!(4);
impl_array!(32);

impl Encodable for Vec<u8> {
    #[inline]
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let vi_len = VarInt(self.len() as u64).consensus_encode(w)?;
        w.write_all(self)?;
        Ok(vi_len + self.len())
    }
}

impl Decodable for Vec<u8> {
    #[inline]
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, Error> {
        let len = VarInt::consensus_decode(r)?.0 as usize;
        if len > MAX_VEC_SIZE {
            return Err(Error::OversizedVectorAllocation { requested: len, max: MAX_VEC_SIZE });
        }
        let mut ret = vec![0u8; len];
        r.read_exact(&mut ret)?;
        Ok(ret)
    }
}

macro_rules! impl_vec {
    ($type:ty) => {
        impl Encodable for Vec<$type> {
            #[inline]
            fn consensus_encode<W: io::Write + ?Sized>(
                &self,
                w: &mut W,
            ) -> Result<usize, io::Error> {
                let mut len = VarInt(self.len() as u64).consensus_encode(w)?;
                for c in self.iter() {
                    len += c.consensus_encode(w)?;
                }
                Ok(len)
            }
        }

        impl Decodable for Vec<$type> {
            #[inline]
            fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, Error> {
                let len = VarInt::consensus_decode(r)?.0;
                // Do not allocate upfront more items than the encoding could
                // possibly carry.
                let max_capacity = MAX_VEC_SIZE / core::mem::size_of::<$type>().max(1);
                if len > max_capacity as u64 {
                    return Err(Error::OversizedVectorAllocation {
                        requested: len as usize,
                        max: max_capacity,
                    });
                }
                let mut ret = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    ret.push(Decodable::consensus_decode(r)?);
                }
                Ok(ret)
            }
        }
    };
}

impl_vec!(crate::blockdata::transaction::TxIn);
impl_vec!(crate::blockdata::transaction::TxOut);
impl_vec!(crate::blockdata::transaction::Transaction);
impl_vec!(crate::hash_types::VoteHash);
impl_vec!(crate::network::message_masternode::Inventory);
impl_vec!(crate::masternodes::payments::Payee);

impl<K, V> Encodable for BTreeMap<K, V>
where
    K: Encodable + Ord,
    V: Encodable,
{
    #[inline]
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = VarInt(self.len() as u64).consensus_encode(w)?;
        for (key, value) in self.iter() {
            len += key.consensus_encode(w)?;
            len += value.consensus_encode(w)?;
        }
        Ok(len)
    }
}

impl<K, V> Decodable for BTreeMap<K, V>
where
    K: Decodable + Ord,
    V: Decodable,
{
    #[inline]
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, Error> {
        let len = VarInt::consensus_decode(r)?.0;
        if len > MAX_VEC_SIZE as u64 {
            return Err(Error::OversizedVectorAllocation {
                requested: len as usize,
                max: MAX_VEC_SIZE,
            });
        }
        let mut ret = BTreeMap::new();
        for _ in 0..len {
            let key = K::consensus_decode(r)?;
            let value = V::consensus_decode(r)?;
            ret.insert(key, value);
        }
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_int() {
        // u8
        assert_eq!(serialize(&1u8), [1u8]);
        assert_eq!(serialize(&0u8), [0u8]);
        assert_eq!(serialize(&255u8), [255u8]);
        // u32
        assert_eq!(serialize(&256u32), [0u8, 1, 0, 0]);
        assert_eq!(serialize(&5000u32), [136u8, 19, 0, 0]);
        // u64
        assert_eq!(serialize(&500_000_000_000u64), [0u8, 136, 82, 106, 116, 0, 0, 0]);
        // i32
        assert_eq!(serialize(&-1i32), [255u8, 255, 255, 255]);
    }

    #[test]
    fn serialize_varint() {
        assert_eq!(serialize(&VarInt(10)), [10u8]);
        assert_eq!(serialize(&VarInt(0xFC)), [0xFCu8]);
        assert_eq!(serialize(&VarInt(0xFD)), [0xFDu8, 0xFD, 0]);
        assert_eq!(serialize(&VarInt(0xFFF)), [0xFDu8, 0xFF, 0xF]);
        assert_eq!(serialize(&VarInt(0xF0F0F0F)), [0xFEu8, 0xF, 0xF, 0xF, 0xF]);
        assert_eq!(
            serialize(&VarInt(0xF0F0F0F0F0E0)),
            [0xFFu8, 0xE0, 0xF0, 0xF0, 0xF0, 0xF0, 0xF0, 0, 0]
        );
    }

    #[test]
    fn deserialize_varint_non_minimal() {
        let non_minimal: &[&[u8]] = &[
            &[0xFD, 0x00, 0x00],
            &[0xFE, 0xFF, 0x00, 0x00, 0x00],
            &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00],
        ];
        for encoding in non_minimal {
            assert!(matches!(
                deserialize::<VarInt>(encoding),
                Err(Error::NonMinimalVarInt)
            ));
        }
    }

    #[test]
    fn serialize_strbuf() {
        assert_eq!(serialize(&"Andrew".to_string()), [6u8, 0x41, 0x6e, 0x64, 0x72, 0x65, 0x77]);
    }

    #[test]
    fn serialize_vector() {
        assert_eq!(serialize(&vec![1u8, 2, 3]), [3u8, 1, 2, 3]);
    }

    #[test]
    fn deserialize_vec_rejects_oversized() {
        let mut encoded = serialize(&VarInt((MAX_VEC_SIZE + 1) as u64));
        encoded.extend([0u8; 16]);
        assert!(matches!(
            deserialize::<Vec<u8>>(&encoded),
            Err(Error::OversizedVectorAllocation { .. })
        ));
    }

    #[test]
    fn btreemap_roundtrip_is_deterministic() {
        let mut map = BTreeMap::new();
        map.insert(7u32, vec![1u8, 2]);
        map.insert(3u32, vec![9u8]);
        let encoded = serialize(&map);
        // Keys come out sorted, so equal maps give equal bytes.
        assert_eq!(encoded, serialize(&map.clone()));
        let decoded: BTreeMap<u32, Vec<u8>> = deserialize(&encoded).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn deserialize_rejects_trailing_bytes() {
        let mut encoded = serialize(&42u32);
        encoded.push(0);
        assert!(deserialize::<u32>(&encoded).is_err());
    }
}
