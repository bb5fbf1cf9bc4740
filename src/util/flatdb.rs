// SPDX-License-Identifier: CC0-1.0

//! Flat-file persistence.
//!
//! The payment caches survive restarts through a single on-disk blob with a
//! deterministic, versioned framing: a magic message naming the content, a
//! format version, the network magic, the consensus-encoded payload, and a
//! trailing sha256d checksum over everything before it.

use core::fmt;
use std::error;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use hashes::{sha256d, Hash};

use crate::consensus::encode::{self, deserialize_partial};
use crate::consensus::{Decodable, Encodable};
use crate::network::constants::Network;

/// The serialization format version written into every blob.
const FORMAT_VERSION: u32 = 1;

/// An error loading or storing a flat-file blob.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error.
    Io(io::Error),
    /// An encoding error in the payload.
    Encode(encode::Error),
    /// The magic message did not match the expected content.
    BadMagicMessage,
    /// The blob was written for a different network.
    WrongNetwork(u32),
    /// The blob was written by an unknown format version.
    UnsupportedVersion(u32),
    /// The trailing checksum did not match the content.
    ChecksumMismatch,
    /// Bytes were left over after the payload.
    TrailingData(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write_err!(f, "IO error"; e),
            Error::Encode(ref e) => write_err!(f, "encoding error"; e),
            Error::BadMagicMessage => write!(f, "magic message mismatch"),
            Error::WrongNetwork(magic) => write!(f, "unexpected network magic {:#x}", magic),
            Error::UnsupportedVersion(v) => write!(f, "unsupported format version {}", v),
            Error::ChecksumMismatch => write!(f, "checksum mismatch"),
            Error::TrailingData(n) => write!(f, "{} trailing bytes after payload", n),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            Error::Encode(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<encode::Error> for Error {
    fn from(e: encode::Error) -> Error {
        Error::Encode(e)
    }
}

/// A single-file store for one consensus-encodable value.
pub struct FlatDb {
    path: PathBuf,
    magic_message: String,
    network: Network,
}

impl FlatDb {
    /// Creates a store at `path` for content identified by `magic_message`.
    pub fn new<P: AsRef<Path>>(path: P, magic_message: &str, network: Network) -> FlatDb {
        FlatDb {
            path: path.as_ref().to_owned(),
            magic_message: magic_message.to_owned(),
            network,
        }
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes `value` and writes the framed blob to disk.
    pub fn dump<T: Encodable>(&self, value: &T) -> Result<(), Error> {
        let mut body = Vec::new();
        self.magic_message.consensus_encode(&mut body).expect("in-memory writers don't error");
        FORMAT_VERSION.consensus_encode(&mut body).expect("in-memory writers don't error");
        self.network.consensus_encode(&mut body).expect("in-memory writers don't error");
        value.consensus_encode(&mut body).expect("in-memory writers don't error");

        let checksum = sha256d::Hash::hash(&body);

        let mut file = File::create(&self.path)?;
        file.write_all(&body)?;
        file.write_all(&checksum.to_byte_array())?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads the blob back, verifying framing and checksum.
    pub fn load<T: Decodable>(&self) -> Result<T, Error> {
        let mut file = File::open(&self.path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if data.len() < 32 {
            return Err(Error::ChecksumMismatch);
        }
        let (body, checksum) = data.split_at(data.len() - 32);
        if sha256d::Hash::hash(body).to_byte_array() != checksum {
            return Err(Error::ChecksumMismatch);
        }

        let (magic_message, consumed) = deserialize_partial::<String>(body)?;
        if magic_message != self.magic_message {
            return Err(Error::BadMagicMessage);
        }
        let body = &body[consumed..];

        let (version, consumed) = deserialize_partial::<u32>(body)?;
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let body = &body[consumed..];

        let (network_magic, consumed) = deserialize_partial::<u32>(body)?;
        if network_magic != self.network.magic() {
            return Err(Error::WrongNetwork(network_magic));
        }
        let body = &body[consumed..];

        let (value, consumed) = deserialize_partial::<T>(body)?;
        if consumed != body.len() {
            return Err(Error::TrailingData(body.len() - consumed));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("genesis-masternodes-flatdb-{}-{}", std::process::id(), name));
        path
    }

    #[test]
    fn dump_load_roundtrip() {
        let path = temp_path("roundtrip");
        let db = FlatDb::new(&path, "MasternodePayments", Network::Regtest);

        let mut value = BTreeMap::new();
        value.insert(1010u32, vec![1u8, 2, 3]);
        db.dump(&value).unwrap();
        let loaded: BTreeMap<u32, Vec<u8>> = db.load().unwrap();
        assert_eq!(loaded, value);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn detects_corruption() {
        let path = temp_path("corruption");
        let db = FlatDb::new(&path, "MasternodePayments", Network::Regtest);
        db.dump(&42u32).unwrap();

        let mut raw = std::fs::read(&path).unwrap();
        raw[5] ^= 0xFF;
        std::fs::write(&path, &raw).unwrap();
        assert!(matches!(db.load::<u32>(), Err(Error::ChecksumMismatch)));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_wrong_magic_message() {
        let path = temp_path("magic");
        let writer = FlatDb::new(&path, "MasternodePayments", Network::Regtest);
        writer.dump(&42u32).unwrap();

        let reader = FlatDb::new(&path, "GovernanceTriggers", Network::Regtest);
        assert!(matches!(reader.load::<u32>(), Err(Error::BadMagicMessage)));

        let other_net = FlatDb::new(&path, "MasternodePayments", Network::Genesis);
        assert!(matches!(other_net.load::<u32>(), Err(Error::WrongNetwork(_))));

        std::fs::remove_file(&path).unwrap();
    }
}
