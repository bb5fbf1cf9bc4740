// SPDX-License-Identifier: CC0-1.0

//! Message and hash signing.
//!
//! Masternodes authenticate their payment votes with compact recoverable
//! ECDSA signatures. Two inputs are signed depending on chain height: the
//! raw signature hash of the vote, or --- below the sign-hash threshold ---
//! the legacy human-readable message string hashed with the Genesis signed
//! message prefix.

use core::fmt;

use hashes::{sha256d, Hash, HashEngine};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, Signing, Verification};

use crate::consensus::encode::{serialize, VarInt};

/// The prefix for signed messages using the Genesis message signing protocol.
pub const SIGNED_MSG_PREFIX: &[u8] = b"\x18Genesis Signed Message:\n";

/// An error verifying or decoding a compact signature.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignatureError {
    /// Signature is expected to be 65 bytes.
    InvalidLength(usize),
    /// The signature is invalidly constructed.
    InvalidEncoding(secp256k1::Error),
    /// The signature recovered to a different key.
    KeyMismatch,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SignatureError::InvalidLength(len) => {
                write!(f, "signature length {} is not 65 bytes", len)
            }
            SignatureError::InvalidEncoding(ref e) => write_err!(f, "invalid encoding"; e),
            SignatureError::KeyMismatch => write!(f, "signature was made with a different key"),
        }
    }
}

impl std::error::Error for SignatureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            SignatureError::InvalidEncoding(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<secp256k1::Error> for SignatureError {
    fn from(e: secp256k1::Error) -> SignatureError {
        SignatureError::InvalidEncoding(e)
    }
}

/// Hashes a message with the Genesis signed message prefix.
pub fn signed_msg_hash(msg: &str) -> sha256d::Hash {
    let mut engine = sha256d::Hash::engine();
    engine.input(SIGNED_MSG_PREFIX);
    engine.input(&serialize(&VarInt(msg.len() as u64)));
    engine.input(msg.as_bytes());
    sha256d::Hash::from_engine(engine)
}

fn secp_message(hash: sha256d::Hash) -> Message {
    Message::from_digest_slice(hash.as_byte_array()).expect("32 bytes by construction")
}

/// Signs a hash, producing a 65-byte compact recoverable signature.
pub fn sign_hash<C: Signing>(
    secp: &Secp256k1<C>,
    hash: sha256d::Hash,
    secret_key: &SecretKey,
) -> Vec<u8> {
    let signature = secp.sign_ecdsa_recoverable(&secp_message(hash), secret_key);
    let (recovery_id, raw) = signature.serialize_compact();
    let mut serialized = vec![0u8; 65];
    // Compact header: 27 + recovery id, + 4 for a compressed pubkey.
    serialized[0] = 27 + recovery_id.to_i32() as u8 + 4;
    serialized[1..].copy_from_slice(&raw[..]);
    serialized
}

/// Verifies a 65-byte compact signature over a hash against a public key.
pub fn verify_hash<C: Verification>(
    secp: &Secp256k1<C>,
    hash: sha256d::Hash,
    public_key: &PublicKey,
    signature: &[u8],
) -> Result<(), SignatureError> {
    if signature.len() != 65 {
        return Err(SignatureError::InvalidLength(signature.len()));
    }
    let flag_byte = signature[0]
        .checked_sub(27)
        .ok_or(SignatureError::InvalidEncoding(secp256k1::Error::InvalidRecoveryId))?;
    let recovery_id = RecoveryId::from_i32(i32::from(flag_byte & 0x03))?;
    let signature = RecoverableSignature::from_compact(&signature[1..], recovery_id)?;
    let recovered = secp.recover_ecdsa(&secp_message(hash), &signature)?;
    if recovered == *public_key {
        Ok(())
    } else {
        Err(SignatureError::KeyMismatch)
    }
}

/// Signs a message string using the legacy signed message scheme.
pub fn sign_message<C: Signing>(
    secp: &Secp256k1<C>,
    msg: &str,
    secret_key: &SecretKey,
) -> Vec<u8> {
    sign_hash(secp, signed_msg_hash(msg), secret_key)
}

/// Verifies a legacy signed message signature against a public key.
pub fn verify_message<C: Verification>(
    secp: &Secp256k1<C>,
    msg: &str,
    public_key: &PublicKey,
    signature: &[u8],
) -> Result<(), SignatureError> {
    verify_hash(secp, signed_msg_hash(msg), public_key, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_sign_verify_roundtrip() {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut secp256k1::rand::thread_rng());

        let hash = sha256d::Hash::hash(b"payment vote");
        let signature = sign_hash(&secp, hash, &secret_key);
        assert_eq!(signature.len(), 65);
        assert_eq!(verify_hash(&secp, hash, &public_key, &signature), Ok(()));

        // Another key does not verify.
        let (_, other_key) = secp.generate_keypair(&mut secp256k1::rand::thread_rng());
        assert_eq!(
            verify_hash(&secp, hash, &other_key, &signature),
            Err(SignatureError::KeyMismatch)
        );

        // Another hash does not verify either.
        let other_hash = sha256d::Hash::hash(b"some other vote");
        assert!(verify_hash(&secp, other_hash, &public_key, &signature).is_err());
    }

    #[test]
    fn message_sign_verify_roundtrip() {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut secp256k1::rand::thread_rng());

        let msg = "f0000000000000000000000000000000-0|1010|OP_DUP OP_HASH160";
        let signature = sign_message(&secp, msg, &secret_key);
        assert_eq!(verify_message(&secp, msg, &public_key, &signature), Ok(()));
        assert!(verify_message(&secp, "another message", &public_key, &signature).is_err());
    }

    #[test]
    fn rejects_malformed_signatures() {
        let secp = Secp256k1::new();
        let (_, public_key) = secp.generate_keypair(&mut secp256k1::rand::thread_rng());
        let hash = sha256d::Hash::hash(b"vote");

        assert_eq!(
            verify_hash(&secp, hash, &public_key, &[0u8; 64]),
            Err(SignatureError::InvalidLength(64))
        );
        // Header byte below 27 cannot carry a recovery id.
        let mut sig = vec![0u8; 65];
        sig[0] = 3;
        assert!(matches!(
            verify_hash(&secp, hash, &public_key, &sig),
            Err(SignatureError::InvalidEncoding(_))
        ));
    }
}
