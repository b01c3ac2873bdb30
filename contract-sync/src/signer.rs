//! Recovery of transaction signers and their base58check addresses

use std::sync::OnceLock;

use base58::{FromBase58, ToBase58};
use ripemd160::Ripemd160;
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1,
};
use sha2::{Digest, Sha256};

use crate::primitives::{EncodingError, Multihash};

/// Version byte of a pay-to-pubkey-hash address
pub const ADDRESS_VERSION: u8 = 0x00;

/// Length of a recoverable signature: one header byte and the compact `r || s`
pub const SIGNATURE_LENGTH: usize = 65;

/// Errors associated with keys, signatures and addresses
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// Signature is not 65 bytes
    #[error("Signature must be {SIGNATURE_LENGTH} bytes, found {0}")]
    InvalidLength(usize),
    /// Header byte names no recovery id
    #[error("Invalid recovery header {0}")]
    InvalidRecoveryHeader(u8),
    /// Transaction id could not be split into a digest
    #[error("Invalid transaction id. {0}")]
    InvalidDigest(#[from] EncodingError),
    /// Base58check payload is malformed
    #[error("Invalid base58check string. {0}")]
    InvalidBase58Check(String),
    /// Secret key import failed
    #[error("Invalid wif. {0}")]
    InvalidWif(String),
    /// Curve arithmetic failed
    #[error("Secp256k1 error. {0}")]
    Secp256k1(#[from] secp256k1::Error),
}

pub(crate) fn secp() -> &'static Secp256k1<All> {
    static SECP: OnceLock<Secp256k1<All>> = OnceLock::new();
    SECP.get_or_init(Secp256k1::new)
}

/// Sha256(Sha256(value))
pub fn double_sha256(payload: &[u8]) -> Vec<u8> {
    let h1 = Sha256::digest(payload);
    let h2 = Sha256::digest(&h1);
    h2.to_vec()
}

/// A trait for converting a [u8] to base58 encoded string.
pub trait ToBase58Check {
    /// Converts a value of `self` to a base58 value, returning the owned string.
    /// The version is a prefix that is added.
    /// The suffix is any bytes that we want to add at the end (like the "iscompressed" flag for
    /// Secret key encoding)
    fn to_base58check(&self, version: &[u8], suffix: &[u8]) -> String;
}

impl ToBase58Check for [u8] {
    fn to_base58check(&self, version: &[u8], suffix: &[u8]) -> String {
        let mut payload: Vec<u8> = Vec::new();
        payload.extend_from_slice(version);
        payload.extend_from_slice(self);
        payload.extend_from_slice(suffix);

        let checksum = double_sha256(&payload);
        payload.append(&mut checksum[..4].to_vec());
        payload.to_base58()
    }
}

/// Decodes a base58check string, verifying the checksum. Returns version and payload together.
pub fn from_base58check(encoded: &str) -> Result<Vec<u8>, SignerError> {
    let mut bytes = encoded
        .from_base58()
        .map_err(|e| SignerError::InvalidBase58Check(format!("{e:?}")))?;
    if bytes.len() < 5 {
        return Err(SignerError::InvalidBase58Check(format!(
            "{} bytes is too short",
            bytes.len()
        )));
    }
    let checksum = bytes.split_off(bytes.len() - 4);
    if double_sha256(&bytes)[..4] != checksum[..] {
        return Err(SignerError::InvalidBase58Check("checksum mismatch".to_string()));
    }
    Ok(bytes)
}

/// RIPEMD160(SHA256(public key))
pub fn hash160(bytes: &[u8]) -> Vec<u8> {
    Ripemd160::digest(&Sha256::digest(bytes)).to_vec()
}

/// Base58check address of a serialized public key
pub fn address_from_key_bytes(serialized: &[u8]) -> String {
    hash160(serialized).to_base58check(&[ADDRESS_VERSION], &[])
}

/// Base58check address of a compressed public key
pub fn address_from_public_key(public_key: &PublicKey) -> String {
    address_from_key_bytes(&public_key.serialize())
}

/// Maps the signature header byte to a recovery id.
///
/// Compressed-key headers (31..=34) are what signers produce. The uncompressed range (27..=30)
/// and raw ids (0..=3) name the same recovery id.
pub fn recovery_id_from_header(header: u8) -> Result<RecoveryId, SignerError> {
    let id = match header {
        31..=34 => header - 31,
        27..=30 => header - 27,
        0..=3 => header,
        _ => return Err(SignerError::InvalidRecoveryHeader(header)),
    };
    RecoveryId::from_i32(i32::from(id)).map_err(|_| SignerError::InvalidRecoveryHeader(header))
}

/// Recovers the public key that produced `signature` over the digest of `transaction_id`.
pub fn recover_public_key(
    signature: &[u8],
    transaction_id: &Multihash,
) -> Result<PublicKey, SignerError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(SignerError::InvalidLength(signature.len()));
    }
    let recovery_id = recovery_id_from_header(signature[0])?;
    let signature = RecoverableSignature::from_compact(&signature[1..], recovery_id)?;
    let message = Message::from_slice(transaction_id.digest()?)?;

    Ok(secp().recover_ecdsa(&message, &signature)?)
}

/// Address of the signer of a transaction.
pub fn recover_signer(signature: &[u8], transaction_id: &Multihash) -> Result<String, SignerError> {
    recover_public_key(signature, transaction_id).map(|key| address_from_public_key(&key))
}
