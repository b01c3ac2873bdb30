//! Secret keys for producing signatures the recovery path accepts

use secp256k1::{Message, PublicKey, SecretKey};
use sha2::{Digest, Sha256};

use crate::{
    primitives::Multihash,
    signer::{
        address_from_key_bytes, address_from_public_key, from_base58check, secp, SignerError, ToBase58Check,
        SIGNATURE_LENGTH,
    },
};

/// Version byte of a wallet import format secret key
pub const WIF_VERSION: u8 = 0x80;

const COMPRESSED_FLAG: u8 = 0x01;

/// secp256k1 secret key with its address
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey {
    secret: SecretKey,
    compressed: bool,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn new(secret: SecretKey) -> Self {
        SigningKey {
            secret,
            compressed: true,
        }
    }

    /// The secret is the sha256 of the phrase
    pub fn from_seed_phrase(phrase: &str) -> Result<Self, SignerError> {
        let secret = SecretKey::from_slice(&Sha256::digest(phrase.as_bytes()))?;
        Ok(Self::new(secret))
    }

    pub fn from_wif(wif: &str) -> Result<Self, SignerError> {
        let payload = from_base58check(wif)?;
        let (version, key) = payload
            .split_first()
            .ok_or_else(|| SignerError::InvalidWif("empty payload".to_string()))?;
        if *version != WIF_VERSION {
            return Err(SignerError::InvalidWif(format!("version {version:#04x}")));
        }
        let (key, compressed) = match key.len() {
            32 => (key, false),
            33 if key[32] == COMPRESSED_FLAG => (&key[..32], true),
            len => {
                return Err(SignerError::InvalidWif(format!(
                    "{len} byte key payload"
                )))
            }
        };

        Ok(SigningKey {
            secret: SecretKey::from_slice(key)?,
            compressed,
        })
    }

    pub fn to_wif(&self) -> String {
        let suffix: &[u8] = if self.compressed {
            &[COMPRESSED_FLAG]
        } else {
            &[]
        };
        self.secret
            .secret_bytes()
            .to_base58check(&[WIF_VERSION], suffix)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(secp(), &self.secret)
    }

    /// Address of the public key in the form the WIF names.
    ///
    /// Signature recovery always yields the compressed-key address, so only compressed keys sign
    /// as their own address.
    pub fn address(&self) -> String {
        if self.compressed {
            address_from_public_key(&self.public_key())
        } else {
            address_from_key_bytes(&self.public_key().serialize_uncompressed())
        }
    }

    /// Signs the digest of `id` with a compressed-key recovery header
    pub fn sign_digest(&self, id: &Multihash) -> Result<[u8; SIGNATURE_LENGTH], SignerError> {
        let message = Message::from_slice(id.digest()?)?;
        let (recovery_id, compact) = secp()
            .sign_ecdsa_recoverable(&message, &self.secret)
            .serialize_compact();

        let mut signature = [0u8; SIGNATURE_LENGTH];
        signature[0] = recovery_id.to_i32() as u8 + 31;
        signature[1..].copy_from_slice(&compact);
        Ok(signature)
    }
}
