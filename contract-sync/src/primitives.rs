//! Module for primitive structs associated with the sync engine

use std::{fmt, str::FromStr};

use contract_abi::utils::{decode_blob, encode_blob, read_exact, read_varint, write_varint};
use getset::{CopyGetters, Getters};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Errors raised when parsing ids and blobs from their text form
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum EncodingError {
    /// Text is neither `0x` hex nor `z` base58
    #[error("Invalid encoding of '{0}'")]
    UnknownBase(String),
    /// Hex or base58 digits could not be decoded
    #[error("Invalid digits. {0}")]
    InvalidDigits(String),
    /// Bytes do not hold a code, a length and a digest of that length
    #[error("Malformed multihash. {0}")]
    MalformedMultihash(String),
}

/// Decodes `0x` hex or `z` prefixed base58 into bytes.
pub fn decode_multibase(encoded: &str) -> Result<Vec<u8>, EncodingError> {
    if !encoded.starts_with("0x") && !encoded.starts_with('z') {
        return Err(EncodingError::UnknownBase(encoded.to_string()));
    }
    decode_blob(encoded).map_err(|e| EncodingError::InvalidDigits(e.to_string()))
}

/// Self describing hash: varint hash code, varint digest length, digest.
///
/// Used as block and transaction id. The text form is `0x` followed by lowercase hex of the
/// whole encoding.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Multihash(Vec<u8>);

impl Multihash {
    /// Multicodec code of sha2-256
    pub const SHA2_256: u64 = 0x12;

    /// Wraps an already encoded multihash without checking its layout
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Multihash(bytes)
    }

    /// Encodes `digest` under hash `code`
    pub fn wrap(code: u64, digest: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(digest.len() + 4);
        write_varint(&mut bytes, code);
        write_varint(&mut bytes, digest.len() as u64);
        bytes.extend_from_slice(digest);
        Multihash(bytes)
    }

    /// Sha2-256 multihash of `data`
    pub fn sha256(data: &[u8]) -> Self {
        Self::wrap(Self::SHA2_256, &Sha256::digest(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hash code and the digest, checking the declared length.
    pub fn split(&self) -> Result<(u64, &[u8]), EncodingError> {
        let malformed = |e: contract_abi::AbiError| EncodingError::MalformedMultihash(e.to_string());
        let mut reader = &self.0[..];
        let code = read_varint(&mut reader).map_err(malformed)?;
        let len = read_varint(&mut reader).map_err(malformed)?;
        let len = usize::try_from(len)
            .map_err(|_| EncodingError::MalformedMultihash(format!("length {len}")))?;
        let digest = read_exact(&mut reader, len).map_err(malformed)?;
        if !reader.is_empty() {
            return Err(EncodingError::MalformedMultihash(format!(
                "{} bytes after the digest",
                reader.len()
            )));
        }
        Ok((code, digest))
    }

    /// The digest bytes, which are what transaction signatures commit to
    pub fn digest(&self) -> Result<&[u8], EncodingError> {
        self.split().map(|(_, digest)| digest)
    }
}

impl fmt::Display for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_blob(&self.0))
    }
}

impl fmt::Debug for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multihash({self})")
    }
}

impl FromStr for Multihash {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let multihash = Multihash(decode_multibase(s)?);
        multihash.split()?;
        Ok(multihash)
    }
}

impl Serialize for Multihash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Multihash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(de::Error::custom)
    }
}

/// Opaque byte string, `0x` hex in json
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(Vec<u8>);

impl Blob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Blob(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob(bytes)
    }
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_blob(&self.0))
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({} bytes)", self.0.len())
    }
}

impl FromStr for Blob {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Blob::default());
        }
        decode_multibase(s).map(Blob)
    }
}

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(de::Error::custom)
    }
}

/// Position of a block in the chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockTopology {
    pub id: Multihash,
    pub height: u64,
}

impl BlockTopology {
    pub fn new(id: Multihash, height: u64) -> Self {
        BlockTopology { id, height }
    }
}

impl fmt::Display for BlockTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.height, self.id)
    }
}

/// Upload of a contract's bytecode
#[derive(Debug, Clone, PartialEq)]
pub struct UploadContractOperation {
    pub contract_id: String,
    pub bytecode: Blob,
    /// Carried through to the stored record untouched
    pub extensions: serde_json::Value,
}

/// Operation carried by a transaction. Only uploads are of interest, everything else is kept by
/// type name.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    UploadContract(UploadContractOperation),
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: Multihash,
    /// 65 byte recoverable signature over the digest of `id`
    pub signature: Blob,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: Multihash,
    pub height: u64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn topology(&self) -> BlockTopology {
        BlockTopology::new(self.id.clone(), self.height)
    }
}

/// Transaction an upload was found in, with the address that signed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginTransaction {
    pub id: Multihash,
    pub signer: String,
}

/// Contract upload seen in an accepted block that is not yet irreversible
#[derive(Debug, Clone, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct ContractUploadCandidate {
    contract_id: String,
    bytecode: Blob,
    extensions: serde_json::Value,
    block: BlockTopology,
    transaction: OriginTransaction,
    /// Position of the upload among the operations of its transaction
    #[getset(skip)]
    operation_index: u32,
}

impl ContractUploadCandidate {
    /// Creates new ContractUploadCandidate from parts
    pub fn from_parts(
        contract_id: String,
        bytecode: Blob,
        extensions: serde_json::Value,
        block: BlockTopology,
        transaction: OriginTransaction,
        operation_index: u32,
    ) -> Self {
        ContractUploadCandidate {
            contract_id,
            bytecode,
            extensions,
            block,
            transaction,
            operation_index,
        }
    }

    pub fn operation_index(&self) -> u32 {
        self.operation_index
    }
}

/// Finalized contract as persisted in the store
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    #[getset(get = "pub")]
    contract_id: String,
    /// Position in finalization order, from 0
    #[getset(get_copy = "pub")]
    number: u64,
    #[getset(get = "pub")]
    bytecode: Blob,
    #[getset(get = "pub")]
    extensions: serde_json::Value,
    #[getset(get = "pub")]
    block: BlockTopology,
    #[getset(get = "pub")]
    transaction: OriginTransaction,
    #[getset(get_copy = "pub")]
    #[serde(default)]
    operation_index: u32,
}

impl ContractRecord {
    /// Numbers a finalized candidate
    pub fn from_candidate(candidate: &ContractUploadCandidate, number: u64) -> Self {
        ContractRecord {
            contract_id: candidate.contract_id.clone(),
            number,
            bytecode: candidate.bytecode.clone(),
            extensions: candidate.extensions.clone(),
            block: candidate.block.clone(),
            transaction: candidate.transaction.clone(),
            operation_index: candidate.operation_index,
        }
    }

    /// Whether `candidate` was already written when this record was.
    ///
    /// Uploads of one transaction are written in operation order, so a record from the same
    /// block and transaction covers every upload of this contract up to its own operation.
    pub fn covers(&self, candidate: &ContractUploadCandidate) -> bool {
        self.contract_id == candidate.contract_id
            && self.block == candidate.block
            && self.transaction.id == candidate.transaction.id
            && self.operation_index >= candidate.operation_index
    }
}

/// Notification from the upstream event bus
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A block was accepted, it may still be reverted
    BlockAccepted(Block),
    /// A block can no longer be reverted
    BlockIrreversible(BlockTopology),
}

/// Whether the controller is in a catch-up pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Idle,
    CatchingUp,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Idle => f.write_str("idle"),
            SyncMode::CatchingUp => f.write_str("catching up"),
        }
    }
}

/// Snapshot of the sync state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, CopyGetters, Getters)]
pub struct SyncStatus {
    #[getset(get_copy = "pub")]
    mode: SyncMode,
    /// Height of the last finalized block
    #[getset(get_copy = "pub")]
    block_height: u64,
    #[getset(get_copy = "pub")]
    total_contracts: u64,
    #[getset(get_copy = "pub")]
    pending_contracts: usize,
    /// Heights holding pending candidates, ascending
    #[getset(get = "pub")]
    pending_heights: Vec<u64>,
    /// Heights of irreversible notifications waiting for catch-up, ascending
    #[getset(get = "pub")]
    backlog_heights: Vec<u64>,
}

impl SyncStatus {
    /// Creates new SyncStatus from parts
    pub fn from_parts(
        mode: SyncMode,
        block_height: u64,
        total_contracts: u64,
        pending_contracts: usize,
        pending_heights: Vec<u64>,
        backlog_heights: Vec<u64>,
    ) -> Self {
        SyncStatus {
            mode,
            block_height,
            total_contracts,
            pending_contracts,
            pending_heights,
            backlog_heights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_multihash_layout() {
        let id = Multihash::sha256(b"block");
        assert_eq!(&id.as_bytes()[..2], &[0x12, 0x20]);
        let (code, digest) = id.split().unwrap();
        assert_eq!(code, Multihash::SHA2_256);
        assert_eq!(digest, Sha256::digest(b"block").as_slice());
    }

    #[test]
    fn multihash_text_form() {
        let id = Multihash::wrap(0x12, &[0xab, 0xcd]);
        assert_eq!(id.to_string(), "0x1202abcd");
        assert_eq!("0x1202abcd".parse::<Multihash>().unwrap(), id);
    }

    #[test]
    fn multihash_accepts_base58() {
        use base58::ToBase58;
        let id = Multihash::sha256(b"tx");
        let encoded = format!("z{}", id.as_bytes().to_base58());
        assert_eq!(encoded.parse::<Multihash>().unwrap(), id);
    }

    #[test]
    fn short_digest_is_malformed() {
        assert!(matches!(
            "0x1204abcd".parse::<Multihash>(),
            Err(EncodingError::MalformedMultihash(_))
        ));
    }

    #[test]
    fn unprefixed_text_is_rejected() {
        assert_eq!(
            "1202abcd".parse::<Multihash>(),
            Err(EncodingError::UnknownBase("1202abcd".to_string()))
        );
    }

    #[test]
    fn record_json_layout() {
        let candidate = ContractUploadCandidate::from_parts(
            "1Contract".to_string(),
            Blob::new(vec![0, 97, 115, 109]),
            serde_json::json!({}),
            BlockTopology::new(Multihash::wrap(0x12, &[1]), 7),
            OriginTransaction {
                id: Multihash::wrap(0x12, &[2]),
                signer: "1Signer".to_string(),
            },
            2,
        );
        let record = ContractRecord::from_candidate(&candidate, 3);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "contractId": "1Contract",
                "number": 3,
                "bytecode": "0x0061736d",
                "extensions": {},
                "block": {"id": "0x120101", "height": 7},
                "transaction": {"id": "0x120102", "signer": "1Signer"},
                "operationIndex": 2
            })
        );
        assert!(record.covers(&candidate));
        assert_eq!(
            serde_json::from_value::<ContractRecord>(json).unwrap(),
            record
        );
    }
}
