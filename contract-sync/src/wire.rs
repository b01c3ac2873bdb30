//! Json shapes of upstream notifications and rpc responses, and their conversion to primitives

use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

use crate::primitives::{
    Block, BlockTopology, Blob, EncodingError, Notification, Operation, Transaction,
    UploadContractOperation,
};

/// Routing key of accepted block notifications
pub const BLOCK_ACCEPT_ROUTING_KEY: &str = "koinos.block.accept";
/// Routing key of irreversible block notifications
pub const BLOCK_IRREVERSIBLE_ROUTING_KEY: &str = "koinos.block.irreversible";
/// Operation type of a contract upload
pub const UPLOAD_CONTRACT_OPERATION: &str = "koinos::protocol::upload_contract_operation";

/// Errors associated with decoding upstream json
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Json does not have the expected shape
    #[error("Malformed json. {0}")]
    Json(#[from] serde_json::Error),
    /// An id or blob is not validly encoded
    #[error("Invalid encoding. {0}")]
    Encoding(#[from] EncodingError),
    /// Envelope names a routing key this service does not consume
    #[error("Unknown routing key {0}")]
    UnknownRoutingKey(String),
    /// Block item was returned without its block
    #[error("Block item at height {0} carries no block")]
    MissingBlock(u64),
    /// Block item and block header disagree
    #[error("Block item at height {item} holds a block at height {block}")]
    HeightMismatch { item: u64, block: u64 },
}

// heights are uint64, which upstream serializes as decimal strings
fn height<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Height {
        Number(u64),
        Text(String),
    }

    match Height::deserialize(deserializer)? {
        Height::Number(n) => Ok(n),
        Height::Text(s) => s.parse().map_err(de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
pub struct TopologyJson {
    pub id: String,
    #[serde(deserialize_with = "height")]
    pub height: u64,
}

impl TryFrom<TopologyJson> for BlockTopology {
    type Error = WireError;

    fn try_from(json: TopologyJson) -> Result<Self, Self::Error> {
        Ok(BlockTopology::new(json.id.parse()?, json.height))
    }
}

#[derive(Debug, Deserialize)]
pub struct HeaderJson {
    #[serde(deserialize_with = "height")]
    pub height: u64,
}

#[derive(Debug, Deserialize)]
pub struct OperationJson {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Deserialize)]
pub struct UploadContractJson {
    pub contract_id: String,
    #[serde(default)]
    pub bytecode: String,
    #[serde(default)]
    pub extensions: Value,
}

impl TryFrom<OperationJson> for Operation {
    type Error = WireError;

    fn try_from(json: OperationJson) -> Result<Self, Self::Error> {
        if json.kind != UPLOAD_CONTRACT_OPERATION {
            return Ok(Operation::Other(json.kind));
        }
        let upload: UploadContractJson = serde_json::from_value(json.value)?;
        Ok(Operation::UploadContract(UploadContractOperation {
            contract_id: upload.contract_id,
            bytecode: upload.bytecode.parse()?,
            extensions: upload.extensions,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ActiveDataJson {
    #[serde(default)]
    pub operations: Vec<OperationJson>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionJson {
    pub id: String,
    #[serde(default)]
    pub active_data: ActiveDataJson,
    #[serde(default)]
    pub signature_data: String,
}

impl TryFrom<TransactionJson> for Transaction {
    type Error = WireError;

    fn try_from(json: TransactionJson) -> Result<Self, Self::Error> {
        let signature: Blob = json.signature_data.parse()?;
        let operations = json
            .active_data
            .operations
            .into_iter()
            .map(Operation::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Transaction {
            id: json.id.parse()?,
            signature,
            operations,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct BlockJson {
    pub id: String,
    pub header: HeaderJson,
    #[serde(default)]
    pub transactions: Vec<TransactionJson>,
}

impl TryFrom<BlockJson> for Block {
    type Error = WireError;

    fn try_from(json: BlockJson) -> Result<Self, Self::Error> {
        let transactions = json
            .transactions
            .into_iter()
            .map(Transaction::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Block {
            id: json.id.parse()?,
            height: json.header.height,
            transactions,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct BlockAcceptedJson {
    pub block: BlockJson,
}

#[derive(Debug, Deserialize)]
pub struct BlockIrreversibleJson {
    pub topology: TopologyJson,
}

/// Notification as published on the event bus
#[derive(Debug, Deserialize)]
pub struct EnvelopeJson {
    pub routing_key: String,
    pub payload: Value,
}

impl TryFrom<EnvelopeJson> for Notification {
    type Error = WireError;

    fn try_from(envelope: EnvelopeJson) -> Result<Self, Self::Error> {
        match envelope.routing_key.as_str() {
            BLOCK_ACCEPT_ROUTING_KEY => {
                let accepted: BlockAcceptedJson = serde_json::from_value(envelope.payload)?;
                Ok(Notification::BlockAccepted(accepted.block.try_into()?))
            }
            BLOCK_IRREVERSIBLE_ROUTING_KEY => {
                let irreversible: BlockIrreversibleJson =
                    serde_json::from_value(envelope.payload)?;
                Ok(Notification::BlockIrreversible(
                    irreversible.topology.try_into()?,
                ))
            }
            _ => Err(WireError::UnknownRoutingKey(envelope.routing_key)),
        }
    }
}

/// Parses one envelope from its json text
pub fn parse_notification(text: &str) -> Result<Notification, WireError> {
    let envelope: EnvelopeJson = serde_json::from_str(text)?;
    envelope.try_into()
}

/// Response of `chain.get_head_info`
#[derive(Debug, Deserialize)]
pub struct HeadInfoJson {
    pub head_topology: TopologyJson,
}

#[derive(Debug, Deserialize)]
pub struct BlockItemJson {
    pub block_id: String,
    #[serde(deserialize_with = "height")]
    pub block_height: u64,
    #[serde(default)]
    pub block: Option<BlockJson>,
}

impl TryFrom<BlockItemJson> for Block {
    type Error = WireError;

    fn try_from(item: BlockItemJson) -> Result<Self, Self::Error> {
        let block: Block = item
            .block
            .ok_or(WireError::MissingBlock(item.block_height))?
            .try_into()?;
        if block.height != item.block_height {
            return Err(WireError::HeightMismatch {
                item: item.block_height,
                block: block.height,
            });
        }
        Ok(block)
    }
}

/// Response of `block_store.get_blocks_by_height`
#[derive(Debug, Deserialize)]
pub struct BlocksByHeightJson {
    #[serde(default)]
    pub block_items: Vec<BlockItemJson>,
}

impl BlocksByHeightJson {
    pub fn into_blocks(self) -> Result<Vec<Block>, WireError> {
        self.block_items.into_iter().map(Block::try_from).collect()
    }
}
