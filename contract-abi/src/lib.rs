//! Schema driven encoding of contract call arguments.
//!
//! A [`schema::Schema`] is either a primitive type or an ordered object of nested schemas,
//! and [`abi_serde`] walks it recursively to turn `serde_json` values into bytes and back.

pub mod abi_serde;
pub mod contract;
pub mod schema;
pub mod utils;

/// Errors raised by the codec
#[non_exhaustive]
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum AbiError {
    #[error("Unknown type {0}")]
    UnknownType(String),
    #[error("Invalid schema. {0}")]
    InvalidSchema(String),
    #[error("Expected a value of type {expected}, found {found}")]
    TypeMismatch {
        expected: schema::Type,
        found: String,
    },
    #[error("Missing field '{0}'")]
    MissingField(String),
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Varint does not fit in 64 bits")]
    VarintOverflow,
    #[error("Invalid utf8 in account string")]
    InvalidUtf8,
    #[error("Invalid blob encoding. {0}")]
    InvalidBlob(String),
    #[error("{0} trailing bytes after decoding")]
    TrailingBytes(usize),
    #[error("Operation {0} unknown")]
    UnknownOperation(String),
    #[error("Unknown entry id {0}")]
    UnknownEntryPoint(u32),
    #[error("Invalid contract id. Expected: {expected}. Received: {received}")]
    ContractMismatch { expected: String, received: String },
}
