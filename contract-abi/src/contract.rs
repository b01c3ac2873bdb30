use serde_json::Value;

use crate::{
    abi_serde::{decode, serialize},
    schema::Schema,
    AbiError,
};

/// An entry point of a contract and the schema of its arguments, if it takes any.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub id: u32,
    pub args: Option<Schema>,
}

/// A call to a contract entry point with serialized arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContractOperation {
    pub contract_id: String,
    pub entry_point: u32,
    pub args: Option<Vec<u8>>,
}

/// A call decoded back into the entry name and its json arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedOperation {
    pub name: String,
    pub args: Value,
}

/// Named entry points of a deployed contract.
#[derive(Clone, Debug, PartialEq)]
pub struct Contract {
    id: String,
    entries: Vec<(String, Entry)>,
}

impl Contract {
    pub fn new(id: impl Into<String>, entries: Vec<(String, Entry)>) -> Self {
        Self {
            id: id.into(),
            entries,
        }
    }

    /// Parses `{"id": .., "entries": {"name": {"id": n, "args": schema?}}}`.
    pub fn from_json(json: &Value) -> Result<Self, AbiError> {
        let id = json
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AbiError::InvalidSchema("contract without id".to_string()))?;
        let entries = json
            .get("entries")
            .and_then(Value::as_object)
            .ok_or_else(|| AbiError::InvalidSchema("contract without entries".to_string()))?;

        let entries = entries
            .iter()
            .map(|(name, entry)| {
                let entry_id = entry
                    .get("id")
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| {
                        AbiError::InvalidSchema(format!("entry '{name}' has no valid id"))
                    })?;
                let args = match entry.get("args") {
                    None | Some(Value::Null) => None,
                    Some(args) => Some(Schema::from_json(args)?),
                };
                Ok((name.clone(), Entry { id: entry_id, args }))
            })
            .collect::<Result<Vec<_>, AbiError>>()?;

        Ok(Self::new(id, entries))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, entry)| entry)
    }

    pub fn encode_operation(
        &self,
        name: &str,
        args: &Value,
    ) -> Result<CallContractOperation, AbiError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| AbiError::UnknownOperation(name.to_string()))?;
        let args = entry
            .args
            .as_ref()
            .map(|schema| serialize(args, schema))
            .transpose()?;

        Ok(CallContractOperation {
            contract_id: self.id.clone(),
            entry_point: entry.id,
            args,
        })
    }

    pub fn decode_operation(
        &self,
        operation: &CallContractOperation,
    ) -> Result<DecodedOperation, AbiError> {
        if operation.contract_id != self.id {
            return Err(AbiError::ContractMismatch {
                expected: self.id.clone(),
                received: operation.contract_id.clone(),
            });
        }
        let (name, entry) = self
            .entries
            .iter()
            .find(|(_, entry)| entry.id == operation.entry_point)
            .ok_or(AbiError::UnknownEntryPoint(operation.entry_point))?;

        let args = match (&entry.args, &operation.args) {
            (Some(schema), Some(bytes)) => decode(bytes, schema)?,
            (Some(schema), None) => decode(&[], schema)?,
            (None, _) => Value::Null,
        };

        Ok(DecodedOperation {
            name: name.clone(),
            args,
        })
    }
}
