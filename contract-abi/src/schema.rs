use std::{fmt, str::FromStr};

use serde_json::Value;

use crate::AbiError;

/// Primitive types understood by the codec
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    Uint32,
    Uint64,
    VariableBlob,
    AccountType,
}

impl Type {
    pub fn as_str(&self) -> &'static str {
        match self {
            Type::Uint32 => "uint32",
            Type::Uint64 => "uint64",
            Type::VariableBlob => "variableblob",
            Type::AccountType => "account_type",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Type {
    type Err = AbiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uint32" => Ok(Type::Uint32),
            "uint64" => Ok(Type::Uint64),
            "variableblob" => Ok(Type::VariableBlob),
            "account_type" => Ok(Type::AccountType),
            other => Err(AbiError::UnknownType(other.to_string())),
        }
    }
}

/// Description of an encoded value: a primitive, or named fields encoded in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub enum Schema {
    Primitive(Type),
    Object(Vec<(String, Schema)>),
}

impl Schema {
    /// Parses the json form, where a string names a primitive and an object nests schemas.
    pub fn from_json(json: &Value) -> Result<Self, AbiError> {
        match json {
            Value::String(name) => Ok(Schema::Primitive(name.parse()?)),
            Value::Object(fields) => fields
                .iter()
                .map(|(name, field)| Ok((name.clone(), Schema::from_json(field)?)))
                .collect::<Result<Vec<_>, AbiError>>()
                .map(Schema::Object),
            other => Err(AbiError::InvalidSchema(format!(
                "expected a type name or an object, found {other}"
            ))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Schema::Primitive(ty) => Value::String(ty.as_str().to_string()),
            Schema::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, field)| (name.clone(), field.to_json()))
                    .collect(),
            ),
        }
    }
}
