use serde_json::Value;

use crate::{
    schema::{Schema, Type},
    utils::{decode_blob, encode_blob, read_exact, read_varint, write_varint},
    AbiError,
};

/// Serializes `value` as described by `schema`.
pub fn serialize(value: &Value, schema: &Schema) -> Result<Vec<u8>, AbiError> {
    let mut buffer = Vec::new();
    serialize_into(&mut buffer, value, schema)?;
    Ok(buffer)
}

/// Appends the encoding of `value` to `buffer`. Object fields are written in schema order.
pub fn serialize_into(
    buffer: &mut Vec<u8>,
    value: &Value,
    schema: &Schema,
) -> Result<(), AbiError> {
    match schema {
        Schema::Object(fields) => {
            for (name, field) in fields {
                let field_value = value
                    .get(name)
                    .ok_or_else(|| AbiError::MissingField(name.clone()))?;
                serialize_into(buffer, field_value, field)?;
            }
            Ok(())
        }
        Schema::Primitive(ty) => serialize_primitive(buffer, value, *ty),
    }
}

fn serialize_primitive(buffer: &mut Vec<u8>, value: &Value, ty: Type) -> Result<(), AbiError> {
    match ty {
        Type::Uint32 => {
            let n = as_unsigned(value, ty)?;
            let n = u32::try_from(n).map_err(|_| mismatch(ty, value))?;
            buffer.extend_from_slice(&n.to_be_bytes());
        }
        Type::Uint64 => {
            let n = as_unsigned(value, ty)?;
            buffer.extend_from_slice(&n.to_be_bytes());
        }
        Type::VariableBlob => {
            let encoded = value.as_str().ok_or_else(|| mismatch(ty, value))?;
            let bytes = decode_blob(encoded)?;
            write_varint(buffer, bytes.len() as u64);
            buffer.extend_from_slice(&bytes);
        }
        Type::AccountType => {
            let account = value.as_str().ok_or_else(|| mismatch(ty, value))?;
            write_varint(buffer, account.len() as u64);
            buffer.extend_from_slice(account.as_bytes());
        }
    }
    Ok(())
}

// numbers may arrive as json numbers or as decimal strings, uint64 does not survive a js number
fn as_unsigned(value: &Value, ty: Type) -> Result<u64, AbiError> {
    match value {
        Value::Number(n) => n.as_u64().ok_or_else(|| mismatch(ty, value)),
        Value::String(s) => s.parse().map_err(|_| mismatch(ty, value)),
        _ => Err(mismatch(ty, value)),
    }
}

fn mismatch(expected: Type, found: &Value) -> AbiError {
    AbiError::TypeMismatch {
        expected,
        found: found.to_string(),
    }
}

/// Reads one value described by `schema`, advancing `reader` past it.
pub fn deserialize(reader: &mut &[u8], schema: &Schema) -> Result<Value, AbiError> {
    match schema {
        Schema::Object(fields) => {
            let mut object = serde_json::Map::with_capacity(fields.len());
            for (name, field) in fields {
                object.insert(name.clone(), deserialize(reader, field)?);
            }
            Ok(Value::Object(object))
        }
        Schema::Primitive(Type::Uint32) => {
            let bytes = read_exact(reader, 4)?;
            let mut be = [0u8; 4];
            be.copy_from_slice(bytes);
            Ok(Value::from(u32::from_be_bytes(be)))
        }
        Schema::Primitive(Type::Uint64) => {
            let bytes = read_exact(reader, 8)?;
            let mut be = [0u8; 8];
            be.copy_from_slice(bytes);
            Ok(Value::from(u64::from_be_bytes(be)))
        }
        Schema::Primitive(Type::VariableBlob) => {
            let bytes = read_length_prefixed(reader)?;
            Ok(Value::String(encode_blob(bytes)))
        }
        Schema::Primitive(Type::AccountType) => {
            let bytes = read_length_prefixed(reader)?;
            let account = std::str::from_utf8(bytes).map_err(|_| AbiError::InvalidUtf8)?;
            Ok(Value::String(account.to_string()))
        }
    }
}

fn read_length_prefixed<'a>(reader: &mut &'a [u8]) -> Result<&'a [u8], AbiError> {
    let len = read_varint(reader)?;
    let len = usize::try_from(len).map_err(|_| AbiError::UnexpectedEof)?;
    read_exact(reader, len)
}

/// Decodes a complete buffer, failing when bytes are left over.
pub fn decode(bytes: &[u8], schema: &Schema) -> Result<Value, AbiError> {
    let mut reader = bytes;
    let value = deserialize(&mut reader, schema)?;
    if !reader.is_empty() {
        return Err(AbiError::TrailingBytes(reader.len()));
    }
    Ok(value)
}
