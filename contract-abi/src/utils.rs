use base58::FromBase58;

use crate::AbiError;

/// Appends `value` as an unsigned LEB128 varint.
pub fn write_varint(buffer: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buffer.push(byte);
            return;
        }
        buffer.push(byte | 0x80);
    }
}

/// Reads an unsigned LEB128 varint, advancing `reader` past it.
pub fn read_varint(reader: &mut &[u8]) -> Result<u64, AbiError> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let (&byte, rest) = reader.split_first().ok_or(AbiError::UnexpectedEof)?;
        *reader = rest;
        let bits = u64::from(byte & 0x7f);
        if shift == 63 && bits > 1 {
            return Err(AbiError::VarintOverflow);
        }
        value |= bits << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(AbiError::VarintOverflow)
}

/// Splits `len` bytes off the front of `reader`.
pub fn read_exact<'a>(reader: &mut &'a [u8], len: usize) -> Result<&'a [u8], AbiError> {
    if reader.len() < len {
        return Err(AbiError::UnexpectedEof);
    }
    let (head, rest) = reader.split_at(len);
    *reader = rest;
    Ok(head)
}

/// `0x` prefixed lowercase hex, the json form of a variable blob.
pub fn encode_blob(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decodes a multibase blob, `0x` hex or `z` base58.
pub fn decode_blob(encoded: &str) -> Result<Vec<u8>, AbiError> {
    if let Some(digits) = encoded.strip_prefix("0x") {
        hex::decode(digits).map_err(|e| AbiError::InvalidBlob(e.to_string()))
    } else if let Some(digits) = encoded.strip_prefix('z') {
        digits
            .from_base58()
            .map_err(|e| AbiError::InvalidBlob(format!("{e:?}")))
    } else {
        Err(AbiError::InvalidBlob(format!("unknown base in '{encoded}'")))
    }
}
