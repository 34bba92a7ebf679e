//! Typed field values
//!
//! Turns the raw bytes of a field reply into a typed value according to the
//! field's declared type. All multi-byte numbers are big-endian.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::FieldType;
use crate::protocol::DecodeError;

/// A decoded field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer types (LONG, VOLUME, INTEGER, BYTE, unlabelled LIST)
    Integer(i64),
    /// Floating point types (FFLOAT, UFLOAT, SFLOAT)
    Float(f64),
    /// TEXT fields and labelled LIST values
    Text(String),
}

impl Value {
    /// Numeric view of the value, `None` for text
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    /// Get as text, returning None if not text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

fn need(payload: &[u8], expected: usize) -> Result<&[u8], DecodeError> {
    if payload.len() < expected {
        return Err(DecodeError::BufferTooShort {
            expected,
            actual: payload.len(),
        });
    }
    Ok(&payload[..expected])
}

/// Decode a field payload as `field_type`.
///
/// LIST values come back as their raw index; label resolution needs the
/// list tables and lives in [`FieldCatalog::decode_field`](crate::catalog::FieldCatalog::decode_field).
pub fn decode(payload: &[u8], field_type: FieldType) -> Result<Value, DecodeError> {
    let value = match field_type {
        FieldType::Text => {
            // last byte is the string terminator
            let text = payload.split_last().map(|(_, rest)| rest).unwrap_or(&[]);
            Value::Text(String::from_utf8_lossy(text).into_owned())
        }
        FieldType::Long | FieldType::Volume => {
            Value::Integer(BigEndian::read_i32(need(payload, 4)?) as i64)
        }
        FieldType::FFloat => Value::Float(BigEndian::read_f64(need(payload, 8)?)),
        FieldType::UFloat | FieldType::SFloat => {
            Value::Float(BigEndian::read_f32(need(payload, 4)?) as f64)
        }
        FieldType::Integer => Value::Integer(BigEndian::read_i16(need(payload, 2)?) as i64),
        FieldType::Byte | FieldType::List => Value::Integer(need(payload, 1)?[0] as i8 as i64),
    };
    Ok(value)
}
