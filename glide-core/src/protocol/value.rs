//! Reply values and typed conversions

use crate::error::{GlideError, Result};
use std::collections::HashMap;

/// A decoded RESP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null bulk string or null array (`$-1`, `*-1`)
    Nil,
    /// Integer (`:1000`)
    Int(i64),
    /// Bulk string (`$6\r\nfoobar`)
    BulkString(Vec<u8>),
    /// Array (`*2 ...`)
    Array(Vec<Value>),
    /// Simple status (`+OK`)
    Status(String),
    /// Error reply (`-ERR message`)
    Error(String),
}

impl Value {
    /// Check if this is an error reply
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Check if this is the `OK` status
    pub fn is_ok_status(&self) -> bool {
        matches!(self, Value::Status(s) if s == "OK")
    }

    /// Get as string (for status or UTF-8 bulk string)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Status(s) => Some(s),
            Value::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get as integer. Bulk strings holding a decimal number are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::BulkString(_) | Value::Status(_) => self.as_str()?.parse().ok(),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Consume into raw bytes
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Value::BulkString(b) => Some(b),
            Value::Status(s) => Some(s.into_bytes()),
            Value::Int(i) => Some(i.to_string().into_bytes()),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "integer",
            Value::BulkString(_) => "bulk string",
            Value::Array(_) => "array",
            Value::Status(_) => "status",
            Value::Error(_) => "error",
        }
    }
}

/// Conversion from a reply into a host type
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn unexpected<T>(value: &Value, expected: &str) -> Result<T> {
    Err(GlideError::Protocol(format!(
        "expected {}, got {}",
        expected,
        value.kind()
    )))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Error(_) => unexpected(&value, "non-error reply"),
            _ => Ok(()),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::BulkString(bytes) => String::from_utf8(bytes)
                .map_err(|e| GlideError::Protocol(format!("invalid UTF-8 in reply: {}", e))),
            Value::Status(s) => Ok(s),
            Value::Int(i) => Ok(i.to_string()),
            other => unexpected(&other, "string"),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value.as_i64() {
            Some(i) => Ok(i),
            None => unexpected(&value, "integer"),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: Value) -> Result<Self> {
        let i = i64::from_value(value)?;
        u64::try_from(i).map_err(|_| GlideError::Protocol(format!("negative value {}", i)))
    }
}

impl FromValue for usize {
    fn from_value(value: Value) -> Result<Self> {
        let i = u64::from_value(value)?;
        Ok(i as usize)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(i != 0),
            Value::Status(ref s) if s == "OK" => Ok(true),
            Value::Nil => Ok(false),
            other => unexpected(&other, "boolean"),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Nil => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            Value::Nil => Ok(Vec::new()),
            other => unexpected(&other, "array"),
        }
    }
}

/// Flat `[field, value, field, value, ...]` arrays (HGETALL, CONFIG GET)
impl<V: FromValue> FromValue for HashMap<String, V> {
    fn from_value(value: Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            Value::Nil => return Ok(HashMap::new()),
            other => return unexpected(&other, "map"),
        };
        if items.len() % 2 != 0 {
            return Err(GlideError::Protocol(
                "map reply has an odd number of elements".to_string(),
            ));
        }

        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            map.insert(String::from_value(k)?, V::from_value(v)?);
        }
        Ok(map)
    }
}
