use bincode::{Decode, Encode};
use std::fmt;

/// Column types supported by the engine.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// 64-bit signed integer. Narrower integral values are widened on input.
    Integer,
    /// UTF-8 string.
    Text,
}

/// A single typed cell value.
#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Int(i64),
    Text(String),
}

impl ColumnValue {
    /// The type this value satisfies when checked against a schema.
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnValue::Int(_) => ColumnType::Integer,
            ColumnValue::Text(_) => ColumnType::Text,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "INTEGER"),
            ColumnType::Text => write!(f, "TEXT"),
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Int(v) => write!(f, "{}", v),
            ColumnValue::Text(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! widen_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for ColumnValue {
                fn from(v: $t) -> Self {
                    ColumnValue::Int(v as i64)
                }
            }
        )*
    };
}

widen_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::Text(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_widening() {
        assert_eq!(ColumnValue::from(7i8), ColumnValue::Int(7));
        assert_eq!(ColumnValue::from(7i16), ColumnValue::Int(7));
        assert_eq!(ColumnValue::from(7u32), ColumnValue::Int(7));
        assert_eq!(ColumnValue::from(-1i32), ColumnValue::Int(-1));
    }

    #[test]
    fn test_value_types() {
        assert_eq!(ColumnValue::Int(1).column_type(), ColumnType::Integer);
        assert_eq!(
            ColumnValue::from("hello").column_type(),
            ColumnType::Text
        );
    }
}
