//! The tagged value carried by a property (spec.md §3 "Property").

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Path(PathBuf),
    List(Vec<PropertyValue>),
    /// A value of a user type for which no formatter has been registered
    /// yet; renders as `<unformatted>` until `register_formatter` runs.
    Unformatted(String),
}

impl PropertyValue {
    /// The formatter-table key for this value's type.
    pub fn type_tag(&self) -> &'static str {
        match self {
            PropertyValue::I8(_) => "i8",
            PropertyValue::I16(_) => "i16",
            PropertyValue::I32(_) => "i32",
            PropertyValue::I64(_) => "i64",
            PropertyValue::U8(_) => "u8",
            PropertyValue::U16(_) => "u16",
            PropertyValue::U32(_) => "u32",
            PropertyValue::U64(_) => "u64",
            PropertyValue::F64(_) => "f64",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Bytes(_) => "bytes",
            PropertyValue::Path(_) => "path",
            PropertyValue::List(_) => "list",
            PropertyValue::Unformatted(_) => "unformatted",
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::I64(v)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::U64(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Bytes(v.into_bytes())
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Bytes(v.as_bytes().to_vec())
    }
}
