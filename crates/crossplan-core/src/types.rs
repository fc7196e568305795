//! Element-type descriptors carried by slots. Pure data.
//!
//! Slot wiring requires structural equality of these descriptors; there is no
//! implicit widening.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
    /// Pairs/records produced by joins and similar combinators.
    Tuple(Vec<DataType>),
}

impl DataType {
    pub fn pair(left: DataType, right: DataType) -> Self {
        DataType::Tuple(vec![left, right])
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, DataType::Tuple(_))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => f.write_str("bool"),
            DataType::Int32 => f.write_str("i32"),
            DataType::Int64 => f.write_str("i64"),
            DataType::Float32 => f.write_str("f32"),
            DataType::Float64 => f.write_str("f64"),
            DataType::Utf8 => f.write_str("utf8"),
            DataType::Binary => f.write_str("binary"),
            DataType::Tuple(fields) => {
                f.write_str("(")?;
                for (i, t) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{t}")?;
                }
                f.write_str(")")
            }
        }
    }
}
