use std::{fmt, mem::size_of};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    page::{Page, PAGE_SIZE},
};

type VarcharLength = i32;

/// The storage type of a field. Each variant knows its maximum serialized size and how to read a
/// value of its kind back out of a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Int,
    BigInt,
    Double,
    /// A variable-length string holding at most the given number of bytes.
    Varchar(usize),
}

impl FieldType {
    /// The number of bytes a value of this type can occupy in a record.
    pub fn max_size(&self) -> usize {
        match self {
            FieldType::Int => size_of::<i32>(),
            FieldType::BigInt => size_of::<i64>(),
            FieldType::Double => size_of::<f64>(),
            FieldType::Varchar(len) => size_of::<VarcharLength>() + len,
        }
    }

    /// Decode a value of this type stored at `offset`.
    pub fn read(&self, page: &Page, offset: usize) -> Result<Datum> {
        if offset + self.min_size() > PAGE_SIZE {
            return Err(Error::Corrupt {
                offset,
                reason: format!("{} does not fit in the page", self),
            });
        }

        let val = match self {
            FieldType::Int => Datum::Int(page.read(offset)),
            FieldType::BigInt => Datum::BigInt(page.read(offset)),
            FieldType::Double => Datum::Double(page.read(offset)),
            FieldType::Varchar(_) => Datum::Varchar(read_varchar(page, offset)?),
        };

        Ok(val)
    }

    fn min_size(&self) -> usize {
        match self {
            FieldType::Varchar(_) => size_of::<VarcharLength>(),
            t => t.max_size(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "int"),
            FieldType::BigInt => write!(f, "bigint"),
            FieldType::Double => write!(f, "double"),
            FieldType::Varchar(len) => write!(f, "varchar({len})"),
        }
    }
}

/// A single field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Int(i32),
    BigInt(i64),
    Double(f64),
    Varchar(String),
}

impl Datum {
    /// The zero value of a field type, used when formatting slots.
    pub fn default_for(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Int => Datum::Int(0),
            FieldType::BigInt => Datum::BigInt(0),
            FieldType::Double => Datum::Double(0.0),
            FieldType::Varchar(_) => Datum::Varchar(String::new()),
        }
    }

    /// The type to use when reading back whatever is stored where this value would be written.
    pub fn field_type(&self) -> FieldType {
        match self {
            Datum::Int(_) => FieldType::Int,
            Datum::BigInt(_) => FieldType::BigInt,
            Datum::Double(_) => FieldType::Double,
            Datum::Varchar(s) => FieldType::Varchar(s.len()),
        }
    }

    /// Whether this value is of the given type, ignoring varchar lengths.
    pub fn has_type(&self, field_type: FieldType) -> bool {
        matches!(
            (self, field_type),
            (Datum::Int(_), FieldType::Int)
                | (Datum::BigInt(_), FieldType::BigInt)
                | (Datum::Double(_), FieldType::Double)
                | (Datum::Varchar(_), FieldType::Varchar(_))
        )
    }

    /// Number of bytes this value occupies once written.
    pub fn encoded_len(&self) -> usize {
        match self {
            Datum::Varchar(s) => size_of::<VarcharLength>() + s.len(),
            d => d.field_type().max_size(),
        }
    }

    /// Check that this value can be stored in a field of the given type.
    pub fn check_fits(&self, field: &str, field_type: FieldType) -> Result<()> {
        match (self, field_type) {
            (Datum::Int(_), FieldType::Int)
            | (Datum::BigInt(_), FieldType::BigInt)
            | (Datum::Double(_), FieldType::Double) => Ok(()),
            (Datum::Varchar(s), FieldType::Varchar(max)) if s.len() <= max => Ok(()),
            (Datum::Varchar(s), FieldType::Varchar(max)) => Err(Error::ValueTooLong {
                field: field.to_string(),
                len: s.len(),
                max,
            }),
            (d, t) => Err(Error::TypeMismatch {
                field: field.to_string(),
                expected: t.to_string(),
                found: d.field_type().to_string(),
            }),
        }
    }

    /// Write this value to a page and return the number of bytes written.
    pub fn write_to(&self, page: &mut Page, offset: usize) -> usize {
        match self {
            Datum::Int(v) => page.write(*v, offset),
            Datum::BigInt(v) => page.write(*v, offset),
            Datum::Double(v) => page.write(*v, offset),
            Datum::Varchar(s) => {
                let n = page.write(s.len() as VarcharLength, offset);
                n + page.write_bytes(s.as_bytes(), offset + n)
            }
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Int(v) => write!(f, "{v}"),
            Datum::BigInt(v) => write!(f, "{v}"),
            Datum::Double(v) => write!(f, "{v}"),
            Datum::Varchar(s) => write!(f, "'{s}'"),
        }
    }
}

fn read_varchar(page: &Page, offset: usize) -> Result<String> {
    let len: VarcharLength = page.read(offset);
    let start = offset + size_of::<VarcharLength>();

    // A negative or oversized length means the bytes were never a string, e.g. a free-list
    // pointer that was not erased before the slot was reused.
    if len < 0 || start + len as usize > PAGE_SIZE {
        return Err(Error::Corrupt {
            offset,
            reason: format!("invalid varchar length {len}"),
        });
    }

    String::from_utf8(page.read_bytes(start, len as usize).to_vec()).map_err(|e| Error::Corrupt {
        offset,
        reason: e.to_string(),
    })
}
