use std::{collections::HashMap, mem::size_of};

use crate::{
    datum::FieldType,
    error::{Error, Result},
    schema::Schema,
};

/// Bytes at the start of every slot holding its EMPTY/INUSE flag.
pub const FLAG_SIZE: usize = size_of::<i32>();

/// A deleted slot stores the next free slot's block number and slot index in its payload, so a
/// record must be at least that large.
pub const MIN_REC_SIZE: usize = size_of::<i64>() + size_of::<i32>();

/// Physical layout of a table's records: where each field lives inside a record payload and how
/// big a slot is. Computed once per schema and shared by every page of the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    schema: Schema,
    offsets: HashMap<String, usize>,
    record_size: usize,
    slot_size: usize,
}

impl Layout {
    pub fn from_schema(schema: Schema) -> Self {
        let mut offsets = HashMap::new();
        let mut pos = 0;
        for field_name in schema.fields() {
            offsets.insert(field_name.clone(), pos);
            // Every field is present in the schema it was read from.
            pos += schema
                .field_type(field_name)
                .map_or(0, |t| t.max_size());
        }

        let record_size = pos.max(MIN_REC_SIZE);

        Self {
            schema,
            offsets,
            record_size,
            slot_size: record_size + FLAG_SIZE,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Offset of a field relative to the start of the record payload.
    pub fn offset(&self, field_name: &str) -> Result<usize> {
        self.offsets
            .get(field_name)
            .copied()
            .ok_or_else(|| Error::UnknownField(field_name.to_string()))
    }

    pub fn field_type(&self, field_name: &str) -> Result<FieldType> {
        self.schema
            .field_type(field_name)
            .ok_or_else(|| Error::UnknownField(field_name.to_string()))
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }
}
