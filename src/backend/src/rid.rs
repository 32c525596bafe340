use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::block_id::BlockId;

/// A logical pointer to one record: the block holding it and its slot within that block.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordId {
    blk: BlockId,
    slot: i32,
}

impl RecordId {
    pub fn new(blk: BlockId, slot: i32) -> Self {
        Self { blk, slot }
    }

    pub fn block(&self) -> &BlockId {
        &self.blk
    }

    pub fn slot(&self) -> i32 {
        self.slot
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RID({},{})", self.blk, self.slot)
    }
}
