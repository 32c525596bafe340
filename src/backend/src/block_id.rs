use core::fmt;

use serde::{Deserialize, Serialize};

/// Files whose name starts with this prefix hold transaction-private scratch tables.
pub const TEMP_FILE_PREFIX: &str = "_temp";

// BlockId points to a block's location on disk.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId {
    file_id: String,
    num: u64,
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}]", self.file_id, self.num)
    }
}

impl BlockId {
    /// Create a new BlockId
    ///
    /// # Arguments
    ///
    /// * `file_id` - The file name where the block will be stored
    /// * `num` - The index in the file where the block lives
    pub fn new(file_id: &str, num: u64) -> Self {
        BlockId {
            file_id: file_id.to_string(),
            num,
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn num(&self) -> u64 {
        self.num
    }

    /// Whether this block belongs to a temporary table. Temporary blocks are private to the
    /// transaction that created them and are never locked.
    pub fn is_temp(&self) -> bool {
        self.file_id.starts_with(TEMP_FILE_PREFIX)
    }

    pub fn next(&self) -> BlockId {
        BlockId {
            file_id: self.file_id.clone(),
            num: self.num + 1,
        }
    }
}
