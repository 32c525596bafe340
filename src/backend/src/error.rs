use thiserror::Error;

use crate::{block_id::BlockId, rid::RecordId, transaction::TxNum};

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log record encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("transaction {tx_num} is read-only and cannot modify block {blk}")]
    ReadOnly { tx_num: TxNum, blk: BlockId },

    #[error("lock request on {0} timed out, transaction aborted")]
    LockAbort(String),

    #[error("no buffer became available for block {0}")]
    BufferAbort(BlockId),

    #[error("block {0} is not pinned")]
    NotPinned(BlockId),

    #[error("slot {0} is not a valid slot of the block")]
    InvalidSlot(i32),

    #[error("slot {0} holds a record and is not on the free list")]
    SlotInUse(RecordId),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("value of {len} bytes does not fit field '{field}' (max {max})")]
    ValueTooLong { field: String, len: usize, max: usize },

    #[error("corrupt value at offset {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },

    #[error("transaction {0} has already finished")]
    TransactionFinished(TxNum),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
