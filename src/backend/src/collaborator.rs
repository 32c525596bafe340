//! The contracts a `Transaction` relies on. Each subsystem plugs into a transaction through one of
//! these traits and is notified of the transaction's lifecycle through `TxLifecycleListener`.

use crate::{
    block_id::BlockId,
    buffer::{Buffer, BufferHandle},
    datum::Datum,
    error::Result,
    log_manager::Lsn,
    rid::RecordId,
    transaction::Transaction,
};

/// Notified at commit, rollback and end of statement, in the order listeners were registered.
pub trait TxLifecycleListener: Send + Sync {
    fn on_tx_commit(&self, tx: &Transaction) -> Result<()>;

    fn on_tx_rollback(&self, tx: &Transaction) -> Result<()>;

    fn on_tx_end_statement(&self, tx: &Transaction) -> Result<()>;
}

/// Pins and unpins blocks in the shared buffer pool on behalf of one transaction.
pub trait BufferCollaborator: TxLifecycleListener {
    /// Pin a block, blocking until a buffer is available.
    fn pin(&self, blk: &BlockId) -> Result<BufferHandle>;

    fn unpin(&self, buf: &BufferHandle) -> Result<()>;
}

/// Acquires the locks a transaction needs. Any call may block, and fails with
/// `Error::LockAbort` when the request has to be abandoned.
pub trait ConcurrencyCollaborator: TxLifecycleListener {
    /// Shared lock on a record.
    fn read_record(&self, rid: &RecordId) -> Result<()>;

    /// Exclusive lock on a record.
    fn modify_record(&self, rid: &RecordId) -> Result<()>;

    /// Exclusive lock on a block while buffered writes are applied to its page.
    fn modify_block(&self, blk: &BlockId) -> Result<()>;

    fn release_block(&self, blk: &BlockId) -> Result<()>;
}

/// Writes the log records that make a transaction's changes recoverable.
pub trait RecoveryCollaborator: TxLifecycleListener {
    /// Log that `val` is about to be written at `offset` of the buffer's block and return the lsn
    /// of the new log record.
    fn log_set_val(&self, buf: &Buffer, offset: usize, val: &Datum) -> Result<Lsn>;
}
