use std::sync::{Arc, RwLock};

use crate::{
    block_id::BlockId,
    datum::{Datum, FieldType},
    error::Result,
    log_manager::Lsn,
    page::Page,
    transaction::TxNum,
};

/// A buffer shared between every transaction that has its block pinned.
pub type BufferHandle = Arc<RwLock<Buffer>>;

/// An in-memory frame holding one block's page plus the bookkeeping needed to write it back.
#[derive(Debug, Default)]
pub struct Buffer {
    page: Page,
    blk: Option<BlockId>,
    pin_count: u32,
    modified_by: Option<TxNum>,
    lsn: Option<Lsn>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self) -> Option<&BlockId> {
        self.blk.as_ref()
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Raw read of a value from the page.
    pub fn get_val(&self, offset: usize, field_type: FieldType) -> Result<Datum> {
        field_type.read(&self.page, offset)
    }

    /// Raw write of a value to the page, stamping the buffer with the writing transaction and the
    /// lsn of the log record that covers the write. Unlogged writes leave the lsn unchanged.
    pub fn set_val(&mut self, offset: usize, val: &Datum, tx_num: TxNum, lsn: Option<Lsn>) {
        val.write_to(&mut self.page, offset);
        self.set_modified(tx_num, lsn);
    }

    /// Overwrite raw bytes on the page. Used to restore before-images during rollback.
    pub fn set_bytes(&mut self, offset: usize, bytes: &[u8], tx_num: TxNum) {
        self.page.write_bytes(bytes, offset);
        self.set_modified(tx_num, None);
    }

    pub fn set_modified(&mut self, tx_num: TxNum, lsn: Option<Lsn>) {
        self.modified_by = Some(tx_num);
        if lsn.is_some() {
            self.lsn = self.lsn.max(lsn);
        }
    }

    /// The transaction whose changes have not been written to disk yet, if any.
    pub fn modifying_tx(&self) -> Option<TxNum> {
        self.modified_by
    }

    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub fn unpin(&mut self) {
        self.pin_count -= 1;
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    /// Load a new block into this buffer. The caller is responsible for flushing first.
    pub(crate) fn assign_to_block(&mut self, blk: BlockId, page: Page) {
        self.page = page;
        self.blk = Some(blk);
        self.pin_count = 0;
        self.modified_by = None;
        self.lsn = None;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.modified_by = None;
    }
}
