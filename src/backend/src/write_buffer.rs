use std::{collections::HashMap, mem, sync::Mutex};

use crate::{block_id::BlockId, datum::Datum, log_manager::Lsn, page::Page};

/// One buffered, uncommitted field write.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteBufferEntry {
    offset: usize,
    val: Datum,
    lsn: Option<Lsn>,
}

impl WriteBufferEntry {
    pub fn new(offset: usize, val: Datum, lsn: Option<Lsn>) -> Self {
        Self { offset, val, lsn }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn val(&self) -> &Datum {
        &self.val
    }

    /// The lsn of the log record covering this write, or `None` if the write was not logged.
    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn
    }
}

/// A transaction's pending writes, grouped by block and kept in append order.
///
/// Every operation holds the inner lock for its whole duration, so appends from several threads
/// are linearizable and `take` sees exactly the entries appended before it.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    blocks: Mutex<HashMap<BlockId, Vec<WriteBufferEntry>>>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, blk: &BlockId, entry: WriteBufferEntry) {
        let mut blocks = self.blocks.lock().unwrap();
        blocks.entry(blk.clone()).or_default().push(entry);
    }

    /// The value most recently written at this position, if any.
    pub fn lookup(&self, blk: &BlockId, offset: usize) -> Option<Datum> {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .get(blk)?
            .iter()
            .rev()
            .find(|e| e.offset == offset)
            .map(|e| e.val.clone())
    }

    /// A copy of `page` with every pending write to `blk` applied in order, or `None` if the
    /// block has no pending writes.
    pub fn overlay(&self, blk: &BlockId, page: &Page) -> Option<Page> {
        let blocks = self.blocks.lock().unwrap();
        let entries = blocks.get(blk)?;
        let mut page = page.clone();
        for e in entries {
            e.val.write_to(&mut page, e.offset);
        }
        Some(page)
    }

    /// Remove and return every pending entry.
    pub fn take(&self) -> HashMap<BlockId, Vec<WriteBufferEntry>> {
        mem::take(&mut *self.blocks.lock().unwrap())
    }

    pub fn clear(&self) {
        self.blocks.lock().unwrap().clear();
    }

    /// A copy of the pending entries, for inspection.
    pub fn snapshot(&self) -> HashMap<BlockId, Vec<WriteBufferEntry>> {
        self.blocks.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().unwrap().is_empty()
    }
}
