use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tracing::trace;

use crate::{
    block_id::BlockId,
    buffer::BufferHandle,
    buffer_manager::BufferManager,
    collaborator::{BufferCollaborator, TxLifecycleListener},
    error::{Error, Result},
    transaction::Transaction,
};

#[derive(Default)]
struct Pins {
    buffers: HashMap<BlockId, BufferHandle>,
    pins: Vec<BlockId>,
}

/// The buffers pinned by one transaction. Every pin is released when the transaction commits or
/// rolls back.
pub struct BufferList {
    pins: Mutex<Pins>,
    buf_mgr: Arc<BufferManager>,
}

impl BufferList {
    pub fn new(buf_mgr: Arc<BufferManager>) -> Self {
        Self {
            pins: Mutex::new(Pins::default()),
            buf_mgr,
        }
    }

    /// Get the buffer associated with the specified BlockId.
    pub fn get_buffer(&self, blk: &BlockId) -> Option<BufferHandle> {
        self.pins.lock().unwrap().buffers.get(blk).cloned()
    }

    /// Unpin one pin on the specified block.
    pub fn unpin_block(&self, blk: &BlockId) -> Result<()> {
        trace!("unpinning buffer holding block {}", blk);
        let mut pins = self.pins.lock().unwrap();
        let pos = pins
            .pins
            .iter()
            .position(|b| b == blk)
            .ok_or_else(|| Error::NotPinned(blk.clone()))?;
        pins.pins.swap_remove(pos);

        let buf = if pins.pins.contains(blk) {
            pins.buffers.get(blk).cloned()
        } else {
            pins.buffers.remove(blk)
        };

        if let Some(buf) = buf {
            self.buf_mgr.unpin(&buf);
        }
        Ok(())
    }

    /// Unpin all blocks in this BufferList.
    pub fn unpin_all(&self) {
        trace!("unpinning all buffers");
        let mut guard = self.pins.lock().unwrap();
        let Pins { buffers, pins } = &mut *guard;
        for blk in pins.drain(..) {
            if let Some(buf) = buffers.get(&blk) {
                self.buf_mgr.unpin(buf);
            }
        }
        buffers.clear();
    }

    pub fn pin_count(&self, blk: &BlockId) -> usize {
        self.pins
            .lock()
            .unwrap()
            .pins
            .iter()
            .filter(|b| *b == blk)
            .count()
    }
}

impl BufferCollaborator for BufferList {
    fn pin(&self, blk: &BlockId) -> Result<BufferHandle> {
        trace!("pinning block {}", blk);
        // Pinning may block waiting for a free buffer; don't hold our own list meanwhile.
        let buf = self.buf_mgr.pin(blk)?;
        let mut pins = self.pins.lock().unwrap();
        pins.buffers.insert(blk.clone(), buf.clone());
        pins.pins.push(blk.clone());
        Ok(buf)
    }

    fn unpin(&self, buf: &BufferHandle) -> Result<()> {
        let blk = buf.read().unwrap().block().cloned();
        match blk {
            Some(blk) => self.unpin_block(&blk),
            None => Ok(()),
        }
    }
}

impl TxLifecycleListener for BufferList {
    fn on_tx_commit(&self, _tx: &Transaction) -> Result<()> {
        self.unpin_all();
        Ok(())
    }

    fn on_tx_rollback(&self, _tx: &Transaction) -> Result<()> {
        self.unpin_all();
        Ok(())
    }

    fn on_tx_end_statement(&self, _tx: &Transaction) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;

    use crate::tests::test_utils::test_db;

    use super::*;

    #[test]
    fn test_buffer_list_pin_unpin() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let bl = BufferList::new(db.buffer_manager());

        let blk0 = BlockId::new("student", 0);
        let blk1 = BlockId::new("student", 1);
        let blk2 = BlockId::new("student", 2);

        bl.pin(&blk0).unwrap();
        bl.pin(&blk1).unwrap();
        bl.pin(&blk0).unwrap();
        bl.pin(&blk2).unwrap();
        bl.pin(&blk0).unwrap();

        assert_eq!(3, bl.pin_count(&blk0));

        bl.unpin_block(&BlockId::new("student", 0)).unwrap();
        assert_eq!(2, bl.pin_count(&blk0));

        let buf = bl.get_buffer(&blk0).unwrap();
        bl.unpin(&buf).unwrap();
        assert_eq!(1, bl.pin_count(&blk0));

        bl.unpin_block(&BlockId::new("student", 0)).unwrap();
        assert_eq!(0, bl.pin_count(&blk0));
        assert!(bl.get_buffer(&blk0).is_none());

        // assert other blocks 1 & 2 remain pinned
        assert_eq!(1, bl.pin_count(&blk1));
        assert_eq!(1, bl.pin_count(&blk2));

        // assert block 0 is pinned normally after unpinning
        bl.pin(&blk0).unwrap();
        assert_eq!(1, bl.pin_count(&blk0));
    }

    #[test]
    fn test_buffer_list_unpin_all() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let bm = db.buffer_manager();
        let available = bm.num_available();
        let bl = BufferList::new(bm.clone());

        let blk1 = BlockId::new("student", 0);
        let blk2 = BlockId::new("student", 1);
        bl.pin(&blk1).unwrap();
        bl.pin(&blk1).unwrap();
        bl.pin(&blk2).unwrap();
        bl.pin(&blk2).unwrap();
        assert_eq!(2, bl.pin_count(&blk1));
        assert_eq!(2, bl.pin_count(&blk2));
        assert_eq!(available - 2, bm.num_available());

        bl.unpin_all();
        assert_eq!(0, bl.pin_count(&blk1));
        assert_eq!(0, bl.pin_count(&blk2));
        assert_eq!(available, bm.num_available());

        // assert blocks are pinned normally after unpinning
        bl.pin(&blk1).unwrap();
        bl.pin(&blk2).unwrap();
        assert_eq!(1, bl.pin_count(&blk1));
        assert_eq!(1, bl.pin_count(&blk2));
    }

    #[test]
    fn test_unpin_unknown_block() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let bl = BufferList::new(db.buffer_manager());

        assert!(matches!(
            bl.unpin_block(&BlockId::new("student", 4)),
            Err(Error::NotPinned(_))
        ));
    }

    #[test]
    fn test_pin_fails_when_pool_is_exhausted() {
        let td = tempdir().unwrap();
        let db = crate::tests::test_utils::test_db_with(&td, |c| {
            c.num_buffers(1).buffer_timeout(Duration::from_millis(20))
        });
        let bl = BufferList::new(db.buffer_manager());

        bl.pin(&BlockId::new("student", 0)).unwrap();
        assert!(matches!(
            bl.pin(&BlockId::new("student", 1)),
            Err(Error::BufferAbort(_))
        ));
        assert_eq!(0, bl.pin_count(&BlockId::new("student", 1)));
    }
}
