use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use tracing::{debug, trace};

use crate::{
    block_id::BlockId,
    buffer::BufferHandle,
    collaborator::{
        BufferCollaborator, ConcurrencyCollaborator, RecoveryCollaborator, TxLifecycleListener,
    },
    datum::{Datum, FieldType},
    error::{Error, Result},
    rid::RecordId,
    write_buffer::{WriteBuffer, WriteBufferEntry},
};

pub type TxNum = i64;

/// A unit of work. Field writes are buffered in the transaction's write buffer and only reach the
/// shared buffer pool at commit; reads see the transaction's own buffered writes first.
///
/// A `Transaction` is shared as `Arc<Transaction>` and may be used from several threads at once.
pub struct Transaction {
    tx_num: TxNum,
    read_only: bool,
    recovery: Arc<dyn RecoveryCollaborator>,
    concurrency: Arc<dyn ConcurrencyCollaborator>,
    buffers: Arc<dyn BufferCollaborator>,
    listeners: Mutex<Vec<Arc<dyn TxLifecycleListener>>>,
    write_buffer: WriteBuffer,
    finished: AtomicBool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("tx_num", &self.tx_num)
            .field("read_only", &self.read_only)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Transaction {
    /// Create a transaction and register its lifecycle listeners.
    ///
    /// Listeners are notified in the order given here. The transaction manager observes commit
    /// before the recovery manager writes the commit record, so a checkpoint cannot be taken
    /// between the two. Recovery runs before concurrency so rollback undoes its changes while every
    /// lock is still held. Buffers are unpinned last.
    pub fn new<T, R, C, B>(
        tx_num: TxNum,
        read_only: bool,
        tx_mgr: Arc<T>,
        recovery: Arc<R>,
        concurrency: Arc<C>,
        buffers: Arc<B>,
    ) -> Self
    where
        T: TxLifecycleListener + 'static,
        R: RecoveryCollaborator + 'static,
        C: ConcurrencyCollaborator + 'static,
        B: BufferCollaborator + 'static,
    {
        let listeners: Vec<Arc<dyn TxLifecycleListener>> = vec![
            tx_mgr as Arc<dyn TxLifecycleListener>,
            recovery.clone() as Arc<dyn TxLifecycleListener>,
            concurrency.clone() as Arc<dyn TxLifecycleListener>,
            buffers.clone() as Arc<dyn TxLifecycleListener>,
        ];

        Self {
            tx_num,
            read_only,
            recovery,
            concurrency,
            buffers,
            listeners: Mutex::new(listeners),
            write_buffer: WriteBuffer::new(),
            finished: AtomicBool::new(false),
        }
    }

    pub fn tx_num(&self) -> TxNum {
        self.tx_num
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn buffers(&self) -> &dyn BufferCollaborator {
        self.buffers.as_ref()
    }

    pub fn concurrency(&self) -> &dyn ConcurrencyCollaborator {
        self.concurrency.as_ref()
    }

    pub fn recovery(&self) -> &dyn RecoveryCollaborator {
        self.recovery.as_ref()
    }

    /// Register a listener that is notified after every listener registered before it.
    pub fn add_lifecycle_listener(&self, listener: Arc<dyn TxLifecycleListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Commit the transaction: apply every buffered write to the buffer pool, then notify the
    /// listeners, which write the commit record, release locks and unpin buffers.
    ///
    /// If this fails the transaction must be rolled back.
    pub fn commit(&self) -> Result<()> {
        self.ensure_active()?;
        self.flush_write_buffer()?;
        self.notify(|l| l.on_tx_commit(self))?;
        self.finished.store(true, Ordering::SeqCst);
        debug!("transaction {} committed", self.tx_num);
        Ok(())
    }

    /// Roll back the transaction. Listeners undo whatever reached the buffer pool and release
    /// their resources; the write buffer is discarded without being applied.
    pub fn rollback(&self) -> Result<()> {
        self.ensure_active()?;
        let result = self.notify(|l| l.on_tx_rollback(self));
        self.write_buffer.clear();
        result?;
        self.finished.store(true, Ordering::SeqCst);
        debug!("transaction {} rolled back", self.tx_num);
        Ok(())
    }

    /// Mark the end of one statement. The write buffer is untouched.
    pub fn end_statement(&self) -> Result<()> {
        self.ensure_active()?;
        self.notify(|l| l.on_tx_end_statement(self))
    }

    /// The value this transaction last wrote at the given position, if it wrote one.
    pub fn get_val(&self, blk: &BlockId, offset: usize) -> Option<Datum> {
        self.write_buffer.lookup(blk, offset)
    }

    /// Read a value as this transaction sees it. The transaction's own buffered writes need no
    /// lock; anything else takes a shared lock on the record before the pinned page is read.
    pub fn read_val(
        &self,
        buf: &BufferHandle,
        rid: &RecordId,
        offset: usize,
        field_type: FieldType,
    ) -> Result<Datum> {
        self.ensure_active()?;
        let blk = rid.block();

        if let Some(val) = self.get_val(blk, offset) {
            if val.has_type(field_type) {
                return Ok(val);
            }
        }

        if !blk.is_temp() {
            self.concurrency.read_record(rid)?;
        }

        let buf = buf.read().unwrap();
        // Buffered writes of other types or at other offsets may overlap the value.
        match self.write_buffer.overlay(blk, buf.page()) {
            Some(page) => field_type.read(&page, offset),
            None => buf.get_val(offset, field_type),
        }
    }

    /// Buffer a write. The change is logged (unless `do_log` is false) but the page is untouched
    /// until commit.
    pub fn write_val(
        &self,
        buf: &BufferHandle,
        rid: &RecordId,
        offset: usize,
        val: Datum,
        do_log: bool,
    ) -> Result<()> {
        self.ensure_active()?;
        let blk = rid.block();

        if self.read_only && !blk.is_temp() {
            return Err(Error::ReadOnly {
                tx_num: self.tx_num,
                blk: blk.clone(),
            });
        }

        if !blk.is_temp() {
            self.concurrency.modify_record(rid)?;
        }

        let lsn = if do_log {
            Some(
                self.recovery
                    .log_set_val(&buf.read().unwrap(), offset, &val)?,
            )
        } else {
            None
        };

        trace!(
            "tx {} buffering write of {} at {}+{}",
            self.tx_num,
            val,
            blk,
            offset
        );
        self.write_buffer
            .append(blk, WriteBufferEntry::new(offset, val, lsn));
        Ok(())
    }

    /// A copy of every write still waiting for commit, grouped by block in append order.
    pub fn pending_writes(&self) -> HashMap<BlockId, Vec<WriteBufferEntry>> {
        self.write_buffer.snapshot()
    }

    fn flush_write_buffer(&self) -> Result<()> {
        for (blk, entries) in self.write_buffer.take() {
            trace!(
                "tx {} applying {} buffered writes to {}",
                self.tx_num,
                entries.len(),
                blk
            );

            if !blk.is_temp() {
                self.concurrency.modify_block(&blk)?;
            }

            let buf = self.buffers.pin(&blk)?;
            {
                let mut page = buf.write().unwrap();
                for entry in entries.iter() {
                    page.set_val(entry.offset(), entry.val(), self.tx_num, entry.lsn());
                }
            }

            if !blk.is_temp() {
                self.concurrency.release_block(&blk)?;
            }
            self.buffers.unpin(&buf)?;
        }

        Ok(())
    }

    fn notify<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&dyn TxLifecycleListener) -> Result<()>,
    {
        // Listeners may call back into the transaction, so don't hold the list while notifying.
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners.iter() {
            f(listener.as_ref())?;
        }

        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_finished() {
            return Err(Error::TransactionFinished(self.tx_num));
        }

        Ok(())
    }
}
