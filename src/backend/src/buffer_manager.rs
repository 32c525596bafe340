use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex, RwLock},
    time::{Duration, Instant},
};

use tracing::trace;

use crate::{
    block_id::BlockId,
    buffer::{Buffer, BufferHandle},
    error::{Error, Result},
    eviction_policy::{EvictionPolicy, SimpleEvictionPolicy},
    file_manager::FileManager,
    log_manager::LogManager,
    page::Page,
    transaction::TxNum,
};

struct PoolState<E: EvictionPolicy> {
    unused: Vec<usize>,
    blk_to_buf: HashMap<BlockId, usize>,
    num_available: usize,
    eviction_policy: E,
}

/// The shared buffer pool. Pinning a block that is not resident waits for a frame to become
/// available and gives up after `max_wait`.
pub struct BufferManager<E: EvictionPolicy = SimpleEvictionPolicy> {
    file_manager: Arc<FileManager>,
    log_manager: Arc<Mutex<LogManager>>,
    buffers: Vec<BufferHandle>,
    state: Mutex<PoolState<E>>,
    available: Condvar,
    max_wait: Duration,
}

impl<E: EvictionPolicy> BufferManager<E> {
    /// Creates a new BufferManager.
    ///
    /// # Arguments
    ///
    /// * `size` - The number of buffers that will be stored in the manager's pool.
    /// * `file_manager` - A FileManager that can be used to manage the buffer's underlying data
    /// pages.
    /// * `log_manager` - The log that must be flushed before a modified page is written.
    /// * `eviction_policy` - The policy to be used for identifying and evicting unpinned buffers
    /// from the pool.
    /// * `max_wait` - How long `pin` waits for a free buffer.
    pub fn new(
        size: usize,
        file_manager: Arc<FileManager>,
        log_manager: Arc<Mutex<LogManager>>,
        eviction_policy: E,
        max_wait: Duration,
    ) -> Self {
        Self {
            file_manager,
            log_manager,
            buffers: (0..size)
                .map(|_| Arc::new(RwLock::new(Buffer::new())))
                .collect(),
            state: Mutex::new(PoolState {
                unused: (0..size).rev().collect(),
                blk_to_buf: HashMap::new(),
                num_available: size,
                eviction_policy,
            }),
            available: Condvar::new(),
            max_wait,
        }
    }

    pub fn num_available(&self) -> usize {
        self.state.lock().unwrap().num_available
    }

    /// Pin a block, loading it into a buffer if it is not already resident.
    pub fn pin(&self, blk: &BlockId) -> Result<BufferHandle> {
        let deadline = Instant::now() + self.max_wait;
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(buf) = self.try_pin(&mut state, blk)? {
                return Ok(buf);
            }

            let now = Instant::now();
            if now >= deadline {
                trace!("gave up waiting for a buffer for block {}", blk);
                return Err(Error::BufferAbort(blk.clone()));
            }

            trace!("no buffer available for block {}, waiting", blk);
            state = self.available.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    fn try_pin(&self, state: &mut PoolState<E>, blk: &BlockId) -> Result<Option<BufferHandle>> {
        if let Some(&buf_index) = state.blk_to_buf.get(blk) {
            let mut buf = self.buffers[buf_index].write().unwrap();
            if !buf.is_pinned() {
                state.num_available -= 1;
            }
            buf.pin();
            state.eviction_policy.remove(buf_index);
            trace!(
                "pinned resident block {} in buffer {} (pin count {})",
                blk,
                buf_index,
                buf.pin_count()
            );
            return Ok(Some(Arc::clone(&self.buffers[buf_index])));
        }

        let (buf_index, was_unused) = match state.unused.pop() {
            Some(buf_index) => (buf_index, true),
            None => match state.eviction_policy.evict() {
                Some(buf_index) => (buf_index, false),
                None => return Ok(None),
            },
        };

        let mut buf = self.buffers[buf_index].write().unwrap();
        let mut page = Page::new();
        let loaded = self
            .flush_buffer(&mut buf)
            .and_then(|_| self.file_manager.get_block(blk, &mut page));
        if let Err(e) = loaded {
            // The frame still holds its old block, if any.
            if was_unused {
                state.unused.push(buf_index);
            } else {
                state.eviction_policy.add(buf_index);
            }
            return Err(e);
        }

        if let Some(old) = buf.block() {
            trace!("evicting block {} from buffer {}", old, buf_index);
            state.blk_to_buf.remove(old);
        }

        buf.assign_to_block(blk.clone(), page);
        buf.pin();

        state.blk_to_buf.insert(blk.clone(), buf_index);
        state.num_available -= 1;
        trace!("loaded block {} into buffer {}", blk, buf_index);

        Ok(Some(Arc::clone(&self.buffers[buf_index])))
    }

    /// Unpin a buffer, making it available for eviction once nobody holds a pin on it.
    pub fn unpin(&self, buffer: &BufferHandle) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let mut buf = buffer.write().unwrap();
        buf.unpin();

        if !buf.is_pinned() {
            if let Some(&buf_index) = buf.block().and_then(|b| state.blk_to_buf.get(b)) {
                trace!("marking buffer {} as available for eviction", buf_index);
                state.eviction_policy.add(buf_index);
            }
            state.num_available += 1;
            self.available.notify_all();
        }
    }

    /// Write every buffer modified by the given transaction to disk.
    pub fn flush_all(&self, tx_num: TxNum) -> Result<()> {
        for buf in self.buffers.iter() {
            let mut buf = buf.write().unwrap();
            if buf.modifying_tx() == Some(tx_num) {
                self.flush_buffer(&mut buf)?;
            }
        }

        Ok(())
    }

    // The log must reach disk up to the page's lsn before the page itself does.
    fn flush_buffer(&self, buf: &mut Buffer) -> Result<()> {
        if buf.modifying_tx().is_none() {
            return Ok(());
        }

        if let Some(blk) = buf.block() {
            if let Some(lsn) = buf.lsn() {
                self.log_manager.lock().unwrap().flush(lsn)?;
            }
            trace!("writing block {} to storage", blk);
            self.file_manager.write_block(blk, buf.page())?;
        }

        buf.mark_clean();
        Ok(())
    }
}
