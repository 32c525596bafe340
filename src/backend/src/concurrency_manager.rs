use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Condvar, Mutex},
};

use tracing::trace;

use crate::{
    block_id::BlockId,
    collaborator::{ConcurrencyCollaborator, TxLifecycleListener},
    config::IsolationLevel,
    error::{Error, Result},
    lock_table::{LockTable, LockTarget},
    rid::RecordId,
    transaction::Transaction,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Default)]
struct HeldLocks {
    locks: HashMap<LockTarget, LockMode>,
    // Targets with a lock table request in flight from one of this transaction's threads.
    pending: HashSet<LockTarget>,
    // Bumped by every `release`, so a request that outlives it gives its lock back.
    epoch: u64,
}

/// Manages locks for a single Transaction.
///
/// The transaction may be used from several threads. A thread waiting in the lock table only
/// holds up other requests of this transaction for the same target.
pub struct ConcurrencyManager {
    lock_tbl: Arc<LockTable>,
    isolation: IsolationLevel,
    held: Mutex<HeldLocks>,
    settled: Condvar,
}

impl ConcurrencyManager {
    /// Create a new Concurrency Manager.
    ///
    /// # Arguments
    ///
    /// * `lock_tbl` - A LockTable that is shared by all ConcurrencyManagers.
    /// * `isolation` - Decides how long shared record locks are kept.
    pub fn new(lock_tbl: Arc<LockTable>, isolation: IsolationLevel) -> Self {
        Self {
            lock_tbl,
            isolation,
            held: Mutex::new(HeldLocks::default()),
            settled: Condvar::new(),
        }
    }

    /// Take a shared lock unless this transaction already holds a lock on the target.
    pub fn slock(&self, target: &LockTarget) -> Result<()> {
        self.acquire(target, LockMode::Shared)
    }

    /// Take an exclusive lock, upgrading a shared lock this transaction already holds.
    pub fn xlock(&self, target: &LockTarget) -> Result<()> {
        self.acquire(target, LockMode::Exclusive)
    }

    /// Release the lock this transaction holds on the target, if any.
    pub fn unlock(&self, target: &LockTarget) {
        if self.held.lock().unwrap().locks.remove(target).is_some() {
            self.lock_tbl.unlock(target);
        }
    }

    /// Release all locks. Requests still waiting in the lock table give up their lock once it
    /// is granted.
    pub fn release(&self) {
        let mut held = self.held.lock().unwrap();
        held.epoch += 1;
        for (target, _) in held.locks.drain() {
            self.lock_tbl.unlock(&target);
        }
    }

    pub fn holds_xlock(&self, target: &LockTarget) -> bool {
        self.held.lock().unwrap().locks.get(target) == Some(&LockMode::Exclusive)
    }

    pub fn holds_lock(&self, target: &LockTarget) -> bool {
        self.held.lock().unwrap().locks.contains_key(target)
    }

    fn acquire(&self, target: &LockTarget, mode: LockMode) -> Result<()> {
        let (current, epoch) = {
            let mut held = self.held.lock().unwrap();
            while held.pending.contains(target) {
                held = self.settled.wait(held).unwrap();
            }

            let current = held.locks.get(target).copied();
            match (current, mode) {
                (Some(LockMode::Exclusive), _) | (Some(_), LockMode::Shared) => return Ok(()),
                _ => {}
            }

            held.pending.insert(target.clone());
            (current, held.epoch)
        };

        // Other threads of the transaction may take unrelated locks while this one waits.
        let granted = match (mode, current) {
            (LockMode::Shared, _) => self.lock_tbl.slock(target),
            (LockMode::Exclusive, Some(LockMode::Shared)) => self.lock_tbl.upgrade(target),
            (LockMode::Exclusive, _) => self.lock_tbl.xlock(target),
        };

        let mut held = self.held.lock().unwrap();
        held.pending.remove(target);
        self.settled.notify_all();
        granted?;

        if held.epoch != epoch {
            trace!("locks were released while waiting for {}, giving it back", target);
            self.lock_tbl.unlock(target);
            return Err(Error::LockAbort(target.to_string()));
        }

        held.locks.insert(target.clone(), mode);
        Ok(())
    }

    fn release_shared_records(&self) {
        let mut guard = self.held.lock().unwrap();
        let held = &mut *guard;
        let pending = &held.pending;
        held.locks.retain(|target, mode| {
            let release = *mode == LockMode::Shared
                && matches!(target, LockTarget::Record(_))
                && !pending.contains(target);
            if release {
                self.lock_tbl.unlock(target);
            }
            !release
        });
    }
}

impl ConcurrencyCollaborator for ConcurrencyManager {
    fn read_record(&self, rid: &RecordId) -> Result<()> {
        self.slock(&LockTarget::Record(rid.clone()))
    }

    fn modify_record(&self, rid: &RecordId) -> Result<()> {
        self.xlock(&LockTarget::Record(rid.clone()))
    }

    fn modify_block(&self, blk: &BlockId) -> Result<()> {
        self.xlock(&LockTarget::Block(blk.clone()))
    }

    fn release_block(&self, blk: &BlockId) -> Result<()> {
        self.unlock(&LockTarget::Block(blk.clone()));
        Ok(())
    }
}

impl TxLifecycleListener for ConcurrencyManager {
    fn on_tx_commit(&self, _tx: &Transaction) -> Result<()> {
        self.release();
        Ok(())
    }

    fn on_tx_rollback(&self, _tx: &Transaction) -> Result<()> {
        self.release();
        Ok(())
    }

    fn on_tx_end_statement(&self, _tx: &Transaction) -> Result<()> {
        if self.isolation == IsolationLevel::ReadCommitted {
            self.release_shared_records();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    fn rid(slot: i32) -> RecordId {
        RecordId::new(BlockId::new("student", 1), slot)
    }

    fn lock_table() -> Arc<LockTable> {
        Arc::new(LockTable::new(Duration::from_millis(20)))
    }

    #[test]
    fn test_xlock_excludes_other_transactions() {
        let lt = lock_table();
        let cm1 = ConcurrencyManager::new(lt.clone(), IsolationLevel::Serializable);
        let cm2 = ConcurrencyManager::new(lt, IsolationLevel::Serializable);

        cm1.modify_record(&rid(0)).unwrap();
        assert!(cm1.holds_xlock(&LockTarget::Record(rid(0))));

        // Repeated requests from the holder are no-ops
        cm1.read_record(&rid(0)).unwrap();
        cm1.modify_record(&rid(0)).unwrap();

        assert!(matches!(
            cm2.read_record(&rid(0)),
            Err(Error::LockAbort(_))
        ));
        cm2.read_record(&rid(1)).unwrap();

        cm1.release();
        cm2.read_record(&rid(0)).unwrap();
    }

    #[test]
    fn test_shared_locks_block_upgrade() {
        let lt = lock_table();
        let cm1 = ConcurrencyManager::new(lt.clone(), IsolationLevel::Serializable);
        let cm2 = ConcurrencyManager::new(lt, IsolationLevel::Serializable);

        cm1.read_record(&rid(0)).unwrap();
        cm2.read_record(&rid(0)).unwrap();
        assert!(matches!(
            cm1.modify_record(&rid(0)),
            Err(Error::LockAbort(_))
        ));

        cm2.release();
        cm1.modify_record(&rid(0)).unwrap();
    }

    #[test]
    fn test_block_lock_is_released() {
        let lt = lock_table();
        let cm1 = ConcurrencyManager::new(lt.clone(), IsolationLevel::Serializable);
        let cm2 = ConcurrencyManager::new(lt, IsolationLevel::Serializable);
        let blk = BlockId::new("student", 1);

        cm1.modify_block(&blk).unwrap();
        assert!(matches!(cm2.modify_block(&blk), Err(Error::LockAbort(_))));

        cm1.release_block(&blk).unwrap();
        assert!(!cm1.holds_lock(&LockTarget::Block(blk.clone())));
        cm2.modify_block(&blk).unwrap();
    }

    #[test]
    fn test_read_committed_drops_shared_locks_at_end_of_statement() {
        let lt = lock_table();
        let cm = ConcurrencyManager::new(lt.clone(), IsolationLevel::ReadCommitted);
        let other = ConcurrencyManager::new(lt, IsolationLevel::Serializable);

        cm.read_record(&rid(0)).unwrap();
        cm.modify_record(&rid(1)).unwrap();
        cm.release_shared_records();

        assert!(!cm.holds_lock(&LockTarget::Record(rid(0))));
        assert!(cm.holds_xlock(&LockTarget::Record(rid(1))));
        other.modify_record(&rid(0)).unwrap();
    }

    #[test]
    fn test_waiting_thread_does_not_block_other_requests() {
        let lt = Arc::new(LockTable::new(Duration::from_secs(2)));
        let cm = Arc::new(ConcurrencyManager::new(
            lt.clone(),
            IsolationLevel::Serializable,
        ));
        let other = ConcurrencyManager::new(lt, IsolationLevel::Serializable);
        other.modify_record(&rid(1)).unwrap();

        let waiter = thread::spawn({
            let cm = cm.clone();
            move || cm.read_record(&rid(1))
        });
        thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        cm.read_record(&rid(0)).unwrap();
        cm.modify_record(&rid(2)).unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));

        other.release();
        waiter.join().unwrap().unwrap();
        assert!(cm.holds_lock(&LockTarget::Record(rid(1))));
    }

    #[test]
    fn test_release_while_waiting_gives_lock_back() {
        let lt = Arc::new(LockTable::new(Duration::from_secs(2)));
        let cm = Arc::new(ConcurrencyManager::new(
            lt.clone(),
            IsolationLevel::Serializable,
        ));
        let other = ConcurrencyManager::new(lt.clone(), IsolationLevel::Serializable);
        other.modify_record(&rid(1)).unwrap();

        let waiter = thread::spawn({
            let cm = cm.clone();
            move || cm.modify_record(&rid(1))
        });
        thread::sleep(Duration::from_millis(100));

        // Aborting the transaction does not wait for its blocked thread
        let start = Instant::now();
        cm.release();
        assert!(start.elapsed() < Duration::from_millis(500));

        other.release();
        assert!(matches!(waiter.join().unwrap(), Err(Error::LockAbort(_))));
        assert!(!cm.holds_lock(&LockTarget::Record(rid(1))));

        let third = ConcurrencyManager::new(lt, IsolationLevel::Serializable);
        third.modify_record(&rid(1)).unwrap();
    }

    #[test]
    fn test_same_target_from_two_threads() {
        let lt = lock_table();
        let cm = Arc::new(ConcurrencyManager::new(lt, IsolationLevel::Serializable));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cm = cm.clone();
                thread::spawn(move || {
                    if i % 2 == 0 {
                        cm.read_record(&rid(0))
                    } else {
                        cm.modify_record(&rid(0))
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert!(cm.holds_xlock(&LockTarget::Record(rid(0))));
    }
}
