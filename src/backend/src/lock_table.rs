use std::{
    collections::HashMap,
    fmt,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::{
    block_id::BlockId,
    error::{Error, Result},
    rid::RecordId,
};

/// Something that can be locked: a single record, or a whole block while a transaction writes its
/// buffered changes into the page.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum LockTarget {
    Block(BlockId),
    Record(RecordId),
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTarget::Block(blk) => write!(f, "block {}", blk),
            LockTarget::Record(rid) => write!(f, "record {}", rid),
        }
    }
}

// A positive count is the number of shared holders, -1 marks an exclusive holder.
const XLOCKED: i32 = -1;

/// The lock table shared by every transaction. Requests that cannot be granted within
/// `max_wait` abort, which is how deadlocks are broken.
pub struct LockTable {
    locks: Mutex<HashMap<LockTarget, i32>>,
    condvar: Condvar,
    max_wait: Duration,
}

impl LockTable {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            condvar: Condvar::new(),
            max_wait,
        }
    }

    /// Request a shared lock.
    ///
    /// # Arguments
    ///
    /// * `target` - The record or block that the shared lock will be held on.
    pub fn slock(&self, target: &LockTarget) -> Result<()> {
        log::trace!("requesting an slock on {}", target);
        let deadline = Instant::now() + self.max_wait;
        let mut locks = self.locks.lock().unwrap();

        while locks.get(target) == Some(&XLOCKED) {
            let now = Instant::now();
            if now >= deadline {
                log::trace!("slock on {} timed out", target);
                return Err(Error::LockAbort(target.to_string()));
            }

            log::trace!("waiting for slock on {}, xlock already exists", target);
            locks = self.condvar.wait_timeout(locks, deadline - now).unwrap().0;
        }

        *locks.entry(target.clone()).or_insert(0) += 1;
        log::trace!("successfully retrieved slock on {}", target);
        Ok(())
    }

    /// Request an exclusive lock on a target the caller holds no lock on. The request waits until
    /// nobody holds a lock on the target.
    ///
    /// # Arguments
    ///
    /// * `target` - The record or block that the exclusive lock will be held on.
    pub fn xlock(&self, target: &LockTarget) -> Result<()> {
        log::trace!("requesting an xlock on {}", target);
        self.acquire_exclusive(target, 0)
    }

    /// Upgrade a shared lock held by the caller to an exclusive lock. The request waits until the
    /// caller's shared lock is the only one left.
    ///
    /// # Arguments
    ///
    /// * `target` - The record or block that the exclusive lock will be held on.
    pub fn upgrade(&self, target: &LockTarget) -> Result<()> {
        log::trace!("requesting an upgrade to xlock on {}", target);
        self.acquire_exclusive(target, 1)
    }

    // Wait until at most `own` shared locks remain, then take the target exclusively.
    fn acquire_exclusive(&self, target: &LockTarget, own: i32) -> Result<()> {
        let deadline = Instant::now() + self.max_wait;
        let mut locks = self.locks.lock().unwrap();

        while locks
            .get(target)
            .is_some_and(|count| *count == XLOCKED || *count > own)
        {
            let now = Instant::now();
            if now >= deadline {
                log::trace!("xlock on {} timed out", target);
                return Err(Error::LockAbort(target.to_string()));
            }

            log::trace!("waiting for xlock on {}, other locks held", target);
            locks = self.condvar.wait_timeout(locks, deadline - now).unwrap().0;
        }

        locks.insert(target.clone(), XLOCKED);
        log::trace!("successfully set xlock on {}", target);
        Ok(())
    }

    /// Release one lock held on the target.
    pub fn unlock(&self, target: &LockTarget) {
        let mut locks = self.locks.lock().unwrap();
        match locks.get_mut(target) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                locks.remove(target);
            }
            None => log::warn!("unlock of {} which is not locked", target),
        }

        self.condvar.notify_all();
    }
}
