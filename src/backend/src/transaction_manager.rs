use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
};

use tracing::debug;

use crate::{
    buffer_list::BufferList,
    buffer_manager::BufferManager,
    collaborator::TxLifecycleListener,
    concurrency_manager::ConcurrencyManager,
    config::IsolationLevel,
    error::Result,
    lock_table::LockTable,
    log_manager::LogManager,
    recovery_manager::RecoveryManager,
    transaction::{Transaction, TxNum},
};

/// Hands out transaction numbers and builds transactions wired to the shared log, buffer pool and
/// lock table. Keeps track of which transactions are still running.
pub struct TransactionManager {
    next_tx_num: AtomicI64,
    active: Mutex<BTreeSet<TxNum>>,
    log_mgr: Arc<Mutex<LogManager>>,
    buf_mgr: Arc<BufferManager>,
    lock_table: Arc<LockTable>,
    isolation: IsolationLevel,
}

impl TransactionManager {
    pub fn new(
        log_mgr: Arc<Mutex<LogManager>>,
        buf_mgr: Arc<BufferManager>,
        lock_table: Arc<LockTable>,
        isolation: IsolationLevel,
    ) -> Self {
        Self {
            next_tx_num: AtomicI64::new(1),
            active: Mutex::new(BTreeSet::new()),
            log_mgr,
            buf_mgr,
            lock_table,
            isolation,
        }
    }

    pub fn new_transaction(self: &Arc<Self>, read_only: bool) -> Result<Arc<Transaction>> {
        let tx_num = self.next_tx_num.fetch_add(1, Ordering::SeqCst);

        let recovery = Arc::new(RecoveryManager::new(
            tx_num,
            read_only,
            self.log_mgr.clone(),
            self.buf_mgr.clone(),
        )?);
        let concurrency = Arc::new(ConcurrencyManager::new(
            self.lock_table.clone(),
            self.isolation,
        ));
        let buffers = Arc::new(BufferList::new(self.buf_mgr.clone()));

        let tx = Transaction::new(
            tx_num,
            read_only,
            self.clone(),
            recovery,
            concurrency,
            buffers,
        );

        self.active.lock().unwrap().insert(tx_num);
        debug!("started transaction {} (read only: {})", tx_num, read_only);
        Ok(Arc::new(tx))
    }

    /// Numbers of the transactions that have neither committed nor rolled back.
    pub fn active_transactions(&self) -> Vec<TxNum> {
        self.active.lock().unwrap().iter().copied().collect()
    }

    fn finish(&self, tx: &Transaction) {
        self.active.lock().unwrap().remove(&tx.tx_num());
    }
}

impl TxLifecycleListener for TransactionManager {
    fn on_tx_commit(&self, tx: &Transaction) -> Result<()> {
        self.finish(tx);
        Ok(())
    }

    fn on_tx_rollback(&self, tx: &Transaction) -> Result<()> {
        self.finish(tx);
        Ok(())
    }

    fn on_tx_end_statement(&self, _tx: &Transaction) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::tests::test_utils::test_db;

    use super::*;

    #[test]
    fn test_active_transactions() {
        let td = tempdir().unwrap();
        let db = test_db(&td);

        let tx1 = db.new_tx(false).unwrap();
        let tx2 = db.new_tx(true).unwrap();
        assert!(tx2.tx_num() > tx1.tx_num());
        assert_eq!(
            db.transaction_manager().active_transactions(),
            vec![tx1.tx_num(), tx2.tx_num()]
        );

        tx1.commit().unwrap();
        assert_eq!(
            db.transaction_manager().active_transactions(),
            vec![tx2.tx_num()]
        );

        tx2.rollback().unwrap();
        assert!(db.transaction_manager().active_transactions().is_empty());
    }
}
