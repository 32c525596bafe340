use std::sync::{Arc, Mutex};

use tracing::info;

use crate::{
    buffer_manager::BufferManager,
    config::DbConfig,
    error::Result,
    eviction_policy::SimpleEvictionPolicy,
    file_manager::FileManager,
    layout::Layout,
    lock_table::LockTable,
    log_manager::LogManager,
    record_file::RecordFile,
    transaction::Transaction,
    transaction_manager::TransactionManager,
};

/// The shared state of one database: storage, log, buffer pool, lock table and the transaction
/// manager that ties them to each transaction.
pub struct Database {
    config: DbConfig,
    file_manager: Arc<FileManager>,
    log_manager: Arc<Mutex<LogManager>>,
    buffer_manager: Arc<BufferManager>,
    lock_table: Arc<LockTable>,
    transaction_manager: Arc<TransactionManager>,
}

impl Database {
    pub fn new(config: DbConfig) -> Result<Self> {
        config.validate()?;

        let file_manager = Arc::new(FileManager::new(config.get_data_dir())?);
        let log_manager = Arc::new(Mutex::new(LogManager::new(config.get_log_dir())?));
        let buffer_manager = Arc::new(BufferManager::new(
            config.get_num_buffers(),
            file_manager.clone(),
            log_manager.clone(),
            SimpleEvictionPolicy::new(),
            config.get_buffer_timeout(),
        ));
        let lock_table = Arc::new(LockTable::new(config.get_lock_timeout()));
        let transaction_manager = Arc::new(TransactionManager::new(
            log_manager.clone(),
            buffer_manager.clone(),
            lock_table.clone(),
            config.get_isolation(),
        ));

        info!(
            "opened database in {} with {} buffers",
            config.get_data_dir().to_string_lossy(),
            config.get_num_buffers()
        );

        Ok(Self {
            config,
            file_manager,
            log_manager,
            buffer_manager,
            lock_table,
            transaction_manager,
        })
    }

    pub fn new_tx(&self, read_only: bool) -> Result<Arc<Transaction>> {
        self.transaction_manager.new_transaction(read_only)
    }

    /// Open the table stored in `file_name` on behalf of `tx`.
    pub fn open_record_file(
        &self,
        tx: &Arc<Transaction>,
        file_name: &str,
        layout: Arc<Layout>,
        do_log: bool,
    ) -> Result<RecordFile> {
        RecordFile::new(
            tx.clone(),
            self.file_manager.clone(),
            file_name,
            layout,
            do_log,
        )
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn buffer_manager(&self) -> Arc<BufferManager> {
        self.buffer_manager.clone()
    }

    pub fn file_manager(&self) -> Arc<FileManager> {
        self.file_manager.clone()
    }

    pub fn lock_table(&self) -> Arc<LockTable> {
        self.lock_table.clone()
    }

    pub fn log_manager(&self) -> Arc<Mutex<LogManager>> {
        self.log_manager.clone()
    }

    pub fn transaction_manager(&self) -> Arc<TransactionManager> {
        self.transaction_manager.clone()
    }
}
