use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{Error, Result};

const DEFAULT_BUFFER_SIZE: usize = 1024;
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BUFFER_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shared record locks are held.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Shared locks are held until the transaction finishes.
    #[default]
    Serializable,
    /// Shared record locks are released at the end of every statement.
    ReadCommitted,
}

/// Settings for opening a `Database`.
#[derive(Clone, Debug)]
pub struct DbConfig {
    data_dir: PathBuf,
    log_dir: PathBuf,
    num_buffers: usize,
    lock_timeout: Duration,
    buffer_timeout: Duration,
    isolation: IsolationLevel,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("log"),
            num_buffers: DEFAULT_BUFFER_SIZE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            buffer_timeout: DEFAULT_BUFFER_TIMEOUT,
            isolation: IsolationLevel::default(),
        }
    }
}

impl DbConfig {
    pub fn new(data_dir: &Path, log_dir: &Path) -> Self {
        Self::default().data_dir(data_dir).log_dir(log_dir)
    }

    pub fn data_dir(mut self, dir: &Path) -> Self {
        self.data_dir = dir.to_path_buf();
        self
    }

    pub fn log_dir(mut self, dir: &Path) -> Self {
        self.log_dir = dir.to_path_buf();
        self
    }

    pub fn num_buffers(mut self, n: usize) -> Self {
        self.num_buffers = n;
        self
    }

    /// How long a lock request waits before the transaction is aborted.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// How long a pin waits for a free buffer before the transaction is aborted.
    pub fn buffer_timeout(mut self, timeout: Duration) -> Self {
        self.buffer_timeout = timeout;
        self
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn get_data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn get_log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn get_num_buffers(&self) -> usize {
        self.num_buffers
    }

    pub fn get_lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn get_buffer_timeout(&self) -> Duration {
        self.buffer_timeout
    }

    pub fn get_isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_buffers == 0 {
            return Err(Error::Config("the buffer pool needs at least one buffer".into()));
        }

        if self.data_dir == self.log_dir {
            return Err(Error::Config(format!(
                "data and log must live in separate directories, both are {}",
                self.data_dir.to_string_lossy()
            )));
        }

        for dir in [&self.data_dir, &self.log_dir] {
            if !dir.is_dir() {
                return Err(Error::Config(format!(
                    "directory does not exist: {}",
                    dir.to_string_lossy()
                )));
            }
        }

        Ok(())
    }
}
