
pub mod block_id;
pub mod buffer;
pub mod buffer_list;
pub mod buffer_manager;
pub mod collaborator;
pub mod concurrency_manager;
pub mod config;
pub mod datum;
pub mod db;
pub mod error;
pub mod eviction_policy;
pub mod file_manager;
pub mod layout;
pub mod lock_table;
pub mod log_manager;
pub mod log_record;
pub mod page;
pub mod record_file;
pub mod record_page;
pub mod recovery_manager;
pub mod rid;
pub mod schema;
pub mod transaction;
pub mod transaction_manager;
pub mod write_buffer;

pub use config::{DbConfig, IsolationLevel};
pub use db::Database;
pub use error::{Error, Result};
