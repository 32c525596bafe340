use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::{
    buffer::Buffer,
    buffer_manager::BufferManager,
    collaborator::{RecoveryCollaborator, TxLifecycleListener},
    datum::Datum,
    error::{Error, Result},
    log_manager::{LogManager, Lsn},
    log_record::LogRecord,
    page::PAGE_SIZE,
    transaction::{Transaction, TxNum},
};

/// Writes one transaction's log records and undoes its changes on rollback.
pub struct RecoveryManager {
    tx_num: TxNum,
    log_mgr: Arc<Mutex<LogManager>>,
    buf_mgr: Arc<BufferManager>,
}

impl RecoveryManager {
    /// Create the recovery manager for a transaction, logging its start unless it is read-only.
    pub fn new(
        tx_num: TxNum,
        read_only: bool,
        log_mgr: Arc<Mutex<LogManager>>,
        buf_mgr: Arc<BufferManager>,
    ) -> Result<Self> {
        let rm = Self {
            tx_num,
            log_mgr,
            buf_mgr,
        };

        if !read_only {
            rm.append(&LogRecord::Start { tx_num })?;
        }

        Ok(rm)
    }

    pub fn commit(&self) -> Result<()> {
        self.buf_mgr.flush_all(self.tx_num)?;
        let lsn = self.append(&LogRecord::Commit {
            tx_num: self.tx_num,
        })?;
        self.log_mgr.lock().unwrap().flush(lsn)
    }

    /// Rollback the transaction associated with this RecoveryManager
    pub fn rollback(&self) -> Result<()> {
        self.undo()?;
        self.buf_mgr.flush_all(self.tx_num)?;
        let lsn = self.append(&LogRecord::Rollback {
            tx_num: self.tx_num,
        })?;
        self.log_mgr.lock().unwrap().flush(lsn)
    }

    // Walk the log backwards to this transaction's start, restoring every before-image.
    fn undo(&self) -> Result<()> {
        let snapshot = self.log_mgr.lock().unwrap().snapshot()?;
        for bytes in snapshot {
            let record = LogRecord::decode(&bytes?)?;
            if record.tx_num() != self.tx_num {
                continue;
            }

            match record {
                LogRecord::Start { .. } => break,
                LogRecord::SetVal {
                    block,
                    offset,
                    old_image,
                    ..
                } => {
                    trace!(
                        "tx {} restoring {} bytes at {}+{}",
                        self.tx_num,
                        old_image.len(),
                        block,
                        offset
                    );
                    let buf = self.buf_mgr.pin(&block)?;
                    buf.write()
                        .unwrap()
                        .set_bytes(offset as usize, &old_image, self.tx_num);
                    self.buf_mgr.unpin(&buf);
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn append(&self, record: &LogRecord) -> Result<Lsn> {
        let encoded = record.encode()?;
        self.log_mgr.lock().unwrap().append(&encoded)
    }
}

impl RecoveryCollaborator for RecoveryManager {
    fn log_set_val(&self, buf: &Buffer, offset: usize, val: &Datum) -> Result<Lsn> {
        let end = offset + val.encoded_len();
        if end > PAGE_SIZE {
            return Err(Error::Corrupt {
                offset,
                reason: format!("write of {} bytes runs past the page", val.encoded_len()),
            });
        }

        let block = buf
            .block()
            .cloned()
            .ok_or_else(|| Error::Corrupt {
                offset,
                reason: "buffer holds no block".to_string(),
            })?;

        self.append(&LogRecord::SetVal {
            tx_num: self.tx_num,
            block,
            offset: offset as u32,
            old_image: buf.page().read_bytes(offset, end - offset).to_vec(),
            new_val: val.clone(),
        })
    }
}

impl TxLifecycleListener for RecoveryManager {
    fn on_tx_commit(&self, tx: &Transaction) -> Result<()> {
        if !tx.is_read_only() {
            self.commit()?;
            debug!("tx {} commit logged", self.tx_num);
        }
        Ok(())
    }

    fn on_tx_rollback(&self, tx: &Transaction) -> Result<()> {
        if !tx.is_read_only() {
            self.rollback()?;
            debug!("tx {} rollback logged", self.tx_num);
        }
        Ok(())
    }

    fn on_tx_end_statement(&self, _tx: &Transaction) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::{block_id::BlockId, datum::FieldType, tests::test_utils::test_db};

    use super::*;

    fn records(log_mgr: &Arc<Mutex<LogManager>>) -> Vec<LogRecord> {
        log_mgr
            .lock()
            .unwrap()
            .snapshot()
            .unwrap()
            .map(|r| LogRecord::decode(&r.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_start_record_skipped_for_read_only() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let lm = db.log_manager();

        RecoveryManager::new(7, true, lm.clone(), db.buffer_manager()).unwrap();
        assert!(records(&lm).iter().all(|r| r.tx_num() != 7));

        RecoveryManager::new(8, false, lm.clone(), db.buffer_manager()).unwrap();
        assert_eq!(records(&lm)[0], LogRecord::Start { tx_num: 8 });
    }

    #[test]
    fn test_log_set_val_records_before_image() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let lm = db.log_manager();
        let bm = db.buffer_manager();
        let rm = RecoveryManager::new(3, false, lm.clone(), bm.clone()).unwrap();

        let blk = BlockId::new("student", 0);
        let buf = bm.pin(&blk).unwrap();
        buf.write().unwrap().set_val(16, &Datum::Int(11), 1, None);

        let lsn = rm
            .log_set_val(&buf.read().unwrap(), 16, &Datum::Int(12))
            .unwrap();
        assert_eq!(lsn, lm.lock().unwrap().latest_lsn());
        assert_eq!(
            records(&lm)[0],
            LogRecord::SetVal {
                tx_num: 3,
                block: blk,
                offset: 16,
                old_image: 11i32.to_le_bytes().to_vec(),
                new_val: Datum::Int(12),
            }
        );

        assert!(matches!(
            rm.log_set_val(&buf.read().unwrap(), PAGE_SIZE - 2, &Datum::Int(1)),
            Err(Error::Corrupt { .. })
        ));
        bm.unpin(&buf);
    }

    #[test]
    fn test_rollback_restores_before_images() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let lm = db.log_manager();
        let bm = db.buffer_manager();
        let blk = BlockId::new("student", 0);

        let buf = bm.pin(&blk).unwrap();
        buf.write().unwrap().set_val(0, &Datum::Int(100), 1, None);
        buf.write()
            .unwrap()
            .set_val(4, &Datum::Varchar("abc".into()), 1, None);

        // Another transaction's records interleave with ours and must be left alone
        let rm = RecoveryManager::new(2, false, lm.clone(), bm.clone()).unwrap();
        let other = RecoveryManager::new(9, false, lm.clone(), bm.clone()).unwrap();

        for (offset, val) in [
            (0, Datum::Int(200)),
            (4, Datum::Varchar("a much longer one".into())),
            (0, Datum::Int(300)),
        ] {
            let lsn = rm.log_set_val(&buf.read().unwrap(), offset, &val).unwrap();
            buf.write().unwrap().set_val(offset, &val, 2, Some(lsn));
        }
        other
            .log_set_val(&buf.read().unwrap(), 100, &Datum::Int(5))
            .unwrap();
        bm.unpin(&buf);

        rm.rollback().unwrap();

        let buf = bm.pin(&blk).unwrap();
        {
            let buf = buf.read().unwrap();
            assert_eq!(buf.get_val(0, FieldType::Int).unwrap(), Datum::Int(100));
            assert_eq!(
                buf.get_val(4, FieldType::Varchar(20)).unwrap(),
                Datum::Varchar("abc".into())
            );
        }
        bm.unpin(&buf);

        assert_eq!(records(&lm)[0], LogRecord::Rollback { tx_num: 2 });
    }

    #[test]
    fn test_wide_value_is_logged_and_undone() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let lm = db.log_manager();
        let bm = db.buffer_manager();
        let blk = BlockId::new("docs", 1);
        let before = Datum::Varchar("x".repeat(2100));
        let after = Datum::Varchar("y".repeat(2100));

        let buf = bm.pin(&blk).unwrap();
        buf.write().unwrap().set_val(8, &before, 1, None);

        // The record holds both images, so it is larger than a log block
        let rm = RecoveryManager::new(4, false, lm.clone(), bm.clone()).unwrap();
        let lsn = rm.log_set_val(&buf.read().unwrap(), 8, &after).unwrap();
        buf.write().unwrap().set_val(8, &after, 4, Some(lsn));
        bm.unpin(&buf);

        match &records(&lm)[0] {
            LogRecord::SetVal {
                old_image, new_val, ..
            } => {
                assert_eq!(old_image.len(), before.encoded_len());
                assert_eq!(new_val, &after);
            }
            r => panic!("unexpected record {r:?}"),
        }

        rm.rollback().unwrap();

        let buf = bm.pin(&blk).unwrap();
        assert_eq!(
            buf.read()
                .unwrap()
                .get_val(8, FieldType::Varchar(2100))
                .unwrap(),
            before
        );
        bm.unpin(&buf);
    }
}

