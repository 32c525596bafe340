use std::mem::size_of;
use std::path::Path;
use std::sync::Arc;

use crate::block_id::BlockId;
use crate::error::{Error, Result};
use crate::file_manager::FileManager;
use crate::page::{Page, PAGE_SIZE};

const LOG_NAME: &str = "log";

/// Log sequence number identifying one appended log record. Numbers keep increasing across
/// reopens of the same log.
pub type Lsn = i64;

type Frontier = u32;
type RecordLength = u32;

// The position in the page where the current frontier is recorded
const FRONTIER_POS: usize = 0;

// The lsn of the newest record that ends in the page
const LAST_LSN_POS: usize = FRONTIER_POS + size_of::<Frontier>();

// The initial value of the frontier
const FRONTIER_START: usize = LAST_LSN_POS + size_of::<Lsn>();

const TRAILER_SIZE: usize = size_of::<RecordLength>();

// Marks a fragment that continues a record begun in the previous block
const CONTINUED: RecordLength = 1 << 31;

// The most record bytes one block can hold
const FRAGMENT_CAPACITY: usize = PAGE_SIZE - FRONTIER_START - TRAILER_SIZE;

/// An append-only log of opaque records. Records are packed forward into a page after a small
/// header, each followed by its length so the log can be walked backwards. A record too large for
/// one block is split into fragments that run over into the following blocks.
pub struct LogManager {
    file_manager: Arc<FileManager>,
    page: Page,
    block_num: u64,
    latest_lsn: Lsn,
    last_saved_lsn: Lsn,
}

trait LogPage {
    fn get_frontier(&self) -> Frontier;
    fn set_frontier(&mut self, f: Frontier);
    fn get_last_lsn(&self) -> Lsn;
    fn set_last_lsn(&mut self, lsn: Lsn);
}

impl LogPage for Page {
    fn get_frontier(&self) -> Frontier {
        self.read::<Frontier>(FRONTIER_POS)
    }

    fn set_frontier(&mut self, f: Frontier) {
        self.write(f, FRONTIER_POS);
    }

    fn get_last_lsn(&self) -> Lsn {
        self.read::<Lsn>(LAST_LSN_POS)
    }

    fn set_last_lsn(&mut self, lsn: Lsn) {
        self.write(lsn, LAST_LSN_POS);
    }
}

fn empty_log_page(last_lsn: Lsn) -> Page {
    let mut page = Page::new();
    page.set_frontier(FRONTIER_START as Frontier);
    page.set_last_lsn(last_lsn);
    page
}

impl LogManager {
    pub fn new(root_directory: &Path) -> Result<Self> {
        let file_manager = Arc::new(FileManager::new(root_directory)?);

        let num_blocks = file_manager.length(LOG_NAME)?;

        let (page, block_num) = if num_blocks == 0 {
            // No log yet: create the file and set the initial frontier.
            let page = empty_log_page(0);
            let block_num = file_manager.append_block(LOG_NAME, &page)?.num();
            (page, block_num)
        } else {
            let block_num = num_blocks - 1;
            let mut page = Page::new();
            file_manager.get_block(&BlockId::new(LOG_NAME, block_num), &mut page)?;
            (page, block_num)
        };

        // Everything already in the file is durable
        let latest_lsn = page.get_last_lsn();
        log::debug!("opened log at block {} with lsn {}", block_num, latest_lsn);

        Ok(LogManager {
            file_manager,
            page,
            block_num,
            latest_lsn,
            last_saved_lsn: latest_lsn,
        })
    }

    fn append_block(&mut self) -> Result<()> {
        self.flush_all()?;
        self.page = empty_log_page(self.latest_lsn);
        self.block_num = self.file_manager.append_block(LOG_NAME, &self.page)?.num();
        Ok(())
    }

    /// Append a record to the log and return its lsn.
    ///
    /// # Arguments
    ///
    /// * `record` - Bytes that will be written to the log
    pub fn append(&mut self, record: &[u8]) -> Result<Lsn> {
        let mut rest = record;
        let mut continued = false;

        loop {
            let frontier = self.page.get_frontier() as usize;
            let room = PAGE_SIZE.saturating_sub(frontier + TRAILER_SIZE);

            // Records that fit in a block are never split
            let needs_new_block = frontier + TRAILER_SIZE > PAGE_SIZE
                || (rest.len() > room
                    && frontier > FRONTIER_START
                    && (rest.len() <= FRAGMENT_CAPACITY || room == 0));
            if needs_new_block {
                self.append_block()?;
                continue;
            }

            let (fragment, tail) = rest.split_at(rest.len().min(room));
            let mut header = fragment.len() as RecordLength;
            if continued {
                header |= CONTINUED;
            }

            let mut pos = frontier;
            pos += self.page.write_bytes(fragment, pos);
            pos += self.page.write(header, pos);
            self.page.set_frontier(pos as Frontier);

            if tail.is_empty() {
                break;
            }

            rest = tail;
            continued = true;
            self.append_block()?;
        }

        self.latest_lsn += 1;
        self.page.set_last_lsn(self.latest_lsn);
        log::trace!(
            "appended log record {} ({} bytes)",
            self.latest_lsn,
            record.len()
        );
        Ok(self.latest_lsn)
    }

    /// Ensure every record up to and including `lsn` is on durable storage.
    pub fn flush(&mut self, lsn: Lsn) -> Result<()> {
        if lsn <= self.last_saved_lsn {
            return Ok(());
        }

        self.flush_all()
    }

    fn flush_all(&mut self) -> Result<()> {
        self.file_manager
            .write_block(&BlockId::new(LOG_NAME, self.block_num), &self.page)?;
        self.last_saved_lsn = self.latest_lsn;
        Ok(())
    }

    pub fn latest_lsn(&self) -> Lsn {
        self.latest_lsn
    }

    pub fn last_saved_lsn(&self) -> Lsn {
        self.last_saved_lsn
    }

    /// Gets a snapshot of the log that iterates from the newest record to the oldest.
    ///
    /// Creating a snapshot will cause the log to be flushed.
    pub fn snapshot(&mut self) -> Result<LogSnapshot> {
        self.flush_all()?;

        Ok(LogSnapshot {
            file_manager: Arc::clone(&self.file_manager),
            block: BlockId::new(LOG_NAME, self.block_num),
            page: self.page.clone(),
            current_pos: self.page.get_frontier() as usize,
        })
    }
}

#[derive(Debug)]
pub struct LogSnapshot {
    file_manager: Arc<FileManager>,
    block: BlockId,
    page: Page,
    current_pos: usize,
}

impl LogSnapshot {
    // Step back over one fragment, moving to earlier blocks as needed. Returns the fragment and
    // whether it continues a record from the previous block.
    fn previous_fragment(&mut self) -> Option<Result<(Vec<u8>, bool)>> {
        while self.current_pos <= FRONTIER_START {
            if self.block.num() == 0 {
                return None;
            }

            self.block = BlockId::new(self.block.file_id(), self.block.num() - 1);
            if let Err(e) = self.file_manager.get_block(&self.block, &mut self.page) {
                return Some(Err(e));
            }
            self.current_pos = self.page.get_frontier() as usize;
        }

        self.current_pos -= TRAILER_SIZE;
        let header = self.page.read::<RecordLength>(self.current_pos);
        let len = (header & !CONTINUED) as usize;
        if len > self.current_pos - FRONTIER_START {
            return Some(Err(Error::Corrupt {
                offset: self.current_pos,
                reason: format!("log fragment of {} bytes in block {}", len, self.block),
            }));
        }

        self.current_pos -= len;
        Some(Ok((
            self.page.read_bytes(self.current_pos, len).to_vec(),
            header & CONTINUED != 0,
        )))
    }
}

impl Iterator for LogSnapshot {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let (mut record, mut continued) = match self.previous_fragment()? {
            Ok(fragment) => fragment,
            Err(e) => return Some(Err(e)),
        };

        while continued {
            let (head, c) = match self.previous_fragment() {
                Some(Ok(fragment)) => fragment,
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    return Some(Err(Error::Corrupt {
                        offset: FRONTIER_START,
                        reason: "log record continues before the first block".to_string(),
                    }))
                }
            };
            record = [head, record].concat();
            continued = c;
        }

        Some(Ok(record))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use tempfile::tempdir;

    fn collect(lm: &mut LogManager) -> Vec<Vec<u8>> {
        lm.snapshot().unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_append_records() {
        let td = tempdir().unwrap();
        let root_dir = td.path().join("data");
        fs::create_dir_all(&root_dir).expect("Failed to create root directory");
        {
            let mut lm = LogManager::new(&root_dir).unwrap();

            assert_eq!(lm.block_num, 0);

            for i in 0..1000 {
                let record = [(i % 256) as u8; 16];
                assert_eq!(lm.append(&record).unwrap(), i as Lsn + 1);
            }

            let records = collect(&mut lm);
            assert_eq!(records.len(), 1000);
            for (i, r) in (0..1000).rev().zip(records) {
                assert_eq!(r, [(i % 256) as u8; 16].to_vec());
            }

            lm.flush(1000).unwrap();
            assert_eq!(lm.last_saved_lsn(), 1000);
        }

        let mut lm = LogManager::new(&root_dir).unwrap();
        let records = collect(&mut lm);
        assert_eq!(records.len(), 1000);
        for (i, r) in (0..1000).rev().zip(records) {
            assert_eq!(r, [(i % 256) as u8; 16].to_vec());
        }
    }

    #[test]
    fn test_multi_snapshot() {
        let td = tempdir().unwrap();
        let root_dir = td.path().join("data");
        fs::create_dir_all(&root_dir).expect("Failed to create root directory");
        let mut lm = LogManager::new(&root_dir).unwrap();

        for i in 0..1000 {
            lm.append(&[(i % 256) as u8; 16]).unwrap();
        }

        let snapshot = lm.snapshot().unwrap();

        for i in 1000..1500 {
            lm.append(&[(i % 256) as u8; 16]).unwrap();
        }

        // A snapshot taken before the extra records only sees the first 1000
        let records: Vec<_> = snapshot.map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1000);
        assert_eq!(records[0], [(999 % 256) as u8; 16].to_vec());

        let records = collect(&mut lm);
        assert_eq!(records.len(), 1500);
        assert_eq!(records[0], [(1499 % 256) as u8; 16].to_vec());
    }

    #[test]
    fn test_flush_is_skipped_for_saved_lsn() {
        let td = tempdir().unwrap();
        let mut lm = LogManager::new(td.path()).unwrap();

        let lsn = lm.append(b"abc").unwrap();
        assert_eq!(lm.last_saved_lsn(), 0);
        lm.flush(lsn).unwrap();
        assert_eq!(lm.last_saved_lsn(), lsn);

        lm.append(b"def").unwrap();
        lm.flush(lsn).unwrap();
        assert_eq!(lm.last_saved_lsn(), lsn);
    }

    #[test]
    fn test_records_span_blocks() {
        let td = tempdir().unwrap();
        let records: Vec<Vec<u8>> = vec![
            vec![1; 10],
            (0..PAGE_SIZE + 500).map(|i| (i % 251) as u8).collect(),
            vec![],
            (0..3 * PAGE_SIZE).map(|i| (i % 13) as u8).collect(),
            vec![2; FRAGMENT_CAPACITY],
            vec![3; 20],
        ];

        {
            let mut lm = LogManager::new(td.path()).unwrap();
            for (i, r) in records.iter().enumerate() {
                assert_eq!(lm.append(r).unwrap(), i as Lsn + 1);
            }
            assert!(lm.block_num >= 5);

            let read: Vec<_> = collect(&mut lm).into_iter().rev().collect();
            assert_eq!(read, records);
        }

        let mut lm = LogManager::new(td.path()).unwrap();
        let read: Vec<_> = collect(&mut lm).into_iter().rev().collect();
        assert_eq!(read, records);
    }

    #[test]
    fn test_lsn_continues_after_reopen() {
        let td = tempdir().unwrap();
        {
            let mut lm = LogManager::new(td.path()).unwrap();
            for _ in 0..300 {
                lm.append(&[7; 40]).unwrap();
            }
            lm.flush(lm.latest_lsn()).unwrap();
        }

        let mut lm = LogManager::new(td.path()).unwrap();
        assert_eq!(lm.latest_lsn(), 300);
        assert_eq!(lm.last_saved_lsn(), 300);
        assert_eq!(lm.append(b"next").unwrap(), 301);
    }
}
