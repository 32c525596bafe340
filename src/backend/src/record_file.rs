use std::sync::Arc;

use tracing::trace;

use crate::{
    block_id::BlockId,
    datum::Datum,
    error::{Error, Result},
    file_manager::FileManager,
    layout::Layout,
    page::Page,
    record_page::{read_free_pointer, write_free_pointer, RecordPage},
    rid::RecordId,
    transaction::Transaction,
};

const HEADER_BLOCK: u64 = 0;
const FREE_LIST_HEAD_POS: usize = 0;

/// The records of one table file, seen through a transaction.
///
/// Block 0 of the file is a header holding the head of the deleted-slot free list; records live
/// in the blocks after it. Inserts reuse deleted slots before looking for empty ones, and a new
/// block is appended only when the last block is full.
pub struct RecordFile {
    tx: Arc<Transaction>,
    file_manager: Arc<FileManager>,
    layout: Arc<Layout>,
    file_name: String,
    do_log: bool,
    record_page: Option<RecordPage>,
}

impl RecordFile {
    pub fn new(
        tx: Arc<Transaction>,
        file_manager: Arc<FileManager>,
        file_name: &str,
        layout: Arc<Layout>,
        do_log: bool,
    ) -> Result<Self> {
        if file_manager.length(file_name)? == 0 {
            // A zeroed header is an empty free list
            file_manager.append_block(file_name, &Page::new())?;
        }

        let mut rf = Self {
            tx,
            file_manager,
            layout,
            file_name: file_name.to_string(),
            do_log,
            record_page: None,
        };
        rf.before_first()?;
        Ok(rf)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Number of blocks in the file, header included.
    pub fn size(&self) -> Result<u64> {
        self.file_manager.length(&self.file_name)
    }

    /// Position before the first record of the file.
    pub fn before_first(&mut self) -> Result<()> {
        if self.size()? > HEADER_BLOCK + 1 {
            self.move_to_block(HEADER_BLOCK + 1)
        } else {
            self.close()
        }
    }

    /// Move to the next record, crossing into later blocks as needed.
    pub fn next(&mut self) -> Result<bool> {
        loop {
            let block_num = match self.record_page.as_mut() {
                Some(rp) => {
                    if rp.next()? {
                        return Ok(true);
                    }
                    rp.current_blk().num()
                }
                None => return Ok(false),
            };

            if self.at_last_block(block_num)? {
                return Ok(false);
            }
            self.move_to_block(block_num + 1)?;
        }
    }

    pub fn get_val(&self, field_name: &str) -> Result<Datum> {
        self.page()?.get_val(field_name)
    }

    pub fn set_val(&self, field_name: &str, val: Datum) -> Result<()> {
        self.page()?.set_val(field_name, val)
    }

    /// Insert a new record and move to it. The fields keep whatever zero values the slot holds.
    pub fn insert(&mut self) -> Result<RecordId> {
        if let Some(head) = self.free_list_head()? {
            self.move_to_rid(&head)?;
            let next = self.page()?.insert_into_deleted_slot()?;
            self.set_free_list_head(next.as_ref())?;
            trace!("inserted into deleted slot {}", head);
            return Ok(head);
        }

        let last = self.size()? - 1;
        if last == HEADER_BLOCK {
            self.move_to_new_block()?;
        } else if self.record_page.as_ref().map(|rp| rp.current_blk().num()) != Some(last) {
            self.move_to_block(last)?;
        }

        loop {
            let rp = self
                .record_page
                .as_mut()
                .ok_or_else(|| Error::NotPinned(BlockId::new(&self.file_name, last)))?;
            if rp.insert_into_next_empty_slot()? {
                return Ok(rp.current_rid());
            }

            self.move_to_new_block()?;
        }
    }

    /// Delete the current record and make its slot the head of the free list.
    pub fn delete(&mut self) -> Result<()> {
        let head = self.free_list_head()?;
        let rid = self.current_rid()?;
        self.page()?.delete(head.as_ref())?;
        self.set_free_list_head(Some(&rid))?;
        trace!("deleted record {}", rid);
        Ok(())
    }

    pub fn move_to_rid(&mut self, rid: &RecordId) -> Result<()> {
        if rid.block().file_id() != self.file_name || rid.block().num() == HEADER_BLOCK {
            return Err(Error::InvalidSlot(rid.slot()));
        }

        if self.record_page.as_ref().map(|rp| rp.current_blk()) != Some(rid.block()) {
            self.move_to_block(rid.block().num())?;
        }

        if let Some(rp) = self.record_page.as_mut() {
            rp.move_to_id(rid.slot());
        }
        Ok(())
    }

    pub fn current_rid(&self) -> Result<RecordId> {
        Ok(self.page()?.current_rid())
    }

    /// Unpin the current block.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut rp) = self.record_page.take() {
            rp.close()?;
        }

        Ok(())
    }

    fn page(&self) -> Result<&RecordPage> {
        self.record_page
            .as_ref()
            .ok_or_else(|| Error::NotPinned(BlockId::new(&self.file_name, HEADER_BLOCK + 1)))
    }

    fn at_last_block(&self, block_num: u64) -> Result<bool> {
        Ok(block_num + 1 >= self.size()?)
    }

    fn move_to_block(&mut self, block_num: u64) -> Result<()> {
        self.close()?;
        let blk = BlockId::new(&self.file_name, block_num);
        self.record_page = Some(RecordPage::new(
            self.tx.clone(),
            blk,
            self.layout.clone(),
            self.do_log,
        )?);
        Ok(())
    }

    fn move_to_new_block(&mut self) -> Result<()> {
        let blk = self.file_manager.append_block(&self.file_name, &Page::new())?;
        trace!("appended block {}", blk);
        self.move_to_block(blk.num())
    }

    fn header_rid(&self) -> RecordId {
        RecordId::new(BlockId::new(&self.file_name, HEADER_BLOCK), 0)
    }

    fn free_list_head(&self) -> Result<Option<RecordId>> {
        let owner = self.header_rid();
        let buf = self.tx.buffers().pin(owner.block())?;
        let head = read_free_pointer(
            &self.tx,
            &buf,
            &owner,
            &self.file_name,
            FREE_LIST_HEAD_POS,
        );
        self.tx.buffers().unpin(&buf)?;
        head
    }

    fn set_free_list_head(&self, head: Option<&RecordId>) -> Result<()> {
        let owner = self.header_rid();
        let buf = self.tx.buffers().pin(owner.block())?;
        let result = write_free_pointer(
            &self.tx,
            &buf,
            &owner,
            FREE_LIST_HEAD_POS,
            head,
            self.do_log,
        );
        self.tx.buffers().unpin(&buf)?;
        result
    }
}

impl Drop for RecordFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("failed to close record file {}: {}", self.file_name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::{
        make_schema,
        tests::test_utils::{create_student_table, test_db},
    };

    use super::*;

    fn scan_ids(rf: &mut RecordFile) -> Vec<i32> {
        let mut ids = Vec::new();
        rf.before_first().unwrap();
        while rf.next().unwrap() {
            match rf.get_val("sid").unwrap() {
                Datum::Int(id) => ids.push(id),
                d => panic!("unexpected value {d}"),
            }
        }
        ids
    }

    #[test]
    fn test_scan_student_table() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let layout = create_student_table(&db);

        let tx = db.new_tx(true).unwrap();
        let mut rf = db.open_record_file(&tx, "student", layout, true).unwrap();
        assert_eq!(scan_ids(&mut rf), (1..=9).collect::<Vec<_>>());

        rf.before_first().unwrap();
        assert!(rf.next().unwrap());
        assert_eq!(rf.get_val("sname").unwrap(), Datum::Varchar("joe".into()));
        assert_eq!(rf.get_val("grad_year").unwrap(), Datum::Int(2021));

        rf.close().unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_inserts_span_blocks() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let layout = Arc::new(Layout::from_schema(make_schema! {
            "sid" => i32,
            "payload" => varchar(200)
        }));
        let per_block = (crate::page::PAGE_SIZE / layout.slot_size()) as i32;

        let tx = db.new_tx(false).unwrap();
        let mut rf = db
            .open_record_file(&tx, "wide", layout.clone(), true)
            .unwrap();
        for i in 0..per_block * 3 + 1 {
            rf.insert().unwrap();
            rf.set_val("sid", Datum::Int(i)).unwrap();
            rf.set_val("payload", Datum::Varchar(format!("row {i}")))
                .unwrap();
        }
        // header plus four data blocks
        assert_eq!(rf.size().unwrap(), 5);
        rf.close().unwrap();
        tx.commit().unwrap();

        let tx = db.new_tx(true).unwrap();
        let mut rf = db.open_record_file(&tx, "wide", layout, true).unwrap();
        assert_eq!(scan_ids(&mut rf), (0..per_block * 3 + 1).collect::<Vec<_>>());
        rf.close().unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_deleted_slots_are_reused() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let layout = create_student_table(&db);

        let tx = db.new_tx(false).unwrap();
        let mut rf = db
            .open_record_file(&tx, "student", layout.clone(), true)
            .unwrap();

        let mut deleted = Vec::new();
        rf.before_first().unwrap();
        while rf.next().unwrap() {
            if let Datum::Int(id) = rf.get_val("sid").unwrap() {
                if id % 3 == 0 {
                    deleted.push(rf.current_rid().unwrap());
                    rf.delete().unwrap();
                }
            }
        }
        assert_eq!(scan_ids(&mut rf), vec![1, 2, 4, 5, 7, 8]);
        rf.close().unwrap();
        tx.commit().unwrap();

        let tx = db.new_tx(false).unwrap();
        let mut rf = db
            .open_record_file(&tx, "student", layout.clone(), true)
            .unwrap();

        // Most recently deleted slot first
        for (i, expected) in deleted.iter().rev().enumerate() {
            let rid = rf.insert().unwrap();
            assert_eq!(&rid, expected);
            rf.set_val("sid", Datum::Int(100 + i as i32)).unwrap();
            assert_eq!(rf.get_val("sname").unwrap(), Datum::Varchar(String::new()));
        }

        // Free list exhausted, so the next insert takes a fresh slot
        let rid = rf.insert().unwrap();
        assert!(!deleted.contains(&rid));
        rf.set_val("sid", Datum::Int(200)).unwrap();

        let mut ids = scan_ids(&mut rf);
        ids.sort();
        assert_eq!(ids, vec![1, 2, 4, 5, 7, 8, 100, 101, 102, 200]);
        rf.close().unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_rolled_back_inserts_are_invisible() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let layout = create_student_table(&db);

        let tx = db.new_tx(false).unwrap();
        let mut rf = db
            .open_record_file(&tx, "student", layout.clone(), true)
            .unwrap();
        rf.insert().unwrap();
        rf.set_val("sid", Datum::Int(77)).unwrap();
        rf.before_first().unwrap();
        rf.next().unwrap();
        rf.delete().unwrap();
        assert!(scan_ids(&mut rf).contains(&77));
        rf.close().unwrap();
        tx.rollback().unwrap();

        let tx = db.new_tx(true).unwrap();
        let mut rf = db.open_record_file(&tx, "student", layout, true).unwrap();
        assert_eq!(scan_ids(&mut rf), (1..=9).collect::<Vec<_>>());
        rf.close().unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_move_to_rid() {
        let td = tempdir().unwrap();
        let db = test_db(&td);
        let layout = create_student_table(&db);

        let tx = db.new_tx(true).unwrap();
        let mut rf = db.open_record_file(&tx, "student", layout, true).unwrap();
        rf.move_to_rid(&RecordId::new(BlockId::new("student", 1), 4))
            .unwrap();
        assert_eq!(rf.get_val("sid").unwrap(), Datum::Int(5));

        assert!(matches!(
            rf.move_to_rid(&RecordId::new(BlockId::new("dept", 1), 0)),
            Err(Error::InvalidSlot(_))
        ));
        rf.close().unwrap();
        tx.commit().unwrap();
    }
}
