use std::{mem::size_of, sync::Arc};

use tracing::trace;

use crate::{
    block_id::BlockId,
    buffer::BufferHandle,
    datum::{Datum, FieldType},
    error::{Error, Result},
    layout::{Layout, FLAG_SIZE},
    page::PAGE_SIZE,
    rid::RecordId,
    transaction::Transaction,
};

/// The EMPTY/INUSE flag at the start of every slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum SlotState {
    Empty = 0,
    InUse = 1,
}

impl SlotState {
    fn from_flag(flag: i32, offset: usize) -> Result<Self> {
        match flag {
            0 => Ok(SlotState::Empty),
            1 => Ok(SlotState::InUse),
            f => Err(Error::Corrupt {
                offset,
                reason: format!("invalid slot flag {f}"),
            }),
        }
    }
}

/// A block of a table file viewed as an array of fixed-size slots. Each slot is a flag followed by
/// one record; deleted slots chain into a free list through a pointer kept in their payload.
///
/// Every read and write goes through the owning transaction, so the page sees the transaction's
/// uncommitted writes and never modifies the pinned buffer directly.
pub struct RecordPage {
    tx: Arc<Transaction>,
    blk: BlockId,
    layout: Arc<Layout>,
    do_log: bool,
    buf: Option<BufferHandle>,
    current_slot: i32,
}

impl RecordPage {
    /// Pin `blk` and position the cursor before the first slot.
    pub fn new(
        tx: Arc<Transaction>,
        blk: BlockId,
        layout: Arc<Layout>,
        do_log: bool,
    ) -> Result<Self> {
        let buf = tx.buffers().pin(&blk)?;

        Ok(Self {
            tx,
            blk,
            layout,
            do_log,
            buf: Some(buf),
            current_slot: -1,
        })
    }

    /// Unpin the block. Closing twice, or after the transaction has finished, does nothing.
    pub fn close(&mut self) -> Result<()> {
        if let Some(buf) = self.buf.take() {
            if !self.tx.is_finished() {
                self.tx.buffers().unpin(&buf)?;
            }
        }

        Ok(())
    }

    /// Move to the next INUSE slot. Returns false once the end of the block is reached.
    pub fn next(&mut self) -> Result<bool> {
        self.search_for(SlotState::InUse)
    }

    pub fn get_val(&self, field_name: &str) -> Result<Datum> {
        let field_type = self.layout.field_type(field_name)?;
        let pos = self.field_pos(field_name)?;
        self.read(pos, field_type)
    }

    /// Write a field of the current record. The value must match the field's type and size.
    pub fn set_val(&self, field_name: &str, val: Datum) -> Result<()> {
        let field_type = self.layout.field_type(field_name)?;
        val.check_fits(field_name, field_type)?;
        let pos = self.field_pos(field_name)?;
        self.write(pos, val)
    }

    /// Mark the current slot INUSE if it is EMPTY. An occupied slot is left alone and reported
    /// as `false`.
    pub fn insert_into_the_current_slot(&self) -> Result<bool> {
        if self.flag()? != SlotState::Empty {
            return Ok(false);
        }

        self.set_flag(SlotState::InUse)?;
        Ok(true)
    }

    /// Move to the next EMPTY slot and mark it INUSE. Returns false if the block is full.
    pub fn insert_into_next_empty_slot(&mut self) -> Result<bool> {
        let found = self.search_for(SlotState::Empty)?;
        if found {
            self.set_flag(SlotState::InUse)?;
        }

        Ok(found)
    }

    /// Reuse the current slot, which must be the head of the free list. The slot's free-list
    /// pointer is erased before the slot is marked INUSE, and the pointer that was stored there
    /// is returned so the caller can update the head of the list.
    ///
    /// Fails with `Error::SlotInUse` if the slot holds a record.
    pub fn insert_into_deleted_slot(&self) -> Result<Option<RecordId>> {
        if self.flag()? != SlotState::Empty {
            return Err(Error::SlotInUse(self.current_rid()));
        }

        let next = self.get_next_deleted_slot_id()?;
        // Left in place, the pointer bytes would be read back as field data.
        self.set_next_deleted_slot_id(None)?;
        self.set_flag(SlotState::InUse)?;
        trace!(
            "reused deleted slot {}, next deleted slot {:?}",
            self.current_rid(),
            next
        );
        Ok(next)
    }

    /// Mark the current slot EMPTY and link it in front of `next_deleted`.
    pub fn delete(&self, next_deleted: Option<&RecordId>) -> Result<()> {
        self.set_flag(SlotState::Empty)?;
        self.set_next_deleted_slot_id(next_deleted)
    }

    pub fn move_to_id(&mut self, slot: i32) {
        self.current_slot = slot;
    }

    pub fn current_id(&self) -> i32 {
        self.current_slot
    }

    pub fn current_blk(&self) -> &BlockId {
        &self.blk
    }

    pub fn current_rid(&self) -> RecordId {
        RecordId::new(self.blk.clone(), self.current_slot)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn get_next_deleted_slot_id(&self) -> Result<Option<RecordId>> {
        let pos = self.slot_pos()? + FLAG_SIZE;
        read_free_pointer(
            &self.tx,
            self.buf()?,
            &self.current_rid(),
            self.blk.file_id(),
            pos,
        )
    }

    pub fn set_next_deleted_slot_id(&self, next: Option<&RecordId>) -> Result<()> {
        let pos = self.slot_pos()? + FLAG_SIZE;
        write_free_pointer(
            &self.tx,
            self.buf()?,
            &self.current_rid(),
            pos,
            next,
            self.do_log,
        )
    }

    /// Mark every slot EMPTY and reset its fields to zero values. These writes are never logged.
    pub fn format(&mut self) -> Result<()> {
        let buf = self.buf()?.clone();
        let mut slot = 0;
        while self.is_valid_slot(slot) {
            let rid = RecordId::new(self.blk.clone(), slot);
            let pos = self.slot_size() * slot as usize;

            self.tx.write_val(
                &buf,
                &rid,
                pos,
                Datum::Int(SlotState::Empty as i32),
                false,
            )?;
            write_free_pointer(&self.tx, &buf, &rid, pos + FLAG_SIZE, None, false)?;

            for field_name in self.layout.schema().fields() {
                let field_type = self.layout.field_type(field_name)?;
                let field_pos = pos + FLAG_SIZE + self.layout.offset(field_name)?;
                self.tx
                    .write_val(&buf, &rid, field_pos, Datum::default_for(field_type), false)?;
            }

            slot += 1;
        }

        self.current_slot = -1;
        Ok(())
    }

    /// The state of every slot in the block, as this transaction sees it.
    pub fn slot_states(&self) -> Result<Vec<SlotState>> {
        let buf = self.buf()?;
        let mut states = Vec::new();
        let mut slot = 0;
        while self.is_valid_slot(slot) {
            let pos = self.slot_size() * slot as usize;
            let flag = self.tx.read_val(
                buf,
                &RecordId::new(self.blk.clone(), slot),
                pos,
                FieldType::Int,
            )?;
            states.push(match flag {
                Datum::Int(f) => SlotState::from_flag(f, pos)?,
                _ => return Err(flag_type_error(pos)),
            });
            slot += 1;
        }

        Ok(states)
    }

    fn search_for(&mut self, state: SlotState) -> Result<bool> {
        self.current_slot += 1;
        while self.is_valid_slot(self.current_slot) {
            if self.flag()? == state {
                return Ok(true);
            }
            self.current_slot += 1;
        }

        Ok(false)
    }

    fn flag(&self) -> Result<SlotState> {
        let pos = self.slot_pos()?;
        match self.read(pos, FieldType::Int)? {
            Datum::Int(f) => SlotState::from_flag(f, pos),
            _ => Err(flag_type_error(pos)),
        }
    }

    fn set_flag(&self, state: SlotState) -> Result<()> {
        let pos = self.slot_pos()?;
        self.write(pos, Datum::Int(state as i32))
    }

    fn read(&self, pos: usize, field_type: FieldType) -> Result<Datum> {
        self.tx
            .read_val(self.buf()?, &self.current_rid(), pos, field_type)
    }

    fn write(&self, pos: usize, val: Datum) -> Result<()> {
        self.tx
            .write_val(self.buf()?, &self.current_rid(), pos, val, self.do_log)
    }

    fn buf(&self) -> Result<&BufferHandle> {
        self.buf
            .as_ref()
            .ok_or_else(|| Error::NotPinned(self.blk.clone()))
    }

    fn field_pos(&self, field_name: &str) -> Result<usize> {
        Ok(self.slot_pos()? + FLAG_SIZE + self.layout.offset(field_name)?)
    }

    // Byte offset of the current slot, which must lie inside the block.
    fn slot_pos(&self) -> Result<usize> {
        if !self.is_valid_slot(self.current_slot) {
            return Err(Error::InvalidSlot(self.current_slot));
        }

        Ok(self.slot_size() * self.current_slot as usize)
    }

    fn is_valid_slot(&self, slot: i32) -> bool {
        slot >= 0 && (slot as usize + 1) * self.slot_size() <= PAGE_SIZE
    }

    fn slot_size(&self) -> usize {
        self.layout.slot_size()
    }
}

fn flag_type_error(offset: usize) -> Error {
    Error::Corrupt {
        offset,
        reason: "slot flag is not an int".to_string(),
    }
}

const POINTER_SLOT_POS: usize = size_of::<i64>();

/// Read a free-list pointer stored at `pos`: a block number followed by a one-based slot index,
/// where zero means there is no next slot. `owner` is the record whose lock covers the pointer.
pub(crate) fn read_free_pointer(
    tx: &Transaction,
    buf: &BufferHandle,
    owner: &RecordId,
    file_id: &str,
    pos: usize,
) -> Result<Option<RecordId>> {
    let block_num = tx.read_val(buf, owner, pos, FieldType::BigInt)?;
    let slot = tx.read_val(buf, owner, pos + POINTER_SLOT_POS, FieldType::Int)?;

    match (block_num, slot) {
        (_, Datum::Int(0)) => Ok(None),
        (Datum::BigInt(n), Datum::Int(s)) if n >= 0 && s > 0 => Ok(Some(RecordId::new(
            BlockId::new(file_id, n as u64),
            s - 1,
        ))),
        (n, s) => Err(Error::Corrupt {
            offset: pos,
            reason: format!("invalid free-list pointer ({n}, {s})"),
        }),
    }
}

/// Write a free-list pointer at `pos`. This is the persisted format: the block number as an i64
/// followed by the slot index plus one as an i32, so `None` is stored as zeroes and never collides
/// with slot 0 of block 0.
pub(crate) fn write_free_pointer(
    tx: &Transaction,
    buf: &BufferHandle,
    owner: &RecordId,
    pos: usize,
    next: Option<&RecordId>,
    do_log: bool,
) -> Result<()> {
    let (block_num, slot) = match next {
        Some(rid) => (rid.block().num() as i64, rid.slot() + 1),
        None => (0, 0),
    };

    tx.write_val(buf, owner, pos, Datum::BigInt(block_num), do_log)?;
    tx.write_val(
        buf,
        owner,
        pos + POINTER_SLOT_POS,
        Datum::Int(slot),
        do_log,
    )
}
