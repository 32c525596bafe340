use byteorder::{ByteOrder, LittleEndian};
use std::mem::size_of;

pub const PAGE_SIZE: usize = 4096;

/// Page is a block that has been pulled into a memory buffer.
#[derive(Debug, Clone)]
pub struct Page {
    data: [u8; PAGE_SIZE],
}

pub trait WriteTypeToPage {
    fn write(&self, page: &mut Page, offset: usize) -> usize;
}

pub trait ReadTypeFromPage {
    fn read(page: &Page, offset: usize) -> Self;
}

macro_rules! impl_endian_io_traits {
    ($t:ty, $write_fn:ident, $read_fn:ident) => {
        impl WriteTypeToPage for $t {
            fn write(&self, page: &mut Page, offset: usize) -> usize {
                let size = size_of::<Self>();
                LittleEndian::$write_fn(&mut page.data[offset..offset + size], *self);
                size
            }
        }

        impl ReadTypeFromPage for $t {
            fn read(page: &Page, offset: usize) -> Self {
                let size = size_of::<Self>();
                LittleEndian::$read_fn(&page.data[offset..offset + size])
            }
        }
    };
}

impl_endian_io_traits!(u32, write_u32, read_u32);
impl_endian_io_traits!(i32, write_i32, read_i32);
impl_endian_io_traits!(u64, write_u64, read_u64);
impl_endian_io_traits!(i64, write_i64, read_i64);
impl_endian_io_traits!(f64, write_f64, read_f64);

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Page {
    /// Create a new Page with all data initialized to 0.
    pub fn new() -> Self {
        Page {
            data: [0; PAGE_SIZE],
        }
    }

    pub fn raw(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn raw_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    /// Write data to a page at the provided offset and return the number of bytes written.
    ///
    /// # Arguments
    ///
    /// * `data` - Data to be written to the page.
    /// * `offset` - The offset in the page where data will be written.
    pub fn write<T: WriteTypeToPage>(&mut self, data: T, offset: usize) -> usize {
        data.write(self, offset)
    }

    /// Write bytes to a page at the provided offset and return the number of bytes written.
    pub fn write_bytes(&mut self, data: &[u8], offset: usize) -> usize {
        self.data[offset..offset + data.len()].copy_from_slice(data);
        data.len()
    }

    pub fn read<T: ReadTypeFromPage>(&self, offset: usize) -> T {
        T::read(self, offset)
    }

    pub fn read_bytes(&self, offset: usize, length: usize) -> &[u8] {
        &self.data[offset..offset + length]
    }
}
