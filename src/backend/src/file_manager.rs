use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::block_id::BlockId;
use crate::error::{Error, Result};
use crate::page::{Page, PAGE_SIZE};

const HEADER_SIZE: u64 = 1024;

/// Reads and writes whole blocks of the files under a root directory.
pub struct FileManager {
    files: RwLock<HashMap<String, Arc<Mutex<File>>>>,
    root_directory: PathBuf,
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("files", &self.files)
            .field("root_directory", &self.root_directory)
            .finish()
    }
}

impl FileManager {
    pub fn new(root_directory: &Path) -> Result<Self> {
        if !root_directory.is_dir() {
            return Err(Error::Config(format!(
                "directory does not exist: {}",
                root_directory.to_string_lossy()
            )));
        }

        Ok(Self {
            files: RwLock::new(HashMap::new()),
            root_directory: root_directory.to_path_buf(),
        })
    }

    pub fn block_size(&self) -> usize {
        PAGE_SIZE
    }

    fn get_file_position(bid: &BlockId) -> u64 {
        bid.num() * PAGE_SIZE as u64 + HEADER_SIZE
    }

    /// Read a block into the provided page. Blocks past the end of the file read as zeroes.
    pub fn get_block(&self, bid: &BlockId, page: &mut Page) -> Result<()> {
        let seek_position = Self::get_file_position(bid);
        let file = self.get_or_create_file(bid.file_id())?;
        let mut file = file.lock().unwrap();

        if seek_position + PAGE_SIZE as u64 <= file.metadata()?.len() {
            file.seek(SeekFrom::Start(seek_position))?;
            file.read_exact(page.raw_mut())?;
        } else {
            *page = Page::new();
        }

        Ok(())
    }

    /// Write data in the provided page to a block.
    ///
    /// # Arguments
    ///
    /// * `blk` - The BlockId that identifies where the page should be written.
    /// * `page` - The page that will be written.
    pub fn write_block(&self, blk: &BlockId, page: &Page) -> Result<()> {
        let seek_position = Self::get_file_position(blk);
        let file = self.get_or_create_file(blk.file_id())?;
        let mut file = file.lock().unwrap();

        file.seek(SeekFrom::Start(seek_position))?;
        file.write_all(page.raw())?;
        file.flush()?;
        file.sync_data()?;

        Ok(())
    }

    /// Append the provided page to the file identified by the file_id
    pub fn append_block(&self, file_id: &str, page: &Page) -> Result<BlockId> {
        let file = self.get_or_create_file(file_id)?;
        let mut file = file.lock().unwrap();
        let block_start = file.seek(SeekFrom::End(0))?;
        let block_number = (block_start - HEADER_SIZE) / PAGE_SIZE as u64;
        file.write_all(page.raw())?;
        file.sync_all()?;

        Ok(BlockId::new(file_id, block_number))
    }

    /// Get the number of blocks in a file.
    pub fn length(&self, file_id: &str) -> Result<u64> {
        let file = self.get_or_create_file(file_id)?;
        let file = file.lock().unwrap();
        let file_size = file.metadata()?.len();

        Ok(file_size.saturating_sub(HEADER_SIZE) / PAGE_SIZE as u64)
    }

    fn get_or_create_file(&self, file_id: &str) -> Result<Arc<Mutex<File>>> {
        if let Some(file) = self.files.read().unwrap().get(file_id) {
            return Ok(file.clone());
        }

        let mut files = self.files.write().unwrap();
        if let Some(file) = files.get(file_id) {
            return Ok(file.clone());
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root_directory.join(file_id))?;

        // New files get a header for storing metadata
        if file.metadata()?.len() == 0 {
            file.write_all(&[0; HEADER_SIZE as usize])?;
            file.sync_all()?;
        }

        let file = Arc::new(Mutex::new(file));
        files.insert(file_id.to_string(), file.clone());
        Ok(file)
    }
}
