//! Fixed-size block read/write over a host file, behind a `BlockStore`
//! capability trait so the rest of the crate never touches `std::fs`
//! directly. A second, in-memory implementation exists purely for tests.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockDeviceError {
    #[error("block index {index} out of range (total blocks: {total})")]
    OutOfRange { index: u64, total: u64 },
    #[error("data length {got} does not match block size {expected}")]
    SizeMismatch { got: usize, expected: usize },
    #[error("container file already exists and is non-empty: {0}")]
    AlreadyInitialized(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Serialization-free fixed-size block storage. All operations are
/// serialized internally (single-writer, single-reader at the device
/// level); reads and writes are durably flushed before returning.
pub trait BlockStore: Send + Sync {
    fn block_size(&self) -> u64;
    fn total_blocks(&self) -> u64;
    fn read_block(&self, index: u64) -> Result<Vec<u8>, BlockDeviceError>;
    fn write_block(&self, index: u64, data: &[u8]) -> Result<(), BlockDeviceError>;
}

/// On-disk block device backed by one host file of exactly
/// `total_blocks * block_size` bytes.
pub struct FileBlockDevice {
    file: Mutex<File>,
    block_size: u64,
    total_blocks: u64,
}

impl FileBlockDevice {
    /// Creates a new container file at `path`, zero-filled to
    /// `total_blocks * block_size` bytes. Fails if the file already exists
    /// and is non-empty.
    pub fn initialize(path: &Path, total_blocks: u64, block_size: u64) -> Result<Self, BlockDeviceError> {
        if path.exists() {
            let existing = std::fs::metadata(path)?;
            if existing.len() != 0 {
                return Err(BlockDeviceError::AlreadyInitialized(path.to_path_buf()));
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_blocks * block_size)?;
        Ok(Self {
            file: Mutex::new(file),
            block_size,
            total_blocks,
        })
    }

    /// Opens an existing container file. Size validation against the
    /// superblock's recorded `total_blocks`/`block_size` is the caller's
    /// job (see `Container::open`).
    pub fn open(path: &Path, total_blocks: u64, block_size: u64) -> Result<Self, BlockDeviceError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            block_size,
            total_blocks,
        })
    }
}

impl BlockStore for FileBlockDevice {
    fn block_size(&self) -> u64 {
        self.block_size
    }

    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn read_block(&self, index: u64) -> Result<Vec<u8>, BlockDeviceError> {
        if index >= self.total_blocks {
            return Err(BlockDeviceError::OutOfRange {
                index,
                total: self.total_blocks,
            });
        }
        let mut buf = vec![0u8; self.block_size as usize];
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(index * self.block_size))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&self, index: u64, data: &[u8]) -> Result<(), BlockDeviceError> {
        if index >= self.total_blocks {
            return Err(BlockDeviceError::OutOfRange {
                index,
                total: self.total_blocks,
            });
        }
        if data.len() as u64 != self.block_size {
            return Err(BlockDeviceError::SizeMismatch {
                got: data.len(),
                expected: self.block_size as usize,
            });
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(index * self.block_size))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }
}

/// In-memory block store for unit tests; never touches a real file.
pub struct MemBlockDevice {
    blocks: Mutex<Vec<Vec<u8>>>,
    block_size: u64,
}

impl MemBlockDevice {
    pub fn new(total_blocks: u64, block_size: u64) -> Self {
        Self {
            blocks: Mutex::new(vec![vec![0u8; block_size as usize]; total_blocks as usize]),
            block_size,
        }
    }
}

impl BlockStore for MemBlockDevice {
    fn block_size(&self) -> u64 {
        self.block_size
    }

    fn total_blocks(&self) -> u64 {
        self.blocks.lock().unwrap().len() as u64
    }

    fn read_block(&self, index: u64) -> Result<Vec<u8>, BlockDeviceError> {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .get(index as usize)
            .cloned()
            .ok_or(BlockDeviceError::OutOfRange {
                index,
                total: blocks.len() as u64,
            })
    }

    fn write_block(&self, index: u64, data: &[u8]) -> Result<(), BlockDeviceError> {
        if data.len() as u64 != self.block_size {
            return Err(BlockDeviceError::SizeMismatch {
                got: data.len(),
                expected: self.block_size as usize,
            });
        }
        let mut blocks = self.blocks.lock().unwrap();
        let total = blocks.len() as u64;
        let slot = blocks
            .get_mut(index as usize)
            .ok_or(BlockDeviceError::OutOfRange { index, total })?;
        slot.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_device_roundtrip() {
        let dev = MemBlockDevice::new(4, 16);
        let data = vec![7u8; 16];
        dev.write_block(2, &data).unwrap();
        assert_eq!(dev.read_block(2).unwrap(), data);
    }

    #[test]
    fn mem_device_out_of_range() {
        let dev = MemBlockDevice::new(2, 16);
        assert!(matches!(
            dev.read_block(5),
            Err(BlockDeviceError::OutOfRange { .. })
        ));
    }

    #[test]
    fn mem_device_size_mismatch() {
        let dev = MemBlockDevice::new(2, 16);
        assert!(matches!(
            dev.write_block(0, &[1, 2, 3]),
            Err(BlockDeviceError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn file_device_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.bv");
        let dev = FileBlockDevice::initialize(&path, 4, 512).unwrap();
        let data = vec![9u8; 512];
        dev.write_block(1, &data).unwrap();
        assert_eq!(dev.read_block(1).unwrap(), data);
    }

    #[test]
    fn file_device_refuses_nonempty_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.bv");
        std::fs::write(&path, b"not empty").unwrap();
        assert!(matches!(
            FileBlockDevice::initialize(&path, 4, 512),
            Err(BlockDeviceError::AlreadyInitialized(_))
        ));
    }
}
