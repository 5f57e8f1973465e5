//! Superblock: format anchor at block 0.
//!
//! # On-disk layout (fixed-form fields, zero-padded to `block_size`, all
//! numeric fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic              = "BVLT" (4 ASCII bytes, not LE)
//!    4      4   format_version     = 1       (LE u32)
//!    8     16   container_uuid     unique per container
//!   24      4   flags              reserved, currently 0 (LE u32)
//!   28      8   total_blocks       N, immutable after creation (LE u64)
//!   36      8   block_size         B, immutable after creation (LE u64)
//!   44      8   metadata_head_block  first block of the metadata chain, or
//!                                    SENTINEL_BLOCK if the chain is empty
//!   52      4   header_crc32       CRC32 of bytes [0..52)
//!   ...    ...  zero padding to exactly `block_size` bytes
//! ```
//!
//! `magic`, `total_blocks`, and `block_size` never change once the container
//! is created; only `metadata_head_block` is rewritten, and only as part of
//! the metadata pointer-swap protocol (see `container::Container`).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::{self, Read, Write};
use thiserror::Error;
use uuid::Uuid;

pub const MAGIC: &[u8; 4] = b"BVLT";
pub const FORMAT_VERSION: u32 = 1;
pub const MIN_BLOCK_SIZE: u64 = 512;
pub const SENTINEL_BLOCK: u64 = u64::MAX;

/// Fixed-form size of the superblock, before zero padding. Kept well under
/// `MIN_BLOCK_SIZE` so even the smallest allowed block size has room.
const HEADER_LEN: usize = 52;

#[derive(Error, Debug)]
pub enum SuperblockError {
    #[error("invalid magic number, not a blockvault container")]
    InvalidMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("superblock header_crc32 mismatch, container is corrupted")]
    Crc32Mismatch,
    #[error("block size {0} is below the minimum of {MIN_BLOCK_SIZE}")]
    BlockSizeTooSmall(u64),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub magic: [u8; 4],
    pub format_version: u32,
    pub container_uuid: Uuid,
    pub flags: u32,
    pub total_blocks: u64,
    pub block_size: u64,
    pub metadata_head_block: u64,
}

impl Superblock {
    pub fn new(total_blocks: u64, block_size: u64) -> Result<Self, SuperblockError> {
        if block_size < MIN_BLOCK_SIZE {
            return Err(SuperblockError::BlockSizeTooSmall(block_size));
        }
        Ok(Self {
            magic: *MAGIC,
            format_version: FORMAT_VERSION,
            container_uuid: Uuid::new_v4(),
            flags: 0,
            total_blocks,
            block_size,
            metadata_head_block: SENTINEL_BLOCK,
        })
    }

    /// Encode into exactly `block_size` bytes. `header_crc32` covers bytes
    /// `[0..HEADER_LEN)`; the padding after it is not covered.
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        let mut body = Vec::with_capacity(HEADER_LEN);
        body.extend_from_slice(&self.magic);
        body.write_u32::<LittleEndian>(self.format_version)?;
        body.extend_from_slice(self.container_uuid.as_bytes());
        body.write_u32::<LittleEndian>(self.flags)?;
        body.write_u64::<LittleEndian>(self.total_blocks)?;
        body.write_u64::<LittleEndian>(self.block_size)?;
        body.write_u64::<LittleEndian>(self.metadata_head_block)?;
        debug_assert_eq!(body.len(), HEADER_LEN);

        let mut h = Hasher::new();
        h.update(&body);
        body.write_u32::<LittleEndian>(h.finalize())?;

        body.resize(self.block_size as usize, 0u8);
        w.write_all(&body)
    }

    pub fn read<R: Read>(mut r: R, block_size: u64) -> Result<Self, SuperblockError> {
        let mut buf = vec![0u8; block_size as usize];
        r.read_exact(&mut buf)?;

        if &buf[0..4] != MAGIC {
            return Err(SuperblockError::InvalidMagic);
        }
        let format_version = (&buf[4..8]).read_u32::<LittleEndian>()?;
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }
        let container_uuid = Uuid::from_bytes(buf[8..24].try_into().unwrap());
        let flags = (&buf[24..28]).read_u32::<LittleEndian>()?;
        let total_blocks = (&buf[28..36]).read_u64::<LittleEndian>()?;
        let block_size_field = (&buf[36..44]).read_u64::<LittleEndian>()?;
        let metadata_head_block = (&buf[44..52]).read_u64::<LittleEndian>()?;
        let stored_crc = (&buf[52..56]).read_u32::<LittleEndian>()?;

        let mut h = Hasher::new();
        h.update(&buf[..HEADER_LEN]);
        if h.finalize() != stored_crc {
            return Err(SuperblockError::Crc32Mismatch);
        }

        Ok(Self {
            magic: *MAGIC,
            format_version,
            container_uuid,
            flags,
            total_blocks,
            block_size: block_size_field,
            metadata_head_block,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let sb = Superblock::new(1024, 4096).unwrap();
        let mut buf = Vec::new();
        sb.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 4096);
        let back = Superblock::read(&buf[..], 4096).unwrap();
        assert_eq!(sb, back);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 4096];
        assert!(matches!(
            Superblock::read(&buf[..], 4096),
            Err(SuperblockError::InvalidMagic)
        ));
    }

    #[test]
    fn rejects_small_block_size() {
        assert!(matches!(
            Superblock::new(10, 256),
            Err(SuperblockError::BlockSizeTooSmall(256))
        ));
    }

    #[test]
    fn rejects_flipped_bit() {
        let sb = Superblock::new(1024, 4096).unwrap();
        let mut buf = Vec::new();
        sb.write(&mut buf).unwrap();
        buf[10] ^= 0xFF;
        assert!(matches!(
            Superblock::read(&buf[..], 4096),
            Err(SuperblockError::Crc32Mismatch)
        ));
    }
}
