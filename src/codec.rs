//! Stateless translation between in-memory records and on-disk byte pages.
//!
//! The `MetadataRecord` is serialized as one JSON document via `serde_json`,
//! then split across a linked chain of fixed-size pages (one page per
//! block), each carrying its own CRC32 so a torn write to a single page is
//! caught at decode time instead of silently truncating the whole record.

use crate::record::MetadataRecord;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io;
use thiserror::Error;

pub const PAGE_MAGIC: &[u8; 4] = b"MDPG";
/// magic(4) + next_page_block(8) + payload_len(4) + page_crc32(4)
pub const PAGE_HEADER_SIZE: usize = 20;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("block size {0} too small to hold even an empty metadata page")]
    BlockSizeTooSmall(u64),
    #[error("metadata page magic mismatch, not a metadata page")]
    InvalidPageMagic,
    #[error("metadata page crc32 mismatch, corrupt metadata")]
    PageCrc32Mismatch,
    #[error("metadata record parse failure: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Serializes `meta` to JSON and splits it into payload-sized chunks that
/// each fit within one block once the page header is accounted for. Returns
/// the chunks only; the caller assigns real block indices and calls
/// `encode_page` once allocation is known.
pub fn chunk_for_pages(meta: &MetadataRecord, block_size: u64) -> Result<Vec<Vec<u8>>, CodecError> {
    let payload_cap = block_size as usize;
    if payload_cap <= PAGE_HEADER_SIZE {
        return Err(CodecError::BlockSizeTooSmall(block_size));
    }
    let max_chunk = payload_cap - PAGE_HEADER_SIZE;
    let bytes = serde_json::to_vec(meta)?;
    if bytes.is_empty() {
        return Ok(vec![Vec::new()]);
    }
    Ok(bytes.chunks(max_chunk).map(|c| c.to_vec()).collect())
}

/// Encodes one page: `next_page_block` is the real block index of the next
/// page in the chain, or `SENTINEL_BLOCK` (`superblock::SENTINEL_BLOCK`) for
/// the last page.
pub fn encode_page(payload: &[u8], next_page_block: u64, block_size: u64) -> Vec<u8> {
    let mut header = Vec::with_capacity(PAGE_HEADER_SIZE);
    header.extend_from_slice(PAGE_MAGIC);
    header.write_u64::<LittleEndian>(next_page_block).unwrap();
    header.write_u32::<LittleEndian>(payload.len() as u32).unwrap();

    let mut h = Hasher::new();
    h.update(&header);
    h.update(payload);
    header.write_u32::<LittleEndian>(h.finalize()).unwrap();

    let mut page = header;
    page.extend_from_slice(payload);
    page.resize(block_size as usize, 0u8);
    page
}

/// Decodes one page, returning `(next_page_block, payload)`.
pub fn decode_page(buf: &[u8]) -> Result<(u64, Vec<u8>), CodecError> {
    if &buf[0..4] != PAGE_MAGIC {
        return Err(CodecError::InvalidPageMagic);
    }
    let next_page_block = (&buf[4..12]).read_u64::<LittleEndian>()?;
    let payload_len = (&buf[12..16]).read_u32::<LittleEndian>()? as usize;
    let stored_crc = (&buf[16..20]).read_u32::<LittleEndian>()?;

    let payload_end = PAGE_HEADER_SIZE + payload_len;
    if payload_end > buf.len() {
        return Err(CodecError::PageCrc32Mismatch);
    }
    let payload = &buf[PAGE_HEADER_SIZE..payload_end];

    let mut h = Hasher::new();
    h.update(&buf[0..16]);
    h.update(payload);
    if h.finalize() != stored_crc {
        return Err(CodecError::PageCrc32Mismatch);
    }

    Ok((next_page_block, payload.to_vec()))
}

/// Concatenates raw page bytes (already walked in chain order by the
/// caller) and parses the resulting JSON document.
pub fn decode_metadata_chain(pages: &[Vec<u8>]) -> Result<MetadataRecord, CodecError> {
    let mut joined = Vec::new();
    for raw in pages {
        let (_, payload) = decode_page(raw)?;
        joined.extend_from_slice(&payload);
    }
    Ok(serde_json::from_slice(&joined)?)
}
