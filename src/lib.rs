//! # blockvault: single-file block-addressable storage container
//!
//! Format guarantees:
//! - All numeric fields are little-endian; never negotiated
//! - The superblock carries a mandatory CRC32; a corrupt header aborts an open
//! - Every metadata page is self-describing (magic, next-page pointer,
//!   payload length) and carries its own CRC32; a torn write to one page is
//!   caught at decode time instead of silently truncating the record
//! - Block-level content-addressed deduplication (BLAKE3) means a given
//!   byte sequence is ever stored in at most one data block, however many
//!   files reference it
//! - Metadata mutation is visible atomically via a single superblock
//!   pointer swap (`metadata_head_block`); see `container::Container` for
//!   the exact protocol

pub mod allocator;
pub mod block_device;
pub mod codec;
pub mod container;
pub mod dedup;
pub mod namespace;
pub mod record;
pub mod registry;
pub mod superblock;

// Flat re-exports for the most common types.
pub use allocator::{AllocatorError, FreeBlockAllocator};
pub use block_device::{BlockDeviceError, BlockStore, FileBlockDevice, MemBlockDevice};
pub use codec::CodecError;
pub use container::{Container, ContainerError, ContainerState};
pub use dedup::{DedupError, DedupIndex};
pub use namespace::{Namespace, NamespaceError};
pub use record::{DedupRecord, DirectoryEntry, FileEntry, MetadataRecord};
pub use registry::{ContainerRegistry, RegistryError};
pub use superblock::{Superblock, SuperblockError};
