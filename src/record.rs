//! In-memory record types that make up the persisted Metadata record.
//! Serialized as a whole via `serde_json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One file's worth of bookkeeping. `block_indices` may repeat across
/// `FileEntry`s; that repetition is the deduplication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub block_indices: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    pub child_dirs: BTreeSet<String>,
    pub child_files: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl DirectoryEntry {
    pub fn new_root(now: DateTime<Utc>) -> Self {
        Self {
            name: String::new(),
            path: "/".to_string(),
            child_dirs: BTreeSet::new(),
            child_files: BTreeSet::new(),
            created_at: now,
            modified_at: now,
        }
    }
}

/// Persisted form of the `DedupIndex`: the `byBlock` side is authoritative
/// on disk (content hash as a hex string keeps the record human-readable);
/// `byHash` is rebuilt in memory from it on load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DedupRecord {
    /// block index -> (hex content hash, refcount)
    pub by_block: BTreeMap<u64, (String, u64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataRecord {
    pub files: BTreeMap<String, FileEntry>,
    pub directories: BTreeMap<String, DirectoryEntry>,
    pub current_directory: String,
    pub free_blocks: Vec<u64>,
    pub dedup: DedupRecord,
}

impl MetadataRecord {
    pub fn empty(now: DateTime<Utc>, free_blocks: Vec<u64>) -> Self {
        let mut directories = BTreeMap::new();
        directories.insert("/".to_string(), DirectoryEntry::new_root(now));
        Self {
            files: BTreeMap::new(),
            directories,
            current_directory: "/".to_string(),
            free_blocks,
            dedup: DedupRecord::default(),
        }
    }
}
