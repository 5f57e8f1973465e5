//! In-memory directory tree and file table, keyed by canonical path.
//! Comparison is case-insensitive; storage is case-preserving.

use crate::record::{DirectoryEntry, FileEntry};
use chrono::Utc;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NamespaceError {
    #[error("directory already exists: {0}")]
    DirectoryAlreadyExists(String),
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("file already exists: {0}")]
    FileAlreadyExists(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

pub struct Namespace {
    pub files: BTreeMap<String, FileEntry>,
    pub directories: BTreeMap<String, DirectoryEntry>,
    pub current_directory: String,
}

/// Compares paths the way the namespace does: case-insensitively, on
/// their canonical lowercase form. Used for key lookups.
fn key(path: &str) -> String {
    path.to_lowercase()
}

impl Namespace {
    pub fn new(files: BTreeMap<String, FileEntry>, directories: BTreeMap<String, DirectoryEntry>, current_directory: String) -> Self {
        Self {
            files,
            directories,
            current_directory,
        }
    }

    /// Normalizes `path` against `current_directory`: resolves `.`/`..`
    /// segments, enforces a leading `/`, drops a trailing `/` (except for
    /// root), and preserves case.
    pub fn canonicalize(&self, path: &str) -> Result<String, NamespaceError> {
        if path.is_empty() {
            return Err(NamespaceError::InvalidPath(path.to_string()));
        }
        let base = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.current_directory.trim_end_matches('/'), path)
        };

        let mut segments: Vec<&str> = Vec::new();
        for seg in base.split('/') {
            match seg {
                "" | "." => continue,
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Ok("/".to_string());
        }
        Ok(format!("/{}", segments.join("/")))
    }

    fn dir_key_for(&self, path: &str) -> Option<String> {
        let k = key(path);
        self.directories.keys().find(|p| key(p) == k).cloned()
    }

    fn file_key_for(&self, path: &str) -> Option<String> {
        let k = key(path);
        self.files.keys().find(|p| key(p) == k).cloned()
    }

    pub fn make_directory(&mut self, name: &str, parent_path: &str) -> Result<(), NamespaceError> {
        if name.is_empty() {
            return Err(NamespaceError::InvalidPath(name.to_string()));
        }
        let parent_key = self
            .dir_key_for(parent_path)
            .ok_or_else(|| NamespaceError::DirectoryNotFound(parent_path.to_string()))?;
        let full_path = join_path(parent_path, name);
        if self.dir_key_for(&full_path).is_some() || self.file_key_for(&full_path).is_some() {
            return Err(NamespaceError::DirectoryAlreadyExists(full_path));
        }
        let now = Utc::now();
        self.directories.insert(
            full_path.clone(),
            DirectoryEntry {
                name: name.to_string(),
                path: full_path.clone(),
                child_dirs: Default::default(),
                child_files: Default::default(),
                created_at: now,
                modified_at: now,
            },
        );
        let parent = self.directories.get_mut(&parent_key).unwrap();
        parent.child_dirs.insert(full_path);
        parent.modified_at = now;
        Ok(())
    }

    pub fn remove_directory(&mut self, name: &str, parent_path: &str) -> Result<(), NamespaceError> {
        if name.is_empty() {
            return Err(NamespaceError::InvalidPath(name.to_string()));
        }
        let full_path = join_path(parent_path, name);
        if full_path == "/" {
            return Err(NamespaceError::DirectoryNotEmpty(full_path));
        }
        let target_key = self
            .dir_key_for(&full_path)
            .ok_or_else(|| NamespaceError::DirectoryNotFound(full_path.clone()))?;
        let target = self.directories.get(&target_key).unwrap();
        if !target.child_dirs.is_empty() || !target.child_files.is_empty() {
            return Err(NamespaceError::DirectoryNotEmpty(full_path));
        }
        self.directories.remove(&target_key);
        if let Some(parent_key) = self.dir_key_for(parent_path) {
            let parent = self.directories.get_mut(&parent_key).unwrap();
            parent.child_dirs.remove(&target_key);
            parent.modified_at = Utc::now();
        }
        Ok(())
    }

    pub fn change_directory(&mut self, target_path: &str) -> Result<(), NamespaceError> {
        let canonical = self.canonicalize(target_path)?;
        let resolved = self
            .dir_key_for(&canonical)
            .ok_or_else(|| NamespaceError::DirectoryNotFound(canonical.clone()))?;
        self.current_directory = resolved;
        Ok(())
    }

    pub fn list_directory_children(&self, path: &str) -> Result<(Vec<String>, Vec<String>), NamespaceError> {
        let key = self
            .dir_key_for(path)
            .ok_or_else(|| NamespaceError::DirectoryNotFound(path.to_string()))?;
        let entry = &self.directories[&key];
        Ok((
            entry.child_dirs.iter().cloned().collect(),
            entry.child_files.iter().cloned().collect(),
        ))
    }

    pub fn add_file(&mut self, entry: FileEntry) -> Result<(), NamespaceError> {
        if self.file_key_for(&entry.path).is_some() || self.dir_key_for(&entry.path).is_some() {
            return Err(NamespaceError::FileAlreadyExists(entry.path));
        }
        let parent_path = parent_of(&entry.path);
        let parent_key = self
            .dir_key_for(&parent_path)
            .ok_or_else(|| NamespaceError::DirectoryNotFound(parent_path))?;
        let path = entry.path.clone();
        self.files.insert(path.clone(), entry);
        let parent = self.directories.get_mut(&parent_key).unwrap();
        parent.child_files.insert(path);
        parent.modified_at = Utc::now();
        Ok(())
    }

    pub fn remove_file(&mut self, path: &str) -> Result<FileEntry, NamespaceError> {
        let file_key = self
            .file_key_for(path)
            .ok_or_else(|| NamespaceError::FileNotFound(path.to_string()))?;
        let entry = self.files.remove(&file_key).unwrap();
        let parent_path = parent_of(&file_key);
        if let Some(parent_key) = self.dir_key_for(&parent_path) {
            let parent = self.directories.get_mut(&parent_key).unwrap();
            parent.child_files.remove(&file_key);
            parent.modified_at = Utc::now();
        }
        Ok(entry)
    }

    pub fn get_file(&self, path: &str) -> Result<&FileEntry, NamespaceError> {
        let file_key = self
            .file_key_for(path)
            .ok_or_else(|| NamespaceError::FileNotFound(path.to_string()))?;
        Ok(&self.files[&file_key])
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", parent.trim_end_matches('/'))
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_ns() -> Namespace {
        let now = Utc::now();
        let mut directories = BTreeMap::new();
        directories.insert("/".to_string(), DirectoryEntry::new_root(now));
        Namespace::new(BTreeMap::new(), directories, "/".to_string())
    }

    #[test]
    fn canonicalize_resolves_dotdot() {
        let ns = empty_ns();
        assert_eq!(ns.canonicalize("/a/b/../c").unwrap(), "/a/c");
        assert_eq!(ns.canonicalize("/").unwrap(), "/");
    }

    #[test]
    fn make_and_remove_directory() {
        let mut ns = empty_ns();
        ns.make_directory("d", "/").unwrap();
        assert!(matches!(
            ns.make_directory("d", "/"),
            Err(NamespaceError::DirectoryAlreadyExists(_))
        ));

        ns.add_file(FileEntry {
            name: "x".into(),
            path: "/d/x".into(),
            size: 1,
            block_indices: vec![0],
        })
        .unwrap();

        assert!(matches!(
            ns.remove_directory("d", "/"),
            Err(NamespaceError::DirectoryNotEmpty(_))
        ));

        ns.remove_file("/d/x").unwrap();
        ns.remove_directory("d", "/").unwrap();
        assert!(ns.dir_key_for("/d").is_none());
    }

    #[test]
    fn empty_name_rejected_before_join() {
        let mut ns = empty_ns();
        assert!(matches!(
            ns.make_directory("", "/docs"),
            Err(NamespaceError::InvalidPath(_))
        ));
        assert!(matches!(
            ns.remove_directory("", "/"),
            Err(NamespaceError::InvalidPath(_))
        ));
    }

    #[test]
    fn non_root_directory_removable_when_empty() {
        let mut ns = empty_ns();
        ns.make_directory("d", "/").unwrap();
        ns.remove_directory("d", "/").unwrap();
        assert!(ns.dir_key_for("/d").is_none());
    }

    #[test]
    fn case_insensitive_lookup_case_preserving_storage() {
        let mut ns = empty_ns();
        ns.make_directory("Docs", "/").unwrap();
        assert!(ns.dir_key_for("/docs").is_some());
        let (dirs, _) = ns.list_directory_children("/DOCS").unwrap();
        assert!(dirs.is_empty());
        let stored = ns.dir_key_for("/docs").unwrap();
        assert_eq!(stored, "/Docs");
    }

    #[test]
    fn change_directory_updates_current() {
        let mut ns = empty_ns();
        ns.make_directory("d", "/").unwrap();
        ns.change_directory("/d").unwrap();
        assert_eq!(ns.current_directory, "/d");
        assert!(matches!(
            ns.change_directory("/missing"),
            Err(NamespaceError::DirectoryNotFound(_))
        ));
    }
}
