//! In-memory hierarchical filesystem.
//!
//! Exposes the subset of a distributed-filesystem client the harness needs:
//! directory creation with permissions/ownership, line-oriented appends,
//! recursive listing, open-for-read, and recursive delete. Paths are plain
//! `/`-separated strings; no symlinks, no concurrency control beyond the
//! shared lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Error, Debug, Clone)]
pub enum FsError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Failed to append: {0}")]
    Append(String),
}

/// Metadata for one file or directory.
#[derive(Debug, Clone)]
pub struct FileStatus {
    pub path: String,
    pub is_dir: bool,
    pub len: u64,
    pub owner: String,
    pub group: String,
    pub permissions: String,
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug)]
struct FsEntry {
    node: Node,
    owner: String,
    group: String,
    permissions: String,
}

impl FsEntry {
    fn new(node: Node, permissions: &str) -> Self {
        Self {
            node,
            owner: "localpipe".to_string(),
            group: "localpipe".to_string(),
            permissions: permissions.to_string(),
        }
    }
}

/// Client handle to the in-memory filesystem. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    // BTreeMap keeps listings in path order.
    entries: Arc<RwLock<BTreeMap<String, FsEntry>>>,
    fail_next_appends: Arc<AtomicUsize>,
}

impl LocalFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next N append operations.
    pub fn fail_appends(&self, count: usize) {
        self.fail_next_appends.store(count, Ordering::Relaxed);
    }

    /// Create a directory (and any missing parents) with the given
    /// permission string, e.g. "777".
    pub fn mkdir(&self, path: &str, perms: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let mut prefix = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            prefix.push('/');
            prefix.push_str(part);
            entries
                .entry(prefix.clone())
                .or_insert_with(|| FsEntry::new(Node::Dir, perms));
        }
        Ok(())
    }

    pub fn set_owner(&self, path: &str, user: &str, group: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        entry.owner = user.to_string();
        entry.group = group.to_string();
        Ok(())
    }

    pub fn set_permission(&self, path: &str, perms: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        entry.permissions = perms.to_string();
        Ok(())
    }

    /// Append one line (newline added) to a file, creating it if absent.
    /// Parent directories must already exist.
    pub fn append_line(&self, path: &str, line: &str) -> Result<()> {
        if self
            .fail_next_appends
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                if c > 0 { Some(c - 1) } else { None }
            })
            .is_ok()
        {
            return Err(FsError::Append("injected append failure".to_string()));
        }

        let parent = match path.rsplit_once('/') {
            Some(("", _)) => "/".to_string(),
            Some((dir, _)) => dir.to_string(),
            None => return Err(FsError::NotFound(path.to_string())),
        };

        let mut entries = self.entries.write();
        if parent != "/" {
            match entries.get(&parent) {
                Some(entry) if matches!(entry.node, Node::Dir) => {}
                Some(_) => return Err(FsError::NotADirectory(parent)),
                None => return Err(FsError::NotFound(parent)),
            }
        }

        let entry = entries
            .entry(path.to_string())
            .or_insert_with(|| FsEntry::new(Node::File(Vec::new()), "644"));
        match &mut entry.node {
            Node::File(data) => {
                data.extend_from_slice(line.as_bytes());
                data.push(b'\n');
                Ok(())
            }
            Node::Dir => Err(FsError::Append(format!("{path} is a directory"))),
        }
    }

    /// File statuses under `path`. With `recursive` set, all descendants;
    /// otherwise direct children only. Only files are returned.
    pub fn list_files(&self, path: &str, recursive: bool) -> Vec<FileStatus> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.entries
            .read()
            .iter()
            .filter(|(p, entry)| {
                matches!(entry.node, Node::File(_))
                    && p.starts_with(&prefix)
                    && (recursive || !p[prefix.len()..].contains('/'))
            })
            .map(|(p, entry)| FileStatus {
                path: p.clone(),
                is_dir: false,
                len: match &entry.node {
                    Node::File(data) => data.len() as u64,
                    Node::Dir => 0,
                },
                owner: entry.owner.clone(),
                group: entry.group.clone(),
                permissions: entry.permissions.clone(),
            })
            .collect()
    }

    /// Read a whole file.
    pub fn open(&self, path: &str) -> Result<Bytes> {
        let entries = self.entries.read();
        match entries.get(path) {
            Some(FsEntry {
                node: Node::File(data),
                ..
            }) => Ok(Bytes::copy_from_slice(data)),
            Some(_) => Err(FsError::NotAFile(path.to_string())),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    /// Status of one path.
    pub fn status(&self, path: &str) -> Result<FileStatus> {
        let entries = self.entries.read();
        let entry = entries
            .get(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        Ok(FileStatus {
            path: path.to_string(),
            is_dir: matches!(entry.node, Node::Dir),
            len: match &entry.node {
                Node::File(data) => data.len() as u64,
                Node::Dir => 0,
            },
            owner: entry.owner.clone(),
            group: entry.group.clone(),
            permissions: entry.permissions.clone(),
        })
    }

    /// Delete a path. With `recursive` set, descendants are removed too.
    /// Deleting a missing path is a no-op, matching the client it mimics.
    pub fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        let mut entries = self.entries.write();
        entries.remove(path);
        if recursive {
            let prefix = format!("{}/", path.trim_end_matches('/'));
            entries.retain(|p, _| !p.starts_with(&prefix));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkdir_creates_parents() {
        let fs = LocalFs::new();
        fs.mkdir("/tmp/hive/session", "777").unwrap();
        assert!(fs.status("/tmp").unwrap().is_dir);
        assert!(fs.status("/tmp/hive/session").unwrap().is_dir);
        assert_eq!(fs.status("/tmp/hive/session").unwrap().permissions, "777");
    }

    #[test]
    fn test_owner_and_permission() {
        let fs = LocalFs::new();
        fs.mkdir("/tmp/session", "755").unwrap();
        fs.set_owner("/tmp/session", "hive", "hadoop").unwrap();
        fs.set_permission("/tmp/session", "777").unwrap();

        let status = fs.status("/tmp/session").unwrap();
        assert_eq!(status.owner, "hive");
        assert_eq!(status.group, "hadoop");
        assert_eq!(status.permissions, "777");
    }

    #[test]
    fn test_append_and_open() {
        let fs = LocalFs::new();
        fs.mkdir("/out", "777").unwrap();
        fs.append_line("/out/part-0.txt", "first").unwrap();
        fs.append_line("/out/part-0.txt", "second").unwrap();

        let data = fs.open("/out/part-0.txt").unwrap();
        assert_eq!(&data[..], b"first\nsecond\n");
    }

    #[test]
    fn test_append_requires_parent_dir() {
        let fs = LocalFs::new();
        let result = fs.append_line("/missing/part-0.txt", "line");
        assert!(matches!(result, Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_list_files_recursive() {
        let fs = LocalFs::new();
        fs.mkdir("/out/nested", "777").unwrap();
        fs.append_line("/out/part-0.txt", "a").unwrap();
        fs.append_line("/out/nested/part-1.txt", "b").unwrap();

        let direct = fs.list_files("/out", false);
        assert_eq!(direct.len(), 1);

        let all = fs.list_files("/out", true);
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|f| !f.is_dir));
    }

    #[test]
    fn test_delete_recursive_and_idempotent() {
        let fs = LocalFs::new();
        fs.mkdir("/out", "777").unwrap();
        fs.append_line("/out/part-0.txt", "a").unwrap();

        fs.delete("/out", true).unwrap();
        assert!(fs.status("/out/part-0.txt").is_err());

        // Deleting again is a no-op.
        fs.delete("/out", true).unwrap();
    }

    #[test]
    fn test_injected_append_failure() {
        let fs = LocalFs::new();
        fs.mkdir("/out", "777").unwrap();
        fs.fail_appends(1);
        assert!(matches!(
            fs.append_line("/out/part-0.txt", "a"),
            Err(FsError::Append(_))
        ));
        fs.append_line("/out/part-0.txt", "a").unwrap();
    }
}
