//! Directory tree kept by [`DefaultBackend`](super::DefaultBackend).
//!
//! The whole tree is the superblock: it is serialized with postcard and
//! stored under the store's superblock key. File content lives in the store
//! under the file's inode number.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::error::{FsError, FsResult};
use crate::path;
use crate::types::{FileType, Stat, now_ms};

/// Inode of the root directory. Never used as a content key.
pub(crate) const ROOT_INO: u64 = 1;

/// Symlinks followed while resolving one path before giving up (`ELOOP`).
const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Node {
    File {
        stat: Stat,
        /// Key in the backing source, while the content has not been
        /// fetched into the store yet.
        backing: Option<String>,
    },
    Dir {
        stat: Stat,
        children: BTreeMap<String, Node>,
    },
    Symlink {
        stat: Stat,
        target: String,
    },
}

impl Node {
    pub(crate) fn stat(&self) -> &Stat {
        match self {
            Node::File { stat, .. } | Node::Dir { stat, .. } | Node::Symlink { stat, .. } => stat,
        }
    }

    fn stat_mut(&mut self) -> &mut Stat {
        match self {
            Node::File { stat, .. } | Node::Dir { stat, .. } | Node::Symlink { stat, .. } => stat,
        }
    }

    /// Inodes of every regular file at or below this node.
    pub(crate) fn file_inos(&self, out: &mut Vec<u64>) {
        match self {
            Node::File { stat, .. } => out.push(stat.ino),
            Node::Dir { children, .. } => children.values().for_each(|c| c.file_inos(out)),
            Node::Symlink { .. } => {}
        }
    }

    fn du(&self) -> u64 {
        match self {
            Node::File { stat, .. } => stat.size,
            Node::Dir { children, .. } => children.values().map(Node::du).sum(),
            Node::Symlink { .. } => 0,
        }
    }
}

/// Content location for a pending file write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileSlot {
    pub(crate) ino: u64,
    /// No file owned this inode before.
    pub(crate) fresh: bool,
}

/// A regular file found by [`Tree::file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileRef {
    pub path: String,
    pub ino: u64,
    pub backing: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Tree {
    next_ino: u64,
    root: Node,
}

impl Default for Tree {
    fn default() -> Self {
        Self {
            next_ino: ROOT_INO + 1,
            root: Node::Dir {
                stat: Stat::new(FileType::Directory, ROOT_INO, 0, 0o777),
                children: BTreeMap::new(),
            },
        }
    }
}

impl Tree {
    pub(crate) fn from_bytes(bytes: &[u8]) -> FsResult<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    pub(crate) fn to_bytes(&self) -> FsResult<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    fn alloc_ino(&mut self) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    fn walk(&self, parts: &[String]) -> Option<&Node> {
        let mut node = &self.root;
        for name in parts {
            match node {
                Node::Dir { children, .. } => node = children.get(name)?,
                _ => return None,
            }
        }
        Some(node)
    }

    fn node(&self, resolved: &str) -> Option<&Node> {
        let parts: Vec<String> = path::components(resolved).map(str::to_string).collect();
        self.walk(&parts)
    }

    /// Resolve symlinks in `path`. Every component but the last must exist;
    /// the returned path may name a missing entry.
    pub(crate) fn resolve(&self, path: &str, follow_last: bool) -> FsResult<String> {
        let mut pending: VecDeque<String> = path::components(path).map(str::to_string).collect();
        let mut resolved: Vec<String> = Vec::new();
        let mut hops = 0;

        while let Some(name) = pending.pop_front() {
            let last = pending.is_empty();
            let Some(Node::Dir { children, .. }) = self.walk(&resolved) else {
                return Err(FsError::not_a_directory(display(&resolved)));
            };
            match children.get(&name) {
                Some(Node::Symlink { target, .. }) if !last || follow_last => {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(FsError::TooManySymlinks(path.to_string()));
                    }
                    let mut next: VecDeque<String> =
                        path::components(target).map(str::to_string).collect();
                    next.extend(pending.drain(..));
                    pending = next;
                    resolved.clear();
                }
                Some(_) => resolved.push(name),
                None if last => resolved.push(name),
                None => {
                    resolved.push(name);
                    return Err(FsError::not_found(display(&resolved)));
                }
            }
        }
        Ok(display(&resolved))
    }

    fn lookup(&self, path: &str, follow: bool) -> FsResult<(String, &Node)> {
        let resolved = self.resolve(path, follow)?;
        let node = self
            .node(&resolved)
            .ok_or_else(|| FsError::not_found(path))?;
        Ok((resolved, node))
    }

    pub(crate) fn stat(&self, path: &str, follow: bool) -> FsResult<Stat> {
        self.lookup(path, follow).map(|(_, node)| node.stat().clone())
    }

    /// The regular file at `path`, following symlinks.
    pub(crate) fn file(&self, path: &str) -> FsResult<FileRef> {
        match self.lookup(path, true)? {
            (resolved, Node::File { stat, backing }) => Ok(FileRef {
                path: resolved,
                ino: stat.ino,
                backing: backing.clone(),
            }),
            _ => Err(FsError::is_a_directory(path)),
        }
    }

    pub(crate) fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        match self.lookup(path, true)? {
            (_, Node::Dir { children, .. }) => Ok(children.keys().cloned().collect()),
            _ => Err(FsError::not_a_directory(path)),
        }
    }

    pub(crate) fn readlink(&self, path: &str) -> FsResult<String> {
        match self.lookup(path, false)? {
            (_, Node::Symlink { target, .. }) => Ok(target.clone()),
            _ => Err(FsError::NotASymlink(path.to_string())),
        }
    }

    pub(crate) fn du(&self, path: &str) -> FsResult<u64> {
        self.lookup(path, true).map(|(_, node)| node.du())
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// The children of the directory at a resolved path, with the
    /// directory's own stat.
    fn dir_mut(&mut self, dir: &str) -> FsResult<(&mut Stat, &mut BTreeMap<String, Node>)> {
        let mut node = &mut self.root;
        for name in path::components(dir) {
            node = match node {
                Node::Dir { children, .. } => children
                    .get_mut(name)
                    .ok_or_else(|| FsError::not_found(dir))?,
                _ => return Err(FsError::not_a_directory(dir)),
            };
        }
        match node {
            Node::Dir { stat, children } => Ok((stat, children)),
            _ => Err(FsError::not_a_directory(dir)),
        }
    }

    /// Resolve `path` (not following a final symlink) into its parent
    /// directory and final name.
    fn entry_slot(&self, path: &str, follow_last: bool) -> FsResult<(String, String)> {
        let resolved = self.resolve(path, follow_last)?;
        match path::split_parent(&resolved) {
            Some((parent, name)) => Ok((parent.to_string(), name.to_string())),
            None => Err(FsError::permission_denied(path::ROOT)),
        }
    }

    pub(crate) fn mkdir(&mut self, path: &str, perm: u32) -> FsResult<()> {
        if path == path::ROOT {
            return Err(FsError::already_exists(path));
        }
        let (parent, name) = self.entry_slot(path, false)?;
        let ino = self.alloc_ino();
        let (dir_stat, children) = self.dir_mut(&parent)?;
        if children.contains_key(&name) {
            return Err(FsError::already_exists(path));
        }
        children.insert(
            name,
            Node::Dir {
                stat: Stat::new(FileType::Directory, ino, 0, perm),
                children: BTreeMap::new(),
            },
        );
        dir_stat.touch(0);
        Ok(())
    }

    pub(crate) fn rmdir(&mut self, path: &str) -> FsResult<()> {
        let (parent, name) = self.entry_slot(path, false)?;
        let (dir_stat, children) = self.dir_mut(&parent)?;
        match children.get(&name) {
            None => return Err(FsError::not_found(path)),
            Some(Node::Dir { children, .. }) if !children.is_empty() => {
                return Err(FsError::directory_not_empty(path));
            }
            Some(Node::Dir { .. }) => {}
            Some(_) => return Err(FsError::not_a_directory(path)),
        }
        children.remove(&name);
        dir_stat.touch(0);
        Ok(())
    }

    /// Where a write to `path` (following symlinks) stores its content:
    /// the existing file's inode, or a newly reserved one. Only the
    /// reservation changes the tree; the entry itself is created by
    /// [`commit_file`](Self::commit_file) once the content is stored.
    pub(crate) fn file_slot(&mut self, path: &str) -> FsResult<FileSlot> {
        let (parent, name) = self.entry_slot(path, true)?;
        let (_, children) = self.dir_mut(&parent)?;
        match children.get(&name) {
            Some(Node::File { stat, .. }) => {
                return Ok(FileSlot {
                    ino: stat.ino,
                    fresh: false,
                });
            }
            Some(_) => return Err(FsError::is_a_directory(path)),
            None => {}
        }
        Ok(self.reserve_slot())
    }

    /// A fresh inode for content that will replace whatever is at a path.
    pub(crate) fn reserve_slot(&mut self) -> FileSlot {
        FileSlot {
            ino: self.alloc_ino(),
            fresh: true,
        }
    }

    /// Point the regular file at `path` at content stored under `ino`,
    /// creating the entry if needed. Permissions are set at creation only.
    ///
    /// Returns the inode of a different file this replaced; its content is
    /// no longer reachable.
    pub(crate) fn commit_file(
        &mut self,
        path: &str,
        ino: u64,
        size: u64,
        perm: u32,
        backing: Option<String>,
    ) -> FsResult<Option<u64>> {
        let (parent, name) = self.entry_slot(path, true)?;
        let (dir_stat, children) = self.dir_mut(&parent)?;
        match children.get_mut(&name) {
            Some(Node::File { stat, backing: slot }) => {
                let replaced = (stat.ino != ino).then_some(stat.ino);
                stat.ino = ino;
                stat.touch(size);
                *slot = backing;
                Ok(replaced)
            }
            Some(_) => Err(FsError::is_a_directory(path)),
            None => {
                children.insert(
                    name,
                    Node::File {
                        stat: Stat::new(FileType::File, ino, size, perm),
                        backing,
                    },
                );
                dir_stat.touch(0);
                Ok(None)
            }
        }
    }

    /// Mark a backed file's content as fetched.
    pub(crate) fn clear_backing(&mut self, resolved: &str, size: u64) -> FsResult<()> {
        let (parent, name) = match path::split_parent(resolved) {
            Some((parent, name)) => (parent.to_string(), name.to_string()),
            None => return Err(FsError::is_a_directory(resolved)),
        };
        let (_, children) = self.dir_mut(&parent)?;
        match children.get_mut(&name) {
            Some(Node::File { stat, backing }) => {
                *backing = None;
                stat.size = size;
                Ok(())
            }
            Some(_) => Err(FsError::is_a_directory(resolved)),
            None => Err(FsError::not_found(resolved)),
        }
    }

    /// Remove a file or symlink and return the removed node.
    pub(crate) fn unlink(&mut self, path: &str) -> FsResult<Node> {
        let (parent, name) = self.entry_slot(path, false)?;
        let (dir_stat, children) = self.dir_mut(&parent)?;
        match children.get(&name) {
            None => return Err(FsError::not_found(path)),
            Some(Node::Dir { .. }) => return Err(FsError::is_a_directory(path)),
            Some(_) => {}
        }
        let node = children
            .remove(&name)
            .ok_or_else(|| FsError::not_found(path))?;
        dir_stat.touch(0);
        Ok(node)
    }

    /// Move `from` to `to`, replacing a compatible existing entry. Returns
    /// the node that was replaced, if any.
    pub(crate) fn rename(&mut self, from: &str, to: &str) -> FsResult<Option<Node>> {
        let (from_parent, from_name) = self.entry_slot(from, false)?;
        let (to_parent, to_name) = self.entry_slot(to, false)?;
        let from_resolved = path::join(&from_parent, &from_name);
        let to_resolved = path::join(&to_parent, &to_name);

        let moving = self
            .node(&from_resolved)
            .ok_or_else(|| FsError::not_found(from))?;
        if from_resolved == to_resolved {
            return Ok(None);
        }
        let moving_dir = matches!(moving, Node::Dir { .. });
        if moving_dir && path::is_within(&to_resolved, &from_resolved) {
            return Err(FsError::invalid_argument(format!(
                "cannot move {from} into itself"
            )));
        }
        match self.node(&to_parent) {
            Some(Node::Dir { .. }) => {}
            Some(_) => return Err(FsError::not_a_directory(to_parent)),
            None => return Err(FsError::not_found(to_parent)),
        }
        match self.node(&to_resolved) {
            None => {}
            Some(Node::Dir { children, .. }) => {
                if !moving_dir {
                    return Err(FsError::is_a_directory(to));
                }
                if !children.is_empty() {
                    return Err(FsError::directory_not_empty(to));
                }
            }
            Some(_) if moving_dir => return Err(FsError::not_a_directory(to)),
            Some(_) => {}
        }

        let (from_stat, children) = self.dir_mut(&from_parent)?;
        let mut node = children
            .remove(&from_name)
            .ok_or_else(|| FsError::not_found(from))?;
        from_stat.touch(0);
        node.stat_mut().ctime_ms = now_ms();
        let (to_stat, children) = self.dir_mut(&to_parent)?;
        let replaced = children.insert(to_name, node);
        to_stat.touch(0);
        Ok(replaced)
    }

    pub(crate) fn symlink(&mut self, target: &str, path: &str) -> FsResult<()> {
        let (parent, name) = self.entry_slot(path, false)?;
        let ino = self.alloc_ino();
        let (dir_stat, children) = self.dir_mut(&parent)?;
        if children.contains_key(&name) {
            return Err(FsError::already_exists(path));
        }
        children.insert(
            name,
            Node::Symlink {
                stat: Stat::new(FileType::Symlink, ino, target.len() as u64, 0o777),
                target: target.to_string(),
            },
        );
        dir_stat.touch(0);
        Ok(())
    }
}

fn display(parts: &[String]) -> String {
    if parts.is_empty() {
        path::ROOT.to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(tree: &mut Tree, path: &str, size: u64, perm: u32) -> FsResult<u64> {
        let slot = tree.file_slot(path)?;
        tree.commit_file(path, slot.ino, size, perm, None)?;
        Ok(slot.ino)
    }

    fn exists(tree: &Tree, path: &str) -> bool {
        tree.stat(path, true).is_ok()
    }

    fn tree_with(paths: &[&str]) -> Tree {
        let mut tree = Tree::default();
        for p in paths {
            if let Some(dir) = p.strip_suffix('/') {
                tree.mkdir(dir, 0o755).unwrap();
            } else {
                upsert(&mut tree, p, 3, 0o644).unwrap();
            }
        }
        tree
    }

    #[test]
    fn test_root_exists() {
        let tree = Tree::default();
        let stat = tree.stat("/", true).unwrap();
        assert!(stat.is_dir());
        assert_eq!(stat.ino, ROOT_INO);
        assert!(tree.readdir("/").unwrap().is_empty());
    }

    #[test]
    fn test_mkdir_requires_parent() {
        let mut tree = Tree::default();
        assert!(tree.mkdir("/a/b", 0o755).unwrap_err().is_not_found());
        tree.mkdir("/a", 0o755).unwrap();
        tree.mkdir("/a/b", 0o755).unwrap();
        assert!(matches!(
            tree.mkdir("/a", 0o755),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(tree.mkdir("/", 0o755), Err(FsError::AlreadyExists(_))));
    }

    #[test]
    fn test_file_under_file_is_not_a_directory() {
        let mut tree = tree_with(&["/f"]);
        assert!(matches!(
            upsert(&mut tree, "/f/g", 1, 0o644),
            Err(FsError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_overwrite_keeps_inode() {
        let mut tree = Tree::default();
        let first = upsert(&mut tree, "/f", 3, 0o644).unwrap();
        let second = upsert(&mut tree, "/f", 10, 0o600).unwrap();
        assert_eq!(first, second);
        let stat = tree.stat("/f", true).unwrap();
        assert_eq!(stat.size, 10);
        // Permissions are set at creation only.
        assert_eq!(stat.perm(), 0o644);

        let other = upsert(&mut tree, "/g", 1, 0o644).unwrap();
        assert_ne!(other, first);
    }

    #[test]
    fn test_slot_is_not_an_entry_until_committed() {
        let mut tree = Tree::default();
        let slot = tree.file_slot("/f").unwrap();
        assert!(slot.fresh);
        assert!(!exists(&tree, "/f"));

        assert_eq!(tree.commit_file("/f", slot.ino, 2, 0o644, None).unwrap(), None);
        let again = tree.file_slot("/f").unwrap();
        assert_eq!(again, FileSlot { ino: slot.ino, fresh: false });

        // Committing different content over the file reports the old inode.
        let other = tree.reserve_slot();
        let replaced = tree.commit_file("/f", other.ino, 4, 0o644, None).unwrap();
        assert_eq!(replaced, Some(slot.ino));
        assert_eq!(tree.stat("/f", true).unwrap().ino, other.ino);
    }

    #[test]
    fn test_rmdir() {
        let mut tree = tree_with(&["/d/", "/d/f"]);
        assert!(matches!(tree.rmdir("/d"), Err(FsError::DirectoryNotEmpty(_))));
        assert!(matches!(tree.rmdir("/d/f"), Err(FsError::NotADirectory(_))));
        tree.unlink("/d/f").unwrap();
        tree.rmdir("/d").unwrap();
        assert!(!exists(&tree, "/d"));
        assert!(tree.rmdir("/d").unwrap_err().is_not_found());
    }

    #[test]
    fn test_unlink_refuses_directories() {
        let mut tree = tree_with(&["/d/"]);
        assert!(matches!(tree.unlink("/d"), Err(FsError::IsADirectory(_))));
        assert!(tree.unlink("/missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_symlinks_resolve() {
        let mut tree = tree_with(&["/real/", "/real/f"]);
        tree.symlink("/real", "/link").unwrap();
        tree.symlink("/link/f", "/flink").unwrap();

        assert_eq!(tree.readdir("/link").unwrap(), vec!["f".to_string()]);
        assert_eq!(tree.file("/flink").unwrap().path, "/real/f");
        assert!(tree.stat("/flink", true).unwrap().is_file());
        assert!(tree.stat("/flink", false).unwrap().is_symlink());
        assert_eq!(tree.readlink("/link").unwrap(), "/real");
        assert!(matches!(
            tree.readlink("/real"),
            Err(FsError::NotASymlink(_))
        ));

        // Writing through a link lands on the target.
        upsert(&mut tree, "/link/g", 1, 0o644).unwrap();
        assert!(exists(&tree, "/real/g"));
    }

    #[test]
    fn test_symlink_loop_is_reported() {
        let mut tree = Tree::default();
        tree.symlink("/b", "/a").unwrap();
        tree.symlink("/a", "/b").unwrap();
        assert!(matches!(
            tree.stat("/a", true),
            Err(FsError::TooManySymlinks(_))
        ));
        // lstat does not follow.
        assert!(tree.stat("/a", false).unwrap().is_symlink());
    }

    #[test]
    fn test_dangling_symlink() {
        let mut tree = Tree::default();
        tree.symlink("/nowhere", "/dangling").unwrap();
        assert!(tree.stat("/dangling", true).unwrap_err().is_not_found());
        assert_eq!(tree.unlink("/dangling").unwrap().stat().kind, FileType::Symlink);
    }

    #[test]
    fn test_rename_file_replaces() {
        let mut tree = tree_with(&["/a", "/b"]);
        let a_ino = tree.stat("/a", true).unwrap().ino;
        let replaced = tree.rename("/a", "/b").unwrap();
        assert!(matches!(replaced, Some(Node::File { .. })));
        assert!(!exists(&tree, "/a"));
        assert_eq!(tree.stat("/b", true).unwrap().ino, a_ino);
    }

    #[test]
    fn test_rename_directory_rules() {
        let mut tree = tree_with(&["/d/", "/d/f", "/e/", "/full/", "/full/x", "/file"]);
        assert!(matches!(
            tree.rename("/d", "/d/sub"),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            tree.rename("/d", "/full"),
            Err(FsError::DirectoryNotEmpty(_))
        ));
        assert!(matches!(
            tree.rename("/d", "/file"),
            Err(FsError::NotADirectory(_))
        ));
        assert!(matches!(
            tree.rename("/file", "/e"),
            Err(FsError::IsADirectory(_))
        ));

        tree.rename("/d", "/e").unwrap();
        assert!(exists(&tree, "/e/f"));
        assert!(!exists(&tree, "/d"));
        assert!(tree.rename("/missing", "/x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_rename_onto_itself_is_noop() {
        let mut tree = tree_with(&["/a"]);
        assert!(tree.rename("/a", "/a").unwrap().is_none());
        assert!(exists(&tree, "/a"));
    }

    #[test]
    fn test_du() {
        let tree = tree_with(&["/d/", "/d/a", "/d/e/", "/d/e/b", "/c"]);
        assert_eq!(tree.du("/d").unwrap(), 6);
        assert_eq!(tree.du("/").unwrap(), 9);
        assert_eq!(tree.du("/c").unwrap(), 3);
    }

    #[test]
    fn test_superblock_bytes() {
        let mut tree = tree_with(&["/d/", "/d/f"]);
        tree.symlink("/d/f", "/l").unwrap();
        let decoded = Tree::from_bytes(&tree.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, tree);
        assert!(Tree::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_file_inos_collects_subtree() {
        let tree = tree_with(&["/d/", "/d/a", "/d/e/", "/d/e/b"]);
        let mut inos = Vec::new();
        tree.node("/d").unwrap().file_inos(&mut inos);
        assert_eq!(inos.len(), 2);
    }
}
