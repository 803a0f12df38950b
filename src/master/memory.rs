//! In-process namespace: a node tree behind an async lock.
//!
//! Serves as the embedded/SDK master and as the fixture for every test that
//! needs a namespace. Ids are allocated from a counter, the root is id 1.

use super::{FileKind, FileMetadata, MasterClient};
use crate::error::{Result, TfsError};
use crate::uri::TfsUri;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

const ROOT_ID: i64 = 1;

struct Node {
    meta: FileMetadata,
    parent: Option<i64>,
    children: HashMap<String, i64>,
}

impl Node {
    fn directory(file_id: i64, path: String, parent: Option<i64>) -> Node {
        Node {
            meta: FileMetadata {
                file_id,
                path,
                kind: FileKind::Directory,
                length: 0,
                block_size: 0,
                complete: true,
                in_memory: false,
                pinned: false,
                block_lens: Vec::new(),
            },
            parent,
            children: HashMap::new(),
        }
    }

    fn file(file_id: i64, path: String, parent: i64, block_size: u64) -> Node {
        Node {
            meta: FileMetadata {
                file_id,
                path,
                kind: FileKind::File,
                length: 0,
                block_size,
                complete: false,
                in_memory: false,
                pinned: false,
                block_lens: Vec::new(),
            },
            parent: Some(parent),
            children: HashMap::new(),
        }
    }
}

struct Namespace {
    next_id: i64,
    nodes: HashMap<i64, Node>,
}

impl Namespace {
    fn alloc(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn lookup(&self, uri: &TfsUri) -> Option<i64> {
        let mut cur = ROOT_ID;
        for comp in uri.components() {
            cur = *self.nodes.get(&cur)?.children.get(comp)?;
        }
        Some(cur)
    }

    /// Walk `comps`, creating missing directories, and return the final dir id.
    /// A file along the way is a structural error.
    fn ensure_dirs<'a>(
        &mut self,
        comps: impl Iterator<Item = &'a str>,
        create_missing: bool,
    ) -> Result<Option<i64>> {
        let mut cur = ROOT_ID;
        let mut cur_path = String::new();
        for comp in comps {
            cur_path.push('/');
            cur_path.push_str(comp);
            let existing = self.nodes.get(&cur).and_then(|n| n.children.get(comp));
            match existing {
                Some(&child) => {
                    if self.nodes[&child].meta.is_file() {
                        return Err(TfsError::invalid_argument(format!(
                            "not a directory: {cur_path}"
                        )));
                    }
                    cur = child;
                }
                None if create_missing => {
                    let id = self.alloc();
                    self.nodes
                        .insert(id, Node::directory(id, cur_path.clone(), Some(cur)));
                    self.nodes
                        .get_mut(&cur)
                        .and_then(|n| n.children.insert(comp.to_string(), id));
                    cur = id;
                }
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    fn unlink(&mut self, id: i64) {
        if let Some(parent) = self.nodes.get(&id).and_then(|n| n.parent)
            && let Some(p) = self.nodes.get_mut(&parent)
        {
            p.children.retain(|_, child| *child != id);
        }
        self.nodes.remove(&id);
    }
}

pub struct InMemoryMaster {
    state: RwLock<Namespace>,
}

impl InMemoryMaster {
    pub fn new() -> InMemoryMaster {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID, Node::directory(ROOT_ID, "/".to_string(), None));
        InMemoryMaster {
            state: RwLock::new(Namespace {
                next_id: ROOT_ID + 1,
                nodes,
            }),
        }
    }
}

impl Default for InMemoryMaster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MasterClient for InMemoryMaster {
    async fn resolve(&self, uri: &TfsUri) -> Result<i64> {
        let ns = self.state.read().await;
        ns.lookup(uri)
            .ok_or_else(|| TfsError::not_found(uri.path().to_string()))
    }

    async fn get_metadata(&self, file_id: i64) -> Result<FileMetadata> {
        let ns = self.state.read().await;
        ns.nodes
            .get(&file_id)
            .map(|n| n.meta.clone())
            .ok_or_else(|| TfsError::not_found(format!("file id {file_id}")))
    }

    async fn list(&self, file_id: i64) -> Result<Vec<FileMetadata>> {
        let ns = self.state.read().await;
        let node = ns
            .nodes
            .get(&file_id)
            .ok_or_else(|| TfsError::not_found(format!("file id {file_id}")))?;
        if node.meta.is_file() {
            return Ok(vec![node.meta.clone()]);
        }
        let mut out: Vec<FileMetadata> = node
            .children
            .values()
            .filter_map(|id| ns.nodes.get(id))
            .map(|n| n.meta.clone())
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn create_file(&self, uri: &TfsUri, block_size: u64) -> Result<i64> {
        if uri.is_root() {
            return Err(TfsError::invalid_argument("cannot create a file at /"));
        }
        if block_size == 0 {
            return Err(TfsError::invalid_argument("block size must be positive"));
        }
        let mut ns = self.state.write().await;
        let comps: Vec<&str> = uri.components().collect();
        let (name, parents) = comps.split_last().expect("non-root uri has components");
        let dir = ns
            .ensure_dirs(parents.iter().copied(), true)?
            .expect("create_missing always yields a directory");
        if ns.nodes[&dir].children.contains_key(*name) {
            return Err(TfsError::already_exists(uri.path().to_string()));
        }
        let id = ns.alloc();
        ns.nodes
            .insert(id, Node::file(id, uri.path().to_string(), dir, block_size));
        ns.nodes
            .get_mut(&dir)
            .and_then(|n| n.children.insert(name.to_string(), id));
        Ok(id)
    }

    async fn mkdir(&self, uri: &TfsUri, recursive: bool) -> Result<bool> {
        if uri.is_root() {
            return Ok(false);
        }
        let mut ns = self.state.write().await;
        let comps: Vec<&str> = uri.components().collect();
        let (name, parents) = comps.split_last().expect("non-root uri has components");
        let Some(dir) = ns.ensure_dirs(parents.iter().copied(), recursive)? else {
            return Ok(false);
        };
        match ns.nodes[&dir].children.get(*name) {
            Some(_) => Ok(false),
            None => {
                let id = ns.alloc();
                ns.nodes
                    .insert(id, Node::directory(id, uri.path().to_string(), Some(dir)));
                ns.nodes
                    .get_mut(&dir)
                    .and_then(|n| n.children.insert(name.to_string(), id));
                Ok(true)
            }
        }
    }

    async fn delete(&self, file_id: i64, recursive: bool) -> Result<bool> {
        if file_id == ROOT_ID {
            return Err(TfsError::permission_denied("cannot delete /"));
        }
        let mut ns = self.state.write().await;
        let Some(node) = ns.nodes.get(&file_id) else {
            return Ok(false);
        };
        if node.meta.is_directory() && !node.children.is_empty() && !recursive {
            return Ok(false);
        }
        // Collect the subtree first; ids are stable while the lock is held.
        let mut doomed = vec![file_id];
        let mut stack = vec![file_id];
        while let Some(id) = stack.pop() {
            if let Some(n) = ns.nodes.get(&id) {
                for &child in n.children.values() {
                    doomed.push(child);
                    stack.push(child);
                }
            }
        }
        for id in doomed.into_iter().rev() {
            ns.unlink(id);
        }
        Ok(true)
    }

    async fn set_pinned(&self, file_id: i64, pinned: bool) -> Result<()> {
        let mut ns = self.state.write().await;
        let node = ns
            .nodes
            .get_mut(&file_id)
            .ok_or_else(|| TfsError::not_found(format!("file id {file_id}")))?;
        node.meta.pinned = pinned;
        Ok(())
    }

    async fn commit_block(&self, file_id: i64, index: u32, len: u64) -> Result<()> {
        let mut ns = self.state.write().await;
        let node = ns
            .nodes
            .get_mut(&file_id)
            .ok_or_else(|| TfsError::not_found(format!("file id {file_id}")))?;
        if node.meta.is_directory() {
            return Err(TfsError::invalid_argument(format!(
                "is a directory: {}",
                node.meta.path
            )));
        }
        if node.meta.complete {
            return Err(TfsError::invalid_argument(format!(
                "file already complete: {}",
                node.meta.path
            )));
        }
        if len > node.meta.block_size {
            return Err(TfsError::invalid_argument(format!(
                "commit of {len} bytes exceeds block size {}",
                node.meta.block_size
            )));
        }
        let slot = index as usize;
        if node.meta.block_lens.len() <= slot {
            node.meta.block_lens.resize(slot + 1, 0);
        }
        // Flushes rewrite a growing prefix of the same block.
        node.meta.block_lens[slot] = node.meta.block_lens[slot].max(len);
        let end = node.meta.layout().block_start(index) + len;
        node.meta.length = node.meta.length.max(end);
        Ok(())
    }

    async fn complete_file(&self, file_id: i64) -> Result<()> {
        let mut ns = self.state.write().await;
        let node = ns
            .nodes
            .get_mut(&file_id)
            .ok_or_else(|| TfsError::not_found(format!("file id {file_id}")))?;
        if node.meta.is_directory() {
            return Err(TfsError::invalid_argument(format!(
                "is a directory: {}",
                node.meta.path
            )));
        }
        if node.meta.complete {
            return Err(TfsError::invalid_argument(format!(
                "file already complete: {}",
                node.meta.path
            )));
        }
        node.meta.complete = true;
        let covered = node.meta.layout().block_count(node.meta.length) as usize;
        node.meta.in_memory =
            node.meta.block_lens.len() == covered && node.meta.block_lens.iter().all(|&l| l > 0);
        Ok(())
    }

    async fn abort_file(&self, file_id: i64) -> Result<()> {
        let mut ns = self.state.write().await;
        let node = ns
            .nodes
            .get(&file_id)
            .ok_or_else(|| TfsError::not_found(format!("file id {file_id}")))?;
        if node.meta.is_directory() {
            return Err(TfsError::invalid_argument(format!(
                "is a directory: {}",
                node.meta.path
            )));
        }
        if node.meta.complete {
            return Err(TfsError::invalid_argument(format!(
                "cannot abort complete file: {}",
                node.meta.path
            )));
        }
        ns.unlink(file_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> TfsUri {
        TfsUri::parse(s).unwrap()
    }

    #[tokio::test]
    async fn create_resolve_metadata() {
        let m = InMemoryMaster::new();
        let id = m.create_file(&uri("/a/b/f.dat"), 64).await.unwrap();
        assert_eq!(m.resolve(&uri("/a/b/f.dat")).await.unwrap(), id);

        let meta = m.get_metadata(id).await.unwrap();
        assert!(meta.is_file());
        assert!(!meta.complete);
        assert_eq!(meta.length, 0);
        assert_eq!(meta.block_size, 64);
        assert_eq!(meta.path, "/a/b/f.dat");

        // Parents were created as directories.
        let parent = m.resolve(&uri("/a/b")).await.unwrap();
        assert!(m.get_metadata(parent).await.unwrap().is_directory());
    }

    #[tokio::test]
    async fn create_guards() {
        let m = InMemoryMaster::new();
        m.create_file(&uri("/f"), 64).await.unwrap();
        assert!(
            m.create_file(&uri("/f"), 64)
                .await
                .unwrap_err()
                .is_already_exists()
        );
        // A file in the parent chain is structural misuse.
        let err = m.create_file(&uri("/f/child"), 64).await.unwrap_err();
        assert!(matches!(err, TfsError::InvalidArgument(_)));
        assert!(m.create_file(&uri("/"), 64).await.is_err());
        assert!(m.resolve(&uri("/missing")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn mkdir_booleans() {
        let m = InMemoryMaster::new();
        assert!(m.mkdir(&uri("/d"), false).await.unwrap());
        assert!(!m.mkdir(&uri("/d"), false).await.unwrap());
        // Missing parent without recursion is a no-op, with recursion it works.
        assert!(!m.mkdir(&uri("/x/y/z"), false).await.unwrap());
        assert!(m.mkdir(&uri("/x/y/z"), true).await.unwrap());
        assert!(!m.mkdir(&uri("/"), true).await.unwrap());
    }

    #[tokio::test]
    async fn delete_semantics() {
        let m = InMemoryMaster::new();
        m.mkdir(&uri("/d/e"), true).await.unwrap();
        let d = m.resolve(&uri("/d")).await.unwrap();
        // Non-empty, non-recursive: nothing to do.
        assert!(!m.delete(d, false).await.unwrap());
        assert!(m.delete(d, true).await.unwrap());
        assert!(m.resolve(&uri("/d")).await.unwrap_err().is_not_found());
        // Absent id: nothing to do.
        assert!(!m.delete(d, true).await.unwrap());
        // The root is off limits.
        assert!(matches!(
            m.delete(ROOT_ID, true).await.unwrap_err(),
            TfsError::PermissionDenied(_)
        ));
    }

    #[tokio::test]
    async fn commit_complete_lifecycle() {
        let m = InMemoryMaster::new();
        let id = m.create_file(&uri("/f"), 100).await.unwrap();

        m.commit_block(id, 0, 100).await.unwrap();
        m.commit_block(id, 1, 40).await.unwrap();
        let meta = m.get_metadata(id).await.unwrap();
        assert_eq!(meta.length, 140);
        assert_eq!(meta.block_lens, vec![100, 40]);
        assert_eq!(meta.block_count(), 2);

        // A later flush of the same block grows, never shrinks.
        m.commit_block(id, 1, 20).await.unwrap();
        assert_eq!(m.get_metadata(id).await.unwrap().committed_len(1), 40);

        assert!(m.commit_block(id, 0, 101).await.is_err());

        m.complete_file(id).await.unwrap();
        let meta = m.get_metadata(id).await.unwrap();
        assert!(meta.complete);
        assert!(meta.in_memory);
        assert!(m.complete_file(id).await.is_err());
        assert!(m.commit_block(id, 2, 10).await.is_err());
    }

    #[tokio::test]
    async fn sparse_file_is_not_in_memory() {
        let m = InMemoryMaster::new();
        let id = m.create_file(&uri("/sparse"), 100).await.unwrap();
        // Only the third block ever gets bytes.
        m.commit_block(id, 2, 50).await.unwrap();
        m.complete_file(id).await.unwrap();
        let meta = m.get_metadata(id).await.unwrap();
        assert_eq!(meta.length, 250);
        assert!(!meta.in_memory);
        assert_eq!(meta.committed_len(0), 0);
        assert_eq!(meta.committed_len(2), 50);
    }

    #[tokio::test]
    async fn abort_drops_the_file() {
        let m = InMemoryMaster::new();
        let id = m.create_file(&uri("/tmp/w"), 64).await.unwrap();
        m.commit_block(id, 0, 10).await.unwrap();
        m.abort_file(id).await.unwrap();
        assert!(m.resolve(&uri("/tmp/w")).await.unwrap_err().is_not_found());
        assert!(m.get_metadata(id).await.unwrap_err().is_not_found());

        let id = m.create_file(&uri("/tmp/done"), 64).await.unwrap();
        m.complete_file(id).await.unwrap();
        assert!(m.abort_file(id).await.is_err());
    }

    #[tokio::test]
    async fn pin_and_list() {
        let m = InMemoryMaster::new();
        let id = m.create_file(&uri("/dir/a"), 64).await.unwrap();
        m.create_file(&uri("/dir/b"), 64).await.unwrap();
        m.set_pinned(id, true).await.unwrap();
        assert!(m.get_metadata(id).await.unwrap().pinned);

        let dir = m.resolve(&uri("/dir")).await.unwrap();
        let listing = m.list(dir).await.unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].path, "/dir/a");
        assert_eq!(listing[1].path, "/dir/b");

        // A file lists itself.
        let own = m.list(id).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].file_id, id);
    }
}
