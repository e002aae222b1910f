//! In-memory filesystem for the test suite.
//!
//! Models directories and files as a path map with the same visible
//! semantics as `RealFilesystem`, plus two testing affordances:
//! - a settable total-space budget so `free_bytes` can be driven
//! - per-operation fault injection (`fail_next`) for error paths
//!
//! Cloning creates a new handle to the same underlying state.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::filesystem::{Filesystem, FsError};

const DEFAULT_TOTAL_BYTES: u64 = 100 * 1024 * 1024 * 1024;

/// Operations that can have faults injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Mkdir,
    Rename,
    UnlinkFile,
    RmdirRecursive,
    Reflink,
    WriteFileAtomic,
    FsyncDir,
    FreeBytes,
    ListDir,
}

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug)]
struct State {
    nodes: BTreeMap<PathBuf, Node>,
    total_bytes: u64,
    faults: HashMap<MockOp, VecDeque<FsError>>,
}

impl State {
    fn used_bytes(&self) -> u64 {
        self.nodes
            .values()
            .map(|n| match n {
                Node::File(data) => data.len() as u64,
                Node::Dir => 0,
            })
            .sum()
    }

    fn take_fault(&mut self, op: MockOp) -> Option<FsError> {
        self.faults.get_mut(&op).and_then(|q| q.pop_front())
    }
}

/// In-memory mock filesystem.
#[derive(Debug, Clone)]
pub struct MockFilesystem {
    state: Arc<Mutex<State>>,
}

impl Default for MockFilesystem {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(PathBuf::from("/"), Node::Dir);
        Self {
            state: Arc::new(Mutex::new(State {
                nodes,
                total_bytes: DEFAULT_TOTAL_BYTES,
                faults: HashMap::new(),
            })),
        }
    }
}

impl MockFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for the next call to `op`. Multiple injections for
    /// the same operation queue up in order.
    pub fn fail_next(&self, op: MockOp, err: FsError) {
        self.state
            .lock()
            .unwrap()
            .faults
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Set the total space of the modelled volume.
    pub fn set_total_bytes(&self, total: u64) {
        self.state.lock().unwrap().total_bytes = total;
    }

    /// Set the free space by adjusting the total around current usage.
    pub fn set_free_bytes(&self, free: u64) {
        let mut state = self.state.lock().unwrap();
        state.total_bytes = state.used_bytes() + free;
    }

    /// Add a file directly, creating parent directories (test setup).
    pub fn add_file(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        let path = path.into();
        let mut state = self.state.lock().unwrap();
        add_parents(&mut state.nodes, &path);
        state.nodes.insert(path, Node::File(data));
    }

    /// Add a directory directly, creating parents (test setup).
    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut state = self.state.lock().unwrap();
        add_parents(&mut state.nodes, &path);
        state.nodes.insert(path, Node::Dir);
    }

    /// Content of a file, if present.
    pub fn get_file(&self, path: &Path) -> Option<Vec<u8>> {
        match self.state.lock().unwrap().nodes.get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Number of entries (files + dirs) under a directory, recursively.
    pub fn count_under(&self, dir: &Path) -> usize {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .keys()
            .filter(|p| p.starts_with(dir) && p.as_path() != dir)
            .count()
    }
}

fn add_parents(nodes: &mut BTreeMap<PathBuf, Node>, path: &Path) {
    let mut ancestors: Vec<PathBuf> = path.ancestors().skip(1).map(Path::to_path_buf).collect();
    ancestors.reverse();
    for ancestor in ancestors {
        nodes.entry(ancestor).or_insert(Node::Dir);
    }
}

impl Filesystem for MockFilesystem {
    fn exists(&self, path: &Path) -> bool {
        self.state.lock().unwrap().nodes.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.state.lock().unwrap().nodes.get(path), Some(Node::Dir))
    }

    fn file_size(&self, path: &Path) -> Result<u64, FsError> {
        match self.state.lock().unwrap().nodes.get(path) {
            Some(Node::File(data)) => Ok(data.len() as u64),
            _ => Err(FsError::NotFound(path.to_path_buf())),
        }
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>, FsError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_fault(MockOp::ListDir) {
            return Err(err);
        }
        match state.nodes.get(path) {
            Some(Node::Dir) => {}
            _ => return Err(FsError::NotFound(path.to_path_buf())),
        }
        let mut names: Vec<String> = state
            .nodes
            .keys()
            .filter(|p| p.parent() == Some(path))
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    fn walk_files(&self, path: &Path) -> Result<Vec<PathBuf>, FsError> {
        let state = self.state.lock().unwrap();
        match state.nodes.get(path) {
            Some(Node::Dir) => {}
            _ => return Err(FsError::NotFound(path.to_path_buf())),
        }
        let mut files: Vec<PathBuf> = state
            .nodes
            .iter()
            .filter(|(p, node)| p.starts_with(path) && matches!(node, Node::File(_)))
            .map(|(p, _)| p.clone())
            .collect();
        files.sort();
        Ok(files)
    }

    fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_fault(MockOp::Mkdir) {
            return Err(err);
        }
        if state.nodes.contains_key(path) {
            return Err(FsError::Exists(path.to_path_buf()));
        }
        match path.parent() {
            Some(parent) if matches!(state.nodes.get(parent), Some(Node::Dir)) => {}
            _ => return Err(FsError::NotFound(path.to_path_buf())),
        }
        state.nodes.insert(path.to_path_buf(), Node::Dir);
        Ok(())
    }

    fn mkdir_all(&self, path: &Path) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if let Some(Node::File(_)) = state.nodes.get(path) {
            return Err(FsError::Exists(path.to_path_buf()));
        }
        add_parents(&mut state.nodes, path);
        state.nodes.insert(path.to_path_buf(), Node::Dir);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_fault(MockOp::Rename) {
            return Err(err);
        }
        let moved: Vec<(PathBuf, Node)> = state
            .nodes
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect();
        if moved.is_empty() {
            return Err(FsError::NotFound(from.to_path_buf()));
        }
        for (p, _) in &moved {
            state.nodes.remove(p);
        }
        for (p, node) in moved {
            let rel = p.strip_prefix(from).expect("prefix checked");
            let new_path = if rel.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rel)
            };
            state.nodes.insert(new_path, node);
        }
        Ok(())
    }

    fn unlink_file(&self, path: &Path) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_fault(MockOp::UnlinkFile) {
            return Err(err);
        }
        match state.nodes.get(path) {
            Some(Node::File(_)) => {
                state.nodes.remove(path);
                Ok(())
            }
            _ => Err(FsError::NotFound(path.to_path_buf())),
        }
    }

    fn rmdir_recursive(&self, path: &Path) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_fault(MockOp::RmdirRecursive) {
            return Err(err);
        }
        let doomed: Vec<PathBuf> = state
            .nodes
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in doomed {
            state.nodes.remove(&p);
        }
        Ok(())
    }

    fn reflink_copy(&self, src: &Path, dst: &Path) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_fault(MockOp::Reflink) {
            return Err(err);
        }
        let data = match state.nodes.get(src) {
            Some(Node::File(data)) => data.clone(),
            _ => return Err(FsError::NotFound(src.to_path_buf())),
        };
        if state.nodes.contains_key(dst) {
            return Err(FsError::Exists(dst.to_path_buf()));
        }
        match dst.parent() {
            Some(parent) if matches!(state.nodes.get(parent), Some(Node::Dir)) => {}
            _ => return Err(FsError::NotFound(dst.to_path_buf())),
        }
        state.nodes.insert(dst.to_path_buf(), Node::File(data));
        Ok(())
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        match self.state.lock().unwrap().nodes.get(path) {
            Some(Node::File(data)) => String::from_utf8(data.clone()).map_err(|e| {
                FsError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid utf8 in {}: {}", path.display(), e),
                ))
            }),
            _ => Err(FsError::NotFound(path.to_path_buf())),
        }
    }

    fn write_file_atomic(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_fault(MockOp::WriteFileAtomic) {
            return Err(err);
        }
        match path.parent() {
            Some(parent) if matches!(state.nodes.get(parent), Some(Node::Dir)) => {}
            _ => return Err(FsError::NotFound(path.to_path_buf())),
        }
        state
            .nodes
            .insert(path.to_path_buf(), Node::File(data.to_vec()));
        Ok(())
    }

    fn fsync_dir(&self, path: &Path) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_fault(MockOp::FsyncDir) {
            return Err(err);
        }
        match state.nodes.get(path) {
            Some(Node::Dir) => Ok(()),
            _ => Err(FsError::NotFound(path.to_path_buf())),
        }
    }

    fn free_bytes(&self, _path: &Path) -> Result<u64, FsError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_fault(MockOp::FreeBytes) {
            return Err(err);
        }
        let used = state.used_bytes();
        Ok(state.total_bytes.saturating_sub(used))
    }

    fn total_bytes(&self, _path: &Path) -> Result<u64, FsError> {
        Ok(self.state.lock().unwrap().total_bytes)
    }
}
