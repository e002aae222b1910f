//! The filesystem trait and its OS-backed implementation.
//!
//! Error kinds form a closed set so callers can match on what actually
//! matters to them: the snapshot manager treats `NotFound`/`Exists` as
//! expected recovery-path outcomes, `Unsupported` is fatal at startup, and
//! everything else surfaces as `Io`.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("already exists: {0}")]
    Exists(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("no space left on device: {0}")]
    NoSpace(PathBuf),

    #[error("operation not supported by filesystem: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// True for the `NotFound` kind; recovery paths tolerate missing entries.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

/// Map an `io::Error` into the closed kind set, attaching the path.
fn map_io(err: io::Error, path: &Path) -> FsError {
    if let Some(code) = err.raw_os_error() {
        match code {
            libc::ENOENT | libc::ENOTDIR => return FsError::NotFound(path.to_path_buf()),
            libc::EEXIST => return FsError::Exists(path.to_path_buf()),
            libc::EACCES | libc::EPERM => return FsError::PermissionDenied(path.to_path_buf()),
            libc::ENOSPC => return FsError::NoSpace(path.to_path_buf()),
            _ => {}
        }
    }
    match err.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
        io::ErrorKind::AlreadyExists => FsError::Exists(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.to_path_buf()),
        _ => FsError::Io(err),
    }
}

/// Trait for filesystem operations. Inputs are absolute paths.
pub trait Filesystem: Send + Sync {
    /// True iff a directory entry exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// True iff `path` exists and is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Size of a regular file in bytes.
    fn file_size(&self, path: &Path) -> Result<u64, FsError>;

    /// Names of the immediate children of `path`, sorted.
    fn list_dir(&self, path: &Path) -> Result<Vec<String>, FsError>;

    /// All regular files under `path` (recursive), sorted by path.
    fn walk_files(&self, path: &Path) -> Result<Vec<PathBuf>, FsError>;

    /// Create `path`. Fails `Exists` if present, `NotFound` if parent missing.
    fn mkdir(&self, path: &Path) -> Result<(), FsError>;

    /// Create `path` and any missing parents.
    fn mkdir_all(&self, path: &Path) -> Result<(), FsError>;

    /// Atomically rename `from` to `to` within the same filesystem.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// Remove a regular file.
    fn unlink_file(&self, path: &Path) -> Result<(), FsError>;

    /// Remove a directory and its contents. Succeeds silently if `path` is
    /// already gone; tolerant of partial prior removals.
    fn rmdir_recursive(&self, path: &Path) -> Result<(), FsError>;

    /// Produce a copy-on-write clone of `src` at `dst`. Fails `Unsupported`
    /// if the filesystem cannot reflink; never degrades to a full copy.
    fn reflink_copy(&self, src: &Path, dst: &Path) -> Result<(), FsError>;

    /// Read a file as UTF-8 text.
    fn read_to_string(&self, path: &Path) -> Result<String, FsError>;

    /// Write `data` to `path.tmp`, fsync the file, rename it over `path`,
    /// and fsync the parent directory.
    fn write_file_atomic(&self, path: &Path, data: &[u8]) -> Result<(), FsError>;

    /// Durably persist the entries of a directory.
    fn fsync_dir(&self, path: &Path) -> Result<(), FsError>;

    /// Free bytes on the filesystem containing `path`.
    fn free_bytes(&self, path: &Path) -> Result<u64, FsError>;

    /// Total bytes of the filesystem containing `path`.
    fn total_bytes(&self, path: &Path) -> Result<u64, FsError>;
}

/// Real filesystem implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFilesystem;

impl RealFilesystem {
    fn statvfs(&self, path: &Path) -> Result<libc::statvfs, FsError> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| FsError::NotFound(path.to_path_buf()))?;
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        // XFS lazy superblock counters aggregate per-CPU free-block counts on
        // demand; after unlink the cached aggregate is stale. The first call
        // triggers aggregation, the second reads the accurate result.
        unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
        if rc != 0 {
            return Err(map_io(io::Error::last_os_error(), path));
        }
        Ok(st)
    }

    fn collect_files(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), FsError> {
        for entry in fs::read_dir(dir).map_err(|e| map_io(e, dir))? {
            let entry = entry.map_err(|e| map_io(e, dir))?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_files(&path, out)?;
            } else if path.is_file() {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl Filesystem for RealFilesystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn file_size(&self, path: &Path) -> Result<u64, FsError> {
        let meta = fs::metadata(path).map_err(|e| map_io(e, path))?;
        Ok(meta.len())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>, FsError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| map_io(e, path))? {
            let entry = entry.map_err(|e| map_io(e, path))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn walk_files(&self, path: &Path) -> Result<Vec<PathBuf>, FsError> {
        let mut files = Vec::new();
        self.collect_files(path, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir(path).map_err(|e| map_io(e, path))
    }

    fn mkdir_all(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path).map_err(|e| map_io(e, path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        fs::rename(from, to).map_err(|e| map_io(e, from))
    }

    fn unlink_file(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_file(path).map_err(|e| map_io(e, path))
    }

    fn rmdir_recursive(&self, path: &Path) -> Result<(), FsError> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(e, path)),
        }
    }

    #[cfg(target_os = "linux")]
    fn reflink_copy(&self, src: &Path, dst: &Path) -> Result<(), FsError> {
        use std::os::unix::io::AsRawFd;

        let src_file = File::open(src).map_err(|e| map_io(e, src))?;
        let dst_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dst)
            .map_err(|e| map_io(e, dst))?;

        let rc = unsafe { libc::ioctl(dst_file.as_raw_fd(), libc::FICLONE, src_file.as_raw_fd()) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            drop(dst_file);
            let _ = fs::remove_file(dst);
            return match err.raw_os_error() {
                Some(libc::EOPNOTSUPP) | Some(libc::EXDEV) | Some(libc::EINVAL) => {
                    Err(FsError::Unsupported(format!(
                        "reflink from {} to {}: {}",
                        src.display(),
                        dst.display(),
                        err
                    )))
                }
                _ => Err(map_io(err, dst)),
            };
        }
        dst_file.sync_all().map_err(|e| map_io(e, dst))?;
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn reflink_copy(&self, src: &Path, dst: &Path) -> Result<(), FsError> {
        Err(FsError::Unsupported(format!(
            "reflink from {} to {}: only supported on Linux",
            src.display(),
            dst.display()
        )))
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        fs::read_to_string(path).map_err(|e| map_io(e, path))
    }

    fn write_file_atomic(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))?;
        let parent = path
            .parent()
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))?;
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = parent.join(tmp_name);

        let mut tmp = File::create(&tmp_path).map_err(|e| map_io(e, &tmp_path))?;
        tmp.write_all(data).map_err(|e| map_io(e, &tmp_path))?;
        tmp.sync_all().map_err(|e| map_io(e, &tmp_path))?;
        drop(tmp);

        fs::rename(&tmp_path, path).map_err(|e| map_io(e, path))?;
        self.fsync_dir(parent)
    }

    fn fsync_dir(&self, path: &Path) -> Result<(), FsError> {
        let dir = File::open(path).map_err(|e| map_io(e, path))?;
        dir.sync_all().map_err(|e| map_io(e, path))
    }

    fn free_bytes(&self, path: &Path) -> Result<u64, FsError> {
        let st = self.statvfs(path)?;
        Ok(st.f_bavail as u64 * st.f_frsize as u64)
    }

    fn total_bytes(&self, path: &Path) -> Result<u64, FsError> {
        let st = self.statvfs(path)?;
        Ok(st.f_blocks as u64 * st.f_frsize as u64)
    }
}
