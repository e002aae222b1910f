//! Read-only mounting of snapshot images.
//!
//! The archive port reads clips from a mounted view of a snapshot's
//! `image.bin`, never from the live cam disk. `LoopMounter` attaches the
//! image to a loop device with partition scanning and mounts the first
//! partition read-only; `MockMounter` hands tests a directory instead.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

/// Errors from mount operations.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("mount failed: {0}")]
    Failed(String),
}

/// A mounted snapshot image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedImage {
    /// The image file that was mounted.
    pub image: PathBuf,
    /// Where its filesystem is visible.
    pub mount_point: PathBuf,
    /// Loop device backing the mount, when one was allocated.
    pub loop_device: Option<String>,
}

impl MountedImage {
    /// The mounted filesystem root.
    pub fn path(&self) -> &Path {
        &self.mount_point
    }
}

/// Port for mounting a snapshot image read-only.
pub trait ImageMounter: Send + Sync {
    fn mount_readonly(&self, image: &Path) -> Result<MountedImage, MountError>;

    /// Tear down a mount produced by `mount_readonly`. Idempotent enough to
    /// call on a partially torn-down mount.
    fn unmount(&self, mounted: &MountedImage) -> Result<(), MountError>;
}

/// Mounts images via `losetup` and `mount -o ro`.
pub struct LoopMounter {
    mount_root: PathBuf,
    counter: AtomicU64,
}

impl LoopMounter {
    /// Mount points are created under `mount_root`.
    pub fn new(mount_root: PathBuf) -> Self {
        Self {
            mount_root,
            counter: AtomicU64::new(0),
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<String, MountError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| MountError::Failed(format!("cannot run {program}: {e}")))?;
        if !output.status.success() {
            return Err(MountError::Failed(format!(
                "{program} {}: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl ImageMounter for LoopMounter {
    fn mount_readonly(&self, image: &Path) -> Result<MountedImage, MountError> {
        // Loop device with partition scanning
        let loop_device = self.run("losetup", &["-Pf", "--show", &image.to_string_lossy()])?;
        let partition = format!("{loop_device}p1");

        // The partition node appears asynchronously after losetup
        let mut found = false;
        for _ in 0..10 {
            if Path::new(&partition).exists() {
                found = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        if !found {
            let _ = self.run("losetup", &["-d", &loop_device]);
            return Err(MountError::Failed(format!(
                "partition device {partition} not found"
            )));
        }

        let serial = self.counter.fetch_add(1, Ordering::SeqCst);
        let mount_point = self
            .mount_root
            .join(format!("camvault-{}-{serial}", std::process::id()));
        std::fs::create_dir_all(&mount_point)
            .map_err(|e| MountError::Failed(format!("mkdir {}: {e}", mount_point.display())))?;

        if let Err(e) = self.run(
            "mount",
            &["-o", "ro", &partition, &mount_point.to_string_lossy()],
        ) {
            let _ = std::fs::remove_dir(&mount_point);
            let _ = self.run("losetup", &["-d", &loop_device]);
            return Err(e);
        }

        Ok(MountedImage {
            image: image.to_path_buf(),
            mount_point,
            loop_device: Some(loop_device),
        })
    }

    fn unmount(&self, mounted: &MountedImage) -> Result<(), MountError> {
        let mut first_error = None;

        if let Err(e) = self.run("umount", &[&mounted.mount_point.to_string_lossy()]) {
            first_error = Some(e);
        }
        let _ = std::fs::remove_dir(&mounted.mount_point);
        if let Some(loop_device) = &mounted.loop_device {
            if let Err(e) = self.run("losetup", &["-d", loop_device]) {
                first_error = first_error.or(Some(e));
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

/// Mounter for tests: every image "mounts" at a fixed directory.
#[derive(Debug, Clone, Default)]
pub struct MockMounter {
    mount_point: PathBuf,
    state: Arc<Mutex<MockMountState>>,
}

#[derive(Debug, Default)]
struct MockMountState {
    mounts: Vec<PathBuf>,
    unmounts: Vec<PathBuf>,
    fail_next: bool,
}

impl MockMounter {
    /// All mounts resolve to `mount_point`.
    pub fn new(mount_point: PathBuf) -> Self {
        Self {
            mount_point,
            state: Arc::default(),
        }
    }

    /// Make the next mount fail.
    pub fn fail_next_mount(&self) {
        self.state.lock().unwrap().fail_next = true;
    }

    /// Images mounted so far.
    pub fn mounts(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().mounts.clone()
    }

    /// Images unmounted so far.
    pub fn unmounts(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().unmounts.clone()
    }

    /// True when every mount has been paired with an unmount.
    pub fn balanced(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.mounts.len() == state.unmounts.len()
    }
}

impl ImageMounter for MockMounter {
    fn mount_readonly(&self, image: &Path) -> Result<MountedImage, MountError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next {
            state.fail_next = false;
            return Err(MountError::Failed("scripted mount failure".to_string()));
        }
        state.mounts.push(image.to_path_buf());
        Ok(MountedImage {
            image: image.to_path_buf(),
            mount_point: self.mount_point.clone(),
            loop_device: None,
        })
    }

    fn unmount(&self, mounted: &MountedImage) -> Result<(), MountError> {
        self.state
            .lock()
            .unwrap()
            .unmounts
            .push(mounted.image.clone());
        Ok(())
    }
}
