//! In-memory [`MountTable`].
//!
//! Models just enough kernel behaviour for the reconciler: bind mounts
//! inherit the source and filesystem of whatever is mounted at the bind
//! source, unmount pops the most recent mount at a path, and busy or missing
//! directories cannot be removed.  Every mutating call is appended to an
//! operation log so tests can assert exactly what reached the host.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{Access, MountEntry, MountTable, PathKind};
use crate::error::CsiError;

/// A mutating call observed by [`MemoryMountTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOp {
    /// `mount(source, target, fs_type, options)`.
    Mount {
        source: String,
        target: PathBuf,
        fs_type: String,
        options: Vec<String>,
    },
    /// `unmount(target)`.
    Unmount { target: PathBuf },
    /// `mkdir(path)` that created a directory.
    Mkdir { path: PathBuf },
    /// `remove_dir(path)` that removed a directory.
    RemoveDir { path: PathBuf },
}

impl MountOp {
    /// `true` for calls that change mount state.
    pub fn is_mount_change(&self) -> bool {
        matches!(self, Self::Mount { .. } | Self::Unmount { .. })
    }
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<MountEntry>,
    dirs: HashSet<PathBuf>,
    files: HashSet<PathBuf>,
    ops: Vec<MountOp>,
    fail_mount: Option<String>,
    fail_unmount: Option<String>,
    fail_unmount_at: Option<(PathBuf, String)>,
    fail_remove_dir: bool,
}

/// Mount table held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryMountTable {
    state: Mutex<State>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryMountTable {
    /// Empty table with only `/` present.
    pub fn new() -> Self {
        let table = Self::default();
        table.state().dirs.insert(PathBuf::from("/"));
        table
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create `path` and all of its ancestors as directories.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut state = self.state();
        for ancestor in path.as_ref().ancestors() {
            state.dirs.insert(ancestor.to_path_buf());
        }
    }

    /// Create a regular file at `path` (ancestors become directories).
    pub fn add_file(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.state().files.insert(path.to_path_buf());
    }

    /// Insert a mount entry directly, bypassing the operation log.
    pub fn add_mount(&self, source: &str, path: impl AsRef<Path>, fs_type: &str, options: &[&str]) {
        self.add_dir(path.as_ref());
        self.state().entries.push(MountEntry {
            source: source.to_owned(),
            path: path.as_ref().to_path_buf(),
            fs_type: fs_type.to_owned(),
            options: options.iter().map(|o| (*o).to_owned()).collect(),
        });
    }

    /// Make the next `mount` call fail with `reason`.
    pub fn fail_next_mount(&self, reason: impl Into<String>) {
        self.state().fail_mount = Some(reason.into());
    }

    /// Make the next `unmount` call fail with `reason`.
    pub fn fail_next_unmount(&self, reason: impl Into<String>) {
        self.state().fail_unmount = Some(reason.into());
    }

    /// Make the next `unmount` of `target` fail with `reason`.  Unmounts of
    /// other paths are unaffected.
    pub fn fail_unmount_at(&self, target: impl AsRef<Path>, reason: impl Into<String>) {
        self.state().fail_unmount_at = Some((target.as_ref().to_path_buf(), reason.into()));
    }

    /// Make every `remove_dir` call fail.
    pub fn fail_remove_dir(&self, fail: bool) {
        self.state().fail_remove_dir = fail;
    }

    /// Delay every mount and unmount by `latency`, to widen race windows.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|p| p.into_inner()) = Some(latency);
    }

    /// Snapshot of the current mount entries.
    pub fn entries(&self) -> Vec<MountEntry> {
        self.state().entries.clone()
    }

    /// Whether `path` is currently a directory.
    pub fn has_dir(&self, path: impl AsRef<Path>) -> bool {
        self.state().dirs.contains(path.as_ref())
    }

    /// Every mutating call seen so far, oldest first.
    pub fn ops(&self) -> Vec<MountOp> {
        self.state().ops.clone()
    }

    /// Forget the operation log.
    pub fn clear_ops(&self) {
        self.state().ops.clear();
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl MountTable for MemoryMountTable {
    async fn mounts(&self) -> Result<Vec<MountEntry>, CsiError> {
        Ok(self.entries())
    }

    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError> {
        self.delay().await;
        let mut state = self.state();
        state.ops.push(MountOp::Mount {
            source: source.to_owned(),
            target: target.to_path_buf(),
            fs_type: fs_type.to_owned(),
            options: options.to_vec(),
        });

        let fail = |reason: String| CsiError::MountFailed {
            path: target.display().to_string(),
            reason,
        };

        if let Some(reason) = state.fail_mount.take() {
            return Err(fail(reason));
        }
        if !state.dirs.contains(target) {
            return Err(fail(format!(
                "mount point {} does not exist",
                target.display()
            )));
        }

        let mut read_only = options.iter().any(|o| o == "ro");
        let bind = options.iter().any(|o| o == "bind");

        // A bind of a read-only mount is listed `ro` whatever its own flags.
        let (entry_source, entry_fs_type) = if bind {
            let underlying = state
                .entries
                .iter()
                .rev()
                .find(|m| m.path == Path::new(source))
                .ok_or_else(|| fail(format!("bind source {source} is not a mount point")))?;
            read_only |= underlying.access() == Some(Access::ReadOnly);
            (underlying.source.clone(), underlying.fs_type.clone())
        } else {
            (source.to_owned(), fs_type.to_owned())
        };

        let mut entry_options = vec![Access::from_read_only(read_only).as_option().to_owned()];
        entry_options.extend(
            options
                .iter()
                .filter(|o| !matches!(o.as_str(), "ro" | "rw" | "bind" | ""))
                .cloned(),
        );

        state.entries.push(MountEntry {
            source: entry_source,
            path: target.to_path_buf(),
            fs_type: entry_fs_type,
            options: entry_options,
        });
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), CsiError> {
        self.delay().await;
        let mut state = self.state();
        state.ops.push(MountOp::Unmount {
            target: target.to_path_buf(),
        });

        let fail = |reason: String| CsiError::UnmountFailed {
            path: target.display().to_string(),
            reason,
        };

        if let Some(reason) = state.fail_unmount.take() {
            return Err(fail(reason));
        }
        if state
            .fail_unmount_at
            .as_ref()
            .is_some_and(|(path, _)| path == target)
            && let Some((_, reason)) = state.fail_unmount_at.take()
        {
            return Err(fail(reason));
        }
        let idx = state
            .entries
            .iter()
            .rposition(|m| m.path == target)
            .ok_or_else(|| fail(format!("{}: not mounted", target.display())))?;
        state.entries.remove(idx);
        Ok(())
    }

    async fn path_kind(&self, path: &Path) -> Result<PathKind, CsiError> {
        let state = self.state();
        Ok(if state.dirs.contains(path) {
            PathKind::Directory
        } else if state.files.contains(path) {
            PathKind::Other
        } else {
            PathKind::Missing
        })
    }

    async fn mkdir(&self, path: &Path) -> Result<bool, CsiError> {
        let mut state = self.state();
        if state.dirs.contains(path) {
            return Ok(false);
        }
        if state.files.contains(path) {
            return Err(CsiError::Internal(format!(
                "existing path {} is not a directory",
                path.display()
            )));
        }
        if let Some(parent) = path.parent()
            && !state.dirs.contains(parent)
        {
            return Err(CsiError::Internal(format!(
                "create dir {}: parent does not exist",
                path.display()
            )));
        }
        state.dirs.insert(path.to_path_buf());
        state.ops.push(MountOp::Mkdir {
            path: path.to_path_buf(),
        });
        Ok(true)
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), CsiError> {
        let mut state = self.state();
        let fail = |reason: &str| {
            CsiError::Internal(format!("remove dir {}: {reason}", path.display()))
        };
        if state.fail_remove_dir {
            return Err(fail("permission denied"));
        }
        if !state.dirs.contains(path) {
            return Err(fail("no such directory"));
        }
        if state.entries.iter().any(|m| m.path == path) {
            return Err(fail("device or resource busy"));
        }
        state.dirs.remove(path);
        state.ops.push(MountOp::RemoveDir {
            path: path.to_path_buf(),
        });
        Ok(())
    }
}
