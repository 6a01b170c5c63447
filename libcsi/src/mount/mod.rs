//! Host mount table access.
//!
//! Every publish/unpublish decision is made from a fresh read of the host
//! mount table through the [`MountTable`] trait.  Two implementations exist:
//!
//! * [`SystemMountTable`]: reads `/proc/self/mounts` and shells out to
//!   `mount(8)` / `umount(8)`.
//! * [`MemoryMountTable`]: an in-memory table that records every mutation,
//!   used to drive the reconciler deterministically in tests.

mod memory;
mod system;

pub use memory::{MemoryMountTable, MountOp};
pub use system::SystemMountTable;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::CsiError;

/// Read/write state of a mount, as recorded in its option set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Mounted with `ro`.
    ReadOnly,
    /// Mounted with `rw`.
    ReadWrite,
}

impl Access {
    /// `ReadOnly` when `read_only` is set, `ReadWrite` otherwise.
    pub fn from_read_only(read_only: bool) -> Self {
        if read_only {
            Self::ReadOnly
        } else {
            Self::ReadWrite
        }
    }

    /// The option string carrying this access.
    pub fn as_option(self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
        }
    }
}

/// One line of the host mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mounted device or NFS export, e.g. `10.0.0.5:/srv/nfs`.
    pub source: String,
    /// Absolute directory the source is mounted at.
    pub path: PathBuf,
    /// Filesystem type, e.g. `nfs4`.
    pub fs_type: String,
    /// Mount options, unordered.
    pub options: Vec<String>,
}

impl MountEntry {
    /// Whether `option` is present.
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    /// The read/write state, or `None` when neither `ro` nor `rw` is listed.
    pub fn access(&self) -> Option<Access> {
        if self.has_option("ro") {
            Some(Access::ReadOnly)
        } else if self.has_option("rw") {
            Some(Access::ReadWrite)
        } else {
            None
        }
    }
}

/// What currently exists at a filesystem path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Nothing.
    Missing,
    /// A directory.
    Directory,
    /// A file, socket, device node, ...
    Other,
}

/// Host mount state: inspection and mutation.
///
/// All methods may block on slow system calls or child processes; callers
/// must not assume low latency.
#[async_trait]
pub trait MountTable: Send + Sync {
    /// Every active mount on the host.
    async fn mounts(&self) -> Result<Vec<MountEntry>, CsiError>;

    /// Active mounts whose source is exactly `source`.
    async fn mounts_for_source(&self, source: &str) -> Result<Vec<MountEntry>, CsiError> {
        Ok(self
            .mounts()
            .await?
            .into_iter()
            .filter(|m| m.source == source)
            .collect())
    }

    /// Mount `source` at `target`.  An empty `source` or `fs_type` is omitted
    /// from the command line.
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError>;

    /// Unmount whatever is mounted at `target`.
    async fn unmount(&self, target: &Path) -> Result<(), CsiError>;

    /// Inspect `path`.
    async fn path_kind(&self, path: &Path) -> Result<PathKind, CsiError>;

    /// Create `path` as a directory if needed.
    ///
    /// Returns `true` when the directory was created, `false` when it already
    /// existed.  An existing non-directory is an error.
    async fn mkdir(&self, path: &Path) -> Result<bool, CsiError>;

    /// Remove the empty directory at `path`.
    async fn remove_dir(&self, path: &Path) -> Result<(), CsiError>;
}

/// Command-line arguments for `mount(8)`.
///
/// Produces `[-t fstype] [-o opt1,opt2] [source] target`; empty elements are
/// skipped rather than emitted as empty strings.
#[derive(Debug, Default, Clone)]
pub struct MountArgs<'a> {
    source: &'a str,
    target: &'a str,
    fs_type: &'a str,
    options: &'a [String],
}

impl<'a> MountArgs<'a> {
    /// Arguments for mounting `source` at `target`.
    pub fn new(source: &'a str, target: &'a str) -> Self {
        Self {
            source,
            target,
            ..Default::default()
        }
    }

    /// Set the filesystem type (`-t`).
    pub fn fs_type(mut self, fs_type: &'a str) -> Self {
        self.fs_type = fs_type;
        self
    }

    /// Set the option list (`-o`).
    pub fn options(mut self, options: &'a [String]) -> Self {
        self.options = options;
        self
    }

    /// Render the argument vector.
    pub fn build(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(6);
        if !self.fs_type.is_empty() {
            args.push("-t".to_owned());
            args.push(self.fs_type.to_owned());
        }
        let options: Vec<&str> = self
            .options
            .iter()
            .map(String::as_str)
            .filter(|o| !o.is_empty())
            .collect();
        if !options.is_empty() {
            args.push("-o".to_owned());
            args.push(options.join(","));
        }
        if !self.source.is_empty() {
            args.push(self.source.to_owned());
        }
        args.push(self.target.to_owned());
        args
    }
}
