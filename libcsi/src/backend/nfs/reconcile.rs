//! Publish/unpublish reconciliation engine.
//!
//! The engine holds no mount state of its own.  Each call takes the volume's
//! lock, reads the mount table, and issues only the operations needed to move
//! from what it observed to what was requested.  An NFS export is attached
//! once per host at its *private mount point*; every published target is a
//! bind mount of that directory.
//!
//! ```text
//! <private_dir>/
//!   <base32(host:export)>/   # network mount, one per volume
//! <target_path>              # bind mount of the private mount point
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::codec;
use super::locks::VolumeLocks;
use crate::error::CsiError;
use crate::mount::{MountTable, PathKind};
use crate::types::VolumeId;

/// Drives the host mount table toward requested publish state.
pub struct Reconciler {
    pub(super) table: Arc<dyn MountTable>,
    pub(super) private_dir: PathBuf,
    pub(super) default_fs_type: String,
    pub(super) locks: VolumeLocks,
}

impl Reconciler {
    /// Reconciler over `table`, attaching exports beneath `private_dir`.
    ///
    /// `default_fs_type` is used when a capability leaves the filesystem
    /// type empty.
    pub fn new(
        table: Arc<dyn MountTable>,
        private_dir: impl Into<PathBuf>,
        default_fs_type: impl Into<String>,
    ) -> Self {
        Self {
            table,
            private_dir: private_dir.into(),
            default_fs_type: default_fs_type.into(),
            locks: VolumeLocks::new(),
        }
    }

    /// Root directory of all private mount points.
    pub fn private_dir(&self) -> &Path {
        &self.private_dir
    }

    /// The private mount point of `volume_id`.
    pub fn private_mount_point(&self, volume_id: &VolumeId) -> PathBuf {
        codec::private_mount_point(&self.private_dir, volume_id)
    }

    /// The per-volume lock table.
    pub fn locks(&self) -> &VolumeLocks {
        &self.locks
    }

    /// The target must already exist as a directory; creating it is the
    /// caller's job.
    pub(super) async fn check_target(&self, target: &Path) -> Result<(), CsiError> {
        match self.table.path_kind(target).await? {
            PathKind::Directory => Ok(()),
            PathKind::Missing => Err(CsiError::FailedPrecondition(format!(
                "publish target: {} not pre-created",
                target.display()
            ))),
            PathKind::Other => Err(CsiError::FailedPrecondition(format!(
                "target: {} must be a directory",
                target.display()
            ))),
        }
    }

    /// Create the private root if needed.
    pub(super) async fn ensure_private_dir(&self) -> Result<(), CsiError> {
        self.table.mkdir(&self.private_dir).await.map_err(|e| {
            CsiError::Internal(format!(
                "unable to create private mount dir {}: {e}",
                self.private_dir.display()
            ))
        })?;
        Ok(())
    }
}

/// The id must be present and split into `<host>:<export>`.
pub(super) fn require_volume_id(volume_id: &VolumeId) -> Result<(), CsiError> {
    if volume_id.is_empty() {
        return Err(CsiError::InvalidArgument("volume_id is required".into()));
    }
    volume_id.export()?;
    Ok(())
}

pub(super) fn require_target(target_path: &str) -> Result<(), CsiError> {
    if target_path.is_empty() {
        return Err(CsiError::InvalidArgument("target_path is required".into()));
    }
    Ok(())
}
