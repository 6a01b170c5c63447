//! `NodeUnpublishVolume`.

use std::path::Path;

use tracing::{debug, info, instrument, warn};

use super::reconcile::{Reconciler, require_target, require_volume_id};
use crate::error::CsiError;
use crate::types::VolumeId;

impl Reconciler {
    /// Remove `volume_id` from `target_path`, and detach the export from the
    /// host once no other target uses it.
    ///
    /// Mounts of the same export that are neither the target nor the private
    /// mount point belong to other consumers and are left alone; while any
    /// exist the private mount stays in place.
    #[instrument(skip(self, volume_id), fields(volume_id = %volume_id))]
    pub async fn unpublish(&self, volume_id: &VolumeId, target_path: &str) -> Result<(), CsiError> {
        require_volume_id(volume_id)?;
        require_target(target_path)?;

        let target = Path::new(target_path);
        let private = self.private_mount_point(volume_id);

        let _guard = self.locks.acquire(volume_id).await;

        let mut mounts = self.table.mounts_for_source(volume_id.as_str()).await?;

        if mounts.iter().any(|m| m.path == target) {
            self.table.unmount(target).await?;
            info!("volume unpublished from target");
            mounts = self.table.mounts_for_source(volume_id.as_str()).await?;
        } else {
            debug!("target not mounted, nothing to unpublish");
        }

        if let [only] = mounts.as_slice()
            && only.path == private
        {
            self.table.unmount(&private).await?;
            info!(private_mount = %private.display(), "private mount removed");

            // A leftover empty directory is reused by the next publish.
            if let Err(e) = self.table.remove_dir(&private).await {
                warn!(private_mount = %private.display(), error = %e, "failed to remove private mount dir");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mount::{MemoryMountTable, MountOp};

    const SOURCE: &str = "nfs.example.com:/exports/home";

    fn published(targets: &[&str]) -> (Arc<MemoryMountTable>, Reconciler, std::path::PathBuf) {
        let table = Arc::new(MemoryMountTable::new());
        let reconciler = Reconciler::new(table.clone(), "/priv", "nfs");
        let private = reconciler.private_mount_point(&VolumeId::from(SOURCE));
        table.add_mount(SOURCE, &private, "nfs4", &["rw", "relatime"]);
        for target in targets {
            table.add_mount(SOURCE, target, "nfs4", &["rw", "relatime"]);
        }
        (table, reconciler, private)
    }

    #[tokio::test]
    async fn last_target_tears_down_private_mount() {
        let (table, r, private) = published(&["/pods/a"]);

        r.unpublish(&VolumeId::from(SOURCE), "/pods/a").await.unwrap();

        assert_eq!(
            table.ops(),
            vec![
                MountOp::Unmount {
                    target: "/pods/a".into()
                },
                MountOp::Unmount {
                    target: private.clone()
                },
                MountOp::RemoveDir { path: private },
            ]
        );
        assert!(table.entries().is_empty());
    }

    #[tokio::test]
    async fn shared_private_mount_survives() {
        let (table, r, private) = published(&["/pods/a", "/pods/b"]);

        r.unpublish(&VolumeId::from(SOURCE), "/pods/a").await.unwrap();

        assert_eq!(
            table.ops(),
            vec![MountOp::Unmount {
                target: "/pods/a".into()
            }]
        );
        let remaining: Vec<_> = table.entries().into_iter().map(|m| m.path).collect();
        assert_eq!(remaining, vec![private, "/pods/b".into()]);
    }

    #[tokio::test]
    async fn unknown_target_leaves_everything() {
        let (table, r, _private) = published(&["/pods/a"]);

        r.unpublish(&VolumeId::from(SOURCE), "/pods/never").await.unwrap();
        assert!(table.ops().is_empty());
    }

    #[tokio::test]
    async fn dangling_private_mount_is_cleaned_up() {
        // A previous unpublish unmounted the target but crashed before
        // detaching the export.
        let (table, r, private) = published(&[]);

        r.unpublish(&VolumeId::from(SOURCE), "/pods/a").await.unwrap();
        assert_eq!(
            table.ops(),
            vec![
                MountOp::Unmount {
                    target: private.clone()
                },
                MountOp::RemoveDir { path: private },
            ]
        );
    }

    #[tokio::test]
    async fn target_unmount_failure_fails_call() {
        let (table, r, _private) = published(&["/pods/a"]);
        table.fail_next_unmount("umount.nfs: /pods/a: device is busy");

        let err = r
            .unpublish(&VolumeId::from(SOURCE), "/pods/a")
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::UnmountFailed { .. }));
        assert!(err.to_string().contains("device is busy"));
        assert_eq!(table.entries().len(), 2);
    }

    #[tokio::test]
    async fn private_unmount_failure_fails_call() {
        let (table, r, private) = published(&["/pods/a"]);
        table.fail_unmount_at(&private, "umount.nfs: device is busy");

        let err = r
            .unpublish(&VolumeId::from(SOURCE), "/pods/a")
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::UnmountFailed { .. }));

        let remaining: Vec<_> = table.entries().into_iter().map(|m| m.path).collect();
        assert_eq!(remaining, vec![private.clone()]);
        assert!(table.has_dir(&private));
        assert!(
            !table
                .ops()
                .iter()
                .any(|op| matches!(op, MountOp::RemoveDir { .. }))
        );

        // A retry finishes the teardown.
        r.unpublish(&VolumeId::from(SOURCE), "/pods/a").await.unwrap();
        assert!(table.entries().is_empty());
        assert!(!table.has_dir(&private));
    }

    #[tokio::test]
    async fn malformed_volume_id_is_rejected() {
        let (table, r, _private) = published(&["/pods/a"]);
        let err = r
            .unpublish(&VolumeId::from("no-separator"), "/pods/a")
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::MalformedIdentifier { .. }));
        assert!(table.ops().is_empty());
    }

    #[tokio::test]
    async fn remove_dir_failure_is_not_fatal() {
        let (table, r, private) = published(&["/pods/a"]);
        table.fail_remove_dir(true);

        r.unpublish(&VolumeId::from(SOURCE), "/pods/a").await.unwrap();
        assert!(table.entries().is_empty());
        assert!(table.has_dir(&private));
    }

    #[tokio::test]
    async fn empty_arguments_are_invalid() {
        let (_table, r, _private) = published(&[]);
        assert!(matches!(
            r.unpublish(&VolumeId::from(SOURCE), "").await,
            Err(CsiError::InvalidArgument(_))
        ));
        assert!(matches!(
            r.unpublish(&VolumeId::from(""), "/pods/a").await,
            Err(CsiError::InvalidArgument(_))
        ));
    }
}
