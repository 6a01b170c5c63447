//! `NodePublishVolume`.

use std::path::Path;

use tracing::{debug, error, info, instrument};

use super::reconcile::{Reconciler, require_target, require_volume_id};
use crate::error::CsiError;
use crate::mount::Access;
use crate::types::{AccessMode, AccessType, NodePublishVolumeRequest, VolumeId};

impl Reconciler {
    /// Make `req.volume_id` available at `req.target_path`.
    ///
    /// The export is mounted once at its private mount point (read-only when
    /// the access mode forbids writing) and then bind-mounted to the target.
    /// Existing mounts are reused when their access matches the request and
    /// rejected with [`CsiError::Conflict`] when it does not.
    #[instrument(
        skip(self, req),
        fields(volume_id = %req.volume_id, target_path = %req.target_path, read_only = req.read_only),
    )]
    pub async fn publish(&self, req: &NodePublishVolumeRequest) -> Result<(), CsiError> {
        require_volume_id(&req.volume_id)?;
        require_target(&req.target_path)?;

        let AccessType::Mount {
            fs_type,
            mount_flags,
        } = &req.volume_capability.access_type
        else {
            return Err(CsiError::InvalidArgument(
                "access type must be mount".into(),
            ));
        };
        let mode = req.volume_capability.access_mode;
        if mode == AccessMode::Unknown {
            return Err(CsiError::InvalidArgument("invalid access mode".into()));
        }
        let fs_type = if fs_type.is_empty() {
            self.default_fs_type.as_str()
        } else {
            fs_type.as_str()
        };

        let target = Path::new(&req.target_path);
        self.check_target(target).await?;
        self.ensure_private_dir().await?;

        let volume_id = &req.volume_id;
        let private = self.private_mount_point(volume_id);
        let private_access = Access::from_read_only(mode.is_reader_only());
        // The kernel lists a bind of a read-only mount as `ro`, so a
        // reader-only mode makes the target read-only too.
        let target_read_only = req.read_only || mode.is_reader_only();

        let _guard = self.locks.acquire(volume_id).await;

        let mounts = self.table.mounts_for_source(volume_id.as_str()).await?;

        if mounts.is_empty() {
            debug!(private_mount = %private.display(), "attempting mount to private area");
            self.attach_private(volume_id, &private, fs_type, mount_flags, private_access)
                .await?;
        } else {
            match mounts.iter().find(|m| m.path == private) {
                Some(m) if m.access() == Some(private_access) => {
                    debug!(private_mount = %private.display(), "private mount already in place");
                }
                Some(m) => {
                    return Err(CsiError::Conflict(format!(
                        "access mode conflicts with existing mounts: {} is mounted {:?}, requested {}",
                        private.display(),
                        m.access(),
                        private_access.as_option(),
                    )));
                }
                None => {
                    return Err(CsiError::Internal(
                        "device in use by external entity".into(),
                    ));
                }
            }

            if let Some(m) = mounts.iter().find(|m| m.path == target) {
                if m.access() != Some(Access::from_read_only(target_read_only)) {
                    return Err(CsiError::Conflict(format!(
                        "volume previously published to {} with different options",
                        target.display()
                    )));
                }
                debug!("volume already published to target");
                return Ok(());
            }
        }

        let mut flags = mount_flags.clone();
        if target_read_only {
            flags.push("ro".to_owned());
        }
        flags.push("bind".to_owned());

        self.table
            .mount(&private.to_string_lossy(), target, "", &flags)
            .await?;

        info!(private_mount = %private.display(), "volume published (bind-mount)");
        Ok(())
    }

    /// Mount the export at its private mount point.
    async fn attach_private(
        &self,
        volume_id: &VolumeId,
        private: &Path,
        fs_type: &str,
        mount_flags: &[String],
        access: Access,
    ) -> Result<(), CsiError> {
        let created = self.table.mkdir(private).await.map_err(|e| {
            CsiError::Internal(format!("unable to create private mount point: {e}"))
        })?;

        if !created {
            // The directory outlived an unclean teardown.  Reuse it only if
            // nothing at all is mounted there.
            debug!(private_mount = %private.display(), "private mount target already exists");
            let all = self.table.mounts().await?;
            if let Some(m) = all.iter().find(|m| m.path == private) {
                error!(
                    private_mount = %private.display(),
                    mounted_device = %m.source,
                    "mount point already in use by device",
                );
                return Err(CsiError::Internal(format!(
                    "unable to use private mount point {}: in use by {}",
                    private.display(),
                    m.source
                )));
            }
        }

        let mut flags = mount_flags.to_vec();
        if access == Access::ReadOnly {
            flags.push("ro".to_owned());
        }

        self.table
            .mount(volume_id.as_str(), private, fs_type, &flags)
            .await?;

        info!(private_mount = %private.display(), %fs_type, "export mounted to private area");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mount::{MemoryMountTable, MountOp, MountTable};
    use crate::types::VolumeCapability;

    const PRIV: &str = "/priv";
    const SOURCE: &str = "10.0.0.5:/srv/nfs";

    fn setup() -> (Arc<MemoryMountTable>, Reconciler) {
        let table = Arc::new(MemoryMountTable::new());
        table.add_dir("/pods/a");
        table.add_dir("/pods/b");
        let reconciler = Reconciler::new(table.clone(), PRIV, "nfs");
        (table, reconciler)
    }

    fn request(target: &str, mode: AccessMode, read_only: bool) -> NodePublishVolumeRequest {
        NodePublishVolumeRequest {
            volume_id: VolumeId::from(SOURCE),
            target_path: target.into(),
            volume_capability: VolumeCapability::mount(mode, "", vec!["vers=4.1".into()]),
            read_only,
        }
    }

    #[tokio::test]
    async fn first_publish_mounts_private_then_binds() {
        let (table, r) = setup();
        r.publish(&request("/pods/a", AccessMode::SingleNodeWriter, false))
            .await
            .unwrap();

        let private = r.private_mount_point(&VolumeId::from(SOURCE));
        let mounts: Vec<_> = table
            .ops()
            .into_iter()
            .filter(MountOp::is_mount_change)
            .collect();
        assert_eq!(
            mounts,
            vec![
                MountOp::Mount {
                    source: SOURCE.into(),
                    target: private.clone(),
                    fs_type: "nfs".into(),
                    options: vec!["vers=4.1".into()],
                },
                MountOp::Mount {
                    source: private.to_string_lossy().into_owned(),
                    target: "/pods/a".into(),
                    fs_type: String::new(),
                    options: vec!["vers=4.1".into(), "bind".into()],
                },
            ]
        );
    }

    #[tokio::test]
    async fn reader_only_mode_mounts_private_read_only() {
        let (table, r) = setup();
        r.publish(&request("/pods/a", AccessMode::MultiNodeReaderOnly, true))
            .await
            .unwrap();

        let private = r.private_mount_point(&VolumeId::from(SOURCE));
        let entries = table.entries();
        let priv_entry = entries.iter().find(|m| m.path == private).unwrap();
        assert_eq!(priv_entry.access(), Some(Access::ReadOnly));
        let target = entries
            .iter()
            .find(|m| m.path == Path::new("/pods/a"))
            .unwrap();
        assert_eq!(target.access(), Some(Access::ReadOnly));
    }

    #[tokio::test]
    async fn rejects_bad_requests() {
        let (_table, r) = setup();

        let mut req = request("", AccessMode::SingleNodeWriter, false);
        assert!(matches!(
            r.publish(&req).await,
            Err(CsiError::InvalidArgument(_))
        ));

        req.target_path = "/pods/a".into();
        req.volume_id = VolumeId::from("");
        assert!(matches!(
            r.publish(&req).await,
            Err(CsiError::InvalidArgument(_))
        ));

        let mut req = request("/pods/a", AccessMode::Unknown, false);
        assert!(matches!(
            r.publish(&req).await,
            Err(CsiError::InvalidArgument(_))
        ));

        req.volume_capability = VolumeCapability::block(AccessMode::SingleNodeWriter);
        assert!(matches!(
            r.publish(&req).await,
            Err(CsiError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn reader_only_mode_retry_is_idempotent() {
        let (table, r) = setup();
        let req = request("/pods/a", AccessMode::MultiNodeReaderOnly, false);

        r.publish(&req).await.unwrap();
        r.publish(&req).await.unwrap();

        let mounts: Vec<_> = table
            .ops()
            .into_iter()
            .filter(MountOp::is_mount_change)
            .collect();
        assert_eq!(mounts.len(), 2);
        match &mounts[1] {
            MountOp::Mount { options, .. } => {
                assert!(options.contains(&"ro".to_owned()));
                assert!(options.contains(&"bind".to_owned()));
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[tokio::test]
    async fn reader_only_mode_second_target_is_read_only() {
        let (table, r) = setup();
        r.publish(&request("/pods/a", AccessMode::MultiNodeReaderOnly, false))
            .await
            .unwrap();
        r.publish(&request("/pods/b", AccessMode::MultiNodeReaderOnly, false))
            .await
            .unwrap();

        let entries = table.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|m| m.access() == Some(Access::ReadOnly)));
    }

    #[tokio::test]
    async fn malformed_volume_id_is_rejected_before_mounting() {
        let (table, r) = setup();
        let mut req = request("/pods/a", AccessMode::SingleNodeWriter, false);
        req.volume_id = VolumeId::from("no-separator");

        let err = r.publish(&req).await.unwrap_err();
        assert!(matches!(err, CsiError::MalformedIdentifier { .. }));
        assert!(table.ops().is_empty());
    }

    #[tokio::test]
    async fn target_must_pre_exist_as_directory() {
        let (table, r) = setup();
        let missing = r
            .publish(&request("/pods/missing", AccessMode::SingleNodeWriter, false))
            .await;
        assert!(matches!(missing, Err(CsiError::FailedPrecondition(_))));

        table.add_file("/pods/file");
        let not_dir = r
            .publish(&request("/pods/file", AccessMode::SingleNodeWriter, false))
            .await;
        assert!(matches!(not_dir, Err(CsiError::FailedPrecondition(_))));
        assert!(table.ops().iter().all(|op| !op.is_mount_change()));
    }

    #[tokio::test]
    async fn stale_private_dir_is_reused_when_unmounted() {
        let (table, r) = setup();
        let private = r.private_mount_point(&VolumeId::from(SOURCE));
        table.add_dir(&private);

        r.publish(&request("/pods/a", AccessMode::SingleNodeWriter, false))
            .await
            .unwrap();
        assert_eq!(table.mounts_for_source(SOURCE).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stale_private_dir_in_use_by_other_device_fails() {
        let (table, r) = setup();
        let private = r.private_mount_point(&VolumeId::from(SOURCE));
        table.add_mount("/dev/sdz1", &private, "ext4", &["rw"]);

        let err = r
            .publish(&request("/pods/a", AccessMode::SingleNodeWriter, false))
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::Internal(_)));
        assert!(table.ops().iter().all(|op| !op.is_mount_change()));
    }

    #[tokio::test]
    async fn mounted_elsewhere_only_is_internal() {
        let (table, r) = setup();
        table.add_mount(SOURCE, "/mnt/admin", "nfs", &["rw"]);

        let err = r
            .publish(&request("/pods/a", AccessMode::SingleNodeWriter, false))
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::Internal(_)));
    }

    #[tokio::test]
    async fn republish_with_other_mode_conflicts() {
        let (table, r) = setup();
        r.publish(&request("/pods/a", AccessMode::SingleNodeWriter, false))
            .await
            .unwrap();
        table.clear_ops();

        let err = r
            .publish(&request("/pods/a", AccessMode::SingleNodeWriter, true))
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::Conflict(_)));
        assert!(table.ops().iter().all(|op| !op.is_mount_change()));
    }

    #[tokio::test]
    async fn mount_failure_keeps_command_output() {
        let (table, r) = setup();
        table.fail_next_mount("mount.nfs: access denied by server while mounting");

        let err = r
            .publish(&request("/pods/a", AccessMode::SingleNodeWriter, false))
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::MountFailed { .. }));
        assert!(err.to_string().contains("access denied by server"));
    }
}
