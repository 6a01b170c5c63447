//! NFS storage backend for CSI.
//!
//! [`NfsBackend`] implements [`CsiIdentity`], [`CsiController`], and
//! [`CsiNode`] for exports that already exist on an NFS server.  Volumes are
//! never provisioned here; a volume *is* its export, `<host>:<export-path>`.
//!
//! Node operations are delegated to the [`Reconciler`], which runs each call
//! on its own Tokio task.  A caller that gives up on a request therefore
//! cannot interrupt a half-finished mount sequence: the task runs to the end
//! and releases the volume lock itself.

pub mod codec;
mod locks;
mod publish;
mod reconcile;
mod unpublish;
mod validate;

pub use codec::private_mount_point;
pub use locks::{VolumeGuard, VolumeLocks};
pub use reconcile::Reconciler;
pub use validate::{NFS_FS_TYPE, validate_capabilities};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::config::NfsConfig;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::mount::{MountTable, SystemMountTable};
use crate::node::CsiNode;
use crate::types::*;

/// Name this plugin registers under.
pub const PLUGIN_NAME: &str = "com.thecodeteam.csi-nfs";

/// CSI versions served.
pub const SUPPORTED_VERSIONS: &[&str] = &["0.1.0"];

/// Host helpers `mount(8)` needs for NFS.
pub const MOUNT_HELPERS: &[&str] = &["/sbin/mount.nfs", "/sbin/mount.nfs4"];

/// Concrete CSI backend for pre-existing NFS exports.
pub struct NfsBackend {
    reconciler: Arc<Reconciler>,
    node_id: String,
    mount_helpers: Vec<PathBuf>,
}

impl NfsBackend {
    /// Backend over an arbitrary mount table.
    pub fn new(config: NfsConfig, table: Arc<dyn MountTable>) -> Self {
        Self {
            reconciler: Arc::new(Reconciler::new(table, config.private_dir, config.fs_type)),
            node_id: config.node_id,
            mount_helpers: MOUNT_HELPERS.iter().map(PathBuf::from).collect(),
        }
    }

    /// Backend over the running host's mount table.
    pub fn system(config: NfsConfig) -> Self {
        Self::new(config, Arc::new(SystemMountTable::new()))
    }

    /// Replace the helper binaries checked by [`CsiIdentity::probe`].
    pub fn with_mount_helpers(mut self, helpers: Vec<PathBuf>) -> Self {
        self.mount_helpers = helpers;
        self
    }

    /// The reconciler driving node operations.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for NfsBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: PLUGIN_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
            manifest: HashMap::from([
                ("url".to_owned(), "https://github.com/thecodeteam/csi-nfs".to_owned()),
                ("semver".to_owned(), env!("CARGO_PKG_VERSION").to_owned()),
            ]),
        })
    }

    async fn get_supported_versions(&self) -> Result<Vec<String>, CsiError> {
        Ok(SUPPORTED_VERSIONS.iter().map(|v| (*v).to_owned()).collect())
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        for helper in &self.mount_helpers {
            let present = tokio::fs::metadata(helper)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !present {
                warn!(helper = %helper.display(), "required mount helper missing");
                return Err(CsiError::FailedPrecondition(format!(
                    "missing host mount dependency: required binary {} is missing",
                    helper.display()
                )));
            }
        }
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiController for NfsBackend {
    #[instrument(skip(self, capabilities), fields(count = capabilities.len()))]
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume_id is required".into()));
        }
        volume_id.export()?;

        let supported = validate_capabilities(capabilities);
        debug!(supported, "capabilities validated");
        Ok(supported)
    }

    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for NfsBackend {
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        let reconciler = Arc::clone(&self.reconciler);
        tokio::spawn(async move { reconciler.publish(&req).await })
            .await
            .map_err(|e| CsiError::Internal(format!("publish task failed: {e}")))?
    }

    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        let reconciler = Arc::clone(&self.reconciler);
        let volume_id = volume_id.clone();
        let target_path = target_path.to_owned();
        tokio::spawn(async move { reconciler.unpublish(&volume_id, &target_path).await })
            .await
            .map_err(|e| CsiError::Internal(format!("unpublish task failed: {e}")))?
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.node_id.clone(),
            max_volumes: 0,
        })
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::mount::MemoryMountTable;

    fn make_backend(table: Arc<MemoryMountTable>) -> NfsBackend {
        let config = NfsConfig {
            private_dir: PathBuf::from("/priv"),
            node_id: "test-node".to_owned(),
            fs_type: NFS_FS_TYPE.to_owned(),
        };
        NfsBackend::new(config, table)
    }

    #[tokio::test]
    async fn plugin_info() {
        let backend = make_backend(Arc::new(MemoryMountTable::new()));
        let info = backend.get_plugin_info().await.unwrap();
        assert_eq!(info.name, "com.thecodeteam.csi-nfs");
        assert!(info.manifest.contains_key("url"));
        assert_eq!(
            backend.get_supported_versions().await.unwrap(),
            vec!["0.1.0".to_owned()]
        );
    }

    #[tokio::test]
    async fn probe_with_helpers_present() {
        let tmp = tempfile::tempdir().unwrap();
        let helper = tmp.path().join("mount.nfs");
        std::fs::write(&helper, b"").unwrap();

        let backend =
            make_backend(Arc::new(MemoryMountTable::new())).with_mount_helpers(vec![helper]);
        assert!(backend.probe().await.unwrap());
    }

    #[tokio::test]
    async fn probe_missing_helper() {
        let backend = make_backend(Arc::new(MemoryMountTable::new()))
            .with_mount_helpers(vec![PathBuf::from("/nonexistent/sbin/mount.nfs4")]);
        let err = backend.probe().await.unwrap_err();
        assert!(matches!(err, CsiError::FailedPrecondition(_)));
        assert!(err.to_string().contains("missing host mount dependency"));
    }

    #[tokio::test]
    async fn validate_checks_volume_id() {
        let backend = make_backend(Arc::new(MemoryMountTable::new()));
        let caps = [VolumeCapability::default()];

        assert!(matches!(
            backend
                .validate_volume_capabilities(&VolumeId::from(""), &caps)
                .await,
            Err(CsiError::InvalidArgument(_))
        ));
        assert!(matches!(
            backend
                .validate_volume_capabilities(&VolumeId::from("not-an-export"), &caps)
                .await,
            Err(CsiError::MalformedIdentifier { .. })
        ));
        assert!(
            backend
                .validate_volume_capabilities(&VolumeId::from("h:/e"), &caps)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn get_node_info() {
        let backend = make_backend(Arc::new(MemoryMountTable::new()));
        let info = backend.get_info().await.unwrap();
        assert_eq!(info.node_id, "test-node");
        assert!(CsiNode::get_capabilities(&backend).await.unwrap().is_empty());
        assert!(
            CsiController::get_capabilities(&backend)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_publish_still_completes_and_unlocks() {
        let table = Arc::new(MemoryMountTable::new());
        table.add_dir("/pods/a");
        table.set_latency(Duration::from_millis(50));
        let backend = Arc::new(make_backend(table.clone()));

        let caller = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                backend
                    .publish_volume(NodePublishVolumeRequest {
                        volume_id: VolumeId::from("h:/e"),
                        target_path: "/pods/a".into(),
                        volume_capability: VolumeCapability::default(),
                        read_only: false,
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let mounted: Vec<_> = table.entries().into_iter().map(|m| m.path).collect();
        assert_eq!(mounted.len(), 2);
        assert!(mounted.iter().any(|p| p == Path::new("/pods/a")));
        assert!(backend.reconciler().locks().is_empty());
    }
}
