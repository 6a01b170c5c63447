//! CSI Controller service trait.
//!
//! An NFS export is provisioned outside the plugin, so the Controller service
//! only answers whether a capability set can be served.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{ControllerCapability, VolumeCapability, VolumeId};

/// Controller service: capability checks.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Check whether the given capabilities are compatible with the volume.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError>;

    /// Optional Controller RPCs this plugin implements.
    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;
}
