//! Capability validation.

use crate::types::{AccessType, VolumeCapability};

/// Filesystem type served by this plugin.
pub const NFS_FS_TYPE: &str = "nfs";

/// Whether every capability in `capabilities` can be served by an NFS export.
///
/// Block access is never supported.  A mount capability may leave the
/// filesystem type empty to accept the plugin default; any other value must
/// be [`NFS_FS_TYPE`].  Mount flags are passed through to `mount(8)` unchecked.
pub fn validate_capabilities(capabilities: &[VolumeCapability]) -> bool {
    capabilities.iter().all(|cap| match &cap.access_type {
        AccessType::Block => false,
        AccessType::Mount { fs_type, .. } => fs_type.is_empty() || fs_type == NFS_FS_TYPE,
    })
}
