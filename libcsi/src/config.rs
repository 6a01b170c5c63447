//! NFS plugin configuration.
//!
//! Environment variables:
//! - `X_CSI_PRIVATE_MOUNT_DIR`: directory holding one private mount point per
//!   attached export.  Defaults to `/dev/disk/csi-nfs-private`.
//! - `X_CSI_NODE_ID`: node identifier reported by `NodeGetInfo`.  Defaults to
//!   the host name.

use std::path::PathBuf;

use crate::backend::nfs::NFS_FS_TYPE;

/// Environment variable overriding [`NfsConfig::private_dir`].
pub const ENV_PRIVATE_MOUNT_DIR: &str = "X_CSI_PRIVATE_MOUNT_DIR";
/// Environment variable overriding [`NfsConfig::node_id`].
pub const ENV_NODE_ID: &str = "X_CSI_NODE_ID";
/// Default private mount root.
pub const DEFAULT_PRIVATE_DIR: &str = "/dev/disk/csi-nfs-private";

/// Settings consumed by the NFS backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsConfig {
    /// Root of all private mount points.
    pub private_dir: PathBuf,
    /// Identifier of this node.
    pub node_id: String,
    /// Filesystem type used when a capability leaves it empty.
    pub fs_type: String,
}

impl Default for NfsConfig {
    fn default() -> Self {
        Self {
            private_dir: PathBuf::from(DEFAULT_PRIVATE_DIR),
            node_id: hostname(),
            fs_type: NFS_FS_TYPE.to_owned(),
        }
    }
}

impl NfsConfig {
    /// Defaults overridden by any non-empty `X_CSI_*` variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = non_empty_var(ENV_PRIVATE_MOUNT_DIR) {
            config.private_dir = PathBuf::from(dir);
        }
        if let Some(node_id) = non_empty_var(ENV_NODE_ID) {
            config.node_id = node_id;
        }
        config
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NfsConfig::default();
        assert_eq!(config.private_dir, PathBuf::from(DEFAULT_PRIVATE_DIR));
        assert_eq!(config.fs_type, "nfs");
        assert!(!config.node_id.is_empty());
    }
}
