//! Core CSI types: volume identifiers, capabilities, requests, plugin info.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and backend implementations.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
///
/// For NFS volumes this is the export source exactly as the host mount table
/// reports it, `<host>:<export-path>`.  See
/// [`crate::backend::nfs::codec`] for the reversible path-safe encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` when the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Not set by the caller.  Rejected by node operations.
    #[default]
    Unknown,
    /// One node, one writer.
    SingleNodeWriter,
    /// One node, readers only.
    SingleNodeReaderOnly,
    /// Many nodes, readers only.
    MultiNodeReaderOnly,
    /// Many nodes, a single writer.
    MultiNodeSingleWriter,
    /// Many nodes, many writers.
    MultiNodeMultiWriter,
}

impl AccessMode {
    /// `true` for the modes that forbid writing.
    pub fn is_reader_only(self) -> bool {
        matches!(self, Self::SingleNodeReaderOnly | Self::MultiNodeReaderOnly)
    }
}

/// How the volume is presented to the workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessType {
    /// Raw block device.  Never served by an NFS plugin.
    Block,
    /// Mounted filesystem.
    Mount {
        /// Filesystem type.  Empty means "plugin default".
        #[serde(default)]
        fs_type: String,
        /// Additional mount flags (e.g. `"noatime"`, `"vers=4.1"`).
        #[serde(default)]
        mount_flags: Vec<String>,
    },
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    #[serde(default)]
    pub access_mode: AccessMode,
    /// Block or mount access.
    pub access_type: AccessType,
}

impl VolumeCapability {
    /// A mount capability with the given mode, fs type and flags.
    pub fn mount(
        access_mode: AccessMode,
        fs_type: impl Into<String>,
        mount_flags: Vec<String>,
    ) -> Self {
        Self {
            access_mode,
            access_type: AccessType::Mount {
                fs_type: fs_type.into(),
                mount_flags,
            },
        }
    }

    /// A block capability with the given mode.
    pub fn block(access_mode: AccessMode) -> Self {
        Self {
            access_mode,
            access_type: AccessType::Block,
        }
    }
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self::mount(AccessMode::SingleNodeWriter, "", Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to publish (mount) a volume at a target path on this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Pre-created directory the volume must appear at,
    /// e.g. `/var/lib/kubelet/pods/<pod-uid>/volumes/<vol-name>`.
    pub target_path: String,
    /// Requested capability.
    pub volume_capability: VolumeCapability,
    /// Whether the target bind mount should be read-only.
    #[serde(default)]
    pub read_only: bool,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"com.thecodeteam.csi-nfs"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
    /// Free-form build metadata.
    #[serde(default)]
    pub manifest: HashMap<String, String>,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
}

/// Optional Controller RPCs a plugin may advertise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    /// `CreateVolume` / `DeleteVolume`.
    CreateDeleteVolume,
    /// `ListVolumes`.
    ListVolumes,
    /// `GetCapacity`.
    GetCapacity,
}

/// Optional Node RPCs a plugin may advertise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    /// `NodeStageVolume` / `NodeUnstageVolume`.
    StageUnstageVolume,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host (`0` = unlimited).
    pub max_volumes: u64,
}
