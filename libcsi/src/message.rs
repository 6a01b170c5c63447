//! CSI protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between the container orchestrator (client side) and
//! the NFS plugin (server side) via QUIC bi-directional streams.

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope for CSI over QUIC.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,
    /// Query the CSI versions served (Identity).
    GetSupportedVersions,

    /// Validate volume capabilities (Controller).
    ValidateVolumeCapabilities {
        volume_id: VolumeId,
        capabilities: Vec<VolumeCapability>,
    },
    /// Query controller capabilities (Controller).
    GetControllerCapabilities,

    /// Publish an export into a Pod (Node).
    PublishVolume(NodePublishVolumeRequest),
    /// Unpublish a previously published volume (Node).
    UnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    /// Query node info (Node).
    GetNodeInfo,
    /// Query node capabilities (Node).
    GetNodeCapabilities,

    // ----- Responses -------------------------------------------------------
    /// Whether the requested capabilities are valid.
    CapabilitiesValid(bool),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// Supported CSI versions.
    SupportedVersions(Vec<String>),
    /// Controller capabilities.
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),
    /// Node capabilities.
    NodeCapabilitiesResponse(Vec<NodeCapability>),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// Probe result.
    ProbeResult(bool),
    /// An error occurred.
    Error(CsiError),
}

impl CsiMessage {
    /// The CSI service a request belongs to, or `None` for responses.
    pub fn service(&self) -> Option<Service> {
        match self {
            Self::Probe
            | Self::GetPluginInfo
            | Self::GetPluginCapabilities
            | Self::GetSupportedVersions => Some(Service::Identity),
            Self::ValidateVolumeCapabilities { .. } | Self::GetControllerCapabilities => {
                Some(Service::Controller)
            }
            Self::PublishVolume(_)
            | Self::UnpublishVolume { .. }
            | Self::GetNodeInfo
            | Self::GetNodeCapabilities => Some(Service::Node),
            _ => None,
        }
    }
}

/// CSI service groups a request can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Identity,
    Controller,
    Node,
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::GetSupportedVersions => f.write_str("GetSupportedVersions"),
            Self::ValidateVolumeCapabilities { volume_id, .. } => {
                write!(f, "ValidateVolumeCapabilities({})", volume_id)
            }
            Self::GetControllerCapabilities => f.write_str("GetControllerCapabilities"),
            Self::PublishVolume(req) => {
                write!(f, "PublishVolume({} -> {})", req.volume_id, req.target_path)
            }
            Self::UnpublishVolume {
                volume_id,
                target_path,
            } => write!(f, "UnpublishVolume({} -> {})", volume_id, target_path),
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::GetNodeCapabilities => f.write_str("GetNodeCapabilities"),
            Self::CapabilitiesValid(v) => write!(f, "CapabilitiesValid({})", v),
            Self::PluginInfoResponse(info) => {
                write!(f, "PluginInfo(name={})", info.name)
            }
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::SupportedVersions(vs) => write!(f, "SupportedVersions({})", vs.join(",")),
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::Ok => f.write_str("Ok"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({})", ok),
            Self::Error(e) => write!(f, "Error({})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_request_serde() {
        let msg = CsiMessage::PublishVolume(NodePublishVolumeRequest {
            volume_id: VolumeId::from("nfs.local:/srv"),
            target_path: "/var/lib/pods/x/mount".into(),
            volume_capability: VolumeCapability::default(),
            read_only: true,
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        match de {
            CsiMessage::PublishVolume(req) => {
                assert_eq!(req.volume_id.as_str(), "nfs.local:/srv");
                assert!(req.read_only);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn error_message_keeps_variant() {
        let msg = CsiMessage::Error(CsiError::Conflict("ro vs rw".into()));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(CsiError::Conflict(_))));
    }

    #[test]
    fn requests_map_to_services() {
        assert_eq!(CsiMessage::Probe.service(), Some(Service::Identity));
        assert_eq!(
            CsiMessage::GetControllerCapabilities.service(),
            Some(Service::Controller)
        );
        assert_eq!(CsiMessage::GetNodeInfo.service(), Some(Service::Node));
        assert_eq!(CsiMessage::Ok.service(), None);
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
        let msg = CsiMessage::UnpublishVolume {
            volume_id: VolumeId::from("h:/e"),
            target_path: "/t".into(),
        };
        assert_eq!(msg.to_string(), "UnpublishVolume(h:/e -> /t)");
    }
}
