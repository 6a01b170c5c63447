//! QUIC client used by the orchestrator side to issue CSI requests.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use crate::error::CsiError;
use crate::message::CsiMessage;
use crate::transport::{read_message, write_message};
use crate::types::{NodePublishVolumeRequest, VolumeCapability, VolumeId};

/// Issues [`CsiMessage`] requests over one QUIC connection.
pub struct CsiClient {
    connection: quinn::Connection,
}

impl CsiClient {
    /// Connect to the plugin at `addr`.
    ///
    /// `server_name` is the TLS SNI name and must match a SAN in the plugin's
    /// certificate; `tls_config` must trust that certificate.
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, CsiError> {
        let crypto = QuicClientConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;

        let local = if addr.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0, 0, 0, 0], 0))
        };
        let mut endpoint = quinn::Endpoint::client(local).map_err(CsiError::transport)?;
        endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(CsiError::transport)?
            .await
            .map_err(CsiError::transport)?;

        debug!(%addr, %server_name, "CSI QUIC connection established");
        Ok(Self { connection })
    }

    /// Send `msg` on a fresh bi-stream and wait for the reply.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(CsiError::transport)?;

        write_message(&mut send, msg).await?;
        let response = read_message(&mut recv).await?;
        debug!(%response, "CSI response received");
        Ok(response)
    }

    /// `Probe`, with a server-side failure surfaced as `Err`.
    pub async fn probe(&self) -> Result<bool, CsiError> {
        match self.request(&CsiMessage::Probe).await? {
            CsiMessage::ProbeResult(ready) => Ok(ready),
            other => Err(unexpected(other)),
        }
    }

    /// `ValidateVolumeCapabilities`.
    pub async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: Vec<VolumeCapability>,
    ) -> Result<bool, CsiError> {
        let msg = CsiMessage::ValidateVolumeCapabilities {
            volume_id: volume_id.clone(),
            capabilities,
        };
        match self.request(&msg).await? {
            CsiMessage::CapabilitiesValid(valid) => Ok(valid),
            other => Err(unexpected(other)),
        }
    }

    /// `NodePublishVolume`.
    pub async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        match self.request(&CsiMessage::PublishVolume(req)).await? {
            CsiMessage::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// `NodeUnpublishVolume`.
    pub async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        let msg = CsiMessage::UnpublishVolume {
            volume_id: volume_id.clone(),
            target_path: target_path.to_owned(),
        };
        match self.request(&msg).await? {
            CsiMessage::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Close the connection.
    pub fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
    }
}

/// Turn an error reply into its error, anything else into a transport error.
fn unexpected(response: CsiMessage) -> CsiError {
    match response {
        CsiMessage::Error(e) => e,
        other => CsiError::TransportError(format!("unexpected response: {other}")),
    }
}
