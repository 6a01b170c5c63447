//! QUIC server that runs on each node and dispatches incoming CSI requests
//! to the appropriate trait implementations.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::{CsiMessage, Service};
use crate::node::CsiNode;
use crate::transport::{read_message, write_message};

/// Which CSI services a server answers.  Identity is always served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceMode {
    #[default]
    All,
    NodeOnly,
    ControllerOnly,
}

impl ServiceMode {
    /// Mode selected by the node-only / controller-only switches.
    pub fn from_flags(node_only: bool, controller_only: bool) -> Result<Self, CsiError> {
        match (node_only, controller_only) {
            (false, false) => Ok(Self::All),
            (true, false) => Ok(Self::NodeOnly),
            (false, true) => Ok(Self::ControllerOnly),
            (true, true) => Err(CsiError::InvalidArgument(
                "cannot specify both node-only and controller-only mode".into(),
            )),
        }
    }

    /// Whether requests for `service` are answered.
    pub fn serves(self, service: Service) -> bool {
        match (self, service) {
            (_, Service::Identity) | (Self::All, _) => true,
            (Self::NodeOnly, Service::Node) => true,
            (Self::ControllerOnly, Service::Controller) => true,
            _ => false,
        }
    }
}

/// A CSI server that accepts QUIC connections and dispatches
/// [`CsiMessage`] requests to an [`CsiIdentity`] + [`CsiController`] +
/// [`CsiNode`] implementation.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
    mode: ServiceMode,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Create a new server bound to `addr`.
    ///
    /// All three services are answered until [`with_mode`](Self::with_mode)
    /// narrows them.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "CSI QUIC server listening");
        Ok(Self {
            endpoint,
            handler,
            mode: ServiceMode::All,
        })
    }

    /// Restrict the services answered by this server.
    pub fn with_mode(mut self, mode: ServiceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection spawns a Tokio task, and each bi-stream
    /// within a connection is handled concurrently.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            let mode = self.mode;
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "CSI connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler, mode).await {
                            warn!(%remote, error = %e, "CSI connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "CSI incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Handle all bi-streams on a single connection.
    async fn handle_connection(
        conn: quinn::Connection,
        handler: Arc<T>,
        mode: ServiceMode,
    ) -> Result<(), CsiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler, mode).await {
                    error!(error = %e, "CSI stream handler error");
                }
            });
        }
    }

    /// Answer the single request carried by one bi-stream.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
        mode: ServiceMode,
    ) -> Result<(), CsiError> {
        let request = read_message(&mut recv).await?;
        debug!(%request, "CSI request received");

        let response = Self::dispatch(handler, mode, request).await;
        if let CsiMessage::Error(e) = &response {
            debug!(error = %e, code = ?e.code(), "CSI request failed");
        }
        write_message(&mut send, &response).await
    }

    /// Map a [`CsiMessage`] request to the correct trait method call and
    /// wrap the result in a response [`CsiMessage`].
    async fn dispatch(handler: &T, mode: ServiceMode, request: CsiMessage) -> CsiMessage {
        let Some(service) = request.service() else {
            warn!(msg = %request, "unexpected message variant received as request");
            return CsiMessage::Error(CsiError::InvalidArgument(format!(
                "unexpected message: {request}"
            )));
        };
        if !mode.serves(service) {
            debug!(msg = %request, ?mode, "request for disabled service");
            return CsiMessage::Error(CsiError::Unimplemented(format!(
                "{service:?} service is disabled"
            )));
        }

        let result = match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::Probe => handler.probe().await.map(CsiMessage::ProbeResult),
            CsiMessage::GetPluginInfo => handler
                .get_plugin_info()
                .await
                .map(CsiMessage::PluginInfoResponse),
            CsiMessage::GetPluginCapabilities => handler
                .get_plugin_capabilities()
                .await
                .map(CsiMessage::PluginCapabilitiesResponse),
            CsiMessage::GetSupportedVersions => handler
                .get_supported_versions()
                .await
                .map(CsiMessage::SupportedVersions),

            // --- Controller -------------------------------------------------
            CsiMessage::ValidateVolumeCapabilities {
                volume_id,
                capabilities,
            } => handler
                .validate_volume_capabilities(&volume_id, &capabilities)
                .await
                .map(CsiMessage::CapabilitiesValid),
            CsiMessage::GetControllerCapabilities => CsiController::get_capabilities(handler)
                .await
                .map(CsiMessage::ControllerCapabilitiesResponse),

            // --- Node -------------------------------------------------------
            CsiMessage::PublishVolume(req) => {
                handler.publish_volume(req).await.map(|()| CsiMessage::Ok)
            }
            CsiMessage::UnpublishVolume {
                volume_id,
                target_path,
            } => handler
                .unpublish_volume(&volume_id, &target_path)
                .await
                .map(|()| CsiMessage::Ok),
            CsiMessage::GetNodeInfo => handler.get_info().await.map(CsiMessage::NodeInfoResponse),
            CsiMessage::GetNodeCapabilities => CsiNode::get_capabilities(handler)
                .await
                .map(CsiMessage::NodeCapabilitiesResponse),

            other => Err(CsiError::InvalidArgument(format!(
                "unexpected message: {other}"
            ))),
        };

        result.unwrap_or_else(CsiMessage::Error)
    }

    /// Return a reference to the underlying QUIC endpoint, useful for
    /// obtaining the local address or shutting down.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_mode_flags() {
        assert_eq!(ServiceMode::from_flags(false, false).unwrap(), ServiceMode::All);
        assert_eq!(ServiceMode::from_flags(true, false).unwrap(), ServiceMode::NodeOnly);
        assert_eq!(
            ServiceMode::from_flags(false, true).unwrap(),
            ServiceMode::ControllerOnly
        );
        assert!(ServiceMode::from_flags(true, true).is_err());
    }

    #[test]
    fn identity_always_served() {
        for mode in [ServiceMode::All, ServiceMode::NodeOnly, ServiceMode::ControllerOnly] {
            assert!(mode.serves(Service::Identity));
        }
        assert!(!ServiceMode::NodeOnly.serves(Service::Controller));
        assert!(!ServiceMode::ControllerOnly.serves(Service::Node));
        assert!(ServiceMode::All.serves(Service::Node));
    }
}
