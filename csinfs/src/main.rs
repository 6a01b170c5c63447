//! # csi-nfs
//!
//! Serves the Identity, Controller, and Node CSI services for pre-existing
//! NFS exports over QUIC.
//!
//! Environment:
//! - `CSI_ENDPOINT`: listen address, `quic://<addr>:<port>`.
//! - `X_CSI_TLS_CERT` / `X_CSI_TLS_KEY`: PEM certificate chain and key.
//! - `X_CSI_PRIVATE_MOUNT_DIR`, `X_CSI_NODE_ID`: see [`libcsi::config`].
//! - `X_CSI_NFS_NODEONLY` / `X_CSI_NFS_CONTROLLERONLY`: serve one side only.
//! - `X_CSI_NFS_DEBUG`: raise the default log level to `debug`.

mod endpoint;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use libcsi::backend::nfs::NfsBackend;
use libcsi::message::Service;
use libcsi::transport::{CsiServer, ServiceMode};
use libcsi::{CsiIdentity, NfsConfig};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::endpoint::parse_endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// CSI plugin for pre-existing NFS exports
#[derive(Parser, Debug)]
#[command(name = "csi-nfs")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen address, `quic://<addr>:<port>` or `<addr>:<port>`
    #[arg(long, env = "CSI_ENDPOINT", default_value = "")]
    endpoint: String,

    /// PEM certificate chain presented to clients
    #[arg(long, env = "X_CSI_TLS_CERT", value_name = "FILE")]
    tls_cert: PathBuf,

    /// PEM private key for the certificate
    #[arg(long, env = "X_CSI_TLS_KEY", value_name = "FILE")]
    tls_key: PathBuf,

    /// Root directory for private mount points
    #[arg(long, value_name = "DIR")]
    private_dir: Option<PathBuf>,

    /// Node identifier reported to the orchestrator
    #[arg(long)]
    node_id: Option<String>,

    /// Serve only the Node service (plus Identity)
    #[arg(long, env = "X_CSI_NFS_NODEONLY", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    node_only: bool,

    /// Serve only the Controller service (plus Identity)
    #[arg(long, env = "X_CSI_NFS_CONTROLLERONLY", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    controller_only: bool,

    /// Log at debug level unless `RUST_LOG` says otherwise
    #[arg(long, env = "X_CSI_NFS_DEBUG", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.debug)?;

    let mode = ServiceMode::from_flags(cli.node_only, cli.controller_only)?;
    let addr = parse_endpoint(&cli.endpoint)?;

    let mut config = NfsConfig::from_env();
    if let Some(dir) = cli.private_dir {
        config.private_dir = dir;
    }
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    info!(
        private_dir = %config.private_dir.display(),
        node_id = %config.node_id,
        ?mode,
        "starting csi-nfs"
    );

    let backend = Arc::new(NfsBackend::system(config));
    if mode.serves(Service::Node)
        && let Err(e) = backend.probe().await
    {
        warn!(error = %e, "host is not ready to mount NFS exports");
    }

    let tls = server_tls(&cli.tls_cert, &cli.tls_key)?;
    let server = CsiServer::new(addr, tls, backend)
        .context("failed to start CSI server")?
        .with_mode(mode);

    tokio::select! {
        res = server.serve() => res.context("CSI server stopped")?,
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for shutdown signal")?;
            info!("shutdown signal received");
            server.endpoint().close(0u32.into(), b"shutdown");
            server.endpoint().wait_idle().await;
        }
    }
    Ok(())
}

fn init_logging(format: LogFormat, debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn server_tls(cert: &Path, key: &Path) -> Result<rustls::ServerConfig> {
    let certs = CertificateDer::pem_file_iter(cert)
        .with_context(|| format!("failed to open certificate {}", cert.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse certificate {}", cert.display()))?;
    let key = PrivateKeyDer::from_pem_file(key)
        .with_context(|| format!("failed to load private key {}", key.display()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .context("TLS 1.3 unavailable")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid TLS certificate or key")
}
