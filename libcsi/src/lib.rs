//! # libcsi: CSI node plugin for pre-existing NFS exports
//!
//! `libcsi` implements a lightweight [Container Storage Interface][csi]
//! plugin that attaches existing NFS exports to containers.  Each export is
//! mounted once per host at a private mount point and then bind-mounted into
//! every target that requests it.  Requests travel over QUIC (via [`quinn`])
//! instead of gRPC.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum covering all failure modes. |
//! | [`config`] | [`NfsConfig`] and its environment overrides. |
//! | [`mount`] | [`MountTable`] oracle: host mount table and mount commands. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: capability validation. |
//! | [`node`] | [`CsiNode`] trait: publish, unpublish. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//! | [`backend`] | Storage backends (NFS). |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod message;
pub mod mount;
pub mod node;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::nfs::NfsBackend;
pub use config::NfsConfig;
pub use controller::CsiController;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use mount::MountTable;
pub use node::CsiNode;
pub use types::*;
