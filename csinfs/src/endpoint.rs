//! `CSI_ENDPOINT` parsing.

use std::net::SocketAddr;

use anyhow::{Context, Result, bail};

/// Scheme accepted in front of the listen address.
pub const SCHEME: &str = "quic://";

/// Parse `quic://<addr>:<port>` or a bare `<addr>:<port>`.
pub fn parse_endpoint(endpoint: &str) -> Result<SocketAddr> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        bail!("missing endpoint: set CSI_ENDPOINT or --endpoint");
    }

    let addr = match endpoint.split_once("://") {
        Some(("quic", rest)) => rest,
        Some((scheme, _)) => bail!("invalid endpoint {endpoint}: unsupported scheme {scheme}"),
        None => endpoint,
    };

    addr.parse()
        .with_context(|| format!("invalid endpoint {endpoint}: expected {SCHEME}<addr>:<port>"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_scheme_and_bare_forms() {
        let expected: SocketAddr = "127.0.0.1:7443".parse().unwrap();
        assert_eq!(parse_endpoint("quic://127.0.0.1:7443").unwrap(), expected);
        assert_eq!(parse_endpoint("127.0.0.1:7443").unwrap(), expected);
        assert_eq!(
            parse_endpoint("quic://[::1]:9000").unwrap(),
            "[::1]:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn empty_is_missing() {
        let err = parse_endpoint("  ").unwrap_err();
        assert!(err.to_string().contains("missing endpoint"));
    }

    #[test]
    fn rejects_other_schemes() {
        let err = parse_endpoint("unix:///var/run/csi.sock").unwrap_err();
        assert!(err.to_string().contains("unsupported scheme unix"));
        assert!(parse_endpoint("quic://not-an-addr").is_err());
    }
}
