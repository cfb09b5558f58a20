//! Transport configuration and `udpm://` URL parsing.

use std::net::Ipv4Addr;

use crate::error::TransportError;

/// Default receive ring capacity (10 MiB).
pub const RINGBUF_SIZE: usize = 10 * 1024 * 1024;

/// Default number of receive slab descriptors.
pub const DEFAULT_RECV_BUFS: usize = 32;

/// Default aggregate byte bound on in-progress reassemblies (16 MiB).
pub const MAX_FRAG_BUF_TOTAL_SIZE: usize = 1 << 24;

/// Default count bound on in-progress reassemblies.
pub const MAX_NUM_FRAG_BUFS: usize = 1000;

/// Configuration for a [`UdpmTransport`](crate::transport::UdpmTransport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpmConfig {
    /// Multicast group address.
    pub group: Ipv4Addr,
    /// Multicast port.
    pub port: u16,
    /// Multicast TTL. 0 keeps traffic on the local host; 1 keeps it on
    /// the local network.
    pub ttl: u8,
    /// Requested kernel receive buffer size (`SO_RCVBUF`), if any.
    pub recv_buf_size: Option<usize>,
    /// Receive ring capacity in bytes.
    pub ringbuf_size: usize,
    /// Number of receive slab descriptors.
    pub recv_slabs: usize,
    /// Aggregate byte bound on resident reassembly buffers.
    pub frag_max_bytes: usize,
    /// Count bound on resident reassembly buffers.
    pub frag_max_count: usize,
}

impl UdpmConfig {
    /// Create a config for the given group and port with default tunables.
    pub fn new(group: Ipv4Addr, port: u16) -> Self {
        Self {
            group,
            port,
            ttl: 0,
            recv_buf_size: None,
            ringbuf_size: RINGBUF_SIZE,
            recv_slabs: DEFAULT_RECV_BUFS,
            frag_max_bytes: MAX_FRAG_BUF_TOTAL_SIZE,
            frag_max_count: MAX_NUM_FRAG_BUFS,
        }
    }

    /// Parse a `udpm://<group-ip>?port=<u16>&ttl=<u8>` URL.
    ///
    /// An optional `recv_buf_size=<bytes>` key requests a kernel receive
    /// buffer size. Unknown keys are ignored.
    pub fn from_url(url: &str) -> Result<Self, TransportError> {
        let rest = url
            .strip_prefix("udpm://")
            .ok_or_else(|| TransportError::InvalidUrl(format!("expected udpm:// scheme: {url}")))?;

        let (addr_part, query) = match rest.split_once('?') {
            Some((addr, query)) => (addr, query),
            None => (rest, ""),
        };

        let group: Ipv4Addr = addr_part
            .parse()
            .map_err(|_| TransportError::InvalidUrl(format!("bad group address: {addr_part}")))?;
        if !group.is_multicast() {
            return Err(TransportError::InvalidUrl(format!(
                "{group} is not a multicast address"
            )));
        }

        let mut port = None;
        let mut ttl = 0u8;
        let mut recv_buf_size = None;

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                TransportError::InvalidUrl(format!("malformed query option: {pair}"))
            })?;
            match key {
                "port" => {
                    port = Some(value.parse::<u16>().map_err(|_| {
                        TransportError::InvalidUrl(format!("bad port: {value}"))
                    })?);
                }
                "ttl" => {
                    ttl = value.parse::<u8>().map_err(|_| {
                        TransportError::InvalidUrl(format!("bad ttl: {value}"))
                    })?;
                }
                "recv_buf_size" => {
                    recv_buf_size = Some(value.parse::<usize>().map_err(|_| {
                        TransportError::InvalidUrl(format!("bad recv_buf_size: {value}"))
                    })?);
                }
                _ => {
                    // Unknown keys are tolerated so that URLs written for
                    // richer implementations keep working.
                }
            }
        }

        let port = port
            .ok_or_else(|| TransportError::InvalidUrl("missing required option: port".into()))?;

        let mut config = UdpmConfig::new(group, port);
        config.ttl = ttl;
        config.recv_buf_size = recv_buf_size;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_url() {
        let config = UdpmConfig::from_url("udpm://239.255.76.67?port=7667").unwrap();
        assert_eq!(config.group, Ipv4Addr::new(239, 255, 76, 67));
        assert_eq!(config.port, 7667);
        assert_eq!(config.ttl, 0);
        assert_eq!(config.recv_buf_size, None);
    }

    #[test]
    fn parses_ttl_and_recv_buf() {
        let config =
            UdpmConfig::from_url("udpm://239.255.76.67?port=7667&ttl=1&recv_buf_size=2097152")
                .unwrap();
        assert_eq!(config.ttl, 1);
        assert_eq!(config.recv_buf_size, Some(2 * 1024 * 1024));
    }

    #[test]
    fn ignores_unknown_keys() {
        let config = UdpmConfig::from_url("udpm://239.255.76.67?port=7667&frobnicate=yes").unwrap();
        assert_eq!(config.port, 7667);
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert!(matches!(
            UdpmConfig::from_url("udp://239.255.76.67?port=7667"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rejects_missing_port() {
        assert!(matches!(
            UdpmConfig::from_url("udpm://239.255.76.67"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rejects_non_multicast_group() {
        assert!(matches!(
            UdpmConfig::from_url("udpm://192.168.1.10?port=7667"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(UdpmConfig::from_url("udpm://239.255.76.67?port=99999").is_err());
        assert!(UdpmConfig::from_url("udpm://239.255.76.67?port=7667&ttl=300").is_err());
        assert!(UdpmConfig::from_url("udpm://239.255.76.67?port=x").is_err());
    }

    #[test]
    fn rejects_garbage_address() {
        assert!(UdpmConfig::from_url("udpm://not-an-ip?port=7667").is_err());
    }
}
