//! The transport facade: socket lifecycle and the four transport
//! operations.

use std::future::Future;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::info;

use groupcast_core::constants::{MTU, RECV_SLAB_SIZE};
use groupcast_core::types::ChannelName;

use crate::config::UdpmConfig;
use crate::error::TransportError;
use crate::msg::Message;
use crate::recv::{Ingest, RecvEngine, TransportStats};
use crate::send::SendPipeline;
use crate::socket;

/// The transport operations consumed by a dispatcher layer.
pub trait Transport: Send + Sync {
    /// Largest payload accepted by [`Transport::send`].
    fn mtu(&self) -> usize;

    /// Publish `payload` on `channel`. Blocks only on kernel socket
    /// buffer backpressure.
    fn send(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Channel-level delivery gating. This transport receives everything
    /// on the group; per-channel filtering is the dispatcher's concern,
    /// so this is an accepted no-op.
    fn set_recv_enabled(&self, channel: &str, enabled: bool) -> Result<(), TransportError>;

    /// Return the next complete message, waiting at most `timeout`.
    ///
    /// `Err(TransportError::Timeout)` when nothing arrived in time.
    fn recv(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Message, TransportError>> + Send;
}

struct RecvState {
    socket: UdpSocket,
    /// Datagrams land here first so a cancelled `recv` never strands a
    /// checked-out slab.
    scratch: Box<[u8]>,
    engine: RecvEngine,
}

/// UDP multicast transport instance.
///
/// Sends may be issued from any task; the transmit lock keeps fragments
/// of concurrent messages from interleaving. Receiving is driven by
/// [`Transport::recv`]; concurrent calls serialize on the receive state.
pub struct UdpmTransport {
    config: UdpmConfig,
    sender: Mutex<SendPipeline>,
    recv: Mutex<RecvState>,
}

impl UdpmTransport {
    /// Open sockets, join the group, and allocate receive resources.
    pub async fn open(config: UdpmConfig) -> Result<Self, TransportError> {
        let dest = SocketAddrV4::new(config.group, config.port);

        // A missing multicast route should fail construction, not the
        // first send.
        socket::probe_route(dest)?;

        let send_std = socket::create_send_socket(&config)?;
        let (recv_std, kernel_rbuf) = socket::create_recv_socket(&config)?;

        let send_socket = Arc::new(UdpSocket::from_std(send_std)?);
        let recv_socket = UdpSocket::from_std(recv_std)?;

        info!(
            group = %config.group,
            port = config.port,
            ttl = config.ttl,
            "multicast transport up"
        );

        let engine = RecvEngine::new(&config, kernel_rbuf);
        Ok(Self {
            config,
            sender: Mutex::new(SendPipeline::new(send_socket, dest)),
            recv: Mutex::new(RecvState {
                socket: recv_socket,
                scratch: vec![0u8; RECV_SLAB_SIZE].into_boxed_slice(),
                engine,
            }),
        })
    }

    /// Open a transport from a `udpm://<group>?port=<p>&ttl=<t>` URL.
    pub async fn from_url(url: &str) -> Result<Self, TransportError> {
        Self::open(UdpmConfig::from_url(url)?).await
    }

    pub fn config(&self) -> &UdpmConfig {
        &self.config
    }

    /// Receive-side counters since the last health report.
    pub async fn stats(&self) -> TransportStats {
        self.recv.lock().await.engine.stats()
    }

    async fn recv_inner(&self) -> Result<Message, TransportError> {
        let mut guard = self.recv.lock().await;
        let state = &mut *guard;
        loop {
            state.engine.maybe_report();

            let (size, from, utime) =
                socket::recv_datagram(&state.socket, &mut state.scratch).await?;

            let Some(mut slab) = state.engine.checkout() else {
                state.engine.note_dropped();
                continue;
            };
            slab.buf_mut()[..size].copy_from_slice(&state.scratch[..size]);
            slab.size = size;
            slab.from = from;
            slab.recv_utime = utime;

            match state.engine.ingest(slab) {
                Ingest::Complete(msg) => return Ok(msg),
                Ingest::Incomplete | Ingest::Discarded => continue,
            }
        }
    }
}

impl Transport for UdpmTransport {
    fn mtu(&self) -> usize {
        MTU
    }

    async fn send(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError> {
        let channel = ChannelName::new(channel)?;
        self.sender.lock().await.send(&channel, payload).await
    }

    fn set_recv_enabled(&self, _channel: &str, _enabled: bool) -> Result<(), TransportError> {
        Ok(())
    }

    async fn recv(&self, timeout: Option<Duration>) -> Result<Message, TransportError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.recv_inner())
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => self.recv_inner().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Socket-level behavior is covered by the integration tests; these
    // exercise the parts that need no network.

    #[tokio::test]
    async fn from_url_rejects_bad_urls_before_touching_sockets() {
        assert!(matches!(
            UdpmTransport::from_url("udpm://1.2.3.4?port=7667").await,
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            UdpmTransport::from_url("tcp://239.255.76.67?port=7667").await,
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
