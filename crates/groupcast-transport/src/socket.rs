//! Multicast socket construction and the timestamped receive syscall.
//!
//! Sockets are configured through `socket2`, converted to `std`, and
//! handed to tokio nonblocking. On unix the receive path uses `recvmsg`
//! so the kernel's `SO_TIMESTAMP` control message can be captured; when
//! the kernel does not provide a timestamp the wall clock at receive time
//! is used instead.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{SystemTime, UNIX_EPOCH};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::config::UdpmConfig;
use crate::error::TransportError;

/// Wall-clock microseconds since the epoch.
pub(crate) fn wallclock_micros() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_micros() as i64,
        Err(_) => 0,
    }
}

/// Surface a routing-table problem for the group before any socket does
/// real work. A connected probe fails immediately when the host has no
/// route to the multicast destination.
pub(crate) fn probe_route(dest: SocketAddrV4) -> Result<(), TransportError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket
        .connect(&SockAddr::from(dest))
        .map_err(TransportError::NoMulticastRoute)?;
    Ok(())
}

/// Build the transmit socket.
///
/// Deliberately left unconnected so multicast loopback to colocated
/// receivers keeps working.
pub(crate) fn create_send_socket(config: &UdpmConfig) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    if config.ttl == 0 {
        debug!("multicast TTL 0: traffic stays on this host");
    }
    socket.set_multicast_ttl_v4(config.ttl as u32)?;
    socket.set_multicast_loop_v4(true)?;

    // Windows defaults to a tiny send buffer.
    #[cfg(windows)]
    socket.set_send_buffer_size(256 * 1024)?;

    if let Ok(size) = socket.send_buffer_size() {
        debug!(bytes = size, "send buffer size");
    }

    socket.bind(&SockAddr::from(SocketAddrV4::new(
        Ipv4Addr::UNSPECIFIED,
        0,
    )))?;

    // The send socket also joins the group so its own datagrams loop
    // back. Windows may refuse the join on an unbound-port socket; that
    // is tolerated there.
    if let Err(e) = socket.join_multicast_v4(&config.group, &Ipv4Addr::UNSPECIFIED) {
        if cfg!(windows) {
            warn!(error = %e, "could not join group on the send socket; continuing");
        } else {
            return Err(e);
        }
    }

    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Build the receive socket, bound to `0.0.0.0:port` and joined to the
/// group.
///
/// Returns the socket and the kernel receive buffer size actually
/// granted.
pub(crate) fn create_recv_socket(
    config: &UdpmConfig,
) -> io::Result<(std::net::UdpSocket, usize)> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    // Let other processes on this host bind the same group and port.
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    if let Some(requested) = config.recv_buf_size {
        if let Err(e) = socket.set_recv_buffer_size(requested) {
            warn!(requested, error = %e, "could not set the kernel receive buffer size");
        }
    }
    let granted = socket.recv_buffer_size().unwrap_or(0);
    debug!(bytes = granted, "kernel receive buffer size");
    if let Some(requested) = config.recv_buf_size {
        if granted < requested {
            warn!(
                requested,
                granted, "kernel granted a smaller receive buffer than requested"
            );
        }
    }

    enable_kernel_timestamps(&socket);

    socket.bind(&SockAddr::from(SocketAddrV4::new(
        Ipv4Addr::UNSPECIFIED,
        config.port,
    )))?;
    socket.join_multicast_v4(&config.group, &Ipv4Addr::UNSPECIFIED)?;

    socket.set_nonblocking(true)?;
    Ok((socket.into(), granted))
}

/// Ask the kernel to timestamp incoming datagrams. Failure is fine; the
/// receive path falls back to the wall clock.
#[cfg(unix)]
fn enable_kernel_timestamps(socket: &Socket) {
    use nix::sys::socket::{setsockopt, sockopt};

    if let Err(e) = setsockopt(socket, sockopt::ReceiveTimestamp, &true) {
        debug!(error = %e, "kernel receive timestamps unavailable");
    }
}

#[cfg(not(unix))]
fn enable_kernel_timestamps(_socket: &Socket) {}

/// Receive one datagram, capturing the best available timestamp.
///
/// IPv6 sources are skipped; the transport is IPv4-only.
pub(crate) async fn recv_datagram(
    socket: &UdpSocket,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddrV4, i64)> {
    #[cfg(unix)]
    {
        use std::os::fd::AsRawFd;
        use tokio::io::Interest;

        let fd = socket.as_raw_fd();
        loop {
            socket.readable().await?;
            match socket.try_io(Interest::READABLE, || recvmsg_timestamped(fd, buf)) {
                Ok((size, from, kernel_utime)) => {
                    let utime = kernel_utime.unwrap_or_else(wallclock_micros);
                    return Ok((size, from, utime));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    #[cfg(not(unix))]
    {
        loop {
            let (size, addr) = socket.recv_from(buf).await?;
            if let std::net::SocketAddr::V4(from) = addr {
                return Ok((size, from, wallclock_micros()));
            }
        }
    }
}

/// Nonblocking `recvmsg` with `SO_TIMESTAMP` control-message capture.
#[cfg(unix)]
fn recvmsg_timestamped(
    fd: std::os::fd::RawFd,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddrV4, Option<i64>)> {
    use std::io::IoSliceMut;

    use nix::sys::socket::{ControlMessageOwned, MsgFlags, SockaddrIn, recvmsg};

    let mut iov = [IoSliceMut::new(buf)];
    let mut cmsgspace = nix::cmsg_space!(libc::timeval);

    let msg = recvmsg::<SockaddrIn>(fd, &mut iov, Some(&mut cmsgspace), MsgFlags::empty())
        .map_err(io::Error::from)?;

    let from = match msg.address {
        Some(addr) => SocketAddrV4::new(addr.ip(), addr.port()),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "datagram without a source address",
            ));
        }
    };

    let mut utime = None;
    if let Ok(cmsgs) = msg.cmsgs() {
        for cmsg in cmsgs {
            if let ControlMessageOwned::ScmTimestamp(tv) = cmsg {
                utime = Some(tv.tv_sec() as i64 * 1_000_000 + tv.tv_usec() as i64);
                break;
            }
        }
    }

    Ok((msg.bytes, from, utime))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> UdpmConfig {
        UdpmConfig::new(Ipv4Addr::new(239, 255, 76, 67), 0)
    }

    #[test]
    fn wallclock_is_plausible() {
        let t = wallclock_micros();
        // Sometime after 2020.
        assert!(t > 1_577_836_800_000_000);
    }

    #[test]
    fn recv_socket_reports_granted_buffer() {
        let mut config = test_config();
        config.recv_buf_size = Some(128 * 1024);
        match create_recv_socket(&config) {
            Ok((socket, granted)) => {
                assert!(socket.local_addr().is_ok());
                assert!(granted > 0);
            }
            // Environments without a multicast route cannot join.
            Err(e) => eprintln!("skipping: recv socket unavailable here: {e}"),
        }
    }

    #[test]
    fn send_socket_construction() {
        match create_send_socket(&test_config()) {
            Ok(socket) => assert!(socket.local_addr().is_ok()),
            Err(e) => eprintln!("skipping: send socket unavailable here: {e}"),
        }
    }
}
