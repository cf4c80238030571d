// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP multicast [`Transport`] implementation.
//!
//! Joins a single multicast group on every non-loopback IPv4 interface
//! discovered on the host, tolerating `EADDRINUSE` from a group already
//! joined on the same physical NIC. RSP only ever has one group to join,
//! and loopback delivery is always enabled: a single-member group must
//! still be able to talk to itself.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket as StdUdpSocket};
use std::sync::Arc;

use mio::net::UdpSocket as MioUdpSocket;
use socket2::{Domain, Protocol, Socket, Type};

use super::{DatagramSender, Inbound, SendRateLimiter, Transport};
use crate::config::ENV_MULTICAST_IF;

/// UDP multicast transport bound to a single RSP group.
pub struct UdpMulticastTransport {
    socket: MioUdpSocket,
    /// Clone of the same underlying fd, kept separate from `socket` so the
    /// application writer thread can send concurrently with the network
    /// thread's exclusive `recv`/`register` use of `socket` (`sendto` on a
    /// UDP socket is thread-safe; only the `mio` registration needs a
    /// single owner).
    send_handle: Arc<StdUdpSocket>,
    group: SocketAddrV4,
    mtu: usize,
    recv_buf: Vec<u8>,
    limiter: Arc<SendRateLimiter>,
}

/// Thread-safe sender handle for [`UdpMulticastTransport`].
struct UdpSender {
    socket: Arc<StdUdpSocket>,
    group: SocketAddr,
    limiter: Arc<SendRateLimiter>,
}

impl DatagramSender for UdpSender {
    fn send(&self, buf: &[u8]) -> io::Result<()> {
        self.socket.send_to(buf, self.group)?;
        Ok(())
    }

    fn wait_writable(&self, n_bytes: usize) {
        self.limiter.wait_writable(n_bytes);
    }

    fn adapt_send_rate(&self, delta_percent: i32) -> u32 {
        self.limiter.adapt_send_rate(delta_percent)
    }

    fn current_rate_bps(&self) -> u32 {
        self.limiter.current_rate_bps()
    }
}

impl UdpMulticastTransport {
    /// Bind a socket to `group:port`, join the group on every suitable
    /// interface, and return a ready-to-register transport.
    pub fn bind(
        group: Ipv4Addr,
        port: u16,
        mtu: usize,
        min_rate_bps: u32,
        max_rate_bps: u32,
    ) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket.bind(&bind_addr.into())?;

        let std_socket: StdUdpSocket = socket.into();
        join_group_on_all_interfaces(&std_socket, &group)?;
        std_socket.set_multicast_loop_v4(true)?;
        let _ = std_socket.set_multicast_ttl_v4(1);

        let send_handle = Arc::new(std_socket.try_clone()?);
        let mio_socket = MioUdpSocket::from_std(std_socket);
        let limiter = SendRateLimiter::new(max_rate_bps / 2, min_rate_bps, max_rate_bps);

        Ok(Self {
            socket: mio_socket,
            send_handle,
            group: SocketAddrV4::new(group, port),
            mtu,
            recv_buf: vec![0u8; mtu],
            limiter,
        })
    }
}

impl Transport for UdpMulticastTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.socket.send_to(buf, SocketAddr::V4(self.group))?;
        Ok(())
    }

    fn recv(&mut self) -> io::Result<Option<Inbound>> {
        match self.socket.recv_from(&mut self.recv_buf) {
            Ok((n, from)) => Ok(Some(Inbound {
                data: self.recv_buf[..n].to_vec(),
                from,
            })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn register(&mut self, registry: &mio::Registry, token: mio::Token) -> io::Result<()> {
        registry.register(&mut self.socket, token, mio::Interest::READABLE)
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn sender(&self) -> Arc<dyn DatagramSender> {
        Arc::new(UdpSender {
            socket: Arc::clone(&self.send_handle),
            group: SocketAddr::V4(self.group),
            limiter: Arc::clone(&self.limiter),
        })
    }
}

/// Join `group` on every non-loopback IPv4 interface, tolerating
/// `EADDRINUSE` (already joined on the same physical NIC). Falls back to
/// `UNSPECIFIED` if no suitable interface is found.
fn join_group_on_all_interfaces(socket: &StdUdpSocket, group: &Ipv4Addr) -> io::Result<()> {
    let interfaces = multicast_interfaces()?;

    if interfaces.is_empty() {
        log::debug!("[RSP] no suitable interfaces found, joining {group} on UNSPECIFIED");
        return socket.join_multicast_v4(group, &Ipv4Addr::UNSPECIFIED);
    }

    let mut joined_any = false;
    for iface in &interfaces {
        match socket.join_multicast_v4(group, iface) {
            Ok(()) => {
                joined_any = true;
                log::debug!("[RSP] joined {group} on interface {iface}");
            }
            Err(e) if e.raw_os_error() == Some(98) => {
                joined_any = true;
                log::debug!("[RSP] {group} already joined on {iface}, skipping");
            }
            Err(e) => {
                log::debug!("[RSP] join {group} on {iface} failed (non-fatal): {e}");
            }
        }
    }

    if joined_any {
        Ok(())
    } else {
        socket.join_multicast_v4(group, &Ipv4Addr::UNSPECIFIED)
    }
}

/// Discover non-loopback IPv4 interfaces suitable for multicast, honoring
/// `RSP_MULTICAST_IF` as a testing override.
fn multicast_interfaces() -> io::Result<Vec<Ipv4Addr>> {
    if let Ok(var) = std::env::var(ENV_MULTICAST_IF) {
        if let Ok(addr) = var.parse::<Ipv4Addr>() {
            log::debug!("[RSP] using {ENV_MULTICAST_IF} override: {addr}");
            return Ok(vec![addr]);
        }
    }

    use std::net::IpAddr;
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            log::debug!("[RSP] failed to list network interfaces: {e}");
            return Ok(vec![]);
        }
    };

    let mut addrs = Vec::new();
    for (_name, ip) in interfaces {
        if let IpAddr::V4(ipv4) = ip {
            if !ipv4.is_loopback() {
                addrs.push(ipv4);
            }
        }
    }
    Ok(addrs)
}
