//! Datagram transport
//!
//! Builds the UDP sockets used by the four worker loops. Sockets are
//! configured through `socket2` and handed to tokio in non-blocking mode.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::core::{Config, Result};

fn new_socket(addr: &SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(*addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn into_tokio(socket: Socket) -> io::Result<UdpSocket> {
    UdpSocket::from_std(socket.into())
}

/// Wildcard address of the same family as `ip`
pub fn unspecified_for(ip: &IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Local address a slave listens on for group traffic
pub fn group_listen_addr(config: &Config) -> SocketAddr {
    if config.group.is_multicast() {
        SocketAddr::new(unspecified_for(&config.group), config.sync_port)
    } else {
        config.sync_target()
    }
}

/// Binds a slave socket for SYNC/FOLLOW_UP traffic
///
/// Address reuse is enabled so several slaves can share a host. When the
/// configured group is a multicast address the socket joins it.
pub fn bind_group_receiver(config: &Config, bind_addr: SocketAddr) -> Result<UdpSocket> {
    let socket = new_socket(&bind_addr)?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.bind(&bind_addr.into())?;

    let socket = into_tokio(socket)?;
    join_group(&socket, &config.group)?;
    Ok(socket)
}

/// Binds a master socket that sends SYNC/FOLLOW_UP to the group
pub fn bind_group_sender(config: &Config, bind_addr: SocketAddr) -> Result<UdpSocket> {
    let socket = new_socket(&bind_addr)?;
    if config.group.is_multicast() {
        match config.group {
            IpAddr::V4(_) => {
                socket.set_multicast_ttl_v4(config.multicast_ttl)?;
                socket.set_multicast_loop_v4(config.multicast_loop)?;
            }
            IpAddr::V6(_) => {
                socket.set_multicast_hops_v6(config.multicast_ttl)?;
                socket.set_multicast_loop_v6(config.multicast_loop)?;
            }
        }
    }
    socket.bind(&bind_addr.into())?;
    Ok(into_tokio(socket)?)
}

/// Binds a plain unicast socket
pub fn bind_unicast(bind_addr: SocketAddr) -> Result<UdpSocket> {
    let socket = new_socket(&bind_addr)?;
    socket.bind(&bind_addr.into())?;
    Ok(into_tokio(socket)?)
}

/// Joins `group` on the default interface if it is a multicast address
pub fn join_group(socket: &UdpSocket, group: &IpAddr) -> Result<()> {
    match group {
        IpAddr::V4(v4) if v4.is_multicast() => {
            socket.join_multicast_v4(*v4, Ipv4Addr::UNSPECIFIED)?;
        }
        IpAddr::V6(v6) if v6.is_multicast() => {
            socket.join_multicast_v6(v6, 0)?;
        }
        _ => {}
    }
    Ok(())
}

/// Leaves `group` if it is a multicast address
pub fn leave_group(socket: &UdpSocket, group: &IpAddr) -> Result<()> {
    match group {
        IpAddr::V4(v4) if v4.is_multicast() => {
            socket.leave_multicast_v4(*v4, Ipv4Addr::UNSPECIFIED)?;
        }
        IpAddr::V6(v6) if v6.is_multicast() => {
            socket.leave_multicast_v6(v6, 0)?;
        }
        _ => {}
    }
    Ok(())
}

/// Whether a receive error is benign and the socket remains usable
///
/// On Windows a `send_to` that triggered an ICMP port-unreachable surfaces
/// as `WSAECONNRESET` (10054) on the next receive.
pub fn is_transient(err: &io::Error) -> bool {
    err.raw_os_error() == Some(10054) || err.kind() == io::ErrorKind::ConnectionReset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_listen_addr() {
        let config = Config::default();
        assert_eq!(group_listen_addr(&config), "0.0.0.0:4445".parse().unwrap());

        let config = Config {
            group: "127.0.0.1".parse().unwrap(),
            sync_port: 5000,
            ..Default::default()
        };
        assert_eq!(group_listen_addr(&config), "127.0.0.1:5000".parse().unwrap());

        let config = Config {
            group: "ff02::1234".parse().unwrap(),
            ..Default::default()
        };
        assert_eq!(group_listen_addr(&config), "[::]:4445".parse().unwrap());
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_unicast_loopback() {
        let a = bind_unicast("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = bind_unicast("127.0.0.1:0".parse().unwrap()).unwrap();

        a.send_to(b"ping", b.local_addr().unwrap()).await.unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_group_receiver_shares_port() {
        let config = Config {
            group: "127.0.0.1".parse().unwrap(),
            ..Default::default()
        };
        let first = bind_group_receiver(&config, "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        let second = bind_group_receiver(&config, addr).unwrap();
        assert_eq!(second.local_addr().unwrap(), addr);
        // Unicast groups have no membership to release.
        leave_group(&first, &config.group).unwrap();
    }

    #[tokio::test]
    async fn test_multicast_membership() {
        let config = Config::default();
        assert!(config.group.is_multicast());

        let socket = match bind_group_receiver(&config, "0.0.0.0:0".parse().unwrap()) {
            Ok(socket) => socket,
            Err(err) => {
                eprintln!("skipping multicast membership test: {}", err);
                return;
            }
        };

        leave_group(&socket, &config.group).unwrap();
        // No membership is left to drop.
        assert!(leave_group(&socket, &config.group).is_err());
        join_group(&socket, &config.group).unwrap();
        leave_group(&socket, &config.group).unwrap();

        let sender = bind_group_sender(&config, "0.0.0.0:0".parse().unwrap()).unwrap();
        assert_eq!(sender.multicast_ttl_v4().unwrap(), config.multicast_ttl);
        assert!(sender.multicast_loop_v4().unwrap());
    }
}
