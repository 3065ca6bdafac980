//! Local address discovery for printable URLs
//!
//! The listeners bind 0.0.0.0, which is useless in a URL. Unless the
//! operator configured an advertised address, we find the interface the
//! default route uses by "connecting" a UDP socket; no packet is sent.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// The local address the default route would use, if any
pub fn route_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Best address to print: configured override, route probe, loopback
pub fn display_ip(advertised: Option<IpAddr>) -> IpAddr {
    advertised
        .or_else(route_local_ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
