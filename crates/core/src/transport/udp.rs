//! UDP transport for RTP/RTCP delivery.

use std::net::{IpAddr, SocketAddr, UdpSocket};

use crate::error::{Result, RtspError};

/// Bind the first free `(port, port + 1)` pair in `[start, end)`.
///
/// Returns the two sockets and the RTP port.
pub(crate) fn bind_udp_pair(start: u16, end: u16) -> Option<(UdpSocket, UdpSocket, u16)> {
    let mut port = start;
    while port != 0 && port + 1 < end {
        if let Ok(rtp) = UdpSocket::bind(("0.0.0.0", port)) {
            if let Ok(rtcp) = UdpSocket::bind(("0.0.0.0", port + 1)) {
                return Some((rtp, rtcp, port));
            }
        }
        port = port.checked_add(2)?;
    }
    None
}

/// Outbound RTP/RTCP sender bound to a local port pair.
///
/// The RTCP socket sits on RTP + 1 per RFC 3550 §11. Peer addresses are
/// learned during SETUP (server side) or from the SETUP response's
/// `server_port` (publisher side).
pub(crate) struct RtpSender {
    rtp_socket: UdpSocket,
    rtcp_socket: UdpSocket,
    local_rtp_port: u16,
    peer_rtp: Option<SocketAddr>,
    peer_rtcp: Option<SocketAddr>,
}

impl RtpSender {
    /// Scan `[start, end)` and bind the first free port pair.
    pub fn bind_in_range(start: u16, end: u16) -> Result<Self> {
        let (rtp_socket, rtcp_socket, local_rtp_port) = bind_udp_pair(start, end)
            .ok_or_else(|| {
                RtspError::Internal(format!("no free RTP port pair in {}..{}", start, end))
            })?;
        Ok(RtpSender {
            rtp_socket,
            rtcp_socket,
            local_rtp_port,
            peer_rtp: None,
            peer_rtcp: None,
        })
    }

    pub fn set_peer(&mut self, ip: IpAddr, rtp_port: u16, rtcp_port: u16) {
        self.peer_rtp = Some(SocketAddr::new(ip, rtp_port));
        self.peer_rtcp = Some(SocketAddr::new(ip, rtcp_port));
    }

    pub fn local_rtp_port(&self) -> u16 {
        self.local_rtp_port
    }

    pub fn local_rtcp_port(&self) -> u16 {
        self.local_rtp_port + 1
    }

    pub fn send_rtp(&self, data: &[u8]) -> Result<usize> {
        let peer = self.peer_rtp.ok_or(RtspError::NotStarted)?;
        Ok(self.rtp_socket.send_to(data, peer)?)
    }

    pub fn send_rtcp(&self, data: &[u8]) -> Result<usize> {
        let peer = self.peer_rtcp.ok_or(RtspError::NotStarted)?;
        Ok(self.rtcp_socket.send_to(data, peer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_consecutive_pair() {
        let (rtp, rtcp, port) = bind_udp_pair(41_000, 41_100).expect("pair available");
        assert_eq!(rtp.local_addr().unwrap().port(), port);
        assert_eq!(rtcp.local_addr().unwrap().port(), port + 1);
    }

    #[test]
    fn skips_occupied_pairs() {
        let (_a, _b, first) = bind_udp_pair(41_200, 41_300).unwrap();
        let (_c, _d, second) = bind_udp_pair(41_200, 41_300).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn exhausted_range_returns_none() {
        let _hold = bind_udp_pair(41_400, 41_402).unwrap();
        assert!(bind_udp_pair(41_400, 41_402).is_none());
    }

    #[test]
    fn sender_round_trip() {
        let mut sender = RtpSender::bind_in_range(41_500, 41_600).unwrap();
        let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let addr = receiver.local_addr().unwrap();
        sender.set_peer(addr.ip(), addr.port(), addr.port());

        sender.send_rtp(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }

    #[test]
    fn send_without_peer_fails() {
        let sender = RtpSender::bind_in_range(41_700, 41_800).unwrap();
        assert!(sender.send_rtp(&[0]).is_err());
    }
}
