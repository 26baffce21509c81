//! RTSP Transport header (RFC 2326 §12.39).
//!
//! ```text
//! Client → Server:
//!   Transport: RTP/AVP;unicast;client_port=8000-8001
//!   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
//!
//! Server → Client:
//!   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=10000-10001
//!   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
//! ```

/// Transport profile requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// `RTP/AVP` over UDP.
    Udp,
    /// `RTP/AVP/TCP` interleaved on the control connection.
    Tcp,
}

/// Default interleaved channels when the client omits `interleaved=`.
pub const DEFAULT_RTP_CHANNEL: u8 = 0;
pub const DEFAULT_RTCP_CHANNEL: u8 = 1;

/// Parsed client-side Transport header.
#[derive(Debug, Clone)]
pub struct TransportHeader {
    pub kind: TransportKind,
    pub multicast: bool,
    /// `client_port=RTP-RTCP` pair (UDP).
    pub client_ports: Option<(u16, u16)>,
    /// `interleaved=RTP-RTCP` channel pair (TCP).
    pub interleaved: Option<(u8, u8)>,
}

impl TransportHeader {
    /// Parse the semicolon-separated Transport parameters. Returns `None`
    /// when the profile token is missing or unrecognized.
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(';').map(str::trim);

        let kind = match parts.next()? {
            p if p.eq_ignore_ascii_case("RTP/AVP/TCP") => TransportKind::Tcp,
            p if p.eq_ignore_ascii_case("RTP/AVP") || p.eq_ignore_ascii_case("RTP/AVP/UDP") => {
                TransportKind::Udp
            }
            _ => return None,
        };

        let mut th = TransportHeader {
            kind,
            multicast: false,
            client_ports: None,
            interleaved: None,
        };

        for part in parts {
            if part.eq_ignore_ascii_case("multicast") {
                th.multicast = true;
            } else if let Some(ports) = part.strip_prefix("client_port=") {
                th.client_ports = parse_pair::<u16>(ports);
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                th.interleaved = parse_pair::<u8>(channels);
            }
        }

        Some(th)
    }

    /// RTP channel for interleaved delivery (RTCP uses channel + 1).
    pub fn rtp_channel(&self) -> u8 {
        self.interleaved
            .map(|(rtp, _)| rtp)
            .unwrap_or(DEFAULT_RTP_CHANNEL)
    }
}

fn parse_pair<T: std::str::FromStr>(s: &str) -> Option<(T, T)> {
    let (a, b) = s.split_once('-')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Server-side Transport response line for UDP delivery.
pub fn udp_response(
    client_rtp: u16,
    client_rtcp: u16,
    server_rtp: u16,
    server_rtcp: u16,
) -> String {
    format!(
        "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
        client_rtp, client_rtcp, server_rtp, server_rtcp
    )
}

/// Server-side Transport response line for interleaved delivery.
pub fn tcp_response(rtp_channel: u8) -> String {
    format!(
        "RTP/AVP/TCP;unicast;interleaved={}-{}",
        rtp_channel,
        rtp_channel + 1
    )
}
