//! RTSP push-side publisher.
//!
//! Drives ANNOUNCE → SETUP → RECORD against an ingest server, then packs
//! and sends frames over UDP. State machine:
//!
//! ```text
//! Open ──ANNOUNCE──▶ Announced ──SETUP──▶ SetupComplete ──RECORD──▶ Recording
//!   ▲                                                                  │
//!   └──────────────────────────── TEARDOWN ─────────────────────────────┘
//! ```
//!
//! Method failures leave the state unchanged; TEARDOWN is best-effort and
//! always releases the packer and port pair.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::media::packer::RtpPacker;
use crate::media::{Codec, VideoFrame};
use crate::protocol::request::{build_request, Method};
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp::{self, SdpVideo};
use crate::transport::tcp::read_message;
use crate::transport::RtpSender;

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub user_agent: String,
    /// Local port range scanned for the RTP/RTCP send pair.
    pub rtp_port_start: u16,
    pub rtp_port_end: u16,
    /// Timeout for request/response exchanges.
    pub receive_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            user_agent: "rtsp-live/0.1".to_string(),
            rtp_port_start: 30_000,
            rtp_port_end: 30_200,
            receive_timeout_ms: 5_000,
        }
    }
}

/// Media description announced to the server.
#[derive(Debug, Clone)]
pub struct PublishMedia {
    pub codec: Codec,
    pub payload_type: u8,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub vps: Vec<u8>,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    /// Control track suffix for the SETUP URI.
    pub control_track: String,
}

impl PublishMedia {
    pub fn new(codec: Codec) -> Self {
        PublishMedia {
            codec,
            payload_type: codec.default_payload_type(),
            width: 1920,
            height: 1080,
            fps: 30,
            vps: Vec::new(),
            sps: Vec::new(),
            pps: Vec::new(),
            control_track: "streamid=0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Open,
    Announced,
    SetupComplete,
    Recording,
    Closed,
}

/// Push-side RTSP client.
///
/// ```no_run
/// use rtsp_live::{Codec, PublishMedia, RtspPublisher};
///
/// let mut publisher = RtspPublisher::new();
/// publisher.open("rtsp://ingest.example:8554/live/cam1").unwrap();
/// publisher.announce(PublishMedia::new(Codec::H264)).unwrap();
/// publisher.setup().unwrap();
/// publisher.record().unwrap();
/// // publisher.push_h264(&frame, pts_ms, is_key);
/// ```
pub struct RtspPublisher {
    config: PublisherConfig,
    state: PublisherState,
    socket: Option<TcpStream>,
    host: String,
    request_url: String,
    cseq: u32,
    session_id: Option<String>,
    media: Option<PublishMedia>,
    sender: Option<RtpSender>,
    packer: Option<Mutex<RtpPacker>>,
}

impl RtspPublisher {
    pub fn new() -> Self {
        Self::with_config(PublisherConfig::default())
    }

    pub fn with_config(config: PublisherConfig) -> Self {
        RtspPublisher {
            config,
            state: PublisherState::Closed,
            socket: None,
            host: String::new(),
            request_url: String::new(),
            cseq: 0,
            session_id: None,
            media: None,
            sender: None,
            packer: None,
        }
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.state == PublisherState::Recording
    }

    /// Connect the control socket to `rtsp://host[:port]/path`.
    pub fn open(&mut self, url: &str) -> Result<()> {
        let rest = url
            .strip_prefix("rtsp://")
            .ok_or_else(|| RtspError::BadRequest(format!("bad URL: {}", url)))?;
        let (host_port, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], rest[slash..].to_string()),
            None => (rest, "/".to_string()),
        };
        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse::<u16>()
                    .map_err(|_| RtspError::BadRequest(format!("bad port in {}", url)))?,
            ),
            None => (host_port.to_string(), 554),
        };
        if host.is_empty() {
            return Err(RtspError::BadRequest(format!("bad URL: {}", url)));
        }

        let addr = (host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| RtspError::BadRequest(format!("unresolvable host: {}", host)))?;
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(10))?;
        stream.set_read_timeout(Some(Duration::from_millis(200)))?;

        self.socket = Some(stream);
        self.request_url = format!("rtsp://{}:{}{}", host, port, path);
        self.host = host;
        self.state = PublisherState::Open;
        Ok(())
    }

    /// ANNOUNCE the stream with an SDP body built from `media`.
    pub fn announce(&mut self, media: PublishMedia) -> Result<()> {
        if self.state != PublisherState::Open {
            return Err(RtspError::MethodNotValidInState("ANNOUNCE requires Open"));
        }
        let sdp = sdp::generate(&SdpVideo {
            codec: media.codec,
            payload_type: media.payload_type,
            width: media.width,
            height: media.height,
            vps: &media.vps,
            sps: &media.sps,
            pps: &media.pps,
            control: &media.control_track,
        });
        let response = self.send_request(
            Method::Announce,
            &self.request_url.clone(),
            &[("Content-Type", "application/sdp".to_string())],
            &sdp,
        )?;
        if !response.is_success() {
            return Err(RtspError::Internal(format!(
                "ANNOUNCE rejected: {}",
                response.status_code
            )));
        }
        self.media = Some(media);
        self.state = PublisherState::Announced;
        Ok(())
    }

    /// Bind the local RTP pair and learn the server's ports from the
    /// response's `server_port`.
    pub fn setup(&mut self) -> Result<()> {
        let media = match (&self.state, &self.media) {
            (PublisherState::Announced, Some(media)) => media.clone(),
            _ => return Err(RtspError::MethodNotValidInState("SETUP requires Announced")),
        };

        let sender = RtpSender::bind_in_range(self.config.rtp_port_start, self.config.rtp_port_end)?;
        let transport = format!(
            "RTP/AVP;unicast;client_port={}-{}",
            sender.local_rtp_port(),
            sender.local_rtcp_port()
        );
        let track_url = format!("{}/{}", self.request_url, media.control_track);

        let response = self.send_request(
            Method::Setup,
            &track_url,
            &[("Transport", transport)],
            "",
        )?;
        if !response.is_success() {
            return Err(RtspError::Internal(format!(
                "SETUP rejected: {}",
                response.status_code
            )));
        }

        self.session_id = response.session_id();
        if self.session_id.is_none() {
            return Err(RtspError::BadRequest("SETUP response without Session".into()));
        }
        let server_ports = response
            .header("Transport")
            .and_then(server_ports_from_transport)
            .ok_or_else(|| RtspError::BadRequest("SETUP response without server_port".into()))?;

        let mut sender = sender;
        let host_ip = self
            .socket
            .as_ref()
            .and_then(|s| s.peer_addr().ok())
            .map(|a| a.ip())
            .ok_or(RtspError::NotStarted)?;
        sender.set_peer(host_ip, server_ports.0, server_ports.1);

        let ssrc = rand::random::<u32>();
        self.packer = Some(Mutex::new(RtpPacker::new(
            media.codec,
            media.payload_type,
            ssrc,
        )));
        self.sender = Some(sender);
        self.state = PublisherState::SetupComplete;
        Ok(())
    }

    /// Switch the server into recording mode; frames may be pushed after.
    pub fn record(&mut self) -> Result<()> {
        if self.state != PublisherState::SetupComplete {
            return Err(RtspError::MethodNotValidInState("RECORD requires SETUP"));
        }
        let response = self.send_request(Method::Record, &self.request_url.clone(), &[], "")?;
        if !response.is_success() {
            return Err(RtspError::Internal(format!(
                "RECORD rejected: {}",
                response.status_code
            )));
        }
        self.state = PublisherState::Recording;
        Ok(())
    }

    /// Pack one frame and send its packets to the server.
    pub fn push_frame(&self, frame: &VideoFrame) -> Result<()> {
        if self.state != PublisherState::Recording {
            return Err(RtspError::MethodNotValidInState("push before RECORD"));
        }
        let packer = self.packer.as_ref().ok_or(RtspError::NotStarted)?;
        let sender = self.sender.as_ref().ok_or(RtspError::NotStarted)?;
        let packets = packer.lock().pack_frame(frame);
        for packet in &packets {
            sender.send_rtp(&packet.data)?;
        }
        Ok(())
    }

    pub fn push_h264(&self, data: &[u8], pts_ms: u64, is_key: bool) -> Result<()> {
        self.push_raw(Codec::H264, data, pts_ms, is_key)
    }

    pub fn push_h265(&self, data: &[u8], pts_ms: u64, is_key: bool) -> Result<()> {
        self.push_raw(Codec::H265, data, pts_ms, is_key)
    }

    fn push_raw(&self, codec: Codec, data: &[u8], pts_ms: u64, is_key: bool) -> Result<()> {
        let mut frame = VideoFrame::new(codec, Bytes::copy_from_slice(data), pts_ms, is_key);
        if let Some(media) = &self.media {
            frame.width = media.width;
            frame.height = media.height;
            frame.fps = media.fps;
        }
        self.push_frame(&frame)
    }

    /// Best-effort TEARDOWN; always resets to the Open state and releases
    /// the packer and port pair.
    pub fn teardown(&mut self) -> Result<()> {
        if self.socket.is_some() {
            let _ = self.send_request(Method::Teardown, &self.request_url.clone(), &[], "");
        }
        self.session_id = None;
        self.media = None;
        self.packer = None;
        self.sender = None;
        if self.state != PublisherState::Closed {
            self.state = PublisherState::Open;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        let _ = self.close_with_timeout(3_000);
    }

    pub fn close_with_timeout(&mut self, _deadline_ms: u64) -> bool {
        let _ = self.teardown();
        if let Some(socket) = self.socket.take() {
            let _ = socket.shutdown(std::net::Shutdown::Both);
        }
        self.state = PublisherState::Closed;
        true
    }

    fn send_request(
        &mut self,
        method: Method,
        uri: &str,
        extra: &[(&str, String)],
        body: &str,
    ) -> Result<RtspResponse> {
        self.cseq += 1;
        let mut headers: Vec<(&str, String)> = Vec::with_capacity(extra.len() + 2);
        headers.push(("User-Agent", self.config.user_agent.clone()));
        if let Some(session) = &self.session_id {
            headers.push(("Session", session.clone()));
        }
        headers.extend(extra.iter().map(|(n, v)| (*n, v.clone())));
        let wire = build_request(method, uri, self.cseq, &headers, body);

        let socket = self.socket.as_mut().ok_or(RtspError::NotStarted)?;
        socket.write_all(wire.as_bytes())?;
        let raw = read_message(socket, Duration::from_millis(self.config.receive_timeout_ms))?;
        RtspResponse::parse(&raw)
    }
}

impl Default for RtspPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RtspPublisher {
    fn drop(&mut self) {
        if self.socket.is_some() {
            let _ = self.close_with_timeout(1_000);
        }
    }
}

/// `server_port=A-B` out of a Transport response line.
fn server_ports_from_transport(header: &str) -> Option<(u16, u16)> {
    for part in header.split(';') {
        if let Some(ports) = part.trim().strip_prefix("server_port=") {
            let (rtp, rtcp) = ports.split_once('-')?;
            return Some((rtp.trim().parse().ok()?, rtcp.trim().parse().ok()?));
        }
    }
    None
}
