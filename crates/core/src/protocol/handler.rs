//! Per-connection RTSP method handling and session state machine.
//!
//! ```text
//! Init ──DESCRIBE──▶ Described ──SETUP──▶ SetupComplete ──PLAY──▶ Playing
//!                                               ▲                 │   ▲
//!                                               │               PAUSE PLAY
//!                                       TEARDOWN (any state       │   │
//!                                        with a session)        Paused┘
//! ```
//!
//! Unsuccessful handlers respond with a status code and leave the state
//! unchanged. A connection carries at most one session; a second SETUP
//! answers 459.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::auth::{AuthDecision, ConnectionAuth};
use crate::media::packer::RtpPacker;
use crate::protocol::request::{Method, RtspRequest};
use crate::protocol::response::RtspResponse;
use crate::protocol::transport::{self, TransportHeader, TransportKind};
use crate::session::{Subscriber, SubscriberTransport};
use crate::transport::tcp::ServerContext;
use crate::transport::RtpSender;

/// Connection-level protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Init,
    Described,
    SetupComplete,
    Playing,
    Paused,
}

pub(crate) struct ConnectionHandler {
    ctx: ServerContext,
    control: Arc<Mutex<TcpStream>>,
    peer: SocketAddr,
    auth: ConnectionAuth,
    state: ConnState,
    session: Option<Arc<Subscriber>>,
}

impl ConnectionHandler {
    pub fn new(ctx: &ServerContext, control: Arc<Mutex<TcpStream>>, peer: SocketAddr) -> Self {
        ConnectionHandler {
            ctx: ctx.clone(),
            control,
            peer,
            auth: ConnectionAuth::new(),
            state: ConnState::Init,
            session: None,
        }
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0").to_string();
        self.ctx.stats.requests_total.fetch_add(1, Ordering::Relaxed);

        if let Some(response) = self.check_authorization(request, &cseq) {
            return response;
        }
        if let Some(session) = &self.session {
            session.touch();
        }

        match request.method {
            Some(Method::Options) => RtspResponse::options(&cseq),
            Some(Method::Describe) => self.handle_describe(&cseq, &request.uri),
            Some(Method::Setup) => self.handle_setup(&cseq, request),
            Some(Method::Play) => self.handle_play(&cseq, request),
            Some(Method::Pause) => self.handle_pause(&cseq, request),
            Some(Method::Teardown) => self.handle_teardown(&cseq),
            Some(Method::GetParameter) | Some(Method::SetParameter) => {
                self.handle_parameter(&cseq, request)
            }
            Some(Method::Announce) | Some(Method::Record) | None => {
                tracing::warn!(method = %request.method_name, "unsupported RTSP method");
                RtspResponse::error(&cseq, 501, "Not Implemented")
            }
        }
    }

    /// OPTIONS is exempt; everything else needs valid credentials when auth
    /// is configured.
    fn check_authorization(&mut self, request: &RtspRequest, cseq: &str) -> Option<RtspResponse> {
        let cfg = self.ctx.config.auth.as_ref()?;
        if request.method == Some(Method::Options) {
            return None;
        }
        match self
            .auth
            .check(cfg, &request.method_name, request.header("Authorization"))
        {
            AuthDecision::Granted => None,
            AuthDecision::Denied { challenge, stale } => {
                self.ctx.stats.auth_challenges.fetch_add(1, Ordering::Relaxed);
                self.ctx.stats.auth_failures.fetch_add(1, Ordering::Relaxed);
                tracing::info!(peer = %self.peer, stale, "request rejected with 401");
                Some(
                    RtspResponse::error(cseq, 401, "Unauthorized")
                        .add_header("WWW-Authenticate", &challenge),
                )
            }
        }
    }

    fn handle_describe(&mut self, cseq: &str, uri: &str) -> RtspResponse {
        let name = extract_path(uri);
        let path = match self.ctx.registry.get(&name) {
            Some(path) => path,
            None => {
                tracing::debug!(path = %name, "DESCRIBE for unknown path");
                return RtspResponse::error(cseq, 404, "Not Found");
            }
        };
        if self.state == ConnState::Init {
            self.state = ConnState::Described;
        }
        RtspResponse::describe(cseq, path.sdp())
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if self.session.is_some() {
            return RtspResponse::error(cseq, 459, "Aggregate Operation Not Allowed");
        }
        if !matches!(self.state, ConnState::Init | ConnState::Described) {
            return RtspResponse::error(cseq, 455, "Method Not Valid In This State");
        }

        let name = extract_path(&request.uri);
        let path = match self.ctx.registry.resolve_setup(&name) {
            Some(path) => path,
            None => return RtspResponse::error(cseq, 404, "Not Found"),
        };

        let header = match request.header("Transport").and_then(TransportHeader::parse) {
            Some(header) => header,
            None => {
                tracing::warn!(peer = %self.peer, "SETUP with missing or malformed Transport");
                return RtspResponse::error(cseq, 400, "Bad Request");
            }
        };
        if header.multicast {
            return RtspResponse::error(cseq, 461, "Unsupported Transport");
        }

        let session_id = generate_session_id();
        let ssrc = derive_ssrc(&session_id);
        let codec = path.codec();
        let packer = RtpPacker::new(codec, codec.default_payload_type(), ssrc);

        let (subscriber_transport, transport_line) = match header.kind {
            TransportKind::Tcp => {
                let channel = header.rtp_channel();
                (
                    SubscriberTransport::Interleaved {
                        control: self.control.clone(),
                        channel,
                    },
                    transport::tcp_response(channel),
                )
            }
            TransportKind::Udp => {
                let (client_rtp, client_rtcp) = match header.client_ports {
                    Some(ports) => ports,
                    None => {
                        tracing::warn!(peer = %self.peer, "UDP SETUP without client_port");
                        return RtspResponse::error(cseq, 400, "Bad Request");
                    }
                };
                let client_rtcp = if client_rtcp != 0 { client_rtcp } else { client_rtp + 1 };
                let mut sender = match RtpSender::bind_in_range(
                    self.ctx.config.rtp_port_start,
                    self.ctx.config.rtp_port_end,
                ) {
                    Ok(sender) => sender,
                    Err(e) => {
                        tracing::error!(error = %e, "RTP port allocation failed");
                        return RtspResponse::error(cseq, 500, "Internal Server Error");
                    }
                };
                sender.set_peer(self.peer.ip(), client_rtp, client_rtcp);
                let line = transport::udp_response(
                    client_rtp,
                    client_rtcp,
                    sender.local_rtp_port(),
                    sender.local_rtcp_port(),
                );
                (SubscriberTransport::Udp(sender), line)
            }
        };

        let subscriber = Subscriber::new(
            session_id.clone(),
            path.name.clone(),
            self.peer.ip(),
            subscriber_transport,
            packer,
            self.ctx.stats.clone(),
        );
        path.add_subscriber(subscriber.clone());
        self.ctx.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.ctx.callbacks.client_connected(&path.name, self.peer.ip());

        tracing::info!(
            session_id = %session_id,
            path = %path.name,
            peer = %self.peer,
            transport = %transport_line,
            "session created via SETUP"
        );

        self.session = Some(subscriber);
        self.state = ConnState::SetupComplete;
        RtspResponse::setup(cseq, &self.session_header(&session_id), &transport_line)
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session = match &self.session {
            Some(session) => session.clone(),
            None => return RtspResponse::error(cseq, 455, "Method Not Valid In This State"),
        };
        if let Some(response) = self.check_session_match(cseq, request, &session.id) {
            return response;
        }

        session.start();
        self.state = ConnState::Playing;
        tracing::info!(session_id = %session.id, "session playing");
        RtspResponse::play(cseq, &self.session_header(&session.id))
    }

    fn handle_pause(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session = match &self.session {
            Some(session) => session.clone(),
            None => return RtspResponse::error(cseq, 455, "Method Not Valid In This State"),
        };
        if let Some(response) = self.check_session_match(cseq, request, &session.id) {
            return response;
        }
        if self.state != ConnState::Playing {
            return RtspResponse::error(cseq, 455, "Method Not Valid In This State");
        }

        session.stop();
        self.state = ConnState::Paused;
        tracing::info!(session_id = %session.id, "session paused");
        RtspResponse::ok(cseq).add_header("Session", &self.session_header(&session.id))
    }

    /// GET_PARAMETER / SET_PARAMETER double as keepalives: 200 whenever the
    /// Session header matches the active session or is absent.
    fn handle_parameter(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session = match &self.session {
            Some(session) => session.clone(),
            None => return RtspResponse::error(cseq, 454, "Session Not Found"),
        };
        if let Some(id) = request.session_id() {
            if id != session.id {
                return RtspResponse::error(cseq, 454, "Session Not Found");
            }
        }
        RtspResponse::ok(cseq).add_header("Session", &session.id)
    }

    fn handle_teardown(&mut self, cseq: &str) -> RtspResponse {
        if let Some(session) = self.session.take() {
            self.close_session(&session);
            tracing::info!(session_id = %session.id, "session terminated via TEARDOWN");
        }
        // The connection may set up a fresh session afterwards.
        self.state = ConnState::Init;
        RtspResponse::teardown(cseq)
    }

    /// Session cleanup when the peer drops the connection without TEARDOWN.
    pub fn on_disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            self.close_session(&session);
            tracing::info!(session_id = %session.id, "session cleaned up on disconnect");
        }
    }

    fn close_session(&self, session: &Arc<Subscriber>) {
        if let Some(path) = self.ctx.registry.get(&session.path_name) {
            path.remove_subscriber(&session.id);
        } else {
            session.stop();
        }
        self.ctx.stats.sessions_closed.fetch_add(1, Ordering::Relaxed);
        self.ctx
            .callbacks
            .client_disconnected(&session.path_name, self.peer.ip());
    }

    fn check_session_match(
        &self,
        cseq: &str,
        request: &RtspRequest,
        session_id: &str,
    ) -> Option<RtspResponse> {
        match request.session_id() {
            Some(id) if id == session_id => None,
            _ => Some(RtspResponse::error(cseq, 454, "Session Not Found")),
        }
    }

    fn session_header(&self, session_id: &str) -> String {
        format!(
            "{};timeout={}",
            session_id,
            self.ctx.config.session_timeout_ms / 1000
        )
    }
}

/// Extract the URL path from an RTSP URI.
///
/// `rtsp://host:8554/live/cam1` → `/live/cam1`; bare paths pass through;
/// query strings are stripped; anything else maps to `/`.
pub(crate) fn extract_path(uri: &str) -> String {
    let path = if uri.starts_with('/') && !uri.contains("://") {
        uri
    } else if let Some(after) = uri.split_once("://").map(|(_, rest)| rest) {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => "/",
        }
    } else {
        "/"
    };
    match path.find('?') {
        Some(query) => path[..query].to_string(),
        None => path.to_string(),
    }
}

static SESSION_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Unique hex session ID (random prefix, monotonic suffix).
fn generate_session_id() -> String {
    format!(
        "{:08X}{:08X}",
        rand::random::<u32>(),
        SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Session SSRC: fixed seed XOR a hash of the session ID.
fn derive_ssrc(session_id: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    0x12345678 ^ (hasher.finish() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_path_variants() {
        assert_eq!(extract_path("rtsp://host:8554/live/cam1"), "/live/cam1");
        assert_eq!(extract_path("rtsp://host:8554/live?token=x"), "/live");
        assert_eq!(extract_path("/live/cam1"), "/live/cam1");
        assert_eq!(extract_path("rtsp://host:8554"), "/");
        assert_eq!(extract_path("*"), "/");
    }

    #[test]
    fn session_ids_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn ssrc_depends_on_session_id() {
        assert_ne!(derive_ssrc("AAAA"), derive_ssrc("BBBB"));
        assert_eq!(derive_ssrc("AAAA"), derive_ssrc("AAAA"));
    }
}
