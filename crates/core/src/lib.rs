//! # rtsp-live — embeddable RTSP stack for live H.264/H.265 streaming
//!
//! A push/pull RTSP 1.0 implementation: a server that fans live video out
//! to subscribers, a client that pulls and reassembles streams, and a
//! publisher that pushes streams to an ingest server.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation, interleaved framing |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Packet header format, sequence/timestamp semantics, Sender Reports |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Session descriptions for DESCRIBE/ANNOUNCE |
//! | [RFC 6184](https://tools.ietf.org/html/rfc6184) | H.264 RTP payload | Single NALU / STAP / FU-A packetization |
//! | [RFC 7798](https://tools.ietf.org/html/rfc7798) | H.265 RTP payload | Single NALU / AP / FU packetization |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Server / Client / Publisher — public API      │
//! ├───────────────────────────────────────────────┤
//! │  Path registry — named endpoints, fan-out      │
//! │  Sessions      — per-subscriber queues, loops  │
//! ├───────────────────────────────────────────────┤
//! │  Protocol — RTSP messages, SDP, auth, handler  │
//! ├───────────────────────────────────────────────┤
//! │  Transport — TCP control, UDP media            │
//! │  Media     — NALU scan, pack/depack, jitter    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start (serve)
//!
//! ```no_run
//! use rtsp_live::{Codec, PathConfig, Server, ServerConfig};
//!
//! let mut server = Server::new(ServerConfig::default());
//! server.add_path(PathConfig::new("/live", Codec::H264));
//! server.start().unwrap();
//!
//! // Push Annex B frames; the server packetizes and fans out via RTP.
//! // server.push_h264("/live", &frame, pts_ms, is_key);
//! ```
//!
//! ## Quick start (pull)
//!
//! ```no_run
//! use rtsp_live::RtspClient;
//!
//! let mut client = RtspClient::new();
//! client.open("rtsp://127.0.0.1:8554/live").unwrap();
//! client.describe().unwrap();
//! client.setup(0).unwrap();
//! client.play(0).unwrap();
//! while let Some(frame) = client.receive_frame(1000) {
//!     // frame.data is an Annex B access unit
//! }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod media;
pub mod path;
pub mod protocol;
pub mod publisher;
pub mod server;

pub(crate) mod session;
pub(crate) mod transport;

pub use auth::{AuthConfig, AuthScheme};
pub use client::{
    ClientConfig, ClientState, ClientStats, ErrorCallback, FrameCallback, RtspClient, SessionInfo,
    SimplePlayer,
};
pub use error::{Result, RtspError};
pub use media::{Codec, FrameType, VideoFrame};
pub use path::PathConfig;
pub use publisher::{PublishMedia, PublisherConfig, PublisherState, RtspPublisher};
pub use server::{
    get_or_create_server, ClientCallback, FrameInput, Server, ServerConfig, ServerStatsSnapshot,
};
