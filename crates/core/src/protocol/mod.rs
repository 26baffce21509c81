//! RTSP protocol layer (RFC 2326).
//!
//! Text-based signaling: request/response parsing and serialization, the
//! Transport header, SDP generation and parsing, and the per-connection
//! method handler driving the session state machine.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! ```text
//! DESCRIBE rtsp://server/live RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! Methods handled: OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN,
//! ANNOUNCE, RECORD, GET_PARAMETER, SET_PARAMETER.

pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;
pub mod transport;

pub use request::{Method, RtspRequest};
pub use response::RtspResponse;
pub use transport::TransportHeader;
