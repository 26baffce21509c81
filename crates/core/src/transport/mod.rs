//! Network transport: TCP signaling and RTP delivery.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): one control connection per client, thread per
//!   connection. Under interleaved transport the same connection also
//!   carries `$`-framed RTP/RTCP (RFC 2326 §10.12).
//! - **UDP** ([`udp`]): per-session RTP/RTCP socket pairs bound from a
//!   configured port range.

pub(crate) mod tcp;
pub(crate) mod udp;

pub(crate) use udp::{bind_udp_pair, RtpSender};
