//! SDP generation and parsing (RFC 4566).
//!
//! Generation produces the DESCRIBE/ANNOUNCE body for a single video
//! stream:
//!
//! ```text
//! v=0
//! o=- <sess-id> <sess-id> IN IP4 0.0.0.0
//! s=Stream
//! c=IN IP4 0.0.0.0
//! t=0 0
//! m=video 0 RTP/AVP 96
//! a=rtpmap:96 H264/90000
//! a=fmtp:96 packetization-mode=1;sprop-parameter-sets=<b64 SPS>,<b64 PPS>
//! a=framesize:96 1920-1080
//! a=control:stream
//! ```
//!
//! Parsing recovers codec, clock rate, payload type, dimensions, frame rate
//! and base64-decoded parameter sets from a server's DESCRIBE body.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::media::{Codec, VIDEO_CLOCK_RATE};

/// Control suffix appended to the presentation URL for the video track.
pub const CONTROL_TRACK: &str = "stream";

static SDP_SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn fresh_session_id() -> u64 {
    // Monotonic within the process, offset so ids differ across restarts.
    static BASE: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    let base = *BASE.get_or_init(|| u64::from(rand::random::<u32>()) << 16);
    base + SDP_SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Media-level parameters for SDP generation.
#[derive(Debug, Clone)]
pub struct SdpVideo<'a> {
    pub codec: Codec,
    pub payload_type: u8,
    pub width: u32,
    pub height: u32,
    pub vps: &'a [u8],
    pub sps: &'a [u8],
    pub pps: &'a [u8],
    pub control: &'a str,
}

/// Build a session description for one video stream.
pub fn generate(video: &SdpVideo<'_>) -> String {
    let sess_id = fresh_session_id();
    let mut sdp = String::new();

    sdp.push_str("v=0\r\n");
    sdp.push_str(&format!("o=- {} {} IN IP4 0.0.0.0\r\n", sess_id, sess_id));
    sdp.push_str("s=Stream\r\n");
    sdp.push_str("c=IN IP4 0.0.0.0\r\n");
    sdp.push_str("t=0 0\r\n");
    sdp.push_str(&format!("m=video 0 RTP/AVP {}\r\n", video.payload_type));
    sdp.push_str(&format!(
        "a=rtpmap:{} {}/{}\r\n",
        video.payload_type,
        video.codec.name(),
        VIDEO_CLOCK_RATE
    ));

    match video.codec {
        Codec::H264 => {
            let mut fmtp = format!("a=fmtp:{} packetization-mode=1", video.payload_type);
            if !video.sps.is_empty() && !video.pps.is_empty() {
                fmtp.push_str(&format!(
                    ";sprop-parameter-sets={},{}",
                    BASE64.encode(video.sps),
                    BASE64.encode(video.pps)
                ));
            }
            sdp.push_str(&fmtp);
            sdp.push_str("\r\n");
        }
        Codec::H265 => {
            let mut props = Vec::new();
            if !video.vps.is_empty() {
                props.push(format!("sprop-vps={}", BASE64.encode(video.vps)));
            }
            if !video.sps.is_empty() {
                props.push(format!("sprop-sps={}", BASE64.encode(video.sps)));
            }
            if !video.pps.is_empty() {
                props.push(format!("sprop-pps={}", BASE64.encode(video.pps)));
            }
            if !props.is_empty() {
                sdp.push_str(&format!(
                    "a=fmtp:{} {}\r\n",
                    video.payload_type,
                    props.join(";")
                ));
            }
        }
    }

    sdp.push_str(&format!(
        "a=framesize:{} {}-{}\r\n",
        video.payload_type, video.width, video.height
    ));
    sdp.push_str(&format!("a=control:{}\r\n", video.control));
    sdp
}

/// A video stream recovered from a session description.
#[derive(Debug, Clone)]
pub struct SdpMedia {
    pub control: String,
    pub codec: Codec,
    pub codec_name: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub vps: Vec<u8>,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

impl Default for SdpMedia {
    fn default() -> Self {
        SdpMedia {
            control: String::new(),
            codec: Codec::H264,
            codec_name: String::new(),
            payload_type: 0,
            clock_rate: 0,
            width: 0,
            height: 0,
            fps: 0,
            vps: Vec::new(),
            sps: Vec::new(),
            pps: Vec::new(),
        }
    }
}

/// Parse the video streams out of a session description.
///
/// Absent fields fall back to 1920x1080 @ 30 fps, 90 kHz clock, and the
/// codec's default payload type.
pub fn parse(sdp: &str) -> Vec<SdpMedia> {
    let mut streams: Vec<SdpMedia> = Vec::new();

    for raw_line in sdp.lines() {
        let line = raw_line.trim_end_matches('\r');

        if let Some(rest) = line.strip_prefix("m=video") {
            let mut media = SdpMedia::default();
            // m=video <port> <proto> <pt>
            if let Some(pt) = rest.split_whitespace().nth(2).and_then(|p| p.parse().ok()) {
                media.payload_type = pt;
            }
            streams.push(media);
            continue;
        }

        let media = match streams.last_mut() {
            Some(m) => m,
            None => continue,
        };

        if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            // a=rtpmap:<pt> <name>/<rate>
            if let Some(map) = rest.split_whitespace().nth(1) {
                let mut parts = map.split('/');
                let name = parts.next().unwrap_or("");
                media.codec_name = name.to_string();
                if name.contains("265") || name.eq_ignore_ascii_case("HEVC") {
                    media.codec = Codec::H265;
                } else if name.contains("264") {
                    media.codec = Codec::H264;
                }
                if let Some(rate) = parts.next().and_then(|r| r.parse().ok()) {
                    media.clock_rate = rate;
                }
            }
        } else if let Some(rest) = line.strip_prefix("a=control:") {
            media.control = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("a=framesize:") {
            // a=framesize:<pt> <W>-<H>
            if let Some(dims) = rest.split_whitespace().nth(1) {
                if let Some((w, h)) = dims.split_once('-') {
                    if let (Ok(w), Ok(h)) = (w.parse(), h.parse()) {
                        media.width = w;
                        media.height = h;
                    }
                }
            }
        } else if let Some(rest) = line.strip_prefix("a=cliprect:") {
            // a=cliprect:0,0,<H>,<W>
            let fields: Vec<&str> = rest.split(',').collect();
            if fields.len() == 4 {
                if let (Ok(h), Ok(w)) = (fields[2].parse::<u32>(), fields[3].parse::<u32>()) {
                    if w > 0 && h > 0 {
                        media.width = w;
                        media.height = h;
                    }
                }
            }
        } else if let Some(rest) = line.strip_prefix("a=framerate:") {
            if let Ok(fps) = rest.trim().parse::<f64>() {
                media.fps = fps as u32;
            }
        } else if line.starts_with("a=fmtp:") {
            if let Some(sprops) = fmtp_value(line, "sprop-parameter-sets") {
                if let Some((sps, pps)) = sprops.split_once(',') {
                    media.sps = BASE64.decode(sps).unwrap_or_default();
                    media.pps = BASE64.decode(pps).unwrap_or_default();
                }
            }
            if let Some(vps) = fmtp_value(line, "sprop-vps") {
                media.vps = BASE64.decode(vps).unwrap_or_default();
            }
            if let Some(sps) = fmtp_value(line, "sprop-sps") {
                media.sps = BASE64.decode(sps).unwrap_or_default();
            }
            if let Some(pps) = fmtp_value(line, "sprop-pps") {
                media.pps = BASE64.decode(pps).unwrap_or_default();
            }
        }
    }

    for media in &mut streams {
        if media.width == 0 {
            media.width = 1920;
        }
        if media.height == 0 {
            media.height = 1080;
        }
        if media.fps == 0 {
            media.fps = 30;
        }
        if media.clock_rate == 0 {
            media.clock_rate = VIDEO_CLOCK_RATE;
        }
        if media.payload_type == 0 {
            media.payload_type = media.codec.default_payload_type();
        }
    }

    streams
}

/// Value of `<key>=` inside an fmtp attribute, ending at `;` or whitespace.
fn fmtp_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("{}=", key);
    let start = line.find(&pattern)? + pattern.len();
    let rest = &line[start..];
    let end = rest
        .find(|c: char| c == ';' || c.is_whitespace())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}
