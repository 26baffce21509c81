//! Media layer: frame model, NALU scanning, RTP packing/depacking.
//!
//! The frame payload is an immutable reference-counted buffer
//! ([`bytes::Bytes`]): one producer, many subscriber queues, released when
//! the last holder drops. Packetizers and the depacketizer never interpret
//! the bitstream beyond Annex B framing and NALU headers.

pub mod depack;
pub mod h264;
pub mod h265;
pub mod jitter;
pub mod nalu;
pub mod packer;
pub mod rtcp;
pub mod rtp;

use bytes::Bytes;

/// RTP clock rate for video payloads (RFC 6184 §8.2.1, RFC 7798 §7.1).
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Video codec carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    H265,
}

impl Codec {
    /// Encoding name for the SDP rtpmap attribute.
    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264 => "H264",
            Codec::H265 => "H265",
        }
    }

    /// Default dynamic RTP payload type (96 for H.264, 97 for H.265).
    pub fn default_payload_type(&self) -> u8 {
        match self {
            Codec::H264 => 96,
            Codec::H265 => 97,
        }
    }
}

/// Frame type. Only IDR and P frames are produced; B is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Key frame (IDR for H.264, IRAP for H.265).
    Idr,
    P,
    B,
}

/// An Annex B video frame with shared-ownership payload bytes.
///
/// Cloning is cheap: the payload is reference counted, so one pushed frame
/// can sit in every subscriber queue simultaneously and is freed when the
/// last queue drains it.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub codec: Codec,
    pub frame_type: FrameType,
    /// NALUs prefixed by `00 00 01` or `00 00 00 01` start codes.
    pub data: Bytes,
    /// Presentation timestamp in milliseconds.
    pub pts_ms: u64,
    /// Decode timestamp in milliseconds (equal to pts for IDR/P streams).
    pub dts_ms: u64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl VideoFrame {
    /// Build a frame from raw Annex B data.
    pub fn new(codec: Codec, data: impl Into<Bytes>, pts_ms: u64, is_key: bool) -> Self {
        VideoFrame {
            codec,
            frame_type: if is_key { FrameType::Idr } else { FrameType::P },
            data: data.into(),
            pts_ms,
            dts_ms: pts_ms,
            width: 0,
            height: 0,
            fps: 0,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.frame_type == FrameType::Idr
    }
}

/// Convert a millisecond presentation timestamp to a 32-bit RTP timestamp.
pub fn to_rtp_timestamp(pts_ms: u64, clock_rate: u32) -> u32 {
    ((pts_ms * clock_rate as u64) / 1000) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtp_timestamp_conversion() {
        assert_eq!(to_rtp_timestamp(1000, VIDEO_CLOCK_RATE), 90_000);
        assert_eq!(to_rtp_timestamp(0, VIDEO_CLOCK_RATE), 0);
        // Truncates to 32 bits: 47_721_859 ms * 90 = 2^32 + 14.
        assert_eq!(to_rtp_timestamp(47_721_859, VIDEO_CLOCK_RATE), 14);
    }

    #[test]
    fn frame_clone_shares_payload() {
        let frame = VideoFrame::new(Codec::H264, vec![0, 0, 0, 1, 0x65, 0xAA], 40, true);
        let copy = frame.clone();
        assert_eq!(frame.data.as_ptr(), copy.data.as_ptr());
        assert!(copy.is_keyframe());
    }

    #[test]
    fn default_payload_types() {
        assert_eq!(Codec::H264.default_payload_type(), 96);
        assert_eq!(Codec::H265.default_payload_type(), 97);
    }
}
