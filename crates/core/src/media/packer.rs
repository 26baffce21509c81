//! Codec-indexed RTP packer.
//!
//! The packer family is a two-case variant; [`RtpPacker::pack_frame`]
//! pattern-matches on the codec. Sessions construct one packer at SETUP and
//! drive it from their send loop.

use super::h264::H264Packer;
use super::h265::H265Packer;
use super::rtp::RtpPacket;
use super::{Codec, VideoFrame};

#[derive(Debug)]
pub enum RtpPacker {
    H264(H264Packer),
    H265(H265Packer),
}

impl RtpPacker {
    pub fn new(codec: Codec, payload_type: u8, ssrc: u32) -> Self {
        match codec {
            Codec::H264 => RtpPacker::H264(H264Packer::new(payload_type, ssrc)),
            Codec::H265 => RtpPacker::H265(H265Packer::new(payload_type, ssrc)),
        }
    }

    pub fn codec(&self) -> Codec {
        match self {
            RtpPacker::H264(_) => Codec::H264,
            RtpPacker::H265(_) => Codec::H265,
        }
    }

    /// Turn one video frame into its ordered RTP packet sequence.
    pub fn pack_frame(&mut self, frame: &VideoFrame) -> Vec<RtpPacket> {
        match self {
            RtpPacker::H264(p) => p.pack(&frame.data, frame.pts_ms),
            RtpPacker::H265(p) => p.pack(&frame.data, frame.pts_ms),
        }
    }

    pub fn set_mtu(&mut self, mtu: usize) {
        match self {
            RtpPacker::H264(p) => p.set_mtu(mtu),
            RtpPacker::H265(p) => p.set_mtu(mtu),
        }
    }

    pub fn ssrc(&self) -> u32 {
        match self {
            RtpPacker::H264(p) => p.ssrc(),
            RtpPacker::H265(p) => p.ssrc(),
        }
    }

    pub fn next_sequence(&self) -> u16 {
        match self {
            RtpPacker::H264(p) => p.next_sequence(),
            RtpPacker::H265(p) => p.next_sequence(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::depack::Depacketizer;
    use super::*;

    /// Fragmented output must reassemble to the byte-identical input frame
    /// (normalized to 4-byte start codes).
    #[test]
    fn pack_depack_identity_h264() {
        let mut frame = vec![0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F];
        frame.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80]);
        frame.extend_from_slice(&[0, 0, 0, 1, 0x65]);
        frame.extend((0..5000u32).map(|i| (i % 251) as u8));

        let mut packer = RtpPacker::new(Codec::H264, 96, 0xCAFE);
        let packets = packer.pack_frame(&VideoFrame::new(Codec::H264, frame.clone(), 40, true));

        let mut depack = Depacketizer::new(Codec::H264);
        for pkt in &packets {
            depack.ingest(&pkt.data);
        }
        depack.flush();

        let out = depack.pop_frame().expect("one frame");
        assert_eq!(&out.data[..], &frame[..]);
        assert!(out.is_keyframe());
        assert!(depack.pop_frame().is_none());
    }

    #[test]
    fn pack_depack_identity_h265() {
        let mut frame = vec![0, 0, 0, 1, 0x40, 0x01, 0x0C];
        frame.extend_from_slice(&[0, 0, 0, 1, 0x42, 0x01, 0x01]);
        frame.extend_from_slice(&[0, 0, 0, 1, 0x26, 0x01]);
        frame.extend((0..4000u32).map(|i| (i % 249) as u8));

        let mut packer = RtpPacker::new(Codec::H265, 97, 0xBEEF);
        let packets = packer.pack_frame(&VideoFrame::new(Codec::H265, frame.clone(), 80, true));

        let mut depack = Depacketizer::new(Codec::H265);
        for pkt in &packets {
            depack.ingest(&pkt.data);
        }
        depack.flush();

        let out = depack.pop_frame().expect("one frame");
        assert_eq!(&out.data[..], &frame[..]);
        assert!(out.is_keyframe());
    }

    #[test]
    fn packer_reports_codec() {
        assert_eq!(RtpPacker::new(Codec::H264, 96, 1).codec(), Codec::H264);
        assert_eq!(RtpPacker::new(Codec::H265, 97, 1).codec(), Codec::H265);
    }
}
