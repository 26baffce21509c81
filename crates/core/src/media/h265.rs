//! H.265 (HEVC) RTP packetizer (RFC 7798).
//!
//! Differences from the H.264 packer:
//!
//! - 2-byte NAL unit header; the type sits in bits 1..6 of the first byte.
//! - Fragmentation uses a 2-byte PayloadHdr (FU type 49, layer id and TID
//!   preserved from the original header) plus a 1-byte FU header.

use super::nalu::{self, h265_nal};
use super::rtp::{self, RtpPacket, RTP_HEADER_LEN};
use super::{to_rtp_timestamp, Codec, VIDEO_CLOCK_RATE};

use super::h264::DEFAULT_MTU;

#[derive(Debug)]
pub struct H265Packer {
    payload_type: u8,
    ssrc: u32,
    seq: u16,
    mtu: usize,
}

impl H265Packer {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        H265Packer {
            payload_type,
            ssrc,
            seq: 0,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu.max(RTP_HEADER_LEN);
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn set_ssrc(&mut self, ssrc: u32) {
        self.ssrc = ssrc;
    }

    pub fn next_sequence(&self) -> u16 {
        self.seq
    }

    fn take_seq(&mut self) -> u16 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Packetize one Annex B frame. Same contract as
    /// [`H264Packer::pack`](super::h264::H264Packer::pack).
    pub fn pack(&mut self, data: &[u8], pts_ms: u64) -> Vec<RtpPacket> {
        let timestamp = to_rtp_timestamp(pts_ms, VIDEO_CLOCK_RATE);
        let mut packets = Vec::new();

        for view in nalu::scan(data, Codec::H265) {
            if view.data.len() < 2 {
                continue;
            }
            if view.data.len() <= self.mtu {
                self.pack_single(view.data, timestamp, &mut packets);
            } else {
                self.pack_fu(view.data, timestamp, &mut packets);
            }
        }

        if let Some(last) = packets.last_mut() {
            last.marker = true;
        }

        tracing::trace!(
            frame_bytes = data.len(),
            rtp_packets = packets.len(),
            timestamp,
            "H.265 frame packetized"
        );
        packets
    }

    fn pack_single(&mut self, nalu: &[u8], timestamp: u32, packets: &mut Vec<RtpPacket>) {
        let seq = self.take_seq();
        let mut buf = Vec::with_capacity(RTP_HEADER_LEN + nalu.len());
        rtp::write_header(&mut buf, self.payload_type, seq, timestamp, self.ssrc);
        buf.extend_from_slice(nalu);
        packets.push(RtpPacket {
            data: buf.into(),
            seq,
            timestamp,
            ssrc: self.ssrc,
            marker: false,
        });
    }

    /// FU fragmentation (RFC 7798 §4.4.3).
    fn pack_fu(&mut self, nalu: &[u8], timestamp: u32, packets: &mut Vec<RtpPacket>) {
        if nalu.len() <= 2 {
            return;
        }
        let nal_type = nalu::h265_nal_type(nalu[0]);
        // PayloadHdr: FU type 49 with layer id and TID carried over.
        let ph0 = (nalu[0] & 0x81) | (h265_nal::FU << 1);
        let ph1 = nalu[1];

        let payload = &nalu[2..];
        let max_fragment = self.mtu - 3;
        let mut offset = 0usize;
        let mut first = true;

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let chunk = remaining.min(max_fragment);
            let last = remaining <= max_fragment;

            let mut fu_header = nal_type;
            if first {
                fu_header |= 0x80;
            }
            if last {
                fu_header |= 0x40;
            }

            let seq = self.take_seq();
            let mut buf = Vec::with_capacity(RTP_HEADER_LEN + 3 + chunk);
            rtp::write_header(&mut buf, self.payload_type, seq, timestamp, self.ssrc);
            buf.push(ph0);
            buf.push(ph1);
            buf.push(fu_header);
            buf.extend_from_slice(&payload[offset..offset + chunk]);

            packets.push(RtpPacket {
                data: buf.into(),
                seq,
                timestamp,
                ssrc: self.ssrc,
                marker: false,
            });

            offset += chunk;
            first = false;
        }
    }
}
