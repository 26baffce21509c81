//! H.264 RTP packetizer (RFC 6184).
//!
//! Supports single NAL unit mode and FU-A fragmentation. Aggregation
//! (STAP-A) is never produced; the depacketizer accepts it.

use super::nalu::{self, h264_nal};
use super::rtp::{self, RtpPacket, RTP_HEADER_LEN};
use super::{to_rtp_timestamp, Codec, VIDEO_CLOCK_RATE};

/// Default MTU for RTP payload sizing.
pub const DEFAULT_MTU: usize = 1400;

#[derive(Debug)]
pub struct H264Packer {
    payload_type: u8,
    ssrc: u32,
    seq: u16,
    mtu: usize,
}

impl H264Packer {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        H264Packer {
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

    /// Sequence number the next emitted packet will carry.
    pub fn next_sequence(&self) -> u16 {
        self.seq
    }

    fn take_seq(&mut self) -> u16 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Packetize one Annex B frame.
    ///
    /// All packets share the RTP timestamp derived from `pts_ms`; sequence
    /// numbers are consecutive; the last packet of the frame carries the
    /// marker flag.
    pub fn pack(&mut self, data: &[u8], pts_ms: u64) -> Vec<RtpPacket> {
        let timestamp = to_rtp_timestamp(pts_ms, VIDEO_CLOCK_RATE);
        let mut packets = Vec::new();

        for view in nalu::scan(data, Codec::H264) {
            if view.data.is_empty() {
                continue;
            }
            if view.data.len() <= self.mtu {
                self.pack_single(view.data, timestamp, &mut packets);
            } else {
                self.pack_fu_a(view.data, timestamp, &mut packets);
            }
        }

        if let Some(last) = packets.last_mut() {
            last.marker = true;
        }

        tracing::trace!(
            frame_bytes = data.len(),
            rtp_packets = packets.len(),
            timestamp,
            "H.264 frame packetized"
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

    /// FU-A fragmentation (RFC 6184 §5.8).
    ///
    /// The 1-byte NALU header is stripped and reconstructed on the far side
    /// from the FU indicator (NRI) and FU header (type).
    fn pack_fu_a(&mut self, nalu: &[u8], timestamp: u32, packets: &mut Vec<RtpPacket>) {
        if nalu.len() < 2 {
            return;
        }
        let nal_header = nalu[0];
        let nal_type = nalu::h264_nal_type(nal_header);
        let fu_indicator = (nal_header & 0x60) | h264_nal::FU_A;

        let payload = &nalu[1..];
        let max_fragment = self.mtu - 2;
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
            let mut buf = Vec::with_capacity(RTP_HEADER_LEN + 2 + chunk);
            rtp::write_header(&mut buf, self.payload_type, seq, timestamp, self.ssrc);
            buf.push(fu_indicator);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packer() -> H264Packer {
        H264Packer::new(96, 0x12345678)
    }

    #[test]
    fn single_nalu_pack() {
        // 4-byte start code + IDR header + 100 filler bytes = 105-byte frame.
        let mut frame = vec![0, 0, 0, 1, 0x65];
        frame.extend(std::iter::repeat(0xAA).take(100));
        assert_eq!(frame.len(), 105);

        let mut p = make_packer();
        let packets = p.pack(&frame, 1000);

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 113);
        assert_eq!(&packets[0].data[0..2], &[0x80, 0x60]);
        assert!(packets[0].marker);
        assert_eq!(packets[0].timestamp, 90_000);
        assert_eq!(packets[0].data[12], 0x65);
        assert!(packets[0].data[13..113].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn fu_a_fragmentation() {
        // 3000-byte IDR NALU, MTU 1500.
        let mut frame = vec![0, 0, 0, 1, 0x65];
        frame.extend(std::iter::repeat(0xBB).take(2999));

        let mut p = make_packer();
        p.set_mtu(1500);
        let packets = p.pack(&frame, 0);

        assert!(packets.len() >= 2);
        for pkt in &packets {
            assert_eq!(pkt.data[12] & 0x1F, h264_nal::FU_A);
        }
        assert_eq!(packets[0].data[13] & 0x80, 0x80);
        assert_eq!(packets[0].data[13] & 0x40, 0);
        let last = packets.last().unwrap();
        assert_eq!(last.data[13] & 0x40, 0x40);
        assert!(last.marker);
        assert!(!packets[0].marker);
    }

    #[test]
    fn mtu_boundary() {
        let mtu = 1400usize;
        let mut p = make_packer();

        let mut exact = vec![0, 0, 0, 1];
        exact.extend(std::iter::repeat(0x41).take(mtu));
        assert_eq!(p.pack(&exact, 0).len(), 1);

        let mut over = vec![0, 0, 0, 1];
        over.extend(std::iter::repeat(0x41).take(mtu + 1));
        assert!(p.pack(&over, 0).len() >= 2);
    }

    #[test]
    fn sequence_numbers_consecutive_across_frames() {
        let mut p = make_packer();
        let frame = [0u8, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let first = p.pack(&frame, 0);
        let second = p.pack(&frame, 40);
        assert_eq!(first[0].seq, 0);
        assert_eq!(second[0].seq, 1);
        assert_eq!(p.next_sequence(), 2);
    }

    #[test]
    fn shared_timestamp_within_frame() {
        let mut frame = vec![0, 0, 0, 1, 0x67, 0x42];
        frame.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xCE]);
        frame.extend_from_slice(&[0, 0, 0, 1, 0x65]);
        frame.extend(std::iter::repeat(0xAA).take(3000));

        let mut p = make_packer();
        let packets = p.pack(&frame, 1000);
        assert!(packets.len() > 3);
        assert!(packets.iter().all(|pkt| pkt.timestamp == 90_000));
        let markers: Vec<bool> = packets.iter().map(|pkt| pkt.marker).collect();
        assert_eq!(markers.iter().filter(|&&m| m).count(), 1);
        assert!(*markers.last().unwrap());
    }

    #[test]
    fn empty_frame_no_packets() {
        let mut p = make_packer();
        assert!(p.pack(&[], 0).is_empty());
    }
}
