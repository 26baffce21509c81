//! RTP depacketizer: Annex B frame reassembly (RFC 6184 §5, RFC 7798 §4).
//!
//! Consumes RTP packets in ascending sequence order (the jitter buffer's
//! output) and reassembles Annex B frames. Handles single NALUs, STAP-A/B
//! and AP aggregation, and FU-A/FU fragmentation with loss resync:
//!
//! - A frame is in progress while payloads share one RTP timestamp; a new
//!   timestamp or the marker bit closes and emits it.
//! - A sequence gap during an open fragmentation unit discards the partial
//!   NALU back to the FU start and enters drop mode until the next FU start.
//! - A frame closed while in drop mode is discarded, not emitted.
//!
//! Reassembled frames queue internally; callers drain them with
//! [`pop_frame`](Depacketizer::pop_frame).

use std::collections::VecDeque;

use bytes::Bytes;

use super::nalu::{h264_nal, h264_nal_type, h265_is_irap, h265_nal, h265_nal_type};
use super::rtp::RtpView;
use super::{Codec, FrameType, VideoFrame};

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

#[derive(Debug)]
pub struct Depacketizer {
    codec: Codec,
    width: u32,
    height: u32,
    fps: u32,

    frame_buf: Vec<u8>,
    frame_ts: u32,
    in_progress: bool,
    is_idr: bool,

    last_seq: Option<u16>,
    fu_in_progress: bool,
    fu_drop: bool,
    fu_start_offset: usize,

    pending: VecDeque<VideoFrame>,
    packet_loss_events: u64,
    frames_output: u64,
}

impl Depacketizer {
    pub fn new(codec: Codec) -> Self {
        Depacketizer {
            codec,
            width: 0,
            height: 0,
            fps: 0,
            frame_buf: Vec::new(),
            frame_ts: 0,
            in_progress: false,
            is_idr: false,
            last_seq: None,
            fu_in_progress: false,
            fu_drop: false,
            fu_start_offset: 0,
            pending: VecDeque::new(),
            packet_loss_events: 0,
            frames_output: 0,
        }
    }

    /// Attach stream metadata (from SDP) to emitted frames.
    pub fn set_video_info(&mut self, width: u32, height: u32, fps: u32) {
        self.width = width;
        self.height = height;
        self.fps = fps;
    }

    /// Gaps detected during FU reconstruction.
    pub fn packet_loss_events(&self) -> u64 {
        self.packet_loss_events
    }

    /// Frames emitted so far.
    pub fn frames_output(&self) -> u64 {
        self.frames_output
    }

    /// Next reassembled frame, oldest first.
    pub fn pop_frame(&mut self) -> Option<VideoFrame> {
        self.pending.pop_front()
    }

    /// Force out any frame still being accumulated (stream end).
    pub fn flush(&mut self) {
        if self.fu_drop {
            self.reset_frame_state();
            self.fu_drop = false;
            self.fu_in_progress = false;
        } else {
            self.emit(self.frame_ts);
        }
    }

    /// Feed one raw RTP packet.
    pub fn ingest(&mut self, data: &[u8]) {
        let view = match RtpView::parse(data) {
            Some(v) => v,
            None => return,
        };

        // Sequence gap while a fragmentation unit is open: unwind the partial
        // NALU and ignore fragments until the next FU start.
        if let Some(last) = self.last_seq {
            if view.sequence != last.wrapping_add(1) && self.fu_in_progress {
                self.packet_loss_events += 1;
                self.fu_drop = true;
                self.fu_in_progress = false;
                self.frame_buf.truncate(self.fu_start_offset);
                tracing::debug!(
                    expected = last.wrapping_add(1),
                    got = view.sequence,
                    "sequence gap inside fragmentation unit, dropping partial NALU"
                );
            }
        }
        self.last_seq = Some(view.sequence);

        if view.payload.is_empty() {
            return;
        }

        // Frame delimitation by timestamp.
        if !self.in_progress {
            self.frame_ts = view.timestamp;
            self.in_progress = true;
        } else if view.timestamp != self.frame_ts {
            if self.fu_drop {
                self.reset_frame_state();
                self.fu_drop = false;
                self.fu_in_progress = false;
            } else {
                self.emit(self.frame_ts);
            }
            self.frame_ts = view.timestamp;
            self.in_progress = true;
        }

        let skipped = match self.codec {
            Codec::H264 => self.append_h264(view.payload),
            Codec::H265 => self.append_h265(view.payload),
        };
        if skipped {
            return;
        }

        if view.marker {
            if self.fu_drop {
                self.reset_frame_state();
                self.fu_drop = false;
                self.fu_in_progress = false;
            } else {
                self.emit(view.timestamp);
            }
        }
    }

    /// Returns true when the payload was a dropped mid-FU fragment and the
    /// rest of the packet (marker handling) must be ignored.
    fn append_h264(&mut self, payload: &[u8]) -> bool {
        match h264_nal_type(payload[0]) {
            t @ 1..=23 => {
                self.append_nalu(payload);
                if t == h264_nal::IDR {
                    self.is_idr = true;
                }
            }
            t if t == h264_nal::STAP_A => self.append_aggregated(payload, 1),
            t if t == h264_nal::STAP_B => {
                // Skip the 2-byte DON after the STAP-B header.
                if payload.len() >= 3 {
                    self.append_aggregated(payload, 3);
                }
            }
            t if t == h264_nal::FU_A => {
                if payload.len() < 2 {
                    return false;
                }
                let fu_header = payload[1];
                let start = fu_header & 0x80 != 0;
                let reconstructed = (payload[0] & 0xE0) | (fu_header & 0x1F);
                if start {
                    self.fu_drop = false;
                    self.fu_in_progress = true;
                    self.fu_start_offset = self.frame_buf.len();
                    self.frame_buf.extend_from_slice(&START_CODE);
                    self.frame_buf.push(reconstructed);
                    if h264_nal_type(reconstructed) == h264_nal::IDR {
                        self.is_idr = true;
                    }
                } else if self.fu_drop || !self.fu_in_progress {
                    return true;
                }
                if payload.len() > 2 {
                    self.frame_buf.extend_from_slice(&payload[2..]);
                }
                if fu_header & 0x40 != 0 {
                    self.fu_in_progress = false;
                }
            }
            _ => {}
        }
        false
    }

    fn append_h265(&mut self, payload: &[u8]) -> bool {
        if payload.len() < 2 {
            return false;
        }
        match h265_nal_type(payload[0]) {
            t if t == h265_nal::AP => self.append_aggregated(payload, 2),
            t if t == h265_nal::FU => {
                if payload.len() < 3 {
                    return false;
                }
                let fu_header = payload[2];
                let start = fu_header & 0x80 != 0;
                let end = fu_header & 0x40 != 0;
                let orig_type = fu_header & 0x3F;
                // Rebuild the 2-byte header: original type back into bits
                // 1..6, layer id and TID preserved.
                let orig0 = (payload[0] & 0x81) | (orig_type << 1);
                let orig1 = payload[1];
                if start {
                    self.fu_drop = false;
                    self.fu_in_progress = true;
                    self.fu_start_offset = self.frame_buf.len();
                    self.frame_buf.extend_from_slice(&START_CODE);
                    self.frame_buf.push(orig0);
                    self.frame_buf.push(orig1);
                    if h265_is_irap(orig_type) {
                        self.is_idr = true;
                    }
                } else if self.fu_drop || !self.fu_in_progress {
                    return true;
                }
                if payload.len() > 3 && !self.fu_drop {
                    self.frame_buf.extend_from_slice(&payload[3..]);
                }
                if end && self.fu_in_progress {
                    self.fu_in_progress = false;
                }
            }
            t if t == h265_nal::PACI => {
                // Recognized but not decoded further.
            }
            t if t < 48 => {
                self.append_nalu(payload);
                if h265_is_irap(t) {
                    self.is_idr = true;
                }
            }
            _ => {}
        }
        false
    }

    /// Iterate `[u16 size | nalu]` entries starting at `offset`.
    fn append_aggregated(&mut self, payload: &[u8], offset: usize) {
        let mut off = offset;
        while off + 2 <= payload.len() {
            let size = u16::from_be_bytes([payload[off], payload[off + 1]]) as usize;
            off += 2;
            if size == 0 || off + size > payload.len() {
                break;
            }
            let nalu = &payload[off..off + size];
            let inner_idr = match self.codec {
                Codec::H264 => h264_nal_type(nalu[0]) == h264_nal::IDR,
                Codec::H265 => h265_is_irap(h265_nal_type(nalu[0])),
            };
            self.append_nalu(nalu);
            if inner_idr {
                self.is_idr = true;
            }
            off += size;
        }
    }

    fn append_nalu(&mut self, nalu: &[u8]) {
        self.frame_buf.extend_from_slice(&START_CODE);
        self.frame_buf.extend_from_slice(nalu);
    }

    fn reset_frame_state(&mut self) {
        self.frame_buf.clear();
        self.is_idr = false;
        self.in_progress = false;
    }

    fn emit(&mut self, timestamp: u32) {
        if self.frame_buf.is_empty() {
            self.is_idr = false;
            self.in_progress = false;
            return;
        }
        let data = Bytes::from(std::mem::take(&mut self.frame_buf));
        let pts_ms = u64::from(timestamp) / 90;
        self.pending.push_back(VideoFrame {
            codec: self.codec,
            frame_type: if self.is_idr { FrameType::Idr } else { FrameType::P },
            data,
            pts_ms,
            dts_ms: pts_ms,
            width: self.width,
            height: self.height,
            fps: self.fps,
        });
        self.frames_output += 1;
        self.is_idr = false;
        self.in_progress = false;
    }
}
