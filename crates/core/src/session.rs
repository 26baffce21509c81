//! Server-side subscriber sessions.
//!
//! A subscriber is created during SETUP, armed at PLAY, and destroyed by
//! TEARDOWN, connection loss, or supervisor timeout. Each one owns a
//! bounded frame queue (drop-oldest) and a send loop thread that packs
//! frames and pushes packets over UDP or the interleaved control socket.

use std::collections::VecDeque;
use std::net::{IpAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::media::packer::RtpPacker;
use crate::media::rtp::RtpPacket;
use crate::media::{rtcp, to_rtp_timestamp, VideoFrame, VIDEO_CLOCK_RATE};
use crate::server::ServerStats;
use crate::transport::tcp::write_interleaved;
use crate::transport::RtpSender;

/// Per-subscriber frame queue capacity. When full, the oldest frame is
/// dropped before the new one is enqueued.
pub(crate) const FRAME_QUEUE_CAPACITY: usize = 30;

/// A Sender Report goes out every this many RTP packets.
const RTCP_SR_INTERVAL: u32 = 100;

/// Where a subscriber's packets go.
pub(crate) enum SubscriberTransport {
    /// Dedicated UDP socket pair.
    Udp(RtpSender),
    /// `$`-framed onto the RTSP control socket, RTCP on `channel + 1`.
    Interleaved {
        control: Arc<Mutex<TcpStream>>,
        channel: u8,
    },
}

pub(crate) struct Subscriber {
    pub id: String,
    pub path_name: String,
    pub peer_ip: IpAddr,
    transport: SubscriberTransport,
    packer: Mutex<RtpPacker>,

    queue: Mutex<VecDeque<VideoFrame>>,
    queue_cv: Condvar,

    playing: AtomicBool,
    last_activity: Mutex<Instant>,
    packet_count: AtomicU32,
    octet_count: AtomicU32,

    stats: Arc<ServerStats>,
    send_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Subscriber {
    pub fn new(
        id: String,
        path_name: String,
        peer_ip: IpAddr,
        transport: SubscriberTransport,
        packer: RtpPacker,
        stats: Arc<ServerStats>,
    ) -> Arc<Self> {
        Arc::new(Subscriber {
            id,
            path_name,
            peer_ip,
            transport,
            packer: Mutex::new(packer),
            queue: Mutex::new(VecDeque::with_capacity(FRAME_QUEUE_CAPACITY)),
            queue_cv: Condvar::new(),
            playing: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            packet_count: AtomicU32::new(0),
            octet_count: AtomicU32::new(0),
            stats,
            send_thread: Mutex::new(None),
        })
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Record control-plane or data-plane activity.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Enqueue one frame, dropping the oldest when the queue is full.
    /// Never blocks the producer.
    pub fn push_frame(&self, frame: VideoFrame) {
        let mut queue = self.queue.lock();
        if queue.len() >= FRAME_QUEUE_CAPACITY {
            queue.pop_front();
        }
        queue.push_back(frame);
        drop(queue);
        self.queue_cv.notify_one();
    }

    /// Arm the subscriber (PLAY). Idempotent while already playing.
    pub fn start(self: &Arc<Self>) {
        if self.playing.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut thread = self.send_thread.lock();
        if thread.is_none() {
            let sub = Arc::clone(self);
            *thread = Some(thread::spawn(move || sub.send_loop()));
        }
    }

    /// Disarm the subscriber (PAUSE, TEARDOWN, timeout): stop the send
    /// loop, join it, and drop any queued frames.
    pub fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.queue_cv.notify_all();
        let handle = self.send_thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.queue.lock().clear();
    }

    fn send_loop(&self) {
        tracing::debug!(session_id = %self.id, path = %self.path_name, "send loop started");
        while self.playing.load(Ordering::SeqCst) {
            let frame = {
                let mut queue = self.queue.lock();
                while queue.is_empty() && self.playing.load(Ordering::SeqCst) {
                    self.queue_cv.wait(&mut queue);
                }
                if !self.playing.load(Ordering::SeqCst) {
                    break;
                }
                match queue.pop_front() {
                    Some(frame) => frame,
                    None => continue,
                }
            };

            let packets = self.packer.lock().pack_frame(&frame);
            for packet in &packets {
                if let Err(e) = self.send_packet(packet) {
                    tracing::warn!(
                        session_id = %self.id,
                        error = %e,
                        "RTP send failed, stopping delivery"
                    );
                    // The supervisor reaps the session on its next tick.
                    self.playing.store(false, Ordering::SeqCst);
                    return;
                }
                let sent = self.packet_count.fetch_add(1, Ordering::Relaxed) + 1;
                self.octet_count
                    .fetch_add(packet.len() as u32, Ordering::Relaxed);
                self.stats.rtp_packets_sent.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .rtp_bytes_sent
                    .fetch_add(packet.len() as u64, Ordering::Relaxed);

                if sent % RTCP_SR_INTERVAL == 0 {
                    self.send_sender_report(&frame);
                }
            }
            self.touch();
        }
        tracing::debug!(session_id = %self.id, "send loop exited");
    }

    fn send_packet(&self, packet: &RtpPacket) -> std::io::Result<()> {
        match &self.transport {
            SubscriberTransport::Udp(sender) => {
                sender
                    .send_rtp(&packet.data)
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
                Ok(())
            }
            SubscriberTransport::Interleaved { control, channel } => {
                write_interleaved(control, *channel, &packet.data)
            }
        }
    }

    fn send_sender_report(&self, frame: &VideoFrame) {
        let rtp_ts = to_rtp_timestamp(frame.pts_ms, VIDEO_CLOCK_RATE);
        let sr = rtcp::sender_report(
            self.packer.lock().ssrc(),
            rtcp::ntp_now(),
            rtp_ts,
            self.packet_count.load(Ordering::Relaxed),
            self.octet_count.load(Ordering::Relaxed),
        );
        let result = match &self.transport {
            SubscriberTransport::Udp(sender) => sender.send_rtcp(&sr).map(|_| ()).map_err(|e| {
                std::io::Error::other(e.to_string())
            }),
            SubscriberTransport::Interleaved { control, channel } => {
                write_interleaved(control, channel + 1, &sr)
            }
        };
        if let Err(e) = result {
            tracing::debug!(session_id = %self.id, error = %e, "RTCP SR send failed");
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        // Sockets and the port pair release with the transport; the send
        // thread must already be stopped by the owning path.
        self.playing.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Codec;
    use std::net::UdpSocket;

    fn udp_subscriber(peer: &UdpSocket) -> Arc<Subscriber> {
        let addr = peer.local_addr().unwrap();
        let mut sender = RtpSender::bind_in_range(42_000, 42_200).unwrap();
        sender.set_peer(addr.ip(), addr.port(), addr.port());
        Subscriber::new(
            "TEST0001".to_string(),
            "/live".to_string(),
            addr.ip(),
            SubscriberTransport::Udp(sender),
            RtpPacker::new(Codec::H264, 96, 0xABCD),
            Arc::new(ServerStats::default()),
        )
    }

    fn test_frame(pts: u64) -> VideoFrame {
        VideoFrame::new(Codec::H264, vec![0, 0, 0, 1, 0x65, 0xAA, 0xBB], pts, true)
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sub = udp_subscriber(&peer);
        for pts in 0..(FRAME_QUEUE_CAPACITY as u64 + 5) {
            sub.push_frame(test_frame(pts));
        }
        let queue = sub.queue.lock();
        assert_eq!(queue.len(), FRAME_QUEUE_CAPACITY);
        // The oldest five were dropped.
        assert_eq!(queue.front().unwrap().pts_ms, 5);
    }

    #[test]
    fn play_delivers_rtp_to_peer() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let sub = udp_subscriber(&peer);

        sub.start();
        assert!(sub.is_playing());
        sub.push_frame(test_frame(1000));

        let mut buf = [0u8; 1500];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        assert!(n > 12);
        assert_eq!(buf[0] >> 6, 2);
        assert_eq!(&buf[12..n], &[0x65, 0xAA, 0xBB]);

        sub.stop();
        assert!(!sub.is_playing());
    }

    #[test]
    fn start_is_idempotent() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sub = udp_subscriber(&peer);
        sub.start();
        sub.start();
        assert!(sub.is_playing());
        sub.stop();
    }

    #[test]
    fn stop_then_start_respawns_loop() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let sub = udp_subscriber(&peer);

        sub.start();
        sub.stop();
        sub.start();
        sub.push_frame(test_frame(2000));

        let mut buf = [0u8; 1500];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        assert!(n > 12);
        sub.stop();
    }

    #[test]
    fn idle_tracking() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sub = udp_subscriber(&peer);
        std::thread::sleep(Duration::from_millis(30));
        assert!(sub.idle_for() >= Duration::from_millis(20));
        sub.touch();
        assert!(sub.idle_for() < Duration::from_millis(20));
    }
}
