//! Integration tests: real sockets, full handshakes, end-to-end delivery.
//!
//! Each test binds its own localhost port so they can run in parallel.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rtsp_live::{ClientConfig, Codec, PathConfig, RtspClient, Server, ServerConfig};

/// Send one request and read the full response (headers plus body).
fn rtsp_request(stream: &mut TcpStream, request: &str) -> std::io::Result<String> {
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut response = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(len) = message_len(&response) {
            response.truncate(len);
            return Ok(String::from_utf8_lossy(&response).into_owned());
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(String::from_utf8_lossy(&response).into_owned());
        }
        response.extend_from_slice(&chunk[..n]);
    }
}

fn message_len(buf: &[u8]) -> Option<usize> {
    let head_end = buf.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let head = String::from_utf8_lossy(&buf[..head_end]);
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);
    let total = head_end + content_length;
    (buf.len() >= total).then_some(total)
}

fn start_server(port: u16) -> Server {
    let mut server = Server::new(ServerConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..ServerConfig::default()
    });
    let mut path = PathConfig::new("/live", Codec::H264);
    path.width = 1280;
    path.height = 720;
    path.sps = vec![0x67, 0x42, 0x00, 0x1F];
    path.pps = vec![0x68, 0xCE, 0x38, 0x80];
    server.add_path(path);
    server.start().expect("server start");
    server
}

fn connect(port: u16) -> TcpStream {
    let addr = format!("127.0.0.1:{}", port)
        .to_socket_addrs()
        .unwrap()
        .next()
        .unwrap();
    let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

fn keyframe() -> Vec<u8> {
    let mut frame = vec![0, 0, 0, 1, 0x65];
    frame.extend(std::iter::repeat(0xAA).take(100));
    frame
}

#[test]
fn full_handshake_and_udp_delivery() {
    let port = 18_554;
    let mut server = start_server(port);
    let mut stream = connect(port);

    let response = rtsp_request(
        &mut stream,
        &format!("OPTIONS rtsp://127.0.0.1:{}/live RTSP/1.0\r\nCSeq: 1\r\n\r\n", port),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 200 OK"));
    assert!(response.contains("Public: OPTIONS, DESCRIBE, SETUP, PLAY"));

    let response = rtsp_request(
        &mut stream,
        &format!("DESCRIBE rtsp://127.0.0.1:{}/live RTSP/1.0\r\nCSeq: 2\r\n\r\n", port),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 200 OK"));
    assert!(response.contains("Content-Type: application/sdp"));
    assert!(response.contains("m=video 0 RTP/AVP 96"));
    assert!(response.contains("sprop-parameter-sets="));

    // Bind our own receive pair, then SETUP against the control track URI.
    let rtp_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    rtp_socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let rtp_port = rtp_socket.local_addr().unwrap().port();

    let response = rtsp_request(
        &mut stream,
        &format!(
            "SETUP rtsp://127.0.0.1:{}/live/stream RTSP/1.0\r\nCSeq: 3\r\n\
             Transport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
            port,
            rtp_port,
            rtp_port + 1
        ),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 200 OK"));
    assert!(response.contains("Session: "));
    assert!(response.contains("server_port="));
    let session_id = response
        .lines()
        .find_map(|l| l.strip_prefix("Session: "))
        .map(|v| v.split(';').next().unwrap().to_string())
        .expect("session id");

    // Second SETUP on the same connection: aggregate not allowed.
    let response = rtsp_request(
        &mut stream,
        &format!(
            "SETUP rtsp://127.0.0.1:{}/live/stream RTSP/1.0\r\nCSeq: 4\r\n\
             Transport: RTP/AVP;unicast;client_port=9000-9001\r\n\r\n",
            port
        ),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 459"));

    let response = rtsp_request(
        &mut stream,
        &format!(
            "PLAY rtsp://127.0.0.1:{}/live RTSP/1.0\r\nCSeq: 5\r\nSession: {}\r\n\r\n",
            port, session_id
        ),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 200 OK"));
    assert!(response.contains("Range: npt=0.000-"));

    // Push one keyframe; it must arrive on our RTP socket.
    assert!(server.push_h264("/live", &keyframe(), 1000, true));
    let mut buf = [0u8; 1500];
    let (n, _) = rtp_socket.recv_from(&mut buf).expect("RTP packet");
    assert!(n > 12);
    assert_eq!(buf[0] >> 6, 2, "RTP version");
    assert_eq!(buf[1] & 0x7F, 96, "payload type");
    assert_eq!(&buf[12..n], &keyframe()[4..], "single NALU payload");

    let response = rtsp_request(
        &mut stream,
        &format!(
            "TEARDOWN rtsp://127.0.0.1:{}/live RTSP/1.0\r\nCSeq: 6\r\nSession: {}\r\n\r\n",
            port, session_id
        ),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 200 OK"));

    let stats = server.stats();
    assert!(stats.requests_total >= 6);
    assert_eq!(stats.sessions_created, 1);
    assert_eq!(stats.sessions_closed, 1);
    assert!(stats.rtp_packets_sent >= 1);

    assert!(server.stop_with_timeout(3_000));
}

#[test]
fn unknown_path_and_method_codes() {
    let port = 18_556;
    let mut server = start_server(port);
    let mut stream = connect(port);

    let response = rtsp_request(
        &mut stream,
        &format!("DESCRIBE rtsp://127.0.0.1:{}/missing RTSP/1.0\r\nCSeq: 1\r\n\r\n", port),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 404"));

    let response = rtsp_request(
        &mut stream,
        &format!("PLAY rtsp://127.0.0.1:{}/live RTSP/1.0\r\nCSeq: 2\r\nSession: X\r\n\r\n", port),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 455"), "PLAY before SETUP");

    let response = rtsp_request(
        &mut stream,
        &format!("RECORD rtsp://127.0.0.1:{}/live RTSP/1.0\r\nCSeq: 3\r\n\r\n", port),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 501"));

    server.stop();
}

#[test]
fn basic_auth_challenge_and_grant() {
    let port = 18_558;
    let mut server = Server::new(ServerConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..ServerConfig::default()
    });
    server.add_path(PathConfig::new("/live", Codec::H264));
    server.set_auth("admin", "secret", "RTSP Server");
    server.start().unwrap();

    let mut stream = connect(port);

    // OPTIONS is exempt.
    let response = rtsp_request(
        &mut stream,
        &format!("OPTIONS rtsp://127.0.0.1:{}/live RTSP/1.0\r\nCSeq: 1\r\n\r\n", port),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 200 OK"));

    let response = rtsp_request(
        &mut stream,
        &format!("DESCRIBE rtsp://127.0.0.1:{}/live RTSP/1.0\r\nCSeq: 2\r\n\r\n", port),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 401"));
    assert!(response.contains("WWW-Authenticate: Basic realm=\"RTSP Server\""));

    // admin:secret
    let response = rtsp_request(
        &mut stream,
        &format!(
            "DESCRIBE rtsp://127.0.0.1:{}/live RTSP/1.0\r\nCSeq: 3\r\n\
             Authorization: Basic YWRtaW46c2VjcmV0\r\n\r\n",
            port
        ),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 200 OK"));

    let stats = server.stats();
    assert_eq!(stats.auth_challenges, 1);
    assert_eq!(stats.auth_failures, 1);

    server.stop();
}

#[test]
fn client_pulls_over_udp() {
    let port = 18_560;
    let server = Arc::new(start_server(port));
    let stop_pushing = Arc::new(AtomicBool::new(false));

    let pusher = {
        let server = server.clone();
        let stop = stop_pushing.clone();
        thread::spawn(move || {
            let mut pts = 0u64;
            while !stop.load(Ordering::SeqCst) {
                server.push_h264("/live", &keyframe(), pts, true);
                pts += 40;
                thread::sleep(Duration::from_millis(20));
            }
        })
    };

    let mut client = RtspClient::new();
    client
        .open(&format!("rtsp://127.0.0.1:{}/live", port))
        .unwrap();
    client.describe().unwrap();
    assert!(client.session_info().has_video);
    let media = &client.session_info().media_streams[0];
    assert_eq!(media.codec, Codec::H264);
    assert_eq!((media.width, media.height), (1280, 720));

    client.setup(0).unwrap();
    client.play(0).unwrap();

    let frame = client.receive_frame(5_000).expect("frame within deadline");
    assert_eq!(frame.codec, Codec::H264);
    assert!(frame.is_keyframe());
    assert_eq!(&frame.data[..], &keyframe()[..]);
    assert_eq!((frame.width, frame.height), (1280, 720));

    let stats = client.stats();
    assert!(stats.rtp_packets_received >= 1);
    assert!(stats.frames_output >= 1);
    assert!(!stats.using_tcp_transport);

    stop_pushing.store(true, Ordering::SeqCst);
    pusher.join().unwrap();
    client.close();
    // Server teardown happens via Drop of the Arc'd server at end of scope.
}

#[test]
fn client_pulls_over_tcp_interleaved() {
    let port = 18_562;
    let server = Arc::new(start_server(port));
    let stop_pushing = Arc::new(AtomicBool::new(false));

    let pusher = {
        let server = server.clone();
        let stop = stop_pushing.clone();
        thread::spawn(move || {
            let mut pts = 0u64;
            while !stop.load(Ordering::SeqCst) {
                server.push_h264("/live", &keyframe(), pts, true);
                pts += 40;
                thread::sleep(Duration::from_millis(20));
            }
        })
    };

    let mut client = RtspClient::with_config(ClientConfig {
        prefer_tcp_transport: true,
        ..ClientConfig::default()
    });
    client
        .open(&format!("rtsp://127.0.0.1:{}/live", port))
        .unwrap();
    client.describe().unwrap();
    client.setup(0).unwrap();
    client.play(0).unwrap();

    let frame = client.receive_frame(5_000).expect("frame within deadline");
    assert_eq!(&frame.data[..], &keyframe()[..]);
    assert!(client.stats().using_tcp_transport);

    stop_pushing.store(true, Ordering::SeqCst);
    pusher.join().unwrap();
    client.close();
}

#[test]
fn digest_auth_client_retries() {
    let port = 18_564;
    let mut server = Server::new(ServerConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..ServerConfig::default()
    });
    server.add_path(PathConfig::new("/live", Codec::H264));
    server.set_auth_digest("u", "p", "R");
    server.start().unwrap();

    let mut client = RtspClient::new();
    client
        .open(&format!("rtsp://u:p@127.0.0.1:{}/live", port))
        .unwrap();
    client.describe().expect("describe after 401 retry");
    assert_eq!(client.stats().auth_retries, 1);

    // Subsequent requests reuse the Digest context with a fresh nc.
    client.send_options().unwrap();
    client.close();
    server.stop();
}

#[test]
fn repeated_sessions_do_not_leak() {
    let port = 18_566;
    let mut server = start_server(port);

    #[cfg(target_os = "linux")]
    let baseline_fds = count_open_fds();

    for _ in 0..20 {
        let mut client = RtspClient::new();
        client
            .open(&format!("rtsp://127.0.0.1:{}/live", port))
            .unwrap();
        client.describe().unwrap();
        client.setup(0).unwrap();
        client.play(0).unwrap();
        client.close();
    }

    // Let the server observe the disconnects.
    thread::sleep(Duration::from_millis(200));
    let stats = server.stats();
    assert!(stats.sessions_created >= 20);
    assert!(stats.sessions_closed >= 20);

    assert!(server.stop_with_timeout(5_000));

    #[cfg(target_os = "linux")]
    {
        thread::sleep(Duration::from_millis(200));
        let now = count_open_fds();
        assert!(
            now.abs_diff(baseline_fds) < 16,
            "fd leak: baseline {} now {}",
            baseline_fds,
            now
        );
    }
}

#[cfg(target_os = "linux")]
fn count_open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").map(|d| d.count()).unwrap_or(0)
}

#[test]
fn supervisor_reaps_idle_sessions() {
    let port = 18_570;
    let mut server = Server::new(ServerConfig {
        host: "127.0.0.1".to_string(),
        port,
        session_timeout_ms: 100,
        ..ServerConfig::default()
    });
    server.add_path(PathConfig::new("/live", Codec::H264));
    server.start().unwrap();

    let mut stream = connect(port);
    let response = rtsp_request(
        &mut stream,
        &format!(
            "SETUP rtsp://127.0.0.1:{}/live/stream RTSP/1.0\r\nCSeq: 1\r\n\
             Transport: RTP/AVP;unicast;client_port=9400-9401\r\n\r\n",
            port
        ),
    )
    .unwrap();
    assert!(response.starts_with("RTSP/1.0 200 OK"));
    assert_eq!(server.stats().sessions_created, 1);

    // Idle past the timeout; the supervisor fires on its 5-second tick.
    thread::sleep(Duration::from_millis(6_500));
    assert_eq!(server.stats().sessions_closed, 1);

    server.stop();
}

#[test]
fn stop_with_timeout_closes_connections() {
    let port = 18_568;
    let mut server = start_server(port);

    // A connected but idle client blocks in the server's read loop.
    let _idle = connect(port);
    thread::sleep(Duration::from_millis(50));

    assert!(server.stop_with_timeout(3_000));
    assert!(!server.is_running());

    // The port is free again.
    let mut server2 = start_server(port);
    server2.stop();
}
