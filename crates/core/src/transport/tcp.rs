//! TCP control-plane transport: accept loop, per-connection request loop,
//! and `$`-framed interleaving (RFC 2326 §10.12).

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::path::PathRegistry;
use crate::protocol::handler::ConnectionHandler;
use crate::protocol::request::{complete_message_len, RtspRequest};
use crate::server::{ServerCallbacks, ServerConfig, ServerStats};

/// How long a connection read blocks before re-checking the stop flag.
const READ_POLL: Duration = Duration::from_millis(1000);

/// Poll interval of the non-blocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Shared server state handed to every connection task.
#[derive(Clone)]
pub(crate) struct ServerContext {
    pub registry: Arc<PathRegistry>,
    pub config: Arc<ServerConfig>,
    pub stats: Arc<ServerStats>,
    pub callbacks: Arc<ServerCallbacks>,
    pub running: Arc<AtomicBool>,
}

/// A live connection tracked for shutdown: the socket (to unblock the
/// reader) and the thread handle (to join with a deadline).
pub(crate) struct ConnectionHandle {
    pub stream: TcpStream,
    pub thread: JoinHandle<()>,
}

/// Non-blocking accept loop. Polls the stop flag between accepts so
/// [`Server::stop_with_timeout`](crate::Server::stop_with_timeout) can
/// terminate it promptly.
pub(crate) fn accept_loop(
    listener: TcpListener,
    ctx: ServerContext,
    connections: Arc<Mutex<Vec<ConnectionHandle>>>,
) {
    while ctx.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if stream.set_nonblocking(false).is_err()
                    || stream.set_read_timeout(Some(READ_POLL)).is_err()
                {
                    continue;
                }
                let reader = match stream.try_clone() {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let registry_stream = match stream.try_clone() {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let conn_ctx = ctx.clone();
                let thread = thread::spawn(move || {
                    Connection::run(reader, stream, conn_ctx, peer);
                });
                connections.lock().push(ConnectionHandle {
                    stream: registry_stream,
                    thread,
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                if ctx.running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// One RTSP control connection.
struct Connection {
    reader: TcpStream,
    handler: ConnectionHandler,
    control: Arc<Mutex<TcpStream>>,
    peer: SocketAddr,
    running: Arc<AtomicBool>,
}

impl Connection {
    fn run(reader: TcpStream, writer: TcpStream, ctx: ServerContext, peer: SocketAddr) {
        tracing::info!(%peer, "client connected");

        let control = Arc::new(Mutex::new(writer));
        let running = ctx.running.clone();
        let handler = ConnectionHandler::new(&ctx, control.clone(), peer);

        let mut conn = Connection {
            reader,
            handler,
            control,
            peer,
            running,
        };
        let reason = conn.request_loop();
        conn.handler.on_disconnect();

        tracing::info!(peer = %conn.peer, reason, "client disconnected");
    }

    /// Read requests, frame them by `Content-Length`, dispatch, respond.
    /// Returns the reason for exiting.
    fn request_loop(&mut self) -> &'static str {
        let mut buffer: Vec<u8> = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];

        while self.running.load(Ordering::SeqCst) {
            match self.reader.read(&mut chunk) {
                Ok(0) => return "connection closed by peer",
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    while let Some(len) = complete_message_len(&buffer) {
                        let message: Vec<u8> = buffer.drain(..len).collect();
                        let text = String::from_utf8_lossy(&message);
                        match RtspRequest::parse(&text) {
                            Ok(request) => {
                                tracing::debug!(
                                    peer = %self.peer,
                                    method = %request.method_name,
                                    uri = %request.uri,
                                    "request"
                                );
                                let response = self.handler.handle(&request);
                                tracing::debug!(
                                    peer = %self.peer,
                                    status = response.status_code,
                                    "response"
                                );
                                let wire = response.serialize();
                                if self.control.lock().write_all(wire.as_bytes()).is_err() {
                                    return "write error";
                                }
                            }
                            Err(e) => {
                                // No CSeq to echo, so there is nothing valid
                                // to answer with.
                                tracing::warn!(peer = %self.peer, error = %e, "unparsable request dropped");
                            }
                        }
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(_) => return "read error",
            }
        }
        "server shutting down"
    }
}

/// Write one `$`-framed interleaved packet onto the control socket.
///
/// Frame layout per RFC 2326 §10.12: `$`, 8-bit channel, 16-bit big-endian
/// length, packet bytes. The caller's mutex serializes this against
/// request/response writes on the same socket.
pub(crate) fn write_interleaved(
    stream: &Mutex<TcpStream>,
    channel: u8,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.push(b'$');
    frame.push(channel);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    stream.lock().write_all(&frame)
}

/// Read one complete RTSP message (header block plus `Content-Length` body)
/// from `stream`, polling until `timeout` elapses. Client side.
///
/// Interleaved `$`-framed packets that arrive ahead of the response are
/// skipped: the server may push media onto the control socket between the
/// request and its response.
pub(crate) fn read_message(stream: &mut TcpStream, timeout: Duration) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let mut buffer: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        while buffer.first() == Some(&b'$') && buffer.len() >= 4 {
            let frame_len = 4 + u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
            if buffer.len() < frame_len {
                break;
            }
            buffer.drain(..frame_len);
        }
        if buffer.first() != Some(&b'$') {
            if let Some(len) = complete_message_len(&buffer) {
                buffer.truncate(len);
                return Ok(String::from_utf8_lossy(&buffer).into_owned());
            }
        }
        if Instant::now() >= deadline {
            return Err(RtspError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "RTSP response timed out",
            )));
        }
        match stream.read(&mut chunk) {
            Ok(0) => {
                return Err(RtspError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )))
            }
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn interleaved_frame_layout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (mut server_side, _) = listener.accept().unwrap();

        let stream = Mutex::new(client);
        write_interleaved(&stream, 2, &[0xAA, 0xBB, 0xCC]).unwrap();

        let mut buf = [0u8; 7];
        server_side.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [b'$', 2, 0x00, 0x03, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn read_message_frames_by_content_length() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let (mut server_side, _) = listener.accept().unwrap();

        // Two writes: header block first, body later.
        server_side
            .write_all(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 4\r\n\r\n")
            .unwrap();
        server_side.write_all(b"v=0\n").unwrap();

        let message = read_message(&mut client, Duration::from_secs(2)).unwrap();
        assert!(message.ends_with("v=0\n"));
    }

    #[test]
    fn read_message_skips_leading_interleaved_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let (mut server_side, _) = listener.accept().unwrap();

        // An RTP frame lands on the control socket before the response.
        server_side.write_all(&[b'$', 0, 0x00, 0x02, 0xAA, 0xBB]).unwrap();
        server_side
            .write_all(b"RTSP/1.0 200 OK\r\nCSeq: 7\r\n\r\n")
            .unwrap();

        let message = read_message(&mut client, Duration::from_secs(2)).unwrap();
        assert!(message.starts_with("RTSP/1.0 200 OK"));
    }

    #[test]
    fn read_message_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let (_server_side, _) = listener.accept().unwrap();

        assert!(read_message(&mut client, Duration::from_millis(100)).is_err());
    }
}
