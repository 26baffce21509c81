//! High-level RTSP server orchestrator.
//!
//! Owns the path registry, listener, connection set, and the session
//! supervisor. Shutdown order is supervisor → connections → paths →
//! listener, with the listener thread exiting via its accept poll.

use std::collections::HashMap;
use std::net::{IpAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::auth::AuthConfig;
use crate::error::{Result, RtspError};
use crate::media::{Codec, VideoFrame};
use crate::path::{PathConfig, PathRegistry};
use crate::transport::tcp::{self, ConnectionHandle, ServerContext};

/// Supervisor wake interval. Sessions idle past the configured timeout are
/// reaped on the next tick, so very short timeouts are not honored sub-tick.
const SUPERVISOR_TICK: Duration = Duration::from_secs(5);

/// Slice the supervisor sleeps in so it observes the stop flag promptly.
const SUPERVISOR_POLL: Duration = Duration::from_millis(100);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Idle age after which the supervisor closes a session.
    pub session_timeout_ms: u64,
    /// Local port range scanned for per-session RTP/RTCP pairs.
    pub rtp_port_start: u16,
    pub rtp_port_end: u16,
    /// Credentials; `None` disables authentication.
    pub auth: Option<AuthConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8554,
            session_timeout_ms: 60_000,
            rtp_port_start: 10_000,
            rtp_port_end: 20_000,
            auth: None,
        }
    }
}

/// Aggregate server counters.
#[derive(Debug, Default)]
pub(crate) struct ServerStats {
    pub requests_total: AtomicU64,
    pub auth_challenges: AtomicU64,
    pub auth_failures: AtomicU64,
    pub sessions_created: AtomicU64,
    pub sessions_closed: AtomicU64,
    pub frames_pushed: AtomicU64,
    pub rtp_packets_sent: AtomicU64,
    pub rtp_bytes_sent: AtomicU64,
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    pub requests_total: u64,
    pub auth_challenges: u64,
    pub auth_failures: u64,
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub frames_pushed: u64,
    pub rtp_packets_sent: u64,
    pub rtp_bytes_sent: u64,
}

impl ServerStats {
    fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            auth_challenges: self.auth_challenges.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            rtp_packets_sent: self.rtp_packets_sent.load(Ordering::Relaxed),
            rtp_bytes_sent: self.rtp_bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Called with `(path, peer_ip)` when a client session appears or goes away.
pub type ClientCallback = Box<dyn Fn(&str, IpAddr) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ServerCallbacks {
    connect: Mutex<Option<ClientCallback>>,
    disconnect: Mutex<Option<ClientCallback>>,
}

impl ServerCallbacks {
    pub fn client_connected(&self, path: &str, ip: IpAddr) {
        if let Some(cb) = self.connect.lock().as_ref() {
            cb(path, ip);
        }
    }

    pub fn client_disconnected(&self, path: &str, ip: IpAddr) {
        if let Some(cb) = self.disconnect.lock().as_ref() {
            cb(path, ip);
        }
    }
}

/// Embeddable RTSP server for live H.264/H.265 delivery.
///
/// ```no_run
/// use rtsp_live::{Codec, PathConfig, Server, ServerConfig};
///
/// let mut server = Server::new(ServerConfig::default());
/// server.add_path(PathConfig::new("/live", Codec::H264));
/// server.start().unwrap();
/// // server.push_h264("/live", &annex_b_frame, pts_ms, is_key);
/// ```
pub struct Server {
    config: ServerConfig,
    registry: Arc<PathRegistry>,
    stats: Arc<ServerStats>,
    callbacks: Arc<ServerCallbacks>,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    supervisor_thread: Option<JoinHandle<()>>,
    connections: Arc<Mutex<Vec<ConnectionHandle>>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Server {
            config,
            registry: Arc::new(PathRegistry::new()),
            stats: Arc::new(ServerStats::default()),
            callbacks: Arc::new(ServerCallbacks::default()),
            running: Arc::new(AtomicBool::new(false)),
            accept_thread: None,
            supervisor_thread: None,
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience constructor with just a bind address.
    pub fn bind(host: &str, port: u16) -> Self {
        Server::new(ServerConfig {
            host: host.to_string(),
            port,
            ..ServerConfig::default()
        })
    }

    /// Enable Basic authentication. Call before [`start`](Self::start).
    pub fn set_auth(&mut self, username: &str, password: &str, realm: &str) {
        self.config.auth = Some(AuthConfig::basic(username, password, realm));
    }

    /// Enable Digest authentication. Call before [`start`](Self::start).
    pub fn set_auth_digest(&mut self, username: &str, password: &str, realm: &str) {
        self.config.auth = Some(AuthConfig::digest(username, password, realm));
    }

    pub fn set_client_connect_callback(&self, callback: ClientCallback) {
        *self.callbacks.connect.lock() = Some(callback);
    }

    pub fn set_client_disconnect_callback(&self, callback: ClientCallback) {
        *self.callbacks.disconnect.lock() = Some(callback);
    }

    /// Bind the listener and spawn the accept and supervisor tasks.
    ///
    /// A bind failure leaves the server idle and is reported to the caller.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = match TcpListener::bind((self.config.host.as_str(), self.config.port)) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(
                    host = %self.config.host,
                    port = self.config.port,
                    error = %e,
                    "RTSP server failed to bind"
                );
                return Err(e.into());
            }
        };
        listener.set_nonblocking(true)?;

        self.running.store(true, Ordering::SeqCst);

        let ctx = ServerContext {
            registry: self.registry.clone(),
            config: Arc::new(self.config.clone()),
            stats: self.stats.clone(),
            callbacks: self.callbacks.clone(),
            running: self.running.clone(),
        };

        let connections = self.connections.clone();
        let accept_ctx = ctx.clone();
        self.accept_thread = Some(thread::spawn(move || {
            tcp::accept_loop(listener, accept_ctx, connections);
        }));

        let registry = self.registry.clone();
        let stats = self.stats.clone();
        let callbacks = self.callbacks.clone();
        let running = self.running.clone();
        let timeout = Duration::from_millis(self.config.session_timeout_ms);
        self.supervisor_thread = Some(thread::spawn(move || {
            supervisor_loop(registry, stats, callbacks, running, timeout);
        }));

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            "RTSP server listening"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop with the default 5-second deadline.
    pub fn stop(&mut self) {
        let _ = self.stop_with_timeout(5_000);
    }

    /// Graceful shutdown bounded by `deadline_ms`.
    ///
    /// Stops accepting, closes every connection socket to unblock readers,
    /// joins connection handlers against the remaining deadline, then joins
    /// the supervisor and clears the path registry. Returns true iff every
    /// join completed in time; late threads are detached, never leaked as
    /// open descriptors.
    pub fn stop_with_timeout(&mut self, deadline_ms: u64) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        let mut all_joined = true;

        if let Some(handle) = self.accept_thread.take() {
            all_joined &= join_with_timeout(handle, remaining(deadline));
        }

        let handles: Vec<ConnectionHandle> = self.connections.lock().drain(..).collect();
        for handle in &handles {
            let _ = handle.stream.shutdown(std::net::Shutdown::Both);
        }
        for handle in handles {
            all_joined &= join_with_timeout(handle.thread, remaining(deadline));
        }

        if let Some(handle) = self.supervisor_thread.take() {
            all_joined &= join_with_timeout(handle, remaining(deadline));
        }

        self.registry.clear();

        if was_running {
            tracing::info!(all_joined, "RTSP server stopped");
        }
        all_joined
    }

    /// Register a media path. Returns false when the name is taken.
    pub fn add_path(&self, config: PathConfig) -> bool {
        self.registry.add(config)
    }

    /// Remove a path, draining its subscribers.
    pub fn remove_path(&self, name: &str) -> bool {
        self.registry.remove(name)
    }

    /// Broadcast a prepared frame to a path's subscribers.
    pub fn push_frame(&self, name: &str, frame: &VideoFrame) -> bool {
        let path = match self.registry.get(name) {
            Some(path) => path,
            None => return false,
        };
        path.broadcast(frame);
        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Push raw Annex B H.264 data. Parameter sets are auto-extracted from
    /// keyframes (or whenever the path still lacks them).
    pub fn push_h264(&self, name: &str, data: &[u8], pts_ms: u64, is_key: bool) -> bool {
        self.push_raw(name, Codec::H264, data, pts_ms, is_key)
    }

    /// Push raw Annex B H.265 data.
    pub fn push_h265(&self, name: &str, data: &[u8], pts_ms: u64, is_key: bool) -> bool {
        self.push_raw(name, Codec::H265, data, pts_ms, is_key)
    }

    fn push_raw(&self, name: &str, codec: Codec, data: &[u8], pts_ms: u64, is_key: bool) -> bool {
        let path = match self.registry.get(name) {
            Some(path) => path,
            None => return false,
        };
        if path.codec() != codec {
            tracing::warn!(path = %name, "pushed codec does not match path codec");
            return false;
        }
        if is_key || !path.has_parameter_sets() {
            if path.update_parameter_sets(data) {
                tracing::info!(path = %name, "parameter sets updated from keyframe");
            }
        }
        let frame = VideoFrame::new(codec, Bytes::copy_from_slice(data), pts_ms, is_key);
        path.broadcast(&frame);
        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Cloneable push handle bound to one path.
    pub fn frame_input(&self, name: &str) -> FrameInput {
        FrameInput {
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            name: name.to_string(),
        }
    }

    pub fn stats(&self) -> ServerStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            let _ = self.stop_with_timeout(5_000);
        }
    }
}

/// Push-side handle for one path, usable from any thread.
#[derive(Clone)]
pub struct FrameInput {
    registry: Arc<PathRegistry>,
    stats: Arc<ServerStats>,
    name: String,
}

impl FrameInput {
    pub fn push_frame(&self, frame: &VideoFrame) -> bool {
        let path = match self.registry.get(&self.name) {
            Some(path) => path,
            None => return false,
        };
        path.broadcast(frame);
        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Reap sessions whose activity age exceeds the configured timeout.
fn supervisor_loop(
    registry: Arc<PathRegistry>,
    stats: Arc<ServerStats>,
    callbacks: Arc<ServerCallbacks>,
    running: Arc<AtomicBool>,
    session_timeout: Duration,
) {
    while running.load(Ordering::SeqCst) {
        let mut slept = Duration::ZERO;
        while slept < SUPERVISOR_TICK && running.load(Ordering::SeqCst) {
            thread::sleep(SUPERVISOR_POLL);
            slept += SUPERVISOR_POLL;
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }

        for path in registry.all() {
            for subscriber in path.subscribers() {
                if subscriber.idle_for() > session_timeout {
                    tracing::info!(
                        session_id = %subscriber.id,
                        path = %path.name,
                        "session timed out"
                    );
                    path.remove_subscriber(&subscriber.id);
                    stats.sessions_closed.fetch_add(1, Ordering::Relaxed);
                    callbacks.client_disconnected(&path.name, subscriber.peer_ip);
                }
            }
        }
    }
    tracing::debug!("supervisor exited");
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Join a thread against a budget. On timeout the waiter detaches and the
/// thread is left to finish on its own.
fn join_with_timeout(handle: JoinHandle<()>, budget: Duration) -> bool {
    let (tx, rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    match rx.recv_timeout(budget) {
        Ok(()) => {
            let _ = waiter.join();
            true
        }
        Err(_) => false,
    }
}

static SERVERS: OnceLock<Mutex<HashMap<(String, u16), Arc<Mutex<Server>>>>> = OnceLock::new();

/// Process-wide keyed server registry: one shared instance per
/// `(host, port)`, created on first use.
pub fn get_or_create_server(port: u16, host: &str) -> Arc<Mutex<Server>> {
    let servers = SERVERS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = servers.lock();
    map.entry((host.to_string(), port))
        .or_insert_with(|| Arc::new(Mutex::new(Server::bind(host, port))))
        .clone()
}
