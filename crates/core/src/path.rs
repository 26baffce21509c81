//! Named media paths and the broadcast fan-out.
//!
//! A path is the endpoint a publisher writes to and subscribers read from.
//! Broadcast is non-blocking: each subscriber has a bounded drop-oldest
//! queue, so a slow consumer never stalls the producer. The most recent
//! keyframe is retained as the bootstrap frame and handed to new
//! subscribers so they can decode the first payload they see.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::media::nalu::{self, h264_nal, h265_nal};
use crate::media::{Codec, VideoFrame};
use crate::protocol::sdp::{self, SdpVideo};
use crate::session::Subscriber;

/// Static configuration of a media path.
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// URL path beginning with `/` (e.g. `/live/cam1`).
    pub name: String,
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Parameter sets; may be set here or auto-extracted from keyframes.
    pub vps: Vec<u8>,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

impl PathConfig {
    pub fn new(name: &str, codec: Codec) -> Self {
        PathConfig {
            name: name.to_string(),
            codec,
            width: 1920,
            height: 1080,
            fps: 30,
            vps: Vec::new(),
            sps: Vec::new(),
            pps: Vec::new(),
        }
    }
}

/// A registered path with its subscriber set and bootstrap frame.
pub(crate) struct MediaPath {
    pub name: String,
    config: Mutex<PathConfig>,
    subscribers: Mutex<HashMap<String, Arc<Subscriber>>>,
    /// Most recent keyframe, seeded into new subscribers.
    bootstrap: Mutex<Option<VideoFrame>>,
}

impl MediaPath {
    fn new(config: PathConfig) -> Self {
        MediaPath {
            name: config.name.clone(),
            config: Mutex::new(config),
            subscribers: Mutex::new(HashMap::new()),
            bootstrap: Mutex::new(None),
        }
    }

    pub fn codec(&self) -> Codec {
        self.config.lock().codec
    }

    /// Session description for DESCRIBE.
    pub fn sdp(&self) -> String {
        let config = self.config.lock();
        sdp::generate(&SdpVideo {
            codec: config.codec,
            payload_type: config.codec.default_payload_type(),
            width: config.width,
            height: config.height,
            vps: &config.vps,
            sps: &config.sps,
            pps: &config.pps,
            control: sdp::CONTROL_TRACK,
        })
    }

    /// Fan one frame out to every playing subscriber and retain it as the
    /// bootstrap frame when it is a keyframe.
    pub fn broadcast(&self, frame: &VideoFrame) {
        if frame.is_keyframe() {
            *self.bootstrap.lock() = Some(frame.clone());
        }
        let subscribers = self.subscribers.lock();
        for subscriber in subscribers.values() {
            if subscriber.is_playing() {
                subscriber.push_frame(frame.clone());
            }
        }
    }

    /// Register a subscriber (SETUP) and seed it with the bootstrap
    /// keyframe so its first decoded payload is an IDR.
    pub fn add_subscriber(&self, subscriber: Arc<Subscriber>) {
        let bootstrap = self.bootstrap.lock().clone();
        if let Some(frame) = bootstrap {
            if frame.is_keyframe() {
                subscriber.push_frame(frame);
            }
        }
        self.subscribers
            .lock()
            .insert(subscriber.id.clone(), subscriber);
    }

    /// Stop and remove a subscriber. Returns it when it existed.
    pub fn remove_subscriber(&self, id: &str) -> Option<Arc<Subscriber>> {
        let removed = self.subscribers.lock().remove(id);
        if let Some(subscriber) = &removed {
            subscriber.stop();
            tracing::debug!(path = %self.name, session_id = %id, "subscriber removed");
        }
        removed
    }

    pub fn get_subscriber(&self, id: &str) -> Option<Arc<Subscriber>> {
        self.subscribers.lock().get(id).cloned()
    }

    pub fn subscribers(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers.lock().values().cloned().collect()
    }

    /// Refresh stored parameter sets from a pushed keyframe. Byte-compared
    /// so unchanged sets do not dirty the SDP. Returns true on change.
    pub fn update_parameter_sets(&self, data: &[u8]) -> bool {
        let mut config = self.config.lock();
        let codec = config.codec;
        let mut updated = false;
        for view in nalu::scan(data, codec) {
            if view.data.is_empty() {
                continue;
            }
            let slot = match (codec, view.nal_type) {
                (Codec::H264, h264_nal::SPS) => Some(&mut config.sps),
                (Codec::H264, h264_nal::PPS) => Some(&mut config.pps),
                (Codec::H265, h265_nal::VPS) => Some(&mut config.vps),
                (Codec::H265, h265_nal::SPS) => Some(&mut config.sps),
                (Codec::H265, h265_nal::PPS) => Some(&mut config.pps),
                _ => None,
            };
            if let Some(slot) = slot {
                if slot.as_slice() != view.data {
                    *slot = view.data.to_vec();
                    updated = true;
                }
            }
        }
        updated
    }

    pub fn has_parameter_sets(&self) -> bool {
        let config = self.config.lock();
        match config.codec {
            Codec::H264 => !config.sps.is_empty() && !config.pps.is_empty(),
            Codec::H265 => {
                !config.vps.is_empty() && !config.sps.is_empty() && !config.pps.is_empty()
            }
        }
    }

    /// Stop every subscriber and drop them (path removal / shutdown).
    pub fn shutdown(&self) {
        let drained: Vec<Arc<Subscriber>> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.drain().map(|(_, s)| s).collect()
        };
        for subscriber in drained {
            subscriber.stop();
        }
    }
}

/// Server-wide registry of media paths, keyed by name.
///
/// At most one path per name; the registry mutex is held only across map
/// lookups and pointer copies, never across send work or socket I/O.
pub(crate) struct PathRegistry {
    paths: Mutex<HashMap<String, Arc<MediaPath>>>,
}

impl PathRegistry {
    pub fn new() -> Self {
        PathRegistry {
            paths: Mutex::new(HashMap::new()),
        }
    }

    /// Register a path. Returns false when the name is already taken.
    pub fn add(&self, config: PathConfig) -> bool {
        let mut paths = self.paths.lock();
        if paths.contains_key(&config.name) {
            return false;
        }
        let name = config.name.clone();
        paths.insert(name.clone(), Arc::new(MediaPath::new(config)));
        tracing::info!(path = %name, "path registered");
        true
    }

    /// Remove a path, draining its subscribers. Returns false when absent.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.paths.lock().remove(name);
        match removed {
            Some(path) => {
                path.shutdown();
                tracing::info!(path = %name, "path removed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<MediaPath>> {
        self.paths.lock().get(name).cloned()
    }

    /// Resolve a SETUP URI path: exact match first, then with the final
    /// `/control` segment stripped.
    pub fn resolve_setup(&self, name: &str) -> Option<Arc<MediaPath>> {
        if let Some(path) = self.get(name) {
            return Some(path);
        }
        let stripped = match name.rfind('/') {
            Some(0) | None => return None,
            Some(pos) => &name[..pos],
        };
        self.get(stripped)
    }

    pub fn all(&self) -> Vec<Arc<MediaPath>> {
        self.paths.lock().values().cloned().collect()
    }

    /// Drop every path, draining all subscribers (server shutdown).
    pub fn clear(&self) {
        let drained: Vec<Arc<MediaPath>> = self.paths.lock().drain().map(|(_, p)| p).collect();
        for path in drained {
            path.shutdown();
        }
    }
}
