//! RTSP authentication: Basic and Digest (RFC 2069 / RFC 2617 subset).
//!
//! Disabled unless the server carries an [`AuthConfig`]. When enabled, every
//! request except OPTIONS must present a valid `Authorization` header or the
//! response is 401 with a `WWW-Authenticate` challenge.
//!
//! Digest state is per connection: the current nonce rotates after
//! `nonce_ttl` (the client is re-challenged with `stale=true`), and a
//! seen-nc map rejects any `(username, cnonce, nonce)` tuple whose nonce
//! count does not strictly increase.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Default Digest nonce lifetime.
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_millis(60_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Digest,
}

/// Server-side credential configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub scheme: AuthScheme,
    pub username: String,
    pub password: String,
    pub realm: String,
    pub nonce_ttl: Duration,
}

impl AuthConfig {
    pub fn basic(username: &str, password: &str, realm: &str) -> Self {
        AuthConfig {
            scheme: AuthScheme::Basic,
            username: username.to_string(),
            password: password.to_string(),
            realm: realm.to_string(),
            nonce_ttl: DEFAULT_NONCE_TTL,
        }
    }

    pub fn digest(username: &str, password: &str, realm: &str) -> Self {
        AuthConfig {
            scheme: AuthScheme::Digest,
            ..Self::basic(username, password, realm)
        }
    }
}

/// Outcome of verifying one request.
#[derive(Debug)]
pub enum AuthDecision {
    Granted,
    /// 401 with this `WWW-Authenticate` value.
    Denied { challenge: String, stale: bool },
}

/// Per-connection Digest verification state.
#[derive(Debug)]
pub struct ConnectionAuth {
    nonce: String,
    created: Instant,
    /// `username|cnonce|nonce` → highest accepted nc value.
    nc_seen: HashMap<String, u64>,
}

impl ConnectionAuth {
    pub fn new() -> Self {
        ConnectionAuth {
            nonce: fresh_nonce(),
            created: Instant::now(),
            nc_seen: HashMap::new(),
        }
    }

    /// Verify the `Authorization` header of one request.
    pub fn check(&mut self, cfg: &AuthConfig, method: &str, header: Option<&str>) -> AuthDecision {
        match cfg.scheme {
            AuthScheme::Digest => self.check_digest(cfg, method, header),
            AuthScheme::Basic => self.check_basic(cfg, header),
        }
    }

    fn deny(&self, cfg: &AuthConfig, stale: bool) -> AuthDecision {
        let challenge = match cfg.scheme {
            AuthScheme::Digest => {
                let mut c = format!(
                    "Digest realm=\"{}\", nonce=\"{}\", algorithm=MD5, qop=\"auth\"",
                    cfg.realm, self.nonce
                );
                if stale {
                    c.push_str(", stale=true");
                }
                c
            }
            AuthScheme::Basic => format!("Basic realm=\"{}\"", cfg.realm),
        };
        AuthDecision::Denied { challenge, stale }
    }

    fn check_basic(&self, cfg: &AuthConfig, header: Option<&str>) -> AuthDecision {
        let encoded = match header.and_then(|h| h.strip_prefix("Basic ")) {
            Some(e) => e.trim(),
            None => return self.deny(cfg, false),
        };
        let decoded = match BASE64.decode(encoded) {
            Ok(d) => d,
            Err(_) => return self.deny(cfg, false),
        };
        let expected = format!("{}:{}", cfg.username, cfg.password);
        if constant_time_eq(&decoded, expected.as_bytes()) {
            AuthDecision::Granted
        } else {
            self.deny(cfg, false)
        }
    }

    fn check_digest(&mut self, cfg: &AuthConfig, method: &str, header: Option<&str>) -> AuthDecision {
        if self.created.elapsed() > cfg.nonce_ttl {
            self.nonce = fresh_nonce();
            self.created = Instant::now();
            self.nc_seen.clear();
            return self.deny(cfg, true);
        }

        let params = match header.and_then(|h| h.strip_prefix("Digest ")) {
            Some(rest) => parse_auth_params(rest),
            None => return self.deny(cfg, false),
        };

        let username = params.get("username").map(String::as_str).unwrap_or("");
        let realm = params.get("realm").map(String::as_str).unwrap_or("");
        let nonce = params.get("nonce").map(String::as_str).unwrap_or("");
        let uri = params.get("uri").map(String::as_str).unwrap_or("");
        let response = params.get("response").map(String::as_str).unwrap_or("");
        let qop = params.get("qop").map(String::as_str).unwrap_or("");

        if username.is_empty() || realm.is_empty() || nonce.is_empty() || uri.is_empty()
            || response.is_empty()
        {
            return self.deny(cfg, false);
        }
        if username != cfg.username || realm != cfg.realm || nonce != self.nonce {
            return self.deny(cfg, false);
        }

        let ha1 = md5_hex(&format!("{}:{}:{}", cfg.username, cfg.realm, cfg.password));
        let ha2 = md5_hex(&format!("{}:{}", method, uri));

        let expected = if !qop.is_empty() {
            let nc = params.get("nc").map(String::as_str).unwrap_or("");
            let cnonce = params.get("cnonce").map(String::as_str).unwrap_or("");
            if nc.is_empty() || cnonce.is_empty() {
                return self.deny(cfg, false);
            }
            let nc_value = match u64::from_str_radix(nc, 16) {
                Ok(v) => v,
                Err(_) => return self.deny(cfg, false),
            };
            let key = format!("{}|{}|{}", username, cnonce, nonce);
            if let Some(&prev) = self.nc_seen.get(&key) {
                if nc_value <= prev {
                    tracing::warn!(username, nc, "Digest nonce-count replay rejected");
                    return self.deny(cfg, false);
                }
            }
            self.nc_seen.insert(key, nc_value);
            md5_hex(&format!("{}:{}:{}:{}:{}:{}", ha1, nonce, nc, cnonce, qop, ha2))
        } else {
            md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2))
        };

        if constant_time_eq(expected.as_bytes(), response.as_bytes()) {
            AuthDecision::Granted
        } else {
            self.deny(cfg, false)
        }
    }
}

impl Default for ConnectionAuth {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-side `Authorization: Basic` value.
pub fn basic_authorization(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", username, password))
    )
}

/// Client-side `Authorization: Digest` value for one request.
pub fn digest_authorization(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    qop: &str,
    nc: u32,
    method: &str,
    uri: &str,
) -> String {
    let nc_hex = format!("{:08x}", nc);
    let mut cnonce = md5_hex(&format!("{}:{}:{}", nc, username, uri));
    cnonce.truncate(16);
    let ha1 = md5_hex(&format!("{}:{}:{}", username, realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    let response = md5_hex(&format!(
        "{}:{}:{}:{}:{}:{}",
        ha1, nonce, nc_hex, cnonce, qop, ha2
    ));
    format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", \
         response=\"{}\", qop={}, nc={}, cnonce=\"{}\"",
        username, realm, nonce, uri, response, qop, nc_hex, cnonce
    )
}

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone)]
pub enum WwwAuthenticate {
    Basic { realm: String },
    Digest { realm: String, nonce: String, qop: String },
}

/// Parse a `WWW-Authenticate` header value.
pub fn parse_www_authenticate(value: &str) -> Option<WwwAuthenticate> {
    if let Some(rest) = value.strip_prefix("Digest ") {
        let params = parse_auth_params(rest);
        let realm = params.get("realm")?.clone();
        let nonce = params.get("nonce")?.clone();
        let qop = params.get("qop").cloned().unwrap_or_else(|| "auth".to_string());
        Some(WwwAuthenticate::Digest { realm, nonce, qop })
    } else if let Some(rest) = value.strip_prefix("Basic ") {
        let params = parse_auth_params(rest);
        Some(WwwAuthenticate::Basic {
            realm: params.get("realm").cloned().unwrap_or_default(),
        })
    } else {
        None
    }
}

/// Parse comma-separated `key=value` / `key="value"` auth parameters.
fn parse_auth_params(value: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let bytes = value.as_bytes();
    let mut pos = 0usize;
    while pos < bytes.len() {
        while pos < bytes.len() && (bytes[pos] == b' ' || bytes[pos] == b',') {
            pos += 1;
        }
        let eq = match value[pos..].find('=') {
            Some(off) => pos + off,
            None => break,
        };
        let key = value[pos..eq].trim().to_string();
        pos = eq + 1;
        let val;
        if pos < bytes.len() && bytes[pos] == b'"' {
            let endq = match value[pos + 1..].find('"') {
                Some(off) => pos + 1 + off,
                None => break,
            };
            val = value[pos + 1..endq].to_string();
            pos = endq + 1;
        } else {
            let end = value[pos..].find(',').map(|off| pos + off).unwrap_or(value.len());
            val = value[pos..end].trim().to_string();
            pos = end + 1;
        }
        params.insert(key, val);
    }
    params
}

pub(crate) fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

fn fresh_nonce() -> String {
    format!(
        "nonce-{:08x}{:08x}",
        rand::random::<u32>(),
        rand::random::<u32>()
    )
}
