use crate::error::{ParseErrorKind, Result, RtspError};

/// Server identification string included in every response (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = "rtsp-live/0.1";

/// Methods advertised by OPTIONS.
pub const PUBLIC_METHODS: &str =
    "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER, SET_PARAMETER";

/// An RTSP response (RFC 2326 §7).
///
/// Built with chained [`add_header`](Self::add_header) /
/// [`with_body`](Self::with_body); `Content-Length` is computed at
/// serialization time. Also parses server responses on the client side.
#[must_use]
#[derive(Debug)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// 200 OK with the echoed CSeq (§7.1.1).
    pub fn ok(cseq: &str) -> Self {
        Self::new(200, "OK").add_header("CSeq", cseq)
    }

    /// OPTIONS response advertising the supported method set.
    pub fn options(cseq: &str) -> Self {
        Self::ok(cseq).add_header("Public", PUBLIC_METHODS)
    }

    /// DESCRIBE response carrying an SDP body.
    pub fn describe(cseq: &str, sdp: String) -> Self {
        Self::ok(cseq)
            .add_header("Content-Type", "application/sdp")
            .with_body(sdp)
    }

    /// SETUP response echoing the negotiated transport.
    pub fn setup(cseq: &str, session: &str, transport: &str) -> Self {
        Self::ok(cseq)
            .add_header("Session", session)
            .add_header("Transport", transport)
    }

    /// PLAY response with the open-ended live range.
    pub fn play(cseq: &str, session: &str) -> Self {
        Self::ok(cseq)
            .add_header("Session", session)
            .add_header("Range", "npt=0.000-")
    }

    pub fn teardown(cseq: &str) -> Self {
        Self::ok(cseq)
    }

    pub fn error(cseq: &str, code: u16, reason: &str) -> Self {
        Self::new(code, reason).add_header("CSeq", cseq)
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Session ID with any `;timeout=` suffix stripped.
    pub fn session_id(&self) -> Option<String> {
        self.header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
    }

    /// Serialize to the RTSP wire format, appending `Content-Length` when a
    /// body is present (§12.14).
    pub fn serialize(&self) -> String {
        let mut out = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        if let Some(body) = &self.body {
            out.push_str(&format!("Content-Length: {}\r\n", body.len()));
            out.push_str("\r\n");
            out.push_str(body);
        } else {
            out.push_str("\r\n");
        }
        out
    }

    /// Parse a server response (client side).
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, body) = match raw.split_once("\r\n\r\n") {
            Some((head, body)) => (head, body),
            None => (raw, ""),
        };

        let mut lines = head.lines();
        let status_line = lines.next().filter(|l| !l.is_empty()).ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        let code = parts.next().and_then(|c| c.parse::<u16>().ok());
        let reason = parts.next().unwrap_or("").to_string();
        let status_code = match (version.starts_with("RTSP/"), code) {
            (true, Some(code)) => code,
            _ => {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::InvalidStatusLine,
                })
            }
        };

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push((
                line[..colon].trim().to_string(),
                line[colon + 1..].trim().to_string(),
            ));
        }

        Ok(RtspResponse {
            status_code,
            status_text: reason,
            headers,
            body: (!body.is_empty()).then(|| body.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_no_body() {
        let resp = RtspResponse::options("1");
        let s = resp.serialize();
        assert!(s.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(s.contains("Server: rtsp-live/0.1\r\n"));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.contains("Public: OPTIONS, DESCRIBE"));
        assert!(s.ends_with("\r\n"));
    }

    #[test]
    fn serialize_with_body() {
        let resp = RtspResponse::describe("2", "v=0\r\n".to_string());
        let s = resp.serialize();
        assert!(s.contains("Content-Type: application/sdp\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("v=0\r\n"));
    }

    #[test]
    fn setup_and_play_shortcuts() {
        let s = RtspResponse::setup("3", "ABC;timeout=60", "RTP/AVP;unicast;client_port=8000-8001")
            .serialize();
        assert!(s.contains("Session: ABC;timeout=60\r\n"));
        assert!(s.contains("Transport: RTP/AVP;unicast;client_port=8000-8001\r\n"));

        let p = RtspResponse::play("4", "ABC").serialize();
        assert!(p.contains("Range: npt=0.000-\r\n"));
        assert!(p.contains("Session: ABC\r\n"));
    }

    #[test]
    fn error_shortcut() {
        let resp = RtspResponse::error("5", 459, "Aggregate Operation Not Allowed");
        assert_eq!(resp.status_code, 459);
        assert!(!resp.is_success());
        assert!(resp
            .serialize()
            .starts_with("RTSP/1.0 459 Aggregate Operation Not Allowed\r\n"));
    }

    #[test]
    fn parse_round_trip() {
        let wire = RtspResponse::describe("2", "v=0\r\nm=video 0 RTP/AVP 96\r\n".to_string())
            .serialize();
        let parsed = RtspResponse::parse(&wire).unwrap();
        assert_eq!(parsed.status_code, 200);
        assert!(parsed.is_success());
        assert_eq!(parsed.header("cseq"), Some("2"));
        assert!(parsed.body.unwrap().contains("m=video"));
    }

    #[test]
    fn parse_session_with_timeout() {
        let wire = "RTSP/1.0 200 OK\r\nCSeq: 3\r\nSession: DEADBEEF;timeout=60\r\n\r\n";
        let parsed = RtspResponse::parse(wire).unwrap();
        assert_eq!(parsed.session_id().as_deref(), Some("DEADBEEF"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(RtspResponse::parse("").is_err());
        assert!(RtspResponse::parse("HTTP/1.1 200 OK\r\n\r\n").is_err());
    }
}
