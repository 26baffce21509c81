use crate::error::{ParseErrorKind, Result, RtspError};

/// RTSP methods (RFC 2326 §6.1). Recognized case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    Announce,
    Record,
    GetParameter,
    SetParameter,
}

impl Method {
    pub fn parse(s: &str) -> Option<Method> {
        const TABLE: [(&str, Method); 10] = [
            ("OPTIONS", Method::Options),
            ("DESCRIBE", Method::Describe),
            ("SETUP", Method::Setup),
            ("PLAY", Method::Play),
            ("PAUSE", Method::Pause),
            ("TEARDOWN", Method::Teardown),
            ("ANNOUNCE", Method::Announce),
            ("RECORD", Method::Record),
            ("GET_PARAMETER", Method::GetParameter),
            ("SET_PARAMETER", Method::SetParameter),
        ];
        TABLE
            .iter()
            .find(|(name, _)| s.eq_ignore_ascii_case(name))
            .map(|&(_, m)| m)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
            Method::Announce => "ANNOUNCE",
            Method::Record => "RECORD",
            Method::GetParameter => "GET_PARAMETER",
            Method::SetParameter => "SET_PARAMETER",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed RTSP request (RFC 2326 §6).
///
/// Header names are stored as received; lookups via
/// [`header`](Self::header) are case-insensitive with values trimmed.
#[derive(Debug)]
pub struct RtspRequest {
    /// `None` when the method token is syntactically a method but not one of
    /// the RFC 2326 set — the handler answers 501.
    pub method: Option<Method>,
    /// Method token exactly as received.
    pub method_name: String,
    /// Request-URI (e.g. `rtsp://host:8554/live/stream`).
    pub uri: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RtspRequest {
    /// Parse a complete RTSP request: request line, headers, blank line and
    /// any body (the connection loop frames the message by `Content-Length`
    /// before calling this).
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, body) = match raw.split_once("\r\n\r\n") {
            Some((head, body)) => (head, body),
            None => (raw, ""),
        };

        let mut lines = head.lines();
        let request_line = lines.next().filter(|l| !l.is_empty()).ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method_name = parts[0].to_string();
        let method = Method::parse(&method_name);
        let uri = parts[1].to_string();
        let version = parts[2].to_string();
        if version != "RTSP/1.0" {
            tracing::warn!(version, "peer sent non-RTSP/1.0 version");
        }

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

        Ok(RtspRequest {
            method,
            method_name,
            uri,
            version,
            headers,
            body: body.to_string(),
        })
    }

    /// Case-insensitive header lookup (RFC 2326 §4.2).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The CSeq value that numbers this request/response pair (§12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.header("CSeq")
    }

    /// Session ID with any `;timeout=` suffix stripped (§12.37).
    pub fn session_id(&self) -> Option<String> {
        self.header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
    }
}

/// Byte length of the first complete message in `buf`, once the header block
/// and `Content-Length` bytes of body have fully arrived.
pub(crate) fn complete_message_len(buf: &[u8]) -> Option<usize> {
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

/// Serialize a client-side request.
pub(crate) fn build_request(
    method: Method,
    uri: &str,
    cseq: u32,
    headers: &[(&str, String)],
    body: &str,
) -> String {
    let mut out = format!("{} {} RTSP/1.0\r\nCSeq: {}\r\n", method, uri, cseq);
    for (name, value) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    if !body.is_empty() {
        out.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    out.push_str("\r\n");
    out.push_str(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:8554/live RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Some(Method::Options));
        assert_eq!(req.uri, "rtsp://localhost:8554/live");
        assert_eq!(req.cseq(), Some("1"));
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/live/stream RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Some(Method::Setup));
        assert_eq!(
            req.header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn methods_case_insensitive() {
        assert_eq!(Method::parse("setup"), Some(Method::Setup));
        assert_eq!(Method::parse("Get_Parameter"), Some(Method::GetParameter));
        assert_eq!(Method::parse("BREW"), None);
    }

    #[test]
    fn unknown_method_preserved() {
        let raw = "BREW rtsp://localhost/pot RTSP/1.0\r\nCSeq: 9\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, None);
        assert_eq!(req.method_name, "BREW");
    }

    #[test]
    fn parse_body_after_blank_line() {
        let raw = "ANNOUNCE rtsp://h/p RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\nv=0\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Some(Method::Announce));
        assert_eq!(req.body, "v=0\r\n");
    }

    #[test]
    fn parse_empty_request() {
        assert!(RtspRequest::parse("").is_err());
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.header("CSeq"), Some("42"));
        assert_eq!(req.header("CSEQ"), Some("42"));
    }

    #[test]
    fn session_id_strips_timeout() {
        let raw = "PLAY rtsp://h/p RTSP/1.0\r\nCSeq: 4\r\nSession: ABC123;timeout=60\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.session_id().as_deref(), Some("ABC123"));
    }

    #[test]
    fn message_framing_without_body() {
        let raw = b"OPTIONS rtsp://h/p RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        assert_eq!(complete_message_len(raw), Some(raw.len()));
    }

    #[test]
    fn message_framing_waits_for_body() {
        let head = b"ANNOUNCE rtsp://h/p RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 10\r\n\r\n";
        assert_eq!(complete_message_len(head), None);
        let mut full = head.to_vec();
        full.extend_from_slice(b"0123456789TRAILING");
        assert_eq!(complete_message_len(&full), Some(head.len() + 10));
    }

    #[test]
    fn build_request_wire_format() {
        let wire = build_request(
            Method::Describe,
            "rtsp://h/p",
            7,
            &[("Accept", "application/sdp".to_string())],
            "",
        );
        assert!(wire.starts_with("DESCRIBE rtsp://h/p RTSP/1.0\r\nCSeq: 7\r\n"));
        assert!(wire.contains("Accept: application/sdp\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }
}
