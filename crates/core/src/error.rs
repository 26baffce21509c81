//! Error types for the RTSP streaming stack.

use std::fmt;

/// Errors that can occur across the stack.
///
/// Variants map to specific failure modes:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`BadRequest`](Self::BadRequest) —
///   malformed RTSP messages or Transport headers.
/// - **Auth**: [`Unauthorized`](Self::Unauthorized) — missing or wrong
///   credentials, stale Digest nonce.
/// - **Session**: [`SessionNotFound`](Self::SessionNotFound),
///   [`MethodNotValidInState`](Self::MethodNotValidInState),
///   [`AggregateNotAllowed`](Self::AggregateNotAllowed).
/// - **Transport**: [`Io`](Self::Io), [`UnsupportedTransport`](Self::UnsupportedTransport),
///   [`Internal`](Self::Internal) — socket and port-allocation failures.
/// - **Server lifecycle**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP message (RFC 2326 §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Request was syntactically valid RTSP but semantically unusable
    /// (e.g. malformed `Transport` header).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials; the response carries a challenge.
    #[error("unauthorized")]
    Unauthorized,

    /// No media path registered under the requested name.
    #[error("path not found: {0}")]
    NotFound(String),

    /// The `Session` header does not match any active session.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Method arrived in a state where it is not allowed (e.g. PLAY before SETUP).
    #[error("method not valid in state: {0}")]
    MethodNotValidInState(&'static str),

    /// Second SETUP on a connection that already carries a session.
    #[error("aggregate operation not allowed")]
    AggregateNotAllowed,

    /// Neither UDP nor TCP interleaved transport could be negotiated.
    #[error("unsupported transport")]
    UnsupportedTransport,

    /// Port allocation or socket binding failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// Unknown RTSP method.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Operation requires a started server or an open connection.
    #[error("not started")]
    NotStarted,
}

impl RtspError {
    /// RTSP status code this error maps to when it terminates a request.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Parse { .. } | Self::BadRequest(_) => 400,
            Self::Unauthorized => 401,
            Self::NotFound(_) => 404,
            Self::SessionNotFound(_) => 454,
            Self::MethodNotValidInState(_) => 455,
            Self::AggregateNotAllowed => 459,
            Self::UnsupportedTransport => 461,
            Self::NotImplemented(_) => 501,
            _ => 500,
        }
    }

    /// Canonical reason phrase for [`status_code`](Self::status_code).
    pub fn reason(&self) -> &'static str {
        match self.status_code() {
            400 => "Bad Request",
            401 => "Unauthorized",
            404 => "Not Found",
            454 => "Session Not Found",
            455 => "Method Not Valid In This State",
            459 => "Aggregate Operation Not Allowed",
            461 => "Unsupported Transport",
            501 => "Not Implemented",
            _ => "Internal Server Error",
        }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request or status line).
    EmptyMessage,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `RTSP/1.0 CODE Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Method token is not one of the RFC 2326 methods.
    UnknownMethod,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::UnknownMethod => write!(f, "unknown method"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
