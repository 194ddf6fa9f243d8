use crate::http::types::StatusCode;
use std::io;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced to code that builds, configures or drives a server.
///
/// Conditions that happen while serving a client (bad request line, no route,
/// I/O hiccups) never reach this type: they are answered on the wire and logged.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value is out of range. Fatal at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Creating, binding or tuning the listening socket failed.
    #[error("{context}: {source}")]
    Socket {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// A route template could not be registered.
    #[error("invalid route `{template}`: {reason}")]
    InvalidRoute {
        template: String,
        reason: &'static str,
    },

    /// A caller passed a value outside of the accepted domain
    /// (for example an unknown status code).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Bytes could not be parsed as an HTTP message.
    #[error("malformed request: {0}")]
    MalformedRequest(#[from] ErrorKind),

    #[error("config file: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    #[inline]
    pub(crate) fn socket(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::Socket { context, source }
    }
}

/// Reasons a request is rejected by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("Invalid HTTP method")]
    InvalidMethod,
    #[error("Invalid URL format")]
    InvalidUrl,
    #[error("Invalid query string")]
    InvalidQuery,
    #[error("Invalid HTTP version")]
    InvalidVersion,
    #[error("Request head is not valid UTF-8")]
    InvalidEncoding,

    #[error("Invalid Content-Length")]
    InvalidContentLength,
    #[error("Too many headers")]
    TooManyHeaders,
    #[error("Request head too large")]
    HeadersTooLarge,

    #[error("Request body too large")]
    BodyTooLarge,
    #[error("Body length mismatch: expected {expected} bytes, got {available}")]
    BodyMismatch { expected: usize, available: usize },
    #[error("Incomplete request")]
    Incomplete,
}

macro_rules! http_errors {
    ($($name:ident: $status:ident => $code:literal;)*) => {
        /// Status line the client receives for this error.
        #[inline]
        pub const fn status(&self) -> StatusCode {
            match self { $(
                Self::$name { .. } => StatusCode::$status,
            )* }
        }

        #[inline]
        pub(crate) const fn code(&self) -> &'static str {
            match self { $(
                Self::$name { .. } => $code,
            )* }
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: BadRequest => "INVALID_METHOD";
        InvalidUrl: BadRequest => "INVALID_URL";
        InvalidQuery: BadRequest => "INVALID_QUERY";
        InvalidVersion: BadRequest => "INVALID_VERSION";
        InvalidEncoding: BadRequest => "INVALID_ENCODING";

        InvalidContentLength: BadRequest => "INVALID_CONTENT_LENGTH";
        TooManyHeaders: RequestHeaderFieldsTooLarge => "TOO_MANY_HEADERS";
        HeadersTooLarge: RequestHeaderFieldsTooLarge => "HEADERS_TOO_LARGE";

        BodyTooLarge: PayloadTooLarge => "BODY_TOO_LARGE";
        BodyMismatch: BadRequest => "BODY_MISMATCH";
        Incomplete: BadRequest => "INCOMPLETE_REQUEST";
    }

    /// JSON body used for error responses, e.g.
    /// `{"error":"Invalid HTTP method","code":"INVALID_METHOD"}`.
    pub(crate) fn json(&self) -> String {
        format!(r#"{{"error":"{}","code":"{}"}}"#, self, self.code())
    }
}

/// JSON body for a status that has no parser-level cause (404, 500, 503...).
pub(crate) fn status_json(status: StatusCode) -> String {
    let code: String = status
        .reason()
        .chars()
        .filter_map(|c| match c {
            ' ' | '-' => Some('_'),
            '\'' => None,
            c => Some(c.to_ascii_uppercase()),
        })
        .collect();

    format!(r#"{{"error":"{}","code":"{}"}}"#, status.reason(), code)
}
