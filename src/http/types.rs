//! Methods, versions, status codes and the header map

use std::fmt;

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;

    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

// METHOD

/// Request methods of RFC 9110 plus `PATCH` (RFC 5789).
///
/// [`Method::Invalid`] is the default value and the result of parsing an
/// unknown token. A request carrying it is not valid.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Method {
    Get,
    /// Answered like `GET`, the body is dropped before sending.
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    /// Not a method: default and failure state.
    #[default]
    Invalid,
}

impl Method {
    /// Parses a request-line token. Matching is case-sensitive.
    #[inline]
    pub const fn from_bytes(src: &[u8]) -> Self {
        match src {
            b"GET" => Method::Get,
            b"HEAD" => Method::Head,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"CONNECT" => Method::Connect,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"PATCH" => Method::Patch,
            _ => Method::Invalid,
        }
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Invalid => "INVALID",
        }
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        !matches!(self, Method::Invalid)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// VERSION

/// Protocol version from the request line
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Http10,
    Http11,

    /// HTTP/2.0 - accepted on the request line only; messages are still
    /// exchanged in the HTTP/1.1 wire format.
    Http20,

    /// Not a version: default and failure state.
    #[default]
    Invalid,
}

impl Version {
    #[inline]
    pub const fn from_bytes(src: &[u8]) -> Self {
        match src {
            b"HTTP/1.1" => Self::Http11,
            b"HTTP/1.0" => Self::Http10,
            b"HTTP/2.0" => Self::Http20,
            _ => Self::Invalid,
        }
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
            Self::Http20 => "HTTP/2.0",
            Self::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($($name:ident => $num:literal, $str:literal;)+) => {
        /// HTTP status codes
        ///
        /// The registered codes of
        /// [RFC 9110, Section 15](https://datatracker.ietf.org/doc/html/rfc9110#section-15)
        /// plus the WebDAV and RFC 6585 additions. Codes outside this table are
        /// rejected by [`StatusCode::from_u16`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!("`", stringify!($num), " ", $str, "`")]
            $name = $num,
        )+ }

        impl StatusCode {
            /// Looks a numeric code up in the status table.
            #[inline]
            pub const fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $($num => Some(Self::$name),)+
                    _ => None,
                }
            }

            #[inline]
            pub const fn as_u16(&self) -> u16 {
                *self as u16
            }

            /// Reason phrase, e.g. `"Not Found"` for 404.
            #[inline]
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    Self::$name => $str,
                )+ }
            }
        }
    }
}

set_status_codes! {
    // 1xx Informational
    Continue                      => 100, "Continue";
    SwitchingProtocols            => 101, "Switching Protocols";
    EarlyHints                    => 103, "Early Hints";

    // 2xx Success
    Ok                            => 200, "OK";
    Created                       => 201, "Created";
    Accepted                      => 202, "Accepted";
    NonAuthoritativeInformation   => 203, "Non-Authoritative Information";
    NoContent                     => 204, "No Content";
    ResetContent                  => 205, "Reset Content";
    PartialContent                => 206, "Partial Content";
    MultiStatus                   => 207, "Multi-Status";
    AlreadyReported               => 208, "Already Reported";
    ImUsed                        => 226, "IM Used";

    // 3xx Redirection
    MultipleChoices               => 300, "Multiple Choices";
    MovedPermanently              => 301, "Moved Permanently";
    Found                         => 302, "Found";
    SeeOther                      => 303, "See Other";
    NotModified                   => 304, "Not Modified";
    TemporaryRedirect             => 307, "Temporary Redirect";
    PermanentRedirect             => 308, "Permanent Redirect";

    // 4xx Client errors
    BadRequest                    => 400, "Bad Request";
    Unauthorized                  => 401, "Unauthorized";
    PaymentRequired               => 402, "Payment Required";
    Forbidden                     => 403, "Forbidden";
    NotFound                      => 404, "Not Found";
    MethodNotAllowed              => 405, "Method Not Allowed";
    NotAcceptable                 => 406, "Not Acceptable";
    ProxyAuthenticationRequired   => 407, "Proxy Authentication Required";
    RequestTimeout                => 408, "Request Timeout";
    Conflict                      => 409, "Conflict";
    Gone                          => 410, "Gone";
    LengthRequired                => 411, "Length Required";
    PreconditionFailed            => 412, "Precondition Failed";
    PayloadTooLarge               => 413, "Payload Too Large";
    UriTooLong                    => 414, "URI Too Long";
    UnsupportedMediaType          => 415, "Unsupported Media Type";
    RangeNotSatisfiable           => 416, "Range Not Satisfiable";
    ExpectationFailed             => 417, "Expectation Failed";
    ImATeapot                     => 418, "I'm a teapot";
    MisdirectedRequest            => 421, "Misdirected Request";
    UnprocessableEntity           => 422, "Unprocessable Entity";
    Locked                        => 423, "Locked";
    FailedDependency              => 424, "Failed Dependency";
    TooEarly                      => 425, "Too Early";
    UpgradeRequired               => 426, "Upgrade Required";
    PreconditionRequired          => 428, "Precondition Required";
    TooManyRequests               => 429, "Too Many Requests";
    RequestHeaderFieldsTooLarge   => 431, "Request Header Fields Too Large";
    UnavailableForLegalReasons    => 451, "Unavailable For Legal Reasons";

    // 5xx Server errors
    InternalServerError           => 500, "Internal Server Error";
    NotImplemented                => 501, "Not Implemented";
    BadGateway                    => 502, "Bad Gateway";
    ServiceUnavailable            => 503, "Service Unavailable";
    GatewayTimeout                => 504, "Gateway Timeout";
    HttpVersionNotSupported       => 505, "HTTP Version Not Supported";
    VariantAlsoNegotiates         => 506, "Variant Also Negotiates";
    InsufficientStorage           => 507, "Insufficient Storage";
    LoopDetected                  => 508, "Loop Detected";
    NotExtended                   => 510, "Not Extended";
    NetworkAuthenticationRequired => 511, "Network Authentication Required";
}

impl Default for StatusCode {
    #[inline]
    fn default() -> Self {
        StatusCode::Ok
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

// HEADER MAP

/// Header collection with case-insensitive names.
///
/// Names keep the spelling of their first insertion; `Content-Type` and
/// `content-type` address the same entry. Order is not significant, and
/// neither is name case when two maps are compared.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    headers: Vec<Header>,
}

impl HeaderMap {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the value stored under `name`.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.find_mut(name) {
            Some(header) => {
                header.value.clear();
                header.value.push_str(value);
            }
            None => self.headers.push(Header {
                name: name.to_owned(),
                value: value.to_owned(),
            }),
        }
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    #[inline]
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes `name`, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self
            .headers
            .iter()
            .position(|h| h.name.eq_ignore_ascii_case(name))?;

        Some(self.headers.swap_remove(index).value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|h| (h.name.as_str(), h.value.as_str()))
    }

    #[inline]
    fn find_mut(&mut self, name: &str) -> Option<&mut Header> {
        self.headers
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(name))
    }
}

impl PartialEq for HeaderMap {
    fn eq(&self, other: &Self) -> bool {
        // Names are unique per map, so equal lengths plus one-way lookups suffice.
        self.len() == other.len()
            && self
                .headers
                .iter()
                .all(|h| other.get(&h.name) == Some(h.value.as_str()))
    }
}

impl Eq for HeaderMap {}

// HEADER

#[derive(Debug, Clone)]
struct Header {
    name: String,
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_tokens() {
        #[rustfmt::skip]
        let cases = [
            ("GET",     Method::Get),
            ("HEAD",    Method::Head),
            ("POST",    Method::Post),
            ("PUT",     Method::Put),
            ("DELETE",  Method::Delete),
            ("CONNECT", Method::Connect),
            ("OPTIONS", Method::Options),
            ("TRACE",   Method::Trace),
            ("PATCH",   Method::Patch),
            ("get",     Method::Invalid),
            ("FETCH",   Method::Invalid),
            ("",        Method::Invalid),
        ];

        for (token, method) in cases {
            assert_eq!(Method::from_bytes(token.as_bytes()), method, "{token}");
            if method.is_valid() {
                assert_eq!(method.as_str(), token);
            }
        }
        assert_eq!(Method::default(), Method::Invalid);
    }

    #[test]
    fn version_tokens() {
        #[rustfmt::skip]
        let cases = [
            ("HTTP/1.0", Version::Http10),
            ("HTTP/1.1", Version::Http11),
            ("HTTP/2.0", Version::Http20),
            ("HTTP/0.9", Version::Invalid),
            ("http/1.1", Version::Invalid),
        ];

        for (token, version) in cases {
            assert_eq!(Version::from_bytes(token.as_bytes()), version);
        }
        assert_eq!(Version::Http11.to_string(), "HTTP/1.1");
    }

    #[test]
    fn status_table() {
        #[rustfmt::skip]
        let cases = [
            (100, Some("Continue")),
            (102, None),
            (103, Some("Early Hints")),
            (200, Some("OK")),
            (203, Some("Non-Authoritative Information")),
            (305, None),
            (404, Some("Not Found")),
            (418, Some("I'm a teapot")),
            (511, Some("Network Authentication Required")),
            (599, None),
            (0,   None),
        ];

        for (code, reason) in cases {
            let status = StatusCode::from_u16(code);
            assert_eq!(status.map(|s| s.reason()), reason, "{code}");
            if let Some(status) = status {
                assert_eq!(status.as_u16(), code);
            }
        }
        assert_eq!(StatusCode::from_u16(418), Some(StatusCode::ImATeapot));
    }

    #[test]
    fn header_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.set("Content-Type", "text/html");

        for name in ["content-type", "CONTENT-TYPE", "CoNtEnT-TyPe"] {
            assert_eq!(headers.get(name), Some("text/html"));
        }
        assert_eq!(headers.len(), 1);

        headers.set("content-TYPE", "application/json");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Content-Type"), Some("application/json"));
        assert_eq!(headers.iter().next(), Some(("Content-Type", "application/json")));
    }

    #[test]
    fn header_remove() {
        let mut headers = HeaderMap::new();
        headers.set("Host", "localhost");
        headers.set("Accept", "*/*");

        assert_eq!(headers.remove("HOST"), Some("localhost".to_owned()));
        assert_eq!(headers.remove("host"), None);
        assert!(!headers.has("Host"));
        assert!(headers.has("accept"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn header_map_equality() {
        let map = |pairs: &[(&str, &str)]| {
            let mut headers = HeaderMap::new();
            for (name, value) in pairs {
                headers.set(name, value);
            }
            headers
        };
        let base = map(&[("Host", "a"), ("Content-Length", "4")]);

        #[rustfmt::skip]
        let cases: [(&[(&str, &str)], bool); 6] = [
            (&[("Host", "a"), ("Content-Length", "4")], true),
            (&[("Content-Length", "4"), ("Host", "a")], true),
            (&[("content-length", "4"), ("HOST", "a")], true),
            (&[("Host", "A"), ("Content-Length", "4")], false),
            (&[("Host", "a")],                          false),
            (&[("Host", "a"), ("Accept", "4")],         false),
        ];

        for (pairs, equal) in cases {
            let other = map(pairs);
            assert_eq!(base == other, equal, "{pairs:?}");
            assert_eq!(other == base, equal, "{pairs:?}");
        }
    }

    #[test]
    fn parse_usize() {
        assert_eq!(slice_to_usize(b"0"), Some(0));
        assert_eq!(slice_to_usize(b"1234"), Some(1234));
        assert_eq!(slice_to_usize(b""), None);
        assert_eq!(slice_to_usize(b"12a"), None);
        assert_eq!(slice_to_usize(b"-1"), None);
        assert_eq!(slice_to_usize(b"99999999999999999999999"), None);
    }
}
