use crate::{
    errors::{Error, ErrorKind},
    http::{
        query::{self, Query},
        types::{self, HeaderMap, Method, Version},
    },
    limits::ReqLimits,
};
use memchr::{memchr, memchr_iter};
use std::{
    collections::HashMap,
    fmt,
    io::{self, Read},
};
use tracing::{debug, warn};

/// Parsed HTTP request.
///
/// # Input data requirements
///
/// #### Character encoding
///
/// The request line and headers must be `UTF-8`, otherwise the request is
/// rejected with `400 Bad Request`. The body is kept as raw bytes.
///
/// #### Line endings
///
/// Lines end in `CRLF`; a bare `LF` is accepted as well. The head ends at the
/// first empty line.
///
/// #### Request line
///
/// ```text
/// [METHOD] SP [TARGET] SP [VERSION] CRLF
/// ```
/// - `[METHOD]`: one of [`Method`], case-sensitive.
/// - `[TARGET]`: path starting with `/`, optionally followed by `?query`.
///   The query is split off into [`Request::query`].
/// - `[VERSION]`: `HTTP/1.0`, `HTTP/1.1` or `HTTP/2.0`.
///
/// #### Headers
///
/// ```text
/// [NAME] ":" OWS [VALUE] OWS CRLF
/// ```
/// Lines without `:` are skipped. A repeated name keeps the last value.
///
/// #### Body
///
/// Exactly `Content-Length` bytes; no `Content-Length` means no body.
/// Chunked transfer-encoding is not supported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Vec<u8>,
    pub(crate) query: HashMap<String, String>,
    pub(crate) params: HashMap<String, String>,
}

impl Request {
    /// Builds an `HTTP/1.1` request for `target`, splitting off its query string.
    ///
    /// ```
    /// use mill_web::{Method, Request};
    ///
    /// let req = Request::new(Method::Get, "/search?q=rust");
    /// assert_eq!(req.path(), "/search");
    /// assert_eq!(req.query("q"), Some("rust"));
    /// ```
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = query::split_target(target);
        let query = query
            .and_then(|q| Query::parse(q.as_bytes(), usize::MAX).ok())
            .unwrap_or_default();

        Self {
            method,
            path: path.to_owned(),
            version: Version::Http11,
            query,
            ..Self::default()
        }
    }

    /// Parses one complete request from `bytes` using default limits.
    ///
    /// ```
    /// use mill_web::{Method, Request};
    ///
    /// let req = Request::parse(b"POST /echo HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi").unwrap();
    /// assert_eq!(req.method(), Method::Post);
    /// assert_eq!(req.body(), b"hi");
    ///
    /// // Declared body is longer than what was received
    /// assert!(Request::parse(b"POST /echo HTTP/1.1\r\nContent-Length: 9\r\n\r\nhi").is_err());
    /// ```
    #[inline]
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        Self::parse_with_limits(bytes, &ReqLimits::default())
    }

    pub fn parse_with_limits(bytes: &[u8], limits: &ReqLimits) -> Result<Self, Error> {
        let mut parser = Parser::from(bytes);
        let request = parser
            .poll_request(limits, Framing::Complete)?
            .ok_or(ErrorKind::Incomplete)?;

        Ok(request)
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Path without the query string, exactly as sent.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[inline(always)]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Case-insensitive header lookup.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.has(name)
    }

    #[inline]
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    #[inline]
    pub fn delete_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text, if it is valid UTF-8.
    #[inline]
    pub fn body_str(&self) -> Option<&str> {
        simdutf8::basic::from_utf8(&self.body).ok()
    }

    #[inline]
    pub fn set_body<B: Into<Vec<u8>>>(&mut self, body: B) -> &mut Self {
        self.body = body.into();
        self
    }

    /// Query parameter from `?key=value`. Keys are case-sensitive.
    #[inline]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    #[inline(always)]
    pub const fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Route parameter bound by a `{name}` segment of the matched route.
    ///
    /// ```
    /// use mill_web::{Method, Request, Router};
    ///
    /// let mut router = Router::new();
    /// router.get("/users/{id}", |_: &Request, _: &mut mill_web::Response| {}).unwrap();
    ///
    /// let mut req = Request::new(Method::Get, "/users/42");
    /// assert!(router.fetch_route(&mut req).is_some());
    /// assert_eq!(req.param("id"), Some("42"));
    /// ```
    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    #[inline(always)]
    pub const fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// A request is valid once it carries a real method.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.method.is_valid()
    }

    /// Value of the `Connection` header, `"close"` when absent.
    #[inline]
    pub fn connection(&self) -> &str {
        self.header("connection").unwrap_or("close")
    }

    /// `true` only for `Connection: keep-alive`, compared exactly.
    #[inline]
    pub fn is_keep_alive(&self) -> bool {
        self.connection() == "keep-alive"
    }

    #[inline]
    pub fn content_length(&self) -> Option<usize> {
        types::slice_to_usize(self.header("content-length")?.as_bytes())
    }

    /// Logs the request head at `debug` level.
    pub fn print_message(&self) {
        debug!(
            method = %self.method,
            path = %self.path,
            version = %self.version,
            headers = self.headers.len(),
            body_len = self.body.len(),
            "request:\n{}",
            self
        );
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n", self.method, self.path, self.version)?;
        for (name, value) in self.headers.iter() {
            write!(f, "{name}: {value}\r\n")?;
        }
        f.write_str("\r\n")
    }
}

// Parsing
impl Request {
    /// Parses the request line and headers, returning the declared body length.
    fn parse_head(&mut self, head: &[u8], limits: &ReqLimits) -> Result<usize, ErrorKind> {
        let head = simdutf8::basic::from_utf8(head).map_err(|_| ErrorKind::InvalidEncoding)?;

        let mut lines = lines(head);
        self.parse_start_line(lines.next().unwrap_or(""), limits)?;

        let mut count = 0;
        for line in lines.take_while(|line| !line.is_empty()) {
            count += 1;
            if count > limits.header_count {
                return Err(ErrorKind::TooManyHeaders);
            }

            match split_header(line) {
                Some((name, value)) => self.headers.set(name, value),
                None => warn!(line, "skipping header line without `:`"),
            }
        }

        let length = match self.header("content-length") {
            Some(value) => {
                types::slice_to_usize(value.as_bytes()).ok_or(ErrorKind::InvalidContentLength)?
            }
            None => 0,
        };

        match length > limits.body_size {
            true => Err(ErrorKind::BodyTooLarge),
            false => Ok(length),
        }
    }

    fn parse_start_line(&mut self, line: &str, limits: &ReqLimits) -> Result<(), ErrorKind> {
        let mut parts = line.split_ascii_whitespace();

        self.method = Method::from_bytes(parts.next().unwrap_or("").as_bytes());
        if !self.method.is_valid() {
            return Err(ErrorKind::InvalidMethod);
        }

        let target = parts.next().ok_or(ErrorKind::InvalidUrl)?;
        if !target.starts_with('/') && target != "*" {
            return Err(ErrorKind::InvalidUrl);
        }

        self.version = Version::from_bytes(parts.next().unwrap_or("").as_bytes());
        if self.version == Version::Invalid || parts.next().is_some() {
            return Err(ErrorKind::InvalidVersion);
        }

        let (path, query) = query::split_target(target);
        self.path = path.to_owned();

        if let Some(query) = query {
            Query::parse_into(&mut self.query, query.as_bytes(), limits.query_parts)
                .map_err(|_| ErrorKind::InvalidQuery)?;
        }

        Ok(())
    }
}

/// Lines of a message head, without their `\r\n` or `\n` terminators.
#[inline]
pub(crate) fn lines(head: &str) -> impl Iterator<Item = &str> {
    head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line))
}

/// Splits `Name: value` at the first colon and trims optional whitespace.
#[inline]
pub(crate) fn split_header(line: &str) -> Option<(&str, &str)> {
    let colon = memchr(b':', line.as_bytes())?;
    let name = line[..colon].trim();
    if name.is_empty() {
        return None;
    }

    let value = line[colon + 1..].trim_matches(|c| c == ' ' || c == '\t');
    Some((name, value))
}

/// Index one past the empty line that terminates a message head.
#[inline]
pub(crate) fn find_head_end(buffer: &[u8]) -> Option<usize> {
    memchr_iter(b'\n', buffer).find_map(|pos| {
        let rest = &buffer[pos + 1..];
        if rest.starts_with(b"\r\n") {
            Some(pos + 3)
        } else if rest.starts_with(b"\n") {
            Some(pos + 2)
        } else {
            None
        }
    })
}

//

/// What the bytes buffered in a [`Parser`] are known to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// More bytes may still arrive on the socket.
    Partial,
    /// The peer stopped sending (read timeout). A message needs its blank
    /// line and its full body, anything less is rejected.
    Closed,
    /// The buffer is one whole message handed over by the caller. A missing
    /// head terminator is tolerated.
    Complete,
}

/// Stream buffer of one connection.
///
/// Bytes from successive reads are appended here; [`Parser::poll_request`]
/// takes one full message off the front once it has arrived.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Parser {
    buffer: Vec<u8>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn from<V: AsRef<[u8]>>(value: V) -> Self {
        Parser {
            buffer: value.as_ref().to_vec(),
        }
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }
}

impl Parser {
    /// Performs one read into `chunk` and appends what arrived.
    #[inline]
    pub(crate) fn fill_buffer<R: Read>(&mut self, mut reader: R, chunk: &mut [u8]) -> io::Result<usize> {
        let n = reader.read(chunk)?;
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Takes the next complete request off the buffer.
    ///
    /// Returns `Ok(None)` while the message is still incomplete and `framing`
    /// is [`Framing::Partial`]. Otherwise no more bytes are coming: an
    /// unterminated head is [`ErrorKind::Incomplete`] (except for
    /// [`Framing::Complete`]) and a short body is [`ErrorKind::BodyMismatch`].
    pub(crate) fn poll_request(
        &mut self,
        limits: &ReqLimits,
        framing: Framing,
    ) -> Result<Option<Request>, ErrorKind> {
        // Stray line breaks before a request line are ignored.
        let skip = self
            .buffer
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        self.buffer.drain(..skip);

        let head_end = match find_head_end(&self.buffer) {
            Some(end) => end,
            None if self.buffer.len() > limits.head_size => {
                return Err(ErrorKind::HeadersTooLarge)
            }
            None if self.buffer.is_empty() => return Ok(None),
            None => match framing {
                Framing::Partial => return Ok(None),
                Framing::Closed => return Err(ErrorKind::Incomplete),
                Framing::Complete => self.buffer.len(),
            },
        };

        if head_end > limits.head_size {
            return Err(ErrorKind::HeadersTooLarge);
        }

        let mut request = Request::default();
        let expected = request.parse_head(&self.buffer[..head_end], limits)?;

        let available = self.buffer.len() - head_end;
        if available < expected {
            return match framing {
                Framing::Partial => Ok(None),
                Framing::Closed | Framing::Complete => Err(ErrorKind::BodyMismatch {
                    expected,
                    available,
                }),
            };
        }

        let end = head_end + expected;
        request.body = self.buffer[head_end..end].to_vec();
        self.buffer.drain(..end);

        Ok(Some(request))
    }
}
