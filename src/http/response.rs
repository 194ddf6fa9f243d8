//! HTTP response model, serializer and re-parser.

use crate::{
    errors::{Error, ErrorKind},
    http::{
        request::{find_head_end, lines, split_header},
        types::{self, HeaderMap, StatusCode, Version},
    },
    BodyWriter, WriteBuffer,
};
use std::fmt;
use tracing::debug;

/// HTTP response handed to a [`Handler`](crate::Handler).
///
/// Starts as `HTTP/1.1 200 OK` with no headers and an empty body. The
/// server fills in `Connection` and, when the handler did not,
/// `Content-Length` before sending.
///
/// # Examples
/// ```
/// use mill_web::{Request, Response, StatusCode};
///
/// fn handle(_req: &Request, resp: &mut Response) {
///     resp.status(StatusCode::Ok)
///         .header("content-type", "text/html")
///         .body("<h1>Hello World</h1>");
/// }
///
/// let mut resp = Response::new();
/// handle(&Request::default(), &mut resp);
///
/// assert_eq!(resp.get_header("Content-Length"), Some("20"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub(crate) version: Version,
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Vec<u8>,
}

impl Default for Response {
    #[inline]
    fn default() -> Self {
        Self {
            version: Version::Http11,
            status: StatusCode::Ok,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

impl Response {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Base response for an error status, closing the connection.
    #[inline]
    pub(crate) fn for_status(status: StatusCode) -> Self {
        let mut resp = Self::new();
        resp.status(status).header("Connection", "close");
        resp
    }
}

// Builder
impl Response {
    /// Sets the status line code.
    ///
    /// # Examples
    /// ```
    /// use mill_web::{Response, StatusCode};
    ///
    /// let mut resp = Response::new();
    /// resp.status(StatusCode::NotFound);
    ///
    /// assert_eq!(resp.status_code(), 404);
    /// assert_eq!(resp.status_text(), "Not Found");
    /// ```
    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Sets a header from anything implementing [`WriteBuffer`].
    ///
    /// # Examples
    /// ```
    /// use mill_web::Response;
    ///
    /// let mut resp = Response::new();
    /// resp.header("X-Count", 42u32).header("X-Debug", false);
    ///
    /// assert_eq!(resp.get_header("x-count"), Some("42"));
    /// assert_eq!(resp.get_header("x-debug"), Some("false"));
    /// ```
    #[inline]
    pub fn header<V: WriteBuffer>(&mut self, name: &str, value: V) -> &mut Self {
        let mut buffer = Vec::new();
        value.write_to(&mut buffer);
        self.headers.set(name, &String::from_utf8_lossy(&buffer));
        self
    }

    /// Replaces the body and refreshes `Content-Length`.
    #[inline]
    pub fn body<T: WriteBuffer>(&mut self, value: T) -> &mut Self {
        self.body.clear();
        value.write_to(&mut self.body);
        self.refresh_content_length();
        self
    }

    /// Replaces the body with whatever `f` writes and refreshes `Content-Length`.
    ///
    /// # Examples
    /// ```
    /// use mill_web::Response;
    /// use std::io::Write;
    ///
    /// let mut resp = Response::new();
    /// resp.body_with(|w| {
    ///     w.write("sum: ");
    ///     let _ = write!(w, "{}", 2 + 2);
    /// });
    ///
    /// assert_eq!(resp.body_bytes(), b"sum: 4");
    /// assert_eq!(resp.get_header("content-length"), Some("6"));
    /// ```
    #[inline]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> &mut Self {
        self.body.clear();
        f(&mut BodyWriter(&mut self.body));
        self.refresh_content_length();
        self
    }

    /// Marks the connection to be closed after this response.
    #[inline]
    pub fn close(&mut self) -> &mut Self {
        self.headers.set("Connection", "close");
        self
    }

    #[inline]
    fn refresh_content_length(&mut self) {
        self.headers
            .set("Content-Length", &self.body.len().to_string());
    }
}

// Public API
impl Response {
    /// Sets the status from a numeric code.
    ///
    /// Fails with [`Error::InvalidArgument`] when the code is not in the
    /// [`StatusCode`] table; the response is left untouched.
    ///
    /// ```
    /// use mill_web::Response;
    ///
    /// let mut resp = Response::new();
    /// resp.set_status(418).unwrap();
    /// assert_eq!(resp.status_text(), "I'm a teapot");
    ///
    /// assert!(resp.set_status(299).is_err());
    /// assert_eq!(resp.status_code(), 418);
    /// ```
    pub fn set_status(&mut self, code: u16) -> Result<&mut Self, Error> {
        let status = StatusCode::from_u16(code)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown status code {code}")))?;

        Ok(self.status(status))
    }

    /// Replaces the body; `Content-Length` is refreshed only when asked.
    ///
    /// ```
    /// use mill_web::Response;
    ///
    /// let mut resp = Response::new();
    /// resp.set_body("x", false);
    /// assert!(!resp.has_header("content-length"));
    ///
    /// resp.set_body("x", true);
    /// assert_eq!(resp.get_header("content-length"), Some("1"));
    /// ```
    pub fn set_body<B: Into<Vec<u8>>>(&mut self, body: B, set_content_length: bool) -> &mut Self {
        self.body = body.into();
        if set_content_length {
            self.refresh_content_length();
        }
        self
    }

    #[inline]
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    #[inline]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.has(name)
    }

    #[inline]
    pub fn delete_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    #[inline(always)]
    pub const fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    #[inline(always)]
    pub const fn status_text(&self) -> &'static str {
        self.status.reason()
    }

    #[inline(always)]
    pub const fn status_kind(&self) -> StatusCode {
        self.status
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[inline(always)]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline(always)]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Renders the message in wire format.
    ///
    /// ```
    /// use mill_web::Response;
    ///
    /// let mut resp = Response::new();
    /// resp.set_status(404).unwrap();
    /// resp.body("gone");
    ///
    /// assert_eq!(
    ///     resp.serialize(),
    ///     b"HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\n\r\ngone"
    /// );
    /// ```
    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(64 + self.body.len());
        buffer.extend_from_slice(self.to_string().as_bytes());
        buffer.extend_from_slice(&self.body);
        buffer
    }

    /// Parses a serialized response, as a client would receive it.
    ///
    /// The body is `Content-Length` bytes when that header is present,
    /// otherwise everything after the head.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let head_end = find_head_end(bytes).unwrap_or(bytes.len());
        let head = simdutf8::basic::from_utf8(&bytes[..head_end])
            .map_err(|_| ErrorKind::InvalidEncoding)?;

        let mut lines = lines(head);
        let mut resp = Self::new();
        resp.parse_status_line(lines.next().unwrap_or(""))?;

        for line in lines.take_while(|line| !line.is_empty()) {
            if let Some((name, value)) = split_header(line) {
                resp.headers.set(name, value);
            }
        }

        let rest = &bytes[head_end..];
        resp.body = match resp.get_header("content-length") {
            Some(value) => {
                let expected = types::slice_to_usize(value.as_bytes())
                    .ok_or(ErrorKind::InvalidContentLength)?;
                let body = rest.get(..expected).ok_or(ErrorKind::BodyMismatch {
                    expected,
                    available: rest.len(),
                })?;
                body.to_vec()
            }
            None => rest.to_vec(),
        };

        Ok(resp)
    }

    /// Logs the response head at `debug` level.
    pub fn print_message(&self) {
        debug!(
            status = self.status.as_u16(),
            headers = self.headers.len(),
            body_len = self.body.len(),
            "response:\n{}",
            self
        );
    }

    fn parse_status_line(&mut self, line: &str) -> Result<(), Error> {
        let mut parts = line.splitn(3, ' ');

        self.version = Version::from_bytes(parts.next().unwrap_or("").as_bytes());
        if self.version == Version::Invalid {
            return Err(ErrorKind::InvalidVersion.into());
        }

        let code = parts.next().unwrap_or("");
        let status = code
            .parse()
            .ok()
            .and_then(StatusCode::from_u16)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown status code `{code}`")))?;
        self.status = status;

        Ok(())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}\r\n", self.version, self.status)?;
        for (name, value) in self.headers.iter() {
            write!(f, "{name}: {value}\r\n")?;
        }
        f.write_str("\r\n")
    }
}

pub mod write {
    use std::{borrow::Cow, fmt::Display, io::Write, sync::Arc};

    /// Writer for the response body, handed out by
    /// [`body_with`](super::Response::body_with).
    ///
    /// Accepts [`WriteBuffer`] values through [`BodyWriter::write`] and
    /// formatted output through [`std::io::Write`].
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends `value` to the body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.0.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    }

    impl Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be written into a response header or body.
    ///
    /// Implemented for strings, byte slices, integers, `bool` and `char`.
    /// Floats are left out on purpose: format them yourself with the
    /// precision you need.
    ///
    /// # Example
    /// ```
    /// use mill_web::WriteBuffer;
    ///
    /// struct UserId(u64);
    ///
    /// impl WriteBuffer for UserId {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(b"user-");
    ///         self.0.write_to(buffer);
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (str => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let value: &str = self.as_ref();
                    buffer.extend_from_slice(value.as_bytes());
                }
            })*
        };
        (bytes => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let value: &[u8] = self.as_ref();
                    buffer.extend_from_slice(value);
                }
            })*
        };
        (display => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    write_display(self, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }

    impl WriteBuffer for str {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self.as_bytes());
        }
    }

    impl WriteBuffer for [u8] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }

    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }

    impl_write_buffer! { str => String, Box<str>, Cow<'_, str>, Arc<str> }
    impl_write_buffer! { bytes => Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]> }
    impl_write_buffer! {
        display => u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, char,
        std::fmt::Arguments<'_>
    }

    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }

    #[inline(always)]
    fn write_display<T: Display>(value: &T, buffer: &mut Vec<u8>) {
        // Writing into a Vec cannot fail.
        let _ = write!(buffer, "{value}");
    }
}
