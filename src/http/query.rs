//! URL query string parser.

use memchr::memchr;
use std::{borrow::Cow, collections::HashMap};
use thiserror::Error;

/// Query string parser.
///
/// Splits a query on `&`, then each parameter once on the first `=`.
/// Keys and values are percent-decoded; input that does not decode to
/// UTF-8 is kept as written.
///
/// # Examples
/// ```rust
/// use mill_web::query::Query;
///
/// let params = Query::parse(b"?q=&x&y=1", 10).unwrap();
///
/// assert_eq!(params.len(), 3);
/// assert_eq!(params["q"], "");
/// assert_eq!(params["x"], "");
/// assert_eq!(params["y"], "1");
/// ```
/// Empty segments (a dangling or doubled `&`) produce nothing:
/// ```rust
/// use mill_web::query::Query;
///
/// let params = Query::parse(b"a=1&&b=2&", 10).unwrap();
/// assert_eq!(params.len(), 2);
///
/// assert!(Query::parse(b"?", 10).unwrap().is_empty());
/// ```
pub struct Query;

impl Query {
    /// Parses a URL query string into a new map.
    ///
    /// # Arguments
    /// - `query`: Raw bytes of the query string
    ///   (handles optional leading `?` automatically, so `?a=1` and `a=1` are equivalent)
    /// - `limit`: Maximum number of parameters to parse
    ///
    /// Repeated keys keep the last value.
    #[inline]
    pub fn parse(query: &[u8], limit: usize) -> Result<HashMap<String, String>, Error> {
        let mut result = HashMap::new();
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Parses a URL query string into an existing map.
    ///
    /// # Examples
    /// ```
    /// use mill_web::query::Query;
    /// use std::collections::HashMap;
    ///
    /// let mut params = HashMap::new();
    /// Query::parse_into(&mut params, b"a=1&b=2", 10).unwrap();
    /// Query::parse_into(&mut params, b"email=user%40example.com", 10).unwrap();
    ///
    /// assert_eq!(params.len(), 3);
    /// assert_eq!(params["email"], "user@example.com");
    ///
    /// let mut params = HashMap::new();
    /// assert!(Query::parse_into(&mut params, b"a=1&b=2&c=3", 2).is_err());
    /// ```
    pub fn parse_into(
        result: &mut HashMap<String, String>,
        query: &[u8],
        limit: usize,
    ) -> Result<(), Error> {
        let data = match query.first() {
            Some(b'?') => &query[1..],
            _ => query,
        };

        let mut added = 0;
        let mut start = 0;
        while start < data.len() {
            // Find next '&' or end of string
            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            if end > start {
                if added >= limit {
                    return Err(Error::OverLimit(limit));
                }

                let segment = &data[start..end];
                let (key, value) = match memchr(b'=', segment) {
                    Some(index) => (&segment[..index], &segment[index + 1..]),
                    None => (segment, &b""[..]),
                };

                result.insert(decode(key), decode(value));
                added += 1;
            }

            start = end + 1;
        }

        Ok(())
    }
}

/// Splits a request target at the first `?`.
///
/// ```text
/// /search?q=rust  ->  ("/search", Some("q=rust"))
/// /search?        ->  ("/search", Some(""))
/// /search         ->  ("/search", None)
/// ```
#[inline]
pub(crate) fn split_target(target: &str) -> (&str, Option<&str>) {
    match memchr(b'?', target.as_bytes()) {
        Some(index) => (&target[..index], Some(&target[index + 1..])),
        None => (target, None),
    }
}

#[inline]
fn decode(raw: &[u8]) -> String {
    let raw = String::from_utf8_lossy(raw);
    let decoded = urlencoding::decode(&raw).map(Cow::into_owned);
    decoded.unwrap_or_else(|_| raw.into_owned())
}

/// Error types that can occur during query parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The query string holds more parameters than the given limit.
    #[error("Query parameter limit exceeded: limit={0}")]
    OverLimit(usize),
}
