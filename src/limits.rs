//! Server limits and timeouts that are not part of the config file
//!
//! # Examples
//!
//! ```no_run
//! use mill_web::{Router, Server, ServerConfig, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! let server = Server::builder(ServerConfig::default())
//!     .router(Router::new())
//!     .server_limits(ServerLimits {
//!         max_pending_connections: 1024,
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         socket_read_timeout: Duration::from_secs(5),
//!         ..ConnLimits::default()
//!     })
//!     .request_limits(ReqLimits {
//!         header_count: 32,
//!         body_size: 64 * 1024,
//!         ..ReqLimits::default()
//!     })
//!     .build()
//!     .unwrap();
//!
//! server.accept_connections().unwrap();
//! ```

use std::time::Duration;

/// Controls admission of accepted connections into the worker pool.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || Socket
///                                  \/
/// [--------------]   Yes   /-----------------\   No   [-------------]
/// [ Add to queue ] <====== | Room in queue?  | =====> [ Sending 503 ]
/// [--------------]         \-----------------/        [-------------]
///        ||
///        \/
/// [---------]   Yes   /--------------------------\   No   [------]
/// [ Worker  ] <====== | Is there an idle worker? | =====> [ Wait ]
/// [---------]         \--------------------------/        [------]
/// ```
///
/// The worker count itself is `max_connections` from [`ServerConfig`](crate::ServerConfig).
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of accepted connections waiting for a worker (default: `1024`).
    ///
    /// When the queue is full, new connections receive an immediate
    /// HTTP `503` and are closed.
    pub max_pending_connections: usize,

    /// Format for error responses (default: `true`)
    ///
    /// # Examples
    /// If `true`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// Connection: close\r
    /// Content-Type: application/json\r
    /// Content-Length: 55\r
    /// \r
    /// {"error":"Invalid HTTP method","code":"INVALID_METHOD"}
    /// ```
    /// If `false`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// Connection: close\r
    /// Content-Length: 0\r
    /// \r
    /// ```
    /// Custom error routes may overwrite either body.
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_pending_connections: 1024,
            json_errors: true,

            _priv: (),
        }
    }
}

/// Connection-level socket options and timeouts
///
/// Applied to every accepted socket before the first read.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Receive timeout on the client socket (default: `10 seconds`)
    ///
    /// An idle keep-alive connection is closed when it fires; a partially
    /// received request is answered with `400 Bad Request`.
    pub socket_read_timeout: Duration,

    /// Send timeout on the client socket (default: `10 seconds`)
    pub socket_write_timeout: Duration,

    /// Idle time before the first TCP keep-alive probe (default: `10 seconds`)
    pub keepalive_idle: Duration,

    /// Interval between TCP keep-alive probes (default: `5 seconds`)
    pub keepalive_interval: Duration,

    /// Unanswered probes before the peer is considered dead (default: `3`)
    pub keepalive_retries: u32,

    /// Size of a single socket read (default: `32 KiB`)
    pub read_buffer_size: usize,

    /// Retries of a write that timed out or would block (default: `3`)
    pub write_retries: usize,

    /// How long a closing socket drains unread input after sending FIN
    /// (default: `100 ms`). `Duration::ZERO` closes immediately.
    pub linger_drain: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(10),
            socket_write_timeout: Duration::from_secs(10),
            keepalive_idle: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(5),
            keepalive_retries: 3,
            read_buffer_size: 32 * 1024,
            write_retries: 3,
            linger_drain: Duration::from_millis(100),

            _priv: (),
        }
    }
}

/// Request parsing limits
///
/// Exceeding a limit rejects the request:
///
/// | Limit          | Response                              |
/// |----------------|---------------------------------------|
/// | `head_size`    | `431 Request Header Fields Too Large` |
/// | `header_count` | `431 Request Header Fields Too Large` |
/// | `body_size`    | `413 Payload Too Large`               |
/// | `query_parts`  | `400 Bad Request`                     |
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum size of the request line plus headers (default: `16 KiB`)
    pub head_size: usize,

    /// Maximum number of header lines (default: `64`)
    pub header_count: usize,

    /// Maximum `Content-Length` accepted (default: `1 MiB`)
    pub body_size: usize,

    /// Maximum number of query parameters (default: `64`)
    pub query_parts: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            head_size: 16 * 1024,
            header_count: 64,
            body_size: 1024 * 1024,
            query_parts: 64,

            _priv: (),
        }
    }
}
