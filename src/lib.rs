//! mill_web - Small multi-threaded HTTP/1.1 server with a segment-trie router
//!
//! A blocking server built on plain OS threads: one accept loop, a fixed pool
//! of workers and a bounded queue between them. Routes are path templates
//! with `{param}` segments, matched per method.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: `Content-Length` framing, `Connection: keep-alive` reuse, pipelined requests
//! - **HTTP/1.0**: requests parsed and answered; connections closed unless `keep-alive` is asked for
//!
//! # Behaviour
//!
//! - **Backpressure** - a full worker queue answers `503 Service Unavailable` immediately
//! - **Error routes** - custom handlers may rewrite any error response (404, 400, 503...)
//! - **Graceful shutdown** - from any thread, or by typing `quit` on the console
//! - **YAML configuration** - see [`ServerConfig`]
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use mill_web::{Request, Response, Router, Server, ServerConfig, StatusCode};
//!
//! let mut router = Router::new();
//! router
//!     .get("/", |_: &Request, resp: &mut Response| {
//!         resp.status(StatusCode::Ok).body("Hello World!");
//!     })
//!     .unwrap();
//!
//! Server::new(ServerConfig::default(), router)
//!     .unwrap()
//!     .accept_connections()
//!     .unwrap();
//! ```
//! Path parameters, query strings and a custom 404:
//! ```no_run
//! use mill_web::{Request, Response, Router, Server, ServerConfig, StatusCode};
//!
//! let mut router = Router::new();
//! router
//!     .get("/users/{id}/name", |req: &Request, resp: &mut Response| {
//!         let id = req.param("id").unwrap_or_default();
//!         resp.body(format_args!("user {id}"));
//!     })
//!     .unwrap()
//!     .get("/search", |req: &Request, resp: &mut Response| {
//!         match req.query("q") {
//!             Some(q) => resp.body(q),
//!             None => resp.status(StatusCode::BadRequest).body("missing q"),
//!         };
//!     })
//!     .unwrap();
//!
//! let config = ServerConfig::load("server.yaml").unwrap_or_default();
//!
//! Server::builder(config)
//!     .router(router)
//!     .error_route(404, |req: &Request, resp: &mut Response| {
//!         resp.header("Content-Type", "text/plain")
//!             .body(format_args!("no page at {}", req.path()));
//!     })
//!     .build()
//!     .unwrap()
//!     .accept_connections()
//!     .unwrap();
//! ```

pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod router {
    pub(crate) mod route;
    pub(crate) mod trie;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod console;
    pub(crate) mod pool;
    pub(crate) mod server_impl;
    pub(crate) mod socket;
}
pub mod config;
pub(crate) mod errors;
pub mod files;
pub mod limits;

pub use crate::{
    config::ServerConfig,
    errors::{Error, ErrorKind, Result},
    http::{
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Response,
        },
        types::{HeaderMap, Method, StatusCode, Version},
    },
    router::route::{Handler, Route, Router},
    server::server_impl::{Server, ServerBuilder, ServerState, ShutdownHandle},
};
