use crate::{
    errors::{self, ErrorKind},
    http::{
        request::{Framing, Parser, Request},
        response::Response,
        types::{Method, StatusCode},
    },
    limits::{ConnLimits, ReqLimits, ServerLimits},
    router::route::{Handler, Router},
    server::{pool::Job, socket::Socket},
};
use std::{
    collections::HashMap,
    io,
    net::{Shutdown, SocketAddr},
    sync::{Arc, Mutex, PoisonError},
};
use tracing::{debug, error, info, warn};

/// Read-only state shared by every connection job.
///
/// Built before the accept loop starts and never mutated afterwards.
pub(crate) struct Dispatch {
    pub(crate) router: Router,
    pub(crate) error_routes: HashMap<StatusCode, Arc<dyn Handler>>,
    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
}

impl Dispatch {
    /// Answers one parsed (or rejected) request.
    ///
    /// Returns `true` when the connection should stay open for another
    /// request, which happens only for `Connection: keep-alive`.
    pub(crate) fn handle_request(&self, socket: &Socket, parsed: Result<Request, ErrorKind>) -> bool {
        let mut request = match parsed {
            Ok(request) => request,
            Err(kind) => {
                warn!(error = %kind, "malformed request");
                self.handle_error(socket, kind.status(), &Request::default(), Some(kind));
                return false;
            }
        };
        request.print_message();

        let Some(handler) = self.router.fetch_route(&mut request) else {
            debug!(method = %request.method(), path = request.path(), "no route");
            self.handle_error(socket, StatusCode::NotFound, &request, None);
            return false;
        };

        let mut response = Response::new();
        handler.handle(&request, &mut response);

        response.set_header("Connection", request.connection());
        if !response.has_header("content-length") {
            let length = response.body.len().to_string();
            response.set_header("Content-Length", &length);
        }
        if request.method() == Method::Head {
            response.body.clear();
        }

        info!(
            method = %request.method(),
            path = request.path(),
            status = response.status_code(),
            outcome = "success",
            "request handled"
        );

        writer::send(socket, &response, self.conn_limits.write_retries) && request.is_keep_alive()
    }

    /// Sends an error response for `status`.
    ///
    /// The base response closes the connection and carries a JSON body (or
    /// none, see [`ServerLimits::json_errors`]). A custom handler registered
    /// for `status` may then rewrite it. The result is always sent.
    pub(crate) fn handle_error(
        &self,
        socket: &Socket,
        status: StatusCode,
        request: &Request,
        cause: Option<ErrorKind>,
    ) {
        let mut response = Response::for_status(status);
        match self.server_limits.json_errors {
            true => {
                let body = match cause {
                    Some(kind) => kind.json(),
                    None => errors::status_json(status),
                };
                response.header("Content-Type", "application/json").body(body);
            }
            false => {
                response.body("");
            }
        }

        if let Some(handler) = self.error_routes.get(&status) {
            handler.handle(request, &mut response);
        }

        let length = response.body.len().to_string();
        response.set_header("Content-Length", &length).close();
        response.print_message();

        writer::send(socket, &response, self.conn_limits.write_retries);
    }
}

//

/// Control handles of every socket owned by a connection job.
///
/// Entries live from accept until the job is dropped, whether it ran, was
/// rejected or was still queued at shutdown.
#[derive(Debug, Default)]
pub(crate) struct ActiveSockets {
    inner: Mutex<Active>,
}

#[derive(Debug, Default)]
struct Active {
    sockets: HashMap<u64, socket2::Socket>,
    next_id: u64,
    closed: bool,
}

impl ActiveSockets {
    /// Starts tracking `socket`. After [`shutdown_all`](Self::shutdown_all)
    /// the socket is half-closed right away instead.
    pub(crate) fn insert(&self, socket: &Socket) -> Option<u64> {
        let mut active = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if active.closed {
            let _ = socket.shutdown(Shutdown::Read);
            return None;
        }

        match socket.control_handle() {
            Ok(handle) => {
                let id = active.next_id;
                active.next_id += 1;
                active.sockets.insert(id, handle);
                Some(id)
            }
            Err(err) => {
                warn!(%err, "could not track client socket");
                None
            }
        }
    }

    #[inline]
    pub(crate) fn remove(&self, id: u64) {
        let mut active = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        active.sockets.remove(&id);
    }

    /// Half-closes the read side of every tracked socket, waking workers
    /// parked in a blocking read. Pending writes still go out.
    pub(crate) fn shutdown_all(&self) -> usize {
        let mut active = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        active.closed = true;

        for socket in active.sockets.values() {
            let _ = socket.shutdown(Shutdown::Read);
        }
        active.sockets.len()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sockets
            .len()
    }
}

//

/// One accepted client, queued for a worker.
pub(crate) struct ConnectionJob {
    pub(crate) socket: Socket,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) dispatch: Arc<Dispatch>,
    pub(crate) active: Arc<ActiveSockets>,
    pub(crate) id: Option<u64>,
}

impl Job for ConnectionJob {
    fn run(self) {
        debug!(peer = ?self.peer, "serving connection");
        serve(&self.socket, &self.dispatch);
    }
}

impl Drop for ConnectionJob {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.active.remove(id);
        }
    }
}

/// Reads, frames and answers requests until the connection is done.
pub(crate) fn serve(socket: &Socket, dispatch: &Dispatch) {
    if let Err(err) = socket.configure_client(&dispatch.conn_limits) {
        error!(%err, "failed to apply client socket options");
        dispatch.handle_error(
            socket,
            StatusCode::InternalServerError,
            &Request::default(),
            None,
        );
        return;
    }

    let limits = &dispatch.req_limits;
    let mut parser = Parser::new();
    let mut chunk = vec![0u8; dispatch.conn_limits.read_buffer_size.max(1)];

    loop {
        match parser.fill_buffer(&**socket, &mut chunk) {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if is_timeout(&err) => {
                if parser.is_empty() {
                    debug!("idle connection timed out");
                    return;
                }

                // Nothing more is coming: a complete message is still
                // answered, a truncated one gets a 400. Then close.
                match parser.poll_request(limits, Framing::Closed) {
                    Ok(Some(request)) => dispatch.handle_request(socket, Ok(request)),
                    Ok(None) => return,
                    Err(kind) => dispatch.handle_request(socket, Err(kind)),
                };
                return;
            }
            Err(err) => {
                error!(%err, "read failed");
                return;
            }
        }

        loop {
            match parser.poll_request(limits, Framing::Partial) {
                Ok(None) => break,
                Ok(Some(request)) => {
                    if !dispatch.handle_request(socket, Ok(request)) {
                        return;
                    }
                }
                Err(kind) => {
                    dispatch.handle_request(socket, Err(kind));
                    return;
                }
            }
        }
    }
}

#[inline]
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

pub(crate) mod writer {
    use super::is_timeout;
    use crate::{http::response::Response, server::socket::Socket};
    use std::io::{self, Write};
    use tracing::error;

    /// Serializes and writes `response`. Failures are logged, not returned.
    pub(crate) fn send(socket: &Socket, response: &Response, retries: usize) -> bool {
        let bytes = response.serialize();

        match write_bytes(&**socket, &bytes, retries) {
            Ok(()) => true,
            Err(err) => {
                let head = String::from_utf8_lossy(&bytes[..bytes.len().min(5)]);
                error!(%err, %head, len = bytes.len(), "failed to send response");
                false
            }
        }
    }

    /// `write_all` that retries a stalled write (`WouldBlock`/`TimedOut`)
    /// up to `retries` times in a row.
    pub(crate) fn write_bytes<W: Write>(mut out: W, bytes: &[u8], retries: usize) -> io::Result<()> {
        let mut written = 0;
        let mut stalls = 0;

        while written < bytes.len() {
            match out.write(&bytes[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    written += n;
                    stalls = 0;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if is_timeout(&err) && stalls < retries => stalls += 1,
                Err(err) => return Err(err),
            }
        }

        out.flush()
    }
}
