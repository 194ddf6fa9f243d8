use crate::{
    config::ServerConfig,
    errors::Error,
    http::{request::Request, types::{Method, StatusCode}},
    limits::{ConnLimits, ReqLimits, ServerLimits},
    router::route::{Handler, Router},
    server::{
        connection::{ActiveSockets, ConnectionJob, Dispatch},
        console::{self, Stoppable},
        pool::WorkerPool,
        socket::Socket,
    },
};
use std::{
    collections::HashMap,
    io,
    net::{Shutdown, SocketAddr},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`Server`].
///
/// ```text
/// Created -> Listening -> Running -> ShuttingDown -> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerState {
    /// Configuration accepted, socket not bound yet.
    Created,
    /// Bound and listening; routes may still be added.
    Listening,
    /// Inside [`Server::accept_connections`].
    Running,
    /// [`Server::shutdown`] was called; the accept loop is unwinding.
    ShuttingDown,
    /// Workers joined, nothing left running.
    Stopped,
}

impl ServerState {
    #[inline]
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Listening,
            2 => Self::Running,
            3 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

/// Mutable state shared between the accept loop, shutdown callers and the
/// console thread.
struct Control {
    listener: Socket,
    active: Arc<ActiveSockets>,
    state: AtomicU8,
}

impl Control {
    #[inline]
    fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    fn is_running(&self) -> bool {
        matches!(self.state(), ServerState::Listening | ServerState::Running)
    }

    /// Returns `false` when shutdown had already begun.
    fn shutdown(&self) -> bool {
        let started = [ServerState::Created, ServerState::Listening, ServerState::Running]
            .into_iter()
            .any(|from| self.transition(from, ServerState::ShuttingDown));
        if !started {
            return false;
        }

        let sockets = self.active.shutdown_all();
        if let Err(err) = self.listener.shutdown(Shutdown::Read) {
            debug!(%err, "listener half-close");
        }

        info!(active = sockets, "shutting down");
        true
    }
}

/// Cloneable handle that stops a [`Server`] from any thread.
///
/// # Examples
/// ```no_run
/// use mill_web::{Router, Server, ServerConfig};
/// use std::{thread, time::Duration};
///
/// let server = Server::new(ServerConfig::default(), Router::new()).unwrap();
/// let handle = server.shutdown_handle();
///
/// thread::spawn(move || {
///     thread::sleep(Duration::from_secs(60));
///     handle.shutdown();
/// });
///
/// server.accept_connections().unwrap();
/// ```
#[derive(Clone)]
pub struct ShutdownHandle {
    control: Arc<Control>,
}

impl ShutdownHandle {
    /// Half-closes the listener and every live client socket. Idempotent.
    #[inline]
    pub fn shutdown(&self) {
        self.control.shutdown();
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    #[inline]
    pub fn state(&self) -> ServerState {
        self.control.state()
    }
}

impl Stoppable for ShutdownHandle {
    #[inline]
    fn is_running(&self) -> bool {
        ShutdownHandle::is_running(self)
    }

    #[inline]
    fn shutdown(&self) {
        ShutdownHandle::shutdown(self)
    }
}

/// Blocking HTTP/1.1 server.
///
/// One thread runs [`accept_connections`](Self::accept_connections);
/// `max_connections` worker threads serve the accepted sockets, one
/// connection each, with sequential keep-alive requests.
///
/// # Examples
///
/// ```no_run
/// use mill_web::{Request, Response, Router, Server, ServerConfig, StatusCode};
///
/// let mut router = Router::new();
/// router
///     .get("/", |_: &Request, resp: &mut Response| {
///         resp.status(StatusCode::Ok).body("Hello world!");
///     })
///     .unwrap();
///
/// let server = Server::new(ServerConfig::default(), router).unwrap();
/// server.accept_connections().unwrap();
/// ```
pub struct Server {
    config: ServerConfig,
    dispatch: Arc<Dispatch>,
    control: Arc<Control>,
    pool: WorkerPool<ConnectionJob>,
    console: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Starts a [`ServerBuilder`] for `config`.
    #[inline]
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            config,
            router: None,
            error_routes: HashMap::new(),
            invalid_error_route: None,

            server_limits: None,
            connection_limits: None,
            request_limits: None,
        }
    }

    /// Validates `config`, binds the listener and starts the workers.
    #[inline]
    pub fn new(config: ServerConfig, router: Router) -> Result<Self, Error> {
        Self::builder(config).router(router).build()
    }

    /// Registers a route. Only allowed before accepting starts.
    pub fn add_route<H: Handler>(
        &mut self,
        method: Method,
        template: &str,
        handler: H,
    ) -> Result<&mut Self, Error> {
        self.dispatch_mut()?.router.add_route(method, template, handler)?;
        Ok(self)
    }

    /// Registers a handler that rewrites the error response for `code`.
    ///
    /// The handler receives the response already filled in (status,
    /// `Connection: close`, default body) and may replace the body or add
    /// headers. The connection is closed afterwards either way.
    pub fn add_error_route<H: Handler>(&mut self, code: u16, handler: H) -> Result<&mut Self, Error> {
        let status = known_status(code)?;
        self.dispatch_mut()?
            .error_routes
            .insert(status, Arc::new(handler));
        Ok(self)
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown) is called.
    ///
    /// Each accepted socket is queued for a worker; when the queue is full
    /// the client gets `503 Service Unavailable` right away. Returns `Ok(())`
    /// once the listener has been shut down.
    pub fn accept_connections(&self) -> Result<(), Error> {
        if !self.control.transition(ServerState::Listening, ServerState::Running) {
            return match self.control.state() {
                ServerState::ShuttingDown | ServerState::Stopped => Ok(()),
                _ => Err(Error::InvalidArgument(
                    "the accept loop is already running".into(),
                )),
            };
        }

        for route in self.dispatch.router.routes() {
            info!(%route, "route registered");
        }
        info!(
            addr = ?self.local_addr(),
            workers = self.pool.size(),
            "accepting connections"
        );

        let linger = self.dispatch.conn_limits.linger_drain;
        while self.control.is_running() {
            match self.control.listener.accept(linger) {
                Ok((socket, peer)) => self.dispatch_connection(socket, peer),
                Err(err) if is_retryable(&err) => continue,
                Err(_) if !self.control.is_running() => break,
                Err(err) => {
                    error!(%err, "accept failed");
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }

        info!("accept loop finished");
        Ok(())
    }

    /// Stops accepting and wakes every worker blocked on a client read.
    ///
    /// Responses being written still go out. Idempotent.
    #[inline]
    pub fn shutdown(&self) {
        self.control.shutdown();
    }

    #[inline]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            control: self.control.clone(),
        }
    }

    #[inline]
    pub fn state(&self) -> ServerState {
        self.control.state()
    }

    /// Address the listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.control.listener.local_addr()
    }

    #[inline]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[inline]
    pub fn router(&self) -> &Router {
        &self.dispatch.router
    }

    fn dispatch_connection(&self, socket: Socket, peer: Option<SocketAddr>) {
        debug!(?peer, active = self.control.active.len(), "accepted connection");

        let job = ConnectionJob {
            id: self.control.active.insert(&socket),
            socket,
            peer,
            dispatch: self.dispatch.clone(),
            active: self.control.active.clone(),
        };

        if let Err(job) = self.pool.enqueue(job) {
            warn!(?peer, pending = self.pool.pending(), "worker queue full, rejecting connection");
            self.dispatch.handle_error(
                &job.socket,
                StatusCode::ServiceUnavailable,
                &Request::default(),
                None,
            );
            if let Err(err) = job.socket.close_without_waiting() {
                debug!(%err, "rejected socket stays blocking on close");
            }
        }
    }

    fn dispatch_mut(&mut self) -> Result<&mut Dispatch, Error> {
        if self.control.state() != ServerState::Listening {
            return Err(locked());
        }
        Arc::get_mut(&mut self.dispatch).ok_or_else(locked)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.control.shutdown();
        self.pool.stop();

        let console = self
            .console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(console) = console {
            if console.join().is_err() {
                error!("console thread panicked");
            }
        }

        self.control.set_state(ServerState::Stopped);
        info!(outcome = "success", "server stopped");
    }
}

#[inline]
fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

#[inline]
fn known_status(code: u16) -> Result<StatusCode, Error> {
    StatusCode::from_u16(code)
        .ok_or_else(|| Error::InvalidArgument(format!("unknown status code {code}")))
}

#[inline]
fn locked() -> Error {
    Error::InvalidArgument("routes must be registered before accepting connections".into())
}

//

/// Builder for configuring and creating [`Server`] instances.
///
/// # Examples
///
/// ```no_run
/// use mill_web::{limits::ServerLimits, Request, Response, Router, Server, ServerConfig};
///
/// let server = Server::builder(ServerConfig::default())
///     .router(Router::new())
///     .error_route(404, |_: &Request, resp: &mut Response| {
///         resp.body("<h1>Nothing here</h1>").header("Content-Type", "text/html");
///     })
///     .server_limits(ServerLimits {
///         max_pending_connections: 16,
///         ..ServerLimits::default()
///     })
///     .build()
///     .unwrap();
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    router: Option<Router>,
    error_routes: HashMap<StatusCode, Arc<dyn Handler>>,
    invalid_error_route: Option<u16>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
}

impl ServerBuilder {
    /// Sets the routes. An empty router is used when omitted.
    #[inline(always)]
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Registers a custom error handler, see [`Server::add_error_route`].
    ///
    /// An unknown status code makes [`build`](Self::build) fail.
    #[inline]
    pub fn error_route<H: Handler>(mut self, code: u16, handler: H) -> Self {
        match StatusCode::from_u16(code) {
            Some(status) => {
                self.error_routes.insert(status, Arc::new(handler));
            }
            None => self.invalid_error_route = Some(code),
        }
        self
    }

    /// Configures admission of accepted connections.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures client socket options and timeouts.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Validates the configuration, binds, listens and starts the workers
    /// (and the console listener when `console_input` is set).
    ///
    /// Nothing is left listening when this fails.
    pub fn build(self) -> Result<Server, Error> {
        self.config.validate()?;
        if let Some(code) = self.invalid_error_route {
            known_status(code)?;
        }

        let server_limits = self.server_limits.unwrap_or_default();
        let conn_limits = self.connection_limits.unwrap_or_default();
        let req_limits = self.request_limits.unwrap_or_default();

        let addr = self.config.socket_addr();
        let listener = Socket::listen(addr, self.config.max_connections, &conn_limits)?;

        let control = Arc::new(Control {
            listener,
            active: Arc::new(ActiveSockets::default()),
            state: AtomicU8::new(ServerState::Created as u8),
        });

        let pool = WorkerPool::new(
            self.config.max_connections,
            server_limits.max_pending_connections,
        )
        .map_err(Error::socket("spawn worker threads"))?;

        let dispatch = Arc::new(Dispatch {
            router: self.router.unwrap_or_default(),
            error_routes: self.error_routes,
            server_limits,
            conn_limits,
            req_limits,
        });

        control.set_state(ServerState::Listening);
        info!(
            addr = ?control.listener.local_addr(),
            max_connections = self.config.max_connections,
            "server listening"
        );

        let server = Server {
            config: self.config,
            dispatch,
            control,
            pool,
            console: Mutex::new(None),
        };

        if server.config.console_input {
            let handle = console::spawn(server.config.input_polling_interval(), server.shutdown_handle())
                .map_err(Error::socket("spawn console thread"))?;
            *server.console.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        Ok(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tools::test_config, Response};
    use std::{
        io::{Read, Write},
        net::TcpStream,
    };

    fn serve(builder: ServerBuilder) -> (Arc<Server>, JoinHandle<()>, SocketAddr) {
        let server = Arc::new(builder.build().unwrap());
        let addr = server.local_addr().unwrap();

        let runner = server.clone();
        let thread = thread::spawn(move || runner.accept_connections().unwrap());
        (server, thread, addr)
    }

    fn exchange(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(request.as_bytes()).unwrap();

        let mut reply = Vec::new();
        let _ = stream.read_to_end(&mut reply);
        String::from_utf8_lossy(&reply).into_owned()
    }

    #[test]
    fn state_machine() {
        let server = Server::new(test_config(), Router::new()).unwrap();
        assert_eq!(server.state(), ServerState::Listening);

        let handle = server.shutdown_handle();
        assert!(handle.is_running());

        server.shutdown();
        assert_eq!(server.state(), ServerState::ShuttingDown);
        assert!(!handle.is_running());

        // Accepting after shutdown returns straight away.
        assert!(server.accept_connections().is_ok());
        server.shutdown();

        drop(server);
        assert_eq!(handle.state(), ServerState::Stopped);
    }

    #[test]
    fn rejects_bad_config() {
        #[rustfmt::skip]
        let cases = [
            ServerConfig { port: 0, ..test_config() },
            ServerConfig { max_connections: 0, ..test_config() },
        ];

        for config in cases {
            assert!(matches!(
                Server::new(config, Router::new()),
                Err(Error::InvalidConfig(_))
            ));
        }

        let result = Server::builder(test_config())
            .error_route(299, |_: &Request, _: &mut Response| {})
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn routes_locked_after_start() {
        let mut server = Server::new(test_config(), Router::new()).unwrap();

        server
            .add_route(Method::Get, "/late", |_: &Request, resp: &mut Response| {
                resp.body("late");
            })
            .unwrap()
            .add_error_route(404, |_: &Request, resp: &mut Response| {
                resp.body("custom");
            })
            .unwrap();
        assert!(server.add_error_route(999, |_: &Request, _: &mut Response| {}).is_err());
        assert_eq!(server.router().len(), 1);

        server.shutdown();
        assert!(server
            .add_route(Method::Get, "/later", |_: &Request, _: &mut Response| {})
            .is_err());
    }

    #[test]
    fn full_queue_answers_503() {
        let mut router = Router::new();
        router
            .get("/slow", |_: &Request, resp: &mut Response| {
                thread::sleep(Duration::from_millis(400));
                resp.body("slow");
            })
            .unwrap();

        let builder = Server::builder(ServerConfig {
            max_connections: 1,
            ..test_config()
        })
        .router(router)
        .server_limits(ServerLimits {
            max_pending_connections: 1,
            ..ServerLimits::default()
        });
        let (server, thread, addr) = serve(builder);

        // One in service, one queued, the third is turned away.
        let busy: Vec<_> = (0..2)
            .map(|_| {
                let stream = TcpStream::connect(addr).unwrap();
                (&stream).write_all(b"GET /slow HTTP/1.1\r\n\r\n").unwrap();
                thread::sleep(Duration::from_millis(50));
                stream
            })
            .collect();

        let reply = exchange(addr, "GET /slow HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "{reply}");
        assert!(reply.ends_with(r#"{"error":"Service Unavailable","code":"SERVICE_UNAVAILABLE"}"#));

        drop(busy);
        server.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn rejection_does_not_stall_accept() {
        let mut router = Router::new();
        router
            .get("/slow", |_: &Request, resp: &mut Response| {
                thread::sleep(Duration::from_millis(600));
                resp.body("slow");
            })
            .unwrap();

        let builder = Server::builder(ServerConfig {
            max_connections: 1,
            ..test_config()
        })
        .router(router)
        .server_limits(ServerLimits {
            max_pending_connections: 1,
            ..ServerLimits::default()
        })
        .connection_limits(ConnLimits {
            linger_drain: Duration::from_secs(3),
            ..ConnLimits::default()
        });
        let (server, thread, addr) = serve(builder);

        let busy: Vec<_> = (0..2)
            .map(|_| {
                let stream = TcpStream::connect(addr).unwrap();
                (&stream).write_all(b"GET /slow HTTP/1.1\r\n\r\n").unwrap();
                thread::sleep(Duration::from_millis(50));
                stream
            })
            .collect();

        // Rejected, and the client never closes its end.
        let mut stalled = TcpStream::connect(addr).unwrap();
        stalled.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stalled.write_all(b"GET /slow HTTP/1.1\r\n\r\n").unwrap();
        let mut head = [0u8; 12];
        stalled.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"HTTP/1.1 503");

        let started = std::time::Instant::now();
        let reply = exchange(addr, "GET /slow HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "{reply}");
        assert!(started.elapsed() < Duration::from_millis(500), "{:?}", started.elapsed());

        drop((busy, stalled));
        server.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn plain_errors() {
        let builder = Server::builder(test_config()).server_limits(ServerLimits {
            json_errors: false,
            ..ServerLimits::default()
        });
        let (server, thread, addr) = serve(builder);

        let reply = exchange(addr, "GET /nothing HTTP/1.1\r\n\r\n");
        assert_eq!(
            reply,
            "HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
        );

        server.shutdown();
        thread.join().unwrap();
    }
}
