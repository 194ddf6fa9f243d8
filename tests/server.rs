use mill_web::{
    limits::ConnLimits, Request, Response, Router, Server, ServerConfig, ServerState, StatusCode,
};
use std::{
    io::{BufRead, BufReader, Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

struct Running {
    server: Arc<Server>,
    thread: Option<JoinHandle<()>>,
    addr: SocketAddr,
}

impl Running {
    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
    }

    /// Sends raw bytes on a fresh connection and reads until the server closes.
    fn exchange(&self, request: &str) -> String {
        let mut stream = self.connect();
        stream.write_all(request.as_bytes()).unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).unwrap();
        String::from_utf8(reply).unwrap()
    }

    fn stop(mut self) {
        self.server.shutdown();
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
    }
}

fn config() -> ServerConfig {
    let port = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    ServerConfig {
        host: Ipv4Addr::LOCALHOST.into(),
        port,
        max_connections: 4,
        console_input: false,
        ..ServerConfig::default()
    }
}

fn router() -> Router {
    let mut router = Router::new();
    router
        .get("/", |_: &Request, resp: &mut Response| {
            resp.status(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .body("Hello, world!");
        })
        .unwrap()
        .get("/users/{id}/posts/{post}", |req: &Request, resp: &mut Response| {
            let (id, post) = (req.param("id").unwrap(), req.param("post").unwrap());
            resp.body(format_args!("{id}:{post}"));
        })
        .unwrap()
        .get("/search", |req: &Request, resp: &mut Response| {
            resp.body(req.query("q").unwrap_or("-"));
        })
        .unwrap()
        .post("/echo", |req: &Request, resp: &mut Response| {
            resp.status(StatusCode::Created).body(req.body());
        })
        .unwrap();
    router
}

fn start(builder: mill_web::ServerBuilder) -> Running {
    let server = Arc::new(builder.build().unwrap());
    let addr = server.local_addr().unwrap();

    let runner = server.clone();
    let thread = thread::spawn(move || runner.accept_connections().unwrap());

    Running {
        server,
        thread: Some(thread),
        addr,
    }
}

fn start_default() -> Running {
    start(Server::builder(config()).router(router()))
}

/// Reads one `Content-Length` framed response.
fn read_response<R: BufRead>(reader: &mut R) -> (String, String) {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        if line == "\r\n" || line.is_empty() {
            break;
        }
        head.push_str(&line);
    }

    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .map(|value| value.trim().parse::<usize>().unwrap())
        .unwrap_or(0);

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).unwrap();
    (head, String::from_utf8(body).unwrap())
}

#[test]
fn serves_registered_route() {
    let running = start_default();

    let reply = running.exchange("GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "{reply}");
    assert!(reply.contains("Content-Type: text/plain\r\n"));
    assert!(reply.contains("Content-Length: 13\r\n"));
    assert!(reply.contains("Connection: close\r\n"));
    assert!(reply.ends_with("\r\n\r\nHello, world!"));

    running.stop();
}

#[test]
fn params_and_query() {
    let running = start_default();

    let reply = running.exchange("GET /users/7/posts/hello HTTP/1.1\r\n\r\n");
    assert!(reply.ends_with("\r\n\r\n7:hello"), "{reply}");

    let reply = running.exchange("GET /search?q=rust%20lang&page=2 HTTP/1.1\r\n\r\n");
    assert!(reply.ends_with("\r\n\r\nrust lang"), "{reply}");

    running.stop();
}

#[test]
fn unknown_route_is_404() {
    let running = start_default();

    #[rustfmt::skip]
    let requests = [
        "GET /missing HTTP/1.1\r\n\r\n",
        "DELETE / HTTP/1.1\r\n\r\n",
        "GET /users/7/posts HTTP/1.1\r\n\r\n",
    ];

    for request in requests {
        let reply = running.exchange(request);
        assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"), "{request}: {reply}");
        assert!(reply.contains("Connection: close\r\n"));
        assert!(reply.ends_with(r#"{"error":"Not Found","code":"NOT_FOUND"}"#));
    }

    running.stop();
}

#[test]
fn malformed_requests() {
    let running = start_default();

    #[rustfmt::skip]
    let cases = [
        ("BREW / HTTP/1.1\r\n\r\n",      "400 Bad Request", "INVALID_METHOD"),
        ("GET nope HTTP/1.1\r\n\r\n",    "400 Bad Request", "INVALID_URL"),
        ("GET / HTTP/9.9\r\n\r\n",       "400 Bad Request", "INVALID_VERSION"),
        ("POST /echo HTTP/1.1\r\nContent-Length: abc\r\n\r\n", "400 Bad Request", "INVALID_CONTENT_LENGTH"),
        ("POST /echo HTTP/1.1\r\nContent-Length: 99999999\r\n\r\n", "413 Payload Too Large", "BODY_TOO_LARGE"),
    ];

    for (request, status, code) in cases {
        let reply = running.exchange(request);
        assert!(reply.starts_with(&format!("HTTP/1.1 {status}\r\n")), "{request}: {reply}");
        assert!(reply.contains(code), "{request}: {reply}");
        assert!(reply.contains("Content-Type: application/json\r\n"));
    }

    running.stop();
}

#[test]
fn truncated_body_after_timeout() {
    let limits = ConnLimits {
        socket_read_timeout: Duration::from_millis(200),
        ..ConnLimits::default()
    };
    let running = start(
        Server::builder(config())
            .router(router())
            .connection_limits(limits),
    );

    let reply = running.exchange("POST /echo HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc");
    assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{reply}");
    assert!(reply.contains("BODY_MISMATCH"));

    running.stop();
}

#[test]
fn truncated_head_after_timeout() {
    let hits = Arc::new(AtomicUsize::new(0));

    let mut router = router();
    let counter = hits.clone();
    router
        .post("/transfer", move |req: &Request, resp: &mut Response| {
            counter.fetch_add(1, Ordering::SeqCst);
            resp.body(format_args!("executed with body len {}", req.body().len()));
        })
        .unwrap();

    let limits = ConnLimits {
        socket_read_timeout: Duration::from_millis(200),
        ..ConnLimits::default()
    };
    let running = start(
        Server::builder(config())
            .router(router)
            .connection_limits(limits),
    );

    // No blank line: the Content-Length line may still be on its way.
    let reply = running.exchange("POST /transfer HTTP/1.1\r\nHost: a\r\n");
    assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{reply}");
    assert!(reply.contains("INCOMPLETE_REQUEST"), "{reply}");
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    // A finished head that arrives before the timeout still goes through.
    let reply = running.exchange("POST /transfer HTTP/1.1\r\n\r\n");
    assert!(reply.ends_with("executed with body len 0"), "{reply}");

    running.stop();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn echoes_body() {
    let running = start_default();

    let reply = running.exchange("POST /echo HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello there");
    assert!(reply.starts_with("HTTP/1.1 201 Created\r\n"), "{reply}");
    assert!(reply.contains("Content-Length: 11\r\n"));
    assert!(reply.ends_with("\r\n\r\nhello there"));

    running.stop();
}

#[test]
fn head_has_no_body() {
    let mut router = router();
    router
        .head("/", |_: &Request, resp: &mut Response| {
            resp.body("Hello, world!");
        })
        .unwrap();
    let running = start(Server::builder(config()).router(router));

    let reply = running.exchange("HEAD / HTTP/1.1\r\n\r\n");
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "{reply}");
    assert!(reply.contains("Content-Length: 13\r\n"));
    assert!(reply.ends_with("\r\n\r\n"));

    running.stop();
}

#[test]
fn keep_alive_reuses_connection() {
    let running = start_default();

    let stream = running.connect();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;

    for id in 1..=3 {
        let request = format!("GET /users/{id}/posts/x HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        writer.write_all(request.as_bytes()).unwrap();

        let (head, body) = read_response(&mut reader);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert_eq!(body, format!("{id}:x"));
    }

    // The last request asks to close.
    writer.write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let (head, body) = read_response(&mut reader);
    assert!(head.contains("Connection: close\r\n"));
    assert_eq!(body, "Hello, world!");

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    running.stop();
}

#[test]
fn pipelined_requests() {
    let running = start_default();

    let stream = running.connect();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;

    writer
        .write_all(
            b"POST /echo HTTP/1.1\r\nConnection: keep-alive\r\nContent-Length: 3\r\n\r\none\
              GET /search?q=two HTTP/1.1\r\nConnection: keep-alive\r\n\r\n\
              GET /missing HTTP/1.1\r\n\r\n",
        )
        .unwrap();

    let (head, body) = read_response(&mut reader);
    assert!(head.starts_with("HTTP/1.1 201 Created\r\n"), "{head}");
    assert_eq!(body, "one");

    let (_, body) = read_response(&mut reader);
    assert_eq!(body, "two");

    let (head, _) = read_response(&mut reader);
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"), "{head}");

    running.stop();
}

#[test]
fn custom_error_routes() {
    let builder = Server::builder(config())
        .router(router())
        .error_route(404, |req: &Request, resp: &mut Response| {
            resp.header("Content-Type", "text/html")
                .body(format_args!("<h1>{} is gone</h1>", req.path()));
        })
        .error_route(400, |_: &Request, resp: &mut Response| {
            resp.header("X-Reason", "bad input");
        });
    let running = start(builder);

    let reply = running.exchange("GET /gone HTTP/1.1\r\n\r\n");
    assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"), "{reply}");
    assert!(reply.contains("Content-Type: text/html\r\n"));
    assert!(reply.contains("Connection: close\r\n"));
    assert!(reply.ends_with("<h1>/gone is gone</h1>"));

    let reply = running.exchange("BREW / HTTP/1.1\r\n\r\n");
    assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{reply}");
    assert!(reply.contains("X-Reason: bad input\r\n"));
    assert!(reply.ends_with(r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#));

    running.stop();
}

#[test]
fn shutdown_wakes_idle_connections() {
    let running = start_default();
    let handle = running.server.shutdown_handle();

    // Parked in a read on a worker.
    let mut idle = running.connect();
    idle.write_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n").unwrap();
    let mut reader = BufReader::new(idle.try_clone().unwrap());
    let (head, _) = read_response(&mut reader);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));

    assert_eq!(handle.state(), ServerState::Running);
    let stopper = thread::spawn(move || handle.shutdown());
    stopper.join().unwrap();

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    let server = running.server.clone();
    running.stop();
    assert_eq!(server.state(), ServerState::ShuttingDown);

    drop(server);
    drop(idle);
}

#[test]
fn concurrent_clients() {
    let running = start_default();
    let addr = running.addr;

    let clients: Vec<_> = (0..16)
        .map(|i| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).unwrap();
                stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
                write!(stream, "GET /users/{i}/posts/p HTTP/1.1\r\n\r\n").unwrap();

                let mut reply = String::new();
                stream.read_to_string(&mut reply).unwrap();
                assert!(reply.ends_with(&format!("{i}:p")), "{reply}");
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }

    running.stop();
}

#[test]
fn build_errors() {
    let no_workers = ServerConfig {
        max_connections: 0,
        ..config()
    };
    let err = Server::new(no_workers, Router::new()).err().unwrap();
    assert!(err.to_string().starts_with("invalid configuration"), "{err}");

    // Port already taken without SO_REUSEPORT on the other side.
    let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let busy_port = ServerConfig {
        port: taken.local_addr().unwrap().port(),
        ..config()
    };
    assert!(Server::new(busy_port, Router::new()).is_err());
}
