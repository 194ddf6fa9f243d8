use mill_web::{Request, Response, Router, Server, ServerConfig, StatusCode};

fn echo(req: &Request, resp: &mut Response) {
    let body = match req.body_str() {
        Some(body) if !body.is_empty() => format!(r#", "body": {body:?}"#),
        _ => String::new(),
    };
    let params = match req.param("tail") {
        Some(tail) => format!(r#", "tail": {tail:?}"#),
        None => String::new(),
    };

    let result = format!(r#"{{"method": "{}", "url": {:?}{params}{body}}}"#, req.method(), req.path());

    resp.status(StatusCode::Ok)
        .header("Content-Type", "application/json")
        .body(result);
}

fn main() {
    let mut router = Router::new();
    router
        .get("/echo", echo)
        .unwrap()
        .post("/echo", echo)
        .unwrap()
        .get("/echo/{tail}", echo)
        .unwrap()
        .post("/echo/{tail}", echo)
        .unwrap();

    let config = ServerConfig {
        host: [127, 0, 0, 1].into(),
        ..ServerConfig::default()
    };

    Server::new(config, router)
        .unwrap()
        .accept_connections()
        .unwrap();
}
