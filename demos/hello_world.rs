use mill_web::{Request, Response, Router, Server, ServerConfig, StatusCode};

fn main() {
    let mut router = Router::new();
    router
        .get("/", |_: &Request, resp: &mut Response| {
            resp.status(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .body("Hello, world!");
        })
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
