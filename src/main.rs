use clap::Parser;
use mill_web::{files, Request, Response, Router, Server, ServerConfig, StatusCode};
use std::{path::PathBuf, process::ExitCode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mill_web")]
#[command(about = "Multi-threaded HTTP/1.1 server", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `port` from the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Overrides `max_connections` from the configuration
    #[arg(short, long)]
    max_connections: Option<usize>,

    /// Do not listen for stop commands on stdin
    #[arg(long)]
    no_console: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mill_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "server failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> mill_web::Result<()> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }
    if args.no_console {
        config.console_input = false;
    }

    tracing::info!(
        port = config.port,
        max_connections = config.max_connections,
        "attempting to start server"
    );

    let router = routes(&config)?;
    let server = Server::builder(config)
        .router(router)
        .error_route(404, |req: &Request, resp: &mut Response| {
            resp.header("Content-Type", "text/plain")
                .body(format_args!("Nothing found at {}\n", req.path()));
        })
        .build()?;

    server.accept_connections()?;
    tracing::info!("stopping server");
    Ok(())
}

fn routes(config: &ServerConfig) -> mill_web::Result<Router> {
    let mut router = Router::new();

    router
        .get("/", |_: &Request, resp: &mut Response| {
            resp.status(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .body("Hello, world!\n");
        })?
        .get("/hello/{name}", |req: &Request, resp: &mut Response| {
            let name = req.param("name").unwrap_or("stranger");
            resp.header("Content-Type", "text/plain")
                .body(format_args!("Hello, {name}!\n"));
        })?
        .post("/echo", |req: &Request, resp: &mut Response| {
            let content_type = req.header("content-type").unwrap_or("application/octet-stream");
            resp.header("Content-Type", content_type).body(req.body());
        })?
        .get("/search", |req: &Request, resp: &mut Response| match req.query("q") {
            Some(q) => {
                resp.header("Content-Type", "text/plain")
                    .body(format_args!("Searching for {q}\n"));
            }
            None => {
                resp.status(StatusCode::BadRequest).body("missing `q`\n");
            }
        })?;

    if let Some(root) = &config.root_directory {
        router
            .get("/", files::serve_file(root.join("index.html")))?
            .get("/static/{file}", files::serve_dir(root.clone(), "file"))?;
    }

    Ok(router)
}
