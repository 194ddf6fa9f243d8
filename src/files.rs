//! Static file responses.

use crate::{
    http::{request::Request, response::Response, types::StatusCode},
    router::route::Handler,
};
use std::{
    fs,
    path::{Component, Path, PathBuf},
};
use tracing::error;

/// `Content-Type` for a file, guessed from its extension.
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Loads `path` into `resp`: `200` with the file as body, or `404` with an
/// empty body when it cannot be read.
pub fn read_file_into_body<P: AsRef<Path>>(path: P, resp: &mut Response) {
    let path = path.as_ref();

    match fs::read(path) {
        Ok(bytes) => {
            resp.status(StatusCode::Ok)
                .header("Content-Type", content_type(path))
                .body(bytes);
        }
        Err(err) => {
            error!(path = %path.display(), %err, "could not open file");
            resp.status(StatusCode::NotFound).body("");
        }
    }
}

/// Builds a fresh response for the file at `path`.
///
/// ```
/// use mill_web::files;
///
/// let resp = files::file_response("does/not/exist.html");
/// assert_eq!(resp.status_code(), 404);
/// ```
pub fn file_response<P: AsRef<Path>>(path: P) -> Response {
    let mut resp = Response::new();
    read_file_into_body(path, &mut resp);
    resp
}

/// Handler answering every request with the file at `path`.
pub fn serve_file<P: Into<PathBuf>>(path: P) -> impl Handler {
    let path = path.into();
    move |_: &Request, resp: &mut Response| read_file_into_body(&path, resp)
}

/// Handler serving files below `root`, named by the `{param}` route parameter.
///
/// Paths leaving `root` (`..`, absolute paths) answer `404`.
///
/// ```
/// use mill_web::{files, Router};
///
/// let mut router = Router::new();
/// router.get("/static/{file}", files::serve_dir("./public", "file")).unwrap();
/// ```
pub fn serve_dir<P: Into<PathBuf>>(root: P, param: &'static str) -> impl Handler {
    let root = root.into();

    move |req: &Request, resp: &mut Response| match req.param(param).and_then(|name| map_path(&root, name)) {
        Some(path) => read_file_into_body(path, resp),
        None => {
            resp.status(StatusCode::NotFound).body("");
        }
    }
}

fn map_path(root: &Path, name: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(name).ok()?;
    let mut path = root.to_path_buf();

    for component in Path::new(decoded.as_ref()).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}
