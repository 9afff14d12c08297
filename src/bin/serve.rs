//! Development server for the playground
//!
//! A minimal static file server. Every response carries the cross-origin
//! isolation headers; without them browsers refuse to share memory with
//! the worker.

use clap::Parser;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tiny_http::{Header, Response, Server};
use tracing::{info, warn};

const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Parser)]
#[command(name = "serve", about = "Serve the playground with cross-origin isolation")]
struct Args {
    /// Port to listen on
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory to serve
    #[arg(long, default_value = "www")]
    root: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    playbridge::logging::init();
    let args = Args::parse();

    let addr = format!("0.0.0.0:{}", args.port);
    let server = Server::http(&addr)?;

    println!("┌─────────────────────────────────────┐");
    println!("│  playground dev server              │");
    println!("├─────────────────────────────────────┤");
    println!("│  http://localhost:{:<5}             │", args.port);
    println!("└─────────────────────────────────────┘");
    info!(root = %args.root.display(), "serving");

    for request in server.incoming_requests() {
        let url_path = request.url().split('?').next().unwrap_or("/").to_string();
        let response = match resolve(&args.root, &url_path) {
            Some(path) => serve_file(&path),
            None => not_found(),
        };
        if let Err(err) = request.respond(response) {
            warn!(error = %err, url = %url_path, "respond failed");
        }
    }
    Ok(())
}

/// Map a URL path under `root`, refusing anything that climbs out of it
fn resolve(root: &Path, url_path: &str) -> Option<PathBuf> {
    let relative = match url_path.trim_start_matches('/') {
        "" => "index.html",
        other => other,
    };
    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn isolated<R: std::io::Read>(mut response: Response<R>, mime: &str) -> Response<R> {
    let headers = [
        ("Content-Type", mime),
        ("Cross-Origin-Opener-Policy", "same-origin"),
        ("Cross-Origin-Embedder-Policy", "require-corp"),
    ];
    for (name, value) in headers {
        if let Some(h) = header(name, value) {
            response.add_header(h);
        }
    }
    response
}

fn serve_file(path: &Path) -> Response<std::io::Cursor<Vec<u8>>> {
    match fs::read(path) {
        Ok(contents) => isolated(Response::from_data(contents), mime_type(path)),
        Err(_) => not_found(),
    }
}

fn not_found() -> Response<std::io::Cursor<Vec<u8>>> {
    isolated(
        Response::from_string("404 Not Found").with_status_code(404),
        "text/plain",
    )
}

fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("wasm") => "application/wasm",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
