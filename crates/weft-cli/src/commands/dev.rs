//! `weft dev` command implementation.
//!
//! Builds into the output directory, serves it over HTTP and rebuilds on
//! change. Browsers connected to `/__weft/ws` are told to reload after each
//! successful build, or get the error message when a build fails.

use super::build::print_report;
use super::watch::{rebuild_on_change, spawn_watcher};
use super::{fail, ConfigArgs};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use weft_core::config::DevOverrides;
use weft_core::emit::inject_before;
use weft_core::BuildError;

const RELOAD_ROUTE: &str = "/__weft/ws";

/// Injected into every served HTML page when `dev.hot` is on.
const CLIENT_SCRIPT: &str = r"<script>
(function () {
  var proto = location.protocol === 'https:' ? 'wss://' : 'ws://';
  var ws = new WebSocket(proto + location.host + '/__weft/ws');
  ws.onmessage = function (event) {
    var msg = JSON.parse(event.data);
    if (msg.type === 'reload') location.reload();
    else if (msg.type === 'error') console.error('[weft] ' + msg.message);
  };
})();
</script>
";

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub cwd: PathBuf,
    pub config: ConfigArgs,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Host to bind to.
    pub host: Option<String>,
}

/// Message pushed to connected browsers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ReloadMessage {
    Connected,
    Reload { hash: String },
    Error { code: String, message: String },
}

impl ReloadMessage {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Shared server state.
struct DevState {
    out_dir: PathBuf,
    /// Generated HTML document, relative to `out_dir`.
    html_file: Option<String>,
    history_api_fallback: bool,
    hot: bool,
    reload_tx: broadcast::Sender<ReloadMessage>,
}

/// Run the dev server.
pub fn run(action: DevAction, json: bool) -> Result<()> {
    let mut overrides = action.config.overrides();
    if action.host.is_some() || action.port.is_some() {
        overrides.dev = Some(DevOverrides {
            host: action.host.clone(),
            port: action.port,
        });
    }
    let config = match action.config.load_with(&action.cwd, &overrides) {
        Ok(config) => Arc::new(config),
        Err(e) => fail(&BuildError::Config(e), json),
    };

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(serve(config))
}

async fn serve(config: Arc<weft_core::BuildConfig>) -> Result<()> {
    let (reload_tx, _) = broadcast::channel::<ReloadMessage>(16);

    let state = Arc::new(DevState {
        out_dir: config.out_dir(),
        html_file: config.html.enabled.then(|| config.html.filename.clone()),
        history_api_fallback: config.dev.history_api_fallback,
        hot: config.dev.hot,
        reload_tx: reload_tx.clone(),
    });

    let changes = spawn_watcher(&config)?;
    tokio::spawn(rebuild_on_change(Arc::clone(&config), changes, move |result| {
        let message = match result {
            Ok(report) => {
                print_report(&report);
                ReloadMessage::Reload { hash: report.hash }
            }
            Err(err) => {
                eprintln!("error[{}]: {err}", err.code());
                ReloadMessage::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                }
            }
        };
        // No receivers just means no browser is connected yet.
        let _ = reload_tx.send(message);
    }));

    let app = Router::new()
        .route("/", get(serve_root))
        .route(RELOAD_ROUTE, get(reload_websocket))
        .route("/*path", get(serve_path))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = bind(&config.dev.host, config.dev.port).await?;

    println!();
    println!("  Dev server running at http://{}:{}", config.dev.host, config.dev.port);
    println!("  Serving {}", config.out_dir().display());
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

/// Bind `host:port`. Host names resolve through the system resolver and each
/// address is tried in turn.
async fn bind(host: &str, port: u16) -> Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind((host, port))
        .await
        .into_diagnostic()
}

// ============================================================================
// Route Handlers
// ============================================================================

type AppState = Arc<DevState>;

async fn serve_root(State(state): State<AppState>) -> Response {
    serve_file(&state, "").await
}

async fn serve_path(State(state): State<AppState>, AxumPath(path): AxumPath<String>) -> Response {
    serve_file(&state, &path).await
}

/// Serve a file from the output directory.
///
/// Directories serve their `index.html`. With history fallback, a path
/// without an extension that matches no file serves the generated document
/// so client-side routes survive a refresh.
async fn serve_file(state: &DevState, path: &str) -> Response {
    let Some(mut file) = safe_join(&state.out_dir, path) else {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    };
    if file.is_dir() {
        file = file.join("index.html");
    }

    if !file.is_file() {
        let is_route = Path::new(path).extension().is_none();
        match &state.html_file {
            Some(html) if is_route && state.history_api_fallback => file = state.out_dir.join(html),
            _ => return (StatusCode::NOT_FOUND, format!("Not found: /{path}")).into_response(),
        }
    }

    let bytes = match tokio::fs::read(&file).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::NOT_FOUND, format!("Not found: /{path}")).into_response(),
    };

    let content_type = content_type(&file);
    if content_type.starts_with("text/html") && state.hot {
        let html = inject_before(&String::from_utf8_lossy(&bytes), "</body>", CLIENT_SCRIPT);
        return (
            [(header::CONTENT_TYPE, content_type), (header::CACHE_CONTROL, "no-cache")],
            html,
        )
            .into_response();
    }

    (
        [(header::CONTENT_TYPE, content_type), (header::CACHE_CONTROL, "no-cache")],
        bytes,
    )
        .into_response()
}

/// Join a URL path onto `root`, refusing anything that escapes it.
fn safe_join(root: &Path, path: &str) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" => "text/plain; charset=utf-8",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// WebSocket reload channel
// ============================================================================

async fn reload_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_reload_socket(socket, state))
}

async fn handle_reload_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.reload_tx.subscribe();

    if sender
        .send(Message::Text(ReloadMessage::Connected.to_json()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Ok(msg) => {
                    if sender.send(Message::Text(msg.to_json())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_rejects_escape() {
        let root = Path::new("/srv/build");
        assert_eq!(safe_join(root, "a/b.js"), Some(PathBuf::from("/srv/build/a/b.js")));
        assert_eq!(safe_join(root, ""), Some(PathBuf::from("/srv/build")));
        assert_eq!(safe_join(root, "../secret"), None);
    }

    #[test]
    fn test_reload_message_json() {
        let msg = ReloadMessage::Reload {
            hash: "abc".to_string(),
        };
        assert_eq!(msg.to_json(), r#"{"type":"reload","hash":"abc"}"#);
        assert_eq!(ReloadMessage::Connected.to_json(), r#"{"type":"connected"}"#);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("a.js")), "application/javascript");
        assert_eq!(content_type(Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_bind_accepts_host_names_and_addresses() {
        for host in ["localhost", "127.0.0.1"] {
            let listener = bind(host, 0).await.unwrap();
            assert!(listener.local_addr().unwrap().ip().is_loopback(), "{host}");
        }
    }

    #[tokio::test]
    async fn test_history_fallback_serves_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html><body></body></html>").unwrap();
        let (reload_tx, _) = broadcast::channel(1);
        let state = DevState {
            out_dir: dir.path().to_path_buf(),
            html_file: Some("index.html".to_string()),
            history_api_fallback: true,
            hot: true,
            reload_tx,
        };

        let route = serve_file(&state, "users/42").await;
        assert_eq!(route.status(), StatusCode::OK);

        let missing = serve_file(&state, "missing.js").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
