//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use render_router::config::AppConfig;
use render_router::lifecycle::startup::{no_modules, Site};
use render_router::{HttpServer, Shutdown};
use tokio::net::TcpListener;

/// Write a small site under `root` and return a config pointing at it.
///
/// ```text
/// pages/_root.json        root element
/// pages/_layout.json      layout for every page, hoists a <title>
/// pages/index.json        "/" with a client Counter
/// pages/Counter.json      client module with a server stand-in
/// pages/nested/[id].json  static, staticPaths foo and bar
/// pages/wild/[...slug].json dynamic
/// pages/404.json          not-found page
/// public/app.css
/// ```
pub fn write_site(root: &Path) -> AppConfig {
    let pages = root.join("pages");
    let public = root.join("public");
    std::fs::create_dir_all(pages.join("nested")).unwrap();
    std::fs::create_dir_all(pages.join("wild")).unwrap();
    std::fs::create_dir_all(&public).unwrap();

    let files = [
        (
            "_root.json",
            r#"{"tree": {"tag": "div", "props": {"id": "root"}, "children": [{"slot": "children"}]}}"#,
        ),
        (
            "_layout.json",
            r#"{"tree": {"tag": "main", "children": [{"tag": "title", "children": ["Site"]}, {"slot": "children"}]}}"#,
        ),
        (
            "index.json",
            r#"{"tree": {"tag": "h1", "children": ["Home ", {"client": "Counter"}]}}"#,
        ),
        ("Counter.json", r#"{"directive": "use client", "tree": "0"}"#),
        (
            "nested/[id].json",
            r#"{"render": "static", "staticPaths": ["foo", "bar"], "tree": {"tag": "p", "children": ["Item ", {"param": "id"}]}}"#,
        ),
        (
            "wild/[...slug].json",
            r#"{"render": "dynamic", "tree": {"tag": "p", "children": ["Wild ", {"param": "slug"}]}}"#,
        ),
        ("404.json", r#"{"tree": "Not found"}"#),
    ];
    for (name, source) in files {
        std::fs::write(pages.join(name), source).unwrap();
    }
    std::fs::write(public.join("app.css"), "body { margin: 0 }").unwrap();

    let mut config = AppConfig::default();
    config.paths.pages_dir = pages;
    config.paths.public_dir = public;
    config.paths.dist_dir = root.join("dist");
    config.dev.debounce_ms = 50;
    config
}

#[allow(dead_code)]
pub fn load_site(config: AppConfig) -> Site {
    Site::load(Arc::new(config), no_modules()).unwrap()
}

/// Serve on an ephemeral port until `shutdown` fires.
pub async fn serve(server: HttpServer, shutdown: &Shutdown) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        server.run(listener, shutdown).await.unwrap();
    });
    addr
}

/// GET with an HTML accept header, like a browser navigation.
#[allow(dead_code)]
pub async fn get_html(addr: SocketAddr, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("http://{addr}{path}"))
        .header("accept", "text/html,*/*")
        .send()
        .await
        .unwrap()
}
