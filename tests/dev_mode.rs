//! `dev` mode: payloads over the worker channel and hot reload.

mod common;

use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use common::{get_html, load_site, serve, write_site};
use render_router::lifecycle::startup::dev_server;
use render_router::Shutdown;

#[tokio::test]
async fn test_dev_payloads_come_from_worker() {
    let dir = tempfile::tempdir().unwrap();
    let site = load_site(write_site(dir.path()));
    let shutdown = Shutdown::new();
    let addr = serve(dev_server(&site, &shutdown).unwrap(), &shutdown).await;

    let res = reqwest::get(format!("http://{addr}/RSC/_/_.txt")).await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["cache-control"], "no-store");
    let payload = res.text().await.unwrap();
    assert!(payload.contains("\"$M\",\"Counter\""));

    let modules: serde_json::Value = reqwest::get(format!("http://{addr}/__dev/modules"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(modules["modules"], serde_json::json!(["Counter"]));

    let res = reqwest::get(format!("http://{addr}/RSC/_/missing.txt")).await.unwrap();
    assert_eq!(res.status(), 404);

    let html = get_html(addr, "/nested/foo").await.text().await.unwrap();
    assert!(html.contains("<p>Item foo</p>"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_page_change_triggers_full_reload() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_site(dir.path());
    let pages = config.paths.pages_dir.clone();
    let site = load_site(config);
    let shutdown = Shutdown::new();
    let addr = serve(dev_server(&site, &shutdown).unwrap(), &shutdown).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/__dev/reload"))
        .await
        .unwrap();
    // Let the watcher settle before touching files.
    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(pages.join("about.json"), r#"{"tree": "About us"}"#).unwrap();

    let message = tokio::time::timeout(Duration::from_secs(10), socket.next())
        .await
        .expect("no reload within 10s")
        .unwrap()
        .unwrap();
    assert_eq!(message, Message::Text("full-reload".into()));

    let payload = reqwest::get(format!("http://{addr}/RSC/_/about.txt"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(payload.contains("About us"));

    shutdown.trigger();
}
