//! A small demo host that exercises every capture source.
use super::setup;
use super::viewer;
use anyhow::Result;
use logtap::interceptors::{EventTarget, HostErrorEvent, RequestInfo};
use logtap::scanner::{Display, Overflow, StaticProbe, ViewNode};
use logtap::{Arg, ConsoleCore, CoreConfig, LogFilter, Severity};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;
use tracing::{info, warn};

/// Runs the demo host.
///
/// Every interceptor is installed, each one is fed a signal, and the
/// resulting history is printed, persisted and optionally exported.
pub async fn run(config: CoreConfig, filter: &LogFilter, export: Option<&Path>) -> Result<()> {
    println!("Starting demo host");

    let scan_window = config.scanner.warmup() + config.scanner.interval();
    let core = ConsoleCore::new(config)?;
    setup::configure_logging(core.tracing_layer()?)?;
    core.install_panic_hook()?;

    let (subscription, mut updates) = core.subscribe_channel();
    let watcher = tokio::spawn(async move {
        let mut last = 0;
        while let Some(snapshot) = updates.recv().await {
            last = snapshot.len();
        }
        last
    });

    info!(user = "demo", "host started");
    warn!(free_mb = 12, "disk almost full");

    let console = core.intercept_channel(|severity: Severity, args: &[Arg]| {
        eprintln!("[host console] {} {} args", severity, args.len());
    })?;
    console.info(&[Arg::text("session restored"), Arg::json(&json!({"tabs": 3}))]);
    console.error(&[Arg::text("save failed"), Arg::text("EACCES")]);

    let events = core.error_events()?;
    events.dispatch(&HostErrorEvent::resource(
        EventTarget::new("img").with_reference("https://assets.example.com/logo.png"),
    ));
    events.dispatch(
        &HostErrorEvent::exception("cannot read property 'id' of undefined")
            .at("app.js", 120, 17)
            .with_stack("at render (app.js:120:17)\nat main (app.js:4:1)"),
    );

    let rejections = core.rejections()?;
    let _ = rejections
        .spawn_detached(async { Err::<(), _>("token refresh failed".to_string()) })
        .await;

    let network = core.network()?;
    let client = tower::ServiceBuilder::new()
        .layer(network.layer())
        .service(tower::service_fn(|request: http::Request<()>| async move {
            let status = match request.uri().host() {
                Some("assets.example.com") => 404,
                _ if request.uri().path() == "/broken" => 502,
                _ => 200,
            };
            http::Response::builder().status(status).body(())
        }));
    for url in [
        "https://api.example.com/ok",
        "https://assets.example.com/missing.css",
        "https://api.example.com/broken",
    ] {
        let request = http::Request::get(url).body(())?;
        let _ = client.clone().oneshot(request).await;
    }
    let _ = network
        .observe(&RequestInfo::get("https://offline.example.com/"), async {
            Err::<u16, _>("connection refused")
        })
        .await;

    let _ = std::thread::Builder::new()
        .name("worker".into())
        .spawn(|| panic!("worker lost its state"))?
        .join();

    if core.start_scanner(Arc::new(StaticProbe::new(collapsed_layout())))? {
        tokio::time::sleep(scan_window).await;
    }

    let history = core.snapshot();
    viewer::print_history(history.iter().map(|entry| entry.as_ref()), filter);
    if let Some(path) = export {
        viewer::export_history(path, history.iter().map(|entry| entry.as_ref()))?;
    }

    core.teardown();
    subscription.unsubscribe();
    let delivered = watcher.await?;
    info!(delivered, "host stopped");
    Ok(())
}

/// A layout with a scroll container collapsed inside a flex column.
fn collapsed_layout() -> ViewNode {
    let mut root = ViewNode::new("#app");
    root.display = Display::Flex;
    root.height = 800.0;

    let mut list = ViewNode::new("#message-list");
    list.overflow_y = Overflow::Auto;
    list.scroll_height = 2400.0;
    root.with_child(list)
}
