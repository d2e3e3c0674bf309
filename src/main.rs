//! fetch-bridge sidecar: Unix socket listener.
//!
//! Accepts newline-delimited JSON requests over a Unix domain socket, runs
//! each script in a fresh QuickJS environment whose `fetch` is served by the
//! route table, and writes back JSON responses.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use url::Url;

use fetch_bridge::config::BridgeConfig;
use fetch_bridge::protocol::{Request, Response};
use fetch_bridge::{Environment, FetchBridge, Handler, Polyfill, RequestContext, RouteTable};

/// Shared state for all connections.
struct Sidecar {
    handler: Arc<dyn Handler>,
    polyfill: Polyfill,
    base_url: Option<Url>,
    default_timeout: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BridgeConfig::from_env();

    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let routes = RouteTable::load(&config.route_dir).unwrap_or_else(|e| {
        tracing::warn!(error = %format!("{e:#}"), "failed to load routes");
        RouteTable::new()
    });
    tracing::info!(routes = routes.len(), "route table ready");

    let polyfill = match &config.polyfill_path {
        Some(path) => Polyfill::from_file(path)?,
        None => Polyfill::embedded(),
    };

    let sidecar = Arc::new(Sidecar {
        handler: Arc::new(routes),
        polyfill,
        base_url: config.base_url.clone(),
        default_timeout: Duration::from_millis(config.timeout_ms),
    });

    let socket_path = config.socket_path.clone();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .with_context(|| format!("failed to remove stale socket {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;
    tracing::info!(socket = %socket_path.display(), "listening");

    let socket_path_cleanup = socket_path.clone();
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            tracing::info!("shutting down");
            let _ = std::fs::remove_file(&socket_path_cleanup);
            std::process::exit(0);
        }
    });

    loop {
        let (stream, _addr) = listener.accept().await?;
        let sidecar = sidecar.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &sidecar).await {
                tracing::warn!(error = %e, "connection error");
            }
        });
    }
}

/// Handle a single client connection: read newline-delimited JSON requests,
/// run each one, and write back JSON responses.
async fn handle_connection(stream: tokio::net::UnixStream, sidecar: &Sidecar) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => execute(req, sidecar).await,
            Err(e) => Response::error(format!("invalid request: {e}")),
        };

        let mut out = serde_json::to_string(&response).unwrap_or_default();
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
    }

    Ok(())
}

/// Run one script in a fresh environment. The request's context is
/// cancelled once the script has finished, whatever the outcome.
async fn execute(req: Request, sidecar: &Sidecar) -> Response {
    if req.is_health_check() {
        return Response::success("ok".into());
    }

    let context = RequestContext::new();
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(sidecar.default_timeout);

    let span = tracing::info_span!("script", request_id = %req.request_id);
    let result = run_script(&req, context.clone(), sidecar, timeout)
        .instrument(span)
        .await;
    context.cancel();

    match result {
        Ok(data) => Response::success_with_data("ok".into(), data),
        Err(e) => {
            tracing::info!(error = %format!("{e:#}"), "script failed");
            Response::error(format!("{e:#}"))
        }
    }
}

async fn run_script(
    req: &Request,
    context: RequestContext,
    sidecar: &Sidecar,
    timeout: Duration,
) -> anyhow::Result<serde_json::Value> {
    let mut builder = FetchBridge::builder()
        .shared_handler(sidecar.handler.clone())
        .ambient(req.ambient(context));
    if let Some(base) = &sidecar.base_url {
        builder = builder.base_url(base.clone());
    }
    let bridge = builder.build()?;

    let polyfill = sidecar.polyfill.clone();
    let env = tokio::task::spawn_blocking(move || Environment::with_polyfill(&bridge, &polyfill))
        .await
        .context("environment setup panicked")??;

    let result = env.run(&req.script, Some(timeout)).await;

    // Stopping the loop joins its thread.
    tokio::task::spawn_blocking(move || drop(env))
        .await
        .context("environment teardown panicked")?;

    Ok(result?)
}
