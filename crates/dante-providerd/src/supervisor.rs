use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
};
use dante_api::{HttpApi, TaskHandlerAdapter};
use dante_billing::{BillingApi, BillingClient, NoopBilling};
use dante_core::{ExecutorRouter, TaskHandler, TaskSink};
use dante_exec::{ContainerExecutor, ScriptExecutor, WorkspaceManager};
use dante_prometheus::PrometheusMetrics;
use dante_probe::HardwareProbe;
use dante_transport::NatsTransport;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ApiSettings, ConfigStore};

/// Wires every component, runs until a shutdown signal, then drains.
pub async fn run(store: ConfigStore) -> Result<()> {
    let cfg = store.config().clone();
    info!(target: "dante.providerd", instance_id = %cfg.instance_id, config = %store.path().display(), "provider daemon starting");

    // 1) Hardware probe
    let probe = Arc::new(HardwareProbe::new(&cfg.probe));
    let gpus = {
        let probe = Arc::clone(&probe);
        tokio::task::spawn_blocking(move || probe.detect_all())
            .await
            .context("gpu probe task failed")?
    };
    if gpus.is_empty() {
        warn!(target: "dante.providerd", "no gpus detected");
    }
    for gpu in &gpus {
        let rental = store.rentals().get(&gpu.id);
        let rentable = rental.as_ref().is_some_and(|r| r.is_available_for_rent);
        let rate = rental.and_then(|r| r.current_hourly_rate_dgpu);
        info!(
            target: "dante.providerd",
            id = %gpu.id,
            model = %gpu.model,
            vram_total_mb = ?gpu.vram_total_mb,
            rentable,
            rate = ?rate,
            "gpu detected"
        );
    }

    // 2) Billing
    let billing: Arc<dyn BillingApi> = if cfg.billing.enabled {
        Arc::new(BillingClient::new(cfg.billing()).context("billing client")?)
    } else {
        info!(target: "dante.providerd", "billing disabled; sessions are not metered");
        Arc::new(NoopBilling)
    };

    // 3) Executors, container first
    let mut router = ExecutorRouter::new();
    match ContainerExecutor::connect(cfg.executor.container()).await {
        Ok(container) => router.register(Arc::new(container)),
        Err(e) => warn!(target: "dante.providerd", error = %e, "container runtime unavailable; running script tasks only"),
    }
    router.register(Arc::new(ScriptExecutor::new(cfg.executor.script())));
    info!(target: "dante.providerd", executors = ?router.names(), "executors ready");

    // 4) Transport
    let transport = Arc::new(
        NatsTransport::connect(cfg.transport.clone(), cfg.instance_id.clone())
            .await
            .context("nats transport")?,
    );
    let publisher = Arc::new(transport.publisher());

    // 5) Task handler
    let metrics = PrometheusMetrics::new().context("prometheus registry")?;
    let handler = Arc::new(
        TaskHandler::new(
            cfg.handler(),
            router,
            WorkspaceManager::new(&cfg.workspace_dir),
            publisher.clone(),
        )
        .with_billing(billing, probe)
        .with_metrics(Arc::new(metrics.clone())),
    );

    // 6) Control API
    let api_stop = CancellationToken::new();
    let api = if cfg.api.enabled {
        Some(spawn_api(&cfg.api, Arc::clone(&handler), metrics, api_stop.clone()).await?)
    } else {
        None
    };

    // 7) Receive loop
    let stop = CancellationToken::new();
    let receive = {
        let transport = Arc::clone(&transport);
        let sink: Arc<dyn TaskSink> = handler.clone();
        let stop = stop.clone();
        let max_in_flight = cfg.max_concurrent_jobs;
        tokio::spawn(async move { transport.run(sink, max_in_flight, stop).await })
    };
    info!(target: "dante.providerd", workspace = %cfg.workspace_dir.display(), "provider daemon running");

    shutdown_signal().await;
    info!(target: "dante.providerd", active = handler.jobs().len(), "shutting down");

    stop.cancel();
    if !handler.shutdown(cfg.shutdown_timeout()).await {
        warn!(target: "dante.providerd", left = handler.jobs().len(), "active jobs did not finish before the shutdown timeout");
    }
    match tokio::time::timeout(cfg.shutdown_timeout(), receive).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(target: "dante.providerd", error = %e, "receive loop panicked"),
        Err(_) => warn!(target: "dante.providerd", "receive loop did not settle in-flight messages in time"),
    }

    api_stop.cancel();
    if let Some(api) = api {
        if let Err(e) = api.await {
            warn!(target: "dante.providerd", error = %e, "control api task failed");
        }
    }

    let unsent = publisher.flush_backlog().await;
    if unsent > 0 {
        warn!(target: "dante.providerd", unsent, "statuses left unpublished");
    }
    transport.close().await;
    info!(target: "dante.providerd", "provider daemon stopped");
    Ok(())
}

async fn spawn_api(
    settings: &ApiSettings,
    handler: Arc<TaskHandler>,
    metrics: PrometheusMetrics,
    stop: CancellationToken,
) -> Result<JoinHandle<()>> {
    let app = HttpApi::new(Arc::new(TaskHandlerAdapter::new(handler)))
        .router()
        .merge(Router::new().route("/metrics", get(render_metrics)).with_state(metrics));

    let listener = TcpListener::bind(settings.listen.as_str())
        .await
        .with_context(|| format!("bind control api on {}", settings.listen))?;
    info!(target: "dante.providerd", addr = %listener.local_addr()?, "control api listening");

    Ok(tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await;
        if let Err(e) = served {
            warn!(target: "dante.providerd", error = %e, "control api stopped with error");
        }
    }))
}

/// GET /metrics
async fn render_metrics(State(metrics): State<PrometheusMetrics>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, metrics.content_type())], metrics.render())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(target: "dante.providerd", error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(target: "dante.providerd", error = %e, "sigterm handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(target: "dante.providerd", "received SIGINT"),
        _ = term => info!(target: "dante.providerd", "received SIGTERM"),
    }
}
