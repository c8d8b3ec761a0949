use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use reel_core::{Bus, MetricsHandle, RegistryBuilder, ResourcePool};
use reel_exec::{
    HttpFetcher, HttpUploader, RecordingHandler,
    engine::subprocess::{BoxRecovery, SubprocessEngine},
};
use reel_gateway::{GatewayClient, WsConnector};
use reel_model::RequestRecording;
use reel_observe::{JobLogListener, init_logger};
use reel_prometheus::PrometheusMetrics;

use crate::{args::Args, metrics};

pub async fn run(args: Args) -> anyhow::Result<()> {
    // 1) logger
    init_logger(&args.logger())?;
    info!(version = env!("CARGO_PKG_VERSION"), "reel-agentd starting");

    // 2) working directories
    let pipeline = args.pipeline();
    pipeline.validate()?;
    pipeline
        .prepare_dirs()
        .await
        .context("preparing working directories")?;

    // 3) metrics
    let prometheus = Arc::new(PrometheusMetrics::new()?);
    let metrics_handle: MetricsHandle = prometheus.clone();

    // 4) sandbox pool
    let mut recovery = BoxRecovery::default();
    if let Some(provision) = args.provision() {
        recovery = recovery.with_provision(provision);
    }
    let boxes: Vec<_> = args
        .box_names()
        .into_iter()
        .map(|name| recovery.allocate(name))
        .collect();
    if boxes.is_empty() {
        anyhow::bail!("at least one recorder box is required");
    }
    let slots = boxes.len();
    let pool = ResourcePool::builder()
        .recovery(recovery)
        .metrics(metrics_handle.clone())
        .build();
    for b in boxes {
        info!(recorder = %b, "recorder box ready");
        pool.add(b);
    }

    // 5) recording pipeline
    let engine = SubprocessEngine::new(args.engine())?;
    let fetcher = HttpFetcher::new(pipeline.download_timeout())?;
    let uploader = HttpUploader::new(args.api_token.clone(), pipeline.upload_timeout())?;
    let handler = RecordingHandler::new(pool.clone(), engine, fetcher, uploader, pipeline);

    // 6) registry + bus
    let mut registry = RegistryBuilder::new();
    registry.handler::<RequestRecording, _>(handler)?;
    JobLogListener::register(&mut registry);
    let bus = Bus::new(registry.build());

    // 7) shutdown signal
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl-c handler unavailable");
                return;
            }
            info!("shutdown requested");
            cancel.cancel();
        });
    }

    // 8) metrics endpoint
    if let Some(addr) = args.metrics_addr {
        let cancel = cancel.clone();
        let prometheus = prometheus.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, prometheus, cancel).await {
                error!(error = %e, "metrics endpoint stopped");
            }
        });
    }

    // 9) gateway loop
    let gateway = args.gateway();
    let capacity = pool.clone();
    let client = GatewayClient::new(WsConnector::from_config(&gateway), bus, slots)
        .with_config(gateway)
        .with_metrics(metrics_handle)
        .with_slot_limit(move || capacity.capacity());
    info!(slots, "pulling jobs from gateway");
    let result = client.run(cancel.clone()).await;

    cancel.cancel();
    pool.close();

    match result {
        Ok(()) => {
            info!("reel-agentd stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "gateway loop ended");
            Err(e.into())
        }
    }
}
