//! Market Feed Router - Entry Point
//!
//! Wires both market data sources through the failover router into
//! the broadcast fan-out. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml (or $ROUTER_CONFIG) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create shared health tracker, metrics and router
//! 4. Create fan-out and attach price sinks
//! 5. Spawn primary (WebSocket) and fallback (HTTP poll) adapters
//! 6. Spawn router evaluation + routing loops and the fan-out loop
//! 7. Spawn metrics server and health server
//! 8. Wait for SIGINT → graceful shutdown (signal→drain→close→exit)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use market_feed_router::adapters::catalog::StaticSymbolCatalog;
use market_feed_router::adapters::feeds::{FeedSupervisor, HttpPollSource, WsStreamSource};
use market_feed_router::adapters::metrics::{HealthServer, RouterMetrics};
use market_feed_router::adapters::sinks::{TickTape, TracingPriceSink};
use market_feed_router::config;
use market_feed_router::domain::health::HealthTracker;
use market_feed_router::usecases::fanout::{BroadcastFanout, SubscriptionFilter};
use market_feed_router::usecases::router::DataSourceRouter;

/// Bound on each task's exit after the shutdown signal.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
  // ── 1. Load configuration ───────────────────────────────
  let config_path = std::env::var("ROUTER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
  let config = config::loader::load_config(&config_path)
    .with_context(|| format!("Failed to load configuration from {config_path}"))?;

  // ── 2. Initialize structured JSON logging ───────────────
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
    )
    .json()
    .init();

  info!(
    name = %config.service.name,
    version = env!("CARGO_PKG_VERSION"),
    symbols = config.symbols.len(),
    primary = %config.primary.ws_url,
    fallback = %config.fallback.base_url,
    "Starting market feed router"
  );

  // ── 3. Shared state: shutdown, health, metrics, router ──
  let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
  let metrics = Arc::new(RouterMetrics::new().context("Failed to register metrics")?);
  let health = Arc::new(HealthTracker::new(config.router.stale_timeout()));
  let router = Arc::new(DataSourceRouter::from_config(
    &config.router,
    Arc::clone(&health),
    Arc::clone(&metrics),
  ));

  // ── 4. Fan-out and price sinks ──────────────────────────
  let catalog = Arc::new(StaticSymbolCatalog::from_config(&config));
  let entries = catalog.snapshot();
  let fanout = Arc::new(BroadcastFanout::new(&config.fanout, Arc::clone(&metrics)));
  fanout.register_symbols(&entries);

  let everything = SubscriptionFilter::symbols(entries.iter().map(|e| e.symbol.clone()));
  let mut sink_handles = vec![fanout.attach_sink(everything.clone(), Arc::new(TracingPriceSink))];
  if config.recorder.enabled {
    let tape = TickTape::new(&config.recorder.data_dir)
      .await
      .context("Failed to open tick tape")?;
    sink_handles.push(fanout.attach_sink(everything, Arc::new(tape)));
  }

  // ── 5. Source adapters ──────────────────────────────────
  let primary = WsStreamSource::new(config.primary.ws_url.clone());
  let fallback =
    HttpPollSource::new(&config.fallback).context("Failed to create fallback source")?;
  let supervisor = FeedSupervisor::new(
    &config,
    Arc::clone(&health),
    Arc::clone(&metrics),
    shutdown_tx.clone(),
  );
  let (inputs, feed_handles) = supervisor.spawn(primary, fallback, catalog);

  // ── 6. Router loops and fan-out ─────────────────────────
  let (output_tx, output_rx) = mpsc::channel(config.router.output_capacity);

  let evaluation_handle =
    tokio::spawn(Arc::clone(&router).run_evaluation(shutdown_tx.subscribe()));
  let routing_handle = tokio::spawn(Arc::clone(&router).run_routing(
    inputs,
    output_tx,
    shutdown_tx.subscribe(),
  ));
  let fanout_handle = tokio::spawn(Arc::clone(&fanout).run(output_rx, shutdown_tx.subscribe()));

  // ── 7. Metrics and health servers ───────────────────────
  let mut server_handles = Vec::new();
  if config.metrics.enabled {
    let metrics_server = Arc::clone(&metrics);
    let bind_address = config.metrics.bind_address.clone();
    let rx = shutdown_tx.subscribe();
    server_handles.push(tokio::spawn(async move {
      if let Err(e) = metrics_server.serve(bind_address, rx).await {
        error!(error = %e, "Metrics server failed");
      }
    }));

    let health_server = HealthServer::new(Arc::clone(&router), config.metrics.health_port);
    let rx = shutdown_tx.subscribe();
    server_handles.push(tokio::spawn(async move {
      if let Err(e) = health_server.run(rx).await {
        error!(error = %e, "Health server failed");
      }
    }));
  }

  info!("All tasks spawned, router is running");

  // ── 8. Wait for SIGINT ──────────────────────────────────
  if let Err(e) = signal::ctrl_c().await {
    warn!(error = %e, "Failed to listen for SIGINT, shutting down");
  }
  info!("SIGINT received, initiating graceful shutdown");

  // 1. Signal all tasks to stop
  let _ = shutdown_tx.send(());

  // 2. Adapters disconnect and close their queues
  await_all("feed adapter", feed_handles).await;

  // 3. Router drains queued ticks, then closes the fan-out input
  await_all("router", vec![routing_handle, evaluation_handle]).await;

  // 4. Fan-out flushes pending ticks and closes every subscriber
  await_all("fan-out", vec![fanout_handle]).await;
  await_all("price sink", sink_handles).await;
  await_all("server", server_handles).await;

  info!(final_state = %router.state(), "Shutdown complete");
  Ok(())
}

/// Wait for each task up to `TASK_SHUTDOWN_TIMEOUT`, aborting stragglers.
async fn await_all(kind: &str, handles: Vec<JoinHandle<()>>) {
  for handle in handles {
    let abort = handle.abort_handle();
    match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => warn!(task = kind, error = %e, "Task ended abnormally"),
      Err(_) => {
        warn!(task = kind, "Task did not stop in time, aborting");
        abort.abort();
      }
    }
  }
}
