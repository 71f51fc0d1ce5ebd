use anyhow::{bail, Context};
use recommendation_cache::{RecommendationCache, RedisBackend};
use recommendation_engine::config::Config;
use recommendation_engine::data_source::{DataSource, InMemoryDataSource};
use recommendation_engine::jobs::RetrainScheduler;
use recommendation_engine::metrics;
use recommendation_engine::services::RecommendationEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Serve,
    Train,
    Evaluate,
}

fn parse_mode() -> anyhow::Result<Mode> {
    let mut args = std::env::args();
    let _bin = args.next();

    match args.next().as_deref() {
        None | Some("serve") => Ok(Mode::Serve),
        Some("train") => Ok(Mode::Train),
        Some("evaluate") => Ok(Mode::Evaluate),
        Some(other) => bail!("unknown mode '{}', expected serve | train | evaluate", other),
    }
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,recommendation_engine=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn build_cache(config: &Config) -> Arc<RecommendationCache> {
    let ttls = config.cache.ttls();

    if let Some(url) = &config.cache.redis_url {
        match RedisBackend::connect(url).await {
            Ok(backend) => return Arc::new(RecommendationCache::new(Arc::new(backend), ttls)),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, using in-process cache");
            }
        }
    }

    Arc::new(RecommendationCache::in_memory(ttls))
}

fn build_source(config: &Config) -> anyhow::Result<Arc<dyn DataSource>> {
    let source = match &config.service.data_file {
        Some(path) => InMemoryDataSource::from_json_file(path)
            .with_context(|| format!("failed to load data file {}", path.display()))?,
        None => {
            tracing::warn!("SERVICE_DATA_FILE not set, starting with an empty data source");
            InMemoryDataSource::default()
        }
    };
    Ok(Arc::new(source))
}

fn export_metrics(registry: &prometheus::Registry, path: Option<&PathBuf>) {
    if let Some(path) = path {
        if let Err(e) = metrics::write_textfile(registry, path) {
            tracing::warn!(error = %e, path = %path.display(), "Metrics export failed");
        }
    }
}

fn spawn_metrics_export(
    registry: prometheus::Registry,
    path: PathBuf,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            export_metrics(&registry, Some(&path));
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mode = parse_mode()?;
    let config = Config::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    tracing::info!(
        "Starting {} v{} ({:?})",
        config.service.service_name,
        env!("CARGO_PKG_VERSION"),
        mode
    );

    let registry = metrics::build_registry().context("failed to register metrics")?;
    let metrics_file = config.service.metrics_file.clone();
    let metrics_interval = Duration::from_secs(config.service.metrics_interval_secs);

    let source = build_source(&config)?;
    let cache = build_cache(&config).await;
    let scheduler_config = config.scheduler.clone();
    let engine = Arc::new(RecommendationEngine::new(config, source, cache)?);

    match mode {
        Mode::Train => {
            let outcome = engine.retrain().await;
            export_metrics(&registry, metrics_file.as_ref());
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.is_trained() {
                bail!("training did not complete");
            }
        }
        Mode::Evaluate => {
            let report = engine.get_evaluation_report().await?;
            export_metrics(&registry, metrics_file.as_ref());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Mode::Serve => {
            let bootstrap = engine.bootstrap().await;
            tracing::info!(outcome = ?bootstrap, "Bootstrap finished");

            let scheduler = RetrainScheduler::spawn(Arc::clone(&engine), scheduler_config);
            let exporter = metrics_file.clone().map(|path| {
                tracing::info!(path = %path.display(), "Exporting metrics");
                spawn_metrics_export(registry.clone(), path, metrics_interval)
            });

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received");

            scheduler.shutdown().await;
            if let Some(exporter) = exporter {
                exporter.abort();
            }
            export_metrics(&registry, metrics_file.as_ref());
            tracing::info!(stats = ?engine.get_stats(), "Recommendation engine stopped");
        }
    }

    Ok(())
}
