//! Fraud Stream Consumer - Main Entry Point
//!
//! Reads transactions from a Redis stream, scores them with the fraud
//! classifier, and stores each verdict in MongoDB.

use anyhow::Result;
use fraud_stream_consumer::{
    config::{AppConfig, LoggingConfig},
    consumer::{resolve_start_position, ConsumerSettings, TransactionConsumer},
    feature_extractor::FeatureExtractor,
    metrics::{MetricsReporter, PipelineMetrics},
    models::{Classifier, ScoringAdapter},
    router::OutcomeRouter,
    store::{CursorCheckpoint, MongoStore},
    stream::RedisLog,
    tokens::{SequenceAllocator, TokenGenerator},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("Starting Fraud Stream Consumer");
    info!(
        stream = %config.redis.stream_key,
        database = %config.mongo.database,
        policy = ?config.consumer.scoring_failure_policy,
        checkpoint = config.consumer.checkpoint,
        "Configuration loaded successfully"
    );

    // The model loads once; without it there is nothing to do
    let classifier = load_classifier(&config)?;
    let scorer = ScoringAdapter::new(classifier);
    info!(
        model = %scorer.model_name(),
        features = ?FeatureExtractor::new().feature_names(),
        "Classifier loaded"
    );

    let log = RedisLog::connect(&config.redis).await?;

    let store = Arc::new(MongoStore::connect(&config.mongo).await?);
    store.ensure_counter(&config.mongo.fraud_counter_key).await?;

    let router = OutcomeRouter::new(
        SequenceAllocator::new(store.clone(), config.mongo.fraud_counter_key.clone()),
        TokenGenerator::new(),
    );

    let checkpoint: Option<Arc<dyn CursorCheckpoint>> = if config.consumer.checkpoint {
        Some(store.clone() as Arc<dyn CursorCheckpoint>)
    } else {
        None
    };
    let start = resolve_start_position(
        config.consumer.start_position()?,
        checkpoint.as_deref(),
        &config.redis.stream_key,
    )
    .await?;

    let metrics = Arc::new(PipelineMetrics::new());
    if config.consumer.metrics_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.consumer.metrics_interval_secs);
        tokio::spawn(reporter.start());
    }

    let mut consumer = TransactionConsumer::new(
        log,
        scorer,
        router,
        store.clone(),
        ConsumerSettings::from_config(&config),
        start,
    )
    .with_metrics(metrics.clone());
    if let Some(checkpoint) = checkpoint {
        consumer = consumer.with_checkpoint(checkpoint);
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let report = consumer.run(cancel).await;

    // Print final summary
    info!(
        resume_position = %report.resume_position,
        persisted = report.persisted,
        skipped = report.skipped,
        deferred = report.deferred,
        recoveries = report.recoveries,
        "Consumer shutting down..."
    );
    metrics.print_summary();

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG takes precedence over the configured level
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[cfg(feature = "onnx")]
fn load_classifier(config: &AppConfig) -> Result<Arc<dyn Classifier>> {
    let classifier = fraud_stream_consumer::models::OnnxClassifier::load(
        &config.model.path,
        config.model.onnx_threads,
    )?;
    Ok(Arc::new(classifier))
}

#[cfg(not(feature = "onnx"))]
fn load_classifier(config: &AppConfig) -> Result<Arc<dyn Classifier>> {
    anyhow::bail!(
        "Cannot load {}: built without the `onnx` feature",
        config.model.path
    )
}

/// Cancel `token` on Ctrl-C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    token.cancel();
}
