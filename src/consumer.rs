//! Stream cursor loop: pull, validate, score, route, persist, advance.
//!
//! The consumer owns a single cursor into the transaction log. Each step pulls
//! the first entry after the cursor and drives it through the pipeline. The
//! cursor moves past an entry only once the entry is finished with: persisted
//! to its partition, or deliberately skipped. A failed store write leaves the
//! cursor in place, so the next pull redelivers the same entry.

use crate::config::{AppConfig, ScoringFailurePolicy};
use crate::error::{LogError, StoreError};
use crate::feature_extractor::FeatureExtractor;
use crate::metrics::PipelineMetrics;
use crate::models::ScoringAdapter;
use crate::router::{OutcomeRouter, RoutedRecord};
use crate::store::{CursorCheckpoint, RecordStore};
use crate::stream::TransactionLog;
use crate::types::outcome::{Label, Partition, Verdict};
use crate::types::record::{LogEntry, StreamPosition};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Where the loop currently is within a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    AwaitingRecord,
    Validating,
    Scoring,
    Persisting,
    Advancing,
    Recovering,
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::AwaitingRecord => "awaiting_record",
            ConsumerState::Validating => "validating",
            ConsumerState::Scoring => "scoring",
            ConsumerState::Persisting => "persisting",
            ConsumerState::Advancing => "advancing",
            ConsumerState::Recovering => "recovering",
            ConsumerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Pipeline stage a record failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Scoring,
    Store,
}

/// Result of a single [`TransactionConsumer::step`]
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Written to a partition; cursor advanced
    Persisted {
        position: StreamPosition,
        partition: Partition,
    },
    /// Dropped without a write; cursor advanced
    Skipped {
        position: StreamPosition,
        cause: FailureKind,
    },
    /// Left for redelivery; cursor unchanged
    Deferred {
        position: StreamPosition,
        cause: FailureKind,
    },
    /// The read returned without an entry
    Idle,
    /// The log failed and the connection was re-established
    Recovered,
    /// Shutdown was requested
    Stopped,
}

/// Runtime settings for the loop
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Stream name, used as the checkpoint key
    pub stream_key: String,
    /// Wait between reconnect attempts
    pub reconnect_backoff: Duration,
    /// Wait before re-reading a deferred entry
    pub retry_delay: Duration,
    pub scoring_failure_policy: ScoringFailurePolicy,
}

impl ConsumerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            stream_key: config.redis.stream_key.clone(),
            reconnect_backoff: config.consumer.reconnect_backoff(),
            retry_delay: config.consumer.retry_delay(),
            scoring_failure_policy: config.consumer.scoring_failure_policy,
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Totals for one [`TransactionConsumer::run`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Last advanced position; the next run should resume after it
    pub resume_position: StreamPosition,
    pub persisted: u64,
    pub skipped: u64,
    pub deferred: u64,
    pub recoveries: u64,
}

/// Pick the position to start reading after.
///
/// An explicitly configured position wins, then a saved checkpoint, then the
/// beginning of the stream.
pub async fn resolve_start_position(
    configured: Option<StreamPosition>,
    checkpoint: Option<&dyn CursorCheckpoint>,
    stream_key: &str,
) -> Result<StreamPosition, StoreError> {
    if let Some(position) = configured {
        return Ok(position);
    }
    if let Some(checkpoint) = checkpoint {
        if let Some(position) = checkpoint.load(stream_key).await? {
            info!(stream = %stream_key, position = %position, "Resuming from checkpoint");
            return Ok(position);
        }
    }
    Ok(StreamPosition::BEGINNING)
}

/// Sequential consumer over a transaction log
pub struct TransactionConsumer<L> {
    log: L,
    extractor: FeatureExtractor,
    scorer: ScoringAdapter,
    router: OutcomeRouter,
    store: Arc<dyn RecordStore>,
    checkpoint: Option<Arc<dyn CursorCheckpoint>>,
    metrics: Arc<PipelineMetrics>,
    settings: ConsumerSettings,
    cursor: StreamPosition,
    /// Routed record whose write failed, kept so a redelivery reuses its token
    pending: Option<RoutedRecord>,
    state: ConsumerState,
}

impl<L: TransactionLog> TransactionConsumer<L> {
    /// Create a consumer that starts reading after `start`
    pub fn new(
        log: L,
        scorer: ScoringAdapter,
        router: OutcomeRouter,
        store: Arc<dyn RecordStore>,
        settings: ConsumerSettings,
        start: StreamPosition,
    ) -> Self {
        Self {
            log,
            extractor: FeatureExtractor::new(),
            scorer,
            router,
            store,
            checkpoint: None,
            metrics: Arc::new(PipelineMetrics::new()),
            settings,
            cursor: start,
            pending: None,
            state: ConsumerState::AwaitingRecord,
        }
    }

    /// Save the cursor after every advance
    pub fn with_checkpoint(mut self, checkpoint: Arc<dyn CursorCheckpoint>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Report into a shared metrics collector
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Last advanced position
    pub fn cursor(&self) -> StreamPosition {
        self.cursor
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Process entries until `cancel` fires
    pub async fn run(&mut self, cancel: CancellationToken) -> RunReport {
        info!(
            stream = %self.settings.stream_key,
            position = %self.cursor,
            model = %self.scorer.model_name(),
            "Listening for transactions"
        );

        let mut report = RunReport::default();
        loop {
            match self.step(&cancel).await {
                StepOutcome::Persisted { .. } => report.persisted += 1,
                StepOutcome::Skipped { .. } => report.skipped += 1,
                StepOutcome::Deferred { .. } => report.deferred += 1,
                StepOutcome::Recovered => report.recoveries += 1,
                StepOutcome::Idle => {}
                StepOutcome::Stopped => break,
            }
        }

        report.resume_position = self.cursor;
        info!(
            resume_position = %report.resume_position,
            persisted = report.persisted,
            skipped = report.skipped,
            "Consumer stopped"
        );
        report
    }

    /// Pull one entry and take it as far through the pipeline as it goes
    pub async fn step(&mut self, cancel: &CancellationToken) -> StepOutcome {
        self.transition(ConsumerState::AwaitingRecord);

        let cursor = self.cursor;
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            read = self.log.read_after(cursor) => Some(read),
        };

        let entry = match read {
            None => return self.stop(),
            Some(Ok(Some(entry))) => entry,
            Some(Ok(None)) => return StepOutcome::Idle,
            Some(Err(e)) => return self.recover(e, cancel).await,
        };

        self.metrics.record_read();
        debug!(stream_id = %entry.position, fields = entry.record.len(), "Received transaction");
        let started = Instant::now();

        let routed = match self.pending.take() {
            Some(pending) if pending.record.stream_id == entry.position => {
                info!(stream_id = %entry.position, "Retrying write of redelivered transaction");
                pending
            }
            _ => match self.classify(&entry).await {
                Ok(routed) => routed,
                Err(outcome) => return self.settle(outcome, cancel).await,
            },
        };

        self.persist(routed, started, cancel).await
    }

    /// Validate, score and route an entry
    async fn classify(&mut self, entry: &LogEntry) -> Result<RoutedRecord, StepOutcome> {
        let position = entry.position;

        self.transition(ConsumerState::Validating);
        let features = self.extractor.extract(&entry.record).map_err(|e| {
            warn!(stream_id = %position, fields = ?e.fields(), error = %e, "Invalid transaction, skipping");
            self.metrics.record_validation_failure();
            StepOutcome::Skipped {
                position,
                cause: FailureKind::Validation,
            }
        })?;

        self.transition(ConsumerState::Scoring);
        let verdict = self.scorer.score(&features).map_err(|e| {
            error!(
                stream_id = %position,
                features = ?features.as_slice(),
                error = %e,
                policy = ?self.settings.scoring_failure_policy,
                "Scoring failed"
            );
            self.metrics.record_scoring_failure();
            match self.settings.scoring_failure_policy {
                ScoringFailurePolicy::Skip => StepOutcome::Skipped {
                    position,
                    cause: FailureKind::Scoring,
                },
                ScoringFailurePolicy::Retry => StepOutcome::Deferred {
                    position,
                    cause: FailureKind::Scoring,
                },
            }
        })?;

        self.transition(ConsumerState::Persisting);
        self.router
            .route(verdict, &entry.record, position, Utc::now())
            .await
            .map_err(|e| {
                error!(stream_id = %position, error = %e, "Failed to allocate fraud token");
                self.metrics.record_store_failure();
                StepOutcome::Deferred {
                    position,
                    cause: FailureKind::Store,
                }
            })
    }

    /// Write a routed record, advancing only on success
    async fn persist(
        &mut self,
        routed: RoutedRecord,
        started: Instant,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        self.transition(ConsumerState::Persisting);
        let position = routed.record.stream_id;

        match self.store.insert(routed.partition, &routed.record).await {
            Ok(id) => {
                let verdict = Verdict {
                    label: match routed.partition {
                        Partition::Fraud => Label::Fraud,
                        Partition::Legit => Label::Legit,
                    },
                    confidence: routed.record.fraud_probability,
                };
                self.metrics.record_persisted(&verdict, started.elapsed());
                log_persisted(&routed, &verdict, &id);

                self.advance(position).await;
                StepOutcome::Persisted {
                    position,
                    partition: routed.partition,
                }
            }
            Err(e) => {
                error!(
                    stream_id = %position,
                    partition = %routed.partition,
                    error = %e,
                    "Failed to store transaction, will retry from unchanged position"
                );
                self.metrics.record_store_failure();
                self.pending = Some(routed);
                self.settle(
                    StepOutcome::Deferred {
                        position,
                        cause: FailureKind::Store,
                    },
                    cancel,
                )
                .await
            }
        }
    }

    /// Apply the cursor consequences of a failed entry
    async fn settle(&mut self, outcome: StepOutcome, cancel: &CancellationToken) -> StepOutcome {
        match &outcome {
            StepOutcome::Skipped { position, .. } => self.advance(*position).await,
            StepOutcome::Deferred { .. } => {
                let delay = self.settings.retry_delay;
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
            _ => {}
        }
        outcome
    }

    /// Move the cursor past `position` and checkpoint it
    async fn advance(&mut self, position: StreamPosition) {
        self.transition(ConsumerState::Advancing);
        if position <= self.cursor {
            return;
        }
        self.cursor = position;

        if let Some(checkpoint) = &self.checkpoint {
            if let Err(e) = checkpoint.save(&self.settings.stream_key, position).await {
                warn!(position = %position, error = %e, "Failed to save cursor checkpoint");
            }
        }
    }

    /// Reconnect to the log, retrying with a fixed backoff until it works
    async fn recover(&mut self, cause: LogError, cancel: &CancellationToken) -> StepOutcome {
        self.transition(ConsumerState::Recovering);
        self.metrics.record_log_failure();
        warn!(
            error = %cause,
            backoff_ms = self.settings.reconnect_backoff.as_millis() as u64,
            "Error reading from stream, reconnecting"
        );

        loop {
            let cancelled = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(self.settings.reconnect_backoff) => false,
            };
            if cancelled {
                return self.stop();
            }

            let reconnected = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.log.reconnect() => Some(result),
            };
            let Some(reconnected) = reconnected else {
                return self.stop();
            };

            match reconnected {
                Ok(()) => {
                    self.metrics.record_reconnect();
                    info!(position = %self.cursor, "Reconnected to stream");
                    return StepOutcome::Recovered;
                }
                Err(e) => warn!(error = %e, "Failed to reconnect to stream"),
            }
        }
    }

    fn stop(&mut self) -> StepOutcome {
        self.transition(ConsumerState::Stopped);
        StepOutcome::Stopped
    }

    fn transition(&mut self, next: ConsumerState) {
        trace!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}

fn log_persisted(routed: &RoutedRecord, verdict: &Verdict, id: &str) {
    let record = &routed.record;
    match verdict.label {
        Label::Fraud => info!(
            stream_id = %record.stream_id,
            confidence = format!("{:.2}", verdict.verdict_confidence()),
            fraud_token = record.fraud_token(),
            id = %id,
            "FRAUD transaction stored"
        ),
        Label::Legit => info!(
            stream_id = %record.stream_id,
            confidence = format!("{:.2}", verdict.verdict_confidence()),
            legit_token = record.legit_token(),
            id = %id,
            "LEGIT transaction stored"
        ),
    }

    if tracing::enabled!(tracing::Level::DEBUG) {
        match serde_json::to_string_pretty(record) {
            Ok(json) => debug!(stream_id = %record.stream_id, "Transaction details: {}", json),
            Err(e) => debug!(error = %e, "Failed to render transaction details"),
        }
    }
}
