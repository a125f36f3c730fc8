//! The engine: recording API, flush cycles, and lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use tokio::select;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, trace};
use whippet_config::ConfigurationError;
use whippet_transport::{Gauge, Transport};

use crate::aggregate::{self, AggregatedMetric};
use crate::buffer::SampleBuffer;
use crate::config::EngineConfiguration;
use crate::definitions::{ClientAggFunction, DefinitionRegistry};
use crate::schedule::ReadinessTracker;
use crate::time::unix_timestamp_ms;

const DEFAULT_SOURCE: &str = "default";

struct EngineState {
    registry: DefinitionRegistry,
    buffer: SampleBuffer,
    readiness: ReadinessTracker,
}

/// Client-side metric buffering and aggregation engine.
///
/// Producers record measurements through [`measure`][Self::measure] and [`increment`][Self::increment], which may be
/// called concurrently from independent callers. A fixed-cadence polling loop (started with [`start`][Self::start])
/// drives flush cycles: each cycle picks the keys whose submission period has elapsed, drains and reduces their
/// buffered samples, and hands the resulting batch to the transport.
///
/// ## Failed submissions
///
/// When the transport reports a failure, the cycle's drained samples are dropped rather than re-queued, and the
/// per-key schedules advance as if the submission had succeeded. This bounds memory during persistent outages at the
/// cost of losing the affected data points.
pub struct Engine {
    state: Mutex<EngineState>,
    flush_guard: tokio::sync::Mutex<()>,
    transport: Arc<dyn Transport>,
    default_source: String,
    name_prefix: Option<String>,
    polling_interval: Duration,
    skip_submit: bool,
    poller: Mutex<Option<oneshot::Sender<()>>>,
}

impl Engine {
    /// Creates a new `Engine` from the given configuration and transport.
    ///
    /// # Errors
    ///
    /// If a declared metric definition fails validation, or if a blacklist pattern is not a valid regular
    /// expression, an error is returned.
    pub fn from_configuration(
        config: EngineConfiguration, transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigurationError> {
        let registry = DefinitionRegistry::from_declared(&config.definitions, config.period())?;

        let mut blacklist = Vec::with_capacity(config.blacklist.len());
        for pattern in &config.blacklist {
            let compiled = Regex::new(pattern).map_err(|e| ConfigurationError::InvalidFieldValue {
                field: "blacklist".to_string(),
                reason: format!("invalid pattern '{}': {}", pattern, e),
            })?;
            blacklist.push(compiled);
        }

        if config.logging || config.logging_verbose {
            debug!("Legacy logging toggles are set; log verbosity is controlled by the tracing subscriber.");
        }

        let polling_interval = config.polling_interval();
        Ok(Self {
            state: Mutex::new(EngineState {
                registry,
                buffer: SampleBuffer::new(blacklist),
                readiness: ReadinessTracker::default(),
            }),
            flush_guard: tokio::sync::Mutex::new(()),
            transport,
            default_source: config.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            name_prefix: config.name_prefix,
            polling_interval,
            skip_submit: config.skip_submit,
            poller: Mutex::new(None),
        })
    }

    /// Records a value for an averaging-style metric.
    ///
    /// Keys that were never declared are registered with `mean` aggregation on first use. When no source is given,
    /// the definition's source override applies, then the engine-wide default.
    pub fn measure(&self, key: &str, value: f64, source: Option<&str>) {
        let now = unix_timestamp_ms();
        let mut state = self.state.lock().unwrap();

        let definition = state.registry.auto_register(key, ClientAggFunction::Mean);
        let source = source.or(definition.source()).unwrap_or(&self.default_source);
        state.buffer.record(key, value, source, now);
    }

    /// Records a value (default 1) for a counter-style metric.
    ///
    /// Keys that were never declared are registered with `sum` aggregation on first use.
    ///
    /// # Errors
    ///
    /// If the key was declared with a client aggregation function other than `sum`, an error is returned and
    /// nothing is recorded.
    pub fn increment(&self, key: &str, value: Option<f64>, source: Option<&str>) -> Result<(), ConfigurationError> {
        let now = unix_timestamp_ms();
        let mut state = self.state.lock().unwrap();

        let definition = state.registry.auto_register(key, ClientAggFunction::Sum);
        if definition.client_agg() != ClientAggFunction::Sum {
            return Err(ConfigurationError::InvalidFieldValue {
                field: format!("definitions.{}", key),
                reason: format!(
                    "attempted to increment metric with aggregation function '{}'",
                    definition.client_agg()
                ),
            });
        }

        let source = source.or(definition.source()).unwrap_or(&self.default_source);
        state.buffer.record(key, value.unwrap_or(1.0), source, now);

        Ok(())
    }

    /// Aggregates all currently buffered samples without draining them.
    ///
    /// Results are keyed by output metric name, then source. Keys with no buffered samples produce no entries.
    pub fn aggregate_all(&self) -> HashMap<String, HashMap<String, AggregatedMetric>> {
        let state = self.state.lock().unwrap();
        let per_key = aggregate::aggregate_keys(state.buffer.samples(), &state.registry);

        let mut by_name: HashMap<String, HashMap<String, AggregatedMetric>> = HashMap::new();
        for (_, by_source) in per_key {
            for (source, metrics) in by_source {
                for metric in metrics {
                    let name = metric.name().to_string();
                    by_name.entry(name).or_default().insert(source.clone(), metric);
                }
            }
        }

        by_name
    }

    /// Runs one flush cycle.
    ///
    /// Ready keys are drained and reduced, the batch is submitted, and the per-key schedules advance once the
    /// transport call settles. Transport failures are logged and contained; they never propagate to the caller.
    /// At most one flush cycle is in flight at a time.
    pub async fn flush(&self) {
        let _guard = self.flush_guard.lock().await;
        self.flush_at(unix_timestamp_ms()).await;
    }

    async fn flush_at(&self, now_ms: u64) {
        // Snapshot phase: pick the ready keys and drain their samples in one atomic step. Samples recorded for
        // these keys from here on land in fresh buffer entries and belong to the next cycle.
        let (ready_keys, batch) = {
            let mut state = self.state.lock().unwrap();

            let buffered = state.buffer.buffered_keys();
            let ready_keys = state.readiness.ready_keys(&buffered, &state.registry, now_ms);
            if ready_keys.is_empty() {
                trace!("No keys ready; skipping flush cycle.");
                return;
            }

            let drained = state.buffer.drain(&ready_keys);
            let aggregated = aggregate::aggregate_keys(&drained, &state.registry);
            let batch = self.build_batch(&aggregated);

            (ready_keys, batch)
        };

        // Submission phase: the only suspending operation in the cycle.
        if batch.is_empty() {
            debug!("Flush cycle produced an empty batch; skipping submission.");
        } else if self.skip_submit {
            debug!(gauges_len = batch.len(), "skip_submit is enabled; discarding batch.");
        } else {
            debug!(gauges_len = batch.len(), "Submitting gauges.");

            match self.transport.submit(&batch).await {
                Ok(()) => debug!(gauges_len = batch.len(), "Submitted metrics."),
                Err(e) => error!(error = %e, "Failed to submit metrics. Dropping batch."),
            }
        }

        // Bookkeeping phase: schedules advance for every included key regardless of the transport outcome.
        let state = &mut *self.state.lock().unwrap();
        state.readiness.advance(&ready_keys, &state.registry, now_ms);
    }

    fn build_batch(&self, aggregated: &aggregate::AggregatedKeys) -> Vec<Gauge> {
        let mut keys = aggregated.keys().collect::<Vec<_>>();
        keys.sort();

        let mut batch = Vec::new();
        for key in keys {
            let by_source = &aggregated[key];
            let mut sources = by_source.keys().collect::<Vec<_>>();
            sources.sort();

            for source in sources {
                for metric in &by_source[source] {
                    let name = match &self.name_prefix {
                        Some(prefix) => format!("{}.{}", prefix, metric.name()),
                        None => metric.name().to_string(),
                    };

                    batch.push(Gauge {
                        name,
                        value: metric.value(),
                        source: source.clone(),
                    });
                }
            }
        }

        batch
    }

    /// Starts the fixed-cadence polling loop that drives flush cycles.
    ///
    /// Idempotent: calling `start` on a running engine is a no-op. Must be called within a Tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut poller = self.poller.lock().unwrap();
        if poller.is_some() {
            debug!("Engine already started.");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let engine = Arc::clone(self);
        let interval = self.polling_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            debug!(interval_ms = interval.as_millis() as u64, "Polling loop started.");

            loop {
                select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => engine.flush().await,
                }
            }

            debug!("Polling loop stopped.");
        });

        *poller = Some(shutdown_tx);
    }

    /// Stops the polling loop.
    ///
    /// Idempotent. Buffered samples are neither flushed nor discarded: a subsequent [`start`][Self::start] resumes
    /// accumulation where it left off.
    pub fn stop(&self) {
        if let Some(shutdown) = self.poller.lock().unwrap().take() {
            let _ = shutdown.send(());
        }
    }
}
