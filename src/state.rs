//! # Application State Management
//!
//! State shared by every HTTP handler and WebSocket actor.
//!
//! ## What lives here:
//! - **config**: the current [`AppConfig`], updated at runtime by `PUT /api/v1/config`
//! - **metrics**: request counters filled in by the metrics middleware
//! - **companion**: handle on the orchestrator task (start/stop, snapshots,
//!   microphone gain)
//!
//! ## Arc<RwLock<T>> Pattern
//! Many requests read the config and metrics at once while only one writes.
//! Locks are held just long enough to copy data out, never across an
//! `.await`. A poisoned lock is recovered instead of propagating the panic:
//! the protected data is plain counters and settings that stay consistent.

use crate::companion::CompanionHandle;
use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request metrics, updated by middleware for every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// Front door to the companion orchestrator
    pub companion: CompanionHandle,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of failed requests (4xx and 5xx)
    pub error_count: u64,

    /// Avatar WebSocket feeds currently connected
    pub active_feeds: u32,

    /// Per-endpoint statistics.
    /// Key: method and route pattern (e.g. "POST /api/v1/session/start")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, companion: CompanionHandle) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            companion,
        }
    }

    /// Copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `change` to the configuration and keep the result if it validates.
    ///
    /// The whole read-modify-write runs under one write lock, and the new
    /// microphone gain reaches the capture pipeline before the lock is
    /// released, so concurrent updates neither lose each other nor leave the
    /// live gain out of step with the stored one.
    pub fn modify_config<F>(&self, change: F) -> Result<AppConfig, String>
    where
        F: FnOnce(&mut AppConfig) -> anyhow::Result<()>,
    {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);

        let mut updated = config.clone();
        change(&mut updated).map_err(|e| e.to_string())?;
        updated.validate().map_err(|e| e.to_string())?;

        self.companion.set_sensitivity(updated.audio.sensitivity);
        *config = updated.clone();
        Ok(updated)
    }

    fn with_metrics<R>(&self, f: impl FnOnce(&mut AppMetrics) -> R) -> R {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut metrics)
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    /// Record one request against its endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let endpoint_metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    pub fn feed_connected(&self) {
        self.with_metrics(|m| m.active_feeds += 1);
    }

    /// Never goes below zero.
    pub fn feed_disconnected(&self) {
        self.with_metrics(|m| m.active_feeds = m.active_feeds.saturating_sub(1));
    }

    /// Consistent copy of the metrics, taken under a single read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::output::SilentOutput;
    use crate::audio::source::VecSource;
    use crate::audio::BoxedOutput;
    use crate::companion::memory::InMemoryStore;
    use crate::companion::orchestrator::{CompanionParts, SourceFactory};
    use crate::companion::spawn_companion;
    use crate::live::protocol::SetupPayload;
    use crate::live::transport::{Connector, LiveEventSink, LiveLink};
    use tokio::sync::mpsc;

    struct NullConnector;

    impl Connector for NullConnector {
        fn connect(&self, _url: &str, _setup: SetupPayload, _events: LiveEventSink) -> LiveLink {
            let (tx, _rx) = mpsc::channel(1);
            LiveLink::new(tx, Vec::new())
        }
    }

    /// State backed by a real orchestrator with fake I/O. Needs a tokio runtime.
    pub(crate) fn test_state() -> AppState {
        let parts = CompanionParts {
            connector: Box::new(NullConnector),
            store: Box::new(InMemoryStore::default()),
            transcript_capacity: 11,
        };
        let sources: SourceFactory = Arc::new(|_| Ok(Box::new(VecSource::new(Vec::new()))));
        let (companion, _task) = spawn_companion(parts, sources, 1.0, |cb| {
            Ok(Box::new(SilentOutput::new(cb)) as BoxedOutput)
        })
        .unwrap();
        AppState::new(AppConfig::default(), companion)
    }

    #[tokio::test]
    async fn test_endpoint_metrics() {
        let state = test_state();
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_feed_counter_never_underflows() {
        let state = test_state();
        state.feed_disconnected();
        state.feed_connected();
        assert_eq!(state.get_metrics_snapshot().active_feeds, 1);
    }

    #[tokio::test]
    async fn test_modify_config_pushes_sensitivity() {
        let state = test_state();
        let updated = state
            .modify_config(|c| {
                c.audio.sensitivity = 2.0;
                Ok(())
            })
            .unwrap();

        assert_eq!(updated.audio.sensitivity, 2.0);
        assert_eq!(state.companion.sensitivity(), 2.0);
        assert_eq!(state.get_config().audio.sensitivity, 2.0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let state = test_state();
        let result = state.modify_config(|c| {
            c.audio.sensitivity = 9.0;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(state.companion.sensitivity(), 1.0);
        assert_eq!(state.get_config().audio.sensitivity, 1.0);
    }

    #[tokio::test]
    async fn test_failed_change_leaves_config_untouched() {
        let state = test_state();
        let result = state.modify_config(|c| {
            c.avatar.theme = "cyan".to_string();
            Err(anyhow::anyhow!("bad request body"))
        });
        assert_eq!(result.unwrap_err(), "bad request body");
        assert_ne!(state.get_config().avatar.theme, "cyan");
    }

    #[tokio::test]
    async fn test_concurrent_changes_are_not_lost() {
        let state = test_state();
        let start = state.get_config().avatar.animation_intensity;

        std::thread::scope(|scope| {
            for _ in 0..2 {
                let state = &state;
                scope.spawn(move || {
                    for _ in 0..100 {
                        state
                            .modify_config(|c| {
                                c.avatar.animation_intensity += 1.0;
                                Ok(())
                            })
                            .unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for i in 0..100 {
                    let sensitivity = 0.5 + (i % 10) as f32 * 0.1;
                    state
                        .modify_config(|c| {
                            c.audio.sensitivity = sensitivity;
                            Ok(())
                        })
                        .unwrap();
                }
            });
        });

        let config = state.get_config();
        assert_eq!(config.avatar.animation_intensity, start + 200.0);
        assert_eq!(config.audio.sensitivity, state.companion.sensitivity());
    }
}
