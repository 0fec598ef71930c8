//! Background scheduler for unattended mail ingestion
//!
//! Runs the ingestion cycle on a fixed wall-clock interval, configured via
//! environment variables:
//!
//! - `CHECK_INTERVAL_MINUTES`: Minutes between cycles (default: 10, 0 disables)
//!
//! Cycles are fully sequential. A failed cycle is logged and the loop moves
//! on to the next tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use expenseflow_core::pipeline::{CycleSummary, IngestionPipeline};

/// Default minutes between ingestion cycles
pub const DEFAULT_INTERVAL_MINUTES: u64 = 10;

/// Configuration for scheduled ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionScheduleConfig {
    /// Interval between cycles in minutes
    pub interval_minutes: u64,
}

impl Default for IngestionScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
        }
    }
}

impl IngestionScheduleConfig {
    /// Parse configuration from environment variables
    ///
    /// Returns None if scheduling is disabled (CHECK_INTERVAL_MINUTES=0)
    pub fn from_env() -> Option<Self> {
        Self::from_value(std::env::var("CHECK_INTERVAL_MINUTES").ok().as_deref())
    }

    fn from_value(value: Option<&str>) -> Option<Self> {
        let interval_minutes = match value {
            None => DEFAULT_INTERVAL_MINUTES,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(minutes) => minutes,
                Err(_) => {
                    warn!(
                        value = %raw,
                        "Invalid CHECK_INTERVAL_MINUTES, using default of {}",
                        DEFAULT_INTERVAL_MINUTES
                    );
                    DEFAULT_INTERVAL_MINUTES
                }
            },
        };

        if interval_minutes == 0 {
            warn!("CHECK_INTERVAL_MINUTES is 0, scheduled ingestion disabled");
            return None;
        }

        Some(Self { interval_minutes })
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// Run one cycle from the stored watermark and log the outcome
///
/// Errors are returned to the caller after being logged and audited.
pub async fn run_scheduled_cycle(pipeline: &IngestionPipeline) -> anyhow::Result<CycleSummary> {
    info!("Running scheduled ingestion cycle...");

    let db = pipeline.gateway().db();
    match pipeline.run_once().await {
        Ok(summary) => {
            info!(
                saved = summary.saved,
                duplicates = summary.duplicates,
                failed = summary.failed,
                source_errors = summary.source_errors(),
                "Ingestion cycle completed"
            );

            // Log to audit (as "scheduler" actor)
            if let Err(e) = db.log_audit(
                "scheduler",
                "ingest",
                Some("expense"),
                None,
                Some(&format!(
                    "saved={}, duplicates={}, failed={}, source_errors={}",
                    summary.saved,
                    summary.duplicates,
                    summary.failed,
                    summary.source_errors()
                )),
            ) {
                warn!("Failed to log ingestion cycle to audit: {}", e);
            }

            Ok(summary)
        }
        Err(e) => {
            error!(error = %e, "Ingestion cycle failed");
            if let Err(audit_err) = db.log_audit(
                "scheduler",
                "ingest_failed",
                Some("expense"),
                None,
                Some(&e.to_string()),
            ) {
                warn!("Failed to log ingestion failure to audit: {}", audit_err);
            }
            Err(e.into())
        }
    }
}

/// Run cycles on the configured interval until `shutdown` resolves
///
/// The first cycle runs immediately.
pub async fn run_ingestion_loop<F>(
    pipeline: Arc<IngestionPipeline>,
    config: IngestionScheduleConfig,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let mut ticker = interval(config.period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Ingestion loop stopping");
                break;
            }
            _ = ticker.tick() => {
                // Failures are already logged; the next tick retries
                let _ = run_scheduled_cycle(&pipeline).await;
            }
        }
    }
}

/// Start the ingestion scheduler as a background task
pub fn start_ingestion_scheduler(
    pipeline: Arc<IngestionPipeline>,
    config: IngestionScheduleConfig,
) -> JoinHandle<()> {
    info!(
        monitors = ?pipeline.monitor_names(),
        "Starting ingestion scheduler: every {} minutes",
        config.interval_minutes
    );

    tokio::spawn(run_ingestion_loop(
        pipeline,
        config,
        std::future::pending::<()>(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use expenseflow_core::ai::{AIClient, Extractor, MockBackend};
    use expenseflow_core::db::Database;
    use expenseflow_core::gateway::PersistenceGateway;
    use expenseflow_core::prompts::PromptLibrary;

    fn empty_pipeline(db: &Database) -> IngestionPipeline {
        IngestionPipeline::new(
            Extractor::with_prompts(
                AIClient::mock(MockBackend::new()),
                PromptLibrary::embedded_only(),
            ),
            PersistenceGateway::new(db.clone()),
        )
    }

    #[test]
    fn test_config_defaults_to_ten_minutes() {
        let config = IngestionScheduleConfig::from_value(None).unwrap();
        assert_eq!(config.interval_minutes, 10);
        assert_eq!(config.period(), Duration::from_secs(600));
    }

    #[test]
    fn test_config_zero_disables() {
        assert!(IngestionScheduleConfig::from_value(Some("0")).is_none());
    }

    #[test]
    fn test_config_parses_value() {
        let config = IngestionScheduleConfig::from_value(Some(" 15 ")).unwrap();
        assert_eq!(config.interval_minutes, 15);
    }

    #[test]
    fn test_config_invalid_falls_back_to_default() {
        let config = IngestionScheduleConfig::from_value(Some("often")).unwrap();
        assert_eq!(config.interval_minutes, DEFAULT_INTERVAL_MINUTES);
    }

    #[tokio::test]
    async fn test_scheduled_cycle_is_audited() {
        let db = Database::in_memory().unwrap();
        let pipeline = empty_pipeline(&db);

        let summary = run_scheduled_cycle(&pipeline).await.unwrap();
        assert_eq!(summary.saved, 0);

        let entries = db.list_audit_log(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor, "scheduler");
        assert_eq!(entries[0].action, "ingest");
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let db = Database::in_memory().unwrap();
        let pipeline = Arc::new(empty_pipeline(&db));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(run_ingestion_loop(
            pipeline,
            IngestionScheduleConfig::default(),
            async {
                let _ = rx.await;
            },
        ));

        // The first tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop")
            .unwrap();

        assert!(!db.list_audit_log(10).unwrap().is_empty());
    }
}
