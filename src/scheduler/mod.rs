//! Scheduler module for periodic fleet sweeps and retention.

mod retention;

pub use retention::*;

use crate::config::MonitorConfig;
use crate::db::{DbError, Store};
use crate::monitor::Monitor;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

/// Outcome counts of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub failed: usize,
}

/// Runs periodic sweeps of every registered site.
pub struct Scheduler {
    store: Arc<Store>,
    monitor: Arc<Monitor>,
    check_interval: Duration,
    settle_delay: Duration,
    semaphore: Arc<Semaphore>,
    retention_manager: Arc<RetentionManager>,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl Scheduler {
    /// Create a new scheduler with the given store and pipeline.
    pub fn new(store: Arc<Store>, monitor: Arc<Monitor>, config: &MonitorConfig) -> Self {
        let retention_manager = Arc::new(RetentionManager::new(store.clone()));

        Self {
            store,
            monitor,
            check_interval: config.check_interval,
            settle_delay: config.settle_delay,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_probes.max(1))),
            retention_manager,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the sweep loop and the retention manager.
    ///
    /// The first sweep runs after the settle delay. A sweep still running when the
    /// next tick is due causes that tick to be skipped, never an overlapping sweep.
    pub async fn start(self: &Arc<Self>) {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        let mut rx = tx.subscribe();
        *self.stop.lock().await = Some(tx);

        tracing::info!(
            "Starting scheduler: first sweep in {:?}, then every {:?}",
            self.settle_delay,
            self.check_interval
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(Instant::now() + scheduler.settle_delay, scheduler.check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        match scheduler.sweep().await {
                            Ok(summary) => tracing::info!(
                                "Sweep finished: {} sites checked, {} failed",
                                summary.checked,
                                summary.failed
                            ),
                            Err(e) => tracing::error!("Sweep aborted: {}", e),
                        }
                    }
                }
            }
        });

        self.retention_manager.start();
    }

    /// Stop the sweep loop and the retention manager.
    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().await.as_ref() {
            let _ = tx.send(());
        }
        self.retention_manager.stop().await;
    }

    /// Check every site once with bounded concurrency.
    ///
    /// A failing or panicking check marks only its own site down.
    pub async fn sweep(&self) -> Result<SweepSummary, DbError> {
        let site_ids = self.store.get_site_ids()?;
        let mut summary = SweepSummary::default();
        let mut tasks = JoinSet::new();

        for site_id in site_ids {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let monitor = self.monitor.clone();

            tasks.spawn(async move {
                let _permit = permit;
                // Inner task so a panic surfaces as a JoinError tied to this site.
                let outcome = tokio::spawn(async move { monitor.check_site(site_id).await }).await;
                (site_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (site_id, outcome) = match joined {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!("Sweep task failed: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };

            let cause = match outcome {
                Ok(Ok(_)) => {
                    summary.checked += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("check aborted: {}", e),
            };

            summary.failed += 1;
            tracing::error!("Check of site {} failed: {}", site_id, cause);
            if let Err(e) = self.monitor.record_failure(site_id, &cause).await {
                tracing::error!("Could not record failure for site {}: {}", site_id, e);
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewSite, Severity, SiteStatus};
    use crate::notify::{AlertDispatcher, WebhookSender};
    use chrono::Utc;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn setup(config: &MonitorConfig) -> (TempDir, Arc<Store>, Arc<Scheduler>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("test.db")).unwrap());
        let dispatcher = Arc::new(AlertDispatcher::new(
            store.clone(),
            WebhookSender::new(Duration::from_secs(1)).unwrap(),
            None,
        ));
        let monitor = Arc::new(Monitor::new(store.clone(), config, dispatcher).unwrap());
        let scheduler = Arc::new(Scheduler::new(store.clone(), monitor, config));
        (dir, store, scheduler)
    }

    fn add_site(store: &Store, url: String) -> i64 {
        store
            .add_site(
                NewSite {
                    owner: "alice".to_string(),
                    name: url.clone(),
                    url,
                    description: String::new(),
                    monitoring_token: "tok".to_string(),
                },
                Utc::now(),
            )
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_sweep_checks_every_site() {
        let config = MonitorConfig {
            probe_timeout: Duration::from_secs(2),
            max_concurrent_probes: 2,
            ..Default::default()
        };
        let (_dir, store, scheduler) = setup(&config);

        let healthy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&healthy)
            .await;

        let up = add_site(&store, healthy.uri());
        let down = add_site(&store, "http://127.0.0.1:1".to_string());
        let also_up = add_site(&store, format!("{}/", healthy.uri()));

        let summary = scheduler.sweep().await.unwrap();
        assert_eq!(summary, SweepSummary { checked: 3, failed: 0 });

        assert_eq!(store.get_site(up).unwrap().status, SiteStatus::Up);
        assert_eq!(store.get_site(also_up).unwrap().status, SiteStatus::Up);

        let unreachable = store.get_site(down).unwrap();
        assert_eq!(unreachable.status, SiteStatus::Down);
        assert!(unreachable.status_history[0].error.is_some());
    }

    #[tokio::test]
    async fn test_failing_check_marks_only_its_site_down() {
        let config = MonitorConfig {
            probe_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let (dir, store, scheduler) = setup(&config);

        let healthy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&healthy)
            .await;

        let broken = add_site(&store, healthy.uri());
        let good = add_site(&store, format!("{}/ok", healthy.uri()));

        // Saving a successful check of `broken` fails; a failure entry carries an error and succeeds.
        let conn = rusqlite::Connection::open(dir.path().join("test.db")).unwrap();
        conn.execute_batch(&format!(
            "CREATE TRIGGER fail_saves BEFORE INSERT ON status_history \
             WHEN NEW.site_id = {} AND NEW.error IS NULL \
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
            broken
        ))
        .unwrap();
        drop(conn);

        let summary = scheduler.sweep().await.unwrap();
        assert_eq!(summary, SweepSummary { checked: 1, failed: 1 });

        let failed = store.get_site(broken).unwrap();
        assert_eq!(failed.status, SiteStatus::Down);
        let error = failed.status_history[0].error.clone().unwrap();
        assert!(error.contains("injected"), "{}", error);

        let alerts = store.get_alerts(broken).unwrap();
        assert!(alerts
            .iter()
            .any(|a| a.severity == Severity::Critical && a.message.starts_with("Check failed:")));

        assert_eq!(store.get_site(good).unwrap().status, SiteStatus::Up);
        assert!(store.get_alerts(good).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_with_no_sites() {
        let (_dir, _store, scheduler) = setup(&MonitorConfig::default());
        assert_eq!(scheduler.sweep().await.unwrap(), SweepSummary::default());
    }

    #[tokio::test]
    async fn test_start_runs_first_sweep_after_settle_delay() {
        let config = MonitorConfig {
            settle_delay: Duration::from_millis(10),
            check_interval: Duration::from_secs(3600),
            probe_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let (_dir, store, scheduler) = setup(&config);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let id = add_site(&store, server.uri());

        scheduler.start().await;
        for _ in 0..50 {
            if store.get_site(id).unwrap().status != SiteStatus::Pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        scheduler.stop().await;

        assert_eq!(store.get_site(id).unwrap().status, SiteStatus::Up);
    }
}
