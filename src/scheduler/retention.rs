//! Retention manager for expiring daily statistics.

use crate::db::{DbError, Store};
use crate::monitor::stats::local_date;

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Daily buckets older than this many days are purged.
pub const RETENTION_DAYS: i64 = 31;

/// Oldest date kept by a purge run on `today`.
pub fn retention_cutoff(today: NaiveDate) -> NaiveDate {
    today - ChronoDuration::days(RETENTION_DAYS)
}

/// Delete buckets dated before the cutoff, for one owner or for every site.
///
/// Returns the number of buckets removed; a second run on the same day removes nothing.
pub fn purge_daily_stats(store: &Store, owner: Option<&str>, today: NaiveDate) -> Result<usize, DbError> {
    let removed = store.delete_daily_stats_before(owner, retention_cutoff(today))?;
    if removed > 0 {
        tracing::info!(
            "Retention: removed {} daily buckets older than {}",
            removed,
            retention_cutoff(today)
        );
    }
    Ok(removed)
}

/// The first local midnight strictly after `now`.
pub fn next_local_midnight(now: DateTime<Local>) -> DateTime<Local> {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        // Midnight skipped by a DST change: fall back to one day from now.
        .unwrap_or_else(|| now + ChronoDuration::hours(24))
}

/// Manager that purges expired daily buckets at every local midnight.
pub struct RetentionManager {
    store: Arc<Store>,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the retention manager background task.
    pub fn start(&self) {
        let store = self.store.clone();
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            let mut rx = tx.subscribe();
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx);
            }

            loop {
                // Next fire time comes from the wall clock on every run.
                let now = Local::now();
                let wait = (next_local_midnight(now) - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::from_secs(60));
                tracing::debug!("RetentionManager: next purge in {:?}", wait);

                tokio::select! {
                    _ = rx.recv() => break,
                    _ = tokio::time::sleep(wait) => {
                        let today = local_date(Utc::now());
                        if let Err(e) = purge_daily_stats(&store, None, today) {
                            tracing::error!("RetentionManager: purge failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DailyBucket, NewSite, Site};
    use crate::monitor::stats::upsert_daily;
    use chrono::Timelike;
    use tempfile::TempDir;

    fn site_with_buckets(store: &Store, owner: &str, url: &str, today: NaiveDate, ages: &[i64]) -> Site {
        let mut site = store
            .add_site(
                NewSite {
                    owner: owner.to_string(),
                    name: url.to_string(),
                    url: url.to_string(),
                    description: String::new(),
                    monitoring_token: "tok".to_string(),
                },
                Utc::now(),
            )
            .unwrap();

        for age in ages {
            upsert_daily(
                &mut site.daily_stats,
                DailyBucket {
                    date: today - ChronoDuration::days(*age),
                    uptime: 100.0,
                    average_response_time: 50,
                    error_count: 0,
                    total_checks: 1,
                    visitors: 0,
                },
            );
        }
        store.save_site_state(&site).unwrap();
        site
    }

    #[test]
    fn test_retention_cutoff() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(retention_cutoff(today), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn test_purge_is_owner_scoped_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("test.db")).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();

        // upsert keeps the 30 newest, so stale dates are injected past that bound
        let mut alice = site_with_buckets(&store, "alice", "https://a.example.com", today, &[0, 1]);
        let template = alice.daily_stats[0].clone();
        let stale = |age: i64| DailyBucket {
            date: today - ChronoDuration::days(age),
            ..template.clone()
        };
        alice.daily_stats.insert(0, stale(40));
        alice.daily_stats.insert(1, stale(31));
        store.save_site_state(&alice).unwrap();

        let mut bob = site_with_buckets(&store, "bob", "https://b.example.com", today, &[0]);
        bob.daily_stats.insert(0, stale(35));
        store.save_site_state(&bob).unwrap();

        assert_eq!(purge_daily_stats(&store, Some("alice"), today).unwrap(), 1);
        assert_eq!(purge_daily_stats(&store, Some("alice"), today).unwrap(), 0);

        let kept = store.get_site(alice.id).unwrap().daily_stats;
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|b| b.date >= retention_cutoff(today)));
        assert_eq!(store.get_site(bob.id).unwrap().daily_stats.len(), 2);

        assert_eq!(purge_daily_stats(&store, None, today).unwrap(), 1);
        assert_eq!(store.get_site(bob.id).unwrap().daily_stats.len(), 1);
        assert_eq!(purge_daily_stats(&store, None, today).unwrap(), 0);
    }

    #[test]
    fn test_next_local_midnight() {
        let now = Local::now();
        let next = next_local_midnight(now);

        assert!(next > now);
        assert!(next - now <= ChronoDuration::hours(25));
        if next - now < ChronoDuration::hours(24) {
            assert_eq!(next.hour(), 0);
            assert_eq!(next.minute(), 0);
            assert_eq!(next.date_naive(), now.date_naive() + ChronoDuration::days(1));
        }
    }
}
