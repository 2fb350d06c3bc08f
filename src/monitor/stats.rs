//! Rolling-window statistics and daily roll-ups.

use crate::db::{
    DailyBucket, HistoryEntry, Overview, OverviewDay, Site, SiteStatus, DAILY_STATS_LIMIT, HISTORY_LIMIT,
};

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};

/// Calendar date of a timestamp in the server's local time zone.
pub fn local_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Local).date_naive()
}

/// Append an entry and evict the oldest ones beyond the history limit.
pub fn push_history(history: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    history.push(entry);
    if history.len() > HISTORY_LIMIT {
        let excess = history.len() - HISTORY_LIMIT;
        history.drain(..excess);
    }
}

/// The most recent entries used for uptime and latency.
pub fn rolling_window(history: &[HistoryEntry]) -> &[HistoryEntry] {
    &history[history.len().saturating_sub(HISTORY_LIMIT)..]
}

/// Percentage of up entries in the rolling window; 100 when empty.
pub fn uptime(history: &[HistoryEntry]) -> f64 {
    let window = rolling_window(history);
    if window.is_empty() {
        return 100.0;
    }
    let up = window.iter().filter(|e| e.status == SiteStatus::Up).count();
    100.0 * up as f64 / window.len() as f64
}

/// Mean response time of up entries in the rolling window; 0 when there are none.
pub fn average_response_time(history: &[HistoryEntry]) -> f64 {
    mean_up_latency(rolling_window(history).iter()).unwrap_or(0.0)
}

fn mean_up_latency<'a>(entries: impl Iterator<Item = &'a HistoryEntry>) -> Option<f64> {
    let (sum, count) = entries
        .filter(|e| e.status == SiteStatus::Up)
        .fold((0i64, 0i64), |(sum, count), e| (sum + e.response_time, count + 1));
    (count > 0).then(|| sum as f64 / count as f64)
}

/// Aggregate every history entry that falls on `date`.
pub fn rollup_day(history: &[HistoryEntry], date: NaiveDate) -> DailyBucket {
    let day: Vec<&HistoryEntry> = history
        .iter()
        .filter(|e| local_date(e.timestamp) == date)
        .collect();

    let total = day.len() as i64;
    let up = day.iter().filter(|e| e.status == SiteStatus::Up).count() as i64;

    DailyBucket {
        date,
        uptime: if total > 0 { 100.0 * up as f64 / total as f64 } else { 100.0 },
        average_response_time: mean_up_latency(day.iter().copied())
            .map(|avg| avg.round() as i64)
            .unwrap_or(0),
        error_count: day.iter().filter(|e| e.status == SiteStatus::Down).count() as i64,
        total_checks: total,
        visitors: day.iter().map(|e| e.visitors).sum(),
    }
}

/// Insert or replace the bucket for its date, keep buckets sorted and bounded.
pub fn upsert_daily(daily: &mut Vec<DailyBucket>, bucket: DailyBucket) {
    match daily.iter_mut().find(|b| b.date == bucket.date) {
        Some(existing) => *existing = bucket,
        None => daily.push(bucket),
    }

    daily.sort_by_key(|b| b.date);
    if daily.len() > DAILY_STATS_LIMIT {
        let excess = daily.len() - DAILY_STATS_LIMIT;
        daily.drain(..excess);
    }
}

/// Recompute the derived fields of a site from its history.
pub fn refresh(site: &mut Site, today: NaiveDate) {
    site.uptime = uptime(&site.status_history);
    site.average_response_time = average_response_time(&site.status_history);
    let bucket = rollup_day(&site.status_history, today);
    upsert_daily(&mut site.daily_stats, bucket);
}

/// Append an entry to a site's history and recompute its stats.
pub fn record_entry(site: &mut Site, entry: HistoryEntry, today: NaiveDate) {
    push_history(&mut site.status_history, entry);
    refresh(site, today);
}

/// Fleet summary over the last 30 days.
pub fn overview(sites: &[Site], today: NaiveDate) -> Overview {
    let count = sites.len();
    let mut summary = Overview {
        total_sites: count,
        sites_up: sites.iter().filter(|s| s.status == SiteStatus::Up).count(),
        sites_down: sites.iter().filter(|s| s.status == SiteStatus::Down).count(),
        average_uptime: 0.0,
        total_errors: 0,
        daily_stats: Vec::new(),
    };

    if count == 0 {
        return summary;
    }

    summary.average_uptime = sites.iter().map(|s| s.uptime).sum::<f64>() / count as f64;

    let first = today - Duration::days(DAILY_STATS_LIMIT as i64);
    summary.daily_stats = first
        .iter_days()
        .take_while(|d| *d <= today)
        .map(|date| {
            let mut day = OverviewDay {
                date,
                uptime: 0.0,
                average_response_time: 0.0,
                error_count: 0,
                total_checks: 0,
            };
            for bucket in sites.iter().flat_map(|s| s.daily_stats.iter().filter(|b| b.date == date)) {
                day.uptime += bucket.uptime;
                day.average_response_time += bucket.average_response_time as f64;
                day.error_count += bucket.error_count;
                day.total_checks += bucket.total_checks;
            }
            day.uptime /= count as f64;
            day.average_response_time /= count as f64;
            day
        })
        .collect();

    summary.total_errors = summary.daily_stats.iter().map(|d| d.error_count).sum();
    summary
}
