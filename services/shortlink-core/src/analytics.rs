use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::models::{AnalyticsPeriod, ClicksOverTimeEntry, TimePoint, TopReferrerEntry};
use crate::store::Bucket;

/// How far back a period looks, and which bucket width its time series uses.
pub fn window_for(period: AnalyticsPeriod) -> (ChronoDuration, Bucket) {
    match period {
        AnalyticsPeriod::Day => (ChronoDuration::hours(24), Bucket::Hour),
        AnalyticsPeriod::Week => (ChronoDuration::days(7), Bucket::Day),
        AnalyticsPeriod::Month => (ChronoDuration::days(30), Bucket::Day),
    }
}

pub fn since_for(period: AnalyticsPeriod, now: DateTime<Utc>) -> DateTime<Utc> {
    let (window, _) = window_for(period);
    now - window
}

pub fn to_entries(points: Vec<TimePoint>) -> Vec<ClicksOverTimeEntry> {
    points
        .into_iter()
        .map(|p| ClicksOverTimeEntry {
            timestamp: p.bucket_start,
            count: p.count,
        })
        .collect()
}

pub fn to_referrer_entries(
    rows: Vec<crate::models::ReferrerCount>,
) -> Vec<TopReferrerEntry> {
    rows.into_iter()
        .map(|r| TopReferrerEntry {
            referer: r.referer,
            count: r.click_count,
        })
        .collect()
}

/// Average clicks per hour for the 24h period, per day otherwise (§6.2).
pub fn click_rate(period: AnalyticsPeriod, total_clicks: i64) -> f64 {
    let units = match period {
        AnalyticsPeriod::Day => 24.0,
        AnalyticsPeriod::Week => 7.0,
        AnalyticsPeriod::Month => 30.0,
    };
    total_clicks as f64 / units
}

/// The bucket with the highest count, or `None` if the series is empty.
pub fn peak_hour(points: &[ClicksOverTimeEntry]) -> Option<DateTime<Utc>> {
    points
        .iter()
        .max_by_key(|p| p.count)
        .map(|p| p.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_rate_divides_by_hours_for_day_period() {
        assert_eq!(click_rate(AnalyticsPeriod::Day, 240), 10.0);
    }

    #[test]
    fn click_rate_divides_by_days_for_week_and_month() {
        assert_eq!(click_rate(AnalyticsPeriod::Week, 70), 10.0);
        assert_eq!(click_rate(AnalyticsPeriod::Month, 300), 10.0);
    }

    #[test]
    fn peak_hour_picks_max_count_bucket() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let points = vec![
            ClicksOverTimeEntry {
                timestamp: now,
                count: 3,
            },
            ClicksOverTimeEntry {
                timestamp: now + ChronoDuration::hours(1),
                count: 9,
            },
        ];
        assert_eq!(peak_hour(&points), Some(now + ChronoDuration::hours(1)));
    }

    #[test]
    fn peak_hour_is_none_for_empty_series() {
        assert_eq!(peak_hour(&[]), None);
    }
}
