use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Far enough ahead to never fire, matching tokio's own far-future deadline
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Interval whose first tick arrives one `period` after the call
///
/// Ticks that fall behind are skipped rather than bunched up. A period too
/// large to add to the current instant never ticks instead of panicking.
pub fn periodic(period: Duration) -> Interval {
    let now = Instant::now();
    let start = now
        .checked_add(period)
        .unwrap_or_else(|| now + FAR_FUTURE);
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
