use chrono::{DateTime, Utc};

/// Resume point for a push feed.
///
/// A feed delivers rows created strictly after `since`. The cursor starts
/// shortly before the room was opened and only ever moves forward, so a
/// resubscription after a dropped connection picks up where the last
/// delivered row left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionCursor {
    since: DateTime<Utc>,
}

impl SubscriptionCursor {
    /// Start `lookback` before the local clock.
    pub fn looking_back(lookback: std::time::Duration) -> Self {
        let lookback = chrono::Duration::from_std(lookback).unwrap_or(chrono::Duration::zero());
        Self::at(Utc::now() - lookback)
    }

    pub fn at(since: DateTime<Utc>) -> Self {
        Self { since }
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    /// Move past a delivered row. Returns false for rows at or before the
    /// cursor, which a replay may redeliver.
    pub fn advance(&mut self, seen: DateTime<Utc>) -> bool {
        if seen <= self.since {
            return false;
        }
        self.since = seen;
        true
    }
}
