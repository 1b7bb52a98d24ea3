//! Quota windows and entries.
//!
//! A [`QuotaEntry`] caps `used_seconds` for one `(owner, provider, variant,
//! window_type)` key over the half-open interval `[window_start,
//! window_end)`. Day and month windows roll over at UTC boundaries; `total`
//! windows never do. The window math here is pure; the authoritative
//! counters live in the store crate.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Owner sentinel for the shared (non-per-user) quota layer.
pub const GLOBAL_OWNER: &str = "global";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Window types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    Day,
    Month,
    Total,
}

impl WindowType {
    pub fn as_str(self) -> &'static str {
        match self {
            WindowType::Day => "day",
            WindowType::Month => "month",
            WindowType::Total => "total",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Self::Day),
            "month" => Some(Self::Month),
            "total" => Some(Self::Total),
            _ => None,
        }
    }

    /// Compute the window containing `now`.
    ///
    /// Day windows span `[00:00 UTC, next 00:00 UTC)`; month windows span
    /// the calendar month; `total` spans effectively forever.
    pub fn window_containing(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            WindowType::Day => {
                let start = now
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight is always valid")
                    .and_utc();
                (start, start + chrono::Duration::days(1))
            }
            WindowType::Month => {
                let start = Utc
                    .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
                    .single()
                    .expect("first of month is always valid");
                let (ny, nm) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                let end = Utc
                    .with_ymd_and_hms(ny, nm, 1, 0, 0, 0)
                    .single()
                    .expect("first of month is always valid");
                (start, end)
            }
            WindowType::Total => {
                let start = Utc
                    .with_ymd_and_hms(1970, 1, 1, 0, 0, 0)
                    .single()
                    .expect("epoch is always valid");
                let end = Utc
                    .with_ymd_and_hms(9999, 1, 1, 0, 0, 0)
                    .single()
                    .expect("far future is always valid");
                (start, end)
            }
        }
    }
}

impl std::fmt::Display for WindowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quota entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaState {
    Active,
    Exhausted,
}

impl QuotaState {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaState::Active => "active",
            QuotaState::Exhausted => "exhausted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "exhausted" => Some(Self::Exhausted),
            _ => None,
        }
    }
}

/// Cap and usage for one `(owner, provider, variant, window_type)` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaEntry {
    pub owner: String,
    pub provider: String,
    pub variant: String,
    pub window_type: WindowType,
    pub window_start: DateTime<Utc>,
    /// Exclusive upper bound.
    pub window_end: DateTime<Utc>,
    pub quota_seconds: i64,
    pub used_seconds: i64,
    pub status: QuotaState,
}

impl QuotaEntry {
    /// Whether `now` falls inside `[window_start, window_end)`.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_start && now < self.window_end
    }

    /// Whether this entry is eligible for rollover at `now`.
    /// `total` windows never roll.
    pub fn needs_rollover(&self, now: DateTime<Utc>) -> bool {
        self.window_type != WindowType::Total && now >= self.window_end
    }

    /// Remaining fraction of the cap in `[0,1]`.
    pub fn remaining_fraction(&self) -> f64 {
        if self.quota_seconds <= 0 {
            return 0.0;
        }
        let remaining = (self.quota_seconds - self.used_seconds).max(0);
        remaining as f64 / self.quota_seconds as f64
    }

    /// An entry is usable iff it is inside its window and under its cap.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.window_contains(now)
            && self.status == QuotaState::Active
            && self.used_seconds < self.quota_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).single().unwrap()
    }

    fn entry(window_type: WindowType, now: DateTime<Utc>, quota: i64, used: i64) -> QuotaEntry {
        let (start, end) = window_type.window_containing(now);
        QuotaEntry {
            owner: GLOBAL_OWNER.into(),
            provider: "prov".into(),
            variant: "file".into(),
            window_type,
            window_start: start,
            window_end: end,
            quota_seconds: quota,
            used_seconds: used,
            status: if used >= quota {
                QuotaState::Exhausted
            } else {
                QuotaState::Active
            },
        }
    }

    // ── window math ───────────────────────────────────────────────

    #[test]
    fn day_window_spans_utc_midnights() {
        let now = at(2026, 3, 15, 13);
        let (start, end) = WindowType::Day.window_containing(now);
        assert_eq!(start, at(2026, 3, 15, 0));
        assert_eq!(end, at(2026, 3, 16, 0));
    }

    #[test]
    fn month_window_handles_december() {
        let now = at(2026, 12, 20, 5);
        let (start, end) = WindowType::Month.window_containing(now);
        assert_eq!(start, at(2026, 12, 1, 0));
        assert_eq!(end, at(2027, 1, 1, 0));
    }

    #[test]
    fn total_window_never_rolls_over() {
        let e = entry(WindowType::Total, at(2026, 6, 1, 0), 100, 0);
        assert!(!e.needs_rollover(at(2500, 1, 1, 0)));
    }

    #[test]
    fn rollover_triggers_exactly_at_window_end() {
        let e = entry(WindowType::Day, at(2026, 3, 15, 13), 100, 50);
        assert!(!e.needs_rollover(at(2026, 3, 15, 23)));
        // now == window_end is already outside the half-open interval.
        assert!(e.needs_rollover(at(2026, 3, 16, 0)));
    }

    // ── availability ──────────────────────────────────────────────

    #[test]
    fn exactly_at_cap_is_unavailable() {
        let now = at(2026, 3, 15, 13);
        let e = entry(WindowType::Day, now, 60, 60);
        assert_eq!(e.status, QuotaState::Exhausted);
        assert!(!e.is_available(now));
    }

    #[test]
    fn under_cap_inside_window_is_available() {
        let now = at(2026, 3, 15, 13);
        let e = entry(WindowType::Day, now, 60, 59);
        assert!(e.is_available(now));
    }

    #[test]
    fn remaining_fraction_bounds() {
        let now = at(2026, 3, 15, 13);
        assert_eq!(entry(WindowType::Day, now, 100, 0).remaining_fraction(), 1.0);
        assert_eq!(entry(WindowType::Day, now, 100, 100).remaining_fraction(), 0.0);
        let half = entry(WindowType::Day, now, 100, 50).remaining_fraction();
        assert!((half - 0.5).abs() < f64::EPSILON);
        // Over-commit clamps to zero rather than going negative.
        assert_eq!(entry(WindowType::Day, now, 100, 150).remaining_fraction(), 0.0);
    }
}
