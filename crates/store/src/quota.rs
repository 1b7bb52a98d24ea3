//! Quota pool persistence.
//!
//! Authoritative counters live here: per `(owner, provider, variant,
//! window_type)` rows with half-open windows. Commits are single
//! conditional `UPDATE` statements (no read-modify-write), idempotent over
//! `(task_id, attempt_id)`. Resolution is layered: a per-user row set
//! overrides the `global` set; no rows at all means uncapped.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use es_domain::error::{Error, Result};
use es_domain::quota::{QuotaEntry, QuotaState, WindowType, GLOBAL_OWNER};
use es_domain::service::AsrVariant;
use es_providers::selector::{QuotaGate, QuotaView};

use crate::{db_err, fmt_time, parse_time, DbPool};

#[derive(sqlx::FromRow)]
struct QuotaRow {
    owner: String,
    provider: String,
    variant: String,
    window_type: String,
    window_start: String,
    window_end: String,
    quota_seconds: i64,
    used_seconds: i64,
    status: String,
}

impl QuotaRow {
    fn into_entry(self) -> Result<QuotaEntry> {
        Ok(QuotaEntry {
            owner: self.owner,
            provider: self.provider,
            variant: self.variant,
            window_type: WindowType::parse(&self.window_type)
                .ok_or_else(|| Error::Database(format!("bad window_type {}", self.window_type)))?,
            window_start: parse_time(&self.window_start),
            window_end: parse_time(&self.window_end),
            quota_seconds: self.quota_seconds,
            used_seconds: self.used_seconds,
            status: QuotaState::parse(&self.status)
                .ok_or_else(|| Error::Database(format!("bad quota status {}", self.status)))?,
        })
    }
}

const COLS: &str = "owner, provider, variant, window_type, window_start, window_end, \
     quota_seconds, used_seconds, status";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Refresh / query
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Create or update an entry. `window` overrides the computed current
/// window; `reset` clears usage and reactivates.
#[allow(clippy::too_many_arguments)]
pub async fn refresh(
    pool: &DbPool,
    owner: &str,
    provider: &str,
    variant: &str,
    window_type: WindowType,
    quota_seconds: i64,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    reset: bool,
) -> Result<()> {
    let (start, end) = window.unwrap_or_else(|| window_type.window_containing(Utc::now()));

    if reset {
        sqlx::query(
            "INSERT INTO quota_entries \
             (owner, provider, variant, window_type, window_start, window_end, \
              quota_seconds, used_seconds, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, 'active') \
             ON CONFLICT(owner, provider, variant, window_type) DO UPDATE SET \
             window_start = excluded.window_start, window_end = excluded.window_end, \
             quota_seconds = excluded.quota_seconds, used_seconds = 0, status = 'active'",
        )
        .bind(owner)
        .bind(provider)
        .bind(variant)
        .bind(window_type.as_str())
        .bind(fmt_time(start))
        .bind(fmt_time(end))
        .bind(quota_seconds)
        .execute(pool)
        .await
        .map_err(db_err)?;
    } else {
        // Preserve usage; recompute exhaustion against the new cap.
        sqlx::query(
            "INSERT INTO quota_entries \
             (owner, provider, variant, window_type, window_start, window_end, \
              quota_seconds, used_seconds, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, 'active') \
             ON CONFLICT(owner, provider, variant, window_type) DO UPDATE SET \
             window_start = excluded.window_start, window_end = excluded.window_end, \
             quota_seconds = excluded.quota_seconds, \
             status = CASE WHEN used_seconds >= excluded.quota_seconds \
                      THEN 'exhausted' ELSE 'active' END",
        )
        .bind(owner)
        .bind(provider)
        .bind(variant)
        .bind(window_type.as_str())
        .bind(fmt_time(start))
        .bind(fmt_time(end))
        .bind(quota_seconds)
        .execute(pool)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

/// All entries for an owner (rollover applied), for the quota API.
pub async fn query_owner(pool: &DbPool, owner: &str) -> Result<Vec<QuotaEntry>> {
    let rows: Vec<QuotaRow> = sqlx::query_as(&format!(
        "SELECT {COLS} FROM quota_entries WHERE owner = ? \
         ORDER BY provider, variant, window_type"
    ))
    .bind(owner)
    .fetch_all(pool)
    .await
    .map_err(db_err)?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let entry = row.into_entry()?;
        entries.push(rolled_over(pool, entry, Utc::now()).await?);
    }
    Ok(entries)
}

/// Entries for one key, rollover applied.
pub async fn entries_for_key(
    pool: &DbPool,
    owner: &str,
    provider: &str,
    variant: &str,
) -> Result<Vec<QuotaEntry>> {
    let rows: Vec<QuotaRow> = sqlx::query_as(&format!(
        "SELECT {COLS} FROM quota_entries \
         WHERE owner = ? AND provider = ? AND variant = ? ORDER BY window_type"
    ))
    .bind(owner)
    .bind(provider)
    .bind(variant)
    .fetch_all(pool)
    .await
    .map_err(db_err)?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let entry = row.into_entry()?;
        entries.push(rolled_over(pool, entry, Utc::now()).await?);
    }
    Ok(entries)
}

/// Advance an expired day/month window and reset usage. The `UPDATE` is
/// conditioned on the old `window_end` so concurrent workers roll at most
/// once.
async fn rolled_over(pool: &DbPool, entry: QuotaEntry, now: DateTime<Utc>) -> Result<QuotaEntry> {
    if !entry.needs_rollover(now) {
        return Ok(entry);
    }
    let (start, end) = entry.window_type.window_containing(now);
    sqlx::query(
        "UPDATE quota_entries SET window_start = ?, window_end = ?, used_seconds = 0, \
         status = 'active' \
         WHERE owner = ? AND provider = ? AND variant = ? AND window_type = ? AND window_end = ?",
    )
    .bind(fmt_time(start))
    .bind(fmt_time(end))
    .bind(&entry.owner)
    .bind(&entry.provider)
    .bind(&entry.variant)
    .bind(entry.window_type.as_str())
    .bind(fmt_time(entry.window_end))
    .execute(pool)
    .await
    .map_err(db_err)?;

    tracing::debug!(
        owner = %entry.owner,
        provider = %entry.provider,
        variant = %entry.variant,
        window_type = %entry.window_type,
        "quota window rolled over"
    );

    Ok(QuotaEntry {
        window_start: start,
        window_end: end,
        used_seconds: 0,
        status: QuotaState::Active,
        ..entry
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Layer resolution / availability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Most specific owner layer that has rows for this key: the user, else
/// `global`, else `None` (uncapped).
pub async fn resolve_layer(
    pool: &DbPool,
    owner: &str,
    provider: &str,
    variant: &str,
) -> Result<Option<String>> {
    for candidate in [owner, GLOBAL_OWNER] {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM quota_entries WHERE owner = ? AND provider = ? AND variant = ?",
        )
        .bind(candidate)
        .bind(provider)
        .bind(variant)
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
        if count.0 > 0 {
            return Ok(Some(candidate.to_string()));
        }
    }
    Ok(None)
}

/// Availability is conjunctive over the resolved layer: every present
/// window entry must be inside its window and under its cap. No entries at
/// all means uncapped.
pub async fn check_available(
    pool: &DbPool,
    owner: &str,
    provider: &str,
    variant: &str,
) -> Result<bool> {
    let layer = match resolve_layer(pool, owner, provider, variant).await? {
        Some(layer) => layer,
        None => return Ok(true),
    };
    let now = Utc::now();
    let entries = entries_for_key(pool, &layer, provider, variant).await?;
    Ok(entries.iter().all(|e| e.is_available(now)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Atomically add consumed seconds to every entry of the resolved layer.
///
/// Idempotent over `(task_id, attempt_id)`: a retried caller that already
/// committed this attempt changes nothing. Entries that cross their cap
/// flip to `exhausted` in the same statement.
pub async fn commit(
    pool: &DbPool,
    owner: &str,
    provider: &str,
    variant: &str,
    seconds: i64,
    task_id: Uuid,
    attempt_id: Uuid,
) -> Result<()> {
    let layer = match resolve_layer(pool, owner, provider, variant).await? {
        Some(layer) => layer,
        None => return Ok(()), // uncapped key, nothing to count against
    };

    // Roll expired windows before charging them.
    let _ = entries_for_key(pool, &layer, provider, variant).await?;

    let mut tx = pool.begin().await.map_err(db_err)?;

    let ledger = sqlx::query(
        "INSERT OR IGNORE INTO quota_commits \
         (task_id, attempt_id, owner, provider, variant, seconds, committed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task_id.to_string())
    .bind(attempt_id.to_string())
    .bind(&layer)
    .bind(provider)
    .bind(variant)
    .bind(seconds)
    .bind(fmt_time(Utc::now()))
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    if ledger.rows_affected() == 0 {
        // Already committed by a previous attempt of this exact key.
        tx.commit().await.map_err(db_err)?;
        return Ok(());
    }

    sqlx::query(
        "UPDATE quota_entries SET \
         used_seconds = used_seconds + ?1, \
         status = CASE WHEN used_seconds + ?1 >= quota_seconds THEN 'exhausted' ELSE status END \
         WHERE owner = ?2 AND provider = ?3 AND variant = ?4",
    )
    .bind(seconds)
    .bind(&layer)
    .bind(provider)
    .bind(variant)
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    tx.commit().await.map_err(db_err)?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// QuotaGate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The selector's view into the quota pool.
pub struct QuotaStore {
    pool: DbPool,
}

impl QuotaStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl QuotaGate for QuotaStore {
    async fn view(
        &self,
        owner: &str,
        provider: &str,
        variant: AsrVariant,
        free_tier_seconds: i64,
    ) -> Result<QuotaView> {
        let variant = variant.as_str();
        let now = Utc::now();

        let layer = resolve_layer(&self.pool, owner, provider, variant).await?;
        let (available, remaining_fraction) = match layer {
            None => (true, 1.0),
            Some(ref layer) => {
                let entries = entries_for_key(&self.pool, layer, provider, variant).await?;
                let available = entries.iter().all(|e| e.is_available(now));
                let fraction = entries
                    .iter()
                    .map(QuotaEntry::remaining_fraction)
                    .fold(1.0_f64, f64::min);
                // A per-user allowance comfortably below its cap scores
                // full marks.
                let fraction = if layer != GLOBAL_OWNER && fraction >= 0.5 {
                    1.0
                } else {
                    fraction
                };
                (available, if available { fraction } else { 0.0 })
            }
        };

        // Free-tier burn-down is tracked by the provider's global month
        // lane when one exists.
        let free_remaining_fraction = if free_tier_seconds <= 0 {
            0.0
        } else {
            let used: Option<(i64,)> = sqlx::query_as(
                "SELECT used_seconds FROM quota_entries \
                 WHERE owner = ? AND provider = ? AND variant = ? AND window_type = 'month'",
            )
            .bind(GLOBAL_OWNER)
            .bind(provider)
            .bind(variant)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
            let used = used.map_or(0, |(u,)| u);
            ((free_tier_seconds - used) as f64 / free_tier_seconds as f64).clamp(0.0, 1.0)
        };

        Ok(QuotaView {
            available,
            remaining_fraction,
            free_remaining_fraction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_db;

    async fn seed(pool: &DbPool, owner: &str, window_type: WindowType, quota: i64, used: i64) {
        refresh(pool, owner, "prov", "file", window_type, quota, None, true)
            .await
            .unwrap();
        if used > 0 {
            commit(pool, owner, "prov", "file", used, Uuid::new_v4(), Uuid::new_v4())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn refresh_reset_clears_usage() {
        let pool = init_test_db().await.unwrap();
        seed(&pool, GLOBAL_OWNER, WindowType::Month, 36_000, 1200).await;

        refresh(
            &pool,
            GLOBAL_OWNER,
            "prov",
            "file",
            WindowType::Month,
            36_000,
            None,
            true,
        )
        .await
        .unwrap();

        let entries = query_owner(&pool, GLOBAL_OWNER).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].quota_seconds, 36_000);
        assert_eq!(entries[0].used_seconds, 0);
        assert_eq!(entries[0].status, QuotaState::Active);
    }

    #[tokio::test]
    async fn exactly_at_cap_flips_to_exhausted() {
        let pool = init_test_db().await.unwrap();
        seed(&pool, GLOBAL_OWNER, WindowType::Day, 60, 0).await;

        commit(&pool, "u1", "prov", "file", 60, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        let entries = entries_for_key(&pool, GLOBAL_OWNER, "prov", "file").await.unwrap();
        assert_eq!(entries[0].used_seconds, 60);
        assert_eq!(entries[0].status, QuotaState::Exhausted);
        assert!(!check_available(&pool, "u1", "prov", "file").await.unwrap());
    }

    #[tokio::test]
    async fn split_commits_equal_one_big_commit() {
        let pool = init_test_db().await.unwrap();
        seed(&pool, GLOBAL_OWNER, WindowType::Day, 1000, 0).await;

        commit(&pool, "u1", "prov", "file", 300, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        commit(&pool, "u1", "prov", "file", 200, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        let entries = entries_for_key(&pool, GLOBAL_OWNER, "prov", "file").await.unwrap();
        assert_eq!(entries[0].used_seconds, 500);
        assert_eq!(entries[0].status, QuotaState::Active);
    }

    #[tokio::test]
    async fn commit_is_idempotent_per_attempt() {
        let pool = init_test_db().await.unwrap();
        seed(&pool, GLOBAL_OWNER, WindowType::Day, 1000, 0).await;

        let task = Uuid::new_v4();
        let attempt = Uuid::new_v4();
        commit(&pool, "u1", "prov", "file", 120, task, attempt).await.unwrap();
        commit(&pool, "u1", "prov", "file", 120, task, attempt).await.unwrap();

        let entries = entries_for_key(&pool, GLOBAL_OWNER, "prov", "file").await.unwrap();
        assert_eq!(entries[0].used_seconds, 120);
    }

    #[tokio::test]
    async fn expired_window_rolls_over_and_reactivates() {
        let pool = init_test_db().await.unwrap();
        // Seed an exhausted entry whose window ended yesterday.
        let start = Utc::now() - chrono::Duration::days(2);
        let end = Utc::now() - chrono::Duration::days(1);
        refresh(
            &pool,
            GLOBAL_OWNER,
            "prov",
            "file",
            WindowType::Day,
            60,
            Some((start, end)),
            true,
        )
        .await
        .unwrap();
        commit(&pool, "u1", "prov", "file", 60, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        // Any read rolls the window forward and clears usage.
        let entries = entries_for_key(&pool, GLOBAL_OWNER, "prov", "file").await.unwrap();
        assert_eq!(entries[0].used_seconds, 0);
        assert_eq!(entries[0].status, QuotaState::Active);
        assert!(entries[0].window_contains(Utc::now()));
        assert!(check_available(&pool, "u1", "prov", "file").await.unwrap());
    }

    #[tokio::test]
    async fn per_user_rows_override_global() {
        let pool = init_test_db().await.unwrap();
        // Global lane exhausted, but this user has a private allowance.
        seed(&pool, GLOBAL_OWNER, WindowType::Day, 60, 0).await;
        commit(&pool, "other", "prov", "file", 60, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        refresh(&pool, "vip", "prov", "file", WindowType::Day, 600, None, true)
            .await
            .unwrap();

        assert!(!check_available(&pool, "pleb", "prov", "file").await.unwrap());
        assert!(check_available(&pool, "vip", "prov", "file").await.unwrap());

        // The VIP's commit charges the VIP layer, not global.
        commit(&pool, "vip", "prov", "file", 100, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        let vip = entries_for_key(&pool, "vip", "prov", "file").await.unwrap();
        assert_eq!(vip[0].used_seconds, 100);
    }

    #[tokio::test]
    async fn availability_is_conjunctive_across_windows() {
        let pool = init_test_db().await.unwrap();
        seed(&pool, GLOBAL_OWNER, WindowType::Day, 1000, 0).await;
        refresh(
            &pool,
            GLOBAL_OWNER,
            "prov",
            "file",
            WindowType::Total,
            100,
            None,
            true,
        )
        .await
        .unwrap();
        // Burn through the total lane; the fresh day lane must not rescue it.
        commit(&pool, "u1", "prov", "file", 100, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        assert!(!check_available(&pool, "u1", "prov", "file").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_key_is_uncapped() {
        let pool = init_test_db().await.unwrap();
        assert!(check_available(&pool, "u1", "ghost", "file").await.unwrap());
        // Committing against an uncapped key is a no-op, not an error.
        commit(&pool, "u1", "ghost", "file", 500, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn gate_view_reports_free_tier_burn_down() {
        let pool = init_test_db().await.unwrap();
        seed(&pool, GLOBAL_OWNER, WindowType::Month, 36_000, 0).await;
        commit(&pool, "u1", "prov", "file", 900, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        let gate = QuotaStore::new(pool);
        let view = gate
            .view("u1", "prov", AsrVariant::File, 3600)
            .await
            .unwrap();
        assert!(view.available);
        // 900 of 3600 free seconds burned.
        assert!((view.free_remaining_fraction - 0.75).abs() < 1e-9);
    }
}
