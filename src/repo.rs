use chrono::{DateTime, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("storage error: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

/// Feed filters as they reach storage. Status filtering here is coarse
/// (hidden/deleted rows never leave the store); effective-status logic
/// stays in the lifecycle layer.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub cutoff: Option<DateTime<Utc>>,
    pub county: Option<County>,
    pub condition: Option<Condition>,
    pub passability: Option<Passability>,
    pub limit: Option<usize>,
}

/// Result of a road-update submission applied atomically.
#[derive(Debug, Clone)]
pub struct RoadUpdateOutcome {
    pub update: RoadUpdate,
    pub plowed_count: i64,
    /// True when this submission tripped the plowed consensus and the
    /// report's condition was reclassified to clear.
    pub reclassified: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct AdminStats {
    pub active_reports: i64,
    pub total_users: i64,
    pub reports_today: i64,
}

#[async_trait]
pub trait ReportRepo: Send + Sync {
    async fn create_report(&self, report: Report) -> RepoResult<Report>;
    async fn get_report(&self, id: ReportId) -> RepoResult<Report>;
    /// Newest first; hidden and deleted rows are excluded.
    async fn list_reports(&self, filter: &ReportFilter) -> RepoResult<Vec<Report>>;
    /// Idempotent status transition (moderator hide / soft delete).
    async fn set_status(&self, id: ReportId, status: ReportStatus) -> RepoResult<()>;
    /// Persist `active -> expired` for rows past their horizon.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> RepoResult<u64>;
    /// Moderation queue: flagged, not-deleted reports, most-flagged first.
    async fn list_flagged(&self, limit: usize) -> RepoResult<Vec<Report>>;
    async fn stats(&self, now: DateTime<Utc>) -> RepoResult<AdminStats>;
}

#[async_trait]
pub trait VoteRepo: Send + Sync {
    /// Create-once upvote; duplicate is a conflict, never a double count.
    /// Returns the new count.
    async fn add_upvote(&self, report_id: ReportId, user_id: &str) -> RepoResult<i64>;
    /// Create-once confirmation; also refreshes `last_confirmed_at`.
    async fn add_confirmation(
        &self,
        report_id: ReportId,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<i64>;
}

#[async_trait]
pub trait FlagRepo: Send + Sync {
    /// Create-once flag per (user, report); bumps `flag_count` atomically.
    async fn add_flag(&self, flag: Flag) -> RepoResult<Flag>;
    /// Moderator reset: delete all flag rows, zero the counter. The report
    /// itself is untouched.
    async fn clear_flags(&self, report_id: ReportId) -> RepoResult<u64>;
    async fn list_flags(&self, report_id: ReportId) -> RepoResult<Vec<Flag>>;
}

#[async_trait]
pub trait RoadUpdateRepo: Send + Sync {
    /// Replace-in-place submission: one live opinion per (user, report).
    /// Adjusts the plowed tally, sets `latest_update`, and applies the
    /// consensus reclassification in the same critical section.
    async fn submit_road_update(
        &self,
        report_id: ReportId,
        user_id: &str,
        input: NewRoadUpdate,
        now: DateTime<Utc>,
    ) -> RepoResult<RoadUpdateOutcome>;
    /// Newest first.
    async fn list_road_updates(&self, report_id: ReportId) -> RepoResult<Vec<RoadUpdate>>;
}

#[async_trait]
pub trait ProfileRepo: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> RepoResult<Option<Profile>>;
    /// Fetch-or-create keyed by user id; username comes from the claims.
    async fn ensure_profile(&self, user_id: &str, username: &str) -> RepoResult<Profile>;
    async fn increment_report_count(&self, user_id: &str) -> RepoResult<()>;
    async fn ban_user(&self, user_id: &str, now: DateTime<Utc>) -> RepoResult<()>;
}

pub trait Repo: ReportRepo + VoteRepo + FlagRepo + RoadUpdateRepo + ProfileRepo {}

impl<T> Repo for T where T: ReportRepo + VoteRepo + FlagRepo + RoadUpdateRepo + ProfileRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use crate::updates;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, RwLock};
    use uuid::Uuid;

    #[derive(Default)]
    struct State {
        reports: HashMap<ReportId, Report>,
        upvotes: HashSet<(ReportId, UserId)>,
        confirmations: HashSet<(ReportId, UserId)>,
        flags: HashMap<(ReportId, UserId), Flag>,
        road_updates: HashMap<(ReportId, UserId), RoadUpdate>,
        profiles: HashMap<UserId, Profile>,
    }

    /// In-memory backend for tests and local development. All counter
    /// mutations happen inside a single write-lock section, which gives the
    /// same lost-update guarantees the Postgres backend gets from atomic
    /// `x = x + 1` statements.
    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self::default()
        }

        /// A report that exists but is deleted reads as missing.
        fn live_report<'a>(
            state: &'a mut State,
            id: &ReportId,
        ) -> RepoResult<&'a mut Report> {
            let report = state.reports.get_mut(id).ok_or(RepoError::NotFound)?;
            if report.status == ReportStatus::Deleted {
                return Err(RepoError::NotFound);
            }
            Ok(report)
        }
    }

    #[async_trait]
    impl ReportRepo for InMemRepo {
        async fn create_report(&self, report: Report) -> RepoResult<Report> {
            let mut s = self.state.write().unwrap();
            s.reports.insert(report.id, report.clone());
            Ok(report)
        }

        async fn get_report(&self, id: ReportId) -> RepoResult<Report> {
            let s = self.state.read().unwrap();
            s.reports.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_reports(&self, filter: &ReportFilter) -> RepoResult<Vec<Report>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .reports
                .values()
                .filter(|r| {
                    !matches!(r.status, ReportStatus::Hidden | ReportStatus::Deleted)
                })
                .filter(|r| filter.cutoff.map_or(true, |c| r.created_at >= c))
                .filter(|r| filter.county.map_or(true, |c| r.county == c))
                .filter(|r| filter.condition.map_or(true, |c| r.condition == c))
                .filter(|r| filter.passability.map_or(true, |p| r.passability == p))
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if let Some(limit) = filter.limit {
                v.truncate(limit);
            }
            Ok(v)
        }

        async fn set_status(&self, id: ReportId, status: ReportStatus) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let report = s.reports.get_mut(&id).ok_or(RepoError::NotFound)?;
            // deleted is terminal; only a repeat delete is accepted
            if report.status == ReportStatus::Deleted && status != ReportStatus::Deleted {
                return Err(RepoError::NotFound);
            }
            report.status = status;
            Ok(())
        }

        async fn sweep_expired(&self, now: DateTime<Utc>) -> RepoResult<u64> {
            let mut s = self.state.write().unwrap();
            let mut swept = 0;
            for r in s.reports.values_mut() {
                if r.status == ReportStatus::Active && now > r.expires_at {
                    r.status = ReportStatus::Expired;
                    swept += 1;
                }
            }
            Ok(swept)
        }

        async fn list_flagged(&self, limit: usize) -> RepoResult<Vec<Report>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .reports
                .values()
                .filter(|r| r.flag_count > 0 && r.status != ReportStatus::Deleted)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.flag_count.cmp(&a.flag_count));
            v.truncate(limit);
            Ok(v)
        }

        async fn stats(&self, now: DateTime<Utc>) -> RepoResult<AdminStats> {
            let s = self.state.read().unwrap();
            let day_ago = now - chrono::Duration::hours(24);
            Ok(AdminStats {
                active_reports: s
                    .reports
                    .values()
                    .filter(|r| r.status == ReportStatus::Active && now <= r.expires_at)
                    .count() as i64,
                total_users: s.profiles.len() as i64,
                reports_today: s
                    .reports
                    .values()
                    .filter(|r| r.created_at >= day_ago)
                    .count() as i64,
            })
        }
    }

    #[async_trait]
    impl VoteRepo for InMemRepo {
        async fn add_upvote(&self, report_id: ReportId, user_id: &str) -> RepoResult<i64> {
            let mut s = self.state.write().unwrap();
            Self::live_report(&mut s, &report_id)?;
            if !s.upvotes.insert((report_id, user_id.to_string())) {
                return Err(RepoError::Conflict);
            }
            let report = s.reports.get_mut(&report_id).ok_or(RepoError::NotFound)?;
            report.upvote_count += 1;
            Ok(report.upvote_count)
        }

        async fn add_confirmation(
            &self,
            report_id: ReportId,
            user_id: &str,
            now: DateTime<Utc>,
        ) -> RepoResult<i64> {
            let mut s = self.state.write().unwrap();
            Self::live_report(&mut s, &report_id)?;
            if !s.confirmations.insert((report_id, user_id.to_string())) {
                return Err(RepoError::Conflict);
            }
            let report = s.reports.get_mut(&report_id).ok_or(RepoError::NotFound)?;
            report.confirmation_count += 1;
            report.last_confirmed_at = now;
            Ok(report.confirmation_count)
        }
    }

    #[async_trait]
    impl FlagRepo for InMemRepo {
        async fn add_flag(&self, flag: Flag) -> RepoResult<Flag> {
            let mut s = self.state.write().unwrap();
            Self::live_report(&mut s, &flag.report_id)?;
            let key = (flag.report_id, flag.user_id.clone());
            if s.flags.contains_key(&key) {
                return Err(RepoError::Conflict);
            }
            s.flags.insert(key, flag.clone());
            let report = s
                .reports
                .get_mut(&flag.report_id)
                .ok_or(RepoError::NotFound)?;
            report.flag_count += 1;
            Ok(flag)
        }

        async fn clear_flags(&self, report_id: ReportId) -> RepoResult<u64> {
            let mut s = self.state.write().unwrap();
            if !s.reports.contains_key(&report_id) {
                return Err(RepoError::NotFound);
            }
            let before = s.flags.len();
            s.flags.retain(|(rid, _), _| *rid != report_id);
            let removed = (before - s.flags.len()) as u64;
            if let Some(report) = s.reports.get_mut(&report_id) {
                report.flag_count = 0;
            }
            Ok(removed)
        }

        async fn list_flags(&self, report_id: ReportId) -> RepoResult<Vec<Flag>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .flags
                .values()
                .filter(|f| f.report_id == report_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }
    }

    #[async_trait]
    impl RoadUpdateRepo for InMemRepo {
        async fn submit_road_update(
            &self,
            report_id: ReportId,
            user_id: &str,
            input: NewRoadUpdate,
            now: DateTime<Utc>,
        ) -> RepoResult<RoadUpdateOutcome> {
            let mut s = self.state.write().unwrap();
            Self::live_report(&mut s, &report_id)?;

            let key = (report_id, user_id.to_string());
            let previous = s.road_updates.get(&key).map(|u| u.update_type);
            let delta = updates::plowed_delta(previous, input.update_type);

            // Replace in place rather than appending a second row.
            let update = match s.road_updates.get_mut(&key) {
                Some(existing) => {
                    existing.update_type = input.update_type;
                    existing.notes = input.notes;
                    existing.created_at = now;
                    existing.clone()
                }
                None => {
                    let update = RoadUpdate {
                        id: Uuid::new_v4(),
                        report_id,
                        user_id: user_id.to_string(),
                        update_type: input.update_type,
                        notes: input.notes,
                        created_at: now,
                    };
                    s.road_updates.insert(key, update.clone());
                    update
                }
            };

            let report = s.reports.get_mut(&report_id).ok_or(RepoError::NotFound)?;
            report.plowed_count += delta;
            report.latest_update = Some(input.update_type);

            let mut reclassified = false;
            if updates::consensus_reached(report.plowed_count)
                && report.condition != updates::consensus_condition()
            {
                report.condition = updates::consensus_condition();
                reclassified = true;
            }

            Ok(RoadUpdateOutcome {
                update,
                plowed_count: report.plowed_count,
                reclassified,
            })
        }

        async fn list_road_updates(&self, report_id: ReportId) -> RepoResult<Vec<RoadUpdate>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .road_updates
                .values()
                .filter(|u| u.report_id == report_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }
    }

    #[async_trait]
    impl ProfileRepo for InMemRepo {
        async fn get_profile(&self, user_id: &str) -> RepoResult<Option<Profile>> {
            let s = self.state.read().unwrap();
            Ok(s.profiles.get(user_id).cloned())
        }

        async fn ensure_profile(&self, user_id: &str, username: &str) -> RepoResult<Profile> {
            let mut s = self.state.write().unwrap();
            let profile = s
                .profiles
                .entry(user_id.to_string())
                .or_insert_with(|| Profile {
                    user_id: user_id.to_string(),
                    username: username.to_string(),
                    trust_score: 0,
                    report_count: 0,
                    banned_at: None,
                });
            Ok(profile.clone())
        }

        async fn increment_report_count(&self, user_id: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let profile = s.profiles.get_mut(user_id).ok_or(RepoError::NotFound)?;
            profile.report_count += 1;
            Ok(())
        }

        async fn ban_user(&self, user_id: &str, now: DateTime<Utc>) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let profile = s.profiles.get_mut(user_id).ok_or(RepoError::NotFound)?;
            // idempotent: a second ban keeps the original timestamp
            if profile.banned_at.is_none() {
                profile.banned_at = Some(now);
            }
            Ok(())
        }
    }

    impl InMemRepo {
        /// Seed a profile with explicit trust/ban state (dev and test setup).
        pub fn put_profile(&self, profile: Profile) {
            let mut s = self.state.write().unwrap();
            s.profiles.insert(profile.user_id.clone(), profile);
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use crate::updates;
    use sqlx::postgres::PgRow;
    use sqlx::{Pool, Postgres, Row};
    use std::str::FromStr;
    use uuid::Uuid;

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    fn internal<E: std::fmt::Display>(e: E) -> RepoError {
        RepoError::Internal(e.to_string())
    }

    fn parse<T: FromStr<Err = String>>(s: String) -> RepoResult<T> {
        s.parse().map_err(RepoError::Internal)
    }

    fn map_report(row: &PgRow) -> RepoResult<Report> {
        let latest_update: Option<String> = row.try_get("latest_update").map_err(internal)?;
        Ok(Report {
            id: row.try_get("id").map_err(internal)?,
            user_id: row.try_get("user_id").map_err(internal)?,
            lat: row.try_get("lat").map_err(internal)?,
            lng: row.try_get("lng").map_err(internal)?,
            location_name: row.try_get("location_name").map_err(internal)?,
            road_name: row.try_get("road_name").map_err(internal)?,
            county: parse(row.try_get::<String, _>("county").map_err(internal)?)?,
            condition: parse(row.try_get::<String, _>("condition").map_err(internal)?)?,
            passability: parse(row.try_get::<String, _>("passability").map_err(internal)?)?,
            notes: row.try_get("notes").map_err(internal)?,
            photo_urls: row.try_get("photo_urls").map_err(internal)?,
            upvote_count: row.try_get("upvote_count").map_err(internal)?,
            confirmation_count: row.try_get("confirmation_count").map_err(internal)?,
            comment_count: row.try_get("comment_count").map_err(internal)?,
            flag_count: row.try_get("flag_count").map_err(internal)?,
            status: parse(row.try_get::<String, _>("status").map_err(internal)?)?,
            latest_update: latest_update.map(parse).transpose()?,
            plowed_count: row.try_get("plowed_count").map_err(internal)?,
            created_at: row.try_get("created_at").map_err(internal)?,
            last_confirmed_at: row.try_get("last_confirmed_at").map_err(internal)?,
            expires_at: row.try_get("expires_at").map_err(internal)?,
        })
    }

    fn map_flag(row: &PgRow) -> RepoResult<Flag> {
        Ok(Flag {
            id: row.try_get("id").map_err(internal)?,
            report_id: row.try_get("report_id").map_err(internal)?,
            user_id: row.try_get("user_id").map_err(internal)?,
            reason: parse(row.try_get::<String, _>("reason").map_err(internal)?)?,
            details: row.try_get("details").map_err(internal)?,
            created_at: row.try_get("created_at").map_err(internal)?,
        })
    }

    fn map_road_update(row: &PgRow) -> RepoResult<RoadUpdate> {
        Ok(RoadUpdate {
            id: row.try_get("id").map_err(internal)?,
            report_id: row.try_get("report_id").map_err(internal)?,
            user_id: row.try_get("user_id").map_err(internal)?,
            update_type: parse(row.try_get::<String, _>("update_type").map_err(internal)?)?,
            notes: row.try_get("notes").map_err(internal)?,
            created_at: row.try_get("created_at").map_err(internal)?,
        })
    }

    fn map_profile(row: &PgRow) -> RepoResult<Profile> {
        Ok(Profile {
            user_id: row.try_get("user_id").map_err(internal)?,
            username: row.try_get("username").map_err(internal)?,
            trust_score: row.try_get("trust_score").map_err(internal)?,
            report_count: row.try_get("report_count").map_err(internal)?,
            banned_at: row.try_get("banned_at").map_err(internal)?,
        })
    }

    const REPORT_COLUMNS: &str = "id, user_id, lat, lng, location_name, road_name, county, \
         condition, passability, notes, photo_urls, upvote_count, confirmation_count, \
         comment_count, flag_count, status, latest_update, plowed_count, created_at, \
         last_confirmed_at, expires_at";

    #[async_trait]
    impl ReportRepo for PgRepo {
        async fn create_report(&self, report: Report) -> RepoResult<Report> {
            sqlx::query(
                "INSERT INTO reports (id, user_id, lat, lng, location_name, road_name, county, \
                 condition, passability, notes, photo_urls, status, created_at, \
                 last_confirmed_at, expires_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
            )
            .bind(report.id)
            .bind(&report.user_id)
            .bind(report.lat)
            .bind(report.lng)
            .bind(&report.location_name)
            .bind(&report.road_name)
            .bind(report.county.as_str())
            .bind(report.condition.as_str())
            .bind(report.passability.as_str())
            .bind(&report.notes)
            .bind(&report.photo_urls)
            .bind(report.status.as_str())
            .bind(report.created_at)
            .bind(report.last_confirmed_at)
            .bind(report.expires_at)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            Ok(report)
        }

        async fn get_report(&self, id: ReportId) -> RepoResult<Report> {
            let row = sqlx::query(&format!(
                "SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)?;
            map_report(&row)
        }

        async fn list_reports(&self, filter: &ReportFilter) -> RepoResult<Vec<Report>> {
            let limit = filter.limit.unwrap_or(50) as i64;
            let rows = sqlx::query(&format!(
                "SELECT {REPORT_COLUMNS} FROM reports \
                 WHERE status NOT IN ('hidden', 'deleted') \
                   AND ($1::timestamptz IS NULL OR created_at >= $1) \
                   AND ($2::text IS NULL OR county = $2) \
                   AND ($3::text IS NULL OR condition = $3) \
                   AND ($4::text IS NULL OR passability = $4) \
                 ORDER BY created_at DESC \
                 LIMIT $5"
            ))
            .bind(filter.cutoff)
            .bind(filter.county.map(|c| c.as_str()))
            .bind(filter.condition.map(|c| c.as_str()))
            .bind(filter.passability.map(|p| p.as_str()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            rows.iter().map(map_report).collect()
        }

        async fn set_status(&self, id: ReportId, status: ReportStatus) -> RepoResult<()> {
            // deleted is terminal; only a repeat delete is accepted
            let res = sqlx::query(
                "UPDATE reports SET status = $2 \
                 WHERE id = $1 AND (status <> 'deleted' OR $2 = 'deleted')",
            )
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn sweep_expired(&self, now: DateTime<Utc>) -> RepoResult<u64> {
            let res = sqlx::query(
                "UPDATE reports SET status = 'expired' \
                 WHERE status = 'active' AND expires_at < $1",
            )
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            Ok(res.rows_affected())
        }

        async fn list_flagged(&self, limit: usize) -> RepoResult<Vec<Report>> {
            let rows = sqlx::query(&format!(
                "SELECT {REPORT_COLUMNS} FROM reports \
                 WHERE flag_count > 0 AND status <> 'deleted' \
                 ORDER BY flag_count DESC \
                 LIMIT $1"
            ))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            rows.iter().map(map_report).collect()
        }

        async fn stats(&self, now: DateTime<Utc>) -> RepoResult<AdminStats> {
            let row = sqlx::query(
                "SELECT \
                 (SELECT COUNT(*) FROM reports WHERE status = 'active' AND expires_at >= $1) AS active_reports, \
                 (SELECT COUNT(*) FROM profiles) AS total_users, \
                 (SELECT COUNT(*) FROM reports WHERE created_at >= $1 - INTERVAL '24 hours') AS reports_today",
            )
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            Ok(AdminStats {
                active_reports: row.try_get("active_reports").map_err(internal)?,
                total_users: row.try_get("total_users").map_err(internal)?,
                reports_today: row.try_get("reports_today").map_err(internal)?,
            })
        }
    }

    #[async_trait]
    impl VoteRepo for PgRepo {
        async fn add_upvote(&self, report_id: ReportId, user_id: &str) -> RepoResult<i64> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            // unique index closes the check-then-act race
            let inserted = sqlx::query(
                "INSERT INTO upvotes (report_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT (report_id, user_id) DO NOTHING",
            )
            .bind(report_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
            if inserted.rows_affected() == 0 {
                return Err(RepoError::Conflict);
            }
            let row = sqlx::query(
                "UPDATE reports SET upvote_count = upvote_count + 1 \
                 WHERE id = $1 AND status <> 'deleted' RETURNING upvote_count",
            )
            .bind(report_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)?;
            tx.commit().await.map_err(internal)?;
            row.try_get("upvote_count").map_err(internal)
        }

        async fn add_confirmation(
            &self,
            report_id: ReportId,
            user_id: &str,
            now: DateTime<Utc>,
        ) -> RepoResult<i64> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let inserted = sqlx::query(
                "INSERT INTO confirmations (report_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT (report_id, user_id) DO NOTHING",
            )
            .bind(report_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
            if inserted.rows_affected() == 0 {
                return Err(RepoError::Conflict);
            }
            let row = sqlx::query(
                "UPDATE reports SET confirmation_count = confirmation_count + 1, \
                 last_confirmed_at = $2 \
                 WHERE id = $1 AND status <> 'deleted' RETURNING confirmation_count",
            )
            .bind(report_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)?;
            tx.commit().await.map_err(internal)?;
            row.try_get("confirmation_count").map_err(internal)
        }
    }

    #[async_trait]
    impl FlagRepo for PgRepo {
        async fn add_flag(&self, flag: Flag) -> RepoResult<Flag> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let inserted = sqlx::query(
                "INSERT INTO flags (id, report_id, user_id, reason, details, created_at) \
                 VALUES ($1,$2,$3,$4,$5,$6) \
                 ON CONFLICT (report_id, user_id) DO NOTHING",
            )
            .bind(flag.id)
            .bind(flag.report_id)
            .bind(&flag.user_id)
            .bind(flag.reason.as_str())
            .bind(&flag.details)
            .bind(flag.created_at)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
            if inserted.rows_affected() == 0 {
                return Err(RepoError::Conflict);
            }
            let updated = sqlx::query(
                "UPDATE reports SET flag_count = flag_count + 1 \
                 WHERE id = $1 AND status <> 'deleted'",
            )
            .bind(flag.report_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
            if updated.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            tx.commit().await.map_err(internal)?;
            Ok(flag)
        }

        async fn clear_flags(&self, report_id: ReportId) -> RepoResult<u64> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let deleted = sqlx::query("DELETE FROM flags WHERE report_id = $1")
                .bind(report_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            let updated = sqlx::query("UPDATE reports SET flag_count = 0 WHERE id = $1")
                .bind(report_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            if updated.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            tx.commit().await.map_err(internal)?;
            Ok(deleted.rows_affected())
        }

        async fn list_flags(&self, report_id: ReportId) -> RepoResult<Vec<Flag>> {
            let rows = sqlx::query(
                "SELECT id, report_id, user_id, reason, details, created_at \
                 FROM flags WHERE report_id = $1 ORDER BY created_at DESC",
            )
            .bind(report_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            rows.iter().map(map_flag).collect()
        }
    }

    #[async_trait]
    impl RoadUpdateRepo for PgRepo {
        async fn submit_road_update(
            &self,
            report_id: ReportId,
            user_id: &str,
            input: NewRoadUpdate,
            now: DateTime<Utc>,
        ) -> RepoResult<RoadUpdateOutcome> {
            let mut tx = self.pool.begin().await.map_err(internal)?;

            // Row lock serializes concurrent submissions against the tally.
            let report_row = sqlx::query(
                "SELECT condition, plowed_count FROM reports \
                 WHERE id = $1 AND status <> 'deleted' FOR UPDATE",
            )
            .bind(report_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)?;
            let condition: Condition =
                parse(report_row.try_get::<String, _>("condition").map_err(internal)?)?;

            let previous: Option<UpdateType> = sqlx::query(
                "SELECT update_type FROM road_updates \
                 WHERE report_id = $1 AND user_id = $2",
            )
            .bind(report_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?
            .map(|r| parse(r.try_get::<String, _>("update_type").map_err(internal)?))
            .transpose()?;

            let row = sqlx::query(
                "INSERT INTO road_updates (id, report_id, user_id, update_type, notes, created_at) \
                 VALUES ($1,$2,$3,$4,$5,$6) \
                 ON CONFLICT (report_id, user_id) DO UPDATE \
                 SET update_type = EXCLUDED.update_type, notes = EXCLUDED.notes, \
                     created_at = EXCLUDED.created_at \
                 RETURNING id, report_id, user_id, update_type, notes, created_at",
            )
            .bind(Uuid::new_v4())
            .bind(report_id)
            .bind(user_id)
            .bind(input.update_type.as_str())
            .bind(&input.notes)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(internal)?;
            let update = map_road_update(&row)?;

            let delta = updates::plowed_delta(previous, input.update_type);
            let row = sqlx::query(
                "UPDATE reports SET plowed_count = plowed_count + $2, latest_update = $3 \
                 WHERE id = $1 RETURNING plowed_count",
            )
            .bind(report_id)
            .bind(delta)
            .bind(input.update_type.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(internal)?;
            let plowed_count: i64 = row.try_get("plowed_count").map_err(internal)?;

            let mut reclassified = false;
            if updates::consensus_reached(plowed_count)
                && condition != updates::consensus_condition()
            {
                sqlx::query("UPDATE reports SET condition = $2 WHERE id = $1")
                    .bind(report_id)
                    .bind(updates::consensus_condition().as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                reclassified = true;
            }

            tx.commit().await.map_err(internal)?;
            Ok(RoadUpdateOutcome {
                update,
                plowed_count,
                reclassified,
            })
        }

        async fn list_road_updates(&self, report_id: ReportId) -> RepoResult<Vec<RoadUpdate>> {
            let rows = sqlx::query(
                "SELECT id, report_id, user_id, update_type, notes, created_at \
                 FROM road_updates WHERE report_id = $1 ORDER BY created_at DESC",
            )
            .bind(report_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            rows.iter().map(map_road_update).collect()
        }
    }

    #[async_trait]
    impl ProfileRepo for PgRepo {
        async fn get_profile(&self, user_id: &str) -> RepoResult<Option<Profile>> {
            let row = sqlx::query(
                "SELECT user_id, username, trust_score, report_count, banned_at \
                 FROM profiles WHERE user_id = $1",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
            row.as_ref().map(map_profile).transpose()
        }

        async fn ensure_profile(&self, user_id: &str, username: &str) -> RepoResult<Profile> {
            let row = sqlx::query(
                "INSERT INTO profiles (user_id, username) VALUES ($1, $2) \
                 ON CONFLICT (user_id) DO UPDATE SET username = profiles.username \
                 RETURNING user_id, username, trust_score, report_count, banned_at",
            )
            .bind(user_id)
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            map_profile(&row)
        }

        async fn increment_report_count(&self, user_id: &str) -> RepoResult<()> {
            let res = sqlx::query(
                "UPDATE profiles SET report_count = report_count + 1 WHERE user_id = $1",
            )
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn ban_user(&self, user_id: &str, now: DateTime<Utc>) -> RepoResult<()> {
            let res = sqlx::query(
                "UPDATE profiles SET banned_at = COALESCE(banned_at, $2) WHERE user_id = $1",
            )
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }
}
