//! Report status transitions and the read-time projection.
//!
//! `active -> expired` is time-based and computed lazily here (a periodic
//! sweep persists the same answer); `hidden` and `deleted` are explicit
//! moderator/owner actions applied through the repository. Flags never
//! trigger autonomous hide/delete, they only feed the moderation queue.

use chrono::{DateTime, Utc};

use crate::confidence;
use crate::location;
use crate::models::{Author, LatLng, Profile, Report, ReportStatus, ReportView};

/// Creation quota: reports per user per rolling hour.
pub const REPORTS_PER_HOUR: usize = 10;
pub const REPORT_WINDOW_SECS: u64 = 3600;

#[derive(Debug, PartialEq, Eq)]
pub enum CreateDenied {
    Banned,
    RateLimited,
}

/// Creation gate. Bans are checked first, so a banned user never consumes
/// rate-limit budget; `allow` is the limiter verdict and is only invoked
/// past the ban check.
pub fn check_create(
    profile: &Profile,
    allow: impl FnOnce() -> bool,
) -> Result<(), CreateDenied> {
    if profile.banned_at.is_some() {
        return Err(CreateDenied::Banned);
    }
    if !allow() {
        return Err(CreateDenied::RateLimited);
    }
    Ok(())
}

/// Status as a reader should see it right now. Explicit hidden/deleted
/// states win; an active report past its horizon reads as expired.
pub fn effective_status(report: &Report, now: DateTime<Utc>) -> ReportStatus {
    match report.status {
        ReportStatus::Active if now > report.expires_at => ReportStatus::Expired,
        other => other,
    }
}

/// Default feed visibility: active only, with an opt-in for expired rows.
/// Hidden and deleted reports never surface here.
pub fn visible_in_feed(report: &Report, now: DateTime<Utc>, include_expired: bool) -> bool {
    match effective_status(report, now) {
        ReportStatus::Active => true,
        ReportStatus::Expired => include_expired,
        ReportStatus::Hidden | ReportStatus::Deleted => false,
    }
}

/// Owner-only action check for self-delete.
pub fn is_owner(report: &Report, user_id: &str) -> bool {
    report.user_id.as_deref() == Some(user_id)
}

/// Resolve the display location: stored coordinates are authoritative,
/// otherwise fall back to parsing the display string (legacy rows).
pub fn resolved_location(report: &Report) -> Option<LatLng> {
    match (report.lat, report.lng) {
        (Some(lat), Some(lng)) => Some(LatLng { lat, lng }),
        _ => location::resolve(&report.location_name),
    }
}

/// Build the client-facing projection. Confidence and effective status are
/// computed here, at read time; the author's trust is passed in explicitly.
pub fn project(report: &Report, author: Option<&Profile>, now: DateTime<Utc>) -> ReportView {
    let age_minutes = (now - report.created_at).num_seconds() as f64 / 60.0;
    let trust = author.map(|p| p.trust_score).unwrap_or(0);
    ReportView {
        id: report.id,
        user_id: report.user_id.clone(),
        location: resolved_location(report),
        location_name: report.location_name.clone(),
        road_name: report.road_name.clone(),
        county: report.county,
        condition: report.condition,
        passability: report.passability,
        notes: report.notes.clone(),
        photo_urls: report.photo_urls.clone(),
        upvote_count: report.upvote_count,
        confirmation_count: report.confirmation_count,
        comment_count: report.comment_count,
        flag_count: report.flag_count,
        confidence_score: confidence::confidence(
            report.upvote_count,
            report.confirmation_count,
            trust,
            age_minutes.max(0.0),
        ),
        status: effective_status(report, now),
        latest_update: report.latest_update,
        plowed_count: report.plowed_count,
        created_at: report.created_at,
        last_confirmed_at: report.last_confirmed_at,
        expires_at: report.expires_at,
        author: author.map(|p| Author {
            username: p.username.clone(),
            trust_score: p.trust_score,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Condition, County, Passability};
    use chrono::Duration;

    fn report(status: ReportStatus, created: DateTime<Utc>, horizon_hours: i64) -> Report {
        Report {
            id: uuid::Uuid::new_v4(),
            user_id: Some("u1".into()),
            lat: Some(43.05),
            lng: Some(-76.15),
            location_name: "43.05, -76.15".into(),
            road_name: None,
            county: County::Onondaga,
            condition: Condition::Snow,
            passability: Passability::Slow,
            notes: None,
            photo_urls: vec![],
            upvote_count: 0,
            confirmation_count: 0,
            comment_count: 0,
            flag_count: 0,
            status,
            latest_update: None,
            plowed_count: 0,
            created_at: created,
            last_confirmed_at: created,
            expires_at: created + Duration::hours(horizon_hours),
        }
    }

    #[test]
    fn active_report_expires_lazily() {
        let now = Utc::now();
        let r = report(ReportStatus::Active, now - Duration::hours(5), 4);
        assert_eq!(effective_status(&r, now), ReportStatus::Expired);
        assert!(!visible_in_feed(&r, now, false));
        assert!(visible_in_feed(&r, now, true));
    }

    #[test]
    fn explicit_states_win_over_age() {
        let now = Utc::now();
        let r = report(ReportStatus::Hidden, now - Duration::hours(5), 4);
        assert_eq!(effective_status(&r, now), ReportStatus::Hidden);
        assert!(!visible_in_feed(&r, now, true));
    }

    #[test]
    fn fresh_active_report_is_visible() {
        let now = Utc::now();
        let r = report(ReportStatus::Active, now, 4);
        assert_eq!(effective_status(&r, now), ReportStatus::Active);
        assert!(visible_in_feed(&r, now, false));
    }

    #[test]
    fn banned_author_is_rejected_before_quota() {
        let profile = Profile {
            user_id: "u1".into(),
            username: "sue".into(),
            trust_score: 10,
            report_count: 0,
            banned_at: Some(Utc::now()),
        };
        let quota_consulted = std::cell::Cell::new(false);
        let res = check_create(&profile, || {
            quota_consulted.set(true);
            true
        });
        assert_eq!(res, Err(CreateDenied::Banned));
        assert!(!quota_consulted.get());
    }

    #[test]
    fn exhausted_quota_denies_creation() {
        let profile = Profile {
            user_id: "u1".into(),
            username: "sue".into(),
            trust_score: 10,
            report_count: 0,
            banned_at: None,
        };
        assert_eq!(
            check_create(&profile, || false),
            Err(CreateDenied::RateLimited)
        );
        assert_eq!(check_create(&profile, || true), Ok(()));
    }

    #[test]
    fn projection_uses_stored_coordinates_first() {
        let now = Utc::now();
        let mut r = report(ReportStatus::Active, now, 4);
        r.location_name = "garbage text".into();
        let view = project(&r, None, now);
        assert_eq!(view.location.unwrap().lat, 43.05);
    }

    #[test]
    fn projection_falls_back_to_text_parsing() {
        let now = Utc::now();
        let mut r = report(ReportStatus::Active, now, 4);
        r.lat = None;
        r.lng = None;
        r.location_name = "Main St (43.1, -76.2)".into();
        let view = project(&r, None, now);
        assert_eq!(view.location.unwrap().lng, -76.2);

        r.location_name = "no coordinates here".into();
        let view = project(&r, None, now);
        assert!(view.location.is_none());
    }
}
