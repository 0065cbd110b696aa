use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

pub type ReportId = Uuid;
pub type UserId = String;

/// Maximum length of free-text notes on a report or flag.
pub const NOTES_MAX: usize = 500;
/// Maximum length of notes attached to a road update.
pub const UPDATE_NOTES_MAX: usize = 200;
/// Maximum number of photo URLs per report.
pub const PHOTO_URLS_MAX: usize = 5;
/// Accepted `minutes` values for the feed time-window filter.
pub const TIME_WINDOWS_MIN: &[i64] = &[15, 30, 60, 120];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Clear,
    Wet,
    Slush,
    Snow,
    Ice,
    Whiteout,
}

impl Condition {
    /// Ordinal severity used for "worst in cluster" reduction.
    pub fn severity(self) -> u8 {
        match self {
            Condition::Clear => 0,
            Condition::Wet => 1,
            Condition::Slush => 2,
            Condition::Snow => 3,
            Condition::Ice => 4,
            Condition::Whiteout => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Condition::Clear => "clear",
            Condition::Wet => "wet",
            Condition::Slush => "slush",
            Condition::Snow => "snow",
            Condition::Ice => "ice",
            Condition::Whiteout => "whiteout",
        }
    }
}

impl FromStr for Condition {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clear" => Ok(Condition::Clear),
            "wet" => Ok(Condition::Wet),
            "slush" => Ok(Condition::Slush),
            "snow" => Ok(Condition::Snow),
            "ice" => Ok(Condition::Ice),
            "whiteout" => Ok(Condition::Whiteout),
            other => Err(format!("unknown condition '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Passability {
    Ok,
    Slow,
    Avoid,
}

impl Passability {
    pub fn severity(self) -> u8 {
        match self {
            Passability::Ok => 0,
            Passability::Slow => 1,
            Passability::Avoid => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Passability::Ok => "ok",
            Passability::Slow => "slow",
            Passability::Avoid => "avoid",
        }
    }
}

impl FromStr for Passability {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Passability::Ok),
            "slow" => Ok(Passability::Slow),
            "avoid" => Ok(Passability::Avoid),
            other => Err(format!("unknown passability '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum County {
    Onondaga,
    Oswego,
    Madison,
    Cayuga,
    Oneida,
    Cortland,
}

impl County {
    pub fn as_str(self) -> &'static str {
        match self {
            County::Onondaga => "onondaga",
            County::Oswego => "oswego",
            County::Madison => "madison",
            County::Cayuga => "cayuga",
            County::Oneida => "oneida",
            County::Cortland => "cortland",
        }
    }
}

impl FromStr for County {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onondaga" => Ok(County::Onondaga),
            "oswego" => Ok(County::Oswego),
            "madison" => Ok(County::Madison),
            "cayuga" => Ok(County::Cayuga),
            "oneida" => Ok(County::Oneida),
            "cortland" => Ok(County::Cortland),
            other => Err(format!("unknown county '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Active,
    Hidden,
    Deleted,
    Expired,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Active => "active",
            ReportStatus::Hidden => "hidden",
            ReportStatus::Deleted => "deleted",
            ReportStatus::Expired => "expired",
        }
    }
}

impl FromStr for ReportStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReportStatus::Active),
            "hidden" => Ok(ReportStatus::Hidden),
            "deleted" => Ok(ReportStatus::Deleted),
            "expired" => Ok(ReportStatus::Expired),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    Inaccurate,
    Outdated,
    Spam,
    Inappropriate,
    WrongLocation,
    Other,
}

impl FlagReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FlagReason::Inaccurate => "inaccurate",
            FlagReason::Outdated => "outdated",
            FlagReason::Spam => "spam",
            FlagReason::Inappropriate => "inappropriate",
            FlagReason::WrongLocation => "wrong_location",
            FlagReason::Other => "other",
        }
    }
}

impl FromStr for FlagReason {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inaccurate" => Ok(FlagReason::Inaccurate),
            "outdated" => Ok(FlagReason::Outdated),
            "spam" => Ok(FlagReason::Spam),
            "inappropriate" => Ok(FlagReason::Inappropriate),
            "wrong_location" => Ok(FlagReason::WrongLocation),
            "other" => Ok(FlagReason::Other),
            other => Err(format!("unknown flag reason '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Plowed,
    Clearing,
    Worse,
    Same,
}

impl UpdateType {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateType::Plowed => "plowed",
            UpdateType::Clearing => "clearing",
            UpdateType::Worse => "worse",
            UpdateType::Same => "same",
        }
    }
}

impl FromStr for UpdateType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plowed" => Ok(UpdateType::Plowed),
            "clearing" => Ok(UpdateType::Clearing),
            "worse" => Ok(UpdateType::Worse),
            "same" => Ok(UpdateType::Same),
            other => Err(format!("unknown update type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Report {
    pub id: ReportId,
    /// None once the author's account has been deleted.
    pub user_id: Option<UserId>,
    /// Authoritative coordinates when supplied at creation; the legacy
    /// retrieval path recovers them from `location_name` instead.
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub location_name: String,
    pub road_name: Option<String>,
    pub county: County,
    pub condition: Condition,
    pub passability: Passability,
    pub notes: Option<String>,
    pub photo_urls: Vec<String>,
    pub upvote_count: i64,
    pub confirmation_count: i64,
    pub comment_count: i64,
    pub flag_count: i64,
    pub status: ReportStatus,
    pub latest_update: Option<UpdateType>,
    pub plowed_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_confirmed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReport {
    pub lat: f64,
    pub lng: f64,
    pub location_name: Option<String>,
    pub road_name: Option<String>,
    pub county: County,
    pub condition: Condition,
    pub passability: Passability,
    pub notes: Option<String>,
    pub photo_urls: Option<Vec<String>>,
}

impl NewReport {
    /// Reject malformed input before any write happens.
    pub fn validate(&self) -> Result<(), String> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(format!("latitude {} out of range", self.lat));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(format!("longitude {} out of range", self.lng));
        }
        if let Some(notes) = &self.notes {
            if notes.chars().count() > NOTES_MAX {
                return Err(format!("notes exceed {NOTES_MAX} characters"));
            }
        }
        if let Some(urls) = &self.photo_urls {
            if urls.len() > PHOTO_URLS_MAX {
                return Err(format!("at most {PHOTO_URLS_MAX} photo URLs allowed"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Flag {
    pub id: Uuid,
    pub report_id: ReportId,
    pub user_id: UserId,
    pub reason: FlagReason,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewFlag {
    pub reason: FlagReason,
    pub details: Option<String>,
}

impl NewFlag {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(details) = &self.details {
            if details.chars().count() > NOTES_MAX {
                return Err(format!("details exceed {NOTES_MAX} characters"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoadUpdate {
    pub id: Uuid,
    pub report_id: ReportId,
    pub user_id: UserId,
    pub update_type: UpdateType,
    pub notes: Option<String>,
    /// Refreshed when the user replaces their opinion.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewRoadUpdate {
    pub update_type: UpdateType,
    pub notes: Option<String>,
}

impl NewRoadUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(notes) = &self.notes {
            if notes.chars().count() > UPDATE_NOTES_MAX {
                return Err(format!("notes exceed {UPDATE_NOTES_MAX} characters"));
            }
        }
        Ok(())
    }
}

/// Reputation state owned by the profile collaborator; this engine only
/// reads `trust_score` and the ban marker, and bumps `report_count`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Profile {
    pub user_id: UserId,
    pub username: String,
    pub trust_score: i32,
    pub report_count: i64,
    pub banned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Author {
    pub username: String,
    pub trust_score: i32,
}

/// Read-time projection of a report: resolved location, freshly computed
/// confidence, effective status, and the joined author.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportView {
    pub id: ReportId,
    pub user_id: Option<UserId>,
    pub location: Option<LatLng>,
    pub location_name: String,
    pub road_name: Option<String>,
    pub county: County,
    pub condition: Condition,
    pub passability: Passability,
    pub notes: Option<String>,
    pub photo_urls: Vec<String>,
    pub upvote_count: i64,
    pub confirmation_count: i64,
    pub comment_count: i64,
    pub flag_count: i64,
    pub confidence_score: f64,
    pub status: ReportStatus,
    pub latest_update: Option<UpdateType>,
    pub plowed_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_confirmed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub author: Option<Author>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoadUpdateView {
    pub id: Uuid,
    pub report_id: ReportId,
    pub update_type: UpdateType,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub username: Option<String>,
}

/// Feed filters; all optional, combined with AND semantics.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ReportQuery {
    /// Time window in minutes; one of 15, 30, 60, 120.
    pub minutes: Option<i64>,
    pub county: Option<County>,
    pub condition: Option<Condition>,
    pub passability: Option<Passability>,
    pub include_expired: Option<bool>,
    pub limit: Option<usize>,
}

impl ReportQuery {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(m) = self.minutes {
            if !TIME_WINDOWS_MIN.contains(&m) {
                return Err(format!("minutes must be one of {TIME_WINDOWS_MIN:?}"));
            }
        }
        Ok(())
    }
}
