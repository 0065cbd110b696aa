use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::{Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{Auth, Role};
use crate::cluster::{self, Bounds, ClusterParams, MapEntity, ReportPoint};
use crate::confidence;
use crate::error::ApiError;
use crate::lifecycle::{self, CreateDenied};
use crate::location;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{Repo, ReportFilter};
use crate::require_role;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/reports")
                    .route(web::get().to(list_reports))
                    .route(web::post().to(create_report)),
            )
            .service(
                web::resource("/reports/{id}")
                    .route(web::get().to(get_report))
                    .route(web::delete().to(delete_report)),
            )
            .service(web::resource("/reports/{id}/upvote").route(web::post().to(upvote_report)))
            .service(web::resource("/reports/{id}/confirm").route(web::post().to(confirm_report)))
            .service(
                web::resource("/reports/{id}/updates")
                    .route(web::get().to(list_road_updates))
                    .route(web::post().to(submit_road_update)),
            )
            .service(web::resource("/reports/{id}/flag").route(web::post().to(flag_report)))
            .service(web::resource("/map/clusters").route(web::get().to(map_clusters)))
            .service(
                web::resource("/admin/reports/flagged").route(web::get().to(admin_list_flagged)),
            )
            .service(
                web::resource("/admin/reports/{id}/hide").route(web::post().to(admin_hide_report)),
            )
            .service(
                web::resource("/admin/reports/{id}")
                    .route(web::delete().to(admin_delete_report)),
            )
            .service(
                web::resource("/admin/reports/{id}/clear-flags")
                    .route(web::post().to(admin_clear_flags)),
            )
            .service(web::resource("/admin/users/{id}/ban").route(web::post().to(admin_ban_user)))
            .service(web::resource("/admin/stats").route(web::get().to(admin_stats))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub limiter: RateLimiterFacade,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClearedFlagsResponse {
    pub cleared: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoadUpdateResponse {
    pub update: RoadUpdateView,
    pub plowed_count: i64,
    /// True when this submission tripped the plowed consensus.
    pub reclassified: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub active_reports: i64,
    pub total_users: i64,
    pub reports_today: i64,
}

#[derive(Debug, Clone, serde::Deserialize, utoipa::IntoParams)]
pub struct ClusterQuery {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub zoom: f64,
}

/// Project a batch of reports, joining each author once.
async fn project_all(
    repo: &dyn Repo,
    reports: Vec<Report>,
) -> Result<Vec<ReportView>, ApiError> {
    let now = Utc::now();
    let mut profiles: HashMap<String, Option<Profile>> = HashMap::new();
    let mut views = Vec::with_capacity(reports.len());
    for report in &reports {
        let author = match &report.user_id {
            Some(uid) => {
                if !profiles.contains_key(uid) {
                    let p = repo.get_profile(uid).await?;
                    profiles.insert(uid.clone(), p);
                }
                profiles.get(uid).and_then(|p| p.as_ref())
            }
            None => None,
        };
        views.push(lifecycle::project(report, author, now));
    }
    Ok(views)
}

async fn project_one(repo: &dyn Repo, report: &Report) -> Result<ReportView, ApiError> {
    let author = match &report.user_id {
        Some(uid) => repo.get_profile(uid).await?,
        None => None,
    };
    Ok(lifecycle::project(report, author.as_ref(), Utc::now()))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports",
    params(ReportQuery),
    responses(
        (status = 200, description = "Report feed, newest first", body = [ReportView]),
        (status = 400, description = "Invalid filter")
    )
)]
pub async fn list_reports(
    query: web::Query<ReportQuery>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    query.validate().map_err(ApiError::Validation)?;
    let now = Utc::now();
    let limit = query.limit.unwrap_or(50).min(200);
    let filter = ReportFilter {
        cutoff: query.minutes.map(|m| now - Duration::minutes(m)),
        county: query.county,
        condition: query.condition,
        passability: query.passability,
        limit: Some(limit),
    };
    let include_expired = query.include_expired.unwrap_or(false);
    let reports: Vec<Report> = data
        .repo
        .list_reports(&filter)
        .await?
        .into_iter()
        .filter(|r| lifecycle::visible_in_feed(r, now, include_expired))
        .collect();
    let mut views = project_all(data.repo.as_ref(), reports).await?;
    views.truncate(limit);
    Ok(HttpResponse::Ok().json(views))
}

#[utoipa::path(
    post,
    path = "/api/v1/reports",
    request_body = NewReport,
    responses(
        (status = 201, description = "Report created", body = ReportView),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Author is banned"),
        (status = 429, description = "Creation quota exceeded")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_report(
    auth: Auth,
    input: web::Json<NewReport>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let input = input.into_inner();
    input.validate().map_err(ApiError::Validation)?;

    let profile = data
        .repo
        .ensure_profile(&auth.0.sub, &auth.0.username)
        .await?;
    match lifecycle::check_create(&profile, || data.limiter.allow_report(&auth.0.sub)) {
        Err(CreateDenied::Banned) => return Err(ApiError::Forbidden),
        Err(CreateDenied::RateLimited) => return Err(ApiError::RateLimited),
        Ok(()) => {}
    }

    let now = Utc::now();
    let location_name = location::compose_location_name(
        input.road_name.as_deref(),
        input.location_name.as_deref(),
        input.lat,
        input.lng,
    );
    let report = Report {
        id: Uuid::new_v4(),
        user_id: Some(auth.0.sub.clone()),
        lat: Some(input.lat),
        lng: Some(input.lng),
        location_name,
        road_name: input.road_name,
        county: input.county,
        condition: input.condition,
        passability: input.passability,
        notes: input.notes,
        photo_urls: input.photo_urls.unwrap_or_default(),
        upvote_count: 0,
        confirmation_count: 0,
        comment_count: 0,
        flag_count: 0,
        status: ReportStatus::Active,
        latest_update: None,
        plowed_count: 0,
        created_at: now,
        last_confirmed_at: now,
        expires_at: now + confidence::expiration_horizon(input.condition),
    };
    let report = data.repo.create_report(report).await?;
    data.repo.increment_report_count(&auth.0.sub).await?;
    tracing::info!(report_id = %report.id, county = report.county.as_str(), "report created");

    let view = lifecycle::project(&report, Some(&profile), now);
    Ok(HttpResponse::Created().json(view))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/{id}",
    params(("id" = Uuid, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report detail", body = ReportView),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_report(
    path: web::Path<Uuid>,
    auth: Option<Auth>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let report = data.repo.get_report(path.into_inner()).await?;
    let is_moderator = auth.as_ref().map(Auth::is_moderator).unwrap_or(false);
    // hidden reports stay visible to moderators; deleted ones to nobody
    match report.status {
        ReportStatus::Deleted => return Err(ApiError::NotFound),
        ReportStatus::Hidden if !is_moderator => return Err(ApiError::NotFound),
        _ => {}
    }
    let view = project_one(data.repo.as_ref(), &report).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[utoipa::path(
    delete,
    path = "/api/v1/reports/{id}",
    params(("id" = Uuid, Path, description = "Report id")),
    responses(
        (status = 204, description = "Report soft-deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_report(
    auth: Auth,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let report = data.repo.get_report(id).await?;
    if report.status == ReportStatus::Deleted {
        return Err(ApiError::NotFound);
    }
    if !lifecycle::is_owner(&report, &auth.0.sub) && !auth.is_moderator() {
        return Err(ApiError::Forbidden);
    }
    data.repo.set_status(id, ReportStatus::Deleted).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/{id}/upvote",
    params(("id" = Uuid, Path, description = "Report id")),
    responses(
        (status = 200, description = "Upvote recorded", body = CountResponse),
        (status = 404, description = "Not found"),
        (status = 409, description = "Already upvoted")
    ),
    security(("bearer_auth" = []))
)]
pub async fn upvote_report(
    auth: Auth,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let count = data
        .repo
        .add_upvote(path.into_inner(), &auth.0.sub)
        .await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/{id}/confirm",
    params(("id" = Uuid, Path, description = "Report id")),
    responses(
        (status = 200, description = "Confirmation recorded", body = CountResponse),
        (status = 404, description = "Not found"),
        (status = 409, description = "Already confirmed")
    ),
    security(("bearer_auth" = []))
)]
pub async fn confirm_report(
    auth: Auth,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let count = data
        .repo
        .add_confirmation(path.into_inner(), &auth.0.sub, Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/{id}/updates",
    params(("id" = Uuid, Path, description = "Report id")),
    responses(
        (status = 200, description = "Road updates, newest first", body = [RoadUpdateView]),
        (status = 404, description = "Not found")
    )
)]
pub async fn list_road_updates(
    path: web::Path<Uuid>,
    auth: Option<Auth>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    // same visibility rules as reading the report itself
    let report = data.repo.get_report(id).await?;
    let is_moderator = auth.as_ref().map(Auth::is_moderator).unwrap_or(false);
    match report.status {
        ReportStatus::Deleted => return Err(ApiError::NotFound),
        ReportStatus::Hidden if !is_moderator => return Err(ApiError::NotFound),
        _ => {}
    }
    let updates = data.repo.list_road_updates(id).await?;
    let mut usernames: HashMap<String, Option<String>> = HashMap::new();
    let mut views = Vec::with_capacity(updates.len());
    for u in updates {
        if !usernames.contains_key(&u.user_id) {
            let name = data
                .repo
                .get_profile(&u.user_id)
                .await?
                .map(|p| p.username);
            usernames.insert(u.user_id.clone(), name);
        }
        views.push(RoadUpdateView {
            id: u.id,
            report_id: u.report_id,
            update_type: u.update_type,
            notes: u.notes,
            created_at: u.created_at,
            username: usernames.get(&u.user_id).cloned().flatten(),
        });
    }
    Ok(HttpResponse::Ok().json(views))
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/{id}/updates",
    params(("id" = Uuid, Path, description = "Report id")),
    request_body = NewRoadUpdate,
    responses(
        (status = 200, description = "Update recorded (replaces any earlier one)", body = RoadUpdateResponse),
        (status = 400, description = "Invalid input"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn submit_road_update(
    auth: Auth,
    path: web::Path<Uuid>,
    input: web::Json<NewRoadUpdate>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let input = input.into_inner();
    input.validate().map_err(ApiError::Validation)?;
    let outcome = data
        .repo
        .submit_road_update(path.into_inner(), &auth.0.sub, input, Utc::now())
        .await?;
    if outcome.reclassified {
        tracing::info!(
            report_id = %outcome.update.report_id,
            plowed_count = outcome.plowed_count,
            "plowed consensus reached, report reclassified"
        );
    }
    let u = outcome.update;
    Ok(HttpResponse::Ok().json(RoadUpdateResponse {
        update: RoadUpdateView {
            id: u.id,
            report_id: u.report_id,
            update_type: u.update_type,
            notes: u.notes,
            created_at: u.created_at,
            username: Some(auth.0.username.clone()),
        },
        plowed_count: outcome.plowed_count,
        reclassified: outcome.reclassified,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/{id}/flag",
    params(("id" = Uuid, Path, description = "Report id")),
    request_body = NewFlag,
    responses(
        (status = 201, description = "Flag recorded", body = Flag),
        (status = 403, description = "Cannot flag own report"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Already flagged by this user")
    ),
    security(("bearer_auth" = []))
)]
pub async fn flag_report(
    auth: Auth,
    path: web::Path<Uuid>,
    input: web::Json<NewFlag>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let input = input.into_inner();
    input.validate().map_err(ApiError::Validation)?;
    let id = path.into_inner();
    let report = data.repo.get_report(id).await?;
    if report.status == ReportStatus::Deleted {
        return Err(ApiError::NotFound);
    }
    if lifecycle::is_owner(&report, &auth.0.sub) {
        return Err(ApiError::Forbidden);
    }
    let flag = data
        .repo
        .add_flag(Flag {
            id: Uuid::new_v4(),
            report_id: id,
            user_id: auth.0.sub.clone(),
            reason: input.reason,
            details: input.details,
            created_at: Utc::now(),
        })
        .await?;
    Ok(HttpResponse::Created().json(flag))
}

#[utoipa::path(
    get,
    path = "/api/v1/map/clusters",
    params(ClusterQuery),
    responses(
        (status = 200, description = "Clusters and individual markers for the viewport", body = [MapEntity]),
        (status = 400, description = "Invalid viewport")
    )
)]
pub async fn map_clusters(
    query: web::Query<ClusterQuery>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let q = query.into_inner();
    if q.west >= q.east || q.south >= q.north {
        return Err(ApiError::Validation("empty viewport".into()));
    }
    if !q.zoom.is_finite() || !(0.0..=22.0).contains(&q.zoom) {
        return Err(ApiError::Validation(format!("zoom {} out of range", q.zoom)));
    }
    let now = Utc::now();
    let reports = data
        .repo
        .list_reports(&ReportFilter {
            limit: Some(1000),
            ..Default::default()
        })
        .await?;
    let points: Vec<ReportPoint> = reports
        .iter()
        .filter(|r| lifecycle::visible_in_feed(r, now, false))
        .filter_map(|r| {
            lifecycle::resolved_location(r).map(|location| ReportPoint {
                id: r.id,
                location,
                condition: r.condition,
                passability: r.passability,
            })
        })
        .collect();
    let bounds = Bounds {
        west: q.west,
        south: q.south,
        east: q.east,
        north: q.north,
    };
    let entities: Vec<MapEntity> =
        cluster::cluster(&points, &bounds, q.zoom, &ClusterParams::default());
    Ok(HttpResponse::Ok().json(entities))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/reports/flagged",
    responses(
        (status = 200, description = "Moderation queue, most-flagged first", body = [ReportView]),
        (status = 403, description = "Moderators only")
    ),
    security(("bearer_auth" = []))
)]
pub async fn admin_list_flagged(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Moderator | Role::Admin);
    let reports = data.repo.list_flagged(50).await?;
    let views = project_all(data.repo.as_ref(), reports).await?;
    Ok(HttpResponse::Ok().json(views))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/reports/{id}/hide",
    params(("id" = Uuid, Path, description = "Report id")),
    responses(
        (status = 204, description = "Report hidden"),
        (status = 403, description = "Moderators only"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn admin_hide_report(
    auth: Auth,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Moderator | Role::Admin);
    data.repo
        .set_status(path.into_inner(), ReportStatus::Hidden)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/reports/{id}",
    params(("id" = Uuid, Path, description = "Report id")),
    responses(
        (status = 204, description = "Report soft-deleted"),
        (status = 403, description = "Moderators only"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn admin_delete_report(
    auth: Auth,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Moderator | Role::Admin);
    data.repo
        .set_status(path.into_inner(), ReportStatus::Deleted)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/reports/{id}/clear-flags",
    params(("id" = Uuid, Path, description = "Report id")),
    responses(
        (status = 200, description = "Flags dismissed", body = ClearedFlagsResponse),
        (status = 403, description = "Moderators only"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn admin_clear_flags(
    auth: Auth,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Moderator | Role::Admin);
    let cleared = data.repo.clear_flags(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ClearedFlagsResponse { cleared }))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/ban",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 204, description = "User banned"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Unknown user")
    ),
    security(("bearer_auth" = []))
)]
pub async fn admin_ban_user(
    auth: Auth,
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let user_id = path.into_inner();
    data.repo.ban_user(&user_id, Utc::now()).await?;
    tracing::info!(user_id = %user_id, banned_by = %auth.0.sub, "user banned");
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/stats",
    responses(
        (status = 200, description = "Engine counters", body = StatsResponse),
        (status = 403, description = "Moderators only")
    ),
    security(("bearer_auth" = []))
)]
pub async fn admin_stats(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Moderator | Role::Admin);
    let stats = data.repo.stats(Utc::now()).await?;
    Ok(HttpResponse::Ok().json(StatsResponse {
        active_reports: stats.active_reports,
        total_users: stats.total_users,
        reports_today: stats.reports_today,
    }))
}
