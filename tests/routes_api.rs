#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use roadwatch::auth::{create_jwt, Role};
use roadwatch::models::Profile;
use roadwatch::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use roadwatch::repo::inmem::InMemRepo;
use roadwatch::routes::{config, AppState};
use roadwatch::security::SecurityHeaders;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

fn app_state(repo: InMemRepo) -> AppState {
    AppState {
        repo: Arc::new(repo),
        limiter: RateLimiterFacade::new(
            InMemoryRateLimiter::new(true),
            RateLimitConfig {
                report_limit: 10,
                report_window: Duration::from_secs(3600),
            },
        ),
    }
}

fn user_token() -> String {
    create_jwt("u-reporter", "reporter", vec![Role::User]).unwrap()
}
fn other_token() -> String {
    create_jwt("u-other", "other", vec![Role::User]).unwrap()
}
fn moderator_token() -> String {
    create_jwt("u-mod", "mod", vec![Role::Moderator]).unwrap()
}
fn admin_token() -> String {
    create_jwt("u-admin", "admin", vec![Role::Admin]).unwrap()
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

fn snow_report_body(lat: f64, lng: f64) -> serde_json::Value {
    serde_json::json!({
        "lat": lat,
        "lng": lng,
        "road_name": "Route 81",
        "county": "onondaga",
        "condition": "snow",
        "passability": "slow"
    })
}

#[actix_web::test]
#[serial]
async fn report_feed_and_vote_flow() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(app_state(InMemRepo::new())))
            .configure(config),
    )
    .await;

    // empty feed
    let req = test::TestRequest::get().uri("/api/v1/reports").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v.as_array().unwrap().len(), 0);

    // create a report
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&user_token()))
        .set_json(snow_report_body(43.05, -76.15))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let report: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let id = report["id"].as_str().unwrap().to_string();
    assert_eq!(report["status"], "active");
    assert_eq!(report["location_name"], "Route 81 (43.05, -76.15)");
    assert_eq!(report["location"]["lat"].as_f64().unwrap(), 43.05);
    assert!(report["confidence_score"].as_f64().unwrap() > 0.0);
    assert_eq!(report["author"]["username"], "reporter");

    // feed now shows it
    let req = test::TestRequest::get().uri("/api/v1/reports").to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v.as_array().unwrap().len(), 1);

    // upvote once
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{id}/upvote"))
        .insert_header(bearer(&other_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["count"], 1);

    // duplicate upvote conflicts
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{id}/upvote"))
        .insert_header(bearer(&other_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    // confirmation
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{id}/confirm"))
        .insert_header(bearer(&other_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // anonymous read works
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reports/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["upvote_count"], 1);
    assert_eq!(v["confirmation_count"], 1);
}

#[actix_web::test]
#[serial]
async fn invalid_filters_and_malformed_coordinates_rejected() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(InMemRepo::new())))
            .configure(config),
    )
    .await;

    // 45 is not an accepted time window
    let req = test::TestRequest::get()
        .uri("/api/v1/reports?minutes=45")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // a latitude beyond ±90 is malformed
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&user_token()))
        .set_json(snow_report_body(91.0, -76.15))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // well-formed coordinates outside the usual coverage area are stored
    // verbatim, not rejected
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&user_token()))
        .set_json(snow_report_body(40.7, -74.0))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["location"]["lat"].as_f64().unwrap(), 40.7);
}

#[actix_web::test]
#[serial]
async fn self_flag_forbidden_others_create_once() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(InMemRepo::new())))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&user_token()))
        .set_json(snow_report_body(43.05, -76.15))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let report: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let id = report["id"].as_str().unwrap().to_string();

    let flag_body = serde_json::json!({"reason": "inaccurate"});

    // owner cannot flag their own report
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{id}/flag"))
        .insert_header(bearer(&user_token()))
        .set_json(&flag_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // another user can, exactly once
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{id}/flag"))
        .insert_header(bearer(&other_token()))
        .set_json(&flag_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{id}/flag"))
        .insert_header(bearer(&other_token()))
        .set_json(&flag_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    // the failed self-flag never bumped the counter
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reports/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["flag_count"], 1);
}

#[actix_web::test]
#[serial]
async fn eleventh_report_in_window_is_rate_limited() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(InMemRepo::new())))
            .configure(config),
    )
    .await;

    for i in 0..10 {
        let req = test::TestRequest::post()
            .uri("/api/v1/reports")
            .insert_header(bearer(&user_token()))
            .set_json(snow_report_body(43.05, -76.15 + 0.001 * i as f64))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201, "report {} should be accepted", i + 1);
    }

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&user_token()))
        .set_json(snow_report_body(43.05, -76.2))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);

    // a different user is unaffected
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&other_token()))
        .set_json(snow_report_body(43.05, -76.15))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
}

#[actix_web::test]
#[serial]
async fn banned_user_cannot_create() {
    setup_env();
    let repo = InMemRepo::new();
    repo.put_profile(Profile {
        user_id: "u-reporter".into(),
        username: "reporter".into(),
        trust_score: 0,
        report_count: 0,
        banned_at: Some(chrono::Utc::now()),
    });
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(repo)))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&user_token()))
        .set_json(snow_report_body(43.05, -76.15))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
}

#[actix_web::test]
#[serial]
async fn road_update_consensus_via_routes() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(InMemRepo::new())))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&user_token()))
        .set_json(snow_report_body(43.05, -76.15))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let report: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let id = report["id"].as_str().unwrap().to_string();

    let plowed = serde_json::json!({"update_type": "plowed"});
    for (i, sub) in ["w1", "w2", "w3"].iter().enumerate() {
        let token = create_jwt(sub, sub, vec![Role::User]).unwrap();
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/reports/{id}/updates"))
            .insert_header(bearer(&token))
            .set_json(&plowed)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
        assert_eq!(v["plowed_count"], i as i64 + 1);
        assert_eq!(v["reclassified"], i == 2);
    }

    // the report now reads as clear
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reports/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["condition"], "clear");
    assert_eq!(v["latest_update"], "plowed");

    // update history lists all three, newest first
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reports/{id}/updates"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v.as_array().unwrap().len(), 3);
}

#[actix_web::test]
#[serial]
async fn moderation_flow_hide_delete_clear() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(InMemRepo::new())))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&user_token()))
        .set_json(snow_report_body(43.05, -76.15))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let report: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let id = report["id"].as_str().unwrap().to_string();

    // plain users cannot touch admin endpoints
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/reports/{id}/hide"))
        .insert_header(bearer(&other_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // flag it so it shows in the queue
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{id}/flag"))
        .insert_header(bearer(&other_token()))
        .set_json(serde_json::json!({"reason": "spam"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/reports/flagged")
        .insert_header(bearer(&moderator_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v.as_array().unwrap().len(), 1);

    // hide: gone for the public, still visible to moderators
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/reports/{id}/hide"))
        .insert_header(bearer(&moderator_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reports/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reports/{id}"))
        .insert_header(bearer(&moderator_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // the hidden report's update history follows the same visibility rules
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reports/{id}/updates"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reports/{id}/updates"))
        .insert_header(bearer(&moderator_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // dismiss the flags
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/reports/{id}/clear-flags"))
        .insert_header(bearer(&moderator_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["cleared"], 1);

    // soft delete: even moderators now read 404
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/admin/reports/{id}"))
        .insert_header(bearer(&moderator_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reports/{id}"))
        .insert_header(bearer(&moderator_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    // a hide after deletion must not resurrect the report
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/reports/{id}/hide"))
        .insert_header(bearer(&moderator_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[serial]
async fn owner_can_delete_own_report() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(InMemRepo::new())))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&user_token()))
        .set_json(snow_report_body(43.05, -76.15))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let report: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let id = report["id"].as_str().unwrap().to_string();

    // a stranger cannot
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/reports/{id}"))
        .insert_header(bearer(&other_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/reports/{id}"))
        .insert_header(bearer(&user_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/reports/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[serial]
async fn ban_endpoint_is_admin_only() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(InMemRepo::new())))
            .configure(config),
    )
    .await;

    // reporter posts once so a profile exists
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&user_token()))
        .set_json(snow_report_body(43.05, -76.15))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/users/u-reporter/ban")
        .insert_header(bearer(&moderator_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/users/u-reporter/ban")
        .insert_header(bearer(&admin_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);

    // banned author is now rejected
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&user_token()))
        .set_json(snow_report_body(43.05, -76.15))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
}

#[actix_web::test]
#[serial]
async fn map_clusters_merge_nearby_reports() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(app_state(InMemRepo::new())))
            .configure(config),
    )
    .await;

    // two reports a few hundred meters apart, one far away
    for (token, lat, lng) in [
        (user_token(), 43.05, -76.15),
        (other_token(), 43.051, -76.151),
        (create_jwt("u-3", "three", vec![Role::User]).unwrap(), 43.6, -75.4),
    ] {
        let req = test::TestRequest::post()
            .uri("/api/v1/reports")
            .insert_header(bearer(&token))
            .set_json(snow_report_body(lat, lng))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
    }

    let req = test::TestRequest::get()
        .uri("/api/v1/map/clusters?west=-77.0&south=42.5&east=-75.0&north=44.0&zoom=8")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let entities = v.as_array().unwrap();

    let clusters: Vec<_> = entities.iter().filter(|e| e["type"] == "cluster").collect();
    let points: Vec<_> = entities.iter().filter(|e| e["type"] == "point").collect();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0]["point_count"], 2);
    assert_eq!(clusters[0]["condition"], "snow");
    assert_eq!(points.len(), 1);

    // degenerate viewport rejected
    let req = test::TestRequest::get()
        .uri("/api/v1/map/clusters?west=-75.0&south=42.5&east=-77.0&north=44.0&zoom=8")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}
