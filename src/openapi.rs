use crate::cluster::{ClusterMarker, MapEntity, PointMarker};
use crate::models::{
    Author, Condition, County, Flag, FlagReason, LatLng, NewFlag, NewReport, NewRoadUpdate,
    Passability, Profile, ReportStatus, ReportView, RoadUpdateView, UpdateType,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_reports,
        crate::routes::create_report,
        crate::routes::get_report,
        crate::routes::delete_report,
        crate::routes::upvote_report,
        crate::routes::confirm_report,
        crate::routes::list_road_updates,
        crate::routes::submit_road_update,
        crate::routes::flag_report,
        crate::routes::map_clusters,
        crate::routes::admin_list_flagged,
        crate::routes::admin_hide_report,
        crate::routes::admin_delete_report,
        crate::routes::admin_clear_flags,
        crate::routes::admin_ban_user,
        crate::routes::admin_stats,
    ),
    components(schemas(
        Condition, Passability, County, ReportStatus, FlagReason, UpdateType,
        LatLng, NewReport, ReportView, Author, Profile,
        Flag, NewFlag, NewRoadUpdate, RoadUpdateView,
        MapEntity, ClusterMarker, PointMarker,
        crate::routes::CountResponse, crate::routes::ClearedFlagsResponse,
        crate::routes::RoadUpdateResponse, crate::routes::StatsResponse
    )),
    tags(
        (name = "reports", description = "Report feed and lifecycle"),
        (name = "map", description = "Clustered map markers"),
        (name = "admin", description = "Moderation operations"),
    )
)]
pub struct ApiDoc;
