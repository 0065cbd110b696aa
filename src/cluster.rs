//! Grid-based spatial clustering of active reports for map rendering.
//!
//! A read-only, idempotent projection over the active-report snapshot:
//! points are bucketed into web-mercator pixel cells sized by the marker
//! radius at the current zoom. Past the max zoom everything renders
//! individually; cells below the minimum point count do too.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use utoipa::{IntoParams, ToSchema};

use crate::models::{Condition, LatLng, Passability, ReportId};

const TILE_SIZE: f64 = 256.0;

#[derive(Debug, Clone, Copy)]
pub struct ClusterParams {
    /// Marker radius in pixels at the reference tile scale.
    pub radius_px: f64,
    /// Cells with fewer points than this render as individual markers.
    pub min_points: usize,
    /// Zoom at or beyond which clustering stops entirely.
    pub max_zoom: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            radius_px: 60.0,
            min_points: 2,
            max_zoom: 16.0,
        }
    }
}

/// Viewport bounding box in degrees.
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub fn contains(&self, p: LatLng) -> bool {
        p.lat >= self.south && p.lat <= self.north && p.lng >= self.west && p.lng <= self.east
    }
}

/// Input point: a located, active report.
#[derive(Debug, Clone, Copy)]
pub struct ReportPoint {
    pub id: ReportId,
    pub location: LatLng,
    pub condition: Condition,
    pub passability: Passability,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClusterMarker {
    pub location: LatLng,
    pub point_count: usize,
    /// Worst condition among members, by ordinal severity.
    pub condition: Condition,
    pub passability: Passability,
    /// Relative visual size; rendering hint only.
    pub weight: f64,
    /// Minimum zoom at which the members separate, capped at max zoom.
    pub expansion_zoom: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PointMarker {
    pub id: ReportId,
    pub location: LatLng,
    pub condition: Condition,
    pub passability: Passability,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MapEntity {
    Cluster(ClusterMarker),
    Point(PointMarker),
}

/// Project to web-mercator pixel space at the given zoom.
fn project(p: LatLng, zoom: f64) -> (f64, f64) {
    let scale = TILE_SIZE * 2f64.powf(zoom);
    let x = (p.lng + 180.0) / 360.0 * scale;
    let sin = p.lat.to_radians().sin().clamp(-0.9999, 0.9999);
    let y = (0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * PI)) * scale;
    (x, y)
}

fn cell_key(p: LatLng, zoom: f64, radius_px: f64) -> (i64, i64) {
    let (x, y) = project(p, zoom);
    ((x / radius_px).floor() as i64, (y / radius_px).floor() as i64)
}

/// Smallest zoom (above the current one) at which the member points fall
/// into distinct grid cells, capped at `max_zoom`.
fn expansion_zoom(members: &[&ReportPoint], current_zoom: f64, params: &ClusterParams) -> f64 {
    let mut z = current_zoom.floor() + 1.0;
    while z < params.max_zoom {
        let mut cells = BTreeMap::new();
        for m in members {
            *cells.entry(cell_key(m.location, z, params.radius_px)).or_insert(0usize) += 1;
        }
        if cells.len() > 1 {
            return z;
        }
        z += 1.0;
    }
    params.max_zoom
}

/// Partition the snapshot into clusters and individual points.
pub fn cluster(
    points: &[ReportPoint],
    bounds: &Bounds,
    zoom: f64,
    params: &ClusterParams,
) -> Vec<MapEntity> {
    let in_view: Vec<&ReportPoint> = points.iter().filter(|p| bounds.contains(p.location)).collect();
    let total = in_view.len();

    if zoom >= params.max_zoom {
        return in_view.into_iter().map(|p| point_marker(p)).collect();
    }

    // BTreeMap keeps output ordering deterministic across calls.
    let mut cells: BTreeMap<(i64, i64), Vec<&ReportPoint>> = BTreeMap::new();
    for p in &in_view {
        cells
            .entry(cell_key(p.location, zoom, params.radius_px))
            .or_default()
            .push(p);
    }

    let mut out = Vec::with_capacity(cells.len());
    for members in cells.values() {
        if members.len() < params.min_points {
            out.extend(members.iter().map(|p| point_marker(p)));
            continue;
        }
        let count = members.len();
        let centroid = LatLng {
            lat: members.iter().map(|p| p.location.lat).sum::<f64>() / count as f64,
            lng: members.iter().map(|p| p.location.lng).sum::<f64>() / count as f64,
        };
        let worst_condition = members
            .iter()
            .map(|p| p.condition)
            .max_by_key(|c| c.severity())
            .unwrap_or(Condition::Clear);
        let worst_passability = members
            .iter()
            .map(|p| p.passability)
            .max_by_key(|p| p.severity())
            .unwrap_or(Passability::Ok);
        out.push(MapEntity::Cluster(ClusterMarker {
            location: centroid,
            point_count: count,
            condition: worst_condition,
            passability: worst_passability,
            weight: 10.0 + (count as f64 / total as f64) * 20.0,
            expansion_zoom: expansion_zoom(members, zoom, params),
        }));
    }
    out
}

fn point_marker(p: &ReportPoint) -> MapEntity {
    MapEntity::Point(PointMarker {
        id: p.id,
        location: p.location,
        condition: p.condition,
        passability: p.passability,
    })
}
