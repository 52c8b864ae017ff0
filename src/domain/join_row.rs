//! Rows of the place-in-boundary join.
//!
//! The query engine streams [`RawJoinRow`]s straight out of the spatial
//! store. The export stage turns each into a [`JoinRow`]: names resolved,
//! boundary identity recovered from the importer's signed id convention.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column order of the export file
pub const EXPORT_HEADER: [&str; 10] = [
    "place_osmtype",
    "place_id",
    "place_name",
    "place_type",
    "place_lat",
    "place_lon",
    "boundary_osmtype",
    "boundary_id",
    "boundary_name",
    "boundary_admin_level",
];

/// OSM object type, written as its one-letter code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsmType {
    #[serde(rename = "n")]
    Node,
    #[serde(rename = "w")]
    Way,
    #[serde(rename = "r")]
    Relation,
}

impl OsmType {
    /// Split an importer id into type and unsigned id.
    ///
    /// osm2pgsql stores polygons built from relations under the negated
    /// relation id, and polygons built from closed ways under the way id.
    pub fn from_combined_id(id: i64) -> (Self, u64) {
        if id < 0 {
            (OsmType::Relation, id.unsigned_abs())
        } else {
            (OsmType::Way, id as u64)
        }
    }
}

impl std::fmt::Display for OsmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsmType::Node => write!(f, "node"),
            OsmType::Way => write!(f, "way"),
            OsmType::Relation => write!(f, "relation"),
        }
    }
}

/// One row as produced by the containment query
#[derive(Debug, Clone, Deserialize)]
pub struct RawJoinRow {
    pub place_id: i64,
    pub place_name_en: Option<String>,
    pub place_name: Option<String>,
    pub place_type: Option<String>,
    pub place_lat: f64,
    pub place_lon: f64,
    pub boundary_id: i64,
    pub boundary_name_en: Option<String>,
    pub boundary_name: Option<String>,
    pub boundary_admin_level: Option<String>,
}

/// One (place, enclosing boundary) pair of the export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRow {
    pub place_osmtype: OsmType,
    pub place_id: u64,
    pub place_name: Option<String>,
    pub place_type: String,
    pub place_lat: f64,
    pub place_lon: f64,
    pub boundary_osmtype: OsmType,
    pub boundary_id: u64,
    pub boundary_name: Option<String>,
    /// Empty when the boundary's tag is missing or not an integer
    pub boundary_admin_level: Option<i32>,
}

/// Reasons a raw row cannot become an export row
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JoinRowError {
    #[error("place id {0} is not a node id")]
    InvalidPlaceId(i64),
}

/// Prefer the English name, fall back to the local one.
///
/// Empty tags count as absent.
pub fn resolve_name(english: Option<String>, local: Option<String>) -> Option<String> {
    english
        .filter(|name| !name.trim().is_empty())
        .or_else(|| local.filter(|name| !name.trim().is_empty()))
}

/// Integer admin level, or `None` for absent and unparsable tags like `4;6`
pub fn parse_admin_level(value: Option<&str>) -> Option<i32> {
    value.and_then(|v| v.trim().parse::<i32>().ok())
}

impl TryFrom<RawJoinRow> for JoinRow {
    type Error = JoinRowError;

    fn try_from(raw: RawJoinRow) -> Result<Self, Self::Error> {
        let place_id =
            u64::try_from(raw.place_id).map_err(|_| JoinRowError::InvalidPlaceId(raw.place_id))?;
        let boundary_admin_level = parse_admin_level(raw.boundary_admin_level.as_deref());
        let (boundary_osmtype, boundary_id) = OsmType::from_combined_id(raw.boundary_id);

        Ok(Self {
            place_osmtype: OsmType::Node,
            place_id,
            place_name: resolve_name(raw.place_name_en, raw.place_name),
            place_type: raw.place_type.unwrap_or_default(),
            place_lat: raw.place_lat,
            place_lon: raw.place_lon,
            boundary_osmtype,
            boundary_id,
            boundary_name: resolve_name(raw.boundary_name_en, raw.boundary_name),
            boundary_admin_level,
        })
    }
}
