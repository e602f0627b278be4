//! Coordinate and attribute extraction
//!
//! Turns drawn points or the features of an input layer into WGS84 `Location`s
//! rounded to 6 decimals, plus the attribute values used to correlate responses
//! with their source features.

use std::f64::consts::PI;
use std::fmt;

use geo::{Coord, Geometry, LineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::error::{Error, Result};

/// Earth radius used by EPSG:3857
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Round a coordinate to the 6 decimals Valhalla works with
pub fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// A single routing location in WGS84
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    pub lon: f64,
    pub lat: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_tolerance: Option<u32>,
}

impl Location {
    /// Create a location, rounding to 6 decimals
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon: round6(lon),
            lat: round6(lat),
            radius: None,
            heading: None,
            heading_tolerance: None,
        }
    }

    pub fn with_radius(mut self, radius: u32) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn with_heading(mut self, heading: u32, tolerance: Option<u32>) -> Self {
        self.heading = Some(heading);
        self.heading_tolerance = tolerance;
        self
    }

    /// `"{lon}, {lat}"` label used when no attribute value identifies a location
    ///
    /// Coordinates print as JSON numbers, so whole values keep their `.0`
    /// like the labels built from response locations.
    pub fn label(&self) -> String {
        format!("{}, {}", Value::from(self.lon), Value::from(self.lat))
    }

    /// Same position, ignoring the snapping hints
    pub fn same_position(&self, other: &Location) -> bool {
        self.lon == other.lon && self.lat == other.lat
    }
}

/// Coordinate reference systems an input can be expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Crs {
    #[default]
    Wgs84,
    WebMercator,
}

impl Crs {
    /// Resolve a CRS name such as `EPSG:4326` or `urn:ogc:def:crs:EPSG::3857`
    pub fn from_name(name: &str) -> Result<Self> {
        let upper = name.trim().to_uppercase();
        let code = upper.rsplit(':').next().unwrap_or_default();

        match code {
            "4326" | "CRS84" => Ok(Crs::Wgs84),
            "3857" | "900913" | "3785" => Ok(Crs::WebMercator),
            _ => Err(Error::InvalidInput(format!(
                "unsupported CRS '{name}', expected EPSG:4326 or EPSG:3857"
            ))),
        }
    }

    /// Transform a coordinate to WGS84 lon/lat
    pub fn to_wgs84(&self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Wgs84 => coord,
            Crs::WebMercator => Coord {
                x: (coord.x / WEB_MERCATOR_RADIUS).to_degrees(),
                y: (2.0 * (coord.y / WEB_MERCATOR_RADIUS).exp().atan() - PI / 2.0).to_degrees(),
            },
        }
    }
}

/// Build locations from drawn points in the given CRS
pub fn extract_locations(points: &[Coord<f64>], crs: Crs) -> Vec<Location> {
    points
        .iter()
        .map(|c| {
            let c = crs.to_wgs84(*c);
            Location::new(c.x, c.y)
        })
        .collect()
}

/// Geometry type of a feature or a whole layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    MultiPoint,
    LineString,
    Polygon,
    MultiPolygon,
}

impl GeometryKind {
    pub fn of(geometry: &Geometry<f64>) -> Result<Self> {
        match geometry {
            Geometry::Point(_) => Ok(GeometryKind::Point),
            Geometry::MultiPoint(_) => Ok(GeometryKind::MultiPoint),
            Geometry::LineString(_) => Ok(GeometryKind::LineString),
            Geometry::Polygon(_) => Ok(GeometryKind::Polygon),
            Geometry::MultiPolygon(_) => Ok(GeometryKind::MultiPolygon),
            other => Err(Error::InvalidGeometry(format!(
                "WKT type {other:?} is not supported."
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::MultiPoint => "MultiPoint",
            GeometryKind::LineString => "LineString",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPolygon => "MultiPolygon",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One feature of an input layer
#[derive(Debug, Clone)]
pub struct SourceFeature {
    pub id: u64,
    pub geometry: Geometry<f64>,
    pub properties: Map<String, Value>,
}

impl SourceFeature {
    /// Attribute value for a field, `null` when absent
    pub fn attribute(&self, field: &str) -> Value {
        self.properties.get(field).cloned().unwrap_or(Value::Null)
    }
}

/// An input layer: features in a single CRS, iterated in feature-id order
#[derive(Debug, Clone, Default)]
pub struct FeatureSource {
    crs: Crs,
    features: Vec<SourceFeature>,
}

fn parse_position(value: &Value) -> Result<Coord<f64>> {
    let pair = value
        .as_array()
        .filter(|a| a.len() >= 2)
        .ok_or_else(|| Error::InvalidInput(format!("invalid GeoJSON position: {value}")))?;
    match (pair[0].as_f64(), pair[1].as_f64()) {
        (Some(x), Some(y)) => Ok(Coord { x, y }),
        _ => Err(Error::InvalidInput(format!("invalid GeoJSON position: {value}"))),
    }
}

fn parse_positions(value: &Value) -> Result<Vec<Coord<f64>>> {
    value
        .as_array()
        .ok_or_else(|| Error::InvalidInput("expected an array of positions".to_string()))?
        .iter()
        .map(parse_position)
        .collect()
}

fn parse_polygon(value: &Value) -> Result<Polygon<f64>> {
    let rings = value
        .as_array()
        .ok_or_else(|| Error::InvalidInput("expected an array of rings".to_string()))?;
    let mut rings = rings.iter().map(|r| parse_positions(r).map(LineString::from));
    let exterior = rings
        .next()
        .transpose()?
        .ok_or_else(|| Error::InvalidInput("polygon without exterior ring".to_string()))?;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

/// Parse a GeoJSON geometry object
pub fn parse_geometry(value: &Value) -> Result<Geometry<f64>> {
    let kind = value["type"].as_str().unwrap_or_default();
    let coordinates = &value["coordinates"];

    match kind {
        "Point" => Ok(Geometry::Point(Point(parse_position(coordinates)?))),
        "MultiPoint" => Ok(Geometry::MultiPoint(MultiPoint(
            parse_positions(coordinates)?.into_iter().map(Point).collect(),
        ))),
        "LineString" => Ok(Geometry::LineString(LineString(parse_positions(coordinates)?))),
        "Polygon" => Ok(Geometry::Polygon(parse_polygon(coordinates)?)),
        "MultiPolygon" => {
            let polygons = coordinates
                .as_array()
                .ok_or_else(|| Error::InvalidInput("expected an array of polygons".to_string()))?
                .iter()
                .map(parse_polygon)
                .collect::<Result<Vec<_>>>()?;
            Ok(Geometry::MultiPolygon(MultiPolygon(polygons)))
        }
        other => Err(Error::InvalidGeometry(format!(
            "WKT type {other} is not supported."
        ))),
    }
}

impl FeatureSource {
    /// Create a layer; features are ordered by id
    pub fn new(crs: Crs, mut features: Vec<SourceFeature>) -> Self {
        features.sort_by_key(|f| f.id);
        Self { crs, features }
    }

    /// Parse a GeoJSON FeatureCollection
    ///
    /// Feature ids are the integer `id` members when every feature carries one,
    /// otherwise the position in the collection. A legacy `crs` member selects
    /// the source CRS; WGS84 is assumed without it.
    pub fn from_geojson(value: &Value) -> Result<Self> {
        if value["type"] != "FeatureCollection" {
            return Err(Error::InvalidInput(
                "expected a GeoJSON FeatureCollection".to_string(),
            ));
        }

        let crs = match value["crs"]["properties"]["name"].as_str() {
            Some(name) => Crs::from_name(name)?,
            None => Crs::Wgs84,
        };

        let raw = value["features"].as_array().cloned().unwrap_or_default();
        let all_numeric = raw.iter().all(|f| f["id"].as_u64().is_some());

        let features = raw
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                let id = if all_numeric {
                    feature["id"].as_u64().unwrap_or(index as u64)
                } else {
                    index as u64
                };
                Ok(SourceFeature {
                    id,
                    geometry: parse_geometry(&feature["geometry"])?,
                    properties: feature["properties"].as_object().cloned().unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(crs, features))
    }

    pub fn from_geojson_str(text: &str) -> Result<Self> {
        Self::from_geojson(&serde_json::from_str(text)?)
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features in id order
    pub fn features(&self) -> &[SourceFeature] {
        &self.features
    }

    /// Geometry type shared by every feature, `None` for an empty layer
    pub fn geometry_kind(&self) -> Result<Option<GeometryKind>> {
        let mut kind = None;
        for feature in &self.features {
            let this = GeometryKind::of(&feature.geometry)?;
            match kind {
                None => kind = Some(this),
                Some(k) if k != this => {
                    return Err(Error::UnsupportedLayer(format!(
                        "TypeError: Mixed geometry layers are not accepted ({k} and {this})."
                    )))
                }
                _ => {}
            }
        }
        Ok(kind)
    }

    /// Fail fast for MultiPoint layers where one point per feature is required
    pub fn ensure_single_points(&self) -> Result<()> {
        match self.geometry_kind()? {
            Some(GeometryKind::MultiPoint) => Err(Error::UnsupportedLayer(
                "TypeError: Multipoint Layers are not accepted. Please convert to single geometry layer."
                    .to_string(),
            )),
            Some(GeometryKind::Point) | None => Ok(()),
            Some(other) => Err(Error::InvalidGeometry(format!(
                "Only Point layers are allowed, got {other}."
            ))),
        }
    }

    fn location(&self, coord: Coord<f64>) -> Location {
        let c = self.crs.to_wgs84(coord);
        Location::new(c.x, c.y)
    }

    /// One location per Point feature, in id order
    pub fn point_locations(&self) -> Result<Vec<Location>> {
        self.ensure_single_points()?;
        Ok(self
            .features
            .iter()
            .filter_map(|f| match &f.geometry {
                Geometry::Point(p) => Some(self.location(p.0)),
                _ => None,
            })
            .collect())
    }

    /// All vertices of each feature (MultiPoint members or LineString vertices)
    pub fn vertex_locations(&self) -> Result<Vec<Vec<Location>>> {
        self.features
            .iter()
            .map(|f| match &f.geometry {
                Geometry::Point(p) => Ok(vec![self.location(p.0)]),
                Geometry::MultiPoint(mp) => Ok(mp.0.iter().map(|p| self.location(p.0)).collect()),
                Geometry::LineString(ls) => Ok(ls.coords().map(|c| self.location(*c)).collect()),
                other => Err(Error::InvalidGeometry(format!(
                    "WKT type {} is not supported.",
                    GeometryKind::of(other)?
                ))),
            })
            .collect()
    }

    /// Attribute values of a field, parallel to the feature order
    pub fn attributes(&self, field: &str) -> Vec<Value> {
        self.features.iter().map(|f| f.attribute(field)).collect()
    }

    /// Avoid locations from a point layer; MultiPoint layers contribute nothing
    pub fn avoid_locations(&self) -> Result<Vec<Location>> {
        if self.geometry_kind()? == Some(GeometryKind::MultiPoint) {
            return Ok(Vec::new());
        }
        self.point_locations()
    }

    /// Exterior rings of every polygon, one entry per (sub-)polygon
    ///
    /// Holes are dropped. Each ring is a list of rounded `[lon, lat]` pairs.
    pub fn exterior_rings(&self) -> Result<Vec<Vec<[f64; 2]>>> {
        let ring = |polygon: &Polygon<f64>| -> Vec<[f64; 2]> {
            polygon
                .exterior()
                .coords()
                .map(|c| {
                    let c = self.crs.to_wgs84(*c);
                    [round6(c.x), round6(c.y)]
                })
                .collect()
        };

        let mut rings = Vec::new();
        for feature in &self.features {
            match &feature.geometry {
                Geometry::Polygon(p) => rings.push(ring(p)),
                Geometry::MultiPolygon(mp) => rings.extend(mp.0.iter().map(&ring)),
                other => {
                    return Err(Error::InvalidGeometry(format!(
                        "WKT type {} is not supported.",
                        GeometryKind::of(other)?
                    )))
                }
            }
        }
        Ok(rings)
    }
}
