//! Output feature layers and response decoders
//!
//! Every endpoint has a fixed field schema. Decoders turn a parsed response into
//! [`OutputFeature`]s whose attributes line up with that schema, and a
//! [`FeatureLayer`] serialises them as a GeoJSON FeatureCollection.
//!
//! Distances are kilometers rounded to 3 decimals, durations are hours rounded
//! to 3 decimals.

use std::fmt;

use geo::{Coord, Geometry, LineString, MultiPoint, Point, Polygon};
use serde_json::{json, Map, Value};

use crate::core::costing::CostingOptions;
use crate::core::error::{Error, Result};
use crate::core::polyline::decode_coords;
use crate::core::request::{number, value_label, IsochroneMetric, STATS_PROPS};

/// Attribute type of an output field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Double,
    String,
    /// Copied from a caller-chosen source attribute
    Any,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Int => "int",
            FieldKind::Double => "double",
            FieldKind::String => "string",
            FieldKind::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.kind.as_str())
    }
}

fn schema(fields: &[(&str, FieldKind)]) -> Vec<Field> {
    fields.iter().map(|(name, kind)| Field::new(name, *kind)).collect()
}

use FieldKind::{Any, Double, Int};

pub fn route_fields() -> Vec<Field> {
    schema(&[
        ("DIST_KM", Double),
        ("DURATION_H", Double),
        ("PROFILE", FieldKind::String),
        ("OPTIONS", FieldKind::String),
        ("FROM_ID", Any),
        ("TO_ID", Any),
    ])
}

/// Isochrone polygons or lines; the id field is named after the source attribute
pub fn isochrone_fields(id_field: &str) -> Vec<Field> {
    schema(&[
        (id_field, Any),
        ("contour", Double),
        ("profile", FieldKind::String),
        ("options", FieldKind::String),
        ("metric", FieldKind::String),
    ])
}

/// Snapped and input locations of an isochrone
pub fn isochrone_point_fields() -> Vec<Field> {
    schema(&[("id", Any), ("type", FieldKind::String)])
}

pub fn matrix_fields() -> Vec<Field> {
    schema(&[
        ("FROM_ID", Any),
        ("TO_ID", Any),
        ("DIST_KM", Double),
        ("DURATION_H", Double),
        ("PROFILE", FieldKind::String),
        ("OPTIONS", FieldKind::String),
    ])
}

/// Centroid routes and the centroid point share one schema
pub fn centroid_fields() -> Vec<Field> {
    schema(&[
        ("ID", Int),
        ("DIST_KM", Double),
        ("DURATION_H", Double),
        ("PROFILE", FieldKind::String),
        ("OPTIONS", FieldKind::String),
    ])
}

pub fn trace_edge_fields() -> Vec<Field> {
    schema(&[
        ("EDGE_ID", Double),
        ("OSM_ID", Double),
        ("SPEED", Int),
        ("LENGTH", Double),
        ("MEAN_ELEVATION", Int),
        ("SRC_PERC", Double),
        ("TARGET_PERC", Double),
    ])
}

pub fn trace_point_fields() -> Vec<Field> {
    schema(&[
        ("TYPE", FieldKind::String),
        ("EDGE_INDEX", Double),
        ("DIST_ALONG_EDGE", Double),
        ("DIST_TO_INPUT", Double),
    ])
}

/// The first three names match the lowercase `stats_props` of the response
pub fn roads_stats_fields() -> Vec<Field> {
    schema(&[
        ("MAX_GRADE", Int),
        ("MEAN_ELEVATION", Int),
        ("MAX_SPEED", Int),
        ("PROFILE", FieldKind::String),
        ("OPTIONS", FieldKind::String),
    ])
}

pub fn locate_edge_fields() -> Vec<Field> {
    schema(&[("WAY_ID", Int)])
}

/// A decoded feature: optional geometry plus attributes in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFeature {
    pub geometry: Option<Geometry<f64>>,
    pub attributes: Vec<Value>,
}

impl OutputFeature {
    pub fn new(geometry: Option<Geometry<f64>>, attributes: Vec<Value>) -> Self {
        Self { geometry, attributes }
    }
}

/// Named collection of features sharing one schema
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayer {
    pub name: String,
    pub fields: Vec<Field>,
    pub features: Vec<OutputFeature>,
}

impl FeatureLayer {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
            features: Vec::new(),
        }
    }

    pub fn push(&mut self, feature: OutputFeature) {
        self.features.push(feature);
    }

    pub fn extend(&mut self, features: impl IntoIterator<Item = OutputFeature>) {
        self.features.extend(features);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// `DIST_KM:double, DURATION_H:double, ...`
    pub fn schema_label(&self) -> String {
        self.fields
            .iter()
            .map(Field::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// File-system friendly version of the layer name
    pub fn file_stem(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect()
    }

    /// GeoJSON FeatureCollection with properties in schema order
    pub fn to_geojson(&self) -> Value {
        let features: Vec<Value> = self
            .features
            .iter()
            .map(|feature| {
                let mut properties = Map::new();
                for (i, field) in self.fields.iter().enumerate() {
                    let value = feature.attributes.get(i).cloned().unwrap_or(Value::Null);
                    properties.insert(field.name.clone(), value);
                }
                json!({
                    "type": "Feature",
                    "geometry": feature.geometry.as_ref().map(geometry_to_geojson).unwrap_or(Value::Null),
                    "properties": properties,
                })
            })
            .collect();

        json!({
            "type": "FeatureCollection",
            "name": self.name,
            "features": features,
        })
    }
}

fn positions<'a>(coords: impl Iterator<Item = &'a Coord<f64>>) -> Value {
    Value::Array(coords.map(|c| json!([c.x, c.y])).collect())
}

fn rings(polygon: &Polygon<f64>) -> Value {
    let mut rings = vec![positions(polygon.exterior().0.iter())];
    rings.extend(polygon.interiors().iter().map(|ring| positions(ring.0.iter())));
    Value::Array(rings)
}

/// GeoJSON geometry object; geometry types no decoder produces map to `null`
pub fn geometry_to_geojson(geometry: &Geometry<f64>) -> Value {
    match geometry {
        Geometry::Point(p) => json!({"type": "Point", "coordinates": [p.x(), p.y()]}),
        Geometry::MultiPoint(mp) => json!({
            "type": "MultiPoint",
            "coordinates": positions(mp.0.iter().map(|p| &p.0)),
        }),
        Geometry::LineString(ls) => json!({
            "type": "LineString",
            "coordinates": positions(ls.0.iter()),
        }),
        Geometry::Polygon(poly) => json!({"type": "Polygon", "coordinates": rings(poly)}),
        Geometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": Value::Array(mp.0.iter().map(rings).collect()),
        }),
        _ => Value::Null,
    }
}

/// Profile name and options label stamped on every feature of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub profile: String,
    pub options: String,
}

impl Provenance {
    pub fn new(options: &CostingOptions) -> Self {
        Self {
            profile: options.profile().as_str().to_string(),
            options: options.options_label(),
        }
    }

    fn values(&self) -> [Value; 2] {
        [Value::from(self.profile.as_str()), Value::from(self.options.as_str())]
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn malformed(what: &str) -> Error {
    Error::GenericServerError {
        status: "200".to_string(),
        message: Some(format!("Malformed response: missing or invalid '{what}'")),
    }
}

fn member<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
    value.get(key).ok_or_else(|| malformed(key))
}

fn array<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    member(value, key)?.as_array().ok_or_else(|| malformed(key))
}

fn float(value: &Value, key: &str) -> Result<f64> {
    member(value, key)?.as_f64().ok_or_else(|| malformed(key))
}

fn text<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    member(value, key)?.as_str().ok_or_else(|| malformed(key))
}

fn position(value: &Value) -> Result<Coord<f64>> {
    match value.as_array().map(Vec::as_slice) {
        Some([x, y, ..]) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => Ok(Coord { x, y }),
            _ => Err(malformed("coordinates")),
        },
        _ => Err(malformed("coordinates")),
    }
}

fn position_list(value: &Value) -> Result<Vec<Coord<f64>>> {
    value
        .as_array()
        .ok_or_else(|| malformed("coordinates"))?
        .iter()
        .map(position)
        .collect()
}

/// `0`/`null` become 0, anything else is copied
fn or_zero(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::from(0),
        Some(v) if v.as_f64() == Some(0.0) => Value::from(0),
        Some(v) => v.clone(),
    }
}

struct TripSummary {
    coords: Vec<Coord<f64>>,
    distance: f64,
    duration: f64,
}

/// Leg shapes concatenated; totals are sums of per-leg rounded values
fn summarize_trip(trip: &Value) -> Result<TripSummary> {
    let mut coords = Vec::new();
    let mut distance = 0.0;
    let mut duration = 0.0;

    for leg in array(trip, "legs")? {
        coords.extend(decode_coords(text(leg, "shape")?)?);
        let summary = member(leg, "summary")?;
        duration += round3(float(summary, "time")? / 3600.0);
        distance += round3(float(summary, "length")?);
    }

    Ok(TripSummary {
        coords,
        distance: round3(distance),
        duration: round3(duration),
    })
}

/// One route line from a `/route` response
pub fn decode_route(
    response: &Value,
    provenance: &Provenance,
    from_value: Value,
    to_value: Value,
) -> Result<OutputFeature> {
    let trip = summarize_trip(member(response, "trip")?)?;
    let [profile, options] = provenance.values();

    Ok(OutputFeature::new(
        Some(Geometry::LineString(LineString::new(trip.coords))),
        vec![
            json!(trip.distance),
            json!(trip.duration),
            profile,
            options,
            from_value,
            to_value,
        ],
    ))
}

/// Route lines of every trip (main plus alternates) and the centroid point
///
/// The point sits on the last coordinate of the last trip and carries the
/// summed distance and duration of all trips.
pub fn decode_centroid(
    response: &Value,
    provenance: &Provenance,
) -> Result<(Vec<OutputFeature>, OutputFeature)> {
    let mut trips = vec![member(response, "trip")?];
    if let Some(alternates) = response.get("alternates").and_then(Value::as_array) {
        for alternate in alternates {
            trips.push(member(alternate, "trip")?);
        }
    }

    let [profile, options] = provenance.values();
    let mut routes = Vec::with_capacity(trips.len());
    let mut total_distance = 0.0;
    let mut total_duration = 0.0;
    let mut centroid = None;

    for (idx, trip) in trips.into_iter().enumerate() {
        let trip = summarize_trip(trip)?;
        total_distance += trip.distance;
        total_duration += trip.duration;
        centroid = trip.coords.last().copied();

        routes.push(OutputFeature::new(
            Some(Geometry::LineString(LineString::new(trip.coords))),
            vec![
                Value::from(idx),
                json!(trip.distance),
                json!(trip.duration),
                profile.clone(),
                options.clone(),
            ],
        ));
    }

    let centroid = centroid.ok_or_else(|| malformed("trip.legs.shape"))?;
    let point = OutputFeature::new(
        Some(Geometry::Point(Point::from(centroid))),
        vec![
            Value::from(0),
            json!(round3(total_distance)),
            json!(round3(total_duration)),
            profile,
            options,
        ],
    );

    Ok((routes, point))
}

/// Contour features of an `/isochrone` response, largest contour first
///
/// Only LineString and Polygon features are contours; polygons keep their
/// outer ring.
pub fn decode_isochrones(
    response: &Value,
    id_value: &Value,
    metric: IsochroneMetric,
    provenance: &Provenance,
) -> Result<Vec<OutputFeature>> {
    let mut contours = Vec::new();

    for feature in array(response, "features")? {
        let geometry = member(feature, "geometry")?;
        let coordinates = member(geometry, "coordinates")?;
        let geometry = match text(geometry, "type")? {
            "LineString" => Geometry::LineString(LineString::new(position_list(coordinates)?)),
            "Polygon" => {
                let outer = coordinates
                    .as_array()
                    .and_then(|rings| rings.first())
                    .ok_or_else(|| malformed("coordinates"))?;
                Geometry::Polygon(Polygon::new(LineString::new(position_list(outer)?), vec![]))
            }
            _ => continue,
        };
        let contour = float(member(feature, "properties")?, "contour")?;
        contours.push((contour, geometry));
    }

    // Stable, so equal contours keep response order
    contours.sort_by(|a, b| b.0.total_cmp(&a.0));

    let [profile, options] = provenance.values();
    Ok(contours
        .into_iter()
        .map(|(contour, geometry)| {
            OutputFeature::new(
                Some(geometry),
                vec![
                    id_value.clone(),
                    number(contour),
                    profile.clone(),
                    options.clone(),
                    Value::from(metric.key()),
                ],
            )
        })
        .collect())
}

/// Snapped (MultiPoint) and input (Point) locations shown with an isochrone
pub fn decode_isochrone_points(
    response: &Value,
    id_value: &Value,
) -> Result<(Vec<OutputFeature>, Vec<OutputFeature>)> {
    let mut snapped = Vec::new();
    let mut input = Vec::new();

    for feature in array(response, "features")? {
        let geometry = member(feature, "geometry")?;
        let kind = feature
            .get("properties")
            .and_then(|p| p.get("type"))
            .cloned()
            .unwrap_or(Value::Null);
        let attributes = vec![id_value.clone(), kind];

        match text(geometry, "type")? {
            "MultiPoint" => {
                let points = position_list(member(geometry, "coordinates")?)?;
                let points = MultiPoint::new(points.into_iter().map(Point::from).collect());
                snapped.push(OutputFeature::new(Some(Geometry::MultiPoint(points)), attributes));
            }
            "Point" => {
                let point = Point::from(position(member(geometry, "coordinates")?)?);
                input.push(OutputFeature::new(Some(Geometry::Point(point)), attributes));
            }
            _ => {}
        }
    }

    Ok((snapped, input))
}

fn location_label(locations: &[Value], index: usize, key: &str) -> Result<Value> {
    let location = locations.get(index).ok_or_else(|| malformed(key))?;
    Ok(Value::from(format!(
        "{}, {}",
        value_label(member(location, "lon")?),
        value_label(member(location, "lat")?)
    )))
}

/// One feature per source/target pair of a `/sources_to_targets` response
///
/// Sources and targets without a caller-supplied attribute at their index are
/// labelled `"{lon}, {lat}"`. Zero or missing times and distances are copied
/// unconverted.
pub fn decode_matrix(
    response: &Value,
    provenance: &Provenance,
    source_attrs: &[Value],
    target_attrs: &[Value],
    with_geometries: bool,
) -> Result<Vec<OutputFeature>> {
    let sources = array(response, "sources")?;
    let targets = array(response, "targets")?;
    let [profile, options] = provenance.values();
    let mut features = Vec::new();

    for (o, row) in array(response, "sources_to_targets")?.iter().enumerate() {
        let from_id = match source_attrs.get(o) {
            Some(value) => value.clone(),
            None => location_label(sources, o, "sources")?,
        };
        let row = row.as_array().ok_or_else(|| malformed("sources_to_targets"))?;

        for (d, cell) in row.iter().enumerate() {
            let to_id = match target_attrs.get(d) {
                Some(value) => value.clone(),
                None => location_label(targets, d, "targets")?,
            };
            let time = match cell.get("time") {
                Some(t) => match t.as_f64() {
                    Some(seconds) if seconds != 0.0 => json!(round3(seconds / 3600.0)),
                    _ => t.clone(),
                },
                None => Value::Null,
            };
            let distance = match cell.get("distance") {
                Some(length) => match length.as_f64() {
                    Some(km) if km != 0.0 => json!(round3(km)),
                    _ => length.clone(),
                },
                None => Value::Null,
            };

            let geometry = match cell.get("shape").and_then(Value::as_str) {
                Some(shape) if with_geometries && !shape.is_empty() => {
                    Some(Geometry::LineString(LineString::new(decode_coords(shape)?)))
                }
                _ => None,
            };

            features.push(OutputFeature::new(
                geometry,
                vec![
                    from_id.clone(),
                    to_id,
                    distance,
                    time,
                    profile.clone(),
                    options.clone(),
                ],
            ));
        }
    }

    Ok(features)
}

/// Edge lines and matched points of a `/trace_attributes` response
pub fn decode_trace_attributes(response: &Value) -> Result<(Vec<OutputFeature>, Vec<OutputFeature>)> {
    let shape = decode_coords(text(response, "shape")?)?;
    let attribute = |edge: &Value, key: &str| edge.get(key).cloned().unwrap_or(Value::Null);

    let mut edges = Vec::new();
    for edge in array(response, "edges")? {
        let begin = member(edge, "begin_shape_index")?
            .as_u64()
            .ok_or_else(|| malformed("begin_shape_index"))? as usize;
        let end = member(edge, "end_shape_index")?
            .as_u64()
            .ok_or_else(|| malformed("end_shape_index"))? as usize;
        let end = (end + 1).min(shape.len());
        let begin = begin.min(end);

        edges.push(OutputFeature::new(
            Some(Geometry::LineString(LineString::new(shape[begin..end].to_vec()))),
            vec![
                attribute(edge, "id"),
                attribute(edge, "way_id"),
                attribute(edge, "speed"),
                attribute(edge, "length"),
                attribute(edge, "mean_elevation"),
                attribute(edge, "source_percent_along"),
                attribute(edge, "target_percent_along"),
            ],
        ));
    }

    let mut points = Vec::new();
    if let Some(matched) = response.get("matched_points").and_then(Value::as_array) {
        for point in matched {
            let coord = Coord {
                x: float(point, "lon")?,
                y: float(point, "lat")?,
            };
            points.push(OutputFeature::new(
                Some(Geometry::Point(Point::from(coord))),
                vec![
                    attribute(point, "type"),
                    or_zero(point.get("edge_index")),
                    or_zero(point.get("distance_along_edge")),
                    or_zero(point.get("distance_from_trace_point")),
                ],
            ));
        }
    }

    Ok((edges, points))
}

/// One line per road of a `/roads_stats` response, with its indexed statistics
pub fn decode_roads_stats(response: &Value, provenance: &Provenance) -> Result<Vec<OutputFeature>> {
    let feature = array(response, "features")?
        .first()
        .ok_or_else(|| malformed("features"))?;
    let properties = member(feature, "properties")?;
    let lines = array(member(feature, "geometry")?, "coordinates")?;
    let [profile, options] = provenance.values();

    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let mut attributes: Vec<Value> = STATS_PROPS
                .iter()
                .map(|prop| {
                    properties
                        .get(*prop)
                        .and_then(|values| values.get(idx))
                        .cloned()
                        .unwrap_or(Value::Null)
                })
                .collect();
            attributes.push(profile.clone());
            attributes.push(options.clone());
            Ok(OutputFeature::new(
                Some(Geometry::LineString(LineString::new(position_list(line)?))),
                attributes,
            ))
        })
        .collect()
}

/// Distinct OSM ways found by a verbose `/locate` response
///
/// A way reported by several locations keeps its first position and the last
/// reported shape. Edges without `edge_info` are skipped.
pub fn decode_locate_edges(response: &Value) -> Result<Vec<OutputFeature>> {
    let clusters = response.as_array().ok_or_else(|| malformed("locations"))?;
    let mut ways: Vec<(Value, Vec<Coord<f64>>)> = Vec::new();

    for cluster in clusters {
        let Some(edges) = cluster.get("edges").and_then(Value::as_array) else {
            continue;
        };
        for edge in edges {
            let Some(info) = edge.get("edge_info") else {
                continue;
            };
            let way_id = member(info, "way_id")?.clone();
            let coords = decode_coords(text(info, "shape")?)?;
            match ways.iter().position(|(id, _)| *id == way_id) {
                Some(i) => ways[i].1 = coords,
                None => ways.push((way_id, coords)),
            }
        }
    }

    Ok(ways
        .into_iter()
        .map(|(way_id, coords)| {
            OutputFeature::new(Some(Geometry::LineString(LineString::new(coords))), vec![way_id])
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::costing::{AutoCosting, Costing, Profile};
    use crate::core::polyline::{encode_polyline, POLYLINE6_PRECISION};

    fn shape(lat_lon: &[(f64, f64)]) -> String {
        encode_polyline(lat_lon, POLYLINE6_PRECISION)
    }

    fn provenance() -> Provenance {
        Provenance::new(&CostingOptions::defaults(Profile::Pedestrian))
    }

    fn assert_schema_width(features: &[OutputFeature], fields: &[Field]) {
        for feature in features {
            assert_eq!(feature.attributes.len(), fields.len());
        }
    }

    #[test]
    fn test_provenance_labels() {
        let auto = AutoCosting {
            use_tolls: 0.5,
            ..Default::default()
        };
        let labelled = Provenance::new(&CostingOptions::new(Costing::Auto(auto)));
        assert_eq!(labelled.profile, "auto");
        assert_eq!(labelled.options, r#"{"use_tolls":0.5}"#);
        assert_eq!(provenance().options, "{}");
    }

    #[test]
    fn test_decode_route_sums_rounded_legs() {
        let response = json!({"trip": {"legs": [
            {"shape": shape(&[(52.5, 13.4), (52.6, 13.5)]), "summary": {"time": 1800.0, "length": 1.23456}},
            {"shape": shape(&[(52.6, 13.5), (52.7, 13.6)]), "summary": {"time": 900.0, "length": 2.0}},
        ]}});

        let feature = decode_route(&response, &provenance(), json!("A"), json!(7)).unwrap();
        assert_eq!(
            feature.attributes,
            vec![json!(3.235), json!(0.75), json!("pedestrian"), json!("{}"), json!("A"), json!(7)]
        );
        assert_schema_width(std::slice::from_ref(&feature), &route_fields());

        match feature.geometry {
            Some(Geometry::LineString(line)) => {
                assert_eq!(line.0.len(), 4);
                assert!((line.0[0].x - 13.4).abs() < 1e-9);
                assert!((line.0[0].y - 52.5).abs() < 1e-9);
            }
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_route_missing_trip_is_server_error() {
        let err = decode_route(&json!({}), &provenance(), Value::Null, Value::Null).unwrap_err();
        assert_eq!(err.kind(), "GenericServerError");
        assert!(err.to_string().contains("'trip'"));
    }

    #[test]
    fn test_isochrones_sorted_descending() {
        let ring = json!([[13.0, 52.0], [13.1, 52.0], [13.1, 52.1], [13.0, 52.0]]);
        let response = json!({"features": [
            {"geometry": {"type": "Polygon", "coordinates": [ring]}, "properties": {"contour": 5}},
            {"geometry": {"type": "Polygon", "coordinates": [ring]}, "properties": {"contour": 15}},
            {"geometry": {"type": "Polygon", "coordinates": [ring]}, "properties": {"contour": 10}},
            {"geometry": {"type": "MultiPoint", "coordinates": [[13.0, 52.0]]}, "properties": {"type": "snapped"}},
            {"geometry": {"type": "Point", "coordinates": [13.0, 52.0]}, "properties": {"type": "input"}},
        ]});

        let features =
            decode_isochrones(&response, &json!(42), IsochroneMetric::Time, &provenance()).unwrap();
        let contours: Vec<Value> = features.iter().map(|f| f.attributes[1].clone()).collect();
        assert_eq!(contours, vec![json!(15), json!(10), json!(5)]);
        assert_eq!(features[0].attributes[0], json!(42));
        assert_eq!(features[0].attributes[4], json!("time"));
        assert_schema_width(&features, &isochrone_fields("ID"));
        assert!(matches!(features[0].geometry, Some(Geometry::Polygon(_))));

        let (snapped, input) = decode_isochrone_points(&response, &json!(42)).unwrap();
        assert_eq!(snapped.len(), 1);
        assert_eq!(input.len(), 1);
        assert_eq!(snapped[0].attributes, vec![json!(42), json!("snapped")]);
        assert_eq!(input[0].attributes, vec![json!(42), json!("input")]);
    }

    #[test]
    fn test_isodistance_lines_keep_fractional_contours() {
        let response = json!({"features": [
            {"geometry": {"type": "LineString", "coordinates": [[13.0, 52.0], [13.1, 52.1]]},
             "properties": {"contour": 2.5}},
        ]});
        let features =
            decode_isochrones(&response, &Value::Null, IsochroneMetric::Distance, &provenance())
                .unwrap();
        assert_eq!(features[0].attributes[1], json!(2.5));
        assert_eq!(features[0].attributes[4], json!("distance"));
        assert!(matches!(features[0].geometry, Some(Geometry::LineString(_))));
    }

    #[test]
    fn test_decode_matrix_labels_and_units() {
        let response = json!({
            "sources": [{"lon": 1.0, "lat": 2.0}, {"lon": 3.5, "lat": 4.0}],
            "targets": [{"lon": 5.0, "lat": 6.0}],
            "sources_to_targets": [
                [{"time": 3600, "distance": 1.23456, "shape": shape(&[(2.0, 1.0), (6.0, 5.0)])}],
                [{"time": 0, "distance": null}],
            ],
        });

        let features =
            decode_matrix(&response, &provenance(), &[json!("a")], &[], true).unwrap();
        assert_eq!(features.len(), 2);
        assert_schema_width(&features, &matrix_fields());

        assert_eq!(features[0].attributes[0], json!("a"));
        assert_eq!(features[0].attributes[1], json!("5.0, 6.0"));
        assert_eq!(features[0].attributes[2], json!(1.235));
        assert_eq!(features[0].attributes[3], json!(1.0));
        assert!(matches!(features[0].geometry, Some(Geometry::LineString(_))));

        assert_eq!(features[1].attributes[0], json!("3.5, 4.0"));
        assert_eq!(features[1].attributes[2], Value::Null);
        assert_eq!(features[1].attributes[3], json!(0));
        assert_eq!(features[1].geometry, None);
    }

    #[test]
    fn test_decode_centroid_totals() {
        let trip = |time: f64, length: f64, end: (f64, f64)| {
            json!({"legs": [{"shape": shape(&[(52.0, 13.0), end]), "summary": {"time": time, "length": length}}]})
        };
        let response = json!({
            "trip": trip(3600.0, 10.0, (52.5, 13.5)),
            "alternates": [{"trip": trip(1800.0, 5.0, (52.5, 13.5))}],
        });

        let (routes, point) = decode_centroid(&response, &provenance()).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[1].attributes[0], json!(1));
        assert_eq!(point.attributes[..3], [json!(0), json!(15.0), json!(1.5)]);
        assert_schema_width(&routes, &centroid_fields());

        match point.geometry {
            Some(Geometry::Point(p)) => {
                assert!((p.x() - 13.5).abs() < 1e-9);
                assert!((p.y() - 52.5).abs() < 1e-9);
            }
            other => panic!("expected a point, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_trace_attributes() {
        let response = json!({
            "shape": shape(&[(52.0, 13.0), (52.1, 13.1), (52.2, 13.2), (52.3, 13.3)]),
            "edges": [
                {"id": 11, "way_id": 100, "speed": 50, "length": 0.2,
                 "begin_shape_index": 0, "end_shape_index": 2, "source_percent_along": 0.1},
                {"id": 12, "way_id": 101, "speed": 30, "length": 0.1,
                 "begin_shape_index": 2, "end_shape_index": 9},
            ],
            "matched_points": [
                {"type": "matched", "lon": 13.0, "lat": 52.0, "edge_index": 0, "distance_along_edge": 0.5},
                {"type": "unmatched", "lon": 13.3, "lat": 52.3},
            ],
        });

        let (edges, points) = decode_trace_attributes(&response).unwrap();
        assert_schema_width(&edges, &trace_edge_fields());
        assert_schema_width(&points, &trace_point_fields());

        assert_eq!(edges[0].attributes[..4], [json!(11), json!(100), json!(50), json!(0.2)]);
        assert_eq!(edges[0].attributes[4], Value::Null);
        assert_eq!(edges[0].attributes[5], json!(0.1));
        match &edges[0].geometry {
            Some(Geometry::LineString(line)) => assert_eq!(line.0.len(), 3),
            other => panic!("expected a line, got {other:?}"),
        }
        // Out of range end index is clamped to the shape
        match &edges[1].geometry {
            Some(Geometry::LineString(line)) => assert_eq!(line.0.len(), 2),
            other => panic!("expected a line, got {other:?}"),
        }

        assert_eq!(points[0].attributes, vec![json!("matched"), json!(0), json!(0.5), json!(0)]);
        assert_eq!(points[1].attributes, vec![json!("unmatched"), json!(0), json!(0), json!(0)]);
    }

    #[test]
    fn test_decode_roads_stats() {
        let response = json!({"features": [{
            "geometry": {"type": "MultiLineString", "coordinates": [
                [[0.0, 0.0], [1.0, 1.0]],
                [[2.0, 2.0], [3.0, 3.0]],
            ]},
            "properties": {"max_grade": [5, 7], "mean_elevation": [100, 200], "max_speed": [50, 80]},
        }]});

        let features = decode_roads_stats(&response, &provenance()).unwrap();
        assert_eq!(features.len(), 2);
        assert_schema_width(&features, &roads_stats_fields());
        assert_eq!(
            features[1].attributes,
            vec![json!(7), json!(200), json!(80), json!("pedestrian"), json!("{}")]
        );
    }

    #[test]
    fn test_decode_locate_edges_deduplicates_ways() {
        let first = shape(&[(52.0, 13.0), (52.1, 13.1)]);
        let second = shape(&[(52.0, 13.0), (52.1, 13.1), (52.2, 13.2)]);
        let response = json!([
            {"edges": [
                {"edge_info": {"way_id": 100, "shape": first}},
                {"edge_info": {"way_id": 200, "shape": first}},
            ]},
            {"edges": null},
            {"edges": [{"edge_info": {"way_id": 100, "shape": second}}, {"id": 5}]},
        ]);

        let ways = decode_locate_edges(&response).unwrap();
        assert_eq!(ways.len(), 2);
        assert_eq!(ways[0].attributes, vec![json!(100)]);
        assert_eq!(ways[1].attributes, vec![json!(200)]);
        match &ways[0].geometry {
            Some(Geometry::LineString(line)) => assert_eq!(line.0.len(), 3),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[test]
    fn test_layer_to_geojson() {
        let mut layer = FeatureLayer::new("Matrix Auto", matrix_fields());
        layer.push(OutputFeature::new(
            None,
            vec![json!("a"), json!("b"), json!(1.5), json!(0.25), json!("auto"), json!("{}")],
        ));
        layer.push(OutputFeature::new(
            Some(Geometry::Point(Point::new(13.0, 52.0))),
            vec![json!("c")],
        ));

        let geojson = layer.to_geojson();
        assert_eq!(geojson["type"], json!("FeatureCollection"));
        assert_eq!(geojson["name"], json!("Matrix Auto"));
        assert_eq!(geojson["features"][0]["geometry"], Value::Null);

        let keys: Vec<&String> = geojson["features"][0]["properties"]
            .as_object()
            .unwrap()
            .keys()
            .collect();
        assert_eq!(keys, ["FROM_ID", "TO_ID", "DIST_KM", "DURATION_H", "PROFILE", "OPTIONS"]);

        // Short attribute rows are padded with null
        assert_eq!(geojson["features"][1]["properties"]["TO_ID"], Value::Null);
        assert_eq!(
            geojson["features"][1]["geometry"],
            json!({"type": "Point", "coordinates": [13.0, 52.0]})
        );

        assert_eq!(layer.file_stem(), "matrix_auto");
        assert!(layer.schema_label().starts_with("FROM_ID:any, TO_ID:any, DIST_KM:double"));
    }
}
