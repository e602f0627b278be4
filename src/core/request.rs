//! Request payloads for every Valhalla endpoint
//!
//! `RequestBuilder` holds what is shared between the requests of one batch
//! (costing options, avoidances, time, caller extras) and produces one
//! `RequestPayload` per unit of work. Pairing and chunking helpers enumerate
//! the units in a deterministic order.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::costing::CostingOptions;
use crate::core::error::{unknown_name, Error, Result};
use crate::core::location::Location;

/// Maximum number of sources and of targets per matrix request
pub const MATRIX_CHUNK_SIZE: usize = 50;

/// Properties requested from the roads stats endpoint
pub const STATS_PROPS: [&str; 3] = ["max_grade", "mean_elevation", "max_speed"];

/// Valhalla endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Route,
    Isochrone,
    SourcesToTargets,
    Locate,
    TraceAttributes,
    Centroid,
    RoadsStats,
}

impl Endpoint {
    pub const NAMES: [&'static str; 7] = [
        "route",
        "isochrone",
        "sources_to_targets",
        "locate",
        "trace_attributes",
        "centroid",
        "roads_stats",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Route => "route",
            Endpoint::Isochrone => "isochrone",
            Endpoint::SourcesToTargets => "sources_to_targets",
            Endpoint::Locate => "locate",
            Endpoint::TraceAttributes => "trace_attributes",
            Endpoint::Centroid => "centroid",
            Endpoint::RoadsStats => "roads_stats",
        }
    }

    /// URL path appended to the provider's base URL
    pub fn path(&self) -> String {
        format!("/{}", self.name())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let all = [
            Endpoint::Route,
            Endpoint::Isochrone,
            Endpoint::SourcesToTargets,
            Endpoint::Locate,
            Endpoint::TraceAttributes,
            Endpoint::Centroid,
            Endpoint::RoadsStats,
        ];
        all.into_iter()
            .find(|e| e.name() == s.trim().trim_start_matches('/'))
            .ok_or_else(|| unknown_name("endpoint", s, &Endpoint::NAMES))
    }
}

/// `date_time` block: `type` 0 = now, 1 = depart at, 2 = arrive by
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateTime {
    #[serde(rename = "type")]
    pub kind: u8,
    pub value: String,
}

impl DateTime {
    const FORMAT: &'static str = "%Y-%m-%dT%H:%M";

    /// Current local time, truncated to minutes
    pub fn now() -> Self {
        Self {
            kind: 0,
            value: Local::now().format(Self::FORMAT).to_string(),
        }
    }

    pub fn depart_at(at: NaiveDateTime) -> Self {
        Self {
            kind: 1,
            value: at.format(Self::FORMAT).to_string(),
        }
    }

    pub fn arrive_by(at: NaiveDateTime) -> Self {
        Self {
            kind: 2,
            value: at.format(Self::FORMAT).to_string(),
        }
    }

    /// Parse `YYYY-MM-DDTHH:MM`
    pub fn parse_value(value: &str) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(value, Self::FORMAT).map_err(|e| {
            Error::InvalidInput(format!("invalid date/time '{value}' (expected YYYY-MM-DDTHH:MM): {e}"))
        })
    }
}

/// Isochrone contour metric; each metric is its own request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsochroneMetric {
    /// Minutes
    Time,
    /// Kilometers
    Distance,
}

impl IsochroneMetric {
    pub fn key(&self) -> &'static str {
        match self {
            IsochroneMetric::Time => "time",
            IsochroneMetric::Distance => "distance",
        }
    }

    /// Name of the output layer holding this metric's features
    pub fn layer_name(&self) -> &'static str {
        match self {
            IsochroneMetric::Time => "Isochrones",
            IsochroneMetric::Distance => "Isodistances",
        }
    }
}

/// Whole numbers are sent as JSON integers
pub fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

/// Parse comma-separated contour intervals such as `"5, 10,15"`
pub fn parse_intervals(text: &str) -> Result<Vec<f64>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|v| *v > 0.0)
                .ok_or_else(|| {
                    Error::InvalidInput(
                        "Isochrone intervals need to be a comma-separated list of positive numbers."
                            .to_string(),
                    )
                })
        })
        .collect()
}

/// Avoid (or, for roads stats, exclude) locations and polygons
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Avoidances {
    pub locations: Vec<Location>,
    pub polygons: Vec<Vec<[f64; 2]>>,
}

/// One JSON request body
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestPayload {
    pub costing: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<Location>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape_match: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Location>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<Location>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub costing_options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contours: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polygons: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_locations: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denoise: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generalize: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avoid_locations: Option<Vec<Location>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avoid_polygons: Option<Vec<Vec<[f64; 2]>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_locations: Option<Vec<Location>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_polygons: Option<Vec<Vec<[f64; 2]>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_props: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_polygons: Option<Vec<Vec<[f64; 2]>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_aggregate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime>,
    /// Caller-supplied members, merged last
    #[serde(skip)]
    pub extra: Map<String, Value>,
}

impl RequestPayload {
    /// The JSON body sent to the API
    pub fn body(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(object) = value.as_object_mut() {
            for (key, extra) in &self.extra {
                object.insert(key.clone(), extra.clone());
            }
        }
        Ok(value)
    }

    /// Request id rendered for error reports
    pub fn id_label(&self) -> Option<String> {
        self.id.as_ref().map(value_label)
    }
}

/// Render an attribute value without JSON quoting for strings
pub fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Builds the payloads of one batch
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    options: CostingOptions,
    avoid: Avoidances,
    date_time: Option<DateTime>,
    extra: Map<String, Value>,
}

fn non_empty<T>(items: &[T]) -> Option<Vec<T>>
where
    T: Clone,
{
    (!items.is_empty()).then(|| items.to_vec())
}

impl RequestBuilder {
    pub fn new(options: CostingOptions) -> Self {
        Self {
            options,
            avoid: Avoidances::default(),
            date_time: None,
            extra: Map::new(),
        }
    }

    pub fn with_avoidances(mut self, avoid: Avoidances) -> Self {
        self.avoid = avoid;
        self
    }

    pub fn with_date_time(mut self, date_time: Option<DateTime>) -> Self {
        self.date_time = date_time;
        self
    }

    /// Extra members merged into every body; must be a JSON object
    pub fn with_extra(mut self, extra: Value) -> Result<Self> {
        match extra {
            Value::Object(map) => {
                self.extra = map;
                Ok(self)
            }
            Value::Null => Ok(self),
            other => Err(Error::InvalidInput(format!(
                "extra parameters must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn options(&self) -> &CostingOptions {
        &self.options
    }

    fn base(&self, id: Value) -> RequestPayload {
        RequestPayload {
            costing: self.options.profile().as_str().to_string(),
            id: (!id.is_null()).then_some(id),
            costing_options: self.options.assemble(),
            extra: self.extra.clone(),
            ..Default::default()
        }
    }

    fn with_avoid(&self, mut payload: RequestPayload) -> RequestPayload {
        payload.avoid_locations = non_empty(&self.avoid.locations);
        payload.avoid_polygons = non_empty(&self.avoid.polygons);
        payload
    }

    /// Route through 2+ locations
    pub fn route(&self, locations: &[Location], id: Value) -> Result<RequestPayload> {
        if locations.len() < 2 {
            return Err(Error::InvalidInput(format!(
                "a route needs at least 2 locations, got {}",
                locations.len()
            )));
        }
        let mut payload = self.with_avoid(self.base(id));
        payload.locations = Some(locations.to_vec());
        payload.date_time = self.date_time.clone();
        Ok(payload)
    }

    /// Gravity routing towards a common centroid
    pub fn centroid(&self, locations: &[Location], id: Value) -> Result<RequestPayload> {
        if locations.len() < 2 {
            return Err(Error::InvalidInput(format!(
                "a centroid needs at least 2 locations, got {}",
                locations.len()
            )));
        }
        let mut payload = self.with_avoid(self.base(id));
        payload.locations = Some(locations.to_vec());
        Ok(payload)
    }

    /// One isochrone request for one metric
    #[allow(clippy::too_many_arguments)]
    pub fn isochrone(
        &self,
        locations: &[Location],
        metric: IsochroneMetric,
        intervals: &[f64],
        polygons: bool,
        show_locations: bool,
        denoise: f64,
        generalize: f64,
        id: Value,
    ) -> Result<RequestPayload> {
        if locations.is_empty() || intervals.is_empty() {
            return Err(Error::InvalidInput(
                "an isochrone needs a location and at least one interval".to_string(),
            ));
        }
        let mut payload = self.with_avoid(self.base(id));
        payload.locations = Some(locations.to_vec());
        payload.contours = Some(
            intervals
                .iter()
                .map(|v| {
                    let mut contour = Map::new();
                    contour.insert(metric.key().to_string(), number(*v));
                    Value::Object(contour)
                })
                .collect(),
        );
        payload.polygons = Some(polygons);
        payload.show_locations = Some(show_locations);
        payload.denoise = (denoise != 0.0).then_some(denoise);
        payload.generalize = (generalize != 0.0).then_some(generalize);
        payload.date_time = self.date_time.clone();
        Ok(payload)
    }

    /// One sources_to_targets request
    pub fn matrix(
        &self,
        sources: &[Location],
        targets: &[Location],
        with_geometries: bool,
    ) -> Result<RequestPayload> {
        if sources.is_empty() || targets.is_empty() {
            return Err(Error::InvalidInput(
                "a matrix needs at least one source and one target".to_string(),
            ));
        }
        let mut payload = self.with_avoid(self.base(Value::from("matrix")));
        payload.sources = Some(sources.to_vec());
        payload.targets = Some(targets.to_vec());
        payload.shape_format = with_geometries.then(|| "polyline6".to_string());
        payload.date_time = self.date_time.clone();
        Ok(payload)
    }

    /// Map matching of an ordered trace
    pub fn trace_attributes(&self, shape: &[Location], id: Value) -> Result<RequestPayload> {
        if shape.len() < 2 {
            return Err(Error::InvalidInput(
                "a trace needs at least 2 points".to_string(),
            ));
        }
        let mut payload = self.with_avoid(self.base(id));
        payload.shape = Some(shape.to_vec());
        payload.shape_match = Some("map_snap".to_string());
        Ok(payload)
    }

    /// Point data lookup
    pub fn locate(&self, locations: &[Location], verbose: bool, id: Value) -> Result<RequestPayload> {
        if locations.is_empty() {
            return Err(Error::InvalidInput("locate needs at least one location".to_string()));
        }
        let mut payload = self.base(id);
        payload.locations = Some(locations.to_vec());
        payload.verbose = Some(verbose);
        Ok(payload)
    }

    /// Road statistics within polygons; avoidances become exclusions
    pub fn roads_stats(
        &self,
        polygons: &[Vec<[f64; 2]>],
        aggregate: bool,
        id: Value,
    ) -> Result<RequestPayload> {
        if polygons.is_empty() {
            return Err(Error::InvalidInput(
                "roads stats need at least one polygon".to_string(),
            ));
        }
        let mut payload = self.base(id);
        payload.stats_props = Some(STATS_PROPS.iter().map(|s| s.to_string()).collect());
        payload.stats_polygons = Some(polygons.to_vec());
        payload.stats_aggregate = aggregate.then_some(true);
        payload.exclude_locations = non_empty(&self.avoid.locations);
        payload.exclude_polygons = non_empty(&self.avoid.polygons);
        Ok(payload)
    }
}

/// Correlation between a start layer and an end layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingMode {
    /// start[i] with end[i], up to the shorter layer
    #[default]
    RowByRow,
    /// Cartesian product of start x end
    AllByAll,
}

impl FromStr for PairingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "rowbyrow" => Ok(PairingMode::RowByRow),
            "allbyall" => Ok(PairingMode::AllByAll),
            _ => Err(unknown_name("pairing mode", s, &["row-by-row", "all-by-all"])),
        }
    }
}

/// Index pairs `(start, end)` in start-then-end order, skipping identical positions
pub fn pair_locations(
    starts: &[Location],
    ends: &[Location],
    mode: PairingMode,
) -> Vec<(usize, usize)> {
    let pairs: Vec<(usize, usize)> = match mode {
        PairingMode::RowByRow => (0..starts.len().min(ends.len())).map(|i| (i, i)).collect(),
        PairingMode::AllByAll => (0..starts.len())
            .flat_map(|i| (0..ends.len()).map(move |j| (i, j)))
            .collect(),
    };

    pairs
        .into_iter()
        .filter(|&(i, j)| !starts[i].same_position(&ends[j]))
        .collect()
}

/// Consecutive index ranges of at most `size` elements
pub fn chunk_ranges(len: usize, size: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Source and target chunks covering the full cross product, sources outermost
pub fn matrix_chunks(
    sources: usize,
    targets: usize,
    size: usize,
) -> Vec<(Range<usize>, Range<usize>)> {
    let target_chunks = chunk_ranges(targets, size);
    chunk_ranges(sources, size)
        .into_iter()
        .flat_map(|s| target_chunks.iter().map(move |t| (s.clone(), t.clone())))
        .collect()
}

/// How a single point list is split into matrix sources and targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixSplit {
    #[default]
    ManyToMany,
    OneToMany,
    ManyToOne,
}

impl MatrixSplit {
    pub fn split(&self, locations: &[Location]) -> (Vec<Location>, Vec<Location>) {
        match self {
            MatrixSplit::ManyToMany => (locations.to_vec(), locations.to_vec()),
            MatrixSplit::OneToMany => (
                locations.iter().take(1).copied().collect(),
                locations.iter().skip(1).copied().collect(),
            ),
            MatrixSplit::ManyToOne => {
                let last = locations.len().saturating_sub(1);
                (locations[..last].to_vec(), locations[last..].to_vec())
            }
        }
    }
}

impl FromStr for MatrixSplit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "manytomany" => Ok(MatrixSplit::ManyToMany),
            "onetomany" => Ok(MatrixSplit::OneToMany),
            "manytoone" => Ok(MatrixSplit::ManyToOne),
            _ => Err(unknown_name(
                "matrix split",
                s,
                &["many-to-many", "one-to-many", "many-to-one"],
            )),
        }
    }
}
