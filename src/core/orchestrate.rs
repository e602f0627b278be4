//! Batch orchestration over the Valhalla endpoints
//!
//! One [`Valhalla`] instance runs one profile with one set of costing options.
//! Units of work (a feature, a pair of features, a matrix chunk) are sent
//! strictly one after the other. An `ApiError` is reported and the batch moves
//! on; any other error aborts it.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::Value;

use crate::core::client::Client;
use crate::core::costing::Profile;
use crate::core::error::{Error, Result};
use crate::core::features::{
    centroid_fields, decode_centroid, decode_isochrone_points, decode_isochrones,
    decode_locate_edges, decode_matrix, decode_roads_stats, decode_route, decode_trace_attributes,
    isochrone_fields, isochrone_point_fields, locate_edge_fields, matrix_fields,
    roads_stats_fields, route_fields, trace_edge_fields, trace_point_fields, FeatureLayer,
    Provenance,
};
use crate::core::location::{FeatureSource, GeometryKind, Location};
use crate::core::request::{
    matrix_chunks, pair_locations, value_label, Endpoint, IsochroneMetric, MatrixSplit,
    PairingMode, RequestBuilder, RequestPayload, MATRIX_CHUNK_SIZE,
};

/// Largest source or target layer a matrix batch accepts
pub const MAX_MATRIX_FEATURES: usize = 10_000;

/// Sink for progress, per-unit errors and cancellation
pub trait Feedback: Send + Sync {
    /// Called after every unit with `done / total * 100`
    fn set_progress(&self, percent: f64);

    fn report_error(&self, message: &str);

    /// Polled before every unit
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Feedback that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl Feedback for LogFeedback {
    fn set_progress(&self, percent: f64) {
        debug!("Progress: {percent:.1}%");
    }

    fn report_error(&self, message: &str) {
        warn!("{message}");
    }
}

/// Isochrone batch settings
#[derive(Debug, Clone, Default)]
pub struct IsochroneParams {
    /// Minutes
    pub time_intervals: Vec<f64>,
    /// Kilometers
    pub distance_intervals: Vec<f64>,
    /// Polygons instead of lines
    pub polygons: bool,
    pub show_locations: bool,
    pub denoise: f64,
    pub generalize: f64,
    /// One request with all locations instead of one per location
    pub aggregate: bool,
}

impl IsochroneParams {
    /// Requested metrics, time first; each one is its own request
    fn metrics(&self) -> Vec<(IsochroneMetric, Vec<f64>)> {
        [
            (IsochroneMetric::Time, &self.time_intervals),
            (IsochroneMetric::Distance, &self.distance_intervals),
        ]
        .into_iter()
        .filter(|(_, intervals)| !intervals.is_empty())
        .map(|(metric, intervals)| (metric, intervals.clone()))
        .collect()
    }
}

/// Result of one batch
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub layers: Vec<FeatureLayer>,
    /// Pretty-printed response of endpoints whose answer is shown as-is
    pub response: Option<String>,
    /// Units skipped after an `ApiError`
    pub failed_units: usize,
    pub cancelled: bool,
    /// Last URL, request body, timing and last unit error
    pub summary: String,
}

struct Progress {
    total: usize,
    done: usize,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self { total, done: 0 }
    }
}

fn title(profile: Profile) -> String {
    let name = profile.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Runs batches of requests for one profile against one provider
pub struct Valhalla {
    client: Client,
    builder: RequestBuilder,
    feedback: Arc<dyn Feedback>,
    last_body: Option<Value>,
    last_unit_error: Option<String>,
    last_api_error: Option<Error>,
    failed_units: usize,
}

impl Valhalla {
    /// Rate-limit retries are reported to `feedback` as they happen
    pub fn new(mut client: Client, builder: RequestBuilder, feedback: Arc<dyn Feedback>) -> Self {
        let observer = feedback.clone();
        client.on_rate_limit(Arc::new(move || {
            observer.report_error("OverQueryLimit: Retrying...");
        }));

        Self {
            client,
            builder,
            feedback,
            last_body: None,
            last_unit_error: None,
            last_api_error: None,
            failed_units: 0,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn builder(&self) -> &RequestBuilder {
        &self.builder
    }

    pub fn profile(&self) -> Profile {
        self.builder.options().profile()
    }

    /// Debug text for the last request, with the error that aborted the batch if any
    pub fn debug_summary(&self, error: Option<&Error>) -> String {
        self.client.debug_summary(self.last_body.as_ref(), error)
    }

    fn layer_name(&self, kind: &str) -> String {
        format!("{kind} {}", title(self.profile()))
    }

    fn begin(&mut self) {
        self.last_body = None;
        self.last_unit_error = None;
        self.last_api_error = None;
        self.failed_units = 0;
    }

    /// The last `ApiError` a batch skipped over, if any
    pub fn take_last_api_error(&mut self) -> Option<Error> {
        self.last_api_error.take()
    }

    fn cancelled(&self) -> bool {
        let cancelled = self.feedback.is_cancelled();
        if cancelled {
            info!("Cancelled, skipping remaining requests");
        }
        cancelled
    }

    fn tick(&self, progress: &mut Progress) {
        progress.done += 1;
        if progress.total > 0 {
            self.feedback
                .set_progress(progress.done as f64 / progress.total as f64 * 100.0);
        }
    }

    fn skip_unit(&mut self, message: String) {
        warn!("{message}");
        self.feedback.report_error(&message);
        self.failed_units += 1;
        self.last_unit_error = Some(message);
    }

    /// Send one unit; `None` when it failed with an `ApiError` that was reported
    async fn unit(
        &mut self,
        endpoint: Endpoint,
        payload: &RequestPayload,
        what: &str,
    ) -> Result<Option<Value>> {
        let body = payload.body()?;
        let sent = self.client.request(&endpoint.path(), &body).await;
        self.last_body = Some(body);

        match sent {
            Ok(response) => Ok(Some(response)),
            Err(err) => {
                let err = err.with_feature_id(payload.id_label());
                if err.aborts_batch() {
                    let message = format!("{}:\n{}", err.kind(), err);
                    error!("{message}");
                    self.feedback.report_error(&message);
                    Err(err)
                } else {
                    self.skip_unit(format!("{what} caused a {}:\n{}", err.kind(), err));
                    self.last_api_error = Some(err);
                    Ok(None)
                }
            }
        }
    }

    fn finish(&self, layers: Vec<FeatureLayer>, cancelled: bool, response: Option<String>) -> Outcome {
        for layer in &layers {
            info!("{}: {} features", layer.name, layer.len());
        }
        if self.failed_units > 0 {
            warn!("{} requests failed", self.failed_units);
        }

        let mut summary = self.debug_summary(None);
        if let Some(message) = &self.last_unit_error {
            summary.push_str(message);
            summary.push('\n');
        }

        Outcome {
            layers,
            response,
            failed_units: self.failed_units,
            cancelled,
            summary,
        }
    }

    /// One route per start/end pair of two point layers
    pub async fn directions_points_layers(
        &mut self,
        starts: &FeatureSource,
        start_field: &str,
        ends: &FeatureSource,
        end_field: &str,
        pairing: PairingMode,
    ) -> Result<Outcome> {
        self.begin();
        let start_locations = starts.point_locations()?;
        let end_locations = ends.point_locations()?;
        let start_values = starts.attributes(start_field);
        let end_values = ends.attributes(end_field);
        let pairs = pair_locations(&start_locations, &end_locations, pairing);

        let provenance = Provenance::new(self.builder.options());
        let mut layer = FeatureLayer::new(self.layer_name("Route"), route_fields());
        let mut progress = Progress::new(pairs.len());
        let mut cancelled = false;

        for (i, j) in pairs {
            if self.cancelled() {
                cancelled = true;
                break;
            }
            let (from, to) = (&start_values[i], &end_values[j]);
            let id = Value::from(format!("{} & {}", value_label(from), value_label(to)));
            let payload = self
                .builder
                .route(&[start_locations[i], end_locations[j]], id)?;
            let what = format!("Route from {} to {}", value_label(from), value_label(to));

            if let Some(response) = self.unit(Endpoint::Route, &payload, &what).await? {
                layer.push(decode_route(&response, &provenance, from.clone(), to.clone())?);
            }
            self.tick(&mut progress);
        }

        Ok(self.finish(vec![layer], cancelled, None))
    }

    /// Routes through the points of one layer
    ///
    /// A Point layer is one route through all points in id order. A MultiPoint
    /// layer is one route per feature through its members.
    pub async fn directions_point_layer(&mut self, source: &FeatureSource, field: &str) -> Result<Outcome> {
        self.begin();
        let groups: Vec<(Vec<Location>, Value)> = match source.geometry_kind()? {
            None => Vec::new(),
            Some(GeometryKind::Point) => vec![(source.point_locations()?, Value::from(""))],
            Some(GeometryKind::MultiPoint) => source
                .vertex_locations()?
                .into_iter()
                .zip(source.attributes(field))
                .collect(),
            Some(kind) => {
                return Err(Error::InvalidGeometry(format!(
                    "{kind} layers are not supported, use a Point or MultiPoint layer."
                )))
            }
        };
        self.route_groups(groups).await
    }

    /// One route per LineString feature through its vertices
    pub async fn directions_lines(&mut self, source: &FeatureSource, field: &str) -> Result<Outcome> {
        self.begin();
        let groups: Vec<(Vec<Location>, Value)> = match source.geometry_kind()? {
            None => Vec::new(),
            Some(GeometryKind::LineString) => source
                .vertex_locations()?
                .into_iter()
                .zip(source.attributes(field))
                .collect(),
            Some(kind) => {
                return Err(Error::InvalidGeometry(format!(
                    "{kind} layers are not supported, use a LineString layer."
                )))
            }
        };
        self.route_groups(groups).await
    }

    async fn route_groups(&mut self, groups: Vec<(Vec<Location>, Value)>) -> Result<Outcome> {
        let provenance = Provenance::new(self.builder.options());
        let mut layer = FeatureLayer::new(self.layer_name("Route"), route_fields());
        let mut progress = Progress::new(groups.len());
        let mut cancelled = false;

        for (locations, from) in groups {
            if self.cancelled() {
                cancelled = true;
                break;
            }
            let what = format!("Feature ID {}", value_label(&from));
            if locations.len() < 2 {
                self.skip_unit(format!("{what} has fewer than 2 points"));
                self.tick(&mut progress);
                continue;
            }

            let payload = self.builder.route(&locations, from.clone())?;
            if let Some(response) = self.unit(Endpoint::Route, &payload, &what).await? {
                layer.push(decode_route(&response, &provenance, from, Value::Null)?);
            }
            self.tick(&mut progress);
        }

        Ok(self.finish(vec![layer], cancelled, None))
    }

    /// One route through an ordered list of points
    pub async fn directions_interactive(&mut self, locations: &[Location]) -> Result<Outcome> {
        self.begin();
        let payload = self.builder.route(locations, Value::Null)?;
        let provenance = Provenance::new(self.builder.options());
        let mut layer = FeatureLayer::new(self.layer_name("Route"), route_fields());

        if self.cancelled() {
            return Ok(self.finish(vec![layer], true, None));
        }
        let mut progress = Progress::new(1);
        if let Some(response) = self.unit(Endpoint::Route, &payload, "Route").await? {
            let from = locations.first().map(Location::label).unwrap_or_default();
            let to = locations.last().map(Location::label).unwrap_or_default();
            layer.push(decode_route(&response, &provenance, from.into(), to.into())?);
        }
        self.tick(&mut progress);

        Ok(self.finish(vec![layer], false, None))
    }

    /// Isochrones around every point of a layer, labelled with `id_field`
    pub async fn isochrones_layer(
        &mut self,
        source: &FeatureSource,
        id_field: &str,
        params: &IsochroneParams,
    ) -> Result<Outcome> {
        self.begin();
        let locations = source.point_locations()?;
        let groups = if params.aggregate {
            vec![(locations, Value::from("0"))]
        } else {
            locations
                .into_iter()
                .zip(source.attributes(id_field))
                .map(|(location, id)| (vec![location], id))
                .collect()
        };
        self.run_isochrones(groups, id_field, params).await
    }

    /// Isochrones around drawn points, labelled by their position in the list
    pub async fn isochrones_interactive(
        &mut self,
        locations: &[Location],
        params: &IsochroneParams,
    ) -> Result<Outcome> {
        self.begin();
        let groups = if params.aggregate {
            vec![(locations.to_vec(), Value::from("0"))]
        } else {
            locations
                .iter()
                .enumerate()
                .map(|(i, location)| (vec![*location], Value::from(i.to_string())))
                .collect()
        };
        self.run_isochrones(groups, "ID", params).await
    }

    async fn run_isochrones(
        &mut self,
        groups: Vec<(Vec<Location>, Value)>,
        id_field: &str,
        params: &IsochroneParams,
    ) -> Result<Outcome> {
        let metrics = params.metrics();
        if metrics.is_empty() {
            return Err(Error::InvalidInput(
                "at least one time or distance interval is needed".to_string(),
            ));
        }

        let provenance = Provenance::new(self.builder.options());
        let mut progress = Progress::new(metrics.len() * groups.len());
        let mut layers = Vec::new();
        let mut snapped = FeatureLayer::new(self.layer_name("Snapped Points"), isochrone_point_fields());
        let mut input = FeatureLayer::new(self.layer_name("Input Points"), isochrone_point_fields());
        let mut cancelled = false;

        for (n, (metric, intervals)) in metrics.into_iter().enumerate() {
            let mut layer = FeatureLayer::new(self.layer_name(metric.layer_name()), isochrone_fields(id_field));

            for (locations, id) in &groups {
                if self.cancelled() {
                    cancelled = true;
                    break;
                }
                let payload = self.builder.isochrone(
                    locations,
                    metric,
                    &intervals,
                    params.polygons,
                    params.show_locations,
                    params.denoise,
                    params.generalize,
                    id.clone(),
                )?;
                let what = format!("Feature ID {}", value_label(id));

                if let Some(response) = self.unit(Endpoint::Isochrone, &payload, &what).await? {
                    layer.extend(decode_isochrones(&response, id, metric, &provenance)?);
                    // Both metrics echo the same locations
                    if params.show_locations && n == 0 {
                        let (snapped_points, input_points) = decode_isochrone_points(&response, id)?;
                        snapped.extend(snapped_points);
                        input.extend(input_points);
                    }
                }
                self.tick(&mut progress);
            }

            layers.push(layer);
            if cancelled {
                break;
            }
        }

        if params.show_locations {
            layers.push(snapped);
            layers.push(input);
        }
        Ok(self.finish(layers, cancelled, None))
    }

    /// Matrix between two point layers, in chunks of at most 50 x 50 locations
    pub async fn matrix_layers(
        &mut self,
        sources: &FeatureSource,
        source_field: &str,
        targets: &FeatureSource,
        target_field: &str,
        with_geometries: bool,
    ) -> Result<Outcome> {
        self.begin();
        if sources.len() > MAX_MATRIX_FEATURES || targets.len() > MAX_MATRIX_FEATURES {
            return Err(Error::InvalidInput(
                "ProcessingError: Too large input, please decimate.".to_string(),
            ));
        }
        let source_locations = sources.point_locations()?;
        let target_locations = targets.point_locations()?;
        let source_values = sources.attributes(source_field);
        let target_values = targets.attributes(target_field);

        let chunks = matrix_chunks(source_locations.len(), target_locations.len(), MATRIX_CHUNK_SIZE);
        let provenance = Provenance::new(self.builder.options());
        let mut layer = FeatureLayer::new(self.layer_name("Matrix"), matrix_fields());
        let mut progress = Progress::new(chunks.len());
        let mut cancelled = false;

        for (n, (s, t)) in chunks.iter().enumerate() {
            if self.cancelled() {
                cancelled = true;
                break;
            }
            let payload = self.builder.matrix(
                &source_locations[s.clone()],
                &target_locations[t.clone()],
                with_geometries,
            )?;
            let what = format!("Matrix chunk {}/{}", n + 1, chunks.len());
            debug!("{what}: sources {s:?}, targets {t:?}");

            if let Some(response) = self.unit(Endpoint::SourcesToTargets, &payload, &what).await? {
                layer.extend(decode_matrix(
                    &response,
                    &provenance,
                    &source_values[s.clone()],
                    &target_values[t.clone()],
                    with_geometries,
                )?);
            }
            self.tick(&mut progress);
        }

        Ok(self.finish(vec![layer], cancelled, None))
    }

    /// Matrix over one drawn point list, split into sources and targets
    pub async fn matrix_interactive(
        &mut self,
        locations: &[Location],
        split: MatrixSplit,
        with_geometries: bool,
    ) -> Result<Outcome> {
        self.begin();
        let (sources, targets) = split.split(locations);
        let payload = self.builder.matrix(&sources, &targets, with_geometries)?;
        let provenance = Provenance::new(self.builder.options());
        let mut layer = FeatureLayer::new(self.layer_name("Matrix"), matrix_fields());

        if self.cancelled() {
            return Ok(self.finish(vec![layer], true, None));
        }
        let mut progress = Progress::new(1);
        if let Some(response) = self.unit(Endpoint::SourcesToTargets, &payload, "Matrix").await? {
            layer.extend(decode_matrix(&response, &provenance, &[], &[], with_geometries)?);
        }
        self.tick(&mut progress);

        Ok(self.finish(vec![layer], false, None))
    }

    /// Routes from every location to their common centroid
    pub async fn centroid(&mut self, locations: &[Location]) -> Result<Outcome> {
        self.begin();
        let payload = self.builder.centroid(locations, Value::Null)?;
        let provenance = Provenance::new(self.builder.options());
        let mut routes = FeatureLayer::new(self.layer_name("Centroid Routes"), centroid_fields());
        let mut point = FeatureLayer::new(self.layer_name("Centroid Point"), centroid_fields());

        if self.cancelled() {
            return Ok(self.finish(vec![routes, point], true, None));
        }
        let mut progress = Progress::new(1);
        if let Some(response) = self.unit(Endpoint::Centroid, &payload, "Centroid").await? {
            let (lines, centroid) = decode_centroid(&response, &provenance)?;
            routes.extend(lines);
            point.push(centroid);
        }
        self.tick(&mut progress);

        Ok(self.finish(vec![routes, point], false, None))
    }

    /// Map-match an ordered trace and return its edges and matched points
    pub async fn trace_attributes(&mut self, shape: &[Location]) -> Result<Outcome> {
        self.begin();
        let payload = self.builder.trace_attributes(shape, Value::Null)?;
        let mut edges = FeatureLayer::new(self.layer_name("Trace Edges"), trace_edge_fields());
        let mut points = FeatureLayer::new(self.layer_name("Trace Points"), trace_point_fields());

        if self.cancelled() {
            return Ok(self.finish(vec![edges, points], true, None));
        }
        let mut progress = Progress::new(1);
        if let Some(response) = self.unit(Endpoint::TraceAttributes, &payload, "Trace").await? {
            let (edge_features, point_features) = decode_trace_attributes(&response)?;
            edges.extend(edge_features);
            points.extend(point_features);
        }
        self.tick(&mut progress);

        Ok(self.finish(vec![edges, points], false, None))
    }

    /// Locate the graph around points; the raw response is returned pretty-printed
    ///
    /// With `verbose`, the OSM ways found are also returned as a "Locate Edges" layer.
    pub async fn locate(&mut self, locations: &[Location], verbose: bool) -> Result<Outcome> {
        self.begin();
        let payload = self.builder.locate(locations, verbose, Value::Null)?;
        let mut layers = Vec::new();

        if self.cancelled() {
            return Ok(self.finish(layers, true, None));
        }
        let mut progress = Progress::new(1);
        let mut pretty = None;
        if let Some(response) = self.unit(Endpoint::Locate, &payload, "Locate").await? {
            pretty = Some(serde_json::to_string_pretty(&response)?);
            let ways = decode_locate_edges(&response)?;
            if !ways.is_empty() {
                let mut layer = FeatureLayer::new("Locate Edges", locate_edge_fields());
                layer.extend(ways);
                layers.push(layer);
            }
        }
        self.tick(&mut progress);

        Ok(self.finish(layers, false, pretty))
    }

    /// Road statistics inside the polygons of a layer
    pub async fn roads_stats(&mut self, polygons: &FeatureSource, aggregate: bool) -> Result<Outcome> {
        self.begin();
        let rings = polygons.exterior_rings()?;
        let payload = self.builder.roads_stats(&rings, aggregate, Value::Null)?;
        let provenance = Provenance::new(self.builder.options());
        let mut layer = FeatureLayer::new(self.layer_name("Roads Stats"), roads_stats_fields());

        if self.cancelled() {
            return Ok(self.finish(vec![layer], true, None));
        }
        let mut progress = Progress::new(1);
        if let Some(response) = self.unit(Endpoint::RoadsStats, &payload, "Roads stats").await? {
            layer.extend(decode_roads_stats(&response, &provenance)?);
        }
        self.tick(&mut progress);

        Ok(self.finish(vec![layer], false, None))
    }
}
