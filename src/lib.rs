//! # Valhalla-layers Library
//!
//! Builds requests for the [Valhalla](https://github.com/valhalla/valhalla) routing API,
//! sends them with rate-limit aware retries and turns the responses into typed
//! feature layers that serialise to GeoJSON.
//!
//! ## Features
//!
//! - **Every endpoint**: route, isochrone, sources_to_targets, trace_attributes,
//!   centroid, locate and roads stats
//! - **Typed costing options**: one struct per profile, only truthy options are sent
//! - **Batch orchestration**: per-feature requests with progress, cancellation and
//!   per-unit error reporting
//! - **Retry with backoff**: HTTP 429 is retried with jittered exponential backoff
//!   inside a time budget
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use valhalla_layers::{Location, Profile, ProviderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let locations = [Location::new(13.388860, 52.517037), Location::new(13.397634, 52.529407)];
//!     let layer = valhalla_layers::route(&ProviderConfig::default(), Profile::Bicycle, &locations).await?;
//!     println!("{}", layer.to_geojson());
//!     Ok(())
//! }
//! ```
//!
//! ## Batches
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use valhalla_layers::{
//!     Client, CostingOptions, FeatureSource, LogFeedback, PairingMode, Profile, ProviderConfig,
//!     RequestBuilder, Valhalla,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let starts = FeatureSource::from_geojson_str(&std::fs::read_to_string("starts.geojson")?)?;
//!     let ends = FeatureSource::from_geojson_str(&std::fs::read_to_string("ends.geojson")?)?;
//!
//!     let client = Client::new(ProviderConfig::default())?;
//!     let builder = RequestBuilder::new(CostingOptions::defaults(Profile::Auto));
//!     let mut valhalla = Valhalla::new(client, builder, Arc::new(LogFeedback));
//!
//!     let outcome = valhalla
//!         .directions_points_layers(&starts, "name", &ends, "name", PairingMode::AllByAll)
//!         .await?;
//!     eprintln!("{}", outcome.summary);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub use crate::core::client::{
    backoff_delay, ClientOptions, Diagnostics, ProviderConfig, RateLimitCallback,
    DEFAULT_RETRY_TIMEOUT, USER_AGENT,
};
pub use crate::core::costing::{
    AutoCosting, BicycleCosting, BicycleType, Costing, CostingOptions, PedestrianCosting, Profile,
    RoutingMode, TruckCosting,
};
pub use crate::core::error::{suggest_correction, Error, Result};
pub use crate::core::features::{
    decode_centroid, decode_isochrone_points, decode_isochrones, decode_locate_edges,
    decode_matrix, decode_roads_stats, decode_route, decode_trace_attributes, geometry_to_geojson,
    FeatureLayer, Field, FieldKind, OutputFeature, Provenance,
};
pub use crate::core::location::{
    extract_locations, Crs, FeatureSource, GeometryKind, Location, SourceFeature,
};
pub use crate::core::orchestrate::{
    Feedback, IsochroneParams, LogFeedback, Outcome, MAX_MATRIX_FEATURES,
};
pub use crate::core::polyline::{decode_coords, decode_polyline6, encode_polyline, POLYLINE6_PRECISION};
pub use crate::core::request::{
    chunk_ranges, matrix_chunks, pair_locations, parse_intervals, Avoidances, DateTime, Endpoint,
    IsochroneMetric, MatrixSplit, PairingMode, RequestBuilder, RequestPayload, MATRIX_CHUNK_SIZE,
};
pub use crate::core::{Client, Valhalla};

// Internal modules
mod core;

/// Route through `locations` with default costing options
///
/// # Examples
/// ```rust,no_run
/// # use valhalla_layers::{Location, Profile, ProviderConfig};
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let stops = [Location::new(4.35, 50.85), Location::new(4.40, 50.88)];
/// let layer = valhalla_layers::route(&ProviderConfig::default(), Profile::Auto, &stops).await?;
/// assert_eq!(layer.len(), 1);
/// # Ok(())
/// # }
/// ```
pub async fn route(provider: &ProviderConfig, profile: Profile, locations: &[Location]) -> Result<FeatureLayer> {
    let mut valhalla = default_orchestrator(provider, profile)?;
    let outcome = valhalla.directions_interactive(locations).await?;
    first_layer(&mut valhalla, outcome)
}

/// Time isochrones (minutes) around each location with default costing options
pub async fn isochrones(
    provider: &ProviderConfig,
    profile: Profile,
    locations: &[Location],
    minutes: &[f64],
) -> Result<FeatureLayer> {
    let mut valhalla = default_orchestrator(provider, profile)?;
    let params = IsochroneParams {
        time_intervals: minutes.to_vec(),
        polygons: true,
        ..Default::default()
    };
    let outcome = valhalla.isochrones_interactive(locations, &params).await?;
    first_layer(&mut valhalla, outcome)
}

fn default_orchestrator(provider: &ProviderConfig, profile: Profile) -> Result<Valhalla> {
    let client = Client::new(provider.clone())?;
    let builder = RequestBuilder::new(CostingOptions::defaults(profile));
    Ok(Valhalla::new(client, builder, Arc::new(LogFeedback)))
}

/// Helpers surface a skipped unit as their error
fn first_layer(valhalla: &mut Valhalla, outcome: Outcome) -> Result<FeatureLayer> {
    if let Some(err) = valhalla.take_last_api_error() {
        return Err(err);
    }
    outcome
        .layers
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidInput("no layer produced".to_string()))
}
