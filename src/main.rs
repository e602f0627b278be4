//! # Valhalla-layers CLI
//!
//! Command-line interface for the valhalla-layers library.
//! Reads GeoJSON input layers, runs Valhalla requests and writes the resulting
//! feature layers as GeoJSON files.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::error;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use valhalla_layers::{
    Avoidances, Client, ClientOptions, Costing, CostingOptions, DateTime, FeatureSource,
    GeometryKind, IsochroneParams, Location, MatrixSplit, Outcome, PairingMode, Profile,
    ProviderConfig, RequestBuilder, RoutingMode, Valhalla,
};

mod cli;

use cli::ProgressFeedback;

/// Command-line interface for valhalla-layers
#[derive(Parser)]
#[command(name = "valhalla-layers")]
#[command(about = "Valhalla routing requests turned into GeoJSON feature layers")]
#[command(long_about = "Runs Valhalla requests and writes the results as GeoJSON layers:
  valhalla-layers route interactive -P 4.35,50.85 -P 4.40,50.88
  valhalla-layers -p bicycle isochrone -i stops.geojson --id-field name --time 5,10
  valhalla-layers matrix --sources a.geojson --targets b.geojson
  valhalla-layers locate -P 4.35,50.85 --verbose-response

Provider:
  --base-url / --key / --provider-name select the Valhalla instance (defaults to FOSSGIS);
  the key can also come from VALHALLA_KEY")]
#[command(version = env!("VALHALLA_LAYERS_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Valhalla base URL
    #[arg(long, global = true, default_value = "https://valhalla1.openstreetmap.de")]
    base_url: String,

    /// API key sent as access_token
    #[arg(long, global = true, env = "VALHALLA_KEY", default_value = "", hide_env_values = true)]
    key: String,

    /// Provider name shown in summaries
    #[arg(long, global = true, default_value = "Valhalla FOSSGIS")]
    provider_name: String,

    /// Costing profile: auto, truck, bicycle or pedestrian
    #[arg(short, long, global = true, default_value = "auto")]
    profile: Profile,

    /// Costing options of the profile as a JSON object
    #[arg(long, global = true)]
    costing: Option<String>,

    /// Shortest instead of fastest paths
    #[arg(long, global = true)]
    shortest: bool,

    /// Legal speed (km/h) added to the costing options of every request
    #[arg(long, global = true)]
    legal_speed: Option<u32>,

    /// Point layer (GeoJSON) of locations to avoid
    #[arg(long, global = true)]
    avoid_points: Option<PathBuf>,

    /// Polygon layer (GeoJSON) of areas to avoid
    #[arg(long, global = true)]
    avoid_polygons: Option<PathBuf>,

    /// Depart now
    #[arg(long, global = true, conflicts_with_all = ["depart_at", "arrive_by"])]
    now: bool,

    /// Depart at YYYY-MM-DDTHH:MM
    #[arg(long, global = true, conflicts_with = "arrive_by")]
    depart_at: Option<String>,

    /// Arrive by YYYY-MM-DDTHH:MM
    #[arg(long, global = true)]
    arrive_by: Option<String>,

    /// Extra request parameters as a JSON object
    #[arg(long, global = true)]
    extra: Option<String>,

    /// Directory for the written layers
    #[arg(short, long, global = true, default_value = ".")]
    output: PathBuf,

    /// Retry budget in seconds for rate-limited requests
    #[arg(long, global = true, default_value_t = 60)]
    retry_timeout: u64,

    /// Debug logging of every request
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Directions between points or along lines
    Route {
        #[command(subcommand)]
        input: RouteInput,
    },
    /// Time and distance isochrones
    Isochrone(IsochroneArgs),
    /// Sources to targets matrix
    Matrix(MatrixArgs),
    /// Gravity point reachable from all locations
    Centroid(PointsArgs),
    /// Edge attributes along a matched trace
    Trace(PointsArgs),
    /// Edges closest to locations
    Locate(LocateArgs),
    /// Road statistics inside polygons
    RoadsStats {
        /// Polygon layer (GeoJSON)
        #[arg(short, long)]
        input: PathBuf,
        /// One aggregated statistic over all polygons
        #[arg(long)]
        aggregate: bool,
    },
}

#[derive(Subcommand)]
enum RouteInput {
    /// Pair a start layer with an end layer
    PointsLayers {
        #[arg(long)]
        starts: PathBuf,
        #[arg(long, default_value = "id")]
        start_field: String,
        #[arg(long)]
        ends: PathBuf,
        #[arg(long, default_value = "id")]
        end_field: String,
        /// row-by-row or all-by-all
        #[arg(long, default_value = "row-by-row")]
        pairing: PairingMode,
    },
    /// One route through a point layer, or one per MultiPoint feature
    PointLayer {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, default_value = "id")]
        field: String,
    },
    /// One route per LineString feature
    Lines {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, default_value = "id")]
        field: String,
    },
    /// One route through the given points
    Interactive(PointsArgs),
}

/// Locations given inline or as a point layer
#[derive(Args)]
struct PointsArgs {
    /// Location as lon,lat (repeatable)
    #[arg(short = 'P', long = "point", value_parser = parse_point)]
    points: Vec<Location>,

    /// Point or LineString layer (GeoJSON)
    #[arg(short, long, conflicts_with = "points")]
    input: Option<PathBuf>,
}

#[derive(Args)]
struct IsochroneArgs {
    #[command(flatten)]
    locations: PointsArgs,

    /// Field used as the isochrone id when reading a layer
    #[arg(long, default_value = "id")]
    id_field: String,

    /// Time contours in minutes, e.g. 5,10,15
    #[arg(long)]
    time: Option<String>,

    /// Distance contours in kilometers
    #[arg(long)]
    distance: Option<String>,

    /// Lines instead of polygons
    #[arg(long)]
    lines: bool,

    #[arg(long)]
    show_locations: bool,

    #[arg(long, default_value_t = 0.0)]
    denoise: f64,

    #[arg(long, default_value_t = 0.0)]
    generalize: f64,

    /// One request for all locations
    #[arg(long)]
    aggregate: bool,
}

#[derive(Args)]
struct MatrixArgs {
    #[arg(long, requires = "targets")]
    sources: Option<PathBuf>,
    #[arg(long, default_value = "id")]
    source_field: String,
    #[arg(long, requires = "sources")]
    targets: Option<PathBuf>,
    #[arg(long, default_value = "id")]
    target_field: String,

    /// Location as lon,lat (repeatable)
    #[arg(short = 'P', long = "point", value_parser = parse_point, conflicts_with = "sources")]
    points: Vec<Location>,

    /// many-to-many, one-to-many or many-to-one for inline points
    #[arg(long, default_value = "many-to-many")]
    split: MatrixSplit,

    /// Request the path geometry of every pair
    #[arg(long)]
    geometries: bool,
}

#[derive(Args)]
struct LocateArgs {
    #[command(flatten)]
    locations: PointsArgs,

    /// Search radius in meters
    #[arg(long)]
    radius: Option<u32>,

    #[arg(long)]
    heading: Option<u32>,

    #[arg(long, requires = "heading")]
    heading_tolerance: Option<u32>,

    /// Ask for detailed edge information
    #[arg(long)]
    verbose_response: bool,
}

fn parse_point(s: &str) -> std::result::Result<Location, String> {
    let (lon, lat) = s
        .split_once(',')
        .ok_or_else(|| format!("expected lon,lat, got '{s}'"))?;
    let lon: f64 = lon.trim().parse().map_err(|e| format!("invalid longitude '{lon}': {e}"))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("invalid latitude '{lat}': {e}"))?;
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(format!("'{s}' is outside lon/lat bounds"));
    }
    Ok(Location::new(lon, lat))
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("🧭 Valhalla-layers v{} starting...", env!("VALHALLA_LAYERS_VERSION"));
        eprintln!("🌐 Provider: {} ({})", cli.provider_name, cli.base_url);
    }

    let feedback = Arc::new(ProgressFeedback::new(&format!(
        "🚗 Running {} with profile {}",
        cli.command.name(),
        cli.profile
    )));
    feedback.watch_ctrl_c();

    let client = Client::with_options(
        ProviderConfig {
            name: cli.provider_name.clone(),
            base_url: cli.base_url.clone(),
            key: cli.key.clone(),
        },
        ClientOptions {
            retry_timeout: Duration::from_secs(cli.retry_timeout),
            ..Default::default()
        },
    )?;
    let mut valhalla = Valhalla::new(client, build_request_builder(&cli)?, feedback.clone());

    let outcome = match dispatch(&cli.command, &mut valhalla).await {
        Ok(outcome) => outcome,
        Err(e) => {
            feedback.pb.abandon();
            if let Some(err) = e.downcast_ref::<valhalla_layers::Error>() {
                eprintln!("{}", valhalla.debug_summary(Some(err)));
            }
            return Err(e);
        }
    };
    feedback.finish(if outcome.cancelled { "cancelled" } else { "done" });

    report(&cli, &outcome)
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Route { .. } => "route",
            Command::Isochrone(_) => "isochrone",
            Command::Matrix(_) => "matrix",
            Command::Centroid(_) => "centroid",
            Command::Trace(_) => "trace",
            Command::Locate(_) => "locate",
            Command::RoadsStats { .. } => "roads stats",
        }
    }
}

/// Costing options, avoidances, date/time and extra parameters from the global flags
fn build_request_builder(cli: &Cli) -> Result<RequestBuilder> {
    let costing = match &cli.costing {
        Some(text) => {
            let value: Value = serde_json::from_str(text).context("Invalid --costing JSON")?;
            Costing::from_json(cli.profile, value)?
        }
        None => Costing::defaults(cli.profile),
    };

    let mut options = CostingOptions::new(costing);
    if cli.shortest {
        options = options.with_mode(RoutingMode::Shortest);
    }
    if let Some(speed) = cli.legal_speed {
        options = options.with_legal_speed(speed);
    }

    let mut avoid = Avoidances::default();
    if let Some(path) = &cli.avoid_points {
        avoid.locations = cli::read_source(path)?.avoid_locations()?;
    }
    if let Some(path) = &cli.avoid_polygons {
        avoid.polygons = cli::read_source(path)?.exterior_rings()?;
    }

    let date_time = if cli.now {
        Some(DateTime::now())
    } else if let Some(at) = &cli.depart_at {
        Some(DateTime::depart_at(DateTime::parse_value(at)?))
    } else if let Some(by) = &cli.arrive_by {
        Some(DateTime::arrive_by(DateTime::parse_value(by)?))
    } else {
        None
    };

    let mut builder = RequestBuilder::new(options)
        .with_avoidances(avoid)
        .with_date_time(date_time);
    if let Some(text) = &cli.extra {
        let extra: Value = serde_json::from_str(text).context("Invalid --extra JSON")?;
        builder = builder.with_extra(extra)?;
    }
    Ok(builder)
}

/// Inline points, or the points of a layer in id order
///
/// A LineString layer yields the vertices of all its lines.
fn resolve_locations(args: &PointsArgs) -> Result<Vec<Location>> {
    match &args.input {
        Some(path) => locations_of(&cli::read_source(path)?),
        None if args.points.is_empty() => bail!("Give locations with --point or --input"),
        None => Ok(args.points.clone()),
    }
}

fn locations_of(source: &FeatureSource) -> Result<Vec<Location>> {
    Ok(match source.geometry_kind()? {
        Some(GeometryKind::LineString) => source.vertex_locations()?.concat(),
        _ => source.point_locations()?,
    })
}

fn isochrone_params(args: &IsochroneArgs) -> Result<IsochroneParams> {
    let intervals = |text: &Option<String>| -> Result<Vec<f64>> {
        Ok(match text {
            Some(text) => valhalla_layers::parse_intervals(text)?,
            None => Vec::new(),
        })
    };
    let params = IsochroneParams {
        time_intervals: intervals(&args.time)?,
        distance_intervals: intervals(&args.distance)?,
        polygons: !args.lines,
        show_locations: args.show_locations,
        denoise: args.denoise,
        generalize: args.generalize,
        aggregate: args.aggregate,
    };
    if params.time_intervals.is_empty() && params.distance_intervals.is_empty() {
        bail!("Give contours with --time and/or --distance");
    }
    Ok(params)
}

async fn dispatch(command: &Command, valhalla: &mut Valhalla) -> Result<Outcome> {
    let outcome = match command {
        Command::Route { input } => match input {
            RouteInput::PointsLayers { starts, start_field, ends, end_field, pairing } => {
                let starts = cli::read_source(starts)?;
                let ends = cli::read_source(ends)?;
                valhalla
                    .directions_points_layers(&starts, start_field, &ends, end_field, *pairing)
                    .await?
            }
            RouteInput::PointLayer { input, field } => {
                let source = cli::read_source(input)?;
                valhalla.directions_point_layer(&source, field).await?
            }
            RouteInput::Lines { input, field } => {
                let source = cli::read_source(input)?;
                valhalla.directions_lines(&source, field).await?
            }
            RouteInput::Interactive(points) => {
                valhalla.directions_interactive(&resolve_locations(points)?).await?
            }
        },
        Command::Isochrone(args) => {
            let params = isochrone_params(args)?;
            match &args.locations.input {
                Some(path) => {
                    let source = cli::read_source(path)?;
                    valhalla.isochrones_layer(&source, &args.id_field, &params).await?
                }
                None => {
                    let locations = resolve_locations(&args.locations)?;
                    valhalla.isochrones_interactive(&locations, &params).await?
                }
            }
        }
        Command::Matrix(args) => match (&args.sources, &args.targets) {
            (Some(sources), Some(targets)) => {
                let sources = cli::read_source(sources)?;
                let targets = cli::read_source(targets)?;
                valhalla
                    .matrix_layers(&sources, &args.source_field, &targets, &args.target_field, args.geometries)
                    .await?
            }
            _ if args.points.is_empty() => bail!("Give --sources and --targets, or --point"),
            _ => valhalla.matrix_interactive(&args.points, args.split, args.geometries).await?,
        },
        Command::Centroid(points) => valhalla.centroid(&resolve_locations(points)?).await?,
        Command::Trace(points) => valhalla.trace_attributes(&resolve_locations(points)?).await?,
        Command::Locate(args) => {
            let locations: Vec<Location> = resolve_locations(&args.locations)?
                .into_iter()
                .map(|mut location| {
                    if let Some(radius) = args.radius {
                        location = location.with_radius(radius);
                    }
                    if let Some(heading) = args.heading {
                        location = location.with_heading(heading, args.heading_tolerance);
                    }
                    location
                })
                .collect();
            valhalla.locate(&locations, args.verbose_response).await?
        }
        Command::RoadsStats { input, aggregate } => {
            let polygons = cli::read_source(input)?;
            valhalla.roads_stats(&polygons, *aggregate).await?
        }
    };
    Ok(outcome)
}

/// Write the layers and print the response, failures and summary
fn report(cli: &Cli, outcome: &Outcome) -> Result<()> {
    if let Some(response) = &outcome.response {
        println!("{response}");
    }

    let layers: Vec<_> = outcome.layers.iter().filter(|l| !l.is_empty()).cloned().collect();
    for (path, layer) in cli::write_layers(&cli.output, &layers)?.iter().zip(&layers) {
        eprintln!("📁 {} ({} features) -> {}", layer.name, layer.len(), path.display());
    }

    if outcome.failed_units > 0 {
        eprintln!("⚠️  {} request(s) failed and were skipped", outcome.failed_units);
    }
    if outcome.cancelled {
        eprintln!("⏹️  Cancelled before all requests were sent");
    }
    eprintln!("{}", outcome.summary);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        let location = parse_point("4.35, 50.85").unwrap();
        assert_eq!(location, Location::new(4.35, 50.85));
    }

    #[test]
    fn test_parse_point_rejects_bad_input() {
        assert!(parse_point("4.35").is_err());
        assert!(parse_point("east,50").is_err());
        assert!(parse_point("200,50").is_err());
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "valhalla-layers",
            "route",
            "interactive",
            "-P",
            "4.35,50.85",
            "-P",
            "4.40,50.88",
            "--profile",
            "bicycle",
            "--shortest",
        ])
        .unwrap();

        assert_eq!(cli.profile, Profile::Bicycle);
        assert!(cli.shortest);
        match cli.command {
            Command::Route { input: RouteInput::Interactive(points) } => {
                assert_eq!(points.points.len(), 2);
            }
            _ => panic!("Expected interactive route"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_profile() {
        let result = Cli::try_parse_from(["valhalla-layers", "--profile", "atuo", "centroid"]);
        let err = result.err().unwrap().to_string();
        assert!(err.contains("Did you mean 'auto'?"));
    }

    #[test]
    fn test_builder_from_flags() {
        let cli = Cli::try_parse_from([
            "valhalla-layers",
            "--costing",
            r#"{"use_tolls": 0.5}"#,
            "--depart-at",
            "2024-05-01T08:30",
            "--extra",
            r#"{"units": "miles"}"#,
            "centroid",
        ])
        .unwrap();

        let builder = build_request_builder(&cli).unwrap();
        let locations = [Location::new(4.35, 50.85), Location::new(4.40, 50.88)];
        let body = builder.route(&locations, Value::Null).unwrap().body().unwrap();

        assert_eq!(body["costing_options"]["auto"]["use_tolls"], 0.5);
        assert_eq!(body["date_time"]["type"], 1);
        assert_eq!(body["date_time"]["value"], "2024-05-01T08:30");
        assert_eq!(body["units"], "miles");
    }

    #[test]
    fn test_isochrone_params_need_contours() {
        let cli = Cli::try_parse_from(["valhalla-layers", "isochrone", "-P", "4.35,50.85"]).unwrap();
        let Command::Isochrone(args) = &cli.command else {
            panic!("Expected isochrone");
        };
        assert!(isochrone_params(args).is_err());

        let cli = Cli::try_parse_from([
            "valhalla-layers",
            "isochrone",
            "-P",
            "4.35,50.85",
            "--time",
            "5,10",
            "--lines",
        ])
        .unwrap();
        let Command::Isochrone(args) = &cli.command else {
            panic!("Expected isochrone");
        };
        let params = isochrone_params(args).unwrap();
        assert_eq!(params.time_intervals, vec![5.0, 10.0]);
        assert!(!params.polygons);
    }
}
