//! End-to-end tests of the valhalla-layers binary
//!
//! Each test starts a mock Valhalla server, runs the built binary against it
//! and inspects the GeoJSON files it writes.
//!
//! Note: These tests are disabled during CI package verification to avoid
//! spawning processes during cargo publish.

use serde_json::{json, Value};
use std::path::Path;
use std::process::Output;
use tempfile::TempDir;
use valhalla_layers::{encode_polyline, POLYLINE6_PRECISION};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn run_cli(server: &MockServer, out: &Path, args: &[&str]) -> Output {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_valhalla-layers"))
        .args(["--base-url", &server.uri(), "--key", "k"])
        .arg("--output")
        .arg(out)
        .args(args)
        .env_remove("VALHALLA_KEY")
        .output()
        .await
        .expect("Failed to run valhalla-layers")
}

fn read_json(path: &Path) -> Value {
    let text = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()));
    serde_json::from_str(&text).unwrap()
}

#[cfg(not(feature = "ci-tests-disabled"))]
#[tokio::test]
async fn test_interactive_route_writes_layer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .and(query_param("access_token", "k"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "trip": {
                "legs": [{
                    "shape": encode_polyline(&[(50.85, 4.35), (50.88, 4.4)], POLYLINE6_PRECISION),
                    "summary": {"length": 4.2, "time": 1800}
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let output = run_cli(
        &server,
        dir.path(),
        &["-p", "bicycle", "route", "interactive", "-P", "4.35,50.85", "-P", "4.4,50.88"],
    )
    .await;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let layer = read_json(&dir.path().join("route_bicycle.geojson"));
    assert_eq!(layer["name"], "Route Bicycle");
    assert_eq!(layer["features"][0]["properties"]["DURATION_H"], 0.5);
    assert_eq!(layer["features"][0]["properties"]["PROFILE"], "bicycle");

    // The request summary is shown without --verbose too
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/route?access_token=k"));
    assert!(stderr.contains("\"costing\": \"bicycle\""));
    assert!(stderr.contains("Response time:"));
}

#[cfg(not(feature = "ci-tests-disabled"))]
#[tokio::test]
async fn test_locate_prints_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/locate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"input_lon": 4.35, "input_lat": 50.85, "edges": null, "nodes": null}
        ])))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let output = run_cli(&server, dir.path(), &["locate", "-P", "4.35,50.85"]).await;
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"input_lon\": 4.35"));
}

#[cfg(not(feature = "ci-tests-disabled"))]
#[tokio::test]
async fn test_invalid_key_fails_with_summary() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/centroid"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let output = run_cli(
        &server,
        dir.path(),
        &["centroid", "-P", "4.35,50.85", "-P", "4.4,50.88"],
    )
    .await;
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("InvalidKey"));
    assert!(stderr.contains("/centroid?access_token=k"));
}

#[cfg(not(feature = "ci-tests-disabled"))]
#[tokio::test]
async fn test_missing_input_file_is_reported() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nowhere.geojson");

    let output = run_cli(
        &server,
        dir.path(),
        &["roads-stats", "--input", missing.to_str().unwrap()],
    )
    .await;
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nowhere.geojson"));
}
