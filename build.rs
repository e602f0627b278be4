use std::env;

fn main() {
    // Version embedded in the User-Agent and `--version`
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    println!("cargo:rustc-env=VALHALLA_LAYERS_VERSION={}", version);

    println!("cargo:rerun-if-changed=src/");
    println!("cargo:rerun-if-changed=Cargo.toml");
}
