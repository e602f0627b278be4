//! Costing options per transportation profile
//!
//! Each profile has an explicit struct listing every option Valhalla recognises
//! for it. Fields are emitted in declaration order and only when truthy, so
//! server-side defaults are never overridden by zero values.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::core::error::{unknown_name, Error, Result};

/// Feet to meters divisor for truck dimensions
const FEET_PER_METER: f64 = 3.28084;

/// Transportation profile ("costing model")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    Auto,
    Truck,
    Bicycle,
    Pedestrian,
}

impl Profile {
    pub const ALL: [Profile; 4] = [Profile::Auto, Profile::Truck, Profile::Bicycle, Profile::Pedestrian];
    pub const NAMES: [&'static str; 4] = ["auto", "truck", "bicycle", "pedestrian"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Auto => "auto",
            Profile::Truck => "truck",
            Profile::Bicycle => "bicycle",
            Profile::Pedestrian => "pedestrian",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Profile::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| unknown_name("profile", s, &Profile::NAMES))
    }
}

/// Fastest or shortest path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    #[default]
    Fastest,
    Shortest,
}

impl FromStr for RoutingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fastest" => Ok(RoutingMode::Fastest),
            "shortest" => Ok(RoutingMode::Shortest),
            other => Err(unknown_name("routing mode", other, &["fastest", "shortest"])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BicycleType {
    Hybrid,
    Road,
    Cross,
    Mountain,
}

impl BicycleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BicycleType::Hybrid => "Hybrid",
            BicycleType::Road => "Road",
            BicycleType::Cross => "Cross",
            BicycleType::Mountain => "Mountain",
        }
    }
}

/// Accumulates `(name, value)` pairs, skipping falsy values
#[derive(Default)]
struct OptionsWriter {
    map: Map<String, Value>,
}

impl OptionsWriter {
    fn int(&mut self, name: &str, value: u32) -> &mut Self {
        if value != 0 {
            self.map.insert(name.to_string(), json!(value));
        }
        self
    }

    fn float(&mut self, name: &str, value: f64) -> &mut Self {
        if value != 0.0 {
            self.map.insert(name.to_string(), json!(value));
        }
        self
    }

    fn flag(&mut self, name: &str, value: bool) -> &mut Self {
        if value {
            self.map.insert(name.to_string(), json!(true));
        }
        self
    }

    fn text(&mut self, name: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.map.insert(name.to_string(), json!(value));
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoCosting {
    pub maneuver_penalty: u32,
    pub country_crossing_penalty: u32,
    pub toll_booth_penalty: u32,
    pub gate_cost: u32,
    pub ferry_cost: u32,
    pub country_crossing_cost: u32,
    pub toll_booth_cost: u32,
    pub use_highways: f64,
    pub use_ferry: f64,
    pub use_tolls: f64,
}

impl AutoCosting {
    fn write(&self, w: &mut OptionsWriter) {
        w.int("maneuver_penalty", self.maneuver_penalty)
            .int("country_crossing_penalty", self.country_crossing_penalty)
            .int("toll_booth_penalty", self.toll_booth_penalty)
            .int("gate_cost", self.gate_cost)
            .int("ferry_cost", self.ferry_cost)
            .int("country_crossing_cost", self.country_crossing_cost)
            .int("toll_booth_cost", self.toll_booth_cost)
            .float("use_highways", self.use_highways)
            .float("use_ferry", self.use_ferry)
            .float("use_tolls", self.use_tolls);
    }
}

/// Truck options; `width` and `length` are given in feet
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TruckCosting {
    pub maneuver_penalty: u32,
    pub country_crossing_penalty: u32,
    pub toll_booth_penalty: u32,
    pub gate_cost: u32,
    pub ferry_cost: u32,
    pub country_crossing_cost: u32,
    pub toll_booth_cost: u32,
    pub use_highways: f64,
    pub use_ferry: f64,
    pub use_tolls: f64,
    pub weight: f64,
    pub height: f64,
    pub width: f64,
    pub length: f64,
    pub axle_load: f64,
    pub hazmat: bool,
}

fn feet_to_meters(feet: f64) -> f64 {
    (feet / FEET_PER_METER * 100.0).round() / 100.0
}

impl TruckCosting {
    fn write(&self, w: &mut OptionsWriter) {
        w.int("maneuver_penalty", self.maneuver_penalty)
            .int("country_crossing_penalty", self.country_crossing_penalty)
            .int("toll_booth_penalty", self.toll_booth_penalty)
            .int("gate_cost", self.gate_cost)
            .int("ferry_cost", self.ferry_cost)
            .int("country_crossing_cost", self.country_crossing_cost)
            .int("toll_booth_cost", self.toll_booth_cost)
            .float("use_highways", self.use_highways)
            .float("use_ferry", self.use_ferry)
            .float("use_tolls", self.use_tolls)
            .float("weight", self.weight)
            .float("height", self.height)
            .float("width", feet_to_meters(self.width))
            .float("length", feet_to_meters(self.length))
            .float("axle_load", self.axle_load)
            .flag("hazmat", self.hazmat);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BicycleCosting {
    pub bicycle_type: Option<BicycleType>,
    pub cycling_speed: u32,
    pub maneuver_penalty: u32,
    pub country_crossing_penalty: u32,
    pub country_crossing_cost: u32,
    pub gate_cost: u32,
    pub use_ferry: f64,
    pub use_roads: f64,
    pub use_hills: f64,
    pub avoid_bad_surfaces: f64,
}

impl BicycleCosting {
    fn write(&self, w: &mut OptionsWriter) {
        w.text("bicycle_type", self.bicycle_type.as_ref().map(BicycleType::as_str))
            .int("cycling_speed", self.cycling_speed)
            .int("maneuver_penalty", self.maneuver_penalty)
            .int("country_crossing_penalty", self.country_crossing_penalty)
            .int("country_crossing_cost", self.country_crossing_cost)
            .int("gate_cost", self.gate_cost)
            .float("use_ferry", self.use_ferry)
            .float("use_roads", self.use_roads)
            .float("use_hills", self.use_hills)
            .float("avoid_bad_surfaces", self.avoid_bad_surfaces);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PedestrianCosting {
    pub walking_speed: u32,
    pub max_hiking_difficulty: u32,
    pub step_penalty: u32,
    pub use_ferry: f64,
    pub walkway_factor: f64,
    pub alley_factor: f64,
    pub driveway_factor: f64,
}

impl PedestrianCosting {
    fn write(&self, w: &mut OptionsWriter) {
        w.int("walking_speed", self.walking_speed)
            .int("max_hiking_difficulty", self.max_hiking_difficulty)
            .int("step_penalty", self.step_penalty)
            .float("use_ferry", self.use_ferry)
            .float("walkway_factor", self.walkway_factor)
            .float("alley_factor", self.alley_factor)
            .float("driveway_factor", self.driveway_factor);
    }
}

/// Profile-specific option set; the variant determines the profile
#[derive(Debug, Clone, PartialEq)]
pub enum Costing {
    Auto(AutoCosting),
    Truck(TruckCosting),
    Bicycle(BicycleCosting),
    Pedestrian(PedestrianCosting),
}

impl Costing {
    /// All options at their defaults for a profile
    pub fn defaults(profile: Profile) -> Self {
        match profile {
            Profile::Auto => Costing::Auto(AutoCosting::default()),
            Profile::Truck => Costing::Truck(TruckCosting::default()),
            Profile::Bicycle => Costing::Bicycle(BicycleCosting::default()),
            Profile::Pedestrian => Costing::Pedestrian(PedestrianCosting::default()),
        }
    }

    /// Read a profile's options from a JSON object; unknown keys are rejected
    pub fn from_json(profile: Profile, value: Value) -> Result<Self> {
        let invalid = |e: serde_json::Error| {
            Error::InvalidInput(format!("invalid {profile} costing options: {e}"))
        };
        Ok(match profile {
            Profile::Auto => Costing::Auto(serde_json::from_value(value).map_err(invalid)?),
            Profile::Truck => Costing::Truck(serde_json::from_value(value).map_err(invalid)?),
            Profile::Bicycle => Costing::Bicycle(serde_json::from_value(value).map_err(invalid)?),
            Profile::Pedestrian => {
                Costing::Pedestrian(serde_json::from_value(value).map_err(invalid)?)
            }
        })
    }

    pub fn profile(&self) -> Profile {
        match self {
            Costing::Auto(_) => Profile::Auto,
            Costing::Truck(_) => Profile::Truck,
            Costing::Bicycle(_) => Profile::Bicycle,
            Costing::Pedestrian(_) => Profile::Pedestrian,
        }
    }

    fn write(&self, w: &mut OptionsWriter) {
        match self {
            Costing::Auto(c) => c.write(w),
            Costing::Truck(c) => c.write(w),
            Costing::Bicycle(c) => c.write(w),
            Costing::Pedestrian(c) => c.write(w),
        }
    }
}

/// Everything that goes into a request's `costing_options`
#[derive(Debug, Clone, PartialEq)]
pub struct CostingOptions {
    pub costing: Costing,
    pub mode: RoutingMode,
    /// Legal speed limit; 0 leaves it unset
    pub legal_speed: u32,
}

impl CostingOptions {
    pub fn new(costing: Costing) -> Self {
        Self {
            costing,
            mode: RoutingMode::Fastest,
            legal_speed: 0,
        }
    }

    pub fn defaults(profile: Profile) -> Self {
        Self::new(Costing::defaults(profile))
    }

    pub fn with_mode(mut self, mode: RoutingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_legal_speed(mut self, legal_speed: u32) -> Self {
        self.legal_speed = legal_speed;
        self
    }

    pub fn profile(&self) -> Profile {
        self.costing.profile()
    }

    /// The profile's options block, `None` when nothing would be sent
    ///
    /// The shortest mode and a legal speed limit force the block to exist.
    pub fn profile_options(&self) -> Option<Map<String, Value>> {
        let mut writer = OptionsWriter::default();
        self.costing.write(&mut writer);
        writer
            .flag("shortest", self.mode == RoutingMode::Shortest)
            .int("legal_speed", self.legal_speed);

        let forced = self.mode == RoutingMode::Shortest || self.legal_speed != 0;
        if writer.map.is_empty() && !forced {
            None
        } else {
            Some(writer.map)
        }
    }

    /// The `costing_options` request member, `{profile: {...}}`
    pub fn assemble(&self) -> Option<Value> {
        self.profile_options()
            .map(|block| json!({ self.profile().as_str(): block }))
    }

    /// JSON text stored in the OPTIONS attribute of output features
    pub fn options_label(&self) -> String {
        Value::Object(self.profile_options().unwrap_or_default()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_omitted_for_every_profile() {
        for profile in Profile::ALL {
            let options = CostingOptions::defaults(profile);
            assert_eq!(options.assemble(), None, "{profile} should send no options");
            assert_eq!(options.options_label(), "{}");
        }
    }

    #[test]
    fn test_shortest_forces_block() {
        for profile in Profile::ALL {
            let options = CostingOptions::defaults(profile).with_mode(RoutingMode::Shortest);
            assert_eq!(
                options.assemble(),
                Some(json!({ profile.as_str(): { "shortest": true } }))
            );
        }
    }

    #[test]
    fn test_legal_speed_injected() {
        let options = CostingOptions::defaults(Profile::Auto).with_legal_speed(80);
        assert_eq!(options.assemble(), Some(json!({"auto": {"legal_speed": 80}})));
    }

    #[test]
    fn test_truck_width_length_converted_once() {
        let truck = TruckCosting {
            width: 10.0,
            length: 40.0,
            hazmat: true,
            ..Default::default()
        };
        let options = CostingOptions::new(Costing::Truck(truck));

        let first = options.assemble().unwrap();
        assert_eq!(first["truck"]["width"], json!(3.05));
        assert_eq!(first["truck"]["length"], json!(12.19));
        assert_eq!(first["truck"]["hazmat"], json!(true));

        // Assembling again must not convert the already converted values
        assert_eq!(options.assemble().unwrap(), first);
    }

    #[test]
    fn test_only_truthy_fields_included() {
        let auto = AutoCosting {
            use_tolls: 0.5,
            maneuver_penalty: 10,
            ..Default::default()
        };
        let options = CostingOptions::new(Costing::Auto(auto));
        let block = options.profile_options().unwrap();
        let keys: Vec<&str> = block.keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"maneuver_penalty") && keys.contains(&"use_tolls"));
        assert_eq!(options.options_label(), r#"{"maneuver_penalty":10,"use_tolls":0.5}"#);
    }

    #[test]
    fn test_from_json() {
        let costing = Costing::from_json(
            Profile::Bicycle,
            json!({"bicycle_type": "Mountain", "use_hills": 0.8}),
        )
        .unwrap();
        let options = CostingOptions::new(costing);
        assert_eq!(
            options.assemble(),
            Some(json!({"bicycle": {"bicycle_type": "Mountain", "use_hills": 0.8}}))
        );

        let err = Costing::from_json(Profile::Auto, json!({"use_highway": 1.0})).unwrap_err();
        assert!(err.to_string().contains("invalid auto costing options"));
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!("Truck".parse::<Profile>().unwrap(), Profile::Truck);
        let err = "pedestrain".parse::<Profile>().unwrap_err();
        assert!(err.to_string().contains("Did you mean 'pedestrian'?"));
        assert_eq!("shortest".parse::<RoutingMode>().unwrap(), RoutingMode::Shortest);
    }
}
