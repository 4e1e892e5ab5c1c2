//! Per-session game settings.
//!
//! Each game declares its settings with metadata; supplied values are
//! validated against that metadata once at session construction, then frozen.
//! Out-of-range numbers clamp, wrong-typed values fall back to the default,
//! and an empty random seed is generated so every gamelog records one.

use log::warn;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};

pub const SETTING_PLAYER_STARTING_TIME: &str = "playerStartingTime";
pub const SETTING_RANDOM_SEED: &str = "randomSeed";
pub const SETTING_PLAYER_NAMES: &str = "playerNames";

/// One minute, in nanoseconds. The default per-player clock.
const DEFAULT_STARTING_TIME_NS: u64 = 60 * 1_000_000_000;

const SEED_LENGTH: usize = 16;

/// Declares one setting: its default and, for numbers, its allowed range.
#[derive(Debug, Clone)]
pub struct SettingSchema {
    pub name: &'static str,
    pub help: &'static str,
    pub default: Value,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl SettingSchema {
    pub fn new(name: &'static str, help: &'static str, default: Value) -> Self {
        Self {
            name,
            help,
            default,
            min: None,
            max: None,
        }
    }

    pub fn clamped(
        name: &'static str,
        help: &'static str,
        default: Value,
        min: f64,
        max: f64,
    ) -> Self {
        Self {
            name,
            help,
            default,
            min: Some(min),
            max: Some(max),
        }
    }
}

/// Settings every game carries, appended after the game's own declarations.
pub fn base_settings() -> Vec<SettingSchema> {
    vec![
        SettingSchema::new(
            SETTING_PLAYER_STARTING_TIME,
            "Starting time (in nanoseconds) on each player's clock.",
            Value::from(DEFAULT_STARTING_TIME_NS),
        ),
        SettingSchema::new(
            SETTING_RANDOM_SEED,
            "Seed for the game's random number generation. Generated when empty.",
            Value::String(String::new()),
        ),
        SettingSchema::new(
            SETTING_PLAYER_NAMES,
            "Overrides for player names, by seat index.",
            Value::Array(Vec::new()),
        ),
    ]
}

/// The frozen, validated settings of one session.
#[derive(Debug)]
pub struct GameSettingsManager {
    values: Map<String, Value>,
}

impl GameSettingsManager {
    /// Validates `supplied` against the declared schemas. Unknown keys are
    /// dropped with a warning; they are usually typos worth surfacing.
    pub fn new(schemas: &[SettingSchema], supplied: &Value) -> Self {
        let supplied = supplied.as_object().cloned().unwrap_or_default();
        for key in supplied.keys() {
            if !schemas.iter().any(|s| s.name == key) {
                warn!("ignoring unknown game setting '{key}'");
            }
        }

        let mut values = Map::new();
        for schema in schemas {
            let value = match supplied.get(schema.name) {
                Some(value) => validate(schema, value),
                None => schema.default.clone(),
            };
            values.insert(schema.name.to_string(), value);
        }

        let seed_missing = values
            .get(SETTING_RANDOM_SEED)
            .and_then(Value::as_str)
            .map_or(true, str::is_empty);
        if seed_missing {
            values.insert(
                SETTING_RANDOM_SEED.to_string(),
                Value::String(generate_seed()),
            );
        }

        Self { values }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// The per-player clock budget in nanoseconds. Zero disables enforcement.
    pub fn max_player_time(&self) -> u64 {
        self.values
            .get(SETTING_PLAYER_STARTING_TIME)
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_STARTING_TIME_NS)
    }

    pub fn random_seed(&self) -> String {
        self.values
            .get(SETTING_RANDOM_SEED)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Player name overrides, in seat order. Empty entries mean no override.
    pub fn player_names(&self) -> Vec<String> {
        self.values
            .get(SETTING_PLAYER_NAMES)
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .map(|n| n.as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn validate(schema: &SettingSchema, value: &Value) -> Value {
    let compatible = match (&schema.default, value) {
        (Value::Number(_), Value::Number(_)) => true,
        (Value::String(_), Value::String(_)) => true,
        (Value::Bool(_), Value::Bool(_)) => true,
        (Value::Array(_), Value::Array(_)) => true,
        (Value::Object(_), Value::Object(_)) => true,
        _ => false,
    };
    if !compatible {
        warn!(
            "setting '{}' got an incompatible value, using its default",
            schema.name
        );
        return schema.default.clone();
    }
    if let Value::Number(n) = value {
        if let Some(f) = n.as_f64() {
            let clamped = f
                .max(schema.min.unwrap_or(f))
                .min(schema.max.unwrap_or(f));
            if clamped != f {
                warn!(
                    "setting '{}' value {f} clamped to {clamped}",
                    schema.name
                );
                return number_like(&schema.default, clamped);
            }
        }
    }
    value.clone()
}

/// Preserves integer-ness when the default was an integer.
fn number_like(default: &Value, f: f64) -> Value {
    if default.as_i64().is_some() || default.as_u64().is_some() {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}

fn generate_seed() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SEED_LENGTH)
        .map(char::from)
        .collect()
}
