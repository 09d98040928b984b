//! # Settings Module
//!
//! Schema-driven validation and repair of the shared settings document.
//!
//! The settings document is the single operational configuration surface
//! the dashboard edits; it round-trips through the remote store every
//! cycle. Because it is edited remotely it can arrive missing, truncated
//! or with out-of-range values, so the validator never trusts it: every
//! field is checked against the schema and silently replaced by its
//! default when invalid. Validation never short-circuits; the aggregate
//! `is_valid()` flag reports whether any repair happened.

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::Result;

/// Expected type of a settings field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Str,
    Int,
    Float,
    Bool,
    /// Fixed-length list of integers (e.g. a resolution pair).
    IntList(usize),
}

/// Validation rule for one settings field.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub kind: Kind,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub valid_values: &'static [&'static str],
    pub default: Value,
}

impl FieldRule {
    fn new(kind: Kind, default: Value) -> Self {
        Self { kind, min: None, max: None, valid_values: &[], default }
    }

    fn range(kind: Kind, min: f64, max: f64, default: Value) -> Self {
        Self { kind, min: Some(min), max: Some(max), valid_values: &[], default }
    }

    fn one_of(values: &'static [&'static str], default: Value) -> Self {
        Self { kind: Kind::Str, min: None, max: None, valid_values: values, default }
    }

    fn matches_kind(&self, value: &Value) -> bool {
        match self.kind {
            Kind::Str => value.is_string(),
            Kind::Int => value.is_i64() || value.is_u64(),
            Kind::Float => value.is_f64(),
            Kind::Bool => value.is_boolean(),
            Kind::IntList(len) => value
                .as_array()
                .is_some_and(|a| a.len() == len && a.iter().all(|v| v.is_i64() || v.is_u64())),
        }
    }
}

/// Field schema of the settings document.
///
/// Several fields (`cameraName`, `lensPosition`, `resolution`, `enableGPS`,
/// `height`, `locationOverride`) are consumed by external collaborators,
/// but the document is shared, so the validator owns them all.
pub fn schema() -> Vec<(&'static str, FieldRule)> {
    vec![
        ("cameraName", FieldRule::new(Kind::Str, json!("FieldCam"))),
        ("lensPosition", FieldRule::range(Kind::Float, -1.0, 10.0, json!(-1.0))),
        ("resolution", FieldRule::new(Kind::IntList(2), json!([0, 0]))),
        ("startTimeHour", FieldRule::range(Kind::Int, 0.0, 23.0, json!(8))),
        ("startTimeMinute", FieldRule::range(Kind::Int, 0.0, 59.0, json!(0))),
        ("endTimeHour", FieldRule::range(Kind::Int, 0.0, 23.0, json!(20))),
        ("endTimeMinute", FieldRule::range(Kind::Int, 0.0, 59.0, json!(0))),
        ("intervalMinutes", FieldRule::range(Kind::Int, 1.0, 59.0, json!(30))),
        ("intervalHours", FieldRule::range(Kind::Int, 0.0, 23.0, json!(0))),
        ("timeSync", FieldRule::new(Kind::Bool, json!(false))),
        ("enableGPS", FieldRule::new(Kind::Bool, json!(false))),
        ("locationOverride", FieldRule::new(Kind::Bool, json!(false))),
        ("latitude", FieldRule::range(Kind::Float, -90.0, 90.0, json!(0.0))),
        ("longitude", FieldRule::range(Kind::Float, -180.0, 180.0, json!(0.0))),
        ("height", FieldRule::range(Kind::Int, 0.0, 10000.0, json!(0))),
        ("enableSunriseSunset", FieldRule::new(Kind::Bool, json!(false))),
        (
            "logLevel",
            FieldRule::one_of(
                &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"],
                json!("INFO"),
            ),
        ),
        ("uploadDiagnostics", FieldRule::new(Kind::Bool, json!(false))),
        ("lowVoltageThreshold", FieldRule::range(Kind::Float, 0.0, 30.0, json!(0.0))),
        ("recoveryVoltageThreshold", FieldRule::range(Kind::Float, 0.0, 30.0, json!(0.0))),
        ("batteryVoltageHalf", FieldRule::range(Kind::Float, 0.0, 30.0, json!(12.0))),
        ("shutdown", FieldRule::new(Kind::Bool, json!(true))),
    ]
}

/// Validated settings document.
///
/// Owned exclusively by this module; the scheduler and telemetry read it
/// through the typed getters.
#[derive(Debug, Clone)]
pub struct Settings {
    values: Map<String, Value>,
    valid: bool,
}

impl Settings {
    /// Load settings from a file, repairing the document against the
    /// schema. A missing or unreadable file yields a default document
    /// with `is_valid() == false`.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        match fs::read(path.as_ref()) {
            Ok(buf) => Self::from_slice(&buf),
            Err(e) => {
                warn!("Could not read settings file: {}", e);
                let mut settings = Self { values: Map::new(), valid: false };
                settings.validate();
                settings
            }
        }
    }

    /// Parse settings from raw bytes, repairing against the schema.
    pub fn from_slice(buf: &[u8]) -> Self {
        let (values, parsed) = match serde_json::from_slice::<Map<String, Value>>(buf) {
            Ok(values) => (values, true),
            Err(e) => {
                warn!("Could not parse settings document: {}", e);
                (Map::new(), false)
            }
        };

        let mut settings = Self { values, valid: parsed };
        settings.validate();
        settings
    }

    /// A document populated entirely from schema defaults.
    pub fn defaults() -> Self {
        let mut values = Map::new();
        for (name, rule) in schema() {
            values.insert(name.to_string(), rule.default);
        }
        Self { values, valid: true }
    }

    /// Validate every schema field, substituting defaults for missing,
    /// mistyped or out-of-range values. Returns the aggregate validity;
    /// never short-circuits, so every broken field is repaired in one
    /// pass.
    pub fn validate(&mut self) -> bool {
        let mut valid = self.valid;

        for (name, rule) in schema() {
            let entry = self.values.get(name);

            let reason = match entry {
                None => Some("not found"),
                Some(value) if !rule.matches_kind(value) => Some("has the wrong type"),
                Some(value) => {
                    let number = value.as_f64();
                    if rule.min.is_some_and(|min| number.is_some_and(|n| n < min)) {
                        Some("is below the allowed minimum")
                    } else if rule.max.is_some_and(|max| number.is_some_and(|n| n > max)) {
                        Some("is above the allowed maximum")
                    } else if !rule.valid_values.is_empty()
                        && !value
                            .as_str()
                            .is_some_and(|s| rule.valid_values.contains(&s))
                    {
                        Some("is not a valid value")
                    } else {
                        None
                    }
                }
            };

            if let Some(reason) = reason {
                warn!(
                    "Setting {} {}. Using default value: {}",
                    name, reason, rule.default
                );
                self.values.insert(name.to_string(), rule.default);
                valid = false;
            }
        }

        self.valid = valid;
        valid
    }

    /// The stored value for `key`, or `None` for unknown keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key)?.as_i64()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key)?.as_f64()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key)?.as_bool()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key)?.as_str()
    }

    /// Store a value. Unknown keys are rejected (no-op, returns `false`).
    /// A successful store re-runs full validation, so a bad value is
    /// immediately repaired back to its default and the returned aggregate
    /// validity reflects the whole document.
    pub fn set(&mut self, key: &str, value: Value) -> bool {
        if !schema().iter().any(|(name, _)| *name == key) {
            warn!("Refusing to set unknown setting {}", key);
            return false;
        }

        self.values.insert(key.to_string(), value);
        self.valid = true;
        self.validate()
    }

    /// Whether the document survived its last validation without repairs.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Serialize the current value map to a file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Serialize the current value map for upload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.values)?)
    }
}
