//! Wire payloads for the context platform

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::gateway::GeoPosition;
use crate::types::{CorrectionResult, CorrectionStatus};

/// Metric name → short IoT-agent attribute id.
const METRIC_ATTRIBUTES: &[(&str, &str)] = &[
    ("temperature", "ta"),
    ("soilTemperature", "ts"),
    ("humidity", "ha"),
    ("soilMoisture", "hs"),
    ("azote_mg_kg", "n"),
    ("phosphore_mg_kg", "p"),
    ("potassium_mg_kg", "k"),
    ("ph", "ph"),
];

/// Short attribute id for `metric`; unmapped metrics keep their own name.
pub fn attribute_for(metric: &str) -> &str {
    METRIC_ATTRIBUTES
        .iter()
        .find(|(m, _)| *m == metric)
        .map_or(metric, |(_, attr)| attr)
}

/// Round to two decimals for transmission.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// Measurement Payload
// ============================================================================

/// Flat key → value measurement for one device and one cycle.
///
/// Status labels are not forwarded; they are for logs only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementPayload {
    fields: BTreeMap<String, Value>,
}

impl MeasurementPayload {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            "date".to_string(),
            Value::String(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        Self { fields }
    }

    /// Add a cleaned metric under its attribute id. Sentinel values are
    /// forwarded unrounded so they stay distinguishable from zero.
    pub fn insert_metric(&mut self, metric: &str, result: &CorrectionResult) {
        let value = match result.status {
            CorrectionStatus::FixedFreeze | CorrectionStatus::FixedBroken => result.value,
            _ => round2(result.value),
        };
        self.fields
            .insert(attribute_for(metric).to_string(), Value::from(value));
    }

    /// Initial context attributes sent with a device's first payload.
    pub fn with_initial_context(mut self) -> Self {
        self.fields
            .insert("state".to_string(), Value::from("ACTIVE"));
        self.fields.insert("fieldState".to_string(), Value::from(0));
        self.fields.insert(
            "irrigationrecommendation".to_string(),
            Value::from("NO_IRRIGATION"),
        );
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Number of metric fields (excludes `date` and context attributes).
    pub fn metric_count(&self) -> usize {
        self.fields
            .keys()
            .filter(|k| !matches!(k.as_str(), "date" | "state" | "fieldState" | "irrigationrecommendation"))
            .count()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.fields).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Provisioning
// ============================================================================

/// One attribute in the device schema declared at provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub object_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: String,
}

impl AttributeSpec {
    fn new(object_id: &str, name: &str, attr_type: &str) -> Self {
        Self {
            object_id: object_id.to_string(),
            name: name.to_string(),
            attr_type: attr_type.to_string(),
        }
    }
}

/// Attribute schema shared by every field cluster.
pub fn default_attribute_schema() -> Vec<AttributeSpec> {
    vec![
        AttributeSpec::new("date", "TimeInstant", "DateTime"),
        AttributeSpec::new("ta", "temperature", "Number"),
        AttributeSpec::new("ts", "soilTemperature", "Number"),
        AttributeSpec::new("ha", "humidity", "Number"),
        AttributeSpec::new("hs", "soilMoisture", "Number"),
        AttributeSpec::new("n", "n", "Number"),
        AttributeSpec::new("p", "p", "Number"),
        AttributeSpec::new("k", "k", "Number"),
        AttributeSpec::new("ph", "ph", "Number"),
        AttributeSpec::new("state", "state", "String"),
        AttributeSpec::new("recomm", "irrigationrecommendation", "String"),
        AttributeSpec::new("fs", "fieldState", "Integer"),
    ]
}

/// Everything needed to register one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisioningRequest {
    pub device_id: String,
    pub entity_name: String,
    pub entity_type: String,
    pub position: GeoPosition,
    pub attributes: Vec<AttributeSpec>,
}
