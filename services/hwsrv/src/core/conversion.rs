//! Pluggable raw → physical conversion
//!
//! The calibration math lives with integrators; the engine only looks up a
//! converter by `physicalType` and hands it the raw reading.

use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct ConversionError(pub String);

/// Inputs shared by every converter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionParams {
    /// Calibration points reshaped for the sensor family
    pub calibration_data: Vec<Map<String, Value>>,
    pub reference_voltage: f64,
    pub recorded_voltage: f64,
    /// Voltage reported with the reading, or derived from the ADC count
    pub volt: f64,
    pub device_id: String,
    pub physical_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutcome {
    pub value: f64,
    pub unit: String,
    pub raw_value: f64,
    pub calibration_applied: bool,
    #[serde(default)]
    pub calibration_points: usize,
    pub conversion_method: String,
}

pub trait Converter: Send + Sync {
    fn convert(&self, raw: f64, params: &ConversionParams) -> Result<ConversionOutcome, ConversionError>;
}

/// Closures work as converters
impl<F> Converter for F
where
    F: Fn(f64, &ConversionParams) -> Result<ConversionOutcome, ConversionError> + Send + Sync,
{
    fn convert(&self, raw: f64, params: &ConversionParams) -> Result<ConversionOutcome, ConversionError> {
        self(raw, params)
    }
}

/// Converters keyed by lower-cased physical type
#[derive(Default)]
pub struct ConverterRegistry {
    converters: DashMap<String, Arc<dyn Converter>, RandomState>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, physical_type: &str, converter: Arc<dyn Converter>) {
        self.converters.insert(physical_type.to_lowercase(), converter);
    }

    pub fn get(&self, physical_type: &str) -> Option<Arc<dyn Converter>> {
        self.converters
            .get(&physical_type.to_lowercase())
            .map(|c| c.clone())
    }

    pub fn supported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.converters.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn linear(raw: f64, params: &ConversionParams) -> Result<ConversionOutcome, ConversionError> {
        Ok(ConversionOutcome {
            value: raw / 1023.0 * params.reference_voltage,
            unit: "V".into(),
            raw_value: raw,
            calibration_applied: false,
            calibration_points: 0,
            conversion_method: "linear".into(),
        })
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ConverterRegistry::new();
        registry.register("PH", Arc::new(linear));

        let converter = registry.get("ph").unwrap();
        let params = ConversionParams {
            reference_voltage: 5.0,
            ..Default::default()
        };
        let out = converter.convert(1023.0, &params).unwrap();
        assert_eq!(out.value, 5.0);
        assert_eq!(registry.supported_types(), vec!["ph"]);
        assert!(registry.get("ec").is_none());
    }
}
