//! Core coordinator types: model versions and weight deltas.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A numbered, immutable model version (`v1`, `v2`, ...).
///
/// Versions are consecutive starting at `v1`: `v{N+1}` is always derived
/// from `v{N}` by one aggregation round. The string form is the wire and
/// on-disk representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelVersion(u32);

impl ModelVersion {
    /// The initial version published by a fresh model store.
    pub const INITIAL: ModelVersion = ModelVersion(1);

    /// Creates a version from its number. Numbers start at 1.
    pub const fn new(number: u32) -> Self {
        ModelVersion(number)
    }

    /// Returns the numeric part of the version.
    pub const fn number(&self) -> u32 {
        self.0
    }

    /// Returns the successor version.
    pub const fn next(&self) -> Self {
        ModelVersion(self.0 + 1)
    }

    /// Parses a `v{N}` string with N >= 1.
    pub fn parse(s: &str) -> Option<Self> {
        let digits = s.strip_prefix('v')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number: u32 = digits.parse().ok()?;
        if number == 0 {
            return None;
        }
        Some(ModelVersion(number))
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl Serialize for ModelVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModelVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ModelVersion::parse(&s)
            .ok_or_else(|| D::Error::custom(format!("invalid model version: {s}")))
    }
}

/// The weight arrays of one model: an ordered sequence of layers, each a
/// flat array of parameters.
pub type LayerWeights = Vec<Vec<f64>>;

/// Returns the per-layer element counts of a weight payload.
pub fn shape_of(layers: &[Vec<f64>]) -> Vec<usize> {
    layers.iter().map(Vec::len).collect()
}

/// A client-submitted weight delta: one flat parameter array per model
/// layer, in layer order.
///
/// This is the first-class form of the wire payload. Construction goes
/// through [`WeightDelta::from_wire`], which accepts either the nested
/// JSON arrays directly or a JSON string wrapping them (clients of the
/// original wire format send the latter); everything downstream of the
/// boundary works with the typed form only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WeightDelta {
    layers: LayerWeights,
}

impl WeightDelta {
    /// Wraps already-parsed layers.
    pub fn new(layers: LayerWeights) -> Self {
        WeightDelta { layers }
    }

    /// Parses a wire payload into a delta.
    ///
    /// Accepts a JSON array of arrays of numbers, or a JSON string whose
    /// content is such an array. Anything else is a format error described
    /// by the returned message.
    pub fn from_wire(value: &serde_json::Value) -> Result<Self, String> {
        let unwrapped;
        let value = match value {
            serde_json::Value::String(s) => {
                unwrapped = serde_json::from_str::<serde_json::Value>(s)
                    .map_err(|e| format!("delta string is not valid JSON: {e}"))?;
                &unwrapped
            }
            other => other,
        };

        let outer = value
            .as_array()
            .ok_or_else(|| "delta must be an array of layer arrays".to_string())?;

        let mut layers = Vec::with_capacity(outer.len());
        for (i, layer) in outer.iter().enumerate() {
            let inner = layer
                .as_array()
                .ok_or_else(|| format!("layer {i} is not an array"))?;
            let mut values = Vec::with_capacity(inner.len());
            for (j, v) in inner.iter().enumerate() {
                let n = v
                    .as_f64()
                    .ok_or_else(|| format!("layer {i} element {j} is not a number"))?;
                values.push(n);
            }
            layers.push(values);
        }

        if layers.is_empty() {
            return Err("delta has no layers".to_string());
        }

        Ok(WeightDelta { layers })
    }

    /// Returns the per-layer element counts.
    pub fn shape(&self) -> Vec<usize> {
        shape_of(&self.layers)
    }

    /// Returns the layer arrays.
    pub fn layers(&self) -> &LayerWeights {
        &self.layers
    }

    /// Iterates over every parameter value in layer order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.layers.iter().flatten().copied()
    }
}
