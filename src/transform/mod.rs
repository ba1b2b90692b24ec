//! Pure mappings from analytic payloads to chart descriptors.
//!
//! Nothing in here touches the network or keeps state between calls; the same
//! payload and parameters always yield an equal descriptor.

mod correlation;
mod costs;
mod liquidity;
mod predictions;
mod risk;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::FetchError;

pub use correlation::{CorrelationChart, correlation};
pub use costs::{CostBreakdown, CostComparison, CostParams, TradeFrequency, cost_comparison};
pub use liquidity::{DepthChart, liquidity};
pub use predictions::{PredictionPanel, predictions};
pub use risk::{MetricRow, MetricValue, risk_table};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeriesKind {
    Scatter,
    Bar,
    HorizontalBar,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AxisValue {
    Number(f64),
    Category(String),
}

impl AxisValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AxisValue::Number(value) => Some(*value),
            AxisValue::Category(_) => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            AxisValue::Number(value) => value.to_string(),
            AxisValue::Category(label) => label.clone(),
        }
    }
}

/// Rendering hints. Colors are `#RRGGBB`; a single color applies to every point,
/// several are cycled point by point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StyleHints {
    pub colors: Vec<String>,
    pub opacity: Option<f64>,
    pub marker_size: Option<u16>,
}

impl StyleHints {
    pub fn solid(color: &str) -> Self {
        StyleHints {
            colors: vec![color.to_string()],
            ..StyleHints::default()
        }
    }

    pub fn color_at(&self, idx: usize) -> Option<&str> {
        if self.colors.is_empty() {
            return None;
        }
        self.colors
            .get(idx % self.colors.len())
            .map(|color| color.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChartSeries {
    pub kind: SeriesKind,
    pub x: Vec<AxisValue>,
    pub y: Vec<AxisValue>,
    pub style: StyleHints,
    pub label: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarMode {
    Group,
    Overlay,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChartLayout {
    pub title: String,
    pub x_title: String,
    pub y_title: String,
    pub y_range: Option<(f64, f64)>,
    pub bar_mode: Option<BarMode>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChartSpec {
    pub series: Vec<ChartSeries>,
    pub layout: ChartLayout,
}

fn numbers(values: &[f64]) -> Vec<AxisValue> {
    values.iter().copied().map(AxisValue::Number).collect()
}

fn field<'a>(payload: &'a Value, name: &str) -> Result<&'a Value, FetchError> {
    match payload.get(name) {
        Some(Value::Null) | None => Err(FetchError::precondition(format!(
            "payload has no `{name}` field"
        ))),
        Some(value) => Ok(value),
    }
}

fn decode<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T, FetchError> {
    T::deserialize(value).map_err(|err| FetchError::precondition(format!("{what}: {err}")))
}
