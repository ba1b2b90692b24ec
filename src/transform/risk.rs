use std::fmt;

use serde_json::Value;

use super::field;
use crate::error::FetchError;

#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
                write!(f, "{value:.0}")
            }
            MetricValue::Number(value) => {
                let text = format!("{value:.4}");
                f.write_str(text.trim_end_matches('0').trim_end_matches('.'))
            }
            MetricValue::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricRow {
    pub name: String,
    pub value: MetricValue,
}

/// Flattens `metrics` into rows in payload order. Values that are neither
/// numbers nor strings are shown as compact JSON.
pub fn risk_table(payload: &Value) -> Result<Vec<MetricRow>, FetchError> {
    let Value::Object(metrics) = field(payload, "metrics")? else {
        return Err(FetchError::precondition("metrics are not keyed by name"));
    };
    Ok(metrics
        .iter()
        .map(|(name, value)| MetricRow {
            name: name.clone(),
            value: match value {
                Value::Number(number) => number
                    .as_f64()
                    .map(MetricValue::Number)
                    .unwrap_or_else(|| MetricValue::Text(number.to_string())),
                Value::String(text) => MetricValue::Text(text.clone()),
                other => MetricValue::Text(other.to_string()),
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_payload_order_and_value_kinds() {
        let payload = json!({"metrics": {
            "volatility_30d": 0.0423,
            "max_drawdown": -0.18,
            "risk_level": "elevated",
            "sharpe": 2
        }});
        let rows = risk_table(&payload).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["volatility_30d", "max_drawdown", "risk_level", "sharpe"]);
        assert_eq!(rows[0].value, MetricValue::Number(0.0423));
        assert_eq!(rows[2].value, MetricValue::Text("elevated".to_string()));
    }

    #[test]
    fn other_json_values_render_as_text() {
        let payload = json!({"metrics": {"alerts": ["a", "b"], "stale": null, "ok": true}});
        let rows = risk_table(&payload).unwrap();
        assert_eq!(rows[0].value, MetricValue::Text("[\"a\",\"b\"]".to_string()));
        assert_eq!(rows[1].value, MetricValue::Text("null".to_string()));
        assert_eq!(rows[2].value, MetricValue::Text("true".to_string()));
    }

    #[test]
    fn number_display_is_compact() {
        assert_eq!(MetricValue::Number(2.0).to_string(), "2");
        assert_eq!(MetricValue::Number(0.0423).to_string(), "0.0423");
        assert_eq!(MetricValue::Number(1.5).to_string(), "1.5");
        assert_eq!(MetricValue::Number(-0.18).to_string(), "-0.18");
    }

    #[test]
    fn missing_metrics_is_a_precondition_failure() {
        assert!(matches!(
            risk_table(&json!({"data": {}})),
            Err(FetchError::TransformPrecondition(_))
        ));
        assert!(matches!(
            risk_table(&json!({"metrics": [1, 2]})),
            Err(FetchError::TransformPrecondition(_))
        ));
    }

    #[test]
    fn empty_metrics_is_an_empty_table() {
        assert!(risk_table(&json!({"metrics": {}})).unwrap().is_empty());
    }
}
