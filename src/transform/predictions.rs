use serde::Deserialize;
use serde_json::Value;

use super::{AxisValue, ChartLayout, ChartSeries, ChartSpec, SeriesKind, StyleHints, field};
use crate::error::FetchError;

const SCENARIO_PALETTE: [&str; 3] = ["#21CE99", "#FFD700", "#FF5000"];

/// Schema of the JSON document carried as a string in `data.analysis`.
#[derive(Debug, Deserialize)]
struct MarketAnalysis {
    market_sentiment: String,
    confidence_score: f64,
    #[serde(default)]
    key_factors: Vec<String>,
    #[serde(default)]
    risk_factors: Vec<String>,
    #[serde(default)]
    short_term_outlook: Option<String>,
    #[serde(default)]
    medium_term_outlook: Option<String>,
    #[serde(default)]
    prediction: Option<PricePrediction>,
}

#[derive(Debug, Deserialize)]
struct PricePrediction {
    #[serde(default)]
    price_direction: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PredictionPanel {
    pub chart: ChartSpec,
    pub sentiment: String,
    pub confidence: f64,
    pub key_factors: Vec<String>,
    pub risk_factors: Vec<String>,
    pub short_term_outlook: Option<String>,
    pub medium_term_outlook: Option<String>,
    pub price_direction: Option<String>,
    /// Sum of the scenario probabilities. Expected to be 1.0, never enforced.
    pub probability_total: f64,
}

pub fn predictions(payload: &Value) -> Result<PredictionPanel, FetchError> {
    let data = field(payload, "data")?;
    let analysis = decode_analysis(field(data, "analysis")?)?;
    if !(0.0..=1.0).contains(&analysis.confidence_score) {
        return Err(FetchError::precondition(format!(
            "confidence score {} outside [0, 1]",
            analysis.confidence_score
        )));
    }

    let Value::Object(scenarios) = field(data, "predictions")? else {
        return Err(FetchError::precondition("predictions are not keyed by scenario"));
    };
    let mut names = Vec::with_capacity(scenarios.len());
    let mut percents = Vec::with_capacity(scenarios.len());
    let mut probability_total = 0.0;
    for (name, scenario) in scenarios {
        let probability = scenario
            .get("probability")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                FetchError::precondition(format!("scenario `{name}` has no numeric probability"))
            })?;
        probability_total += probability;
        names.push(AxisValue::Category(name.clone()));
        percents.push(AxisValue::Number(probability * 100.0));
    }
    let colors = (0..names.len())
        .map(|idx| SCENARIO_PALETTE[idx % SCENARIO_PALETTE.len()].to_string())
        .collect();

    Ok(PredictionPanel {
        chart: ChartSpec {
            series: vec![ChartSeries {
                kind: SeriesKind::Bar,
                x: names,
                y: percents,
                style: StyleHints {
                    colors,
                    ..StyleHints::default()
                },
                label: "Scenario probability".to_string(),
            }],
            layout: ChartLayout {
                title: "Market Scenario Probabilities".to_string(),
                x_title: "Scenario".to_string(),
                y_title: "Probability (%)".to_string(),
                y_range: Some((0.0, 100.0)),
                bar_mode: None,
            },
        },
        sentiment: analysis.market_sentiment,
        confidence: analysis.confidence_score,
        key_factors: analysis.key_factors,
        risk_factors: analysis.risk_factors,
        short_term_outlook: analysis.short_term_outlook,
        medium_term_outlook: analysis.medium_term_outlook,
        price_direction: analysis.prediction.and_then(|p| p.price_direction),
        probability_total,
    })
}

/// Second decoding stage: `analysis` is itself JSON, serialized into a string.
fn decode_analysis(raw: &Value) -> Result<MarketAnalysis, FetchError> {
    let Value::String(text) = raw else {
        return Err(FetchError::nested(format!(
            "expected a JSON string, found {}",
            json_kind(raw)
        )));
    };
    serde_json::from_str(text).map_err(|err| FetchError::nested(err.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeStage;
    use serde_json::json;

    fn analysis_text() -> String {
        json!({
            "market_sentiment": "bullish",
            "confidence_score": 0.72,
            "key_factors": ["ETF inflows", "halving"],
            "risk_factors": ["regulation"],
            "short_term_outlook": "choppy",
            "prediction": {"price_direction": "up", "confidence": 0.6}
        })
        .to_string()
    }

    fn payload(predictions: Value) -> Value {
        json!({"success": true, "data": {
            "analysis": analysis_text(),
            "predictions": predictions
        }})
    }

    #[test]
    fn scenario_probabilities_become_percent_bars() {
        let panel = predictions(&payload(json!({
            "bullish": {"probability": 0.6},
            "bearish": {"probability": 0.4}
        })))
        .unwrap();
        let series = &panel.chart.series[0];
        assert_eq!(series.kind, SeriesKind::Bar);
        assert_eq!(
            series.x,
            vec![
                AxisValue::Category("bullish".to_string()),
                AxisValue::Category("bearish".to_string())
            ]
        );
        let y: Vec<f64> = series.y.iter().filter_map(AxisValue::as_number).collect();
        assert_eq!(y.len(), 2);
        assert!((y[0] - 60.0).abs() < 1e-9);
        assert!((y[1] - 40.0).abs() < 1e-9);
        assert_eq!(panel.chart.layout.y_range, Some((0.0, 100.0)));
        assert!((panel.probability_total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn extracts_analysis_fields() {
        let panel = predictions(&payload(json!({"neutral": {"probability": 1.0}}))).unwrap();
        assert_eq!(panel.sentiment, "bullish");
        assert!((panel.confidence - 0.72).abs() < 1e-9);
        assert_eq!(panel.key_factors, vec!["ETF inflows", "halving"]);
        assert_eq!(panel.risk_factors, vec!["regulation"]);
        assert_eq!(panel.short_term_outlook.as_deref(), Some("choppy"));
        assert_eq!(panel.medium_term_outlook, None);
        assert_eq!(panel.price_direction.as_deref(), Some("up"));
    }

    #[test]
    fn palette_cycles_across_scenarios() {
        let panel = predictions(&payload(json!({
            "a": {"probability": 0.25}, "b": {"probability": 0.25},
            "c": {"probability": 0.25}, "d": {"probability": 0.25}
        })))
        .unwrap();
        let style = &panel.chart.series[0].style;
        assert_eq!(style.color_at(0), Some("#21CE99"));
        assert_eq!(style.color_at(3), Some("#21CE99"));
        assert_eq!(style.colors.len(), 4);
    }

    #[test]
    fn broken_nested_document_has_its_own_failure() {
        let value = json!({"data": {
            "analysis": "{\"market_sentiment\": \"bullish\",",
            "predictions": {}
        }});
        let err = predictions(&value).unwrap_err();
        assert!(matches!(
            err,
            FetchError::MalformedResponse {
                stage: DecodeStage::NestedAnalysis,
                ..
            }
        ));
    }

    #[test]
    fn analysis_that_is_not_a_string_is_rejected() {
        let value = json!({"data": {
            "analysis": {"market_sentiment": "bullish"},
            "predictions": {}
        }});
        let err = predictions(&value).unwrap_err();
        assert!(err.to_string().contains("an object"));
    }

    #[test]
    fn null_analysis_is_a_missing_field() {
        let value = json!({"data": {"analysis": null, "predictions": {}}});
        let err = predictions(&value).unwrap_err();
        assert!(matches!(err, FetchError::TransformPrecondition(_)));
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let text = json!({"market_sentiment": "bearish", "confidence_score": 7.5}).to_string();
        let value = json!({"data": {"analysis": text, "predictions": {}}});
        let err = predictions(&value).unwrap_err();
        assert!(matches!(err, FetchError::TransformPrecondition(_)));
    }

    #[test]
    fn scenario_without_probability_is_rejected() {
        let err = predictions(&payload(json!({"bullish": {"price": 90000}}))).unwrap_err();
        assert!(err.to_string().contains("bullish"));
    }
}
