use serde::Deserialize;
use serde_json::Value;

use super::{ChartLayout, ChartSeries, ChartSpec, SeriesKind, StyleHints, decode, field, numbers};
use crate::error::FetchError;

#[derive(Debug, Deserialize)]
struct HistoricalRow {
    #[serde(rename = "Close")]
    close: f64,
}

#[derive(Debug, Deserialize)]
struct LatestQuote {
    latest_price: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationChart {
    pub chart: ChartSpec,
    pub btc_points: usize,
    pub etf_points: usize,
    pub paired: usize,
}

impl CorrelationChart {
    /// The two inputs differed in length and the longer one was cut.
    pub fn truncated(&self) -> bool {
        self.btc_points != self.etf_points
    }

    pub fn points(&self) -> Vec<(f64, f64)> {
        let Some(series) = self.chart.series.first() else {
            return Vec::new();
        };
        series
            .x
            .iter()
            .zip(series.y.iter())
            .filter_map(|(x, y)| Some((x.as_number()?, y.as_number()?)))
            .collect()
    }
}

/// Scatter of historical BTC closes against the latest price of each ETF.
///
/// The two series come from different endpoints and have no shared time axis.
/// They are paired by position and cut to the shorter length; point `i` is the
/// i-th historical close next to the i-th ETF in payload order, which is not a
/// time-aligned observation. Callers surface [`CorrelationChart::truncated`].
pub fn correlation(historical: &Value, etf: &Value) -> Result<CorrelationChart, FetchError> {
    let rows: Vec<HistoricalRow> = decode(field(historical, "data")?, "historical prices")?;
    let closes: Vec<f64> = rows.into_iter().map(|row| row.close).collect();

    let Value::Object(symbols) = field(etf, "data")? else {
        return Err(FetchError::precondition("ETF data is not keyed by symbol"));
    };
    let mut latest = Vec::with_capacity(symbols.len());
    for (symbol, quote) in symbols {
        let quote: LatestQuote = decode(quote, &format!("ETF {symbol}"))?;
        latest.push(quote.latest_price);
    }

    let paired = closes.len().min(latest.len());
    let series = ChartSeries {
        kind: SeriesKind::Scatter,
        x: numbers(&closes[..paired]),
        y: numbers(&latest[..paired]),
        style: StyleHints {
            colors: vec!["#F7931A".to_string()],
            opacity: Some(0.7),
            marker_size: Some(8),
        },
        label: "BTC vs ETF Correlation".to_string(),
    };
    Ok(CorrelationChart {
        chart: ChartSpec {
            series: vec![series],
            layout: ChartLayout {
                title: "Bitcoin vs ETF Price Correlation".to_string(),
                x_title: "Bitcoin Price (USD)".to_string(),
                y_title: "ETF Price (USD)".to_string(),
                ..ChartLayout::default()
            },
        },
        btc_points: closes.len(),
        etf_points: latest.len(),
        paired,
    })
}
