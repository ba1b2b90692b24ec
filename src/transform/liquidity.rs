use serde::Deserialize;
use serde_json::Value;

use super::{
    AxisValue, BarMode, ChartLayout, ChartSeries, ChartSpec, SeriesKind, StyleHints, decode,
    field, numbers,
};
use crate::error::FetchError;

const BID_COLOR: &str = "#21CE99";
const ASK_COLOR: &str = "#FF5000";

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct OrderBook {
    #[serde(default)]
    pub bid_prices: Vec<f64>,
    #[serde(default)]
    pub bid_volumes: Vec<f64>,
    #[serde(default)]
    pub ask_prices: Vec<f64>,
    #[serde(default)]
    pub ask_volumes: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct EtfQuote {
    latest_price: f64,
    #[serde(default)]
    volume: Option<f64>,
    orderbook: OrderBook,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DepthChart {
    pub symbol: String,
    pub latest_price: f64,
    pub volume: Option<f64>,
    pub chart: ChartSpec,
}

/// One depth chart per symbol, in payload order.
pub fn liquidity(etf: &Value) -> Result<Vec<DepthChart>, FetchError> {
    let Value::Object(symbols) = field(etf, "data")? else {
        return Err(FetchError::precondition("ETF data is not keyed by symbol"));
    };
    symbols
        .iter()
        .map(|(symbol, raw)| {
            let quote: EtfQuote = decode(raw, &format!("ETF {symbol}"))?;
            Ok(DepthChart {
                symbol: symbol.clone(),
                latest_price: quote.latest_price,
                volume: quote.volume,
                chart: depth_chart(symbol, &quote.orderbook)?,
            })
        })
        .collect()
}

pub fn depth_chart(symbol: &str, book: &OrderBook) -> Result<ChartSpec, FetchError> {
    let bids = side_series("Bids", &book.bid_prices, &book.bid_volumes, BID_COLOR, symbol)?;
    let asks = side_series("Asks", &book.ask_prices, &book.ask_volumes, ASK_COLOR, symbol)?;
    Ok(ChartSpec {
        series: vec![bids, asks],
        layout: ChartLayout {
            title: format!("{symbol} Orderbook Depth"),
            x_title: "Volume".to_string(),
            y_title: "Price (USD)".to_string(),
            y_range: None,
            bar_mode: Some(BarMode::Overlay),
        },
    })
}

fn side_series(
    label: &str,
    prices: &[f64],
    volumes: &[f64],
    color: &str,
    symbol: &str,
) -> Result<ChartSeries, FetchError> {
    if prices.len() != volumes.len() {
        return Err(FetchError::precondition(format!(
            "{symbol} {}: {} prices but {} volumes",
            label.to_lowercase(),
            prices.len(),
            volumes.len()
        )));
    }
    Ok(ChartSeries {
        kind: SeriesKind::HorizontalBar,
        x: numbers(volumes),
        y: prices
            .iter()
            .map(|price| AxisValue::Category(price.to_string()))
            .collect(),
        style: StyleHints::solid(color),
        label: label.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn categories(values: &[AxisValue]) -> Vec<String> {
        values.iter().map(AxisValue::label).collect()
    }

    #[test]
    fn splits_book_into_bid_and_ask_bars() {
        let book = OrderBook {
            bid_prices: vec![100.0, 99.0],
            bid_volumes: vec![5.0, 3.0],
            ask_prices: vec![101.0, 102.0],
            ask_volumes: vec![4.0, 2.0],
        };
        let chart = depth_chart("IBIT", &book).unwrap();
        assert_eq!(chart.series.len(), 2);
        let (bids, asks) = (&chart.series[0], &chart.series[1]);
        assert_eq!(bids.label, "Bids");
        assert_eq!(bids.kind, SeriesKind::HorizontalBar);
        assert_eq!(categories(&bids.y), vec!["100", "99"]);
        assert_eq!(bids.x, vec![AxisValue::Number(5.0), AxisValue::Number(3.0)]);
        assert_eq!(asks.label, "Asks");
        assert_eq!(categories(&asks.y), vec!["101", "102"]);
        assert_eq!(asks.x, vec![AxisValue::Number(4.0), AxisValue::Number(2.0)]);
        assert_eq!(chart.layout.title, "IBIT Orderbook Depth");
        assert_eq!(chart.layout.bar_mode, Some(BarMode::Overlay));
    }

    #[test]
    fn one_chart_per_symbol_in_payload_order() {
        let payload = json!({"data": {
            "IBIT": {"latest_price": 38.5, "volume": 120.0, "orderbook": {
                "bid_prices": [38.4], "bid_volumes": [10], "ask_prices": [38.6], "ask_volumes": [12]
            }},
            "FBTC": {"latest_price": 57.1, "orderbook": {
                "bid_prices": [], "bid_volumes": [], "ask_prices": [], "ask_volumes": []
            }}
        }});
        let charts = liquidity(&payload).unwrap();
        let symbols: Vec<&str> = charts.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["IBIT", "FBTC"]);
        assert_eq!(charts[0].volume, Some(120.0));
        assert!(charts[1].chart.series.iter().all(|s| s.x.is_empty()));
    }

    #[test]
    fn mismatched_side_lengths_are_rejected() {
        let book = OrderBook {
            bid_prices: vec![100.0, 99.0],
            bid_volumes: vec![5.0],
            ..OrderBook::default()
        };
        let err = depth_chart("GBTC", &book).unwrap_err();
        assert!(matches!(err, FetchError::TransformPrecondition(_)));
        assert!(err.to_string().contains("2 prices but 1 volumes"));
    }

    #[test]
    fn missing_orderbook_is_a_precondition_failure() {
        let payload = json!({"data": {"IBIT": {"latest_price": 38.5}}});
        let err = liquidity(&payload).unwrap_err();
        assert!(matches!(err, FetchError::TransformPrecondition(_)));
    }
}
