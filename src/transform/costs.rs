use std::fmt;
use std::str::FromStr;

use super::{AxisValue, BarMode, ChartLayout, ChartSeries, ChartSpec, SeriesKind, StyleHints};
use crate::error::FetchError;

const DIRECT_TRADING_RATE: f64 = 0.003;
const DIRECT_WITHDRAWAL_PER_YEAR: f64 = 15.0;
const WRAPPER_TRADING_RATE: f64 = 0.001;
const WRAPPER_MANAGEMENT_RATE: f64 = 0.005;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TradeFrequency {
    BuyHold,
    Monthly,
    Weekly,
    Daily,
}

impl TradeFrequency {
    pub const ALL: [TradeFrequency; 4] = [
        TradeFrequency::BuyHold,
        TradeFrequency::Monthly,
        TradeFrequency::Weekly,
        TradeFrequency::Daily,
    ];

    pub fn trades_per_year(&self) -> f64 {
        match self {
            TradeFrequency::BuyHold => 1.0,
            TradeFrequency::Monthly => 12.0,
            TradeFrequency::Weekly => 52.0,
            TradeFrequency::Daily => 252.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TradeFrequency::BuyHold => "Buy and Hold",
            TradeFrequency::Monthly => "Monthly",
            TradeFrequency::Weekly => "Weekly",
            TradeFrequency::Daily => "Daily",
        }
    }

    pub fn cycle(&self, forward: bool) -> TradeFrequency {
        let len = Self::ALL.len();
        let idx = Self::ALL.iter().position(|f| f == self).unwrap_or(0);
        let next = if forward {
            (idx + 1) % len
        } else {
            (idx + len - 1) % len
        };
        Self::ALL[next]
    }
}

impl fmt::Display for TradeFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self {
            TradeFrequency::BuyHold => "buy-hold",
            TradeFrequency::Monthly => "monthly",
            TradeFrequency::Weekly => "weekly",
            TradeFrequency::Daily => "daily",
        };
        f.write_str(key)
    }
}

impl FromStr for TradeFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy-hold" => Ok(TradeFrequency::BuyHold),
            "monthly" => Ok(TradeFrequency::Monthly),
            "weekly" => Ok(TradeFrequency::Weekly),
            "daily" => Ok(TradeFrequency::Daily),
            other => Err(format!(
                "unknown trading frequency `{other}` (buy-hold, monthly, weekly, daily)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostParams {
    pub amount: f64,
    pub years: u32,
    pub frequency: TradeFrequency,
}

impl Default for CostParams {
    fn default() -> Self {
        CostParams {
            amount: 10_000.0,
            years: 5,
            frequency: TradeFrequency::BuyHold,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeeLine {
    pub label: &'static str,
    pub amount: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CostBreakdown {
    pub instrument: &'static str,
    pub fees: Vec<FeeLine>,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.fees.iter().map(|line| line.amount).sum()
    }

    #[cfg(test)]
    pub fn fee(&self, label: &str) -> Option<f64> {
        self.fees
            .iter()
            .find(|line| line.label == label)
            .map(|line| line.amount)
    }

    fn series(&self, color: &str) -> ChartSeries {
        ChartSeries {
            kind: SeriesKind::Bar,
            x: self
                .fees
                .iter()
                .map(|line| AxisValue::Category(line.label.to_string()))
                .collect(),
            y: self
                .fees
                .iter()
                .map(|line| AxisValue::Number(line.amount))
                .collect(),
            style: StyleHints::solid(color),
            label: self.instrument.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CostComparison {
    /// Holding the coin directly.
    pub direct: CostBreakdown,
    /// Holding it through an exchange-traded fund.
    pub wrapper: CostBreakdown,
    pub chart: ChartSpec,
}

pub fn cost_comparison(params: &CostParams) -> Result<CostComparison, FetchError> {
    if !params.amount.is_finite() || params.amount < 0.0 {
        return Err(FetchError::precondition(format!(
            "investment amount must be a non-negative number, got {}",
            params.amount
        )));
    }
    let amount = params.amount;
    let years = f64::from(params.years);
    let trades = params.frequency.trades_per_year();

    let direct = CostBreakdown {
        instrument: "Spot Bitcoin",
        fees: vec![
            FeeLine {
                label: "Trading Fees",
                amount: amount * DIRECT_TRADING_RATE * trades * years,
            },
            FeeLine {
                label: "Custody Fees",
                amount: 0.0,
            },
            FeeLine {
                label: "Withdrawal Fees",
                amount: DIRECT_WITHDRAWAL_PER_YEAR * years,
            },
        ],
    };
    let wrapper = CostBreakdown {
        instrument: "Bitcoin ETFs",
        fees: vec![
            FeeLine {
                label: "Trading Fees",
                amount: amount * WRAPPER_TRADING_RATE * trades * years,
            },
            FeeLine {
                label: "Management Fees",
                amount: amount * WRAPPER_MANAGEMENT_RATE * years,
            },
            FeeLine {
                label: "Other Fees",
                amount: 0.0,
            },
        ],
    };
    let chart = ChartSpec {
        series: vec![direct.series("#F7931A"), wrapper.series("#1E88E5")],
        layout: ChartLayout {
            title: "Cost Breakdown Comparison".to_string(),
            x_title: String::new(),
            y_title: "Cost ($)".to_string(),
            y_range: None,
            bar_mode: Some(BarMode::Group),
        },
    };
    Ok(CostComparison {
        direct,
        wrapper,
        chart,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn fee_table_matches_formula_for_every_frequency() {
        for frequency in TradeFrequency::ALL {
            for (amount, years) in [(100.0, 1), (10_000.0, 5), (250_000.0, 10)] {
                let params = CostParams {
                    amount,
                    years,
                    frequency,
                };
                let result = cost_comparison(&params).unwrap();
                let tpy = frequency.trades_per_year();
                let years = f64::from(years);
                let direct = &result.direct;
                let wrapper = &result.wrapper;
                assert!(close(direct.fee("Trading Fees").unwrap(), amount * 0.003 * tpy * years));
                assert!(close(direct.fee("Withdrawal Fees").unwrap(), 15.0 * years));
                assert_eq!(direct.fee("Custody Fees"), Some(0.0));
                assert!(close(wrapper.fee("Trading Fees").unwrap(), amount * 0.001 * tpy * years));
                assert!(close(wrapper.fee("Management Fees").unwrap(), amount * 0.005 * years));
                assert_eq!(wrapper.fee("Other Fees"), Some(0.0));
            }
        }
    }

    #[test]
    fn monthly_ten_thousand_over_five_years() {
        let result = cost_comparison(&CostParams {
            amount: 10_000.0,
            years: 5,
            frequency: TradeFrequency::Monthly,
        })
        .unwrap();
        assert!(close(result.direct.total(), 1800.0 + 75.0));
        assert!(close(result.wrapper.total(), 600.0 + 250.0));
    }

    #[test]
    fn emits_one_bar_group_per_instrument() {
        let result = cost_comparison(&CostParams::default()).unwrap();
        assert_eq!(result.chart.layout.bar_mode, Some(BarMode::Group));
        let labels: Vec<&str> = result
            .chart
            .series
            .iter()
            .map(|s| s.label.as_str())
            .collect();
        assert_eq!(labels, vec!["Spot Bitcoin", "Bitcoin ETFs"]);
        assert!(result.chart.series.iter().all(|s| s.x.len() == 3 && s.y.len() == 3));
    }

    #[test]
    fn rejects_unusable_amounts() {
        for amount in [f64::NAN, f64::INFINITY, -5.0] {
            let params = CostParams {
                amount,
                ..CostParams::default()
            };
            assert!(matches!(
                cost_comparison(&params),
                Err(FetchError::TransformPrecondition(_))
            ));
        }
    }

    #[test]
    fn same_parameters_same_output() {
        let params = CostParams {
            amount: 5_000.0,
            years: 3,
            frequency: TradeFrequency::Weekly,
        };
        assert_eq!(cost_comparison(&params), cost_comparison(&params));
    }

    #[test]
    fn frequency_parses_and_cycles() {
        assert_eq!("buy-hold".parse::<TradeFrequency>(), Ok(TradeFrequency::BuyHold));
        assert_eq!("Daily".parse::<TradeFrequency>(), Ok(TradeFrequency::Daily));
        assert!("hourly".parse::<TradeFrequency>().is_err());
        assert_eq!(TradeFrequency::Daily.cycle(true), TradeFrequency::BuyHold);
        assert_eq!(TradeFrequency::BuyHold.cycle(false), TradeFrequency::Daily);
        assert_eq!(TradeFrequency::Weekly.to_string(), "weekly");
    }
}
