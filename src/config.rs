use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::api::DEFAULT_API_BASE;
use crate::query::{RefetchPolicy, RetryBackoff};

#[derive(Parser, Clone, Debug)]
#[clap(about = "Terminal dashboard for Bitcoin / ETF analytics served by the analytics API")]
pub struct CliParams {
    /// Base URL of the analytics API (everything before /bitcoin, /etf, /risk)
    #[clap(long = "api-base", env = "DASHBOARD_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Extra attempts after a failed request; only network errors and 408/429/5xx are retried
    #[clap(long = "retries", default_value_t = 1)]
    pub retries: u32,

    /// Delay between attempts: immediate, fixed:DUR, or exp:BASE[:MAX] (e.g. exp:500ms:8s)
    #[clap(long = "retry-backoff", value_name = "STRATEGY", default_value = "exp:500ms:8s")]
    pub retry_backoff: BackoffSpec,

    /// Random spread applied to each backoff delay, as a fraction of it (0 disables)
    #[clap(long = "retry-jitter", default_value_t = 0.0)]
    pub retry_jitter: f64,

    /// Refetch the visible page's data when the terminal regains focus
    #[clap(long = "refetch-on-focus")]
    pub refetch_on_focus: bool,

    /// Treat cached data older than this as stale on the next visit (e.g. 5m)
    #[clap(long = "stale-after", value_name = "DURATION")]
    pub stale_after: Option<DurationSpec>,

    /// Poll the visible page's data at this interval (e.g. 30s); off by default
    #[clap(long = "refetch-interval", value_name = "DURATION")]
    pub refetch_interval: Option<DurationSpec>,

    /// JSON-lines file that query failures are appended to
    #[clap(long = "error-log", value_name = "PATH", default_value = "dashboard_errors.jsonl")]
    pub error_log: PathBuf,

    /// Minimum gap between redraws in milliseconds
    #[clap(long = "redraw-ms", default_value_t = 100)]
    pub redraw_ms: u64,
}

impl CliParams {
    pub fn refetch_policy(&self) -> RefetchPolicy {
        let jitter = if self.retry_jitter.is_finite() {
            self.retry_jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        RefetchPolicy {
            refetch_on_focus: self.refetch_on_focus,
            max_retries: self.retries,
            retry_backoff: self.retry_backoff.as_backoff(),
            retry_jitter: jitter,
            stale_after: self.stale_after.map(|spec| spec.as_duration()),
            refetch_interval: self.refetch_interval.map(|spec| spec.as_duration()),
        }
    }

    pub fn redraw_gap(&self) -> Duration {
        Duration::from_millis(self.redraw_ms.max(16))
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BackoffSpec(RetryBackoff);

impl BackoffSpec {
    pub fn as_backoff(&self) -> RetryBackoff {
        self.0
    }
}

impl FromStr for BackoffSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut parts = trimmed.split(':');
        let strategy = parts.next().unwrap_or_default().trim().to_lowercase();
        let backoff = match strategy.as_str() {
            "immediate" | "none" => RetryBackoff::Immediate,
            "fixed" => {
                let delay = parts
                    .next()
                    .ok_or_else(|| "fixed backoff needs a delay, e.g. fixed:1s".to_string())
                    .and_then(parse_duration_spec)?;
                RetryBackoff::Fixed(delay)
            }
            "exp" | "exponential" => {
                let base = parts
                    .next()
                    .ok_or_else(|| "exponential backoff needs a base, e.g. exp:500ms".to_string())
                    .and_then(parse_duration_spec)?;
                let max = match parts.next() {
                    Some(value) => parse_duration_spec(value)?,
                    None => base.saturating_mul(16),
                };
                if max < base {
                    return Err(format!(
                        "exponential backoff max must not be below its base: `{trimmed}`"
                    ));
                }
                RetryBackoff::Exponential { base, max }
            }
            other => {
                return Err(format!(
                    "unknown backoff strategy `{other}` (use immediate, fixed:DUR, exp:BASE[:MAX])"
                ));
            }
        };
        if parts.next().is_some() {
            return Err(format!("too many fields in backoff spec `{trimmed}`"));
        }
        Ok(BackoffSpec(backoff))
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DurationSpec(Duration);

impl DurationSpec {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for DurationSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let duration = parse_duration_spec(s)?;
        Ok(DurationSpec(duration))
    }
}

/// `<number><unit>` with `ms`, `s`, `m` or `h` units; fractions are allowed.
fn parse_duration_spec(input: &str) -> Result<Duration, String> {
    let spec = input.trim();
    let unit_at = spec
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(spec.len());
    let (number, unit) = spec.split_at(unit_at);
    if number.is_empty() {
        return Err(format!("`{spec}` must start with a number (e.g. 500ms, 30s, 5m)"));
    }
    let amount: f64 = number
        .parse()
        .map_err(|_| format!("`{number}` in `{spec}` is not a number"))?;
    let unit_secs = match unit.trim().to_ascii_lowercase().as_str() {
        "ms" | "msec" | "millis" => 0.001,
        "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600.0,
        "" => return Err(format!("`{spec}` needs a unit: ms, s, m or h")),
        other => return Err(format!("unknown duration unit `{other}` (use ms, s, m or h)")),
    };
    let seconds = amount * unit_secs;
    if seconds.is_nan() || seconds <= 0.0 {
        return Err(format!("duration must be positive: `{spec}`"));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|err| format!("duration `{spec}` is out of range: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations_with_units() {
        assert_eq!(parse_duration_spec("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration_spec("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration_spec("1.5m").unwrap(), Duration::from_secs(90));
        assert!(parse_duration_spec("").is_err());
        assert!(parse_duration_spec("10").is_err());
        assert!(parse_duration_spec("m5").is_err());
        assert!(parse_duration_spec("3w").is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let max_secs = format!("{}s", Duration::MAX.as_secs_f64());
        assert!(parse_duration_spec(&max_secs).unwrap_err().contains("out of range"));
        assert!(parse_duration_spec(&format!("{}h", "9".repeat(400))).is_err());
        assert!(parse_duration_spec("0s").is_err());
    }

    #[test]
    fn parses_backoff_strategies() {
        assert_eq!(
            "immediate".parse::<BackoffSpec>().unwrap().as_backoff(),
            RetryBackoff::Immediate
        );
        assert_eq!(
            "fixed:2s".parse::<BackoffSpec>().unwrap().as_backoff(),
            RetryBackoff::Fixed(Duration::from_secs(2))
        );
        assert_eq!(
            "exp:500ms:8s".parse::<BackoffSpec>().unwrap().as_backoff(),
            RetryBackoff::Exponential {
                base: Duration::from_millis(500),
                max: Duration::from_secs(8),
            }
        );
        assert_eq!(
            "exp:1s".parse::<BackoffSpec>().unwrap().as_backoff(),
            RetryBackoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(16),
            }
        );
        assert!("exp:8s:1s".parse::<BackoffSpec>().is_err());
        assert!("fixed".parse::<BackoffSpec>().is_err());
        assert!("linear:1s".parse::<BackoffSpec>().is_err());
    }

    #[test]
    fn default_cli_yields_default_policy() {
        let params = CliParams::parse_from(["btc-etf-dash"]);
        let policy = params.refetch_policy();
        assert_eq!(policy.max_retries, 1);
        assert!(!policy.refetch_on_focus);
        assert_eq!(policy.refetch_interval, None);
        assert_eq!(params.api_base, DEFAULT_API_BASE);
    }
}
