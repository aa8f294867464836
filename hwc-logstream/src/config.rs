//! Command-line and environment configuration.
//!
//! Every option can be set through the environment variable names used by
//! existing deployments; `.env` files are loaded by `main` before parsing.

use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use clap::{Args, Parser};
use url::Url;

use crate::manager::ManagerConfig;
use crate::provider::LtsConfig;
use crate::provider::lts::endpoint_for_region;
use crate::stream::{TagPolicy, WindowPolicy};
use crate::{Error, Result};

/// Tail Huawei Cloud LTS log streams to stdout.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub tailer: TailerConfig,

    #[command(flatten)]
    pub provider: ProviderArgs,

    /// Directory for daily rolling log files; console only when unset
    #[arg(long, env = "HWC_LOGSTREAM_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

/// Engine tuning.
#[derive(Args, Debug, Clone)]
pub struct TailerConfig {
    /// Safety margin between a fetch window's end and now
    #[arg(
        long,
        env = "HWC_LOGSTREAM_MAX_END_FROM_NOW",
        default_value = "1m",
        value_parser = parse_duration,
    )]
    pub max_end_from_now: Duration,

    /// Maximum span of one fetch window
    #[arg(
        long,
        env = "HWC_LOGSTREAM_MAX_FETCH_RANGE",
        default_value = "5m",
        value_parser = parse_duration,
    )]
    pub max_fetch_range: Duration,

    /// Minimum lookahead before a stream is fetched again
    #[arg(
        long,
        env = "HWC_LOGSTREAM_MIN_FETCH_RANGE",
        default_value = "1m",
        value_parser = parse_duration,
    )]
    pub min_fetch_range: Duration,

    /// Backlog beyond which unread history is skipped
    #[arg(
        long,
        env = "HWC_LOGSTREAM_MAX_LAG",
        default_value = "24h",
        value_parser = parse_duration,
    )]
    pub max_lag: Duration,

    /// Number of concurrent fetch workers
    #[arg(
        long = "workers",
        env = "HWC_LOGSTREAM_ROUTINE",
        default_value_t = crate::manager::DEFAULT_WORKER_COUNT,
    )]
    pub worker_count: usize,

    /// Stream tag holding the persisted read position
    #[arg(long, env = "HWC_LOGSTREAM_POSITITION_TAG", default_value = "x-hwc-logstream-pos")]
    pub position_tag: String,

    /// Stream tag that excludes a stream from tailing
    #[arg(long, env = "HWC_LOGSTREAM_EXCLUSION_TAG", default_value = "x-hwc-logstream-exclude")]
    pub exclusion_tag: String,

    /// Entries requested per page
    #[arg(
        long,
        env = "HWC_LOGSTREAM_PAGE_SIZE",
        default_value_t = crate::manager::DEFAULT_PAGE_SIZE,
    )]
    pub page_size: u32,

    /// Interval between log group and stream discovery runs
    #[arg(
        long,
        env = "HWC_LOGSTREAM_SYNC_INTERVAL",
        default_value = "1m",
        value_parser = parse_duration,
    )]
    pub sync_interval: Duration,
}

/// LTS connection settings.
#[derive(Args, Debug, Clone)]
pub struct ProviderArgs {
    /// Region the LTS endpoint is derived from
    #[arg(long, env = "HUAWEICLOUD_SDK_REGION_ID", default_value = "ap-southeast-4")]
    pub region_id: String,

    /// Project owning the log groups
    #[arg(long, env = "HUAWEICLOUD_SDK_PROJECT_ID")]
    pub project_id: String,

    /// IAM token sent with every request
    #[arg(long, env = "HWC_LOGSTREAM_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: String,

    /// Explicit LTS endpoint, overriding the region lookup
    #[arg(long, env = "HWC_LOGSTREAM_ENDPOINT")]
    pub endpoint: Option<Url>,

    /// Per-request timeout; 0s disables it
    #[arg(
        long,
        env = "HWC_LOGSTREAM_REQUEST_TIMEOUT",
        default_value = "30s",
        value_parser = parse_duration,
    )]
    pub request_timeout: Duration,
}

impl TailerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::config("worker count must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(Error::config("page size must be at least 1"));
        }
        if self.max_fetch_range.is_zero() {
            return Err(Error::config("max fetch range must be positive"));
        }
        if self.position_tag.trim().is_empty() {
            return Err(Error::config("position tag must not be empty"));
        }
        if self.exclusion_tag.trim().is_empty() {
            return Err(Error::config("exclusion tag must not be empty"));
        }
        Ok(())
    }

    pub fn to_manager_config(&self) -> Result<ManagerConfig> {
        Ok(ManagerConfig {
            window: WindowPolicy {
                max_end_from_now: time_delta(self.max_end_from_now)?,
                max_fetch_range: time_delta(self.max_fetch_range)?,
                min_fetch_range: time_delta(self.min_fetch_range)?,
                max_lag: time_delta(self.max_lag)?,
            },
            tags: TagPolicy::new(&self.position_tag, &self.exclusion_tag),
            page_size: self.page_size,
            sync_interval: self.sync_interval,
        })
    }
}

impl ProviderArgs {
    pub fn to_lts_config(&self) -> Result<LtsConfig> {
        let endpoint = match &self.endpoint {
            Some(url) => url.clone(),
            None => endpoint_for_region(&self.region_id)?,
        };
        if self.project_id.trim().is_empty() {
            return Err(Error::config("project id must not be empty"));
        }

        Ok(LtsConfig {
            endpoint,
            project_id: self.project_id.clone(),
            auth_token: self.auth_token.clone(),
            request_timeout: self.request_timeout,
        })
    }
}

fn time_delta(d: Duration) -> Result<TimeDelta> {
    TimeDelta::from_std(d).map_err(|_| Error::config(format!("duration {:?} is out of range", d)))
}

/// Parse a duration such as `300ms`, `90s`, `5m`, `1h30m` or `1.5h`.
///
/// Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare
/// `0` is allowed; any other number needs a unit.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration '{}': expected a number", input));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration '{}': bad number", input))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            "" => return Err(format!("invalid duration '{}': missing unit", input)),
            unit => return Err(format!("invalid duration '{}': unknown unit '{}'", input, unit)),
        };
        rest = &rest[unit_len..];

        total_nanos += value * unit_nanos;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(format!("invalid duration '{}': out of range", input));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["hwc-logstream", "--project-id", "p1", "--auth-token", "t"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("five minutes").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn test_defaults() {
        let cli = cli(&[]);
        let config = cli.tailer.to_manager_config().unwrap();
        assert_eq!(config.window, WindowPolicy::default());
        assert_eq!(config.tags.position_tag, "x-hwc-logstream-pos");
        assert_eq!(config.tags.exclusion_tag, "x-hwc-logstream-exclude");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(cli.tailer.worker_count, 5);
        assert_eq!(cli.provider.region_id, "ap-southeast-4");
        assert!(cli.log_dir.is_none());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = cli(&["--max-lag", "2h", "--workers", "8", "--position-tag", "pos"]);
        let config = cli.tailer.to_manager_config().unwrap();
        assert_eq!(config.window.max_lag, TimeDelta::hours(2));
        assert_eq!(cli.tailer.worker_count, 8);
        assert_eq!(config.tags.position_tag, "pos");
    }

    #[test]
    fn test_bad_duration_is_a_parse_error() {
        let result = Cli::try_parse_from([
            "hwc-logstream",
            "--project-id",
            "p1",
            "--auth-token",
            "t",
            "--max-fetch-range",
            "soon",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        assert!(cli(&[]).tailer.validate().is_ok());
        assert!(cli(&["--workers", "0"]).tailer.validate().is_err());
        assert!(cli(&["--page-size", "0"]).tailer.validate().is_err());
        assert!(cli(&["--max-fetch-range", "0"]).tailer.validate().is_err());
        assert!(cli(&["--exclusion-tag", " "]).tailer.validate().is_err());
    }

    #[test]
    fn test_lts_endpoint_resolution() {
        let config = cli(&[]).provider.to_lts_config().unwrap();
        assert_eq!(
            config.endpoint.as_str(),
            "https://lts.ap-southeast-4.myhuaweicloud.com/"
        );

        let config = cli(&["--region-id", "cn-north-4"]).provider.to_lts_config().unwrap();
        assert_eq!(config.endpoint.host_str(), Some("lts.cn-north-4.myhuaweicloud.com"));

        let config = cli(&["--endpoint", "http://127.0.0.1:8080"])
            .provider
            .to_lts_config()
            .unwrap();
        assert_eq!(config.endpoint.host_str(), Some("127.0.0.1"));
    }
}
