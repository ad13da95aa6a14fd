//! Configuration loading from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use sbtc_hex::{DeliveryConfig, ReconcilerConfig, ServiceConfig};
use sbtc_types::event_types;
use stacks_explorer::ExplorerConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown log format: {}", other),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub log_format: LogFormat,
    /// OTLP collector; span export is off when unset.
    pub otlp_endpoint: Option<String>,
    pub service: ServiceConfig,
    pub explorer: ExplorerConfig,
    pub reconciler: ReconcilerConfig,
    pub delivery: DeliveryConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let parse = |name: &str| -> anyhow::Result<Option<u64>> {
            var(name)
                .map(|v| v.trim().parse::<u64>())
                .transpose()
                .with_context(|| format!("{} must be a non-negative integer", name))
        };
        let secs = |name: &str, default: Duration| -> anyhow::Result<Duration> {
            Ok(parse(name)?.map(Duration::from_secs).unwrap_or(default))
        };

        let port = var("PORT")
            .map(|v| v.trim().parse::<u16>())
            .transpose()
            .context("PORT must be a valid port number")?
            .unwrap_or(3000);

        let database_url = var("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let log_format = var("LOG_FORMAT")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(LogFormat::Pretty);

        let mut service = ServiceConfig::default();
        if let Some(event_type) = var("CONFIRM_EVENT_TYPE") {
            if !event_types::is_known(&event_type) {
                anyhow::bail!("CONFIRM_EVENT_TYPE is not a known event type: {}", event_type);
            }
            service.confirm_event_type = event_type;
        }

        let explorer_defaults = ExplorerConfig::default();
        let explorer = ExplorerConfig {
            base_url: var("STACKS_API_URL").unwrap_or(explorer_defaults.base_url),
            page_size: parse("EXPLORER_PAGE_SIZE")?
                .map(|n| n.min(u64::from(u32::MAX)) as u32)
                .unwrap_or(explorer_defaults.page_size),
            timeout: secs("EXPLORER_TIMEOUT_SECS", explorer_defaults.timeout)?,
            requests_per_second: parse("EXPLORER_REQUESTS_PER_SECOND")?
                .map(|n| n.clamp(1, u64::from(u32::MAX)) as u32)
                .unwrap_or(explorer_defaults.requests_per_second),
        };

        let reconciler_defaults = ReconcilerConfig::default();
        let reconciler = ReconcilerConfig {
            contract_id: var("SBTC_CONTRACT_ID").unwrap_or(reconciler_defaults.contract_id),
            page_size: explorer.page_size,
            batch_size: parse("RECONCILE_BATCH_SIZE")?
                .map(|n| n.clamp(1, i64::MAX as u64) as i64)
                .unwrap_or(reconciler_defaults.batch_size),
            interval: secs("RECONCILE_INTERVAL_SECS", reconciler_defaults.interval)?,
        };

        let delivery_defaults = DeliveryConfig::default();
        let max_attempts = parse("WEBHOOK_MAX_ATTEMPTS")?
            .map(|n| n.clamp(1, i32::MAX as u64) as i32)
            .unwrap_or(delivery_defaults.max_attempts);
        let delivery = DeliveryConfig {
            timeout: secs("WEBHOOK_TIMEOUT_SECS", delivery_defaults.timeout)?,
            max_attempts,
            backoff_base: secs("WEBHOOK_BACKOFF_BASE_SECS", delivery_defaults.backoff_base)?,
            backoff_max: secs("WEBHOOK_BACKOFF_MAX_SECS", delivery_defaults.backoff_max)?,
            concurrency: parse("WEBHOOK_CONCURRENCY")?
                .map(|n| n.max(1) as usize)
                .unwrap_or(delivery_defaults.concurrency),
            sweep_interval: secs("WEBHOOK_SWEEP_INTERVAL_SECS", delivery_defaults.sweep_interval)?,
            sweep_batch: delivery_defaults.sweep_batch,
        };
        service.max_attempts = max_attempts;

        Ok(Self {
            port,
            database_url,
            log_format,
            otlp_endpoint: var("OTEL_EXPORTER_OTLP_ENDPOINT"),
            service,
            explorer,
            reconciler,
            delivery,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE_URL", "sqlite::memory:")]).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(
            config.service.confirm_event_type,
            event_types::PAYMENT_INTENT_CREATED
        );
        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.service.max_attempts, 5);
        assert_eq!(config.delivery.backoff_base, Duration::from_secs(30));
        assert_eq!(config.reconciler.interval, Duration::from_secs(60));
        assert_eq!(config.explorer.base_url, "https://api.hiro.so");
    }

    #[test]
    fn test_database_url_required() {
        assert!(load(&[]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/gateway"),
            ("PORT", "8080"),
            ("LOG_FORMAT", "json"),
            ("CONFIRM_EVENT_TYPE", "payment_intent.pending"),
            ("WEBHOOK_MAX_ATTEMPTS", "8"),
            ("RECONCILE_INTERVAL_SECS", "0"),
            ("EXPLORER_PAGE_SIZE", "20"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.service.confirm_event_type,
            event_types::PAYMENT_INTENT_PENDING
        );
        assert_eq!(config.delivery.max_attempts, 8);
        assert_eq!(config.service.max_attempts, 8);
        assert!(config.reconciler.interval.is_zero());
        assert_eq!(config.reconciler.page_size, 20);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let base = ("DATABASE_URL", "sqlite::memory:");
        assert!(load(&[base, ("PORT", "http")]).is_err());
        assert!(load(&[base, ("WEBHOOK_TIMEOUT_SECS", "-1")]).is_err());
        assert!(load(&[base, ("CONFIRM_EVENT_TYPE", "invoice.paid")]).is_err());
        assert!(load(&[base, ("LOG_FORMAT", "xml")]).is_err());
    }
}
