use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::transport::{Backoff, CallKind, CallProfile};

const DEFAULT_API_ROOT: &str = "https://api.ultralytics.com";
const DEFAULT_WEB_ROOT: &str = "https://hub.ultralytics.com";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub hub: HubEndpointConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub disk: DiskConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubEndpointConfig {
    /// REST API root, e.g. "https://api.ultralytics.com"
    #[serde(default = "default_api_root")]
    pub api_root: String,
    /// Web UI root used for "view model at" links
    #[serde(default = "default_web_root")]
    pub web_root: String,
    /// Agent name announced with every heartbeat (default: rust-{version}-local)
    #[serde(default)]
    pub agent_name: Option<String>,
}

fn default_api_root() -> String {
    DEFAULT_API_ROOT.to_string()
}

fn default_web_root() -> String {
    DEFAULT_WEB_ROOT.to_string()
}

impl Default for HubEndpointConfig {
    fn default() -> Self {
        Self {
            api_root: default_api_root(),
            web_root: default_web_root(),
            agent_name: None,
        }
    }
}

impl HubEndpointConfig {
    pub fn api_root(&self) -> &str {
        self.api_root.trim_end_matches('/')
    }

    pub fn agent_name(&self) -> String {
        self.agent_name
            .clone()
            .unwrap_or_else(|| format!("rust-{}-local", env!("CARGO_PKG_VERSION")))
    }
}

/// Minimum seconds between two fires of each channel
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_metrics_secs")]
    pub metrics_secs: f64,
    #[serde(default = "default_checkpoint_secs")]
    pub checkpoint_secs: f64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: f64,
}

fn default_metrics_secs() -> f64 {
    3.0
}

fn default_checkpoint_secs() -> f64 {
    900.0
}

fn default_heartbeat_secs() -> f64 {
    300.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            metrics_secs: default_metrics_secs(),
            checkpoint_secs: default_checkpoint_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn metrics(&self) -> Duration {
        secs_f64(self.metrics_secs)
    }

    pub fn checkpoint(&self) -> Duration {
        secs_f64(self.checkpoint_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        secs_f64(self.heartbeat_secs)
    }
}

fn secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Retry/timeout settings for one call kind
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CallProfileConfig {
    /// Retries after the first attempt
    pub retries: u32,
    pub timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl CallProfileConfig {
    const fn new(retries: u32, timeout_secs: u64, backoff_base_ms: u64, backoff_max_ms: u64) -> Self {
        Self {
            retries,
            timeout_secs,
            backoff_base_ms,
            backoff_max_ms,
        }
    }

    pub fn profile(&self) -> CallProfile {
        CallProfile::new(
            self.retries,
            Duration::from_secs(self.timeout_secs),
            Backoff::new(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_max_ms),
            ),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_fetch_model")]
    pub fetch_model: CallProfileConfig,
    #[serde(default = "default_metrics")]
    pub metrics: CallProfileConfig,
    #[serde(default = "default_epoch_checkpoint")]
    pub epoch_checkpoint: CallProfileConfig,
    #[serde(default = "default_final_checkpoint")]
    pub final_checkpoint: CallProfileConfig,
    #[serde(default = "default_heartbeat")]
    pub heartbeat: CallProfileConfig,
    #[serde(default = "default_dataset_probe")]
    pub dataset_probe: CallProfileConfig,
}

fn default_fetch_model() -> CallProfileConfig {
    CallProfileConfig::new(3, 30, 1_000, 8_000)
}

fn default_metrics() -> CallProfileConfig {
    CallProfileConfig::new(2, 30, 250, 1_000)
}

fn default_epoch_checkpoint() -> CallProfileConfig {
    CallProfileConfig::new(3, 3_600, 2_000, 30_000)
}

fn default_final_checkpoint() -> CallProfileConfig {
    CallProfileConfig::new(10, 3_600, 2_000, 60_000)
}

fn default_heartbeat() -> CallProfileConfig {
    CallProfileConfig::new(0, 30, 1_000, 1_000)
}

fn default_dataset_probe() -> CallProfileConfig {
    CallProfileConfig::new(2, 30, 1_000, 4_000)
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            fetch_model: default_fetch_model(),
            metrics: default_metrics(),
            epoch_checkpoint: default_epoch_checkpoint(),
            final_checkpoint: default_final_checkpoint(),
            heartbeat: default_heartbeat(),
            dataset_probe: default_dataset_probe(),
        }
    }
}

impl TransportConfig {
    pub fn profile(&self, call: CallKind) -> CallProfile {
        match call {
            CallKind::FetchModel => self.fetch_model.profile(),
            CallKind::UploadMetrics => self.metrics.profile(),
            CallKind::UploadEpoch => self.epoch_checkpoint.profile(),
            CallKind::UploadFinal => self.final_checkpoint.profile(),
            CallKind::Heartbeat => self.heartbeat.profile(),
            CallKind::DatasetProbe => self.dataset_probe.profile(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskConfig {
    /// Directory whose filesystem receives the dataset
    #[serde(default = "default_disk_path")]
    pub path: PathBuf,
    /// Free space must exceed dataset size times this factor
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,
}

fn default_disk_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_safety_factor() -> f64 {
    2.0
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            path: default_disk_path(),
            safety_factor: default_safety_factor(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl HubConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("HUBSYNC_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (HUBSYNC_HUB__API_ROOT, etc.)
            .add_source(
                Environment::with_prefix("HUBSYNC")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (name, root) in [("api_root", &self.hub.api_root), ("web_root", &self.hub.web_root)] {
            if let Err(e) = Url::parse(root) {
                errors.push(format!("hub.{name} is not a valid URL ({root}): {e}"));
            }
        }

        for (name, secs) in [
            ("metrics_secs", self.rate_limits.metrics_secs),
            ("checkpoint_secs", self.rate_limits.checkpoint_secs),
            ("heartbeat_secs", self.rate_limits.heartbeat_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 {
                errors.push(format!("rate_limits.{name} must be positive, got {secs}"));
            }
        }

        let t = &self.transport;
        for (name, profile) in [
            ("fetch_model", &t.fetch_model),
            ("metrics", &t.metrics),
            ("epoch_checkpoint", &t.epoch_checkpoint),
            ("final_checkpoint", &t.final_checkpoint),
            ("heartbeat", &t.heartbeat),
            ("dataset_probe", &t.dataset_probe),
        ] {
            if profile.timeout_secs == 0 {
                errors.push(format!("transport.{name}.timeout_secs must be positive"));
            }
            if profile.backoff_max_ms < profile.backoff_base_ms {
                errors.push(format!(
                    "transport.{name}.backoff_max_ms must be >= backoff_base_ms"
                ));
            }
        }

        // Retrying metrics must finish before the next flush window opens.
        let metrics_retry_time = t.metrics.profile().backoff.total(t.metrics.retries);
        if metrics_retry_time >= self.rate_limits.metrics() && self.rate_limits.metrics_secs > 0.0 {
            errors.push(format!(
                "metrics retry backoff ({:?}) must stay under rate_limits.metrics_secs",
                metrics_retry_time
            ));
        }

        if !self.disk.safety_factor.is_finite() || self.disk.safety_factor < 1.0 {
            errors.push("disk.safety_factor must be at least 1.0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
