use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Only flags actually given are layered over the file
/// and environment; everything else falls through.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "stegvault", version, about = "File encryption with steganographic key images")]
pub struct Cli {
    /// Port to listen on (default: 8000)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address (default: 0.0.0.0)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./stegvault.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Base URL prefixed to `/file/{id}` in returned access URLs
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

/// Service configuration after all layers are merged.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub public_base_url: String,

    /// Upload and expiry limits (loaded from [limits] section in TOML)
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Carrier image sources (loaded from [carrier] section in TOML)
    #[serde(default)]
    pub carrier: CarrierConfig,
}

/// Upload size, expiry choices and sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum upload size in megabytes (default: 15)
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u32,

    /// Expiry values in minutes a client may request
    #[serde(default = "default_allowed_expiry")]
    pub allowed_expiry_minutes: Vec<u32>,

    /// Expiry used when the client sends none (default: 1440 = 24 hours)
    #[serde(default = "default_expiry_minutes")]
    pub default_expiry_minutes: u32,

    /// Seconds between expired-blob sweeps (default: 60)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_mb: default_max_upload_mb(),
            allowed_expiry_minutes: default_allowed_expiry(),
            default_expiry_minutes: default_expiry_minutes(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl LimitsConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb as usize * 1024 * 1024
    }
}

fn default_max_upload_mb() -> u32 {
    15
}

fn default_allowed_expiry() -> Vec<u32> {
    vec![30, 60, 1440, 10080]
}

fn default_expiry_minutes() -> u32 {
    1440
}

fn default_sweep_interval() -> u64 {
    60
}

/// Where carrier images come from and how hard to try.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    /// Pexels API key; the Pexels source is disabled when empty
    #[serde(default)]
    pub pexels_api_key: String,

    /// Random stock photo URL; `{width}` and `{height}` are substituted.
    /// Disabled when empty.
    #[serde(default = "default_picsum_template")]
    pub picsum_url_template: String,

    /// Requested carrier width in pixels (default: 640)
    #[serde(default = "default_carrier_width")]
    pub width: u32,

    /// Requested carrier height in pixels (default: 480)
    #[serde(default = "default_carrier_height")]
    pub height: u32,

    /// Carriers larger than this on either side are downscaled (default: 1024)
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// Fetch attempts before giving up (default: 3)
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Per-attempt timeout in seconds (default: 5)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Generate a random-noise carrier locally when remote sources fail
    #[serde(default = "default_local_fallback")]
    pub local_fallback: bool,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            pexels_api_key: String::new(),
            picsum_url_template: default_picsum_template(),
            width: default_carrier_width(),
            height: default_carrier_height(),
            max_dimension: default_max_dimension(),
            attempts: default_attempts(),
            timeout_secs: default_timeout(),
            local_fallback: default_local_fallback(),
        }
    }
}

fn default_picsum_template() -> String {
    "https://picsum.photos/{width}/{height}".to_string()
}

fn default_carrier_width() -> u32 {
    640
}

fn default_carrier_height() -> u32 {
    480
}

fn default_max_dimension() -> u32 {
    1024
}

fn default_attempts() -> u32 {
    3
}

fn default_timeout() -> u64 {
    5
}

fn default_local_fallback() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            config: "./stegvault.toml".to_string(),
            json_logs: false,
            generate_config: false,
            public_base_url: "http://localhost:8000".to_string(),
            limits: LimitsConfig::default(),
            carrier: CarrierConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (STEGVAULT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Cli::parse()).extract()
    }

    fn figment(cli: Cli) -> Figment {
        let config_path = cli.config.clone();
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("STEGVAULT_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# stegvault Configuration
# Place this file at ./stegvault.toml or specify with --config <path>
# All settings can be overridden via environment variables (STEGVAULT_PORT,
# STEGVAULT_LIMITS__MAX_UPLOAD_MB, etc.) or CLI flags (--port, etc.)

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Base URL used to build the accessUrl returned by /encode
# public_base_url = "http://localhost:8000"

# ---- Limits ----
# [limits]

# Maximum upload size in megabytes (default: 15)
# max_upload_mb = 15

# Expiry choices offered to clients, in minutes
# allowed_expiry_minutes = [30, 60, 1440, 10080]

# Expiry applied when the client sends none (default: 1440 = 24 hours)
# default_expiry_minutes = 1440

# Seconds between background sweeps of expired files (default: 60)
# sweep_interval_secs = 60

# ---- Carrier images ----
# [carrier]

# Pexels API key (https://www.pexels.com/api/). Leave empty to skip Pexels.
# pexels_api_key = ""

# Random stock photo URL template. Leave empty to skip.
# picsum_url_template = "https://picsum.photos/{width}/{height}"

# Requested carrier size in pixels
# width = 640
# height = 480

# Larger carriers are downscaled to fit this bound
# max_dimension = 1024

# Fetch attempts across sources, and per-attempt timeout
# attempts = 3
# timeout_secs = 5

# Fall back to a locally generated noise image
# local_fallback = true
"#
    .to_string()
}
