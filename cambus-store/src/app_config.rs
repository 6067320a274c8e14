use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Absent means in-memory stores.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub payment: PaymentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BusinessRules {
    #[serde(default = "default_seat_hold_seconds")]
    pub seat_hold_seconds: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PaymentConfig {
    #[serde(default = "default_payment_timeout_ms")]
    pub timeout_ms: u64,
    /// Only used by the simulated gateway.
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: usize,
    #[serde(default = "default_breaker_reset_seconds")]
    pub breaker_reset_seconds: u64,
}

fn default_max_connections() -> u32 { 5 }
fn default_seat_hold_seconds() -> u64 { 900 }
fn default_sweep_interval_seconds() -> u64 { 60 }
fn default_sweep_batch_size() -> usize { 500 }
fn default_payment_timeout_ms() -> u64 { 10_000 }
fn default_success_rate() -> f64 { 0.8 }
fn default_latency_ms() -> u64 { 2_000 }
fn default_breaker_threshold() -> usize { 5 }
fn default_breaker_reset_seconds() -> u64 { 30 }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            seat_hold_seconds: default_seat_hold_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

impl BusinessRules {
    pub fn hold_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seat_hold_seconds as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_payment_timeout_ms(),
            success_rate: default_success_rate(),
            latency_ms: default_latency_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_reset_seconds: default_breaker_reset_seconds(),
        }
    }
}

impl PaymentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn breaker_reset(&self) -> Duration {
        Duration::from_secs(self.breaker_reset_seconds)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `CAMBUS__BUSINESS_RULES__SEAT_HOLD_SECONDS=600`
            .add_source(config::Environment::with_prefix("CAMBUS").separator("__"))
            .build()?;

        s.try_deserialize::<Self>()?.validated()
    }

    /// Parse a TOML document on its own, without files or environment.
    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    fn validated(self) -> Result<Self, config::ConfigError> {
        let rate = self.payment.success_rate;
        // Rejects NaN too
        if !(0.0..=1.0).contains(&rate) {
            return Err(config::ConfigError::Message(format!(
                "payment.success_rate must be between 0 and 1, got {}",
                rate
            )));
        }
        Ok(self)
    }
}
