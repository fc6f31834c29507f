use crate::api::BinanceConfig;
use crate::execution::EngineSettings;
use crate::{BotError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "accubot.toml";
pub const ENV_PREFIX: &str = "ACCUBOT";

const KNOWN_QUOTE_ASSETS: &[&str] = &["FDUSD", "USDT", "USDC", "BUSD", "BTC", "ETH", "BNB"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTolerance::Low => write!(f, "low"),
            RiskTolerance::Medium => write!(f, "medium"),
            RiskTolerance::High => write!(f, "high"),
        }
    }
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_base_order_amount() -> f64 {
    100.0
}

fn default_cycle_interval_secs() -> u64 {
    10
}

fn default_base_url() -> String {
    BinanceConfig::default().base_url
}

fn default_recv_window_ms() -> u64 {
    BinanceConfig::default().recv_window_ms
}

/// Runtime configuration
///
/// Sources, lowest priority first: built-in defaults, the TOML file,
/// `ACCUBOT_*` environment variables. CLI flags are applied on top by the
/// binary.
#[derive(Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Derived from `symbol` when empty
    #[serde(default)]
    pub base_asset: String,
    #[serde(default)]
    pub quote_asset: String,
    /// Quote-currency units per full-size order
    #[serde(default = "default_base_order_amount")]
    pub base_order_amount: f64,
    /// Base-asset units; 0 means no target
    #[serde(default)]
    pub accumulation_target: f64,
    #[serde(default)]
    pub risk_tolerance: RiskTolerance,
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default)]
    pub cancel_on_stop: bool,
    #[serde(default)]
    pub dry_run: bool,
}

// Keeps credentials out of logs
impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("symbol", &self.symbol)
            .field("base_asset", &self.base_asset)
            .field("quote_asset", &self.quote_asset)
            .field("base_order_amount", &self.base_order_amount)
            .field("accumulation_target", &self.accumulation_target)
            .field("risk_tolerance", &self.risk_tolerance)
            .field("cycle_interval_secs", &self.cycle_interval_secs)
            .field("api_key", &redact(&self.api_key))
            .field("secret_key", &redact(&self.secret_key))
            .field("base_url", &self.base_url)
            .field("recv_window_ms", &self.recv_window_ms)
            .field("cancel_on_stop", &self.cancel_on_stop)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl BotConfig {
    /// Load from `path` (or `accubot.toml` when present) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let mut bot_config: BotConfig = config.try_deserialize()?;
        bot_config.normalize()?;
        Ok(bot_config)
    }

    /// Upper-case the symbol and fill in missing asset names
    pub fn normalize(&mut self) -> Result<()> {
        self.symbol = self.symbol.trim().to_uppercase();

        if self.base_asset.is_empty() || self.quote_asset.is_empty() {
            let (base, quote) = split_symbol(&self.symbol).ok_or_else(|| {
                BotError::Config(format!(
                    "cannot derive assets from symbol '{}', set base_asset and quote_asset",
                    self.symbol
                ))
            })?;
            if self.base_asset.is_empty() {
                self.base_asset = base;
            }
            if self.quote_asset.is_empty() {
                self.quote_asset = quote;
            }
        }

        self.base_asset = self.base_asset.to_uppercase();
        self.quote_asset = self.quote_asset.to_uppercase();
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(BotError::Config("symbol must not be empty".to_string()));
        }
        if self.base_order_amount.is_nan() || self.base_order_amount <= 0.0 {
            return Err(BotError::Config(format!(
                "base_order_amount must be positive, got {}",
                self.base_order_amount
            )));
        }
        if self.accumulation_target.is_nan() || self.accumulation_target < 0.0 {
            return Err(BotError::Config(format!(
                "accumulation_target must not be negative, got {}",
                self.accumulation_target
            )));
        }
        if self.cycle_interval_secs == 0 {
            return Err(BotError::Config(
                "cycle_interval_secs must be at least 1".to_string(),
            ));
        }
        if !self.dry_run && (self.api_key.is_empty() || self.secret_key.is_empty()) {
            return Err(BotError::Config(
                "api_key and secret_key are required unless dry_run is set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            symbol: self.symbol.clone(),
            base_asset: self.base_asset.clone(),
            quote_asset: self.quote_asset.clone(),
            base_order_amount: self.base_order_amount,
            accumulation_target: self.accumulation_target,
            cycle_interval: Duration::from_secs(self.cycle_interval_secs),
            cancel_on_stop: self.cancel_on_stop,
        }
    }

    pub fn binance_config(&self) -> BinanceConfig {
        BinanceConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            secret_key: self.secret_key.clone(),
            recv_window_ms: self.recv_window_ms,
        }
    }
}

/// Split `DOGEUSDT` into `("DOGE", "USDT")`
pub fn split_symbol(symbol: &str) -> Option<(String, String)> {
    KNOWN_QUOTE_ASSETS.iter().find_map(|quote| {
        symbol
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base.to_string(), quote.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Result<BotConfig> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        BotConfig::from_config(config)
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("dry_run = true").unwrap();

        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(config.base_asset, "BTC");
        assert_eq!(config.quote_asset, "USDT");
        assert_eq!(config.cycle_interval_secs, 10);
        assert_eq!(config.risk_tolerance, RiskTolerance::Medium);
        assert_eq!(config.base_url, "https://api.binance.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_values() {
        let config = from_toml(
            r#"
            symbol = "dogefdusd"
            base_order_amount = 250.0
            accumulation_target = 5000.0
            risk_tolerance = "high"
            cycle_interval_secs = 30
            api_key = "key"
            secret_key = "secret"
            cancel_on_stop = true
            "#,
        )
        .unwrap();

        assert_eq!(config.symbol, "DOGEFDUSD");
        assert_eq!(config.base_asset, "DOGE");
        assert_eq!(config.quote_asset, "FDUSD");
        assert_eq!(config.risk_tolerance, RiskTolerance::High);
        assert!(config.validate().is_ok());

        let settings = config.engine_settings();
        assert_eq!(settings.cycle_interval, Duration::from_secs(30));
        assert_eq!(settings.base_order_amount, 250.0);
        assert!(settings.cancel_on_stop);
    }

    #[test]
    fn test_explicit_assets_are_kept() {
        let config = from_toml(
            r#"
            symbol = "XYZABC"
            base_asset = "xyz"
            quote_asset = "abc"
            dry_run = true
            "#,
        )
        .unwrap();

        assert_eq!(config.base_asset, "XYZ");
        assert_eq!(config.quote_asset, "ABC");
    }

    #[test]
    fn test_unknown_quote_needs_assets() {
        let result = from_toml(r#"symbol = "XYZABC""#);
        assert!(matches!(result, Err(BotError::Config(_))));
    }

    #[test]
    fn test_validation_rules() {
        let base = from_toml("dry_run = true").unwrap();

        let mut config = base.clone();
        config.base_order_amount = 0.0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.cycle_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.accumulation_target = -1.0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.symbol = String::new();
        assert!(config.validate().is_err());

        let mut config = base;
        config.dry_run = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_symbol() {
        assert_eq!(
            split_symbol("ETHBTC"),
            Some(("ETH".to_string(), "BTC".to_string()))
        );
        assert_eq!(split_symbol("USDT"), None);
        assert_eq!(split_symbol("FOO"), None);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut config = from_toml("dry_run = true").unwrap();
        config.secret_key = "hunter2".to_string();

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
