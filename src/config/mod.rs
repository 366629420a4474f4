// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::cli::Args;
use crate::error::{ProxyError, Result};
use config::{Config, Environment, File};
use std::path::PathBuf;

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. CLI arguments (highest)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest)
    pub fn load(args: &Args) -> Result<Self> {
        let config_path = args
            .config
            .clone()
            .unwrap_or_else(Self::default_config_path);

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            // Load from config file if it exists
            .add_source(
                File::from(config_path)
                    .required(args.config.is_some())
            )
            // Override with environment variables (e.g. LAZARUS_SW_CACHE__VERSION)
            .add_source(
                Environment::with_prefix("LAZARUS_SW")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cache.static_assets")
                    .try_parsing(true)
            )
            .set_override_option("cache.version", args.cache_version.clone())?
            .set_override_option("upstream.origin", args.upstream.clone())?
            .set_override_option("server.port", args.port.map(i64::from))?
            .build()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would leave the worker silently broken.
    pub fn validate(&self) -> Result<()> {
        let version = self.cache.version.trim();
        if version.is_empty() {
            return Err(ProxyError::Config(
                "cache.version must be set to a non-empty version tag".to_string(),
            ));
        }
        if version.starts_with('.') {
            return Err(ProxyError::Config(format!(
                "cache.version '{}' must not start with '.'",
                version
            )));
        }

        for (name, prefix) in [
            ("routing.api_prefix", &self.routing.api_prefix),
            ("routing.static_prefix", &self.routing.static_prefix),
            ("routing.shell_path", &self.routing.shell_path),
        ] {
            if !prefix.starts_with('/') {
                return Err(ProxyError::Config(format!(
                    "{} must start with '/', got '{}'",
                    name, prefix
                )));
            }
        }

        if let Some(bad) = self.cache.static_assets.iter().find(|p| !p.starts_with('/')) {
            return Err(ProxyError::Config(format!(
                "static asset '{}' is not an absolute path",
                bad
            )));
        }

        // The page fallback reads the shell from the installed assets
        if !self.cache.static_assets.contains(&self.routing.shell_path) {
            return Err(ProxyError::Config(format!(
                "offline shell '{}' is missing from cache.static_assets",
                self.routing.shell_path
            )));
        }

        if self.cache.write_queue_capacity == 0 {
            return Err(ProxyError::Config(
                "cache.write_queue_capacity must be at least 1".to_string(),
            ));
        }

        let origin = reqwest::Url::parse(&self.upstream.origin)
            .map_err(|e| ProxyError::Config(format!("upstream.origin: {}", e)))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(ProxyError::Config(format!(
                "upstream.origin must be http or https, got '{}'",
                origin.scheme()
            )));
        }

        Ok(())
    }

    fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lazarus-sw")
            .join("config.toml")
    }
}
