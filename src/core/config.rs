use anyhow::{Context, Result, bail};
use crate::providers::yahoo_finance::DEFAULT_BASE_URL;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::PathBuf, str::FromStr};
use tracing::debug;

/// Deployment mode, read from `NODE_ENV` for compatibility with existing deployments.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Local,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Local => "local",
            Environment::Test => "test",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "local" => Ok(Environment::Local),
            "test" => Ok(Environment::Test),
            other => Err(anyhow::anyhow!("Invalid environment: {}", other)),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub yahoo: Option<YahooProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            yahoo: Some(YahooProviderConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FeatureFlags {
    #[serde(default)]
    pub use_screener_for_universe: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
    pub import_max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_requests: 100,
            window_secs: 60,
            import_max_requests: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Extra sources appended to the CSP `connect-src` directive.
    #[serde(default)]
    pub connect_src: Vec<String>,
    /// Key clients by the first `X-Forwarded-For` hop. Only enable behind a proxy
    /// that sets the header.
    #[serde(default)]
    pub trust_proxy: bool,
}

/// Where the store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Memory,
    Disk(PathBuf),
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database_url: Option<String>,
    pub data_path: Option<String>,
    #[serde(default)]
    pub frontend_url: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl AppConfig {
    /// Loads the configuration file (explicit path, or the default location when it
    /// exists) and applies environment overrides on top.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => {
                let default_path = Self::default_config_path()?;
                if default_path.exists() {
                    Self::load_from_path(&default_path)?
                } else {
                    debug!("No config file at {}, using defaults", default_path.display());
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "divtrack", "divtrack")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("dev", "divtrack", "divtrack")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Overrides settings from environment variables. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(env) = lookup("NODE_ENV") {
            self.environment = env.parse()?;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            self.security.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(url) = lookup("FRONTEND_URL") {
            self.frontend_url = Some(url);
        }
        if let Some(url) = lookup("API_BASE_URL") {
            self.api_base_url = Some(url);
        }
        if let Some(flag) = lookup("USE_SCREENER_FOR_UNIVERSE") {
            self.features.use_screener_for_universe = parse_flag(&flag);
        }
        if let Some(flag) = lookup("TRUST_PROXY") {
            self.security.trust_proxy = parse_flag(&flag);
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT: {port}"))?;
        }
        Ok(())
    }

    /// The CORS allow-list: configured origins plus the front-end URL.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = self.security.allowed_origins.clone();
        if let Some(frontend) = &self.frontend_url {
            let frontend = frontend.trim_end_matches('/').to_string();
            if !origins.contains(&frontend) {
                origins.push(frontend);
            }
        }
        origins
    }

    pub fn storage_location(&self) -> Result<StorageLocation> {
        match self.database_url.as_deref().map(str::trim) {
            Some("memory://") | Some("memory") => Ok(StorageLocation::Memory),
            Some(url) if url.starts_with("file:") => {
                let path = url.trim_start_matches("file:").trim_start_matches("//");
                if path.is_empty() {
                    bail!("DATABASE_URL has an empty file path");
                }
                Ok(StorageLocation::Disk(PathBuf::from(path)))
            }
            Some(url) if url.contains("://") => {
                bail!("Unsupported DATABASE_URL scheme: {}", url)
            }
            Some(path) => Ok(StorageLocation::Disk(PathBuf::from(path))),
            None => Ok(StorageLocation::Disk(self.default_data_path()?.join("db"))),
        }
    }

    pub fn yahoo_base_url(&self) -> &str {
        self.providers
            .yahoo
            .as_ref()
            .map_or(DEFAULT_BASE_URL, |p| &p.base_url)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
environment: production
server:
  host: "0.0.0.0"
  port: 8080
frontend_url: "https://app.example.com"
features:
  use_screener_for_universe: true
security:
  allowed_origins:
    - "https://admin.example.com"
providers:
  yahoo:
    base_url: "http://example.com/yahoo"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.server.port, 8080);
        assert!(config.features.use_screener_for_universe);
        assert_eq!(config.yahoo_base_url(), "http://example.com/yahoo");
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(
            config.allowed_origins(),
            vec![
                "https://admin.example.com".to_string(),
                "https://app.example.com".to_string()
            ]
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.server.port, 3000);
        assert!(!config.features.use_screener_for_universe);
        assert_eq!(config.yahoo_base_url(), "https://query1.finance.yahoo.com");
    }

    #[test]
    fn test_missing_yahoo_section_falls_back_to_default_url() {
        let config: AppConfig = serde_yaml::from_str("providers:\n  yahoo: null\n").unwrap();
        assert_eq!(config.yahoo_base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(env_of(&[
                ("NODE_ENV", "production"),
                ("DATABASE_URL", "memory://"),
                ("ALLOWED_ORIGINS", "https://a.example.com/, https://b.example.com"),
                ("USE_SCREENER_FOR_UNIVERSE", "1"),
                ("PORT", "4000"),
                ("API_BASE_URL", "https://api.example.com"),
                ("TRUST_PROXY", "true"),
            ]))
            .unwrap();

        assert!(config.environment.is_production());
        assert_eq!(config.storage_location().unwrap(), StorageLocation::Memory);
        assert_eq!(
            config.security.allowed_origins,
            vec!["https://a.example.com", "https://b.example.com"]
        );
        assert!(config.features.use_screener_for_universe);
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.api_base_url.as_deref(), Some("https://api.example.com"));
        assert!(config.security.trust_proxy);
    }

    #[test]
    fn test_env_rejects_bad_values() {
        let mut config = AppConfig::default();
        assert!(config.apply_env(env_of(&[("NODE_ENV", "staging")])).is_err());
        assert!(config.apply_env(env_of(&[("PORT", "http")])).is_err());
    }

    #[test]
    fn test_storage_location_from_url() {
        let mut config = AppConfig::default();
        config.database_url = Some("file:/var/lib/divtrack".to_string());
        assert_eq!(
            config.storage_location().unwrap(),
            StorageLocation::Disk(PathBuf::from("/var/lib/divtrack"))
        );

        config.database_url = Some("postgresql://localhost/db".to_string());
        assert!(config.storage_location().is_err());

        config.database_url = None;
        config.data_path = Some("/tmp/divtrack".to_string());
        assert_eq!(
            config.storage_location().unwrap(),
            StorageLocation::Disk(PathBuf::from("/tmp/divtrack/db"))
        );
    }
}
