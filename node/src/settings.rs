use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use config::{Config, File as ConfigFile};
use std::fmt;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "config/birthbook.toml";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_DB_PATH: &str = "./data/users.db";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_FORMAT: &str = "pretty";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sled,
    Memory,
}

impl StorageBackend {
    fn from_env(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sled" | "disk" => Ok(StorageBackend::Sled),
            "memory" | "mem" => Ok(StorageBackend::Memory),
            other => Err(anyhow!("unknown storage backend '{other}' (expected sled or memory)")),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Sled => f.write_str("sled"),
            StorageBackend::Memory => f.write_str("memory"),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_path: Option<PathBuf>,

    // Network
    pub host: String,
    pub port: u16,

    // Storage
    pub storage: StorageBackend,
    pub db_path: PathBuf,
    pub seed_sample_data: bool,

    // Logging
    pub log_level: String,
    pub log_format: String,

    // Development
    pub debug: bool,
}

impl AppConfig {
    /// Layers the optional TOML file and `BIRTHBOOK_*` environment variables
    /// over the built-in defaults.
    pub fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            path.exists().then_some(path)
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("BIRTHBOOK"));

        let config = builder.build()?;
        let mut loaded = Self::from_source(&config)?;
        loaded.config_path = resolved_path;
        Ok(loaded)
    }

    pub fn from_source(config: &Config) -> Result<Self> {
        let port = match setting(config, &["port", "server.port"]) {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid port '{raw}'"))?,
            None => DEFAULT_PORT,
        };
        let storage = match setting(config, &["storage", "storage.backend"]) {
            Some(raw) => StorageBackend::from_env(&raw)?,
            None => StorageBackend::Sled,
        };
        let debug = switch(config, &["debug", "server.debug"], false)?;

        let mut loaded = Self {
            config_path: None,
            host: setting(config, &["host", "server.host"])
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            storage,
            db_path: setting(config, &["db_path", "storage.db_path"])
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            seed_sample_data: switch(config, &["seed", "storage.seed"], true)?,
            log_level: setting(config, &["log_level", "log.level"])
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_format: setting(config, &["log_format", "log.format"])
                .unwrap_or_else(|| DEFAULT_LOG_FORMAT.to_string()),
            debug: false,
        };
        if debug {
            loaded.enable_debug();
        }
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("HOST must not be empty");
        }
        if self.port == 0 {
            anyhow::bail!("PORT must be greater than zero");
        }
        if self.storage == StorageBackend::Sled && self.db_path.as_os_str().is_empty() {
            anyhow::bail!("DB_PATH must not be empty when using sled storage");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!(
                "LOG_FORMAT must be 'pretty' or 'json' (got '{}')",
                self.log_format
            );
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address a local client should use to reach the server.
    pub fn status_address(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" => "127.0.0.1",
            "::" | "[::]" => "[::1]",
            other => other,
        };
        format!("{}:{}", host, self.port)
    }

    fn enable_debug(&mut self) {
        self.debug = true;
        self.log_level = "debug".to_string();
    }
}

/// First non-blank value among `keys`; flat keys come before sectioned ones.
fn setting(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| config.get_string(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Boolean switch that also takes the spellings operators use in env files.
fn switch(config: &Config, keys: &[&str], default: bool) -> Result<bool> {
    let Some(raw) = setting(config, keys) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => anyhow::bail!("invalid switch '{raw}' for {}", keys[0]),
    }
}

pub fn load_config_with_overrides(matches: &ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

pub fn apply_overrides(matches: &ArgMatches, config: &mut AppConfig) {
    if let Some(host) = matches.get_one::<String>("host") {
        config.host = host.clone();
    }

    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }

    if let Some(db_path) = matches.get_one::<String>("db-path") {
        config.db_path = PathBuf::from(db_path);
    }

    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if matches.get_flag("memory") {
        config.storage = StorageBackend::Memory;
    }

    if matches.get_flag("no-seed") {
        config.seed_sample_data = false;
    }

    if matches.get_flag("debug") {
        config.enable_debug();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli;
    use config::FileFormat;
    use std::io::Write;

    fn from_toml(raw: &str) -> Result<AppConfig> {
        let config = Config::builder()
            .add_source(ConfigFile::from_str(raw, FileFormat::Toml))
            .build()?;
        AppConfig::from_source(&config)
    }

    #[test]
    fn defaults_match_the_stock_deployment() {
        let config = from_toml("").unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
        assert_eq!(config.status_address(), "127.0.0.1:5000");
        assert_eq!(config.db_path, PathBuf::from("./data/users.db"));
        assert_eq!(config.storage, StorageBackend::Sled);
        assert!(config.seed_sample_data);
        assert_eq!(config.log_level, "info");
        assert!(!config.debug);
        config.validate().unwrap();
    }

    #[test]
    fn sectioned_keys_are_read() {
        let config = from_toml(
            r#"
            [server]
            host = "127.0.0.1"
            port = 8080
            debug = true

            [storage]
            backend = "memory"
            seed = false
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(!config.seed_sample_data);
        assert!(config.debug);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(from_toml("port = \"http\"").is_err());
        assert!(from_toml("storage = \"postgres\"").is_err());

        let config = from_toml("port = 0").unwrap();
        assert!(config.validate().is_err());

        let config = from_toml("log_format = \"xml\"").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn switches_accept_common_spellings() {
        let config = from_toml("seed = \"off\"\ndebug = \"YES\"").unwrap();
        assert!(!config.seed_sample_data);
        assert!(config.debug);

        let config = from_toml("seed = 0").unwrap();
        assert!(!config.seed_sample_data);

        let err = from_toml("seed = \"maybe\"").unwrap_err();
        assert!(err.to_string().contains("seed"));
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let err = AppConfig::load(Some("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "port = 6123\nlog_format = \"json\"").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.port, 6123);
        assert_eq!(config.log_format, "json");
        assert_eq!(config.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn cli_flags_override_loaded_values() {
        let mut config = from_toml("port = 8080").unwrap();
        let matches = cli()
            .try_get_matches_from([
                "birthbook-node",
                "--port",
                "9000",
                "--db-path",
                "/tmp/birthbook",
                "--memory",
                "--no-seed",
                "--debug",
            ])
            .unwrap();
        apply_overrides(&matches, &mut config);

        assert_eq!(config.port, 9000);
        assert_eq!(config.db_path, PathBuf::from("/tmp/birthbook"));
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(!config.seed_sample_data);
        assert_eq!(config.log_level, "debug");
    }
}
