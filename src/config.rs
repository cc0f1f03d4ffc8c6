use serde::Deserialize;
use std::{
    env::VarError,
    fmt::Display,
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use url::Url;

use crate::error::Error;

const APP_DIR: &str = "dotmonitor";
const CONFIG_PATH_VAR: &str = "DOTMONITOR_CONFIG";

/// Agent configuration, read from an optional TOML file and overlaid with
/// environment variables (a `.env` file is honoured).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resolver: ResolverOptions,
    pub monitor: MonitorOptions,
    pub telegram: TelegramOptions,
    pub stats: StatsOptions,
    pub storage: StorageOptions,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    pub address: Option<IpAddr>,
    pub hostname: Option<String>,
    pub port: u16,
    pub test_domain: String,
    pub timeout_secs: u64,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            address: None,
            hostname: None,
            port: 853,
            test_domain: "google.com".to_string(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorOptions {
    pub check_interval_secs: u64,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            check_interval_secs: 20,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TelegramOptions {
    pub bot_token: Option<String>,
    pub main_channel: Option<String>,
    pub allow_main_channel_unsubscribe: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatsOptions {
    pub url: Option<Url>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    pub subscribers_file: Option<PathBuf>,
}

impl Config {
    /// Loads the config file (if any) and applies the process environment on top.
    pub fn load() -> Result<Config, Error> {
        // A missing .env is the normal case in containers
        dotenvy::dotenv().ok();

        let mut config = match Self::file_path() {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Config::default(),
        };
        config.apply_env(|key| dotenvy::var(key))?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    fn file_path() -> Option<PathBuf> {
        match dotenvy::var(CONFIG_PATH_VAR) {
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml")),
        }
    }

    /// Overrides file values with whatever `get` finds for the well-known keys.
    pub fn apply_env<F>(&mut self, get: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Result<String, dotenvy::Error>,
    {
        if let Some(v) = lookup(&get, "DNS_IP")? {
            self.resolver.address = Some(parse("DNS_IP", &v)?);
        }
        if let Some(v) = lookup(&get, "DNS_HOST")? {
            self.resolver.hostname = Some(v);
        }
        if let Some(v) = lookup(&get, "DNS_PORT")? {
            self.resolver.port = parse("DNS_PORT", &v)?;
        }
        if let Some(v) = lookup(&get, "TEST_DOMAIN")? {
            self.resolver.test_domain = v;
        }
        if let Some(v) = lookup(&get, "TIMEOUT")? {
            self.resolver.timeout_secs = parse("TIMEOUT", &v)?;
        }
        if let Some(v) = lookup(&get, "CHECK_INTERVAL")? {
            self.monitor.check_interval_secs = parse("CHECK_INTERVAL", &v)?;
        }
        if let Some(v) = lookup(&get, "TELEGRAM_BOT_TOKEN")? {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = lookup(&get, "MAIN_CHANNEL")? {
            self.telegram.main_channel = Some(v);
        }
        if let Some(v) = lookup(&get, "ALLOW_MAIN_CHANNEL_UNSUBSCRIBE")? {
            self.telegram.allow_main_channel_unsubscribe =
                parse("ALLOW_MAIN_CHANNEL_UNSUBSCRIBE", &v)?;
        }
        if let Some(v) = lookup(&get, "STATS_URL")? {
            self.stats.url = Some(Url::parse(&v)?);
        }
        if let Some(v) = lookup(&get, "HTTP_BASIC_AUTH_USER")? {
            self.stats.user = Some(v);
        }
        if let Some(v) = lookup(&get, "HTTP_BASIC_AUTH_PWD")? {
            self.stats.password = Some(v);
        }
        if let Some(v) = lookup(&get, "STATS_TIMEOUT")? {
            self.stats.timeout_secs = Some(parse("STATS_TIMEOUT", &v)?);
        }
        if let Some(v) = lookup(&get, "SUBSCRIBERS_FILE")? {
            self.storage.subscribers_file = Some(PathBuf::from(v));
        }

        if self.monitor.check_interval_secs == 0 {
            return Err(Error::Config("CHECK_INTERVAL must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Names of required keys that are not set. The agent still starts without them.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.resolver.address.is_none() {
            missing.push("DNS_IP");
        }
        if self.resolver.hostname.is_none() {
            missing.push("DNS_HOST");
        }
        if self.telegram.bot_token.is_none() {
            missing.push("TELEGRAM_BOT_TOKEN");
        }
        if self.telegram.main_channel.is_none() {
            missing.push("MAIN_CHANNEL");
        }
        missing
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver.timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.check_interval_secs)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_secs(
            self.stats
                .timeout_secs
                .unwrap_or(self.resolver.timeout_secs),
        )
    }

    pub fn subscribers_file(&self) -> PathBuf {
        self.storage.subscribers_file.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join(APP_DIR))
                .unwrap_or_default()
                .join("subscribers.toml")
        })
    }
}

fn lookup<F>(get: &F, key: &str) -> Result<Option<String>, Error>
where
    F: Fn(&str) -> Result<String, dotenvy::Error>,
{
    match get(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(dotenvy::Error::EnvVar(VarError::NotPresent)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, Error>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid value for {key}: {e}")))
}
