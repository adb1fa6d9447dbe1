use failure::Fail;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3000/";
pub const DEFAULT_RECOGNIZER_URL: &str = "https://api.platerecognizer.com/v1/plate-reader/";

#[derive(Debug, Fail)]
pub enum ConfigError {
    #[fail(display = "{} is not a valid URL: {}", name, error)]
    BadUrl {
        name: &'static str,
        #[fail(cause)]
        error: url::ParseError,
    },
    #[fail(display = "{} must be a positive number of seconds, got '{}'", name, value)]
    BadSeconds { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub backend_url: Url,
    pub recognizer_url: Url,
    pub recognizer_token: Option<String>,
    pub recognizer_regions: Vec<String>,
    pub history_db: PathBuf,
    pub probe_interval: Duration,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    /// Same as `from_env` with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = |name: &'static str, default: &str| {
            let raw = lookup(name).unwrap_or_else(|| default.to_string());
            Url::parse(&raw).map_err(|error| ConfigError::BadUrl { name, error })
        };
        let seconds = |name: &'static str, default: u64| match lookup(name) {
            None => Ok(Duration::from_secs(default)),
            Some(value) => match value.trim().parse::<u64>() {
                Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
                _ => Err(ConfigError::BadSeconds { name, value }),
            },
        };
        Ok(Config {
            backend_url: url("BACKEND_URL", DEFAULT_BACKEND_URL)?,
            recognizer_url: url("RECOGNIZER_URL", DEFAULT_RECOGNIZER_URL)?,
            recognizer_token: lookup("RECOGNIZER_TOKEN").filter(|t| !t.is_empty()),
            recognizer_regions: lookup("RECOGNIZER_REGIONS")
                .map(|r| {
                    r.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            history_db: lookup("HISTORY_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("plate-history.db")),
            probe_interval: seconds("PROBE_INTERVAL_SECS", 30)?,
            http_timeout: seconds("HTTP_TIMEOUT_SECS", 30)?,
        })
    }
}
