use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use veil::Redact;

use crate::error::{Error, Result};

/// Credential for the catalog service. While one is configured, liked songs
/// and playlists are periodically synchronized.
#[derive(Clone, Deserialize, Redact, PartialEq, Eq, Hash)]
pub struct Credential {
    #[redact]
    pub token: String,
}

#[serde_as]
#[derive(Clone, Deserialize, Redact, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub app_name: String,
    #[serde(skip)]
    pub app_version: String,
    pub app_lang: String,

    #[serde(skip)]
    pub user_agent: String,

    pub data_dir: PathBuf,

    #[redact]
    pub lastfm_api_key: Option<String>,
    pub credential: Option<Credential>,

    /// Time box for catalog reads (stream resolution, radio pages).
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub fetch_timeout: Duration,

    /// Time box for each genre lookup.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub lookup_timeout: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sync_interval: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub status_poll_interval: Duration,

    pub history_limit: usize,
}

impl Config {
    /// Largest configuration file that will be parsed.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_millis(250);
    pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

    /// Loads configuration from a TOML file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large, or is not
    /// valid TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: configuration should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&contents)?;
        config.user_agent = Self::user_agent(&config.app_name, &config.app_version, &config.app_lang)?;

        if config.history_limit == 0 {
            return Err(Error::invalid_argument("history_limit must be positive"));
        }

        if config.sync_interval.is_zero() {
            return Err(Error::invalid_argument("sync_interval must be positive"));
        }

        Ok(config)
    }

    /// Builds the `User-Agent` that lookup services use to identify us.
    ///
    /// # Errors
    ///
    /// Returns an error when the application or OS identifiers contain
    /// characters that would break the header structure.
    pub fn user_agent(app_name: &str, app_version: &str, app_lang: &str) -> Result<String> {
        let illegal_chars = |chr: char| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            return Err(Error::invalid_argument(format!(
                "application name, version and/or language invalid (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            )));
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        let os_version = os_version.replace(illegal_chars, "-");

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; {app_lang})");
        trace!("user agent: {user_agent}");

        Ok(user_agent)
    }
}

impl Default for Config {
    fn default() -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        // Cargo metadata is always a valid identifier.
        let user_agent = Self::user_agent(&app_name, &app_version, &app_lang)
            .unwrap_or_else(|_| format!("{app_name}/{app_version}"));

        Self {
            app_name,
            app_version,
            app_lang,
            user_agent,
            data_dir: PathBuf::from("data"),
            lastfm_api_key: None,
            credential: None,
            fetch_timeout: Self::DEFAULT_FETCH_TIMEOUT,
            lookup_timeout: Self::DEFAULT_LOOKUP_TIMEOUT,
            sync_interval: Self::DEFAULT_SYNC_INTERVAL,
            status_poll_interval: Self::DEFAULT_STATUS_POLL_INTERVAL,
            history_limit: Self::DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            data_dir = "/var/lib/auraplay"
            lookup_timeout = 1500
            history_limit = 500

            [credential]
            token = "secret"
            "#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/auraplay"));
        assert_eq!(config.lookup_timeout, Duration::from_millis(1500));
        assert_eq!(config.history_limit, 500);
        assert_eq!(config.sync_interval, Config::DEFAULT_SYNC_INTERVAL);
        assert!(config.user_agent.starts_with("auraplay/"));
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn rejects_zero_sync_interval() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sync_interval = 0").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn rejects_invalid_app_identifiers() {
        assert!(Config::user_agent("a/b", "1.0", "en").is_err());
        assert!(Config::user_agent("app", "1.0", "eng").is_err());
    }
}
