use crate::Result;
use crate::engine::{GovernorSettings, RetryPolicy};
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use directories::BaseDirs;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

const CONFIG_DIR: &str = "gh-inventory";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Profile used when none is named on the command line
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

/// Settings for one enterprise account
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// Enterprise slug
    #[serde(default)]
    pub enterprise: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,

    /// Directory that receives the CSV reports
    #[serde(default = "default_output_dir")]
    pub output_dir: Utf8PathBuf,

    /// Concurrent workers per pipeline stage
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Items admitted per second per report
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_retry_delay", with = "humantime_serde")]
    pub initial_retry_delay: Duration,

    #[serde(default = "default_max_retry_delay", with = "humantime_serde")]
    pub max_retry_delay: Duration,

    #[serde(default = "default_primary_threshold")]
    pub primary_threshold: u64,

    #[serde(default = "default_cost_weighted_threshold")]
    pub cost_weighted_threshold: u64,

    #[serde(default = "default_audit_log_threshold")]
    pub audit_log_threshold: u64,

    /// Extra time to wait past a quota reset
    #[serde(default = "default_rate_limit_cushion", with = "humantime_serde")]
    pub rate_limit_cushion: Duration,

    /// How long a quota reading is trusted before it is refreshed
    #[serde(default = "default_snapshot_max_age", with = "humantime_serde")]
    pub snapshot_max_age: Duration,

    /// How often quotas are polled while reports run
    #[serde(default = "default_monitor_interval", with = "humantime_serde")]
    pub monitor_interval: Duration,

    /// Users without activity for this long are reported as dormant
    #[serde(default = "default_dormant_after", with = "humantime_serde")]
    pub dormant_after: Duration,
}

fn default_profile_name() -> String {
    "default".to_string()
}

fn default_api_url() -> String {
    "https://api.github.com/".to_string()
}

fn default_graphql_url() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_output_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("inventory")
}

const fn default_workers() -> usize {
    8
}

const fn default_requests_per_second() -> u32 {
    10
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_retry_delay() -> Duration {
    Duration::from_secs(1)
}

const fn default_max_retry_delay() -> Duration {
    Duration::from_mins(1)
}

const fn default_primary_threshold() -> u64 {
    100
}

const fn default_cost_weighted_threshold() -> u64 {
    100
}

const fn default_audit_log_threshold() -> u64 {
    10
}

const fn default_rate_limit_cushion() -> Duration {
    Duration::from_secs(5)
}

const fn default_snapshot_max_age() -> Duration {
    Duration::from_secs(30)
}

const fn default_monitor_interval() -> Duration {
    Duration::from_mins(1)
}

const fn default_dormant_after() -> Duration {
    Duration::from_hours(24 * 90)
}

impl Default for Profile {
    fn default() -> Self {
        toml::from_str("").expect("an empty profile should deserialize to the defaults")
    }
}

impl Profile {
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_retry_delay).with_max_delay(self.max_retry_delay)
    }

    #[must_use]
    pub fn governor_settings(&self) -> GovernorSettings {
        GovernorSettings {
            primary_threshold: self.primary_threshold,
            cost_weighted_threshold: self.cost_weighted_threshold,
            audit_log_threshold: self.audit_log_threshold,
            cushion: self.rate_limit_cushion,
            snapshot_max_age: self.snapshot_max_age,
            ..GovernorSettings::default()
        }
    }

    /// Validate profile values
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.workers == 0 {
            return Err(app_err!("profile '{name}': workers must be at least 1"));
        }

        if self.requests_per_second == 0 {
            return Err(app_err!("profile '{name}': requests_per_second must be at least 1"));
        }

        if self.initial_retry_delay > self.max_retry_delay {
            return Err(app_err!(
                "profile '{name}': initial_retry_delay ({:?}) must not exceed max_retry_delay ({:?})",
                self.initial_retry_delay,
                self.max_retry_delay
            ));
        }

        if self.monitor_interval.is_zero() {
            return Err(app_err!("profile '{name}': monitor_interval must not be zero"));
        }

        Ok(())
    }
}

impl Config {
    /// Where the configuration lives when `--config` is not given
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no configuration directory
    pub fn default_path() -> Result<Utf8PathBuf> {
        let dirs = BaseDirs::new().into_app_err("could not determine the configuration directory")?;
        let dir = Utf8PathBuf::try_from(dirs.config_dir().to_path_buf()).into_app_err("the configuration directory is not valid UTF-8")?;
        Ok(dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load configuration from a file or use defaults
    ///
    /// An explicit path must exist. When no path is given, the default location is tried and
    /// the built-in defaults are used if there is no file there.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load(config_path: Option<&Utf8Path>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading configuration file '{path}'"))?;
            (path.to_path_buf(), text)
        } else {
            let path = Self::default_path()?;
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::debug!("No configuration file at '{path}', using defaults");
                    return Ok(Self::default());
                }
                Err(e) => return Err(e).into_app_err_with(|| format!("reading configuration file '{path}'")),
            }
        };

        let config: Self = toml::from_str(&text).into_app_err_with(|| format!("parsing configuration file '{final_path}'"))?;
        config.validate()?;

        Ok(config)
    }

    /// Save the default configuration to a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        if let Some(parent) = output_path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent).into_app_err_with(|| format!("creating directory '{parent}'"))?;
        }

        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Select a profile by name, or the default profile
    ///
    /// A missing default profile falls back to built-in values; a missing named profile is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the named profile does not exist
    pub fn profile(&self, name: Option<&str>) -> Result<(String, Profile)> {
        match name {
            Some(name) => self
                .profiles
                .get(name)
                .map(|profile| (name.to_string(), profile.clone()))
                .ok_or_else(|| app_err!("no profile named '{name}' in the configuration")),
            None => Ok((
                self.default_profile.clone(),
                self.profiles.get(&self.default_profile).cloned().unwrap_or_default(),
            )),
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, profile) in &self.profiles {
            profile.validate(name)?;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.default_profile, "default");
        assert!(config.profiles.contains_key("default"));
    }

    #[test]
    fn embedded_defaults_match_builtin_defaults() {
        let config = Config::default();
        let embedded = &config.profiles["default"];
        let builtin = Profile::default();

        assert_eq!(embedded.workers, builtin.workers);
        assert_eq!(embedded.requests_per_second, builtin.requests_per_second);
        assert_eq!(embedded.max_retry_delay, builtin.max_retry_delay);
        assert_eq!(embedded.dormant_after, builtin.dormant_after);
        assert_eq!(embedded.monitor_interval, builtin.monitor_interval);
    }

    #[test]
    fn zero_workers_rejected() {
        let profile = Profile { workers: 0, ..Profile::default() };
        assert!(profile.validate("test").is_err());
    }

    #[test]
    fn zero_rate_rejected() {
        let profile = Profile {
            requests_per_second: 0,
            ..Profile::default()
        };
        assert!(profile.validate("test").is_err());
    }

    #[test]
    fn inverted_retry_delays_rejected() {
        let profile = Profile {
            initial_retry_delay: Duration::from_secs(10),
            max_retry_delay: Duration::from_secs(1),
            ..Profile::default()
        };
        assert!(profile.validate("test").is_err());
    }

    #[test]
    fn unknown_fields_rejected() {
        let text = "[profiles.default]\nworkerz = 4\n";
        assert!(toml::from_str::<Config>(text).is_err());
    }

    #[test]
    fn durations_parse_humanely() {
        let text = "[profiles.prod]\nenterprise = \"acme\"\ndormant_after = \"30days\"\nrate_limit_cushion = \"250ms\"\n";
        let config: Config = toml::from_str(text).unwrap();
        let (name, profile) = config.profile(Some("prod")).unwrap();

        assert_eq!(name, "prod");
        assert_eq!(profile.enterprise.as_deref(), Some("acme"));
        assert_eq!(profile.dormant_after, Duration::from_hours(24 * 30));
        assert_eq!(profile.rate_limit_cushion, Duration::from_millis(250));
        assert_eq!(profile.governor_settings().cushion, Duration::from_millis(250));
    }

    #[test]
    fn missing_profiles() {
        let config: Config = toml::from_str("").unwrap();
        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "default");
        assert_eq!(profile.workers, 8);

        assert!(config.profile(Some("staging")).is_err());
    }

    #[test]
    fn retry_policy_from_profile() {
        let policy = Profile::default().retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_mins(1));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn save_default_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let output_path = Utf8PathBuf::try_from(tmp.path().join("nested").join("config.toml")).unwrap();
        Config::save_default(&output_path).unwrap();

        let loaded = Config::load(Some(&output_path)).unwrap();
        loaded.validate().unwrap();
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn explicit_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().join("absent.toml")).unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
