use crate::recurrence::{CronExpression, RecurrenceError};
use crate::remote::habitica::HabiticaConfig;
use crate::scheduler::{Job, Trigger};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::time::Duration;

const ENV_PREFIX: &str = "HABIT_SCHEDULER";

/// Raw configuration as read from the environment, e.g. `HABIT_SCHEDULER_REMOTE_TOKEN`.
#[derive(Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_store_key")]
    pub store_key: String,
    #[serde(default = "default_remote_base_url")]
    pub remote_base_url: String,
    pub remote_user: String,
    pub remote_token: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    #[serde(default = "default_cron_create")]
    pub cron_create: String,
    #[serde(default = "default_cron_persist")]
    pub cron_persist: String,
    #[serde(default = "default_cron_update")]
    pub cron_update: String,
    #[serde(default = "default_vanish_threshold")]
    pub vanish_threshold: u32,
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid schedule for the {job} trigger: {source}")]
    InvalidTrigger {
        job: Job,
        #[source]
        source: RecurrenceError,
    },
    #[error("Configuration value '{0}' must not be empty")]
    MissingValue(&'static str),
    #[error("vanish_threshold must be at least 1")]
    InvalidVanishThreshold,
}

/// Validated configuration handed to the rest of the application.
#[derive(Clone)]
pub struct Settings {
    pub listen_address: String,
    pub store_path: String,
    pub store_key: String,
    pub habitica: HabiticaConfig,
    pub triggers: Vec<Trigger>,
    pub vanish_threshold: u32,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Loads configuration from an explicit variable map instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::load(config::Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn load(source: config::Environment) -> Result<Self, ConfigError> {
        let settings = config::Config::builder().add_source(source).build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Checks every value that can be wrong and parses the trigger schedules.
    pub fn validate(self) -> Result<Settings, ConfigError> {
        for (name, value) in [
            ("remote_user", &self.remote_user),
            ("remote_token", &self.remote_token),
            ("store_key", &self.store_key),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingValue(name));
            }
        }
        if self.vanish_threshold == 0 {
            return Err(ConfigError::InvalidVanishThreshold);
        }

        let triggers = [
            (Job::Persist, &self.cron_persist),
            (Job::CreateDue, &self.cron_create),
            (Job::UpdateStates, &self.cron_update),
        ]
        .into_iter()
        .map(|(job, expression)| {
            expression
                .parse::<CronExpression>()
                .map(|schedule| Trigger::new(job, schedule))
                .map_err(|source| ConfigError::InvalidTrigger { job, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

        let habitica = HabiticaConfig::new(self.remote_user, self.remote_token)
            .with_base_url(self.remote_base_url)
            .with_timeout(Duration::from_secs(self.remote_timeout_secs));

        Ok(Settings {
            listen_address: self.listen_address,
            store_path: self.store_path,
            store_key: self.store_key,
            habitica,
            triggers,
            vanish_threshold: self.vanish_threshold,
        })
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("listen_address", &self.listen_address)
            .field("store_path", &self.store_path)
            .field("store_key", &self.store_key)
            .field("remote_base_url", &self.remote_base_url)
            .field("remote_user", &self.remote_user)
            .field("remote_token", &"<redacted>")
            .field("remote_timeout_secs", &self.remote_timeout_secs)
            .field("cron_create", &self.cron_create)
            .field("cron_persist", &self.cron_persist)
            .field("cron_update", &self.cron_update)
            .field("vanish_threshold", &self.vanish_threshold)
            .finish()
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_store_path() -> String {
    "habit-scheduler.db".to_string()
}

fn default_store_key() -> String {
    "habitrpg-tasks".to_string()
}

fn default_remote_base_url() -> String {
    "https://habitica.com/api/v3".to_string()
}

fn default_remote_timeout_secs() -> u64 {
    30
}

fn default_cron_create() -> String {
    "0 * * * * *".to_string()
}

fn default_cron_persist() -> String {
    "0 * * * * *".to_string()
}

fn default_cron_update() -> String {
    "10 */5 * * * *".to_string()
}

fn default_vanish_threshold() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (format!("{}_{}", ENV_PREFIX, k), v.to_string()))
            .collect()
    }

    fn credentials() -> Vec<(&'static str, &'static str)> {
        vec![("REMOTE_USER", "user-1"), ("REMOTE_TOKEN", "token-1")]
    }

    #[test]
    fn applies_defaults() {
        let config = Config::from_vars(vars(&credentials())).unwrap();

        assert_eq!(config.listen_address, "0.0.0.0:3000");
        assert_eq!(config.store_key, "habitrpg-tasks");
        assert_eq!(config.remote_timeout_secs, 30);
        assert_eq!(config.cron_update, "10 */5 * * * *");
        assert_eq!(config.vanish_threshold, 1);
    }

    #[test]
    fn reads_overrides() {
        let mut pairs = credentials();
        pairs.push(("CRON_CREATE", "*/30 * * * * *"));
        pairs.push(("REMOTE_TIMEOUT_SECS", "5"));
        pairs.push(("VANISH_THRESHOLD", "2"));

        let config = Config::from_vars(vars(&pairs)).unwrap();

        assert_eq!(config.cron_create, "*/30 * * * * *");
        assert_eq!(config.remote_timeout_secs, 5);
        assert_eq!(config.vanish_threshold, 2);
    }

    #[test]
    fn requires_credentials() {
        assert!(matches!(
            Config::from_vars(HashMap::new()),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn validate_builds_one_trigger_per_job() {
        let settings = Config::from_vars(vars(&credentials()))
            .unwrap()
            .validate()
            .unwrap();

        let jobs: Vec<_> = settings.triggers.iter().map(|t| t.job).collect();
        assert_eq!(jobs, [Job::Persist, Job::CreateDue, Job::UpdateStates]);
    }

    #[test]
    fn validate_rejects_bad_trigger_schedule() {
        let mut pairs = credentials();
        pairs.push(("CRON_UPDATE", "every five minutes"));
        let config = Config::from_vars(vars(&pairs)).unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTrigger {
                job: Job::UpdateStates,
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_blank_token_and_zero_threshold() {
        let config =
            Config::from_vars(vars(&[("REMOTE_USER", "u"), ("REMOTE_TOKEN", " ")])).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingValue("remote_token"))
        ));

        let mut pairs = credentials();
        pairs.push(("VANISH_THRESHOLD", "0"));
        let config = Config::from_vars(vars(&pairs)).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidVanishThreshold)
        ));
    }

    #[test]
    fn debug_output_hides_token() {
        let config = Config::from_vars(vars(&credentials())).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("token-1"));
        assert!(rendered.contains("<redacted>"));
    }
}
