//! Runtime configuration, read from the environment the way the teacher's
//! example harness reads `DATABASE_URL` (`examples/common/util.rs`): a plain
//! `std::env::var` lookup per setting, no config-file or derive-macro layer.
//! Every setting has a default that lives as an associated constant, so tests
//! never need to set environment variables.

use std::time::Duration;

use uuid::Uuid;

use crate::oidc::jar::JarConfig;
use crate::query::Pagination;
use crate::types::InstanceId;

#[derive(Debug, Clone)]
pub struct Config {
    /// `IAM_DATABASE_URL`. Only consulted when the `postgres` feature is enabled.
    pub database_url: Option<String>,
    /// `IAM_INSTANCE_ID`. The tenancy root this process serves by default.
    pub instance_id: InstanceId,
    pub cache_default_ttl: Duration,
    pub jar_max_age_seconds: i64,
    pub pagination_default_limit: u64,
    pub pagination_max_limit: u64,
}

impl Config {
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);
    pub const DEFAULT_JAR_MAX_AGE_SECONDS: i64 = JarConfig::DEFAULT_MAX_AGE;
    pub const DEFAULT_PAGINATION_LIMIT: u64 = Pagination::DEFAULT_LIMIT;
    pub const DEFAULT_PAGINATION_MAX_LIMIT: u64 = Pagination::MAX_LIMIT;

    /// Reads every setting from the environment, falling back to the
    /// defaults above when a variable is absent.
    ///
    /// `IAM_INSTANCE_ID`, if set, must be a valid UUID; an invalid value is a
    /// startup-time error rather than a silently-ignored default, since
    /// serving the wrong tenant is a security bug, not a cosmetic one.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("IAM_DATABASE_URL").ok();

        let instance_id = match std::env::var("IAM_INSTANCE_ID") {
            Ok(raw) => {
                let uuid = Uuid::parse_str(&raw).map_err(|_| ConfigError::InvalidInstanceId(raw))?;
                InstanceId(uuid)
            }
            Err(_) => InstanceId(Uuid::nil()),
        };

        let cache_default_ttl = env_u64("IAM_CACHE_DEFAULT_TTL_SECONDS")?
            .map(Duration::from_secs)
            .unwrap_or(Self::DEFAULT_CACHE_TTL);

        let jar_max_age_seconds = match std::env::var("IAM_JAR_MAX_AGE_SECONDS") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidInteger("IAM_JAR_MAX_AGE_SECONDS", raw))?,
            Err(_) => Self::DEFAULT_JAR_MAX_AGE_SECONDS,
        };

        let pagination_default_limit = env_u64("IAM_PAGINATION_DEFAULT_LIMIT")?.unwrap_or(Self::DEFAULT_PAGINATION_LIMIT);
        let pagination_max_limit = env_u64("IAM_PAGINATION_MAX_LIMIT")?.unwrap_or(Self::DEFAULT_PAGINATION_MAX_LIMIT);

        Ok(Self {
            database_url,
            instance_id,
            cache_default_ttl,
            jar_max_age_seconds,
            pagination_default_limit,
            pagination_max_limit,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            instance_id: InstanceId(Uuid::nil()),
            cache_default_ttl: Self::DEFAULT_CACHE_TTL,
            jar_max_age_seconds: Self::DEFAULT_JAR_MAX_AGE_SECONDS,
            pagination_default_limit: Self::DEFAULT_PAGINATION_LIMIT,
            pagination_max_limit: Self::DEFAULT_PAGINATION_MAX_LIMIT,
        }
    }
}

fn env_u64(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| ConfigError::InvalidInteger(key, raw)),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("IAM_INSTANCE_ID {0:?} is not a valid UUID")]
    InvalidInstanceId(String),
    #[error("{0} {1:?} is not a valid integer")]
    InvalidInteger(&'static str, String),
}
