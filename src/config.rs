use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::flag::DEFAULT_FLAG_KEY;
use crate::ContractError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_API_PREFIX: &str = "/api";
pub const DEFAULT_ENV_FILE: &str = "backend/.env";
pub const DEFAULT_TOKEN_HELPER: &str = "node tools/gen_admin_jwt.js";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STRESS_WORKERS: usize = 8;
pub const DEFAULT_STRESS_REQUESTS: usize = 40;

/// Settings for one verification run.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_prefix: String,
    pub admin_token: Option<String>,
    pub jwt_secret: Option<String>,
    pub env_file: PathBuf,
    pub token_helper: Vec<String>,
    pub flag_key: String,
    pub timeout: Duration,
    pub stress_workers: usize,
    pub stress_requests: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            admin_token: None,
            jwt_secret: None,
            env_file: PathBuf::from(DEFAULT_ENV_FILE),
            token_helper: split_command(DEFAULT_TOKEN_HELPER),
            flag_key: DEFAULT_FLAG_KEY.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            stress_workers: DEFAULT_STRESS_WORKERS,
            stress_requests: DEFAULT_STRESS_REQUESTS,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ContractError> {
        Self::from_vars(env::vars())
    }

    /// Builds a config from `(name, value)` pairs; empty values count as unset.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ContractError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();

        let mut config = Config::default();

        if let Some(base_url) = vars.get("BASE_URL") {
            config.base_url = base_url.trim().to_string();
        }
        if let Some(prefix) = vars.get("API_PREFIX") {
            config.api_prefix = prefix.trim().to_string();
        }
        config.admin_token = vars.get("ADMIN_TOKEN").map(|t| t.trim().to_string());
        config.jwt_secret = vars.get("JWT_SECRET").map(|s| s.trim().to_string());
        if let Some(path) = vars.get("ADMIN_ENV_FILE") {
            config.env_file = PathBuf::from(path);
        }
        if let Some(helper) = vars.get("ADMIN_TOKEN_HELPER") {
            config.token_helper = split_command(helper);
        }
        if let Some(key) = vars.get("FLAG_KEY") {
            config.flag_key = key.trim().to_string();
        }
        if let Some(secs) = vars.get("REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ContractError::Config(format!("REQUEST_TIMEOUT_SECS is not a number: {}", secs))
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if self.flag_key.is_empty() {
            return Err(ContractError::Config("flag key must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ContractError::Config("request timeout must be positive".to_string()));
        }
        if self.stress_workers == 0 {
            return Err(ContractError::Config("stress worker count must be positive".to_string()));
        }
        if self.token_helper.is_empty() {
            return Err(ContractError::Config("token helper command is empty".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}
