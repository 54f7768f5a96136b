//! Admin bearer-token resolution.
//!
//! A token is taken from configuration when present. Otherwise a shared
//! signing secret (configuration, then the fallback env file) is handed to an
//! external helper process whose stdout becomes the token. Every failure ends
//! in "no credential", which callers treat as a reason to skip, not to fail.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::ContractError;

pub const ADMIN_TOKEN_VAR: &str = "ADMIN_TOKEN";
pub const JWT_SECRET_VAR: &str = "JWT_SECRET";

const HELPER_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Option<String>;
}

/// Fixed credential, or a fixed absence of one.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(token: &str) -> Self {
        Self(Some(token.to_string()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn credential(&self) -> Option<String> {
        self.0.clone()
    }
}

/// External process that prints a freshly minted admin token.
#[derive(Debug, Clone)]
pub struct MintingHelper {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl MintingHelper {
    pub fn new(command: &[String]) -> Result<Self, ContractError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ContractError::Config("token helper command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: HELPER_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn mint(&self, secret: &str) -> Result<String, ContractError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(JWT_SECRET_VAR, secret)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ContractError::CredentialError(format!("{} timed out", self.program)))?
            .map_err(|e| ContractError::CredentialError(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(ContractError::CredentialError(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(ContractError::CredentialError(format!("{} printed no token", self.program)));
        }
        Ok(token)
    }
}

/// Reads `JWT_SECRET=<value>` from a dotenv-style file.
pub fn secret_from_env_file(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    contents
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("JWT_SECRET="))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub struct AdminCredentialResolver {
    explicit: Option<String>,
    secret: Option<String>,
    env_file: Option<PathBuf>,
    helper: Option<MintingHelper>,
    export: bool,
    resolved: OnceCell<Option<String>>,
}

impl AdminCredentialResolver {
    pub fn from_config(config: &Config) -> Self {
        let helper = match MintingHelper::new(&config.token_helper) {
            Ok(helper) => Some(helper),
            Err(e) => {
                warn!("Token helper disabled: {}", e);
                None
            }
        };

        Self {
            explicit: config.admin_token.clone(),
            secret: config.jwt_secret.clone(),
            env_file: Some(config.env_file.clone()),
            helper,
            export: true,
            resolved: OnceCell::new(),
        }
    }

    pub fn with_helper(mut self, helper: MintingHelper) -> Self {
        self.helper = Some(helper);
        self
    }

    /// Controls whether a minted token is written back to `ADMIN_TOKEN`.
    pub fn with_export(mut self, export: bool) -> Self {
        self.export = export;
        self
    }

    fn signing_secret(&self) -> Option<String> {
        if let Some(secret) = &self.secret {
            return Some(secret.clone());
        }
        let path = self.env_file.as_deref()?;
        let secret = secret_from_env_file(path);
        if secret.is_some() {
            debug!("Using JWT_SECRET from {}", path.display());
        }
        secret
    }

    async fn resolve(&self) -> Option<String> {
        if let Some(token) = &self.explicit {
            debug!("Using explicit admin token");
            return Some(token.clone());
        }

        let secret = match self.signing_secret() {
            Some(secret) => secret,
            None => {
                info!("No ADMIN_TOKEN or JWT_SECRET; admin checks will be skipped");
                return None;
            }
        };

        let helper = match self.helper.as_ref() {
            Some(helper) => helper,
            None => {
                warn!("JWT_SECRET is set but no token helper is configured; admin checks will be skipped");
                return None;
            }
        };
        match helper.mint(&secret).await {
            Ok(token) => {
                info!("Minted admin token via {}", helper.program);
                if self.export {
                    env::set_var(ADMIN_TOKEN_VAR, &token);
                }
                Some(token)
            }
            Err(e) => {
                warn!("Admin token unavailable: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for AdminCredentialResolver {
    async fn credential(&self) -> Option<String> {
        self.resolved.get_or_init(|| self.resolve()).await.clone()
    }
}
