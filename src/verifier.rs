//! Scripted checks of the feature-flag API contract.
//!
//! Read-only checks always run. Checks that mutate flags need an admin
//! credential and are reported as skipped without one. The original value of
//! every flag the run mutates is kept in a [`FlagStore`] and written back
//! when the run ends.

use chrono::Utc;
use log::{info, warn};
use serde_json::json;

use crate::flag::{FlagEnvelope, UpdateReply, UpdateRequest};
use crate::report::{Outcome, Report};
use crate::store::{FlagStore, MemoryStore};
use crate::stress::{self, StressPlan};
use crate::{ApiReply, Client, Config, ContractError};

const INVALID_TOKEN: &str = "invalid.token.value";

/// Statuses accepted for a PUT without a valid credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnauthorizedPolicy {
    /// 401 or 403 only.
    #[default]
    Strict,
    /// Also accepts 404.
    Lenient,
}

impl UnauthorizedPolicy {
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            UnauthorizedPolicy::Strict => matches!(status, 401 | 403),
            UnauthorizedPolicy::Lenient => matches!(status, 401 | 403 | 404),
        }
    }
}

pub struct Verifier {
    client: Client,
    credential: Option<String>,
    flag_key: String,
    policy: UnauthorizedPolicy,
    stress: Option<StressPlan>,
    baseline: Box<dyn FlagStore>,
}

impl Verifier {
    pub fn new(client: Client, credential: Option<String>, flag_key: &str) -> Self {
        Self {
            client,
            credential,
            flag_key: flag_key.to_string(),
            policy: UnauthorizedPolicy::default(),
            stress: Some(StressPlan::default()),
            baseline: Box::new(MemoryStore::new()),
        }
    }

    pub fn from_config(client: Client, credential: Option<String>, config: &Config) -> Self {
        Self::new(client, credential, &config.flag_key).with_stress(Some(StressPlan {
            workers: config.stress_workers,
            requests: config.stress_requests,
        }))
    }

    pub fn with_policy(mut self, policy: UnauthorizedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// `None` leaves the concurrent scenario out of the run.
    pub fn with_stress(mut self, plan: Option<StressPlan>) -> Self {
        self.stress = plan;
        self
    }

    pub fn with_baseline_store(mut self, store: Box<dyn FlagStore>) -> Self {
        self.baseline = store;
        self
    }

    pub fn flag_key(&self) -> &str {
        &self.flag_key
    }

    pub async fn run(&self) -> Report {
        let mut report = Report::new();
        info!("Verifying flag contract on {} ({})", self.client.base_url(), self.flag_key);

        report.record("flags.list", self.check_list().await);
        report.record("flags.read_known", self.check_read_known().await);
        report.record("flags.read_unknown", self.check_read_unknown().await);

        // Taken before any PUT, including the ones expected to be rejected.
        if let Err(e) = self.snapshot(&self.flag_key).await {
            warn!("Could not snapshot {}: {}", self.flag_key, e);
        }

        report.record("flags.put_without_token", self.check_unauthorized(None).await);
        report.record("flags.put_invalid_token", self.check_unauthorized(Some(INVALID_TOKEN)).await);
        report.record("flags.read_after_write", self.check_read_after_write().await);
        report.record("flags.malformed_payloads", self.check_malformed_payloads().await);
        report.record("flags.idempotent_put", self.check_idempotent_put().await);
        report.record("flags.put_unknown_key", self.check_put_unknown_key().await);
        if let Some(plan) = self.stress {
            report.record("flags.concurrent_toggle", self.check_concurrent(plan).await);
        }

        self.restore().await;
        report
    }

    fn token(&self) -> Result<&str, Outcome> {
        self.credential
            .as_deref()
            .ok_or_else(|| Outcome::Skipped("no admin credential available".to_string()))
    }

    async fn current(&self, key: &str) -> Result<bool, ContractError> {
        match self.client.flag(key).await? {
            Some(flag) => Ok(flag.enabled),
            None => Err(ContractError::Violation(format!("flag {} not found", key))),
        }
    }

    /// Authorized PUT that must succeed. `Err(Skipped)` when the server
    /// rejects the credential itself.
    async fn authorized_put(&self, key: &str, enabled: bool, token: &str) -> Result<ApiReply, Result<Outcome, ContractError>> {
        let reply = self
            .client
            .put_flag(key, &UpdateRequest::enabled(enabled), Some(token))
            .await
            .map_err(Err)?;
        if matches!(reply.code(), 401 | 403) {
            return Err(Ok(Outcome::Skipped(format!(
                "admin credential rejected with {}",
                reply.code()
            ))));
        }
        if !matches!(reply.code(), 200 | 204) {
            return Err(Err(reply.status_error()));
        }
        Ok(reply)
    }

    /// A 200 reply must echo the written value and, when present, the key.
    fn check_echo(reply: &ApiReply, key: &str, enabled: bool) -> Result<(), ContractError> {
        if reply.code() != 200 || reply.body.trim().is_empty() {
            return Ok(());
        }
        let body: UpdateReply = reply.json()?;
        let flag = match body.flag {
            Some(flag) => flag,
            None => match reply.json::<FlagEnvelope>() {
                Ok(envelope) => envelope.into_flag(),
                Err(_) => return Ok(()),
            },
        };
        if flag.enabled != enabled {
            return Err(ContractError::Violation(format!(
                "PUT {} echoed enabled={} after writing {}",
                key, flag.enabled, enabled
            )));
        }
        if let Some(echoed) = &flag.key {
            if echoed != key {
                return Err(ContractError::Violation(format!(
                    "PUT {} echoed key {}",
                    key, echoed
                )));
            }
        }
        Ok(())
    }

    async fn snapshot(&self, key: &str) -> Result<(), ContractError> {
        if self.credential.is_none() {
            return Ok(());
        }
        let already = self
            .baseline
            .get(key)
            .await
            .map_err(|e| ContractError::Violation(e.to_string()))?;
        if already.is_some() {
            return Ok(());
        }
        if let Some(flag) = self.client.flag(key).await? {
            self.baseline
                .set(key, flag.enabled)
                .await
                .map_err(|e| ContractError::Violation(e.to_string()))?;
        }
        Ok(())
    }

    async fn restore(&self) {
        let token = match self.credential.as_deref() {
            Some(token) => token,
            None => return,
        };
        let originals = match self.baseline.all().await {
            Ok(flags) => flags,
            Err(e) => {
                warn!("Baseline store unreadable, nothing restored: {}", e);
                return;
            }
        };
        for flag in originals {
            let key = match flag.key.as_deref() {
                Some(key) => key,
                None => continue,
            };
            match self
                .client
                .put_flag(key, &UpdateRequest::enabled(flag.enabled), Some(token))
                .await
            {
                Ok(reply) if reply.is_success() => {
                    info!("Restored {} to {}", key, flag.enabled);
                    if let Err(e) = self.baseline.remove(key).await {
                        warn!("Dropping baseline for {} failed: {}", key, e);
                    }
                }
                Ok(reply) => warn!("Restoring {} answered {}", key, reply.code()),
                Err(e) => warn!("Restoring {} failed: {}", key, e),
            }
        }
    }

    async fn check_list(&self) -> Result<Outcome, ContractError> {
        let list = self.client.flags().await?;
        if !list.contains(&self.flag_key) {
            return Err(ContractError::Violation(format!(
                "{} missing from flag list ({} flags)",
                self.flag_key,
                list.flags.len()
            )));
        }
        Ok(Outcome::Passed(format!("{} flags listed", list.flags.len())))
    }

    async fn check_read_known(&self) -> Result<Outcome, ContractError> {
        let enabled = self.current(&self.flag_key).await?;
        Ok(Outcome::Passed(format!("{} enabled={}", self.flag_key, enabled)))
    }

    async fn check_read_unknown(&self) -> Result<Outcome, ContractError> {
        let key = unknown_key();
        let reply = self.client.get_flag(&key).await?;
        reply.expect_status(&[404])?;
        Ok(Outcome::Passed(format!("{} -> 404", key)))
    }

    async fn check_unauthorized(&self, token: Option<&str>) -> Result<Outcome, ContractError> {
        let before = self.current(&self.flag_key).await?;
        let reply = self
            .client
            .put_flag(&self.flag_key, &UpdateRequest::enabled(!before), token)
            .await?;

        if !self.policy.accepts(reply.code()) {
            return Err(ContractError::Violation(format!(
                "unauthorized PUT answered {}: {}",
                reply.code(),
                reply.excerpt()
            )));
        }

        let after = self.current(&self.flag_key).await?;
        if after != before {
            return Err(ContractError::Violation(format!(
                "unauthorized PUT changed {} from {} to {}",
                self.flag_key, before, after
            )));
        }
        Ok(Outcome::Passed(format!("rejected with {}", reply.code())))
    }

    async fn check_read_after_write(&self) -> Result<Outcome, ContractError> {
        let token = match self.token() {
            Ok(token) => token,
            Err(skip) => return Ok(skip),
        };

        for enabled in [true, false] {
            let reply = match self.authorized_put(&self.flag_key, enabled, token).await {
                Ok(reply) => reply,
                Err(result) => return result,
            };
            Self::check_echo(&reply, &self.flag_key, enabled)?;

            let read = self.current(&self.flag_key).await?;
            if read != enabled {
                return Err(ContractError::Violation(format!(
                    "wrote enabled={} to {} but read back {}",
                    enabled, self.flag_key, read
                )));
            }
        }
        Ok(Outcome::Passed("true and false both read back".to_string()))
    }

    async fn check_malformed_payloads(&self) -> Result<Outcome, ContractError> {
        let token = match self.token() {
            Ok(token) => token,
            Err(skip) => return Ok(skip),
        };

        let before = self.current(&self.flag_key).await?;
        let cases = [
            json!({}),
            json!({ "enabled": "string" }),
            json!({ "enabled": null }),
            json!({ "enabled": 123 }),
            json!({ "description": "no enabled field" }),
        ];

        for payload in &cases {
            let reply = self.client.put_flag_raw(&self.flag_key, payload, Some(token)).await?;
            match reply.code() {
                400 => {}
                401 | 403 => {
                    return Ok(Outcome::Skipped(format!(
                        "admin credential rejected with {}",
                        reply.code()
                    )))
                }
                code => {
                    return Err(ContractError::Violation(format!(
                        "payload {} answered {}: {}",
                        payload,
                        code,
                        reply.excerpt()
                    )))
                }
            }
        }

        let after = self.current(&self.flag_key).await?;
        if after != before {
            return Err(ContractError::Violation(format!(
                "malformed payloads changed {} from {} to {}",
                self.flag_key, before, after
            )));
        }
        Ok(Outcome::Passed(format!("{} payloads rejected with 400", cases.len())))
    }

    async fn check_idempotent_put(&self) -> Result<Outcome, ContractError> {
        let token = match self.token() {
            Ok(token) => token,
            Err(skip) => return Ok(skip),
        };

        let value = self.current(&self.flag_key).await?;
        for _ in 0..2 {
            if let Err(result) = self.authorized_put(&self.flag_key, value, token).await {
                return result;
            }
        }
        let after = self.current(&self.flag_key).await?;
        if after != value {
            return Err(ContractError::Violation(format!(
                "repeating enabled={} left {} at {}",
                value, self.flag_key, after
            )));
        }
        Ok(Outcome::Passed(format!("enabled={} twice", value)))
    }

    async fn check_put_unknown_key(&self) -> Result<Outcome, ContractError> {
        let token = match self.token() {
            Ok(token) => token,
            Err(skip) => return Ok(skip),
        };

        let key = unknown_key();
        let reply = self
            .client
            .put_flag(&key, &UpdateRequest::enabled(true), Some(token))
            .await?;

        match reply.code() {
            404 => Ok(Outcome::Passed(format!("{} -> 404", key))),
            401 | 403 => Ok(Outcome::Skipped(format!(
                "admin credential rejected with {}",
                reply.code()
            ))),
            200 | 201 | 204 => {
                Self::check_echo(&reply, &key, true)?;
                match self.client.flag(&key).await? {
                    Some(flag) if flag.enabled => Ok(Outcome::Passed(format!("{} created", key))),
                    Some(_) => Err(ContractError::Violation(format!(
                        "{} created but reads enabled=false",
                        key
                    ))),
                    None => Err(ContractError::Violation(format!(
                        "PUT {} answered {} but the flag does not exist",
                        key,
                        reply.code()
                    ))),
                }
            }
            _ => Err(reply.status_error()),
        }
    }

    async fn check_concurrent(&self, plan: StressPlan) -> Result<Outcome, ContractError> {
        let token = match self.token() {
            Ok(token) => token,
            Err(skip) => return Ok(skip),
        };

        if let Err(result) = self.authorized_put(&self.flag_key, false, token).await {
            return result;
        }

        let summary = stress::storm(&self.client, &self.flag_key, token, plan).await;
        if !summary.is_clean() {
            return Err(ContractError::Violation(format!(
                "{}; first faults: {:?} {:?} {:?}",
                summary.describe(),
                summary.server_errors.first(),
                summary.corrupted.first(),
                summary.transport_errors.first()
            )));
        }
        if summary.completed() != plan.requests {
            return Err(ContractError::Violation(format!(
                "{} of {} requests completed",
                summary.completed(),
                plan.requests
            )));
        }

        let final_value = self.current(&self.flag_key).await?;
        Ok(Outcome::Passed(format!(
            "{}; final enabled={}",
            summary.describe(),
            final_value
        )))
    }
}

/// Flag key that no server seeds.
fn unknown_key() -> String {
    format!(
        "CONTRACT_PROBE_{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}
