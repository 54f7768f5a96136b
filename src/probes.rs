use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::report::{Outcome, Report};
use crate::{Client, ContractError};

pub const DEFAULT_BLACKLIST: &[&str] = &["'", "--", "<script>", " OR ", "1=1"];

/// Login payloads that must never authenticate.
pub const INJECTION_PAYLOADS: &[(&str, &str)] = &[
    ("' OR 1=1 --", "anything"),
    ("admin@example.com' --", "anything"),
    ("admin@example.com", "' OR '1'='1"),
    ("\" OR \"\"=\"", "\" OR \"\"=\""),
    ("admin@example.com'/*", "*/ OR 1=1 --"),
];

/// `false` when `text` contains any of the default blacklisted fragments,
/// compared case-insensitively.
pub fn is_safe_input(text: &str) -> bool {
    is_safe_input_with(text, DEFAULT_BLACKLIST)
}

pub fn is_safe_input_with(text: &str, blacklist: &[&str]) -> bool {
    let text = text.to_lowercase();
    !blacklist
        .iter()
        .any(|word| text.contains(&word.to_lowercase()))
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct EventsBody {
    events: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EventBody {
    event: serde_json::Map<String, serde_json::Value>,
}

/// Liveness, events shape, and unauthenticated-access probes.
pub struct Probes {
    client: Client,
    event_id: String,
}

impl Probes {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            event_id: "1".to_string(),
        }
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = event_id.to_string();
        self
    }

    pub async fn run(&self) -> Report {
        let mut report = Report::new();
        info!("Probing {}", self.client.base_url());

        report.record("health", self.check_health().await);
        report.record("events.list", self.check_events().await);
        report.record("events.detail", self.check_event_detail().await);
        report.record("users.profile_get_unauthenticated", self.check_profile_get().await);
        report.record("users.profile_put_unauthenticated", self.check_profile_put().await);
        report.record("users.login_injection", self.check_login_injection().await);
        report
    }

    pub async fn check_health(&self) -> Result<Outcome, ContractError> {
        let reply = self.client.health().await?;
        reply.expect_status(&[200])?;
        let body: HealthBody = reply.json()?;
        if !body.status.eq_ignore_ascii_case("ok") {
            return Err(ContractError::Violation(format!(
                "health status is {:?}",
                body.status
            )));
        }
        Ok(Outcome::Passed(format!("status {}", body.status)))
    }

    pub async fn check_events(&self) -> Result<Outcome, ContractError> {
        let reply = self.client.list_events().await?;
        reply.expect_status(&[200])?;
        let body: EventsBody = reply.json()?;
        Ok(Outcome::Passed(format!("{} events", body.events.len())))
    }

    pub async fn check_event_detail(&self) -> Result<Outcome, ContractError> {
        let reply = self.client.get_event(&self.event_id).await?;
        match reply.code() {
            200 => {
                let body: EventBody = reply.json()?;
                Ok(Outcome::Passed(format!(
                    "event {} found with {} fields",
                    self.event_id,
                    body.event.len()
                )))
            }
            404 => Ok(Outcome::Passed(format!("event {} -> 404", self.event_id))),
            _ => Err(reply.status_error()),
        }
    }

    pub async fn check_profile_get(&self) -> Result<Outcome, ContractError> {
        let reply = self.client.get_profile(None).await?;
        reply.expect_status(&[401, 403, 404])?;
        Ok(Outcome::Passed(format!("rejected with {}", reply.code())))
    }

    pub async fn check_profile_put(&self) -> Result<Outcome, ContractError> {
        let body = json!({ "name": "contract-probe" });
        let reply = self.client.put_profile(&body, None).await?;
        reply.expect_status(&[401, 403, 404])?;
        Ok(Outcome::Passed(format!("rejected with {}", reply.code())))
    }

    pub async fn check_login_injection(&self) -> Result<Outcome, ContractError> {
        for (email, password) in INJECTION_PAYLOADS {
            let reply = self.client.login(email, password).await?;
            if reply.is_success() {
                return Err(ContractError::Violation(format!(
                    "login with {:?} / {:?} answered {}",
                    email,
                    password,
                    reply.code()
                )));
            }
            if reply.is_server_error() {
                return Err(reply.status_error());
            }
        }
        Ok(Outcome::Passed(format!(
            "{} injection payloads refused",
            INJECTION_PAYLOADS.len()
        )))
    }
}
