use std::fmt;

use log::{error, info, warn};

use crate::ContractError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed(String),
    Skipped(String),
    Failed(String),
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    pub fn detail(&self) -> &str {
        match self {
            Outcome::Passed(d) | Outcome::Skipped(d) | Outcome::Failed(d) => d,
        }
    }
}

impl From<Result<Outcome, ContractError>> for Outcome {
    fn from(result: Result<Outcome, ContractError>) -> Self {
        match result {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckRecord {
    pub name: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default)]
pub struct Report {
    checks: Vec<CheckRecord>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, outcome: impl Into<Outcome>) {
        let outcome = outcome.into();
        match &outcome {
            Outcome::Passed(d) => info!("PASS {}: {}", name, d),
            Outcome::Skipped(d) => warn!("SKIP {}: {}", name, d),
            Outcome::Failed(d) => error!("FAIL {}: {}", name, d),
        }
        self.checks.push(CheckRecord {
            name: name.to_string(),
            outcome,
        });
    }

    pub fn merge(&mut self, other: Report) {
        self.checks.extend(other.checks);
    }

    pub fn checks(&self) -> &[CheckRecord] {
        &self.checks
    }

    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.checks
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.outcome)
    }

    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.outcome.is_passed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.checks.iter().filter(|c| c.outcome.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.checks.iter().filter(|c| c.outcome.is_failed()).count()
    }

    /// Skips are not failures.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Percentage of executed (non-skipped) checks that passed.
    pub fn pass_rate(&self) -> f64 {
        let executed = self.passed() + self.failed();
        if executed == 0 {
            return 100.0;
        }
        self.passed() as f64 * 100.0 / executed as f64
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let tag = match check.outcome {
                Outcome::Passed(_) => "PASS",
                Outcome::Skipped(_) => "SKIP",
                Outcome::Failed(_) => "FAIL",
            };
            writeln!(f, "[{}] {}: {}", tag, check.name, check.outcome.detail())?;
        }
        write!(
            f,
            "total: {}, passed: {}, failed: {}, skipped: {}, pass rate: {:.1}%",
            self.checks.len(),
            self.passed(),
            self.failed(),
            self.skipped(),
            self.pass_rate()
        )
    }
}
