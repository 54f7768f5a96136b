use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use log::{debug, info};

use crate::config::{DEFAULT_STRESS_REQUESTS, DEFAULT_STRESS_WORKERS};
use crate::flag::UpdateRequest;
use crate::Client;

#[derive(Debug, Clone, Copy)]
pub struct StressPlan {
    pub workers: usize,
    pub requests: usize,
}

impl Default for StressPlan {
    fn default() -> Self {
        Self {
            workers: DEFAULT_STRESS_WORKERS,
            requests: DEFAULT_STRESS_REQUESTS,
        }
    }
}

impl StressPlan {
    /// Value submitted by request `i`: false, true, false, ...
    pub fn value_for(i: usize) -> bool {
        i % 2 == 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct StormSummary {
    pub statuses: BTreeMap<u16, usize>,
    pub server_errors: Vec<(u16, String)>,
    pub corrupted: Vec<(u16, String)>,
    pub transport_errors: Vec<String>,
}

impl StormSummary {
    pub fn completed(&self) -> usize {
        self.statuses.values().sum()
    }

    pub fn is_clean(&self) -> bool {
        self.server_errors.is_empty() && self.corrupted.is_empty() && self.transport_errors.is_empty()
    }

    pub fn describe(&self) -> String {
        let statuses: Vec<String> = self
            .statuses
            .iter()
            .map(|(code, n)| format!("{}x{}", n, code))
            .collect();
        format!(
            "statuses [{}], server errors {}, corrupted bodies {}, transport errors {}",
            statuses.join(", "),
            self.server_errors.len(),
            self.corrupted.len(),
            self.transport_errors.len()
        )
    }
}

/// Fires `plan.requests` PUTs at one key, at most `plan.workers` in flight.
pub async fn storm(client: &Client, key: &str, token: &str, plan: StressPlan) -> StormSummary {
    info!(
        "Stress: {} PUTs on {} with {} workers",
        plan.requests, key, plan.workers
    );

    let replies: Vec<_> = stream::iter(0..plan.requests)
        .map(|i| async move {
            let update = UpdateRequest::enabled(StressPlan::value_for(i));
            (i, client.put_flag(key, &update, Some(token)).await)
        })
        .buffer_unordered(plan.workers.max(1))
        .collect()
        .await;

    let mut summary = StormSummary::default();
    for (i, reply) in replies {
        match reply {
            Ok(reply) => {
                debug!("Stress request {} -> {}", i, reply.status);
                *summary.statuses.entry(reply.code()).or_insert(0) += 1;
                if reply.is_server_error() {
                    summary.server_errors.push((reply.code(), reply.excerpt()));
                } else if reply.is_success()
                    && !reply.body.trim().is_empty()
                    && serde_json::from_str::<serde_json::Value>(&reply.body).is_err()
                {
                    summary.corrupted.push((reply.code(), reply.excerpt()));
                }
            }
            Err(e) => summary.transport_errors.push(format!("request {}: {}", i, e)),
        }
    }
    summary
}
