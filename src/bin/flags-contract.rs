use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::{error, info};

use flags_contract::credential::CredentialProvider;
use flags_contract::stress::StressPlan;
use flags_contract::{
    AdminCredentialResolver, Client, Config, Probes, Report, UnauthorizedPolicy, Verifier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Suite {
    All,
    Flags,
    Probes,
}

/// Verify a running server against the feature-flag API contract
#[derive(Parser)]
#[command(name = "flags-contract", version, about)]
struct Cli {
    /// Server origin (overrides BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// API path prefix (overrides API_PREFIX)
    #[arg(long)]
    api_prefix: Option<String>,

    /// Flag exercised by the suite (overrides FLAG_KEY)
    #[arg(long = "flag")]
    flag_key: Option<String>,

    /// Per-request timeout in seconds (overrides REQUEST_TIMEOUT_SECS)
    #[arg(long)]
    timeout: Option<u64>,

    /// Concurrent workers in the stress scenario
    #[arg(long)]
    workers: Option<usize>,

    /// Requests submitted in the stress scenario
    #[arg(long)]
    requests: Option<usize>,

    /// Which checks to run
    #[arg(long, value_enum, default_value_t = Suite::All)]
    suite: Suite,

    /// Leave out the concurrent stress scenario
    #[arg(long)]
    no_stress: bool,

    /// Also accept 404 for unauthorized flag updates
    #[arg(long)]
    lenient_unauthorized: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(prefix) = &self.api_prefix {
            config.api_prefix = prefix.clone();
        }
        if let Some(key) = &self.flag_key {
            config.flag_key = key.clone();
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(workers) = self.workers {
            config.stress_workers = workers;
        }
        if let Some(requests) = self.requests {
            config.stress_requests = requests;
        }
    }
}

async fn run(cli: Cli) -> Result<Report, Box<dyn std::error::Error>> {
    let mut config = Config::from_env()?;
    cli.apply(&mut config);
    config.validate()?;

    let client = Client::builder().with_config(&config).build()?;
    info!("{}", client.debug_info());

    let mut report = Report::new();

    if matches!(cli.suite, Suite::All | Suite::Probes) {
        report.merge(Probes::new(client.clone()).run().await);
    }

    if matches!(cli.suite, Suite::All | Suite::Flags) {
        let credential = AdminCredentialResolver::from_config(&config).credential().await;
        let policy = if cli.lenient_unauthorized {
            UnauthorizedPolicy::Lenient
        } else {
            UnauthorizedPolicy::Strict
        };
        let stress = if cli.no_stress {
            None
        } else {
            Some(StressPlan {
                workers: config.stress_workers,
                requests: config.stress_requests,
            })
        };
        let verifier = Verifier::from_config(client, credential, &config)
            .with_policy(policy)
            .with_stress(stress);
        report.merge(verifier.run().await);
    }

    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(report) => {
            println!("{}", report);
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
