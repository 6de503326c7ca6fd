#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use reqwest::{StatusCode, Url};
use tracing::debug;

use alpaca_core::Status;

/// Exit code of `claim` when no sample is ready, so worker scripts can tell
/// "nothing to do" from a failure.
const EXIT_NOTHING_READY: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "alpaca-ctl", about = "Claim, report and administer an alpaca coordinator")]
struct Args {
    /// Coordinator address, e.g. http://127.0.0.1:10080
    #[arg(long, env = "ALPACA_COORD_URL", default_value = "http://127.0.0.1:10080")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Claim the next ready sample for a step and print its identifier.
    Claim {
        step: String,
        /// Metadata fields to print after the identifier, tab-separated.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },
    /// Set the status of one (sample, step) pair.
    Report {
        step: String,
        sample: String,
        /// complete | error | abandoned | distributed | unprocessed
        status: String,
    },
    /// Re-read the pipeline definition and append new steps.
    ReloadPipeline,
    /// Re-read the sample list and append new samples.
    ReloadSamples,
    /// Print the status table, optionally for one step.
    Status { step: Option<String> },
    /// Ask the coordinator to write a snapshot.
    Snapshot,
}

impl Command {
    fn path(&self) -> Vec<&str> {
        match self {
            Command::Claim { step, fields } if !fields.is_empty() => {
                vec!["get_sample_info", step.as_str()]
            }
            Command::Claim { step, .. } => vec!["get_sample", step.as_str()],
            Command::Report {
                step,
                sample,
                status,
            } => vec!["report", status.as_str(), step.as_str(), sample.as_str()],
            Command::ReloadPipeline => vec!["update_tasks"],
            Command::ReloadSamples => vec!["update_samples"],
            Command::Status { step: Some(step) } => vec!["get_task_status", step.as_str()],
            Command::Status { step: None } => vec!["get_task_status", ""],
            Command::Snapshot => vec!["snapshot"],
        }
    }
}

fn endpoint(base: &str, command: &Command) -> Result<Url> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("coordinator url cannot be a base: {base}"))?
        .pop_if_empty()
        .extend(command.path());
    if let Command::Claim { fields, .. } = command {
        if !fields.is_empty() {
            url.query_pairs_mut().append_pair("fields", &fields.join(","));
        }
    }
    Ok(url)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    alpaca_observe::logging::init_cli_tracing();

    let args = Args::parse();
    if let Command::Report { status, .. } = &args.command {
        status.parse::<Status>()?;
    }

    let url = endpoint(&args.url, &args.command)?;
    debug!(url = %url, "request");
    let resp = reqwest::Client::new().get(url).send().await?;
    let code = resp.status();
    let body = resp.text().await?;
    debug!(status = code.as_u16(), "response");

    if matches!(args.command, Command::Claim { .. }) && code == StatusCode::NOT_FOUND {
        return Ok(ExitCode::from(EXIT_NOTHING_READY));
    }
    if !code.is_success() {
        anyhow::bail!("coordinator returned {code}: {body}");
    }

    println!("{body}");
    Ok(ExitCode::SUCCESS)
}
