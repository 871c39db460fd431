//! Import command

use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::workloads::print_status_report;
use super::Outcome;
use crate::client::{read_request, ApiClient, ApiError, ImportResponse, StatusReport};
use crate::output::{color_status, print_error, print_info, print_json, print_success, print_warning, OutputFormat};

pub struct ImportOptions {
    pub file: PathBuf,
    pub wait: bool,
    pub timeout: Duration,
    pub interval: Duration,
}

/// Submit an import request, optionally polling until the workload settles
pub async fn import(client: &ApiClient, options: ImportOptions, format: OutputFormat) -> Result<Outcome> {
    let request = read_request(&options.file)?;
    let response: ImportResponse = client.post("api/v1/imports", &request).await?;

    if !options.wait {
        match format {
            OutputFormat::Json => print_json(&response)?,
            OutputFormat::Table => {
                print_success(&format!(
                    "Import of {}/{} accepted",
                    response.namespace, response.name
                ));
                if let Some(run) = &response.build_run_name {
                    println!("Build run: {}", run.cyan());
                }
            }
        }
        return Ok(Outcome::Success);
    }

    if format == OutputFormat::Table {
        print_info(&format!(
            "Import of {}/{} accepted, waiting up to {}s",
            response.namespace,
            response.name,
            options.timeout.as_secs()
        ));
    }

    let path = format!("api/v1/workloads/{}/{}", response.namespace, response.name);
    let deadline = Instant::now() + options.timeout;
    let mut last_seen: Option<String> = None;

    loop {
        match client.get::<StatusReport>(&path).await {
            Ok(report) => {
                let progress = progress_of(&report);
                if format == OutputFormat::Table && last_seen.as_deref() != Some(progress.as_str()) {
                    println!("  {} {}", "→".dimmed(), color_status(&progress));
                    last_seen = Some(progress);
                }
                if let Some(outcome) = settled(&report) {
                    report_final(&report, outcome, format)?;
                    return Ok(outcome);
                }
            }
            // The workload may not be visible yet right after acceptance
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e),
        }

        if Instant::now() >= deadline {
            if format == OutputFormat::Table {
                print_warning(&format!(
                    "Timed out after {}s; the import continues on the server",
                    options.timeout.as_secs()
                ));
            }
            return Ok(Outcome::Timeout);
        }
        sleep(options.interval).await;
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ApiError>()
        .map(|e| e.status == reqwest::StatusCode::NOT_FOUND)
        .unwrap_or(false)
}

/// Build phase while building, ready status afterwards
fn progress_of(report: &StatusReport) -> String {
    match (&report.build_status, report.ready_status.as_str()) {
        (Some(build), "Unknown") => format!("Build{}", build.phase),
        _ => report.ready_status.clone(),
    }
}

/// Outcome once nothing more will change, None while still in progress
fn settled(report: &StatusReport) -> Option<Outcome> {
    match report.ready_status.as_str() {
        "Ready" | "Completed" => return Some(Outcome::Success),
        "Failed" => return Some(Outcome::Failure),
        _ => {}
    }
    match &report.build_status {
        Some(build) if build.phase == "Failed" => Some(Outcome::Failure),
        _ => None,
    }
}

fn report_final(report: &StatusReport, outcome: Outcome, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }

    match outcome {
        Outcome::Success => print_success(&format!(
            "{}/{} is {}",
            report.namespace, report.name, report.ready_status
        )),
        _ => {
            let reason = report
                .build_status
                .as_ref()
                .filter(|b| b.phase == "Failed")
                .map(|b| {
                    format!(
                        "build {} failed: {}",
                        b.build_run_name,
                        b.failure_message.as_deref().unwrap_or("no details")
                    )
                })
                .unwrap_or_else(|| format!("workload is {}", report.ready_status));
            print_error(&format!("{}/{}: {}", report.namespace, report.name, reason));
        }
    }
    println!();
    print_status_report(report);
    Ok(())
}
