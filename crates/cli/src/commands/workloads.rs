//! Workload status, listing and deletion commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use super::Outcome;
use crate::client::{ApiClient, DeleteReport, StatusReport, WorkloadSummary};
use crate::output::{
    color_status, format_timestamp, or_dash, print_json, print_rows, print_success, print_warning,
    OutputFormat,
};

/// Row for workloads table
#[derive(Tabled)]
struct WorkloadRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Type")]
    workload_type: String,
    #[tabled(rename = "Status")]
    ready_status: String,
    #[tabled(rename = "Protocols")]
    protocols: String,
    #[tabled(rename = "Created")]
    created_at: String,
}

/// Row for deleted resources table
#[derive(Tabled)]
struct DeletionRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Show the status of one workload
pub async fn show_status(
    client: &ApiClient,
    namespace: &str,
    name: &str,
    format: OutputFormat,
) -> Result<Outcome> {
    let path = format!("api/v1/workloads/{}/{}", namespace, name);
    let report: StatusReport = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_status_report(&report),
    }

    Ok(if report.ready_status == "Failed" {
        Outcome::Failure
    } else {
        Outcome::Success
    })
}

pub(crate) fn print_status_report(report: &StatusReport) {
    println!("{}", "Workload Status".bold());
    println!("{}", "=".repeat(50));
    println!("Name:      {}", report.name.cyan());
    println!("Namespace: {}", report.namespace.cyan());
    println!("Kind:      {}", or_dash(report.kind.as_deref()));
    println!("Type:      {}", or_dash(report.workload_type.as_deref()));
    println!("Status:    {}", color_status(&report.ready_status));
    if let Some(replicas) = &report.replica_status {
        println!(
            "Replicas:  {}/{} ready, {} available",
            replicas.ready, replicas.desired, replicas.available
        );
    }
    if let Some(endpoint) = &report.service_endpoint {
        println!("Endpoint:  {}", endpoint);
    }
    if let Some(build) = &report.build_status {
        println!();
        println!("Build run: {} ({})", build.build_run_name, color_status(&build.phase));
        if let Some(image) = &build.output_image {
            println!("Image:     {}", image);
        }
        if let Some(message) = &build.failure_message {
            println!(
                "Failure:   {} {}",
                or_dash(build.failure_reason.as_deref()).red(),
                message
            );
        }
    }
    if !report.conditions.is_empty() {
        println!();
        println!("{}", "Conditions".bold());
        for condition in &report.conditions {
            println!(
                "  {:<16} {:<6} {}",
                condition.type_,
                condition.status,
                condition.message.as_deref().unwrap_or("")
            );
        }
    }
}

/// List imported workloads
pub async fn list_workloads(
    client: &ApiClient,
    namespace: Option<String>,
    kind: Option<String>,
    format: OutputFormat,
) -> Result<Outcome> {
    let mut query = Vec::new();
    if let Some(ns) = &namespace {
        query.push(format!("namespace={}", ns));
    }
    if let Some(kind) = &kind {
        query.push(format!("kind={}", kind));
    }
    let path = if query.is_empty() {
        "api/v1/workloads".to_string()
    } else {
        format!("api/v1/workloads?{}", query.join("&"))
    };

    let workloads: Vec<WorkloadSummary> = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&workloads)?,
        OutputFormat::Table => {
            if workloads.is_empty() {
                print_warning("No workloads found");
                return Ok(Outcome::Success);
            }

            let rows: Vec<WorkloadRow> = workloads
                .iter()
                .map(|w| WorkloadRow {
                    namespace: w.namespace.clone(),
                    name: w.name.clone(),
                    kind: or_dash(w.kind.as_deref()),
                    workload_type: w.workload_type.clone(),
                    ready_status: color_status(&w.ready_status),
                    protocols: if w.protocols.is_empty() {
                        "-".to_string()
                    } else {
                        w.protocols.join(",")
                    },
                    created_at: w
                        .created_at
                        .as_deref()
                        .map(format_timestamp)
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();

            print_rows(rows);
            println!("\nTotal: {} workloads", workloads.len());
        }
    }

    Ok(Outcome::Success)
}

/// Delete a workload and everything created for it
pub async fn delete_workload(
    client: &ApiClient,
    namespace: &str,
    name: &str,
    kind: &str,
    format: OutputFormat,
) -> Result<Outcome> {
    let path = format!("api/v1/workloads/{}/{}?kind={}", namespace, name, kind);
    let report: DeleteReport = client.delete(&path).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if report.status == "not_found" {
                print_warning(&format!("{}/{} not found, nothing to delete", namespace, name));
            } else {
                print_success(&format!("Deleted {} {}/{}", kind, namespace, name));
            }
            let rows: Vec<DeletionRow> = report
                .resources
                .iter()
                .map(|r| DeletionRow {
                    kind: r.kind.clone(),
                    name: r.name.clone(),
                    outcome: color_status(&r.outcome),
                })
                .collect();
            if !rows.is_empty() {
                print_rows(rows);
            }
        }
    }

    Ok(Outcome::Success)
}
