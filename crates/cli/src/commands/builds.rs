//! Source build commands

use anyhow::Result;
use colored::Colorize;

use super::Outcome;
use crate::client::{ApiClient, BuildInfo, BuildJob, FinalizeReport};
use crate::output::{color_status, format_timestamp, print_info, print_json, print_success, print_warning, OutputFormat};

/// Show a Build and its latest run
pub async fn show_build(
    client: &ApiClient,
    namespace: &str,
    name: &str,
    format: OutputFormat,
) -> Result<Outcome> {
    let path = format!("api/v1/builds/{}/{}", namespace, name);
    let info: BuildInfo = client.get(&path).await?;

    if format == OutputFormat::Json {
        print_json(&info)?;
        return Ok(Outcome::Success);
    }

    println!("{}", "Build".bold());
    println!("{}", "=".repeat(50));
    println!("Name:       {}", info.name.cyan());
    println!("Namespace:  {}", info.namespace.cyan());
    println!(
        "Registered: {}",
        if info.registered {
            "yes".green().to_string()
        } else {
            "no".red().to_string()
        }
    );
    if let Some(message) = &info.registration_message {
        println!("            {}", message);
    }
    println!("Strategy:   {}", info.strategy);
    println!("Source:     {} @ {}", info.git_url, info.git_revision);
    println!("Context:    {}", info.context_dir);
    println!("Output:     {}", info.output_image);

    match &info.latest_run {
        Some(run) => {
            println!();
            print_build_job(run);
        }
        None => print_warning("No build runs yet"),
    }

    Ok(Outcome::Success)
}

/// Start a new run of an existing Build
pub async fn trigger_build(
    client: &ApiClient,
    namespace: &str,
    name: &str,
    format: OutputFormat,
) -> Result<Outcome> {
    let path = format!("api/v1/builds/{}/{}/runs", namespace, name);
    let job: BuildJob = client.post_empty(&path).await?;

    match format {
        OutputFormat::Json => print_json(&job)?,
        OutputFormat::Table => {
            print_success(&format!("Started build run {}", job.build_run_name));
            print_info(&format!(
                "Run `importctl build finalize {}/{}` once it succeeds to redeploy",
                namespace, name
            ));
        }
    }

    Ok(Outcome::Success)
}

/// Deploy the image of the latest succeeded run
pub async fn finalize_build(
    client: &ApiClient,
    namespace: &str,
    name: &str,
    format: OutputFormat,
) -> Result<Outcome> {
    let path = format!("api/v1/builds/{}/{}/finalize", namespace, name);
    let report: FinalizeReport = client.post_empty(&path).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if report.deployed {
                print_success(&format!(
                    "Deployed {}/{} from {}",
                    namespace,
                    name,
                    report.image.as_deref().unwrap_or("build output")
                ));
            } else {
                print_warning(&format!(
                    "Build run {} is {}, nothing deployed yet",
                    report.build_run_name,
                    color_status(&report.build_phase)
                ));
            }
        }
    }

    Ok(Outcome::Success)
}

fn print_build_job(run: &BuildJob) {
    println!("Latest run: {} ({})", run.build_run_name, color_status(&run.phase));
    if let Some(start) = &run.start_time {
        println!("Started:    {}", format_timestamp(start));
    }
    if let Some(done) = &run.completion_time {
        println!("Finished:   {}", format_timestamp(done));
    }
    if let Some(image) = &run.output_image {
        match &run.output_digest {
            Some(digest) => println!("Image:      {}@{}", image, digest),
            None => println!("Image:      {}", image),
        }
    }
    if let Some(message) = &run.failure_message {
        println!(
            "Failure:    {} {}",
            run.failure_reason.as_deref().unwrap_or("").red(),
            message
        );
    }
}
