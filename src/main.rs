//! # Moodle Digest
//!
//! Logs into a Moodle portal, walks every course linked from the dashboard
//! and prints a digest of each course's most recent section, with the
//! deadline status of every assignment in it.
//!
//! ## Usage
//!
//! ```sh
//! moodle_digest --login-url https://elearning.example.ac.id/login/index.php \
//!     --username alice --password "$PASS"
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Login**: GET the login form, POST credentials, freeze the session
//! 2. **Discovery**: Read course links from the authenticated dashboard
//! 3. **Fetching**: Course pages and assignment pages, at most 50 requests in flight
//! 4. **Aggregation**: One row per course from its most recent section
//! 5. **Logout**: Follow the dashboard's logout link once fetching is done
//! 6. **Output**: Markdown table on stdout, optional JSON file

use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod error;
mod fetch;
mod harvest;
mod models;
mod normalize;
mod outputs;
mod report;
mod scrapers;
mod session;
mod utils;

use cli::{Cli, Settings};
use error::ScrapeError;
use harvest::Harvester;
use models::Report;
use outputs::{json, markdown};
use session::{LogoutOutcome, SessionClient};
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> ExitCode {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let start_time = std::time::Instant::now();
    info!("moodle_digest starting up");

    let settings = Cli::parse().into_settings();
    debug!(?settings.credentials, resolve_deadlines = settings.resolve_deadlines, "Parsed CLI arguments");

    let outcome = tokio::select! {
        result = run(settings.clone()) => result,
        _ = tokio::signal::ctrl_c() => Err(ScrapeError::Interrupted),
    };

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Run aborted");
            let lines = e.user_messages();
            if lines.len() > 1 {
                eprintln!();
                for line in &lines {
                    eprintln!("[!] {line}");
                }
            } else {
                eprintln!("\n\n[!] {}", lines.join(""));
            }
            eprintln!("\n[!] Program exited.\n");
            return ExitCode::FAILURE;
        }
    };

    let exit = emit(&report, settings.json_output_dir.as_deref()).await;

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        rows = report.rows.len(),
        dropped = report.courses_dropped,
        "Execution complete"
    );
    exit
}

/// Print the Markdown report, then write the JSON copy if one was asked for.
/// The Markdown is already out when the JSON write fails, but the run still
/// counts as failed.
async fn emit(report: &Report, json_output_dir: Option<&str>) -> ExitCode {
    println!("{}", markdown::report_to_markdown(report));

    if let Some(dir) = json_output_dir {
        if let Err(e) = json::write_report(report, dir).await {
            error!(error = %e, "Failed to write JSON report");
            eprintln!("\n[!] {e}\n");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

/// Login, harvest, logout. Nothing is printed here; a fatal error leaves no
/// partial report behind.
#[instrument(level = "info", skip_all)]
async fn run(settings: Settings) -> Result<Report, ScrapeError> {
    // Early check: fail on a bad output path before touching the portal
    if let Some(dir) = &settings.json_output_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(path = %dir, error = %e, "JSON output directory is not writable");
            return Err(e.into());
        }
    }

    let mut session = SessionClient::new(settings.http.clone())?;
    let landing_url = session.login(settings.credentials).await?;

    let harvester = Harvester::new(session.snapshot()?, settings.resolve_deadlines);
    let discovery = harvester.discover(&landing_url).await?;
    let harvest = harvester
        .fetch_all_courses(discovery.course_urls.clone())
        .await?;
    drop(harvester);

    let report = report::build_report(&harvest, discovery.today.clone(), settings.resolve_deadlines);

    match session.logout(&discovery.landing).await {
        Ok(LogoutOutcome::Confirmed) => {}
        Ok(LogoutOutcome::Inconclusive(reason)) => {
            warn!(%reason, "Logout could not be confirmed");
        }
        Err(e @ ScrapeError::Connectivity(_)) => return Err(e),
        Err(e) => warn!(error = %e, "Logout failed"),
    }
    debug!(state = ?session.state(), "Session closed");

    Ok(report)
}
