//! sessionclean: terminal review client for the SessionClean daemon.
//!
//! ## Subcommands
//!
//! - `status`: current session, phase and tracked count
//! - `candidates`: the review currently offered, if any
//! - `review-now`: start a manual review
//! - `decide`: submit keep/delete decisions for the offered review
//! - `dismiss`: close a manual review without deciding
//! - `rescan`: re-scan available roots for missed files

mod daemon_client;
mod render;

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use daemon_client::DaemonClient;
use sessionclean_core::{ApplyReport, ReviewOffer, TrayStatus};
use sessionclean_daemon_protocol::{DecisionValue, Method, SubmitDecisionsParams};

#[derive(Parser)]
#[command(name = "sessionclean")]
#[command(about = "Review files created during this session")]
#[command(version)]
struct Cli {
    /// Print raw JSON payloads instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current session
    Status,

    /// List the candidates of the review in progress
    Candidates,

    /// Start a review now (joins one already in progress)
    ReviewNow,

    /// Submit decisions for the review in progress
    Decide {
        /// Files to keep
        #[arg(long, value_name = "PATH")]
        keep: Vec<PathBuf>,

        /// Files to move to the trash
        #[arg(long, value_name = "PATH")]
        delete: Vec<PathBuf>,

        /// Keep every candidate not listed explicitly
        #[arg(long, conflicts_with = "all_delete")]
        all_keep: bool,

        /// Trash every candidate not listed explicitly
        #[arg(long)]
        all_delete: bool,
    },

    /// Close a manual review without deciding
    Dismiss,

    /// Re-scan monitored roots
    Rescan,

    /// Check that the daemon is running
    Health,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("sessionclean: {}", err);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), String> {
    let client = DaemonClient::from_env()?;
    let json = cli.json;

    match cli.command {
        Commands::Status => {
            let status: TrayStatus = client.call(Method::GetStatus, None)?;
            print_payload(json, &status, render::status)
        }
        Commands::Candidates => {
            let offer: Option<ReviewOffer> = client.call(Method::GetReview, None)?;
            match offer {
                Some(offer) => print_payload(json, &offer, render::offer),
                None if json => print_payload(json, &Value::Null, |_| String::new()),
                None => {
                    println!("No review in progress. Run `sessionclean review-now` to start one.");
                    Ok(())
                }
            }
        }
        Commands::ReviewNow => {
            let offer: ReviewOffer = client.call(Method::ReviewNow, None)?;
            print_payload(json, &offer, render::offer)
        }
        Commands::Decide {
            keep,
            delete,
            all_keep,
            all_delete,
        } => {
            let all = match (all_keep, all_delete) {
                (true, _) => Some(DecisionValue::Keep),
                (_, true) => Some(DecisionValue::Delete),
                _ => None,
            };
            if all.is_none() && keep.is_empty() && delete.is_empty() {
                return Err(
                    "nothing to decide: pass --keep/--delete paths or --all-keep/--all-delete"
                        .to_string(),
                );
            }

            let offer: Option<ReviewOffer> = client.call(Method::GetReview, None)?;
            let offer = offer.ok_or_else(|| "No review in progress".to_string())?;
            let params = decision_params(&offer, &keep, &delete, all)?;
            tracing::debug!(
                session_id = %params.session_id,
                round = params.round,
                decisions = params.decisions.len(),
                "Submitting decisions"
            );
            let payload = serde_json::to_value(&params)
                .map_err(|err| format!("Failed to serialize decisions: {}", err))?;
            let report: ApplyReport = client.call(Method::SubmitDecisions, Some(payload))?;
            print_payload(json, &report, render::report)
        }
        Commands::Dismiss => {
            let result: Value = client.call(Method::DismissReview, None)?;
            print_payload(json, &result, |_| "Review dismissed; monitoring continues.\n".to_string())
        }
        Commands::Rescan => {
            let result: Value = client.call(Method::Rescan, None)?;
            print_payload(json, &result, |_| "Rescan queued.\n".to_string())
        }
        Commands::Health => {
            let health: Value = client.call(Method::GetHealth, None)?;
            print_payload(json, &health, |health| {
                format!(
                    "Daemon {} (pid {}, version {})\n",
                    health["status"].as_str().unwrap_or("unknown"),
                    health["pid"],
                    health["version"].as_str().unwrap_or("?")
                )
            })
        }
    }
}

/// Builds the submit payload. Paths must be candidates of `offer`, and a
/// path may not be both kept and deleted.
fn decision_params(
    offer: &ReviewOffer,
    keep: &[PathBuf],
    delete: &[PathBuf],
    all: Option<DecisionValue>,
) -> Result<SubmitDecisionsParams, String> {
    let mut decisions = BTreeMap::new();
    for (paths, value) in [(keep, DecisionValue::Keep), (delete, DecisionValue::Delete)] {
        for path in paths {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                std::env::current_dir()
                    .map_err(|err| format!("Cannot resolve {}: {}", path.display(), err))?
                    .join(path)
            };
            if !offer.candidates.iter().any(|candidate| candidate.path == path) {
                return Err(format!("{} is not a candidate of this review", path.display()));
            }
            let key = path.to_string_lossy().to_string();
            if decisions.insert(key, value).is_some_and(|previous| previous != value) {
                return Err(format!("{} is both kept and deleted", path.display()));
            }
        }
    }

    Ok(SubmitDecisionsParams {
        session_id: offer.session_id.clone(),
        round: offer.round,
        decisions,
        all,
    })
}

fn print_payload<T: serde::Serialize>(
    json: bool,
    payload: &T,
    text: impl FnOnce(&T) -> String,
) -> Result<(), String> {
    if json {
        let rendered = serde_json::to_string_pretty(payload)
            .map_err(|err| format!("Failed to render JSON: {}", err))?;
        println!("{}", rendered);
    } else {
        print!("{}", text(payload));
    }
    Ok(())
}
