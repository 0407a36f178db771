//! Review admin tool - inspects the review backlog of a local notes database
//!
//! Usage:
//!   cargo run --bin review-admin -- [--db-path <path>] <command>
//!
//! Commands:
//!   pending               Outstanding review periods per review type
//!   next [--type <t>]     Oldest period that still needs a review
//!   sessions [--type <t>] Stored review sessions with their counters
//!   export [--out <file>] Write a JSON snapshot of all notes (stdout by default)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use curation_layer_review::{EngineConfig, ReviewEngine};
use curation_layer_schemas::ReviewType;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "review-admin")]
#[command(about = "Inspect and export the Curation Layer review state")]
struct Args {
    /// Path to SQLite database file (overrides REVIEW_DB_PATH)
    #[arg(long, short, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count periods with undecided notes
    Pending,
    /// Show the next period to review
    Next {
        /// weekly, monthly or yearly; any type when omitted
        #[arg(long = "type", value_parser = parse_review_type)]
        review_type: Option<ReviewType>,
    },
    /// List stored review sessions
    Sessions {
        #[arg(long = "type", value_parser = parse_review_type)]
        review_type: Option<ReviewType>,
    },
    /// Export every note as JSON
    Export {
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn parse_review_type(raw: &str) -> std::result::Result<ReviewType, String> {
    ReviewType::parse(raw).ok_or_else(|| format!("unknown review type '{}'", raw))
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = EngineConfig::from_env().context("Failed to load configuration")?;
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    info!("Database: {}", config.db_path.display());
    let engine = ReviewEngine::open(config).context("Failed to open review database")?;

    match args.command {
        Command::Pending => {
            let counts = engine.pending_counts()?;
            println!("weekly   {}", counts.weekly);
            println!("monthly  {}", counts.monthly);
            println!("yearly   {}", counts.yearly);
            println!("total    {}", counts.total());
        }
        Command::Next { review_type } => {
            let target = match review_type {
                Some(review_type) => engine.next_actionable_target(review_type)?,
                None => engine.next_actionable_any()?,
            };

            match target {
                Some(target) => println!(
                    "{} {}: {}/{} decided ({})",
                    target.review_type,
                    target.period_key,
                    target.decided,
                    target.eligible,
                    target.status.as_str()
                ),
                None => println!("Nothing to review"),
            }
        }
        Command::Sessions { review_type } => {
            let sessions = engine.list_sessions(review_type)?;
            if sessions.is_empty() {
                println!("No review sessions");
            }
            for session in sessions {
                println!(
                    "{:<8} {:<9} {:<12} {:>3}/{:<3} kept {:<3} archived {:<3} {}",
                    session.review_type.as_str(),
                    session.period_key,
                    session.status.as_str(),
                    session.notes_reviewed,
                    session.total_notes,
                    session.notes_kept,
                    session.notes_archived,
                    session.id
                );
            }
        }
        Command::Export { out } => match out {
            Some(path) => {
                let file = File::create(&path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                let count = engine.export_json(BufWriter::new(file))?;
                info!("Exported {} notes to {}", count, path.display());
            }
            None => {
                let count = engine.export_json(std::io::stdout().lock())?;
                info!("Exported {} notes", count);
            }
        },
    }

    Ok(())
}
