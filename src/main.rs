use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use contracts_nlq::rules::Feedback;
use contracts_nlq::AppContext;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "contracts-nlq")]
#[command(about = "Compile contract questions into parameterized SQL")]
#[command(version)]
struct Args {
    /// Settings JSON (or set NLQ_SETTINGS); built-in contracts profile when absent
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// SQLite rules database (or set NLQ_RULES_DB); learning is off when absent
    #[arg(long, global = true)]
    rules_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a question into SQL and binds
    Compile {
        /// Question text, or a structured comment with --comment
        text: String,

        /// Treat the text as a structured `key: value;` comment
        #[arg(long)]
        comment: bool,

        /// Reference date for relative windows (default: today)
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Rate a compiled answer, optionally with a correction comment
    Rate {
        #[arg(long)]
        inquiry_id: i64,

        /// 1 (wrong) to 5 (right)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        rating: u8,

        /// The question that was answered
        #[arg(long)]
        question: String,

        /// Correction in structured comment form
        #[arg(long)]
        comment: Option<String>,

        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

fn env_path(flag: Option<PathBuf>, var: &str) -> Option<PathBuf> {
    flag.or_else(|| std::env::var(var).ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from))
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = env_path(args.settings, "NLQ_SETTINGS");
    let rules_db = env_path(args.rules_db, "NLQ_RULES_DB");
    let ctx = AppContext::from_paths(settings.as_deref(), rules_db.as_deref())
        .context("failed to initialize the compiler context")?;

    let json = match args.command {
        Commands::Compile { text, comment, today } => {
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            info!("Compiling question (structured: {})", comment);
            let output = ctx.compile(&text, comment, today)?;
            serde_json::to_string_pretty(&output)?
        }
        Commands::Rate {
            inquiry_id,
            rating,
            question,
            comment,
            today,
        } => {
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            let feedback = Feedback {
                inquiry_id,
                rating,
                question,
                comment,
            };
            let outcome = ctx.rate(&feedback, today)?;
            serde_json::to_string_pretty(&outcome)?
        }
    };
    println!("{}", json);
    Ok(())
}
