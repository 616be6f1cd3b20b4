use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use prmine_core::DEFAULT_CONFIG_FILE;

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "prmine")]
#[command(about = "Mine merged pull request history into structured change facts.")]
#[command(version)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl merged pull requests into JSONL shards
    Crawl {
        /// Languages to crawl (python, javascript, typescript, java, golang, cpp).
        /// If omitted, uses the configured list.
        #[arg(value_name = "LANGUAGES")]
        languages: Vec<String>,

        /// Completed repositories wanted per language
        #[arg(long)]
        target: Option<usize>,

        /// Keep at most this many merged PRs per repository
        #[arg(long)]
        max_prs: Option<usize>,

        /// Directory holding the ranked repository listings
        #[arg(long)]
        repos_dir: Option<PathBuf>,

        /// Directory receiving shards and checkpoints
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// File consulted for GITHUB_TOKEN when the variable is not set
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
    },

    /// Load shards into a SQLite database
    Materialize {
        /// Languages to load. If omitted, loads every known language.
        #[arg(value_name = "LANGUAGES")]
        languages: Vec<String>,

        /// SQLite database file
        #[arg(long, default_value = "github_pr_data.db")]
        db: PathBuf,

        /// Shard directory (defaults to the configured output directory)
        #[arg(long)]
        input_dir: Option<PathBuf>,
    },

    /// Show crawl progress per language
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the extractor on a local source file or patch
    Analyze {
        /// File to analyze
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Language id. If omitted, resolved from the file extension.
        #[arg(long)]
        language: Option<String>,

        /// Treat the file as a unified diff patch
        #[arg(long)]
        patch: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match cli.command {
        Commands::Crawl {
            languages,
            target,
            max_prs,
            repos_dir,
            output_dir,
            env_file,
        } => {
            let args = commands::crawl::CrawlArgs {
                languages,
                target,
                max_prs,
                repos_dir,
                output_dir,
                env_file,
            };
            commands::crawl::run(&cli.config, args).await
        }
        Commands::Materialize {
            languages,
            db,
            input_dir,
        } => commands::materialize::run(&cli.config, languages, &db, input_dir).await,
        Commands::Status { json } => commands::status::run(&cli.config, json).await,
        Commands::Analyze {
            path,
            language,
            patch,
            json,
        } => commands::analyze::run(&path, language.as_deref(), patch, json),
    }
}
