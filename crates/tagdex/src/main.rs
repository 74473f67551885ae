//! tagdex command-line front end
//!
//! Thin wrapper over the library: parse arguments, set up logging, open the
//! index, run one command.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tagdex_db::QueryOp;
use tagdex_logging::{init_logging, LogConfig};

mod cli;

use cli::{GlobalArgs, Session};

#[derive(Parser, Debug)]
#[command(name = "tagdex", version, about = "Content-addressed file index with tags")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Also write logs under ~/.tagdex/logs
    #[arg(long, global = true)]
    log_file: bool,

    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index new and changed files under the root
    Reindex {
        /// Re-hash every file, ignoring cached size/mtime
        #[arg(long)]
        complete: bool,

        /// Clear the index and rebuild it
        #[arg(long, conflicts_with = "complete")]
        from_scratch: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reindex, then detect moved and deleted files
    Resync {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Index one file now and attach tags to it
    Add {
        path: PathBuf,
        tags: Vec<String>,
    },

    /// List files whose tags contain the given tokens
    Find {
        /// Every token must match (default)
        #[arg(long, conflicts_with = "any")]
        all: bool,

        /// Any token may match
        #[arg(long)]
        any: bool,

        /// Tokens, space or comma separated
        #[arg(required = true)]
        tokens: Vec<String>,
    },

    /// Attach tags to an indexed file's content
    Tag {
        path: PathBuf,
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Detach tags from an indexed file's content
    Untag {
        path: PathBuf,
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Show digests, tags and paths for an indexed file
    Show { path: PathBuf },

    /// Re-hash an indexed file and compare with the index
    Verify { path: PathBuf },

    /// Write the index as TSV to FILE, or stdout
    Dump { file: Option<PathBuf> },
}

async fn run(cli: Cli) -> Result<()> {
    let session = Session::open(&cli.global).await?;

    match cli.command {
        Commands::Reindex {
            complete,
            from_scratch,
            json,
        } => cli::index::run_reindex(&session, complete, from_scratch, json).await,
        Commands::Resync { json } => cli::index::run_resync(&session, json).await,
        Commands::Add { path, tags } => cli::index::run_add(&session, &path, &tags).await,
        Commands::Find { all: _, any, tokens } => {
            let op = if any { QueryOp::Or } else { QueryOp::And };
            cli::query::run_find(&session, op, &tokens).await
        }
        Commands::Tag { path, tags } => cli::query::run_tag(&session, &path, &tags).await,
        Commands::Untag { path, tags } => cli::query::run_untag(&session, &path, &tags).await,
        Commands::Show { path } => cli::query::run_show(&session, &path).await,
        Commands::Verify { path } => cli::query::run_verify(&session, &path).await,
        Commands::Dump { file } => cli::index::run_dump(&session, file.as_ref()).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match init_logging(LogConfig {
        app_name: "tagdex",
        verbose: cli.verbose,
        log_to_file: cli.log_file,
    }) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: failed to initialize logging: {:#}", err);
            None
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
