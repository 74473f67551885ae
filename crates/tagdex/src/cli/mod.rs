//! CLI command handlers
//!
//! Every command opens one [`Session`] (config, store, indexer) and makes
//! direct calls into the library.

pub mod index;
pub mod output;
pub mod query;

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tagdex::root::resolve_root;
use tagdex::{IndexConfig, Indexer};
use tagdex_db::SqliteStore;
use tracing::info;

/// Options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory tree to index (overrides the config file)
    #[arg(long, global = true, env = "TAGDEX_ROOT")]
    pub root: Option<PathBuf>,

    /// Index database (default: <root>/_index.db)
    #[arg(long, global = true, env = "TAGDEX_DB")]
    pub db: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true, env = "TAGDEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Keep the index in memory for this run only
    #[arg(long, global = true)]
    pub in_memory: bool,
}

impl GlobalArgs {
    /// Config file (if any) with command-line overrides applied.
    pub fn resolve_config(&self) -> Result<IndexConfig> {
        let mut config = match &self.config {
            Some(path) => IndexConfig::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => IndexConfig::default(),
        };
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(db) = &self.db {
            config.database_path = Some(db.clone());
        }
        Ok(config)
    }
}

/// An opened index.
pub struct Session {
    pub indexer: Indexer<SqliteStore>,
    /// The store started out empty, so commands that read it index first
    pub fresh: bool,
}

impl Session {
    pub async fn open(args: &GlobalArgs) -> Result<Self> {
        let config = args.resolve_config()?;
        let root = resolve_root(&config.root)
            .with_context(|| format!("Invalid index root: {}", config.root.display()))?;

        let (store, fresh) = if args.in_memory {
            (SqliteStore::open_in_memory().await?, true)
        } else {
            let db_path = config.database_path_for(&root);
            let fresh = !db_path.exists();
            let store = SqliteStore::open(&db_path)
                .await
                .with_context(|| format!("Failed to open index: {}", db_path.display()))?;
            (store, fresh)
        };

        let indexer = Indexer::from_config(&config, store).await?;
        Ok(Self { indexer, fresh })
    }

    /// Bring a brand-new index up to date before reading it.
    pub async fn ensure_indexed(&self) -> Result<()> {
        if self.fresh {
            info!(root = %self.indexer.root().display(), "Index is empty; indexing first");
            self.indexer.reindex().await?;
        }
        Ok(())
    }
}

/// Each argument may hold several comma-separated tokens.
pub fn split_tokens(args: &[String]) -> Vec<String> {
    args.iter()
        .flat_map(|arg| arg.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
