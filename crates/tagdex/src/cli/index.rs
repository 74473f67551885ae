//! Commands that change what is indexed

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tagdex::{AddOutcome, ReindexMode, ReindexSummary};

use super::Session;

pub async fn run_reindex(
    session: &Session,
    complete: bool,
    from_scratch: bool,
    json: bool,
) -> Result<()> {
    let summary = if from_scratch {
        session.indexer.rebuild().await?
    } else if complete {
        session.indexer.reindex_with(ReindexMode::Complete).await?
    } else {
        session.indexer.reindex().await?
    };
    if json {
        return output_json(&summary);
    }
    print_summary(&summary);
    Ok(())
}

pub async fn run_resync(session: &Session, json: bool) -> Result<()> {
    let report = session.indexer.resync().await?;
    if json {
        return output_json(&report);
    }
    if report.is_empty() {
        println!("Index is in sync");
        return Ok(());
    }
    for moved in &report.moved {
        println!("MOV {} -> {}", moved.from, moved.to);
    }
    for deleted in &report.deleted {
        println!("DEL {}", deleted);
    }
    Ok(())
}

pub async fn run_add(session: &Session, path: &Path, tags: &[String]) -> Result<()> {
    let outcome = session
        .indexer
        .add(path, tags)
        .await
        .with_context(|| format!("Failed to add {}", path.display()))?;

    match outcome {
        AddOutcome::Indexed { blob, new_blob } => {
            let kind = if new_blob { "new content" } else { "known content" };
            println!("Indexed {} as {} ({})", path.display(), blob, kind);
        }
        AddOutcome::Unchanged { blob } => {
            println!("Unchanged {} ({})", path.display(), blob);
        }
        AddOutcome::SkippedEmpty => {
            println!("Skipped {}: empty file", path.display());
        }
    }
    Ok(())
}

/// `None` or `-` writes to stdout.
pub async fn run_dump(session: &Session, file: Option<&PathBuf>) -> Result<()> {
    session.ensure_indexed().await?;

    match file.filter(|f| f.as_os_str() != "-") {
        Some(path) => {
            let out = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let rows = session.indexer.export(BufWriter::new(out)).await?;
            eprintln!("Wrote {} rows to {}", rows, path.display());
        }
        None => {
            session.indexer.export(io::stdout().lock()).await?;
        }
    }
    Ok(())
}

fn output_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

fn print_summary(summary: &ReindexSummary) {
    println!(
        "Processed {} file(s): {} new blob(s), {} unchanged, {} empty skipped",
        summary.processed, summary.new_blobs, summary.unchanged, summary.skipped_empty
    );
    for path in &summary.retired {
        println!("DEL {} (now empty)", path);
    }
    for issue in &summary.errors {
        eprintln!("  skipped {}: {}", issue.path, issue.message);
    }
    if summary.cancelled {
        println!("Cancelled; remaining files will be indexed next run");
    }
}
