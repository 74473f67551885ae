//! Commands that read the index or edit tags

use anyhow::{bail, Result};
use std::path::Path;
use tagdex::VerifyOutcome;
use tagdex_db::{BlobId, IndexStore, QueryOp};

use super::output::{blob_lines, describe_blob};
use super::{split_tokens, Session};

pub async fn run_find(session: &Session, op: QueryOp, tokens: &[String]) -> Result<()> {
    session.ensure_indexed().await?;

    let tokens = split_tokens(tokens);
    let blobs = session.indexer.find_all(op, &tokens).await?;
    let store = session.indexer.store();
    for blob in blobs {
        if let Some(details) = store.blob_details(blob.id).await? {
            for line in blob_lines(&details) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

pub async fn run_tag(session: &Session, path: &Path, tags: &[String]) -> Result<()> {
    let blob = indexed_blob(session, path).await?;
    let added = session.indexer.add_tags(blob, &split_tokens(tags)).await?;
    println!("Added {} tag(s) to {}", added, path.display());
    Ok(())
}

pub async fn run_untag(session: &Session, path: &Path, tags: &[String]) -> Result<()> {
    let blob = indexed_blob(session, path).await?;
    let removed = session.indexer.remove_tags(blob, &split_tokens(tags)).await?;
    println!("Removed {} tag(s) from {}", removed, path.display());
    Ok(())
}

pub async fn run_show(session: &Session, path: &Path) -> Result<()> {
    let blob = indexed_blob(session, path).await?;
    match session.indexer.store().blob_details(blob).await? {
        Some(details) => print!("{}", describe_blob(&details)),
        None => bail!("{} is not indexed", path.display()),
    }
    Ok(())
}

pub async fn run_verify(session: &Session, path: &Path) -> Result<()> {
    session.ensure_indexed().await?;

    match session.indexer.verify(path).await? {
        VerifyOutcome::Match => println!("OK       {}", path.display()),
        VerifyOutcome::Mismatch { expected, actual } => {
            println!("CHANGED  {}", path.display());
            println!("  expected {}", expected);
            println!("  actual   {}", actual);
        }
        VerifyOutcome::Missing => println!("MISSING  {}", path.display()),
    }
    Ok(())
}

async fn indexed_blob(session: &Session, path: &Path) -> Result<BlobId> {
    session.ensure_indexed().await?;

    match session.indexer.blob_for_path(path).await? {
        Some(blob) => Ok(blob),
        None => bail!(
            "{} is not indexed (run `tagdex add {}` first)",
            path.display(),
            path.display()
        ),
    }
}
