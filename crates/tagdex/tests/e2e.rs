//! End-to-end tests for the indexer
//!
//! Real directory trees in temp dirs, real SQLite (in memory unless a test
//! needs the file on disk).

use filetime::{set_file_mtime, FileTime};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tagdex::hasher::{Blake3Hasher, HashOutput};
use tagdex::{
    AddOutcome, ContentHasher, HasherRegistry, IndexConfig, IndexError, Indexer, IndexerOptions,
    ReindexMode, VerifyOutcome,
};
use tagdex_db::{BlobId, IndexStore, QueryOp, SqliteStore};
use tempfile::TempDir;

/// Create a test environment with a temp root
struct TestEnv {
    _temp: TempDir,
    pub root: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let root = temp.path().join("root");
        fs::create_dir_all(&root).expect("Failed to create root");
        let root = root.canonicalize().expect("Failed to canonicalize root");

        Self { _temp: temp, root }
    }

    fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    fn outside_db(&self) -> PathBuf {
        self._temp.path().join("index.db")
    }

    async fn indexer(&self) -> Indexer<SqliteStore> {
        let store = SqliteStore::open_in_memory().await.unwrap();
        self.indexer_with(store, IndexerOptions::default()).await
    }

    async fn indexer_with(&self, store: SqliteStore, options: IndexerOptions) -> Indexer<SqliteStore> {
        Indexer::new(&self.root, store, options).await.unwrap()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn tag_set(indexer: &Indexer<SqliteStore>, blob: BlobId) -> BTreeSet<String> {
    indexer.tags().tags_of(blob).await.unwrap().into_iter().collect()
}

async fn blob_of(indexer: &Indexer<SqliteStore>, path: &str) -> BlobId {
    indexer
        .store()
        .find_path(path)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("{path} not indexed"))
        .blob_id
}

async fn found_paths(indexer: &Indexer<SqliteStore>, op: QueryOp, tokens: &[&str]) -> Vec<String> {
    let mut paths = Vec::new();
    for blob in indexer.find_all(op, &strings(tokens)).await.unwrap() {
        let details = indexer.store().blob_details(blob.id).await.unwrap().unwrap();
        paths.extend(details.paths.into_iter().map(|p| p.path));
    }
    paths.sort();
    paths
}

// ============================================================================
// Reindex
// ============================================================================

#[tokio::test]
async fn test_reindex_twice_second_is_noop() {
    let env = TestEnv::new();
    env.write_file("a.txt", "alpha");
    env.write_file("docs/b.md", "bravo");

    let indexer = env.indexer().await;
    let first = indexer.reindex().await.unwrap();
    assert_eq!(first.processed, 2);
    assert_eq!(first.new_blobs, 2);

    let second = indexer.reindex().await.unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.unchanged, 2);
}

#[tokio::test]
async fn test_changed_mtime_triggers_rehash() {
    let env = TestEnv::new();
    let path = env.write_file("a.txt", "alpha");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();

    set_file_mtime(&path, FileTime::from_unix_time(1_000_000, 0)).unwrap();
    let summary = indexer.reindex().await.unwrap();
    assert_eq!(summary.processed, 1);
    // Same content, so no new blob
    assert_eq!(summary.new_blobs, 0);

    let record = indexer.store().find_path("a.txt").await.unwrap().unwrap();
    assert_eq!(record.mtime, 1_000_000_000);
}

#[tokio::test]
async fn test_complete_reindex_rehashes_everything() {
    let env = TestEnv::new();
    env.write_file("a.txt", "alpha");
    env.write_file("b.txt", "bravo");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();

    let summary = indexer.reindex_with(ReindexMode::Complete).await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.new_blobs, 0);
    assert_eq!(indexer.store().counts().await.unwrap().blobs, 2);
}

#[tokio::test]
async fn test_zero_byte_files_never_indexed() {
    let env = TestEnv::new();
    env.write_file("empty.txt", "");
    env.write_file("sub/also-empty", "");
    env.write_file("real.txt", "content");

    let indexer = env.indexer().await;
    let summary = indexer.reindex().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped_empty, 2);

    let counts = indexer.store().counts().await.unwrap();
    assert_eq!(counts.blobs, 1);
    assert_eq!(counts.paths, 1);
    assert!(indexer.store().find_path("empty.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn test_truncated_file_leaves_the_index() {
    let env = TestEnv::new();
    let notes = env.write_file("notes.txt", "some content");
    env.write_file("other.txt", "other content");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();
    let blob = blob_of(&indexer, "notes.txt").await;

    fs::write(&notes, "").unwrap();
    let summary = indexer.reindex().await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped_empty, 1);
    assert_eq!(summary.retired, vec!["notes.txt"]);

    assert!(indexer.store().find_path("notes.txt").await.unwrap().is_none());
    assert!(indexer.store().get_blob(blob).await.unwrap().is_none());
    assert!(found_paths(&indexer, QueryOp::And, &["notes"]).await.is_empty());

    let mut out = Vec::new();
    assert_eq!(indexer.export(&mut out).await.unwrap(), 1);

    // Stays out on later sweeps
    assert!(indexer.reindex().await.unwrap().retired.is_empty());
    assert!(indexer.resync().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resync_reports_truncated_file_deleted() {
    let env = TestEnv::new();
    let notes = env.write_file("notes.txt", "some content");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();

    fs::write(&notes, "").unwrap();
    let report = indexer.resync().await.unwrap();
    assert!(report.moved.is_empty());
    assert_eq!(report.deleted, vec!["notes.txt"]);

    let counts = indexer.store().counts().await.unwrap();
    assert_eq!(counts.blobs, 0);
    assert_eq!(counts.paths, 0);
}

#[tokio::test]
async fn test_identical_files_share_one_blob() {
    let env = TestEnv::new();
    env.write_file("one/copy.txt", "same bytes");
    env.write_file("two/copy.txt", "same bytes");

    let indexer = env.indexer().await;
    let summary = indexer.reindex().await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.new_blobs, 1);

    let counts = indexer.store().counts().await.unwrap();
    assert_eq!(counts.blobs, 1);
    assert_eq!(counts.paths, 2);
    assert_eq!(blob_of(&indexer, "one/copy.txt").await, blob_of(&indexer, "two/copy.txt").await);

    // Tags from both paths land on the shared blob
    let tags = tag_set(&indexer, blob_of(&indexer, "one/copy.txt").await).await;
    assert!(tags.contains("one"));
    assert!(tags.contains("two"));
}

#[tokio::test]
async fn test_parallel_hashing_matches_sequential() {
    let env = TestEnv::new();
    for i in 0..20 {
        env.write_file(&format!("dir{}/file{}.dat", i % 3, i), &format!("payload {}", i % 7));
    }

    let store = SqliteStore::open_in_memory().await.unwrap();
    let options = IndexerOptions {
        hash_workers: 4,
        ..IndexerOptions::default()
    };
    let indexer = env.indexer_with(store, options).await;

    let summary = indexer.reindex().await.unwrap();
    assert_eq!(summary.processed, 20);
    assert_eq!(summary.new_blobs, 7);

    let counts = indexer.store().counts().await.unwrap();
    assert_eq!(counts.blobs, 7);
    assert_eq!(counts.paths, 20);
}

#[tokio::test]
async fn test_database_inside_root_is_not_indexed() {
    let env = TestEnv::new();
    env.write_file("a.txt", "alpha");

    let config = IndexConfig::for_root(&env.root);
    let store = SqliteStore::open(config.database_path_for(&env.root)).await.unwrap();
    let indexer = Indexer::from_config(&config, store).await.unwrap();

    let summary = indexer.reindex().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert!(env.root.join("_index.db").exists());
    assert!(indexer.store().find_path("_index.db").await.unwrap().is_none());
}

#[tokio::test]
async fn test_rebuild_starts_over() {
    let env = TestEnv::new();
    env.write_file("a.txt", "alpha");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();
    let blob = blob_of(&indexer, "a.txt").await;
    indexer.add_tags(blob, &strings(&["manual"])).await.unwrap();

    let summary = indexer.rebuild().await.unwrap();
    assert_eq!(summary.processed, 1);

    let blob = blob_of(&indexer, "a.txt").await;
    assert!(!tag_set(&indexer, blob).await.contains("manual"));
    // Tag cache was reset along with the store
    assert_eq!(indexer.add_tags(blob, &strings(&["again"])).await.unwrap(), 1);
}

// ============================================================================
// Tags
// ============================================================================

#[tokio::test]
async fn test_add_then_remove_tags_restores_set() {
    let env = TestEnv::new();
    env.write_file("photos/beach.jpg", "jpeg bytes");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();
    let blob = blob_of(&indexer, "photos/beach.jpg").await;
    let original = tag_set(&indexer, blob).await;
    assert_eq!(original, ["beach", "jpg", "photos"].iter().map(|s| s.to_string()).collect());

    let extra = strings(&["Summer", "family"]);
    assert_eq!(indexer.add_tags(blob, &extra).await.unwrap(), 2);
    // Idempotent
    assert_eq!(indexer.add_tags(blob, &extra).await.unwrap(), 0);
    assert!(tag_set(&indexer, blob).await.contains("summer"));

    assert_eq!(indexer.remove_tags(blob, &extra).await.unwrap(), 2);
    assert_eq!(indexer.remove_tags(blob, &extra).await.unwrap(), 0);
    assert_eq!(tag_set(&indexer, blob).await, original);
}

#[tokio::test]
async fn test_find_all_and_or() {
    let env = TestEnv::new();
    env.write_file("photos/2019/beach.jpg", "beach");
    env.write_file("photos/2020/mountain.jpg", "mountain");
    env.write_file("docs/beach-report.pdf", "report");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();

    assert_eq!(
        found_paths(&indexer, QueryOp::And, &["beach", "jpg"]).await,
        vec!["photos/2019/beach.jpg"]
    );
    assert_eq!(
        found_paths(&indexer, QueryOp::Or, &["mountain", "pdf"]).await,
        vec!["docs/beach-report.pdf", "photos/2020/mountain.jpg"]
    );
    // Substring and case-insensitive
    assert_eq!(
        found_paths(&indexer, QueryOp::And, &["PHOTO", "20"]).await,
        vec!["photos/2019/beach.jpg", "photos/2020/mountain.jpg"]
    );
    assert!(found_paths(&indexer, QueryOp::And, &["beach", "mountain"]).await.is_empty());
    assert!(found_paths(&indexer, QueryOp::Or, &[]).await.is_empty());
}

#[tokio::test]
async fn test_unsupported_operator() {
    let err = tagdex::parse_op("xor").unwrap_err();
    assert!(matches!(err, IndexError::UnsupportedOperator(_)));
}

// ============================================================================
// Resync
// ============================================================================

#[tokio::test]
async fn test_move_keeps_tags() {
    let env = TestEnv::new();
    env.write_file("inbox/scan.pdf", "scanned document");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();
    let blob = blob_of(&indexer, "inbox/scan.pdf").await;
    indexer.add_tags(blob, &strings(&["invoice"])).await.unwrap();

    fs::create_dir_all(env.root.join("archive")).unwrap();
    fs::rename(env.root.join("inbox/scan.pdf"), env.root.join("archive/scan.pdf")).unwrap();

    let report = indexer.resync().await.unwrap();
    assert_eq!(report.moved.len(), 1);
    assert!(report.deleted.is_empty());
    assert_eq!(report.moved[0].from, "inbox/scan.pdf");
    assert_eq!(report.moved[0].to, "archive/scan.pdf");

    assert!(indexer.store().find_path("inbox/scan.pdf").await.unwrap().is_none());
    let tags = tag_set(&indexer, blob_of(&indexer, "archive/scan.pdf").await).await;
    for expected in ["invoice", "inbox", "archive", "scan", "pdf"] {
        assert!(tags.contains(expected), "missing tag {expected}: {tags:?}");
    }

    // Nothing left to reconcile
    assert!(indexer.resync().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_without_duplicate() {
    let env = TestEnv::new();
    env.write_file("keep.txt", "keep");
    let doomed = env.write_file("doomed.txt", "doomed");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();
    let blob = blob_of(&indexer, "doomed.txt").await;

    fs::remove_file(doomed).unwrap();
    let report = indexer.resync().await.unwrap();
    assert!(report.moved.is_empty());
    assert_eq!(report.deleted, vec!["doomed.txt"]);

    assert!(indexer.store().find_path("doomed.txt").await.unwrap().is_none());
    assert!(indexer.store().get_blob(blob).await.unwrap().is_none());
    assert_eq!(indexer.store().counts().await.unwrap().paths, 1);
}

#[tokio::test]
async fn test_deleting_one_duplicate_is_a_move() {
    let env = TestEnv::new();
    env.write_file("original/song.mp3", "same audio");
    let copy = env.write_file("backup/song.mp3", "same audio");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();
    let blob = blob_of(&indexer, "original/song.mp3").await;
    assert_eq!(blob, blob_of(&indexer, "backup/song.mp3").await);
    indexer.add_tags(blob, &strings(&["favourite"])).await.unwrap();

    fs::remove_file(copy).unwrap();
    let report = indexer.resync().await.unwrap();
    assert!(report.deleted.is_empty());
    assert_eq!(report.moved.len(), 1);
    assert_eq!(report.moved[0].from, "backup/song.mp3");
    assert_eq!(report.moved[0].to, "original/song.mp3");

    // Content survives with its tags; only the vanished record is gone
    assert!(indexer.store().get_blob(blob).await.unwrap().is_some());
    assert!(indexer.store().find_path("backup/song.mp3").await.unwrap().is_none());
    assert_eq!(blob_of(&indexer, "original/song.mp3").await, blob);
    assert!(tag_set(&indexer, blob).await.contains("favourite"));
}

#[tokio::test]
async fn test_resync_with_no_changes_is_empty() {
    let env = TestEnv::new();
    env.write_file("a.txt", "alpha");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();
    let report = indexer.resync().await.unwrap();
    assert!(report.moved.is_empty());
    assert!(report.deleted.is_empty());
}

#[tokio::test]
async fn test_legacy_digest_fallback_on_move() {
    let env = TestEnv::new();
    env.write_file("old/name.txt", "legacy content");
    env.write_file("other.txt", "something else");
    let store = SqliteStore::open(env.outside_db()).await.unwrap();

    // First generation indexed with sha256
    let legacy = env
        .indexer_with(
            store.clone(),
            IndexerOptions {
                algorithm: "sha256".to_string(),
                ..IndexerOptions::default()
            },
        )
        .await;
    legacy.reindex().await.unwrap();
    let old_blob = blob_of(&legacy, "old/name.txt").await;
    legacy.add_tags(old_blob, &strings(&["precious"])).await.unwrap();

    fs::create_dir_all(env.root.join("new")).unwrap();
    fs::rename(env.root.join("old/name.txt"), env.root.join("new/name.txt")).unwrap();

    // Second generation defaults to blake3
    let current = env.indexer_with(store.clone(), IndexerOptions::default()).await;
    let report = current.resync().await.unwrap();
    assert_eq!(report.moved.len(), 1);
    assert_eq!(report.moved[0].from, "old/name.txt");
    assert_eq!(report.moved[0].to, "new/name.txt");
    assert!(report.deleted.is_empty());

    let new_blob = blob_of(&current, "new/name.txt").await;
    assert!(tag_set(&current, new_blob).await.contains("precious"));
    let algorithms: BTreeSet<String> = store
        .blob_digests(new_blob)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.algorithm)
        .collect();
    assert_eq!(algorithms, ["blake3", "sha256"].iter().map(|s| s.to_string()).collect());
    assert!(store.get_blob(old_blob).await.unwrap().is_none());
}

#[tokio::test]
async fn test_scenario_five_files_two_subdirectories() {
    let env = TestEnv::new();
    let mut files = Vec::new();
    for i in 0..5 {
        files.push(format!("top file {i}.txt"));
    }
    for dir in ["first", "second"] {
        for j in 0..3 {
            files.push(format!("{dir}/nested {j}.log"));
        }
    }
    for name in &files {
        env.write_file(name, &format!("unique content of {name}"));
    }

    let indexer = env.indexer().await;
    assert_eq!(indexer.reindex().await.unwrap().processed, files.len() as u64);
    assert_eq!(files.len(), 5 + 2 * 3);
    assert_eq!(indexer.reindex().await.unwrap().processed, 0);

    let victim = "second/nested 1.log";
    fs::remove_file(env.root.join(victim)).unwrap();
    let report = indexer.resync().await.unwrap();
    assert_eq!(report.deleted, vec![victim.to_string()]);
    assert!(report.moved.is_empty());

    let remaining = found_paths(&indexer, QueryOp::Or, &["nested", "top"]).await;
    assert_eq!(remaining.len(), files.len() - 1);
    assert!(!remaining.contains(&victim.to_string()));
}

// ============================================================================
// Unreadable files
// ============================================================================

/// Hashes like BLAKE3 but fails on any content containing `CORRUPT`.
struct FailingOnMarker;

impl ContentHasher for FailingOnMarker {
    fn algorithm(&self) -> &'static str {
        "blake3-failing"
    }

    fn digest_reader(&self, reader: &mut dyn Read) -> io::Result<HashOutput> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        if content.windows(7).any(|w| w == b"CORRUPT") {
            return Err(io::Error::new(io::ErrorKind::Other, "bad sector"));
        }
        Blake3Hasher.digest_reader(&mut content.as_slice())
    }
}

#[tokio::test]
async fn test_unreadable_file_is_recorded_and_sweep_continues() {
    let env = TestEnv::new();
    env.write_file("good/one.txt", "fine");
    env.write_file("good/two.txt", "also fine");
    env.write_file("bad.txt", "CORRUPT payload");

    let mut hashers = HasherRegistry::default();
    hashers.register(Arc::new(FailingOnMarker));
    let options = IndexerOptions {
        algorithm: "blake3-failing".to_string(),
        hash_workers: 2,
        hashers,
        ..IndexerOptions::default()
    };
    let store = SqliteStore::open_in_memory().await.unwrap();
    let indexer = env.indexer_with(store, options).await;

    let summary = indexer.reindex().await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].path, "bad.txt");
    assert!(summary.errors[0].message.contains("bad sector"));

    assert!(indexer.store().find_path("bad.txt").await.unwrap().is_none());
    assert!(indexer.store().find_path("good/one.txt").await.unwrap().is_some());
    assert!(indexer.store().find_path("good/two.txt").await.unwrap().is_some());

    // Retried on the next sweep, since nothing was committed for it
    let again = indexer.reindex().await.unwrap();
    assert_eq!(again.unchanged, 2);
    assert_eq!(again.errors.len(), 1);
}

// ============================================================================
// Single files
// ============================================================================

#[tokio::test]
async fn test_add_single_file() {
    let env = TestEnv::new();
    let path = env.write_file("notes/todo.txt", "buy milk");

    let indexer = env.indexer().await;
    let outcome = indexer.add(&path, &strings(&["errands"])).await.unwrap();
    let AddOutcome::Indexed { blob, new_blob } = outcome else {
        panic!("expected indexed, got {outcome:?}");
    };
    assert!(new_blob);
    assert!(tag_set(&indexer, blob).await.contains("errands"));

    // Relative path, unchanged file, extra tag still attached
    let outcome = indexer
        .add(Path::new("notes/todo.txt"), &strings(&["home"]))
        .await
        .unwrap();
    assert_eq!(outcome, AddOutcome::Unchanged { blob });
    assert!(tag_set(&indexer, blob).await.contains("home"));
}

#[tokio::test]
async fn test_verify_outcomes() {
    let env = TestEnv::new();
    let path = env.write_file("a.txt", "original");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();
    assert_eq!(indexer.verify(Path::new("a.txt")).await.unwrap(), VerifyOutcome::Match);

    fs::write(&path, "tampered").unwrap();
    assert!(matches!(
        indexer.verify(Path::new("a.txt")).await.unwrap(),
        VerifyOutcome::Mismatch { .. }
    ));

    fs::remove_file(&path).unwrap();
    assert_eq!(indexer.verify(&path).await.unwrap(), VerifyOutcome::Missing);

    assert!(indexer.verify(Path::new("never.txt")).await.is_err());
}

// ============================================================================
// Export
// ============================================================================

#[tokio::test]
async fn test_export_lists_live_paths() {
    let env = TestEnv::new();
    env.write_file("b/second.txt", "two");
    env.write_file("a/first.txt", "one");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();

    let mut out = Vec::new();
    let rows = indexer.export(&mut out).await.unwrap();
    assert_eq!(rows, 2);

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "digest\tsize\tverified_at\tpath\ttags");

    let first: Vec<&str> = lines[1].split('\t').collect();
    assert_eq!(first[0], blake3::hash(b"one").to_hex().to_string());
    assert_eq!(first[1], "3");
    assert_eq!(first[3], "a/first.txt");
    assert_eq!(first[4], "\"first,txt\"");
    assert!(lines[2].contains("b/second.txt"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_export_escapes_tab_in_file_name() {
    let env = TestEnv::new();
    env.write_file("a\tb.txt", "tab");

    let indexer = env.indexer().await;
    indexer.reindex().await.unwrap();
    assert!(indexer.store().find_path("a\tb.txt").await.unwrap().is_some());

    let mut out = Vec::new();
    indexer.export(&mut out).await.unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 2);
    let fields: Vec<&str> = lines[1].split('\t').collect();
    assert_eq!(fields.len(), 5);
    assert_eq!(fields[3], "a\\tb.txt");
}
