//! Output formatting helpers for CLI commands

use tagdex_db::BlobDetails;

/// Decimal units, whole numbers only.
const SIZE_UNITS: [(u64, &str); 4] = [
    (1_000_000_000, "G"),
    (1_000_000, "M"),
    (1_000, "K"),
    (1, "B"),
];

/// Compact size for listings: `950B`, ` 12K`, `  3G`.
pub fn friendly_size(bytes: u64) -> String {
    let (divisor, unit) = SIZE_UNITS
        .iter()
        .copied()
        .find(|(divisor, _)| bytes >= *divisor)
        .unwrap_or((1, "B"));
    format!("{:>3}{}", bytes / divisor, unit)
}

/// One line per live path of the blob: `(  1K) photos/beach.jpg`
pub fn blob_lines(details: &BlobDetails) -> Vec<String> {
    details
        .paths
        .iter()
        .map(|p| format!("({}) {}", friendly_size(details.blob.size), p.path))
        .collect()
}

/// Multi-line description for `show`.
pub fn describe_blob(details: &BlobDetails) -> String {
    let mut out = String::new();
    out.push_str(&format!("Blob:     {}\n", details.blob.id));
    out.push_str(&format!(
        "Size:     {} bytes ({})\n",
        details.blob.size,
        friendly_size(details.blob.size).trim_start()
    ));
    out.push_str(&format!("Created:  {}\n", details.blob.created_at.to_rfc3339()));
    for digest in &details.digests {
        out.push_str(&format!("Digest:   {}\n", digest));
    }
    out.push_str(&format!("Tags:     {}\n", details.tags.join(", ")));
    for path in &details.paths {
        out.push_str(&format!(
            "Path:     {} (verified {})\n",
            path.path,
            path.verified_at.to_rfc3339()
        ));
    }
    out
}
