//! Tab-separated dump of the index.
//!
//! One row per live path: `digest size verified_at path tags`. Tags are
//! sorted, joined with `,` and wrapped in double quotes.
//!
//! Fields are written unquoted, so a backslash, tab, carriage return or
//! newline inside a path or tag is escaped C-style (`\\`, `\t`, `\r`, `\n`)
//! to keep one record per line and five columns per record.

use csv::{QuoteStyle, WriterBuilder};
use std::borrow::Cow;
use std::io::Write;
use tagdex_db::ExportRow;

use crate::error::Result;

pub const EXPORT_HEADER: [&str; 5] = ["digest", "size", "verified_at", "path", "tags"];

pub fn write_tsv<W: Write>(rows: &[ExportRow], writer: W) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .from_writer(writer);

    wtr.write_record(EXPORT_HEADER)?;
    for row in rows {
        let mut tags = row.tags.clone();
        tags.sort();
        wtr.write_record([
            row.digest.clone().unwrap_or_default(),
            row.size.to_string(),
            row.verified_at.to_rfc3339(),
            escape_field(&row.path).into_owned(),
            format!("\"{}\"", escape_field(&tags.join(","))),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Escape the characters that would break a tab-separated line.
fn escape_field(field: &str) -> Cow<'_, str> {
    if !field.contains(['\\', '\t', '\r', '\n']) {
        return Cow::Borrowed(field);
    }
    let mut escaped = String::with_capacity(field.len() + 4);
    for c in field.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_write_tsv() {
        let rows = vec![
            ExportRow {
                digest: Some("abc".to_string()),
                size: 12,
                verified_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                path: "docs/report.pdf".to_string(),
                tags: vec!["report".to_string(), "docs".to_string(), "pdf".to_string()],
            },
            ExportRow {
                digest: None,
                size: 1,
                verified_at: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
                path: "x".to_string(),
                tags: vec![],
            },
        ];

        let mut out = Vec::new();
        write_tsv(&rows, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "digest\tsize\tverified_at\tpath\ttags");
        assert_eq!(
            lines[1],
            "abc\t12\t2024-03-01T12:00:00+00:00\tdocs/report.pdf\t\"docs,pdf,report\""
        );
        assert_eq!(lines[2], "\t1\t2024-03-02T00:00:00+00:00\tx\t\"\"");
    }

    #[test]
    fn test_control_characters_in_path_are_escaped() {
        let rows = vec![ExportRow {
            digest: Some("abc".to_string()),
            size: 3,
            verified_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            path: "odd\tname\nwith\\slash.txt".to_string(),
            tags: vec!["txt".to_string()],
        }];

        let mut out = Vec::new();
        write_tsv(&rows, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        let fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(fields.len(), EXPORT_HEADER.len());
        assert_eq!(fields[3], "odd\\tname\\nwith\\\\slash.txt");
        assert_eq!(fields[4], "\"txt\"");
    }

    #[test]
    fn test_escape_field_borrows_plain_text() {
        assert!(matches!(escape_field("photos/beach.jpg"), Cow::Borrowed(_)));
        assert_eq!(escape_field("a\tb"), "a\\tb");
    }
}
