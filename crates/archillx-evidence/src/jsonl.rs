//! JSONL framing: one JSON object per line, UTF-8, sorted keys.
//!
//! `serde_json`'s default object map is a `BTreeMap`, so serializing a
//! `Value` already yields sorted keys; the framing contract here is that a
//! record lands as a single write of `line + '\n'` on an append-mode handle.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

/// Append one framed record, creating parent directories on first use.
pub fn append_line(path: &Path, record: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))?;
    file.flush()?;
    Ok(())
}

/// Read records in file order; unparsable lines are skipped. `limit` keeps
/// the newest records (tail), mirroring how the ledgers are consumed.
pub fn read_lines(path: &Path, limit: Option<usize>) -> Result<Vec<Value>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("open {}", path.display())),
    };
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(&line) {
            records.push(value);
        }
    }
    if let Some(limit) = limit {
        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_and_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        append_line(&path, &json!({"n": 1})).unwrap();
        append_line(&path, &json!({"n": 2})).unwrap();

        let records = read_lines(&path, None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["n"], json!(1));
        assert_eq!(records[1]["n"], json!(2));
    }

    #[test]
    fn keys_serialize_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        append_line(&path, &json!({"zebra": 1, "alpha": 2})).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let alpha = raw.find("alpha").unwrap();
        let zebra = raw.find("zebra").unwrap();
        assert!(alpha < zebra);
    }

    #[test]
    fn tail_limit_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        for n in 0..5 {
            append_line(&path, &json!({"n": n})).unwrap();
        }
        let tail = read_lines(&path, Some(2)).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0]["n"], json!(3));
        assert_eq!(tail[1]["n"], json!(4));
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.jsonl");
        assert!(read_lines(&path, None).unwrap().is_empty());
    }
}
