//! JSONL persistence for command history: append-on-write, load-on-start.
//!
//! Open-or-create-append-flush writer plus a `$HOME`-relative default path
//! with a working-directory fallback, round-tripping
//! [`ExportedCommandRecord`] through one record per line.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::context::ExportedCommandRecord;

pub const HISTORY_DIR_NAME: &str = ".termai-pty";

/// Appends [`ExportedCommandRecord`]s to a JSONL file, flushing after every
/// write so a crash never loses more than the in-flight record.
pub struct HistoryWriter {
    path: PathBuf,
    file: BufWriter<File>,
    records_written: u64,
}

impl HistoryWriter {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            records_written: 0,
        })
    }

    pub fn append(&mut self, record: &ExportedCommandRecord) -> io::Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        writeln!(self.file, "{json}")?;
        self.file.flush()?;
        self.records_written = self.records_written.saturating_add(1);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}

/// Read every well-formed record from a JSONL history file, skipping any
/// line that fails to parse rather than aborting the whole load.
pub fn load_history(path: &Path) -> io::Result<Vec<ExportedCommandRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(record) = serde_json::from_str::<ExportedCommandRecord>(&line) {
            records.push(record);
        }
    }
    Ok(records)
}

/// `$HOME/.termai-pty/history.jsonl`, falling back to `<working_dir>/.termai-pty`
/// when `$HOME` is unset.
pub fn default_history_path(working_dir: &Path) -> PathBuf {
    let root = if let Some(home) = std::env::var_os("HOME").filter(|v| !v.is_empty()) {
        PathBuf::from(home).join(HISTORY_DIR_NAME)
    } else {
        working_dir.join(HISTORY_DIR_NAME)
    };
    root.join("history.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(command: &str) -> ExportedCommandRecord {
        ExportedCommandRecord {
            command: command.to_string(),
            timestamp_unix_ms: 1000,
            directory: "/tmp".to_string(),
            exit_code: 0,
            output: "ok".to_string(),
            error: String::new(),
            duration_secs: 0.1,
        }
    }

    #[test]
    fn append_then_load_round_trips_records() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("history.jsonl");

        let mut writer = HistoryWriter::open(&path).expect("open should succeed");
        writer.append(&sample("ls")).expect("append should succeed");
        writer.append(&sample("pwd")).expect("append should succeed");
        assert_eq!(writer.records_written(), 2);

        let loaded = load_history(&path).expect("load should succeed");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].command, "ls");
        assert_eq!(loaded[1].command, "pwd");
    }

    #[test]
    fn load_history_skips_malformed_lines() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("history.jsonl");
        fs::write(&path, "not json\n{\"command\":\"ls\"}\n").expect("write should succeed");
        let loaded = load_history(&path).expect("load should succeed");
        assert!(loaded.is_empty());
    }

    #[test]
    fn load_history_of_missing_file_is_empty() {
        let path = Path::new("/nonexistent/path/history.jsonl");
        let loaded = load_history(path).expect("missing file should not error");
        assert!(loaded.is_empty());
    }

    #[test]
    fn default_history_path_is_under_home_when_set() {
        let path = default_history_path(Path::new("/tmp/project"));
        assert!(path.ends_with("history.jsonl"));
    }
}
