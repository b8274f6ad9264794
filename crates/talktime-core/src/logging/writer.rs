//! Append-only JSONL file per node per day.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::JsonLogEntry;

/// Appends log entries to `<logs_dir>/raw/<date>_<instance>.jsonl`.
pub struct InstanceLogWriter {
    instance: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl InstanceLogWriter {
    /// Open (or create) today's file for `instance`, creating `raw/` if
    /// needed.
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        let instance = instance.into();
        let raw_dir = logs_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = raw_dir.join(format!("{}_{}.jsonl", date, instance));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            instance,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a line and flush it.
    pub fn write(&self, entry: &JsonLogEntry) -> std::io::Result<()> {
        let line = entry
            .to_json_line()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for InstanceLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Every entry under `<logs_dir>/raw`, merged across nodes and sorted by
/// timestamp. Lines that fail to parse are skipped.
pub fn read_entries(logs_dir: impl AsRef<Path>) -> std::io::Result<Vec<JsonLogEntry>> {
    let raw_dir = logs_dir.as_ref().join("raw");
    if !raw_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&raw_dir)? {
        let path = dir_entry?.path();
        if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
            let content = fs::read_to_string(&path)?;
            entries.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .filter_map(|line| JsonLogEntry::from_json_line(line).ok()),
            );
        }
    }

    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writer_file_layout() {
        let temp = TempDir::new().unwrap();
        let logs_dir = temp.path().join("logs");

        let writer = InstanceLogWriter::new(&logs_dir, "alice").unwrap();

        assert!(logs_dir.join("raw").is_dir());
        assert!(writer.path().exists());
        assert!(writer.path().to_string_lossy().ends_with("_alice.jsonl"));
    }

    #[test]
    fn test_entries_from_two_nodes_are_merged() {
        let temp = TempDir::new().unwrap();
        let logs_dir = temp.path().join("logs");

        let alice = InstanceLogWriter::new(&logs_dir, "alice").unwrap();
        let bob = InstanceLogWriter::new(&logs_dir, "bob").unwrap();
        alice
            .write(&JsonLogEntry::new("info", "alice", "talktime_core", "Log opened"))
            .unwrap();
        bob.write(&JsonLogEntry::new("info", "bob", "talktime_core", "Log opened"))
            .unwrap();
        std::fs::write(logs_dir.join("raw").join("garbage.jsonl"), "not json\n").unwrap();
        drop(alice);
        drop(bob);

        let entries = read_entries(&logs_dir).unwrap();
        let mut instances: Vec<&str> = entries.iter().map(|e| e.instance.as_str()).collect();
        instances.sort();
        assert_eq!(instances, vec!["alice", "bob"]);
    }

    #[test]
    fn test_read_entries_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert!(read_entries(temp.path().join("nowhere")).unwrap().is_empty());
    }
}
