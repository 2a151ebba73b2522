//! Command history shared by the line editor and the `history` builtin.

use log::warn;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// File name of the history log under `$HOME`.
pub const HISTORY_FILE: &str = ".jobshell_history";

/// Accepted command lines, oldest first, mirrored to a file when one is set.
#[derive(Debug, Default)]
pub struct History {
    path: Option<PathBuf>,
    entries: Vec<String>,
}

impl History {
    /// Load the history log stored under `home`; a missing file means no entries.
    pub fn load(home: &Path) -> Self {
        let path = home.join(HISTORY_FILE);
        let entries = match fs::read_to_string(&path) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("history file {} unreadable: {e}", path.display());
                Vec::new()
            }
        };
        Self {
            path: Some(path),
            entries,
        }
    }

    /// History that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Append a line to the history and to its file.
    pub fn record(&mut self, line: &str) -> io::Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        self.entries.push(line.to_string());
        if let Some(path) = &self.path {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    /// Resolve `!N` (1-based) or `!-N` (N-th most recent).
    pub fn select(&self, reference: &str) -> Option<&str> {
        let spec = reference.strip_prefix('!')?;
        let index = match spec.strip_prefix('-') {
            Some(back) => self.entries.len().checked_sub(back.parse().ok()?)?,
            None => spec.parse::<usize>().ok()?.checked_sub(1)?,
        };
        self.entries.get(index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn history_of(lines: &[&str]) -> History {
        let mut history = History::in_memory();
        for line in lines {
            history.record(line).unwrap();
        }
        history
    }

    #[test]
    fn select_by_absolute_and_relative_index() {
        let history = history_of(&["ls", "pwd", "jobs"]);
        assert_eq!(history.select("!1"), Some("ls"));
        assert_eq!(history.select("!3"), Some("jobs"));
        assert_eq!(history.select("!-1"), Some("jobs"));
        assert_eq!(history.select("!-3"), Some("ls"));
    }

    #[test]
    fn select_out_of_range_or_malformed() {
        let history = history_of(&["ls"]);
        assert_eq!(history.select("!0"), None);
        assert_eq!(history.select("!2"), None);
        assert_eq!(history.select("!-0"), None);
        assert_eq!(history.select("!-2"), None);
        assert_eq!(history.select("!x"), None);
        assert_eq!(history.select("1"), None);
    }

    #[test]
    fn empty_lines_are_not_recorded() {
        let history = history_of(&["", "ls", ""]);
        assert_eq!(history.entries(), ["ls"]);
    }

    #[test]
    fn records_are_appended_to_file_and_reloaded() {
        let home = tempfile::tempdir().unwrap();
        let mut history = History::load(home.path());
        assert!(history.entries().is_empty());

        history.record("echo one").unwrap();
        history.record("echo two").unwrap();

        let reloaded = History::load(home.path());
        assert_eq!(reloaded.entries(), ["echo one", "echo two"]);
        assert_eq!(
            fs::read_to_string(home.path().join(HISTORY_FILE)).unwrap(),
            "echo one\necho two\n"
        );
    }
}
