//! File logging. The terminal belongs to the user and the jobs, so log
//! records only ever go to a file.

use log::LevelFilter;
use simplelog::{ConfigBuilder, WriteLogger};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Environment variable selecting the log level.
pub const LOG_LEVEL_VAR: &str = "JOBSHELL_LOG";

/// Parse a level name; unknown or missing values give `Info`.
pub fn level_from(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(LevelFilter::Info)
}

/// `$HOME/.local/share/jobshell/jobshell.log`
pub fn log_path(home: &Path) -> PathBuf {
    home.join(".local/share/jobshell/jobshell.log")
}

/// Install a [`WriteLogger`] appending to [`log_path`].
///
/// Any failure leaves logging disabled; nothing is printed.
pub fn init(home: Option<&Path>, level: Option<&str>) {
    let level = level_from(level);
    let Some(home) = home else {
        return;
    };
    if level == LevelFilter::Off {
        return;
    }
    let path = log_path(home);
    if let Some(dir) = path.parent() {
        if fs::create_dir_all(dir).is_err() {
            return;
        }
    }
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    let config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Debug)
        .build();
    let _ = WriteLogger::init(level, config, file);
}
