use crate::env::Environment;
use crate::error::{Result, ShellError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Outcome of [`ConfigStore::remove_alias`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasRemoval {
    Removed,
    NotFound,
    /// Defined, but by the embedded default or the system file.
    NotInUserFile,
}

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

/// Prompt value that selects the built-in `<cwd> $ ` prompt.
pub const DEFAULT_PROMPT: &str = "default";

/// Prompt shown while a backslash-continued line is being read.
pub const CONTINUATION_PROMPT: &str = "> ";

/// Alias name to expansion text, kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AliasTable(BTreeMap<String, String>);

impl AliasTable {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, expansion: impl Into<String>) {
        self.0.insert(name.into(), expansion.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().map(|(n, e)| (n.as_str(), e.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for AliasTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        AliasTable(iter.into_iter().collect())
    }
}

// ── Final (merged) config ──

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_history")]
    pub history: bool,
    /// Directory the shell changes into when the configuration is first loaded.
    #[serde(default)]
    pub start_dir: Option<String>,
    #[serde(default)]
    pub aliases: AliasTable,
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_history() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            history: default_history(),
            start_dir: None,
            aliases: AliasTable::default(),
        }
    }
}

// ── Overlay (system and user files merged over the defaults) ──

#[derive(Debug, Deserialize, Default)]
struct ConfigOverlay {
    prompt: Option<String>,
    history: Option<bool>,
    start_dir: Option<String>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

impl Config {
    /// Load the default embedded configuration.
    pub fn default_config() -> Self {
        match toml::from_str(DEFAULT_CONFIG) {
            Ok(config) => config,
            Err(e) => {
                warn!("embedded default config failed to parse: {e}");
                Self::default()
            }
        }
    }

    /// Apply an overlay on top of this config: scalars override, aliases extend.
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        if let Some(prompt) = overlay.prompt {
            self.prompt = prompt;
        }
        if let Some(history) = overlay.history {
            self.history = history;
        }
        if let Some(dir) = overlay.start_dir {
            self.start_dir = Some(dir);
        }
        for (name, expansion) in overlay.aliases {
            self.aliases.insert(name, expansion);
        }
    }

    /// Render the prompt for the current directory.
    pub fn render_prompt(&self, env: &Environment) -> String {
        if self.prompt != DEFAULT_PROMPT {
            return self.prompt.clone();
        }
        let cwd = env.current_dir.to_string_lossy();
        let home = env.get_var("HOME").unwrap_or_default();
        let shown = match cwd.strip_prefix(home) {
            Some(rest) if !home.is_empty() && (rest.is_empty() || rest.starts_with('/')) => {
                format!("~{rest}")
            }
            _ => cwd.to_string(),
        };
        format!("{shown} $ ")
    }

    /// Apply an overlay from a TOML string. Used for testing.
    #[cfg(test)]
    fn apply_overlay_str(&mut self, toml_str: &str) {
        let overlay: ConfigOverlay = toml::from_str(toml_str).unwrap();
        self.apply_overlay(overlay);
    }
}

/// The merged configuration together with the files it came from.
///
/// Resolution order:
/// 1. embedded defaults
/// 2. `/etc/jobshell.toml`
/// 3. `~/.config/jobshell/config.toml` (the only file the shell writes)
#[derive(Debug)]
pub struct ConfigStore {
    system_path: Option<PathBuf>,
    user_path: Option<PathBuf>,
    /// Modification times observed at the last load, per file.
    seen: Vec<(PathBuf, Option<SystemTime>)>,
    config: Config,
}

impl ConfigStore {
    /// Standard locations, with the user file resolved under `home`.
    pub fn new(home: Option<&Path>) -> Self {
        Self::with_paths(
            Some(PathBuf::from("/etc/jobshell.toml")),
            home.map(|h| h.join(".config/jobshell/config.toml")),
        )
    }

    pub fn with_paths(system_path: Option<PathBuf>, user_path: Option<PathBuf>) -> Self {
        Self {
            system_path,
            user_path,
            seen: Vec::new(),
            config: Config::default_config(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.config.aliases
    }

    pub fn user_path(&self) -> Option<&Path> {
        self.user_path.as_deref()
    }

    fn paths(&self) -> impl Iterator<Item = &PathBuf> + '_ {
        self.system_path.iter().chain(self.user_path.iter())
    }

    /// Rebuild the configuration from all files.
    ///
    /// A file that fails to parse is skipped and its error returned; the
    /// remaining files still apply.
    pub fn load(&mut self) -> Vec<ShellError> {
        let mut config = Config::default_config();
        let mut errors = Vec::new();
        let mut seen = Vec::new();

        for path in self.paths() {
            seen.push((path.clone(), modified(path)));
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };
            match toml::from_str::<ConfigOverlay>(&content) {
                Ok(overlay) => {
                    info!("config loaded from {}", path.display());
                    config.apply_overlay(overlay);
                }
                Err(source) => {
                    warn!("config {} failed to parse: {source}", path.display());
                    errors.push(ShellError::ConfigParse {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }

        self.config = config;
        self.seen = seen;
        errors
    }

    /// Whether any config file appeared, vanished or was modified since the last load.
    pub fn is_stale(&self) -> bool {
        self.seen.is_empty() || self.seen.iter().any(|(path, when)| modified(path) != *when)
    }

    /// Reload when stale. Returns `None` when nothing changed.
    pub fn reload_if_changed(&mut self) -> Option<Vec<ShellError>> {
        if !self.is_stale() {
            return None;
        }
        info!("config changed on disk, reloading");
        Some(self.load())
    }

    /// Record `name = expansion` in the user file and in the live table.
    pub fn persist_alias(&mut self, name: &str, expansion: &str) -> Result<()> {
        let path = self.require_user_path()?;
        let mut table = read_table(&path);
        let aliases = table
            .entry("aliases")
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        if !aliases.is_table() {
            *aliases = toml::Value::Table(toml::Table::new());
        }
        if let toml::Value::Table(aliases) = aliases {
            aliases.insert(name.to_string(), toml::Value::String(expansion.to_string()));
        }
        write_table(&path, &table)?;

        self.config.aliases.insert(name, expansion);
        self.remember(&path);
        Ok(())
    }

    /// Remove an alias from the user file and the live table.
    ///
    /// Only aliases recorded in the user file can be removed; the live table
    /// is left alone otherwise.
    pub fn remove_alias(&mut self, name: &str) -> Result<AliasRemoval> {
        if self.config.aliases.get(name).is_none() {
            return Ok(AliasRemoval::NotFound);
        }
        let path = self.require_user_path()?;
        let mut table = read_table(&path);
        let removed = match table.get_mut("aliases") {
            Some(toml::Value::Table(aliases)) => aliases.remove(name).is_some(),
            _ => false,
        };
        if !removed {
            return Ok(AliasRemoval::NotInUserFile);
        }
        write_table(&path, &table)?;
        self.config.aliases.remove(name);
        self.remember(&path);
        Ok(AliasRemoval::Removed)
    }

    fn require_user_path(&self) -> Result<PathBuf> {
        self.user_path.clone().ok_or_else(|| ShellError::ConfigWrite {
            path: PathBuf::from("~/.config/jobshell/config.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "HOME is not set"),
        })
    }

    /// Refresh the recorded mtime of a file the shell itself just wrote.
    fn remember(&mut self, path: &Path) {
        let when = modified(path);
        match self.seen.iter_mut().find(|(p, _)| p == path) {
            Some(entry) => entry.1 = when,
            None => self.seen.push((path.to_path_buf(), when)),
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_table(path: &Path) -> toml::Table {
    fs::read_to_string(path)
        .ok()
        .and_then(|content| content.parse::<toml::Table>().ok())
        .unwrap_or_default()
}

fn write_table(path: &Path, table: &toml::Table) -> Result<()> {
    let to_write_error = |source| ShellError::ConfigWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(to_write_error)?;
    }
    let content = toml::to_string(table)
        .map_err(|e| to_write_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    fs::write(path, content).map_err(to_write_error)
}
