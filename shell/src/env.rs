use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;

/// Mutable, session-level view of the process environment.
///
/// The environment contains:
/// - `vars`: variables visible to expansion and passed to every child process.
/// - `current_dir`: the logical working directory, as reported by `pwd -L`.
/// - `previous_dir`: the directory `cd -` returns to.
/// - `exit_code`: set by `exit`; the session stops once it is `Some`.
///
/// Variables are kept in this map rather than written back into the process
/// environment, and children receive exactly this map.
#[derive(Debug, Clone)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    pub current_dir: PathBuf,
    pub previous_dir: Option<PathBuf>,
    pub exit_code: Option<i32>,
}

impl Environment {
    /// Capture the current process state into a new `Environment`.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            vars,
            current_dir,
            previous_dir: None,
            exit_code: None,
        }
    }

    /// An environment with no variables, rooted at the process working directory.
    pub fn empty() -> Self {
        Self {
            vars: HashMap::new(),
            ..Self::new()
        }
    }

    /// Get the value of a variable.
    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set or override a variable.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// `$HOME`, or `/` when it is unset.
    pub fn home(&self) -> String {
        self.get_var("HOME").unwrap_or("/").to_string()
    }

    /// Whether `exit` has been requested.
    pub fn should_exit(&self) -> bool {
        self.exit_code.is_some()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = Environment::empty();

        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set_var("KEY", "VALUE");

        assert_eq!(env.get_var("KEY"), Some("VALUE"));
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(env.get_var("PATH").is_some());
    }

    #[test]
    fn test_home_falls_back_to_root() {
        let mut env = Environment::empty();
        assert_eq!(env.home(), "/");
        env.set_var("HOME", "/home/ada");
        assert_eq!(env.home(), "/home/ada");
    }

    #[test]
    fn test_exit_request() {
        let mut env = Environment::empty();
        assert!(!env.should_exit());
        env.exit_code = Some(3);
        assert!(env.should_exit());
    }
}
