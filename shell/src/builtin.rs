use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::config::AliasRemoval;
use crate::error::ShellError;
use crate::expand::unescape;
use crate::interpreter::{Factory, Session};
use crate::jobs::parse_job_ref;
use crate::pipeline;
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Executes the command using provided output streams and the session.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let result = T::execute(*self, stdout, stderr, session);
        stdout.flush()?;
        match result {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(stderr, "{e:#}")?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        _session: &mut Session,
    ) -> Result<ExitCode> {
        let sink: &mut dyn Write = if self.is_error {
            &mut *stderr
        } else {
            &mut *stdout
        };
        sink.write_all(self.output.as_bytes())?;
        if !self.output.ends_with('\n') {
            writeln!(sink)?;
        }
        Ok(if self.is_error { 1 } else { 0 })
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

fn owned_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn is_help_flag(arg: &str) -> bool {
    matches!(arg, "-h" | "--help" | "-help")
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {
    #[argh(switch, short = 'L')]
    /// print the logical directory, as reached through `cd` (default)
    pub logical: bool,

    #[argh(switch, short = 'P')]
    /// print the physical directory with all symlinks resolved
    pub physical: bool,
}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let cwd = &session.env.current_dir;
        if self.physical && !self.logical {
            let real = fs::canonicalize(cwd)
                .with_context(|| format!("pwd: can't resolve {}", cwd.display()))?;
            writeln!(stdout, "{}", real.display())?;
        } else {
            writeln!(stdout, "{}", cwd.display())?;
        }
        Ok(0)
    }
}

/// Change the current working directory.
///
/// With no target, changes to `$HOME`. `-` returns to the previous directory
/// and prints it. `~` and `~/path` are relative to `$HOME`.
pub struct Cd {
    pub target: Option<String>,
}

impl FromArgs for Cd {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        match args {
            [] => Ok(Cd { target: None }),
            [target] => Ok(Cd {
                target: Some(target.to_string()),
            }),
            _ => Err(EarlyExit {
                output: "cd: too many arguments\n".to_string(),
                status: Err(()),
            }),
        }
    }
}

/// Resolve `.` and `..` without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let env = &mut session.env;
        let home = PathBuf::from(env.home());

        let target = match self.target.as_deref() {
            None | Some("") => home,
            Some("-") => {
                let dir = env.previous_dir.clone().unwrap_or(home);
                writeln!(stdout, "{}", dir.display())?;
                dir
            }
            Some(t) if t.starts_with('~') => match t[1..].strip_prefix('/') {
                Some(rest) => home.join(rest),
                None if t.len() == 1 => home,
                None => {
                    writeln!(stderr, "cd: unsupported format: {t}")?;
                    return Ok(1);
                }
            },
            Some(t) => PathBuf::from(t),
        };

        let new_dir = normalize(&env.current_dir.join(&target));
        let meta = fs::metadata(&new_dir).with_context(|| format!("cd: {}", target.display()))?;
        if !meta.is_dir() {
            bail!("cd: {}: Not a directory", target.display());
        }

        std::env::set_current_dir(&new_dir)
            .with_context(|| format!("cd: can't chdir to {}", new_dir.display()))?;
        let old = std::mem::replace(&mut env.current_dir, new_dir);
        env.previous_dir = Some(old);
        Ok(0)
    }
}

/// Write the arguments to standard output, separated by spaces, decoding
/// backslash escapes. A trailing newline is always printed.
pub struct Echo {
    pub args: Vec<String>,
}

impl FromArgs for Echo {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(Echo {
            args: owned_args(args),
        })
    }
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _session: &mut Session,
    ) -> Result<ExitCode> {
        let decoded: Vec<String> = self.args.iter().map(|a| unescape(a)).collect();
        writeln!(stdout, "{}", decoded.join(" "))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Set shell variables, or print them when given without a value.
/// Variables are passed to every program the shell starts.
pub struct Export {
    #[argh(positional, greedy)]
    /// variables to set as `NAME=value`, or to print as `NAME`
    pub items: Vec<String>,
}

impl BuiltinCommand for Export {
    fn name() -> &'static str {
        "export"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        if self.items.is_empty() {
            writeln!(stderr, "export: usage: export NAME=value")?;
            return Ok(1);
        }
        for item in &self.items {
            match item.split_once('=') {
                Some((name, value)) => session.env.set_var(name, value),
                None => match session.env.get_var(item) {
                    Some(value) => writeln!(stdout, "{item}={value}")?,
                    None => writeln!(stderr, "export: {item} not set")?,
                },
            }
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Show the command history, or a single entry of it.
pub struct ShowHistory {
    #[argh(positional)]
    /// entry selector: `!N` for entry N, `!-N` for the N-th most recent entry
    pub entry: Option<String>,
}

impl BuiltinCommand for ShowHistory {
    fn name() -> &'static str {
        "history"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        if let Some(entry) = self.entry.as_deref().filter(|e| e.starts_with('!')) {
            match session.history.select(entry) {
                Some(line) => writeln!(stdout, "{line}")?,
                None => writeln!(stderr, "history: invalid index")?,
            }
            return Ok(0);
        }
        for (n, line) in session.history.entries().iter().enumerate() {
            writeln!(stdout, "{}  {line}", n + 1)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List background and stopped jobs.
pub struct Jobs {}

impl BuiltinCommand for Jobs {
    fn name() -> &'static str {
        "jobs"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        session.jobs.cleanup();
        let current = session.jobs.most_recent().map(|job| job.id);
        for job in session.jobs.list() {
            let marker = if Some(job.id) == current { '+' } else { ' ' };
            writeln!(
                stdout,
                "[{}]{marker} {:<10} {}",
                job.id, job.state, job.command
            )?;
        }
        Ok(0)
    }
}

/// Resolve an optional `%N`/`N` reference to a live job's process group.
fn find_job(
    session: &mut Session,
    command: &str,
    reference: Option<&str>,
    stderr: &mut dyn Write,
) -> Result<Option<nix::unistd::Pid>> {
    session.jobs.cleanup();
    let pgid = match reference {
        None => session.jobs.get_pgid(None),
        Some(r) => parse_job_ref(r).and_then(|id| session.jobs.get_pgid(Some(id))),
    };
    if pgid.is_none() {
        let missing = ShellError::NoSuchJob(reference.unwrap_or("current").to_string());
        writeln!(stderr, "{command}: {missing}")?;
    }
    Ok(pgid)
}

#[derive(FromArgs)]
/// Resume a job in the foreground and wait for it.
pub struct Fg {
    #[argh(positional)]
    /// job to resume, `%N` or `N`; the most recent job when omitted
    pub job: Option<String>,
}

impl BuiltinCommand for Fg {
    fn name() -> &'static str {
        "fg"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let Some(pgid) = find_job(session, "fg", self.job.as_deref(), stderr)? else {
            return Ok(1);
        };
        if let Some(job) = session.jobs.find_by_pgid(pgid) {
            writeln!(stdout, "{}", job.command)?;
        }
        stdout.flush()?;

        match pipeline::resume_foreground(session, pgid) {
            Ok(status) => Ok(status),
            Err(e) => {
                session.jobs.remove(pgid);
                bail!("fg: {e}")
            }
        }
    }
}

#[derive(FromArgs)]
/// Resume a stopped job in the background.
pub struct Bg {
    #[argh(positional)]
    /// job to resume, `%N` or `N`; the most recent job when omitted
    pub job: Option<String>,
}

impl BuiltinCommand for Bg {
    fn name() -> &'static str {
        "bg"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let Some(pgid) = find_job(session, "bg", self.job.as_deref(), stderr)? else {
            return Ok(1);
        };
        if let Err(e) = pipeline::resume_background(session, pgid) {
            session.jobs.remove(pgid);
            bail!("bg: {e}");
        }
        if let Some(job) = session.jobs.find_by_pgid(pgid) {
            writeln!(stdout, "[{}] {} &", job.id, job.command)?;
        }
        Ok(0)
    }
}

const ALIAS_USAGE: &str = "\
Usage: alias <name>-<command>
Example: alias ll-ls -l
Options:
  -h, --help, -help    Show this help message
";

/// Define a persistent alias (`name-command words`), or list all aliases.
pub struct Alias {
    pub args: Vec<String>,
}

impl FromArgs for Alias {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(Alias {
            args: owned_args(args),
        })
    }
}

impl BuiltinCommand for Alias {
    fn name() -> &'static str {
        "alias"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        match self.args.first().map(String::as_str) {
            None => {
                for (name, expansion) in session.config.aliases().iter() {
                    writeln!(stdout, "alias {name}='{expansion}'")?;
                }
                return Ok(0);
            }
            Some(flag) if is_help_flag(flag) => {
                write!(stdout, "{ALIAS_USAGE}")?;
                return Ok(0);
            }
            Some(_) => {}
        }

        let definition = self.args.join(" ");
        let parsed = definition
            .split_once('-')
            .map(|(name, command)| (name.trim(), command.trim()))
            .filter(|(name, command)| !name.is_empty() && !command.is_empty());
        let Some((name, command)) = parsed else {
            writeln!(stderr, "Error: Invalid alias format.")?;
            write!(stderr, "{ALIAS_USAGE}")?;
            return Ok(1);
        };

        session
            .config
            .persist_alias(name, command)
            .context("alias")?;
        if let Some(path) = session.config.user_path() {
            writeln!(stdout, "Alias added persistently to {}", path.display())?;
        }
        Ok(0)
    }
}

/// Remove a persistent alias.
pub struct Unalias {
    pub args: Vec<String>,
}

impl FromArgs for Unalias {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(Unalias {
            args: owned_args(args),
        })
    }
}

impl BuiltinCommand for Unalias {
    fn name() -> &'static str {
        "unalias"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let name = match self.args.first() {
            None => {
                writeln!(stderr, "Usage: unalias <name>")?;
                return Ok(1);
            }
            Some(flag) if is_help_flag(flag) => {
                writeln!(stdout, "Usage: unalias <name>")?;
                return Ok(0);
            }
            Some(name) => name,
        };

        match session.config.remove_alias(name).context("unalias")? {
            AliasRemoval::Removed => {}
            AliasRemoval::NotFound => {
                writeln!(stderr, "unalias: {name}: not found")?;
                return Ok(1);
            }
            AliasRemoval::NotInUserFile => {
                writeln!(stderr, "unalias: {name}: defined in system config")?;
                return Ok(1);
            }
        }
        if let Some(path) = session.config.user_path() {
            writeln!(stdout, "Alias '{name}' removed from {}", path.display())?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Exit {
    #[argh(positional)]
    /// exit status, 0 when omitted
    pub code: Option<i32>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let code = self.code.unwrap_or(0) & 0xff;
        session.env.exit_code = Some(code);
        Ok(code)
    }
}

const HELP_TEXT: &str = "\
jobshell: an interactive shell with job control

Built-in commands:
  cd [dir|-|~/dir]      change the current directory
  pwd [-L|-P]           print the current directory
  echo [args...]        print arguments, decoding backslash escapes
  export NAME[=value]   set or show a variable
  history [!N|!-N]      show the command history or one entry
  jobs                  list background and stopped jobs
  fg [%N]               resume a job in the foreground
  bg [%N]               resume a job in the background
  alias [name-command]  define or list aliases
  unalias <name>        remove an alias
  exit [N]              leave the shell
  help                  show this message

Operators:
  a ; b     run a, then b
  a && b    run b if a succeeded
  a || b    run b if a failed
  a | b     pipe a's output into b
  cmd &     run cmd in the background
  < > >> << redirect input and output; <<DELIM reads lines up to DELIM
  # text    comment

Anything else is run as an external program found through PATH.

Invocation:
  jobshell [-l] [script]   interactive prompt, or run a script
  jobshell -c command...   run one command line
  jobshell -l              run /etc/profile and ~/.profile first
  jobshell --version       print the version
";

#[derive(FromArgs)]
/// Show the list of builtins and operators.
pub struct Help {}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _session: &mut Session,
    ) -> Result<ExitCode> {
        write!(stdout, "{HELP_TEXT}")?;
        Ok(0)
    }
}

/// Factories for every builtin, in lookup order.
pub(crate) fn factories() -> Vec<Box<dyn CommandFactory>> {
    vec![
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Pwd>::default()),
        Box::new(Factory::<Echo>::default()),
        Box::new(Factory::<Export>::default()),
        Box::new(Factory::<ShowHistory>::default()),
        Box::new(Factory::<Jobs>::default()),
        Box::new(Factory::<Fg>::default()),
        Box::new(Factory::<Bg>::default()),
        Box::new(Factory::<Alias>::default()),
        Box::new(Factory::<Unalias>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Help>::default()),
    ]
}
