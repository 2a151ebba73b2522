use crate::builtin;
use crate::command::{CommandFactory, ExitCode};
use crate::config::{CONTINUATION_PROMPT, ConfigStore};
use crate::env::Environment;
use crate::expand::{expand_command, expand_tilde};
use crate::history::History;
use crate::job_control::Terminal;
use crate::jobs::JobTable;
use crate::lexer::split_into_tokens;
use crate::parser::{self, Chain, Segment};
use crate::pipeline;
use crate::redirect::{has_redirection, split_redirections};
use anyhow::Context;
use log::{debug, info, warn};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Profile read by login shells before the user's own.
const SYSTEM_PROFILE: &str = "/etc/profile";

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports commands defined in this crate, see [`builtin`].
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// Everything a running shell owns: variables and directories, jobs, the
/// terminal, configuration and history.
#[derive(Debug)]
pub struct Session {
    pub env: Environment,
    pub jobs: JobTable,
    pub terminal: Terminal,
    pub config: ConfigStore,
    pub history: History,
}

impl Session {
    /// A session over the process environment, with configuration and
    /// history under `$HOME`.
    pub fn new(terminal: Terminal) -> Self {
        let mut env = Environment::new();
        if env.get_var("TERM").is_none() {
            env.set_var("TERM", "xterm");
        }
        let home = env.get_var("HOME").map(PathBuf::from);

        let mut session = Self {
            config: ConfigStore::new(home.as_deref()),
            history: home
                .as_deref()
                .map_or_else(History::in_memory, History::load),
            jobs: JobTable::new(),
            terminal,
            env,
        };
        session.reload_config();
        session.enter_start_dir();
        session
    }

    /// A session with no terminal, no config files and in-memory history.
    pub fn detached() -> Self {
        Self {
            env: Environment::new(),
            jobs: JobTable::new(),
            terminal: Terminal::detached(),
            config: ConfigStore::with_paths(None, None),
            history: History::in_memory(),
        }
    }

    /// Reload configuration files that changed on disk, reporting parse errors.
    pub fn reload_config(&mut self) {
        if let Some(errors) = self.config.reload_if_changed() {
            for e in errors {
                eprintln!("jobshell: {e}");
            }
        }
    }

    /// Run `/etc/profile` and `$HOME/.profile` with `sh`, in that order.
    ///
    /// Unreadable files are skipped. Profiles run in a child, so their
    /// variable assignments do not reach this session.
    pub fn run_login_profiles(&self) {
        let mut profiles = vec![PathBuf::from(SYSTEM_PROFILE)];
        if let Some(home) = self.env.get_var("HOME") {
            profiles.push(Path::new(home).join(".profile"));
        }
        for profile in profiles.iter().filter(|p| fs::File::open(p).is_ok()) {
            self.run_profile(profile);
        }
    }

    fn run_profile(&self, profile: &Path) {
        info!("running login profile {}", profile.display());
        let status = Command::new("sh")
            .arg(profile)
            .env_clear()
            .envs(&self.env.vars)
            .current_dir(&self.env.current_dir)
            .status();
        match status {
            Ok(status) if !status.success() => {
                warn!("login profile {} exited with {status}", profile.display())
            }
            Ok(_) => {}
            Err(e) => warn!("cannot run login profile {}: {e}", profile.display()),
        }
    }

    fn enter_start_dir(&mut self) {
        let Some(dir) = self.config.config().start_dir.as_deref() else {
            return;
        };
        let dir = self
            .env
            .current_dir
            .join(expand_tilde(dir, &self.env.home()));
        match std::env::set_current_dir(&dir) {
            Ok(()) => {
                info!("start directory {}", dir.display());
                let old = std::mem::replace(&mut self.env.current_dir, dir);
                self.env.previous_dir = Some(old);
            }
            Err(e) => eprintln!("jobshell: start_dir {}: {e}", dir.display()),
        }
    }
}

/// Append one physical line to a logical line being assembled.
///
/// Trailing spaces and tabs are trimmed first. Returns `true` when the line
/// ended with a backslash, which is removed, and more input is needed.
pub fn join_continued(logical: &mut String, line: &str) -> bool {
    let line = line.trim_end_matches([' ', '\t']);
    match line.strip_suffix('\\') {
        Some(head) => {
            logical.push_str(head);
            true
        }
        None => {
            logical.push_str(line);
            false
        }
    }
}

/// The shell: a [`Session`] plus the builtins it can run in-process.
///
/// Lines are split into statements, each statement into a chain of
/// `&&`/`||` segments, and each segment into pipeline stages. A segment with
/// one stage and no redirection runs as a builtin when one matches; anything
/// else is launched through [`pipeline::run_pipeline`].
///
/// Example
/// ```no_run
/// use jobshell::{Interpreter, Session};
/// let mut sh = Interpreter::new(Session::detached());
/// let code = sh.execute_line("echo hello && true");
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    session: Session,
    commands: Vec<Box<dyn CommandFactory>>,
    last_status: ExitCode,
    last_line: Option<String>,
}

impl Interpreter {
    /// Create an interpreter with every builtin available.
    pub fn new(session: Session) -> Self {
        Self::with_commands(session, builtin::factories())
    }

    /// Create an interpreter with a custom set of command factories.
    pub(crate) fn with_commands(session: Session, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            session,
            commands,
            last_status: 0,
            last_line: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// The status the shell should exit with: the one given to `exit`, else
    /// that of the last evaluated segment.
    pub fn exit_status(&self) -> ExitCode {
        self.session.env.exit_code.unwrap_or(self.last_status)
    }

    /// Evaluate one logical line and return the status of its last segment.
    pub fn execute_line(&mut self, line: &str) -> ExitCode {
        for statement in parser::split_statements(line) {
            if self.session.env.should_exit() {
                break;
            }
            if let Some(chain) = parser::parse_chain(statement) {
                self.last_status = self.run_chain(&chain);
            }
        }
        self.last_status
    }

    fn run_chain(&mut self, chain: &Chain) -> ExitCode {
        let mut status = self.last_status;
        let mut previous = None;
        for segment in &chain.segments {
            if self.session.env.should_exit() {
                break;
            }
            let skip = previous.is_some_and(|c: parser::Connector| !c.allows(status));
            previous = segment.connector;
            if skip {
                debug!("skipping segment: {}", segment.text);
                continue;
            }
            if segment.stages.is_empty() {
                continue;
            }
            status = self.run_segment(segment, chain.background);
        }
        status
    }

    fn run_segment(&mut self, segment: &Segment, background: bool) -> ExitCode {
        match segment.stages.as_slice() {
            [stage] => match self.run_builtin(stage) {
                Some(status) => status,
                None => pipeline::run_pipeline(
                    &mut self.session,
                    &segment.stages,
                    &segment.text,
                    background,
                ),
            },
            stages => {
                pipeline::run_pipeline(&mut self.session, stages, &segment.text, background)
            }
        }
    }

    /// Run `stage` in-process if it names a builtin and has no redirection.
    fn run_builtin(&mut self, stage: &str) -> Option<ExitCode> {
        let tokens = expand_command(
            split_into_tokens(stage),
            self.session.config.aliases(),
            &self.session.env,
        );
        if has_redirection(&tokens) {
            return None;
        }
        let (argv, _) = split_redirections(tokens);
        let (name, args) = argv.split_first()?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = self.commands.iter().find_map(|f| f.try_create(name, &args))?;

        debug!("builtin {name}");
        let status = command
            .execute(&mut io::stdout(), &mut io::stderr(), &mut self.session)
            .unwrap_or_else(|e| {
                eprintln!("jobshell: {name}: {e:#}");
                1
            });
        Some(status)
    }

    /// Record an accepted line in the editor and the history log.
    fn remember(&mut self, editor: &mut DefaultEditor, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if let Err(e) = editor.add_history_entry(line) {
            debug!("line editor refused history entry: {e}");
        }
        if self.session.config.config().history {
            if let Err(e) = self.session.history.record(line) {
                warn!("could not append to history: {e}");
            }
        }
        self.last_line = Some(line.to_string());
    }

    /// Read prompts until a logical line is complete.
    fn read_logical_line(
        &self,
        editor: &mut DefaultEditor,
        prompt: &str,
    ) -> rustyline::Result<String> {
        let mut logical = String::new();
        let mut prompt = prompt;
        while join_continued(&mut logical, &editor.readline(prompt)?) {
            prompt = CONTINUATION_PROMPT;
        }
        Ok(logical)
    }

    /// Interactive read-eval-print loop. Returns the status to exit with.
    pub fn repl(&mut self) -> rustyline::Result<ExitCode> {
        let mut editor = DefaultEditor::new()?;
        for entry in self.session.history.entries() {
            // Seeding only affects arrow-key recall.
            let _ = editor.add_history_entry(entry.as_str());
        }
        self.last_line = self.session.history.entries().last().cloned();

        while !self.session.env.should_exit() {
            self.session.reload_config();
            let prompt = self.session.config.config().render_prompt(&self.session.env);

            let line = match self.read_logical_line(&mut editor, &prompt) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err),
            };

            if line.trim() == "!!" {
                match self.last_line.clone() {
                    Some(previous) => {
                        println!("{previous}");
                        self.execute_line(&previous);
                    }
                    None => eprintln!("jobshell: no history"),
                }
                continue;
            }

            self.remember(&mut editor, &line);
            self.execute_line(&line);
        }
        Ok(self.exit_status())
    }

    /// Evaluate a script file, one logical line at a time.
    pub fn run_script(&mut self, path: &Path) -> anyhow::Result<ExitCode> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read script {}", path.display()))?;
        info!("running script {}", path.display());

        let mut logical = String::new();
        for line in content.lines() {
            if join_continued(&mut logical, line) {
                continue;
            }
            self.session.reload_config();
            self.execute_line(&std::mem::take(&mut logical));
            if self.session.env.should_exit() {
                return Ok(self.exit_status());
            }
        }
        if !logical.is_empty() {
            self.execute_line(&logical);
        }
        Ok(self.exit_status())
    }
}
