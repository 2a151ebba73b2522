//! Launching external pipelines and moving jobs between foreground and background.
//!
//! Every stage is prepared in the shell first: tokenized, expanded, its
//! redirections opened and any heredoc captured. Only then are the stages
//! spawned, left to right, into one process group whose leader is the first
//! stage that starts successfully.

use crate::error::ShellError;
use crate::expand::{expand_command, expand_tildes};
use crate::external::resolve_program;
use crate::interpreter::Session;
use crate::job_control::{self, GroupOutcome};
use crate::jobs::JobState;
use crate::lexer::split_into_tokens;
use crate::redirect::{OpenedRedirections, split_redirections};
use log::{debug, info, warn};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::{Pid, pipe};
use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Status of a stage whose program could not be started.
pub const NOT_FOUND_STATUS: i32 = 127;

/// A stage with its program resolved and its redirections open.
#[derive(Debug)]
struct PreparedStage {
    /// `None` when the stage cannot run; its redirections were still opened.
    program: Option<PathBuf>,
    argv: Vec<String>,
    stdin: Option<File>,
    stdout: Option<File>,
}

fn report(error: &ShellError) {
    eprintln!("jobshell: {error}");
}

fn prepare_stage(text: &str, session: &Session) -> PreparedStage {
    let tokens = expand_command(split_into_tokens(text), session.config.aliases(), &session.env);
    let tokens = expand_tildes(tokens, &session.env);
    let (argv, redirections) = split_redirections(tokens);

    let opened = OpenedRedirections::open(
        &redirections,
        &session.env.current_dir,
        &mut io::stdin().lock(),
        &mut io::stderr(),
    );
    opened.errors.iter().for_each(report);

    let program = match argv.first() {
        Some(name) => match resolve_program(name, &session.env) {
            Ok(path) => Some(path),
            Err(e) => {
                report(&e);
                None
            }
        },
        None => None,
    };

    PreparedStage {
        program,
        argv,
        stdin: opened.stdin,
        stdout: opened.stdout,
    }
}

/// Run `stages` as one pipeline and return its status.
///
/// `text` is the pipeline as the user typed it and is what `jobs` shows.
/// A background pipeline is registered as a running job and 0 is returned at
/// once. A foreground pipeline gets the terminal until every stage exits or
/// one of them stops; a stopped pipeline becomes a job and yields 0.
pub fn run_pipeline(session: &mut Session, stages: &[String], text: &str, background: bool) -> i32 {
    launch(session, stages, text, background, pipe)
}

/// [`run_pipeline`] with the inter-stage pipe constructor supplied by the caller.
fn launch<P>(
    session: &mut Session,
    stages: &[String],
    text: &str,
    background: bool,
    mut open_pipe: P,
) -> i32
where
    P: FnMut() -> nix::Result<(OwnedFd, OwnedFd)>,
{
    let prepared: Vec<PreparedStage> = stages
        .iter()
        .map(|stage| prepare_stage(stage, session))
        .collect();

    let count = prepared.len();
    let tty = if background {
        None
    } else {
        session.terminal.raw_fd()
    };

    let mut pgid: Option<Pid> = None;
    let mut last_pid: Option<Pid> = None;
    let mut last_failed: Option<i32> = None;
    let mut upstream: Option<OwnedFd> = None;
    let mut aborted = false;

    for (i, stage) in prepared.into_iter().enumerate() {
        let is_last = i + 1 == count;
        let (next_read, pipe_write) = if is_last {
            (None, None)
        } else {
            match open_pipe() {
                Ok((read, write)) => (Some(read), Some(write)),
                Err(e) => {
                    // Later stages would read the terminal instead of this
                    // stage's output; stop here.
                    report(&ShellError::Pipe(e.into()));
                    aborted = true;
                    break;
                }
            }
        };
        let stage_input = upstream.take();
        upstream = next_read;

        let Some(program) = stage.program else {
            if is_last {
                last_failed = Some(if stage.argv.is_empty() { 0 } else { NOT_FOUND_STATUS });
            }
            continue;
        };

        let mut command = Command::new(&program);
        command
            .arg0(&stage.argv[0])
            .args(&stage.argv[1..])
            .env_clear()
            .envs(&session.env.vars)
            .current_dir(&session.env.current_dir)
            .process_group(pgid.map_or(0, Pid::as_raw));

        match (stage.stdin, stage_input) {
            (Some(file), _) => command.stdin(Stdio::from(file)),
            (None, Some(fd)) => command.stdin(Stdio::from(fd)),
            (None, None) => command.stdin(Stdio::inherit()),
        };
        match (stage.stdout, pipe_write) {
            (Some(file), _) => command.stdout(Stdio::from(file)),
            (None, Some(fd)) => command.stdout(Stdio::from(fd)),
            (None, None) => command.stdout(Stdio::inherit()),
        };

        // SAFETY: `prepare_child` only makes async-signal-safe calls.
        unsafe {
            command.pre_exec(move || job_control::prepare_child(tty));
        }

        match command.spawn() {
            Ok(child) => {
                let pid = Pid::from_raw(child.id() as i32);
                debug!("stage {i} ({}) started as pid {pid}", stage.argv[0]);
                pgid.get_or_insert(pid);
                if is_last {
                    last_pid = Some(pid);
                }
            }
            Err(source) => {
                report(&ShellError::Spawn {
                    name: stage.argv[0].clone(),
                    source,
                });
                if is_last {
                    last_failed = Some(NOT_FOUND_STATUS);
                }
            }
        }
        // `command` still holds this stage's pipe ends; drop them now so
        // the neighbours see end-of-file when their peer exits.
        drop(command);
    }
    // Stages already started must not block on a pipe nobody reads.
    drop(upstream);
    if aborted {
        last_failed = Some(1);
    }

    let Some(pgid) = pgid else {
        // A child may have taken the terminal in `pre_exec` and then failed
        // to exec.
        if tty.is_some() {
            session.terminal.reclaim();
        }
        return last_failed.unwrap_or(NOT_FOUND_STATUS);
    };
    info!("launched pgid {pgid}: {count} stage(s), background={background}: {text}");

    if background {
        let id = session.jobs.add(pgid, text, JobState::Running);
        println!("[{id}] {pgid}");
        return if aborted { 1 } else { 0 };
    }

    session.terminal.give_to(pgid);
    let outcome = job_control::wait_for_group(pgid, last_pid);
    session.terminal.reclaim();

    match outcome {
        GroupOutcome::Exited(status) => last_failed.unwrap_or(status),
        GroupOutcome::Stopped => {
            session.jobs.add(pgid, text, JobState::Stopped);
            println!();
            0
        }
    }
}

/// Send SIGCONT to a job's group and mark it running.
fn continue_group(session: &mut Session, pgid: Pid) -> io::Result<()> {
    killpg(pgid, Signal::SIGCONT).map_err(io::Error::from)?;
    session.jobs.set_state(pgid, JobState::Running);
    Ok(())
}

/// Resume a job in the foreground and wait for it like a fresh pipeline.
///
/// The job leaves the table when it exits; if it stops again it stays with
/// state Stopped and 0 is returned.
pub fn resume_foreground(session: &mut Session, pgid: Pid) -> io::Result<i32> {
    session.terminal.give_to(pgid);
    if let Err(e) = continue_group(session, pgid) {
        session.terminal.reclaim();
        warn!("could not continue pgid {pgid}: {e}");
        return Err(e);
    }

    let outcome = job_control::wait_for_group(pgid, None);
    session.terminal.reclaim();

    Ok(match outcome {
        GroupOutcome::Exited(status) => {
            session.jobs.remove(pgid);
            status
        }
        GroupOutcome::Stopped => {
            session.jobs.set_state(pgid, JobState::Stopped);
            println!();
            0
        }
    })
}

/// Resume a job in the background; the shell keeps the terminal.
pub fn resume_background(session: &mut Session, pgid: Pid) -> io::Result<()> {
    continue_group(session, pgid)
}
