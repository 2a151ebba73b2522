use anyhow::Context;
use argh::FromArgs;
use jobshell::job_control::{Terminal, ignore_job_control_signals};
use jobshell::logging::{self, LOG_LEVEL_VAR};
use jobshell::{Interpreter, Session};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(FromArgs)]
/// An interactive shell with job control.
///
/// Without arguments an interactive prompt is started.
struct Args {
    #[argh(switch, short = 'c')]
    /// evaluate the remaining arguments, joined by spaces, as one command line
    command: bool,

    #[argh(switch, short = 'l')]
    /// run /etc/profile and ~/.profile before anything else
    login: bool,

    #[argh(switch, short = 'v')]
    /// print version information and exit
    version: bool,

    #[argh(positional, greedy)]
    /// a script to run, or the command words when `-c` is given
    rest: Vec<String>,
}

fn start_session() -> anyhow::Result<Session> {
    ignore_job_control_signals().context("cannot ignore job control signals")?;
    Ok(Session::new(Terminal::acquire()))
}

fn run(args: Args) -> anyhow::Result<i32> {
    let session = start_session()?;
    if args.login {
        session.run_login_profiles();
    }
    let mut shell = Interpreter::new(session);

    if args.command {
        shell.execute_line(&args.rest.join(" "));
        return Ok(shell.exit_status());
    }
    if let Some(script) = args.rest.first() {
        return shell.run_script(Path::new(script));
    }
    shell.repl().context("line editor failed")
}

/// `-h`, `--help` or `-help` as the first argument prints the builtin help.
fn wants_help() -> bool {
    std::env::args_os()
        .nth(1)
        .is_some_and(|arg| matches!(arg.to_str(), Some("-h" | "--help" | "-help")))
}

fn main() -> ExitCode {
    if wants_help() {
        let status = Interpreter::new(Session::detached()).execute_line("help");
        return ExitCode::from((status & 0xff) as u8);
    }
    let args: Args = argh::from_env();
    if args.version {
        println!("jobshell {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let home = std::env::var_os("HOME").map(PathBuf::from);
    let level = std::env::var(LOG_LEVEL_VAR).ok();
    logging::init(home.as_deref(), level.as_deref());

    let status = run(args).unwrap_or_else(|e| {
        eprintln!("jobshell: {e:#}");
        1
    });
    ExitCode::from((status & 0xff) as u8)
}
