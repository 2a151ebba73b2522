//! An interactive command shell with POSIX job control.
//!
//! Input lines go through a small pipeline of stages: [`lexer`] splits a
//! command into words and redirection operators, [`expand`] applies aliases,
//! escapes, variables and tildes, [`redirect`] opens files and captures
//! heredocs, and [`parser`] splits lines into statements, `&&`/`||` chains and
//! `|` pipelines. Pipelines run as process groups ([`pipeline`],
//! [`job_control`]); background and stopped groups are tracked in the
//! [`jobs`] table.
//!
//! The main entry point is [`Interpreter`], which owns a [`Session`] and
//! evaluates lines against it, either one at a time, from a script, or
//! interactively.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod expand;
mod external;
pub mod history;
mod interpreter;
pub mod job_control;
pub mod jobs;
pub mod lexer;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod redirect;

/// The shell and the state it runs against.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::{Interpreter, Session, join_continued};
