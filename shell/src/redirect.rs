//! Redirection handling for externally executed commands.
//!
//! A command's tokens are consumed into its argument list plus an ordered
//! list of [`Redirection`]s. Opening them yields at most one input source and
//! one output sink; a later redirection of the same direction replaces an
//! earlier one (the earlier file is still opened or created first).

use crate::error::ShellError;
use crate::lexer::{RedirectKind, Token};
use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Seek, SeekFrom, Write};
use std::path::Path;

/// One redirection operator together with its target word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirection {
    /// `< path`
    Input(String),
    /// `<< DELIM`
    Heredoc(String),
    /// `> path`
    Output(String),
    /// `>> path`
    Append(String),
}

impl Redirection {
    fn new(kind: RedirectKind, target: String) -> Self {
        match kind {
            RedirectKind::Input => Redirection::Input(target),
            RedirectKind::Heredoc => Redirection::Heredoc(target),
            RedirectKind::Output => Redirection::Output(target),
            RedirectKind::Append => Redirection::Append(target),
        }
    }
}

/// Separate arguments from redirections in a single left-to-right pass.
///
/// An operator with no following word is kept as a literal argument.
pub fn split_redirections(tokens: Vec<Token>) -> (Vec<String>, Vec<Redirection>) {
    let mut argv = Vec::new();
    let mut redirections = Vec::new();
    let mut tokens = tokens.into_iter().peekable();

    while let Some(token) = tokens.next() {
        match token {
            Token::Word(word) => argv.push(word),
            Token::Redirect(kind) => match tokens.next_if(|t| matches!(t, Token::Word(_))) {
                Some(Token::Word(target)) => redirections.push(Redirection::new(kind, target)),
                _ => argv.push(kind.as_str().to_string()),
            },
        }
    }
    (argv, redirections)
}

/// Whether a token list contains any redirection operator.
pub fn has_redirection(tokens: &[Token]) -> bool {
    tokens.iter().any(|t| matches!(t, Token::Redirect(_)))
}

/// The streams a command should use in place of the inherited ones.
#[derive(Debug, Default)]
pub struct OpenedRedirections {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
    /// Open failures; the affected direction keeps whatever it had before.
    pub errors: Vec<ShellError>,
}

impl OpenedRedirections {
    /// Open every redirection in order, resolving relative targets against `base`.
    ///
    /// Heredoc text is read from `input`, with the banner and per-line
    /// prompts written to `prompt`.
    pub fn open<R, W>(redirections: &[Redirection], base: &Path, input: &mut R, prompt: &mut W) -> Self
    where
        R: BufRead,
        W: Write,
    {
        let mut opened = OpenedRedirections::default();

        for redirection in redirections {
            match redirection {
                Redirection::Input(path) => {
                    if let Some(file) = opened.record(File::open(base.join(path)), path) {
                        opened.stdin = Some(file);
                    }
                }
                Redirection::Output(path) => {
                    let file = OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(base.join(path));
                    if let Some(file) = opened.record(file, path) {
                        opened.stdout = Some(file);
                    }
                }
                Redirection::Append(path) => {
                    let file = OpenOptions::new()
                        .append(true)
                        .create(true)
                        .open(base.join(path));
                    if let Some(file) = opened.record(file, path) {
                        opened.stdout = Some(file);
                    }
                }
                Redirection::Heredoc(delimiter) => {
                    match capture_heredoc(delimiter, input, prompt) {
                        Ok(buffer) => opened.stdin = Some(buffer),
                        Err(e) => {
                            warn!("heredoc capture for {delimiter:?} failed: {e}");
                            opened.errors.push(ShellError::Heredoc(e));
                        }
                    }
                }
            }
        }
        opened
    }

    fn record(&mut self, result: io::Result<File>, path: &str) -> Option<File> {
        match result {
            Ok(file) => Some(file),
            Err(source) => {
                warn!("redirection target {path:?} failed to open: {source}");
                self.errors.push(ShellError::Redirect {
                    path: path.to_string(),
                    source,
                });
                None
            }
        }
    }
}

/// Read lines from `input` until one equals `delimiter` or input ends.
///
/// Each captured line is stored with a trailing newline in an anonymous
/// temporary file, which is returned rewound to its start.
pub fn capture_heredoc<R, W>(delimiter: &str, input: &mut R, prompt: &mut W) -> io::Result<File>
where
    R: BufRead,
    W: Write,
{
    let mut buffer = tempfile::tempfile()?;
    writeln!(prompt, "> enter lines, end with '{delimiter}'")?;

    let mut captured = 0usize;
    loop {
        write!(prompt, "> ")?;
        prompt.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.strip_suffix('\n').unwrap_or(&line);
        if line == delimiter {
            break;
        }
        writeln!(buffer, "{line}")?;
        captured += 1;
    }

    buffer.seek(SeekFrom::Start(0))?;
    debug!("captured {captured} heredoc line(s) for {delimiter:?}");
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::split_into_tokens;
    use pretty_assertions::assert_eq;
    use std::io::{Cursor, Read};

    fn read_all(mut file: File) -> String {
        let mut s = String::new();
        file.read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn split_removes_operators_and_targets() {
        let (argv, redirections) = split_redirections(split_into_tokens("sort < in.txt -r >> out.txt"));
        assert_eq!(argv, vec!["sort", "-r"]);
        assert_eq!(
            redirections,
            vec![
                Redirection::Input("in.txt".into()),
                Redirection::Append("out.txt".into()),
            ]
        );
    }

    #[test]
    fn dangling_operator_stays_an_argument() {
        let (argv, redirections) = split_redirections(split_into_tokens("ls >"));
        assert_eq!(argv, vec!["ls", ">"]);
        assert!(redirections.is_empty());

        let (argv, redirections) = split_redirections(split_into_tokens("ls > >"));
        assert_eq!(argv, vec!["ls", ">", ">"]);
        assert!(redirections.is_empty());
    }

    #[test]
    fn detects_redirection_tokens() {
        assert!(has_redirection(&split_into_tokens("cd > x")));
        assert!(!has_redirection(&split_into_tokens("echo '>'")));
    }

    #[test]
    fn last_output_wins_but_every_target_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        let redirections = vec![
            Redirection::Output(first.to_string_lossy().into_owned()),
            Redirection::Output(second.to_string_lossy().into_owned()),
        ];

        let mut opened =
            OpenedRedirections::open(&redirections, dir.path(), &mut Cursor::new(""), &mut Vec::new());
        assert!(opened.errors.is_empty());
        writeln!(opened.stdout.take().unwrap(), "data").unwrap();

        assert_eq!(std::fs::read_to_string(&first).unwrap(), "");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "data\n");
    }

    #[test]
    fn append_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        std::fs::write(&path, "one\n").unwrap();

        let redirections = vec![Redirection::Append("log".into())];
        let mut opened =
            OpenedRedirections::open(&redirections, dir.path(), &mut Cursor::new(""), &mut Vec::new());
        writeln!(opened.stdout.take().unwrap(), "two").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn missing_input_is_reported_and_stdin_left_alone() {
        let redirections = vec![Redirection::Input("/definitely/not/here".into())];
        let opened =
            OpenedRedirections::open(&redirections, Path::new("/"), &mut Cursor::new(""), &mut Vec::new());
        assert!(opened.stdin.is_none());
        assert_eq!(opened.errors.len(), 1);
        assert!(opened.errors[0].to_string().starts_with("/definitely/not/here:"));
    }

    #[test]
    fn heredoc_captures_until_delimiter() {
        let mut input = Cursor::new("first line\n  second\nEOF\nnot captured\n");
        let mut prompt = Vec::new();
        let buffer = capture_heredoc("EOF", &mut input, &mut prompt).unwrap();

        assert_eq!(read_all(buffer), "first line\n  second\n");
        let banner = String::from_utf8(prompt).unwrap();
        assert!(banner.starts_with("> enter lines, end with 'EOF'\n"));
    }

    #[test]
    fn heredoc_delimiter_must_match_exactly() {
        let mut input = Cursor::new("EOF \n EOF\nEOF\n");
        let buffer = capture_heredoc("EOF", &mut input, &mut Vec::new()).unwrap();
        assert_eq!(read_all(buffer), "EOF \n EOF\n");
    }

    #[test]
    fn heredoc_stops_at_end_of_input() {
        let mut input = Cursor::new("only\n");
        let buffer = capture_heredoc("END", &mut input, &mut Vec::new()).unwrap();
        assert_eq!(read_all(buffer), "only\n");
    }
}
