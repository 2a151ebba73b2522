//! Lexical analysis of a single command into argument and redirection tokens.
//!
//! The lexer is deliberately lenient: an unterminated quote swallows the rest
//! of the line, and tokens past [`MAX_TOKENS`] are dropped without an error.

/// Upper bound on tokens produced for one command; the rest is discarded.
pub const MAX_TOKENS: usize = 64;

/// A redirection operator recognized outside quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `<`: read standard input from a file.
    Input,
    /// `<<`: read standard input from inline text ended by a delimiter line.
    Heredoc,
    /// `>`: write standard output to a file, truncating it.
    Output,
    /// `>>`: append standard output to a file.
    Append,
}

impl RedirectKind {
    /// The operator's shell syntax.
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectKind::Input => "<",
            RedirectKind::Heredoc => "<<",
            RedirectKind::Output => ">",
            RedirectKind::Append => ">>",
        }
    }

    /// Recognize an operator spelled out as a whole word.
    pub fn from_operator(word: &str) -> Option<Self> {
        match word {
            "<" => Some(RedirectKind::Input),
            "<<" => Some(RedirectKind::Heredoc),
            ">" => Some(RedirectKind::Output),
            ">>" => Some(RedirectKind::Append),
            _ => None,
        }
    }
}

/// A token of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// An argument. Backslash escapes are still present; see [`crate::expand`].
    Word(String),
    /// A redirection operator. Its target is the following word.
    Redirect(RedirectKind),
}

impl Token {
    /// Convenience constructor used throughout the tests and the expander.
    pub fn word(s: impl Into<String>) -> Self {
        Token::Word(s.into())
    }

    /// Classify a bare word, turning operator spellings into operator tokens.
    pub fn classify(word: &str) -> Self {
        match RedirectKind::from_operator(word) {
            Some(kind) => Token::Redirect(kind),
            None => Token::Word(word.to_string()),
        }
    }

    /// The textual form of the token.
    pub fn as_str(&self) -> &str {
        match self {
            Token::Word(w) => w,
            Token::Redirect(kind) => kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Unquoted,
    Quoted(char),
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
    out: Vec<Token>,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Unquoted,
            buffer: String::new(),
            out: Vec::new(),
        }
    }

    fn make_tokens(mut self) -> Vec<Token> {
        while self.out.len() < MAX_TOKENS {
            let Some(ch) = self.read_char() else {
                break;
            };
            let keep_going = match self.state {
                LexingState::Unquoted => self.handle_unquoted(ch),
                LexingState::Quoted(quote) => {
                    self.handle_quoted(ch, quote);
                    true
                }
            };
            if !keep_going {
                break;
            }
        }

        // An open quote at end of input simply closes here.
        self.flush_word();
        self.out.truncate(MAX_TOKENS);
        self.out
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    /// Returns `false` when the rest of the input is a comment.
    fn handle_unquoted(&mut self, ch: char) -> bool {
        match ch {
            '#' => return false,
            '\\' => self.copy_escape(),
            '<' | '>' => {
                self.flush_word();
                let kind = if self.peek_char() == Some(ch) {
                    self.read_char();
                    if ch == '<' {
                        RedirectKind::Heredoc
                    } else {
                        RedirectKind::Append
                    }
                } else if ch == '<' {
                    RedirectKind::Input
                } else {
                    RedirectKind::Output
                };
                self.out.push(Token::Redirect(kind));
            }
            '\'' | '"' => self.state = LexingState::Quoted(ch),
            ' ' | '\t' => self.flush_word(),
            c => self.buffer.push(c),
        }
        true
    }

    fn handle_quoted(&mut self, ch: char, quote: char) {
        match ch {
            '\\' => self.copy_escape(),
            c if c == quote => self.state = LexingState::Unquoted,
            c => self.buffer.push(c),
        }
    }

    /// Keep `\x` verbatim; decoding happens in the expander.
    fn copy_escape(&mut self) {
        self.buffer.push('\\');
        if let Some(next) = self.read_char() {
            self.buffer.push(next);
        }
    }

    fn flush_word(&mut self) {
        if !self.buffer.is_empty() {
            self.out.push(Token::Word(std::mem::take(&mut self.buffer)));
        }
    }
}

/// Split one command into tokens.
///
/// Quotes group text (including spaces and operator characters) into the
/// current word and are removed. A `#` outside quotes ends the command.
pub fn split_into_tokens(line: &str) -> Vec<Token> {
    LexingFSM::new(line).make_tokens()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words(items: &[&str]) -> Vec<Token> {
        items.iter().map(|w| Token::classify(w)).collect()
    }

    #[test]
    fn splits_on_spaces_and_collapses_runs() {
        assert_eq!(split_into_tokens("ls   -la  /tmp"), words(&["ls", "-la", "/tmp"]));
    }

    #[test]
    fn quotes_group_words_and_are_removed() {
        assert_eq!(
            split_into_tokens("echo 'hello world' \"a | b > c\""),
            vec![
                Token::word("echo"),
                Token::word("hello world"),
                Token::word("a | b > c"),
            ]
        );
    }

    #[test]
    fn quotes_join_adjacent_text() {
        assert_eq!(split_into_tokens("a\"b c\"d"), vec![Token::word("ab cd")]);
    }

    #[test]
    fn unterminated_quote_runs_to_end_of_line() {
        assert_eq!(
            split_into_tokens("echo 'never closed # still text"),
            vec![Token::word("echo"), Token::word("never closed # still text")]
        );
    }

    #[test]
    fn comment_truncates_outside_quotes() {
        assert_eq!(split_into_tokens("echo hi # trailing"), words(&["echo", "hi"]));
        assert_eq!(split_into_tokens("echo a#b"), words(&["echo", "a"]));
    }

    #[test]
    fn backslash_pairs_are_copied_verbatim() {
        assert_eq!(
            split_into_tokens(r"echo a\ b \# c\\n"),
            vec![
                Token::word("echo"),
                Token::word(r"a\ b"),
                Token::word(r"\#"),
                Token::word(r"c\\n"),
            ]
        );
    }

    #[test]
    fn operators_flush_current_word() {
        assert_eq!(
            split_into_tokens("cat<in>>out"),
            vec![
                Token::word("cat"),
                Token::Redirect(RedirectKind::Input),
                Token::word("in"),
                Token::Redirect(RedirectKind::Append),
                Token::word("out"),
            ]
        );
        assert_eq!(
            split_into_tokens("cat <<EOF > f"),
            vec![
                Token::word("cat"),
                Token::Redirect(RedirectKind::Heredoc),
                Token::word("EOF"),
                Token::Redirect(RedirectKind::Output),
                Token::word("f"),
            ]
        );
    }

    #[test]
    fn quoted_operator_is_a_plain_word() {
        assert_eq!(split_into_tokens("echo '>'"), vec![Token::word("echo"), Token::word(">")]);
    }

    #[test]
    fn token_overflow_is_silently_truncated() {
        let line = (0..100).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let tokens = split_into_tokens(&line);
        assert_eq!(tokens.len(), MAX_TOKENS);
        assert_eq!(tokens.last(), Some(&Token::word("63")));
    }

    #[test]
    fn empty_and_blank_lines_yield_nothing() {
        assert!(split_into_tokens("").is_empty());
        assert!(split_into_tokens("    ").is_empty());
        assert!(split_into_tokens("# only a comment").is_empty());
    }
}
