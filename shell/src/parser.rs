//! Line-level splitting: statements, conditional chains and pipeline stages.
//!
//! Everything here works on raw text. Word-level handling (quote removal,
//! escapes, redirections) is left to [`crate::lexer`]; this module only needs
//! to know which characters are outside quotes so that `;`, `#`, `&&`, `||`,
//! `|` and a trailing `&` inside quotes are left alone.

/// Connector between a chain segment and the one after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// `&&`: the next segment runs only if this one exited with status 0.
    And,
    /// `||`: the next segment runs only if this one exited non-zero.
    Or,
}

impl Connector {
    /// Whether the segment after this connector runs given the preceding status.
    pub fn allows(self, status: i32) -> bool {
        match self {
            Connector::And => status == 0,
            Connector::Or => status != 0,
        }
    }
}

/// One element of a conditional chain: a pipeline plus its trailing connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The segment as typed, trimmed. Used as the job's display text.
    pub text: String,
    /// Pipeline stages split on unquoted `|`, trimmed, empty stages dropped.
    pub stages: Vec<String>,
    /// `None` for the final segment.
    pub connector: Option<Connector>,
}

/// A statement split into conditional segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub segments: Vec<Segment>,
    /// Set when the statement ended with a single unquoted `&`.
    pub background: bool,
}

/// Marks which bytes of a string are outside quotes and not escaped.
struct QuoteMap<'a> {
    text: &'a str,
    active: Vec<bool>,
}

impl<'a> QuoteMap<'a> {
    fn new(text: &'a str) -> Self {
        let mut active = vec![false; text.len()];
        let mut quote: Option<char> = None;
        let mut escaped = false;

        for (i, c) in text.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match (quote, c) {
                (_, '\\') => escaped = true,
                (None, '\'' | '"') => quote = Some(c),
                (Some(q), c) if c == q => quote = None,
                (None, _) => active[i] = true,
                (Some(_), _) => {}
            }
        }
        Self { text, active }
    }

    /// Byte offset of the first unquoted occurrence of `needle` at or after `from`.
    fn find(&self, from: usize, needle: &str) -> Option<usize> {
        let mut start = from;
        while let Some(rel) = self.text.get(start..)?.find(needle) {
            let at = start + rel;
            if self.active[at..at + needle.len()].iter().all(|&a| a) {
                return Some(at);
            }
            start = at + 1;
        }
        None
    }

    /// Split on every unquoted occurrence of any of `separators`.
    fn split_any(&self, separators: &[char]) -> Vec<&'a str> {
        let mut parts = Vec::new();
        let mut start = 0;
        for (i, c) in self.text.char_indices() {
            if self.active[i] && separators.contains(&c) {
                parts.push(&self.text[start..i]);
                start = i + c.len_utf8();
            }
        }
        parts.push(&self.text[start..]);
        parts
    }
}

/// Split a logical line into statements on unquoted `;` and newlines.
///
/// Statements are trimmed and empty ones dropped.
pub fn split_statements(line: &str) -> Vec<&str> {
    QuoteMap::new(line)
        .split_any(&[';', '\n'])
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Cut a statement at its first unquoted `#`.
pub fn strip_comment(statement: &str) -> &str {
    match QuoteMap::new(statement).find(0, "#") {
        Some(at) => &statement[..at],
        None => statement,
    }
}

/// Parse one statement into a conditional chain.
///
/// Returns `None` for a statement that is empty once its comment is removed.
pub fn parse_chain(statement: &str) -> Option<Chain> {
    let mut body = strip_comment(statement).trim();
    if body.is_empty() {
        return None;
    }

    let mut background = false;
    if let Some(rest) = body.strip_suffix('&') {
        let map = QuoteMap::new(body);
        let last = body.len() - 1;
        if map.active[last] && !rest.ends_with('&') {
            background = true;
            body = rest.trim_end();
        }
    }

    let map = QuoteMap::new(body);
    let mut segments = Vec::new();
    let mut pos = 0;
    loop {
        let and = map.find(pos, "&&");
        let or = map.find(pos, "||");
        let split = match (and, or) {
            (Some(a), Some(o)) if a <= o => Some((a, Connector::And)),
            (Some(a), None) => Some((a, Connector::And)),
            (_, Some(o)) => Some((o, Connector::Or)),
            (None, None) => None,
        };
        match split {
            Some((at, connector)) => {
                segments.push(segment(&body[pos..at], Some(connector)));
                pos = at + 2;
            }
            None => {
                segments.push(segment(&body[pos..], None));
                break;
            }
        }
    }

    Some(Chain {
        segments,
        background,
    })
}

fn segment(text: &str, connector: Option<Connector>) -> Segment {
    let text = text.trim();
    let stages = QuoteMap::new(text)
        .split_any(&['|'])
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    Segment {
        text: text.to_string(),
        stages,
        connector,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stages(chain: &Chain) -> Vec<Vec<&str>> {
        chain
            .segments
            .iter()
            .map(|s| s.stages.iter().map(String::as_str).collect())
            .collect()
    }

    fn connectors(chain: &Chain) -> Vec<Option<Connector>> {
        chain.segments.iter().map(|s| s.connector).collect()
    }

    #[test]
    fn statements_split_on_semicolon_and_newline() {
        assert_eq!(
            split_statements("echo a; echo b\n ls ;; "),
            vec!["echo a", "echo b", "ls"]
        );
    }

    #[test]
    fn quoted_separators_are_kept() {
        assert_eq!(split_statements("echo 'a;b'; echo \"c;d\""), vec!["echo 'a;b'", "echo \"c;d\""]);
        assert_eq!(split_statements(r"echo a\;b"), vec![r"echo a\;b"]);
    }

    #[test]
    fn comment_is_stripped_outside_quotes() {
        assert_eq!(strip_comment("ls # list"), "ls ");
        assert_eq!(strip_comment("echo '#not' # yes"), "echo '#not' ");
        assert_eq!(strip_comment(r"echo \#x"), r"echo \#x");
        assert_eq!(parse_chain("   # just a comment"), None);
    }

    #[test]
    fn conditional_segments_and_connectors() {
        let chain = parse_chain("make && ./run || echo failed").unwrap();
        assert_eq!(stages(&chain), vec![vec!["make"], vec!["./run"], vec!["echo failed"]]);
        assert_eq!(
            connectors(&chain),
            vec![Some(Connector::And), Some(Connector::Or), None]
        );
        assert!(!chain.background);
    }

    #[test]
    fn earliest_connector_wins() {
        let chain = parse_chain("a || b && c").unwrap();
        assert_eq!(
            connectors(&chain),
            vec![Some(Connector::Or), Some(Connector::And), None]
        );
    }

    #[test]
    fn pipeline_stages_are_trimmed() {
        let chain = parse_chain("cat f |  sort -r|uniq").unwrap();
        assert_eq!(stages(&chain), vec![vec!["cat f", "sort -r", "uniq"]]);
        assert_eq!(chain.segments[0].text, "cat f |  sort -r|uniq");
    }

    #[test]
    fn quoted_pipe_and_ampersands_are_literal() {
        let chain = parse_chain("echo 'a | b && c' | cat").unwrap();
        assert_eq!(stages(&chain), vec![vec!["echo 'a | b && c'", "cat"]]);

        let chain = parse_chain("echo '&'").unwrap();
        assert!(!chain.background);
    }

    #[test]
    fn trailing_ampersand_marks_background() {
        let chain = parse_chain("sleep 10   &").unwrap();
        assert!(chain.background);
        assert_eq!(stages(&chain), vec![vec!["sleep 10"]]);

        let chain = parse_chain("sleep 1 && sleep 2&").unwrap();
        assert!(chain.background);
        assert_eq!(stages(&chain), vec![vec!["sleep 1"], vec!["sleep 2"]]);
    }

    #[test]
    fn trailing_double_ampersand_is_not_background() {
        let chain = parse_chain("true &&").unwrap();
        assert!(!chain.background);
        assert_eq!(chain.segments.len(), 2);
        assert!(chain.segments[1].stages.is_empty());
    }

    #[test]
    fn connector_short_circuit_rules() {
        assert!(Connector::And.allows(0));
        assert!(!Connector::And.allows(1));
        assert!(Connector::Or.allows(2));
        assert!(!Connector::Or.allows(0));
    }
}
