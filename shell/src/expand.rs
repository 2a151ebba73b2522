//! Word expansion: alias replacement, escape decoding, variable substitution
//! and tilde expansion, applied in that order.
//!
//! Tilde expansion is kept separate because only arguments of external
//! programs receive it; builtins see `~` untouched.

use crate::config::AliasTable;
use crate::env::Environment;
use crate::lexer::{MAX_TOKENS, Token};

/// Replace an aliased command name with the alias expansion.
///
/// Only the first token is looked up and only one level is applied. The
/// expansion text is split on plain spaces, without quote handling; words
/// that spell a redirection operator become operator tokens.
pub fn expand_alias(tokens: Vec<Token>, aliases: &AliasTable) -> Vec<Token> {
    let expansion = match tokens.first() {
        Some(Token::Word(name)) => match aliases.get(name) {
            Some(expansion) => expansion,
            None => return tokens,
        },
        _ => return tokens,
    };

    let mut out: Vec<Token> = expansion
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(Token::classify)
        .collect();
    out.extend(tokens.into_iter().skip(1));
    out.truncate(MAX_TOKENS);
    out
}

/// Decode backslash escapes in one word.
///
/// Recognizes `\n \t \r \a \v \\ \" \' \$` and `\xHH` with up to two hex
/// digits. Any other escaped character is kept without its backslash; a
/// trailing lone backslash is kept as is.
///
/// Words are UTF-8 text, so `\xHH` yields the character U+00HH: values from
/// `\x80` up come out as two bytes, not one raw byte. `\x00` (or `\x`
/// with no digits) yields nothing, since no argument can carry a NUL.
pub fn unescape(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut chars = word.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            out.push('\\');
            break;
        };
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'v' => out.push('\x0b'),
            'x' => {
                let mut value = 0u32;
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(16)) {
                        Some(digit) => {
                            value = value * 16 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                if let Some(decoded) = char::from_u32(value).filter(|&c| c != '\0') {
                    out.push(decoded);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Substitute `$NAME` and `${NAME}` with values from `lookup`.
///
/// Unset variables expand to the empty string. Substituted values are not
/// scanned again.
pub fn expand_variables<F>(word: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    shellexpand::env_with_context_no_errors(word, |name| Some(lookup(name).unwrap_or_default()))
        .into_owned()
}

/// Expand a leading `~` followed by `/` or end of word to `home`.
pub fn expand_tilde(word: &str, home: &str) -> String {
    shellexpand::tilde_with_context(word, || Some(home)).into_owned()
}

/// Apply alias, escape and variable expansion to a tokenized command.
pub fn expand_command(tokens: Vec<Token>, aliases: &AliasTable, env: &Environment) -> Vec<Token> {
    expand_alias(tokens, aliases)
        .into_iter()
        .map(|token| match token {
            Token::Word(word) => {
                let decoded = unescape(&word);
                Token::Word(expand_variables(&decoded, |name| {
                    env.get_var(name).map(str::to_string)
                }))
            }
            op => op,
        })
        .collect()
}

/// Apply tilde expansion to every word of a command bound for `exec`.
pub fn expand_tildes(tokens: Vec<Token>, env: &Environment) -> Vec<Token> {
    let home = env.home();
    tokens
        .into_iter()
        .map(|token| match token {
            Token::Word(word) => Token::Word(expand_tilde(&word, &home)),
            op => op,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{RedirectKind, split_into_tokens};
    use pretty_assertions::assert_eq;

    fn aliases(pairs: &[(&str, &str)]) -> AliasTable {
        pairs.iter().map(|(n, e)| (n.to_string(), e.to_string())).collect()
    }

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(Token::as_str).collect()
    }

    #[test]
    fn alias_prefix_is_merged_with_remaining_args() {
        let table = aliases(&[("ll", "ls -l")]);
        let out = expand_alias(split_into_tokens("ll /tmp extra"), &table);
        assert_eq!(texts(&out), vec!["ls", "-l", "/tmp", "extra"]);
    }

    #[test]
    fn alias_is_not_applied_recursively() {
        let table = aliases(&[("ll", "la -l"), ("la", "ls -a")]);
        let out = expand_alias(split_into_tokens("ll"), &table);
        assert_eq!(texts(&out), vec!["la", "-l"]);
    }

    #[test]
    fn alias_only_matches_first_word() {
        let table = aliases(&[("ll", "ls -l")]);
        let out = expand_alias(split_into_tokens("echo ll"), &table);
        assert_eq!(texts(&out), vec!["echo", "ll"]);
    }

    #[test]
    fn alias_text_is_split_on_spaces_only() {
        let table = aliases(&[("say", "echo 'a b'  >out")]);
        let out = expand_alias(split_into_tokens("say"), &table);
        assert_eq!(texts(&out), vec!["echo", "'a", "b'", ">out"]);

        let table = aliases(&[("save", "cat > saved")]);
        let out = expand_alias(split_into_tokens("save"), &table);
        assert_eq!(out[1], Token::Redirect(RedirectKind::Output));
    }

    #[test]
    fn unescape_known_sequences() {
        assert_eq!(unescape(r"a\nb\tc"), "a\nb\tc");
        assert_eq!(unescape(r#"\\ \" \$ \r"#), "\\ \" $ \r");
        assert_eq!(unescape(r"\a\v"), "\x07\x0b");
    }

    #[test]
    fn unescape_hex_takes_at_most_two_digits() {
        assert_eq!(unescape(r"\x41\x4a2"), "AJ2");
        assert_eq!(unescape(r"\x7"), "\x07");
        assert_eq!(unescape(r"\xzz"), "zz");
    }

    #[test]
    fn unescape_hex_never_produces_nul_and_maps_high_bytes_to_latin1() {
        assert_eq!(unescape(r"a\x00b"), "ab");
        assert_eq!(unescape(r"\xe9"), "\u{e9}");
        assert_eq!(unescape(r"\xff").len(), 2);
        assert!(!unescape(r"\x0\x00\x").contains('\0'));
    }

    #[test]
    fn unescape_unknown_drops_backslash() {
        assert_eq!(unescape(r"\q\ x"), "q x");
        assert_eq!(unescape("end\\"), "end\\");
    }

    #[test]
    fn variables_expand_and_unset_is_empty() {
        let lookup = |name: &str| match name {
            "USER" => Some("ada".to_string()),
            "LOOP" => Some("$USER".to_string()),
            _ => None,
        };
        assert_eq!(expand_variables("hi $USER!", lookup), "hi ada!");
        assert_eq!(expand_variables("${USER}_x", lookup), "ada_x");
        assert_eq!(expand_variables("[$MISSING]", lookup), "[]");
        assert_eq!(expand_variables("$LOOP", lookup), "$USER");
    }

    #[test]
    fn tilde_only_expands_as_prefix() {
        assert_eq!(expand_tilde("~", "/home/ada"), "/home/ada");
        assert_eq!(expand_tilde("~/src", "/home/ada"), "/home/ada/src");
        assert_eq!(expand_tilde("a~b", "/home/ada"), "a~b");
        assert_eq!(expand_tilde("~bob", "/home/ada"), "~bob");
    }

    #[test]
    fn expand_command_runs_alias_then_escapes_then_variables() {
        let mut env = Environment::empty();
        env.set_var("NAME", "world");
        let table = aliases(&[("greet", "echo hello")]);
        let out = expand_command(split_into_tokens(r"greet \$NAME a\\nb"), &table, &env);
        // The escaped dollar is decoded before variable expansion runs.
        assert_eq!(texts(&out), vec!["echo", "hello", "world", r"a\nb"]);
    }
}
