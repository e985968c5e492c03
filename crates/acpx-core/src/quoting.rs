//! POSIX-like quoting for `agentCommand` strings.
//!
//! The agent command arrives as a single string (from a config file or CLI
//! flag) and must be split into argv the way a shell would, without actually
//! invoking a shell. Supported: single quotes (no escapes inside), double
//! quotes (backslash escapes `"`, `\`, and whitespace-significant chars),
//! and bare backslash escapes outside of quotes.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error("agentCommand must not be empty")]
    Empty,
    #[error("unterminated quote in agentCommand")]
    UnterminatedQuote,
    #[error("trailing backslash in agentCommand")]
    TrailingBackslash,
}

pub type Result<T> = std::result::Result<T, QuoteError>;

/// Split `command` into argv using single/double-quote and backslash-escape
/// rules. Never invokes a shell.
pub fn parse_command(command: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut have_current = false;
    let mut chars = command.chars().peekable();

    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }
    let mut quote = Quote::None;

    while let Some(c) = chars.next() {
        match quote {
            Quote::None => match c {
                ' ' | '\t' | '\n' => {
                    if have_current {
                        args.push(std::mem::take(&mut current));
                        have_current = false;
                    }
                }
                '\'' => {
                    quote = Quote::Single;
                    have_current = true;
                }
                '"' => {
                    quote = Quote::Double;
                    have_current = true;
                }
                '\\' => match chars.next() {
                    Some(escaped) => {
                        current.push(escaped);
                        have_current = true;
                    }
                    None => return Err(QuoteError::TrailingBackslash),
                },
                other => {
                    current.push(other);
                    have_current = true;
                }
            },
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.peek() {
                    Some('"') | Some('\\') | Some('$') => {
                        current.push(chars.next().unwrap());
                    }
                    _ => current.push('\\'),
                },
                other => current.push(other),
            },
        }
    }

    if quote != Quote::None {
        return Err(QuoteError::UnterminatedQuote);
    }
    if have_current {
        args.push(current);
    }

    if args.is_empty() {
        return Err(QuoteError::Empty);
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_whitespace() {
        assert_eq!(
            parse_command("agent --flag value").unwrap(),
            vec!["agent", "--flag", "value"]
        );
    }

    #[test]
    fn honors_single_quotes_literally() {
        assert_eq!(
            parse_command(r#"agent --name 'hello world'"#).unwrap(),
            vec!["agent", "--name", "hello world"]
        );
    }

    #[test]
    fn honors_double_quote_escapes() {
        assert_eq!(
            parse_command(r#"agent --json "{\"a\":1}""#).unwrap(),
            vec!["agent", "--json", r#"{"a":1}"#]
        );
    }

    #[test]
    fn bare_backslash_escapes_next_char() {
        assert_eq!(
            parse_command(r"agent --path C:\\Temp").unwrap(),
            vec!["agent", "--path", r"C:\Temp"]
        );
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert_eq!(
            parse_command("agent 'unterminated"),
            Err(QuoteError::UnterminatedQuote)
        );
    }

    #[test]
    fn rejects_empty_command() {
        assert_eq!(parse_command("   "), Err(QuoteError::Empty));
        assert_eq!(parse_command(""), Err(QuoteError::Empty));
    }

    #[test]
    fn rejects_trailing_backslash() {
        assert_eq!(parse_command("agent \\"), Err(QuoteError::TrailingBackslash));
    }

    #[test]
    fn adjacent_quotes_concatenate_into_one_arg() {
        assert_eq!(
            parse_command(r#"agent 'foo'"bar""#).unwrap(),
            vec!["agent", "foobar"]
        );
    }
}
