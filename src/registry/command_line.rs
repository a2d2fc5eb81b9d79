// src/registry/command_line.rs

//! Splitting a configured command line into program + arguments.
//!
//! Commands are executed directly (no `sh -c`), so quoting is resolved here:
//! - whitespace separates words,
//! - `'...'` is taken literally,
//! - `"..."` allows `\"` and `\\` escapes,
//! - a bare `\` escapes the next character.

use crate::errors::{OrchestratorError, Result};

/// Split `line` into the executable and its arguments.
pub fn split_command_line(line: &str) -> Result<(String, Vec<String>)> {
    let mut words = split_words(line)?;
    if words.is_empty() {
        return Err(OrchestratorError::InvalidCommand(
            "command line is empty".to_string(),
        ));
    }
    let program = words.remove(0);
    Ok((program, words))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    // Distinguishes `""` (an empty argument) from no word at all.
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => return Err(unterminated(line)),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => {
                    let next = chars.next().ok_or_else(|| {
                        OrchestratorError::InvalidCommand(format!(
                            "trailing backslash in '{line}'"
                        ))
                    })?;
                    current.push(next);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    if quote != Quote::None {
        return Err(unterminated(line));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn unterminated(line: &str) -> OrchestratorError {
    OrchestratorError::InvalidCommand(format!("unterminated quote in '{line}'"))
}
