//! Brace-aware reformatting of rendered slices that contain function bodies

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

static FUNCTION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bfunction\b\s*\w*\s*\(").expect("Invalid regex pattern"));

const INDENT: &str = "    ";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BeautifyError {
    #[error("unbalanced '{0}' at byte {1}")]
    Unbalanced(char, usize),
    #[error("unterminated string literal starting at byte {0}")]
    UnterminatedString(usize),
}

pub fn contains_function(code: &str) -> bool {
    FUNCTION_TOKEN.is_match(code)
}

struct Writer {
    out: String,
    depth: usize,
    at_line_start: bool,
}

impl Writer {
    fn newline(&mut self) {
        let trimmed = self.out.trim_end_matches(' ').len();
        self.out.truncate(trimmed);
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
        self.at_line_start = true;
    }

    fn push(&mut self, c: char) {
        if self.at_line_start {
            if c == ' ' {
                return;
            }
            for _ in 0..self.depth {
                self.out.push_str(INDENT);
            }
            self.at_line_start = false;
        }
        self.out.push(c);
    }
}

/// Splits statements onto their own lines and indents block bodies.
pub fn beautify(code: &str) -> Result<String, BeautifyError> {
    let mut writer = Writer {
        out: String::with_capacity(code.len() + 16),
        depth: 0,
        at_line_start: true,
    };
    let mut parens = 0usize;
    let mut chars = code.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '"' | '\'' | '`' => {
                writer.push(c);
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    writer.push(next);
                    if next == '\\' {
                        if let Some((_, escaped)) = chars.next() {
                            writer.push(escaped);
                        }
                    } else if next == c {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(BeautifyError::UnterminatedString(pos));
                }
            }
            '(' => {
                parens += 1;
                writer.push(c);
            }
            ')' => {
                parens = parens.checked_sub(1).ok_or(BeautifyError::Unbalanced(c, pos))?;
                writer.push(c);
            }
            '{' => {
                writer.push(c);
                writer.depth += 1;
                if chars.peek().is_some_and(|(_, next)| *next == '}') {
                    continue;
                }
                writer.newline();
            }
            '}' => {
                writer.depth = writer
                    .depth
                    .checked_sub(1)
                    .ok_or(BeautifyError::Unbalanced(c, pos))?;
                if !writer.out.ends_with('{') {
                    writer.newline();
                }
                writer.push(c);
                if chars
                    .peek()
                    .is_some_and(|(_, next)| !matches!(next, ')' | ';' | ',' | ' '))
                {
                    writer.newline();
                }
            }
            ';' if parens == 0 => {
                writer.push(c);
                writer.newline();
            }
            _ => writer.push(c),
        }
    }

    if writer.depth != 0 {
        return Err(BeautifyError::Unbalanced('{', code.len()));
    }
    if parens != 0 {
        return Err(BeautifyError::Unbalanced('(', code.len()));
    }
    Ok(writer.out.trim_end().to_string())
}

/// Beautifies slices that contain a function body; anything else, or input
/// the formatter rejects, is returned unchanged.
pub fn beautify_slice(code: &str) -> String {
    if !contains_function(code) {
        return code.to_string();
    }
    match beautify(code) {
        Ok(pretty) => pretty,
        Err(err) => {
            debug!(%err, "keeping slice text un-beautified");
            code.to_string()
        }
    }
}
