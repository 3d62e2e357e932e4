//! Quote-aware command tokenization.
//!
//! Steps carry a shell-style command line but are spawned directly, without
//! a shell. Tokenization rules: runs of whitespace separate tokens and
//! collapse; single quotes take everything literally; double quotes preserve
//! interior whitespace and allow `\"` to escape a double quote.

/// Split a command line into an argv vector.
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    current.push(c);
                }
            }
            '"' => {
                in_token = true;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' if chars.peek() == Some(&'"') => {
                            current.push('"');
                            chars.next();
                        }
                        _ => current.push(c),
                    }
                }
            }
            _ => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    tokens
}
