//! Shape and safety checks for generated code.
//!
//! Generated code is never executed in-process; it only has to pass these
//! static checks before it is accepted as output or as a genome artifact.

/// Tokens that make generated code unacceptable.
pub const DEFAULT_FORBIDDEN: &[&str] = &[
    "rm -rf",
    "std::process::Command",
    "os.system",
    "subprocess",
    "eval(",
    "exec(",
    "__import__",
];

/// Static validator for code artifacts.
#[derive(Debug, Clone)]
pub struct CodeValidator {
    forbidden: Vec<String>,
    max_len: usize,
}

impl Default for CodeValidator {
    fn default() -> Self {
        Self {
            forbidden: DEFAULT_FORBIDDEN.iter().map(|s| s.to_string()).collect(),
            max_len: 64 * 1024,
        }
    }
}

impl CodeValidator {
    /// Validator with the default forbidden list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a forbidden token.
    pub fn forbid(mut self, token: impl Into<String>) -> Self {
        self.forbidden.push(token.into());
        self
    }

    /// Set the maximum accepted length in bytes.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Check `code`; the error names the first problem found.
    pub fn validate(&self, code: &str) -> Result<(), String> {
        if code.trim().is_empty() {
            return Err("code is empty".into());
        }
        if code.len() > self.max_len {
            return Err(format!("code is {} bytes, limit is {}", code.len(), self.max_len));
        }
        if let Some(token) = self.forbidden.iter().find(|t| code.contains(t.as_str())) {
            return Err(format!("forbidden token `{}`", token));
        }
        check_delimiters(code)
    }
}

fn check_delimiters(code: &str) -> Result<(), String> {
    let mut stack = Vec::new();
    let mut chars = code.chars().peekable();
    let mut line = 1;

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            '"' => {
                // Skip string literal, honouring escapes.
                let mut closed = false;
                while let Some(s) = chars.next() {
                    match s {
                        '\\' => {
                            chars.next();
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\n' => line += 1,
                        _ => {}
                    }
                }
                if !closed {
                    return Err("unterminated string literal".into());
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for s in chars.by_ref() {
                    if s == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, at)) => {
                        return Err(format!("`{}` on line {} closed by `{}` on line {}", open, at, c, line))
                    }
                    None => return Err(format!("unmatched `{}` on line {}", c, line)),
                }
            }
            _ => {}
        }
    }

    match stack.pop() {
        Some((open, at)) => Err(format!("unclosed `{}` from line {}", open, at)),
        None => Ok(()),
    }
}
