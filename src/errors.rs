use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Exception classes a script can raise, named the way the planner expects
/// to read them back in a self-correction prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    SyntaxError,
    TypeError,
    ValueError,
    KeyError,
    IndexError,
    ZeroDivisionError,
    AssertionError,
}

impl ScriptErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptErrorKind::SyntaxError => "SyntaxError",
            ScriptErrorKind::TypeError => "TypeError",
            ScriptErrorKind::ValueError => "ValueError",
            ScriptErrorKind::KeyError => "KeyError",
            ScriptErrorKind::IndexError => "IndexError",
            ScriptErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ScriptErrorKind::AssertionError => "AssertionError",
        }
    }
}

impl fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Failed to deserialize input dataset: {0}")]
    Deserialization(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Security Violation: {0}")]
    SecurityViolation(String),

    #[error("PolicyViolation: {message}{}", line_suffix(.line))]
    PolicyViolation {
        symbol: String,
        message: String,
        line: Option<usize>,
    },

    #[error("{kind}: {message}{}", line_suffix(.line))]
    Script {
        kind: ScriptErrorKind,
        message: String,
        line: Option<usize>,
    },

    #[error("Timeout: execution exceeded {0:?}")]
    Timeout(Duration),

    #[error("ResourceLimit: {0}")]
    ResourceExhausted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

fn line_suffix(line: &Option<usize>) -> String {
    match line {
        Some(n) => format!(" (line {})", n),
        None => String::new(),
    }
}

impl SandboxError {
    pub fn script(kind: ScriptErrorKind, message: impl Into<String>) -> Self {
        SandboxError::Script {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::script(ScriptErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::script(ScriptErrorKind::ValueError, message)
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        SandboxError::Script {
            kind: ScriptErrorKind::SyntaxError,
            message: message.into(),
            line: Some(line),
        }
    }

    pub fn policy(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        SandboxError::PolicyViolation {
            symbol: symbol.into(),
            message: message.into(),
            line: None,
        }
    }

    /// Attach a source line to script-level errors that do not carry one yet.
    pub fn at_line(self, at: usize) -> Self {
        match self {
            SandboxError::Script {
                kind,
                message,
                line: None,
            } => SandboxError::Script {
                kind,
                message,
                line: Some(at),
            },
            SandboxError::PolicyViolation {
                symbol,
                message,
                line: None,
            } => SandboxError::PolicyViolation {
                symbol,
                message,
                line: Some(at),
            },
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout(_))
    }

    pub fn is_policy_violation(&self) -> bool {
        matches!(self, SandboxError::PolicyViolation { .. })
    }

    pub fn script_kind(&self) -> Option<ScriptErrorKind> {
        match self {
            SandboxError::Script { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_display_includes_line() {
        let err = SandboxError::script(ScriptErrorKind::KeyError, "'agee'").at_line(2);
        assert_eq!(err.to_string(), "KeyError: 'agee' (line 2)");
    }

    #[test]
    fn test_at_line_keeps_existing_line() {
        let err = SandboxError::syntax("invalid syntax", 4).at_line(9);
        assert_eq!(err.to_string(), "SyntaxError: invalid syntax (line 4)");
    }

    #[test]
    fn test_policy_violation_display() {
        let err = SandboxError::policy("os", "name 'os' is not defined in the sandbox");
        assert!(err.is_policy_violation());
        assert_eq!(
            err.to_string(),
            "PolicyViolation: name 'os' is not defined in the sandbox"
        );
    }
}
