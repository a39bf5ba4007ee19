//! Pre-execution scan of snippet text.
//!
//! This is a second line of defence: a snippet that slips past it still only
//! sees the capabilities bound in its sandbox.

use crate::config::EngineConfig;
use crate::script::lexer::{tokenize, Tok};
use crate::{Result, SandboxError};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Allowed,
    Rejected(String),
}

impl GuardVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardVerdict::Allowed)
    }
}

const DYNAMIC_EVAL: &[&str] = &[
    "eval", "exec", "compile", "globals", "locals", "vars", "getattr", "setattr", "delattr",
    "breakpoint", "input",
];

const HOST_ACCESS: &[&str] = &[
    "os", "sys", "subprocess", "socket", "shutil", "pathlib", "open", "urllib", "requests",
    "http", "ctypes", "pickle", "importlib", "builtins",
];

#[derive(Debug)]
struct PatternRule {
    id: String,
    regex: Regex,
}

#[derive(Debug)]
pub struct StaticGuard {
    patterns: Vec<PatternRule>,
    /// identifier -> rule id
    identifiers: HashMap<String, String>,
    max_code_bytes: usize,
}

fn line_of(code: &str, offset: usize) -> usize {
    code[..offset].matches('\n').count() + 1
}

impl StaticGuard {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut patterns = Vec::new();
        let mut identifiers = HashMap::new();

        if config.guard.use_default_rules {
            for (id, pattern) in [("import-statement", r"\bimport\b"), ("dunder", "__")] {
                let regex = Regex::new(pattern)
                    .map_err(|e| SandboxError::InternalError(format!("built-in guard rule: {}", e)))?;
                patterns.push(PatternRule {
                    id: id.to_string(),
                    regex,
                });
            }
            for name in DYNAMIC_EVAL {
                identifiers.insert(name.to_string(), "dynamic-eval".to_string());
            }
            for name in HOST_ACCESS {
                identifiers.insert(name.to_string(), "host-access".to_string());
            }
        }

        for (i, pattern) in config.guard.extra_patterns.iter().enumerate() {
            let regex = Regex::new(pattern).map_err(|e| {
                SandboxError::Config(format!("invalid guard pattern '{}': {}", pattern, e))
            })?;
            patterns.push(PatternRule {
                id: format!("custom-pattern-{}", i + 1),
                regex,
            });
        }

        let profile_extras = config.profile.extra_denied_identifiers().iter().map(|s| s.to_string());
        for name in config.guard.extra_identifiers.iter().cloned().chain(profile_extras) {
            identifiers.entry(name).or_insert_with(|| "denied-identifier".to_string());
        }

        debug!(
            "[GUARD] {} raw patterns, {} denied identifiers",
            patterns.len(),
            identifiers.len()
        );

        Ok(Self {
            patterns,
            identifiers,
            max_code_bytes: config.effective_limits().max_code_bytes,
        })
    }

    pub fn check(&self, code: &str) -> GuardVerdict {
        let verdict = self.scan(code);
        if let GuardVerdict::Rejected(reason) = &verdict {
            warn!("[GUARD] Rejected snippet: {}", reason);
        }
        verdict
    }

    fn scan(&self, code: &str) -> GuardVerdict {
        if code.len() > self.max_code_bytes {
            return GuardVerdict::Rejected(format!(
                "Code snippet of {} bytes exceeds the {} byte limit and is forbidden (rule code-size)",
                code.len(),
                self.max_code_bytes
            ));
        }

        for rule in &self.patterns {
            if let Some(m) = rule.regex.find(code) {
                return GuardVerdict::Rejected(format!(
                    "Code snippet contains forbidden keyword '{}' (rule {}, line {})",
                    m.as_str(),
                    rule.id,
                    line_of(code, m.start())
                ));
            }
        }

        let tokens = match tokenize(code) {
            Ok(tokens) => tokens,
            Err(e) => {
                return GuardVerdict::Rejected(format!(
                    "Code snippet could not be scanned and is forbidden (rule lex-error): {}",
                    e
                ))
            }
        };
        for token in &tokens {
            if let Tok::Name(name) = &token.tok {
                if let Some(rule) = self.identifiers.get(name) {
                    return GuardVerdict::Rejected(format!(
                        "Code snippet contains forbidden identifier '{}' (rule {}, line {})",
                        name, rule, token.line
                    ));
                }
            }
        }
        GuardVerdict::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GuardConfig, SecurityProfile};

    fn guard() -> StaticGuard {
        StaticGuard::new(&EngineConfig::default()).unwrap()
    }

    fn reason(verdict: GuardVerdict) -> String {
        match verdict {
            GuardVerdict::Rejected(r) => r,
            GuardVerdict::Allowed => panic!("expected a rejection"),
        }
    }

    #[test]
    fn test_rejects_import_with_line() {
        let r = reason(guard().check("x = 1\nimport os\n"));
        assert!(r.contains("forbidden"));
        assert!(r.contains("import-statement"));
        assert!(r.contains("line 2"));
    }

    #[test]
    fn test_rejects_dunder_and_host_names() {
        assert!(reason(guard().check("df.__class__")).contains("dunder"));
        assert!(reason(guard().check("open('/etc/passwd')")).contains("host-access"));
        assert!(reason(guard().check("eval('1')")).contains("dynamic-eval"));
    }

    #[test]
    fn test_string_literals_are_not_identifiers() {
        let code = "df = df[df['status'] != 'open']";
        assert_eq!(guard().check(code), GuardVerdict::Allowed);
    }

    #[test]
    fn test_fails_closed_on_lex_error() {
        let r = reason(guard().check("x = 'unterminated"));
        assert!(r.contains("lex-error"));
    }

    #[test]
    fn test_size_limit() {
        let code = "x = 1\n".repeat(100_000);
        assert!(reason(guard().check(&code)).contains("code-size"));
    }

    #[test]
    fn test_custom_rules_and_strict_profile() {
        let mut config = EngineConfig::with_profile(SecurityProfile::Strict);
        config.guard = GuardConfig {
            extra_patterns: vec![r"to_\w+\(".to_string()],
            extra_identifiers: vec!["sorted".to_string()],
            ..GuardConfig::default()
        };
        let g = StaticGuard::new(&config).unwrap();
        assert!(reason(g.check("while x:\n    pass")).contains("denied-identifier"));
        assert!(reason(g.check("y = sorted(v)")).contains("denied-identifier"));
        assert!(reason(g.check("df.to_json()")).contains("custom-pattern-1"));

        config.guard.extra_patterns = vec!["(".to_string()];
        assert!(matches!(StaticGuard::new(&config), Err(SandboxError::Config(_))));
    }

    #[test]
    fn test_defaults_can_be_disabled() {
        let mut config = EngineConfig::default();
        config.guard.use_default_rules = false;
        let g = StaticGuard::new(&config).unwrap();
        assert!(g.check("open('x')").is_allowed());
    }
}
