use crate::errors::{Result, SandboxError};
use crate::marshal::WireFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Security profile for script execution
/// Determines the ceilings and the extra guard rules applied to every run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProfile {
    /// Generous ceilings for large datasets and trusted planners
    Relaxed,

    /// Default ceilings, default guard rules
    #[default]
    Standard,

    /// Tight ceilings, and loops that can run unbounded (`while`) are
    /// rejected by the guard
    Strict,
}

impl SecurityProfile {
    /// Get resource limits for this profile
    pub fn resource_limits(&self) -> ResourceLimits {
        match self {
            SecurityProfile::Relaxed => ResourceLimits {
                timeout_ms: 60_000,
                max_instructions: 500_000_000,
                max_cells: 50_000_000,
                max_code_bytes: 1024 * 1024,
                max_text_bytes: 1024 * 1024 * 1024,
            },
            SecurityProfile::Standard => ResourceLimits::default(),
            SecurityProfile::Strict => ResourceLimits {
                timeout_ms: 2_000,
                max_instructions: 5_000_000,
                max_cells: 1_000_000,
                max_code_bytes: 64 * 1024,
                max_text_bytes: 32 * 1024 * 1024,
            },
        }
    }

    /// Identifiers the guard rejects on top of its default rules
    pub fn extra_denied_identifiers(&self) -> &'static [&'static str] {
        match self {
            SecurityProfile::Strict => &["while"],
            _ => &[],
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            SecurityProfile::Relaxed => "Generous ceilings for large datasets",
            SecurityProfile::Standard => "Default ceilings and guard rules",
            SecurityProfile::Strict => "Tight ceilings, no while loops",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "relaxed" => Ok(SecurityProfile::Relaxed),
            "standard" => Ok(SecurityProfile::Standard),
            "strict" => Ok(SecurityProfile::Strict),
            other => Err(SandboxError::Config(format!(
                "unknown security profile '{}' (expected relaxed, standard or strict)",
                other
            ))),
        }
    }
}

/// Per-execution ceilings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Wall-clock ceiling for one execution
    pub timeout_ms: u64,
    /// Interpreter fuel: statements, expression nodes and element-wise work
    pub max_instructions: u64,
    /// Largest Series or DataFrame a script may materialise
    pub max_cells: usize,
    /// Largest composed code unit the guard accepts
    pub max_code_bytes: usize,
    /// Text bytes a script may produce in one execution, summed over every
    /// string it builds
    #[serde(default = "default_max_text_bytes")]
    pub max_text_bytes: usize,
}

fn default_max_text_bytes() -> usize {
    256 * 1024 * 1024
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_instructions: 50_000_000,
            max_cells: 10_000_000,
            max_code_bytes: 256 * 1024,
            max_text_bytes: default_max_text_bytes(),
        }
    }
}

impl ResourceLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Static guard configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardConfig {
    /// Apply the built-in rules (`import`, `__`, host and dynamic-eval names)
    pub use_default_rules: bool,
    /// Extra regular expressions matched against the raw code text
    pub extra_patterns: Vec<String>,
    /// Extra identifiers rejected wherever they appear as a name token
    pub extra_identifiers: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            use_default_rules: true,
            extra_patterns: Vec::new(),
            extra_identifiers: Vec::new(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub profile: SecurityProfile,
    /// Overrides the profile's ceilings when present
    pub limits: Option<ResourceLimits>,
    pub guard: GuardConfig,
    pub wire_format: WireFormat,
}

impl EngineConfig {
    pub fn with_profile(profile: SecurityProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    /// Load a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: EngineConfig = serde_json::from_str(&text).map_err(|e| {
            SandboxError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn effective_limits(&self) -> ResourceLimits {
        self.limits
            .unwrap_or_else(|| self.profile.resource_limits())
    }

    /// Replace the wall-clock ceiling, keeping every other limit
    pub fn set_timeout_ms(&mut self, timeout_ms: u64) {
        let mut limits = self.effective_limits();
        limits.timeout_ms = timeout_ms;
        self.limits = Some(limits);
    }

    pub fn validate(&self) -> Result<()> {
        let limits = self.effective_limits();
        if limits.timeout_ms == 0 {
            return Err(SandboxError::Config("timeout_ms must be positive".into()));
        }
        if limits.max_instructions == 0
            || limits.max_cells == 0
            || limits.max_code_bytes == 0
            || limits.max_text_bytes == 0
        {
            return Err(SandboxError::Config(
                "resource limits must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_profile_limits() {
        let strict = SecurityProfile::Strict.resource_limits();
        let standard = SecurityProfile::Standard.resource_limits();
        assert!(strict.timeout_ms < standard.timeout_ms);
        assert!(strict.max_instructions < standard.max_instructions);
        assert_eq!(standard, ResourceLimits::default());
        assert_eq!(SecurityProfile::Strict.extra_denied_identifiers(), &["while"]);
        assert!(SecurityProfile::Standard.extra_denied_identifiers().is_empty());
    }

    #[test]
    fn test_parse_profile() {
        assert_eq!(
            SecurityProfile::parse(" Strict ").unwrap(),
            SecurityProfile::Strict
        );
        assert!(SecurityProfile::parse("yolo").is_err());
    }

    #[test]
    fn test_load_from_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"profile": "strict", "guard": {{"extra_identifiers": ["sorted"]}}}}"#)
            .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.profile, SecurityProfile::Strict);
        assert!(config.guard.use_default_rules);
        assert_eq!(config.guard.extra_identifiers, vec!["sorted".to_string()]);
        assert_eq!(config.wire_format, WireFormat::Split);
        assert_eq!(config.effective_limits().timeout_ms, 2_000);
    }

    #[test]
    fn test_timeout_override_keeps_profile_limits() {
        let mut config = EngineConfig::with_profile(SecurityProfile::Strict);
        config.set_timeout_ms(50);
        let limits = config.effective_limits();
        assert_eq!(limits.timeout_ms, 50);
        assert_eq!(limits.max_instructions, 5_000_000);
        assert_eq!(limits.max_text_bytes, 32 * 1024 * 1024);
    }

    #[test]
    fn test_text_ceiling_defaults_when_absent() {
        let limits: ResourceLimits = serde_json::from_str(
            r#"{"timeout_ms": 5, "max_instructions": 1, "max_cells": 1, "max_code_bytes": 1}"#,
        )
        .unwrap();
        assert_eq!(limits.max_text_bytes, ResourceLimits::default().max_text_bytes);
    }

    #[test]
    fn test_rejects_zero_limits() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"limits": {{"timeout_ms": 0, "max_instructions": 1, "max_cells": 1, "max_code_bytes": 1}}}}"#
        )
        .unwrap();
        assert!(matches!(
            EngineConfig::from_file(file.path()),
            Err(SandboxError::Config(_))
        ));
    }
}
