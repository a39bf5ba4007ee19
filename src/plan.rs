use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One approvable unit of work produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationStep {
    pub step_id: String,
    /// Shown to the human approver; never executed
    #[serde(default)]
    pub description: String,
    #[serde(alias = "code_snippet")]
    pub code: String,
    #[serde(default, alias = "required_libraries")]
    pub required_capabilities: BTreeSet<String>,
}

impl TransformationStep {
    pub fn new(step_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            description: String::new(),
            code: code.into(),
            required_capabilities: BTreeSet::new(),
        }
    }

    pub fn requiring<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }
}

/// The approved steps composed into one program, in the order supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionUnit {
    code: String,
    step_ids: Vec<String>,
    required_capabilities: BTreeSet<String>,
}

/// Strip the indentation every non-blank line shares, so a step copied out
/// of an indented block still parses at top level.
fn dedent(code: &str) -> String {
    let margin = code
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    code.lines()
        .map(|l| l.get(margin..).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

impl ExecutionUnit {
    /// Join step code with newlines, every step in the order given.
    pub fn compose(steps: &[TransformationStep]) -> Self {
        let mut parts = Vec::new();
        let mut unit = ExecutionUnit::default();
        for step in steps {
            unit.step_ids.push(step.step_id.clone());
            unit.required_capabilities
                .extend(step.required_capabilities.iter().cloned());
            let body = dedent(&step.code);
            if !body.trim().is_empty() {
                parts.push(body);
            }
        }
        unit.code = parts.join("\n");
        unit
    }

    /// A unit from a raw snippet, as the single-`code` request form sends.
    pub fn from_code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.code.trim().is_empty()
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn step_ids(&self) -> &[String] {
        &self.step_ids
    }

    pub fn required_capabilities(&self) -> &BTreeSet<String> {
        &self.required_capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_keeps_every_step_in_order() {
        let steps = vec![
            TransformationStep::new("s1", "df = df.dropna()").requiring(["pandas"]),
            TransformationStep::new("s2", "df['a'] = df['a'] * 2").requiring(["numpy"]),
            TransformationStep::new("s1", "df = df.head(1)"),
        ];
        let unit = ExecutionUnit::compose(&steps);
        assert_eq!(
            unit.code(),
            "df = df.dropna()\ndf['a'] = df['a'] * 2\ndf = df.head(1)"
        );
        assert_eq!(unit.step_ids(), &["s1", "s2", "s1"]);
        assert_eq!(unit.required_capabilities().len(), 2);
    }

    #[test]
    fn test_compose_dedents_each_step() {
        let steps = vec![TransformationStep::new(
            "s1",
            "    if True:\n        df = df.copy()\n",
        )];
        assert_eq!(
            ExecutionUnit::compose(&steps).code(),
            "if True:\n    df = df.copy()"
        );
    }

    #[test]
    fn test_empty_units() {
        assert!(ExecutionUnit::compose(&[]).is_empty());
        assert!(ExecutionUnit::from_code("  \n").is_empty());
        assert!(ExecutionUnit::empty().step_ids().is_empty());
    }

    #[test]
    fn test_step_accepts_planner_field_names() {
        let json = r#"{
            "step_id": "impute_age",
            "description": "Fill missing ages",
            "code_snippet": "df['age'] = df['age'].fillna(0)",
            "required_libraries": ["pandas"]
        }"#;
        let step: TransformationStep = serde_json::from_str(json).unwrap();
        assert_eq!(step.code, "df['age'] = df['age'].fillna(0)");
        assert!(step.required_capabilities.contains("pandas"));
    }
}
