use super::value::Value;
use crate::errors::{Result, SandboxError};

/// Evaluated call arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub fn positional(values: Vec<Value>) -> Self {
        Self::new(values, Vec::new())
    }

    /// Reject surplus positionals and unknown keywords for a callee whose
    /// parameters are `params`, in order.
    pub fn check(&self, callee: &str, params: &[&str]) -> Result<()> {
        if self.positional.len() > params.len() {
            return Err(SandboxError::type_error(format!(
                "{}() takes at most {} positional argument{} ({} given)",
                callee,
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                self.positional.len()
            )));
        }
        for (key, _) in &self.keywords {
            match params.iter().position(|p| p == key) {
                None => {
                    return Err(SandboxError::type_error(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        callee, key
                    )))
                }
                Some(idx) if idx < self.positional.len() => {
                    return Err(SandboxError::type_error(format!(
                        "{}() got multiple values for argument '{}'",
                        callee, key
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Argument by position or keyword. An explicit `None` counts as absent.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional
            .get(index)
            .or_else(|| {
                self.keywords
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v)
            })
            .filter(|v| !matches!(v, Value::None))
    }

    pub fn required(&self, index: usize, name: &str, callee: &str) -> Result<&Value> {
        self.get(index, name).ok_or_else(|| {
            SandboxError::type_error(format!(
                "{}() missing required argument: '{}'",
                callee, name
            ))
        })
    }

    pub fn flag(&self, index: usize, name: &str, default: bool) -> Result<bool> {
        match self.get(index, name) {
            None => Ok(default),
            Some(v) => v.truthy(),
        }
    }

    pub fn int_or(&self, index: usize, name: &str, default: i64) -> Result<i64> {
        match self.get(index, name) {
            None => Ok(default),
            Some(Value::Int(v)) => Ok(*v),
            Some(Value::Bool(b)) => Ok(*b as i64),
            Some(other) => Err(SandboxError::type_error(format!(
                "'{}' must be an integer, not '{}'",
                name,
                other.type_name()
            ))),
        }
    }

    pub fn str_or<'a>(&'a self, index: usize, name: &str, default: &'a str) -> Result<&'a str> {
        match self.get(index, name) {
            None => Ok(default),
            Some(Value::Str(s)) => Ok(s),
            Some(other) => Err(SandboxError::type_error(format!(
                "'{}' must be a string, not '{}'",
                name,
                other.type_name()
            ))),
        }
    }

    /// Remove a keyword the interpreter handles itself, such as `inplace`.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let idx = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(idx).1)
    }
}
