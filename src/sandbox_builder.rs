use crate::dataset::Dataset;
use crate::policy::{CapabilityKind, CapabilityRegistry, DATASET_BINDING};
use crate::script::Value;
use crate::{Result, SandboxError};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Single-use namespace for one execution.
///
/// Holds a private copy of the dataset bound as `df`, one binding per
/// registry capability, and whatever the script assigns. Capability names
/// can be read but never reassigned or deleted.
#[derive(Debug)]
pub struct SandboxContext {
    id: Uuid,
    bindings: HashMap<String, Value>,
    registry: &'static CapabilityRegistry,
}

/// Build a fresh namespace around a deep copy of `dataset`.
pub fn build(dataset: &Dataset, registry: &'static CapabilityRegistry) -> SandboxContext {
    let mut bindings = HashMap::with_capacity(registry.len() + 1);
    for cap in registry.capabilities() {
        let value = match cap.kind {
            CapabilityKind::Primitive(b) => Value::Builtin(b),
            CapabilityKind::Library(l) => Value::Library(l),
        };
        bindings.insert(cap.name.to_string(), value);
    }
    bindings.insert(DATASET_BINDING.to_string(), Value::Frame(dataset.clone()));

    let id = Uuid::new_v4();
    debug!(
        "[SANDBOX] Built context {} ({} rows x {} columns, {} capabilities)",
        id,
        dataset.row_count(),
        dataset.column_count(),
        registry.len()
    );
    SandboxContext {
        id,
        bindings,
        registry,
    }
}

fn undefined(name: &str) -> SandboxError {
    SandboxError::policy(
        name,
        format!("name '{}' is not defined in the sandbox", name),
    )
}

fn rebind(name: &str) -> SandboxError {
    SandboxError::policy(name, format!("cannot rebind capability '{}'", name))
}

impl SandboxContext {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn lookup(&self, name: &str) -> Result<&Value> {
        self.bindings.get(name).ok_or_else(|| undefined(name))
    }

    /// Mutable access for in-place updates such as `df['c'] = ...`.
    pub fn lookup_mut(&mut self, name: &str) -> Result<&mut Value> {
        if self.registry.contains(name) {
            return Err(rebind(name));
        }
        self.bindings.get_mut(name).ok_or_else(|| undefined(name))
    }

    pub fn assign(&mut self, name: &str, value: Value) -> Result<()> {
        if self.registry.contains(name) {
            return Err(rebind(name));
        }
        self.bindings.insert(name.to_string(), value);
        Ok(())
    }

    pub fn unbind(&mut self, name: &str) -> Result<()> {
        if self.registry.contains(name) {
            return Err(rebind(name));
        }
        self.bindings
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| undefined(name))
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        match self.bindings.get(DATASET_BINDING) {
            Some(Value::Frame(ds)) => Some(ds),
            _ => None,
        }
    }

    /// Consume the context and hand back the final `df`.
    pub fn take_dataset(mut self) -> Result<Dataset> {
        match self.bindings.remove(DATASET_BINDING) {
            Some(Value::Frame(ds)) => Ok(ds),
            Some(other) => Err(SandboxError::type_error(format!(
                "'{}' must remain a DataFrame, found '{}'",
                DATASET_BINDING,
                other.type_name()
            ))),
            None => Err(undefined(DATASET_BINDING)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Cell, Column};
    use crate::policy::registry;

    fn sample() -> Dataset {
        Dataset::new(vec![Column::new("a", vec![Cell::Int(1), Cell::Int(2)])]).unwrap()
    }

    #[test]
    fn test_context_binds_dataset_and_capabilities_only() {
        let ctx = build(&sample(), registry());
        assert!(matches!(ctx.lookup("df"), Ok(Value::Frame(_))));
        assert!(matches!(ctx.lookup("len"), Ok(Value::Builtin(_))));
        assert!(matches!(ctx.lookup("np"), Ok(Value::Library(_))));
        assert!(ctx.lookup("open").unwrap_err().is_policy_violation());
        assert_eq!(ctx.bindings.len(), registry().len() + 1);
    }

    #[test]
    fn test_capabilities_cannot_be_rebound() {
        let mut ctx = build(&sample(), registry());
        let err = ctx.assign("np", Value::Int(1)).unwrap_err();
        assert!(err.to_string().contains("cannot rebind capability 'np'"));
        assert!(ctx.lookup_mut("len").is_err());
        assert!(ctx.unbind("pd").is_err());
        ctx.assign("threshold", Value::Int(3)).unwrap();
        assert!(matches!(ctx.lookup("threshold"), Ok(Value::Int(3))));
    }

    #[test]
    fn test_copy_is_private() {
        let original = sample();
        let mut ctx = build(&original, registry());
        if let Ok(Value::Frame(ds)) = ctx.lookup_mut("df") {
            ds.set_column("a", vec![Cell::Int(9), Cell::Int(9)]).unwrap();
        }
        assert_eq!(original.column("a").unwrap().cells()[0], Cell::Int(1));
        assert_ne!(ctx.take_dataset().unwrap(), original);
    }

    #[test]
    fn test_take_dataset_requires_frame() {
        let mut ctx = build(&sample(), registry());
        ctx.assign("df", Value::Int(0)).unwrap();
        let err = ctx.take_dataset().unwrap_err();
        assert!(err.to_string().contains("must remain a DataFrame"));
    }
}
