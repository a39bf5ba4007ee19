use crate::config::ResourceLimits;
use crate::dataset::Dataset;
use crate::engine::ExecutionOutcome;
use crate::errors::Result;
use crate::plan::ExecutionUnit;
use crate::sandbox_builder::SandboxContext;
use crate::script::{parse, Interpreter};
use std::time::Instant;
use tracing::debug;

/// Runs a composed unit inside one sandbox context.
#[derive(Debug, Clone)]
pub struct ExecutionDriver {
    limits: ResourceLimits,
}

impl ExecutionDriver {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Execute `unit` and read back `df`. The context is consumed on every
    /// path.
    pub fn run(&self, unit: &ExecutionUnit, ctx: SandboxContext) -> ExecutionOutcome {
        if unit.is_empty() {
            return ctx.take_dataset().into();
        }
        self.execute(unit, ctx).into()
    }

    fn execute(&self, unit: &ExecutionUnit, mut ctx: SandboxContext) -> Result<Dataset> {
        let id = ctx.id();
        let program = parse(unit.code())?;
        let started = Instant::now();

        let mut interp = Interpreter::new(&mut ctx, &self.limits);
        let result = interp.run(&program);
        for line in interp.output() {
            debug!("[DRIVER] {} print: {}", id, line);
        }
        debug!(
            "[DRIVER] {} ran {} statements in {:?} ({} instructions)",
            id,
            program.len(),
            started.elapsed(),
            interp.instructions()
        );
        result?;
        ctx.take_dataset()
    }
}
