use crate::analyzer::{GuardVerdict, StaticGuard};
use crate::config::{EngineConfig, ResourceLimits, SecurityProfile};
use crate::dataset::Dataset;
use crate::errors::{Result, SandboxError};
use crate::executor::ExecutionDriver;
use crate::marshal::WireFormat;
use crate::plan::ExecutionUnit;
use crate::policy::registry;
use crate::sandbox_builder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Slack on top of the cooperative deadline before the engine stops waiting.
const TIMEOUT_GRACE: Duration = Duration::from_millis(500);

/// Failure classes reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    DeserializationError,
    SecurityViolation,
    RuntimeError,
    PolicyViolation,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DeserializationError => "DeserializationError",
            FailureKind::SecurityViolation => "SecurityViolation",
            FailureKind::RuntimeError => "RuntimeError",
            FailureKind::PolicyViolation => "PolicyViolation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// Offending name for policy violations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl From<SandboxError> for Failure {
    fn from(err: SandboxError) -> Self {
        let message = err.to_string();
        let (kind, symbol) = match err {
            SandboxError::Deserialization(_)
            | SandboxError::InvalidDataset(_)
            | SandboxError::JsonError(_) => (FailureKind::DeserializationError, None),
            SandboxError::SecurityViolation(_) => (FailureKind::SecurityViolation, None),
            SandboxError::PolicyViolation { symbol, .. } => {
                (FailureKind::PolicyViolation, Some(symbol))
            }
            SandboxError::Script { .. }
            | SandboxError::Timeout(_)
            | SandboxError::ResourceExhausted(_)
            | SandboxError::Config(_)
            | SandboxError::IoError(_)
            | SandboxError::InternalError(_) => (FailureKind::RuntimeError, None),
        };
        Failure {
            kind,
            message,
            symbol,
        }
    }
}

/// Result of one execution: a transformed dataset or a structured failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success { dataset: Dataset },
    Failure(Failure),
}

impl ExecutionOutcome {
    pub fn failed(err: SandboxError) -> Self {
        ExecutionOutcome::Failure(err.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        match self {
            ExecutionOutcome::Success { dataset } => Some(dataset),
            ExecutionOutcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ExecutionOutcome::Failure(f) => Some(f),
            ExecutionOutcome::Success { .. } => None,
        }
    }
}

impl From<Result<Dataset>> for ExecutionOutcome {
    fn from(result: Result<Dataset>) -> Self {
        match result {
            Ok(dataset) => ExecutionOutcome::Success { dataset },
            Err(e) => ExecutionOutcome::failed(e),
        }
    }
}

/// Monotonic instrumentation counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    executions: AtomicU64,
    guard_rejections: AtomicU64,
    driver_invocations: AtomicU64,
}

impl EngineStats {
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn guard_rejections(&self) -> u64 {
        self.guard_rejections.load(Ordering::Relaxed)
    }

    /// Units that reached the execution driver.
    pub fn driver_invocations(&self) -> u64 {
        self.driver_invocations.load(Ordering::Relaxed)
    }
}

/// Capabilities of a transformation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Engine name
    pub name: String,
    pub profile: SecurityProfile,
    pub limits: ResourceLimits,
    pub wire_format: WireFormat,
    /// Bound capability names, in registry order
    pub capabilities: Vec<String>,
    /// Surface description for the planner prompt
    pub description: String,
}

/// Trait for transformation engines
#[async_trait]
pub trait TransformEngine: Send + Sync {
    /// Run the static guard over a unit without executing it
    async fn validate(&self, unit: &ExecutionUnit) -> GuardVerdict;

    /// Execute a unit against a private copy of `dataset`
    async fn execute(&self, dataset: &Dataset, unit: &ExecutionUnit) -> ExecutionOutcome;

    fn capabilities(&self) -> EngineCapabilities;

    fn stats(&self) -> &EngineStats;
}

/// The guard, sandbox builder and interpreter behind [`TransformEngine`].
pub struct RestrictedEngine {
    config: EngineConfig,
    guard: StaticGuard,
    driver: ExecutionDriver,
    stats: EngineStats,
}

impl RestrictedEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let guard = StaticGuard::new(config)?;
        let limits = config.effective_limits();
        info!(
            "[ENGINE] Restricted engine ready (profile: {:?}, timeout: {}ms, fuel: {})",
            config.profile, limits.timeout_ms, limits.max_instructions
        );
        Ok(Self {
            config: config.clone(),
            guard,
            driver: ExecutionDriver::new(limits),
            stats: EngineStats::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Every declared requirement must name a registry capability.
    fn check_requirements(&self, unit: &ExecutionUnit) -> Result<()> {
        let reg = registry();
        for requirement in unit.required_capabilities() {
            if reg.resolve_requirement(requirement).is_none() {
                return Err(SandboxError::policy(
                    requirement.as_str(),
                    format!(
                        "required capability '{}' is not available in the sandbox",
                        requirement
                    ),
                ));
            }
        }
        Ok(())
    }

    async fn run_driver(&self, dataset: &Dataset, unit: &ExecutionUnit) -> ExecutionOutcome {
        let ctx = sandbox_builder::build(dataset, registry());
        let id = ctx.id();
        let driver = self.driver.clone();
        let owned_unit = unit.clone();
        let timeout = driver.limits().timeout();

        self.stats.driver_invocations.fetch_add(1, Ordering::Relaxed);
        let task = tokio::task::spawn_blocking(move || driver.run(&owned_unit, ctx));

        match tokio::time::timeout(timeout + TIMEOUT_GRACE, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                error!("[ENGINE] Execution {} task failed: {}", id, join_err);
                ExecutionOutcome::failed(SandboxError::InternalError(format!(
                    "execution task failed: {}",
                    join_err
                )))
            }
            Err(_) => {
                warn!("[ENGINE] Execution {} exceeded {:?}", id, timeout);
                ExecutionOutcome::failed(SandboxError::Timeout(timeout))
            }
        }
    }
}

#[async_trait]
impl TransformEngine for RestrictedEngine {
    async fn validate(&self, unit: &ExecutionUnit) -> GuardVerdict {
        self.guard.check(unit.code())
    }

    async fn execute(&self, dataset: &Dataset, unit: &ExecutionUnit) -> ExecutionOutcome {
        self.stats.executions.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        if unit.is_empty() {
            info!("[ENGINE] Empty unit, returning the dataset unchanged");
            return ExecutionOutcome::Success {
                dataset: dataset.clone(),
            };
        }

        debug!(
            "[ENGINE] Executing steps {:?} ({} bytes) on {} rows",
            unit.step_ids(),
            unit.code().len(),
            dataset.row_count()
        );

        if let GuardVerdict::Rejected(reason) = self.guard.check(unit.code()) {
            self.stats.guard_rejections.fetch_add(1, Ordering::Relaxed);
            return ExecutionOutcome::failed(SandboxError::SecurityViolation(reason));
        }
        if let Err(e) = self.check_requirements(unit) {
            warn!("[ENGINE] {}", e);
            return ExecutionOutcome::failed(e);
        }

        let outcome = self.run_driver(dataset, unit).await;
        match &outcome {
            ExecutionOutcome::Success { dataset } => info!(
                "[ENGINE] Execution succeeded in {:?} ({} rows x {} columns)",
                started.elapsed(),
                dataset.row_count(),
                dataset.column_count()
            ),
            ExecutionOutcome::Failure(f) => info!(
                "[ENGINE] Execution failed in {:?}: {}",
                started.elapsed(),
                f.message
            ),
        }
        outcome
    }

    fn capabilities(&self) -> EngineCapabilities {
        let reg = registry();
        EngineCapabilities {
            name: "restricted".to_string(),
            profile: self.config.profile,
            limits: self.config.effective_limits(),
            wire_format: self.config.wire_format,
            capabilities: reg.capabilities().map(|c| c.name.to_string()).collect(),
            description: reg.describe(),
        }
    }

    fn stats(&self) -> &EngineStats {
        &self.stats
    }
}
