//! Restricted execution engine for human-approved data-cleaning steps.
//!
//! A planner proposes steps, a human approves a subset, and this crate runs
//! the composed code against a private copy of the dataset inside an
//! embedded interpreter whose only reachable names are the capability
//! registry, the dataset binding `df`, and the script's own variables.
//!
//! ```rust,ignore
//! let engine = RestrictedEngine::new(&EngineConfig::default())?;
//! let dataset = marshal::from_wire(r#"[{"age": 30}, {"age": null}]"#)?;
//! let unit = ExecutionUnit::from_code("df['age'] = df['age'].fillna(df['age'].median())");
//! let outcome = engine.execute(&dataset, &unit).await;
//! ```

pub mod analyzer;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod marshal;
pub mod plan;
pub mod policy;
pub mod sandbox_builder;
pub mod script;
pub mod service;

pub use analyzer::{GuardVerdict, StaticGuard};
pub use config::{EngineConfig, GuardConfig, ResourceLimits, SecurityProfile};
pub use dataset::{Cell, Column, Dataset};
pub use engine::{
    EngineCapabilities, EngineStats, ExecutionOutcome, Failure, FailureKind, RestrictedEngine,
    TransformEngine,
};
pub use errors::{Result, SandboxError, ScriptErrorKind};
pub use executor::ExecutionDriver;
pub use marshal::WireFormat;
pub use plan::{ExecutionUnit, TransformationStep};
pub use policy::{registry, CapabilityRegistry};
pub use sandbox_builder::SandboxContext;
pub use service::{ExecutionRequest, ExecutionResponse, ExecutionService, ServiceError};
