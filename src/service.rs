//! Transport-agnostic request handling.

use crate::engine::{ExecutionOutcome, FailureKind, TransformEngine};
use crate::marshal::{self, WireFormat};
use crate::plan::{ExecutionUnit, TransformationStep};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Wire payload, either as JSON text or already decoded
    #[serde(alias = "dataframe_json")]
    pub dataset: Json,
    #[serde(default, alias = "code_snippet", skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<TransformationStep>>,
}

impl ExecutionRequest {
    pub fn with_code(dataset: Json, code: impl Into<String>) -> Self {
        Self {
            dataset,
            code: Some(code.into()),
            steps: None,
        }
    }

    pub fn with_steps(dataset: Json, steps: Vec<TransformationStep>) -> Self {
        Self {
            dataset,
            code: None,
            steps: Some(steps),
        }
    }

    pub fn unit(&self) -> Result<ExecutionUnit, ServiceError> {
        match (&self.code, &self.steps) {
            (Some(_), Some(_)) => Err(ServiceError::BadRequest(
                "'code' and 'steps' are mutually exclusive".to_string(),
            )),
            (Some(code), None) => Ok(ExecutionUnit::from_code(code.clone())),
            (None, Some(steps)) => Ok(ExecutionUnit::compose(steps)),
            (None, None) => Err(ServiceError::BadRequest(
                "request needs either 'code' or 'steps'".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_symbol: Option<String>,
}

impl ExecutionResponse {
    pub fn from_outcome(outcome: ExecutionOutcome, format: WireFormat) -> Self {
        match outcome {
            ExecutionOutcome::Success { dataset } => Self {
                success: true,
                dataset: Some(marshal::to_wire_value(&dataset, format)),
                error_message: None,
                error_kind: None,
                error_symbol: None,
            },
            ExecutionOutcome::Failure(f) => Self {
                success: false,
                dataset: None,
                error_message: Some(f.message),
                error_kind: Some(f.kind),
                error_symbol: f.symbol,
            },
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ServiceError {
    /// HTTP-style status for transports that carry one.
    pub fn status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
        }
    }
}

/// Decodes requests, runs them on an engine and encodes the response.
#[derive(Clone)]
pub struct ExecutionService {
    engine: Arc<dyn TransformEngine>,
    format: WireFormat,
}

impl ExecutionService {
    pub fn new(engine: Arc<dyn TransformEngine>, format: WireFormat) -> Self {
        Self { engine, format }
    }

    pub fn engine(&self) -> &Arc<dyn TransformEngine> {
        &self.engine
    }

    pub async fn handle(&self, request: ExecutionRequest) -> Result<ExecutionResponse, ServiceError> {
        let unit = request.unit()?;
        let dataset = marshal::from_wire_value(&request.dataset).map_err(|e| {
            warn!("[SERVICE] Rejecting request: {}", e);
            ServiceError::BadRequest(e.to_string())
        })?;
        let outcome = self.engine.execute(&dataset, &unit).await;
        let mut response = ExecutionResponse::from_outcome(outcome, self.format);
        // Answer in the shape the caller used: text in, text out.
        if request.dataset.is_string() {
            response.dataset = response.dataset.map(|d| Json::String(d.to_string()));
        }
        Ok(response)
    }

    pub async fn handle_value(&self, body: Json) -> Result<ExecutionResponse, ServiceError> {
        let request: ExecutionRequest = serde_json::from_value(body)
            .map_err(|e| ServiceError::BadRequest(format!("malformed request: {}", e)))?;
        self.handle(request).await
    }

    pub async fn handle_json(&self, body: &str) -> Result<ExecutionResponse, ServiceError> {
        let request: ExecutionRequest = serde_json::from_str(body)
            .map_err(|e| ServiceError::BadRequest(format!("malformed request: {}", e)))?;
        self.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_aliases() {
        let request: ExecutionRequest = serde_json::from_value(json!({
            "dataframe_json": "[{\"a\": 1}]",
            "code_snippet": "df = df.copy()"
        }))
        .unwrap();
        assert!(request.dataset.is_string());
        assert_eq!(request.unit().unwrap().code(), "df = df.copy()");
    }

    #[test]
    fn test_code_and_steps_are_exclusive() {
        let mut request = ExecutionRequest::with_code(json!([]), "x = 1");
        request.steps = Some(vec![]);
        let err = request.unit().unwrap_err();
        assert_eq!(err.status(), 400);

        request.code = None;
        request.steps = None;
        assert!(request.unit().is_err());
    }

    #[test]
    fn test_failure_response_shape() {
        let outcome = ExecutionOutcome::Failure(crate::engine::Failure {
            kind: FailureKind::SecurityViolation,
            message: "Security Violation: forbidden".to_string(),
            symbol: None,
        });
        let body = serde_json::to_value(ExecutionResponse::from_outcome(outcome, WireFormat::Split)).unwrap();
        assert_eq!(
            body,
            json!({
                "success": false,
                "error_message": "Security Violation: forbidden",
                "error_kind": "SecurityViolation"
            })
        );
    }
}
