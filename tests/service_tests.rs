//! Request and response shapes at the service boundary.

use datasentinel::{
    EngineConfig, ExecutionService, RestrictedEngine, ServiceError, WireFormat,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn service(format: WireFormat) -> ExecutionService {
    let engine = RestrictedEngine::new(&EngineConfig::default()).unwrap();
    ExecutionService::new(Arc::new(engine), format)
}

#[tokio::test]
async fn test_text_dataset_comes_back_as_text() {
    let body = json!({
        "dataframe_json": "[{\"age\": 30}, {\"age\": null}, {\"age\": 40}]",
        "code_snippet": "df['age'] = df['age'].fillna(df['age'].median())"
    });

    let response = service(WireFormat::Records).handle_value(body).await.unwrap();

    assert!(response.success);
    let text = response.dataset.unwrap();
    let decoded: Value = serde_json::from_str(text.as_str().unwrap()).unwrap();
    assert_eq!(decoded, json!([{"age": 30}, {"age": 35.0}, {"age": 40}]));
}

#[tokio::test]
async fn test_structured_dataset_uses_configured_format() {
    let body = json!({
        "dataset": [{"a": 1, "b": "x"}],
        "steps": [
            {"step_id": "s1", "description": "double a", "code": "df['a'] = df['a'] * 2"},
            {"step_id": "s2", "code_snippet": "df = df.drop(columns=['b'])"}
        ]
    });

    let response = service(WireFormat::Split).handle_value(body).await.unwrap();

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "success": true,
            "dataset": {"columns": ["a"], "data": [[2]]}
        })
    );
}

#[tokio::test]
async fn test_security_failure_carries_no_dataset() {
    let body = r#"{"dataset": [{"a": 1}], "code": "import os"}"#;

    let response = service(WireFormat::Split).handle_json(body).await.unwrap();
    let value = serde_json::to_value(&response).unwrap();

    assert_eq!(value["success"], json!(false));
    assert_eq!(value["error_kind"], json!("SecurityViolation"));
    assert!(value.get("dataset").is_none());
    assert!(value["error_message"]
        .as_str()
        .unwrap()
        .starts_with("Security Violation:"));
}

#[tokio::test]
async fn test_policy_failure_names_symbol() {
    let body = json!({"dataset": [{"a": 1}], "code": "df['a'] = np.save('x', df)"});

    let response = service(WireFormat::Split).handle_value(body).await.unwrap();

    assert!(!response.success);
    assert_eq!(response.error_symbol.as_deref(), Some("np.save"));
}

#[tokio::test]
async fn test_malformed_dataset_is_bad_request() {
    let body = json!({"dataset": "{not json", "code": "df = df"});

    let err = service(WireFormat::Split).handle_value(body).await.unwrap_err();

    assert_eq!(err.status(), 400);
    let ServiceError::BadRequest(message) = err;
    assert!(message.contains("deserialize"), "{}", message);
}

#[tokio::test]
async fn test_missing_fields_are_bad_requests() {
    let svc = service(WireFormat::Split);

    let err = svc.handle_json("{\"code\": \"df = df\"}").await.unwrap_err();
    assert_eq!(err.status(), 400);

    let err = svc
        .handle_value(json!({"dataset": [], "code": "x = 1", "steps": []}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("mutually exclusive"));
}

#[tokio::test]
async fn test_failed_assertion_response_shape() {
    let body = json!({
        "dataset": [{"age": 0}, {"age": 5}],
        "code": "df['r'] = 10 / df['age']\nassert df['r'].max() < 100, 'ratio out of range'"
    });

    let response = service(WireFormat::Split).handle_value(body).await.unwrap();

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "success": false,
            "error_message": "AssertionError: ratio out of range (line 2)",
            "error_kind": "RuntimeError"
        })
    );
}

#[tokio::test]
async fn test_text_ceiling_response_shape() {
    let body = json!({
        "dataset": [{"name": "ada"}],
        "code": "df['name'] = df['name'] * 4611686018427387904"
    });

    let response = service(WireFormat::Records).handle_value(body).await.unwrap();
    let value = serde_json::to_value(&response).unwrap();

    assert_eq!(value["success"], json!(false));
    assert_eq!(value["error_kind"], json!("RuntimeError"));
    assert!(value.get("dataset").is_none());
    assert!(value.get("error_symbol").is_none());
    assert!(value["error_message"]
        .as_str()
        .unwrap()
        .starts_with("ResourceLimit:"));
}
