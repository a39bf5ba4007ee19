//! End-to-end execution through the public engine API.

use datasentinel::marshal;
use datasentinel::{
    Cell, EngineConfig, ExecutionUnit, FailureKind, ResourceLimits, RestrictedEngine,
    TransformEngine, TransformationStep, WireFormat,
};
use std::sync::Arc;

const PEOPLE: &str = r#"[
    {"name": "ada", "age": 30, "city": "london"},
    {"name": "grace", "age": null, "city": "new york"},
    {"name": "alan", "age": 40, "city": null}
]"#;

fn engine() -> RestrictedEngine {
    RestrictedEngine::new(&EngineConfig::default()).unwrap()
}

fn ages(outcome: &datasentinel::ExecutionOutcome) -> Vec<Option<f64>> {
    outcome
        .dataset()
        .unwrap()
        .column("age")
        .unwrap()
        .cells()
        .iter()
        .map(Cell::as_f64)
        .collect()
}

#[tokio::test]
async fn test_median_imputation() {
    let dataset = marshal::from_wire(PEOPLE).unwrap();
    let unit = ExecutionUnit::from_code("df['age'] = df['age'].fillna(df['age'].median())");

    let outcome = engine().execute(&dataset, &unit).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure());
    assert_eq!(ages(&outcome), vec![Some(30.0), Some(35.0), Some(40.0)]);
}

#[tokio::test]
async fn test_composed_steps_run_in_order() {
    let dataset = marshal::from_wire(PEOPLE).unwrap();
    let steps = vec![
        TransformationStep::new("fill-city", "df['city'] = df['city'].fillna('unknown')"),
        TransformationStep::new(
            "title-city",
            "    df['city'] = df['city'].str.title()\n",
        ),
    ];
    let unit = ExecutionUnit::compose(&steps);

    let outcome = engine().execute(&dataset, &unit).await;

    let ds = outcome.dataset().unwrap();
    assert_eq!(
        ds.column("city").unwrap().cells(),
        &[
            Cell::Text("London".into()),
            Cell::Text("New York".into()),
            Cell::Text("Unknown".into()),
        ]
    );
}

#[tokio::test]
async fn test_length_mismatch_is_runtime_error() {
    let dataset = marshal::from_wire(PEOPLE).unwrap();
    let unit = ExecutionUnit::from_code("df['score'] = [1, 2]");

    let outcome = engine().execute(&dataset, &unit).await;

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::RuntimeError);
    assert!(failure
        .message
        .contains("Length of values (2) does not match length of index (3)"));
    assert!(outcome.dataset().is_none());
}

#[tokio::test]
async fn test_failed_assertion_after_infinite_ratio() {
    let dataset = marshal::from_wire(r#"[{"age": 0}, {"age": 5}]"#).unwrap();
    let code = "df['r'] = 10 / df['age']\nassert df['r'].max() < 100, 'ratio out of range'";

    let outcome = engine().execute(&dataset, &ExecutionUnit::from_code(code)).await;

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::RuntimeError);
    assert_eq!(failure.message, "AssertionError: ratio out of range (line 2)");
    assert!(outcome.dataset().is_none());
}

#[tokio::test]
async fn test_division_by_zero_in_column_yields_infinity() {
    let dataset = marshal::from_wire(r#"[{"age": 0}, {"age": 5}]"#).unwrap();
    let unit = ExecutionUnit::from_code("df['r'] = 10 / df['age']");

    let outcome = engine().execute(&dataset, &unit).await;

    let ds = outcome.dataset().unwrap();
    assert_eq!(
        ds.column("r").unwrap().cells(),
        &[Cell::Float(f64::INFINITY), Cell::Float(2.0)]
    );
}

#[tokio::test]
async fn test_empty_plan_returns_input_unchanged() {
    let dataset = marshal::from_wire(PEOPLE).unwrap();
    let e = engine();

    let outcome = e.execute(&dataset, &ExecutionUnit::compose(&[])).await;

    assert_eq!(outcome.dataset(), Some(&dataset));
    assert_eq!(e.stats().driver_invocations(), 0);
}

#[tokio::test]
async fn test_input_dataset_is_not_mutated() {
    let dataset = marshal::from_wire(PEOPLE).unwrap();
    let before = dataset.clone();
    let unit = ExecutionUnit::from_code("df.dropna(inplace=True)\ndf['age'] = df['age'] * 2");

    let outcome = engine().execute(&dataset, &unit).await;

    assert!(outcome.is_success());
    assert_eq!(dataset, before);
    assert_eq!(outcome.dataset().unwrap().row_count(), 1);
}

#[tokio::test]
async fn test_variables_do_not_leak_between_executions() {
    let dataset = marshal::from_wire(PEOPLE).unwrap();
    let e = engine();

    let first = e
        .execute(&dataset, &ExecutionUnit::from_code("leftover = 1"))
        .await;
    assert!(first.is_success());

    let second = e
        .execute(&dataset, &ExecutionUnit::from_code("df['x'] = leftover"))
        .await;
    let failure = second.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::PolicyViolation);
    assert_eq!(failure.symbol.as_deref(), Some("leftover"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_are_isolated() {
    let e = Arc::new(engine());
    let dataset = Arc::new(marshal::from_wire(PEOPLE).unwrap());

    let mut handles = Vec::new();
    for i in 0..8i64 {
        let e = Arc::clone(&e);
        let dataset = Arc::clone(&dataset);
        handles.push(tokio::spawn(async move {
            let unit = ExecutionUnit::from_code(format!("df['tag'] = {}", i));
            (i, e.execute(&dataset, &unit).await)
        }));
    }

    for handle in handles {
        let (i, outcome) = handle.await.unwrap();
        let ds = outcome.dataset().unwrap();
        assert_eq!(ds.column("tag").unwrap().cells().to_vec(), vec![Cell::Int(i); 3]);
    }
    assert_eq!(e.stats().executions(), 8);
    assert_eq!(dataset.column("tag"), None);
}

#[tokio::test]
async fn test_wall_clock_timeout() {
    let mut config = EngineConfig::default();
    config.limits = Some(ResourceLimits {
        timeout_ms: 50,
        max_instructions: u64::MAX,
        ..ResourceLimits::default()
    });
    let e = RestrictedEngine::new(&config).unwrap();
    let dataset = marshal::from_wire(PEOPLE).unwrap();

    let outcome = e
        .execute(&dataset, &ExecutionUnit::from_code("while True:\n    pass\n"))
        .await;

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::RuntimeError);
    assert!(failure.message.starts_with("Timeout:"), "{}", failure.message);
}

#[tokio::test]
async fn test_output_round_trips_through_records() {
    let dataset = marshal::from_wire(PEOPLE).unwrap();
    let unit = ExecutionUnit::from_code("df = df.drop(columns=['city'])");

    let outcome = engine().execute(&dataset, &unit).await;
    let text = marshal::to_wire(outcome.dataset().unwrap(), WireFormat::Records);
    let back = marshal::from_wire(&text).unwrap();

    assert_eq!(back.column_names(), vec!["name", "age"]);
    assert_eq!(back.row_count(), 3);
}
