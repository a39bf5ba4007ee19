use datasentinel::{EngineConfig, ExecutionService, RestrictedEngine, SecurityProfile, ServiceError};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default)]
struct WorkerConfig {
    config_path: Option<PathBuf>,
    profile: Option<String>,
    timeout_ms: Option<u64>,
}

impl WorkerConfig {
    fn from_env_and_args() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let mut config_path = std::env::var("DATASENTINEL_CONFIG").ok().map(PathBuf::from);
        let mut profile = std::env::var("DATASENTINEL_PROFILE").ok();
        let mut timeout_ms = std::env::var("DATASENTINEL_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.trim().parse().ok());

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    if let Some(v) = args.get(i + 1) {
                        config_path = Some(PathBuf::from(v));
                    }
                    i += 2;
                }
                "--profile" => {
                    if let Some(v) = args.get(i + 1) {
                        profile = Some(v.clone());
                    }
                    i += 2;
                }
                "--timeout-ms" => {
                    if let Some(v) = args.get(i + 1).and_then(|v| v.trim().parse().ok()) {
                        timeout_ms = Some(v);
                    }
                    i += 2;
                }
                _ => i += 1,
            }
        }

        Self {
            config_path,
            profile,
            timeout_ms,
        }
    }

    fn engine_config(&self) -> datasentinel::Result<EngineConfig> {
        let mut config = match &self.config_path {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        if let Some(profile) = &self.profile {
            config.profile = SecurityProfile::parse(profile)?;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.set_timeout_ms(timeout_ms);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "datasentinel_worker=info,datasentinel=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cfg = WorkerConfig::from_env_and_args();
    let engine_config = cfg.engine_config()?;
    tracing::info!(
        "datasentinel-worker starting (profile={:?}: {}, config={:?})",
        engine_config.profile,
        engine_config.profile.description(),
        cfg.config_path
    );

    let engine = Arc::new(RestrictedEngine::new(&engine_config)?);
    let service = ExecutionService::new(engine, engine_config.wire_format);

    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(resp) = rx.recv().await {
            let s = serde_json::to_string(&resp)?;
            stdout.write_all(s.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("invalid json-rpc line: {} | err={}", line, e);
                continue;
            }
        };

        let method = parsed.get("method").and_then(|m| m.as_str()).unwrap_or("");
        match method {
            // executions run concurrently; replies carry their id
            "execute" => {
                let service = service.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(resp) = handle_message(&service, parsed).await {
                        let _ = tx.send(resp);
                    }
                });
            }
            "shutdown" => {
                if let Some(resp) = handle_message(&service, parsed).await {
                    let _ = tx.send(resp);
                }
                break;
            }
            _ => {
                if let Some(resp) = handle_message(&service, parsed).await {
                    let _ = tx.send(resp);
                }
            }
        }
    }

    drop(tx);
    writer.await??;
    tracing::info!("datasentinel-worker stopped");
    Ok(())
}

async fn handle_message(service: &ExecutionService, msg: Value) -> Option<Value> {
    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = msg.get("id").cloned();
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

    // Notifications have no id: ignore most, but allow "exit" to terminate.
    if id.is_none() {
        if method == "exit" {
            std::process::exit(0);
        }
        return None;
    }

    let result = match method {
        "initialize" => Ok(json!({
            "serverInfo": {
                "name": "datasentinel-worker",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "execute": true,
                "formats": ["split", "records"]
            }
        })),
        "ping" => Ok(json!("pong")),
        "capabilities/list" => capabilities(service),
        "execute" => execute(service, params).await,
        "shutdown" => Ok(Value::Null),
        _ => Err(json!({
            "code": -32601,
            "message": format!("Method not found: {}", method)
        })),
    };

    Some(match result {
        Ok(v) => json!({ "jsonrpc": "2.0", "result": v, "id": id }),
        Err(err_obj) => json!({ "jsonrpc": "2.0", "error": err_obj, "id": id }),
    })
}

fn capabilities(service: &ExecutionService) -> std::result::Result<Value, Value> {
    let engine = service.engine();
    let stats = engine.stats();
    let mut caps = serde_json::to_value(engine.capabilities())
        .map_err(|e| json!({ "code": -32603, "message": e.to_string() }))?;
    if let Some(obj) = caps.as_object_mut() {
        obj.insert(
            "stats".to_string(),
            json!({
                "executions": stats.executions(),
                "guard_rejections": stats.guard_rejections(),
                "driver_invocations": stats.driver_invocations(),
            }),
        );
    }
    Ok(caps)
}

async fn execute(service: &ExecutionService, params: Value) -> std::result::Result<Value, Value> {
    match service.handle_value(params).await {
        Ok(response) => serde_json::to_value(response)
            .map_err(|e| json!({ "code": -32603, "message": e.to_string() })),
        Err(e @ ServiceError::BadRequest(_)) => Err(json!({
            "code": -32602,
            "message": e.to_string(),
            "data": { "status": e.status() }
        })),
    }
}
