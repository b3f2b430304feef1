use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::config::InvokeConfig;
use crate::error::{Error, RuntimeError};
use crate::invocation::InvocationService;
use crate::procedure::{Args, ProcedureDraft, ProcedurePatch};
use crate::schema::ParameterSchema;

const USAGE: &[&str] = &[
    "frameworks",
    "protocols [<framework>]",
    "methods",
    "health",
    "status",
    "help",
    "list",
    "get <id>",
    "create <json>",
    "update <id> <json>",
    "delete <id>",
    "invoke <id> [<json-object> | key=value ...]",
];

/// A failed command, rendered as `{"error": …, "kind": …}`.
#[derive(Debug, Clone, PartialEq)]
struct Failure {
    message: String,
    kind: &'static str,
}

impl Failure {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: "bad_request",
        }
    }

    fn to_json(&self) -> Value {
        json!({ "error": self.message, "kind": self.kind })
    }
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        Self {
            message: e.to_string(),
            kind: e.kind(),
        }
    }
}

type Reply = std::result::Result<Value, Failure>;

fn reply<T: Serialize>(value: T) -> Reply {
    Ok(serde_json::to_value(value).unwrap_or_default())
}

/// Line-oriented command surface over the store and the invocation
/// service. Every reply is a single line of JSON.
pub struct Console {
    service: Arc<InvocationService>,
    catalog: Catalog,
    invoke: InvokeConfig,
    start_time: Instant,
}

impl Console {
    pub fn new(service: Arc<InvocationService>, catalog: Catalog, invoke: InvokeConfig) -> Self {
        Self {
            service,
            catalog,
            invoke,
            start_time: Instant::now(),
        }
    }

    /// Handles one input line. Blank lines get no reply.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (command, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(c, r)| (c, r.trim()));
        let command = command.to_lowercase();

        debug!("Console command: {command}");

        let outcome = self.handle_command(&command, rest).await;
        Some(match outcome {
            Ok(value) => value.to_string(),
            Err(failure) => failure.to_json().to_string(),
        })
    }

    async fn handle_command(&self, command: &str, rest: &str) -> Reply {
        match command {
            "frameworks" => reply(self.catalog.frameworks()),
            "protocols" => self.cmd_protocols(rest),
            "methods" => reply(self.catalog.methods()),
            "health" => Ok(json!({ "status": "ok" })),
            "status" => Ok(self.cmd_status()),
            "help" => Ok(json!({ "commands": USAGE })),
            "list" => reply(self.service.store().list()),
            "get" => reply(self.service.store().get(required_id(rest, "get <id>")?)?),
            "create" => self.cmd_create(rest),
            "update" => self.cmd_update(rest),
            "delete" => {
                let id = required_id(rest, "delete <id>")?;
                self.service.store().delete(id);
                Ok(json!({ "ok": true }))
            }
            "invoke" => self.cmd_invoke(rest).await,
            _ => Err(Failure::bad_request(format!(
                "unknown command: {command}; type help for available commands"
            ))),
        }
    }

    /// protocols — per framework, or all frameworks when none is given
    fn cmd_protocols(&self, framework: &str) -> Reply {
        if !framework.is_empty() {
            return reply(self.catalog.protocols_for(framework));
        }
        let table: serde_json::Map<String, Value> = self
            .catalog
            .frameworks()
            .into_iter()
            .map(|f| {
                let protocols = self.catalog.protocols_for(&f.id);
                (f.id, json!(protocols))
            })
            .collect();
        Ok(Value::Object(table))
    }

    /// status — uptime, store size and limits
    fn cmd_status(&self) -> Value {
        let sandbox = self.service.sandbox().config();
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "procedures": self.service.store().len(),
            "uptimeSecs": self.start_time.elapsed().as_secs(),
            "maxSteps": sandbox.max_steps,
            "maxCallDepth": sandbox.max_call_depth,
            "timeoutMs": self.invoke.timeout_ms,
        })
    }

    fn cmd_create(&self, body: &str) -> Reply {
        let draft: ProcedureDraft = parse_body(body, "create <json>")?;
        reply(self.service.store().create(draft)?)
    }

    fn cmd_update(&self, rest: &str) -> Reply {
        let usage = "update <id> <json>";
        let (id, body) = rest
            .split_once(char::is_whitespace)
            .ok_or_else(|| Failure::bad_request(format!("usage: {usage}")))?;
        let patch: ProcedurePatch = parse_body(body, usage)?;
        reply(self.service.store().update(id, patch)?)
    }

    async fn cmd_invoke(&self, rest: &str) -> Reply {
        let usage = "invoke <id> [<json-object> | key=value ...]";
        let (id, raw_args) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(id, args)| (id, args.trim()));
        let id = required_id(id, usage)?.to_string();

        let args = if raw_args.is_empty() {
            Args::new()
        } else if raw_args.starts_with('{') {
            parse_body(raw_args, usage)?
        } else {
            // key=value pairs are typed by the procedure's declarations
            let procedure = self.service.store().get(&id)?;
            let pairs = raw_args
                .split_whitespace()
                .map(|pair| {
                    pair.split_once('=').ok_or_else(|| {
                        Failure::bad_request(format!("expected key=value, got '{pair}'"))
                    })
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ParameterSchema::new(&procedure.params).coerce_text_args(pairs)
        };

        let service = Arc::clone(&self.service);
        let task_id = id.clone();
        let task = tokio::task::spawn_blocking(move || service.invoke(&task_id, &args));
        let joined = match self.invoke.timeout() {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    info!("Invocation of {id} abandoned after {} ms", limit.as_millis());
                    return Err(Error::Runtime(RuntimeError::new(format!(
                        "invocation exceeded deadline of {} ms",
                        limit.as_millis()
                    )))
                    .into());
                }
            },
            None => task.await,
        };
        let result = joined.map_err(|e| {
            Failure::from(Error::Runtime(RuntimeError::new(format!(
                "invocation task failed: {e}"
            ))))
        })??;
        reply(result)
    }
}

fn required_id<'a>(rest: &'a str, usage: &str) -> std::result::Result<&'a str, Failure> {
    match rest.split_whitespace().next() {
        Some(id) => Ok(id),
        None => Err(Failure::bad_request(format!("usage: {usage}"))),
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str, usage: &str) -> std::result::Result<T, Failure> {
    if body.trim().is_empty() {
        return Err(Failure::bad_request(format!("usage: {usage}")));
    }
    serde_json::from_str(body).map_err(|e| Failure::bad_request(format!("invalid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CatalogConfig, SandboxConfig};
    use crate::sandbox::SandboxExecutor;
    use crate::store::ProcedureStore;

    fn console_with(sandbox: SandboxConfig, invoke: InvokeConfig) -> Console {
        let service = InvocationService::new(
            Arc::new(ProcedureStore::new()),
            SandboxExecutor::new(sandbox),
        );
        Console::new(
            Arc::new(service),
            Catalog::new(CatalogConfig::default()),
            invoke,
        )
    }

    fn console() -> Console {
        console_with(SandboxConfig::default(), InvokeConfig::default())
    }

    async fn send(console: &Console, line: &str) -> Value {
        let reply = console.handle_line(line).await.expect("a reply");
        serde_json::from_str(&reply).unwrap()
    }

    async fn create(console: &Console, body: Value) -> String {
        let created = send(console, &format!("create {body}")).await;
        created["id"].as_str().unwrap().to_string()
    }

    // ── Catalog ─────────────────────────────────────────

    #[tokio::test]
    async fn test_catalog_commands() {
        let console = console();
        let frameworks = send(&console, "frameworks").await;
        assert_eq!(frameworks[0], json!({"id": "grpc", "name": "gRPC"}));
        assert_eq!(send(&console, "protocols grpc").await, json!(["tcp", "udp"]));
        assert_eq!(send(&console, "protocols soap").await, json!(["tcp"]));
        assert_eq!(send(&console, "protocols").await["rmi"], json!(["tcp"]));
        assert_eq!(
            send(&console, "methods").await,
            json!(["GET", "POST", "PUT", "DELETE"])
        );
        assert_eq!(send(&console, "HEALTH").await, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_blank_line_has_no_reply() {
        let console = console();
        assert!(console.handle_line("   ").await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let console = console();
        let reply = send(&console, "frobnicate now").await;
        assert_eq!(reply["kind"], "bad_request");
        assert!(reply["error"].as_str().unwrap().contains("frobnicate"));
    }

    // ── CRUD ────────────────────────────────────────────

    #[tokio::test]
    async fn test_crud_round() {
        let console = console();
        let id = create(
            &console,
            json!({"name": "echo", "framework": "grpc", "protocol": "tcp", "method": "GET"}),
        )
        .await;

        let fetched = send(&console, &format!("get {id}")).await;
        assert_eq!(fetched["implementation"], "return { ok: true };");
        assert_eq!(fetched["params"], json!([]));
        assert!(fetched["createdAt"].is_string());

        let updated = send(
            &console,
            &format!(r#"update {id} {{"id": "other", "name": "renamed"}}"#),
        )
        .await;
        assert_eq!(updated["id"], json!(id));
        assert_eq!(updated["name"], "renamed");

        assert_eq!(send(&console, "list").await.as_array().unwrap().len(), 1);
        assert_eq!(send(&console, &format!("delete {id}")).await, json!({"ok": true}));
        assert_eq!(send(&console, &format!("delete {id}")).await, json!({"ok": true}));
        assert_eq!(send(&console, "list").await, json!([]));
        assert_eq!(send(&console, &format!("get {id}")).await["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_create_errors() {
        let console = console();
        let reply = send(&console, r#"create {"name": "x"}"#).await;
        assert_eq!(reply["kind"], "validation");
        assert_eq!(reply["error"], "missing required field: framework");

        assert_eq!(send(&console, "create {not json").await["kind"], "bad_request");
        assert_eq!(send(&console, "create").await["kind"], "bad_request");
        assert_eq!(send(&console, "update only-an-id").await["kind"], "bad_request");
        assert_eq!(send(&console, "get").await["kind"], "bad_request");
    }

    // ── Invoke ──────────────────────────────────────────

    #[tokio::test]
    async fn test_invoke_with_json_args() {
        let console = console();
        let id = create(
            &console,
            json!({
                "name": "double", "framework": "rmi", "protocol": "tcp", "method": "POST",
                "params": [{"name": "x", "type": "number", "required": true}],
                "implementation": "(args) => args.x * 2"
            }),
        )
        .await;

        let reply = send(&console, &format!(r#"invoke {id} {{"x": 21}}"#)).await;
        assert_eq!(
            reply,
            json!({"ok": true, "framework": "rmi", "protocol": "tcp", "method": "POST", "result": 42})
        );

        let reply = send(&console, &format!("invoke {id}")).await;
        assert_eq!(reply["kind"], "validation");
        assert_eq!(reply["error"], "missing required parameter: x");

        let reply = send(&console, &format!("invoke {id} [1]")).await;
        assert_eq!(reply["kind"], "bad_request");
    }

    #[tokio::test]
    async fn test_invoke_with_key_value_args() {
        let console = console();
        let id = create(
            &console,
            json!({
                "name": "greet", "framework": "grpc", "protocol": "udp", "method": "GET",
                "params": [
                    {"name": "times", "type": "number"},
                    {"name": "loud", "type": "boolean"}
                ],
                "implementation": "const s = args.who.repeat(args.times); return args.loud ? s.toUpperCase() : s;"
            }),
        )
        .await;

        let reply = send(&console, &format!("invoke {id} who=ab times=2 loud=true")).await;
        assert_eq!(reply["result"], "ABAB");

        let reply = send(&console, &format!("invoke {id} times=two who=x")).await;
        assert_eq!(reply["kind"], "validation");

        let reply = send(&console, &format!("invoke {id} who")).await;
        assert_eq!(reply["kind"], "bad_request");
    }

    #[tokio::test]
    async fn test_invoke_failures() {
        let console = console();
        assert_eq!(send(&console, "invoke missing").await["kind"], "not_found");

        let id = create(
            &console,
            json!({
                "name": "broken", "framework": "grpc", "protocol": "tcp", "method": "GET",
                "implementation": "return args.a.b;"
            }),
        )
        .await;
        let reply = send(&console, &format!("invoke {id}")).await;
        assert_eq!(reply["kind"], "runtime");
        assert_eq!(
            reply["error"],
            "execution error: Cannot read properties of undefined (reading 'b')"
        );
    }

    #[tokio::test]
    async fn test_invoke_deadline() {
        let console = console_with(
            SandboxConfig {
                max_steps: 5_000_000,
                ..SandboxConfig::default()
            },
            InvokeConfig { timeout_ms: 1 },
        );
        let id = create(
            &console,
            json!({
                "name": "spin", "framework": "grpc", "protocol": "tcp", "method": "GET",
                "implementation": "while (true) {} return 1;"
            }),
        )
        .await;
        let reply = send(&console, &format!("invoke {id}")).await;
        assert_eq!(reply["kind"], "runtime");
        assert!(reply["error"].as_str().unwrap().contains("deadline"));
        // the console keeps serving while the abandoned run winds down
        assert_eq!(send(&console, "health").await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_status() {
        let console = console();
        let status = send(&console, "status").await;
        assert_eq!(status["procedures"], 0);
        assert_eq!(status["maxSteps"], 1_000_000);
        assert_eq!(status["timeoutMs"], 0);
        assert_eq!(send(&console, "help").await["commands"].as_array().unwrap().len(), USAGE.len());
    }
}
