use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::compiler::ImplementationCompiler;
use crate::error::Result;
use crate::procedure::Args;
use crate::sandbox::SandboxExecutor;
use crate::schema::ParameterSchema;
use crate::store::ProcedureStore;

/// Successful outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResult {
    pub ok: bool,
    pub framework: String,
    pub protocol: String,
    pub method: String,
    pub result: Value,
}

/// Runs registered procedures: lookup, validation, compilation, execution.
///
/// Read-only with respect to the store. The procedure is cloned out of
/// the store before anything runs, so no lock is held during evaluation,
/// and the implementation is compiled fresh on every call.
pub struct InvocationService {
    store: Arc<ProcedureStore>,
    sandbox: SandboxExecutor,
}

impl InvocationService {
    pub fn new(store: Arc<ProcedureStore>, sandbox: SandboxExecutor) -> Self {
        Self { store, sandbox }
    }

    pub fn store(&self) -> &Arc<ProcedureStore> {
        &self.store
    }

    pub fn sandbox(&self) -> &SandboxExecutor {
        &self.sandbox
    }

    /// Invokes procedure `id` with `args`. Stops at the first failure.
    pub fn invoke(&self, id: &str, args: &Args) -> Result<InvocationResult> {
        let outcome = self.try_invoke(id, args);
        if let Err(e) = &outcome {
            warn!("Invocation of {id} failed ({}): {e}", e.kind());
        }
        outcome
    }

    fn try_invoke(&self, id: &str, args: &Args) -> Result<InvocationResult> {
        let procedure = self.store.get(id)?;
        ParameterSchema::new(&procedure.params).validate(args)?;
        let callable = ImplementationCompiler::compile(&procedure.implementation)?;

        debug!(
            "Invoking {} ({id}) as {} with {} argument(s)",
            procedure.name,
            callable.kind(),
            args.len()
        );
        let result = self.sandbox.run(&callable, args)?;

        Ok(InvocationResult {
            ok: true,
            framework: procedure.framework,
            protocol: procedure.protocol,
            method: procedure.method,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::error::{Error, ValidationError};
    use crate::procedure::{ParamSpec, ParamType, ProcedureDraft};
    use crate::schema::ValueTag;
    use serde_json::json;

    fn service() -> InvocationService {
        InvocationService::new(
            Arc::new(ProcedureStore::new()),
            SandboxExecutor::new(SandboxConfig::default()),
        )
    }

    fn register(service: &InvocationService, implementation: &str, params: Vec<ParamSpec>) -> String {
        service
            .store()
            .create(ProcedureDraft {
                name: Some("calc".to_string()),
                framework: Some("grpc".to_string()),
                protocol: Some("tcp".to_string()),
                method: Some("POST".to_string()),
                params: Some(params),
                implementation: Some(implementation.to_string()),
                ..Default::default()
            })
            .unwrap()
            .id
    }

    fn args(value: Value) -> Args {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    // ── Validation ──────────────────────────────────────

    #[test]
    fn test_required_number_param() {
        let service = service();
        let id = register(
            &service,
            "return args.x;",
            vec![ParamSpec::new("x", ParamType::Number, true)],
        );

        assert_eq!(
            service.invoke(&id, &args(json!({}))),
            Err(Error::Validation(ValidationError::MissingRequiredParam(
                "x".to_string()
            )))
        );
        assert_eq!(
            service.invoke(&id, &args(json!({"x": "5"}))),
            Err(Error::Validation(ValidationError::TypeMismatch {
                name: "x".to_string(),
                expected: ParamType::Number,
                actual: ValueTag::String,
            }))
        );
        let result = service.invoke(&id, &args(json!({"x": 5}))).unwrap();
        assert_eq!(result.result, json!(5));
    }

    #[test]
    fn test_extra_args_pass_through() {
        let service = service();
        let id = register(&service, "args.extra", vec![]);
        let result = service.invoke(&id, &args(json!({"extra": [1]}))).unwrap();
        assert_eq!(result.result, json!([1]));
    }

    // ── Shapes ──────────────────────────────────────────

    #[test]
    fn test_shapes_agree() {
        let service = service();
        let explicit = register(&service, "return args.x + 1;", vec![]);
        let implicit = register(&service, "args.x + 1", vec![]);
        let arrow = register(&service, "(args) => args.x * 2", vec![]);

        let input = args(json!({"x": 5}));
        assert_eq!(service.invoke(&explicit, &input).unwrap().result, json!(6));
        assert_eq!(service.invoke(&implicit, &input).unwrap().result, json!(6));
        let input = args(json!({"x": 3}));
        assert_eq!(service.invoke(&arrow, &input).unwrap().result, json!(6));
    }

    #[test]
    fn test_result_packaging() {
        let service = service();
        let id = register(&service, "return { ok: true };", vec![]);
        let result = service.invoke(&id, &Args::new()).unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "ok": true,
                "framework": "grpc",
                "protocol": "tcp",
                "method": "POST",
                "result": {"ok": true}
            })
        );
    }

    // ── Failures ────────────────────────────────────────

    #[test]
    fn test_not_found() {
        let service = service();
        let err = service.invoke("missing", &Args::new()).unwrap_err();
        assert_eq!(err, Error::NotFound("missing".to_string()));
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_compile_error() {
        let service = service();
        let id = register(&service, "return (;", vec![]);
        let err = service.invoke(&id, &Args::new()).unwrap_err();
        assert_eq!(err.kind(), "compile");
    }

    #[test]
    fn test_runtime_error_carries_message() {
        let service = service();
        let id = register(&service, "throw new Error('upstream unavailable');", vec![]);
        // a statement list without return is not callable
        assert_eq!(service.invoke(&id, &Args::new()).unwrap_err().kind(), "compile");

        let id = register(
            &service,
            "if (args.fail) throw new Error('upstream unavailable'); return 1;",
            vec![],
        );
        let err = service.invoke(&id, &args(json!({"fail": true}))).unwrap_err();
        assert_eq!(
            err,
            Error::Runtime(crate::error::RuntimeError::new("upstream unavailable"))
        );
    }

    #[test]
    fn test_runaway_loop_is_stopped() {
        let service = InvocationService::new(
            Arc::new(ProcedureStore::new()),
            SandboxExecutor::new(SandboxConfig {
                max_steps: 5_000,
                ..SandboxConfig::default()
            }),
        );
        let id = register(&service, "while (true) {} return 1;", vec![]);
        let err = service.invoke(&id, &Args::new()).unwrap_err();
        assert_eq!(err.kind(), "runtime");

        // the store is still usable afterwards
        assert_eq!(service.store().len(), 1);
        let id = register(&service, "args.n", vec![]);
        assert_eq!(
            service.invoke(&id, &args(json!({"n": 2}))).unwrap().result,
            json!(2)
        );
    }

    // ── Isolation ───────────────────────────────────────

    #[test]
    fn test_invoke_does_not_touch_store_or_args() {
        let service = service();
        let id = register(&service, "args.x = 'changed'; return args.x;", vec![]);
        let before = service.store().list();
        let input = args(json!({"x": "original"}));

        let result = service.invoke(&id, &input).unwrap();
        assert_eq!(result.result, json!("changed"));
        assert_eq!(input["x"], json!("original"));
        assert_eq!(service.store().list(), before);
    }

    #[test]
    fn test_implementation_edit_takes_effect() {
        let service = service();
        let id = register(&service, "1", vec![]);
        assert_eq!(service.invoke(&id, &Args::new()).unwrap().result, json!(1));

        service
            .store()
            .update(
                &id,
                crate::procedure::ProcedurePatch {
                    implementation: Some("2".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(service.invoke(&id, &Args::new()).unwrap().result, json!(2));
    }
}
