//! Deterministic in-process gateway.
//!
//! Replies are scripted per caller (the stage name carried in [`Attribution`])
//! and every call is recorded, so tests can assert both what a stage sent and
//! how many times it reached the model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use super::error::GatewayError;
use super::types::{Attribution, ChatTurn};
use super::ModelGateway;

/// One call as seen by the gateway.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub caller: &'static str,
    pub run_id: Option<Uuid>,
    pub system_instruction: String,
    pub turns: Vec<ChatTurn>,
}

impl RecordedCall {
    /// Content of the final turn, which stages use for the request payload.
    pub fn last_turn(&self) -> &str {
        self.turns.last().map(|t| t.content.as_str()).unwrap_or("")
    }
}

type Responder = Arc<dyn Fn(&RecordedCall) -> String + Send + Sync>;

#[derive(Clone)]
enum Script {
    Text(String),
    Dynamic(Responder),
    Unreachable(String),
}

#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<HashMap<&'static str, Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call from `caller` with `text`.
    pub fn on(self, caller: &'static str, text: impl Into<String>) -> Self {
        self.set(caller, Script::Text(text.into()))
    }

    /// Answer calls from `caller` by computing a reply from the call.
    pub fn on_call<F>(self, caller: &'static str, f: F) -> Self
    where
        F: Fn(&RecordedCall) -> String + Send + Sync + 'static,
    {
        self.set(caller, Script::Dynamic(Arc::new(f)))
    }

    /// Fail every call from `caller` as if the provider were unreachable.
    pub fn unreachable(self, caller: &'static str, message: impl Into<String>) -> Self {
        self.set(caller, Script::Unreachable(message.into()))
    }

    fn set(self, caller: &'static str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(caller, script);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn calls_for(&self, caller: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.caller == caller)
            .collect()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn complete(
        &self,
        system_instruction: &str,
        turns: &[ChatTurn],
        attribution: Attribution,
    ) -> Result<String, GatewayError> {
        let call = RecordedCall {
            caller: attribution.caller,
            run_id: attribution.run_id,
            system_instruction: system_instruction.to_string(),
            turns: turns.to_vec(),
        };
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.clone());

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(attribution.caller)
            .cloned();

        match script {
            Some(Script::Text(text)) => Ok(text),
            Some(Script::Dynamic(f)) => Ok(f(&call)),
            Some(Script::Unreachable(message)) => {
                Err(GatewayError::provider("scripted", message, true))
            }
            None => Err(GatewayError::provider(
                "scripted",
                format!("no scripted reply for {}", attribution.caller),
                false,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_and_routes_by_caller() {
        let gateway = ScriptedGateway::new()
            .on("a", "alpha")
            .on_call("b", |call| format!("turns={}", call.turns.len()));

        let a = gateway
            .complete("sys", &[ChatTurn::user("x")], Attribution::new("a"))
            .await
            .unwrap();
        let b = gateway
            .complete(
                "sys",
                &[ChatTurn::user("x"), ChatTurn::assistant("y")],
                Attribution::new("b"),
            )
            .await
            .unwrap();

        assert_eq!(a, "alpha");
        assert_eq!(b, "turns=2");
        assert_eq!(gateway.call_count(), 2);
        assert_eq!(gateway.calls_for("b")[0].last_turn(), "y");
    }

    #[tokio::test]
    async fn unscripted_caller_is_a_gateway_error() {
        let gateway = ScriptedGateway::new();
        let err = gateway
            .complete("sys", &[], Attribution::new("nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Provider { .. }));
    }
}
