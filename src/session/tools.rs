//! Tool dispatch — routes tool calls from the remote endpoint to
//! host-provided executors
//!
//! Every call carrying both an id and a name yields exactly one correlated
//! result, even when the name is unrecognized or the executor fails; a
//! failing call never blocks the rest of its batch or crashes the session.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::transport::{ToolCall, ToolResult};
use crate::Result;

/// Fixed sentinel returned when a tool call cannot be executed
pub const TOOL_ERROR_SENTINEL: &str = "error: tool execution failed";

/// A host-provided tool executor
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the call's argument mapping
    ///
    /// # Errors
    ///
    /// Implementations may fail; failures are converted to the sentinel
    /// result by the dispatcher, never propagated
    async fn call(&self, args: &serde_json::Map<String, serde_json::Value>) -> Result<String>;
}

/// Fixed registry of tool executors, looked up by name at dispatch time
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Registered tool names
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Resolve every call in one server message and collect the results
    ///
    /// Calls missing an id or a name are skipped (nothing to correlate);
    /// everything else yields exactly one result. All calls resolve before
    /// this returns so the caller can send a single batched response.
    pub async fn dispatch_batch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            if call.id.is_empty() || call.name.is_empty() {
                tracing::warn!(id = %call.id, name = %call.name, "skipping malformed tool call");
                continue;
            }

            let output = match self.handlers.get(&call.name) {
                Some(handler) => match handler.call(&call.args).await {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::warn!(tool = %call.name, error = %e, "tool executor failed");
                        TOOL_ERROR_SENTINEL.to_string()
                    }
                },
                None => {
                    tracing::warn!(tool = %call.name, "unknown tool requested");
                    TOOL_ERROR_SENTINEL.to_string()
                }
            };

            results.push(ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                response: serde_json::json!({ "output": output }),
            });
        }

        results
    }
}
