//! CDP page session for interacting with a single page.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::Transport;
use crate::error::CdpError;
use crate::protocol::{CdpResponse, EvaluateResult};

/// A session attached to a single page/target.
pub struct PageSession {
    target_id: String,
    session_id: String,
    /// Shared with the client.
    transport: Arc<Transport>,
    /// Event stream of this session until someone takes it.
    events: Mutex<Option<mpsc::UnboundedReceiver<CdpResponse>>>,
}

impl PageSession {
    pub(crate) fn new(
        target_id: String,
        session_id: String,
        transport: Arc<Transport>,
        events: mpsc::UnboundedReceiver<CdpResponse>,
    ) -> Self {
        Self {
            target_id,
            session_id,
            transport,
            events: Mutex::new(Some(events)),
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send a CDP command to this page session.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CdpError> {
        self.transport
            .call(method, params, Some(&self.session_id))
            .await
    }

    pub(crate) async fn enable_domains(&self) -> Result<(), CdpError> {
        self.call("Page.enable", None).await?;
        self.call("Runtime.enable", None).await?;

        debug!("Enabled CDP domains for session {}", self.session_id);
        Ok(())
    }

    /// Evaluate a JavaScript expression, awaiting a returned promise, and
    /// return its value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, CdpError> {
        let result = self
            .call(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;

        let result: EvaluateResult = serde_json::from_value(result)?;
        if let Some(exception) = result.exception_details {
            return Err(CdpError::JavaScript(exception.message()));
        }
        Ok(result.result.value.unwrap_or(Value::Null))
    }

    /// Expose `window.<name>(payload)` to the page; calls arrive as
    /// `Runtime.bindingCalled` events.
    pub async fn add_binding(&self, name: &str) -> Result<(), CdpError> {
        self.call("Runtime.addBinding", Some(json!({ "name": name })))
            .await?;
        Ok(())
    }

    /// Run `source` in every document this page loads from now on, before
    /// the page's own scripts.
    pub async fn add_script_on_new_document(&self, source: &str) -> Result<(), CdpError> {
        self.call(
            "Page.addScriptToEvaluateOnNewDocument",
            Some(json!({ "source": source })),
        )
        .await?;
        Ok(())
    }

    /// Take this session's event stream. Only the first call gets it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<CdpResponse>> {
        self.events.lock().take()
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        self.transport.router.unsubscribe(&self.session_id);
    }
}
