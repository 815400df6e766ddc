//! [`HostDocument`] over a live page.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use readsel_core::{
    ControlSpec, DocumentError, DocumentResult, EventTarget, HostDocument, ListenerId, NodeId,
    ObserveOptions, PageEvent, Rect, ScrollBehavior, Selector, Shortcut, SyntheticEvent, Viewport,
};

use crate::bridge::{self, Reply};
use crate::error::CdpError;
use crate::protocol::{BindingCalled, CdpResponse, ExecutionContextCreated};
use crate::session::PageSession;

type Observer = Arc<Mutex<Option<mpsc::UnboundedSender<PageEvent>>>>;

/// A page driven through the injected bridge script.
///
/// Every [`HostDocument`] operation is one `window.__readsel.invoke` call.
/// Page events arrive through a runtime binding and are forwarded to the
/// stream returned by [`observe`](HostDocument::observe).
///
/// The bridge is installed into every document the page loads. Node ids do
/// not survive a navigation: the event stream ends when the document is
/// replaced, and [`page_loads`](Self::page_loads) reports the next one.
pub struct CdpDocument {
    session: PageSession,
    observer: Observer,
    loads: watch::Receiver<u64>,
    forwarder: JoinHandle<()>,
}

impl CdpDocument {
    /// Install the bridge into the page behind `session`.
    pub async fn attach(session: PageSession) -> Result<Self, CdpError> {
        let events = session.take_events().ok_or_else(|| {
            CdpError::InvalidResponse("Session events already taken".to_string())
        })?;

        session.add_binding(bridge::BINDING_NAME).await?;
        session.add_script_on_new_document(bridge::SOURCE).await?;
        // The current document may be replaced while this runs; the next one
        // gets the bridge from the new-document script.
        match session.evaluate(bridge::SOURCE).await {
            Ok(_) => debug!("Page bridge installed in target {}", session.target_id()),
            Err(e) => warn!("Page bridge not installed in current document: {}", e),
        }

        let observer: Observer = Arc::new(Mutex::new(None));
        let (loads_tx, loads) = watch::channel(0);
        let forwarder = tokio::spawn(forward(
            events,
            observer.clone(),
            loads_tx,
            session.target_id().to_string(),
        ));

        Ok(Self {
            session,
            observer,
            loads,
            forwarder,
        })
    }

    pub fn session(&self) -> &PageSession {
        &self.session
    }

    /// Changes whenever the page gets a new main document after this call.
    ///
    /// `changed()` fails once the session is closed.
    pub fn page_loads(&self) -> watch::Receiver<u64> {
        let mut loads = self.loads.clone();
        loads.borrow_and_update();
        loads
    }

    async fn invoke<T: DeserializeOwned>(&self, method: &str, args: &[Value]) -> DocumentResult<T> {
        let value = self
            .session
            .evaluate(&bridge::invocation(method, args))
            .await?;
        let reply: Reply = serde_json::from_value(value)
            .map_err(|e| DocumentError::Backend(format!("Malformed reply to {}: {}", method, e)))?;
        serde_json::from_value(reply.into_result()?)
            .map_err(|e| DocumentError::Backend(format!("Unexpected result of {}: {}", method, e)))
    }
}

impl Drop for CdpDocument {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Forward binding calls of the page script to the current observer and
/// count main-frame document loads of `frame_id`.
async fn forward(
    mut events: mpsc::UnboundedReceiver<CdpResponse>,
    observer: Observer,
    loads: watch::Sender<u64>,
    frame_id: String,
) {
    while let Some(event) = events.recv().await {
        match event.method.as_deref() {
            Some("Runtime.bindingCalled") => {
                let Some(params) = event.params else { continue };
                let call: BindingCalled = match serde_json::from_value(params) {
                    Ok(call) => call,
                    Err(e) => {
                        warn!("Malformed binding call: {}", e);
                        continue;
                    }
                };
                if call.name != bridge::BINDING_NAME {
                    continue;
                }
                match bridge::decode(&call.payload) {
                    Ok(page_event) => {
                        if let Some(tx) = observer.lock().as_ref() {
                            let _ = tx.send(page_event);
                        }
                    }
                    Err(e) => warn!("Undecodable page event {}: {}", call.payload, e),
                }
            }
            Some("Runtime.executionContextsCleared") => {
                if observer.lock().take().is_some() {
                    info!("Document replaced; closing event stream");
                }
            }
            Some("Runtime.executionContextCreated") => {
                let Some(params) = event.params else { continue };
                match serde_json::from_value::<ExecutionContextCreated>(params) {
                    Ok(created) if created.context.is_default_for(&frame_id) => {
                        debug!(
                            "New document context {} ({})",
                            created.context.id, created.context.origin
                        );
                        loads.send_modify(|count| *count += 1);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Malformed execution context: {}", e),
                }
            }
            Some(method) => trace!("Ignoring {}", method),
            None => {}
        }
    }

    if observer.lock().take().is_some() {
        warn!("CDP session closed; closing event stream");
    }
}

fn node(id: NodeId) -> Value {
    json!(id.0)
}

#[async_trait]
impl HostDocument for CdpDocument {
    async fn wait_until_ready(&self) -> DocumentResult<()> {
        let _: bool = self.invoke("ready", &[]).await?;
        Ok(())
    }

    async fn query_all(
        &self,
        scope: Option<NodeId>,
        pattern: &Selector,
    ) -> DocumentResult<Vec<NodeId>> {
        let scope = scope.map(node).unwrap_or(Value::Null);
        self.invoke("queryAll", &[scope, json!(pattern.source())])
            .await
    }

    async fn query(&self, scope: NodeId, pattern: &Selector) -> DocumentResult<Option<NodeId>> {
        self.invoke("query", &[node(scope), json!(pattern.source())])
            .await
    }

    async fn closest(&self, id: NodeId, pattern: &Selector) -> DocumentResult<Option<NodeId>> {
        self.invoke("closest", &[node(id), json!(pattern.source())])
            .await
    }

    async fn is_connected(&self, id: NodeId) -> DocumentResult<bool> {
        self.invoke("isConnected", &[node(id)]).await
    }

    async fn detached(&self, nodes: &[NodeId]) -> DocumentResult<Vec<NodeId>> {
        let nodes: Vec<Value> = nodes.iter().copied().map(node).collect();
        self.invoke("detachedAmong", &[Value::Array(nodes)]).await
    }

    async fn insert_control(&self, header: NodeId, spec: &ControlSpec) -> DocumentResult<NodeId> {
        let spec = serde_json::to_value(spec)
            .map_err(|e| DocumentError::Backend(e.to_string()))?;
        self.invoke("insertControl", &[node(header), spec]).await
    }

    async fn remove_node(&self, id: NodeId) -> DocumentResult<()> {
        let _: Value = self.invoke("removeNode", &[node(id)]).await?;
        Ok(())
    }

    async fn ensure_positioned(&self, id: NodeId) -> DocumentResult<()> {
        let _: Value = self.invoke("ensurePositioned", &[node(id)]).await?;
        Ok(())
    }

    async fn bounding_rect(&self, id: NodeId) -> DocumentResult<Rect> {
        self.invoke("boundingRect", &[node(id)]).await
    }

    async fn viewport(&self) -> DocumentResult<Viewport> {
        self.invoke("viewport", &[]).await
    }

    async fn scroll_to(&self, top: f64, behavior: ScrollBehavior) -> DocumentResult<()> {
        let behavior = serde_json::to_value(behavior)
            .map_err(|e| DocumentError::Backend(e.to_string()))?;
        let _: Value = self.invoke("scrollTo", &[json!(top), behavior]).await?;
        Ok(())
    }

    async fn select_contents(&self, id: NodeId) -> DocumentResult<Option<String>> {
        self.invoke("selectContents", &[node(id)]).await
    }

    async fn dispatch(&self, target: EventTarget, event: SyntheticEvent) -> DocumentResult<()> {
        let target = match target {
            EventTarget::Document => Value::Null,
            EventTarget::Node(id) => node(id),
        };
        let event = serde_json::to_value(&event)
            .map_err(|e| DocumentError::Backend(e.to_string()))?;
        let _: Value = self.invoke("dispatch", &[target, event]).await?;
        Ok(())
    }

    async fn add_shortcut_listener(&self, shortcut: &Shortcut) -> DocumentResult<ListenerId> {
        let shortcut = json!({
            "key": shortcut.key,
            "alt": shortcut.alt,
            "ctrl": shortcut.ctrl,
            "shift": shortcut.shift,
            "meta": shortcut.meta,
        });
        self.invoke("addShortcut", &[shortcut]).await
    }

    async fn remove_shortcut_listener(&self, listener: ListenerId) -> DocumentResult<()> {
        let _: Value = self
            .invoke("removeShortcut", &[json!(listener.0)])
            .await?;
        Ok(())
    }

    async fn observe(
        &self,
        options: &ObserveOptions,
    ) -> DocumentResult<mpsc::UnboundedReceiver<PageEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Installed before the page starts reporting so no batch is lost.
        *self.observer.lock() = Some(tx);

        let options = serde_json::to_value(options)
            .map_err(|e| DocumentError::Backend(e.to_string()))?;
        if let Err(e) = self.invoke::<Value>("observe", &[options]).await {
            self.observer.lock().take();
            return Err(e);
        }
        Ok(rx)
    }

    async fn disconnect(&self) -> DocumentResult<()> {
        if self.observer.lock().take().is_none() {
            return Err(DocumentError::NotObserving);
        }
        let _: Value = self.invoke("disconnect", &[]).await?;
        Ok(())
    }
}
