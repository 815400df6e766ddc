//! CDP WebSocket client.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::CdpError;
use crate::protocol::{BrowserVersion, CdpRequest, CdpResponse, PageInfo};
use crate::session::PageSession;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Routes incoming messages: responses to the request waiting on them,
/// events to the channel of the session they belong to.
#[derive(Default)]
pub(crate) struct Router {
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, CdpError>>>>,
    sessions: RwLock<HashMap<String, mpsc::UnboundedSender<CdpResponse>>>,
}

impl Router {
    pub(crate) fn register(&self, id: u64) -> oneshot::Receiver<Result<Value, CdpError>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        rx
    }

    pub(crate) fn forget(&self, id: u64) {
        self.pending.lock().remove(&id);
    }

    pub(crate) fn subscribe(&self, session_id: &str) -> mpsc::UnboundedReceiver<CdpResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.write().insert(session_id.to_string(), tx);
        rx
    }

    pub(crate) fn unsubscribe(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    /// Route one text frame.
    pub(crate) fn route(&self, text: &str) {
        let resp = match serde_json::from_str::<CdpResponse>(text) {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Failed to parse CDP message: {}", e);
                return;
            }
        };

        if let Some(id) = resp.id {
            let Some(tx) = self.pending.lock().remove(&id) else {
                trace!("Response to unknown request {}", id);
                return;
            };
            let result = match resp.error {
                Some(error) => Err(CdpError::Protocol {
                    code: error.code,
                    message: error.message,
                }),
                None => Ok(resp.result.unwrap_or(Value::Null)),
            };
            let _ = tx.send(result);
        } else if resp.method.is_some() {
            let session_id = resp.session_id.clone().unwrap_or_default();
            if let Some(tx) = self.sessions.read().get(&session_id) {
                let _ = tx.send(resp);
            }
        }
    }

    /// Fail every pending request and end every session's event stream.
    pub(crate) fn close(&self) {
        self.pending.lock().clear();
        self.sessions.write().clear();
    }
}

/// Request side of the connection, shared by the client and its sessions.
pub(crate) struct Transport {
    ws_tx: tokio::sync::Mutex<WsSink>,
    request_id: AtomicU64,
    pub(crate) router: Arc<Router>,
}

impl Transport {
    /// Send a CDP command and wait for its response.
    pub(crate) async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value, CdpError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);

        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(|s| s.to_string()),
        };

        let json = serde_json::to_string(&request)?;
        trace!("CDP send: {}", json);

        let rx = self.router.register(id);
        {
            let mut ws = self.ws_tx.lock().await;
            if let Err(e) = ws.send(Message::Text(json.into())).await {
                self.router.forget(id);
                return Err(e.into());
            }
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CdpError::SessionClosed),
            Err(_) => {
                self.router.forget(id);
                Err(CdpError::Timeout(format!("Request {} timed out", method)))
            }
        }
    }
}

/// CDP client connected to one browser.
pub struct CdpClient {
    /// HTTP endpoint for page discovery.
    http_endpoint: Url,
    /// Browser WebSocket URL.
    browser_ws_url: String,
    transport: Arc<Transport>,
    recv_task: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a browser.
    ///
    /// `endpoint` is either the HTTP debugging endpoint
    /// (`http://localhost:9222`), from which the browser WebSocket is
    /// discovered through `/json/version`, or the browser WebSocket URL
    /// itself.
    pub async fn connect(endpoint: &str) -> Result<Self, CdpError> {
        let endpoint = Url::parse(endpoint)?;
        let http_endpoint = http_base(&endpoint)?;

        let browser_ws_url = match endpoint.scheme() {
            "ws" | "wss" => endpoint.to_string(),
            _ => {
                let version_url = http_endpoint.join("json/version")?;
                debug!("Fetching browser version from {}", version_url);

                let version: BrowserVersion = reqwest::get(version_url.as_str())
                    .await
                    .map_err(|e| CdpError::BrowserNotAvailable(format!("{}: {}", endpoint, e)))?
                    .json()
                    .await
                    .map_err(|e| CdpError::BrowserNotAvailable(format!("{}: {}", endpoint, e)))?;

                debug!("Connected to browser: {}", version.browser);
                version.web_socket_debugger_url
            }
        };

        let (ws_stream, _) = tokio_tungstenite::connect_async(browser_ws_url.as_str())
            .await
            .map_err(|e| CdpError::ConnectionFailed(format!("WebSocket: {}", e)))?;
        let (ws_sink, ws_source) = ws_stream.split();

        let router = Arc::new(Router::default());
        let recv_task = tokio::spawn(Self::receive_loop(ws_source, router.clone()));
        let transport = Arc::new(Transport {
            ws_tx: tokio::sync::Mutex::new(ws_sink),
            request_id: AtomicU64::new(1),
            router,
        });

        debug!("CDP client connected to {}", browser_ws_url);

        Ok(Self {
            http_endpoint,
            browser_ws_url,
            transport,
            recv_task,
        })
    }

    async fn receive_loop(mut ws_source: WsSource, router: Arc<Router>) {
        while let Some(msg) = ws_source.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    trace!("CDP recv: {}", text);
                    router.route(&text);
                }
                Ok(Message::Close(_)) => {
                    debug!("WebSocket closed");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        router.close();
    }

    /// Send a browser-level CDP command.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CdpError> {
        self.transport.call(method, params, None).await
    }

    pub fn browser_ws_url(&self) -> &str {
        &self.browser_ws_url
    }

    // ========================================================================
    // Target Management
    // ========================================================================

    /// List all targets known to the browser.
    pub async fn list_pages(&self) -> Result<Vec<PageInfo>, CdpError> {
        let url = self.http_endpoint.join("json/list")?;
        let pages: Vec<PageInfo> = reqwest::get(url.as_str()).await?.json().await?;
        Ok(pages)
    }

    /// First page whose URL contains `fragment`.
    pub async fn find_page(&self, fragment: &str) -> Result<PageInfo, CdpError> {
        self.list_pages()
            .await?
            .into_iter()
            .find(|page| page.is_page() && page.url.contains(fragment))
            .ok_or_else(|| CdpError::PageNotFound(fragment.to_string()))
    }

    /// Open `url` in a new tab and attach to it.
    pub async fn open_page(&self, url: &str) -> Result<PageSession, CdpError> {
        let result = self
            .call("Target.createTarget", Some(json!({ "url": url })))
            .await?;
        let target_id = result["targetId"]
            .as_str()
            .ok_or_else(|| CdpError::InvalidResponse("Missing targetId".to_string()))?;
        debug!("Opened {} as {}", url, target_id);
        self.attach_page(target_id).await
    }

    /// Attach to an existing page.
    pub async fn attach_page(&self, target_id: &str) -> Result<PageSession, CdpError> {
        let result = self
            .call(
                "Target.attachToTarget",
                Some(json!({
                    "targetId": target_id,
                    "flatten": true
                })),
            )
            .await?;

        let session_id = result["sessionId"]
            .as_str()
            .ok_or_else(|| CdpError::InvalidResponse("Missing sessionId".to_string()))?
            .to_string();

        let events = self.transport.router.subscribe(&session_id);
        let session = PageSession::new(
            target_id.to_string(),
            session_id,
            self.transport.clone(),
            events,
        );
        session.enable_domains().await?;

        Ok(session)
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// HTTP base of a debugging endpoint given as `http(s)://` or `ws(s)://`.
pub(crate) fn http_base(endpoint: &Url) -> Result<Url, CdpError> {
    let scheme = match endpoint.scheme() {
        "http" | "ws" => "http",
        "https" | "wss" => "https",
        other => {
            return Err(CdpError::ConnectionFailed(format!(
                "Unsupported endpoint scheme '{}'",
                other
            )));
        }
    };

    let mut base = endpoint.clone();
    base.set_scheme(scheme)
        .map_err(|_| CdpError::ConnectionFailed(format!("Cannot use {} over HTTP", endpoint)))?;
    base.set_path("/");
    base.set_query(None);
    base.set_fragment(None);
    Ok(base)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
