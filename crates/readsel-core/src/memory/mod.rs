//! In-memory host document.
//!
//! [`MemoryDocument`] implements [`HostDocument`] over a small arena tree so
//! the augmenter can be driven without a browser. Besides the trait it offers
//! a builder API to shape the page the way a host page would, inspection
//! helpers, simulated clicks and key presses, and fault injection.
//!
//! While observed, every structural change under `body` and every filtered
//! attribute change is delivered as its own mutation notification, including
//! changes made through the [`HostDocument`] operations themselves.

mod tree;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::document::{
    ControlSpec, EventTarget, HostDocument, KeyPress, ListenerId, MutationKind, MutationRecord,
    NodeId, ObserveOptions, PageEvent, Rect, ScrollBehavior, SyntheticEvent, Viewport,
};
use crate::error::{DocumentError, DocumentResult};
use crate::selector::Selector;
use crate::shortcut::Shortcut;

use tree::Tree;

/// [`HostDocument`] operations, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    WaitUntilReady,
    QueryAll,
    Query,
    Closest,
    IsConnected,
    Detached,
    InsertControl,
    RemoveNode,
    EnsurePositioned,
    BoundingRect,
    Viewport,
    ScrollTo,
    SelectContents,
    Dispatch,
    AddListener,
    RemoveListener,
    Observe,
    Disconnect,
}

/// Remaining injected failures, at least one; `None` fails forever.
#[derive(Debug, Clone, Copy)]
struct Fault {
    remaining: Option<u32>,
}

struct Observer {
    tx: mpsc::UnboundedSender<PageEvent>,
    options: ObserveOptions,
    activation: Option<Selector>,
    targets: Option<Selector>,
}

struct State {
    tree: Tree,
    observer: Option<Observer>,
    listeners: BTreeMap<ListenerId, Shortcut>,
    next_listener: u64,
    controls: HashSet<NodeId>,
    selection: Option<(NodeId, String)>,
    dispatched: Vec<(EventTarget, SyntheticEvent)>,
    scrolls: Vec<(f64, ScrollBehavior)>,
    viewport: Viewport,
    faults: HashMap<Operation, Fault>,
    delays: HashMap<Operation, Duration>,
    calls: HashMap<Operation, u32>,
}

impl State {
    /// Count the call and consume an injected failure, if any.
    fn enter(&mut self, op: Operation) -> DocumentResult<()> {
        *self.calls.entry(op).or_default() += 1;

        let Some(fault) = self.faults.get_mut(&op) else {
            return Ok(());
        };
        let remaining = fault.remaining;
        match remaining {
            None => {}
            Some(n) if n > 1 => fault.remaining = Some(n - 1),
            Some(_) => {
                self.faults.remove(&op);
            }
        }
        Err(DocumentError::Injected(format!("{:?}", op)))
    }

    fn known(&self, node: NodeId) -> DocumentResult<()> {
        if self.tree.contains(node) {
            Ok(())
        } else {
            Err(DocumentError::NodeGone(node))
        }
    }

    fn send(&mut self, event: PageEvent) -> bool {
        let Some(observer) = &self.observer else {
            return false;
        };
        if observer.tx.send(event).is_err() {
            self.observer = None;
            return false;
        }
        true
    }

    fn record(&mut self, mut record: MutationRecord) {
        let Some(observer) = &self.observer else {
            return;
        };
        let body = self.tree.body();
        let in_scope = if observer.options.subtree {
            self.tree.is_connected(record.target)
        } else {
            record.target == body
        };
        let wanted = match &record.kind {
            MutationKind::ChildList => observer.options.child_list,
            MutationKind::Attributes { name } => observer
                .options
                .attribute_filter
                .iter()
                .any(|f| f.eq_ignore_ascii_case(name)),
        };
        if !(in_scope && wanted) {
            return;
        }
        if let Some(target) = observer
            .targets
            .as_ref()
            .and_then(|pattern| self.tree.closest(record.target, pattern))
        {
            record.target = target;
        }
        self.send(PageEvent::Mutations(vec![record]));
    }

    fn append(&mut self, parent: NodeId, child: NodeId) -> DocumentResult<()> {
        let previous = self.tree.append(parent, child).map_err(DocumentError::NodeGone)?;
        if let Some(previous) = previous {
            self.record(MutationRecord::child_list(previous));
        }
        self.record(MutationRecord::child_list(parent));
        Ok(())
    }

    fn detach(&mut self, node: NodeId) {
        // Record against the parent while it is still known to be connected.
        let parent = self.tree.parent(node);
        let connected = parent.is_some_and(|p| self.tree.is_connected(p));
        if let Some(parent) = self.tree.detach(node) {
            if connected {
                self.record(MutationRecord::child_list(parent));
            }
        }
        if self.selection.as_ref().is_some_and(|(n, _)| self.tree.is_inclusive_ancestor(node, *n)) {
            self.selection = None;
        }
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if self.tree.set_attribute(node, name, value) {
            self.record(MutationRecord::attribute(node, name.to_ascii_lowercase()));
        }
    }

    /// Element receiving a delegated click on `node`, if any.
    fn activation_target(&self, node: NodeId) -> Option<NodeId> {
        let pattern = self.observer.as_ref()?.activation.as_ref()?;
        self.tree.closest(node, pattern)
    }
}

/// A host document living entirely in memory.
pub struct MemoryDocument {
    state: Mutex<State>,
    ready: watch::Sender<bool>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// An empty, fully loaded document with an 800px viewport.
    pub fn new() -> Self {
        let doc = Self::loading();
        doc.finish_loading();
        doc
    }

    /// An empty document still in the `loading` state.
    pub fn loading() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            state: Mutex::new(State {
                tree: Tree::new(),
                observer: None,
                listeners: BTreeMap::new(),
                next_listener: 1,
                controls: HashSet::new(),
                selection: None,
                dispatched: Vec::new(),
                scrolls: Vec::new(),
                viewport: Viewport {
                    scroll_y: 0.0,
                    inner_height: 800.0,
                },
                faults: HashMap::new(),
                delays: HashMap::new(),
                calls: HashMap::new(),
            }),
            ready,
        }
    }

    pub fn finish_loading(&self) {
        self.ready.send_replace(true);
    }

    pub fn body(&self) -> NodeId {
        self.state.lock().tree.body()
    }

    // Builder API.

    /// Create a detached element.
    pub fn element(&self, tag: &str) -> NodeId {
        self.state.lock().tree.create_element(tag)
    }

    /// Create an element with `class` and append it to `parent`.
    pub fn append_element(&self, parent: NodeId, tag: &str, class: &str) -> NodeId {
        let mut state = self.state.lock();
        let node = state.tree.create_element(tag);
        if !class.is_empty() {
            state.tree.set_attribute(node, "class", class);
        }
        if let Err(e) = state.append(parent, node) {
            tracing::warn!("append_element: {}", e);
        }
        node
    }

    /// Append `child`, moving it if it is attached elsewhere.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> DocumentResult<()> {
        self.state.lock().append(parent, child)
    }

    pub fn append_text(&self, parent: NodeId, text: &str) -> NodeId {
        let mut state = self.state.lock();
        let node = state.tree.create_text(text);
        if let Err(e) = state.append(parent, node) {
            tracing::warn!("append_text: {}", e);
        }
        node
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        self.state.lock().set_attribute(node, name, value);
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) {
        let mut state = self.state.lock();
        if state.tree.remove_attribute(node, name) {
            state.record(MutationRecord::attribute(node, name.to_ascii_lowercase()));
        }
    }

    pub fn add_class(&self, node: NodeId, class: &str) {
        let mut state = self.state.lock();
        let mut classes = state.tree.classes(node);
        if !classes.iter().any(|c| c == class) {
            classes.push(class.to_string());
            state.set_attribute(node, "class", &classes.join(" "));
        }
    }

    pub fn remove_class(&self, node: NodeId, class: &str) {
        let mut state = self.state.lock();
        let mut classes = state.tree.classes(node);
        if classes.iter().any(|c| c == class) {
            classes.retain(|c| c != class);
            state.set_attribute(node, "class", &classes.join(" "));
        }
    }

    /// Detach `node` from its parent.
    pub fn remove(&self, node: NodeId) {
        self.state.lock().detach(node);
    }

    /// Set the layout box of `node` in page coordinates.
    pub fn set_rect(&self, node: NodeId, rect: Rect) {
        if let Some(n) = self.state.lock().tree.get_mut(node) {
            n.rect = rect;
        }
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.state.lock().viewport = viewport;
    }

    // Inspection API.

    pub fn text_content(&self, node: NodeId) -> String {
        self.state.lock().tree.text_content(node)
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        self.state.lock().tree.is_connected(node)
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.state.lock().tree.attribute(node, name).map(str::to_string)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.state.lock().tree.children(node).to_vec()
    }

    /// Elements under `scope` matching `pattern`.
    pub fn find_all(&self, scope: NodeId, pattern: &Selector) -> Vec<NodeId> {
        self.state.lock().tree.query_all(scope, pattern)
    }

    /// Controls created by [`HostDocument::insert_control`] still under `scope`.
    pub fn controls_in(&self, scope: NodeId) -> Vec<NodeId> {
        let state = self.state.lock();
        state
            .tree
            .descendants(scope)
            .into_iter()
            .filter(|n| state.controls.contains(n))
            .collect()
    }

    pub fn active_listeners(&self) -> Vec<ListenerId> {
        self.state.lock().listeners.keys().copied().collect()
    }

    /// Current selection: the selected node and its text.
    pub fn selection(&self) -> Option<(NodeId, String)> {
        self.state.lock().selection.clone()
    }

    pub fn dispatched(&self) -> Vec<(EventTarget, SyntheticEvent)> {
        self.state.lock().dispatched.clone()
    }

    pub fn scroll_requests(&self) -> Vec<(f64, ScrollBehavior)> {
        self.state.lock().scrolls.clone()
    }

    pub fn scroll_y(&self) -> f64 {
        self.state.lock().viewport.scroll_y
    }

    pub fn inline_position(&self, node: NodeId) -> Option<String> {
        self.state.lock().tree.inline_position(node)
    }

    pub fn is_observed(&self) -> bool {
        self.state.lock().observer.is_some()
    }

    // Input simulation.

    /// Click `node`. Returns whether the click activated a control.
    pub fn click(&self, node: NodeId) -> bool {
        let mut state = self.state.lock();
        if !state.tree.is_connected(node) {
            return false;
        }
        match state.activation_target(node) {
            Some(control) => state.send(PageEvent::ControlActivated { control }),
            None => false,
        }
    }

    /// Press a key. Returns how many shortcut listeners fired.
    pub fn press_key(&self, press: &KeyPress) -> usize {
        let mut state = self.state.lock();
        let fired: Vec<ListenerId> = state
            .listeners
            .iter()
            .filter(|(_, shortcut)| shortcut.matches(press))
            .map(|(id, _)| *id)
            .collect();
        fired
            .into_iter()
            .filter(|listener| state.send(PageEvent::ShortcutTriggered { listener: *listener }))
            .count()
    }

    // Fault injection.

    /// Fail the next `count` calls of `op`.
    pub fn fail_next(&self, op: Operation, count: u32) {
        if count > 0 {
            self.state.lock().faults.insert(op, Fault { remaining: Some(count) });
        }
    }

    /// Fail every call of `op` until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&self, op: Operation) {
        self.state.lock().faults.insert(op, Fault { remaining: None });
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Make every call of `op` take `delay` before it touches the page.
    pub fn delay(&self, op: Operation, delay: Duration) {
        self.state.lock().delays.insert(op, delay);
    }

    async fn lag(&self, op: Operation) {
        let delay = self.state.lock().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// How many times `op` has been called.
    pub fn calls(&self, op: Operation) -> u32 {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HostDocument for MemoryDocument {
    async fn wait_until_ready(&self) -> DocumentResult<()> {
        self.lag(Operation::WaitUntilReady).await;
        self.state.lock().enter(Operation::WaitUntilReady)?;
        let mut ready = self.ready.subscribe();
        ready
            .wait_for(|ready| *ready)
            .await
            .map_err(|e| DocumentError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn query_all(
        &self,
        scope: Option<NodeId>,
        pattern: &Selector,
    ) -> DocumentResult<Vec<NodeId>> {
        self.lag(Operation::QueryAll).await;
        let mut state = self.state.lock();
        state.enter(Operation::QueryAll)?;
        match scope {
            Some(scope) => {
                state.known(scope)?;
                Ok(state.tree.query_all(scope, pattern))
            }
            None => {
                let body = state.tree.body();
                let mut found = state.tree.query_all(body, pattern);
                if pattern.matches(&state.tree, body) {
                    found.insert(0, body);
                }
                Ok(found)
            }
        }
    }

    async fn query(&self, scope: NodeId, pattern: &Selector) -> DocumentResult<Option<NodeId>> {
        self.lag(Operation::Query).await;
        let mut state = self.state.lock();
        state.enter(Operation::Query)?;
        state.known(scope)?;
        Ok(state.tree.query(scope, pattern))
    }

    async fn closest(&self, node: NodeId, pattern: &Selector) -> DocumentResult<Option<NodeId>> {
        self.lag(Operation::Closest).await;
        let mut state = self.state.lock();
        state.enter(Operation::Closest)?;
        state.known(node)?;
        Ok(state.tree.closest(node, pattern))
    }

    async fn is_connected(&self, node: NodeId) -> DocumentResult<bool> {
        self.lag(Operation::IsConnected).await;
        let mut state = self.state.lock();
        state.enter(Operation::IsConnected)?;
        Ok(state.tree.is_connected(node))
    }

    async fn detached(&self, nodes: &[NodeId]) -> DocumentResult<Vec<NodeId>> {
        self.lag(Operation::Detached).await;
        let mut state = self.state.lock();
        state.enter(Operation::Detached)?;
        Ok(nodes
            .iter()
            .copied()
            .filter(|node| !state.tree.is_connected(*node))
            .collect())
    }

    async fn insert_control(&self, header: NodeId, spec: &ControlSpec) -> DocumentResult<NodeId> {
        self.lag(Operation::InsertControl).await;
        let mut state = self.state.lock();
        state.enter(Operation::InsertControl)?;
        state.known(header)?;

        let control = state.tree.create_element("button");
        state.tree.set_attribute(control, "class", &spec.class_name);
        state.tree.set_attribute(control, "title", &spec.title);
        if let Some(style) = &spec.style {
            state.tree.set_attribute(control, "style", style);
        }
        let label = state.tree.create_text(&spec.label);
        state.tree.append(control, label).map_err(DocumentError::NodeGone)?;

        state.append(header, control)?;
        state.controls.insert(control);
        Ok(control)
    }

    async fn remove_node(&self, node: NodeId) -> DocumentResult<()> {
        self.lag(Operation::RemoveNode).await;
        let mut state = self.state.lock();
        state.enter(Operation::RemoveNode)?;
        state.detach(node);
        Ok(())
    }

    async fn ensure_positioned(&self, node: NodeId) -> DocumentResult<()> {
        self.lag(Operation::EnsurePositioned).await;
        let mut state = self.state.lock();
        state.enter(Operation::EnsurePositioned)?;
        state.known(node)?;
        if state.tree.inline_position(node).is_none() {
            let style = match state.tree.attribute(node, "style") {
                Some(existing) if !existing.trim().is_empty() => {
                    format!("{}; position: relative", existing.trim_end().trim_end_matches(';'))
                }
                _ => "position: relative".to_string(),
            };
            state.set_attribute(node, "style", &style);
        }
        Ok(())
    }

    async fn bounding_rect(&self, node: NodeId) -> DocumentResult<Rect> {
        self.lag(Operation::BoundingRect).await;
        let mut state = self.state.lock();
        state.enter(Operation::BoundingRect)?;
        let rect = state.tree.get(node).map(|n| n.rect).ok_or(DocumentError::NodeGone(node))?;
        let scroll_y = state.viewport.scroll_y;
        Ok(Rect::new(rect.left, rect.top - scroll_y, rect.right, rect.bottom - scroll_y))
    }

    async fn viewport(&self) -> DocumentResult<Viewport> {
        self.lag(Operation::Viewport).await;
        let mut state = self.state.lock();
        state.enter(Operation::Viewport)?;
        Ok(state.viewport)
    }

    async fn scroll_to(&self, top: f64, behavior: ScrollBehavior) -> DocumentResult<()> {
        self.lag(Operation::ScrollTo).await;
        let mut state = self.state.lock();
        state.enter(Operation::ScrollTo)?;
        state.scrolls.push((top, behavior));
        state.viewport.scroll_y = top.max(0.0);
        Ok(())
    }

    async fn select_contents(&self, node: NodeId) -> DocumentResult<Option<String>> {
        self.lag(Operation::SelectContents).await;
        let mut state = self.state.lock();
        state.enter(Operation::SelectContents)?;
        state.known(node)?;
        if state.tree.children(node).is_empty() {
            return Ok(None);
        }
        let text = state.tree.text_content(node);
        state.selection = Some((node, text.clone()));
        Ok(Some(text))
    }

    async fn dispatch(&self, target: EventTarget, event: SyntheticEvent) -> DocumentResult<()> {
        self.lag(Operation::Dispatch).await;
        let mut state = self.state.lock();
        state.enter(Operation::Dispatch)?;
        if let EventTarget::Node(node) = target {
            state.known(node)?;
        }
        state.dispatched.push((target, event));
        Ok(())
    }

    async fn add_shortcut_listener(&self, shortcut: &Shortcut) -> DocumentResult<ListenerId> {
        self.lag(Operation::AddListener).await;
        let mut state = self.state.lock();
        state.enter(Operation::AddListener)?;
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.insert(id, shortcut.clone());
        Ok(id)
    }

    async fn remove_shortcut_listener(&self, listener: ListenerId) -> DocumentResult<()> {
        self.lag(Operation::RemoveListener).await;
        let mut state = self.state.lock();
        state.enter(Operation::RemoveListener)?;
        state.listeners.remove(&listener);
        Ok(())
    }

    async fn observe(
        &self,
        options: &ObserveOptions,
    ) -> DocumentResult<mpsc::UnboundedReceiver<PageEvent>> {
        self.lag(Operation::Observe).await;
        let mut state = self.state.lock();
        state.enter(Operation::Observe)?;
        let activation = compile(options.activation_pattern.as_deref(), "activation")?;
        let targets = compile(options.target_pattern.as_deref(), "target")?;
        let (tx, rx) = mpsc::unbounded_channel();
        state.observer = Some(Observer {
            tx,
            options: options.clone(),
            activation,
            targets,
        });
        Ok(rx)
    }

    async fn disconnect(&self) -> DocumentResult<()> {
        self.lag(Operation::Disconnect).await;
        let mut state = self.state.lock();
        state.enter(Operation::Disconnect)?;
        state.observer.take().map(|_| ()).ok_or(DocumentError::NotObserving)
    }
}

fn compile(pattern: Option<&str>, what: &str) -> DocumentResult<Option<Selector>> {
    pattern
        .map(Selector::parse)
        .transpose()
        .map_err(|e| DocumentError::Backend(format!("invalid {} pattern: {}", what, e)))
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
