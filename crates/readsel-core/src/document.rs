//! Host document abstraction.
//!
//! The augmenter never touches a concrete DOM. Everything it needs from the
//! page goes through [`HostDocument`]: structural queries, the few writes it
//! performs (inserting and removing the control), the selection capability,
//! and a single event stream carrying mutation batches, control activations
//! and shortcut presses.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::DocumentResult;
use crate::selector::Selector;
use crate::shortcut::Shortcut;

/// Opaque handle to a node of the host document.
///
/// Assigned by the backend the first time a node is reported and stable for
/// the node's lifetime. The page itself provides no identifiers, so this is
/// also the key under which per-block state is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle of a registered keydown listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Bounding box in viewport coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// Window scroll state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    /// Vertical scroll offset of the page.
    pub scroll_y: f64,
    /// Height of the visible area.
    pub inner_height: f64,
}

/// How a scroll request is animated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollBehavior {
    Smooth,
    Instant,
}

/// What the control element looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSpec {
    pub class_name: String,
    pub label: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

/// Subscription scope for mutation notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserveOptions {
    pub child_list: bool,
    pub subtree: bool,
    /// Attribute names whose changes are reported; empty reports none.
    pub attribute_filter: Vec<String>,
    /// Clicks on or inside elements matching this pattern are reported as
    /// [`PageEvent::ControlActivated`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_pattern: Option<String>,
    /// Records are reported against the nearest inclusive ancestor of their
    /// target matching this pattern, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_pattern: Option<String>,
}

impl Default for ObserveOptions {
    /// Structural changes anywhere under the body plus `class` changes.
    fn default() -> Self {
        Self {
            child_list: true,
            subtree: true,
            attribute_filter: vec!["class".to_string()],
            activation_pattern: None,
            target_pattern: None,
        }
    }
}

impl ObserveOptions {
    /// Report clicks on elements matching `pattern`.
    pub fn with_activation(mut self, pattern: &Selector) -> Self {
        self.activation_pattern = Some(pattern.source().to_string());
        self
    }

    /// Report mutations against the enclosing element matching `pattern`.
    pub fn with_targets(mut self, pattern: &Selector) -> Self {
        self.target_pattern = Some(pattern.source().to_string());
        self
    }
}

/// Kind of change a mutation record describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MutationKind {
    ChildList,
    Attributes { name: String },
}

/// One observed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Node whose children or attributes changed.
    pub target: NodeId,
    #[serde(flatten)]
    pub kind: MutationKind,
}

impl MutationRecord {
    pub fn child_list(target: NodeId) -> Self {
        Self {
            target,
            kind: MutationKind::ChildList,
        }
    }

    pub fn attribute(target: NodeId, name: impl Into<String>) -> Self {
        Self {
            target,
            kind: MutationKind::Attributes { name: name.into() },
        }
    }
}

/// Events delivered by an observed document.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    /// A batch of mutation records, as delivered by one observer callback.
    Mutations(Vec<MutationRecord>),
    /// A control element was clicked.
    ControlActivated { control: NodeId },
    /// A registered shortcut listener saw a matching key press.
    ShortcutTriggered { listener: ListenerId },
}

/// Where a synthetic notification is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Document,
    Node(NodeId),
}

/// Notifications emitted after content has been selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyntheticEvent {
    /// Document-level `selectionchange`.
    #[serde(rename = "selectionchange")]
    SelectionChange,
    /// Pointer release at the given client coordinates.
    #[serde(rename = "mouseup", rename_all = "camelCase")]
    MouseUp { client_x: f64, client_y: f64 },
    /// Application-level notification carrying the selected text.
    #[serde(rename = "textSelect", rename_all = "camelCase")]
    TextSelected { selected_text: String, target: NodeId },
}

/// A key press as seen by a keydown listener.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyPress {
    pub key: String,
    pub alt: bool,
    pub ctrl: bool,
    pub shift: bool,
    pub meta: bool,
}

impl KeyPress {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }
}

/// Live, externally mutated document the augmenter works against.
///
/// Implementations must tolerate nodes disappearing between calls: an
/// operation on a removed node returns [`DocumentError::NodeGone`], except
/// [`remove_node`](Self::remove_node) and [`is_connected`](Self::is_connected)
/// which treat it as already done / `false`.
///
/// [`DocumentError::NodeGone`]: crate::error::DocumentError::NodeGone
#[async_trait]
pub trait HostDocument: Send + Sync {
    /// Resolve once the document is no longer loading.
    async fn wait_until_ready(&self) -> DocumentResult<()>;

    /// All elements matching `pattern` under `scope` (the whole document when
    /// `None`), in document order.
    async fn query_all(
        &self,
        scope: Option<NodeId>,
        pattern: &Selector,
    ) -> DocumentResult<Vec<NodeId>>;

    /// First descendant of `scope` matching `pattern`.
    async fn query(&self, scope: NodeId, pattern: &Selector) -> DocumentResult<Option<NodeId>>;

    /// Nearest inclusive ancestor element of `node` matching `pattern`.
    async fn closest(&self, node: NodeId, pattern: &Selector) -> DocumentResult<Option<NodeId>>;

    /// Whether `node` is still attached to the document.
    async fn is_connected(&self, node: NodeId) -> DocumentResult<bool>;

    /// Those of `nodes` that are no longer attached, in the given order.
    ///
    /// One call for any number of nodes; unknown nodes count as detached.
    async fn detached(&self, nodes: &[NodeId]) -> DocumentResult<Vec<NodeId>>;

    /// Append a new control element to `header` and return its id.
    async fn insert_control(&self, header: NodeId, spec: &ControlSpec) -> DocumentResult<NodeId>;

    /// Detach `node` from the document.
    async fn remove_node(&self, node: NodeId) -> DocumentResult<()>;

    /// Give `node` a positioning context unless it already has an inline one.
    async fn ensure_positioned(&self, node: NodeId) -> DocumentResult<()>;

    async fn bounding_rect(&self, node: NodeId) -> DocumentResult<Rect>;

    async fn viewport(&self) -> DocumentResult<Viewport>;

    async fn scroll_to(&self, top: f64, behavior: ScrollBehavior) -> DocumentResult<()>;

    /// Select everything from the first to the last child of `node`.
    ///
    /// Returns the selected text, or `None` when `node` has no children and
    /// nothing was selected.
    async fn select_contents(&self, node: NodeId) -> DocumentResult<Option<String>>;

    async fn dispatch(&self, target: EventTarget, event: SyntheticEvent) -> DocumentResult<()>;

    async fn add_shortcut_listener(&self, shortcut: &Shortcut) -> DocumentResult<ListenerId>;

    async fn remove_shortcut_listener(&self, listener: ListenerId) -> DocumentResult<()>;

    /// Start the mutation subscription and return the page event stream.
    async fn observe(
        &self,
        options: &ObserveOptions,
    ) -> DocumentResult<mpsc::UnboundedReceiver<PageEvent>>;

    /// Stop the mutation subscription; the event stream ends.
    async fn disconnect(&self) -> DocumentResult<()>;
}
