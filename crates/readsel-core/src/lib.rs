//! # readsel core
//!
//! Keeps one "select all" control on every expanded content block of a live,
//! externally mutated reading page.
//!
//! ## Architecture
//!
//! ```text
//!  page events ──► pump ──► mutation Debouncer ──► Reconciler::handle_batch
//!                   │                                   │ PendingScan
//!                   │                                   ▼
//!                   │                      per-block task (gate + with_retry)
//!                   │                                   │
//!                   │                      ControlAttacher::apply
//!                   │                       BlockScanner ─► Transition
//!                   │                                   │
//!                   └─ activation / shortcut ─► BlockRegistry ─► activation Debouncer
//!                                                               │
//!                                                        SelectionTrigger
//! ```
//!
//! ## Key Components
//!
//! - [`Augmenter`]: start/stop lifecycle and event routing
//! - [`HostDocument`]: everything the core needs from the page
//! - [`Selector`]: structural patterns identifying blocks and their parts
//! - [`Debouncer`] and [`with_retry`]: the two timing disciplines
//! - [`MemoryDocument`]: an in-memory page for tests and embedders
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use readsel_config::Config;
//! use readsel_core::{Augmenter, MemoryDocument, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::from_config(&Config::default())?;
//!     let augmenter = Augmenter::new(Arc::new(MemoryDocument::new()), settings);
//!
//!     augmenter.start().await?;
//!     // ...
//!     augmenter.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod augmenter;
pub mod control;
pub mod debounce;
pub mod document;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod scanner;
pub mod selection;
pub mod selector;
pub mod settings;
pub mod shortcut;

pub use augmenter::Augmenter;
pub use control::{ControlAttacher, Transition};
pub use debounce::Debouncer;
pub use document::{
    ControlSpec, EventTarget, HostDocument, KeyPress, ListenerId, MutationKind, MutationRecord,
    NodeId, ObserveOptions, PageEvent, Rect, ScrollBehavior, SyntheticEvent, Viewport,
};
pub use error::{CoreError, CoreResult, DocumentError, DocumentResult};
pub use memory::{MemoryDocument, Operation};
pub use metrics::{AugmenterMetrics, MetricsSnapshot};
pub use reconcile::Reconciler;
pub use registry::BlockRegistry;
pub use retry::{RetryPolicy, with_retry};
pub use scanner::{BlockScan, BlockScanner};
pub use selection::SelectionTrigger;
pub use selector::{ElementTree, Selector, SelectorError};
pub use settings::{Patterns, Settings};
pub use shortcut::Shortcut;
