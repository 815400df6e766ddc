//! Control attachment.
//!
//! A block is either without a control or has exactly one control in its
//! header, bound to one shortcut listener and one activation debouncer.
//! [`ControlAttacher::apply`] reads the block and performs the smallest
//! transition that restores this state.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::debounce::Debouncer;
use crate::document::{HostDocument, NodeId};
use crate::error::DocumentResult;
use crate::metrics::AugmenterMetrics;
use crate::registry::{Binding, BlockRegistry};
use crate::scanner::BlockScanner;
use crate::selection::SelectionTrigger;
use crate::settings::Settings;

/// Outcome of one attachment step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A control was created and bound.
    Attached,
    /// A control already in the header was bound.
    Adopted,
    /// Controls or a binding were removed.
    Detached,
    /// Nothing needed to change.
    Unchanged,
}

#[derive(Clone)]
pub struct ControlAttacher {
    doc: Arc<dyn HostDocument>,
    settings: Arc<Settings>,
    scanner: BlockScanner,
    registry: Arc<BlockRegistry>,
    trigger: SelectionTrigger,
    metrics: Arc<AugmenterMetrics>,
}

impl ControlAttacher {
    pub fn new(
        doc: Arc<dyn HostDocument>,
        settings: Arc<Settings>,
        registry: Arc<BlockRegistry>,
        metrics: Arc<AugmenterMetrics>,
    ) -> Self {
        Self {
            scanner: BlockScanner::new(doc.clone(), settings.clone()),
            trigger: SelectionTrigger::new(doc.clone(), &settings),
            doc,
            settings,
            registry,
            metrics,
        }
    }

    /// Bring `block` to its desired state.
    pub async fn apply(&self, block: NodeId) -> DocumentResult<Transition> {
        if !self.doc.is_connected(block).await? {
            return Ok(if self.release_block(block).await {
                Transition::Detached
            } else {
                Transition::Unchanged
            });
        }

        let scan = self.scanner.scan(block).await?;

        if !scan.is_actionable() {
            for control in &scan.controls {
                self.doc.remove_node(*control).await?;
            }
            let released = self.release_block(block).await;
            if scan.controls.is_empty() && !released {
                return Ok(Transition::Unchanged);
            }
            debug!(
                "Detached {} control(s) from block {} (expanded: {}, header: {})",
                scan.controls.len(),
                block,
                scan.is_expanded(),
                scan.header.is_some()
            );
            self.metrics.record_detached();
            return Ok(Transition::Detached);
        }

        for stray in scan.strays() {
            debug!("Removing stray control {} from block {}", stray, block);
            self.doc.remove_node(stray).await?;
        }

        if let Some(control) = scan.header_control {
            if self.registry.is_bound(block, control) {
                return Ok(Transition::Unchanged);
            }
            self.bind(block, control).await?;
            debug!("Adopted control {} in block {}", control, block);
            self.metrics.record_adopted();
            return Ok(Transition::Adopted);
        }

        let Some(header) = scan.header else {
            return Ok(Transition::Unchanged);
        };
        self.doc.ensure_positioned(header).await?;
        let control = self.doc.insert_control(header, &self.settings.control).await?;
        self.bind(block, control).await?;
        debug!("Attached control {} to block {}", control, block);
        self.metrics.record_attached();
        Ok(Transition::Attached)
    }

    async fn bind(&self, block: NodeId, control: NodeId) -> DocumentResult<()> {
        if let Some(stale) = self.registry.take_binding(block) {
            self.release(stale).await;
        }

        let listener = self.doc.add_shortcut_listener(&self.settings.shortcut).await?;

        let trigger = self.trigger.clone();
        let metrics = self.metrics.clone();
        let activation = Debouncer::new(self.settings.activation_debounce, move |()| {
            let trigger = trigger.clone();
            let metrics = metrics.clone();
            async move {
                if trigger.run(block).await.is_some() {
                    metrics.record_selection();
                }
            }
        });

        if let Some(stale) = self.registry.bind(
            block,
            Binding {
                control,
                listener,
                activation,
            },
        ) {
            self.release(stale).await;
        }
        Ok(())
    }

    /// Release the binding of `block`, if it has one.
    pub async fn release_block(&self, block: NodeId) -> bool {
        match self.registry.take_binding(block) {
            Some(binding) => {
                self.release(binding).await;
                true
            }
            None => false,
        }
    }

    /// Remove the binding's listener and drop its activation debouncer.
    pub async fn release(&self, binding: Binding) {
        if let Err(e) = self.doc.remove_shortcut_listener(binding.listener).await {
            warn!("Failed to remove {}: {}", binding.listener, e);
        }
    }

    /// Remove a control element, ignoring failures.
    pub async fn remove_control(&self, control: NodeId) {
        if let Err(e) = self.doc.remove_node(control).await {
            warn!("Failed to remove control {}: {}", control, e);
        }
    }
}
