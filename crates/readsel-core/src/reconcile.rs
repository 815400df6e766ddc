//! Reconciliation loop.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::control::{ControlAttacher, Transition};
use crate::document::{HostDocument, MutationKind, MutationRecord, NodeId};
use crate::error::{CoreResult, DocumentError};
use crate::metrics::AugmenterMetrics;
use crate::registry::{BlockRegistry, Removed};
use crate::retry::with_retry;
use crate::settings::Settings;

/// Runs attachment passes and turns mutation batches into them.
pub struct Reconciler {
    doc: Arc<dyn HostDocument>,
    settings: Arc<Settings>,
    registry: Arc<BlockRegistry>,
    attacher: ControlAttacher,
    metrics: Arc<AugmenterMetrics>,
}

impl Reconciler {
    pub fn new(
        doc: Arc<dyn HostDocument>,
        settings: Arc<Settings>,
        metrics: Arc<AugmenterMetrics>,
    ) -> Self {
        let registry = Arc::new(BlockRegistry::new());
        let attacher = ControlAttacher::new(
            doc.clone(),
            settings.clone(),
            registry.clone(),
            metrics.clone(),
        );
        Self {
            doc,
            settings,
            registry,
            attacher,
            metrics,
        }
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    /// One retry-wrapped attachment pass over `block`.
    ///
    /// Passes over the same block never overlap. A final failure is logged
    /// and counted before it is returned.
    pub async fn reconcile(&self, block: NodeId) -> CoreResult<Transition> {
        let gate = self.registry.gate(block);
        let _pass = gate.lock().await;

        let result = with_retry(&self.settings.retry, "Control attachment", move || {
            self.attacher.apply(block)
        })
        .await;
        self.metrics.record_reconciliation();

        match result {
            Ok(transition) => {
                trace!("Block {} reconciled: {:?}", block, transition);
                Ok(transition)
            }
            Err(e) => {
                self.metrics.record_failure();
                warn!(
                    "Reconciliation of block {} failed after {} attempt(s): {}",
                    block,
                    self.settings.retry.attempts.max(1),
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Reconcile `block` on a task of its own.
    pub fn spawn(self: &Arc<Self>, block: NodeId) {
        let this = self.clone();
        let task = tokio::spawn(async move {
            // Failures are already logged by `reconcile`.
            let _ = this.reconcile(block).await;
        });
        self.registry.track_task(block, task);
    }

    /// Handle one debounced batch of mutation records.
    pub async fn handle_batch(self: &Arc<Self>, records: Vec<MutationRecord>) {
        self.metrics.record_batch();

        let structural = records
            .iter()
            .any(|record| record.kind == MutationKind::ChildList);
        let mut targets: Vec<NodeId> = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        for record in &records {
            if seen.insert(record.target) {
                targets.push(record.target);
            }
        }

        let mut pending: HashSet<NodeId> = HashSet::new();
        for target in targets {
            match self.doc.closest(target, &self.settings.patterns.block).await {
                Ok(Some(block)) => {
                    if pending.insert(block) {
                        self.spawn(block);
                    }
                }
                Ok(None) => {}
                Err(DocumentError::NodeGone(node)) => {
                    trace!("Mutation target {} is gone", node);
                }
                Err(e) => debug!("Failed to resolve block for {}: {}", target, e),
            }
        }
        debug!(
            "Batch of {} record(s) touched {} block(s)",
            records.len(),
            pending.len()
        );

        // Only child-list changes can take a block out of the document.
        if structural {
            self.sweep().await;
        }
    }

    /// Tear down tracked blocks that left the document.
    async fn sweep(&self) {
        let tracked = self.registry.tracked();
        if tracked.is_empty() {
            return;
        }
        let gone = match self.doc.detached(&tracked).await {
            Ok(gone) => gone,
            Err(e) => {
                debug!("Failed to check {} tracked block(s): {}", tracked.len(), e);
                return;
            }
        };
        for block in gone {
            if let Some(removed) = self.registry.remove(block) {
                self.teardown(block, removed).await;
                self.metrics.record_teardown();
            }
        }
    }

    async fn teardown(&self, block: NodeId, mut removed: Removed) {
        removed.cancel_tasks().await;
        if let Some(binding) = removed.binding {
            debug!("Tearing down binding of removed block {}", block);
            self.attacher.release(binding).await;
        }
    }

    /// Abort all work, release every binding and remove every control.
    ///
    /// Passes in flight are awaited before their blocks are cleared, so a
    /// control inserted by an interrupted pass is removed as well. Returns
    /// the number of controls removed.
    pub async fn shutdown(&self) -> usize {
        let mut blocks = Vec::new();
        loop {
            let drained = self.registry.drain();
            if drained.is_empty() {
                break;
            }
            for (block, mut removed) in drained {
                removed.cancel_tasks().await;
                if let Some(binding) = removed.binding {
                    self.attacher.release(binding).await;
                }
                blocks.push(block);
            }
        }

        let mut removed_controls = 0;
        for block in blocks {
            let controls = match self
                .doc
                .query_all(Some(block), &self.settings.patterns.control)
                .await
            {
                Ok(controls) => controls,
                Err(e) => {
                    trace!("Skipping controls of block {}: {}", block, e);
                    continue;
                }
            };
            for control in controls {
                self.attacher.remove_control(control).await;
                removed_controls += 1;
                trace!("Removed control {} of block {}", control, block);
            }
        }
        removed_controls
    }
}
