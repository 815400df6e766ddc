//! Augmenter lifecycle.
//!
//! [`Augmenter::start`] is the bootstrap: wait for the document, reconcile
//! every block already present, then subscribe to page events. An event pump
//! task feeds mutation batches through the mutation debouncer into the
//! [`Reconciler`] and routes control activations and shortcut presses to the
//! owning block. [`Augmenter::stop`] undoes all of it.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::control::Transition;
use crate::debounce::Debouncer;
use crate::document::{HostDocument, MutationRecord, NodeId, ObserveOptions, PageEvent};
use crate::error::{CoreError, CoreResult};
use crate::metrics::AugmenterMetrics;
use crate::reconcile::Reconciler;
use crate::settings::Settings;

struct Running {
    pump: JoinHandle<()>,
    /// Cancelled when the page event stream ends or the augmenter stops.
    closed: CancellationToken,
}

/// Keeps one action control on every expanded content block of a page.
pub struct Augmenter {
    doc: Arc<dyn HostDocument>,
    settings: Arc<Settings>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<AugmenterMetrics>,
    running: Mutex<Option<Running>>,
}

impl Augmenter {
    pub fn new(doc: Arc<dyn HostDocument>, settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let metrics = Arc::new(AugmenterMetrics::new());
        let reconciler = Arc::new(Reconciler::new(
            doc.clone(),
            settings.clone(),
            metrics.clone(),
        ));
        Self {
            doc,
            settings,
            reconciler,
            metrics,
            running: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &AugmenterMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of blocks currently tracked.
    pub fn tracked_blocks(&self) -> usize {
        self.reconciler.registry().len()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Bootstrap and start the reconciliation loop.
    ///
    /// On failure every control attached by the eager pass is removed again.
    pub async fn start(&self) -> CoreResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CoreError::AlreadyRunning);
        }

        match self.launch().await {
            Ok(started) => {
                self.metrics.mark_start();
                *running = Some(started);
                info!(
                    "Reconciliation loop started (debounce {:?}, retry {}x{:?})",
                    self.settings.mutation_debounce,
                    self.settings.retry.attempts,
                    self.settings.retry.delay
                );
                Ok(())
            }
            Err(e) => {
                self.reconciler.shutdown().await;
                Err(e)
            }
        }
    }

    async fn launch(&self) -> CoreResult<Running> {
        self.doc.wait_until_ready().await?;

        // Subscribed before the eager pass so no insertion falls in between.
        let patterns = &self.settings.patterns;
        let options = ObserveOptions::default()
            .with_activation(&patterns.control)
            .with_targets(&patterns.block);
        let events = self.doc.observe(&options).await?;
        let closed = CancellationToken::new();
        let pump = tokio::spawn(pump(
            self.reconciler.clone(),
            events,
            self.settings.clone(),
            closed.clone(),
        ));
        let running = Running { pump, closed };

        let blocks = match self.doc.query_all(None, &patterns.block).await {
            Ok(blocks) => blocks,
            Err(e) => {
                self.halt(running).await;
                return Err(e.into());
            }
        };
        info!("Found {} content block(s)", blocks.len());
        for block in blocks {
            self.reconciler.spawn(block);
        }
        Ok(running)
    }

    /// End the event pump and the mutation subscription.
    async fn halt(&self, running: Running) {
        running.pump.abort();
        let _ = running.pump.await;
        if let Err(e) = self.doc.disconnect().await {
            warn!("Failed to disconnect mutation observer: {}", e);
        }
        running.closed.cancel();
    }

    /// [`start`](Self::start), logging failures instead of returning them.
    pub async fn bootstrap(&self) {
        if let Err(e) = self.start().await {
            error!("Bootstrap failed: {}", e);
        }
    }

    /// Stop the loop and leave the page as it was found.
    pub async fn stop(&self) -> CoreResult<()> {
        let running = self.running.lock().await.take().ok_or(CoreError::NotRunning)?;

        self.halt(running).await;

        let removed = self.reconciler.shutdown().await;
        let snapshot = self.metrics.snapshot();
        info!(
            "Augmenter stopped: removed {} control(s); {} batches, {} reconciliations, \
             {} attached, {} adopted, {} detached, {} failures, {} selections, {} teardowns",
            removed,
            snapshot.batches,
            snapshot.reconciliations,
            snapshot.attached,
            snapshot.adopted,
            snapshot.detached,
            snapshot.failures,
            snapshot.selections,
            snapshot.teardowns
        );
        Ok(())
    }

    /// Run one reconciliation pass over `block` and wait for it.
    pub async fn reconcile(&self, block: NodeId) -> CoreResult<Transition> {
        self.reconciler.reconcile(block).await
    }

    /// Resolve once the page event stream has ended or the augmenter stopped.
    ///
    /// Returns immediately when the augmenter is not running.
    pub async fn closed(&self) {
        let closed = match self.running.lock().await.as_ref() {
            Some(running) => running.closed.clone(),
            None => return,
        };
        closed.cancelled().await;
    }
}

async fn pump(
    reconciler: Arc<Reconciler>,
    mut events: UnboundedReceiver<PageEvent>,
    settings: Arc<Settings>,
    closed: CancellationToken,
) {
    let batcher = {
        let reconciler = reconciler.clone();
        Debouncer::with_merge(
            settings.mutation_debounce,
            |pending: &mut Vec<MutationRecord>, records| pending.extend(records),
            move |records| {
                let reconciler = reconciler.clone();
                async move { reconciler.handle_batch(records).await }
            },
        )
    };

    while let Some(event) = events.recv().await {
        match event {
            PageEvent::Mutations(records) => {
                trace!("{} mutation record(s)", records.len());
                batcher.call(records);
            }
            PageEvent::ControlActivated { control } => {
                match reconciler.registry().activate_control(control) {
                    Some(block) => debug!("Control {} of block {} activated", control, block),
                    None => debug!("Activation of unknown control {} ignored", control),
                }
            }
            PageEvent::ShortcutTriggered { listener } => {
                match reconciler.registry().activate_listener(listener) {
                    Some(block) => debug!("Shortcut {} fired for block {}", listener, block),
                    None => debug!("Shortcut from unknown {} ignored", listener),
                }
            }
        }
    }

    warn!("Page event stream ended");
    closed.cancel();
}
