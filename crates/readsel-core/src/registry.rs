//! Per-block bookkeeping.
//!
//! The host page assigns no identifiers, so every block seen by the augmenter
//! is tracked under its [`NodeId`]. An entry carries the async gate that
//! serialises reconciliation passes of the block, the handles of its spawned
//! tasks, and the binding of its control, if any. Control and listener
//! indexes route page events back to the owning block.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::debounce::Debouncer;
use crate::document::{ListenerId, NodeId};

/// A live control's activation wiring.
pub struct Binding {
    pub control: NodeId,
    pub listener: ListenerId,
    pub activation: Debouncer<()>,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("control", &self.control)
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

/// What is left of a block after it is dropped from the registry.
#[derive(Debug, Default)]
pub struct Removed {
    pub tasks: Vec<JoinHandle<()>>,
    pub binding: Option<Binding>,
}

impl Removed {
    /// Abort the block's tasks and wait until none of them runs.
    pub async fn cancel_tasks(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            // Cancellation and panics were already reported by the task.
            let _ = task.await;
        }
    }
}

#[derive(Default)]
struct BlockEntry {
    gate: Arc<tokio::sync::Mutex<()>>,
    binding: Option<Binding>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct RegistryState {
    blocks: HashMap<NodeId, BlockEntry>,
    by_control: HashMap<NodeId, NodeId>,
    by_listener: HashMap<ListenerId, NodeId>,
}

impl RegistryState {
    fn unindex(&mut self, binding: &Binding) {
        self.by_control.remove(&binding.control);
        self.by_listener.remove(&binding.listener);
    }
}

/// Tracked blocks, keyed by node id.
#[derive(Default)]
pub struct BlockRegistry {
    state: Mutex<RegistryState>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The gate serialising passes over `block`; starts tracking it.
    pub fn gate(&self, block: NodeId) -> Arc<tokio::sync::Mutex<()>> {
        self.state.lock().blocks.entry(block).or_default().gate.clone()
    }

    /// Record a spawned task working on `block`. Finished tasks are pruned.
    pub fn track_task(&self, block: NodeId, task: JoinHandle<()>) {
        let mut state = self.state.lock();
        let entry = state.blocks.entry(block).or_default();
        entry.tasks.retain(|t| !t.is_finished());
        entry.tasks.push(task);
    }

    /// Blocks currently tracked.
    pub fn tracked(&self) -> Vec<NodeId> {
        self.state.lock().blocks.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `control` is the bound control of `block`.
    pub fn is_bound(&self, block: NodeId, control: NodeId) -> bool {
        self.state
            .lock()
            .blocks
            .get(&block)
            .and_then(|entry| entry.binding.as_ref())
            .is_some_and(|binding| binding.control == control)
    }

    /// Store the binding of `block`, returning the one it replaces.
    pub fn bind(&self, block: NodeId, binding: Binding) -> Option<Binding> {
        let mut state = self.state.lock();
        let previous = state.blocks.entry(block).or_default().binding.take();
        if let Some(previous) = &previous {
            state.unindex(previous);
        }

        state.by_control.insert(binding.control, block);
        state.by_listener.insert(binding.listener, block);
        state.blocks.entry(block).or_default().binding = Some(binding);
        previous
    }

    /// Take the binding of `block`, leaving the block tracked.
    pub fn take_binding(&self, block: NodeId) -> Option<Binding> {
        let mut state = self.state.lock();
        let binding = state.blocks.get_mut(&block)?.binding.take()?;
        state.unindex(&binding);
        Some(binding)
    }

    /// Fire the activation of the block owning `control`.
    pub fn activate_control(&self, control: NodeId) -> Option<NodeId> {
        let state = self.state.lock();
        let block = *state.by_control.get(&control)?;
        Self::activate(&state, block)
    }

    /// Fire the activation of the block owning `listener`.
    pub fn activate_listener(&self, listener: ListenerId) -> Option<NodeId> {
        let state = self.state.lock();
        let block = *state.by_listener.get(&listener)?;
        Self::activate(&state, block)
    }

    fn activate(state: &RegistryState, block: NodeId) -> Option<NodeId> {
        let binding = state.blocks.get(&block)?.binding.as_ref()?;
        binding.activation.call(());
        Some(block)
    }

    /// Stop tracking `block`.
    pub fn remove(&self, block: NodeId) -> Option<Removed> {
        let mut state = self.state.lock();
        let entry = state.blocks.remove(&block)?;
        if let Some(binding) = &entry.binding {
            state.unindex(binding);
        }
        Some(Removed {
            tasks: entry.tasks,
            binding: entry.binding,
        })
    }

    /// Stop tracking every block.
    pub fn drain(&self) -> Vec<(NodeId, Removed)> {
        let mut state = self.state.lock();
        state.by_control.clear();
        state.by_listener.clear();
        state
            .blocks
            .drain()
            .map(|(block, entry)| {
                (
                    block,
                    Removed {
                        tasks: entry.tasks,
                        binding: entry.binding,
                    },
                )
            })
            .collect()
    }
}
