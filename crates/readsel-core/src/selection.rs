//! Selection trigger.
//!
//! Scrolls a block into reading position, selects its content and tells the
//! page about it. The whole sequence is best effort: every failure is logged
//! and swallowed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::document::{EventTarget, HostDocument, NodeId, ScrollBehavior, SyntheticEvent};
use crate::error::DocumentResult;
use crate::selector::Selector;
use crate::settings::Settings;

#[derive(Clone)]
pub struct SelectionTrigger {
    doc: Arc<dyn HostDocument>,
    content: Selector,
    settle: Duration,
    anchor: f64,
}

impl SelectionTrigger {
    pub fn new(doc: Arc<dyn HostDocument>, settings: &Settings) -> Self {
        Self {
            doc,
            content: settings.patterns.content.clone(),
            settle: settings.scroll_settle,
            anchor: settings.scroll_anchor,
        }
    }

    /// Select the content of `block`.
    ///
    /// Returns the selected text once the notification sequence has been
    /// dispatched, `None` when nothing was selected.
    pub async fn run(&self, block: NodeId) -> Option<String> {
        match self.select(block).await {
            Ok(selected) => selected,
            Err(e) => {
                warn!("Selection in block {} failed: {}", block, e);
                None
            }
        }
    }

    async fn select(&self, block: NodeId) -> DocumentResult<Option<String>> {
        let Some(content) = self.doc.query(block, &self.content).await? else {
            warn!("Block {} has no content element", block);
            return Ok(None);
        };
        if !self.doc.is_connected(content).await? {
            warn!("Content element {} is no longer attached", content);
            return Ok(None);
        }

        let rect = self.doc.bounding_rect(content).await?;
        let viewport = self.doc.viewport().await?;
        let target = viewport.scroll_y + rect.bottom - viewport.inner_height * self.anchor;
        debug!("Scrolling to {:.0} for block {}", target, block);
        self.doc.scroll_to(target, ScrollBehavior::Smooth).await?;

        tokio::time::sleep(self.settle).await;

        let Some(text) = self.doc.select_contents(content).await? else {
            debug!("Content element {} is empty, nothing selected", content);
            return Ok(None);
        };

        self.notify(EventTarget::Document, SyntheticEvent::SelectionChange)
            .await;
        self.notify(
            EventTarget::Node(content),
            SyntheticEvent::MouseUp {
                client_x: rect.right,
                client_y: rect.bottom,
            },
        )
        .await;
        self.notify(
            EventTarget::Node(content),
            SyntheticEvent::TextSelected {
                selected_text: text.clone(),
                target: content,
            },
        )
        .await;

        debug!("Selected {} chars in block {}", text.chars().count(), block);
        Ok(Some(text))
    }

    async fn notify(&self, target: EventTarget, event: SyntheticEvent) {
        if let Err(e) = self.doc.dispatch(target, event.clone()).await {
            warn!("Failed to dispatch {:?} to {:?}: {}", event, target, e);
        }
    }
}
