//! Content-block scanner.

use std::sync::Arc;

use crate::document::{HostDocument, NodeId};
use crate::error::DocumentResult;
use crate::settings::Settings;

/// Current state of one content block, read fresh from the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockScan {
    pub block: NodeId,
    /// Present while the block is collapsed.
    pub expand_affordance: Option<NodeId>,
    /// Reported for diagnostics only.
    pub collapse_affordance: Option<NodeId>,
    pub header: Option<NodeId>,
    pub content: Option<NodeId>,
    /// Every control element inside the block, in document order.
    pub controls: Vec<NodeId>,
    /// First control element inside the header.
    pub header_control: Option<NodeId>,
}

impl BlockScan {
    pub fn is_expanded(&self) -> bool {
        self.expand_affordance.is_none()
    }

    /// Expanded with a header to host the control.
    pub fn is_actionable(&self) -> bool {
        self.is_expanded() && self.header.is_some()
    }

    pub fn has_control(&self) -> bool {
        self.header_control.is_some()
    }

    /// Controls that are not the header control.
    pub fn strays(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.controls
            .iter()
            .copied()
            .filter(move |control| Some(*control) != self.header_control)
    }
}

/// Reads block state through the host document. Nothing is cached.
#[derive(Clone)]
pub struct BlockScanner {
    doc: Arc<dyn HostDocument>,
    settings: Arc<Settings>,
}

impl BlockScanner {
    pub fn new(doc: Arc<dyn HostDocument>, settings: Arc<Settings>) -> Self {
        Self { doc, settings }
    }

    pub async fn scan(&self, block: NodeId) -> DocumentResult<BlockScan> {
        let patterns = &self.settings.patterns;

        let expand_affordance = self.doc.query(block, &patterns.expand).await?;
        let collapse_affordance = self.doc.query(block, &patterns.collapse).await?;
        let header = self.doc.query(block, &patterns.header).await?;
        let content = self.doc.query(block, &patterns.content).await?;
        let controls = self.doc.query_all(Some(block), &patterns.control).await?;

        let header_control = match header {
            Some(header) => self.doc.query(header, &patterns.control).await?,
            None => None,
        };

        Ok(BlockScan {
            block,
            expand_affordance,
            collapse_affordance,
            header,
            content,
            controls,
            header_control,
        })
    }
}
