//! Arena node tree backing [`MemoryDocument`](super::MemoryDocument).

use std::collections::HashMap;

use crate::document::{NodeId, Rect};
use crate::selector::{ElementTree, Selector};

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Layout box in page coordinates.
    pub rect: Rect,
}

/// Nodes are never freed; a removed node is merely detached, like in a DOM.
#[derive(Debug)]
pub(crate) struct Tree {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    body: NodeId,
}

impl Tree {
    pub fn new() -> Self {
        let mut tree = Self {
            nodes: HashMap::new(),
            next_id: 1,
            body: NodeId(0),
        };
        tree.body = tree.create_element("body");
        tree
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                parent: None,
                children: Vec::new(),
                rect: Rect::default(),
            },
        );
        id
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.insert(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.insert(NodeKind::Text(text.to_string()))
    }

    pub fn get(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(&node)
    }

    pub fn get_mut(&mut self, node: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node)?.parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes.get(&node).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        matches!(self.nodes.get(&node).map(|n| &n.kind), Some(NodeKind::Element { .. }))
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(node) && self.is_inclusive_ancestor(self.body, node)
    }

    /// Detach `node` from its parent, returning the former parent.
    pub fn detach(&mut self, node: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get_mut(&node)?.parent.take()?;
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != node);
        }
        Some(parent)
    }

    /// Append `child` to `parent`, moving it if it is attached elsewhere.
    ///
    /// Returns the former parent. Refuses to create a cycle.
    pub fn append(&mut self, parent: NodeId, child: NodeId) -> Result<Option<NodeId>, NodeId> {
        if !self.contains(parent) {
            return Err(parent);
        }
        if !self.contains(child) || self.is_inclusive_ancestor(child, parent) {
            return Err(child);
        }
        let previous = self.detach(child);
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
        Ok(previous)
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        match &self.nodes.get(&node)?.kind {
            NodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    fn attributes_mut(&mut self, node: NodeId) -> Option<&mut Vec<(String, String)>> {
        match self.nodes.get_mut(&node).map(|n| &mut n.kind) {
            Some(NodeKind::Element { attributes, .. }) => Some(attributes),
            _ => None,
        }
    }

    /// Returns whether the value changed.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> bool {
        let Some(attributes) = self.attributes_mut(node) else {
            return false;
        };
        let name = name.to_ascii_lowercase();
        match attributes.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) if existing.as_str() == value => false,
            Some((_, existing)) => {
                *existing = value.to_string();
                true
            }
            None => {
                attributes.push((name, value.to_string()));
                true
            }
        }
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> bool {
        let Some(attributes) = self.attributes_mut(node) else {
            return false;
        };
        let before = attributes.len();
        attributes.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        attributes.len() != before
    }

    pub fn classes(&self, node: NodeId) -> Vec<String> {
        self.attribute(node, "class")
            .map(|c| c.split_ascii_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Descendants of `node` in document order, `node` excluded.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    pub fn query_all(&self, scope: NodeId, pattern: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|n| pattern.matches(self, *n))
            .collect()
    }

    pub fn query(&self, scope: NodeId, pattern: &Selector) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|n| pattern.matches(self, *n))
    }

    pub fn closest(&self, node: NodeId, pattern: &Selector) -> Option<NodeId> {
        let mut current = if self.is_element(node) {
            Some(node)
        } else {
            self.parent(node)
        };
        while let Some(n) = current {
            if pattern.matches(self, n) {
                return Some(n);
            }
            current = self.parent(n);
        }
        None
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut text = String::new();
        if let Some(NodeKind::Text(t)) = self.nodes.get(&node).map(|n| &n.kind) {
            text.push_str(t);
        }
        for d in self.descendants(node) {
            if let Some(NodeKind::Text(t)) = self.nodes.get(&d).map(|n| &n.kind) {
                text.push_str(t);
            }
        }
        text
    }

    /// Value of the `position` declaration in the inline style, if any.
    pub fn inline_position(&self, node: NodeId) -> Option<String> {
        self.attribute(node, "style")?
            .split(';')
            .filter_map(|decl| decl.split_once(':'))
            .find(|(prop, _)| prop.trim().eq_ignore_ascii_case("position"))
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

impl ElementTree for Tree {
    type Node = NodeId;

    fn local_name(&self, node: NodeId) -> Option<&str> {
        match &self.nodes.get(&node)?.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        Tree::attribute(self, node, name)
    }

    fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.parent(node).filter(|p| self.is_element(*p))
    }
}
