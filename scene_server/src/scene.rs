//! Connection-scoped scene graph.
//!
//! Nodes are added when the client acknowledges the matching resource, so
//! only objects the client knows about produce transform updates.

use scene_shared::{id::ResourceId, math::Mat4};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Model,
    PointLight,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// Never moves; produces no transform updates.
        const STATIC = 1 << 0;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: ResourceId,
    pub kind: NodeType,
    pub transform: Mat4,
    pub flags: NodeFlags,
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    nodes: Vec<Node>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, or returns the existing one with the same name.
    pub fn add_node(&mut self, name: ResourceId, kind: NodeType, transform: Mat4) -> &mut Node {
        let idx = match self.nodes.iter().position(|n| n.name == name) {
            Some(idx) => idx,
            None => {
                self.nodes.push(Node {
                    name,
                    kind,
                    transform,
                    flags: NodeFlags::empty(),
                });
                self.nodes.len() - 1
            }
        };
        &mut self.nodes[idx]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
