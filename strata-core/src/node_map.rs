#![forbid(unsafe_code)]

use std::collections::HashMap;

use strata_ir::Node;

/// Maps nodes produced by earlier passes back to the node they were derived
/// from in the type-checked program.
#[derive(Clone, Debug, Default)]
pub struct NodeMap {
    map: HashMap<Node, Node>,
}

impl NodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `derived` to the root of `original`. Entries already mapped to
    /// `derived` are moved along, so chains resolve to their root whatever
    /// order the links are recorded in.
    pub fn insert(&mut self, derived: Node, original: Node) {
        let original = self.original_or_input(original);
        if original == derived {
            return;
        }
        for target in self.map.values_mut() {
            if *target == derived {
                *target = original;
            }
        }
        self.map.insert(derived, original);
    }

    /// Records the `(copy, original)` pairs of a duplicated implementation.
    /// Copies of copies resolve to the first original.
    pub fn record_copy(&mut self, pairs: impl IntoIterator<Item = (Node, Node)>) {
        for (derived, original) in pairs {
            self.insert(derived, original);
        }
    }

    pub fn get(&self, node: Node) -> Option<Node> {
        self.map.get(&node).copied()
    }

    pub fn original_or_input(&self, node: Node) -> Node {
        self.get(node).unwrap_or(node)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
