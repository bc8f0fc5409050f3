//! Node selection for spreading clients across instances

use crate::random::RandomSource;
use discovery_core::Node;

/// Picks one node uniformly at random
pub struct NodeSelector {
    rng: RandomSource,
}

impl NodeSelector {
    /// Create a new selector drawing from `rng`
    pub fn new(rng: RandomSource) -> Self {
        Self { rng }
    }

    /// Select a node, returning its index alongside it. `None` for an empty list.
    pub fn select<'a>(&self, nodes: &'a [Node]) -> Option<(usize, &'a Node)> {
        let index = self.rng.index(nodes.len())?;
        nodes.get(index).map(|node| (index, node))
    }
}

impl Default for NodeSelector {
    fn default() -> Self {
        Self::new(RandomSource::from_entropy())
    }
}
